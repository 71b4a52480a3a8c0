//! Integration tests for the multi-key dispatcher.
//!
//! Backends are scripted in memory: each key either fails with a chosen
//! error class or replies with a fixed list of fragments.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use munbot_core::{
    ChatBackend, ChatSession, GenerationConfig, LoadError, Preamble, PreambleSource,
    ProviderError, ReplyStream, collect_reply,
};
use munbot_dispatch::{DispatchConfig, DispatchError, Dispatcher, HealthMonitor};

#[derive(Clone)]
enum Outcome {
    Fail(ProviderError),
    Reply(Vec<&'static str>),
}

struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Outcome,
    sends: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl ScriptedBackend {
    fn new(fallback: Outcome, sends: &Arc<AtomicUsize>) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            sends: Arc::clone(sends),
            opened: AtomicUsize::new(0),
        }
    }

    fn then(self, outcomes: Vec<Outcome>) -> Self {
        self.script.lock().unwrap().extend(outcomes);
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_session(
        &self,
        _preamble: Arc<Preamble>,
        _config: &GenerationConfig,
    ) -> Result<Arc<dyn ChatSession>, ProviderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            script: Arc::clone(&self.script),
            fallback: self.fallback.clone(),
            sends: Arc::clone(&self.sends),
        }))
    }
}

struct ScriptedSession {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Outcome,
    sends: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatSession for ScriptedSession {
    async fn send_stream(&self, _message: &str) -> Result<ReplyStream, ProviderError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match outcome {
            Outcome::Fail(err) => Err(err),
            Outcome::Reply(chunks) => {
                let fragments: Vec<Result<String, ProviderError>> =
                    chunks.into_iter().map(|c| Ok(c.to_string())).collect();
                Ok(Box::pin(stream::iter(fragments)))
            }
        }
    }
}

struct StaticSource {
    loads: AtomicUsize,
    persona: &'static str,
}

impl StaticSource {
    fn new() -> Self {
        Self::with_persona("You are the conference assistant.")
    }

    fn with_persona(persona: &'static str) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            persona,
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreambleSource for StaticSource {
    async fn load(&self) -> Result<Preamble, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        munbot_core::preamble::ensure_plain_text("/personality.txt", self.persona.to_string())
            .map(|persona| Preamble::new(persona, "Conference runs Friday to Sunday.".to_string()))
    }
}

fn auth_error() -> Outcome {
    Outcome::Fail(ProviderError::Auth("HTTP 403: API key not valid".to_string()))
}

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        backoff_ms: 0,
        ..DispatchConfig::default()
    }
}

fn dispatcher(
    backends: Vec<ScriptedBackend>,
    source: Arc<StaticSource>,
    config: DispatchConfig,
) -> Dispatcher<ScriptedBackend, Arc<StaticSource>> {
    Dispatcher::new(backends, source, GenerationConfig::default(), config).unwrap()
}

#[tokio::test]
async fn rotates_past_rejected_keys_to_a_working_one() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(Outcome::Reply(vec!["Hello", " world"]), &sends),
    ];
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), fast_config());

    let before = Utc::now();
    let stream = dispatcher.send("Hi there").await.unwrap();
    let reply = collect_reply(stream).await.unwrap();

    assert_eq!(reply, "Hello world");
    assert_eq!(sends.load(Ordering::SeqCst), 3);

    let stats = dispatcher.stats();
    assert_eq!(stats.key_statuses[0].error_count, 1);
    assert_eq!(stats.key_statuses[1].error_count, 1);
    assert_eq!(stats.key_statuses[2].error_count, 0);
    assert!(stats.key_statuses[2].last_used.unwrap() >= before);
    assert!(stats.key_statuses[0].last_error.as_deref().unwrap().contains("403"));

    // failed keys lost their contexts, the working key kept its own
    assert!(!stats.key_statuses[0].preamble_loaded);
    assert!(!stats.key_statuses[1].preamble_loaded);
    assert!(stats.key_statuses[2].preamble_loaded);
    assert_eq!(stats.active_chat_sessions, 1);
}

#[tokio::test]
async fn retry_budget_is_exactly_three_attempts() {
    let sends = Arc::new(AtomicUsize::new(0));
    let failing = || Outcome::Fail(ProviderError::Other("model overloaded".to_string()));
    let backends = vec![
        ScriptedBackend::new(failing(), &sends),
        ScriptedBackend::new(failing(), &sends),
        ScriptedBackend::new(failing(), &sends),
        ScriptedBackend::new(failing(), &sends),
    ];
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), fast_config());

    let result = dispatcher.send("Hello?").await;

    match result {
        Err(DispatchError::Exhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.to_string().contains("model overloaded"));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("send should fail"),
    }
    assert_eq!(sends.load(Ordering::SeqCst), 3);
    assert_eq!(dispatcher.stats().total_errors, 3);
}

#[tokio::test]
async fn network_errors_back_off_linearly() {
    let sends = Arc::new(AtomicUsize::new(0));
    let network = || Outcome::Fail(ProviderError::Network("connection reset".to_string()));
    let backends = vec![
        ScriptedBackend::new(network(), &sends),
        ScriptedBackend::new(network(), &sends),
    ];
    let config = DispatchConfig {
        backoff_ms: 20,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), config);

    let started = Instant::now();
    let result = dispatcher.send("Hello?").await;

    assert!(matches!(result, Err(DispatchError::Exhausted { attempts: 3, .. })));
    assert_eq!(sends.load(Ordering::SeqCst), 3);
    // 20ms after attempt 1, 40ms after attempt 2, nothing after the last
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn auth_and_rate_limit_failures_rotate_without_waiting() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(
            Outcome::Fail(ProviderError::RateLimited("quota exceeded".to_string())),
            &sends,
        ),
        ScriptedBackend::new(auth_error(), &sends),
    ];
    let config = DispatchConfig {
        backoff_ms: 5_000,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), config);

    let Ok(result) =
        tokio::time::timeout(Duration::from_millis(500), dispatcher.send("Hello?")).await
    else {
        panic!("auth and rate-limit failures must not back off");
    };

    assert!(matches!(result, Err(DispatchError::Exhausted { attempts: 3, .. })));
    assert_eq!(sends.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn html_preamble_is_a_load_failure() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![ScriptedBackend::new(
        Outcome::Reply(vec!["should not be reached"]),
        &sends,
    )];
    let source = Arc::new(StaticSource::with_persona("<!DOCTYPE html><html>404</html>"));
    let dispatcher = dispatcher(backends, Arc::clone(&source), fast_config());

    let result = dispatcher.send("Hello?").await;

    match result {
        Err(DispatchError::Exhausted { last_error, .. }) => {
            assert!(matches!(last_error, ProviderError::Load(LoadError::Html { .. })));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("send should fail"),
    }
    assert_eq!(sends.load(Ordering::SeqCst), 0);
    assert_eq!(source.loads(), 3);
    assert_eq!(dispatcher.stats().key_statuses[0].error_count, 3);
}

#[tokio::test]
async fn no_credentials_is_a_configuration_error() {
    let result = Dispatcher::<ScriptedBackend, StaticSource>::new(
        Vec::new(),
        StaticSource::new(),
        GenerationConfig::default(),
        DispatchConfig::default(),
    );
    assert!(matches!(result, Err(DispatchError::NoCredentials)));
}

#[tokio::test]
async fn exhausted_pool_recovers_through_circuit_breaker_reset() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(auth_error(), &sends),
    ];
    let config = DispatchConfig {
        error_threshold: 1,
        ..fast_config()
    };
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), config);

    assert!(dispatcher.send("Hello?").await.is_err());

    // attempt 1 and 2 take both keys out; attempt 3 resets the pool and
    // charges slot 0 again
    let stats = dispatcher.stats();
    assert_eq!(sends.load(Ordering::SeqCst), 3);
    assert_eq!(stats.healthy_keys, 1);
    assert!(!stats.key_statuses[0].healthy);
    assert_eq!(stats.key_statuses[0].error_count, 1);
    assert!(stats.key_statuses[1].healthy);
    assert_eq!(stats.key_statuses[1].error_count, 0);
}

#[tokio::test]
async fn cached_context_is_reused_until_a_failure_evicts_it() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backend = ScriptedBackend::new(Outcome::Reply(vec!["ok"]), &sends).then(vec![
        Outcome::Reply(vec!["first"]),
        Outcome::Reply(vec!["second"]),
        Outcome::Fail(ProviderError::RateLimited("quota".to_string())),
    ]);
    let source = Arc::new(StaticSource::new());
    let dispatcher = dispatcher(vec![backend], Arc::clone(&source), fast_config());

    let first = collect_reply(dispatcher.send("one").await.unwrap()).await.unwrap();
    let second = collect_reply(dispatcher.send("two").await.unwrap()).await.unwrap();
    assert_eq!((first.as_str(), second.as_str()), ("first", "second"));
    assert_eq!(source.loads(), 1);

    // rate limit on the only key: evicted, rebuilt on the retry
    let third = collect_reply(dispatcher.send("three").await.unwrap()).await.unwrap();
    assert_eq!(third, "ok");
    assert_eq!(source.loads(), 2);
    assert_eq!(dispatcher.stats().key_statuses[0].error_count, 0);
}

#[tokio::test]
async fn reset_operations() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(Outcome::Reply(vec!["hi"]), &sends),
    ];
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), fast_config());

    collect_reply(dispatcher.send("hello").await.unwrap()).await.unwrap();
    assert_eq!(dispatcher.stats().active_chat_sessions, 1);
    assert_eq!(dispatcher.stats().key_statuses[0].error_count, 1);

    dispatcher.reset_session(1).unwrap();
    assert_eq!(dispatcher.stats().active_chat_sessions, 0);

    dispatcher.reset_all();
    let stats = dispatcher.stats();
    assert_eq!(stats.current_key_index, 0);
    assert_eq!(stats.key_statuses[0].error_count, 0);

    assert!(matches!(
        dispatcher.reset_session(5),
        Err(DispatchError::UnknownSlot(5))
    ));
    assert!(matches!(
        dispatcher.mark_healthy(2),
        Err(DispatchError::UnknownSlot(2))
    ));
}

#[tokio::test]
async fn mark_healthy_returns_key_to_rotation() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(Outcome::Reply(vec!["hi"]), &sends),
    ];
    let config = DispatchConfig {
        error_threshold: 1,
        ..fast_config()
    };
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), config);

    collect_reply(dispatcher.send("hello").await.unwrap()).await.unwrap();
    assert!(!dispatcher.stats().key_statuses[0].healthy);

    dispatcher.mark_healthy(0).unwrap();
    let stats = dispatcher.stats();
    assert!(stats.key_statuses[0].healthy);
    assert_eq!(stats.key_statuses[0].error_count, 0);
    assert!(stats.key_statuses[0].last_error.is_none());
}

#[tokio::test]
async fn preload_and_reload_fetch_preambles_per_key() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(Outcome::Reply(vec!["a"]), &sends),
        ScriptedBackend::new(Outcome::Reply(vec!["b"]), &sends),
        ScriptedBackend::new(Outcome::Reply(vec!["c"]), &sends),
    ];
    let source = Arc::new(StaticSource::new());
    let dispatcher = dispatcher(backends, Arc::clone(&source), fast_config());

    assert_eq!(dispatcher.preload().await, 3);
    assert_eq!(source.loads(), 3);
    assert_eq!(dispatcher.preload().await, 3);
    assert_eq!(source.loads(), 3);

    assert_eq!(dispatcher.reload_preambles().await, 3);
    assert_eq!(source.loads(), 6);
    assert_eq!(dispatcher.stats().preambles_loaded, 3);
}

#[tokio::test]
async fn health_check_probes_every_key_with_fresh_contexts() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![
        ScriptedBackend::new(auth_error(), &sends),
        ScriptedBackend::new(Outcome::Reply(vec!["pong"]), &sends),
    ];
    let config = DispatchConfig {
        error_threshold: 1,
        ..fast_config()
    };
    let dispatcher = dispatcher(backends, Arc::new(StaticSource::new()), config);

    let report = dispatcher.health_check().await;

    assert_eq!(report.healthy, vec![1]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 0);
    assert!(!report.all_healthy());

    let stats = dispatcher.stats();
    assert!(!stats.key_statuses[0].healthy);
    assert!(stats.key_statuses[0]
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("Health check failed"));
    assert!(stats.key_statuses[1].healthy);
    assert_eq!(stats.active_chat_sessions, 0);
}

#[tokio::test]
async fn background_monitor_runs_until_dropped() {
    let sends = Arc::new(AtomicUsize::new(0));
    let backends = vec![ScriptedBackend::new(Outcome::Reply(vec!["pong"]), &sends)];
    let dispatcher = Arc::new(dispatcher(
        backends,
        Arc::new(StaticSource::new()),
        fast_config(),
    ));

    let monitor = HealthMonitor::spawn(&dispatcher, Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(monitor.is_running());
    assert!(sends.load(Ordering::SeqCst) >= 1);

    monitor.stop();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let after_stop = sends.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sends.load(Ordering::SeqCst), after_stop);
}
