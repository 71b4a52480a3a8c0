//! Committee listings extracted from the knowledge document.
//!
//! The knowledge base lists committees as Markdown-ish blocks:
//!
//! ```text
//! ### UNSC - United Nations Security Council
//! **Topic:** Maritime security in the Red Sea
//! **Chair**: Jane Doe
//! **Difficulty**: Advanced
//! ```
//!
//! Blocks end at the next `###` header or at the "Frequently Asked
//! Questions" section.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

const FAQ_HEADING: &str = "Frequently Asked Questions";

static HEADER_PATTERN: OnceLock<Regex> = OnceLock::new();
static TOPIC_PATTERN: OnceLock<Regex> = OnceLock::new();
static DETAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn header_pattern() -> &'static Regex {
    HEADER_PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^###[ \t]+(.+?)[ \t]+-[ \t]+(.+?)[ \t]*$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn topic_pattern() -> &'static Regex {
    TOPIC_PATTERN.get_or_init(|| {
        Regex::new(r"^\*\*Topic:\*\*\s(.*)$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[expect(
    clippy::expect_used,
    reason = "Static regex pattern validated at compile time"
)]
fn detail_pattern() -> &'static Regex {
    DETAIL_PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^\*\*([^*]+)\*\*:\s(.*)$")
            .expect("Static regex pattern is guaranteed to be valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitteeInfo {
    pub name: String,
    pub tagline: String,
    pub topic: String,
    pub details: BTreeMap<String, String>,
}

/// Parse every committee block in the knowledge document.
///
/// Blocks without a `**Topic:**` line directly under the header are skipped.
#[must_use]
pub fn parse_committees(text: &str) -> Vec<CommitteeInfo> {
    let body = text
        .find(&format!("\n{FAQ_HEADING}"))
        .map_or(text, |end| &text[..end]);

    let headers: Vec<_> = header_pattern().captures_iter(body).collect();
    let mut committees = Vec::with_capacity(headers.len());

    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(name), Some(tagline)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let block_end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(body.len(), |m| m.start());
        let block = body[whole.end()..block_end].trim_start_matches(['\r', '\n']);

        let (topic_line, rest) = block.split_once('\n').unwrap_or((block, ""));
        let Some(topic) = topic_pattern()
            .captures(topic_line.trim_end())
            .and_then(|c| c.get(1))
        else {
            debug!("Skipping committee block '{}': no topic line", name.as_str().trim());
            continue;
        };

        committees.push(CommitteeInfo {
            name: name.as_str().trim().to_string(),
            tagline: tagline.as_str().trim().to_string(),
            topic: topic.as_str().trim().to_string(),
            details: parse_details(rest),
        });
    }

    debug!("Parsed {} committees from knowledge document", committees.len());
    committees
}

/// `**Key**: value` entries; a value runs until the next line starting with `**`.
fn parse_details(text: &str) -> BTreeMap<String, String> {
    let mut entries: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.starts_with("**") {
            entries.push(line.to_string());
        } else if let Some(current) = entries.last_mut() {
            current.push('\n');
            current.push_str(line);
        }
    }

    entries
        .iter()
        .filter_map(|entry| {
            let caps = detail_pattern().captures(entry)?;
            Some((
                caps.get(1)?.as_str().trim().to_string(),
                caps.get(2)?.as_str().trim().to_string(),
            ))
        })
        .collect()
}
