#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Concrete backends: the Gemini chat API and the preamble document sources.

mod gemini;
mod preamble;
#[cfg(test)]
mod test_server;

pub use gemini::{GeminiProvider, classify_status};
pub use preamble::{FilePreambleSource, HttpPreambleSource};
