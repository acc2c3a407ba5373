//! Shared utilities for streamed completions.
//!
//! Both backends stream line-oriented bodies (NDJSON for Ollama, Server-Sent
//! Events for watsonx). The helpers here turn those into a pull-based
//! [`TextStream`] that upholds the "never fails" contract.

use crate::{run_blocking, ProviderError};
use std::fmt;
use std::io::BufRead;
use tracing::{debug, error};

type ChunkResults = Box<dyn Iterator<Item = Result<String, ProviderError>> + Send>;

// ─────────────────────────────────────────────────────────────────────────────
// TextStream
// ─────────────────────────────────────────────────────────────────────────────

/// Forward-only, finite sequence of text fragments.
///
/// Empty fragments are skipped. The first error ends the sequence after a
/// single empty chunk, so consumers never see a failure. Pulling a chunk may
/// read from the network, so each pull runs through [`run_blocking`].
pub struct TextStream {
    inner: Option<ChunkResults>,
}

impl TextStream {
    pub fn new<I>(chunks: I) -> Self
    where
        I: Iterator<Item = Result<String, ProviderError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::new(chunks)),
        }
    }

    /// The whole completion as one fragment (used when a backend cannot stream).
    pub fn single(text: String) -> Self {
        Self::new(std::iter::once(Ok(text)))
    }

    /// A stream that failed before producing anything: yields one empty chunk.
    pub fn failed(error: ProviderError) -> Self {
        Self::new(std::iter::once(Err(error)))
    }

    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// Drain the stream into one string.
    pub fn collect_text(self) -> String {
        self.collect()
    }
}

impl Iterator for TextStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let inner = self.inner.as_mut()?;
        loop {
            let item = run_blocking(|| inner.next()).unwrap_or_else(|e| Some(Err(e)));
            match item {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Some(chunk),
                Some(Err(e)) => {
                    error!("Error in stream_completion: {}", e);
                    self.inner = None;
                    return Some(String::new());
                }
                None => {
                    debug!("Stream completed");
                    self.inner = None;
                    return None;
                }
            }
        }
    }
}

impl std::iter::FusedIterator for TextStream {}

impl fmt::Debug for TextStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStream")
            .field("finished", &self.inner.is_none())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Line framing
// ─────────────────────────────────────────────────────────────────────────────

/// Non-empty lines of a streamed body, read on demand.
pub(crate) fn body_lines<R>(reader: R) -> impl Iterator<Item = Result<String, ProviderError>>
where
    R: BufRead,
{
    reader
        .lines()
        .map(|line| line.map_err(ProviderError::from))
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
}

/// Extract the payload of a Server-Sent Events `data:` line.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
