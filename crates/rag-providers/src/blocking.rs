//! Guard for the blocking half of [`crate::LLMProvider`].
//!
//! `reqwest::blocking` must never run directly on an async worker thread. Every
//! blocking entry point of the adapters (and each pull of a [`crate::TextStream`])
//! goes through [`run_blocking`], which picks a safe way to run the work for the
//! calling context.

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::ProviderError;

const CURRENT_THREAD_MISUSE: &str = "blocking provider call made on a current-thread tokio runtime; \
     use generate_completion_async or a multi-thread runtime";

/// Run blocking work from whatever context the caller is in.
///
/// Outside a runtime the work runs as is. On a multi-thread runtime it runs
/// under `block_in_place`, so the worker hands its queued tasks to another
/// thread first. A current-thread runtime has no other thread to hand off to,
/// so the call is refused with [`ProviderError::Worker`].
pub fn run_blocking<T>(work: impl FnOnce() -> T) -> Result<T, ProviderError> {
    let Ok(handle) = Handle::try_current() else {
        return Ok(work());
    };
    match handle.runtime_flavor() {
        RuntimeFlavor::MultiThread => Ok(tokio::task::block_in_place(work)),
        _ => Err(ProviderError::Worker(CURRENT_THREAD_MISUSE.to_string())),
    }
}
