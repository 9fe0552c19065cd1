use anyhow::{Context, Result};
use tokio::runtime::{Builder, Runtime};

/// A single-threaded runtime for one worker: the job in flight may await
/// network calls, but a worker never drives two jobs at once.
pub(crate) fn current_thread_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| "failed to init runtime")
}
