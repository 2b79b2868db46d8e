use thiserror::Error;

/// Batch-fatal errors. Everything that happens to a single work item is
/// folded into its [`Outcome`](super::types::Outcome) instead and never
/// surfaces here.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Bad or missing CSV input; the batch aborts before dispatch.
    #[error("input error: {0}")]
    Input(String),

    /// The shared browser failed to launch; the batch aborts with an empty
    /// result set.
    #[error("browser launch failed: {0}")]
    Infrastructure(String),
}
