/// Errors from setting up trigger dispatch.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The worker pool runtime could not be started.
    #[error("failed to start trigger workers: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result alias for trigger operations.
pub type TriggerResult<T> = Result<T, TriggerError>;
