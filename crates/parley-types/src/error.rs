use thiserror::Error;

/// Failure taxonomy for hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Another live connection already holds the requested display name.
    /// Reported to the originator only; nothing is mutated.
    #[error("display name already taken")]
    NameTaken,

    /// Stale reference to a message that no longer exists.
    #[error("not found")]
    NotFound,

    /// The message store failed. The surrounding operation is aborted
    /// wholesale and nothing is broadcast — broadcast only ever follows
    /// successful persistence.
    #[error("store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}
