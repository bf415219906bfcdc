//! Error types for `rune-raft`.

/// Errors from the consensus log and state machine.
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    /// This node is not the leader; mutations must be submitted to the
    /// leader.
    #[error("node is not the leader")]
    NotLeader,

    /// The node has halted after a fatal apply failure and accepts no
    /// further commands.
    #[error("node has halted: {reason}")]
    Halted { reason: String },

    /// Appending to or reading from the durable log failed.
    #[error("log store error: {reason}")]
    Log { reason: String },

    /// Reading or writing stable metadata failed.
    #[error("stable store error: {reason}")]
    Stable { reason: String },

    /// A command could not be encoded or decoded.
    #[error("command codec error: {reason}")]
    Codec { reason: String },

    /// Applying a committed entry to the store failed. Fatal: a state
    /// machine that has diverged from the log must not continue.
    #[error("apply failed: {reason}")]
    Apply { reason: String },

    /// Streaming a snapshot failed; the sink was cancelled.
    #[error("snapshot failed: {reason}")]
    Snapshot { reason: String },

    /// Restoring from a snapshot image failed.
    #[error("restore failed: {reason}")]
    Restore { reason: String },

    /// The caller's wait for commit timed out. The entry may still commit;
    /// retries are safe because commands are idempotent.
    #[error("timed out waiting for commit")]
    Timeout,
}
