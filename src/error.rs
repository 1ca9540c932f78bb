use thiserror::Error;

/// Failure classes of a transfer session. Recovery is coarse: a session is
///  aborted as a whole, and the governing process restarts the backup from
///  phase 1 - there is no mid-phase resume.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection refused, session rejected or torn down mid-transfer. Surfaced by
    ///  aborting the affected session; the core never retries on its own.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The allocator could not provide a destination buffer. Fatal to the current
    ///  phase: the assembly is aborted rather than writing into an invalid buffer.
    #[error("allocation of region '{region_key}' ({size} bytes) failed: {cause}")]
    Allocation {
        region_key: String,
        size: u64,
        cause: String,
    },

    /// An unrecognized tag, a chunk for a phase with no open assembly, or a chunk
    ///  exceeding the declared region size. The offending message is discarded
    ///  with a diagnostic log - malformed input must never corrupt unrelated memory.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The cap on concurrently active outbound transfer sessions was reached.
    ///  Reported synchronously to the caller of the start operation; no session
    ///  is created.
    #[error("concurrent backup session cap of {0} reached")]
    Capacity(usize),
}
