use crate::wire::Phase;
use anyhow::bail;

/// Upper bound for a single chunk payload. Kept small because the transport may
///  limit the size of registerable message buffers.
pub const MAX_CHUNK_SIZE: usize = 10_000;

/// Both sides log a truncated message preview every this many requests.
pub const DIAGNOSTIC_LOG_INTERVAL: u64 = 4_000_000;

/// Cap on concurrently active outbound backup sessions.
pub const MAX_CONCURRENT_BACKUPS: usize = 3;

/// One snapshot region bound to a phase: the identifier under which the loader
///  and the allocator resolve it, and its declared total size. Sender and
///  receiver must be configured with the same catalog - the receiver sizes its
///  destination buffers from `expected_size`, not from the wire.
#[derive(Clone, Debug)]
pub struct PhaseSpec {
    pub region_key: String,
    pub expected_size: u64,
}

#[derive(Clone, Debug)]
pub struct TransferConfig {
    /// maximum payload bytes per data chunk
    pub max_chunk_size: usize,

    pub max_concurrent_backups: usize,

    /// every how many requests a truncated diagnostic preview is logged
    pub diagnostic_log_interval: u64,

    /// If set, a connection is forcibly closed once its sent or received message
    ///  count reaches this threshold. Fault-injection testing only.
    pub disconnect_after: Option<u64>,

    /// the three snapshot regions, in transfer order
    pub phases: [PhaseSpec; 3],
}

impl TransferConfig {
    /// The region catalog of the key-value store this backup mechanism was built
    ///  for: hash index (16 MiB), primary data (4 GiB) and auxiliary lists.
    pub fn default_catalog() -> TransferConfig {
        TransferConfig {
            max_chunk_size: MAX_CHUNK_SIZE,
            max_concurrent_backups: MAX_CONCURRENT_BACKUPS,
            diagnostic_log_interval: DIAGNOSTIC_LOG_INTERVAL,
            disconnect_after: None,
            phases: [
                PhaseSpec {
                    region_key: "hash_index".to_string(),
                    expected_size: 16_777_216,
                },
                PhaseSpec {
                    region_key: "primary_data".to_string(),
                    expected_size: 4_294_967_296,
                },
                PhaseSpec {
                    region_key: "aux_lists".to_string(),
                    expected_size: 4325,
                },
            ],
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_chunk_size == 0 {
            bail!("max chunk size must be positive");
        }
        // chunk payloads must fit the frame codec's u32 length field
        if self.max_chunk_size > u32::MAX as usize {
            bail!("max chunk size {} exceeds the frame payload limit", self.max_chunk_size);
        }
        if self.max_concurrent_backups == 0 {
            bail!("concurrent backup cap must be positive");
        }
        if self.diagnostic_log_interval == 0 {
            bail!("diagnostic log interval must be positive");
        }
        if self.disconnect_after == Some(0) {
            bail!("diagnostic disconnect threshold must be positive");
        }
        Ok(())
    }

    pub fn phase_spec(&self, phase: Phase) -> &PhaseSpec {
        &self.phases[phase.index()]
    }

    /// Upper bound for an incoming frame payload. Heartbeat bodies are not
    ///  subject to the chunk cap, so this never drops below their size.
    pub fn max_frame_payload(&self) -> usize {
        self.max_chunk_size.max(64)
    }
}
