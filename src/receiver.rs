use crate::alloc::{RegionAllocator, RegionBuffer};
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::frame::Frame;
use crate::wire::{classify, ChunkTag, MessageKind, Phase, HEARTBEAT_RESPONSE_BODY, HEARTBEAT_RESPONSE_TAG};
use bytes::Bytes;
use std::cmp::min;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// In-progress reconstruction of one phase's destination buffer. The buffer is
///  exclusively owned here until the final chunk hands it back to the allocator.
struct Assembly {
    phase: Phase,
    buffer: RegionBuffer,
    expected_size: u64,
    /// bytes not yet written; only ever decreases
    remaining: u64,
}

impl Assembly {
    /// Appends a chunk at the current write offset. Writes beyond the declared
    ///  region size are rejected instead of silently overflowing.
    fn write_chunk(&mut self, payload: &[u8]) -> Result<(), TransferError> {
        let payload_len = payload.len() as u64;
        if payload_len > self.remaining {
            return Err(TransferError::Protocol(format!(
                "chunk of {} bytes exceeds the {} bytes remaining in phase {}",
                payload_len, self.remaining, self.phase
            )));
        }

        let offset = (self.expected_size - self.remaining) as usize;
        self.buffer.as_mut_slice()[offset..offset + payload.len()].copy_from_slice(payload);
        self.remaining -= payload_len;
        Ok(())
    }
}

/// Per-connection receiver state: classifies each incoming message by its tag,
///  accumulates chunks into the open phase's destination buffer and releases
///  the buffer to the allocator when the phase's final chunk arrived.
///
/// Phases are strictly sequential, so at most one assembly is open at a time;
///  the open phase is tracked here because the tag's `final` marker alone does
///  not identify it.
pub struct ReceiverAssembler {
    config: Arc<TransferConfig>,
    allocator: Arc<dyn RegionAllocator>,
    open: Option<Assembly>,
    requests_seen: u64,
}

impl ReceiverAssembler {
    pub fn new(config: Arc<TransferConfig>, allocator: Arc<dyn RegionAllocator>) -> ReceiverAssembler {
        ReceiverAssembler {
            config,
            allocator,
            open: None,
            requests_seen: 0,
        }
    }

    /// Handles one incoming request and produces the response to send back,
    ///  echoing the request's correlation id.
    ///
    /// Malformed or out-of-place messages are discarded with a diagnostic log
    ///  and still acknowledged - they must never corrupt unrelated memory or
    ///  bring the session down. An allocator failure is fatal to the session:
    ///  the assembly is aborted rather than writing into an invalid buffer.
    pub async fn handle_request(&mut self, request: &Frame) -> Result<Frame, TransferError> {
        self.requests_seen += 1;
        if self.requests_seen % self.config.diagnostic_log_interval == 0 {
            self.log_preview(request);
        }

        let response = Frame::new(
            request.correlation,
            HEARTBEAT_RESPONSE_TAG,
            Bytes::from_static(HEARTBEAT_RESPONSE_BODY),
        );

        let chunk_tag = match classify(&request.tag) {
            Ok(MessageKind::HeartbeatRequest) => return Ok(response),
            Ok(MessageKind::Chunk(tag)) => tag,
            Ok(MessageKind::HeartbeatResponse) => {
                warn!("discarding heartbeat response received as a request");
                return Ok(response);
            }
            Err(e) => {
                warn!("discarding message: {}", e);
                return Ok(response);
            }
        };

        match self.on_chunk(chunk_tag, &request.payload).await {
            Ok(()) => Ok(response),
            Err(e @ TransferError::Allocation { .. }) => Err(e),
            Err(e) => {
                warn!("discarding chunk: {}", e);
                Ok(response)
            }
        }
    }

    async fn on_chunk(&mut self, tag: ChunkTag, payload: &[u8]) -> Result<(), TransferError> {
        if tag.start {
            if let Some(stale) = self.open.take() {
                warn!(
                    "phase {} started while the assembly for phase {} is still open - abandoning it",
                    tag.phase, stale.phase
                );
            }

            let spec = self.config.phase_spec(tag.phase);
            info!(
                "phase {} start: acquiring region {:?} of {} bytes",
                tag.phase, spec.region_key, spec.expected_size
            );
            let buffer = self
                .allocator
                .acquire(&spec.region_key, spec.expected_size)
                .await
                .map_err(|e| TransferError::Allocation {
                    region_key: spec.region_key.clone(),
                    size: spec.expected_size,
                    cause: e.to_string(),
                })?;

            self.open = Some(Assembly {
                phase: tag.phase,
                buffer,
                expected_size: spec.expected_size,
                remaining: spec.expected_size,
            });
        }

        let assembly = match self.open.as_mut() {
            Some(assembly) if assembly.phase == tag.phase => assembly,
            Some(assembly) => {
                return Err(TransferError::Protocol(format!(
                    "chunk for phase {} while the open assembly is for phase {}",
                    tag.phase, assembly.phase
                )))
            }
            None => {
                return Err(TransferError::Protocol(format!(
                    "continuation chunk for phase {} with no open assembly",
                    tag.phase
                )))
            }
        };

        if let Err(e) = assembly.write_chunk(payload) {
            // the stream is corrupt beyond this phase - abort the assembly
            self.open = None;
            return Err(e);
        }

        if tag.is_final {
            let assembly = self.open.take().expect("assembly verified above");
            if assembly.remaining != 0 {
                warn!(
                    "phase {} final chunk arrived with {} bytes still missing",
                    tag.phase, assembly.remaining
                );
            }

            let region_key = assembly.buffer.region_key().to_string();
            info!(
                "phase {} complete - releasing region {:?} ({} bytes)",
                tag.phase, region_key, assembly.expected_size
            );
            self.allocator
                .release(assembly.buffer, assembly.expected_size)
                .await
                .map_err(|e| TransferError::Allocation {
                    region_key,
                    size: assembly.expected_size,
                    cause: e.to_string(),
                })?;
        }
        else {
            debug!(
                "phase {}: {} of {} bytes outstanding",
                tag.phase,
                self.open.as_ref().map(|a| a.remaining).unwrap_or(0),
                self.config.phase_spec(tag.phase).expected_size
            );
        }

        Ok(())
    }

    fn log_preview(&self, request: &Frame) {
        let tag_preview = &request.tag[..min(request.tag.len(), 64)];
        let payload_preview = &request.payload[..min(request.payload.len(), 64)];
        info!(
            "request #{}: header {:?}, payload of {} bytes starting {:?}",
            self.requests_seen,
            tag_preview,
            request.payload.len(),
            payload_preview
        );
    }
}
