use crate::config::TransferConfig;
use crate::pending::PendingWork;
use crate::region::RegionLoader;
use crate::wire::{ChunkTag, Phase, HEARTBEAT_REQUEST_BODY, HEARTBEAT_REQUEST_TAG};
use bytes::Bytes;
use std::cmp::min;
use std::sync::Arc;
use tracing::{debug, info};

/// tag and payload of the next request to put on the wire
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct OutboundRequest {
    pub tag: String,
    pub payload: Bytes,
}

/// Per-session cursor deciding, on every transport turnaround, whether to emit
///  a heartbeat or the next data chunk.
///
/// In heartbeat mode the cursor samples the pending-work signal; a non-empty
///  signal switches it to data mode. A transfer walks the three phases in
///  order, loading each phase's source region once and slicing it into chunks
///  of at most `max_chunk_size` bytes. After the final chunk of the last phase
///  the cursor reverts to heartbeat mode.
///
/// The session is single-outstanding-request, so the cursor is driven from one
///  task and needs no locking.
pub struct SenderCursor {
    config: Arc<TransferConfig>,
    phase: Option<Phase>,
    /// the region currently being sent; loaded at the phase's first chunk,
    ///  released at its final chunk
    source: Option<Bytes>,
    /// bytes already sent within the current phase
    position: u64,
}

impl SenderCursor {
    pub fn new(config: Arc<TransferConfig>) -> SenderCursor {
        SenderCursor {
            config,
            phase: None,
            source: None,
            position: 0,
        }
    }

    /// true iff no transfer is active and the next request will be a heartbeat
    ///  (unless the pending-work signal reports otherwise)
    pub fn is_idle(&self) -> bool {
        self.phase.is_none()
    }

    pub fn heartbeat() -> OutboundRequest {
        OutboundRequest {
            tag: HEARTBEAT_REQUEST_TAG.to_string(),
            payload: Bytes::from_static(HEARTBEAT_REQUEST_BODY),
        }
    }

    /// Produces the next request after the previous response arrived.
    pub async fn next_request(
        &mut self,
        pending: &dyn PendingWork,
        loader: &dyn RegionLoader,
    ) -> anyhow::Result<OutboundRequest> {
        if self.phase.is_none() {
            if pending.is_empty().await {
                return Ok(Self::heartbeat());
            }

            // peek-then-dequeue: log the entry that triggered this transfer
            if let Some(entry) = pending.peek_front().await {
                info!("pending backup request {} - starting transfer", entry);
            }
            pending.dequeue().await;

            self.phase = Some(Phase::FIRST);
            self.position = 0;
        }

        self.next_chunk(loader).await
    }

    async fn next_chunk(&mut self, loader: &dyn RegionLoader) -> anyhow::Result<OutboundRequest> {
        let phase = self.phase.expect("next_chunk requires an active phase");

        if self.source.is_none() {
            let spec = self.config.phase_spec(phase);
            debug!("transfer moved to phase {} (region {:?})", phase, spec.region_key);
            self.source = Some(loader.load_region(&spec.region_key).await?);
        }
        let source = self.source.as_ref().expect("source loaded above");

        let total_size = source.len() as u64;
        let chunk_size = min(total_size - self.position, self.config.max_chunk_size as u64);
        let payload = source.slice(self.position as usize..(self.position + chunk_size) as usize);

        let tag = ChunkTag {
            phase,
            start: self.position == 0,
            is_final: self.position + chunk_size == total_size,
        };

        if tag.is_final {
            debug!("phase {} complete after {} bytes, releasing source region", phase, total_size);
            self.source = None;
            self.position = 0;
            self.phase = phase.next();
            if self.phase.is_none() {
                info!("snapshot transfer complete, returning to heartbeat mode");
            }
        }
        else {
            self.position += chunk_size;
        }

        Ok(OutboundRequest {
            tag: tag.encode(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseSpec;
    use crate::pending::{BackupQueue, MockPendingWork};
    use crate::region::MockRegionLoader;
    use rstest::*;

    fn test_config(max_chunk_size: usize, sizes: [u64; 3]) -> Arc<TransferConfig> {
        let keys = ["hash_index", "primary_data", "aux_lists"];
        Arc::new(TransferConfig {
            max_chunk_size,
            phases: std::array::from_fn(|i| PhaseSpec {
                region_key: keys[i].to_string(),
                expected_size: sizes[i],
            }),
            ..TransferConfig::default_catalog()
        })
    }

    fn loader_with_regions(regions: [Vec<u8>; 3]) -> MockRegionLoader {
        let mut loader = MockRegionLoader::new();
        let [hash_index, primary_data, aux_lists] = regions;
        loader.expect_load_region().returning(move |key| {
            Ok(Bytes::from(match key {
                "hash_index" => hash_index.clone(),
                "primary_data" => primary_data.clone(),
                "aux_lists" => aux_lists.clone(),
                _ => panic!("unexpected region key {:?}", key),
            }))
        });
        loader
    }

    fn region_of_size(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[rstest]
    #[tokio::test]
    async fn test_idle_heartbeat_idempotent() {
        let queue = BackupQueue::new();
        let loader = MockRegionLoader::new();
        let mut cursor = SenderCursor::new(test_config(10, [25, 7, 0]));

        for _ in 0..5 {
            let request = cursor.next_request(&queue, &loader).await.unwrap();
            assert_eq!(request.tag, HEARTBEAT_REQUEST_TAG);
            assert_eq!(request.payload.as_ref(), HEARTBEAT_REQUEST_BODY);
            assert!(cursor.is_idle());
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_peek_then_dequeue() {
        let mut pending = MockPendingWork::new();
        pending.expect_is_empty().times(1).returning(|| false);
        pending.expect_peek_front().times(1).returning(|| Some(42));
        pending.expect_dequeue().times(1).returning(|| ());

        let loader = loader_with_regions([region_of_size(3), vec![], vec![]]);
        let mut cursor = SenderCursor::new(test_config(10, [3, 0, 0]));

        let request = cursor.next_request(&pending, &loader).await.unwrap();
        assert_eq!(request.tag, "queue data step 1 start sending final");
        assert!(!cursor.is_idle());
    }

    #[rstest]
    #[tokio::test]
    async fn test_full_transfer_cycle() {
        let queue = BackupQueue::new();
        queue.enqueue(1).await;

        let regions = [region_of_size(25), region_of_size(7), vec![]];
        let loader = loader_with_regions(regions.clone());
        let mut cursor = SenderCursor::new(test_config(10, [25, 7, 0]));

        let expected: [(&str, &[u8]); 5] = [
            ("queue data step 1 start sending", &regions[0][0..10]),
            ("queue data step 1 sending", &regions[0][10..20]),
            ("queue data step 1 sending final", &regions[0][20..25]),
            ("queue data step 2 start sending final", &regions[1][..]),
            ("queue data step 3 start sending final", &[]),
        ];
        for (expected_tag, expected_payload) in expected {
            let request = cursor.next_request(&queue, &loader).await.unwrap();
            assert_eq!(request.tag, expected_tag);
            assert_eq!(request.payload.as_ref(), expected_payload);
        }

        // all three phases are done: back to heartbeat mode, queue drained
        assert!(cursor.is_idle());
        let request = cursor.next_request(&queue, &loader).await.unwrap();
        assert_eq!(request.tag, HEARTBEAT_REQUEST_TAG);
    }

    #[rstest]
    #[case::empty_region(0, 10, vec![0])]
    #[case::single_byte(1, 10, vec![1])]
    #[case::exactly_one_chunk(10, 10, vec![10])]
    #[case::exact_multiple(20, 10, vec![10, 10])]
    #[case::with_remainder(25, 10, vec![10, 10, 5])]
    #[tokio::test]
    async fn test_phase_chunk_sizes(
        #[case] total_size: usize,
        #[case] max_chunk_size: usize,
        #[case] expected_sizes: Vec<usize>,
    ) {
        let queue = BackupQueue::new();
        queue.enqueue(1).await;

        let loader = loader_with_regions([region_of_size(total_size), vec![], vec![]]);
        let mut cursor = SenderCursor::new(test_config(max_chunk_size, [total_size as u64, 0, 0]));

        let mut sizes = Vec::new();
        let mut starts = 0;
        let mut finals = 0;
        loop {
            let request = cursor.next_request(&queue, &loader).await.unwrap();
            let kind = match crate::wire::classify(&request.tag).unwrap() {
                crate::wire::MessageKind::Chunk(tag) => tag,
                other => panic!("expected a chunk, got {:?}", other),
            };
            if kind.phase != Phase::FIRST {
                break;
            }
            sizes.push(request.payload.len());
            starts += usize::from(kind.start);
            finals += usize::from(kind.is_final);
            if kind.is_final {
                break;
            }
        }

        assert_eq!(sizes, expected_sizes);
        assert_eq!(sizes.iter().sum::<usize>(), total_size);
        assert_eq!(starts, 1);
        assert_eq!(finals, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_loader_failure_aborts() {
        let queue = BackupQueue::new();
        queue.enqueue(1).await;

        let mut loader = MockRegionLoader::new();
        loader
            .expect_load_region()
            .returning(|_| Err(anyhow::anyhow!("snapshot file missing")));

        let mut cursor = SenderCursor::new(test_config(10, [25, 7, 0]));
        assert!(cursor.next_request(&queue, &loader).await.is_err());
    }
}
