use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// A destination buffer handed out by the allocator. It is exclusively owned by
///  the receiving assembly for the duration of a phase: no other component may
///  read or write it until it is released.
#[derive(Debug)]
pub struct RegionBuffer {
    region_key: String,
    data: BytesMut,
}

impl RegionBuffer {
    pub fn new(region_key: impl Into<String>, size: u64) -> RegionBuffer {
        RegionBuffer {
            region_key: region_key.into(),
            data: BytesMut::zeroed(size as usize),
        }
    }

    pub fn region_key(&self) -> &str {
        &self.region_key
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}

/// The shared-memory allocator behind the receiver: destination regions are
///  acquired per phase and released back when the phase's final chunk arrived.
///  `release` is an ownership hand-off to the snapshot consumer, not necessarily
///  a physical deallocation. Implementations carry their own synchronization.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegionAllocator: Send + Sync + 'static {
    async fn acquire(&self, region_key: &str, size: u64) -> anyhow::Result<RegionBuffer>;

    async fn release(&self, buffer: RegionBuffer, size: u64) -> anyhow::Result<()>;
}

/// Process-local allocator: released regions stay readable so the snapshot
///  consumer can pick them up. Releasing the same key again replaces the
///  previous region, which makes malformed duplicate streams harmless.
#[derive(Default)]
pub struct InMemoryAllocator {
    released: Mutex<FxHashMap<String, Bytes>>,
}

impl InMemoryAllocator {
    pub fn new() -> InMemoryAllocator {
        InMemoryAllocator::default()
    }

    /// the most recently released region for this key, if any
    pub async fn released_region(&self, region_key: &str) -> Option<Bytes> {
        self.released.lock().await.get(region_key).cloned()
    }
}

#[async_trait]
impl RegionAllocator for InMemoryAllocator {
    async fn acquire(&self, region_key: &str, size: u64) -> anyhow::Result<RegionBuffer> {
        debug!("acquiring region buffer {:?} of {} bytes", region_key, size);
        Ok(RegionBuffer::new(region_key, size))
    }

    async fn release(&self, buffer: RegionBuffer, size: u64) -> anyhow::Result<()> {
        debug!(
            "releasing region buffer {:?} of {} bytes",
            buffer.region_key(),
            size
        );
        let key = buffer.region_key().to_string();
        self.released.lock().await.insert(key, buffer.into_bytes());
        Ok(())
    }
}
