use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WriteMode {
    Truncate,
    Append,
}

/// Resolves a region key to the snapshot region's bytes. The sender loads each
///  phase's region exactly once, at the phase's first chunk.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegionLoader: Send + Sync + 'static {
    async fn load_region(&self, region_key: &str) -> anyhow::Result<Bytes>;

    async fn write_region(&self, path: &Path, data: &[u8], mode: WriteMode) -> anyhow::Result<()>;
}

/// Loads regions from snapshot files under a base directory, one file per
///  region key.
pub struct FileRegionLoader {
    base_dir: PathBuf,
}

impl FileRegionLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> FileRegionLoader {
        FileRegionLoader {
            base_dir: base_dir.into(),
        }
    }

    fn region_path(&self, region_key: &str) -> PathBuf {
        self.base_dir.join(region_key)
    }
}

#[async_trait]
impl RegionLoader for FileRegionLoader {
    async fn load_region(&self, region_key: &str) -> anyhow::Result<Bytes> {
        let path = self.region_path(region_key);
        debug!("loading region {:?} from {:?}", region_key, path);
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    async fn write_region(&self, path: &Path, data: &[u8], mode: WriteMode) -> anyhow::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true);
        match mode {
            WriteMode::Truncate => options.truncate(true),
            WriteMode::Append => options.append(true),
        };

        let mut file = options.open(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}
