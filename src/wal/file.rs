//! File-backed WAL
//!
//! Segmented, checksummed log on local disk. Appends and syncs from all
//! callers serialize on one mutex.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::segment::{encode_frame, list_segments, Segment};
use super::{Wal, WalPaths};
use crate::config::WalConfig;
use crate::error::{Error, Result};
use crate::kv::Operation;

/// On-disk write-ahead log
pub struct FileWal {
    inner: Mutex<Option<WalInner>>,
    compression: bool,
}

/// Open state; `None` in `FileWal::inner` once closed
struct WalInner {
    paths: WalPaths,
    segment_size_mb: u64,
    /// Sealed segments, oldest first
    sealed: Vec<PathBuf>,
    active: Segment,
}

impl FileWal {
    /// Open (or create) the log stored in `dir`
    pub fn open(dir: PathBuf, config: &WalConfig) -> Result<Self> {
        let paths = WalPaths::new(dir);
        paths.ensure_dirs()?;

        let mut segments = list_segments(&paths.base_dir)?;
        let active = match segments.pop() {
            Some(last) => Segment::open(last, config.segment_size_mb)?.0,
            None => Segment::create(paths.segment_path(1), 1, config.segment_size_mb)?,
        };

        tracing::info!(
            "WAL opened at {:?}: {} sealed segment(s), next index {}",
            paths.base_dir,
            segments.len(),
            active.next_index()
        );

        Ok(Self {
            inner: Mutex::new(Some(WalInner {
                paths,
                segment_size_mb: config.segment_size_mb,
                sealed: segments,
                active,
            })),
            compression: config.compression,
        })
    }
}

impl WalInner {
    /// Seal the active segment and start a new one
    fn rotate(&mut self) -> Result<()> {
        self.active.sync()?;
        let next = self.active.next_index();
        let segment = Segment::create(self.paths.segment_path(next), next, self.segment_size_mb)?;
        let old = std::mem::replace(&mut self.active, segment);
        tracing::debug!("WAL rotated: sealed segment {}, active segment {}", old.id, next);
        self.sealed.push(old.path);
        Ok(())
    }
}

#[async_trait]
impl Wal for FileWal {
    async fn append(&self, op: &Operation) -> Result<()> {
        let frame = encode_frame(op, self.compression)?;

        let mut guard = self.inner.lock().await;
        let inner = guard.as_mut().ok_or(Error::WalClosed)?;

        if !inner.active.has_space(frame.len()) {
            inner.rotate()?;
        }
        inner.active.append_frame(&frame)?;
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<Operation>> {
        let mut guard = self.inner.lock().await;
        let inner = guard.as_mut().ok_or(Error::WalClosed)?;

        let mut ops = Vec::new();
        for path in &inner.sealed {
            let (_, segment_ops) = Segment::open(path.clone(), inner.segment_size_mb)?;
            ops.extend(segment_ops);
        }
        ops.extend(inner.active.read_all()?);
        Ok(ops)
    }

    async fn sync(&self) -> Result<()> {
        let guard = self.inner.lock().await;
        let inner = guard.as_ref().ok_or(Error::WalClosed)?;
        inner.active.sync()
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            inner.active.sync()?;
            tracing::info!("WAL closed at {:?}", inner.paths.base_dir);
        }
        Ok(())
    }
}
