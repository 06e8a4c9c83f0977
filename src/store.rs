//! On-disk raster slots
//!
//! The live slot is what the device is served. The prefetch slot is a
//! private staging file owned by the comic prefetcher. Every write lands in
//! a temporary file next to the target and is renamed over it, so readers
//! only ever observe complete files. File writes run on the blocking pool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;

use crate::error::AppError;
use crate::image_processing;

/// File name of the live raster, also its URL path
pub const LIVE_FILE: &str = "image.png";

/// File name of the staged comic
pub const PREFETCH_FILE: &str = "comic_next.png";

/// Named output location for normalized images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Live,
    Prefetch,
}

pub struct RasterStore {
    dir: PathBuf,
    /// Set whenever new content is published to the live slot
    image_available: AtomicBool,
}

impl RasterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            image_available: AtomicBool::new(false),
        }
    }

    pub fn path(&self, slot: Slot) -> PathBuf {
        match slot {
            Slot::Live => self.dir.join(LIVE_FILE),
            Slot::Prefetch => self.dir.join(PREFETCH_FILE),
        }
    }

    pub fn exists(&self, slot: Slot) -> bool {
        self.path(slot).is_file()
    }

    pub fn image_available(&self) -> bool {
        self.image_available.load(Ordering::Acquire)
    }

    /// Atomically replace a slot's contents
    pub async fn publish(&self, slot: Slot, png_data: Vec<u8>) -> Result<(), AppError> {
        let target = self.path(slot);
        let len = png_data.len();
        write_atomic(&self.dir, &target, png_data).await?;

        if slot == Slot::Live {
            self.image_available.store(true, Ordering::Release);
        }
        tracing::info!("Published {} bytes -> {}", len, target.display());
        Ok(())
    }

    /// Normalize source image bytes and publish the result
    ///
    /// Decoding and encoding are CPU-bound and run on the blocking pool.
    pub async fn render(&self, slot: Slot, image_data: Vec<u8>) -> Result<(), AppError> {
        let png_data = tokio::task::spawn_blocking(move || {
            let raster = image_processing::normalize(&image_data)?;
            image_processing::encode_indexed_png(&raster)
        })
        .await
        .map_err(|e| AppError::ImageProcessing(format!("Render task failed: {}", e)))??;

        self.publish(slot, png_data).await
    }

    /// Copy the staged comic into the live slot
    pub async fn promote_prefetch(&self) -> Result<(), AppError> {
        let staged = tokio::fs::read(self.path(Slot::Prefetch)).await?;
        self.publish(Slot::Live, staged).await
    }

    /// Current live raster bytes, if any has been produced
    pub async fn read_live(&self) -> Result<Vec<u8>, AppError> {
        match tokio::fs::read(self.path(Slot::Live)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound("Image not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Write to a temporary file in `dir`, then rename it over `target`
pub async fn write_atomic(dir: &Path, target: &Path, data: Vec<u8>) -> Result<(), AppError> {
    let dir = dir.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&dir, &target, &data))
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(format!("Write task failed: {}", e))))?
}

fn write_atomic_blocking(dir: &Path, target: &Path, data: &[u8]) -> Result<(), AppError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::tests::encode_png;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_live_before_any_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = RasterStore::new(dir.path());

        assert!(!store.exists(Slot::Live));
        assert!(!store.image_available());
        assert!(matches!(store.read_live().await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_publish_overwrites_and_flags_live_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = RasterStore::new(dir.path());

        store.publish(Slot::Live, b"first".to_vec()).await.unwrap();
        store.publish(Slot::Live, b"second".to_vec()).await.unwrap();

        assert!(store.image_available());
        assert_eq!(store.read_live().await.unwrap(), b"second");
        // Only the published file remains, no stray temporaries
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_publishes_leave_one_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RasterStore::new(dir.path()));

        let writers: Vec<_> = (0..16u8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.publish(Slot::Live, vec![i; 4096]).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let live = store.read_live().await.unwrap();
        assert_eq!(live.len(), 4096);
        assert!(live.iter().all(|&b| b == live[0]));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_slot_does_not_touch_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = RasterStore::new(dir.path());

        store.publish(Slot::Prefetch, b"staged".to_vec()).await.unwrap();
        assert!(!store.exists(Slot::Live));
        assert!(!store.image_available());

        store.promote_prefetch().await.unwrap();
        assert_eq!(store.read_live().await.unwrap(), b"staged");
        assert!(store.image_available());
    }

    #[tokio::test]
    async fn test_render_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let store = RasterStore::new(dir.path());
        let source = encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            30,
            60,
            Rgb([120, 30, 200]),
        )));

        store.render(Slot::Live, source).await.unwrap();

        let written = store.read_live().await.unwrap();
        assert_eq!(&written[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_render_failure_keeps_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = RasterStore::new(dir.path());
        store.publish(Slot::Live, b"last good".to_vec()).await.unwrap();

        assert!(store.render(Slot::Live, b"garbage".to_vec()).await.is_err());
        assert_eq!(store.read_live().await.unwrap(), b"last good");
    }
}
