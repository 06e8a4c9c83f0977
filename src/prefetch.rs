//! Single-slot comic prefetch
//!
//! Keeps one normalized comic staged in the prefetch slot so a poll in comic
//! mode only has to copy a file. The slot is refilled in the background
//! after it is consumed. At most one refill runs at a time, and failed
//! refills are not retried until the next explicit trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::comic::{self, ComicSource};
use crate::error::AppError;
use crate::store::{RasterStore, Slot};

/// How `take_or_fetch` produced the live image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComicServed {
    /// Copied from the prefetch slot
    Prefetched,
    /// Fetched and normalized on the spot
    Fetched,
}

pub struct ComicPrefetch {
    source: Arc<dyn ComicSource>,
    store: Arc<RasterStore>,
    /// True iff the prefetch slot holds a complete normalized comic
    ready: Mutex<bool>,
    refilling: AtomicBool,
}

impl ComicPrefetch {
    pub fn new(source: Arc<dyn ComicSource>, store: Arc<RasterStore>) -> Arc<Self> {
        Arc::new(Self {
            source,
            store,
            ready: Mutex::new(false),
            refilling: AtomicBool::new(false),
        })
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.lock().await
    }

    #[cfg(test)]
    pub fn is_refilling(&self) -> bool {
        self.refilling.load(Ordering::Acquire)
    }

    /// Start a background refill unless one is running or the slot is full
    pub fn refill(self: &Arc<Self>) {
        if self
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Comic refill already in flight");
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let filled = this.fill_slot().await;
            if let Err(e) = this.finish_refill(filled).await {
                tracing::error!("Comic prefetch failed: {}", e);
            }
        });
    }

    /// Refill and wait for the outcome
    ///
    /// Returns `Ok(())` without fetching when the slot is already ready or
    /// another refill is in flight.
    pub async fn refill_now(&self) -> Result<(), AppError> {
        if self
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let filled = self.fill_slot().await;
        self.finish_refill(filled).await
    }

    /// Fetch and stage a comic; `Ok(false)` when the slot was already full
    ///
    /// Caller holds the `refilling` flag.
    async fn fill_slot(&self) -> Result<bool, AppError> {
        if *self.ready.lock().await {
            return Ok(false);
        }

        let comic = comic::fetch_random(self.source.as_ref()).await?;
        tracing::info!("Prefetching xkcd comic {} ({})", comic.id, comic.title);
        self.store.render(Slot::Prefetch, comic.image).await?;
        tracing::info!("Prefetched comic {} is ready", comic.id);
        Ok(true)
    }

    /// Release the `refilling` flag and publish readiness under one lock
    ///
    /// A take that sees the slot ready can always start the next refill.
    async fn finish_refill(&self, filled: Result<bool, AppError>) -> Result<(), AppError> {
        let mut ready = self.ready.lock().await;
        self.refilling.store(false, Ordering::Release);
        if let Ok(true) = filled {
            *ready = true;
        }
        filled.map(|_| ())
    }

    /// Put a comic into the live slot, from the prefetch slot when possible
    pub async fn take_or_fetch(self: &Arc<Self>) -> Result<ComicServed, AppError> {
        {
            let mut ready = self.ready.lock().await;
            if *ready {
                // Clear the flag whatever the copy does; a bad staged file must not be served twice
                *ready = false;
                match self.store.promote_prefetch().await {
                    Ok(()) => {
                        drop(ready);
                        tracing::info!("Using prefetched comic");
                        self.refill();
                        return Ok(ComicServed::Prefetched);
                    }
                    Err(e) => {
                        tracing::error!("Error copying prefetched comic: {}", e);
                    }
                }
            }
        }

        tracing::info!("No prefetched comic ready, fetching directly");
        let comic = comic::fetch_random(self.source.as_ref()).await?;
        self.store.render(Slot::Live, comic.image).await?;

        // Stage the next one so the following poll is fast
        self.refill();
        Ok(ComicServed::Fetched)
    }
}
