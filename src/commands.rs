//! Command frontend operations
//!
//! What a user can do to the frame: pick a mode, pick the daytime interval,
//! or push their own photo or text. Uploads switch the frame back to normal
//! mode so the next poll shows them unchanged.

use std::sync::Arc;

use ab_glyph::FontArc;
use image::DynamicImage;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::image_processing;
use crate::prefetch::ComicPrefetch;
use crate::quotes::QuoteCards;
use crate::settings::{Mode, Settings, SettingsStore};
use crate::store::{RasterStore, Slot};
use crate::text;

/// Current frame status
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Status {
    pub mode: Mode,
    pub update_duration_minutes: u32,
    pub battery_percent: u8,
    /// Whether any image has been published since startup
    pub image_available: bool,
    /// Whether a comic is staged for the next comic poll
    pub comic_ready: bool,
}

pub struct Commands {
    settings: Arc<SettingsStore>,
    store: Arc<RasterStore>,
    prefetch: Arc<ComicPrefetch>,
    quotes: Arc<QuoteCards>,
    font: Option<FontArc>,
}

impl Commands {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: Arc<RasterStore>,
        prefetch: Arc<ComicPrefetch>,
        quotes: Arc<QuoteCards>,
        font: Option<FontArc>,
    ) -> Self {
        Self {
            settings,
            store,
            prefetch,
            quotes,
            font,
        }
    }

    /// Switch mode and produce content for it right away
    ///
    /// The mode stays switched even if the first image fails; later polls
    /// retry through the normal path.
    pub async fn set_mode(&self, mode: Mode) -> Result<Settings, AppError> {
        let settings = self.settings.set_mode(mode).await;
        tracing::info!("Mode set to {}", mode);

        match mode {
            Mode::Quote => self.quotes.generate().await?,
            Mode::Comic => {
                if let Err(e) = self.prefetch.refill_now().await {
                    tracing::warn!("Comic preload failed: {}", e);
                }
                self.prefetch.take_or_fetch().await?;
            }
            Mode::Normal => {}
        }

        Ok(settings)
    }

    pub async fn set_daytime_interval(&self, minutes: u32) -> Result<Settings, AppError> {
        if minutes == 0 {
            return Err(AppError::InvalidInput(
                "Update interval must be a positive number of minutes".to_string(),
            ));
        }
        let settings = self.settings.set_daytime_minutes(minutes).await;
        tracing::info!("Update interval set to {} minutes", minutes);
        Ok(settings)
    }

    /// Normalize an uploaded photo into the live slot
    pub async fn submit_photo(&self, image_data: Vec<u8>) -> Result<(), AppError> {
        self.settings.set_mode(Mode::Normal).await;

        if image_data.is_empty() {
            return Err(AppError::InvalidInput("No photo found".to_string()));
        }

        self.store.render(Slot::Live, image_data).await?;
        tracing::info!("Photo processed");
        Ok(())
    }

    /// Render a text message and normalize it into the live slot
    pub async fn submit_text(&self, message: String) -> Result<(), AppError> {
        self.settings.set_mode(Mode::Normal).await;

        if message.trim().is_empty() {
            return Err(AppError::InvalidInput("Message is empty".to_string()));
        }

        let font = self
            .font
            .clone()
            .ok_or_else(|| AppError::Font("No font loaded for text rendering".to_string()))?;

        let png_data = tokio::task::spawn_blocking(move || {
            let rendered = text::render_message(&font, &message);
            let raster = image_processing::normalize_image(&DynamicImage::ImageRgba8(rendered));
            image_processing::encode_indexed_png(&raster)
        })
        .await
        .map_err(|e| AppError::ImageProcessing(format!("Text render task failed: {}", e)))??;

        self.store.publish(Slot::Live, png_data).await?;
        tracing::info!("Text rendered");
        Ok(())
    }

    pub async fn status(&self) -> Status {
        let settings = self.settings.snapshot().await;
        Status {
            mode: settings.mode,
            update_duration_minutes: settings.daytime_minutes,
            battery_percent: settings.battery_percent,
            image_available: self.store.image_available(),
            comic_ready: self.prefetch.is_ready().await,
        }
    }
}
