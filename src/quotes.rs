//! Quote cards
//!
//! Quotes come from a JSON corpus that is re-read on every render, so edits
//! to the file take effect on the next poll.

use std::path::PathBuf;
use std::sync::Arc;

use ab_glyph::FontArc;
use async_trait::async_trait;
use image::DynamicImage;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::image_processing;
use crate::store::{RasterStore, Slot};
use crate::text;

/// Quote corpus file layout
#[derive(Debug, Deserialize)]
struct Corpus {
    #[serde(default)]
    quotes: Vec<Quote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub season: Option<Value>,
    #[serde(default)]
    pub episode: Option<Value>,
    #[serde(default)]
    pub episode_title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialogueLine {
    #[serde(default = "unknown_speaker")]
    pub speaker: String,
    #[serde(default)]
    pub text: String,
}

fn unknown_speaker() -> String {
    "Unknown".to_string()
}

/// Render a JSON scalar for the footer, `?` when missing
fn field_or_unknown(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "?".to_string(),
    }
}

impl Quote {
    /// `"<speaker> - <text>"` per dialogue entry
    pub fn dialogue_lines(&self) -> Vec<String> {
        self.dialogue
            .iter()
            .map(|entry| format!("{} - {}", entry.speaker, entry.text))
            .collect()
    }

    pub fn footer(&self) -> String {
        format!(
            "Season {} - Episode {}: {}",
            field_or_unknown(&self.season),
            field_or_unknown(&self.episode),
            self.episode_title.as_deref().unwrap_or("Untitled")
        )
    }
}

/// Choose a random quote, rejecting an empty corpus or an empty quote
pub fn pick_random(quotes: &[Quote]) -> Result<Quote, AppError> {
    let quote = quotes
        .choose(&mut rand::rng())
        .ok_or_else(|| AppError::Quote("No quotes in corpus".to_string()))?;

    if quote.dialogue.is_empty() {
        return Err(AppError::Quote("Selected quote has no dialogue".to_string()));
    }

    Ok(quote.clone())
}

/// A source of quotes
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn random_quote(&self) -> Result<Quote, AppError>;
}

/// Quote corpus stored as a JSON file
pub struct QuoteFile {
    path: PathBuf,
}

impl QuoteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl QuoteSource for QuoteFile {
    async fn random_quote(&self) -> Result<Quote, AppError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::Quote(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let corpus: Corpus = serde_json::from_str(&contents).map_err(|e| {
            AppError::Quote(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        pick_random(&corpus.quotes)
    }
}

/// Renders quote cards into the live slot
pub struct QuoteCards {
    source: Arc<dyn QuoteSource>,
    font: Option<FontArc>,
    store: Arc<RasterStore>,
}

impl QuoteCards {
    pub fn new(source: Arc<dyn QuoteSource>, font: Option<FontArc>, store: Arc<RasterStore>) -> Self {
        Self { source, font, store }
    }

    /// Pick a quote, draw its card and publish it
    pub async fn generate(&self) -> Result<(), AppError> {
        let quote = self.source.random_quote().await?;
        let font = self
            .font
            .clone()
            .ok_or_else(|| AppError::Font("No font loaded for quote cards".to_string()))?;

        let png_data = tokio::task::spawn_blocking(move || {
            let card = text::render_quote_card(&font, &quote.dialogue_lines(), &quote.footer());
            let raster = image_processing::normalize_image(&DynamicImage::ImageLuma8(card));
            image_processing::encode_indexed_png(&raster)
        })
        .await
        .map_err(|e| AppError::ImageProcessing(format!("Quote card task failed: {}", e)))??;

        self.store.publish(Slot::Live, png_data).await?;
        tracing::info!("Published random quote card");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CORPUS: &str = r#"{
        "quotes": [
            {
                "dialogue": [
                    {"speaker": "Ross", "text": "We were on a break!"},
                    {"text": "..."}
                ],
                "season": 3,
                "episode": "15",
                "episode_title": "The One Where Ross and Rachel Take a Break"
            }
        ]
    }"#;

    /// Quote source counting calls, always returning the same quote
    pub(crate) struct CountingQuotes {
        pub(crate) calls: AtomicUsize,
    }

    impl CountingQuotes {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteSource for CountingQuotes {
        async fn random_quote(&self) -> Result<Quote, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let corpus: Corpus = serde_json::from_str(CORPUS).unwrap();
            pick_random(&corpus.quotes)
        }
    }

    #[test]
    fn test_dialogue_and_footer() {
        let corpus: Corpus = serde_json::from_str(CORPUS).unwrap();
        let quote = &corpus.quotes[0];
        assert_eq!(
            quote.dialogue_lines(),
            vec!["Ross - We were on a break!", "Unknown - ..."]
        );
        assert_eq!(
            quote.footer(),
            "Season 3 - Episode 15: The One Where Ross and Rachel Take a Break"
        );
    }

    #[test]
    fn test_footer_defaults() {
        let quote: Quote = serde_json::from_str(r#"{"dialogue": []}"#).unwrap();
        assert_eq!(quote.footer(), "Season ? - Episode ?: Untitled");
    }

    #[test]
    fn test_empty_corpus_is_rejected() {
        assert!(matches!(pick_random(&[]), Err(AppError::Quote(_))));
    }

    #[test]
    fn test_quote_without_dialogue_is_rejected() {
        let quote: Quote = serde_json::from_str(r#"{"season": 1}"#).unwrap();
        assert!(matches!(pick_random(&[quote]), Err(AppError::Quote(_))));
    }

    #[tokio::test]
    async fn test_quote_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("friends.json");
        std::fs::write(&path, CORPUS).unwrap();

        let quote = QuoteFile::new(&path).random_quote().await.unwrap();
        assert_eq!(quote.dialogue.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_quote_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = QuoteFile::new(dir.path().join("missing.json")).random_quote().await;
        assert!(matches!(result, Err(AppError::Quote(_))));
    }

    #[tokio::test]
    async fn test_generate_without_font_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RasterStore::new(dir.path()));
        let cards = QuoteCards::new(CountingQuotes::new(), None, store.clone());

        assert!(matches!(cards.generate().await, Err(AppError::Font(_))));
        assert!(!store.exists(Slot::Live));
    }

    #[tokio::test]
    async fn test_generate_publishes_card() {
        let font = crate::text::tests::bundled_font();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RasterStore::new(dir.path()));
        let cards = QuoteCards::new(CountingQuotes::new(), Some(font), store.clone());

        cards.generate().await.unwrap();
        assert!(store.exists(Slot::Live));
        assert!(store.image_available());
    }
}
