//! Device synchronization
//!
//! Each device keeps one WebSocket open and polls over it. A session waits
//! for a message, dispatches it, replies, and goes back to waiting. The
//! session ends when the socket closes or errors; the device reconnects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{Local, NaiveDateTime};

use crate::prefetch::ComicPrefetch;
use crate::protocol::{PollReply, PollRequest};
use crate::quotes::QuoteCards;
use crate::schedule::NightWindow;
use crate::settings::{Mode, SettingsStore};
use crate::store::{RasterStore, Slot};

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

pub struct SyncHandler {
    settings: Arc<SettingsStore>,
    store: Arc<RasterStore>,
    prefetch: Arc<ComicPrefetch>,
    quotes: Arc<QuoteCards>,
    night: NightWindow,
    /// Absolute URL of the live raster on the image origin server
    image_url: String,
}

impl SyncHandler {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: Arc<RasterStore>,
        prefetch: Arc<ComicPrefetch>,
        quotes: Arc<QuoteCards>,
        night: NightWindow,
        image_url: String,
    ) -> Self {
        Self {
            settings,
            store,
            prefetch,
            quotes,
            night,
            image_url,
        }
    }

    /// Handle one inbound message at the current local time
    pub async fn handle_message(&self, message: &str) -> Option<PollReply> {
        self.handle_message_at(message, Local::now().naive_local()).await
    }

    /// Handle one inbound message; only polls get a reply
    pub async fn handle_message_at(&self, message: &str, now: NaiveDateTime) -> Option<PollReply> {
        let request = PollRequest::parse(message);

        if let Some(percent) = request.battery {
            tracing::info!("Received battery: {}%", percent);
            self.settings.record_battery(percent).await;
        }

        if !request.is_poll() {
            tracing::debug!("Ignoring command {:?}", request.command);
            return None;
        }

        let settings = self.settings.snapshot().await;
        let minutes = self.night.next_interval(now, settings.daytime_minutes);

        match settings.mode {
            Mode::Quote => {
                if let Err(e) = self.quotes.generate().await {
                    tracing::error!("Failed to generate quote card: {}", e);
                }
            }
            Mode::Comic => match self.prefetch.take_or_fetch().await {
                Ok(served) => tracing::debug!("Comic served: {:?}", served),
                Err(e) => tracing::error!("Failed to get comic: {}", e),
            },
            Mode::Normal => {}
        }

        let reply = if self.store.exists(Slot::Live) {
            PollReply::Update {
                url: self.image_url.clone(),
                minutes,
            }
        } else {
            PollReply::NoUpdate { minutes }
        };
        Some(reply)
    }
}

/// Upgrade a device connection to a sync session
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(handler): State<Arc<SyncHandler>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, handler))
}

async fn run_session(mut socket: WebSocket, handler: Arc<SyncHandler>) {
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    tracing::info!("Device session {} connected", session_id);

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Device session {} receive error: {}", session_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                tracing::info!("WS message: {}", text.as_str());
                if let Some(reply) = handler.handle_message(text.as_str()).await {
                    let minutes = reply.minutes();
                    let reply = reply.to_string();
                    if socket.send(Message::Text(reply.clone().into())).await.is_err() {
                        break;
                    }
                    tracing::info!("WS sent: {} (next poll in {} minutes)", reply, minutes);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!("Device session {} closed", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefetch::tests::ScriptedSource;
    use crate::quotes::tests::CountingQuotes;
    use ab_glyph::FontArc;
    use chrono::NaiveDate;

    const URL: &str = "http://10.0.0.2:8000/image.png";

    struct Harness {
        _dir: tempfile::TempDir,
        settings: Arc<SettingsStore>,
        store: Arc<RasterStore>,
        comics: Arc<ScriptedSource>,
        quotes: Arc<CountingQuotes>,
        handler: SyncHandler,
    }

    fn harness(comic_outcomes: &[bool]) -> Harness {
        harness_with_font(comic_outcomes, None)
    }

    fn harness_with_font(comic_outcomes: &[bool], font: Option<FontArc>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")));
        let store = Arc::new(RasterStore::new(dir.path()));
        let comics = ScriptedSource::new(comic_outcomes);
        let quotes = CountingQuotes::new();
        let prefetch = ComicPrefetch::new(comics.clone(), store.clone());
        let cards = Arc::new(QuoteCards::new(quotes.clone(), font, store.clone()));
        let handler = SyncHandler::new(
            settings.clone(),
            store.clone(),
            prefetch,
            cards,
            NightWindow::default(),
            URL.to_string(),
        );
        Harness {
            _dir: dir,
            settings,
            store,
            comics,
            quotes,
            handler,
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_poll_without_image() {
        let h = harness(&[]);
        let reply = h.handler.handle_message_at("checkForImage", noon()).await;
        assert_eq!(reply, Some(PollReply::NoUpdate { minutes: 30 }));
        assert_eq!(reply.unwrap().to_string(), "no_update|duration:30");
    }

    #[tokio::test]
    async fn test_poll_after_image() {
        let h = harness(&[]);
        h.store.publish(Slot::Live, b"png".to_vec()).await.unwrap();

        let reply = h.handler.handle_message_at("checkForImage", noon()).await.unwrap();
        assert_eq!(reply.to_string(), format!("update:{}|duration:30", URL));
    }

    #[tokio::test]
    async fn test_poll_uses_configured_interval_and_night_window() {
        let h = harness(&[]);
        h.settings.set_daytime_minutes(5).await;

        let reply = h.handler.handle_message_at("checkForImage", noon()).await.unwrap();
        assert_eq!(reply.minutes(), 5);

        let late = NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(22, 31, 0)
            .unwrap();
        let reply = h.handler.handle_message_at("checkForImage", late).await.unwrap();
        assert_eq!(reply.minutes(), 480);
    }

    #[tokio::test]
    async fn test_battery_is_recorded_and_persisted() {
        let h = harness(&[]);
        h.handler
            .handle_message_at("checkForImage|battery:64", noon())
            .await
            .unwrap();
        assert_eq!(h.settings.snapshot().await.battery_percent, 64);

        h.handler
            .handle_message_at("checkForImage|battery:oops", noon())
            .await
            .unwrap();
        assert_eq!(h.settings.snapshot().await.battery_percent, 64);
    }

    #[tokio::test]
    async fn test_other_commands_get_no_reply() {
        let h = harness(&[]);
        assert_eq!(h.handler.handle_message_at("ping|battery:10", noon()).await, None);
        // Telemetry on any command still counts
        assert_eq!(h.settings.snapshot().await.battery_percent, 10);
    }

    #[tokio::test]
    async fn test_quote_mode_only_exercises_quote_path() {
        let h = harness(&[true, true]);
        h.settings.set_mode(Mode::Comic).await;
        h.settings.set_mode(Mode::Quote).await;

        h.handler.handle_message_at("checkForImage", noon()).await.unwrap();

        assert_eq!(h.quotes.calls(), 1);
        assert_eq!(h.comics.fetches(), 0);
    }

    #[tokio::test]
    async fn test_quote_mode_poll_publishes_card() {
        let h = harness_with_font(&[], Some(crate::text::tests::bundled_font()));
        h.settings.set_mode(Mode::Quote).await;
        assert!(!h.store.exists(Slot::Live));

        let reply = h.handler.handle_message_at("checkForImage", noon()).await.unwrap();

        assert_eq!(reply.to_string(), format!("update:{}|duration:30", URL));
        assert_eq!(h.quotes.calls(), 1);
        assert!(h.store.image_available());
    }

    #[tokio::test]
    async fn test_quote_mode_without_font_reports_no_update() {
        let h = harness(&[]);
        h.settings.set_mode(Mode::Quote).await;

        let reply = h.handler.handle_message_at("checkForImage", noon()).await.unwrap();
        assert_eq!(reply.to_string(), "no_update|duration:30");
    }

    #[tokio::test]
    async fn test_comic_mode_serves_comic() {
        let h = harness(&[true]);
        h.settings.set_mode(Mode::Comic).await;

        let reply = h.handler.handle_message_at("checkForImage", noon()).await.unwrap();

        assert!(matches!(reply, PollReply::Update { .. }));
        assert!(h.comics.fetches() >= 1);
        assert_eq!(h.quotes.calls(), 0);
    }

    #[tokio::test]
    async fn test_comic_failure_still_replies_with_last_image() {
        let h = harness(&[false]);
        h.store.publish(Slot::Live, b"last good".to_vec()).await.unwrap();
        h.settings.set_mode(Mode::Comic).await;

        let reply = h.handler.handle_message_at("checkForImage", noon()).await.unwrap();
        assert_eq!(reply.to_string(), format!("update:{}|duration:30", URL));
    }

    #[tokio::test]
    async fn test_normal_mode_generates_nothing() {
        let h = harness(&[true]);
        h.handler.handle_message_at("checkForImage", noon()).await.unwrap();
        assert_eq!(h.quotes.calls(), 0);
        assert_eq!(h.comics.fetches(), 0);
    }
}
