//! Server configuration from command-line flags and environment variables

use std::path::PathBuf;

use chrono::NaiveTime;
use clap::Parser;

use crate::comic::XKCD_BASE;
use crate::schedule::{parse_clock, NightWindow};
use crate::store::LIVE_FILE;

#[derive(Parser, Debug, Clone)]
#[command(about = "Sync server for an e-paper photo frame", version)]
pub struct Config {
    /// Address the device uses to reach this server
    #[arg(long, env = "SERVER_IP")]
    pub server_ip: String,

    /// Port for the image origin and command API
    #[arg(long, env = "HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    /// Port for the device WebSocket
    #[arg(long, env = "WS_PORT", default_value_t = 8765)]
    pub ws_port: u16,

    /// Directory holding the rasters and settings.json
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Quote corpus (JSON)
    #[arg(long, env = "QUOTES_FILE", default_value = "friends.json")]
    pub quotes_file: PathBuf,

    /// TrueType font for quote cards and messages
    #[arg(long, env = "FONT_PATH", default_value = "assets/DejaVuSans.ttf")]
    pub font_path: PathBuf,

    /// Comic archive base URL
    #[arg(long, env = "COMIC_BASE_URL", default_value = XKCD_BASE)]
    pub comic_base_url: String,

    /// Client ids allowed to use the command API (comma separated)
    #[arg(long, env = "ALLOWED_CLIENTS", value_delimiter = ',')]
    pub allowed_clients: Vec<i64>,

    /// Start of the night window (HH:MM, local time)
    #[arg(long, env = "NIGHT_START", default_value = "22:30", value_parser = parse_clock)]
    pub night_start: NaiveTime,

    /// Morning wake time ending the night window (HH:MM, local time)
    #[arg(long, env = "MORNING_WAKE", default_value = "06:30", value_parser = parse_clock)]
    pub morning_wake: NaiveTime,
}

impl Config {
    /// URL the device fetches the live raster from
    pub fn image_url(&self) -> String {
        format!("http://{}:{}/{}", self.server_ip, self.http_port, LIVE_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn night_window(&self) -> NightWindow {
        NightWindow {
            night_start: self.night_start,
            morning_wake: self.morning_wake,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["paperframe-server", "--server-ip", "10.0.0.2"]).unwrap();
        assert_eq!(config.image_url(), "http://10.0.0.2:8000/image.png");
        assert_eq!(config.night_window(), NightWindow::default());
        assert_eq!(config.settings_path(), PathBuf::from("./settings.json"));
        // Default font ships with the crate
        assert!(crate::text::load_font(&config.font_path).is_ok());
    }

    #[test]
    fn test_allow_list_and_window() {
        let config = Config::try_parse_from([
            "paperframe-server",
            "--server-ip",
            "frame.local",
            "--http-port",
            "9000",
            "--allowed-clients",
            "1,2,3",
            "--night-start",
            "23:00",
        ])
        .unwrap();
        assert_eq!(config.allowed_clients, vec![1, 2, 3]);
        assert_eq!(config.night_start, parse_clock("23:00").unwrap());
        assert_eq!(config.image_url(), "http://frame.local:9000/image.png");
    }

    #[test]
    fn test_bad_clock_is_rejected() {
        let result = Config::try_parse_from([
            "paperframe-server",
            "--server-ip",
            "10.0.0.2",
            "--morning-wake",
            "late",
        ]);
        assert!(result.is_err());
    }
}
