//! Configuration of the bridge, loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration that connects to a Kava server on localhost. See
//! `kava.toml.example` for all keys.

use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};

use crate::{
    error::Result,
    platform::{BotUser, VoiceChannel},
    player::Track,
};

/// Kava server the bridge connects to when none is configured.
pub const DEFAULT_URI: &str = "ws://127.0.0.1:8765";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub kava: KavaConfig,
    pub player: PlayerConfig,
    pub bot: BotUser,
    pub icons: Icons,

    /// Voice channels known to the headless platform.
    pub voice_channels: Vec<VoiceChannel>,

    /// Tracks known to the in-memory playback engine.
    pub catalog: Vec<Track>,
}

impl Config {
    /// Loads the configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, and `InvalidArgument`
    /// if it is not valid TOML or holds values of the wrong type.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses the configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `contents` is not valid TOML or holds
    /// values of the wrong type.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(Into::into)
    }
}

/// Connection settings for the Kava socket.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KavaConfig {
    /// Websocket URI of the Kava server.
    pub uri: String,

    /// How long a request waits for its response, in seconds. Zero waits
    /// forever.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,

    /// How long the websocket handshake may take, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl KavaConfig {
    /// The request timeout, or `None` when requests wait forever.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }
}

impl Default for KavaConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_owned(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Timing of the player display and idle handling.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlayerConfig {
    /// How long a player may sit idle before a warning is posted.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub idle_timeout: Duration,

    /// How long after the warning the player disconnects.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub idle_grace: Duration,

    /// How long the notice about a failed track stays up before the display
    /// takes over its message.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub failed_track_delay: Duration,

    /// Interval of position updates from the in-memory engine.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tick_interval: Duration,

    /// Locale of new sessions until an interaction tells otherwise.
    pub locale: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            idle_grace: Duration::from_secs(30),
            failed_track_delay: Duration::from_secs(5),
            tick_interval: Duration::from_secs(5),
            locale: "zh-TW".to_owned(),
        }
    }
}

/// Glyph overrides for the display, keyed like `progress.start_point` or
/// `control.pause`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Icons(HashMap<String, String>);

impl Icons {
    /// The glyph configured for `key`, or `fallback` when there is none.
    #[must_use]
    pub fn get<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.0.get(key).map_or(fallback, String::as_str)
    }

    /// Overrides the glyph for `key`.
    pub fn insert(&mut self, key: &str, glyph: &str) {
        self.0.insert(key.to_owned(), glyph.to_owned());
    }
}
