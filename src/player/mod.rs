//! Playback capability of the bot.
//!
//! The audio node itself is not part of this crate. The controller and the
//! endpoints drive it through the [`PlaybackEngine`] trait and read its state
//! as [`PlaybackState`] snapshots. [`memory::MemoryEngine`] implements the
//! trait without any audio, for the headless binary and for tests.

pub mod memory;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{
    error::Result,
    platform::{GuildId, UserId},
};

/// A playable track as reported by the audio node.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub author: String,

    /// Length of the track, in milliseconds on the wire.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,

    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,

    /// User who queued the track. `None` for tracks the bot added itself.
    #[serde(default)]
    pub requester: Option<UserId>,
}

/// What to repeat when the current track ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,

    /// Replay the current track.
    Track,

    /// Append finished tracks back to the queue.
    Queue,
}

impl LoopMode {
    /// The next mode in the `Off -> Track -> Queue -> Off` cycle of the
    /// repeat button.
    #[must_use]
    pub fn cycle(self) -> Self {
        match self {
            Self::Off => Self::Track,
            Self::Track => Self::Queue,
            Self::Queue => Self::Off,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Track => write!(f, "track"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Snapshot of one guild's player.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub position: Duration,
    pub paused: bool,
    pub shuffle: bool,
    pub loop_mode: LoopMode,
}

impl PlaybackState {
    /// Whether a track is loaded and not paused.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.current.is_some() && !self.paused
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadKind {
    /// A single track was loaded by URI.
    Track,
    Playlist,
    Search,

    /// Nothing matched.
    Empty,

    /// The node failed to load the query.
    Error,
}

/// Outcome of resolving a query into tracks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadResult {
    pub kind: LoadKind,
    pub tracks: Vec<Track>,
    pub playlist_name: Option<String>,
}

impl LoadResult {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: LoadKind::Empty,
            tracks: Vec::new(),
            playlist_name: None,
        }
    }
}

/// Operations of the audio node on per-guild players.
///
/// Queue indices are 0-based. Mutating a guild without a player fails with
/// `FailedPrecondition`, an index outside the queue with `OutOfRange`.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Creates the player of `guild`. Does nothing if it already exists.
    async fn create(&self, guild: GuildId) -> Result<()>;

    /// Destroys the player of `guild` along with its queue.
    async fn destroy(&self, guild: GuildId) -> Result<()>;

    /// Snapshot of the player of `guild`, if it exists.
    fn state(&self, guild: GuildId) -> Option<PlaybackState>;

    async fn load_tracks(&self, query: &str) -> Result<LoadResult>;

    /// Appends `tracks` to the queue.
    async fn enqueue(&self, guild: GuildId, tracks: Vec<Track>) -> Result<()>;

    /// Starts the next queued track if nothing is loaded.
    async fn play(&self, guild: GuildId) -> Result<()>;

    /// Ends the current track and starts the next one, honoring the loop
    /// mode.
    async fn skip(&self, guild: GuildId) -> Result<()>;

    /// Unloads the current track. The queue is kept.
    async fn stop(&self, guild: GuildId) -> Result<()>;

    async fn seek(&self, guild: GuildId, position: Duration) -> Result<()>;
    async fn set_pause(&self, guild: GuildId, paused: bool) -> Result<()>;
    async fn set_shuffle(&self, guild: GuildId, shuffle: bool) -> Result<()>;
    async fn set_loop(&self, guild: GuildId, mode: LoopMode) -> Result<()>;

    /// Removes and returns the queued track at `index`.
    async fn remove(&self, guild: GuildId, index: usize) -> Result<Track>;

    /// Moves the queued track at `index` to the front of the queue.
    async fn move_to_front(&self, guild: GuildId, index: usize) -> Result<()>;

    /// Drops the first `count` queued tracks.
    async fn drop_front(&self, guild: GuildId, count: usize) -> Result<()>;

    async fn clear_queue(&self, guild: GuildId) -> Result<()>;
}
