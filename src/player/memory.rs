//! In-memory playback engine.
//!
//! Keeps per-guild queues and a simulated position clock without producing
//! any audio. Queries are resolved against a fixed catalog: a query that
//! equals a track URI loads that track, anything else searches titles and
//! authors case-insensitively.
//!
//! The clock advances with [`MemoryEngine::tick`], which publishes the same
//! events an audio node would: a position update for every player, a track
//! end when a track runs out and a queue end when nothing follows it.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::{LoadKind, LoadResult, LoopMode, PlaybackEngine, PlaybackState, Track};
use crate::{
    error::{Error, Result},
    events::{Event, EventBus},
    platform::GuildId,
};

#[derive(Debug, Default)]
struct Player {
    current: Option<Track>,
    queue: VecDeque<Track>,
    position: Duration,
    paused: bool,
    shuffle: bool,
    loop_mode: LoopMode,
}

impl Player {
    /// Ends the current track and loads the next one.
    fn advance(&mut self, guild: GuildId, events: &mut Vec<Event>) {
        if let Some(finished) = self.current.take() {
            events.push(Event::TrackEnd { guild });
            match self.loop_mode {
                LoopMode::Track => self.queue.push_front(finished),
                LoopMode::Queue => self.queue.push_back(finished),
                LoopMode::Off => {}
            }
        }

        self.position = Duration::ZERO;
        self.current = self.next();
        if self.current.is_none() {
            events.push(Event::QueueEnd { guild });
        }
    }

    fn next(&mut self) -> Option<Track> {
        // A replayed track always goes first, even when shuffling.
        if self.shuffle && self.loop_mode != LoopMode::Track && !self.queue.is_empty() {
            let index = fastrand::usize(..self.queue.len());
            self.queue.remove(index)
        } else {
            self.queue.pop_front()
        }
    }

    fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            current: self.current.clone(),
            queue: self.queue.iter().cloned().collect(),
            position: self.position,
            paused: self.paused,
            shuffle: self.shuffle,
            loop_mode: self.loop_mode,
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.queue.len() {
            return Err(Error::out_of_range(format!(
                "queue index {index} out of range for {} tracks",
                self.queue.len()
            )));
        }
        Ok(())
    }
}

/// Playback engine without audio.
#[derive(Debug)]
pub struct MemoryEngine {
    catalog: Vec<Track>,
    players: Mutex<HashMap<GuildId, Player>>,
    events: EventBus,
}

impl MemoryEngine {
    #[must_use]
    pub fn new(catalog: Vec<Track>, events: EventBus) -> Self {
        Self {
            catalog,
            players: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn players(&self) -> MutexGuard<'_, HashMap<GuildId, Player>> {
        self.players.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the player of `guild` and publishes the events it
    /// produced once the lock is released.
    fn with_player<T>(
        &self,
        guild: GuildId,
        f: impl FnOnce(&mut Player, &mut Vec<Event>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let result = {
            let mut players = self.players();
            let player = players.get_mut(&guild).ok_or_else(|| {
                Error::failed_precondition(format!("no player for guild {guild}"))
            })?;
            f(player, &mut events)
        };

        for event in events {
            self.events.publish(event);
        }
        result
    }

    /// Advances the clock of every unpaused player by `elapsed`.
    pub fn tick(&self, elapsed: Duration) {
        let mut events = Vec::new();
        {
            let mut players = self.players();
            for (&guild, player) in players.iter_mut() {
                let duration = player.current.as_ref().map(|track| track.duration);
                if let Some(duration) = duration.filter(|_| !player.paused) {
                    player.position = player.position.saturating_add(elapsed);
                    if player.position >= duration {
                        player.advance(guild, &mut events);
                    }
                }
                events.push(Event::PositionTick { guild });
            }
        }

        for event in events {
            self.events.publish(event);
        }
    }

    /// Ticks the clock every `interval` until the returned task is aborted.
    /// Intervals below one millisecond are raised to it.
    #[must_use]
    pub fn start_clock(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.tick(interval);
            }
        })
    }
}

#[async_trait]
impl PlaybackEngine for MemoryEngine {
    async fn create(&self, guild: GuildId) -> Result<()> {
        self.players().entry(guild).or_default();
        debug!("created player for guild {guild}");
        Ok(())
    }

    async fn destroy(&self, guild: GuildId) -> Result<()> {
        if self.players().remove(&guild).is_some() {
            debug!("destroyed player for guild {guild}");
        }
        Ok(())
    }

    fn state(&self, guild: GuildId) -> Option<PlaybackState> {
        self.players().get(&guild).map(Player::snapshot)
    }

    async fn load_tracks(&self, query: &str) -> Result<LoadResult> {
        if let Some(track) = self.catalog.iter().find(|track| track.uri == query) {
            return Ok(LoadResult {
                kind: LoadKind::Track,
                tracks: vec![track.clone()],
                playlist_name: None,
            });
        }

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(LoadResult::empty());
        }

        let tracks: Vec<_> = self
            .catalog
            .iter()
            .filter(|track| {
                track.title.to_lowercase().contains(&needle)
                    || track.author.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();

        if tracks.is_empty() {
            Ok(LoadResult::empty())
        } else {
            Ok(LoadResult {
                kind: LoadKind::Search,
                tracks,
                playlist_name: None,
            })
        }
    }

    async fn enqueue(&self, guild: GuildId, tracks: Vec<Track>) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.queue.extend(tracks);
            Ok(())
        })
    }

    async fn play(&self, guild: GuildId) -> Result<()> {
        self.with_player(guild, |player, _| {
            if player.current.is_none() {
                player.position = Duration::ZERO;
                player.current = player.next();
            }
            Ok(())
        })
    }

    async fn skip(&self, guild: GuildId) -> Result<()> {
        self.with_player(guild, |player, events| {
            player.advance(guild, events);
            Ok(())
        })
    }

    async fn stop(&self, guild: GuildId) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.current = None;
            player.position = Duration::ZERO;
            player.paused = false;
            Ok(())
        })
    }

    async fn seek(&self, guild: GuildId, position: Duration) -> Result<()> {
        self.with_player(guild, |player, _| {
            let track = player
                .current
                .as_ref()
                .ok_or_else(|| Error::failed_precondition("nothing is playing"))?;
            player.position = position.min(track.duration);
            Ok(())
        })
    }

    async fn set_pause(&self, guild: GuildId, paused: bool) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.paused = paused;
            Ok(())
        })
    }

    async fn set_shuffle(&self, guild: GuildId, shuffle: bool) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.shuffle = shuffle;
            Ok(())
        })
    }

    async fn set_loop(&self, guild: GuildId, mode: LoopMode) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.loop_mode = mode;
            Ok(())
        })
    }

    async fn remove(&self, guild: GuildId, index: usize) -> Result<Track> {
        self.with_player(guild, |player, _| {
            player.check_index(index)?;
            player
                .queue
                .remove(index)
                .ok_or_else(|| Error::out_of_range(format!("queue index {index}")))
        })
    }

    async fn move_to_front(&self, guild: GuildId, index: usize) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.check_index(index)?;
            if let Some(track) = player.queue.remove(index) {
                player.queue.push_front(track);
            }
            Ok(())
        })
    }

    async fn drop_front(&self, guild: GuildId, count: usize) -> Result<()> {
        self.with_player(guild, |player, _| {
            let count = count.min(player.queue.len());
            player.queue.drain(..count);
            Ok(())
        })
    }

    async fn clear_queue(&self, guild: GuildId) -> Result<()> {
        self.with_player(guild, |player, _| {
            player.queue.clear();
            Ok(())
        })
    }
}
