//! Per-guild player sessions.
//!
//! A [`Session`] exists from the moment the bot joins a voice channel until it
//! leaves. It remembers where the display lives and owns the idle timer. The
//! playback state itself stays with the playback engine.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use tokio::task::JoinHandle;

use crate::platform::{ChannelId, GuildId, MessageRef, UserId};

#[derive(Debug)]
pub struct Session {
    guild: GuildId,
    voice_channel: ChannelId,
    owner: Option<UserId>,
    message: Mutex<Option<MessageRef>>,
    locale: Mutex<String>,
    connected: AtomicBool,
    idle: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Starts a session for a bot that just joined `voice_channel`.
    #[must_use]
    pub fn new(guild: GuildId, voice_channel: ChannelId, owner: Option<UserId>, locale: &str) -> Self {
        Self {
            guild,
            voice_channel,
            owner,
            message: Mutex::new(None),
            locale: Mutex::new(locale.to_owned()),
            connected: AtomicBool::new(true),
            idle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    #[must_use]
    pub fn voice_channel(&self) -> ChannelId {
        self.voice_channel
    }

    /// The user who had the bot connect, if it was asked through the bridge.
    #[must_use]
    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    /// The current display message.
    #[must_use]
    pub fn message(&self) -> Option<MessageRef> {
        *lock(&self.message)
    }

    /// Adopts `message` as the display and returns the previous one.
    pub fn replace_message(&self, message: MessageRef) -> Option<MessageRef> {
        lock(&self.message).replace(message)
    }

    /// Channel for notices: the display's channel, or the voice channel's
    /// chat when there is no display yet.
    #[must_use]
    pub fn notice_channel(&self) -> ChannelId {
        self.message()
            .map_or(self.voice_channel, |message| message.channel)
    }

    #[must_use]
    pub fn locale(&self) -> String {
        lock(&self.locale).clone()
    }

    pub fn set_locale(&self, locale: &str) {
        locale.clone_into(&mut lock(&self.locale));
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Starts the idle timer with `spawn` unless one is already pending.
    ///
    /// Returns whether a timer was started.
    pub fn start_idle(&self, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        let mut idle = lock(&self.idle);
        if idle.as_ref().is_some_and(|timer| !timer.is_finished()) {
            return false;
        }
        *idle = Some(spawn());
        true
    }

    /// Aborts the idle timer. Returns whether one was pending.
    pub fn cancel_idle(&self) -> bool {
        match lock(&self.idle).take() {
            Some(timer) if !timer.is_finished() => {
                timer.abort();
                true
            }
            _ => false,
        }
    }

    /// Forgets the idle timer without aborting it.
    ///
    /// Called by the timer itself once it has decided to disconnect, so that
    /// tearing down the session does not abort the task doing the teardown.
    pub fn detach_idle(&self) {
        lock(&self.idle).take();
    }

    #[must_use]
    pub fn is_idle_pending(&self) -> bool {
        lock(&self.idle)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}
