//! Events that drive the player display.
//!
//! The playback engine and the chat platform publish [`Event`]s on an
//! [`EventBus`]. Each registered [`Subscriber`] receives every event in a
//! supervised task of its own, so a slow or failing subscriber never holds up
//! the publisher or the other subscribers.
//!
//! The bus does not keep its subscribers alive. A subscriber that is dropped
//! stops receiving events.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use kava::events::{Event, EventBus, Subscriber};
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl Subscriber for Logger {
//!     async fn on_event(&self, event: Event) -> kava::error::Result<()> {
//!         println!("{event} in guild {}", event.guild());
//!         Ok(())
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let logger = Arc::new(Logger);
//! bus.subscribe(&logger);
//! ```

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use async_trait::async_trait;

use crate::{
    error::Result,
    platform::{ChannelId, GuildId, Interaction, UserId},
    player::Track,
    tasks::Supervisor,
};

/// Something that happened to a guild's player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Periodic position update of a player.
    PositionTick { guild: GuildId },

    /// The current track finished or was replaced.
    TrackEnd { guild: GuildId },

    /// The last track finished and the queue is empty.
    QueueEnd { guild: GuildId },

    /// The node could not play `track`.
    TrackLoadFailed {
        guild: GuildId,
        track: Track,
        reason: Option<String>,
    },

    /// The bot left the voice channel of `guild`, for whatever reason.
    VoiceLeave { guild: GuildId },

    /// A user pressed a button on a display message.
    ControlPressed(Press),
}

/// A button press on a display message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Press {
    pub guild: GuildId,
    pub user: UserId,

    /// Voice channel the user is in, if any.
    pub user_channel: Option<ChannelId>,

    pub custom_id: String,
    pub interaction: Interaction,
}

impl Event {
    #[must_use]
    pub fn guild(&self) -> GuildId {
        match self {
            Self::PositionTick { guild }
            | Self::TrackEnd { guild }
            | Self::QueueEnd { guild }
            | Self::TrackLoadFailed { guild, .. }
            | Self::VoiceLeave { guild } => *guild,
            Self::ControlPressed(press) => press.guild,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PositionTick { .. } => write!(f, "position tick"),
            Self::TrackEnd { .. } => write!(f, "track end"),
            Self::QueueEnd { .. } => write!(f, "queue end"),
            Self::TrackLoadFailed { .. } => write!(f, "track load failure"),
            Self::VoiceLeave { .. } => write!(f, "voice leave"),
            Self::ControlPressed(press) => write!(f, "{} press", press.custom_id),
        }
    }
}

/// Receives events published on an [`EventBus`].
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handles one event. Errors are logged by the bus.
    async fn on_event(&self, event: Event) -> Result<()>;
}

/// Fans events out to subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Weak<dyn Subscriber>>>>,
    tasks: Supervisor,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers events to `subscriber` for as long as it is alive.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>)
    where
        S: Subscriber + 'static,
    {
        let subscriber: Weak<dyn Subscriber> = Arc::downgrade(subscriber) as Weak<S>;
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Delivers `event` to every subscriber, each in its own task.
    pub fn publish(&self, event: Event) {
        let (subscribers, dropped) = {
            let registered = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let subscribers: Vec<_> = registered.iter().filter_map(Weak::upgrade).collect();
            let dropped = subscribers.len() < registered.len();
            (subscribers, dropped)
        };

        if dropped {
            trace!("forgetting dropped subscribers");
            self.subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|subscriber| subscriber.strong_count() > 0);
        }

        if subscribers.is_empty() {
            trace!("{event} in guild {}: no subscribers", event.guild());
            return;
        }

        for subscriber in subscribers {
            let name = format!("{event} in guild {}", event.guild());
            self.tasks
                .spawn(name, deliver(subscriber, event.clone()));
        }
    }

    /// Waits until all deliveries so far have finished.
    pub async fn quiesce(&self) {
        self.tasks.quiesce().await;
    }
}

async fn deliver(subscriber: Arc<dyn Subscriber>, event: Event) -> Result<()> {
    subscriber.on_event(event).await
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventBus")
            .field("subscribers", &subscribers)
            .field("pending", &self.tasks.len())
            .finish()
    }
}
