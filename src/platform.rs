//! Chat platform capability of the bot.
//!
//! The controller posts display messages, notices and interaction replies
//! through the [`Platform`] trait, and asks an [`Authority`] whether a user
//! may control the music. [`HeadlessPlatform`] implements the platform
//! without any chat service: messages are kept in memory and logged.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    display::View,
    error::{Error, Result},
};

pub type GuildId = u64;
pub type ChannelId = u64;
pub type UserId = u64;
pub type MessageId = u64;

/// The bot's own account.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BotUser {
    pub id: UserId,
    pub name: String,
}

impl Default for BotUser {
    fn default() -> Self {
        Self {
            id: 1,
            name: "kava".to_owned(),
        }
    }
}

/// A voice channel and the guild it belongs to. Its chat receives notices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub guild_id: GuildId,
}

/// A posted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub id: MessageId,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.id)
    }
}

/// A pending button interaction that wants an answer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interaction {
    pub id: u64,

    /// Locale of the user who pressed the button.
    pub locale: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A short embed-style message outside the display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: Option<String>,
}

impl Notice {
    #[must_use]
    pub fn warning(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            title: title.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn error(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Operations of the chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
    fn bot_user(&self) -> BotUser;

    /// Looks up a voice channel the bot can see.
    async fn voice_channel(&self, channel: ChannelId) -> Option<VoiceChannel>;

    /// Joins `channel`. Fails with `AlreadyExists` if the bot is already in
    /// a voice channel of that guild.
    async fn join_voice(&self, channel: &VoiceChannel) -> Result<()>;

    /// Leaves the voice channel of `guild`.
    async fn leave_voice(&self, guild: GuildId) -> Result<()>;

    async fn send_view(&self, channel: ChannelId, view: &View) -> Result<MessageRef>;
    async fn edit_view(&self, message: &MessageRef, view: &View) -> Result<()>;

    /// Answers `interaction` by replacing the message it came from with
    /// `view`.
    async fn update_interaction(&self, interaction: &Interaction, view: &View) -> Result<()>;

    /// Answers `interaction` without changing anything.
    async fn acknowledge(&self, interaction: &Interaction) -> Result<()>;

    async fn send_notice(&self, channel: ChannelId, notice: &Notice) -> Result<MessageRef>;

    /// Answers `interaction` with a notice only the presser can see.
    async fn send_ephemeral(&self, interaction: &Interaction, notice: &Notice) -> Result<()>;

    async fn delete_message(&self, message: &MessageRef) -> Result<()>;
}

/// Decides who may control the music in a voice channel.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn can_use_music(&self, user: UserId, channel: ChannelId) -> Result<bool>;
}

/// What the headless platform has posted in a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Posted {
    View(View),
    Notice(Notice),
}

/// Messages kept by the headless platform. Older ones are forgotten.
pub const MAX_MESSAGES: usize = 256;

/// Length of the answer and deletion histories.
pub const MAX_HISTORY: usize = 64;

#[derive(Debug, Default)]
struct Store {
    messages: HashMap<MessageRef, Posted>,
    /// Keys of `messages`, oldest first.
    order: VecDeque<MessageRef>,
    joined: HashSet<GuildId>,
    answers: VecDeque<(Interaction, Option<Posted>)>,
    deleted: VecDeque<MessageRef>,
}

fn record<T>(history: &mut VecDeque<T>, item: T) {
    if history.len() == MAX_HISTORY {
        history.pop_front();
    }
    history.push_back(item);
}

impl Store {
    fn insert(&mut self, message: MessageRef, posted: Posted) {
        self.messages.insert(message, posted);
        self.order.push_back(message);
        while self.order.len() > MAX_MESSAGES {
            if let Some(oldest) = self.order.pop_front() {
                trace!("forgetting message {oldest}");
                self.messages.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, message: &MessageRef) -> Option<Posted> {
        let posted = self.messages.remove(message)?;
        self.order.retain(|other| other != message);
        Some(posted)
    }
}

/// Platform without a chat service.
///
/// Everything is logged and kept in memory, where it can be inspected.
#[derive(Debug)]
pub struct HeadlessPlatform {
    bot: BotUser,
    channels: HashMap<ChannelId, VoiceChannel>,
    store: Mutex<Store>,
    next_id: AtomicU64,
}

impl HeadlessPlatform {
    #[must_use]
    pub fn new(bot: BotUser, channels: Vec<VoiceChannel>) -> Self {
        Self {
            bot,
            channels: channels
                .into_iter()
                .map(|channel| (channel.id, channel))
                .collect(),
            store: Mutex::new(Store::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, channel: ChannelId, posted: Posted) -> MessageRef {
        let message = MessageRef {
            channel,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        self.store().insert(message, posted);
        message
    }

    /// Content of `message`, unless it was deleted.
    #[must_use]
    pub fn message(&self, message: &MessageRef) -> Option<Posted> {
        self.store().messages.get(message).cloned()
    }

    /// All notices posted so far, in no particular order.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.store()
            .messages
            .values()
            .filter_map(|posted| match posted {
                Posted::Notice(notice) => Some(notice.clone()),
                Posted::View(_) => None,
            })
            .collect()
    }

    /// Recently answered interactions with what they were answered with.
    #[must_use]
    pub fn answers(&self) -> Vec<(Interaction, Option<Posted>)> {
        self.store().answers.iter().cloned().collect()
    }

    #[must_use]
    pub fn deleted(&self) -> Vec<MessageRef> {
        self.store().deleted.iter().copied().collect()
    }

    #[must_use]
    pub fn is_joined(&self, guild: GuildId) -> bool {
        self.store().joined.contains(&guild)
    }
}

#[async_trait]
impl Platform for HeadlessPlatform {
    fn bot_user(&self) -> BotUser {
        self.bot.clone()
    }

    async fn voice_channel(&self, channel: ChannelId) -> Option<VoiceChannel> {
        self.channels.get(&channel).copied()
    }

    async fn join_voice(&self, channel: &VoiceChannel) -> Result<()> {
        if !self.store().joined.insert(channel.guild_id) {
            return Err(Error::already_exists(format!(
                "already in a voice channel of guild {}",
                channel.guild_id
            )));
        }
        info!("joined voice channel {} in guild {}", channel.id, channel.guild_id);
        Ok(())
    }

    async fn leave_voice(&self, guild: GuildId) -> Result<()> {
        if !self.store().joined.remove(&guild) {
            return Err(Error::failed_precondition(format!(
                "not in a voice channel of guild {guild}"
            )));
        }
        info!("left voice channel in guild {guild}");
        Ok(())
    }

    async fn send_view(&self, channel: ChannelId, view: &View) -> Result<MessageRef> {
        let message = self.post(channel, Posted::View(view.clone()));
        info!("posted display {message}: {} - {}", view.status, view.title);
        Ok(message)
    }

    async fn edit_view(&self, message: &MessageRef, view: &View) -> Result<()> {
        let mut store = self.store();
        let posted = store
            .messages
            .get_mut(message)
            .ok_or_else(|| Error::not_found(format!("message {message} does not exist")))?;
        *posted = Posted::View(view.clone());
        debug!("display {message}: {} - {}", view.status, view.title);
        Ok(())
    }

    async fn update_interaction(&self, interaction: &Interaction, view: &View) -> Result<()> {
        debug!(
            "interaction {}: {} - {}",
            interaction.id, view.status, view.title
        );
        record(
            &mut self.store().answers,
            (interaction.clone(), Some(Posted::View(view.clone()))),
        );
        Ok(())
    }

    async fn acknowledge(&self, interaction: &Interaction) -> Result<()> {
        trace!("interaction {}: acknowledged", interaction.id);
        record(&mut self.store().answers, (interaction.clone(), None));
        Ok(())
    }

    async fn send_notice(&self, channel: ChannelId, notice: &Notice) -> Result<MessageRef> {
        let message = self.post(channel, Posted::Notice(notice.clone()));
        match notice.level {
            NoticeLevel::Info => info!("notice {message}: {}", notice.title),
            NoticeLevel::Warning => warn!("notice {message}: {}", notice.title),
            NoticeLevel::Error => error!("notice {message}: {}", notice.title),
        }
        Ok(message)
    }

    async fn send_ephemeral(&self, interaction: &Interaction, notice: &Notice) -> Result<()> {
        info!("interaction {}: {}", interaction.id, notice.title);
        record(
            &mut self.store().answers,
            (interaction.clone(), Some(Posted::Notice(notice.clone()))),
        );
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<()> {
        let mut store = self.store();
        if store.remove(message).is_none() {
            return Err(Error::not_found(format!("message {message} does not exist")));
        }
        record(&mut store.deleted, *message);
        debug!("deleted message {message}");
        Ok(())
    }
}
