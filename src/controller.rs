//! Player display controller.
//!
//! The [`Controller`] owns the per-guild [`Session`]s and keeps each guild's
//! display message in step with its player:
//!
//! * position updates and track ends redraw the display
//! * a player that is not playing starts the idle timer, one that plays
//!   cancels it
//! * the end of the queue disconnects the guild
//! * a track that fails to load is announced and skipped
//! * control buttons act on the player and redraw through the interaction
//!
//! Display updates are last-write-wins: whatever state the engine reports at
//! the time of the push is what gets shown.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::{Config, Icons, PlayerConfig},
    display::{ControlAction, View, SEEK_STEP},
    error::{Error, ErrorKind, Result},
    events::{Event, Press, Subscriber},
    platform::{
        Authority, GuildId, Interaction, MessageRef, Notice, Platform, UserId, VoiceChannel,
    },
    player::{PlaybackEngine, Track},
    session::Session,
    tasks::Supervisor,
};

/// How to push a display update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Update {
    /// A message to adopt as the display. The previous display is deleted.
    pub message: Option<MessageRef>,

    /// Push after this long, without waiting for it.
    pub delay: Duration,

    /// Answer this interaction with the display instead of editing the
    /// message.
    pub interaction: Option<Interaction>,

    pub locale: Option<String>,
}

/// Treats a missing display or session as nothing to do.
fn tolerate_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind == ErrorKind::NotFound => {
            trace!("{e}");
            Ok(())
        }
        other => other,
    }
}

struct Inner {
    engine: Arc<dyn PlaybackEngine>,
    platform: Arc<dyn Platform>,
    authority: Option<Arc<dyn Authority>>,
    icons: Icons,
    settings: PlayerConfig,
    sessions: Mutex<HashMap<GuildId, Arc<Session>>>,
    tasks: Supervisor,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Creates a controller without sessions.
    ///
    /// Without an `authority` every user in the bot's voice channel may use
    /// the control buttons.
    #[must_use]
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        platform: Arc<dyn Platform>,
        authority: Option<Arc<dyn Authority>>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                platform,
                authority,
                icons: config.icons.clone(),
                settings: config.player.clone(),
                sessions: Mutex::new(HashMap::new()),
                tasks: Supervisor::new(),
            }),
        }
    }

    /// Deferred updates, idle timers and message deletions.
    #[must_use]
    pub fn tasks(&self) -> &Supervisor {
        &self.inner.tasks
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<GuildId, Arc<Session>>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn session(&self, guild: GuildId) -> Option<Arc<Session>> {
        self.sessions().get(&guild).cloned()
    }

    fn require(&self, guild: GuildId) -> Result<Arc<Session>> {
        self.session(guild)
            .ok_or_else(|| Error::not_found(format!("no player session in guild {guild}")))
    }

    fn is_current(&self, session: &Arc<Session>) -> bool {
        self.session(session.guild())
            .is_some_and(|current| Arc::ptr_eq(&current, session))
    }

    /// Starts the session of a bot that just joined `channel`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the guild has a session, or whatever the
    /// engine fails with when creating the player.
    pub async fn open_session(
        &self,
        channel: &VoiceChannel,
        owner: Option<UserId>,
    ) -> Result<Arc<Session>> {
        let guild = channel.guild_id;
        let session = Arc::new(Session::new(
            guild,
            channel.id,
            owner,
            &self.inner.settings.locale,
        ));

        {
            let mut sessions = self.sessions();
            if sessions.contains_key(&guild) {
                return Err(Error::already_exists(format!(
                    "guild {guild} already has a player session"
                )));
            }
            sessions.insert(guild, Arc::clone(&session));
        }

        if let Err(e) = self.inner.engine.create(guild).await {
            self.sessions().remove(&guild);
            return Err(e);
        }

        info!("player session started in voice channel {} of guild {guild}", channel.id);
        Ok(session)
    }

    fn render(&self, session: &Session) -> View {
        let state = self.inner.engine.state(session.guild());
        View::render(
            state.as_ref(),
            session.is_connected(),
            &session.locale(),
            &self.inner.icons,
        )
    }

    /// Posts a fresh display and adopts it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a session, or whatever the platform fails
    /// with when posting.
    pub async fn show(&self, guild: GuildId) -> Result<MessageRef> {
        let session = self.require(guild)?;
        let view = self.render(&session);
        let message = self
            .inner
            .platform
            .send_view(session.notice_channel(), &view)
            .await?;
        self.adopt(&session, message);
        Ok(message)
    }

    fn adopt(&self, session: &Session, message: MessageRef) {
        match session.replace_message(message) {
            Some(old) if old != message => {
                debug!(
                    "display of guild {} moves from {old} to {message}",
                    session.guild()
                );
                let platform = Arc::clone(&self.inner.platform);
                self.inner
                    .tasks
                    .spawn(format!("deletion of display {old}"), delete_stale(platform, old));
            }
            _ => {}
        }
    }

    /// Redraws the display of `guild`.
    ///
    /// With a delay the update runs in the background and this returns right
    /// away.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the guild has no session, or if it has no
    /// display message and `update` supplies none.
    pub async fn update_display(&self, guild: GuildId, update: Update) -> Result<()> {
        let session = self.require(guild)?;
        if let Some(interaction) = &update.interaction {
            session.set_locale(&interaction.locale);
        }
        if let Some(locale) = &update.locale {
            session.set_locale(locale);
        }

        if update.delay.is_zero() {
            return self
                .push(&session, update.message, update.interaction.as_ref())
                .await;
        }

        debug!("updating display of guild {guild} in {:?}", update.delay);
        let this = self.clone();
        self.inner.tasks.spawn(
            format!("display update for guild {guild}"),
            async move {
                tokio::time::sleep(update.delay).await;
                if !this.is_current(&session) {
                    trace!("session of guild {guild} ended before the update");
                    return Ok(());
                }
                tolerate_missing(
                    this.push(&session, update.message, update.interaction.as_ref())
                        .await,
                )
            },
        );
        Ok(())
    }

    /// Redraws the display of `guild` in the background, if it has one.
    pub fn refresh(&self, guild: GuildId) {
        let this = self.clone();
        self.inner
            .tasks
            .spawn(format!("display refresh for guild {guild}"), async move {
                tolerate_missing(this.update_display(guild, Update::default()).await)
            });
    }

    async fn push(
        &self,
        session: &Session,
        message: Option<MessageRef>,
        interaction: Option<&Interaction>,
    ) -> Result<()> {
        let guild = session.guild();
        if let Some(message) = message {
            self.adopt(session, message);
        }

        let Some(target) = session.message() else {
            return Err(Error::not_found(format!(
                "no display message in guild {guild}"
            )));
        };

        let view = self.render(session);
        match interaction {
            Some(interaction) => {
                self.inner
                    .platform
                    .update_interaction(interaction, &view)
                    .await?;
            }
            None => self.inner.platform.edit_view(&target, &view).await?,
        }

        trace!("display {target} of guild {guild}: {}", view.status);
        Ok(())
    }

    /// Starts the idle timer of `guild` unless it is already running.
    ///
    /// Returns whether a timer was started.
    pub fn enter_idle(&self, guild: GuildId) -> bool {
        let Some(session) = self.session(guild) else {
            return false;
        };

        let started = session.start_idle(|| {
            self.inner.tasks.spawn(
                format!("idle timer for guild {guild}"),
                self.clone().idle(Arc::clone(&session)),
            )
        });
        if started {
            debug!("player in guild {guild} is idle");
        }
        started
    }

    /// Stops the idle timer of `guild`. Returns whether one was running.
    pub fn cancel_idle(&self, guild: GuildId) -> bool {
        let cancelled = self
            .session(guild)
            .is_some_and(|session| session.cancel_idle());
        if cancelled {
            debug!("player in guild {guild} is active again");
        }
        cancelled
    }

    async fn idle(self, session: Arc<Session>) -> Result<()> {
        let settings = &self.inner.settings;
        tokio::time::sleep(settings.idle_timeout).await;

        let bot = self.inner.platform.bot_user();
        let notice = Notice::warning(format!(
            "{} has been idle for {} minutes",
            bot.name,
            settings.idle_timeout.as_secs() / 60
        ))
        .with_description(format!(
            "Leaving the voice channel in {} seconds unless music is played.",
            settings.idle_grace.as_secs()
        ));
        if let Err(e) = self
            .inner
            .platform
            .send_notice(session.notice_channel(), &notice)
            .await
        {
            warn!("cannot warn guild {} about leaving: {e}", session.guild());
        }

        tokio::time::sleep(settings.idle_grace).await;

        session.detach_idle();
        info!("leaving guild {} after idling", session.guild());
        self.disconnect(session.guild()).await
    }

    fn track_activity(&self, guild: GuildId) {
        let playing = self
            .inner
            .engine
            .state(guild)
            .is_some_and(|state| state.is_playing());
        if playing {
            self.cancel_idle(guild);
        } else {
            self.enter_idle(guild);
        }
    }

    /// Leaves the voice channel of `guild` and ends its session.
    ///
    /// # Errors
    ///
    /// Returns what leaving the voice channel failed with. The session ends
    /// regardless.
    pub async fn disconnect(&self, guild: GuildId) -> Result<()> {
        let left = self.inner.platform.leave_voice(guild).await;
        self.teardown(guild).await;
        left
    }

    /// Ends the session of `guild` after the bot left its voice channel:
    /// empties the player, shows it as disconnected and destroys it.
    async fn teardown(&self, guild: GuildId) {
        let removed = self.sessions().remove(&guild);
        let Some(session) = removed else {
            trace!("guild {guild} has no session to end");
            return;
        };

        session.set_connected(false);
        session.cancel_idle();

        let engine = &self.inner.engine;
        if let Err(e) = engine.stop(guild).await {
            debug!("cannot stop player in guild {guild}: {e}");
        }
        if let Err(e) = engine.clear_queue(guild).await {
            debug!("cannot clear queue in guild {guild}: {e}");
        }
        if let Err(e) = tolerate_missing(self.push(&session, None, None).await) {
            warn!("cannot show final display in guild {guild}: {e}");
        }
        if let Err(e) = engine.destroy(guild).await {
            warn!("cannot destroy player in guild {guild}: {e}");
        }

        info!("player session in guild {guild} ended");
    }

    /// Performs `action` on the player of `guild`.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if the guild has no player, or whatever
    /// the engine fails with.
    pub async fn apply(&self, guild: GuildId, action: ControlAction) -> Result<()> {
        let engine = &self.inner.engine;
        let state = engine
            .state(guild)
            .ok_or_else(|| Error::failed_precondition(format!("no player in guild {guild}")))?;

        match action {
            ControlAction::Resume => engine.set_pause(guild, false).await,
            ControlAction::Pause => engine.set_pause(guild, true).await,
            ControlAction::Stop => {
                engine.stop(guild).await?;
                engine.clear_queue(guild).await?;
                self.disconnect(guild).await
            }
            ControlAction::SeekStart => engine.seek(guild, Duration::ZERO).await,
            ControlAction::Skip => engine.skip(guild).await,
            ControlAction::ToggleShuffle => engine.set_shuffle(guild, !state.shuffle).await,
            ControlAction::CycleLoop => engine.set_loop(guild, state.loop_mode.cycle()).await,
            ControlAction::Rewind => {
                engine
                    .seek(guild, state.position.saturating_sub(SEEK_STEP))
                    .await
            }
            ControlAction::Forward => {
                let mut position = state.position + SEEK_STEP;
                if let Some(track) = &state.current {
                    position = position.min(track.duration);
                }
                engine.seek(guild, position).await
            }
        }
    }

    /// Handles a control button press.
    ///
    /// Presses of buttons that are not controls, presses in guilds without a
    /// player and presses by users outside the bot's voice channel are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown control, or whatever the
    /// authority, the engine or the platform fail with.
    pub async fn press(&self, press: Press) -> Result<()> {
        let Press {
            guild,
            user,
            user_channel,
            custom_id,
            interaction,
        } = press;

        if !custom_id.starts_with("control.") {
            trace!("ignoring button {custom_id}");
            return Ok(());
        }

        let Some(action) = ControlAction::parse_custom_id(&custom_id)? else {
            return self.inner.platform.acknowledge(&interaction).await;
        };

        let Some(session) = self.session(guild) else {
            debug!("{action} pressed in guild {guild} without a player");
            return Ok(());
        };

        if user_channel != Some(session.voice_channel()) {
            debug!("{action} pressed by user {user} outside the voice channel");
            return Ok(());
        }

        // The owner of the session needs no permission.
        let authority = (session.owner() != Some(user))
            .then_some(self.inner.authority.as_ref())
            .flatten();
        if let Some(authority) = authority {
            if !authority.can_use_music(user, session.voice_channel()).await? {
                let notice = Notice::error(
                    "The owner of this voice channel does not allow other members to use music features.",
                );
                return self
                    .inner
                    .platform
                    .send_ephemeral(&interaction, &notice)
                    .await;
            }
        }

        debug!("{action} pressed by user {user} in guild {guild}");
        self.apply(guild, action).await?;

        let update = Update {
            interaction: Some(interaction.clone()),
            ..Update::default()
        };
        match self.update_display(guild, update).await {
            Err(e) if e.kind == ErrorKind::NotFound => {
                self.inner.platform.acknowledge(&interaction).await
            }
            other => other,
        }
    }

    async fn track_failed(&self, guild: GuildId, track: &Track, reason: Option<&str>) -> Result<()> {
        let session = self.require(guild)?;
        let notice = Notice::error(format!("Unable to play track: {}", track.title))
            .with_description(format!("Reason: `{}`", reason.unwrap_or("Unknown")));
        let message = self
            .inner
            .platform
            .send_notice(session.notice_channel(), &notice)
            .await?;

        self.inner.engine.skip(guild).await?;

        let update = Update {
            message: Some(message),
            delay: self.inner.settings.failed_track_delay,
            ..Update::default()
        };
        tolerate_missing(self.update_display(guild, update).await)
    }

    /// Reacts to `event`.
    ///
    /// # Errors
    ///
    /// Fails if the reaction fails, see [`press`](Self::press) and
    /// [`disconnect`](Self::disconnect).
    pub async fn handle(&self, event: Event) -> Result<()> {
        let guild = event.guild();
        if self.session(guild).is_none() {
            trace!("{event} in guild {guild} without a session");
            return Ok(());
        }

        match event {
            Event::PositionTick { .. } => {
                let redraw = tolerate_missing(self.update_display(guild, Update::default()).await);
                self.track_activity(guild);
                redraw
            }
            Event::TrackEnd { .. } => {
                tolerate_missing(self.update_display(guild, Update::default()).await)
            }
            Event::QueueEnd { .. } => {
                info!("queue of guild {guild} ended");
                self.disconnect(guild).await
            }
            Event::TrackLoadFailed { track, reason, .. } => {
                warn!("cannot play {} in guild {guild}: {reason:?}", track.title);
                self.track_failed(guild, &track, reason.as_deref()).await
            }
            Event::VoiceLeave { .. } => {
                self.teardown(guild).await;
                Ok(())
            }
            Event::ControlPressed(press) => self.press(press).await,
        }
    }
}

async fn delete_stale(platform: Arc<dyn Platform>, message: MessageRef) -> Result<()> {
    if let Err(e) = platform.delete_message(&message).await {
        debug!("cannot delete old display {message}: {e}");
    }
    Ok(())
}

#[async_trait]
impl Subscriber for Controller {
    async fn on_event(&self, event: Event) -> Result<()> {
        self.handle(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        display::Status,
        events::EventBus,
        platform::{BotUser, HeadlessPlatform, Posted},
        player::{memory::MemoryEngine, LoopMode},
    };

    const CHANNEL: VoiceChannel = VoiceChannel { id: 10, guild_id: 1 };
    const GUILD: GuildId = 1;

    struct Fixture {
        controller: Arc<Controller>,
        engine: Arc<MemoryEngine>,
        platform: Arc<HeadlessPlatform>,
    }

    struct Deny;

    #[async_trait]
    impl Authority for Deny {
        async fn can_use_music(&self, _user: UserId, _channel: u64) -> Result<bool> {
            Ok(false)
        }
    }

    fn track(title: &str) -> Track {
        Track {
            title: title.to_owned(),
            author: "artist".to_owned(),
            duration: Duration::from_secs(100),
            uri: format!("https://example.org/{title}"),
            artwork_url: None,
            requester: Some(5),
        }
    }

    async fn fixture(authority: Option<Arc<dyn Authority>>) -> Fixture {
        let bus = EventBus::new();
        let engine = Arc::new(MemoryEngine::new(Vec::new(), bus.clone()));
        let platform = Arc::new(HeadlessPlatform::new(BotUser::default(), vec![CHANNEL]));
        let controller = Arc::new(Controller::new(
            Arc::clone(&engine) as Arc<dyn PlaybackEngine>,
            Arc::clone(&platform) as Arc<dyn Platform>,
            authority,
            &Config::default(),
        ));
        bus.subscribe(&controller);

        platform.join_voice(&CHANNEL).await.unwrap();
        controller.open_session(&CHANNEL, Some(5)).await.unwrap();

        Fixture {
            controller,
            engine,
            platform,
        }
    }

    async fn playing(fixture: &Fixture, titles: &[&str]) {
        let engine = &fixture.engine;
        engine
            .enqueue(GUILD, titles.iter().map(|title| track(title)).collect())
            .await
            .unwrap();
        engine.play(GUILD).await.unwrap();
    }

    fn press(custom_id: &str, user_channel: Option<u64>) -> Press {
        Press {
            guild: GUILD,
            user: 7,
            user_channel,
            custom_id: custom_id.to_owned(),
            interaction: Interaction {
                id: 99,
                locale: "en-US".to_owned(),
            },
        }
    }

    fn shown(fixture: &Fixture, message: &MessageRef) -> View {
        match fixture.platform.message(message) {
            Some(Posted::View(view)) => view,
            other => panic!("expected a display, found {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_disconnects_once() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;

        assert!(controller.enter_idle(GUILD));
        assert!(!controller.enter_idle(GUILD));

        tokio::time::sleep(Duration::from_secs(211)).await;
        controller.tasks().quiesce().await;

        assert!(controller.session(GUILD).is_none());
        assert!(!fixture.platform.is_joined(GUILD));
        assert_eq!(fixture.platform.notices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_cancels_the_idle_timer() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;

        controller.handle(Event::PositionTick { guild: GUILD }).await.unwrap();
        assert!(controller.session(GUILD).unwrap().is_idle_pending());

        playing(&fixture, &["a"]).await;
        controller.handle(Event::PositionTick { guild: GUILD }).await.unwrap();
        assert!(!controller.session(GUILD).unwrap().is_idle_pending());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(controller.session(GUILD).is_some());
        assert!(fixture.platform.notices().is_empty());
    }

    #[tokio::test]
    async fn controller_is_freed_with_its_owners() {
        let fixture = fixture(None).await;
        let inner = Arc::downgrade(&fixture.controller.inner);

        drop(fixture);
        assert!(inner.upgrade().is_none());
    }

    #[tokio::test]
    async fn display_needs_a_message() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;

        let err = controller
            .update_display(GUILD, Update::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        playing(&fixture, &["a"]).await;
        let message = controller.show(GUILD).await.unwrap();
        assert_eq!(shown(&fixture, &message).title, "a");

        fixture.engine.set_pause(GUILD, true).await.unwrap();
        controller
            .update_display(GUILD, Update::default())
            .await
            .unwrap();
        assert_eq!(shown(&fixture, &message).status, Status::Paused);
    }

    #[tokio::test]
    async fn new_message_replaces_the_old_one() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        let old = controller.show(GUILD).await.unwrap();

        let new = fixture
            .platform
            .send_notice(CHANNEL.id, &Notice::warning("hello"))
            .await
            .unwrap();
        controller
            .update_display(
                GUILD,
                Update {
                    message: Some(new),
                    ..Update::default()
                },
            )
            .await
            .unwrap();
        controller.tasks().quiesce().await;

        assert_eq!(controller.session(GUILD).unwrap().message(), Some(new));
        assert_eq!(fixture.platform.deleted(), [old]);
        assert!(matches!(fixture.platform.message(&new), Some(Posted::View(_))));

        // A stale message that is already gone is not an error.
        fixture.platform.delete_message(&new).await.unwrap();
        let newest = controller.show(GUILD).await.unwrap();
        controller.tasks().quiesce().await;
        assert_eq!(controller.session(GUILD).unwrap().message(), Some(newest));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_updates_return_immediately() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        let old = controller.show(GUILD).await.unwrap();
        let new = fixture
            .platform
            .send_notice(CHANNEL.id, &Notice::warning("hello"))
            .await
            .unwrap();

        controller
            .update_display(
                GUILD,
                Update {
                    message: Some(new),
                    delay: Duration::from_secs(5),
                    ..Update::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(controller.session(GUILD).unwrap().message(), Some(old));

        tokio::time::sleep(Duration::from_secs(6)).await;
        controller.tasks().quiesce().await;
        assert_eq!(controller.session(GUILD).unwrap().message(), Some(new));
    }

    #[tokio::test]
    async fn controls_act_and_redraw() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        playing(&fixture, &["a", "b"]).await;
        controller.show(GUILD).await.unwrap();

        controller
            .press(press("control.pause", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert!(fixture.engine.state(GUILD).unwrap().paused);

        controller
            .press(press("control.repeat", Some(CHANNEL.id)))
            .await
            .unwrap();
        controller
            .press(press("control.next", Some(CHANNEL.id)))
            .await
            .unwrap();
        let state = fixture.engine.state(GUILD).unwrap();
        assert_eq!(state.current.unwrap().title, "a");

        let answers = fixture.platform.answers();
        assert_eq!(answers.len(), 3);
        let Some(Posted::View(view)) = &answers[0].1 else {
            panic!("expected the display as answer");
        };
        assert_eq!(view.status, Status::Paused);
    }

    #[tokio::test]
    async fn seek_controls_stay_within_the_track() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        playing(&fixture, &["a"]).await;
        controller.show(GUILD).await.unwrap();
        let position = || fixture.engine.state(GUILD).unwrap().position;

        fixture.engine.seek(GUILD, Duration::from_secs(4)).await.unwrap();
        controller
            .press(press("control.rewind", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert_eq!(position(), Duration::ZERO);

        controller
            .press(press("control.forward", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert_eq!(position(), Duration::from_secs(10));

        fixture.engine.seek(GUILD, Duration::from_secs(95)).await.unwrap();
        controller
            .press(press("control.forward", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert_eq!(position(), Duration::from_secs(100));

        controller
            .press(press("control.rewind", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert_eq!(position(), Duration::from_secs(90));

        controller
            .press(press("control.previous", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert_eq!(position(), Duration::ZERO);
    }

    #[tokio::test]
    async fn mode_controls_toggle_and_cycle() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        playing(&fixture, &["a", "b"]).await;
        controller.show(GUILD).await.unwrap();
        let state = || fixture.engine.state(GUILD).unwrap();

        controller
            .press(press("control.shuffle", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert!(state().shuffle);
        controller
            .press(press("control.shuffle", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert!(!state().shuffle);

        for expected in [LoopMode::Track, LoopMode::Queue, LoopMode::Off] {
            controller
                .press(press("control.repeat", Some(CHANNEL.id)))
                .await
                .unwrap();
            assert_eq!(state().loop_mode, expected);
        }

        controller
            .press(press("control.pause", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert!(state().paused);
        controller
            .press(press("control.resume", Some(CHANNEL.id)))
            .await
            .unwrap();
        assert!(!state().paused);
    }

    #[tokio::test]
    async fn controls_are_guarded() {
        let fixture = fixture(Some(Arc::new(Deny))).await;
        let controller = &fixture.controller;
        playing(&fixture, &["a"]).await;

        // Not a control, placeholder, wrong channel.
        controller.press(press("menu.open", Some(CHANNEL.id))).await.unwrap();
        controller.press(press("control.empty", Some(CHANNEL.id))).await.unwrap();
        controller.press(press("control.pause", Some(11))).await.unwrap();
        controller.press(press("control.pause", None)).await.unwrap();
        assert!(!fixture.engine.state(GUILD).unwrap().paused);
        assert_eq!(fixture.platform.answers().len(), 1);

        // Denied by the authority.
        controller.press(press("control.pause", Some(CHANNEL.id))).await.unwrap();
        assert!(!fixture.engine.state(GUILD).unwrap().paused);
        let answers = fixture.platform.answers();
        assert!(matches!(answers[1].1, Some(Posted::Notice(_))));

        // The owner is not asked.
        controller
            .press(Press {
                user: 5,
                ..press("control.pause", Some(CHANNEL.id))
            })
            .await
            .unwrap();
        assert!(fixture.engine.state(GUILD).unwrap().paused);

        let err = controller
            .press(press("control.explode", Some(CHANNEL.id)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn stop_ends_the_session() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        playing(&fixture, &["a", "b"]).await;
        let message = controller.show(GUILD).await.unwrap();

        controller
            .press(press("control.stop", Some(CHANNEL.id)))
            .await
            .unwrap();

        assert!(controller.session(GUILD).is_none());
        assert!(fixture.engine.state(GUILD).is_none());
        assert!(!fixture.platform.is_joined(GUILD));
        assert_eq!(shown(&fixture, &message).status, Status::Disconnected);
    }

    #[tokio::test]
    async fn queue_end_disconnects() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;

        controller.handle(Event::QueueEnd { guild: GUILD }).await.unwrap();
        assert!(controller.session(GUILD).is_none());
        assert!(!fixture.platform.is_joined(GUILD));

        // Late events for the guild are ignored.
        controller.handle(Event::TrackEnd { guild: GUILD }).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tracks_are_announced_and_skipped() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        playing(&fixture, &["broken", "fine"]).await;
        controller.show(GUILD).await.unwrap();

        controller
            .handle(Event::TrackLoadFailed {
                guild: GUILD,
                track: track("broken"),
                reason: Some("no source".to_owned()),
            })
            .await
            .unwrap();

        let notices = fixture.platform.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Unable to play track: broken");
        assert_eq!(notices[0].description.as_deref(), Some("Reason: `no source`"));
        let state = fixture.engine.state(GUILD).unwrap();
        assert_eq!(state.current.unwrap().title, "fine");

        tokio::time::sleep(Duration::from_secs(6)).await;
        controller.tasks().quiesce().await;
        let message = controller.session(GUILD).unwrap().message().unwrap();
        assert_eq!(shown(&fixture, &message).title, "fine");
    }

    #[tokio::test]
    async fn voice_leave_ends_the_session() {
        let fixture = fixture(None).await;
        let controller = &fixture.controller;
        playing(&fixture, &["a"]).await;

        controller.handle(Event::VoiceLeave { guild: GUILD }).await.unwrap();
        assert!(controller.session(GUILD).is_none());
        assert!(fixture.engine.state(GUILD).is_none());

        controller.open_session(&CHANNEL, None).await.unwrap();
        let err = controller.open_session(&CHANNEL, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
    }
}
