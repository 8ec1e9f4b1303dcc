//! Endpoints the bridge exposes to the Kava server.
//!
//! Every endpoint answers with a status envelope. Handlers return the fields
//! of a successful response; their errors become error responses carrying
//! the error message, which is meant to be shown to users as is.

use std::{future::Future, sync::Arc, time::Duration};

use serde::{de::DeserializeOwned, de::IgnoredAny, Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{
    controller::Controller,
    display::ControlAction,
    error::{Error, ErrorKind, Result},
    platform::{ChannelId, Platform, UserId},
    player::{LoadKind, LoopMode, PlaybackEngine, PlaybackState, Track},
    remote::{Client, Request},
    session::Session,
};

/// What the endpoint handlers work with.
pub struct Context {
    platform: Arc<dyn Platform>,
    engine: Arc<dyn PlaybackEngine>,
    controller: Arc<Controller>,
}

impl Context {
    #[must_use]
    pub fn new(
        platform: Arc<dyn Platform>,
        engine: Arc<dyn PlaybackEngine>,
        controller: Arc<Controller>,
    ) -> Self {
        Self {
            platform,
            engine,
            controller,
        }
    }

    /// The session playing in voice channel `channel_id`.
    async fn session(&self, channel_id: ChannelId) -> Result<Arc<Session>> {
        let not_connected = || Error::failed_precondition("Not connected to a voice channel.");
        let channel = self
            .platform
            .voice_channel(channel_id)
            .await
            .ok_or_else(not_connected)?;
        let session = self
            .controller
            .session(channel.guild_id)
            .ok_or_else(not_connected)?;
        if session.voice_channel() != channel_id {
            return Err(not_connected());
        }
        Ok(session)
    }

    fn state(&self, session: &Session) -> Result<PlaybackState> {
        self.engine
            .state(session.guild())
            .ok_or_else(|| Error::failed_precondition("Not connected to a voice channel."))
    }

    /// Like [`state`](Self::state), but requires a current track.
    fn playing(&self, session: &Session) -> Result<PlaybackState> {
        let state = self.state(session)?;
        if state.current.is_none() {
            return Err(Error::failed_precondition("Nothing is playing."));
        }
        Ok(state)
    }
}

/// Registers all endpoints with `client`.
pub fn register(client: &Client, context: &Arc<Context>) {
    add(client, "get_client_info", context, client_info);
    add(client, "connect", context, connect);
    add(client, "nowplaying", context, now_playing);
    add(client, "play", context, play);
    add(client, "search", context, search);
    add(client, "skip", context, skip);
    add(client, "remove", context, remove);
    add(client, "clean", context, clean);
    add(client, "pause", context, pause);
    add(client, "resume", context, resume);
    add(client, "stop", context, stop);
    add(client, "queue", context, queue);
}

fn add<A, F, Fut>(client: &Client, endpoint: &str, context: &Arc<Context>, f: F)
where
    A: DeserializeOwned + 'static,
    F: Fn(Arc<Context>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let context = Arc::clone(context);
    client.add_handler(endpoint, move |request: Request| {
        let call = request
            .args::<A>()
            .map(|args| f(Arc::clone(&context), args));

        async move {
            let result = match call {
                Ok(call) => call.await,
                Err(e) => Err(Error::invalid_argument(format!(
                    "Invalid arguments: {}",
                    e.message()
                ))),
            };

            match result {
                Ok(fields) => request.respond_success(fields),
                Err(e) => {
                    debug!("{} {}: {e}", request.endpoint(), request.id());
                    request.respond_error(&e.message())
                }
            }
        }
    });
}

/// Converts a 1-based queue target to an index into `queue`.
fn queue_index(queue: &[Track], target: usize) -> Result<usize> {
    if (1..=queue.len()).contains(&target) {
        Ok(target - 1)
    } else {
        Err(Error::out_of_range("Invalid queue index."))
    }
}

#[derive(Deserialize)]
struct ChannelArgs {
    channel_id: ChannelId,
}

#[derive(Deserialize)]
struct ConnectArgs {
    owner_id: UserId,
    channel_id: ChannelId,
}

#[derive(Deserialize)]
struct PlayArgs {
    channel_id: ChannelId,
    author_id: UserId,
    query: String,

    /// Which of the loaded tracks to queue, counting from 0. Playlists are
    /// always queued whole.
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct SkipArgs {
    channel_id: ChannelId,
    #[serde(default)]
    target: Option<usize>,
    #[serde(default, rename = "move")]
    move_target: bool,
}

#[derive(Deserialize)]
struct RemoveArgs {
    channel_id: ChannelId,
    target: usize,
}

#[serde_as]
#[derive(Serialize)]
struct NowPlaying<'a> {
    track: &'a Track,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    position: Duration,
    paused: bool,
    #[serde(rename = "loop")]
    loop_mode: LoopMode,
    shuffle: bool,
}

#[derive(Serialize)]
struct Queue<'a> {
    current: Option<&'a Track>,
    queue: &'a [Track],
    #[serde(rename = "loop")]
    loop_mode: LoopMode,
    shuffle: bool,
}

async fn client_info(context: Arc<Context>, _: IgnoredAny) -> Result<Value> {
    let bot = context.platform.bot_user();
    Ok(json!({"bot_user_id": bot.id, "bot_name": bot.name}))
}

async fn connect(context: Arc<Context>, args: ConnectArgs) -> Result<Value> {
    let channel = context
        .platform
        .voice_channel(args.channel_id)
        .await
        .ok_or_else(|| Error::not_found("Invalid channel ID."))?;

    let already = || Error::already_exists("Already connected to a voice channel.");
    if context.controller.session(channel.guild_id).is_some() {
        return Err(already());
    }
    context
        .platform
        .join_voice(&channel)
        .await
        .map_err(|e| match e.kind {
            ErrorKind::AlreadyExists => already(),
            _ => e,
        })?;

    if let Err(e) = context
        .controller
        .open_session(&channel, Some(args.owner_id))
        .await
    {
        if let Err(e) = context.platform.leave_voice(channel.guild_id).await {
            warn!("cannot leave voice channel {}: {e}", channel.id);
        }
        return Err(e);
    }

    info!("connected to voice channel {} for user {}", channel.id, args.owner_id);
    Ok(json!({"channel_id": channel.id, "message": "Connected to the channel."}))
}

async fn now_playing(context: Arc<Context>, args: ChannelArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    let state = context.playing(&session)?;
    let Some(track) = &state.current else {
        return Err(Error::failed_precondition("Nothing is playing."));
    };

    let fields = NowPlaying {
        track,
        position: state.position,
        paused: state.paused,
        loop_mode: state.loop_mode,
        shuffle: state.shuffle,
    };
    Ok(serde_json::to_value(fields)?)
}

async fn play(context: Arc<Context>, args: PlayArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    let guild = session.guild();

    let loaded = context.engine.load_tracks(&args.query).await?;
    let mut tracks = match loaded.kind {
        LoadKind::Empty | LoadKind::Error => Vec::new(),
        LoadKind::Playlist => loaded.tracks,
        LoadKind::Track | LoadKind::Search => {
            if loaded.tracks.is_empty() {
                Vec::new()
            } else {
                let index = args.index.unwrap_or(0);
                let track = loaded
                    .tracks
                    .into_iter()
                    .nth(index)
                    .ok_or_else(|| Error::out_of_range("Invalid track index."))?;
                vec![track]
            }
        }
    };
    if tracks.is_empty() {
        return Err(Error::not_found("No tracks found."));
    }

    for track in &mut tracks {
        track.requester = Some(args.author_id);
    }
    let added = tracks.len();
    context.engine.enqueue(guild, tracks).await?;

    if context.state(&session)?.current.is_none() {
        context.engine.play(guild).await?;
    }
    let queue_length = context.state(&session)?.queue.len();

    if session.message().is_some() {
        context.controller.refresh(guild);
    } else {
        context.controller.show(guild).await?;
    }

    debug!("user {} queued {added} track(s) in guild {guild}", args.author_id);
    Ok(json!({"added": added, "queue_length": queue_length}))
}

async fn search(context: Arc<Context>, args: SearchArgs) -> Result<Value> {
    let loaded = context.engine.load_tracks(&args.query).await?;
    if loaded.kind == LoadKind::Error {
        return Err(Error::unavailable("No tracks found."));
    }
    Ok(json!({"tracks": loaded.tracks}))
}

async fn skip(context: Arc<Context>, args: SkipArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    let guild = session.guild();
    let state = context.playing(&session)?;

    if let Some(target) = args.target {
        let index = queue_index(&state.queue, target)?;
        if args.move_target {
            context.engine.move_to_front(guild, index).await?;
        } else {
            context.engine.drop_front(guild, index).await?;
        }
    }

    context.engine.skip(guild).await?;
    context.controller.refresh(guild);
    Ok(json!({"skipped": state.current}))
}

async fn remove(context: Arc<Context>, args: RemoveArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    let guild = session.guild();
    let state = context.state(&session)?;

    let index = queue_index(&state.queue, args.target)?;
    let removed = context.engine.remove(guild, index).await?;
    context.controller.refresh(guild);
    Ok(json!({"removed": removed}))
}

async fn clean(context: Arc<Context>, args: ChannelArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    context.engine.clear_queue(session.guild()).await?;
    context.controller.refresh(session.guild());
    Ok(json!({"message": "Queue cleared."}))
}

async fn control(context: &Context, channel_id: ChannelId, action: ControlAction) -> Result<()> {
    let session = context.session(channel_id).await?;
    context.playing(&session)?;
    context.controller.apply(session.guild(), action).await?;
    context.controller.refresh(session.guild());
    Ok(())
}

async fn pause(context: Arc<Context>, args: ChannelArgs) -> Result<Value> {
    control(&context, args.channel_id, ControlAction::Pause).await?;
    Ok(json!({"message": "Paused."}))
}

async fn resume(context: Arc<Context>, args: ChannelArgs) -> Result<Value> {
    control(&context, args.channel_id, ControlAction::Resume).await?;
    Ok(json!({"message": "Resumed."}))
}

async fn stop(context: Arc<Context>, args: ChannelArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    context
        .controller
        .apply(session.guild(), ControlAction::Stop)
        .await?;
    Ok(json!({"message": "Stopped and left the channel."}))
}

async fn queue(context: Arc<Context>, args: ChannelArgs) -> Result<Value> {
    let session = context.session(args.channel_id).await?;
    let state = context.state(&session)?;
    let fields = Queue {
        current: state.current.as_ref(),
        queue: &state.queue,
        loop_mode: state.loop_mode,
        shuffle: state.shuffle,
    };
    Ok(serde_json::to_value(fields)?)
}
