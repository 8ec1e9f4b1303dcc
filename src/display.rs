//! Rendering of the player display message.
//!
//! A [`View`] is the platform-neutral content of the message that shows a
//! guild's player: status, current track with a progress line, requester,
//! loop and shuffle indicators, a short queue preview and two rows of control
//! buttons. Platforms turn it into whatever widgets they have.
//!
//! Buttons are identified by custom ids of the form `control.<name>`, see
//! [`ControlAction`].

use std::{fmt, str::FromStr, time::Duration};

use serde::Serialize;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::{
    config::Icons,
    error::{Error, Result},
    platform::UserId,
    player::{LoopMode, PlaybackState},
};

/// Number of queued tracks listed on the display.
pub const QUEUE_PREVIEW: usize = 5;

/// Custom id of the filler buttons that only pad the control rows.
pub const PLACEHOLDER_ID: &str = "control.empty";

/// How far rewind and forward move the position.
pub const SEEK_STEP: Duration = Duration::from_secs(10);

/// An action triggered by a control button.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum ControlAction {
    Resume,
    Pause,

    /// Stop playback, clear the queue and leave the voice channel.
    Stop,

    /// Restart the current track.
    SeekStart,
    Skip,
    ToggleShuffle,
    CycleLoop,
    Rewind,
    Forward,
}

const CUSTOM_IDS: [(ControlAction, &str); 9] = [
    (ControlAction::Resume, "control.resume"),
    (ControlAction::Pause, "control.pause"),
    (ControlAction::Stop, "control.stop"),
    (ControlAction::SeekStart, "control.previous"),
    (ControlAction::Skip, "control.next"),
    (ControlAction::ToggleShuffle, "control.shuffle"),
    (ControlAction::CycleLoop, "control.repeat"),
    (ControlAction::Rewind, "control.rewind"),
    (ControlAction::Forward, "control.forward"),
];

impl ControlAction {
    #[must_use]
    pub fn custom_id(self) -> &'static str {
        CUSTOM_IDS
            .iter()
            .find_map(|&(action, id)| (action == self).then_some(id))
            .unwrap_or(PLACEHOLDER_ID)
    }

    /// Parses the custom id of a pressed button.
    ///
    /// Returns `None` for the placeholder button.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for any id that is not in the table.
    pub fn parse_custom_id(custom_id: &str) -> Result<Option<Self>> {
        if custom_id == PLACEHOLDER_ID {
            return Ok(None);
        }
        custom_id.parse().map(Some)
    }

    fn glyph(self) -> (&'static str, &'static str) {
        match self {
            Self::Resume => ("control.resume", "▶️"),
            Self::Pause => ("control.pause", "⏸️"),
            Self::Stop => ("control.stop", "⏹️"),
            Self::SeekStart => ("control.previous", "⏮️"),
            Self::Skip => ("control.next", "⏭️"),
            Self::ToggleShuffle => ("control.shuffle", "🔀"),
            Self::CycleLoop => ("control.repeat", "🔁"),
            Self::Rewind => ("control.rewind", "⏪"),
            Self::Forward => ("control.forward", "⏩"),
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.custom_id())
    }
}

impl FromStr for ControlAction {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CUSTOM_IDS
            .iter()
            .find_map(|&(action, id)| (id == s).then_some(action))
            .ok_or_else(|| Error::invalid_argument(format!("unknown control action {s}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Playing,
    Paused,
    Disconnected,
    Ended,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playing => write!(f, "Playing"),
            Self::Paused => write!(f, "Paused"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonStyle {
    Grey,
    Green,
    Blurple,
    Red,
}

/// One button of the control rows. `action` is `None` for fillers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Control {
    pub action: Option<ControlAction>,
    pub style: ButtonStyle,
    pub emoji: String,
}

impl Control {
    fn new(action: ControlAction, style: ButtonStyle, icons: &Icons) -> Self {
        let (key, fallback) = action.glyph();
        Self {
            action: Some(action),
            style,
            emoji: icons.get(key, fallback).to_owned(),
        }
    }

    fn filler(icons: &Icons) -> Self {
        Self {
            action: None,
            style: ButtonStyle::Grey,
            emoji: icons.get("empty", "⬛").to_owned(),
        }
    }

    #[must_use]
    pub fn custom_id(&self) -> &'static str {
        self.action.map_or(PLACEHOLDER_ID, ControlAction::custom_id)
    }
}

/// Content of a display message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct View {
    pub status: Status,
    pub title: String,

    /// `` `elapsed` bar `duration` `` line of the current track.
    pub progress: Option<String>,

    pub author: Option<String>,

    /// Who queued the current track. `None` for autoplay.
    pub requester: Option<UserId>,

    pub loop_mode: LoopMode,
    pub shuffle: bool,

    /// `**[n]** title` lines of the first queued tracks.
    pub queue: Vec<String>,

    /// Whether more tracks are queued than listed.
    pub queue_more: bool,

    pub artwork_url: Option<String>,
    pub locale: String,

    /// Empty unless connected and something is loaded.
    pub controls: Vec<Vec<Control>>,
}

impl View {
    /// Renders the display of a player in `state`.
    #[must_use]
    pub fn render(state: Option<&PlaybackState>, connected: bool, locale: &str, icons: &Icons) -> Self {
        let current = state.and_then(|state| state.current.as_ref());
        let paused = state.is_some_and(|state| state.paused);

        let status = match (connected, current.is_some(), paused) {
            (_, true, true) => Status::Paused,
            (true, true, false) => Status::Playing,
            (false, _, _) => Status::Disconnected,
            (true, false, _) => Status::Ended,
        };

        let mut view = Self {
            status,
            title: "Nothing is playing".to_owned(),
            progress: None,
            author: None,
            requester: None,
            loop_mode: state.map(|state| state.loop_mode).unwrap_or_default(),
            shuffle: state.is_some_and(|state| state.shuffle),
            queue: Vec::new(),
            queue_more: false,
            artwork_url: None,
            locale: locale.to_owned(),
            controls: Vec::new(),
        };

        let (Some(state), Some(track)) = (state, current) else {
            return view;
        };

        view.title.clone_from(&track.title);
        view.progress = Some(format!(
            "`{}` {} `{}`",
            format_time(state.position),
            progress_bar(track.duration, state.position, icons),
            format_time(track.duration)
        ));
        view.author = Some(track.author.clone());
        view.requester = track.requester;
        view.artwork_url.clone_from(&track.artwork_url);
        view.queue = state
            .queue
            .iter()
            .take(QUEUE_PREVIEW)
            .enumerate()
            .map(|(index, track)| format!("**[{}]** {}", index + 1, track.title))
            .collect();
        view.queue_more = state.queue.len() > QUEUE_PREVIEW;

        if connected {
            view.controls = controls(state, icons);
        }

        view
    }
}

fn controls(state: &PlaybackState, icons: &Icons) -> Vec<Vec<Control>> {
    use ButtonStyle::{Blurple, Green, Grey, Red};

    let shuffle_style = if state.shuffle { Green } else { Grey };
    let pause = if state.paused {
        Control::new(ControlAction::Resume, Red, icons)
    } else {
        Control::new(ControlAction::Pause, Green, icons)
    };
    let loop_style = match state.loop_mode {
        LoopMode::Off => Grey,
        LoopMode::Track => Green,
        LoopMode::Queue => Blurple,
    };

    vec![
        vec![
            Control::new(ControlAction::ToggleShuffle, shuffle_style, icons),
            Control::new(ControlAction::SeekStart, Blurple, icons),
            pause,
            Control::new(ControlAction::Skip, Blurple, icons),
            Control::new(ControlAction::CycleLoop, loop_style, icons),
        ],
        vec![
            Control::filler(icons),
            Control::new(ControlAction::Rewind, Blurple, icons),
            Control::new(ControlAction::Stop, Red, icons),
            Control::new(ControlAction::Forward, Blurple, icons),
            Control::filler(icons),
        ],
    ]
}

/// Whole seconds in `duration`, rounding half to even.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn whole_seconds(duration: Duration) -> u64 {
    (duration.as_millis() as f64 / 1000.0).round_ties_even() as u64
}

/// Formats a position or length as `MM:SS`, or `HH:MM:SS` from one hour on.
///
/// Days are folded into the hours.
#[must_use]
pub fn format_time(time: Duration) -> String {
    let seconds = whole_seconds(time);
    let (hours, minutes, seconds) = (seconds / 3600, seconds / 60 % 60, seconds % 60);

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Draws a ten-segment progress bar of `position` within `duration`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn progress_bar(duration: Duration, position: Duration, icons: &Icons) -> String {
    let duration = whole_seconds(duration).max(1);
    let position = whole_seconds(position);
    let ratio = (position as f64 / duration as f64).clamp(0.0, 1.0);
    let complete = position >= duration;

    let start_fill = icons.get("progress.start_fill", "SF|");
    let filled = (ratio * 10.0).round_ties_even() as usize;
    let empty = ((1.0 - ratio) * 10.0).round_ties_even() as usize;

    let mut bar = String::from(icons.get("progress.start_point", "ST|"));
    bar.push_str(&start_fill.repeat(filled));
    bar.push_str(if complete {
        start_fill
    } else {
        icons.get("progress.mid_point", "MP|")
    });
    bar.push_str(&icons.get("progress.end_fill", "EF|").repeat(empty));
    bar.push_str(if complete {
        icons.get("progress.end_point", "EP")
    } else {
        icons.get("progress.end", "ED|")
    });
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, player::Track};

    fn track(title: &str) -> Track {
        Track {
            title: title.to_owned(),
            author: "artist".to_owned(),
            duration: Duration::from_secs(200),
            uri: String::new(),
            artwork_url: None,
            requester: Some(9),
        }
    }

    #[test]
    fn formats_minutes_and_hours() {
        assert_eq!(format_time(Duration::from_millis(65_000)), "01:05");
        assert_eq!(format_time(Duration::from_millis(3_665_000)), "01:01:05");
        assert_eq!(format_time(Duration::ZERO), "00:00");
        assert_eq!(format_time(Duration::from_secs(26 * 3600)), "26:00:00");
    }

    #[test]
    fn rounds_half_to_even() {
        assert_eq!(format_time(Duration::from_millis(500)), "00:00");
        assert_eq!(format_time(Duration::from_millis(1_500)), "00:02");
        assert_eq!(format_time(Duration::from_millis(2_500)), "00:02");
    }

    #[test]
    fn empty_duration_counts_as_one_second() {
        let bar = progress_bar(Duration::ZERO, Duration::ZERO, &Icons::default());
        assert_eq!(bar, format!("ST|MP|{}ED|", "EF|".repeat(10)));
    }

    #[test]
    fn full_bar_switches_end_glyphs() {
        let duration = Duration::from_secs(200);
        let bar = progress_bar(duration, duration, &Icons::default());
        assert_eq!(bar, format!("ST|{}SF|EP", "SF|".repeat(10)));
    }

    #[test]
    fn overshoot_is_clamped() {
        let bar = progress_bar(
            Duration::from_secs(10),
            Duration::from_secs(30),
            &Icons::default(),
        );
        assert_eq!(bar, format!("ST|{}SF|EP", "SF|".repeat(10)));
    }

    #[test]
    fn half_way_and_configured_glyphs() {
        let mut icons = Icons::default();
        icons.insert("progress.start_fill", "=");
        icons.insert("progress.end_fill", "-");
        let bar = progress_bar(Duration::from_secs(100), Duration::from_secs(50), &icons);
        assert_eq!(bar, "ST|=====MP|-----ED|");
    }

    #[test]
    fn custom_ids_round_trip_through_the_table() {
        for (action, id) in CUSTOM_IDS {
            assert_eq!(action.custom_id(), id);
            assert_eq!(id.parse::<ControlAction>().unwrap(), action);
        }
        assert_eq!(ControlAction::parse_custom_id(PLACEHOLDER_ID).unwrap(), None);
        assert_eq!(
            ControlAction::parse_custom_id("control.explode")
                .unwrap_err()
                .kind,
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn renders_playing_state() {
        let state = PlaybackState {
            current: Some(track("now")),
            queue: (1..=7).map(|i| track(&format!("next {i}"))).collect(),
            position: Duration::from_secs(65),
            loop_mode: LoopMode::Queue,
            ..PlaybackState::default()
        };

        let view = View::render(Some(&state), true, "en-US", &Icons::default());
        assert_eq!(view.status, Status::Playing);
        assert_eq!(view.title, "now");
        assert!(view.progress.as_deref().unwrap().starts_with("`01:05` ST|"));
        assert!(view.progress.as_deref().unwrap().ends_with("`03:20`"));
        assert_eq!(view.queue.len(), QUEUE_PREVIEW);
        assert_eq!(view.queue[0], "**[1]** next 1");
        assert!(view.queue_more);
        assert_eq!(view.requester, Some(9));

        assert_eq!(view.controls.len(), 2);
        let repeat = &view.controls[0][4];
        assert_eq!(repeat.custom_id(), "control.repeat");
        assert_eq!(repeat.style, ButtonStyle::Blurple);
        assert_eq!(view.controls[0][2].custom_id(), "control.pause");
        assert_eq!(view.controls[1][0].custom_id(), PLACEHOLDER_ID);
    }

    #[test]
    fn paused_shows_resume() {
        let state = PlaybackState {
            current: Some(track("now")),
            paused: true,
            ..PlaybackState::default()
        };

        let view = View::render(Some(&state), true, "en-US", &Icons::default());
        assert_eq!(view.status, Status::Paused);
        assert_eq!(view.controls[0][2].action, Some(ControlAction::Resume));
        assert_eq!(view.controls[0][2].style, ButtonStyle::Red);
    }

    #[test]
    fn disconnected_and_ended_have_no_controls() {
        let state = PlaybackState {
            current: Some(track("now")),
            ..PlaybackState::default()
        };
        let view = View::render(Some(&state), false, "en-US", &Icons::default());
        assert_eq!(view.status, Status::Disconnected);
        assert!(view.controls.is_empty());

        let view = View::render(Some(&PlaybackState::default()), true, "en-US", &Icons::default());
        assert_eq!(view.status, Status::Ended);
        assert_eq!(view.title, "Nothing is playing");
        assert!(view.controls.is_empty());
    }
}
