//! Kava bridge of a voice playback bot.
//!
//! The bridge keeps a websocket connection to a Kava server, over which
//! both sides call each other's endpoints ([`remote`]). Next to it, the
//! [`controller`] keeps every guild's player display in step with the
//! playback events of the bot.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod controller;
pub mod display;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod platform;
pub mod player;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod signal;
pub mod tasks;
