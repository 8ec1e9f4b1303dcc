//! Outbound half of a connection.
//!
//! The websocket sink belongs to a single writer task. Everyone else sends
//! through a [`Link`], a cheap handle to the writer's queue, so that frames
//! are written one at a time and never interleave.

use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    protocol::Frame,
};

/// Work for the writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),

    /// Send a close frame and stop writing.
    Close,
}

#[derive(Clone, Debug)]
pub struct Link {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Link {
    /// Returns a link and the queue the writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues `frame` for writing.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the writer is gone.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let text = frame.encode()?;
        trace!("-> {text}");
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| Error::unavailable("connection is closed"))
    }

    /// Asks the writer to close the connection.
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}
