//! Endpoint handlers and the requests they receive.
//!
//! Any number of [`Handler`]s may be registered for an endpoint. Every one of
//! them runs for each inbound request to that endpoint, in its own task, with
//! its own clone of the [`Request`]. The clones share one responder: the
//! first response wins and later attempts fail with `AlreadyExists`.
//!
//! # Example
//!
//! ```rust
//! use kava::remote::{Registry, Request};
//! use serde_json::json;
//!
//! let mut registry = Registry::new();
//! registry.add_handler("ping", |request: Request| async move {
//!     request.respond_success(json!({"pong": true}))
//! });
//! assert_eq!(registry.handlers("ping").len(), 1);
//! ```

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::Link;
use crate::{
    error::{Error, Result},
    protocol::{frame, Frame, RequestId},
};

/// Handles inbound requests to an endpoint.
///
/// Implemented for every `Fn(Request) -> impl Future<Output = Result<()>>`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles `request`, normally by responding to it.
    ///
    /// An error is logged and, if nothing responded yet, sent back as an
    /// error response.
    async fn handle(&self, request: Request) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, request: Request) -> Result<()> {
        self(request).await
    }
}

/// Endpoint name to handlers, in registration order.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` to the handlers of `endpoint`.
    pub fn add_handler<H>(&mut self, endpoint: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers
            .entry(endpoint.to_owned())
            .or_default()
            .push(Arc::new(handler));
        debug!("registered handler for {endpoint}");
    }

    /// The handlers of `endpoint`, empty if there are none.
    #[must_use]
    pub fn handlers(&self, endpoint: &str) -> Vec<Arc<dyn Handler>> {
        self.handlers.get(endpoint).cloned().unwrap_or_default()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut endpoints: Vec<_> = self.endpoints().collect();
        endpoints.sort_unstable();
        f.debug_struct("Registry")
            .field("endpoints", &endpoints)
            .finish()
    }
}

#[derive(Debug)]
struct Responder {
    link: Link,
    responded: AtomicBool,
}

/// An inbound request.
#[derive(Clone, Debug)]
pub struct Request {
    id: RequestId,
    endpoint: String,
    data: Value,
    responder: Arc<Responder>,
}

impl Request {
    /// A request that will answer through `link`.
    #[must_use]
    pub fn new(id: RequestId, endpoint: String, data: Value, link: Link) -> Self {
        Self {
            id,
            endpoint,
            data,
            responder: Arc::new(Responder {
                link,
                responded: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Deserializes the request data.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the data does not match `T`.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.data).map_err(Error::invalid_argument)
    }

    #[must_use]
    pub fn has_responded(&self) -> bool {
        self.responder.responded.load(Ordering::Acquire)
    }

    /// Sends `data` back as the response to this request.
    ///
    /// # Errors
    ///
    /// * `AlreadyExists` if this request or a clone of it responded before
    /// * `Unavailable` if the connection is closed
    pub fn respond(&self, data: Value) -> Result<()> {
        if self.responder.responded.swap(true, Ordering::AcqRel) {
            return Err(Error::already_exists(format!(
                "request {} to {} was already answered",
                self.id, self.endpoint
            )));
        }

        self.responder
            .link
            .send_frame(&Frame::response(self.id.clone(), data))
    }

    /// Responds with `status` set to `"success"` and `fields` merged in.
    ///
    /// # Errors
    ///
    /// As [`respond`](Self::respond).
    pub fn respond_success(&self, fields: Value) -> Result<()> {
        self.respond(frame::success(fields))
    }

    /// Responds with `status` set to `"error"` and `message`.
    ///
    /// # Errors
    ///
    /// As [`respond`](Self::respond).
    pub fn respond_error(&self, message: &str) -> Result<()> {
        self.respond(frame::error(message))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{error::ErrorKind, remote::Outgoing};

    #[test]
    fn handlers_accumulate_in_order() {
        let mut registry = Registry::new();
        registry.add_handler("play", |_request: Request| async { Ok::<_, Error>(()) });
        registry.add_handler("play", |_request: Request| async { Ok::<_, Error>(()) });
        registry.add_handler("queue", |_request: Request| async { Ok::<_, Error>(()) });

        assert_eq!(registry.handlers("play").len(), 2);
        assert_eq!(registry.handlers("queue").len(), 1);
        assert!(registry.handlers("stop").is_empty());
    }

    #[test]
    fn first_response_wins() {
        let (link, mut rx) = Link::new();
        let request = Request::new("abc".parse().unwrap(), "play".to_owned(), json!({}), link);
        let clone = request.clone();

        clone.respond_success(json!({"n": 1})).unwrap();
        let err = request.respond_error("too late").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert!(request.has_responded());

        let Ok(Outgoing::Text(text)) = rx.try_recv() else {
            panic!("expected one response frame");
        };
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({"type": "response", "id": "abc", "data": {"status": "success", "n": 1}})
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn arguments_are_typed() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            channel_id: u64,
        }

        let (link, _rx) = Link::new();
        let request = Request::new(
            "abc".parse().unwrap(),
            "pause".to_owned(),
            json!({"channel_id": 7}),
            link.clone(),
        );
        assert_eq!(request.args::<Args>().unwrap().channel_id, 7);

        let request = Request::new("abc".parse().unwrap(), "pause".to_owned(), json!({}), link);
        assert_eq!(
            request.args::<Args>().unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
    }
}
