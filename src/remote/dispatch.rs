//! Routing of inbound frames.
//!
//! * Requests go to every handler registered for their endpoint, each in a
//!   supervised task. Requests to an endpoint without handlers are answered
//!   with an error right away.
//! * Responses resolve the pending request with the same id. Responses to
//!   unknown ids are dropped.
//! * Frames of unknown type and malformed frames are logged and dropped.

use std::sync::{Arc, PoisonError, RwLock};

use super::{Handler, Link, Pending, Registry, Request};
use crate::{
    error::{ErrorKind, Result},
    protocol::Frame,
    tasks::Supervisor,
};

/// Error message for requests to endpoints without handlers.
pub const NO_HANDLER: &str = "No handler for endpoint";

#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
    pending: Arc<Pending>,
    tasks: Supervisor,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<RwLock<Registry>>, pending: Arc<Pending>, tasks: Supervisor) -> Self {
        Self {
            registry,
            pending,
            tasks,
        }
    }

    /// Routes one frame received on the connection behind `link`.
    ///
    /// # Errors
    ///
    /// Fails only if answering a request without handlers fails, i.e. when
    /// the connection is gone.
    pub async fn dispatch(self, text: String, link: Link) -> Result<()> {
        let frame = match Frame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                return Ok(());
            }
        };

        match frame {
            Frame::Request { id, endpoint, data } => {
                let handlers = self
                    .registry
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .handlers(&endpoint);
                let request = Request::new(id, endpoint, data, link);

                if handlers.is_empty() {
                    warn!("no handler for endpoint {}", request.endpoint());
                    return request.respond_error(NO_HANDLER);
                }

                debug!(
                    "request {} to {}: {} handler(s)",
                    request.id(),
                    request.endpoint(),
                    handlers.len()
                );
                for handler in handlers {
                    let name = format!("{} handler", request.endpoint());
                    self.tasks.spawn(name, invoke(handler, request.clone()));
                }
            }

            Frame::Response { id, data } => {
                if !self.pending.resolve(&id, data) {
                    trace!("dropping response to unknown request {id}");
                }
            }

            Frame::Unknown => debug!("ignoring frame of unknown type"),
        }

        Ok(())
    }
}

/// Runs `handler` and answers with its error if it fails before anyone
/// responded.
async fn invoke(handler: Arc<dyn Handler>, request: Request) -> Result<()> {
    let Err(e) = handler.handle(request.clone()).await else {
        return Ok(());
    };
    if request.has_responded() {
        return Err(e);
    }

    match request.respond_error(&e.message()) {
        Ok(()) => {}
        Err(already) if already.kind == ErrorKind::AlreadyExists => {}
        Err(other) => debug!("cannot report handler failure: {other}"),
    }
    Err(e)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        error::Error,
        remote::Outgoing,
    };

    fn dispatcher(registry: Registry) -> (Dispatcher, Arc<Pending>) {
        let pending = Arc::new(Pending::new());
        let dispatcher = Dispatcher::new(
            Arc::new(RwLock::new(registry)),
            Arc::clone(&pending),
            Supervisor::new(),
        );
        (dispatcher, pending)
    }

    fn responses(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Value> {
        let mut responses = Vec::new();
        while let Ok(outgoing) = rx.try_recv() {
            let Outgoing::Text(text) = outgoing else {
                panic!("unexpected close");
            };
            responses.push(serde_json::from_str(&text).unwrap());
        }
        responses
    }

    #[tokio::test]
    async fn fans_out_to_all_handlers() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            registry.add_handler("play", move |request: Request| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = request.respond_success(json!({}));
                    Ok::<_, Error>(())
                }
            });
        }

        let (dispatcher, _) = dispatcher(registry);
        let (link, mut rx) = Link::new();
        let text = r#"{"type":"request","id":"r1","endpoint":"play","data":{}}"#;
        dispatcher.clone().dispatch(text.to_owned(), link).await.unwrap();
        dispatcher.tasks.quiesce().await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let responses = responses(&mut rx);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], "r1");
    }

    #[tokio::test]
    async fn unknown_endpoint_gets_one_error() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let counter = Arc::clone(&runs);
        registry.add_handler("play", move |_request: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(()) }
        });

        let (dispatcher, _) = dispatcher(registry);
        let (link, mut rx) = Link::new();
        let text = r#"{"type":"request","id":"r2","endpoint":"dance","data":{}}"#;
        dispatcher.clone().dispatch(text.to_owned(), link).await.unwrap();
        dispatcher.tasks.quiesce().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            responses(&mut rx),
            [json!({
                "type": "response",
                "id": "r2",
                "data": {"status": "error", "message": NO_HANDLER}
            })]
        );
    }

    #[tokio::test]
    async fn failing_handler_is_answered_with_its_error() {
        let mut registry = Registry::new();
        registry.add_handler("play", |_request: Request| async {
            Err::<(), _>(Error::failed_precondition("Nothing is playing."))
        });

        let (dispatcher, _) = dispatcher(registry);
        let (link, mut rx) = Link::new();
        let text = r#"{"type":"request","id":"r3","endpoint":"play"}"#;
        dispatcher.clone().dispatch(text.to_owned(), link).await.unwrap();
        dispatcher.tasks.quiesce().await;

        let responses = responses(&mut rx);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["data"]["status"], "error");
        assert_eq!(responses[0]["data"]["message"], "Nothing is playing.");
    }

    #[tokio::test]
    async fn responses_resolve_pending_requests() {
        let (dispatcher, pending) = dispatcher(Registry::new());
        let (link, mut rx) = Link::new();
        let (id, slot) = pending.register("can_use_music");

        let text = format!(r#"{{"type":"response","id":"{id}","data":{{"status":"success"}}}}"#);
        dispatcher.clone().dispatch(text, link.clone()).await.unwrap();
        assert_eq!(slot.await.unwrap().unwrap()["status"], "success");

        // Late and unknown responses go nowhere.
        let text = format!(r#"{{"type":"response","id":"{id}","data":{{}}}}"#);
        dispatcher.clone().dispatch(text, link.clone()).await.unwrap();
        dispatcher
            .clone()
            .dispatch(r#"{"type":"event","id":"x"}"#.to_owned(), link.clone())
            .await
            .unwrap();
        dispatcher
            .clone()
            .dispatch("garbage".to_owned(), link)
            .await
            .unwrap();

        assert!(pending.is_empty());
        assert!(responses(&mut rx).is_empty());
    }
}
