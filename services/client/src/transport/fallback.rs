//! Best-effort server-sent-events text stream.
//!
//! Receive only, no reconnect. Anything that goes wrong here is logged and
//! otherwise ignored, since the WebSocket channel carries the same text.

use crate::handlers::{HandlerId, HandlerRegistry};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::{Client, Url, header};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

/// The only payload type forwarded from the stream.
pub const TEXT_PAYLOAD_TYPE: &str = "text";

pub struct FallbackStream {
    client: Client,
    handlers: Arc<HandlerRegistry<Value>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackStream {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            handlers: Arc::new(HandlerRegistry::new()),
            reader: Mutex::new(None),
        }
    }

    fn reader(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts reading `url`. A stream that is already open is left alone.
    pub fn open(&self, url: Url) {
        let mut reader = self.reader();
        if reader.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let span = info_span!("fallback_stream", %url);
        *reader = Some(tokio::spawn(
            read_stream(self.client.clone(), url, self.handlers.clone()).instrument(span),
        ));
    }

    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.handlers.unsubscribe(id)
    }

    pub fn is_open(&self) -> bool {
        self.reader()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Drops every handler and stops the reader task.
    pub async fn close(&self) {
        self.handlers.clear();
        let task = self.reader().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for FallbackStream {
    fn drop(&mut self) {
        if let Some(task) = self.reader().take() {
            task.abort();
        }
    }
}

async fn read_stream(client: Client, url: Url, handlers: Arc<HandlerRegistry<Value>>) {
    let response = match client
        .get(url)
        .header(header::ACCEPT, "text/event-stream")
        .send()
        .await
        .and_then(|response| response.error_for_status())
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "fallback stream unavailable");
            return;
        }
    };
    info!("fallback stream open");

    let mut events = response.bytes_stream().eventsource();
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => match accept_text_payload(&event.data) {
                Some(payload) => handlers.dispatch(&payload),
                None => debug!(data = %event.data, "ignoring non-text fallback payload"),
            },
            Err(e) => {
                warn!(error = %e, "fallback stream failed");
                return;
            }
        }
    }
    info!("fallback stream ended");
}

/// Decodes one event's data and keeps it only if its `type` is `"text"`.
pub fn accept_text_payload(data: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(data).ok()?;
    let is_text = value.get("type").and_then(Value::as_str) == Some(TEXT_PAYLOAD_TYPE);
    is_text.then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, wait_until};
    use serde_json::json;
    use voxline_core::SessionId;

    #[test]
    fn test_only_text_payloads_are_accepted() {
        assert_eq!(
            accept_text_payload(r#"{"type":"text","content":"hi"}"#),
            Some(json!({"type": "text", "content": "hi"}))
        );
        assert_eq!(accept_text_payload(r#"{"type":"audio","data":"AAA"}"#), None);
        assert_eq!(accept_text_payload(r#"{"content":"no type"}"#), None);
        assert_eq!(accept_text_payload("not json"), None);
    }

    #[tokio::test]
    async fn test_stream_forwards_text_payloads_in_order() {
        let fixture = Fixture::start().await;
        fixture.set_outputs(vec![
            r#"{"type":"text","role":"agent","content":"one"}"#.to_string(),
            r#"{"type":"ping"}"#.to_string(),
            "garbage".to_string(),
            r#"{"type":"text","role":"agent","content":"two"}"#.to_string(),
        ]);
        let stream = FallbackStream::new(Client::new());
        let received = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = received.clone();
        stream.on_message(move |value| sink.lock().unwrap().push(value.clone()));

        stream.open(fixture.endpoints().outputs(&SessionId::from("session_f1")));

        wait_until(|| received.lock().unwrap().len() == 2).await;
        let contents: Vec<Value> = received
            .lock()
            .unwrap()
            .iter()
            .map(|v| v["content"].clone())
            .collect();
        assert_eq!(contents, vec![json!("one"), json!("two")]);
        assert_eq!(fixture.output_sessions(), vec!["session_f1".to_string()]);
        stream.close().await;
        assert!(!stream.is_open());
    }

    #[tokio::test]
    async fn test_unreachable_stream_is_ignored() {
        let fixture = Fixture::start().await;
        let mut url = fixture.endpoints().offer();
        url.set_path("/missing");
        let stream = FallbackStream::new(Client::new());

        stream.open(url);
        wait_until(|| !stream.is_open()).await;
        stream.close().await;
    }
}
