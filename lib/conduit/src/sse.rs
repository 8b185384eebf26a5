//! Server-Sent-Events over [`HyperTransport`].

use std::pin::pin;
use std::sync::Arc;

use conduit_core::stream::stream_head;
use conduit_core::{Error, EventSink, EventSource, Message, Request, Result};
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};

use crate::transport::{ByteStream, HyperTransport};

const EVENT_STREAM: &str = "text/event-stream";

/// Event name the wire format implies when none is sent.
const DEFAULT_EVENT: &str = "message";

/// Event source reading `text/event-stream` responses.
#[derive(Debug, Clone, Default)]
pub struct SseSource {
    transport: HyperTransport,
}

impl SseSource {
    /// Read events through `transport`.
    #[must_use]
    pub const fn new(transport: HyperTransport) -> Self {
        Self { transport }
    }
}

impl EventSource for SseSource {
    async fn connect(&self, request: Request, sink: EventSink) {
        let request = Arc::new(request);
        let response = match self.transport.open(&request, EVENT_STREAM).await {
            Ok(response) => response,
            Err(error) => {
                sink.fail(error.with_request(request));
                return;
            }
        };

        let success = (200..300).contains(&response.status);
        sink.open(stream_head(
            response.status,
            response.status_text,
            response.headers,
            request,
        ));
        if !success {
            return;
        }

        let mut messages = pin!(messages(response.body));
        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => sink.message(message),
                Err(error) => {
                    sink.fail(error);
                    return;
                }
            }
        }
        tracing::debug!("event stream ended");
        sink.close();
    }
}

/// Decode a `text/event-stream` body into messages.
///
/// An event cut off by the end of the body is never yielded.
fn messages(body: ByteStream) -> impl Stream<Item = Result<Message>> + Send {
    body.eventsource().map(|item| match item {
        Ok(event) => Ok(to_message(event)),
        Err(EventStreamError::Transport(error)) => Err(error),
        Err(error) => Err(Error::network(format!("malformed event stream: {error}"))),
    })
}

fn to_message(event: Event) -> Message {
    let mut message = Message::new(event.data);
    if !event.event.is_empty() && event.event != DEFAULT_EVENT {
        message = message.with_event(event.event);
    }
    if !event.id.is_empty() {
        message = message.with_id(event.id);
    }
    message
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};
    use bytes::Bytes;
    use conduit_core::ErrorKind;
    use futures_util::stream;

    use super::*;

    fn body(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<Result<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    async fn decode(chunks: &[&'static str]) -> Vec<Message> {
        messages(body(chunks))
            .map(|item| item.expect("message"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn split_across_chunks() {
        let messages = decode(&["da", "ta: hel", "lo\n", "\n"]).await;
        check!(messages == vec![Message::new("hello")]);
    }

    #[tokio::test]
    async fn crlf_split_between_chunks() {
        let messages = decode(&["data: x\r", "\n\r", "\n"]).await;
        check!(messages == vec![Message::new("x")]);
    }

    #[tokio::test]
    async fn multiline_data_and_fields() {
        let messages = decode(&["event: tick\nid: 7\ndata: one\ndata: two\n\n"]).await;
        check!(messages == vec![Message::new("one\ntwo").with_event("tick").with_id("7")]);
    }

    #[tokio::test]
    async fn comments_and_unknown_fields_ignored() {
        let messages = decode(&[": keep-alive\nretry: 10\nfoo: bar\ndata: ok\n\n"]).await;
        check!(messages == vec![Message::new("ok")]);
    }

    #[tokio::test]
    async fn id_persists_and_event_resets() {
        let messages = decode(&["event: first\nid: 1\ndata: a\n\ndata: b\n\n"]).await;
        check!(
            messages
                == vec![
                    Message::new("a").with_event("first").with_id("1"),
                    Message::new("b").with_id("1"),
                ]
        );
    }

    #[tokio::test]
    async fn default_event_name_is_dropped() {
        let messages = decode(&["event: message\ndata: plain\n\n"]).await;
        check!(messages[0].event.is_none());
    }

    #[tokio::test]
    async fn event_without_data_is_skipped() {
        check!(decode(&["event: ping\n\n"]).await.is_empty());
    }

    #[tokio::test]
    async fn incomplete_event_is_dropped() {
        check!(decode(&["data: partial\n"]).await.is_empty());
    }

    #[tokio::test]
    async fn body_error_is_passed_through() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(Error::network("stream interrupted")),
        ];
        let items: Vec<Result<Message>> = messages(Box::pin(stream::iter(chunks))).collect().await;

        let_assert!([Ok(first), Err(err)] = items.as_slice());
        check!(*first == Message::new("a"));
        check!(err.kind() == ErrorKind::Network);
    }
}
