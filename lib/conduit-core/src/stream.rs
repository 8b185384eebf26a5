//! Push-to-pull streaming bridge.
//!
//! An [`EventSource`] pushes events into an [`EventSink`] whenever they
//! arrive; consumers pull them in order through a [`MessageStream`]. The
//! bridge between the two is a small state machine:
//!
//! - **open**: messages accumulate in an unbounded FIFO buffer, a pull on an
//!   empty buffer waits;
//! - **closed**: buffered messages drain, then the stream ends;
//! - **failed**: buffered messages drain, then every pull yields the stored
//!   error.
//!
//! The first terminal transition wins. Three cancellation sources converge on
//! a single [`AbortController`]: [`StreamSession::cancel`] closes cleanly, the
//! request's own [`AbortSignal`] fails with an aborted error and the request
//! timeout fails with a timeout error. Dropping every consumer handle (the
//! [`Connecting`], each [`StreamSession`] clone and each [`MessageStream`])
//! cancels the session as well.
//!
//! ```
//! use futures_util::StreamExt;
//! use conduit_core::stream::{Message, bridge};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let (sink, session) = bridge();
//! sink.message(Message::new("a"));
//! sink.message(Message::new("b"));
//! sink.close();
//!
//! let data: Vec<String> = session
//!     .stream()
//!     .map(|message| message.map(|m| m.data))
//!     .collect::<Vec<_>>()
//!     .await
//!     .into_iter()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(data, ["a", "b"]);
//! session.done().await.unwrap();
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context as TaskContext, Poll, Waker};
use std::time::Duration;

use futures_core::Stream;
use futures_util::future::BoxFuture;
use tokio::sync::{oneshot, watch};

use crate::{
    AbortController, AbortReason, AbortSignal, Body, Error, Method, Request, Response, Result,
    StreamHead,
};

/// One discrete event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Event payload.
    pub data: String,
    /// Event type, if the source named one.
    pub event: Option<String>,
    /// Event id, if the source gave one.
    pub id: Option<String>,
}

impl Message {
    /// A message with only a payload.
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            event: None,
            id: None,
        }
    }

    /// Set the event type.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the event id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug)]
enum Phase {
    Open,
    Closed,
    Failed(Error),
}

struct Shared {
    queue: VecDeque<Message>,
    phase: Phase,
    /// Pending pulls, keyed by cursor.
    waiters: HashMap<u64, Waker>,
    next_cursor: u64,
}

impl Shared {
    fn take_waiters(&mut self) -> Vec<Waker> {
        self.waiters.drain().map(|(_, waker)| waker).collect()
    }
}

type Handshake = oneshot::Sender<Result<StreamHead>>;

struct Bridge {
    shared: Mutex<Shared>,
    handshake: Mutex<Option<Handshake>>,
    done: watch::Sender<Option<Result<()>>>,
    controller: AbortController,
}

impl Bridge {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, message: Message) {
        let waiters = {
            let mut shared = self.lock();
            if !matches!(shared.phase, Phase::Open) {
                tracing::trace!("message after terminal state dropped");
                return;
            }
            shared.queue.push_back(message);
            shared.take_waiters()
        };
        waiters.into_iter().for_each(Waker::wake);
    }

    /// Move to a terminal phase. Returns `false` if one was already reached.
    fn terminate(&self, outcome: Result<()>) -> bool {
        let waiters = {
            let mut shared = self.lock();
            if !matches!(shared.phase, Phase::Open) {
                return false;
            }
            shared.phase = match &outcome {
                Ok(()) => Phase::Closed,
                Err(error) => Phase::Failed(error.clone()),
            };
            shared.take_waiters()
        };

        match &outcome {
            Ok(()) => tracing::debug!("stream closed"),
            Err(error) => tracing::debug!(kind = %error.kind(), error = %error, "stream failed"),
        }

        if let Some(handshake) = self.take_handshake() {
            let error = match &outcome {
                Err(error) => error.clone(),
                Ok(()) if self.controller.signal().reason() == Some(AbortReason::Cancelled) => {
                    Error::aborted("stream cancelled before open")
                }
                Ok(()) => Error::network("stream closed before open"),
            };
            let _ = handshake.send(Err(error));
        }

        waiters.into_iter().for_each(Waker::wake);
        self.done.send_replace(Some(outcome));
        true
    }

    fn take_handshake(&self) -> Option<Handshake> {
        self.handshake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn on_abort(&self, reason: AbortReason, request: Option<&Arc<Request>>) {
        let outcome = match reason {
            AbortReason::Cancelled => Ok(()),
            AbortReason::Signal | AbortReason::Timeout => {
                let error = reason.into_error();
                Err(match request {
                    Some(request) => error.with_request(Arc::clone(request)),
                    None => error,
                })
            }
        };
        self.terminate(outcome);
    }
}

/// Push side of a bridge, handed to an [`EventSource`].
#[derive(Clone)]
pub struct EventSink {
    bridge: Arc<Bridge>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

impl EventSink {
    /// Report the connection status.
    ///
    /// A 2xx head completes the handshake. Any other status fails the stream
    /// with an HTTP error, which also rejects the handshake.
    pub fn open(&self, head: StreamHead) {
        if head.is_success() {
            tracing::debug!(status = head.status, "stream opened");
            if let Some(handshake) = self.bridge.take_handshake() {
                let _ = handshake.send(Ok(head));
            }
            return;
        }

        let response = Response::new(
            head.status,
            head.status_text.clone(),
            head.headers,
            Body::Empty,
            Arc::clone(&head.request),
        );
        let error = Error::http(head.status, head.status_text)
            .with_request(head.request)
            .with_response(response);
        self.fail(error);
    }

    /// Buffer a message. Ignored once the stream is terminated.
    pub fn message(&self, message: Message) {
        self.bridge.push(message);
    }

    /// Fail the stream. Ignored once the stream is terminated.
    pub fn fail(&self, error: Error) {
        self.bridge.terminate(Err(error));
    }

    /// Close the stream cleanly. Ignored once the stream is terminated.
    pub fn close(&self) {
        self.bridge.terminate(Ok(()));
    }

    /// Returns `true` once the stream closed or failed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        !matches!(self.bridge.lock().phase, Phase::Open)
    }

    /// Fires when the session is cancelled, aborted or times out.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.bridge.controller.signal()
    }
}

/// Cancels the session once the last consumer handle is gone.
struct SessionGuard {
    controller: AbortController,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.controller.abort(AbortReason::Cancelled) {
            tracing::debug!("stream handles dropped, session cancelled");
        }
    }
}

/// Consumer side of a bridge.
///
/// Clones share the same buffer and state. Once every clone, every cursor
/// and the [`Connecting`] are dropped, the session is cancelled.
#[derive(Clone)]
pub struct StreamSession {
    bridge: Arc<Bridge>,
    guard: Arc<SessionGuard>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("phase", &self.bridge.lock().phase)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// A fresh cursor over the shared buffer.
    ///
    /// Cursors compete for messages: each message is handed to exactly one
    /// pull, so a late cursor only sees what is still unread.
    #[must_use]
    pub fn stream(&self) -> MessageStream {
        let cursor = {
            let mut shared = self.bridge.lock();
            shared.next_cursor += 1;
            shared.next_cursor
        };
        MessageStream {
            bridge: Arc::clone(&self.bridge),
            _guard: Arc::clone(&self.guard),
            cursor,
        }
    }

    /// Tear the stream down. Idempotent; a no-op after termination.
    pub fn cancel(&self) {
        self.bridge.controller.abort(AbortReason::Cancelled);
    }

    /// Resolves once the stream terminates: `Ok` on a clean close, the stored
    /// error on failure. Does not depend on anyone consuming the stream.
    pub fn done(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let mut done = self.bridge.done.subscribe();
        async move {
            let outcome = done
                .wait_for(Option::is_some)
                .await
                .map_err(|_| Error::unknown("stream state dropped"))?;
            outcome.clone().unwrap_or(Ok(()))
        }
    }

    /// Returns `true` once the stream closed or failed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        !matches!(self.bridge.lock().phase, Phase::Open)
    }

    /// The cancellation signal shared by every teardown path.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.bridge.controller.signal()
    }
}

/// Pull cursor over a [`StreamSession`].
///
/// After a failure the stream keeps yielding the same error on every poll; it
/// never ends on its own.
pub struct MessageStream {
    bridge: Arc<Bridge>,
    _guard: Arc<SessionGuard>,
    cursor: u64,
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.bridge.lock().waiters.remove(&self.cursor);
    }
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let mut shared = self.bridge.lock();
        if let Some(message) = shared.queue.pop_front() {
            return Poll::Ready(Some(Ok(message)));
        }
        match &shared.phase {
            Phase::Open => {
                shared.waiters.insert(self.cursor, cx.waker().clone());
                Poll::Pending
            }
            Phase::Closed => Poll::Ready(None),
            Phase::Failed(error) => Poll::Ready(Some(Err(error.clone()))),
        }
    }
}

fn new_bridge() -> (Arc<Bridge>, oneshot::Receiver<Result<StreamHead>>) {
    let (handshake, opened) = oneshot::channel();
    let (done, _) = watch::channel(None);
    let bridge = Arc::new(Bridge {
        shared: Mutex::new(Shared {
            queue: VecDeque::new(),
            phase: Phase::Open,
            waiters: HashMap::new(),
            next_cursor: 0,
        }),
        handshake: Mutex::new(Some(handshake)),
        done,
        controller: AbortController::new(),
    });
    (bridge, opened)
}

fn new_session(bridge: Arc<Bridge>) -> StreamSession {
    let guard = Arc::new(SessionGuard {
        controller: bridge.controller.clone(),
    });
    StreamSession { bridge, guard }
}

fn watch_abort(bridge: &Arc<Bridge>, request: Option<Arc<Request>>) {
    let weak: Weak<Bridge> = Arc::downgrade(bridge);
    bridge.controller.signal().on_abort(move |reason| {
        if let Some(bridge) = weak.upgrade() {
            bridge.on_abort(reason, request.as_ref());
        }
    });
}

/// A standalone bridge, without a driving source.
///
/// Useful when the caller drives the sink itself. Cancelling the session,
/// or dropping all of its handles, closes it.
#[must_use]
pub fn bridge() -> (EventSink, StreamSession) {
    let (bridge, _opened) = new_bridge();
    watch_abort(&bridge, None);
    (
        EventSink {
            bridge: Arc::clone(&bridge),
        },
        new_session(bridge),
    )
}

/// A push-style event producer, such as a Server-Sent-Events connection.
pub trait EventSource: Send + Sync {
    /// Connect and push events into `sink` until the connection ends.
    ///
    /// Implementations should call [`EventSink::open`] once the status is
    /// known, then [`EventSink::message`] per event, and finish with
    /// [`EventSink::close`] or [`EventSink::fail`]. The future is dropped when
    /// the session is cancelled.
    fn connect(&self, request: Request, sink: EventSink) -> impl Future<Output = ()> + Send;

    /// Whether this source can stream requests made with `method`.
    fn supports(&self, method: Method) -> bool {
        method == Method::Get
    }
}

/// Starts streaming sessions over an [`EventSource`].
pub struct StreamConnector<S> {
    source: Arc<S>,
}

impl<S> Clone for StreamConnector<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S> fmt::Debug for StreamConnector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnector").finish_non_exhaustive()
    }
}

impl<S: EventSource + 'static> StreamConnector<S> {
    /// Wrap a source.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// The wrapped source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Start a session for `request`.
    ///
    /// Unsupported methods are rejected here, before any session or
    /// connection exists. Otherwise a driver task is spawned on the current
    /// tokio runtime; the returned [`Connecting`] gives immediate access to
    /// the session and resolves once the source reports the open status.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn connect(&self, request: Request) -> Result<Connecting> {
        let method = request.method();
        if !self.source.supports(method) {
            return Err(
                Error::unknown(format!("streaming does not support {method} requests"))
                    .with_request(request),
            );
        }

        let shared_request = Arc::new(request.clone());
        let (bridge, opened) = new_bridge();
        watch_abort(&bridge, Some(Arc::clone(&shared_request)));

        let controller = bridge.controller.clone();
        if let Some(caller) = request.signal() {
            controller.follow(caller, AbortReason::Signal);
        }

        let sink = EventSink {
            bridge: Arc::clone(&bridge),
        };
        let session = new_session(bridge);
        let source = Arc::clone(&self.source);
        let timeout = request.timeout();

        tracing::debug!(method = %method, url = request.url(), "stream connecting");
        tokio::spawn(drive(source, request, sink, controller, timeout));

        Ok(Connecting { session, opened })
    }
}

async fn drive<S: EventSource>(
    source: Arc<S>,
    request: Request,
    sink: EventSink,
    controller: AbortController,
    timeout: Option<Duration>,
) {
    let signal = controller.signal();
    let mut done = sink.bridge.done.subscribe();
    let terminated = async move {
        let _ = done.wait_for(Option::is_some).await;
    };
    let expired = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        reason = signal.aborted() => {
            tracing::debug!(%reason, "stream connection dropped");
        }
        () = terminated => {
            tracing::trace!("stream terminated, connection dropped");
        }
        () = expired => {
            controller.abort(AbortReason::Timeout);
        }
        () = source.connect(request, sink.clone()) => {
            sink.close();
        }
    }
}

/// A session whose connection is being opened.
///
/// Await it (or call [`Connecting::opened`]) to get the open status.
pub struct Connecting {
    session: StreamSession,
    opened: oneshot::Receiver<Result<StreamHead>>,
}

impl fmt::Debug for Connecting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connecting")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Connecting {
    /// The session, usable before the connection opens.
    #[must_use]
    pub const fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Wait for the open status.
    ///
    /// Rejects with an HTTP error on a non-2xx open, with the failure if the
    /// source failed first, and with a network error if it closed first.
    pub async fn opened(self) -> Result<(StreamHead, StreamSession)> {
        match self.opened.await {
            Ok(Ok(head)) => Ok((head, self.session)),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(Error::network("stream ended before open")),
        }
    }
}

impl IntoFuture for Connecting {
    type Output = Result<(StreamHead, StreamSession)>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.opened())
    }
}

/// Build a head from parts, for sources that receive a status line.
#[must_use]
pub fn stream_head(
    status: u16,
    status_text: impl Into<String>,
    headers: HashMap<String, String>,
    request: Arc<Request>,
) -> StreamHead {
    StreamHead {
        status,
        status_text: status_text.into(),
        headers,
        request,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert2::{check, let_assert};
    use futures_util::StreamExt;

    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn messages_in_order_then_end() {
        let (sink, session) = bridge();
        sink.message(Message::new("a"));
        sink.message(Message::new("b"));
        sink.close();

        let mut stream = session.stream();
        let_assert!(Some(Ok(a)) = stream.next().await);
        let_assert!(Some(Ok(b)) = stream.next().await);
        check!(a.data == "a");
        check!(b.data == "b");
        assert!(stream.next().await.is_none());
        session.done().await.expect("clean close");
    }

    #[tokio::test]
    async fn done_settles_without_consumers() {
        let (sink, session) = bridge();
        sink.message(Message::new("unread"));
        sink.close();
        session.done().await.expect("clean close");
    }

    #[tokio::test]
    async fn pull_waits_for_push() {
        let (sink, session) = bridge();
        let reader = tokio::spawn(async move { session.stream().next().await });

        tokio::task::yield_now().await;
        sink.message(Message::new("late").with_event("update").with_id("7"));

        let_assert!(Ok(Some(Ok(message))) = reader.await);
        check!(message.data == "late");
        check!(message.event.as_deref() == Some("update"));
        check!(message.id.as_deref() == Some("7"));
    }

    #[tokio::test]
    async fn failure_is_sticky_after_buffer_drains() {
        let (sink, session) = bridge();
        sink.message(Message::new("before"));
        sink.fail(Error::network("connection reset"));
        sink.message(Message::new("after"));
        sink.close();

        let mut stream = session.stream();
        let_assert!(Some(Ok(first)) = stream.next().await);
        check!(first.data == "before");
        for _ in 0..3 {
            let_assert!(Some(Err(error)) = stream.next().await);
            check!(error.kind() == ErrorKind::Network);
        }
        let_assert!(Err(error) = session.done().await);
        check!(error.message() == "connection reset");
    }

    #[tokio::test]
    async fn close_wins_over_later_failure() {
        let (sink, session) = bridge();
        sink.close();
        sink.fail(Error::network("too late"));

        assert!(session.stream().next().await.is_none());
        session.done().await.expect("close came first");
    }

    #[tokio::test]
    async fn failure_wakes_suspended_pull() {
        let (sink, session) = bridge();
        let reader = tokio::spawn(async move { session.stream().next().await });

        tokio::task::yield_now().await;
        sink.fail(Error::timeout("idle"));

        let_assert!(Ok(Some(Err(error))) = reader.await);
        assert!(error.is_timeout());
    }

    #[tokio::test]
    async fn late_cursor_sees_only_unread() {
        let (sink, session) = bridge();
        sink.message(Message::new("1"));
        sink.message(Message::new("2"));

        let mut first = session.stream();
        let_assert!(Some(Ok(one)) = first.next().await);
        check!(one.data == "1");

        sink.message(Message::new("3"));
        sink.close();
        let rest = session
            .stream()
            .filter_map(|m| async move { m.ok().map(|m| m.data) })
            .collect::<Vec<_>>()
            .await;
        check!(rest == ["2", "3"]);
    }

    #[tokio::test]
    async fn cancel_before_any_message() {
        let (sink, session) = bridge();
        session.cancel();
        session.cancel();

        assert!(sink.is_terminated());
        assert!(session.stream().next().await.is_none());
        session.done().await.expect("cancel closes cleanly");
    }

    struct Scripted {
        connects: Arc<AtomicU32>,
        status: u16,
        messages: Vec<&'static str>,
        hang: bool,
    }

    impl Scripted {
        fn new(status: u16, messages: Vec<&'static str>) -> (Self, Arc<AtomicU32>) {
            let connects = Arc::new(AtomicU32::new(0));
            let source = Self {
                connects: Arc::clone(&connects),
                status,
                messages,
                hang: false,
            };
            (source, connects)
        }

        fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }
    }

    impl EventSource for Scripted {
        async fn connect(&self, request: Request, sink: EventSink) {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let status_text = if self.status == 200 { "OK" } else { "Service Unavailable" };
            sink.open(stream_head(
                self.status,
                status_text,
                HashMap::new(),
                Arc::new(request),
            ));
            for data in &self.messages {
                sink.message(Message::new(*data));
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            sink.close();
        }
    }

    #[tokio::test]
    async fn connect_opens_and_streams() {
        let (source, connects) = Scripted::new(200, vec!["a", "b"]);
        let connector = StreamConnector::new(source);

        let (head, session) = connector
            .connect(Request::get("https://example.com/events").build())
            .expect("GET supported")
            .await
            .expect("opened");

        check!(head.status == 200);
        check!(head.request.url() == "https://example.com/events");
        let data = session
            .stream()
            .filter_map(|m| async move { m.ok().map(|m| m.data) })
            .collect::<Vec<_>>()
            .await;
        check!(data == ["a", "b"]);
        session.done().await.expect("closed");
        check!(connects.load(Ordering::SeqCst) == 1);
    }

    #[tokio::test]
    async fn non_get_is_rejected_before_connecting() {
        let (source, connects) = Scripted::new(200, vec![]);
        let connector = StreamConnector::new(source);

        let result = connector.connect(Request::post("https://example.com/events").build());

        let_assert!(Err(error) = result);
        check!(error.request().map(Request::method) == Some(Method::Post));
        tokio::task::yield_now().await;
        check!(connects.load(Ordering::SeqCst) == 0);
    }

    #[tokio::test]
    async fn non_success_open_rejects_and_fails_session() {
        let (source, _) = Scripted::new(503, vec![]);
        let connector = StreamConnector::new(source.hanging());

        let connecting = connector
            .connect(Request::get("https://example.com/events").build())
            .expect("GET supported");
        let held = connecting.session().clone();

        let_assert!(Err(error) = connecting.opened().await);
        check!(error.status() == Some(503));
        check!(error.response().map(Response::status) == Some(503));

        let_assert!(Some(Err(pulled)) = held.stream().next().await);
        assert!(pulled.is_http());
        let_assert!(Err(done) = held.done().await);
        check!(done.status() == Some(503));
    }

    #[tokio::test]
    async fn close_before_open_rejects_handshake() {
        struct Silent;
        impl EventSource for Silent {
            async fn connect(&self, _request: Request, _sink: EventSink) {}
        }

        let connecting = StreamConnector::new(Silent)
            .connect(Request::get("https://example.com/events").build())
            .expect("GET supported");
        let session = connecting.session().clone();

        let_assert!(Err(error) = connecting.await);
        assert!(error.is_network());
        session.done().await.expect("closed");
    }

    #[tokio::test]
    async fn explicit_cancel_closes_cleanly() {
        let (source, _) = Scripted::new(200, vec!["x"]);
        let (_, session) = StreamConnector::new(source.hanging())
            .connect(Request::get("https://example.com/events").build())
            .expect("GET supported")
            .await
            .expect("opened");

        session.cancel();
        let data = session
            .stream()
            .filter_map(|m| async move { m.ok().map(|m| m.data) })
            .collect::<Vec<_>>()
            .await;
        check!(data == ["x"]);
        session.done().await.expect("cancel is a clean close");
        check!(session.signal().reason() == Some(AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn caller_signal_fails_with_aborted() {
        let (source, _) = Scripted::new(200, vec![]);
        let caller = AbortController::new();
        let (_, session) = StreamConnector::new(source.hanging())
            .connect(
                Request::get("https://example.com/events")
                    .signal(caller.signal())
                    .build(),
            )
            .expect("GET supported")
            .await
            .expect("opened");

        caller.abort(AbortReason::Cancelled);
        let_assert!(Err(error) = session.done().await);
        assert!(error.is_aborted());
        check!(error.request().map(Request::url) == Some("https://example.com/events"));
    }

    #[tokio::test]
    async fn already_aborted_caller_never_connects() {
        let (source, connects) = Scripted::new(200, vec![]);
        let caller = AbortController::new();
        caller.abort(AbortReason::Signal);

        let connecting = StreamConnector::new(source)
            .connect(
                Request::get("https://example.com/events")
                    .signal(caller.signal())
                    .build(),
            )
            .expect("GET supported");

        let_assert!(Err(error) = connecting.await);
        assert!(error.is_aborted());
        tokio::task::yield_now().await;
        check!(connects.load(Ordering::SeqCst) == 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_with_timeout_kind() {
        let (source, _) = Scripted::new(200, vec![]);
        let (_, session) = StreamConnector::new(source.hanging())
            .connect(
                Request::get("https://example.com/events")
                    .timeout(Duration::from_secs(5))
                    .build(),
            )
            .expect("GET supported")
            .await
            .expect("opened");

        let_assert!(Err(error) = session.done().await);
        assert!(error.is_timeout());
        check!(session.signal().reason() == Some(AbortReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn first_trigger_decides_classification() {
        let (source, _) = Scripted::new(200, vec![]);
        let caller = AbortController::new();
        let (_, session) = StreamConnector::new(source.hanging())
            .connect(
                Request::get("https://example.com/events")
                    .signal(caller.signal())
                    .timeout(Duration::from_secs(5))
                    .build(),
            )
            .expect("GET supported")
            .await
            .expect("opened");

        caller.abort(AbortReason::Signal);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let_assert!(Err(error) = session.done().await);
        assert!(error.is_aborted());
        check!(session.signal().reason() == Some(AbortReason::Signal));
    }

    #[tokio::test]
    async fn dropped_cursor_releases_its_waker() {
        use futures_util::FutureExt;

        let (sink, session) = bridge();
        for _ in 0..100 {
            let mut stream = session.stream();
            check!(stream.next().now_or_never().is_none());
        }
        check!(session.bridge.lock().waiters.is_empty());

        let mut live = session.stream();
        check!(live.next().now_or_never().is_none());
        check!(session.bridge.lock().waiters.len() == 1);

        sink.message(Message::new("wake"));
        check!(session.bridge.lock().waiters.is_empty());
        let_assert!(Some(Ok(message)) = live.next().await);
        check!(message.data == "wake");
    }

    #[tokio::test]
    async fn dropping_session_closes_standalone_bridge() {
        let (sink, session) = bridge();
        let cursor = session.stream();
        drop(session);
        check!(!sink.is_terminated());

        drop(cursor);
        assert!(sink.is_terminated());
        check!(sink.signal().reason() == Some(AbortReason::Cancelled));
    }

    /// Reports when its connect future is dropped.
    struct Hanging {
        started: Arc<tokio::sync::Notify>,
        dropped: Mutex<Option<oneshot::Sender<()>>>,
    }

    struct OnDrop(Option<oneshot::Sender<()>>);

    impl Drop for OnDrop {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    impl EventSource for Hanging {
        async fn connect(&self, request: Request, sink: EventSink) {
            let _on_drop = OnDrop(self.dropped.lock().unwrap_or_else(PoisonError::into_inner).take());
            sink.open(stream_head(200, "OK", HashMap::new(), Arc::new(request)));
            self.started.notify_one();
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_connection() {
        let started = Arc::new(tokio::sync::Notify::new());
        let (dropped_tx, mut dropped) = oneshot::channel();
        let source = Hanging {
            started: Arc::clone(&started),
            dropped: Mutex::new(Some(dropped_tx)),
        };

        let connecting = StreamConnector::new(source)
            .connect(Request::get("https://example.com/events").build())
            .expect("GET supported");
        let session = connecting.session().clone();
        started.notified().await;

        drop(connecting);
        tokio::task::yield_now().await;
        check!(dropped.try_recv().is_err());
        check!(!session.is_terminated());

        drop(session);
        let_assert!(Ok(Ok(())) = tokio::time::timeout(Duration::from_secs(1), dropped).await);
    }
}
