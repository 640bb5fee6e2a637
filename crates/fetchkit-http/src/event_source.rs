//! Server-sent event streams
//!
//! [`EventStreamParser`] turns the growing text of a `text/event-stream`
//! body into message events. [`EventSource`] drives a parser from an
//! [`EventStreamTransport`] on a background task and fans the results out to
//! registered listeners.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{parse_url, request_builder, ReqwestTransport},
    config::{FetchConfig, FetchOptions},
    error::{HttpError, Result, TransportError},
    types::{is_success_status, CallSource, FetchRequest},
};

/// A complete event delivered to message listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub data: Value,
    pub origin: String,
    pub last_event_id: Option<String>,
    pub event_type: Option<String>,
}

/// Delivered to error listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorEvent {
    pub status: u16,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(MessageEvent),
    Error(StreamErrorEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    Message,
    Error,
    Close,
}

#[derive(Debug, Default)]
struct PendingEvent {
    data: Vec<String>,
    id: Option<String>,
    event_type: Option<String>,
}

/// Incremental `text/event-stream` parser
///
/// Every delivery carries the text received so far, minus whatever was
/// handed back through [`consume`](Self::consume). Only lines ending in a
/// newline are acted on; the read position never moves past a trailing
/// partial line.
#[derive(Debug)]
pub struct EventStreamParser {
    origin: String,
    position: usize,
    is_error: bool,
    status: u16,
    pending: PendingEvent,
}

impl EventStreamParser {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            position: 0,
            is_error: false,
            status: 0,
            pending: PendingEvent::default(),
        }
    }

    /// Record the response status; a non-2xx status switches to error mode
    pub fn on_headers(&mut self, status: u16) {
        self.status = status;
        self.is_error = !is_success_status(status);
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Bytes of the delivered text consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether the response status put the parser in error mode
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// The caller dropped `len` consumed bytes from the front of its buffer
    pub fn consume(&mut self, len: usize) {
        self.position = self.position.saturating_sub(len);
    }

    pub fn data_available(&mut self, text: &str, is_final: bool) -> Vec<StreamEvent> {
        if self.is_error {
            if !is_final {
                return Vec::new();
            }
            return vec![StreamEvent::Error(StreamErrorEvent {
                status: self.status,
                response: text.to_string(),
            })];
        }

        let mut events = Vec::new();
        let Some(unparsed) = text.get(self.position..) else {
            return events;
        };
        for line in unparsed.split_inclusive('\n') {
            let Some(complete) = line.strip_suffix('\n') else {
                break;
            };
            self.position += line.len();
            self.handle_line(complete.strip_suffix('\r').unwrap_or(complete), &mut events);
        }
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            if !pending.data.is_empty() {
                events.push(self.dispatch(pending));
            }
        } else if line.starts_with("event") {
            self.pending.event_type = Some(field_value(line).to_string());
        } else if line.starts_with("data") {
            self.pending.data.push(field_value(line).to_string());
        } else if line.starts_with("id:") {
            self.pending.id = Some(field_value(line).to_string());
        }
    }

    fn dispatch(&self, pending: PendingEvent) -> StreamEvent {
        let data = pending.data.join("\n");
        match serde_json::from_str(&data) {
            Ok(data) => StreamEvent::Message(MessageEvent {
                data,
                origin: self.origin.clone(),
                last_event_id: pending.id,
                event_type: pending.event_type,
            }),
            Err(err) => {
                debug!("Discarding event with invalid JSON data: {}", err);
                StreamEvent::Error(StreamErrorEvent {
                    status: self.status,
                    response: data,
                })
            }
        }
    }
}

fn field_value(line: &str) -> &str {
    line.split_once(':').map_or("", |(_, value)| value.trim())
}

/// Opened event stream: status plus the body as it arrives
pub struct EventStreamResponse {
    pub status: u16,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for EventStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Streaming transport used by [`EventSource`]
#[async_trait]
pub trait EventStreamTransport: Send + Sync {
    /// Send `request` and resolve once the response headers are in
    async fn open(&self, request: FetchRequest) -> Result<EventStreamResponse>;
}

#[derive(Debug, Clone)]
pub struct ReqwestEventStreamTransport {
    client: reqwest::Client,
}

impl ReqwestEventStreamTransport {
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::from_client(ReqwestTransport::with_defaults()?.inner().clone()))
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventStreamTransport for ReqwestEventStreamTransport {
    async fn open(&self, request: FetchRequest) -> Result<EventStreamResponse> {
        let url = parse_url(&request.url)?;
        let response = request_builder(&self.client, url, request)?
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| HttpError::from(TransportError::from_reqwest(&e))))
            .boxed();
        Ok(EventStreamResponse { status, chunks })
    }
}

/// Listener callback, tagged with the event it listens for
#[derive(Clone)]
pub enum EventListener {
    Message(Arc<dyn Fn(&MessageEvent) + Send + Sync>),
    Error(Arc<dyn Fn(&StreamErrorEvent) + Send + Sync>),
    Close(Arc<dyn Fn() + Send + Sync>),
}

impl EventListener {
    pub fn message(callback: impl Fn(&MessageEvent) + Send + Sync + 'static) -> Self {
        EventListener::Message(Arc::new(callback))
    }

    pub fn error(callback: impl Fn(&StreamErrorEvent) + Send + Sync + 'static) -> Self {
        EventListener::Error(Arc::new(callback))
    }

    pub fn close(callback: impl Fn() + Send + Sync + 'static) -> Self {
        EventListener::Close(Arc::new(callback))
    }

    pub fn name(&self) -> EventName {
        match self {
            EventListener::Message(_) => EventName::Message,
            EventListener::Error(_) => EventName::Error,
            EventListener::Close(_) => EventName::Close,
        }
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventListener").field(&self.name()).finish()
    }
}

/// Handle returned by [`EventSource::add_event_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, EventListener)>,
}

impl Listeners {
    fn snapshot(&self) -> Vec<EventListener> {
        self.entries.iter().map(|(_, listener)| listener.clone()).collect()
    }
}

type SharedListeners = Arc<Mutex<Listeners>>;

fn emit(listeners: &SharedListeners, event: &StreamEvent) {
    // Callbacks run outside the lock so they may add or remove listeners
    let snapshot = listeners.lock().snapshot();
    for listener in snapshot {
        match (&listener, event) {
            (EventListener::Message(callback), StreamEvent::Message(message)) => callback(message),
            (EventListener::Error(callback), StreamEvent::Error(error)) => callback(error),
            _ => {}
        }
    }
}

fn emit_close(listeners: &SharedListeners) {
    let snapshot = listeners.lock().snapshot();
    for listener in snapshot {
        if let EventListener::Close(callback) = listener {
            callback();
        }
    }
}

/// Long-lived event-stream connection
///
/// Nothing is sent until [`connect`](Self::connect); attach listeners first.
/// Must be connected from within a tokio runtime.
pub struct EventSource {
    transport: Arc<dyn EventStreamTransport>,
    request: FetchRequest,
    listeners: SharedListeners,
    active: Mutex<Option<CancellationToken>>,
}

impl EventSource {
    /// `accept: text/event-stream` and `cache-control: no-cache` are sent
    /// unless the request sets its own values.
    pub fn new(transport: Arc<dyn EventStreamTransport>, mut request: FetchRequest) -> Self {
        let mut headers = std::collections::BTreeMap::new();
        headers.insert("accept".to_string(), "text/event-stream".to_string());
        headers.insert("cache-control".to_string(), "no-cache".to_string());
        headers.append(&mut request.headers);
        request.headers = headers;
        request.signal = None;

        Self {
            transport,
            request,
            listeners: Arc::default(),
            active: Mutex::new(None),
        }
    }

    pub fn origin(&self) -> &str {
        &self.request.url
    }

    /// The request sent on every (re)connect
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    pub fn connect(&self) {
        self.retry();
    }

    /// Drop the current connection, if any, and open a new one with a fresh parser
    pub fn retry(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.active.lock().replace(token.clone()) {
            previous.cancel();
        }
        debug!("Opening event stream: {} {}", self.request.method, self.request.url);
        tokio::spawn(drive(
            self.transport.clone(),
            self.request.clone(),
            self.listeners.clone(),
            token,
        ));
    }

    /// Abort the underlying transport. Close listeners are not notified.
    pub fn close(&self) {
        if let Some(token) = self.active.lock().take() {
            debug!("Closing event stream: {}", self.request.url);
            token.cancel();
        }
    }

    pub fn add_event_listener(&self, listener: EventListener) -> ListenerId {
        let mut listeners = self.listeners.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, listener));
        id
    }

    /// Returns whether a listener was removed
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.lock().entries.clear();
    }

    pub fn listener_count(&self, name: EventName) -> usize {
        self.listeners
            .lock()
            .entries
            .iter()
            .filter(|(_, listener)| listener.name() == name)
            .count()
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("request", &self.request)
            .field("listeners", &self.listeners.lock().entries.len())
            .field("connected", &self.active.lock().is_some())
            .finish()
    }
}

/// Raw body bytes the parser has not consumed yet
#[derive(Debug, Default)]
struct StreamBuffer {
    received: Vec<u8>,
}

impl StreamBuffer {
    fn feed(
        &mut self,
        parser: &mut EventStreamParser,
        bytes: &[u8],
        is_final: bool,
    ) -> Vec<StreamEvent> {
        self.received.extend_from_slice(bytes);
        let events = parser.data_available(&String::from_utf8_lossy(&self.received), is_final);

        // An error body is reported whole once the stream ends
        if !parser.is_error() {
            // The parser consumes exactly up to the last newline
            if let Some(last) = self.received.iter().rposition(|byte| *byte == b'\n') {
                self.received.drain(..=last);
                parser.consume(parser.position());
            }
        }
        events
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.received).into_owned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.received.len()
    }
}

async fn drive(
    transport: Arc<dyn EventStreamTransport>,
    request: FetchRequest,
    listeners: SharedListeners,
    token: CancellationToken,
) {
    let mut parser = EventStreamParser::new(request.url.clone());
    let opened = tokio::select! {
        _ = token.cancelled() => return,
        opened = transport.open(request) => opened,
    };
    let mut response = match opened {
        Ok(response) => response,
        Err(err) => {
            warn!("Event stream failed to open: {}", err);
            emit(
                &listeners,
                &StreamEvent::Error(StreamErrorEvent {
                    status: 0,
                    response: String::new(),
                }),
            );
            return;
        }
    };
    parser.on_headers(response.status);

    let mut buffer = StreamBuffer::default();
    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => return,
            chunk = response.chunks.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for event in buffer.feed(&mut parser, &bytes, false) {
                    emit(&listeners, &event);
                }
            }
            Some(Err(err)) => {
                warn!("Event stream transport error: {}", err);
                emit(
                    &listeners,
                    &StreamEvent::Error(StreamErrorEvent {
                        status: parser.status(),
                        response: buffer.text(),
                    }),
                );
                return;
            }
            None => break,
        }
    }

    for event in buffer.feed(&mut parser, &[], true) {
        emit(&listeners, &event);
    }
    debug!("Event stream ended with status {}", parser.status());
    emit_close(&listeners);
}

/// Run the request interceptors, then prepare an [`EventSource`] for `request`
///
/// The returned source is not connected yet.
pub async fn event_source_helper(
    config: &FetchConfig,
    mut request: FetchRequest,
    options: Option<FetchOptions>,
    source: Option<CallSource>,
) -> Result<EventSource> {
    let transport = config
        .event_source
        .clone()
        .ok_or(HttpError::EventSourceUnavailable)?;
    let call_interceptors = options.map(|options| options.interceptors).unwrap_or_default();
    for interceptor in config.interceptors.iter().chain(call_interceptors.iter()) {
        interceptor.on_request(&mut request, source.as_ref()).await?;
    }
    Ok(EventSource::new(transport, request))
}
