//! HTTP client error types

use std::{
    backtrace::Backtrace,
    fmt,
    io,
    panic::Location,
    sync::Arc,
};

use thiserror::Error;

use crate::types::{FetchResponse, ResponseBody, ResponseType};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// Low-level reason a transport attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The remote host refused the connection
    ConnectionRefused,
    /// Name resolution failed temporarily
    DnsUnavailable,
    /// The attempt's abort signal fired (caller abort or timeout)
    Aborted,
    /// Anything else the transport reported
    Other,
}

impl TransportErrorKind {
    /// POSIX-style error code for the failure, when there is one
    pub fn errno(&self) -> Option<&'static str> {
        match self {
            TransportErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            TransportErrorKind::DnsUnavailable => Some("EAI_AGAIN"),
            TransportErrorKind::Aborted | TransportErrorKind::Other => None,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::DnsUnavailable => "dns unavailable",
            TransportErrorKind::Aborted => "aborted",
            TransportErrorKind::Other => "transport",
        };
        write!(f, "{label}")
    }
}

/// Network-level failure of a single attempt
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(TransportErrorKind::Aborted, "The operation was aborted")
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ConnectionRefused, message)
    }

    pub fn dns_unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::DnsUnavailable, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    pub fn errno(&self) -> Option<&'static str> {
        self.kind.errno()
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == TransportErrorKind::Aborted
    }

    /// Classify a reqwest failure by walking its source chain
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = err.to_string();
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(current) = source {
            if let Some(io_err) = current.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::ConnectionRefused {
                    return Self::connection_refused(message);
                }
            }
            let text = current.to_string().to_lowercase();
            if text.contains("temporary failure in name resolution")
                || text.contains("eai_again")
            {
                return Self::dns_unavailable(message);
            }
            source = current.source();
        }
        Self::other(message)
    }
}

/// HTTP client errors
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// `path()` named a placeholder the URL does not contain
    #[error("Parameter {0} is not a path parameter")]
    NotAPathParameter(String),

    /// The URL still had an unfilled placeholder at build time
    #[error("Missing path parameter: {0}")]
    MissingPathParameter(String),

    /// No multipart body constructor is configured
    #[error("FormData is not available. Provide a multipart body constructor in the config")]
    FormDataUnavailable,

    /// No event-stream transport is configured
    #[error("EventSource is not available. Provide an event stream transport in the config")]
    EventSourceUnavailable,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Header name or value rejected by the transport
    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// Request body could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Network request failed
    #[error("Network request failed: {0}")]
    Transport(#[from] TransportError),

    /// HTTP error status
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        response: Box<FetchResponse>,
    },

    /// Response body did not match its declared content type
    #[error("Failed to decode response body: {0}")]
    Decode(String),

    /// A request or response interceptor failed
    #[error("Interceptor failed: {0}")]
    Interceptor(String),

    /// Invalid proxy configuration
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    /// Client build error
    #[error("Failed to build HTTP client: {0}")]
    BuildError(String),
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::Serialization(err.to_string())
    }
}

impl HttpError {
    /// Check if the default retry policy may retry this error
    pub fn is_retryable_network(&self) -> bool {
        matches!(
            self.transport_kind(),
            Some(TransportErrorKind::ConnectionRefused | TransportErrorKind::DnsUnavailable)
        )
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            HttpError::Transport(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.transport_kind() == Some(TransportErrorKind::Aborted)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        self.response().map(|response| &response.body)
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            HttpError::HttpStatus { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Location and stack captured where a logical call was issued
#[derive(Debug, Clone)]
pub struct CallSite {
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl CallSite {
    #[track_caller]
    pub fn capture() -> Self {
        Self {
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Populated only when backtraces are enabled (`RUST_BACKTRACE`)
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.location.file(),
            self.location.line(),
            self.location.column()
        )
    }
}

/// Terminal failure of a logical call
///
/// Wraps the error that ended the last attempt together with how many
/// retries were made and where the call was issued from.
#[derive(Debug, Clone, Error)]
#[error("{source}")]
pub struct FetchError {
    source: HttpError,
    retried: Option<u32>,
    original_stack: CallSite,
}

impl FetchError {
    pub(crate) fn new(source: HttpError, retried: u32, original_stack: CallSite) -> Self {
        Self {
            source,
            retried: (retried > 0).then_some(retried),
            original_stack,
        }
    }

    pub fn kind(&self) -> &HttpError {
        &self.source
    }

    pub fn into_inner(self) -> HttpError {
        self.source
    }

    pub fn response_type(&self) -> ResponseType {
        ResponseType::Error
    }

    pub fn status(&self) -> Option<u16> {
        self.source.status()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.source.status()
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        self.source.body()
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        self.source.response()
    }

    /// Number of retries made before giving up, if any were
    pub fn retried(&self) -> Option<u32> {
        self.retried
    }

    pub fn original_stack(&self) -> &CallSite {
        &self.original_stack
    }

    pub fn is_aborted(&self) -> bool {
        self.source.is_aborted()
    }

    pub fn errno(&self) -> Option<&'static str> {
        self.source.transport_kind().and_then(|kind| kind.errno())
    }
}
