//! HTTP request helpers for generated REST clients
//!
//! Builds request descriptors, runs them through a retrying fetch pipeline
//! with per-attempt cancellation, and parses server-sent event streams.
//!
//! ## Features
//!
//! - **Request builder**: path templates, query strings, JSON, form and multipart bodies
//! - **Mockable transports**: `HttpTransport` and `EventStreamTransport` traits, reqwest by default
//! - **Retries**: refused connections and DNS hiccups are retried with backoff
//! - **Cancellation**: a fresh abort token and optional timeout per attempt
//! - **Expected errors**: allow-listed statuses resolve instead of failing
//! - **Interceptors**: request and response hooks, global and per call
//!
//! ```no_run
//! use fetchkit_http::{fetch_helper, parameter_builder, FetchConfig, FetchOptions, Method};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::with_defaults()?;
//! let request = parameter_builder(Method::GET, "https://petstore.test", "/pets/{id}", &config)
//!     .path("id", 7)?
//!     .query("fields", vec!["name", "tag"])
//!     .build()?;
//!
//! let response = fetch_helper(&config, request, Some(FetchOptions::new().with_expect([404])), None).await?;
//! println!("{} {:?}", response.status, response.body);
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod client;
pub mod config;
pub mod error;
pub mod event_source;
pub mod fetch;
pub mod middleware;
pub mod multipart;
pub mod params;
pub mod types;

pub use abort::{add_timeout, AbortController, AbortControllerFactory, AbortSignal};
pub use client::{shared_transport, HttpTransport, ReqwestTransport};
pub use config::{FetchConfig, FetchOptions, HttpConfig};
pub use error::{CallSite, FetchError, HttpError, Result, TransportError, TransportErrorKind};
pub use event_source::{
    event_source_helper, EventListener, EventName, EventSource, EventStreamParser,
    EventStreamTransport, ListenerId, MessageEvent, ReqwestEventStreamTransport, StreamErrorEvent,
};
pub use fetch::{fetch_helper, CallController, FetchHandle};
pub use middleware::{retry_fn, AutoRetry, HttpInterceptor, OnRetry, RetryContext, RetryPolicy};
pub use multipart::{
    Blob, FormEntry, FormPart, FormValue, MultipartBody, MultipartForm, PartMetadata, PartOptions,
};
pub use params::{parameter_builder, ParamValue, ParameterBuilder};
pub use types::{
    CallSource, FetchRequest, FetchResponse, RequestBody, ResponseBody, ResponseType,
    TransportResponse,
};

/// Re-export commonly used types
pub use reqwest::{header, Method, StatusCode};
