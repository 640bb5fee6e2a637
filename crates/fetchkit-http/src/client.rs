//! HTTP transport implementation

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::{debug, trace};

use crate::{
    config::HttpConfig,
    error::{HttpError, Result, TransportError},
    multipart::reqwest_form,
    types::{FetchRequest, RequestBody, TransportResponse},
};

/// Mockable fetch-like transport
///
/// Implementations should fail with a [`TransportError`] of kind
/// `Aborted` once `request.signal` fires. Non-2xx statuses are not errors
/// at this level.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn fetch(&self, url: &str, request: FetchRequest) -> Result<TransportResponse>;
}

/// Production transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    config: HttpConfig,
}

impl ReqwestTransport {
    /// Create a new transport with configuration
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(if config.max_redirects > 0 {
                reqwest::redirect::Policy::limited(config.max_redirects)
            } else {
                reqwest::redirect::Policy::none()
            });

        // Configure proxy if provided
        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| HttpError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| HttpError::BuildError(e.to_string()))?;

        Ok(Self { inner, config })
    }

    /// Create transport with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpConfig::default())
    }

    /// Get underlying reqwest client (for advanced usage)
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Get configuration
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    async fn send(&self, url: url::Url, request: FetchRequest) -> Result<TransportResponse> {
        let response = request_builder(&self.inner, url, request)?
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        trace!("Received {} bytes with status {}", body.len(), status);

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, url: &str, mut request: FetchRequest) -> Result<TransportResponse> {
        let url = parse_url(url)?;
        debug!("HTTP {}: {}", request.method, url);

        let Some(signal) = request.signal.take() else {
            return self.send(url, request).await;
        };
        if signal.aborted() {
            return Err(TransportError::aborted().into());
        }
        tokio::select! {
            _ = signal.cancelled() => Err(TransportError::aborted().into()),
            result = self.send(url, request) => result,
        }
    }
}

pub(crate) fn parse_url(url: &str) -> Result<url::Url> {
    url.parse::<url::Url>()
        .map_err(|e| HttpError::InvalidUrl(e.to_string()))
}

/// Translate a request descriptor into a reqwest builder. The signal is not carried over.
pub(crate) fn request_builder(
    client: &reqwest::Client,
    url: url::Url,
    request: FetchRequest,
) -> Result<reqwest::RequestBuilder> {
    let mut builder = client.request(request.method, url);
    let multipart = matches!(request.body, Some(RequestBody::Multipart(_)));
    for (name, value) in &request.headers {
        // The form supplies its own boundary-bearing content type
        if multipart && name == "content-type" {
            continue;
        }
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| HttpError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| HttpError::InvalidHeader {
            name: name.clone(),
            message: e.to_string(),
        })?;
        builder = builder.header(header_name, header_value);
    }
    builder = match request.body {
        None => builder,
        Some(RequestBody::Text(text)) => builder.body(text),
        Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
        Some(RequestBody::Multipart(entries)) => builder.multipart(reqwest_form(&entries)?),
    };
    Ok(builder)
}

/// Create a shared transport (Arc-wrapped for cloning)
pub fn shared_transport(config: HttpConfig) -> Result<Arc<dyn HttpTransport>> {
    Ok(Arc::new(ReqwestTransport::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortController;
    use std::time::Duration;
    use crate::multipart::{Blob, FormEntry, FormPart, PartMetadata};
    use bytes::Bytes;
    use wiremock::{
        matchers::{body_string_contains, header, header_regex, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn test_transport_creation_with_defaults() {
        let transport = ReqwestTransport::with_defaults();
        assert!(transport.is_ok());
    }

    #[test]
    fn test_transport_with_proxy() {
        let config = HttpConfig::default().with_proxy("http://proxy.example.com:8080");
        assert!(ReqwestTransport::new(config).is_ok());
    }

    #[test]
    fn test_invalid_proxy() {
        let config = HttpConfig::default().with_proxy("ftp://proxy.example.com:21");

        let result = ReqwestTransport::new(config);
        assert!(matches!(result, Err(HttpError::InvalidProxy(_))));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let transport = ReqwestTransport::with_defaults().unwrap();
        let result = transport
            .fetch("not a url", FetchRequest::get("not a url"))
            .await;
        assert!(matches!(result, Err(HttpError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_fetch_sends_headers_and_returns_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pets/1"))
            .and(header("x-trace", "abc"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let url = format!("{}/pets/1", server.uri());
        let transport = ReqwestTransport::with_defaults().unwrap();
        let response = transport
            .fetch(&url, FetchRequest::get(&url).with_header("X-Trace", "abc"))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], b"missing");
    }

    #[tokio::test]
    async fn test_pre_aborted_signal_fails_fast() {
        let transport = ReqwestTransport::with_defaults().unwrap();
        let controller = AbortController::new();
        controller.abort();

        let mut request = FetchRequest::get("http://127.0.0.1:9/");
        request.signal = Some(controller.signal());
        let result = transport.fetch("http://127.0.0.1:9/", request).await;
        assert!(matches!(result, Err(ref e) if e.is_aborted()));
    }

    #[tokio::test]
    async fn test_abort_while_waiting_for_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::with_defaults().unwrap();
        let controller = AbortController::new();
        let mut request = FetchRequest::get(server.uri());
        request.signal = Some(controller.signal());

        let aborter = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            aborter.abort();
        });

        let result = transport.fetch(&server.uri(), request).await;
        assert!(matches!(result, Err(ref e) if e.is_aborted()));
    }

    #[tokio::test]
    async fn test_multipart_parts_are_encoded_per_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header_regex("content-type", "^multipart/form-data; boundary=.+"))
            .and(body_string_contains("name=\"note\"\r\n\r\nhello\r\n"))
            .and(body_string_contains(
                "name=\"avatar\"; filename=\"blob\"\r\nContent-Type: image/png\r\n\r\nPNG\r\n",
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;

        let url = format!("{}/upload", server.uri());
        let request = FetchRequest::new(reqwest::Method::POST, &url)
            .with_header("content-type", "text/plain")
            .with_body(RequestBody::Multipart(vec![
                FormEntry {
                    name: "note".to_string(),
                    part: FormPart::Text("hello".to_string()),
                    metadata: None,
                },
                FormEntry {
                    name: "avatar".to_string(),
                    part: FormPart::Blob(Blob::new(Bytes::from_static(b"PNG"), None)),
                    metadata: Some(PartMetadata::new().with_content_type("image/png")),
                },
            ]));

        // The same descriptor can be sent again, as a retry would
        let transport = ReqwestTransport::with_defaults().unwrap();
        for _ in 0..2 {
            let response = transport.fetch(&url, request.clone()).await.unwrap();
            assert_eq!(response.status, 201);
        }
    }
}
