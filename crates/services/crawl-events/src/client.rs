//! HTTP transport for event streams.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName,
    HeaderValue,
};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::StreamConfig;
use crate::credentials::CredentialSnapshot;
use crate::error::{Result, StreamError};
use crate::event::StreamEvent;
use crate::request::StreamRequest;
use crate::subscription::{self, EndReason, EventReceiver, Subscription};

type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Most of an error response body kept for [`StreamError::UnexpectedStatus`].
pub const ERROR_BODY_LIMIT: usize = 4 * 1024;

/// Client that opens event streams against one origin.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    config: StreamConfig,
    base: Url,
    tenant_header: HeaderName,
}

impl StreamClient {
    /// Creates a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout());
        if let Some(ua) = config.user_agent() {
            builder = builder.user_agent(ua);
        }
        let http = builder.build()?;
        Self::from_parts(config, http)
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    ///
    /// The client must not carry a total request timeout, or long streams
    /// will be cut off.
    pub fn from_parts(config: StreamConfig, http: reqwest::Client) -> Result<Self> {
        let base = config.base()?;
        let tenant_header = HeaderName::from_bytes(config.tenant_header().trim().as_bytes())
            .map_err(|_| {
                StreamError::Config(format!(
                    "invalid tenant header name: {}",
                    config.tenant_header()
                ))
            })?;
        Ok(Self {
            http,
            config,
            base,
            tenant_header,
        })
    }

    /// Returns the client's configuration
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Resolve a request against the configured origin.
    pub fn resolve(&self, request: &StreamRequest) -> Result<Url> {
        request.resolve(&self.base)
    }

    /// Subscribe to a stream, invoking `on_event` per event and `on_end` once.
    ///
    /// Everything that can be checked without the network is checked here:
    /// URL resolution, header values and runtime availability. Connection
    /// and read failures are reported through `on_end`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<T, F, G>(
        &self,
        request: &StreamRequest,
        credentials: &CredentialSnapshot,
        on_event: F,
        on_end: G,
    ) -> Result<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(StreamEvent<T>) + Send + 'static,
        G: FnOnce(EndReason) + Send + 'static,
    {
        let connect = self.connect(request, credentials)?;
        subscription::spawn(connect, on_event, on_end)
    }

    /// Like [`subscribe`](Self::subscribe) without an end handler.
    pub fn subscribe_events<T, F>(
        &self,
        request: &StreamRequest,
        credentials: &CredentialSnapshot,
        on_event: F,
    ) -> Result<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(StreamEvent<T>) + Send + 'static,
    {
        self.subscribe(request, credentials, on_event, |_| {})
    }

    /// Subscribe and receive events through a channel.
    pub fn stream<T>(
        &self,
        request: &StreamRequest,
        credentials: &CredentialSnapshot,
    ) -> Result<EventReceiver<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let connect = self.connect(request, credentials)?;
        EventReceiver::spawn(connect)
    }

    /// Build the headers for one stream request.
    pub fn headers(&self, credentials: &CredentialSnapshot) -> Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        h.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credentials.token()))
            .map_err(|_| StreamError::Config("Invalid Authorization header".into()))?;
        auth.set_sensitive(true);
        h.insert(AUTHORIZATION, auth);

        if let Some(tenant) = credentials.tenant_id() {
            h.insert(
                self.tenant_header.clone(),
                HeaderValue::from_str(tenant)
                    .map_err(|_| StreamError::Config("Invalid tenant header value".into()))?,
            );
        }
        Ok(h)
    }

    fn connect(
        &self,
        request: &StreamRequest,
        credentials: &CredentialSnapshot,
    ) -> Result<BoxFuture<'static, Result<ByteStream>>> {
        let url = self.resolve(request)?;
        let headers = self.headers(credentials)?;
        let request = self.http.get(url.clone()).headers(headers);
        let body_timeout = self.config.connect_timeout();

        Ok(async move {
            tracing::debug!(path = url.path(), "opening event stream");
            let response = request.send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = tokio::time::timeout(body_timeout, error_body(response))
                    .await
                    .unwrap_or_default();
                return Err(StreamError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            if let Some(charset) = declared_charset(response.headers())
                && !charset.eq_ignore_ascii_case("utf-8")
                && !charset.eq_ignore_ascii_case("utf8")
            {
                tracing::warn!(
                    charset = %charset,
                    "event stream declares a non UTF-8 charset; decoding as UTF-8"
                );
            }

            Ok(response
                .bytes_stream()
                .map(|chunk| chunk.map_err(StreamError::from))
                .boxed())
        }
        .boxed())
    }
}

/// Reads at most [`ERROR_BODY_LIMIT`] bytes of a rejected response.
async fn error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();
    while let Some(Ok(chunk)) = chunks.next().await {
        let room = ERROR_BODY_LIMIT - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() == ERROR_BODY_LIMIT {
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// The `charset` parameter of the response `Content-Type`, if any.
fn declared_charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}
