use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode, header};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, error, warn};
use url::Url;

use crate::server::error::{AppResult, Error};

/// fixed profile sent on every upstream request. origins gate on the player
/// identity, so the inbound client's own headers are never forwarded and a
/// caller may add headers but never replace these three.
const UPSTREAM_USER_AGENT: &str = "VLC/3.0.11 LibVLC/3.0.11";
const UPSTREAM_ACCEPT: &str = "*/*";
const UPSTREAM_CONNECTION: &str = "keep-alive";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_REDIRECTS: usize = 5;

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

/// fully buffered upstream exchange, used where the body has to be parsed
/// (playlists, metadata)
pub struct BufferedUpstream {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// the URL that actually answered, after any redirect hops
    pub final_url: String,
    pub bytes: Bytes,
}

/// streamed upstream exchange for media relay, body is piped chunk by chunk
pub struct StreamedUpstream {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

/// convenience result for metadata calls, json parsed when possible
#[derive(Debug, serde::Serialize)]
pub struct FetchedData {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub data: serde_json::Value,
}

#[async_trait::async_trait]
pub trait UpstreamServiceTrait {
    /// GET with the fixed header profile, redirects followed, body buffered
    async fn fetch_buffered(&self, url: &str) -> AppResult<BufferedUpstream>;

    /// GET with the fixed header profile, redirects followed, body exposed as
    /// a byte stream so long media payloads never sit in memory
    async fn fetch_stream(&self, url: &str) -> AppResult<StreamedUpstream>;

    /// metadata retrieval for the player UI. same profile and redirect logic,
    /// response parsed as json when the content type says so and it parses
    async fn fetch_data(
        &self,
        url: &str,
        extra_headers: Option<HeaderMap>,
    ) -> AppResult<FetchedData>;
}

pub struct UpstreamService {
    http: reqwest::Client,
    timeout: Duration,
    max_redirects: usize,
}

impl Default for UpstreamService {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_MAX_REDIRECTS,
        )
    }
}

impl UpstreamService {
    pub fn new(timeout: Duration, max_redirects: usize) -> Self {
        // redirects are followed by hand below so that relative Location
        // values resolve against the current url and the hop bound is ours.
        // read_timeout is idle time between chunks, so a transfer that stalls
        // mid-body gets torn down while a healthy long-lived stream that keeps
        // delivering is left alone.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .read_timeout(timeout)
            .build()
            .expect("Static client config should build");

        Self {
            http,
            timeout,
            max_redirects,
        }
    }

    fn apply_profile(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(header::USER_AGENT, UPSTREAM_USER_AGENT)
            .header(header::ACCEPT, UPSTREAM_ACCEPT)
            .header(header::CONNECTION, UPSTREAM_CONNECTION)
    }

    fn map_send_error(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::UpstreamTimeout
        } else {
            Error::UpstreamConnection(e.to_string())
        }
    }

    /// bounded redirect loop. every hop gets its own timeout, a 3xx without
    /// Location is handed back as a normal response, and blowing the hop
    /// bound is its own failure so the player never sees a raw 3xx.
    async fn request_with_redirects(
        &self,
        url: &str,
        extra_headers: Option<&HeaderMap>,
    ) -> AppResult<(reqwest::Response, Url)> {
        let mut current = Url::parse(url)
            .map_err(|e| Error::BadRequest(format!("Invalid upstream URL: {}", e)))?;
        let mut remaining = self.max_redirects;

        loop {
            let mut request = self.http.get(current.clone());

            // caller extras go first, the profile is applied on top so
            // User-Agent/Accept/Connection always win
            if let Some(extras) = extra_headers {
                for (name, value) in extras {
                    if name != &header::USER_AGENT
                        && name != &header::ACCEPT
                        && name != &header::CONNECTION
                    {
                        request = request.header(name, value.clone());
                    }
                }
            }
            let request = self.apply_profile(request);

            let response = tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| {
                    error!("Upstream request timed out: {}", current);
                    Error::UpstreamTimeout
                })?
                .map_err(|e| {
                    error!("Upstream request failed: {} - {}", e, current);
                    Self::map_send_error(e)
                })?;

            debug!("Upstream response: {} - {}", response.status(), current);

            if response.status().is_redirection() {
                if let Some(location) = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    if remaining == 0 {
                        error!("Redirect bound exhausted at {}", current);
                        return Err(Error::RedirectLoop);
                    }
                    remaining -= 1;

                    // Location can be absolute or relative, join handles both
                    let next = current.join(location).map_err(|e| {
                        warn!("Unresolvable redirect '{}': {}", location, e);
                        Error::UpstreamConnection(format!("Invalid redirect target: {}", e))
                    })?;

                    debug!("Redirect: {} -> {}", current, next);
                    current = next;
                    continue;
                }
            }

            return Ok((response, current));
        }
    }
}

#[async_trait::async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch_buffered(&self, url: &str) -> AppResult<BufferedUpstream> {
        let (response, final_url) = self.request_with_redirects(url, None).await?;

        let status = response.status();
        let headers = response.headers().clone();

        // reading the body counts against the same budget as the request
        let bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| {
                error!("Timed out reading upstream body: {}", final_url);
                Error::UpstreamTimeout
            })?
            .map_err(|e| {
                error!("Failed to read upstream body: {} - {}", e, final_url);
                Self::map_send_error(e)
            })?;

        debug!("Buffered {} bytes from {}", bytes.len(), final_url);

        Ok(BufferedUpstream {
            status,
            headers,
            final_url: final_url.to_string(),
            bytes,
        })
    }

    async fn fetch_stream(&self, url: &str) -> AppResult<StreamedUpstream> {
        let (response, final_url) = self.request_with_redirects(url, None).await?;

        let status = response.status();
        let headers = response.headers().clone();

        debug!("Streaming upstream body from {}", final_url);

        // no whole-body deadline, live segments can legitimately outlive the
        // request timeout. a transfer that stops delivering is cut by the
        // client's per-chunk read timeout, client disconnect drops the stream
        // and with it the upstream connection.
        Ok(StreamedUpstream {
            status,
            headers,
            body: response.bytes_stream().boxed(),
        })
    }

    async fn fetch_data(
        &self,
        url: &str,
        extra_headers: Option<HeaderMap>,
    ) -> AppResult<FetchedData> {
        let (response, final_url) = self
            .request_with_redirects(url, extra_headers.as_ref())
            .await?;

        let status = response.status();
        let header_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let is_json = header_map
            .get("content-type")
            .is_some_and(|ct| ct.contains("application/json"));

        let text = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| Error::UpstreamTimeout)?
            .map_err(|e| {
                error!("Failed to read data response: {} - {}", e, final_url);
                Self::map_send_error(e)
            })?;

        let data = if is_json {
            serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Failed to parse JSON, returning raw data: {}", e);
                serde_json::Value::String(text)
            })
        } else {
            serde_json::Value::String(text)
        };

        Ok(FetchedData {
            status: status.as_u16(),
            headers: header_map,
            data,
        })
    }
}
