use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::server::{
    error::{AppResult, Error},
    services::{
        playlist_services::PlaylistRewriter,
        session_services::{ContentKind, SessionContext},
    },
    utils::header_utils,
};

pub struct RelayController;

impl RelayController {
    /// one router per session. a single fallback dispatcher because routing
    /// depends on the session kind, not just the path: movie/series sessions
    /// relay the target on every path they're asked for.
    pub fn app(ctx: Arc<SessionContext>) -> Router {
        Router::new()
            .fallback(Self::dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(ctx)
    }

    async fn dispatch(
        State(ctx): State<Arc<SessionContext>>,
        method: Method,
        uri: Uri,
    ) -> AppResult<Response> {
        // preflights are answered locally, the origin never sees them
        if method == Method::OPTIONS {
            return Ok(Self::preflight());
        }

        debug!("Relay request: {} {}", method, uri);

        match ctx.kind {
            // movies and series are plain file URLs, every path is a direct
            // byte relay of the session target
            ContentKind::Movie | ContentKind::Series => {
                Self::relay(&ctx, ctx.target_url.clone()).await
            }
            ContentKind::Live => {
                if uri.path() == "/segment" {
                    let target = Self::segment_target(&uri).ok_or_else(|| {
                        error!("Segment request without target URL");
                        Error::MissingTarget
                    })?;
                    Self::relay(&ctx, target).await
                } else {
                    Self::playlist(&ctx).await
                }
            }
        }
    }

    /// pulls the percent-decoded `url` parameter out of a segment request
    fn segment_target(uri: &Uri) -> Option<String> {
        uri.query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(name, _)| name == "url")
                .map(|(_, value)| value.into_owned())
                .filter(|url| !url.trim().is_empty())
        })
    }

    fn preflight() -> Response {
        let mut headers = HeaderMap::new();
        header_utils::apply_cors(&mut headers);
        (StatusCode::OK, headers).into_response()
    }

    /// direct byte relay: upstream status and headers pass through minus the
    /// denylist, body is piped without buffering. shared by movie/series
    /// sessions and live segment requests.
    async fn relay(ctx: &SessionContext, target_url: String) -> AppResult<Response> {
        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(Error::BadRequest("Invalid URL format".to_string()));
        }

        let upstream = ctx.upstream.fetch_stream(&target_url).await?;

        let mut headers = header_utils::filter_upstream_headers(&upstream.headers);
        header_utils::apply_cors(&mut headers);

        // stopping the session cuts every in-flight relay short; a client
        // that walks away drops the stream and the upstream request with it
        let cancelled = ctx.cancel.clone().cancelled_owned();
        let body = Body::from_stream(
            upstream
                .body
                .take_until(Box::pin(cancelled))
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );

        Ok((upstream.status, headers, body).into_response())
    }

    /// live playlist request: buffered fetch of the session target, rewrite
    /// every segment reference to route back through /segment, serve fresh on
    /// every call (no caching, live playlists change constantly)
    async fn playlist(ctx: &SessionContext) -> AppResult<Response> {
        let upstream = ctx.upstream.fetch_buffered(&ctx.target_url).await?;

        if !upstream.status.is_success() {
            error!(
                "Playlist fetch returned non-success status: {}",
                upstream.status
            );
            return Err(Error::PlaylistFetch(upstream.status));
        }

        let text = String::from_utf8(upstream.bytes.to_vec()).map_err(|e| {
            error!("Playlist is not valid UTF-8: {}", e);
            Error::InternalServerErrorWithContext("Playlist is not valid UTF-8".to_string())
        })?;

        debug!("Processing playlist ({} chars)", text.len());

        // resolve relative segments against where the playlist actually came
        // from, which can differ from the session target after redirects
        let rewritten = PlaylistRewriter::rewrite(&text, &upstream.final_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/vnd.apple.mpegurl"
                .parse()
                .expect("Static header value should parse"),
        );
        headers.insert(
            header::CACHE_CONTROL,
            "no-cache"
                .parse()
                .expect("Static header value should parse"),
        );
        header_utils::apply_cors(&mut headers);

        Ok((StatusCode::OK, headers, rewritten).into_response())
    }
}
