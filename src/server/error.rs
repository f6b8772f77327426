use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::server::utils::header_utils;

pub type AppResult<T> = Result<T, Error>;

/// every failure a relay request can hit, mapped onto the status the player
/// sees. none of these are allowed to take the server down.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // socket / dns / connect level failure talking to the origin
    #[error("Stream error: {0}")]
    UpstreamConnection(String),

    // a request or one of its redirect hops blew the time budget
    #[error("Stream timeout")]
    UpstreamTimeout,

    // redirect chain exceeded the hop bound, deliberately not a 3xx
    #[error("Too many redirects")]
    RedirectLoop,

    // segment request without a resolvable url parameter
    #[error("Target URL not found")]
    MissingTarget,

    // origin answered the playlist fetch with a non-success status
    #[error("Playlist error: HTTP {0}")]
    PlaylistFetch(StatusCode),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UpstreamConnection(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::RedirectLoop => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingTarget => StatusCode::BAD_REQUEST,
            Self::PlaylistFetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InternalServerErrorWithContext(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_string();

        // error responses carry the permissive cors set too, otherwise the
        // player only ever sees an opaque cors failure instead of the status
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            "text/plain"
                .parse()
                .expect("Static header value should parse"),
        );
        header_utils::apply_cors(&mut headers);

        (status, headers, body).into_response()
    }
}
