use axum::http::{HeaderMap, HeaderName, header};

/// headers that never survive the relay. the upstream's own cors answers are
/// replaced by ours so the player's origin checks always pass, and the
/// hop-by-hop set belongs to the upstream connection, not the relayed one.
const STRIPPED_HEADERS: &[&str] = &[
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
    "access-control-allow-credentials",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

fn is_stripped(name: &HeaderName) -> bool {
    STRIPPED_HEADERS.contains(&name.as_str())
}

/// copy the upstream response headers minus the denylist. shared by the
/// movie/series relay and the segment relay so they can't drift apart.
pub fn filter_upstream_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();

    for (name, value) in upstream {
        if !is_stripped(name) {
            filtered.append(name.clone(), value.clone());
        }
    }

    filtered
}

/// permissive cors set, same values on every response the relay produces
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        "*".parse().expect("Static header value should parse"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        "GET, POST, OPTIONS"
            .parse()
            .expect("Static header value should parse"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "Content-Type, Authorization"
            .parse()
            .expect("Static header value should parse"),
    );
}
