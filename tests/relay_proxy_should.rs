use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stream_relay::{ContentKind, DynUpstreamService, SessionManager, UpstreamService};

const PLAYLIST: &str = "#EXTM3U\n#EXTINF:10,\nseg1.ts\nhttp://cdn.example/seg2.ts\n";

/// small fake IPTV origin to relay against
async fn spawn_origin() -> String {
    let app = Router::new()
        .route(
            "/live/list.m3u8",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
                    PLAYLIST,
                )
            }),
        )
        .route(
            "/live/seg1.ts",
            get(|| async {
                (
                    [
                        (header::CONTENT_TYPE, "video/mp2t"),
                        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "https://origin.example"),
                    ],
                    &b"TSDATA1"[..],
                )
            }),
        )
        .route("/movie.mp4", get(|| async { &b"MOVIEBYTES"[..] }))
        .route(
            "/redirect",
            get(|| async {
                (StatusCode::FOUND, [(header::LOCATION, "/movie.mp4")]).into_response()
            }),
        )
        .route(
            "/loop",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/loop")]).into_response() }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "gone").into_response() }),
        )
        .route(
            "/echo-headers.json",
            get(|headers: HeaderMap| async move {
                let seen = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    serde_json::json!({
                        "ua": seen("user-agent"),
                        "accept": seen("accept"),
                        "token": seen("x-player-token"),
                        "custom": seen("x-custom"),
                    })
                    .to_string(),
                )
            }),
        )
        .route(
            "/meta.json",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"name":"chan","id":7}"#,
                )
            }),
        )
        .route(
            "/broken.json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{not json") }),
        );

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://127.0.0.1:{}", addr.port())
}

fn manager_with_timeout(timeout: Duration) -> SessionManager {
    SessionManager::new(Arc::new(UpstreamService::new(timeout, 5)) as DynUpstreamService)
}

fn manager() -> SessionManager {
    manager_with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn serve_a_rewritten_playlist_and_relay_its_segments() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/live/list.m3u8", origin), ContentKind::Live)
        .await
        .unwrap();

    let client = reqwest::Client::new();

    let playlist_response = client.get(&base_url).send().await.unwrap();
    assert_eq!(playlist_response.status(), StatusCode::OK);
    assert_eq!(
        playlist_response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap(),
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(
        playlist_response
            .headers()
            .get(header::CACHE_CONTROL)
            .unwrap(),
        "no-cache"
    );

    let seg1_url = format!("{}/live/seg1.ts", origin);
    let expected = format!(
        "#EXTM3U\n#EXTINF:10,\n/segment?url={}\n/segment?url={}\n",
        urlencoding::encode(&seg1_url),
        urlencoding::encode("http://cdn.example/seg2.ts")
    );
    assert_eq!(playlist_response.text().await.unwrap(), expected);

    // follow the first rewritten reference back through the relay
    let segment_response = client
        .get(format!(
            "{}/segment?url={}",
            base_url,
            urlencoding::encode(&seg1_url)
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(segment_response.status(), StatusCode::OK);
    assert_eq!(
        segment_response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert_eq!(segment_response.bytes().await.unwrap(), &b"TSDATA1"[..]);

    sessions.stop_session().await;
}

#[tokio::test]
async fn relay_movie_sessions_on_any_path() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/movie.mp4", origin), ContentKind::Movie)
        .await
        .unwrap();

    let client = reqwest::Client::new();

    for path in ["", "/", "/anything/at/all"] {
        let response = client
            .get(format!("{}{}", base_url, path))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap(), &b"MOVIEBYTES"[..]);
    }

    sessions.stop_session().await;
}

#[tokio::test]
async fn answer_preflights_locally() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/movie.mp4", origin), ContentKind::Movie)
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, &base_url)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert!(response.bytes().await.unwrap().is_empty());

    sessions.stop_session().await;
}

#[tokio::test]
async fn follow_relative_redirects_transparently() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/redirect", origin), ContentKind::Movie)
        .await
        .unwrap();

    let response = reqwest::get(&base_url).await.unwrap();

    // the player never sees the 302, only the followed bytes
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap(), &b"MOVIEBYTES"[..]);

    sessions.stop_session().await;
}

#[tokio::test]
async fn fail_redirect_loops_instead_of_returning_a_3xx() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/loop", origin), ContentKind::Movie)
        .await
        .unwrap();

    let response = reqwest::get(&base_url).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        response
            .text()
            .await
            .unwrap()
            .contains("Too many redirects")
    );

    sessions.stop_session().await;
}

#[tokio::test]
async fn answer_502_when_the_origin_refuses_connections() {
    // grab a port that is guaranteed free, then drop the listener
    let dead = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let sessions = manager();
    let base_url = sessions
        .start_session(
            &format!("http://127.0.0.1:{}/movie.mp4", dead_port),
            ContentKind::Movie,
        )
        .await
        .unwrap();

    let response = reqwest::get(&base_url).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    sessions.stop_session().await;
}

#[tokio::test]
async fn answer_504_when_the_origin_hangs_past_the_timeout() {
    // accepts and then sits on the socket without answering
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let hang_port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    let sessions = manager_with_timeout(Duration::from_millis(250));
    let base_url = sessions
        .start_session(
            &format!("http://127.0.0.1:{}/slow.ts", hang_port),
            ContentKind::Movie,
        )
        .await
        .unwrap();

    let response = reqwest::get(&base_url).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    sessions.stop_session().await;
}

#[tokio::test]
async fn impersonate_the_player_upstream_and_drop_client_headers() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/echo-headers.json", origin), ContentKind::Movie)
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .get(&base_url)
        .header(header::USER_AGENT, "Mozilla/5.0")
        .header("x-player-token", "secret")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen: serde_json::Value = response.json().await.unwrap();

    // the origin only ever sees the player identity, never the client's own
    // headers
    assert_eq!(seen["ua"], "VLC/3.0.11 LibVLC/3.0.11");
    assert_eq!(seen["accept"], "*/*");
    assert_eq!(seen["token"], "");

    sessions.stop_session().await;
}

#[tokio::test]
async fn let_fetch_data_extras_add_but_never_replace_the_profile() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let mut extras = HeaderMap::new();
    extras.insert(header::USER_AGENT, "Mozilla/5.0".parse().unwrap());
    extras.insert(header::ACCEPT, "text/html".parse().unwrap());
    extras.insert("x-custom", "extra-value".parse().unwrap());

    let fetched = sessions
        .fetch_data(&format!("{}/echo-headers.json", origin), Some(extras))
        .await
        .unwrap();

    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.data["ua"], "VLC/3.0.11 LibVLC/3.0.11");
    assert_eq!(fetched.data["accept"], "*/*");
    assert_eq!(fetched.data["custom"], "extra-value");
}

#[tokio::test]
async fn parse_fetched_data_as_json_when_the_content_type_says_so() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let fetched = sessions
        .fetch_data(&format!("{}/meta.json", origin), None)
        .await
        .unwrap();

    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.data["name"], "chan");
    assert_eq!(fetched.data["id"], 7);
    assert!(
        fetched
            .headers
            .get("content-type")
            .unwrap()
            .contains("application/json")
    );
}

#[tokio::test]
async fn hand_back_non_json_data_as_raw_text() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let fetched = sessions
        .fetch_data(&format!("{}/live/list.m3u8", origin), None)
        .await
        .unwrap();

    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.data, serde_json::Value::String(PLAYLIST.to_string()));
}

#[tokio::test]
async fn fall_back_to_raw_text_when_json_parsing_fails() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let fetched = sessions
        .fetch_data(&format!("{}/broken.json", origin), None)
        .await
        .unwrap();

    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.data, serde_json::Value::String("{not json".to_string()));
}

#[tokio::test]
async fn cut_relays_short_when_the_origin_stalls_mid_body() {
    // sends headers and one chunk, then goes silent without closing
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let stall_port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 65536\r\n\r\nFIRSTCHUNK")
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    let sessions = manager_with_timeout(Duration::from_millis(250));
    let base_url = sessions
        .start_session(
            &format!("http://127.0.0.1:{}/stall.ts", stall_port),
            ContentKind::Movie,
        )
        .await
        .unwrap();

    let response = reqwest::get(&base_url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // the relayed body must terminate once the origin stops delivering
    // instead of holding the player forever
    let body = tokio::time::timeout(Duration::from_secs(5), response.bytes())
        .await
        .expect("stalled relay was never cut off");
    assert!(body.is_err());

    sessions.stop_session().await;
}

#[tokio::test]
async fn surface_playlist_fetch_failures_with_the_upstream_status() {
    let origin = spawn_origin().await;
    let sessions = manager();

    let base_url = sessions
        .start_session(&format!("{}/missing", origin), ContentKind::Live)
        .await
        .unwrap();

    let response = reqwest::get(&base_url).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().await.unwrap().contains("404"));

    sessions.stop_session().await;
}
