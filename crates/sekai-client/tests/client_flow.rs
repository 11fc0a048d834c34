//! End-to-end tests of the session client and the pool recovery loop
//! against a local mock of the game API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sekai_core::config::ServerConfig;
use sekai_core::{SekaiError, ServerRegion};
use sekai_client::{SekaiClientManager, SekaiCryptor};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const KEY_HEX: &str = "00112233445566778899aabbccddeeff";
const IV_HEX: &str = "ffeeddccbbaa99887766554433221100";

#[derive(Clone)]
struct MockResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    /// Read the request but never answer, to force a client-side timeout.
    hang: bool,
}

impl MockResponse {
    fn envelope(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: "application/octet-stream",
            body,
            hang: false,
        }
    }

    fn hang() -> Self {
        Self {
            status: 0,
            content_type: "",
            body: Vec::new(),
            hang: true,
        }
    }
}

/// A minimal HTTP/1.1 server. Responses are queued per "METHOD path" key;
/// the last queued response repeats once the queue drains.
struct MockUpstream {
    addr: std::net::SocketAddr,
    routes: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<Mutex<HashMap<String, Vec<MockResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let routes_task = routes.clone();
        let log_task = log.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes_task.clone();
                let log = log_task.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, routes, log).await;
                });
            }
        });

        Self { addr, routes, log }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn enqueue(&self, method: &str, path: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{} {}", method, path))
            .or_default()
            .push(response);
    }

    fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    routes: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let path = target.split('?').next().unwrap_or_default().to_string();

    // Drain the body so the client finishes writing before we answer.
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    let mut body_read = buf.len() - (header_end + 4);
    while body_read < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    log.lock().unwrap().push(format!("{} {}", method, target));

    let response = {
        let mut routes = routes.lock().unwrap();
        let queue = routes.get_mut(&format!("{} {}", method, path));
        match queue {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap(),
            None => MockResponse {
                status: 404,
                content_type: "text/plain",
                body: b"no route".to_vec(),
                hang: false,
            },
        }
    };

    if response.hang {
        tokio::time::sleep(Duration::from_secs(30)).await;
        return Ok(());
    }

    let head = format!(
        "HTTP/1.1 {} OK\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        response.status,
        response.content_type,
        response.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await?;
    Ok(())
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn cryptor() -> SekaiCryptor {
    SekaiCryptor::from_hex(KEY_HEX, IV_HEX).unwrap()
}

fn packed_login_response() -> Vec<u8> {
    cryptor()
        .pack(&json!({
            "sessionToken": "session-1",
            "dataVersion": "3.9.0.10",
            "assetVersion": "3.9.0.20",
            "assetHash": "hash",
        }))
        .unwrap()
}

fn server_config(api_url: &str, dir: &std::path::Path, accounts: usize) -> ServerConfig {
    let account_dir = dir.join("accounts");
    std::fs::create_dir_all(&account_dir).unwrap();
    for i in 0..accounts {
        std::fs::write(
            account_dir.join(format!("account-{}.json", i)),
            format!(r#"{{"userId": {}, "credential": "secret-{}"}}"#, i + 1, i),
        )
        .unwrap();
    }
    let version_path = dir.join("version.json");
    std::fs::write(
        &version_path,
        r#"{"appVersion": "3.9.0", "appHash": "hash-1", "dataVersion": "3.9.0.10", "assetVersion": "3.9.0.20"}"#,
    )
    .unwrap();
    ServerConfig {
        enabled: true,
        api_url: api_url.to_string(),
        aes_key_hex: KEY_HEX.to_string(),
        aes_iv_hex: IV_HEX.to_string(),
        account_dir: account_dir.to_str().unwrap().to_string(),
        version_path: version_path.to_str().unwrap().to_string(),
        ..Default::default()
    }
}

async fn init_manager(
    upstream: &MockUpstream,
    dir: &std::path::Path,
    accounts: usize,
    config_tweak: impl FnOnce(&mut ServerConfig),
) -> SekaiClientManager {
    for i in 0..accounts {
        upstream.enqueue(
            "PUT",
            &format!("/api/user/{}/auth", i + 1),
            MockResponse::envelope(200, packed_login_response()),
        );
    }
    let mut config = server_config(&upstream.url(), dir, accounts);
    config_tweak(&mut config);
    let mut manager = SekaiClientManager::new(ServerRegion::Jp, config, None, None);
    manager.init().await.unwrap();
    manager
}

#[tokio::test]
async fn test_session_error_surfaces_after_internal_relogin() {
    let upstream = MockUpstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let manager = init_manager(&upstream, dir.path(), 1, |_| {}).await;
    let client = manager.get_client().unwrap();

    // First call hits a session error; the re-login succeeds, but the
    // original call still fails with the session error.
    upstream.enqueue(
        "GET",
        "/api/system",
        MockResponse::envelope(403, vec![0u8; 16]),
    );
    let payload = cryptor().pack(&json!({"ok": true})).unwrap();
    upstream.enqueue("GET", "/api/system", MockResponse::envelope(200, payload));

    let err = client.get("/system", None).await.unwrap_err();
    assert!(matches!(err, SekaiError::SessionExpired));

    // The caller-issued retry succeeds.
    let (value, status) = client.get("/system", None).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(value["ok"], true);

    let requests = upstream.requests();
    // init login, failing call, internal re-login, caller retry.
    assert_eq!(requests.len(), 4);
    assert!(requests[1].starts_with("GET /api/system"));
    assert!(requests[2].starts_with("PUT /api/user/1/auth"));
    assert!(requests[3].starts_with("GET /api/system"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_four_timeouts_exhaust_the_attempt_budget() {
    let upstream = MockUpstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let manager = init_manager(&upstream, dir.path(), 1, |config| {
        config.request_timeout_secs = 1;
    })
    .await;
    let client = manager.get_client().unwrap();

    upstream.enqueue("GET", "/api/system", MockResponse::hang());

    let started = Instant::now();
    let err = client.get("/system", None).await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, SekaiError::Timeout));

    let api_hits = upstream
        .requests()
        .iter()
        .filter(|r| r.starts_with("GET /api/system"))
        .count();
    assert_eq!(api_hits, 4);
    // 4 one-second timeouts with a one-second pause between attempts but
    // not after the last: at least 3s of pauses, and well under the bound
    // a fifth attempt or trailing pause would add.
    assert!(elapsed >= Duration::from_secs(6), "elapsed: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(12), "elapsed: {:?}", elapsed);
}

#[tokio::test]
async fn test_upgrade_required_reparses_version_once_then_retries() {
    let upstream = MockUpstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let manager = init_manager(&upstream, dir.path(), 1, |_| {}).await;

    // The version file advances on disk after init.
    std::fs::write(
        dir.path().join("version.json"),
        r#"{"appVersion": "9.9.9", "appHash": "hash-2", "dataVersion": "9.9.9.1", "assetVersion": "9.9.9.2"}"#,
    )
    .unwrap();

    upstream.enqueue(
        "GET",
        "/api/system",
        MockResponse::envelope(426, vec![0u8; 16]),
    );
    upstream.enqueue(
        "GET",
        "/api/system",
        MockResponse::envelope(200, cryptor().pack(&json!({"refreshed": true})).unwrap()),
    );

    let (value, status) = manager.get_game_api("/system", None).await;
    assert_eq!(status, 200);
    assert_eq!(value["refreshed"], true);

    // Exactly one retry happened after the pool-wide version re-parse...
    let api_hits = upstream
        .requests()
        .iter()
        .filter(|r| r.starts_with("GET /api/system"))
        .count();
    assert_eq!(api_hits, 2);
    // ...and the re-parse actually picked up the new version file.
    let client = manager.get_client().unwrap();
    assert_eq!(
        client.headers_snapshot().get("X-App-Version"),
        Some(&"9.9.9".to_string())
    );
}

#[tokio::test]
async fn test_maintenance_fails_fast_with_structured_payload() {
    let upstream = MockUpstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let manager = init_manager(&upstream, dir.path(), 1, |_| {}).await;

    upstream.enqueue(
        "GET",
        "/api/system",
        MockResponse::envelope(503, vec![0u8; 16]),
    );
    let (payload, status) = manager.get_game_api("/system", None).await;
    assert_eq!(status, 503);
    assert_eq!(payload["result"], "failed");
    assert_eq!(payload["status"], 503);

    // No retries for maintenance.
    let api_hits = upstream
        .requests()
        .iter()
        .filter(|r| r.starts_with("GET /api/system"))
        .count();
    assert_eq!(api_hits, 1);
}

#[tokio::test]
async fn test_round_robin_cycles_every_client_once_per_lap() {
    let upstream = MockUpstream::start().await;
    let dir = tempfile::tempdir().unwrap();
    let manager = init_manager(&upstream, dir.path(), 3, |_| {}).await;
    assert_eq!(manager.client_count(), 3);

    let mut first_lap: Vec<String> = (0..3)
        .map(|_| manager.get_client().unwrap().user_id())
        .collect();
    let mut second_lap: Vec<String> = (0..3)
        .map(|_| manager.get_client().unwrap().user_id())
        .collect();

    // Each lap visits each client exactly once, in the same cycle order.
    assert_eq!(first_lap, second_lap);
    first_lap.sort();
    second_lap.sort();
    assert_eq!(first_lap, vec!["1", "2", "3"]);
    assert_eq!(second_lap, vec!["1", "2", "3"]);
}
