//! End-to-end tests over the assembled gateway router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::ServiceExt;

use common::audit::{AuditLogger, AuditSink, DedupCache};
use common::identity::{PathMeta, Role, Sharing, User};
use service::memory::{MemoryDirectory, MemoryStorage};
use service::state::Stores;
use service::{Config, GateState};

const MASTER_TOKEN: &str = "master-token-for-tests";
const CHROME: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";

struct CollectingSink(Mutex<Vec<String>>);

impl AuditSink for CollectingSink {
    fn write_line(&self, line: &str) {
        self.0.lock().push(line.to_string());
    }
}

struct TestGateway {
    router: Router,
    state: GateState,
    lines: Arc<CollectingSink>,
}

impl TestGateway {
    fn audit_lines(&self) -> Vec<String> {
        self.lines.0.lock().clone()
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

fn gateway(configure: impl FnOnce(&MemoryDirectory, &MemoryStorage)) -> TestGateway {
    let directory = Arc::new(MemoryDirectory::new());
    directory.put_user(User {
        username: "alice".to_string(),
        role: Role::User,
        disabled: false,
        pwd_epoch: 7,
    });
    let storage = Arc::new(MemoryStorage::new());
    configure(&directory, &storage);

    let config = Config {
        api_token: MASTER_TOKEN.to_string(),
        ..Config::default()
    };
    let stores = Stores {
        users: directory.clone(),
        metas: directory.clone(),
        sharings: directory,
        storage,
    };
    let lines = Arc::new(CollectingSink(Mutex::new(Vec::new())));
    let audit = Arc::new(AuditLogger::with_sink(DedupCache::new(), lines.clone()));
    let state = GateState::from_config(&config, stores)
        .unwrap()
        .with_audit_logger(audit);
    TestGateway {
        router: service::router(state.clone()),
        state,
        lines,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("X-Forwarded-For", "9.9.9.9")
        .body(Body::empty())
        .unwrap()
}

fn get_ua(uri: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::USER_AGENT, user_agent)
        .header("X-Forwarded-For", "9.9.9.9")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "9.9.9.9");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_player_download_emits_player_play_line() {
    let gw = gateway(|_, storage| storage.put_file("/movie.mp4", &b"data"[..]));
    let (status, _) = gw
        .send(get_ua("/d/movie.mp4", "VLC/3.0.16 LibVLC/3.0.16"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("行为：播放器播放"), "{}", lines[0]);
    assert!(lines[0].contains("访问路径：/d/movie.mp4"), "{}", lines[0]);
    assert!(lines[0].contains("访问IP：9.9.9.9"), "{}", lines[0]);
    assert!(lines[0].contains("用户：访客"), "{}", lines[0]);
}

#[tokio::test]
async fn test_rapid_repeat_access_is_deduplicated() {
    let gw = gateway(|_, storage| storage.put_file("/a.jpg", &b"img"[..]));
    for _ in 0..2 {
        let (status, _) = gw.send(get_ua("/d/a.jpg", CHROME)).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(gw.audit_lines().len(), 1);
}

#[tokio::test]
async fn test_distinct_clients_are_not_deduplicated() {
    let gw = gateway(|_, storage| storage.put_file("/a.jpg", &b"img"[..]));
    for ip in ["1.1.1.1", "2.2.2.2"] {
        let req = Request::builder()
            .uri("/d/a.jpg")
            .header(header::USER_AGENT, CHROME)
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap();
        gw.send(req).await;
    }
    assert_eq!(gw.audit_lines().len(), 2);
}

#[tokio::test]
async fn test_fs_list_audits_media_entries_from_response() {
    let gw = gateway(|_, storage| {
        storage.put_file("/dir/x.png", &b"png"[..]);
        storage.put_file("/dir/y.txt", &b"txt"[..]);
    });
    let (status, body) = gw
        .send(post_json(
            "/api/fs/list",
            Some(MASTER_TOKEN),
            r#"{"path":"/dir"}"#,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    assert_eq!(body["content"].as_array().unwrap().len(), 2);

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("访问路径：/dir/x.png"), "{}", lines[0]);
    assert!(lines[0].contains("行为：浏览器查看"), "{}", lines[0]);
    assert!(!lines.iter().any(|l| l.contains("y.txt")));
}

#[tokio::test]
async fn test_fs_get_audits_media_object() {
    let gw = gateway(|_, storage| storage.put_file("/m/a.mkv", &b"mkv"[..]));
    let (_, body) = gw
        .send(post_json(
            "/api/fs/get",
            Some(MASTER_TOKEN),
            r#"{"path":"/m/a.mkv"}"#,
        ))
        .await;
    assert_eq!(body["data"]["name"], "a.mkv");

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("访问路径：/m/a.mkv"));
    // The master token resolved the admin identity.
    assert!(lines[0].contains("用户：admin"), "{}", lines[0]);
}

#[tokio::test]
async fn test_signed_link_recovers_identity() {
    let gw = gateway(|directory, storage| {
        storage.put_file("/secret/movie.mp4", &b"data"[..]);
        directory.put_meta(PathMeta {
            path: "/secret".to_string(),
            password: Some("pw".to_string()),
            allow_signed_subpaths: true,
        });
    });

    // No signature on a protected path: rejected.
    let (status, _) = gw.send(get("/d/secret/movie.mp4")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(gw.audit_lines().is_empty());

    // A signed link carrying an embedded username serves the file and
    // resolves the caller, with no Authorization header at all.
    let token = gw
        .state
        .signer()
        .sign_with_user("/secret/movie.mp4", "alice")
        .unwrap();
    let uri = format!("/d/secret/movie.mp4?sign={token}:user:alice");
    let (status, _) = gw.send(get_ua(&uri, "VLC/3.0.16")).await;
    assert_eq!(status, StatusCode::OK);

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("用户：alice"), "{}", lines[0]);
}

#[tokio::test]
async fn test_signed_link_for_missing_user_still_authorizes() {
    let gw = gateway(|directory, storage| {
        storage.put_file("/secret/movie.mp4", &b"data"[..]);
        directory.put_meta(PathMeta {
            path: "/secret".to_string(),
            password: Some("pw".to_string()),
            allow_signed_subpaths: true,
        });
    });

    // The signature stays valid after the account it names is gone; the
    // link authorizes the path, only identity recovery is skipped.
    let token = gw
        .state
        .signer()
        .sign_with_user("/secret/movie.mp4", "ghost")
        .unwrap();
    let uri = format!("/d/secret/movie.mp4?sign={token}:user:ghost");
    let (status, _) = gw.send(get_ua(&uri, CHROME)).await;
    assert_eq!(status, StatusCode::OK);

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("用户：访客"), "{}", lines[0]);
}

#[tokio::test]
async fn test_anonymous_signature_passes_protected_path() {
    let gw = gateway(|directory, storage| {
        storage.put_file("/secret/movie.mp4", &b"data"[..]);
        directory.put_meta(PathMeta {
            path: "/secret".to_string(),
            password: Some("pw".to_string()),
            allow_signed_subpaths: true,
        });
    });
    let token = gw.state.signer().sign("/secret/movie.mp4");
    let (status, _) = gw
        .send(get(&format!("/d/secret/movie.mp4?sign={token}")))
        .await;
    assert_eq!(status, StatusCode::OK);

    // A tampered signature is rejected without revealing why.
    let (status, body) = gw
        .send(get(&format!("/d/secret/movie.mp4?sign=x{token}")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "sign invalid");
}

#[tokio::test]
async fn test_password_ancestor_without_subpath_flag_is_open() {
    let gw = gateway(|directory, storage| {
        storage.put_file("/secret/movie.mp4", &b"data"[..]);
        directory.put_meta(PathMeta {
            path: "/secret".to_string(),
            password: Some("pw".to_string()),
            allow_signed_subpaths: false,
        });
    });
    // The password protects /secret itself; children stay reachable.
    let (status, _) = gw.send(get("/d/secret/movie.mp4")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_share_access_carries_sharing_segment() {
    let gw = gateway(|directory, storage| {
        storage.put_file("/share/movie.mkv", &b"data"[..]);
        directory.put_sharing(Sharing {
            id: "abcdef123456".to_string(),
            creator: "bob".to_string(),
        });
    });
    let (status, _) = gw
        .send(get_ua("/sd/abcdef123456/share/movie.mkv", CHROME))
        .await;
    assert_eq!(status, StatusCode::OK);

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("共享ID：abcdef123456"), "{}", lines[0]);
    assert!(lines[0].contains("共享创建者：bob"), "{}", lines[0]);
}

#[tokio::test]
async fn test_strict_auth_master_and_session_tokens() {
    let gw = gateway(|_, _| {});

    let (status, body) = gw
        .send(
            Request::builder()
                .uri("/api/me")
                .header(header::AUTHORIZATION, MASTER_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "admin");

    let token = gw.state.sessions().issue("alice", 7, None).unwrap();
    let (status, body) = gw
        .send(
            Request::builder()
                .uri("/api/me")
                .header(header::AUTHORIZATION, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alice");
}

#[tokio::test]
async fn test_stale_password_epoch_is_rejected() {
    let gw = gateway(|_, _| {});
    // Issued before the password change (epoch 7 is current).
    let stale = gw.state.sessions().issue("alice", 6, None).unwrap();
    let (status, body) = gw
        .send(post_json("/api/fs/list", Some(&stale), r#"{"path":"/"}"#))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Password has been changed, login please");
}

#[tokio::test]
async fn test_disabled_guest_blocks_strict_but_not_lenient() {
    let gw = gateway(|directory, storage| {
        storage.put_file("/movie.mp4", &b"data"[..]);
        directory.put_user(User {
            username: "guest".to_string(),
            role: Role::Guest,
            disabled: true,
            pwd_epoch: 1,
        });
    });

    // Strict surface: rejected.
    let (status, _) = gw
        .send(post_json("/api/fs/list", None, r#"{"path":"/"}"#))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // /api/me opts into disabled guests.
    let (status, body) = gw
        .send(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "guest");

    // Lenient content surface: still served.
    let (status, _) = gw.send(get("/d/movie.mp4")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_privilege_guards() {
    let gw = gateway(|_, _| {});

    // Guests cannot mint signed links.
    let (status, body) = gw
        .send(post_json("/api/fs/sign", None, r#"{"path":"/a.mp4"}"#))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You are a guest");

    // Users can; the minted link verifies for them.
    let token = gw.state.sessions().issue("alice", 7, None).unwrap();
    let (status, body) = gw
        .send(post_json("/api/fs/sign", Some(&token), r#"{"path":"/a.mp4"}"#))
        .await;
    assert_eq!(status, StatusCode::OK);
    let sign = body["data"]["sign"].as_str().unwrap();
    assert!(gw
        .state
        .signer()
        .verify_with_user("/a.mp4", "alice", sign)
        .is_ok());

    // Only the admin may trigger a sweep.
    let (status, body) = gw
        .send(post_json("/api/admin/audit/sweep", Some(&token), "{}"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You are not an admin");
    let (status, _) = gw
        .send(post_json("/api/admin/audit/sweep", Some(MASTER_TOKEN), "{}"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_query_token_names_the_caller_on_content_routes() {
    let gw = gateway(|_, storage| storage.put_file("/movie.mp4", &b"data"[..]));
    let token = gw.state.sessions().issue("alice", 7, None).unwrap();
    let (status, _) = gw
        .send(get_ua(&format!("/d/movie.mp4?token={token}"), CHROME))
        .await;
    assert_eq!(status, StatusCode::OK);

    let lines = gw.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("用户：alice"), "{}", lines[0]);
}

#[tokio::test]
async fn test_head_requests_are_not_audited() {
    let gw = gateway(|_, storage| storage.put_file("/movie.mp4", &b"data"[..]));
    let req = Request::builder()
        .method(Method::HEAD)
        .uri("/d/movie.mp4")
        .header(header::USER_AGENT, "VLC/3.0.16")
        .header("X-Forwarded-For", "9.9.9.9")
        .body(Body::empty())
        .unwrap();
    let response = gw.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(gw.audit_lines().is_empty());
}

#[tokio::test]
async fn test_sign_all_policy_requires_signature_everywhere() {
    let directory = Arc::new(MemoryDirectory::new());
    let storage = Arc::new(MemoryStorage::new());
    storage.put_file("/open/movie.mp4", &b"data"[..]);
    let config = Config {
        api_token: MASTER_TOKEN.to_string(),
        sign_all: true,
        ..Config::default()
    };
    let stores = Stores {
        users: directory.clone(),
        metas: directory.clone(),
        sharings: directory,
        storage,
    };
    let state = GateState::from_config(&config, stores).unwrap();
    let router = service::router(state.clone());

    let response = router
        .clone()
        .oneshot(get("/d/open/movie.mp4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = state.signer().sign("/open/movie.mp4");
    let response = router
        .clone()
        .oneshot(get(&format!("/d/open/movie.mp4?sign={token}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_signature_is_rejected_as_expired() {
    let directory = Arc::new(MemoryDirectory::new());
    let storage = Arc::new(MemoryStorage::new());
    storage.put_file("/movie.mp4", &b"data"[..]);
    let config = Config {
        api_token: MASTER_TOKEN.to_string(),
        sign_all: true,
        ..Config::default()
    };
    let stores = Stores {
        users: directory.clone(),
        metas: directory.clone(),
        sharings: directory,
        storage,
    };
    let state = GateState::from_config(&config, stores).unwrap();
    let router = service::router(state.clone());

    // Rewrite a valid token's expiry to the distant past. Expiry is
    // checked before the MAC, so the stale bound surfaces as such.
    let token = state.signer().sign("/movie.mp4");
    let (stale_sig, _) = token.rsplit_once(':').unwrap();
    let response = router
        .clone()
        .oneshot(get(&format!("/d/movie.mp4?sign={stale_sig}:1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["message"], "sign expired");
}
