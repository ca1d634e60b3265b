use axum::body::Bytes;
use axum::http::StatusCode;
use axum_test::TestServer;
use keyward_server::{open_store, router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;

const SECRET: &str = "integration-secret";

fn make_server(enable_bootstrap: bool) -> (TestServer, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();
    let state = AppState::new(store);
    state.gate.bootstrap(Some(SECRET)).unwrap();
    let server = TestServer::new(router(state, enable_bootstrap)).unwrap();
    (server, dir)
}

fn bearer(secret: &str) -> String {
    format!("Bearer {secret}")
}

async fn create(server: &TestServer, body: Value) -> Vec<Value> {
    let response = server
        .post("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .json(&body)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["keys"].as_array().unwrap().clone()
}

// ── Admin gate ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    let (server, _dir) = make_server(false);
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn missing_credential_is_401_wrong_is_403() {
    let (server, _dir) = make_server(false);

    server
        .get("/api/keys")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .get("/api/keys")
        .add_header("Authorization", "Basic abc")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = server
        .get("/api/keys")
        .add_header("Authorization", bearer("wrong-secret"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.json::<Value>()["error"].is_string());

    server
        .get("/api/stats")
        .add_header("Authorization", bearer(SECRET))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn rejected_request_touches_nothing() {
    let (server, _dir) = make_server(false);
    server
        .post("/api/keys")
        .add_header("Authorization", bearer("wrong-secret"))
        .json(&json!({"count": 5, "duration_days": 1}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let stats = server
        .get("/api/stats")
        .add_header("Authorization", bearer(SECRET))
        .await
        .json::<Value>();
    assert_eq!(stats["total"], 0);
}

// ── Keys ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_list() {
    let (server, _dir) = make_server(false);
    let keys = create(
        &server,
        json!({"count": 3, "duration_days": 10, "note": "customer 42"}),
    )
    .await;
    assert_eq!(keys.len(), 3);
    for k in &keys {
        assert_eq!(k["status"], "active");
        assert_eq!(k["note"], "customer 42");
        assert_eq!(
            k["expires_at"].as_i64().unwrap() - k["created_at"].as_i64().unwrap(),
            10 * 86_400
        );
    }

    let listed = server
        .get("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .await
        .json::<Vec<Value>>();
    assert_eq!(listed.len(), 3);
}

#[tokio::test]
async fn create_rejects_bad_arguments() {
    let (server, _dir) = make_server(false);
    for body in [
        json!({"count": 0, "duration_days": 1}),
        json!({"count": 101, "duration_days": 1}),
        json!({"count": 1, "duration_days": 0}),
    ] {
        server
            .post("/api/keys")
            .add_header("Authorization", bearer(SECRET))
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
    let listed = server
        .get("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .await
        .json::<Vec<Value>>();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let (server, _dir) = make_server(false);
    for body in [
        json!({"count": -1, "duration_days": 1}),
        json!({"count": 1, "duration_days": -5}),
        json!({"count": "three"}),
        json!({"duration_days": 1}),
    ] {
        let response = server
            .post("/api/keys")
            .add_header("Authorization", bearer(SECRET))
            .json(&body)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"].is_string(), "{body}");
    }

    let response = server
        .post("/api/validate")
        .bytes(Bytes::from_static(b"{not json"))
        .content_type("application/json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"].is_string());

    let listed = server
        .get("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .await
        .json::<Vec<Value>>();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn status_change_and_validation() {
    let (server, _dir) = make_server(false);
    let key = create(&server, json!({"count": 1, "duration_days": 5, "note": "vip"}))
        .await
        .remove(0);
    let id = key["id"].as_str().unwrap();
    let value = key["value"].as_str().unwrap();

    let validation = server
        .post("/api/validate")
        .json(&json!({"key": value}))
        .await
        .json::<Value>();
    assert_eq!(validation["valid"], true);
    assert_eq!(validation["note"], "vip");
    assert_eq!(validation["expires_at"], key["expires_at"]);

    let response = server
        .put(&format!("/api/keys/{id}/status"))
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"status": "locked"}))
        .await;
    response.assert_status_ok();
    let updated = response.json::<Value>();
    assert_eq!(updated["key"]["status"], "locked");
    assert_eq!(updated["key"]["history"].as_array().unwrap().len(), 2);

    let validation = server
        .post("/api/validate")
        .json(&json!({"key": value}))
        .await
        .json::<Value>();
    assert_eq!(validation["valid"], false);
    assert!(validation["message"].as_str().unwrap().contains("locked"));
}

#[tokio::test]
async fn set_status_errors() {
    let (server, _dir) = make_server(false);
    let key = create(&server, json!({"count": 1, "duration_days": 1})).await.remove(0);
    let id = key["id"].as_str().unwrap();

    server
        .put("/api/keys/missing/status")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"status": "locked"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    for status in ["expired", "banana"] {
        server
            .put(&format!("/api/keys/{id}/status"))
            .add_header("Authorization", bearer(SECRET))
            .json(&json!({ "status": status }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn delete_then_delete_again() {
    let (server, _dir) = make_server(false);
    let key = create(&server, json!({"count": 1, "duration_days": 1})).await.remove(0);
    let id = key["id"].as_str().unwrap();

    server
        .delete(&format!("/api/keys/{id}"))
        .add_header("Authorization", bearer(SECRET))
        .await
        .assert_status_ok();
    server
        .delete(&format!("/api/keys/{id}"))
        .add_header("Authorization", bearer(SECRET))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let validation = server
        .post("/api/validate")
        .json(&json!({"key": key["value"]}))
        .await
        .json::<Value>();
    assert_eq!(validation["valid"], false);
    assert_eq!(validation["message"], "key does not exist");
}

#[tokio::test]
async fn validate_unknown_key() {
    let (server, _dir) = make_server(false);
    let response = server
        .post("/api/validate")
        .json(&json!({"key": "nothing-here"}))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"valid": false, "message": "key does not exist"})
    );
}

// ── Stats & settings ─────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_sum_to_total() {
    let (server, _dir) = make_server(false);
    let keys = create(&server, json!({"count": 4, "duration_days": 1})).await;
    server
        .put(&format!("/api/keys/{}/status", keys[0]["id"].as_str().unwrap()))
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"status": "suspended"}))
        .await
        .assert_status_ok();

    let stats = server
        .get("/api/stats")
        .add_header("Authorization", bearer(SECRET))
        .await
        .json::<Value>();
    assert_eq!(stats["total"], 4);
    assert_eq!(stats["active"], 3);
    assert_eq!(stats["suspended"], 1);
    assert_eq!(stats["locked"], 0);
    assert_eq!(stats["expired"], 0);
}

#[tokio::test]
async fn settings_update_and_validation() {
    let (server, _dir) = make_server(false);

    let settings = server
        .put("/api/settings")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"key_length": 24, "default_duration_days": 7}))
        .await
        .json::<Value>();
    assert_eq!(settings["key_length"], 24);
    assert_eq!(settings["default_duration_days"], 7);
    assert_eq!(settings["max_keys"], 1000);

    let key = create(&server, json!({"count": 1})).await.remove(0);
    assert_eq!(key["value"].as_str().unwrap().len(), 24);
    assert_eq!(
        key["expires_at"].as_i64().unwrap() - key["created_at"].as_i64().unwrap(),
        7 * 86_400
    );

    server
        .put("/api/settings")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"key_length": 2}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let unknown_field = server
        .put("/api/settings")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"theme": "dark"}))
        .await;
    unknown_field.assert_status(StatusCode::BAD_REQUEST);
    assert!(unknown_field.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("theme"));

    let current = server
        .get("/api/settings")
        .add_header("Authorization", bearer(SECRET))
        .await
        .json::<Value>();
    assert_eq!(current, settings);
}

// ── Admin secret ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn rotate_admin_secret() {
    let (server, _dir) = make_server(false);
    let new_secret = "rotated-integration-secret";

    server
        .post("/api/admin-secret")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"old_secret": "not-it", "new_secret": new_secret}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    server
        .post("/api/admin-secret")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"old_secret": SECRET, "new_secret": "short"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/api/admin-secret")
        .add_header("Authorization", bearer(SECRET))
        .json(&json!({"old_secret": SECRET, "new_secret": new_secret}))
        .await
        .assert_status_ok();

    server
        .get("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .get("/api/keys")
        .add_header("Authorization", bearer(new_secret))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn bootstrap_route_is_opt_in() {
    let (server, _dir) = make_server(false);
    server
        .post("/api/admin-secret/generate")
        .json(&json!({}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bootstrap_route_without_body_uses_default_length() {
    let (server, _dir) = make_server(true);
    let response = server.post("/api/admin-secret/generate").await;
    response.assert_status_ok();
    let generated = response.json::<Value>()["admin_secret"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_eq!(generated.len(), 32);

    server
        .get("/api/keys")
        .add_header("Authorization", bearer(&generated))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn bootstrap_route_rejects_broken_body() {
    let (server, _dir) = make_server(true);
    server
        .post("/api/admin-secret/generate")
        .json(&json!({"length": "long"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn bootstrap_route_replaces_secret() {
    let (server, _dir) = make_server(true);
    let response = server
        .post("/api/admin-secret/generate")
        .json(&json!({"length": 40}))
        .await;
    response.assert_status_ok();
    let generated = response.json::<Value>()["admin_secret"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_eq!(generated.len(), 40);

    server
        .get("/api/keys")
        .add_header("Authorization", bearer(SECRET))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .get("/api/keys")
        .add_header("Authorization", bearer(&generated))
        .await
        .assert_status_ok();
}
