use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use chanwatch_core::SessionError;
use chanwatch_core::session::{EntityRef, ProtocolSession, ResolvedChannel, SessionConnector};
use chanwatch_telegram::GatewayConnector;
use chanwatch_types::models::Account;

async fn open_session(Json(body): Json<Value>) -> Json<Value> {
    let authorized = body["phone"] != "+revoked";
    Json(json!({ "session_id": "s1", "authorized": authorized }))
}

async fn resolve(Path(_id): Path<String>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    match (body["kind"].as_str(), body["value"].as_str()) {
        (Some("handle"), Some("leaks")) => (StatusCode::OK, Json(json!({ "peer_id": 77, "title": "Leaks" }))),
        (Some("handle"), Some("busy")) => (StatusCode::OK, Json(json!({ "peer_id": 99 }))),
        (Some("handle"), Some("closed")) => (StatusCode::FORBIDDEN, Json(json!({ "error": "CHANNEL_PRIVATE" }))),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "error": "USERNAME_NOT_OCCUPIED" }))),
    }
}

async fn history(Path(_id): Path<String>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["peer_id"] == 99 {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "FLOOD_WAIT", "retry_after": 5 })));
    }
    if body["peer_id"] == 13 {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "CHANNEL_BANNED" })));
    }
    let min_id = body["min_id"].as_i64().unwrap_or(0);
    let messages: Vec<Value> = (101..=103)
        .filter(|id| *id > min_id)
        .map(|id| json!({ "id": id, "text": null, "date": "2024-03-09T22:30:05Z", "media_type": "photo" }))
        .collect();
    (StatusCode::OK, Json(json!({ "messages": messages })))
}

async fn close(Path(_id): Path<String>) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn spawn_bridge() -> String {
    let app = Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/{id}/resolve", post(resolve))
        .route("/sessions/{id}/history", post(history))
        .route("/sessions/{id}", delete(close));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn account(phone: &str) -> Account {
    Account {
        id: 1,
        name: "w1".into(),
        api_id: "1".into(),
        api_hash: "hash".into(),
        phone: phone.into(),
        description: None,
        is_active: true,
        is_authorized: true,
        session_blob: Some("blob".into()),
        last_used: None,
    }
}

#[tokio::test]
async fn session_resolves_and_pages_history() {
    let base = spawn_bridge().await;
    let connector = GatewayConnector::new(&base).unwrap();
    let session = connector.connect(&account("+100")).await.unwrap();

    let resolved = session.resolve(&EntityRef::Handle("leaks".into())).await.unwrap();
    assert_eq!(resolved.peer_id, 77);
    assert_eq!(resolved.title.as_deref(), Some("Leaks"));

    let messages = session.fetch_after(&resolved, 101, 200).await.unwrap();
    assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![102, 103]);
    assert_eq!(messages[0].text, "");
    assert_eq!(messages[0].media_type.as_deref(), Some("photo"));

    let missing = session.resolve(&EntityRef::InviteHash("nope".into())).await;
    assert!(matches!(missing, Err(SessionError::Resolve(_))));

    session.disconnect().await;
}

#[tokio::test]
async fn unauthorized_session_is_an_auth_failure() {
    let base = spawn_bridge().await;
    let connector = GatewayConnector::new(&base).unwrap();
    let err = connector.connect(&account("+revoked")).await.err().unwrap();
    assert!(matches!(err, SessionError::Auth(_)));
}

#[tokio::test]
async fn flood_wait_becomes_rate_limit() {
    let base = spawn_bridge().await;
    let connector = GatewayConnector::new(&base).unwrap();
    let session = connector.connect(&account("+100")).await.unwrap();

    let busy = ResolvedChannel {
        peer_id: 99,
        title: None,
    };
    let err = session.fetch_after(&busy, 0, 10).await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn unreachable_bridge_is_a_network_error() {
    let connector = GatewayConnector::new("http://127.0.0.1:9").unwrap();
    let err = connector.connect(&account("+100")).await.err().unwrap();
    assert!(matches!(err, SessionError::Network(_)));
}

#[tokio::test]
async fn closed_channel_is_not_an_account_failure() {
    let base = spawn_bridge().await;
    let connector = GatewayConnector::new(&base).unwrap();
    let session = connector.connect(&account("+100")).await.unwrap();

    let err = session.resolve(&EntityRef::Handle("closed".into())).await.unwrap_err();
    assert!(matches!(err, SessionError::Resolve(ref r) if r == "CHANNEL_PRIVATE"));

    let banned = ResolvedChannel {
        peer_id: 13,
        title: None,
    };
    let err = session.fetch_after(&banned, 0, 10).await.unwrap_err();
    assert!(!err.is_account_failure());
    assert!(matches!(err, SessionError::Resolve(_)));
}
