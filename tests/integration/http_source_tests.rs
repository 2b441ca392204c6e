//! `HttpMessageSource` against a local axum server speaking the agent-comms
//! wire format.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use agent_courier::comms::{HttpMessageSource, MessageSource};
use agent_courier::models::message::{MessageKind, MessageStatus, OutgoingMessage, Priority};
use agent_courier::AppError;

const KEY: &str = "s3cret";

#[derive(Default)]
struct Recorded {
    sent: Vec<Value>,
    marked: Vec<(String, Value)>,
}

type Shared = Arc<Mutex<Recorded>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-agent-id").is_some()
        && headers.get("x-agent-key").and_then(|v| v.to_str().ok()) == Some(KEY)
}

async fn inbox(Path(id): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    if id == "garbled" {
        return (StatusCode::OK, Json(json!({"unexpected": true, "messages": "nope"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "messages": [
                {
                    "id": 101, "from_agent": 2002, "to_agent": 2001,
                    "subject": "DELIVERY: app", "body": "```\nx\n```",
                    "priority": "high", "status": "unread", "type": "directive",
                    "created_at": "2026-01-01T00:00:00Z"
                },
                { "from_agent": "2002", "body": "missing identity" },
                {
                    "id": "102", "from_agent": "2002", "to_agent": "2001",
                    "subject": null, "body": "old", "priority": "normal",
                    "status": "resolved", "type": "report", "created_at": ""
                },
                {
                    "id": "103", "from_agent": "2002", "to_agent": "2001",
                    "body": "new kind", "priority": "low", "status": "unread",
                    "type": "broadcast", "created_at": ""
                }
            ]
        })),
    )
}

async fn send(State(shared): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN;
    }
    shared.lock().unwrap().sent.push(body);
    StatusCode::OK
}

async fn mark(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    if id == "boom" {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    shared.lock().unwrap().marked.push((id, body));
    StatusCode::OK
}

async fn spawn_server() -> (String, Shared) {
    let shared = Shared::default();
    let app = Router::new()
        .route("/inbox/{id}", get(inbox))
        .route("/send", post(send))
        .route("/{id}/status", patch(mark))
        .with_state(Arc::clone(&shared));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/"), shared)
}

fn client(base_url: &str, key: &str) -> HttpMessageSource {
    HttpMessageSource::new(
        base_url,
        Duration::from_secs(5),
        [
            ("2001".to_owned(), key.to_owned()),
            ("garbled".to_owned(), key.to_owned()),
        ],
    )
    .expect("client")
}

#[tokio::test]
async fn fetch_decodes_unread_and_quarantines_malformed() {
    let (base, _) = spawn_server().await;
    let source = client(&base, KEY);

    let inbox = source.fetch("2001").await.expect("fetch");

    let ids: Vec<&str> = inbox.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["101", "103"]);
    assert_eq!(inbox.messages[0].from_agent, "2002");
    assert_eq!(inbox.messages[0].priority, Priority::High);
    assert_eq!(inbox.messages[1].kind, MessageKind::Other);
    assert_eq!(inbox.quarantined.len(), 1);
    assert_eq!(inbox.quarantined[0].id, None);
}

#[tokio::test]
async fn rejected_key_maps_to_auth_error() {
    let (base, _) = spawn_server().await;
    let source = client(&base, "wrong");

    let err = source.fetch("2001").await.unwrap_err();

    assert!(matches!(err, AppError::Auth(_)), "got {err}");
}

#[tokio::test]
async fn unknown_agent_has_no_credential() {
    let (base, _) = spawn_server().await;
    let source = client(&base, KEY);

    let err = source.fetch("9999").await.unwrap_err();

    assert!(matches!(err, AppError::Auth(_)));
}

#[tokio::test]
async fn malformed_envelope_maps_to_protocol_error() {
    let (base, _) = spawn_server().await;
    let source = client(&base, KEY);

    let err = source.fetch("garbled").await.unwrap_err();

    assert!(matches!(err, AppError::Protocol(_)), "got {err}");
}

#[tokio::test]
async fn unreachable_endpoint_maps_to_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let source = client(&format!("http://{addr}"), KEY);

    let err = source.fetch("2001").await.unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(err, AppError::Transport(_)), "got {err}");
}

#[tokio::test]
async fn send_and_mark_use_wire_format() {
    let (base, shared) = spawn_server().await;
    let source = client(&base, KEY);
    let outgoing = OutgoingMessage {
        to_agent: "2002".into(),
        subject: "DEPLOY REPORT: DELIVERY: app".into(),
        body: "== FILES ==\nno files".into(),
        kind: MessageKind::Report,
        priority: Priority::Normal,
        platform: "orchestrator".into(),
    };

    source.send("2001", &outgoing).await.expect("send");
    source
        .mark("2001", "101", MessageStatus::Resolved)
        .await
        .expect("mark");

    let recorded = shared.lock().unwrap();
    assert_eq!(
        recorded.sent[0],
        json!({
            "to_agent": "2002",
            "subject": "DEPLOY REPORT: DELIVERY: app",
            "body": "== FILES ==\nno files",
            "type": "report",
            "priority": "normal",
            "platform": "orchestrator"
        })
    );
    assert_eq!(
        recorded.marked,
        vec![("101".to_owned(), json!({"status": "resolved"}))]
    );
}

#[tokio::test]
async fn server_error_on_mark_is_transport_error() {
    let (base, _) = spawn_server().await;
    let source = client(&base, KEY);

    let err = source
        .mark("2001", "boom", MessageStatus::Resolved)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Transport(_)));
}
