use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::Query;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use patch_sync::features::execution_processes::{self, ExecutionProcesses};
use patch_sync::{ConnectionError, ConnectionState, SyncClient, SyncConfig, SyncError, SyncView};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct StreamParams {
    session_id: Uuid,
    show_soft_deleted: bool,
}

fn process(id: Uuid, session_id: Uuid, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "session_id": session_id,
        "run_reason": "codingagent",
        "executor_action": {},
        "status": status,
        "exit_code": null,
        "dropped": false,
        "started_at": "2024-05-01T10:00:00Z",
        "completed_at": null,
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:00Z",
    })
}

async fn stream_processes(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_processes(socket, params))
}

async fn serve_processes(mut socket: WebSocket, params: StreamParams) {
    assert!(!params.show_soft_deleted);
    let id = Uuid::from_u128(1);
    let frames = vec![
        json!({"JsonPatch": [{"op": "replace", "path": "/execution_processes", "value": {}}]}),
        json!({"Ready": true}),
        json!({"JsonPatch": [{
            "op": "add",
            "path": format!("/execution_processes/{id}"),
            "value": process(id, params.session_id, "running"),
        }]}),
        json!([{
            "op": "replace",
            "path": format!("/execution_processes/{id}/status"),
            "value": "completed",
        }]),
    ];
    for frame in frames {
        if socket
            .send(WsMessage::Text(frame.to_string()))
            .await
            .is_err()
        {
            return;
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn serve_and_hang_up(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket
            .send(WsMessage::Text(
                json!({"op": "replace", "path": "", "value": {"execution_processes": {}}}).to_string(),
            ))
            .await;
        let _ = socket.send(WsMessage::Close(None)).await;
    })
}

async fn serve_invalid_utf8(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let frames = vec![
            WsMessage::Text(json!({"op": "replace", "path": "", "value": {"m": {}}}).to_string()),
            WsMessage::Binary(b"{\"op\":\"add\",\"path\":\"/m/k\",\"value\":\"\xff\xfe\"}".to_vec()),
            WsMessage::Binary(br#"{"op":"add","path":"/m/ok","value":true}"#.to_vec()),
        ];
        for frame in frames {
            if socket.send(frame).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let router = Router::new()
        .route(execution_processes::STREAM_PATH, get(stream_processes))
        .route("/hangup/ws", get(serve_and_hang_up))
        .route("/invalid-utf8/ws", get(serve_invalid_utf8));
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

async fn wait_for(
    views: &mut watch::Receiver<SyncView>,
    predicate: impl FnMut(&SyncView) -> bool,
) -> SyncView {
    tokio::time::timeout(Duration::from_secs(10), views.wait_for(predicate))
        .await
        .expect("view condition not reached")
        .expect("subscription dropped")
        .clone()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn syncs_execution_processes_over_websocket() {
    let addr = spawn_server().await;
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let client = SyncClient::websocket(SyncConfig::default());
    let mut sub = client.subscribe(execution_processes::placeholder());
    let mut views = sub.watch();

    let session_id = Uuid::new_v4();
    sub.update(
        Some(&execution_processes::endpoint(&base, session_id, false)),
        true,
    )
    .unwrap();

    let view = wait_for(&mut views, |v| {
        v.decode::<ExecutionProcesses>()
            .map(|doc| {
                doc.get(Uuid::from_u128(1))
                    .is_some_and(|p| p.status == execution_processes::ExecutionProcessStatus::Completed)
            })
            .unwrap_or(false)
    })
    .await;
    assert!(view.is_connected());
    assert!(view.is_initialized());
    let doc: ExecutionProcesses = view.decode().unwrap();
    assert_eq!(doc.execution_processes.len(), 1);
    assert_eq!(doc.visible()[0].session_id, session_id);
    assert!(!doc.is_any_running());
    assert_eq!(sub.counters().decode_errors, 0);

    sub.close();
    assert_eq!(sub.view().state(), ConnectionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_close_schedules_a_reconnect() {
    let addr = spawn_server().await;
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let client = SyncClient::websocket(SyncConfig::default());
    let mut sub = client.subscribe(execution_processes::placeholder());
    let mut views = sub.watch();
    let endpoint = patch_sync::Endpoint::new(&base, "/hangup/ws");
    sub.update(Some(&endpoint), true).unwrap();

    let lost = wait_for(&mut views, |v| v.is_initialized() && !v.is_connected()).await;
    let error = lost.error().expect("connection error surfaced");
    assert!(!error.is_fatal());
    assert_ne!(lost.state(), ConnectionState::Errored);
    assert_eq!(**lost.data(), json!({"execution_processes": {}}));
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = SyncClient::websocket(SyncConfig::default());
    let mut sub = client.subscribe(execution_processes::placeholder());
    let mut views = sub.watch();
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    sub.update(
        Some(&execution_processes::endpoint(&base, Uuid::new_v4(), false)),
        true,
    )
    .unwrap();

    let failed = wait_for(&mut views, |v| v.error().is_some()).await;
    assert!(matches!(
        failed.error(),
        Some(SyncError::Connection(ConnectionError::Connect { .. }))
    ));
    assert!(!failed.is_connected());
    assert!(!failed.is_initialized());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binary_frame_with_invalid_utf8_is_dropped() {
    let addr = spawn_server().await;
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let client = SyncClient::websocket(SyncConfig::default());
    let mut sub = client.subscribe(json!({}));
    let mut views = sub.watch();
    let endpoint = patch_sync::Endpoint::new(&base, "/invalid-utf8/ws");
    sub.update(Some(&endpoint), true).unwrap();

    let view = wait_for(&mut views, |v| v.data()["m"]["ok"] == true).await;
    assert_eq!(**view.data(), json!({"m": {"ok": true}}));
    assert!(view.is_connected());
    assert!(view.error().is_none());

    let counters = sub.counters();
    assert_eq!(counters.frames, 3);
    assert_eq!(counters.decode_errors, 1);
    assert_eq!(counters.operations_applied, 2);
}
