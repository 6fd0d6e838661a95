//! End-to-end checks of the tokio-tungstenite connector against a local server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use paperdesk::net::{ReconnectPolicy, Route, Transport, TungsteniteConnector};
use paperdesk::notify::TracingNotifier;
use paperdesk::services::UploadService;
use paperdesk::state::SessionPhase;
use paperdesk::{ClientConfig, SessionOptions, UploadController};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use wire::Status;

const WAIT: Duration = Duration::from_secs(5);

/// Accept one WebSocket connection and hand it to `handler`. Returns the HTTP base URL.
async fn serve_once<F, Fut>(handler: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    (format!("http://{addr}"), handle)
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => {}
            other => panic!("socket ended before a text frame: {other:?}"),
        }
    }
}

async fn wait_for_close(ws: &mut WebSocketStream<TcpStream>) -> Option<u16> {
    while let Some(Ok(frame)) = ws.next().await {
        if let Message::Close(frame) = frame {
            return frame.map(|f| u16::from(f.code));
        }
    }
    None
}

#[tokio::test]
async fn transport_round_trips_and_closes_normally() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let (base, server) = serve_once(|mut ws| async move {
        let request = next_json(&mut ws).await;
        assert_eq!(request["action"], "ping");
        ws.send(Message::text(
            json!({"status": "processing", "filename": "a.pdf"}).to_string(),
        ))
        .await
        .unwrap();
        let _ = closed_tx.send(wait_for_close(&mut ws).await);
    })
    .await;

    let url = wire::endpoint_url(&base, "upload", "secret").unwrap();
    let transport = Transport::new(url, Arc::new(TungsteniteConnector), ReconnectPolicy::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.add_message_handler(Route::Status(Status::Processing), move |envelope| {
        let _ = tx.send(envelope.payload.clone());
    });

    assert!(transport.send(&json!({"action": "ping"})).await);
    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received["filename"], "a.pdf");
    assert!(transport.endpoint().ends_with("/ws/upload"));

    transport.disconnect();
    let code = timeout(WAIT, closed_rx).await.unwrap().unwrap();
    assert_eq!(code, Some(wire::NORMAL_CLOSURE));
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = Transport::new(
        format!("ws://{addr}/ws/upload?token=t"),
        Arc::new(TungsteniteConnector),
        ReconnectPolicy {
            base_delay: Duration::from_secs(60),
            max_attempts: 1,
        },
    );

    assert!(timeout(WAIT, transport.connect()).await.unwrap().is_err());
    transport.disconnect();
}

#[tokio::test]
async fn upload_controller_completes_against_live_socket() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let (base, server) = serve_once(|mut ws| async move {
        let request = next_json(&mut ws).await;
        assert_eq!(request["action"], "upload");
        assert_eq!(request["user_id"], "u1");
        assert_eq!(request["total_files"], 2);

        for (filename, status, percent) in [
            ("a.pdf", "exists", 0),
            ("b.pdf", "uploading", 50),
            ("b.pdf", "complete", 100),
        ] {
            let event = json!({"status": status, "filename": filename, "progress_percent": percent});
            ws.send(Message::text(event.to_string())).await.unwrap();
        }
        let _ = closed_tx.send(wait_for_close(&mut ws).await);
    })
    .await;

    let config = ClientConfig {
        api_url: base,
        ..ClientConfig::default()
    };
    let options = SessionOptions {
        disconnect_grace: Duration::from_millis(50),
        ..SessionOptions::from(&config)
    };
    let slot = Arc::new(UploadService::slot(&config, Arc::new(TungsteniteConnector)));
    let controller = UploadController::new(slot, "secret", "u1", options, Arc::new(TracingNotifier));
    let mut rx = controller.subscribe();

    let sent = controller
        .upload_bytes(vec![
            ("a.pdf".to_owned(), b"aaa".to_vec()),
            ("b.pdf".to_owned(), b"bbb".to_vec()),
        ])
        .await
        .unwrap();
    assert_eq!(sent, 2);

    let state = timeout(WAIT, rx.wait_for(|state| state.phase == SessionPhase::Disconnected))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(state.is_all_uploaded);
    assert_eq!(state.terminal_count(), 2);

    let code = timeout(WAIT, closed_rx).await.unwrap().unwrap();
    assert_eq!(code, Some(wire::NORMAL_CLOSURE));
    timeout(WAIT, server).await.unwrap().unwrap();
}
