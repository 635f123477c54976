//! End-to-end sessions against a local feed server.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use scanner_feed::{
    record_ticks, ClientRequest, ConnectionControllerBuilder, ConnectionState, Exchange,
    SharedWindow,
};

const SUBSCRIBE_FRAME: &str =
    r#"{"event":"subscribe","payload":{"exchange":"crypto","filters":{"ticker":["BTCUSD"]}}}"#;

fn tick_frame(round: i64) -> String {
    json!({
        "event": "update",
        "payload": {
            "ticker": "btcusd",
            "exchange": "crypto",
            "type": "T",
            "timestamp": 1_700_000_000_000_i64 + round,
            "ask_price": null,
            "ask_size": null,
            "bid_price": null,
            "bid_size": null,
            "last_price": 37011.0 + round as f64,
            "last_size": 0.25
        }
    })
    .to_string()
}

/// Serves `rounds` connections. Each one reports the first client frame,
/// pushes a malformed frame and one tick, then closes.
async fn spawn_server(rounds: i64) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for round in 0..rounds {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            if let Some(Ok(Message::Text(text))) = ws.next().await {
                tx.send(text.to_string()).unwrap();
            }

            ws.send(Message::Text("not-json".into())).await.unwrap();
            ws.send(Message::Text(tick_frame(round).into())).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();

            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    (url, rx)
}

#[tokio::test]
async fn test_streams_ticks_and_resubscribes_after_server_close() {
    let (url, mut subscriptions) = spawn_server(2).await;

    let mut controller = ConnectionControllerBuilder::new(&url)
        .reconnect_delay(Duration::from_millis(50))
        .build()
        .unwrap();

    let window = SharedWindow::new(NonZeroUsize::new(20).unwrap());
    record_ticks(&mut controller, window.clone());

    let subscribe = ClientRequest::subscribe(Exchange::Crypto, ["BTCUSD"])
        .into_envelope()
        .unwrap();
    controller
        .send_on_open(subscribe.event(), subscribe.payload())
        .unwrap();

    assert_eq!(controller.connect(), None);

    let drive = async {
        while window.len() < 2 {
            controller.step().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), drive)
        .await
        .expect("ticks from both connections were not received");

    assert_eq!(subscriptions.recv().await.unwrap(), SUBSCRIBE_FRAME);
    assert_eq!(subscriptions.recv().await.unwrap(), SUBSCRIBE_FRAME);

    let ticks = window.snapshot();
    assert_eq!(ticks[0].timestamp, 1_700_000_000_000);
    assert_eq!(ticks[1].timestamp, 1_700_000_000_001);
    assert!(ticks.iter().all(|t| t.is_trade() && t.ask_price.is_none()));

    assert_eq!(controller.diagnostics().parse_errors(), 2);
    assert!(controller
        .transitions(usize::MAX)
        .iter()
        .any(|t| t.to == ConnectionState::WaitingReconnect));

    assert_eq!(controller.disconnect(), None);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_refused_connection_schedules_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let mut controller = ConnectionControllerBuilder::new(&url)
        .reconnect_delay(Duration::from_secs(30))
        .build()
        .unwrap();
    controller.connect();

    let drive = async {
        while controller.state() != ConnectionState::WaitingReconnect {
            controller.step().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), drive)
        .await
        .expect("refused connection did not schedule a reconnect");

    assert_eq!(controller.diagnostics().transport_errors(), 1);
    assert_eq!(controller.socket_id(), None);
    assert_eq!(
        controller.pending_reconnect_delay(),
        Some(Duration::from_secs(30))
    );

    let err = controller.send("subscribe", &json!({})).unwrap_err();
    assert!(err.to_string().contains("WaitingReconnect"));
}
