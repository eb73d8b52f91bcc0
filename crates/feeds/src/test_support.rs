//! In-process price feed server for connection and hub tests.

use crate::ControlFrame;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub(crate) enum MockCommand {
    /// Push a text frame to the connected client
    Send(String),
    /// Close the current client connection from the server side
    Close,
}

pub(crate) struct MockFeed {
    pub url: String,
    /// Control frames received from clients, across all connections
    pub received: mpsc::UnboundedReceiver<ControlFrame>,
    pub commands: mpsc::UnboundedSender<MockCommand>,
    /// Number of accepted connections so far
    pub accepted: mpsc::UnboundedReceiver<usize>,
}

/// Serve clients one connection at a time on an ephemeral port.
pub(crate) async fn spawn_mock_feed() -> MockFeed {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (commands, mut command_rx) = mpsc::unbounded_channel();
    let (accepted_tx, accepted) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut count = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            count += 1;
            let _ = accepted_tx.send(count);
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(frame) = serde_json::from_str::<ControlFrame>(&text) {
                                let _ = received_tx.send(frame);
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    command = command_rx.recv() => match command {
                        Some(MockCommand::Send(text)) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(MockCommand::Close) => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                        None => return,
                    },
                }
            }
        }
    });

    MockFeed {
        url: format!("ws://{addr}"),
        received,
        commands,
        accepted,
    }
}

/// Await with a generous deadline so a broken test fails instead of hanging.
pub(crate) async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for feed activity")
}
