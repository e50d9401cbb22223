//! Mock market feed server for integration tests.
//!
//! Accepts any number of connections and, per connection:
//! - Pushes the configured greeting frames
//! - Answers the `ping` literal with `{"type":"pong"}`
//! - Records every text frame it receives
//! - Optionally drops the first N connections right after the greeting

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Per-connection server behavior.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Frames sent right after the handshake.
    pub greeting: Vec<String>,
    /// Reply to `ping` with a pong.
    pub answer_pings: bool,
    /// Drop this many connections (without a close frame) after the greeting.
    pub drop_first: u32,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            greeting: Vec::new(),
            answer_pings: true,
            drop_first: 0,
        }
    }
}

#[derive(Default)]
struct Counters {
    connections: u32,
    client_closes: u32,
}

/// A mock feed server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    counters: Arc<Mutex<Counters>>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        Self::start_with(MockBehavior::default()).await
    }

    /// Start a server on an available port.
    pub async fn start_with(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let counters: Arc<Mutex<Counters>> = Arc::new(Mutex::new(Counters::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let counters_clone = counters.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            behavior.clone(),
                            messages_clone.clone(),
                            counters_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            counters,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far.
    pub async fn connection_count(&self) -> u32 {
        self.counters.lock().await.connections
    }

    /// Close frames received from clients.
    pub async fn client_closes(&self) -> u32 {
        self.counters.lock().await.client_closes
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    messages: Arc<Mutex<VecDeque<String>>>,
    counters: Arc<Mutex<Counters>>,
) {
    let index = {
        let mut counters = counters.lock().await;
        counters.connections += 1;
        counters.connections
    };

    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    for frame in &behavior.greeting {
        if ws.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }

    if index <= behavior.drop_first {
        // Dropping the stream closes TCP without a close handshake.
        return;
    }

    let (mut write, mut read) = ws.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                messages.lock().await.push_back(text.clone());
                if text == "ping" && behavior.answer_pings {
                    let pong = r#"{"type":"pong"}"#.to_string();
                    let _ = write.send(Message::Text(pong)).await;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                counters.lock().await.client_closes += 1;
                break;
            }
            Err(_) => break,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
