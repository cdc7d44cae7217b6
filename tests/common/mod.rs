//! In-process sequencer for preview tests

#![allow(dead_code)]

use coinflip::config::{PreviewConfig, PreviewEndpoint, ReconnectConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const TEST_CHAIN_ID: u64 = 1337;

#[derive(Clone, Debug)]
enum Command {
    Send(String),
    Disconnect,
}

/// WebSocket server speaking the sequencer's listen/complete protocol
pub struct MockSequencer {
    pub url: String,
    connections: Arc<AtomicUsize>,
    listens: Arc<Mutex<Vec<u64>>>,
    commands: broadcast::Sender<Command>,
    accept_task: JoinHandle<()>,
}

impl MockSequencer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock sequencer");
        let addr = listener.local_addr().expect("local addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let listens = Arc::new(Mutex::new(Vec::new()));
        let (commands, _) = broadcast::channel(64);

        let accept_task = {
            let connections = connections.clone();
            let listens = listens.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(socket) = accept_async(stream).await else {
                        continue;
                    };
                    let mut command_rx = commands.subscribe();
                    connections.fetch_add(1, Ordering::SeqCst);
                    let listens = listens.clone();

                    tokio::spawn(async move {
                        let (mut sink, mut stream) = socket.split();
                        loop {
                            tokio::select! {
                                frame = stream.next() => match frame {
                                    Some(Ok(Message::Text(text))) => {
                                        let value: Value = match serde_json::from_str(&text) {
                                            Ok(v) => v,
                                            Err(_) => continue,
                                        };
                                        if value["op"] == "listen" {
                                            if let Some(id) = value["id"].as_u64() {
                                                listens.lock().unwrap().push(id);
                                            }
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                },
                                command = command_rx.recv() => match command {
                                    Ok(Command::Send(text)) => {
                                        if sink.send(Message::Text(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Disconnect) | Err(_) => break,
                                },
                            }
                        }
                    });
                }
            })
        };

        Self {
            url: format!("ws://{}", addr),
            connections,
            listens,
            commands,
            accept_task,
        }
    }

    /// Preview settings pointing at this server with fast reconnects
    pub fn config(&self, max_attempts: u32) -> PreviewConfig {
        PreviewConfig {
            endpoints: vec![PreviewEndpoint {
                chain_id: TEST_CHAIN_ID,
                url: self.url.clone(),
            }],
            reconnect: ReconnectConfig {
                initial_backoff_ms: 20,
                max_backoff_ms: 100,
                max_attempts,
            },
            default_timeout_ms: None,
            connect_timeout_ms: 2_000,
        }
    }

    /// Push a `complete` frame for `id` to every connected client
    pub fn complete(&self, id: u64, result: Value) {
        self.send_raw(json!({"op": "complete", "id": id, "result": result}).to_string());
    }

    pub fn send_raw(&self, text: String) {
        let _ = self.commands.send(Command::Send(text));
    }

    /// Drop every open connection without a close handshake
    pub fn disconnect_all(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn listen_count(&self, id: u64) -> usize {
        self.listens.lock().unwrap().iter().filter(|seen| **seen == id).count()
    }

    /// Wait until `id` has been listened for at least `count` times
    pub async fn wait_for_listens(&self, id: u64, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.listen_count(id) < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for listen {} (seen {})",
                id,
                self.listen_count(id)
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockSequencer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.commands.send(Command::Disconnect);
    }
}
