//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use chatdesk_server::{Server, ServerConfig};
use chatdesk_store::{Agent, ConversationStore, InMemoryStore};

/// How long a client waits for an expected event.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    /// The store behind the server, for seeding and assertions.
    pub store: Arc<InMemoryStore>,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with default configuration.
    pub async fn start() -> Result<Self> {
        Self::start_with_config(ServerConfig::default()).await
    }

    /// Start a new test server with the given configuration.
    pub async fn start_with_config(config: ServerConfig) -> Result<Self> {
        let addr = find_available_port().await?;
        let store = Arc::new(InMemoryStore::new());

        let server = Server::new(store.clone(), config.with_bind_address(addr));
        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            store,
            _handle: handle,
        })
    }

    /// Seed an agent record.
    pub async fn add_agent(&self, id: &str, name: &str) -> Result<()> {
        self.store.upsert_agent(&Agent::new(id, name)).await?;
        Ok(())
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket URL for the server.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get a request builder for a path.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url(), path))
    }

    /// Open a WebSocket client against this server.
    pub async fn connect(&self) -> Result<WsClient> {
        WsClient::connect(&self.ws_url()).await
    }
}

/// A minimal JSON-over-WebSocket client.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url).await.context("websocket connect")?;
        Ok(Self { stream })
    }

    /// Send an `{event, data}` envelope.
    pub async fn send(&mut self, event: &str, data: Value) -> Result<()> {
        let frame = serde_json::json!({ "event": event, "data": data });
        self.send_raw(&frame.to_string()).await
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Receive the next JSON event, or fail after a timeout.
    pub async fn recv(&mut self) -> Result<Value> {
        timeout(EVENT_TIMEOUT, self.next_json())
            .await
            .context("timed out waiting for event")?
    }

    /// Receive events until one named `event` arrives and return its data.
    pub async fn expect_event(&mut self, event: &str) -> Result<Value> {
        let wait = async {
            loop {
                let frame = self.next_json().await?;
                if frame["event"] == event {
                    return Ok(frame["data"].clone());
                }
            }
        };
        timeout(EVENT_TIMEOUT, wait)
            .await
            .with_context(|| format!("timed out waiting for {event}"))?
    }

    /// Assert no event named `event` arrives within `window`.
    pub async fn expect_no_event(&mut self, event: &str, window: Duration) -> Result<()> {
        let wait = async {
            loop {
                let frame = self.next_json().await?;
                if frame["event"] == event {
                    anyhow::bail!("unexpected {event}: {frame}");
                }
            }
        };
        match timeout(window, wait).await {
            Err(_) => Ok(()),
            Ok(result) => result,
        }
    }

    /// Round-trip a ping so every earlier frame on this socket is processed.
    pub async fn sync(&mut self) -> Result<()> {
        self.send_raw(r#"{"event":"ping"}"#).await?;
        self.expect_event("pong").await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn next_json(&mut self) -> Result<Value> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
