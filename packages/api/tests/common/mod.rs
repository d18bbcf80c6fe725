#![allow(dead_code)]

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api::{CacheSystem, ServiceConfig};
use bytes::Bytes;
use cache_core::{ImageSource, PortFuture, SourceError, SourceImage};
use futures_util::StreamExt;
use serde_json::Value;
use storage::StorageConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const JPEG: &[u8] = b"\xff\xd8\xff\xe0jpeg";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Origin that serves the same small JPEG for every path.
pub struct StaticSource;

impl ImageSource for StaticSource {
    fn fetch<'a>(&'a self, source_url: &'a str) -> PortFuture<'a, Result<SourceImage, SourceError>> {
        Box::pin(async move {
            Ok(SourceImage {
                source_url: source_url.to_string(),
                bytes: Bytes::from_static(JPEG),
                content_type: Some("image/jpeg".into()),
            })
        })
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub system: CacheSystem,
    pub server: JoinHandle<()>,
}

/// Serve the full router on an ephemeral port with in-memory backends.
pub async fn spawn_server() -> Result<TestServer, Box<dyn Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut config = ServiceConfig::default();
    config.queue.retry_backoff_ms = 0;
    config.storage = StorageConfig::memory().with_public_base_url(format!("http://{addr}/cdn"));

    let system = CacheSystem::build(&config, Arc::new(StaticSource)).await?;
    let app = api::router(system.state(), &config.ws_path);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestServer {
        addr,
        system,
        server,
    })
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect_ws(&self) -> Result<WsStream, Box<dyn Error>> {
        let (stream, _) = timeout(
            WAIT_TIMEOUT,
            tokio_tungstenite::connect_async(format!("ws://{}/ws/cache", self.addr)),
        )
        .await??;
        Ok(stream)
    }
}

/// Next JSON text frame, skipping transport frames.
pub async fn next_json(ws: &mut WsStream) -> Result<Value, Box<dyn Error>> {
    loop {
        let message = timeout(WAIT_TIMEOUT, ws.next())
            .await?
            .ok_or("websocket closed")??;
        if let Message::Text(text) = message {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Skip frames until one of type `ty` arrives.
pub async fn next_of_type(ws: &mut WsStream, ty: &str) -> Result<Value, Box<dyn Error>> {
    loop {
        let frame = next_json(ws).await?;
        if frame["type"] == ty {
            return Ok(frame);
        }
    }
}
