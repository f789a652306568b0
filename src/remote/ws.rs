// Stepwright: WebSocket backend channel

use super::{BackendChannel, Frame, EV_DISCONNECT};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Channel to the automation backend over a single WebSocket connection.
/// Frames are JSON text messages `{"event": ..., "data": ...}`.
pub struct WsChannel {
    url: String,
    events: broadcast::Sender<Frame>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: Arc<AtomicBool>,
}

impl WsChannel {
    pub fn new(url: &str) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            url: url.to_string(),
            events,
            outbound: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BackendChannel for WsChannel {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut outbound = self.outbound.lock().await;
        if self.connected.load(Ordering::SeqCst) && outbound.is_some() {
            return Ok(());
        }

        let ws_url = to_ws_url(&self.url)?;
        tracing::info!(url = %ws_url, "Connecting to automation backend");
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let connected = self.connected.clone();
        let events = self.events.clone();

        // Writer task
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::error!("Backend socket write failed: {}", e);
                    break;
                }
            }
        });

        // Reader task
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => {
                            tracing::trace!(event = %frame.event, "Backend event");
                            let _ = events.send(frame);
                        }
                        Err(e) => tracing::warn!("Unparseable backend message: {} - {}", e, text),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Automation backend closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Backend socket error: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = events.send(Frame::new(EV_DISCONNECT, serde_json::Value::Null));
        });

        *outbound = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to automation backend");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let json = serde_json::to_string(&frame).map_err(|e| TransportError::Send(e.to_string()))?;

        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(Message::Text(json.into()))
            .map_err(|_| TransportError::ConnectionLost)
    }

    fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.events.subscribe()
    }

    fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

/// Map an HTTP(S) backend URL to its WebSocket form. A bare host gets the
/// `/ws` path.
pub fn to_ws_url(url: &str) -> Result<String, TransportError> {
    let mut parsed =
        Url::parse(url).map_err(|e| TransportError::Connect(format!("invalid URL '{}': {}", url, e)))?;

    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Connect(format!(
                "unsupported URL scheme: {}",
                other
            )))
        }
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| TransportError::Connect("failed to set URL scheme".into()))?;

    if parsed.path().is_empty() || parsed.path() == "/" {
        parsed.set_path("/ws");
    }
    Ok(parsed.to_string())
}
