// Stepwright: Remote execution (automation backend channel and client)

pub mod client;
pub mod protocol;
pub mod ws;

pub use client::{RemoteClient, RemoteOutcome};
pub use protocol::{BackendEvent, Frame, RunCommand};
pub use ws::WsChannel;

use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Synthetic inbound event a channel publishes when its connection drops.
pub const EV_DISCONNECT: &str = "disconnect";

/// Bidirectional event channel to the automation backend.
///
/// Inbound frames are fanned out to every subscriber; a subscriber stops
/// counting towards `listener_count` as soon as its receiver is dropped.
#[async_trait]
pub trait BackendChannel: Send + Sync {
    /// Establish the connection. A no-op when already connected.
    async fn connect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    fn subscribe(&self) -> broadcast::Receiver<Frame>;

    fn listener_count(&self) -> usize;
}
