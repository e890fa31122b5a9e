//! The `UartAdapter` capability trait.

use async_trait::async_trait;
use probos_types::RigError;
use tokio::sync::broadcast;

/// A UART bridge to the board under test.
///
/// Received lines are fanned out over a broadcast channel so several
/// observers can follow the traffic independently.
#[async_trait]
pub trait UartAdapter: Send + Sync {
    fn connected(&self) -> bool;

    /// Open the port at the given baud rate.
    async fn open(&self, baud_rate: u32) -> Result<(), RigError>;

    async fn close(&self) -> Result<(), RigError>;

    /// Send one line of data.
    async fn send(&self, data: &str) -> Result<(), RigError>;

    /// Subscribe to received lines.
    fn subscribe_rx(&self) -> broadcast::Receiver<String>;
}
