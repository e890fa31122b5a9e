//! The `SignalRouter` capability trait.
//!
//! The signal multiplexer routes each probe's measurement line either to
//! the oscilloscope (analog) or to the digital test circuitry, and can
//! actively pull a line low for stimulus injection.

use async_trait::async_trait;
use probos_types::{DigitalLevel, MultiplexerChannel, RigError};

/// The four-channel signal multiplexer.
#[async_trait]
pub trait SignalRouter: Send + Sync {
    fn connected(&self) -> bool;

    async fn start(&self) -> Result<(), RigError>;

    async fn stop(&self) -> Result<(), RigError>;

    /// Actively pull the channel's line low.
    async fn pull(&self, channel: MultiplexerChannel) -> Result<(), RigError>;

    /// Release a previously pulled channel.
    async fn release(&self, channel: MultiplexerChannel) -> Result<(), RigError>;

    /// Route the channel to the digital test circuitry.
    async fn connect_to_digital(&self, channel: MultiplexerChannel) -> Result<(), RigError>;

    /// Route the channel to the oscilloscope input.
    async fn connect_to_analog(&self, channel: MultiplexerChannel) -> Result<(), RigError>;

    /// Read the digital level currently present on the channel.
    async fn test_channel(&self, channel: MultiplexerChannel) -> Result<DigitalLevel, RigError>;

    /// Release every pulled channel and disconnect all routes.
    async fn release_all(&self) -> Result<(), RigError>;
}
