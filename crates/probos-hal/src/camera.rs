//! The `Camera` capability trait.

use async_trait::async_trait;
use probos_types::RigError;

/// A single captured frame.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Raw pixel data, row-major, driver-defined format.
    pub data: Vec<u8>,
}

/// A static observation camera mounted over the probing area.
#[async_trait]
pub trait Camera: Send + Sync {
    fn name(&self) -> &str;

    fn connected(&self) -> bool;

    async fn start(&self) -> Result<(), RigError>;

    async fn stop(&self) -> Result<(), RigError>;

    /// Capture a single frame.
    async fn capture(&self) -> Result<CameraFrame, RigError>;
}
