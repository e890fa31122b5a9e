//! The `PowerController` capability trait.

use async_trait::async_trait;
use probos_types::RigError;

/// Switchable power feed for the board under test.
#[async_trait]
pub trait PowerController: Send + Sync {
    fn connected(&self) -> bool;

    async fn start(&self) -> Result<(), RigError>;

    async fn stop(&self) -> Result<(), RigError>;

    async fn switch_on(&self) -> Result<(), RigError>;

    async fn switch_off(&self) -> Result<(), RigError>;

    fn is_on(&self) -> bool;
}
