//! Hardware abstraction layer for the probing rig.
//!
//! Each hardware capability is a small async trait (`Probe`, `Camera`,
//! `SignalRouter`, `PowerController`, `UartAdapter`).  The orchestrator
//! only ever talks to the traits, so drivers can be swapped without
//! touching planning or task logic.  The [`sim`] module provides full
//! in-process drivers so the whole stack runs headless in tests and CI.

pub mod camera;
pub mod power;
pub mod probe;
pub mod router;
pub mod sim;
pub mod uart;

pub use camera::{Camera, CameraFrame};
pub use power::PowerController;
pub use probe::{Axis, Probe};
pub use router::SignalRouter;
pub use uart::UartAdapter;
