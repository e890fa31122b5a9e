//! Leaf math crate: 3-D vectors, 4×4 homogeneous matrices and the rigid
//! probe calibration transform that relates each actuator-local frame to
//! the common global frame.
//!
//! All cross-probe reasoning in the rest of the system happens in the
//! global frame; conversion to a probe's local frame happens exactly once,
//! when the final actuator command is issued.

pub mod transform;

pub use transform::{Matrix4, Transform, Vec3};
