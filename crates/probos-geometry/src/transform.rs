//! Rigid-body transform math.
//!
//! A probe's calibration is stored as a 4×4 homogeneous matrix `T` mapping
//! local actuator coordinates into the shared global frame:
//! `to_global(p) = T · [p;1]` and `to_local(p) = T⁻¹ · [p;1]`.
//!
//! Calibration matrices are always rigid (rotation + translation), so the
//! inverse is computed exactly as `[Rᵀ | −Rᵀt]` instead of via a general
//! 4×4 inversion.

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D point or direction in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a new vector.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length.
    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Component-wise replacement of the Z coordinate.
    pub fn with_z(self, z: f64) -> Self {
        Self { z, ..self }
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Matrix4
// ────────────────────────────────────────────────────────────────────────────

/// A 4×4 homogeneous transformation matrix, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4(pub [[f64; 4]; 4]);

impl Matrix4 {
    /// The identity transform.
    pub const fn identity() -> Self {
        Self([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// A pure translation by `t`.
    pub const fn translation(t: Vec3) -> Self {
        Self([
            [1.0, 0.0, 0.0, t.x],
            [0.0, 1.0, 0.0, t.y],
            [0.0, 0.0, 1.0, t.z],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Build a rigid transform from a 3×3 rotation and a translation.
    pub const fn from_rotation_translation(r: [[f64; 3]; 3], t: Vec3) -> Self {
        Self([
            [r[0][0], r[0][1], r[0][2], t.x],
            [r[1][0], r[1][1], r[1][2], t.y],
            [r[2][0], r[2][1], r[2][2], t.z],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// The translational part (last column).
    pub fn translation_part(&self) -> Vec3 {
        Vec3::new(self.0[0][3], self.0[1][3], self.0[2][3])
    }

    /// Apply the matrix to a point in homogeneous coordinates: `T · [p;1]`.
    pub fn mul_point(&self, p: Vec3) -> Vec3 {
        let m = &self.0;
        Vec3::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
            m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
        )
    }

    /// Matrix product `self · rhs`.
    pub fn mul(&self, rhs: &Matrix4) -> Matrix4 {
        let mut out = [[0.0f64; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.0[i][k] * rhs.0[k][j]).sum();
            }
        }
        Matrix4(out)
    }

    /// Exact inverse of a rigid transform: `[Rᵀ | −Rᵀt]`.
    ///
    /// Only valid when the upper-left 3×3 block is a rotation matrix, which
    /// holds for every calibration transform in the system.
    pub fn rigid_inverse(&self) -> Matrix4 {
        let m = &self.0;
        let t = self.translation_part();
        // Transposed rotation block.
        let r = [
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ];
        let ti = Vec3::new(
            -(r[0][0] * t.x + r[0][1] * t.y + r[0][2] * t.z),
            -(r[1][0] * t.x + r[1][1] * t.y + r[1][2] * t.z),
            -(r[2][0] * t.x + r[2][1] * t.y + r[2][2] * t.z),
        );
        Matrix4::from_rotation_translation(r, ti)
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform
// ────────────────────────────────────────────────────────────────────────────

/// A rigid local→global calibration transform with its inverse cached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    mat: Matrix4,
    inv: Matrix4,
}

impl Transform {
    /// Wrap a rigid local→global matrix; the global→local inverse is
    /// derived once up front.
    pub fn new(mat: Matrix4) -> Self {
        Self {
            mat,
            inv: mat.rigid_inverse(),
        }
    }

    /// The raw local→global matrix.
    pub fn matrix(&self) -> &Matrix4 {
        &self.mat
    }

    /// Map a point from the local frame into the global frame.
    pub fn to_global(&self, local: Vec3) -> Vec3 {
        self.mat.mul_point(local)
    }

    /// Map a point from the global frame into the local frame.
    pub fn to_local(&self, global: Vec3) -> Vec3 {
        self.inv.mul_point(global)
    }

    /// Global position of the local origin.
    pub fn origin_global(&self) -> Vec3 {
        self.mat.translation_part()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(Matrix4::identity())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
