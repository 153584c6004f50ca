//! Matrix and bounds helpers.

use std::ops::Mul;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Row-major 4x4 transform.
///
/// Element `(row, col)` is stored at `m[row * 4 + col]` and transforms act on
/// column vectors, so the translation lives in the last column. This is the
/// layout scene files use and the one acceleration-structure instances expect
/// for their 3x4 transform.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize)]
pub struct Matrix {
    pub m: [f32; 16],
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        m: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Create a matrix from 16 row-major elements.
    #[inline]
    pub const fn from_rows(m: [f32; 16]) -> Self {
        Self { m }
    }

    /// Element at `(row, col)`.
    #[inline]
    pub const fn get(&self, row: usize, col: usize) -> f32 {
        self.m[row * 4 + col]
    }

    /// Row `i` as four floats.
    #[inline]
    pub fn row(&self, i: usize) -> [f32; 4] {
        [
            self.m[i * 4],
            self.m[i * 4 + 1],
            self.m[i * 4 + 2],
            self.m[i * 4 + 3],
        ]
    }

    /// Translation part of the transform.
    #[inline]
    pub const fn translation(&self) -> Vec3 {
        Vec3::new(self.m[3], self.m[7], self.m[11])
    }

    /// Convert to a glam matrix (column-major storage, same transform).
    #[inline]
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array(&self.m).transpose()
    }

    /// Convert from a glam matrix.
    #[inline]
    pub fn from_mat4(mat: Mat4) -> Self {
        Self {
            m: mat.transpose().to_cols_array(),
        }
    }

    /// Column-major elements, the default matrix layout of GLSL uniform blocks.
    #[inline]
    pub fn to_cols_array(&self) -> [f32; 16] {
        self.to_mat4().to_cols_array()
    }

    /// Transpose of this matrix.
    #[inline]
    pub fn transpose(&self) -> Self {
        Self::from_mat4(self.to_mat4().transpose())
    }

    /// Inverse of this matrix.
    ///
    /// A singular (or non-finite) matrix has no inverse and yields
    /// [`Error::Domain`].
    pub fn invert(&self) -> Result<Self> {
        let mat = self.to_mat4();
        let det = mat.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(Error::Domain(format!(
                "cannot invert matrix with determinant {det}"
            )));
        }
        Ok(Self::from_mat4(mat.inverse()))
    }

    /// Transform a point, including the perspective divide.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.to_mat4().project_point3(p)
    }

    /// Transform a direction (ignores translation).
    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.to_mat4().transform_vector3(v)
    }

    /// The upper 3x4 block in row-major order.
    #[inline]
    pub fn to_transform_3x4(&self) -> [f32; 12] {
        let mut out = [0.0; 12];
        out.copy_from_slice(&self.m[..12]);
        out
    }

    /// Right-handed view matrix looking from `from` towards `to`.
    pub fn look_at(from: Vec3, to: Vec3, up: Vec3) -> Self {
        Self::from_mat4(Mat4::look_at_rh(from, to, up))
    }

    /// Right-handed perspective projection with a `[0, 1]` depth range.
    ///
    /// `fov_degrees` is the vertical field of view.
    pub fn perspective(near: f32, far: f32, aspect: f32, fov_degrees: f32) -> Self {
        Self::from_mat4(Mat4::perspective_rh(
            fov_degrees.to_radians(),
            aspect,
            near,
            far,
        ))
    }
}

impl Mul for Matrix {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::from_mat4(self.to_mat4() * rhs.to_mat4())
    }
}

/// Axis-aligned bounds accumulated while loading geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for SceneBounds {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneBounds {
    /// Empty bounds; the first `extend` sets both corners.
    pub const fn new() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(-f32::MAX),
        }
    }

    /// Grow the bounds to contain `p`.
    #[inline]
    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Forget every point seen so far.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True until a point has been added.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    /// Size along each axis (zero when empty).
    pub fn extent(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_matrix_eq(a: &Matrix, b: &Matrix) {
        for (x, y) in a.m.iter().zip(b.m.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-5);
        }
    }

    fn translation(x: f32, y: f32, z: f32) -> Matrix {
        Matrix::from_rows([
            1.0, 0.0, 0.0, x, //
            0.0, 1.0, 0.0, y, //
            0.0, 0.0, 1.0, z, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    #[test]
    fn glam_round_trip_preserves_layout() {
        let m = translation(1.0, 2.0, 3.0);
        assert_eq!(Matrix::from_mat4(m.to_mat4()), m);
        assert_eq!(m.to_mat4().w_axis.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.translation(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn invert_translation() {
        let m = translation(1.0, -2.0, 4.0);
        let inv = m.invert().unwrap();
        assert_matrix_eq(&inv, &translation(-1.0, 2.0, -4.0));
        assert_matrix_eq(&(m * inv), &Matrix::IDENTITY);
    }

    #[test]
    fn invert_singular_is_domain_error() {
        let singular = Matrix::from_rows([0.0; 16]);
        assert!(matches!(singular.invert(), Err(Error::Domain(_))));
    }

    #[test]
    fn transform_point_applies_translation() {
        let m = translation(1.0, 2.0, 3.0);
        let p = m.transform_point(Vec3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p.x, 2.0);
        assert_relative_eq!(p.y, 3.0);
        assert_relative_eq!(p.z, 4.0);

        let v = m.transform_vector(Vec3::X);
        assert_relative_eq!(v.x, 1.0);
        assert_relative_eq!(v.y, 0.0);
    }

    #[test]
    fn look_at_down_negative_z() {
        let view = Matrix::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        assert_matrix_eq(&view, &translation(0.0, 0.0, -5.0));
    }

    #[test]
    fn perspective_entries() {
        let p = Matrix::perspective(0.1, 100.0, 2.0, 90.0);
        assert_relative_eq!(p.get(0, 0), 0.5, epsilon = 1e-5);
        assert_relative_eq!(p.get(1, 1), 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.get(2, 2), -100.0 / 99.9, epsilon = 1e-5);
        assert_relative_eq!(p.get(3, 2), -1.0);
        assert_relative_eq!(p.get(3, 3), 0.0);
    }

    #[test]
    fn transform_3x4_keeps_first_three_rows() {
        let m = Matrix::from_rows(std::array::from_fn(|i| i as f32));
        let t = m.to_transform_3x4();
        assert_eq!(t[0..4], m.row(0));
        assert_eq!(t[4..8], m.row(1));
        assert_eq!(t[8..12], m.row(2));
    }

    #[test]
    fn bounds_extend() {
        let mut bounds = SceneBounds::new();
        assert!(bounds.is_empty());
        assert_eq!(bounds.extent(), Vec3::ZERO);

        bounds.extend(Vec3::new(1.0, -1.0, 0.0));
        bounds.extend(Vec3::new(-1.0, 2.0, 3.0));
        assert_eq!(bounds.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(bounds.extent(), Vec3::new(2.0, 3.0, 3.0));

        bounds.reset();
        assert!(bounds.is_empty());
    }
}
