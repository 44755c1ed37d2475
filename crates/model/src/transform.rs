use crate::{ModelError, Result};
use serde::{Deserialize, Serialize};

const RIGID_TOLERANCE: f32 = 1e-3;

/// Rigid 4×4 pose in the spatial map's coordinate frame.
///
/// Stored column-major: `columns[3]` holds the translation, the upper 3×3
/// block the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    columns: [[f32; 4]; 4],
}

impl Transform {
    pub const IDENTITY: Self = Self {
        columns: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    #[must_use]
    pub const fn from_columns(columns: [[f32; 4]; 4]) -> Self {
        Self { columns }
    }

    /// Column-major flat layout, the order used on disk.
    #[must_use]
    pub fn from_array(values: [f32; 16]) -> Self {
        let mut columns = [[0.0; 4]; 4];
        for (idx, value) in values.into_iter().enumerate() {
            columns[idx / 4][idx % 4] = value;
        }
        Self { columns }
    }

    #[must_use]
    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        let mut out = Self::IDENTITY;
        out.columns[3] = [x, y, z, 1.0];
        out
    }

    #[must_use]
    pub const fn columns(&self) -> &[[f32; 4]; 4] {
        &self.columns
    }

    #[must_use]
    pub fn to_array(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        for (c, column) in self.columns.iter().enumerate() {
            out[c * 4..c * 4 + 4].copy_from_slice(column);
        }
        out
    }

    #[must_use]
    pub fn translation(&self) -> [f32; 3] {
        let t = self.columns[3];
        [t[0], t[1], t[2]]
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.columns.iter().flatten().all(|v| v.is_finite())
    }

    /// Checks the matrix is a proper rigid transform: finite, homogeneous
    /// bottom row, orthonormal rotation block with determinant +1.
    pub fn validate(&self) -> Result<()> {
        if !self.is_finite() {
            return Err(ModelError::InvalidPose("non-finite component".into()));
        }
        let bottom = [
            self.columns[0][3],
            self.columns[1][3],
            self.columns[2][3],
            self.columns[3][3],
        ];
        if bottom
            .iter()
            .zip([0.0, 0.0, 0.0, 1.0])
            .any(|(got, want)| (got - want).abs() > RIGID_TOLERANCE)
        {
            return Err(ModelError::InvalidPose(format!(
                "bottom row {bottom:?} is not homogeneous"
            )));
        }

        let axis = |i: usize| -> [f32; 3] {
            let c = self.columns[i];
            [c[0], c[1], c[2]]
        };
        let (x, y, z) = (axis(0), axis(1), axis(2));
        for (i, a) in [x, y, z].iter().enumerate() {
            let len = dot(a, a).sqrt();
            if (len - 1.0).abs() > RIGID_TOLERANCE {
                return Err(ModelError::InvalidPose(format!(
                    "rotation axis {i} has length {len}"
                )));
            }
        }
        if dot(&x, &y).abs() > RIGID_TOLERANCE
            || dot(&y, &z).abs() > RIGID_TOLERANCE
            || dot(&x, &z).abs() > RIGID_TOLERANCE
        {
            return Err(ModelError::InvalidPose("rotation is not orthogonal".into()));
        }
        let det = dot(&cross(&x, &y), &z);
        if (det - 1.0).abs() > RIGID_TOLERANCE {
            return Err(ModelError::InvalidPose(format!(
                "rotation determinant {det} (reflection)"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        self.columns
            .iter()
            .flatten()
            .zip(other.columns.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn dot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_layout_is_column_major() {
        let t = Transform::from_translation(1.0, 2.0, 3.0);
        let flat = t.to_array();
        assert_eq!(&flat[12..16], &[1.0, 2.0, 3.0, 1.0]);
        assert_eq!(Transform::from_array(flat), t);
        assert_eq!(t.translation(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn identity_and_translation_are_rigid() {
        assert!(Transform::IDENTITY.validate().is_ok());
        assert!(Transform::from_translation(-4.0, 0.5, 9.0).validate().is_ok());
    }

    #[test]
    fn rotation_about_y_is_rigid() {
        let (s, c) = std::f32::consts::FRAC_PI_3.sin_cos();
        let t = Transform::from_columns([
            [c, 0.0, -s, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [s, 0.0, c, 0.0],
            [0.5, 0.0, 0.5, 1.0],
        ]);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn scaled_nan_and_reflected_poses_are_rejected() {
        let mut scaled = Transform::IDENTITY;
        scaled.columns[0][0] = 2.0;
        assert!(scaled.validate().is_err());

        let mut nan = Transform::IDENTITY;
        nan.columns[3][1] = f32::NAN;
        assert!(nan.validate().is_err());

        let mut mirrored = Transform::IDENTITY;
        mirrored.columns[2][2] = -1.0;
        assert!(mirrored.validate().is_err());

        let mut projective = Transform::IDENTITY;
        projective.columns[0][3] = 0.3;
        assert!(projective.validate().is_err());
    }
}
