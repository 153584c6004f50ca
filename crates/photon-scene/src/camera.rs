//! Initial camera from a scene description.

use crate::description::{Property, SceneDescription};
use crate::error::{Result, SceneError};
use glam::Vec3;
use photon_core::Matrix;

/// Near plane distance.
pub const NEAR: f32 = 0.001;
/// Far plane distance.
pub const FAR: f32 = 10000.0;

/// Projection, view and viewport described by `scene.json`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSetup {
    pub projection: Matrix,
    pub view: Matrix,
    pub from: Vec3,
    pub to: Vec3,
    pub up: Vec3,
    pub width: u32,
    pub height: u32,
}

impl CameraSetup {
    pub fn from_description(description: &SceneDescription) -> Result<Self> {
        let (width, height) = (description.width, description.height);
        if width == 0 || height == 0 {
            return Err(SceneError::InvalidData(format!(
                "Viewport {width}x{height} is empty"
            )));
        }

        let mut projection = Matrix::perspective(NEAR, FAR, width as f32 / height as f32, description.fov);
        if description.flip_x == 1 {
            projection.m[0] = -projection.m[0];
        }

        let from = vector("from", &description.from)?;
        let to = vector("to", &description.to)?;
        let up = vector("up", &description.up)?;
        if (to - from).length_squared() == 0.0 {
            return Err(SceneError::InvalidData("Camera looks at its own position".into()));
        }

        Ok(Self {
            projection,
            view: Matrix::look_at(from, to, up),
            from,
            to,
            up,
            width,
            height,
        })
    }

    pub fn inverse_view(&self) -> Result<Matrix> {
        Ok(self.view.invert()?)
    }

    pub fn inverse_projection(&self) -> Result<Matrix> {
        Ok(self.projection.invert()?)
    }

    /// Unit view direction.
    pub fn forward(&self) -> Vec3 {
        (self.to - self.from).normalize()
    }
}

fn vector(name: &str, property: &Property) -> Result<Vec3> {
    property
        .as_vec3()
        .map(Vec3::from_array)
        .ok_or_else(|| SceneError::InvalidData(format!("Camera '{name}' is not a vector: {property:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn description(json: &str) -> SceneDescription {
        SceneDescription::from_json(json).unwrap()
    }

    #[test]
    fn view_moves_eye_to_origin() {
        let camera = CameraSetup::from_description(&description(
            r#"{ "from": [0, 1, 4], "to": [0, 1, 0], "up": [0, 1, 0] }"#,
        ))
        .unwrap();

        let eye = camera.view.transform_point(camera.from);
        assert_relative_eq!(eye.length(), 0.0, epsilon = 1e-5);
        // Right-handed view space looks down -Z
        let target = camera.view.transform_point(camera.to);
        assert_relative_eq!(target.z, -4.0, epsilon = 1e-5);

        let world_eye = camera.inverse_view().unwrap().translation();
        assert_relative_eq!(world_eye.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(world_eye.z, 4.0, epsilon = 1e-5);
        assert_relative_eq!(camera.forward().z, -1.0);
    }

    #[test]
    fn flip_x_negates_horizontal_scale() {
        let plain = CameraSetup::from_description(&description(r#"{ "width": 200, "height": 100 }"#)).unwrap();
        let flipped =
            CameraSetup::from_description(&description(r#"{ "width": 200, "height": 100, "flipX": 1 }"#))
                .unwrap();

        assert!(plain.projection.m[0] > 0.0);
        assert_relative_eq!(flipped.projection.m[0], -plain.projection.m[0]);
        assert_eq!(flipped.projection.m[1..], plain.projection.m[1..]);
        // Aspect 2: horizontal scale is half the vertical one
        assert_relative_eq!(plain.projection.m[0] * 2.0, plain.projection.get(1, 1), epsilon = 1e-5);
    }

    #[test]
    fn degenerate_setups_are_rejected() {
        let empty = description(r#"{ "width": 0 }"#);
        assert!(matches!(
            CameraSetup::from_description(&empty),
            Err(SceneError::InvalidData(_))
        ));

        let same = description(r#"{ "from": [1, 1, 1], "to": "1 1 1" }"#);
        assert!(CameraSetup::from_description(&same).is_err());

        let malformed = description(r#"{ "up": "up" }"#);
        assert!(CameraSetup::from_description(&malformed).is_err());
    }
}
