//! First-person camera driven by keyboard and mouse deltas.

use glam::{Vec2, Vec3};
use photon_core::Matrix;
use photon_scene::CameraSetup;

/// Distance moved per frame while a movement key is held.
pub const MOVE_SPEED: f32 = 0.1;

/// Radians turned per pixel of mouse drag.
pub const LOOK_SENSITIVITY: f32 = 0.001;

const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Input gathered since the previous frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraInput {
    /// +1 forward, -1 back.
    pub forward: f32,
    /// +1 right, -1 left.
    pub right: f32,
    /// Mouse drag in pixels.
    pub look: Vec2,
}

impl CameraInput {
    pub fn is_idle(&self) -> bool {
        self.forward == 0.0 && self.right == 0.0 && self.look == Vec2::ZERO
    }
}

/// Camera position and orientation as yaw and pitch around world up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    up: Vec3,
}

impl FlyCamera {
    /// Start where the scene description places the camera.
    pub fn from_setup(setup: &CameraSetup) -> Self {
        let forward = setup.forward();
        Self {
            position: setup.from,
            yaw: forward.x.atan2(-forward.z),
            pitch: forward.y.clamp(-1.0, 1.0).asin().clamp(-MAX_PITCH, MAX_PITCH),
            up: setup.up,
        }
    }

    /// Unit view direction.
    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, -cos_pitch * cos_yaw)
    }

    /// Unit direction to the right of the view, parallel to the ground.
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize_or_zero()
    }

    /// Apply one frame of input. Returns true if the camera moved.
    pub fn apply(&mut self, input: &CameraInput) -> bool {
        if input.is_idle() {
            return false;
        }

        self.yaw += input.look.x * LOOK_SENSITIVITY;
        self.pitch = (self.pitch - input.look.y * LOOK_SENSITIVITY).clamp(-MAX_PITCH, MAX_PITCH);
        self.position += self.forward() * (input.forward * MOVE_SPEED)
            + self.right() * (input.right * MOVE_SPEED);
        true
    }

    pub fn view(&self) -> Matrix {
        Matrix::look_at(self.position, self.position + self.forward(), self.up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use photon_scene::SceneDescription;

    fn camera(json: &str) -> FlyCamera {
        let description = SceneDescription::from_json(json).unwrap();
        FlyCamera::from_setup(&CameraSetup::from_description(&description).unwrap())
    }

    #[test]
    fn starts_looking_at_target() {
        let camera = camera(r#"{ "from": [0, 0, 0], "to": [3, 0, -3] }"#);
        let forward = camera.forward();
        assert_relative_eq!(forward.x, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-5);
        assert_relative_eq!(forward.z, -std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-5);
        assert_relative_eq!(forward.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn initial_view_matches_description() {
        let description =
            SceneDescription::from_json(r#"{ "from": [1, 2, 3], "to": [1, 1, 0] }"#).unwrap();
        let setup = CameraSetup::from_description(&description).unwrap();
        let camera = FlyCamera::from_setup(&setup);

        let expected = setup.view.to_mat4();
        let actual = camera.view().to_mat4();
        assert!(actual.abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn movement_follows_view_direction() {
        let mut camera = camera(r#"{ "from": [0, 0, 0], "to": [0, 0, -1] }"#);
        let moved = camera.apply(&CameraInput {
            forward: 1.0,
            ..Default::default()
        });
        assert!(moved);
        assert_relative_eq!(camera.position.z, -MOVE_SPEED, epsilon = 1e-6);

        camera.apply(&CameraInput {
            right: 1.0,
            ..Default::default()
        });
        assert_relative_eq!(camera.position.x, MOVE_SPEED, epsilon = 1e-6);
    }

    #[test]
    fn idle_input_changes_nothing() {
        let mut camera = camera("{}");
        let before = camera;
        assert!(!camera.apply(&CameraInput::default()));
        assert_eq!(camera, before);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = camera("{}");
        camera.apply(&CameraInput {
            look: Vec2::new(0.0, -1.0e6),
            ..Default::default()
        });
        assert!(camera.pitch < std::f32::consts::FRAC_PI_2);
        assert!(camera.forward().is_finite());
        assert!(camera.view().m.iter().all(|v| v.is_finite()));
    }
}
