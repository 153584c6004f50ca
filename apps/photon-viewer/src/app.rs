//! Viewer state and the per-frame loop.

use std::path::Path;
use std::sync::Arc;

use glam::Vec2;
use hashbrown::HashSet;
use tracing::info;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window;

use photon_core::constants::MAX_INSTANCES;
use photon_core::Matrix;
use photon_gpu::{Device, DeviceBuilder};
use photon_rt::{Scene, ShaderPipeline};
use photon_scene::{
    load_scene, FileDecoder, LoadContext, ObjMeshSource, SceneDescription, TextureTable,
};

use crate::camera::{CameraInput, FlyCamera};

/// Name of the constant buffer block declared by the path tracer.
const CONSTANTS: &str = "CBuffer";

/// Keyboard and mouse state between frames.
#[derive(Default)]
struct InputState {
    held: HashSet<KeyCode>,
    dragging: bool,
    cursor: Option<Vec2>,
    look: Vec2,
}

impl InputState {
    fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        f32::from(u8::from(self.held.contains(&positive)))
            - f32::from(u8::from(self.held.contains(&negative)))
    }

    /// Input for this frame; mouse motion is consumed.
    fn take(&mut self) -> CameraInput {
        CameraInput {
            forward: self.axis(KeyCode::KeyW, KeyCode::KeyS),
            right: self.axis(KeyCode::KeyD, KeyCode::KeyA),
            look: std::mem::take(&mut self.look),
        }
    }
}

/// A loaded scene with everything needed to render it.
///
/// Field order is drop order: GPU resources go before the device, the
/// device before the window it presents to.
pub struct Viewer {
    scene: Scene,
    pipeline: ShaderPipeline,
    _textures: TextureTable,
    load: LoadContext,
    device: Device,
    window: Arc<Window>,
    camera: FlyCamera,
    inverse_projection: Matrix,
    fov: f32,
    flip_x: bool,
    input: InputState,
    samples: u32,
    frames: u64,
}

impl Viewer {
    /// Create the device, compile the path tracer and load the scene.
    pub fn new(
        window: Arc<Window>,
        scene_dir: &Path,
        description: &SceneDescription,
        validation: bool,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        let mut device = DeviceBuilder::new()
            .app_name("Photon Viewer")
            .validation(validation)
            .build(&*window, width, height)?;
        info!("GPU: {}", device.capabilities().summary());

        let shaders = photon_shaders::compile_path_tracer()?;
        let mut pipeline = ShaderPipeline::load(&mut device, &shaders.modules())?;
        pipeline.build_shader_table(&device)?;

        let mut scene = Scene::new(&device, MAX_INSTANCES)?;
        let mut load = LoadContext::new();
        let loaded = load_scene(
            &mut load,
            &mut device,
            scene_dir,
            description,
            scene.contents_mut(),
            &ObjMeshSource,
        )?;

        let textures = load.textures.upload_all(&mut device, &FileDecoder)?;
        scene.set_texture_table(textures.base());
        scene.set_environment_map(
            textures.slot(loaded.environment.texture)?,
            loaded.environment.luminance,
        );
        scene.build(&mut device, &load.meshes)?;
        scene.update_dispatch_parameters(pipeline.shader_table()?, width, height);

        pipeline.update_constant_value(CONSTANTS, "nLights", &scene.light_count())?;
        pipeline.update_constant_value(
            CONSTANTS,
            "useEnvironmentMap",
            &u32::from(scene.uses_environment_map()),
        )?;

        let flip_x = description.flip_x == 1;
        let inverse_projection = projection(description.fov, flip_x, width, height).invert()?;
        let camera = FlyCamera::from_setup(&loaded.camera);

        Ok(Self {
            scene,
            pipeline,
            _textures: textures,
            load,
            device,
            window,
            camera,
            inverse_projection,
            fov: description.fov,
            flip_x,
            input: InputState::default(),
            samples: 0,
            frames: 0,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Track keys and mouse drags. Returns true if Escape was pressed.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    if code == KeyCode::Escape {
                        return event.state == ElementState::Pressed;
                    }
                    if event.state == ElementState::Pressed {
                        self.input.held.insert(code);
                    } else {
                        self.input.held.remove(&code);
                    }
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.input.dragging = *state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                let cursor = Vec2::new(position.x as f32, position.y as f32);
                if let (true, Some(last)) = (self.input.dragging, self.input.cursor) {
                    self.input.look += cursor - last;
                }
                self.input.cursor = Some(cursor);
            }
            WindowEvent::Focused(false) => {
                self.input.held.clear();
                self.input.dragging = false;
            }
            _ => {}
        }
        false
    }

    /// Trace one more sample per pixel and present it.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn render_frame(&mut self) -> anyhow::Result<()> {
        self.device.reset_command_list()?;

        if self.camera.apply(&self.input.take()) {
            self.samples = 0;
        }
        self.samples += 1;

        let inverse_view = self.camera.view().invert()?;
        self.pipeline
            .update_constant_value(CONSTANTS, "inverseView", &inverse_view.to_cols_array())?;
        self.pipeline.update_constant_value(
            CONSTANTS,
            "inverseProjection",
            &self.inverse_projection.to_cols_array(),
        )?;
        self.pipeline
            .update_constant_value(CONSTANTS, "SPP", &(self.samples as f32))?;

        self.pipeline.apply(&mut self.device)?;
        self.scene.draw(&self.device, &self.pipeline)?;
        self.device.present_frame()?;

        self.frames += 1;
        Ok(())
    }

    /// Resize the render target and restart accumulation.
    pub fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.device.resize(width, height)?;
        self.scene
            .update_dispatch_parameters(self.pipeline.shader_table()?, width, height);
        self.inverse_projection = projection(self.fov, self.flip_x, width, height).invert()?;
        self.samples = 0;
        info!("Resized to {width}x{height}");
        Ok(())
    }

    /// Wait for outstanding GPU work before resources are dropped.
    pub fn shutdown(&self) {
        info!(
            "Rendered {} frames, {} meshes",
            self.frames,
            self.load.meshes.len()
        );
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }
    }
}

/// Projection for the window size, matching [`photon_scene::CameraSetup`].
fn projection(fov: f32, flip_x: bool, width: u32, height: u32) -> Matrix {
    let mut projection = Matrix::perspective(
        photon_scene::camera::NEAR,
        photon_scene::camera::FAR,
        width as f32 / height as f32,
        fov,
    );
    if flip_x {
        projection.m[0] = -projection.m[0];
    }
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use photon_scene::CameraSetup;

    #[test]
    fn projection_matches_scene_setup() {
        let description = SceneDescription::from_json(
            r#"{ "width": 300, "height": 200, "fov": 60, "flipX": 1 }"#,
        )
        .unwrap();
        let setup = CameraSetup::from_description(&description).unwrap();
        let ours = projection(60.0, true, 300, 200);
        for (a, b) in ours.m.iter().zip(setup.projection.m.iter()) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn held_keys_become_axes() {
        let mut input = InputState::default();
        input.held.insert(KeyCode::KeyW);
        input.held.insert(KeyCode::KeyA);
        input.look = Vec2::new(3.0, -2.0);

        let frame = input.take();
        assert_eq!(frame.forward, 1.0);
        assert_eq!(frame.right, -1.0);
        assert_eq!(frame.look, Vec2::new(3.0, -2.0));
        assert_eq!(input.take().look, Vec2::ZERO);
    }
}
