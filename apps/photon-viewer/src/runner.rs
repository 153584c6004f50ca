//! Window creation and the event loop.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use photon_scene::SceneDescription;

use crate::app::Viewer;

/// Viewer configuration.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Window title.
    pub title: String,
    /// Directory holding `scene.json`.
    pub scene_dir: PathBuf,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "Photon".to_string(),
            scene_dir: PathBuf::from("scenes/cornell-box"),
            validation: cfg!(debug_assertions),
        }
    }
}

impl ViewerConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the scene directory.
    pub fn with_scene_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scene_dir = dir.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Log directives used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Run the viewer until its window closes.
///
/// Initializes logging from `RUST_LOG` (default `info`), reads the scene
/// description and opens a window of the size it asks for.
pub fn run(config: ViewerConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("{} starting with {}", config.title, config.scene_dir.display());
    let description = SceneDescription::load(&config.scene_dir)?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = ViewerRunner {
        config,
        description,
        viewer: None,
        failure: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// winit application handler owning the viewer once a window exists.
struct ViewerRunner {
    config: ViewerConfig,
    description: SceneDescription,
    viewer: Option<Viewer>,
    failure: Option<anyhow::Error>,
}

impl ViewerRunner {
    fn create_viewer(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<Viewer> {
        let attributes = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(
                self.description.width,
                self.description.height,
            ));
        let window = Arc::new(event_loop.create_window(attributes)?);

        Viewer::new(
            window,
            &self.config.scene_dir,
            &self.description,
            self.config.validation,
        )
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop, failure: Option<anyhow::Error>) {
        if let Some(viewer) = self.viewer.take() {
            viewer.shutdown();
        }
        if let Some(e) = failure {
            error!("{e:#}");
            self.failure = Some(e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for ViewerRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }

        match self.create_viewer(event_loop) {
            Ok(viewer) => {
                self.viewer = Some(viewer);
                info!("Viewer ready");
            }
            Err(e) => self.stop(event_loop, Some(e)),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        if viewer.handle_event(&event) {
            info!("Escape pressed");
            self.stop(event_loop, None);
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.stop(event_loop, None);
            }
            WindowEvent::RedrawRequested => {
                // Device loss and failed submissions end the session
                if let Err(e) = viewer.render_frame() {
                    self.stop(event_loop, Some(e));
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = viewer.resize(size.width, size.height) {
                    self.stop(event_loop, Some(e));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(viewer) = &self.viewer {
            viewer.window().request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_parses() {
        let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        assert_eq!(filter.to_string(), "info");
    }
}
