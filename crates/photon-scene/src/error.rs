//! Scene loading errors.

use thiserror::Error;

/// Errors raised while loading a scene.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Core error: {0}")]
    Core(#[from] photon_core::Error),

    #[error("GPU error: {0}")]
    Gpu(#[from] photon_gpu::GpuError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scene description error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OBJ error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid scene data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, SceneError>;
