//! Core types and math for the Photon path tracer.
//!
//! This crate provides the foundational types shared by every layer:
//! - Row-major [`Matrix`] transforms and scene bounds
//! - GPU-shared vertex, instance and light layouts
//! - The core error type

pub mod error;
pub mod math;
pub mod types;

pub use error::{Error, Result};
pub use math::{Matrix, SceneBounds};
pub use types::{AreaLight, BsdfType, InstanceData, StaticVertex};

/// Renderer-wide constants
pub mod constants {
    /// Number of slots in the shader-visible descriptor table
    pub const DESCRIPTOR_CAPACITY: u32 = 16384;
    /// Default number of instances a scene preallocates for
    pub const MAX_INSTANCES: u32 = 1_048_576;
    /// Alignment of constant buffer sizes in bytes
    pub const CONSTANT_BUFFER_ALIGNMENT: u32 = 256;
    /// Row pitch alignment used when staging texture data
    pub const TEXTURE_PITCH_ALIGNMENT: u32 = 256;
    /// Descriptor slot reserved for the render target
    pub const RENDER_TARGET_SLOT: u32 = 0;
}
