//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No adapter with the required ray tracing support was found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Buffer, image or other object creation failed (including allocator exhaustion).
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module, reflection or pipeline creation failed.
    #[error("Shader compilation failed: {0}")]
    Compile(String),

    /// Named resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A fixed-capacity table is full.
    #[error("Capacity exceeded: all {capacity} slots are in use")]
    CapacityExceeded { capacity: u32 },

    /// Operation not allowed in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller-supplied data is unusable.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
