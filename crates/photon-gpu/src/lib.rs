//! Vulkan device layer for the Photon path tracer.
//!
//! This crate provides:
//! - Adapter selection, device and queue creation
//! - Command submission and the timeline-semaphore fence
//! - The shader-visible descriptor table
//! - Resource state transitions
//! - Buffer and texture upload through staging copies
//! - The render target and its presentation to a window

pub mod barrier;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod render_target;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use barrier::{ResourceBarrier, ResourceState};
pub use buffer::{read_back_buffer, upload_buffer, StructuredBuffer};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::GpuContext;
pub use descriptors::{DescriptorAllocator, DescriptorHeap, DescriptorSlot};
pub use device::{Device, DeviceBuilder};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use render_target::RenderTarget;
pub use sync::Fence;
pub use texture::{Texture, TextureFormat};

// Re-exported so dependents can name Vulkan types without their own ash dependency
pub use ash::vk;
pub use gpu_allocator::MemoryLocation;
