//! Hardware ray tracing for the Photon path tracer.
//!
//! This crate builds on `photon-gpu` using:
//! - `VK_KHR_acceleration_structure` for per-mesh and scene-wide structures
//! - `VK_KHR_ray_tracing_pipeline` for the path tracing pipeline
//! - SPIR-V reflection for constant buffer layouts
//!
//! # Example
//!
//! ```ignore
//! use photon_rt::{Mesh, MeshLibrary, Scene, ShaderPipeline};
//!
//! let mut library = MeshLibrary::new();
//! let mesh = library.add(Mesh::build(&mut device, &vertices, &indices)?);
//!
//! let mut scene = Scene::new(&device, 16)?;
//! scene.contents_mut().add_mesh_data("quad", &vertices, &indices)?;
//! scene.contents_mut().add_instance("quad", InstanceData::default())?;
//! scene.contents_mut().add_mesh(mesh, Matrix::IDENTITY);
//! scene.build(&mut device, &library)?;
//!
//! let mut pipeline = ShaderPipeline::load(&mut device, &[&raygen, &miss, &hit])?;
//! pipeline.build_shader_table(&device)?;
//! scene.update_dispatch_parameters(pipeline.shader_table()?, width, height);
//! ```

pub mod acceleration;
pub mod blas;
pub mod constants;
pub mod pipeline;
pub mod reflect;
pub mod root;
pub mod sbt;
pub mod scene;
pub mod tlas;

pub use blas::{Mesh, MeshId, MeshLibrary, TriangleGeometry};
pub use constants::{ConstantBuffer, HostWrite};
pub use pipeline::{PipelinePlan, ShaderPipeline};
pub use reflect::{reflect, ConstantBufferLayout, ConstantVariable, ShaderReflection};
pub use root::RootArguments;
pub use sbt::{ShaderTable, ShaderTableLayout};
pub use scene::{MeshRange, Scene, SceneContents};
pub use tlas::Tlas;
