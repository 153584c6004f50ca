//! Scene loading for the Photon path tracer.
//!
//! A scene is a directory holding `scene.json` and the files it names.
//! Loading fills a [`photon_rt::SceneContents`] with combined geometry,
//! instance records and area lights, builds one BLAS per mesh and registers
//! the textures the materials reference:
//!
//! ```ignore
//! let mut ctx = LoadContext::new();
//! let description = SceneDescription::load(dir)?;
//! let loaded = load_scene(&mut ctx, &mut device, dir, &description, scene.contents_mut(), &ObjMeshSource)?;
//! let table = ctx.textures.upload_all(&mut device, &FileDecoder)?;
//! scene.set_texture_table(table.base());
//! scene.build(&mut device, &ctx.meshes)?;
//! ```

pub mod camera;
pub mod context;
pub mod description;
pub mod error;
pub mod lights;
pub mod loader;
pub mod material;
pub mod models;
pub mod textures;

pub use camera::CameraSetup;
pub use context::LoadContext;
pub use description::{InstanceDescription, Material, Property, SceneDescription};
pub use error::{Result, SceneError};
pub use lights::area_lights;
pub use loader::{load_scene, LoadedScene, SceneEnvironment};
pub use material::{emission, material_to_instance_data};
pub use models::{MeshData, MeshSource, Model, ModelCache, ObjMeshSource};
pub use textures::{DecodedImage, FileDecoder, ImageDecoder, TextureLibrary, TextureTable};
