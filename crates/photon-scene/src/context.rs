//! State shared by every instance of a scene while it loads.

use crate::models::ModelCache;
use crate::textures::TextureLibrary;
use photon_core::SceneBounds;
use photon_rt::MeshLibrary;

/// Everything the loader accumulates across instances.
///
/// The meshes end up in `meshes`; instance records, combined geometry and
/// lights go into the scene's contents instead.
#[derive(Default)]
pub struct LoadContext {
    /// Object-space bounds of every loaded vertex.
    pub bounds: SceneBounds,
    pub models: ModelCache,
    pub textures: TextureLibrary,
    pub meshes: MeshLibrary,
}

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }
}
