//! Scene description to scene contents.

use crate::camera::CameraSetup;
use crate::context::LoadContext;
use crate::description::{InstanceDescription, Material, SceneDescription};
use crate::error::{Result, SceneError};
use crate::lights::area_lights;
use crate::material::{emission, material_to_instance_data};
use crate::models::{MeshData, MeshSource, ModelCache};
use crate::textures::{DecodedImage, TextureLibrary};
use photon_core::SceneBounds;
use photon_gpu::Device;
use photon_rt::{Mesh, MeshId, SceneContents};
use std::path::Path;

/// Texture key of the black environment used when a scene names none.
pub const BLACK_ENVIRONMENT: &str = "<black environment>";

/// Environment lighting of a loaded scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneEnvironment {
    /// Texture id, relative to the texture table.
    pub texture: u32,
    /// 1 when the scene has an environment map, 0 otherwise.
    pub luminance: f32,
}

/// What the caller needs after loading besides the scene contents.
#[derive(Debug, Clone, Copy)]
pub struct LoadedScene {
    pub camera: CameraSetup,
    pub environment: SceneEnvironment,
}

/// Load every instance of `description` into `contents`.
///
/// Meshes are built on `device` and owned by `ctx.meshes`; textures are only
/// registered and still need [`TextureLibrary::upload_all`].
pub fn load_scene(
    ctx: &mut LoadContext,
    device: &mut Device,
    scene_dir: &Path,
    description: &SceneDescription,
    contents: &mut SceneContents,
    source: &dyn MeshSource,
) -> Result<LoadedScene> {
    let camera = CameraSetup::from_description(description)?;

    let LoadContext {
        bounds,
        models,
        textures,
        meshes,
    } = &mut *ctx;
    let mut staging = Staging {
        bounds,
        models,
        textures,
        contents: &mut *contents,
    };
    let environment = staging.populate(scene_dir, description, source, |mesh| {
        let built = Mesh::build(device, &mesh.vertices, &mesh.indices)?;
        Ok(meshes.add(built))
    })?;

    tracing::info!(
        "Loaded {}: {} instances, {} meshes, {} lights, {} textures",
        scene_dir.display(),
        contents.instances().len(),
        ctx.meshes.len(),
        contents.lights().len(),
        ctx.textures.len()
    );
    Ok(LoadedScene {
        camera,
        environment,
    })
}

/// Borrowed loader state, split so meshes can be built while it is in use.
struct Staging<'a> {
    bounds: &'a mut SceneBounds,
    models: &'a mut ModelCache,
    textures: &'a mut TextureLibrary,
    contents: &'a mut SceneContents,
}

impl Staging<'_> {
    fn populate(
        &mut self,
        scene_dir: &Path,
        description: &SceneDescription,
        source: &dyn MeshSource,
        mut build: impl FnMut(&MeshData) -> Result<MeshId>,
    ) -> Result<SceneEnvironment> {
        for instance in &description.instances {
            self.add_instance(scene_dir, instance, source, &mut build)?;
        }
        self.environment(scene_dir, description)
    }

    fn add_instance(
        &mut self,
        scene_dir: &Path,
        instance: &InstanceDescription,
        source: &dyn MeshSource,
        build: &mut dyn FnMut(&MeshData) -> Result<MeshId>,
    ) -> Result<()> {
        let texture_id = self.reflectance(scene_dir, &instance.material)?;
        let data = material_to_instance_data(&instance.material, texture_id);
        let transform = instance.transform();
        let path = scene_dir.join(&instance.mesh_filename);

        let Self {
            bounds,
            models,
            contents,
            ..
        } = self;
        let model = models.get_or_load(&path, source, |key, mesh| {
            for vertex in &mesh.vertices {
                bounds.extend(vertex.position());
            }
            contents.add_mesh_data(key, &mesh.vertices, &mesh.indices)?;
            build(mesh)
        })?;

        let le = emission(&instance.material);
        for mesh in &model.meshes {
            contents.add_instance(&mesh.key, data)?;
            contents.add_mesh(mesh.id, transform);

            if let Some(le) = le {
                let range = contents
                    .mesh_range(&mesh.key)
                    .ok_or_else(|| SceneError::NotFound(mesh.key.clone()))?;
                let start = range.index_offset as usize;
                let indices = &contents.indices()[start..start + range.index_count as usize];
                let lights = area_lights(contents.vertices(), indices, &transform, le);
                for light in lights {
                    contents.add_light(light);
                }
            }
        }
        Ok(())
    }

    /// Texture id of the material's reflectance map, white when it has none.
    fn reflectance(&mut self, scene_dir: &Path, material: &Material) -> Result<u32> {
        let Some(name) = material.text("reflectance") else {
            return Ok(TextureLibrary::WHITE);
        };
        match self.textures.register_file(&scene_dir.join(name)) {
            Err(SceneError::NotFound(path)) => {
                tracing::warn!("Reflectance map {path} not found, using white");
                Ok(TextureLibrary::WHITE)
            }
            other => other,
        }
    }

    fn environment(
        &mut self,
        scene_dir: &Path,
        description: &SceneDescription,
    ) -> Result<SceneEnvironment> {
        match description.environment_map() {
            Some(name) => Ok(SceneEnvironment {
                texture: self.textures.register_file(&scene_dir.join(name))?,
                luminance: 1.0,
            }),
            None => Ok(SceneEnvironment {
                texture: self
                    .textures
                    .register_pixels(BLACK_ENVIRONMENT, DecodedImage::black_hdr())?,
                luminance: 0.0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::{quad, MemorySource};
    use hashbrown::HashMap;
    use photon_core::BsdfType;
    use std::cell::Cell;
    use std::path::PathBuf;

    const TWO_QUADS: &str = r#"{
        "instances": [
            { "meshFilename": "models/floor.obj", "material": { "bsdf": "diffuse" } },
            {
                "meshFilename": "models/light.obj",
                "material": { "emission": "10 10 10" },
                "w": [1, 0, 0, 0, 0, 1, 0, 5, 0, 0, 1, 0, 0, 0, 0, 1]
            }
        ]
    }"#;

    struct Loaded {
        contents: SceneContents,
        models: ModelCache,
        textures: TextureLibrary,
        bounds: SceneBounds,
        environment: SceneEnvironment,
        built: u32,
    }

    fn load(json: &str, files: &[&str]) -> Result<Loaded> {
        let source = MemorySource {
            files: files
                .iter()
                .map(|name| (PathBuf::from("scene").join(name), vec![quad()]))
                .collect::<HashMap<_, _>>(),
            loads: Cell::new(0),
        };
        let description = SceneDescription::from_json(json)?;

        let mut contents = SceneContents::new();
        let mut models = ModelCache::new();
        let mut textures = TextureLibrary::new();
        let mut bounds = SceneBounds::new();
        let mut built = 0;
        let environment = Staging {
            bounds: &mut bounds,
            models: &mut models,
            textures: &mut textures,
            contents: &mut contents,
        }
        .populate(Path::new("scene"), &description, &source, |_| {
            built += 1;
            Ok(MeshId(built - 1))
        })?;

        Ok(Loaded {
            contents,
            models,
            textures,
            bounds,
            environment,
            built,
        })
    }

    #[test]
    fn emissive_quad_becomes_two_lights() {
        let loaded = load(TWO_QUADS, &["models/floor.obj", "models/light.obj"]).unwrap();
        let contents = &loaded.contents;

        assert_eq!(loaded.built, 2);
        assert_eq!(contents.instances().len(), 2);
        assert_eq!(contents.meshes().len(), 2);
        assert_eq!(contents.lights().len(), 2);

        assert_eq!(contents.instances()[0].bsdf_type(), Some(BsdfType::Diffuse));
        assert_eq!(contents.instances()[1].bsdf_type(), Some(BsdfType::Emission));
        assert_eq!(contents.instances()[1].start_index, 6);
        assert_eq!(contents.meshes()[1].0, MeshId(1));

        // Lights sit at the instance's translation, facing the authored normal
        for light in contents.lights() {
            assert_eq!(light.le, [10.0; 3]);
            assert_eq!(light.v1[1], 5.0);
            assert_eq!(light.normal, [0.0, -1.0, 0.0]);
        }
    }

    #[test]
    fn shared_models_load_once() {
        let json = r#"{
            "instances": [
                { "meshFilename": "models/floor.obj" },
                { "meshFilename": "models/floor.obj", "material": { "bsdf": "mirror" } }
            ]
        }"#;
        let loaded = load(json, &["models/floor.obj"]).unwrap();

        assert_eq!(loaded.built, 1);
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.contents.vertices().len(), 4);
        assert_eq!(loaded.contents.instances().len(), 2);
        assert_eq!(loaded.contents.instances()[1].start_index, 0);
        assert_eq!(loaded.contents.meshes()[0].0, loaded.contents.meshes()[1].0);
        assert!(loaded.contents.lights().is_empty());
    }

    #[test]
    fn textures_and_environment_defaults() {
        let json = r#"{
            "instances": [
                { "meshFilename": "models/floor.obj", "material": { "reflectance": "missing.png" } }
            ]
        }"#;
        let loaded = load(json, &["models/floor.obj"]).unwrap();

        assert_eq!(loaded.contents.instances()[0].texture_id(), TextureLibrary::WHITE);
        assert_eq!(
            loaded.environment,
            SceneEnvironment {
                texture: 1,
                luminance: 0.0
            }
        );
        assert_eq!(loaded.textures.find(BLACK_ENVIRONMENT), Some(1));
        assert_eq!(loaded.bounds.extent().x, 1.0);
    }

    #[test]
    fn missing_environment_map_fails() {
        let json = r#"{ "envmap": "nowhere.hdr", "instances": [] }"#;
        assert!(matches!(load(json, &[]), Err(SceneError::NotFound(_))));
    }

    #[test]
    fn missing_mesh_file_fails() {
        let json = r#"{ "instances": [ { "meshFilename": "models/gone.obj" } ] }"#;
        assert!(load(json, &[]).is_err());
    }
}
