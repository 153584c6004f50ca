//! Mesh files and the per-scene model cache.

use crate::error::{Result, SceneError};
use glam::{Vec2, Vec3};
use hashbrown::HashMap;
use photon_core::StaticVertex;
use photon_rt::MeshId;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// CPU-side geometry of one mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<StaticVertex>,
    pub indices: Vec<u32>,
}

/// Reads the meshes of a model file.
pub trait MeshSource {
    fn load(&self, path: &Path) -> Result<Vec<MeshData>>;
}

/// Wavefront OBJ files, triangulated with one index per vertex.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjMeshSource;

impl ObjMeshSource {
    /// Parse OBJ text from a reader. Material libraries are ignored.
    pub fn parse(reader: &mut impl BufRead) -> Result<Vec<MeshData>> {
        let (models, _) = tobj::load_obj_buf(reader, &tobj::GPU_LOAD_OPTIONS, |_| {
            Ok(Default::default())
        })?;
        models.iter().map(|model| mesh_from_obj(&model.mesh)).collect()
    }
}

impl MeshSource for ObjMeshSource {
    fn load(&self, path: &Path) -> Result<Vec<MeshData>> {
        let (models, _) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)?;
        models.iter().map(|model| mesh_from_obj(&model.mesh)).collect()
    }
}

fn mesh_from_obj(mesh: &tobj::Mesh) -> Result<MeshData> {
    let vertex_count = mesh.positions.len() / 3;
    if mesh.positions.len() % 3 != 0 || mesh.indices.len() % 3 != 0 {
        return Err(SceneError::InvalidData(
            "OBJ mesh is not made of whole vertices and triangles".into(),
        ));
    }
    if let Some(&index) = mesh.indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(SceneError::InvalidData(format!(
            "OBJ index {index} out of range for {vertex_count} vertices"
        )));
    }

    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();
    let normals = if mesh.normals.len() == mesh.positions.len() {
        mesh.normals
            .chunks_exact(3)
            .map(|n| Vec3::new(n[0], n[1], n[2]).normalize_or_zero())
            .collect()
    } else {
        smooth_normals(&positions, &mesh.indices)
    };
    let has_uvs = mesh.texcoords.len() == vertex_count * 2;

    let vertices = positions
        .iter()
        .zip(&normals)
        .enumerate()
        .map(|(i, (position, normal))| {
            // OBJ texture space starts at the bottom row
            let uv = if has_uvs {
                Vec2::new(mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1])
            } else {
                Vec2::ZERO
            };
            StaticVertex {
                position: position.to_array(),
                normal: normal.to_array(),
                tangent: normal.any_orthonormal_vector().to_array(),
                tu: uv.x,
                tv: uv.y,
            }
        })
        .collect();

    Ok(MeshData {
        vertices,
        indices: mesh.indices.clone(),
    })
}

/// Area-weighted vertex normals for meshes that carry none.
fn smooth_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals.iter().map(|n| n.normalize_or(Vec3::Y)).collect()
}

/// One mesh of a cached model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMesh {
    pub id: MeshId,
    /// Key of the mesh's data inside the scene's combined arrays.
    pub key: String,
}

/// Meshes loaded from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    pub meshes: Vec<ModelMesh>,
}

/// Models loaded so far, keyed by canonical path.
#[derive(Debug, Default)]
pub struct ModelCache {
    models: HashMap<PathBuf, Model>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the model at `path`, loading it on first use.
    ///
    /// `add_mesh` is called once per mesh of a newly loaded model with the
    /// mesh's key and data, and returns the id the mesh was stored under.
    pub fn get_or_load(
        &mut self,
        path: &Path,
        source: &dyn MeshSource,
        mut add_mesh: impl FnMut(&str, &MeshData) -> Result<MeshId>,
    ) -> Result<&Model> {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.models.contains_key(&canonical) {
            let meshes = source.load(path)?;
            if meshes.is_empty() {
                return Err(SceneError::InvalidData(format!(
                    "{} contains no meshes",
                    path.display()
                )));
            }

            let mut model = Model::default();
            for (index, mesh) in meshes.iter().enumerate() {
                let key = format!("{}#{index}", canonical.display());
                let id = add_mesh(&key, mesh)?;
                model.meshes.push(ModelMesh { id, key });
            }
            tracing::debug!("Loaded {} ({} meshes)", path.display(), model.meshes.len());
            self.models.insert(canonical.clone(), model);
        }

        self.models
            .get(&canonical)
            .ok_or_else(|| SceneError::NotFound(canonical.display().to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;

    pub(crate) const QUAD_OBJ: &str = "\
o quad
v 0 0 0
v 1 0 0
v 1 0 1
v 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 -1 0
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

    /// In-memory model files.
    pub(crate) struct MemorySource {
        pub files: HashMap<PathBuf, Vec<MeshData>>,
        pub loads: Cell<usize>,
    }

    impl MeshSource for MemorySource {
        fn load(&self, path: &Path) -> Result<Vec<MeshData>> {
            self.loads.set(self.loads.get() + 1);
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| SceneError::NotFound(path.display().to_string()))
        }
    }

    pub(crate) fn quad() -> MeshData {
        ObjMeshSource::parse(&mut QUAD_OBJ.as_bytes())
            .unwrap()
            .remove(0)
    }

    #[test]
    fn parses_obj_quad() {
        let meshes = ObjMeshSource::parse(&mut QUAD_OBJ.as_bytes()).unwrap();
        assert_eq!(meshes.len(), 1);

        let mesh = &meshes[0];
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        for vertex in &mesh.vertices {
            assert_eq!(vertex.normal, [0.0, -1.0, 0.0]);
            assert_relative_eq!(vertex.position().y, 0.0);
        }
        // Texture rows are flipped to start at the top
        let first = mesh
            .vertices
            .iter()
            .find(|v| v.position == [0.0, 0.0, 0.0])
            .unwrap();
        assert_relative_eq!(first.tv, 1.0);
    }

    #[test]
    fn missing_normals_are_generated() {
        let meshes =
            ObjMeshSource::parse(&mut "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".as_bytes()).unwrap();
        for vertex in &meshes[0].vertices {
            assert_relative_eq!(vertex.normal()[2], 1.0);
        }
    }

    #[test]
    fn cache_loads_each_file_once() {
        let path = PathBuf::from("memory/quad.obj");
        let source = MemorySource {
            files: HashMap::from([(path.clone(), vec![quad(), quad()])]),
            loads: Cell::new(0),
        };
        let mut cache = ModelCache::new();
        let mut next = 0;
        let mut add = |_: &str, _: &MeshData| -> Result<MeshId> {
            next += 1;
            Ok(MeshId(next - 1))
        };

        let first = cache.get_or_load(&path, &source, &mut add).unwrap().clone();
        let second = cache.get_or_load(&path, &source, &mut add).unwrap().clone();

        assert_eq!(source.loads.get(), 1);
        assert_eq!(first, second);
        assert_eq!(first.meshes.len(), 2);
        assert_eq!(first.meshes[0].key, "memory/quad.obj#0");
        assert_eq!(first.meshes[1].id, MeshId(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let source = MemorySource {
            files: HashMap::new(),
            loads: Cell::new(0),
        };
        let mut cache = ModelCache::new();
        let result = cache.get_or_load(Path::new("nowhere.obj"), &source, |_, _| Ok(MeshId(0)));
        assert!(matches!(result, Err(SceneError::NotFound(_))));
        assert!(cache.is_empty());
    }
}
