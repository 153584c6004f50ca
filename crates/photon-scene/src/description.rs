//! `scene.json` scene descriptions.
//!
//! A description names the output size, the camera, an optional
//! environment map and a list of mesh instances with their materials:
//!
//! ```json
//! {
//!     "width": 1280, "height": 720, "fov": 40,
//!     "from": [0, 1, 4], "to": [0, 1, 0], "up": [0, 1, 0],
//!     "instances": [
//!         { "meshFilename": "models/floor.obj", "material": { "bsdf": "diffuse" } },
//!         { "meshFilename": "models/light.obj", "material": { "emission": "17 12 4" } }
//!     ]
//! }
//! ```

use crate::error::Result;
use photon_core::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the description inside a scene directory.
pub const FILE_NAME: &str = "scene.json";

/// A loosely typed description value.
///
/// Vectors may be written as JSON arrays or as whitespace separated
/// strings; a single number stands for all three components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    Number(f32),
    Vector(Vec<f32>),
    Text(String),
}

impl Property {
    /// The value as text, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The value as a scalar.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Vector(values) if values.len() == 1 => Some(values[0]),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Vector(_) => None,
        }
    }

    /// The value as a three component vector.
    pub fn as_vec3(&self) -> Option<[f32; 3]> {
        let values: Vec<f32> = match self {
            Self::Number(value) => return Some([*value; 3]),
            Self::Vector(values) => values.clone(),
            Self::Text(text) => text
                .split_whitespace()
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .ok()?,
        };
        match values.as_slice() {
            [v] => Some([*v; 3]),
            [x, y, z] => Some([*x, *y, *z]),
            _ => None,
        }
    }
}

/// Material properties of one instance, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Material(pub BTreeMap<String, Property>);

impl Material {
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.get(name)
    }

    /// A non-empty text property.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(Property::as_str)
            .filter(|text| !text.is_empty())
    }

    /// A scalar property, or `default` when absent or malformed.
    pub fn number(&self, name: &str, default: f32) -> f32 {
        self.get(name).and_then(Property::as_f32).unwrap_or(default)
    }

    /// A vector property, if present and well formed.
    pub fn vec3(&self, name: &str) -> Option<[f32; 3]> {
        self.get(name).and_then(Property::as_vec3)
    }

    /// True if the property is set to anything other than an empty string.
    pub fn has(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Property::Text(text)) => !text.is_empty(),
            Some(_) => true,
            None => false,
        }
    }
}

/// One placement of a mesh file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescription {
    /// Mesh file relative to the scene directory.
    pub mesh_filename: String,
    #[serde(default)]
    pub material: Material,
    /// Object to world transform, row-major.
    #[serde(default = "identity")]
    pub w: [f32; 16],
}

impl InstanceDescription {
    pub fn transform(&self) -> Matrix {
        Matrix::from_rows(self.w)
    }
}

/// Parsed `scene.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Vertical field of view in degrees.
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_from")]
    pub from: Property,
    #[serde(default = "default_to")]
    pub to: Property,
    #[serde(default = "default_up")]
    pub up: Property,
    /// 1 mirrors the projection horizontally.
    #[serde(rename = "flipX", default)]
    pub flip_x: u32,
    /// Environment map relative to the scene directory.
    #[serde(default)]
    pub envmap: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceDescription>,
}

impl SceneDescription {
    /// Parse a description from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read `scene.json` from a scene directory.
    pub fn load(scene_dir: &Path) -> Result<Self> {
        let path = scene_dir.join(FILE_NAME);
        let text = std::fs::read_to_string(&path)?;
        let description = Self::from_json(&text)?;
        tracing::debug!(
            "Read {}: {}x{}, {} instances",
            path.display(),
            description.width,
            description.height,
            description.instances.len()
        );
        Ok(description)
    }

    /// Environment map path, if one is named.
    pub fn environment_map(&self) -> Option<&str> {
        self.envmap.as_deref().filter(|name| !name.is_empty())
    }
}

const fn identity() -> [f32; 16] {
    Matrix::IDENTITY.m
}

const fn default_width() -> u32 {
    1920
}

const fn default_height() -> u32 {
    1080
}

const fn default_fov() -> f32 {
    45.0
}

fn default_from() -> Property {
    Property::Vector(vec![0.0, 0.0, 0.0])
}

fn default_to() -> Property {
    Property::Vector(vec![0.0, 0.0, -1.0])
}

fn default_up() -> Property {
    Property::Vector(vec![0.0, 1.0, 0.0])
}
