//! Texture registration and upload.
//!
//! Textures are registered by key while a scene loads and uploaded together
//! afterwards. Uploading allocates one descriptor slot per texture in
//! registration order, so a texture id is its offset from the table base.

use crate::error::{Result, SceneError};
use hashbrown::HashMap;
use photon_gpu::{Device, Texture, TextureFormat};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Largest id the instance records can address.
pub const MAX_TEXTURE_ID: u32 = 0xFFFF;

/// Decoded pixels ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Tightly packed RGB or RGBA rows.
    pub data: Vec<u8>,
}

impl DecodedImage {
    /// A single opaque white texel.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            data: vec![255; 4],
        }
    }

    /// A single black HDR texel.
    pub fn black_hdr() -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba32Float,
            data: [0.0f32; 3].iter().flat_map(|c| c.to_ne_bytes()).collect(),
        }
    }
}

/// Turns image files into pixels.
pub trait ImageDecoder: Sync {
    fn decode(&self, path: &Path) -> Result<DecodedImage>;
}

/// Decoder backed by the `image` crate.
///
/// Radiance `.hdr` files keep their float values; everything else is
/// converted to 8-bit RGBA.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDecoder;

impl ImageDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage> {
        let image = image::open(path)?;
        let (width, height) = (image.width(), image.height());

        if is_hdr(path) {
            let pixels = image.to_rgba32f().into_raw();
            Ok(DecodedImage {
                width,
                height,
                format: TextureFormat::Rgba32Float,
                data: bytemuck::cast_slice(&pixels).to_vec(),
            })
        } else {
            Ok(DecodedImage {
                width,
                height,
                format: TextureFormat::Rgba8Unorm,
                data: image.to_rgba8().into_raw(),
            })
        }
    }
}

fn is_hdr(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("hdr"))
}

#[derive(Debug, Clone)]
enum TextureSource {
    File(PathBuf),
    Pixels(DecodedImage),
}

/// Textures of a scene, keyed by name.
#[derive(Debug)]
pub struct TextureLibrary {
    entries: Vec<(String, TextureSource)>,
    ids: HashMap<String, u32>,
}

impl Default for TextureLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureLibrary {
    /// Id of the built-in white texture.
    pub const WHITE: u32 = 0;
    const WHITE_KEY: &'static str = "<white>";

    /// A library holding only the white texture.
    pub fn new() -> Self {
        let mut library = Self {
            entries: Vec::new(),
            ids: HashMap::new(),
        };
        library.insert(Self::WHITE_KEY.to_string(), TextureSource::Pixels(DecodedImage::white()));
        library
    }

    /// Register an image file, returning its id.
    ///
    /// Registering the same path again returns the existing id. Files that
    /// do not exist are rejected with [`SceneError::NotFound`].
    pub fn register_file(&mut self, path: &Path) -> Result<u32> {
        let key = path.display().to_string();
        if let Some(&id) = self.ids.get(&key) {
            return Ok(id);
        }
        if !path.is_file() {
            return Err(SceneError::NotFound(key));
        }
        self.checked_insert(key, TextureSource::File(path.to_path_buf()))
    }

    /// Register in-memory pixels under `key`, returning its id.
    pub fn register_pixels(&mut self, key: &str, image: DecodedImage) -> Result<u32> {
        if let Some(&id) = self.ids.get(key) {
            return Ok(id);
        }
        self.checked_insert(key.to_string(), TextureSource::Pixels(image))
    }

    /// Id of a registered key.
    pub fn find(&self, key: &str) -> Option<u32> {
        self.ids.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ids.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn checked_insert(&mut self, key: String, source: TextureSource) -> Result<u32> {
        if self.entries.len() > MAX_TEXTURE_ID as usize {
            return Err(SceneError::InvalidData(format!(
                "More than {} textures",
                MAX_TEXTURE_ID + 1
            )));
        }
        Ok(self.insert(key, source))
    }

    fn insert(&mut self, key: String, source: TextureSource) -> u32 {
        let id = self.entries.len() as u32;
        self.ids.insert(key.clone(), id);
        self.entries.push((key, source));
        id
    }

    /// Decode every file in parallel and upload all textures in id order.
    pub fn upload_all(&self, device: &mut Device, decoder: &dyn ImageDecoder) -> Result<TextureTable> {
        let images = self
            .entries
            .par_iter()
            .map(|(_, source)| match source {
                TextureSource::File(path) => decoder.decode(path),
                TextureSource::Pixels(image) => Ok(image.clone()),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut textures: Vec<Texture> = Vec::with_capacity(images.len());
        for ((key, _), image) in self.entries.iter().zip(&images) {
            let texture = Texture::upload(
                device,
                image.width,
                image.height,
                image.format,
                &image.data,
                key,
            )?;

            let slot = texture.slot().index;
            if let Some(first) = textures.first() {
                let expected = first.slot().index + textures.len() as u32;
                if slot != expected {
                    return Err(SceneError::InvalidData(format!(
                        "Texture {key} landed in slot {slot} instead of {expected}"
                    )));
                }
            }
            textures.push(texture);
        }

        tracing::info!("Uploaded {} textures", textures.len());
        Ok(TextureTable { textures })
    }
}

/// Uploaded textures occupying consecutive descriptor slots.
pub struct TextureTable {
    textures: Vec<Texture>,
}

impl TextureTable {
    /// Slot of texture id 0.
    pub fn base(&self) -> u32 {
        self.textures.first().map_or(0, |texture| texture.slot().index)
    }

    /// Absolute descriptor slot of a texture id.
    pub fn slot(&self, id: u32) -> Result<u32> {
        self.textures
            .get(id as usize)
            .map(|texture| texture.slot().index)
            .ok_or_else(|| SceneError::NotFound(format!("texture {id}")))
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_texture_is_preregistered() {
        let library = TextureLibrary::new();
        assert_eq!(library.len(), 1);
        assert_eq!(library.find("<white>"), Some(TextureLibrary::WHITE));
    }

    #[test]
    fn pixels_register_once() {
        let mut library = TextureLibrary::new();
        let first = library
            .register_pixels("environment", DecodedImage::black_hdr())
            .unwrap();
        let again = library
            .register_pixels("environment", DecodedImage::white())
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(again, first);
        assert_eq!(library.len(), 2);
        assert!(library.contains("environment"));
    }

    #[test]
    fn missing_files_are_not_registered() {
        let mut library = TextureLibrary::new();
        let result = library.register_file(Path::new("does/not/exist.png"));
        assert!(matches!(result, Err(SceneError::NotFound(_))));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn black_hdr_is_three_floats() {
        let image = DecodedImage::black_hdr();
        assert_eq!(image.data.len(), 12);
        assert!(image.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn hdr_detection_ignores_case() {
        assert!(is_hdr(Path::new("sky.HDR")));
        assert!(is_hdr(Path::new("maps/sky.hdr")));
        assert!(!is_hdr(Path::new("albedo.png")));
        assert!(!is_hdr(Path::new("hdr")));
    }
}
