//! Sampled 2D textures.

use crate::barrier::{ResourceBarrier, ResourceState};
use crate::descriptors::DescriptorSlot;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use ash::vk;
use gpu_allocator::MemoryLocation;
use photon_core::constants::TEXTURE_PITCH_ALIGNMENT;
use std::borrow::Cow;

/// Pixel format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit LDR color.
    Rgba8Unorm,
    /// 32-bit float HDR color.
    Rgba32Float,
}

impl TextureFormat {
    /// Bytes per pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Unorm => 4,
            Self::Rgba32Float => 16,
        }
    }

    /// Vulkan format.
    pub const fn vk_format(self) -> vk::Format {
        match self {
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

/// Row layout of an image inside a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFootprint {
    /// Tightly packed bytes per row.
    pub row_bytes: usize,
    /// Aligned distance between rows in the staging buffer.
    pub row_pitch: usize,
    pub rows: usize,
}

impl RowFootprint {
    /// Footprint of a `width` x `height` image.
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        let row_bytes = width as usize * format.bytes_per_pixel();
        Self {
            row_bytes,
            row_pitch: row_bytes.next_multiple_of(TEXTURE_PITCH_ALIGNMENT as usize),
            rows: height as usize,
        }
    }

    /// Staging buffer size.
    pub fn total_bytes(&self) -> usize {
        self.row_pitch * self.rows
    }
}

/// Copy tightly packed rows into a pitched staging layout.
pub fn pack_rows(footprint: &RowFootprint, src: &[u8], dst: &mut [u8]) -> Result<()> {
    let packed = footprint.row_bytes * footprint.rows;
    if src.len() != packed || dst.len() < footprint.total_bytes() {
        return Err(GpuError::InvalidData(format!(
            "Row packing expects {packed} source bytes and {} destination bytes, got {} and {}",
            footprint.total_bytes(),
            src.len(),
            dst.len()
        )));
    }

    if footprint.row_pitch == footprint.row_bytes {
        dst[..packed].copy_from_slice(src);
        return Ok(());
    }
    for (row, chunk) in src.chunks_exact(footprint.row_bytes).enumerate() {
        let start = row * footprint.row_pitch;
        dst[start..start + footprint.row_bytes].copy_from_slice(chunk);
    }
    Ok(())
}

/// Copy pitched rows back into a tightly packed layout.
pub fn unpack_rows(footprint: &RowFootprint, src: &[u8]) -> Result<Vec<u8>> {
    if src.len() < footprint.total_bytes() {
        return Err(GpuError::InvalidData(format!(
            "Row unpacking expects {} bytes, got {}",
            footprint.total_bytes(),
            src.len()
        )));
    }
    let mut out = Vec::with_capacity(footprint.row_bytes * footprint.rows);
    for row in 0..footprint.rows {
        let start = row * footprint.row_pitch;
        out.extend_from_slice(&src[start..start + footprint.row_bytes]);
    }
    Ok(out)
}

/// Expand three-channel pixels to four channels with an opaque alpha.
///
/// Four-channel data is returned unchanged.
pub fn expand_to_rgba(
    width: u32,
    height: u32,
    format: TextureFormat,
    data: &[u8],
) -> Result<Cow<'_, [u8]>> {
    let pixels = width as usize * height as usize;
    let channel_bytes = format.bytes_per_pixel() / 4;

    if data.len() == pixels * 4 * channel_bytes {
        return Ok(Cow::Borrowed(data));
    }
    if data.len() != pixels * 3 * channel_bytes {
        return Err(GpuError::InvalidData(format!(
            "{width}x{height} {format:?} texture cannot hold {} bytes",
            data.len()
        )));
    }

    let alpha: &[u8] = match format {
        TextureFormat::Rgba8Unorm => &[255],
        TextureFormat::Rgba32Float => bytemuck::bytes_of(&1.0f32),
    };
    let mut out = Vec::with_capacity(pixels * 4 * channel_bytes);
    for pixel in data.chunks_exact(3 * channel_bytes) {
        out.extend_from_slice(pixel);
        out.extend_from_slice(alpha);
    }
    Ok(Cow::Owned(out))
}

/// A device-local sampled image and its descriptor slot.
pub struct Texture {
    image: GpuImage,
    slot: DescriptorSlot,
    format: TextureFormat,
    width: u32,
    height: u32,
}

impl Texture {
    /// Upload pixel data and write a sampled view into a new descriptor slot.
    ///
    /// `data` holds tightly packed RGB or RGBA rows.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn upload(
        device: &mut Device,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: &[u8],
        name: &str,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidData(format!("{name}: empty texture")));
        }
        let pixels = expand_to_rgba(width, height, format, data)?;
        let footprint = RowFootprint::new(width, height, format);

        let mut staged = vec![0u8; footprint.total_bytes()];
        pack_rows(&footprint, &pixels, &mut staged)?;
        let staging = device.allocator().create_buffer(
            staged.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name}_staging"),
        )?;
        staging.write_bytes(0, &staged)?;

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format.vk_format())
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = device
            .allocator()
            .create_image(&create_info, MemoryLocation::GpuOnly, name)?;

        let region = copy_region(&footprint, format, width, height);
        device.record_and_flush(|raw, cmd| {
            ResourceBarrier::transition_image(
                raw,
                cmd,
                image.image,
                ResourceState::Undefined,
                ResourceState::CopyDestination,
            );
            unsafe {
                raw.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            ResourceBarrier::transition_image(
                raw,
                cmd,
                image.image,
                ResourceState::CopyDestination,
                ResourceState::ShaderResource,
            );
            Ok(())
        })?;

        let slot = device.allocate_descriptor()?;
        device.heap().write_sampled_image(&slot, image.view)?;

        tracing::debug!(
            "Texture {name}: {width}x{height} {format:?} in slot {}",
            slot.index
        );

        Ok(Self {
            image,
            slot,
            format,
            width,
            height,
        })
    }

    /// Copy the texture back to tightly packed RGBA rows.
    pub fn read_back(&self, device: &mut Device) -> Result<Vec<u8>> {
        let footprint = RowFootprint::new(self.width, self.height, self.format);
        let readback = device.allocator().create_buffer(
            footprint.total_bytes() as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "texture_readback",
        )?;

        let region = copy_region(&footprint, self.format, self.width, self.height);
        let image = self.image.image;
        device.record_and_flush(|raw, cmd| {
            ResourceBarrier::transition_image(
                raw,
                cmd,
                image,
                ResourceState::ShaderResource,
                ResourceState::CopySource,
            );
            unsafe {
                raw.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    readback.buffer,
                    &[region],
                );
            }
            ResourceBarrier::transition_image(
                raw,
                cmd,
                image,
                ResourceState::CopySource,
                ResourceState::ShaderResource,
            );
            Ok(())
        })?;

        let bytes = readback
            .mapped_slice()
            .ok_or_else(|| GpuError::InvalidState("Readback buffer not mapped".to_string()))?;
        unpack_rows(&footprint, bytes)
    }

    /// Descriptor slot of the sampled view.
    pub fn slot(&self) -> DescriptorSlot {
        self.slot
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Width and height in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn copy_region(
    footprint: &RowFootprint,
    format: TextureFormat,
    width: u32,
    height: u32,
) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length((footprint.row_pitch / format.bytes_per_pixel()) as u32)
        .buffer_image_height(height)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn pitch_is_aligned() {
        let footprint = RowFootprint::new(3, 2, TextureFormat::Rgba8Unorm);
        assert_eq!(footprint.row_bytes, 12);
        assert_eq!(footprint.row_pitch, 256);
        assert_eq!(footprint.total_bytes(), 512);

        let wide = RowFootprint::new(64, 1, TextureFormat::Rgba8Unorm);
        assert_eq!(wide.row_pitch, wide.row_bytes);
    }

    #[test]
    fn realigned_rows_round_trip() {
        for (width, height, format) in [
            (3, 5, TextureFormat::Rgba8Unorm),
            (64, 2, TextureFormat::Rgba8Unorm),
            (17, 3, TextureFormat::Rgba32Float),
        ] {
            let footprint = RowFootprint::new(width, height, format);
            let src = pattern(footprint.row_bytes * footprint.rows);
            let mut staged = vec![0u8; footprint.total_bytes()];
            pack_rows(&footprint, &src, &mut staged).unwrap();
            assert_eq!(unpack_rows(&footprint, &staged).unwrap(), src);
        }
    }

    #[test]
    fn pack_rejects_wrong_sizes() {
        let footprint = RowFootprint::new(2, 2, TextureFormat::Rgba8Unorm);
        let mut staged = vec![0u8; footprint.total_bytes()];
        assert!(pack_rows(&footprint, &[0u8; 15], &mut staged).is_err());
        assert!(pack_rows(&footprint, &[0u8; 16], &mut staged[..10]).is_err());
        assert!(unpack_rows(&footprint, &[0u8; 16]).is_err());
    }

    #[test]
    fn rgb_expands_with_opaque_alpha() {
        let rgb = [1u8, 2, 3, 4, 5, 6];
        let rgba = expand_to_rgba(2, 1, TextureFormat::Rgba8Unorm, &rgb).unwrap();
        assert_eq!(&*rgba, &[1, 2, 3, 255, 4, 5, 6, 255]);

        let hdr: Vec<u8> = bytemuck::cast_slice(&[0.5f32, 0.25, 2.0]).to_vec();
        let expanded = expand_to_rgba(1, 1, TextureFormat::Rgba32Float, &hdr).unwrap();
        let expected: &[u8] = bytemuck::cast_slice(&[0.5f32, 0.25, 2.0, 1.0]);
        assert_eq!(expanded.as_ref(), expected);
    }

    #[test]
    fn rgba_passes_through() {
        let data = [9u8; 16];
        assert!(matches!(
            expand_to_rgba(2, 2, TextureFormat::Rgba8Unorm, &data).unwrap(),
            Cow::Borrowed(_)
        ));
        assert!(expand_to_rgba(2, 2, TextureFormat::Rgba8Unorm, &data[..5]).is_err());
    }
}
