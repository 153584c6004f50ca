//! GPU-shared data layouts.
//!
//! Every type here is read by the path-tracing shaders through buffer device
//! addresses with scalar block layout, so field order and sizes are part of
//! the shader contract.

use glam::Vec3;

/// Static mesh vertex (44 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StaticVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub tu: f32,
    pub tv: f32,
}

impl StaticVertex {
    /// Byte stride of one vertex.
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    /// Vertex position as a vector.
    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Vertex normal as a vector.
    #[inline]
    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Surface scattering model selected per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BsdfType {
    Diffuse = 0,
    Emission = 1,
    OrenNayar = 2,
    Mirror = 3,
    Glass = 4,
    Plastic = 5,
    Dielectric = 6,
    Conductor = 7,
}

impl BsdfType {
    /// Decode the shader-side numeric code.
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Diffuse,
            1 => Self::Emission,
            2 => Self::OrenNayar,
            3 => Self::Mirror,
            4 => Self::Glass,
            5 => Self::Plastic,
            6 => Self::Dielectric,
            7 => Self::Conductor,
            _ => return None,
        })
    }
}

/// Per-instance shading record (60 bytes).
///
/// `bsdf_albedo_id` packs the BSDF type in the upper 16 bits and the
/// reflectance texture id in the lower 16 bits.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    /// First index of the instance's mesh inside the combined index buffer.
    pub start_index: u32,
    pub bsdf_albedo_id: u32,
    pub bsdf_data: [f32; 7],
    pub coating_data: [f32; 6],
}

impl InstanceData {
    /// Replace the BSDF type, keeping the texture id.
    #[inline]
    pub fn set_bsdf_type(&mut self, bsdf: BsdfType) {
        self.bsdf_albedo_id = (self.bsdf_albedo_id & 0xFFFF) | ((bsdf as u32) << 16);
    }

    /// Replace the texture id, keeping the BSDF type.
    #[inline]
    pub fn set_texture_id(&mut self, id: u32) {
        self.bsdf_albedo_id = (self.bsdf_albedo_id & 0xFFFF_0000) | (id & 0xFFFF);
    }

    /// The packed BSDF type, if it is a known code.
    #[inline]
    pub const fn bsdf_type(&self) -> Option<BsdfType> {
        BsdfType::from_code(self.bsdf_albedo_id >> 16)
    }

    /// The packed texture id.
    #[inline]
    pub const fn texture_id(&self) -> u32 {
        self.bsdf_albedo_id & 0xFFFF
    }
}

/// Emissive triangle sampled for next-event estimation (60 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AreaLight {
    pub v1: [f32; 3],
    pub v2: [f32; 3],
    pub v3: [f32; 3],
    pub normal: [f32; 3],
    /// Emitted radiance.
    pub le: [f32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layout_sizes() {
        assert_eq!(std::mem::size_of::<StaticVertex>(), 44);
        assert_eq!(StaticVertex::STRIDE, 44);
        assert_eq!(std::mem::size_of::<InstanceData>(), 60);
        assert_eq!(std::mem::size_of::<AreaLight>(), 60);
    }

    #[test]
    fn bsdf_and_texture_packing() {
        let mut data = InstanceData::default();
        data.set_texture_id(0x1_0005);
        data.set_bsdf_type(BsdfType::Glass);
        assert_eq!(data.texture_id(), 5);
        assert_eq!(data.bsdf_type(), Some(BsdfType::Glass));
        assert_eq!(data.bsdf_albedo_id, (4 << 16) | 5);

        // Overwriting the type must not leak bits of the previous one.
        data.set_bsdf_type(BsdfType::Emission);
        assert_eq!(data.bsdf_type(), Some(BsdfType::Emission));
        assert_eq!(data.texture_id(), 5);
    }

    #[test]
    fn unknown_bsdf_code() {
        assert_eq!(BsdfType::from_code(7), Some(BsdfType::Conductor));
        assert_eq!(BsdfType::from_code(8), None);
    }
}
