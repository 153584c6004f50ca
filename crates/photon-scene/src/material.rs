//! Material to instance-data mapping.

use crate::description::Material;
use photon_core::{BsdfType, InstanceData};

/// Shading record for a material whose reflectance texture is `texture_id`.
///
/// Unknown BSDF names shade as diffuse. An `emission` property turns the
/// instance into a light regardless of its BSDF.
pub fn material_to_instance_data(material: &Material, texture_id: u32) -> InstanceData {
    let mut data = InstanceData::default();
    data.set_texture_id(texture_id);
    data.set_bsdf_type(BsdfType::Diffuse);

    let bsdf = material.text("bsdf").unwrap_or("diffuse");
    match bsdf {
        "orennayar" => {
            data.set_bsdf_type(BsdfType::OrenNayar);
            data.bsdf_data[0] = material.number("alpha", 1.0);
        }
        "mirror" => data.set_bsdf_type(BsdfType::Mirror),
        "glass" => {
            data.set_bsdf_type(BsdfType::Glass);
            data.bsdf_data[0] = material.number("intIOR", 1.33);
            data.bsdf_data[1] = material.number("extIOR", 1.0);
        }
        "plastic" | "dielectric" => {
            data.set_bsdf_type(if bsdf == "plastic" {
                BsdfType::Plastic
            } else {
                BsdfType::Dielectric
            });
            data.bsdf_data[0] = material.number("intIOR", 1.33);
            data.bsdf_data[1] = material.number("extIOR", 1.0);
            data.bsdf_data[2] = material.number("roughness", 1.0);
        }
        "conductor" => {
            data.set_bsdf_type(BsdfType::Conductor);
            let eta = material.vec3("eta").unwrap_or_default();
            let k = material.vec3("k").unwrap_or_default();
            data.bsdf_data[..3].copy_from_slice(&eta);
            data.bsdf_data[3..6].copy_from_slice(&k);
            data.bsdf_data[6] = material.number("roughness", 1.0);
        }
        "diffuse" => {}
        other => tracing::warn!("Unknown BSDF '{other}', using diffuse"),
    }

    if let Some(le) = emission(material) {
        data.set_bsdf_type(BsdfType::Emission);
        data.bsdf_data = [0.0; 7];
        data.bsdf_data[..3].copy_from_slice(&le);
    }

    if material.number("coatingThickness", 0.0) > 0.0 {
        let sigma_a = material.vec3("coatingSigmaA").unwrap_or_default();
        data.coating_data[..3].copy_from_slice(&sigma_a);
        data.coating_data[3] = material.number("coatingIntIOR", 1.33);
        data.coating_data[4] = material.number("coatingExtIOR", 1.0);
        data.coating_data[5] = material.number("coatingThickness", 0.0);
    }

    data
}

/// Emitted radiance, if the material is a light.
pub fn emission(material: &Material) -> Option<[f32; 3]> {
    if !material.has("emission") {
        return None;
    }
    Some(material.vec3("emission").unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::Property;
    use approx::assert_relative_eq;

    fn material(properties: &[(&str, Property)]) -> Material {
        Material(
            properties
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
        )
    }

    fn text(value: &str) -> Property {
        Property::Text(value.to_string())
    }

    #[test]
    fn empty_material_is_diffuse() {
        let data = material_to_instance_data(&Material::default(), 7);
        assert_eq!(data.bsdf_type(), Some(BsdfType::Diffuse));
        assert_eq!(data.texture_id(), 7);
        assert_eq!(data.bsdf_data, [0.0; 7]);
        assert_eq!(data.coating_data, [0.0; 6]);
        assert!(emission(&Material::default()).is_none());
    }

    #[test]
    fn bsdf_defaults() {
        let oren = material_to_instance_data(&material(&[("bsdf", text("orennayar"))]), 0);
        assert_eq!(oren.bsdf_type(), Some(BsdfType::OrenNayar));
        assert_relative_eq!(oren.bsdf_data[0], 1.0);

        let glass = material_to_instance_data(&material(&[("bsdf", text("glass"))]), 0);
        assert_eq!(glass.bsdf_type(), Some(BsdfType::Glass));
        assert_relative_eq!(glass.bsdf_data[0], 1.33);
        assert_relative_eq!(glass.bsdf_data[1], 1.0);

        for (name, bsdf) in [("plastic", BsdfType::Plastic), ("dielectric", BsdfType::Dielectric)] {
            let data = material_to_instance_data(&material(&[("bsdf", text(name))]), 0);
            assert_eq!(data.bsdf_type(), Some(bsdf));
            assert_eq!(data.bsdf_data[..3], [1.33, 1.0, 1.0]);
        }

        let conductor = material_to_instance_data(
            &material(&[
                ("bsdf", text("conductor")),
                ("eta", text("0.2 0.9 1.1")),
                ("k", Property::Vector(vec![3.9, 2.4, 2.2])),
            ]),
            0,
        );
        assert_eq!(conductor.bsdf_type(), Some(BsdfType::Conductor));
        assert_eq!(conductor.bsdf_data, [0.2, 0.9, 1.1, 3.9, 2.4, 2.2, 1.0]);

        let mirror = material_to_instance_data(&material(&[("bsdf", text("mirror"))]), 0);
        assert_eq!(mirror.bsdf_type(), Some(BsdfType::Mirror));
    }

    #[test]
    fn explicit_parameters_override_defaults() {
        let data = material_to_instance_data(
            &material(&[
                ("bsdf", text("glass")),
                ("intIOR", Property::Number(1.5)),
                ("extIOR", text("1.0003")),
            ]),
            0,
        );
        assert_relative_eq!(data.bsdf_data[0], 1.5);
        assert_relative_eq!(data.bsdf_data[1], 1.0003);
    }

    #[test]
    fn emission_overrides_bsdf() {
        let data = material_to_instance_data(
            &material(&[("bsdf", text("glass")), ("emission", text("17 12 4"))]),
            3,
        );
        assert_eq!(data.bsdf_type(), Some(BsdfType::Emission));
        assert_eq!(data.texture_id(), 3);
        assert_eq!(data.bsdf_data[..3], [17.0, 12.0, 4.0]);
        assert_eq!(data.bsdf_data[3..], [0.0; 4]);
    }

    #[test]
    fn coating_only_with_positive_thickness() {
        let coated = material_to_instance_data(
            &material(&[
                ("coatingThickness", Property::Number(0.5)),
                ("coatingSigmaA", text("0.1 0.2 0.3")),
            ]),
            0,
        );
        assert_eq!(coated.coating_data, [0.1, 0.2, 0.3, 1.33, 1.0, 0.5]);

        let uncoated = material_to_instance_data(
            &material(&[
                ("coatingThickness", Property::Number(0.0)),
                ("coatingSigmaA", text("0.1 0.2 0.3")),
            ]),
            0,
        );
        assert_eq!(uncoated.coating_data, [0.0; 6]);
    }
}
