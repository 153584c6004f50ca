//! Area lights extracted from emissive meshes.

use photon_core::{AreaLight, Matrix, StaticVertex};

/// One light per triangle of an indexed mesh, moved to world space.
///
/// The face normal is flipped to agree with the first vertex's shading
/// normal so one-sided emitters face the way the mesh was authored.
pub fn area_lights(
    vertices: &[StaticVertex],
    indices: &[u32],
    transform: &Matrix,
    le: [f32; 3],
) -> Vec<AreaLight> {
    indices
        .chunks_exact(3)
        .filter_map(|triangle| {
            let a = vertices.get(triangle[0] as usize)?;
            let b = vertices.get(triangle[1] as usize)?;
            let c = vertices.get(triangle[2] as usize)?;
            let (v1, v2, v3) = (a.position(), b.position(), c.position());

            let mut normal = (v3 - v2).cross(v1 - v3).normalize_or_zero();
            if a.normal().dot(normal) <= 0.0 {
                normal = -normal;
            }

            Some(AreaLight {
                v1: transform.transform_point(v1).to_array(),
                v2: transform.transform_point(v2).to_array(),
                v3: transform.transform_point(v3).to_array(),
                normal: transform
                    .transform_vector(normal)
                    .normalize_or_zero()
                    .to_array(),
                le,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn vertex(position: [f32; 3], normal: [f32; 3]) -> StaticVertex {
        StaticVertex {
            position,
            normal,
            ..Default::default()
        }
    }

    /// Unit quad in the XZ plane with shading normals along `normal_y`.
    fn quad(normal_y: f32) -> Vec<StaticVertex> {
        let n = [0.0, normal_y, 0.0];
        vec![
            vertex([0.0, 0.0, 0.0], n),
            vertex([1.0, 0.0, 0.0], n),
            vertex([1.0, 0.0, 1.0], n),
            vertex([0.0, 0.0, 1.0], n),
        ]
    }

    #[test]
    fn one_light_per_triangle() {
        let lights = area_lights(&quad(-1.0), &[0, 1, 2, 0, 2, 3], &Matrix::IDENTITY, [5.0; 3]);
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[1].v1, [0.0, 0.0, 0.0]);
        assert_eq!(lights[1].v3, [0.0, 0.0, 1.0]);
        assert!(lights.iter().all(|light| light.le == [5.0; 3]));
    }

    #[test]
    fn normal_follows_vertex_normal() {
        for normal_y in [1.0, -1.0] {
            let lights = area_lights(&quad(normal_y), &[0, 1, 2], &Matrix::IDENTITY, [1.0; 3]);
            let normal = Vec3::from_array(lights[0].normal);
            assert_relative_eq!(normal.y, normal_y);
            assert_relative_eq!(normal.length(), 1.0);
        }
    }

    #[test]
    fn transform_moves_vertices_and_turns_normal() {
        // Rotate 90 degrees about X (y -> z) and lift by 2 along Y
        let transform = Matrix::from_rows([
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, -1.0, 2.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        let lights = area_lights(&quad(1.0), &[0, 1, 2], &transform, [1.0; 3]);

        assert_eq!(lights[0].v3, [1.0, 1.0, 0.0]);
        let normal = Vec3::from_array(lights[0].normal);
        assert_relative_eq!(normal.z, 1.0);
        assert_relative_eq!(normal.length(), 1.0);
    }

    #[test]
    fn out_of_range_triangles_are_skipped() {
        let lights = area_lights(&quad(1.0), &[0, 1, 9, 0, 1], &Matrix::IDENTITY, [1.0; 3]);
        assert!(lights.is_empty());
    }
}
