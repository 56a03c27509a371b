use super::mesh::Mesh;
use super::vertex::Vertex;
use std::f32::consts::PI;

pub fn sphere_mesh(segments: u32, rings: u32) -> Mesh {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let x = ring_radius * theta.cos();
            let z = ring_radius * theta.sin();

            // Unit sphere: the position doubles as the normal.
            let uv = [segment as f32 / segments as f32, ring as f32 / rings as f32];
            vertices.push(Vertex::new([x, y, z], [x, y, z], uv));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, next, current + 1]);
            indices.extend_from_slice(&[current + 1, next, next + 1]);
        }
    }

    Mesh::new(vertices, indices)
}

/// Unit cube centred on the origin, four vertices per face.
pub fn cube_mesh() -> Mesh {
    // (normal, u axis, v axis) for each face
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    const CORNERS: [([f32; 2], [f32; 2]); 4] = [
        ([-0.5, -0.5], [0.0, 1.0]),
        ([0.5, -0.5], [1.0, 1.0]),
        ([0.5, 0.5], [1.0, 0.0]),
        ([-0.5, 0.5], [0.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u_axis, v_axis) in FACES {
        let base = vertices.len() as u32;
        for ([cu, cv], uv) in CORNERS {
            let pos = [
                normal[0] * 0.5 + u_axis[0] * cu + v_axis[0] * cv,
                normal[1] * 0.5 + u_axis[1] * cu + v_axis[1] * cv,
                normal[2] * 0.5 + u_axis[2] * cu + v_axis[2] * cv,
            ];
            vertices.push(Vertex::new(pos, normal, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    Mesh::new(vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn cube_has_four_vertices_and_two_triangles_per_face() {
        let cube = cube_mesh();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.indices.iter().all(|&i| i < 24));
    }

    #[test]
    fn cube_faces_wind_counter_clockwise_around_their_normal() {
        let cube = cube_mesh();
        for tri in cube.indices.chunks(3) {
            let a = Vec3::from(cube.vertices[tri[0] as usize].pos);
            let b = Vec3::from(cube.vertices[tri[1] as usize].pos);
            let c = Vec3::from(cube.vertices[tri[2] as usize].pos);
            let normal = Vec3::from(cube.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(normal) > 0.0);
        }
    }

    #[test]
    fn sphere_vertices_lie_on_the_unit_sphere() {
        let sphere = sphere_mesh(16, 8);
        assert_eq!(sphere.vertex_count(), 17 * 9);
        assert_eq!(sphere.index_count(), 16 * 8 * 6);
        for vertex in &sphere.vertices {
            assert!((Vec3::from(vertex.pos).length() - 1.0).abs() < 1e-5);
        }
    }
}
