use std::f32::consts::PI;

use super::mesh::{IndexGroup, Mesh, PrimitiveType, VertexDataType, VertexStream};

#[derive(Default)]
struct Streams {
    positions: Vec<f32>,
    normals: Vec<f32>,
    uvs: Vec<f32>,
}

impl Streams {
    fn push(&mut self, position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) {
        self.positions.extend_from_slice(&position);
        self.normals.extend_from_slice(&normal);
        self.uvs.extend_from_slice(&uv);
    }

    fn into_mesh(self, name: &str, indices: &[u32]) -> Mesh {
        let group = if self.positions.len() / 3 <= u16::MAX as usize {
            let narrow: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
            IndexGroup::from_u16(0, &narrow)
        } else {
            IndexGroup::from_u32(0, indices)
        };

        Mesh::new(name, PrimitiveType::TriangleList)
            .with_stream(VertexStream::from_f32(
                "position",
                VertexDataType::Float3,
                &self.positions,
            ))
            .with_stream(VertexStream::from_f32(
                "normal",
                VertexDataType::Float3,
                &self.normals,
            ))
            .with_stream(VertexStream::from_f32(
                "texcoord",
                VertexDataType::Float2,
                &self.uvs,
            ))
            .with_index_group(group)
    }
}

/// Unit sphere with position, normal and texcoord streams.
pub fn sphere(segments: u32, rings: u32) -> Mesh {
    let mut streams = Streams::default();
    let mut indices = Vec::new();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let (y, ring_radius) = (phi.cos(), phi.sin());
        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let p = [ring_radius * theta.cos(), y, ring_radius * theta.sin()];
            streams.push(
                p,
                p,
                [segment as f32 / segments as f32, ring as f32 / rings as f32],
            );
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;
            indices.extend_from_slice(&[current, current + 1, next]);
            indices.extend_from_slice(&[current + 1, next + 1, next]);
        }
    }

    streams.into_mesh("sphere", &indices)
}

/// Axis-aligned cube of edge length 1 with per-face normals.
pub fn cube() -> Mesh {
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut streams = Streams::default();
    let mut indices = Vec::new();
    for (normal, u, v) in FACES {
        let base = (streams.positions.len() / 3) as u32;
        for (su, sv) in [(-0.5f32, -0.5f32), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = [
                normal[0] * 0.5 + u[0] * su + v[0] * sv,
                normal[1] * 0.5 + u[1] * su + v[1] * sv,
                normal[2] * 0.5 + u[2] * su + v[2] * sv,
            ];
            streams.push(position, normal, [su + 0.5, 0.5 - sv]);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    streams.into_mesh("cube", &indices)
}

/// Square in the XZ plane facing +Y.
pub fn plane(size: f32) -> Mesh {
    let half = size * 0.5;
    let mut streams = Streams::default();
    for (x, z, u, v) in [
        (-half, half, 0.0, 1.0),
        (half, half, 1.0, 1.0),
        (half, -half, 1.0, 0.0),
        (-half, -half, 0.0, 0.0),
    ] {
        streams.push([x, 0.0, z], [0.0, 1.0, 0.0], [u, v]);
    }
    streams.into_mesh("plane", &[0, 1, 2, 0, 2, 3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_two_triangles_per_face() {
        let mesh = cube();
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_groups[0].index_count(), 36);
    }

    #[test]
    fn sphere_indices_stay_in_range() {
        let mesh = sphere(8, 6);
        let count = mesh.vertex_count() as u16;
        let indices: &[u16] = bytemuck::cast_slice(&mesh.index_groups[0].data);
        assert!(indices.iter().all(|&i| i < count));
    }

    #[test]
    fn cube_faces_wind_counter_clockwise_from_outside() {
        let mesh = cube();
        let positions: &[f32] = bytemuck::cast_slice(&mesh.vertex_streams[0].data);
        let normals: &[f32] = bytemuck::cast_slice(&mesh.vertex_streams[1].data);
        let indices: &[u16] = bytemuck::cast_slice(&mesh.index_groups[0].data);
        let p = |i: u16| glam::Vec3::from_slice(&positions[i as usize * 3..i as usize * 3 + 3]);
        for tri in indices.chunks(3) {
            let face_normal = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
            let n = glam::Vec3::from_slice(&normals[tri[0] as usize * 3..tri[0] as usize * 3 + 3]);
            assert!(face_normal.dot(n) > 0.0);
        }
    }
}
