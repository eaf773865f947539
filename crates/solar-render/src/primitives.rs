//! Mesh primitives (UV sphere, skybox cube)

use bytemuck::{Pod, Zeroable};
use std::f32::consts::{FRAC_PI_2, PI, TAU};

/// A vertex with position, normal, and UV coordinates
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    const ATTRIBS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
    ];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// A mesh with vertices and indices.
///
/// Triangles wind clockwise when seen from outside, matching the model
/// assets the geometry pass draws.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// Create a UV sphere centred on the origin
pub fn create_uv_sphere(radius: f32, sectors: u32, stacks: u32) -> Mesh {
    let sectors = sectors.max(3);
    let stacks = stacks.max(2);
    let mut vertices = Vec::with_capacity(((sectors + 1) * (stacks + 1)) as usize);

    for i in 0..=stacks {
        // From the north pole down
        let phi = FRAC_PI_2 - PI * i as f32 / stacks as f32;
        let (sin_phi, cos_phi) = phi.sin_cos();
        for j in 0..=sectors {
            let theta = TAU * j as f32 / sectors as f32;
            let (sin_theta, cos_theta) = theta.sin_cos();
            let normal = [cos_phi * cos_theta, sin_phi, cos_phi * sin_theta];
            vertices.push(Vertex {
                position: [normal[0] * radius, normal[1] * radius, normal[2] * radius],
                normal,
                uv: [j as f32 / sectors as f32, i as f32 / stacks as f32],
            });
        }
    }

    let mut indices = Vec::with_capacity((sectors * stacks * 6) as usize);
    for i in 0..stacks {
        let mut k1 = i * (sectors + 1);
        let mut k2 = k1 + sectors + 1;
        for _ in 0..sectors {
            // Pole rows collapse to one triangle per sector
            if i != 0 {
                indices.extend_from_slice(&[k1, k2, k1 + 1]);
            }
            if i != stacks - 1 {
                indices.extend_from_slice(&[k1 + 1, k2, k2 + 1]);
            }
            k1 += 1;
            k2 += 1;
        }
    }

    Mesh { vertices, indices }
}

/// Corners of the unit skybox cube
pub const SKYBOX_POSITIONS: [[f32; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

/// Counter-clockwise from outside, hence clockwise from the camera inside it.
pub const SKYBOX_INDICES: [u16; 36] = [
    4, 5, 6, 4, 6, 7, // +Z
    1, 0, 3, 1, 3, 2, // -Z
    5, 1, 2, 5, 2, 6, // +X
    0, 4, 7, 0, 7, 3, // -X
    7, 6, 2, 7, 2, 3, // +Y
    0, 1, 5, 0, 5, 4, // -Y
];

pub fn skybox_vertex_desc() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    /// Positive when a triangle winds counter-clockwise seen from outside.
    fn outward_winding(a: Vec3, b: Vec3, c: Vec3) -> f32 {
        let centroid = (a + b + c) / 3.0;
        (b - a).cross(c - a).dot(centroid)
    }

    #[test]
    fn sphere_winds_clockwise_from_outside() {
        let mesh = create_uv_sphere(5.0, 16, 12);
        assert_eq!(mesh.index_count() % 3, 0);
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(mesh.vertices[i as usize].position));
            assert!(outward_winding(a, b, c) < 0.0, "triangle {:?} is not clockwise", tri);
        }
    }

    #[test]
    fn sphere_vertices_lie_on_radius() {
        let mesh = create_uv_sphere(5.0, 8, 6);
        assert_eq!(mesh.vertex_count(), 9 * 7);
        for v in &mesh.vertices {
            assert!((Vec3::from(v.position).length() - 5.0).abs() < 1e-4);
            assert!((Vec3::from(v.normal).length() - 1.0).abs() < 1e-4);
        }
        // Two pole rows with one triangle per sector, the rest with two
        assert_eq!(mesh.index_count(), (8 * 2 + 8 * 4 * 2) * 3);
    }

    #[test]
    fn skybox_cube_winds_counter_clockwise_from_outside() {
        for tri in SKYBOX_INDICES.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(SKYBOX_POSITIONS[i as usize]));
            assert!(outward_winding(a, b, c) > 0.0, "triangle {:?} faces inward", tri);
        }
    }
}
