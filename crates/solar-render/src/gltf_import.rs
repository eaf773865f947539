//! glTF importer producing CPU-side meshes, materials and RGBA8 images

use crate::context::RenderError;
use crate::primitives::{Mesh, Vertex};
use glam::{Mat3, Mat4, Vec3};
use std::path::Path;

/// PBR material factors; textures multiply these per channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialFactors {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
}

impl Default for MaterialFactors {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            emissive: [0.0; 3],
            metallic: 0.0,
            roughness: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportedMaterial {
    pub name: String,
    pub factors: MaterialFactors,
    /// Indices into [`ImportedModel::images`]
    pub base_color_texture: Option<usize>,
    pub emissive_texture: Option<usize>,
    pub metallic_roughness_texture: Option<usize>,
}

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone)]
pub struct ImportedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ImportedPrimitive {
    pub mesh: Mesh,
    pub material: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportedModel {
    pub primitives: Vec<ImportedPrimitive>,
    pub materials: Vec<ImportedMaterial>,
    pub images: Vec<ImportedImage>,
}

/// Import a glTF or GLB file with node transforms baked into the vertices.
///
/// glTF triangles are counter-clockwise; the result is rewound clockwise.
pub fn import_gltf<P: AsRef<Path>>(path: P) -> Result<ImportedModel, RenderError> {
    let path = path.as_ref();
    let (document, buffers, images) = gltf::import(path)
        .map_err(|e| RenderError::ModelLoad(format!("{}: {}", path.display(), e)))?;

    let mut primitives = Vec::new();
    let scene = document.default_scene().or_else(|| document.scenes().next());
    match scene {
        Some(scene) => {
            for node in scene.nodes() {
                collect_node(&node, Mat4::IDENTITY, &buffers, &mut primitives);
            }
        }
        None => {
            for mesh in document.meshes() {
                collect_mesh(&mesh, Mat4::IDENTITY, &buffers, &mut primitives);
            }
        }
    }

    if primitives.is_empty() {
        return Err(RenderError::ModelLoad(format!(
            "{}: no triangle primitives",
            path.display()
        )));
    }

    let materials = document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let image_of = |texture: gltf::texture::Texture| texture.source().index();
            ImportedMaterial {
                name: material
                    .name()
                    .map(String::from)
                    .unwrap_or_else(|| format!("material_{}", material.index().unwrap_or(0))),
                factors: MaterialFactors {
                    base_color: pbr.base_color_factor(),
                    emissive: material.emissive_factor(),
                    metallic: pbr.metallic_factor(),
                    roughness: pbr.roughness_factor(),
                },
                base_color_texture: pbr.base_color_texture().map(|info| image_of(info.texture())),
                emissive_texture: material.emissive_texture().map(|info| image_of(info.texture())),
                metallic_roughness_texture: pbr
                    .metallic_roughness_texture()
                    .map(|info| image_of(info.texture())),
            }
        })
        .collect();

    let images = images
        .iter()
        .map(|image| ImportedImage {
            width: image.width,
            height: image.height,
            rgba: to_rgba8(image.format, &image.pixels),
        })
        .collect();

    Ok(ImportedModel {
        primitives,
        materials,
        images,
    })
}

fn collect_node(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[gltf::buffer::Data],
    out: &mut Vec<ImportedPrimitive>,
) {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        collect_mesh(&mesh, world, buffers, out);
    }
    for child in node.children() {
        collect_node(&child, world, buffers, out);
    }
}

fn collect_mesh(
    mesh: &gltf::Mesh,
    transform: Mat4,
    buffers: &[gltf::buffer::Data],
    out: &mut Vec<ImportedPrimitive>,
) {
    let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();
    // Mirroring transforms already flip the winding
    let mirrored = transform.determinant() < 0.0;

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            log::warn!(
                "Skipping {:?} primitive in mesh '{}'",
                primitive.mode(),
                mesh.name().unwrap_or("unnamed")
            );
            continue;
        }
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .map(|iter| iter.collect())
            .unwrap_or_default();
        if positions.is_empty() {
            continue;
        }
        let normals: Vec<[f32; 3]> = reader
            .read_normals()
            .map(|iter| iter.collect())
            .unwrap_or_default();
        let uvs: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|iter| iter.into_f32().collect())
            .unwrap_or_default();
        let mut indices: Vec<u32> = reader
            .read_indices()
            .map(|iter| iter.into_u32().collect())
            .unwrap_or_else(|| (0..positions.len() as u32).collect());

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, position)| {
                let normal = normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]);
                Vertex {
                    position: transform.transform_point3(Vec3::from(*position)).to_array(),
                    normal: (normal_matrix * Vec3::from(normal)).normalize_or_zero().to_array(),
                    uv: uvs.get(i).copied().unwrap_or([0.0, 0.0]),
                }
            })
            .collect();

        if !mirrored {
            reverse_winding(&mut indices);
        }

        out.push(ImportedPrimitive {
            mesh: Mesh { vertices, indices },
            material: primitive.material().index(),
        });
    }
}

/// Swap the last two indices of every triangle.
pub fn reverse_winding(indices: &mut [u32]) {
    for tri in indices.chunks_exact_mut(3) {
        tri.swap(1, 2);
    }
}

/// Expand any 8/16-bit or float glTF pixel layout to RGBA8.
pub fn to_rgba8(format: gltf::image::Format, pixels: &[u8]) -> Vec<u8> {
    use gltf::image::Format;

    let unorm16 = |bytes: &[u8]| bytes[1];
    let float32 = |bytes: &[u8]| {
        let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    };

    match format {
        Format::R8 => pixels.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        Format::R8G8 => pixels.chunks_exact(2).flat_map(|p| [p[0], p[1], 0, 255]).collect(),
        Format::R8G8B8 => pixels.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect(),
        Format::R8G8B8A8 => pixels.to_vec(),
        Format::R16 => pixels
            .chunks_exact(2)
            .flat_map(|p| {
                let v = unorm16(p);
                [v, v, v, 255]
            })
            .collect(),
        Format::R16G16 => pixels
            .chunks_exact(4)
            .flat_map(|p| [unorm16(&p[0..2]), unorm16(&p[2..4]), 0, 255])
            .collect(),
        Format::R16G16B16 => pixels
            .chunks_exact(6)
            .flat_map(|p| [unorm16(&p[0..2]), unorm16(&p[2..4]), unorm16(&p[4..6]), 255])
            .collect(),
        Format::R16G16B16A16 => pixels.chunks_exact(2).map(unorm16).collect(),
        Format::R32G32B32FLOAT => pixels
            .chunks_exact(12)
            .flat_map(|p| [float32(&p[0..4]), float32(&p[4..8]), float32(&p[8..12]), 255])
            .collect(),
        Format::R32G32B32A32FLOAT => pixels.chunks_exact(4).map(float32).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gltf::image::Format;

    #[test]
    fn reverse_winding_swaps_each_triangle() {
        let mut indices = vec![0, 1, 2, 3, 4, 5];
        reverse_winding(&mut indices);
        assert_eq!(indices, vec![0, 2, 1, 3, 5, 4]);
    }

    #[test]
    fn rgb_gains_opaque_alpha() {
        let rgba = to_rgba8(Format::R8G8B8, &[10, 20, 30, 40, 50, 60]);
        assert_eq!(rgba, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn sixteen_bit_keeps_high_byte() {
        let rgba = to_rgba8(Format::R16, &[0x34, 0x12]);
        assert_eq!(rgba, vec![0x12, 0x12, 0x12, 255]);
    }

    #[test]
    fn float_channels_are_clamped() {
        let mut pixels = Vec::new();
        for v in [2.0f32, -1.0, 0.5, 1.0] {
            pixels.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(to_rgba8(Format::R32G32B32A32FLOAT, &pixels), vec![255, 0, 128, 255]);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let result = import_gltf("definitely/not/here.gltf");
        assert!(matches!(result, Err(RenderError::ModelLoad(_))));
    }
}
