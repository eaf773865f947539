//! GPU models: uploaded glTF primitives with their material bind groups

use crate::gltf_import::{import_gltf, ImportedImage, ImportedModel, MaterialFactors};
use crate::primitives::{create_uv_sphere, Mesh};
use bytemuck::{Pod, Zeroable};
use std::path::Path;
use wgpu::util::DeviceExt;

/// Radius the planet assets are authored at
pub const FALLBACK_SPHERE_RADIUS: f32 = 5.0;

/// Bind group index the geometry pipeline expects materials at
pub const MATERIAL_GROUP: u32 = 2;

/// Uniform data for one material (group 2, binding 0)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MaterialUniforms {
    pub base_color: [f32; 4],
    /// xyz = emissive factor
    pub emissive: [f32; 4],
    /// x = metallic, y = roughness
    pub metallic_roughness: [f32; 4],
}

impl From<&MaterialFactors> for MaterialUniforms {
    fn from(factors: &MaterialFactors) -> Self {
        let [r, g, b] = factors.emissive;
        Self {
            base_color: factors.base_color,
            emissive: [r, g, b, 0.0],
            metallic_roughness: [factors.metallic, factors.roughness, 0.0, 0.0],
        }
    }
}

/// Appearance used when a model file cannot be loaded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelFallback {
    pub albedo: [f32; 3],
    pub emission: [f32; 3],
}

impl Default for ModelFallback {
    fn default() -> Self {
        Self {
            albedo: [0.5, 0.5, 0.5],
            emission: [0.0, 0.0, 0.0],
        }
    }
}

impl ModelFallback {
    pub fn factors(&self) -> MaterialFactors {
        let [r, g, b] = self.albedo;
        MaterialFactors {
            base_color: [r, g, b, 1.0],
            emissive: self.emission,
            metallic: 0.0,
            roughness: 0.9,
        }
    }
}

/// Texture views a material samples; `None` picks the white default.
#[derive(Default, Clone, Copy)]
pub struct MaterialTextures<'a> {
    pub base_color: Option<&'a wgpu::TextureView>,
    pub emissive: Option<&'a wgpu::TextureView>,
    pub metallic_roughness: Option<&'a wgpu::TextureView>,
}

/// Shared layout, sampler and default textures for material bind groups
pub struct MaterialBinder {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    white_srgb: wgpu::TextureView,
    white_linear: wgpu::TextureView,
}

impl MaterialBinder {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white = ImportedImage {
            width: 1,
            height: 1,
            rgba: vec![255; 4],
        };
        let white_srgb = upload_image(device, queue, "Default White", &white, true);
        let white_linear = upload_image(device, queue, "Default White Linear", &white, false);

        Self {
            layout,
            sampler,
            white_srgb,
            white_linear,
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn create_material(
        &self,
        device: &wgpu::Device,
        label: &str,
        factors: MaterialFactors,
        textures: MaterialTextures<'_>,
    ) -> MeshMaterial {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Material Uniforms", label)),
            contents: bytemuck::cast_slice(&[MaterialUniforms::from(&factors)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Material BG", label)),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        textures.base_color.unwrap_or(&self.white_srgb),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(
                        textures.emissive.unwrap_or(&self.white_srgb),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(
                        textures.metallic_roughness.unwrap_or(&self.white_linear),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        MeshMaterial {
            factors,
            buffer,
            bind_group,
        }
    }
}

fn upload_image(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &ImportedImage,
    srgb: bool,
) -> wgpu::TextureView {
    let format = if srgb {
        wgpu::TextureFormat::Rgba8UnormSrgb
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    };
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &image.rgba,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// A material's uniform buffer and bind group
pub struct MeshMaterial {
    pub factors: MaterialFactors,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

/// A single GPU-resident primitive with its material
pub struct GpuPrimitive {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub material: MeshMaterial,
}

impl GpuPrimitive {
    fn upload(device: &wgpu::Device, label: &str, mesh: &Mesh, material: MeshMaterial) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertex Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Index Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            material,
        }
    }
}

/// A drawable model made of one or more primitives
pub struct Model {
    pub name: String,
    pub primitives: Vec<GpuPrimitive>,
    /// True when this model is the procedural stand-in for a failed load
    pub is_fallback: bool,
}

impl Model {
    /// Load a glTF model, substituting a sphere if the file is unusable.
    pub fn load<P: AsRef<Path>>(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        binder: &MaterialBinder,
        path: P,
        fallback: &ModelFallback,
    ) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string();

        match import_gltf(path) {
            Ok(imported) => {
                log::info!(
                    "Loaded model '{}' ({} primitives) from {}",
                    name,
                    imported.primitives.len(),
                    path.display()
                );
                Self::from_imported(device, queue, binder, &name, &imported)
            }
            Err(e) => {
                log::warn!("{}; drawing '{}' as a sphere", e, name);
                let mut model = Self::sphere(device, binder, &name, fallback);
                model.is_fallback = true;
                model
            }
        }
    }

    pub fn from_imported(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        binder: &MaterialBinder,
        name: &str,
        imported: &ImportedModel,
    ) -> Self {
        // Base color and emissive are sRGB encoded, metallic-roughness is linear
        let srgb_views: Vec<wgpu::TextureView> = imported
            .images
            .iter()
            .enumerate()
            .map(|(i, image)| upload_image(device, queue, &format!("{} Image {}", name, i), image, true))
            .collect();
        let linear_views: Vec<Option<wgpu::TextureView>> = imported
            .images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                let used_as_mr = imported
                    .materials
                    .iter()
                    .any(|m| m.metallic_roughness_texture == Some(i));
                used_as_mr.then(|| {
                    upload_image(device, queue, &format!("{} Image {} Linear", name, i), image, false)
                })
            })
            .collect();

        let primitives = imported
            .primitives
            .iter()
            .enumerate()
            .map(|(i, primitive)| {
                let label = format!("{} Primitive {}", name, i);
                let material = match primitive.material.and_then(|m| imported.materials.get(m)) {
                    Some(material) => binder.create_material(
                        device,
                        &label,
                        material.factors,
                        MaterialTextures {
                            base_color: material.base_color_texture.and_then(|t| srgb_views.get(t)),
                            emissive: material.emissive_texture.and_then(|t| srgb_views.get(t)),
                            metallic_roughness: material
                                .metallic_roughness_texture
                                .and_then(|t| linear_views.get(t))
                                .and_then(Option::as_ref),
                        },
                    ),
                    None => binder.create_material(
                        device,
                        &label,
                        MaterialFactors::default(),
                        MaterialTextures::default(),
                    ),
                };
                GpuPrimitive::upload(device, &label, &primitive.mesh, material)
            })
            .collect();

        Self {
            name: name.to_string(),
            primitives,
            is_fallback: false,
        }
    }

    pub fn from_mesh(
        device: &wgpu::Device,
        binder: &MaterialBinder,
        name: &str,
        mesh: &Mesh,
        factors: MaterialFactors,
    ) -> Self {
        let material = binder.create_material(device, name, factors, MaterialTextures::default());
        Self {
            name: name.to_string(),
            primitives: vec![GpuPrimitive::upload(device, name, mesh, material)],
            is_fallback: false,
        }
    }

    pub fn sphere(
        device: &wgpu::Device,
        binder: &MaterialBinder,
        name: &str,
        fallback: &ModelFallback,
    ) -> Self {
        let mesh = create_uv_sphere(FALLBACK_SPHERE_RADIUS, 48, 24);
        Self::from_mesh(device, binder, name, &mesh, fallback.factors())
    }

    /// Record draws for every primitive. Expects the geometry pipeline and
    /// the camera/object groups to be bound already.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        for primitive in &self.primitives {
            pass.set_bind_group(MATERIAL_GROUP, &primitive.material.bind_group, &[]);
            pass.set_vertex_buffer(0, primitive.vertex_buffer.slice(..));
            pass.set_index_buffer(primitive.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..primitive.index_count, 0, 0..1);
        }
    }

    pub fn triangle_count(&self) -> u32 {
        self.primitives.iter().map(|p| p.index_count / 3).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::test_gpu;

    #[test]
    fn material_uniforms_pack_factors() {
        let factors = MaterialFactors {
            base_color: [0.1, 0.2, 0.3, 1.0],
            emissive: [4.0, 2.4, 0.8],
            metallic: 0.25,
            roughness: 0.75,
        };
        let uniforms = MaterialUniforms::from(&factors);
        assert_eq!(uniforms.emissive, [4.0, 2.4, 0.8, 0.0]);
        assert_eq!(uniforms.metallic_roughness[..2], [0.25, 0.75]);
        assert_eq!(std::mem::size_of::<MaterialUniforms>(), 48);
    }

    #[test]
    fn fallback_factors_carry_configured_colors() {
        let fallback = ModelFallback {
            albedo: [0.2, 0.4, 0.8],
            emission: [0.0, 0.0, 0.0],
        };
        let factors = fallback.factors();
        assert_eq!(factors.base_color, [0.2, 0.4, 0.8, 1.0]);
        assert_eq!(factors.metallic, 0.0);
    }

    #[test]
    fn missing_file_loads_fallback_sphere() {
        let Some(gpu) = test_gpu(4, 4) else { return };
        let binder = MaterialBinder::new(&gpu.device, &gpu.queue);
        let model = Model::load(
            &gpu.device,
            &gpu.queue,
            &binder,
            "Models/Nowhere/Nowhere.gltf",
            &ModelFallback::default(),
        );
        assert!(model.is_fallback);
        assert_eq!(model.name, "Nowhere");
        assert_eq!(model.primitives.len(), 1);
        assert!(model.triangle_count() > 0);
    }
}
