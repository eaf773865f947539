//! Deferred geometry pass: draws every scene object into the G-buffer

use crate::context::RenderError;
use crate::frame::FrameState;
use crate::model::MaterialBinder;
use crate::primitives::Vertex;
use crate::scene::{ModelLibrary, SceneObject};
use crate::targets::{gbuffer_attachments, RenderTarget, DEPTH_FORMAT};
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    /// x = emission strength
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
}

impl ObjectUniforms {
    pub fn from_world(world: Mat4) -> Self {
        let normal = Mat3::from_mat4(world).inverse().transpose();
        Self {
            model: world.to_cols_array_2d(),
            normal_matrix: Mat4::from_mat3(normal).to_cols_array_2d(),
        }
    }
}

struct ObjectSlot {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct GeometryPass {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    object_bgl: wgpu::BindGroupLayout,
    object_slots: Vec<ObjectSlot>,
    materials: MaterialBinder,
}

impl GeometryPass {
    /// The asset convention: clockwise triangles face the camera.
    pub fn primitive_state() -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        }
    }

    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Geometry Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("geometry_shader.wgsl").into()),
        });

        let uniform_entry = |visibility| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        // Group 0: camera
        let camera_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Geometry Camera BGL"),
            entries: &[uniform_entry(wgpu::ShaderStages::VERTEX_FRAGMENT)],
        });
        // Group 1: per-object transform
        let object_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Geometry Object BGL"),
            entries: &[uniform_entry(wgpu::ShaderStages::VERTEX)],
        });
        // Group 2: material
        let materials = MaterialBinder::new(device, queue);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Geometry Pipeline Layout"),
            bind_group_layouts: &[&camera_bgl, &object_bgl, materials.layout()],
            push_constant_ranges: &[],
        });

        let targets: Vec<Option<wgpu::ColorTargetState>> = gbuffer_attachments()
            .iter()
            .map(|spec| {
                Some(wgpu::ColorTargetState {
                    format: spec.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Geometry Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_geometry"),
                buffers: &[Vertex::desc()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_geometry"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: Self::primitive_state(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Geometry Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Geometry Camera BG"),
            layout: &camera_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
            object_bgl,
            object_slots: Vec::new(),
            materials,
        }
    }

    pub fn materials(&self) -> &MaterialBinder {
        &self.materials
    }

    fn ensure_object_slots(&mut self, device: &wgpu::Device, count: usize) {
        while self.object_slots.len() < count {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Geometry Object Buffer"),
                size: std::mem::size_of::<ObjectUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Geometry Object BG"),
                layout: &self.object_bgl,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            self.object_slots.push(ObjectSlot { buffer, bind_group });
        }
    }

    /// Clear the G-buffer and draw `objects`. Every model handle is
    /// resolved before any command is recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer: &RenderTarget,
        frame: &FrameState,
        emission_strength: f32,
        objects: &[SceneObject],
        models: &ModelLibrary,
    ) -> Result<(), RenderError> {
        let resolved = objects
            .iter()
            .map(|object| models.resolve(object))
            .collect::<Result<Vec<_>, _>>()?;

        let camera = CameraUniforms {
            view_proj: frame.view_projection().to_cols_array_2d(),
            params: [emission_strength, 0.0, 0.0, 0.0],
        };
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[camera]));

        self.ensure_object_slots(device, objects.len());
        for (object, slot) in objects.iter().zip(&self.object_slots) {
            let uniforms = ObjectUniforms::from_world(object.world_transform());
            queue.write_buffer(&slot.buffer, 0, bytemuck::cast_slice(&[uniforms]));
        }

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = gbuffer
            .colors()
            .iter()
            .map(|attachment| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth = gbuffer.depth().ok_or_else(|| RenderError::IncompleteTarget {
            target: gbuffer.label.to_string(),
            reason: "missing depth attachment".into(),
        })?;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Geometry Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        for (model, slot) in resolved.iter().zip(&self.object_slots) {
            pass.set_bind_group(1, &slot.bind_group, &[]);
            model.draw(&mut pass);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn geometry_winding_is_clockwise_with_back_culling() {
        let state = GeometryPass::primitive_state();
        assert_eq!(state.front_face, wgpu::FrontFace::Cw);
        assert_eq!(state.cull_mode, Some(wgpu::Face::Back));
    }

    #[test]
    fn uniform_scale_keeps_normals_unit_direction() {
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)) * Mat4::from_scale(Vec3::splat(0.01));
        let uniforms = ObjectUniforms::from_world(world);
        let normal_matrix = Mat4::from_cols_array_2d(&uniforms.normal_matrix);
        let n = normal_matrix.transform_vector3(Vec3::Y).normalize();
        assert!((n - Vec3::Y).length() < 1e-5);
        // Translation never reaches normals
        assert_eq!(normal_matrix.w_axis, glam::Vec4::W);
    }
}
