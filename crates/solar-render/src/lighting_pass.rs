//! Full-screen deferred lighting: G-buffer + environment maps -> HDR color and bright pass

use crate::environment::EnvironmentMaps;
use crate::scene::PointLight;
use crate::targets::{gbuffer, hdr_attachments, RenderTarget};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use wgpu::util::DeviceExt;

/// Rec. 709 luminance weights used by the bright-pass threshold
pub const LUMINANCE_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Texture inputs of the lighting shader, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingInput {
    Position,
    Normal,
    Albedo,
    Emission,
    MetallicRoughness,
    Irradiance,
    Prefilter,
    BrdfLut,
}

pub const LIGHTING_INPUTS: [LightingInput; 8] = [
    LightingInput::Position,
    LightingInput::Normal,
    LightingInput::Albedo,
    LightingInput::Emission,
    LightingInput::MetallicRoughness,
    LightingInput::Irradiance,
    LightingInput::Prefilter,
    LightingInput::BrdfLut,
];

/// Binding slot of the shared environment sampler
pub const SAMPLER_BINDING: u32 = LIGHTING_INPUTS.len() as u32;

impl LightingInput {
    pub fn binding(self) -> u32 {
        self as u32
    }

    /// G-buffer inputs are read with `textureLoad`, so they bind as
    /// unfilterable even though their formats could be filtered.
    fn texture_binding(self) -> wgpu::BindingType {
        let (sample_type, view_dimension) = match self {
            LightingInput::Irradiance | LightingInput::Prefilter => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::Cube,
            ),
            LightingInput::BrdfLut => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::D2,
            ),
            _ => (
                wgpu::TextureSampleType::Float { filterable: false },
                wgpu::TextureViewDimension::D2,
            ),
        };
        wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        }
    }

    fn view<'a>(self, gbuffer_target: &'a RenderTarget, maps: &'a EnvironmentMaps) -> &'a wgpu::TextureView {
        match self {
            LightingInput::Position => &gbuffer_target.color(gbuffer::POSITION).view,
            LightingInput::Normal => &gbuffer_target.color(gbuffer::NORMAL).view,
            LightingInput::Albedo => &gbuffer_target.color(gbuffer::ALBEDO).view,
            LightingInput::Emission => &gbuffer_target.color(gbuffer::EMISSION).view,
            LightingInput::MetallicRoughness => &gbuffer_target.color(gbuffer::METALLIC_ROUGHNESS).view,
            LightingInput::Irradiance => &maps.irradiance.view,
            LightingInput::Prefilter => &maps.prefilter.view,
            LightingInput::BrdfLut => &maps.brdf_lut_view,
        }
    }
}

pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMINANCE_WEIGHTS)
}

/// CPU mirror of the shader's bright-pass rule
pub fn bright_pass(color: Vec3, threshold: f32) -> Vec3 {
    if luminance(color) > threshold {
        color
    } else {
        Vec3::ZERO
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct LightUniforms {
    pub position: [f32; 4],
    /// rgb = color, w = intensity
    pub color: [f32; 4],
    /// x = linear, y = quadratic
    pub attenuation: [f32; 4],
    pub view_position: [f32; 4],
    /// x = bloom threshold, y = specular strength, z = max reflection lod
    pub params: [f32; 4],
}

impl LightUniforms {
    pub fn new(
        light: &PointLight,
        camera_position: Vec3,
        bloom_threshold: f32,
        specular_strength: f32,
        max_reflection_lod: f32,
    ) -> Self {
        Self {
            position: light.position.extend(1.0).to_array(),
            color: light.color.extend(light.intensity).to_array(),
            attenuation: [light.linear, light.quadratic, 0.0, 0.0],
            view_position: camera_position.extend(1.0).to_array(),
            params: [bloom_threshold, specular_strength, max_reflection_lod, 0.0],
        }
    }
}

pub struct LightingPass {
    pipeline: wgpu::RenderPipeline,
    inputs_bgl: wgpu::BindGroupLayout,
    light_buffer: wgpu::Buffer,
    light_bind_group: wgpu::BindGroup,
}

impl LightingPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Lighting Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("lighting_shader.wgsl").into()),
        });

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = LIGHTING_INPUTS
            .iter()
            .map(|input| wgpu::BindGroupLayoutEntry {
                binding: input.binding(),
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: input.texture_binding(),
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: SAMPLER_BINDING,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        let inputs_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Lighting Inputs BGL"),
            entries: &entries,
        });

        let light_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Lighting Light BGL"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Lighting Pipeline Layout"),
            bind_group_layouts: &[&inputs_bgl, &light_bgl],
            push_constant_ranges: &[],
        });

        let targets: Vec<Option<wgpu::ColorTargetState>> = hdr_attachments()
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
            label: Some("Lighting Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_lighting"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let light_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Lighting Light Buffer"),
            contents: bytemuck::cast_slice(&[LightUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let light_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lighting Light BG"),
            layout: &light_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: light_buffer.as_entire_binding(),
            }],
        });

        Self {
            pipeline,
            inputs_bgl,
            light_buffer,
            light_bind_group,
        }
    }

    /// Light every covered G-buffer texel into the HDR target's color and
    /// bright-pass attachments.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer_target: &RenderTarget,
        hdr_target: &RenderTarget,
        maps: &EnvironmentMaps,
        uniforms: &LightUniforms,
    ) {
        queue.write_buffer(&self.light_buffer, 0, bytemuck::cast_slice(&[*uniforms]));

        // Attachments are reallocated on resize, so the bind group is rebuilt per frame
        let mut entries: Vec<wgpu::BindGroupEntry> = LIGHTING_INPUTS
            .iter()
            .map(|input| wgpu::BindGroupEntry {
                binding: input.binding(),
                resource: wgpu::BindingResource::TextureView(input.view(gbuffer_target, maps)),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&maps.sampler),
        });
        let inputs_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lighting Inputs BG"),
            layout: &self.inputs_bgl,
            entries: &entries,
        });

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = hdr_target
            .colors()
            .iter()
            .map(|attachment| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Lighting Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &inputs_bind_group, &[]);
        pass.set_bind_group(1, &self.light_bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_bind_in_contract_order() {
        let bindings: Vec<u32> = LIGHTING_INPUTS.iter().map(|input| input.binding()).collect();
        assert_eq!(bindings, (0..8).collect::<Vec<_>>());
        assert_eq!(LightingInput::MetallicRoughness.binding(), gbuffer::METALLIC_ROUGHNESS as u32);
        assert_eq!(LightingInput::BrdfLut.binding(), 7);
        assert_eq!(SAMPLER_BINDING, 8);
    }

    #[test]
    fn gbuffer_inputs_are_unfilterable() {
        for input in &LIGHTING_INPUTS[..5] {
            match input.texture_binding() {
                wgpu::BindingType::Texture { sample_type, .. } => {
                    assert_eq!(sample_type, wgpu::TextureSampleType::Float { filterable: false });
                }
                _ => panic!("expected texture binding"),
            }
        }
    }

    #[test]
    fn half_float_filtering_needs_no_feature() {
        let filterable = |format: wgpu::TextureFormat| {
            format
                .guaranteed_format_features(wgpu::Features::empty())
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
        };
        assert!(filterable(wgpu::TextureFormat::Rgba16Float));
        assert!(!filterable(wgpu::TextureFormat::Rgba32Float));
    }

    #[test]
    fn bright_pass_thresholds_on_luminance() {
        assert_eq!(bright_pass(Vec3::splat(0.9), 1.0), Vec3::ZERO);
        assert_eq!(bright_pass(Vec3::splat(1.5), 1.0), Vec3::splat(1.5));
        // Pure blue is dim in luminance terms
        assert_eq!(bright_pass(Vec3::new(0.0, 0.0, 10.0), 1.0), Vec3::ZERO);
        assert!((luminance(Vec3::ONE) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn bright_output_carries_no_alpha() {
        // Alpha would leak into the bloom copy for texels below threshold
        let source = include_str!("lighting_shader.wgsl");
        assert!(source.contains("out.bright = vec4<f32>(bright, 0.0);"));
        assert!(source.contains("out.bright = vec4<f32>(0.0);"));
    }

    #[test]
    fn light_uniforms_pack_intensity_and_attenuation() {
        let light = PointLight::default();
        let uniforms = LightUniforms::new(&light, Vec3::new(0.0, 0.0, 3.0), 1.0, 0.5, 4.0);
        assert_eq!(uniforms.color, [1.0, 1.0, 1.0, 50.0]);
        assert_eq!(uniforms.attenuation[..2], [1e-6, 1e-6]);
        assert_eq!(uniforms.view_position, [0.0, 0.0, 3.0, 1.0]);
        assert_eq!(uniforms.params, [1.0, 0.5, 4.0, 0.0]);
    }
}
