//! Ping-pong Gaussian bloom over the bright-pass buffer

use crate::context::RenderError;
use crate::targets::{Attachment, RenderTarget, HDR_FORMAT};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// Which bloom slot is read and written by the next blur iteration.
///
/// Slot 0 holds the copied bright pass, so the first (horizontal) blur
/// writes slot 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    pub horizontal: bool,
    pub last_written: usize,
}

impl Default for PingPong {
    fn default() -> Self {
        Self {
            horizontal: true,
            last_written: 0,
        }
    }
}

impl PingPong {
    pub fn write_slot(&self) -> usize {
        self.horizontal as usize
    }

    pub fn read_slot(&self) -> usize {
        1 - self.write_slot()
    }

    pub fn advance(&mut self) {
        self.last_written = self.write_slot();
        self.horizontal = !self.horizontal;
    }

    /// Slot holding the result after `iterations` blurs.
    pub fn result_after(iterations: u32) -> usize {
        let mut parity = Self::default();
        for _ in 0..iterations {
            parity.advance();
        }
        parity.last_written
    }
}

/// Validate a texture-to-texture copy before recording it.
pub fn check_copy_compatible(
    source_label: &str,
    source_format: wgpu::TextureFormat,
    source_size: (u32, u32),
    destination_label: &str,
    destination_format: wgpu::TextureFormat,
    destination_size: (u32, u32),
) -> Result<(), RenderError> {
    let mismatch = |reason: String| RenderError::CopyMismatch {
        source_label: source_label.to_string(),
        destination: destination_label.to_string(),
        reason,
    };
    if source_format != destination_format {
        return Err(mismatch(format!(
            "format {:?} vs {:?}",
            source_format, destination_format
        )));
    }
    if source_size != destination_size {
        return Err(mismatch(format!(
            "size {}x{} vs {}x{}",
            source_size.0, source_size.1, destination_size.0, destination_size.1
        )));
    }
    Ok(())
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlurUniforms {
    direction: [f32; 2],
    _padding: [f32; 2],
}

pub struct BloomPass {
    pipeline: wgpu::RenderPipeline,
    texture_bgl: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    /// [horizontal, vertical]
    direction_bind_groups: [wgpu::BindGroup; 2],
}

impl BloomPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blur Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blur_shader.wgsl").into()),
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blur Texture BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let direction_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blur Direction BGL"),
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
            label: Some("Blur Pipeline Layout"),
            bind_group_layouts: &[&texture_bgl, &direction_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blur Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_blur"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
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

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Blur Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let direction_bind_groups = [[1.0, 0.0], [0.0, 1.0]].map(|direction| {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Blur Direction Buffer"),
                contents: bytemuck::cast_slice(&[BlurUniforms {
                    direction,
                    _padding: [0.0; 2],
                }]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Blur Direction BG"),
                layout: &direction_bgl,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            })
        });

        Self {
            pipeline,
            texture_bgl,
            sampler,
            direction_bind_groups,
        }
    }

    /// Copy `bright` into slot 0 and blur `iterations` times, alternating
    /// direction. Returns the slot holding the blurred result.
    pub fn run(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        bright: &Attachment,
        bloom: &[RenderTarget; 2],
        iterations: u32,
    ) -> Result<usize, RenderError> {
        let first = bloom[0].color(0);
        check_copy_compatible(
            bright.spec.label,
            bright.spec.format,
            bright.size(),
            first.spec.label,
            first.spec.format,
            first.size(),
        )?;
        let (width, height) = bright.size();
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &bright.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &first.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        // Reading slot n, rebuilt per frame since resize replaces the views
        let source_bind_groups = [0, 1].map(|slot| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Blur Source BG"),
                layout: &self.texture_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&bloom[slot].color(0).view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            })
        });

        let mut parity = PingPong::default();
        for _ in 0..iterations {
            let direction = if parity.horizontal { 0 } else { 1 };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Bloom Blur Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &bloom[parity.write_slot()].color(0).view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &source_bind_groups[parity.read_slot()], &[]);
            pass.set_bind_group(1, &self.direction_bind_groups[direction], &[]);
            pass.draw(0..3, 0..1);
            drop(pass);
            parity.advance();
        }
        Ok(parity.last_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{read_texture, test_gpu};
    use crate::targets::{bloom_attachment, hdr_attachments, hdr};

    #[test]
    fn first_blur_reads_slot_zero() {
        let parity = PingPong::default();
        assert_eq!(parity.read_slot(), 0);
        assert_eq!(parity.write_slot(), 1);
    }

    #[test]
    fn result_slot_follows_iteration_parity() {
        for iterations in 0..9 {
            assert_eq!(PingPong::result_after(iterations), (iterations % 2) as usize);
        }
        assert_eq!(PingPong::result_after(4), 0);
        assert_eq!(PingPong::result_after(5), 1);
    }

    #[test]
    fn copy_rejects_format_and_size_mismatch() {
        let rgba16 = wgpu::TextureFormat::Rgba16Float;
        assert!(check_copy_compatible("a", rgba16, (4, 4), "b", rgba16, (4, 4)).is_ok());
        assert!(matches!(
            check_copy_compatible("a", rgba16, (4, 4), "b", wgpu::TextureFormat::Rgba8Unorm, (4, 4)),
            Err(RenderError::CopyMismatch { .. })
        ));
        assert!(matches!(
            check_copy_compatible("a", rgba16, (4, 4), "b", rgba16, (8, 4)),
            Err(RenderError::CopyMismatch { .. })
        ));
    }

    #[test]
    fn bright_and_bloom_attachments_are_copy_compatible() {
        let bright = hdr_attachments()[hdr::BRIGHT];
        let slot = bloom_attachment(0);
        assert_eq!(bright.format, slot.format);
        assert!(bright.usage().contains(wgpu::TextureUsages::COPY_SRC));
        assert!(slot.usage().contains(wgpu::TextureUsages::COPY_DST));
    }

    #[test]
    fn gpu_bloom_ends_in_parity_slot() {
        let Some(gpu) = test_gpu(16, 16) else {
            return;
        };
        let device = &gpu.device;
        let bright = RenderTarget::new(device, "Bright", &[hdr_attachments()[hdr::BRIGHT]], None, 16, 16)
            .expect("bright target");
        let bloom = [
            RenderTarget::new(device, "Ping", &[bloom_attachment(0)], None, 16, 16).expect("ping"),
            RenderTarget::new(device, "Pong", &[bloom_attachment(1)], None, 16, 16).expect("pong"),
        ];
        let pass = BloomPass::new(device);

        for iterations in [3, 4] {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Bloom Test Encoder"),
            });
            // Bright pass cleared to a constant; a blur of a constant stays constant
            {
                let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Bright Clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &bright.color(0).view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: 2.0,
                                g: 2.0,
                                b: 2.0,
                                a: 1.0,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            let slot = pass
                .run(device, &mut encoder, bright.color(0), &bloom, iterations)
                .expect("bloom run");
            gpu.queue.submit(Some(encoder.finish()));
            assert_eq!(slot, (iterations % 2) as usize);

            let bytes = read_texture(device, &gpu.queue, &bloom[slot].color(0).texture, 0, 0)
                .expect("readback");
            // Centre texel, red channel as f16
            let offset = (8 * 16 + 8) * 8;
            let red = half::f16::from_le_bytes([bytes[offset], bytes[offset + 1]]).to_f32();
            assert!((red - 2.0).abs() < 0.05, "blurred value {red}");
        }
    }
}
