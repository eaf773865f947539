//! The frame orchestrator
//!
//! [`RenderPipeline`] owns every window-sized target, the environment maps
//! and the pass objects, and records one frame as a fixed sequence:
//!
//! ```text
//! (pending resize) -> Geometry -> Lighting -> Bloom -> Skybox -> Composite
//! ```
//!
//! The skybox draws into the lighting output against the G-buffer depth,
//! after bloom has copied the bright pass, so the sky never blooms.

use crate::bloom_pass::{BloomPass, PingPong};
use crate::composite_pass::CompositePass;
use crate::context::RenderError;
use crate::environment::{EnvironmentMaps, EnvironmentPreprocessor, EnvironmentSettings, EquirectSource};
use crate::frame::{FrameState, ResizeLatch};
use crate::geometry_pass::GeometryPass;
use crate::lighting_pass::{LightUniforms, LightingPass};
use crate::model::{MaterialBinder, Model, ModelFallback};
use crate::scene::{ModelHandle, ModelLibrary, PointLight, SceneObject};
use crate::skybox_pass::SkyboxPass;
use crate::targets::{hdr, ResourceSet};
use crate::tonemap::ToneMapOperator;
use std::path::Path;

/// Values the settings overlay and configuration can change between frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub exposure: f32,
    pub tone_map: ToneMapOperator,
    pub bloom_iterations: u32,
    /// Luminance above which lit color feeds the bloom
    pub bloom_threshold: f32,
    pub emission_strength: f32,
    pub specular_strength: f32,
    pub light: PointLight,
    pub near: f32,
    pub far: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            exposure: 2.5,
            tone_map: ToneMapOperator::None,
            bloom_iterations: 4,
            bloom_threshold: 1.0,
            emission_strength: 0.4,
            specular_strength: 0.5,
            light: PointLight::default(),
            near: 0.1,
            far: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePass {
    Geometry,
    Lighting,
    Bloom,
    Skybox,
    Composite,
}

pub const FRAME_SEQUENCE: [FramePass; 5] = [
    FramePass::Geometry,
    FramePass::Lighting,
    FramePass::Bloom,
    FramePass::Skybox,
    FramePass::Composite,
];

pub struct RenderPipeline {
    resources: ResourceSet,
    resize_latch: ResizeLatch,
    preprocessor: EnvironmentPreprocessor,
    geometry: GeometryPass,
    lighting: LightingPass,
    bloom: BloomPass,
    skybox: SkyboxPass,
    composite: CompositePass,
    models: ModelLibrary,
    settings: RenderSettings,
    last_bloom_slot: usize,
}

impl RenderPipeline {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        environment: EnvironmentSettings,
        settings: RenderSettings,
    ) -> Result<Self, RenderError> {
        let resources = ResourceSet::initialize(device, width, height)?;
        warn_on_odd_bloom(settings.bloom_iterations);
        Ok(Self {
            resources,
            resize_latch: ResizeLatch::default(),
            preprocessor: EnvironmentPreprocessor::new(device, environment),
            geometry: GeometryPass::new(device, queue),
            lighting: LightingPass::new(device),
            bloom: BloomPass::new(device),
            skybox: SkyboxPass::new(device),
            composite: CompositePass::new(device, output_format),
            models: ModelLibrary::new(),
            settings,
            last_bloom_slot: 0,
        })
    }

    /// Record a drawable-size change; applied at the start of the next frame.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.resize_latch.request(width, height);
    }

    pub fn apply_pending_resize(&mut self, device: &wgpu::Device) -> Result<bool, RenderError> {
        match self.resize_latch.take() {
            Some((width, height)) => self.resize(device, width, height),
            None => Ok(false),
        }
    }

    /// Reallocate every target at the new size. Zero sizes (a minimized
    /// window) are ignored.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> Result<bool, RenderError> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring {}x{} resize", width, height);
            return Ok(false);
        }
        self.resources.resize(device, width, height)
    }

    /// Run the preprocessing chain for a new panorama.
    pub fn build_environment(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &EquirectSource,
    ) -> Result<(), RenderError> {
        self.preprocessor.build_environment(device, queue, source)?;
        Ok(())
    }

    pub fn environment(&self) -> Option<&EnvironmentMaps> {
        self.preprocessor.maps()
    }

    pub fn preprocessor(&self) -> &EnvironmentPreprocessor {
        &self.preprocessor
    }

    pub fn add_model(&mut self, model: Model) -> ModelHandle {
        self.models.add(model)
    }

    pub fn load_model<P: AsRef<Path>>(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: P,
        fallback: &ModelFallback,
    ) -> ModelHandle {
        let model = Model::load(device, queue, self.geometry.materials(), path, fallback);
        self.models.add(model)
    }

    pub fn materials(&self) -> &MaterialBinder {
        self.geometry.materials()
    }

    pub fn models(&self) -> &ModelLibrary {
        &self.models
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: RenderSettings) {
        if settings.bloom_iterations != self.settings.bloom_iterations {
            warn_on_odd_bloom(settings.bloom_iterations);
        }
        self.settings = settings;
    }

    /// Bloom slot the composite pass read in the last frame
    pub fn last_bloom_slot(&self) -> usize {
        self.last_bloom_slot
    }

    /// Record one frame into `encoder`, ending with the composite into
    /// `target_view`.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target_view: &wgpu::TextureView,
        target_format: wgpu::TextureFormat,
        frame: &FrameState,
        objects: &[SceneObject],
    ) -> Result<(), RenderError> {
        self.apply_pending_resize(device)?;

        let maps = self.preprocessor.maps().ok_or_else(|| {
            RenderError::EnvironmentStage("environment maps have not been built".into())
        })?;
        let settings = self.settings;
        let mut bloom_slot = PingPong::result_after(0);

        for pass in FRAME_SEQUENCE {
            match pass {
                FramePass::Geometry => self.geometry.run(
                    device,
                    queue,
                    encoder,
                    &self.resources.gbuffer,
                    frame,
                    settings.emission_strength,
                    objects,
                    &self.models,
                )?,
                FramePass::Lighting => {
                    let uniforms = LightUniforms::new(
                        &settings.light,
                        frame.camera_position,
                        settings.bloom_threshold,
                        settings.specular_strength,
                        maps.max_reflection_lod(),
                    );
                    self.lighting.run(
                        device,
                        queue,
                        encoder,
                        &self.resources.gbuffer,
                        &self.resources.hdr,
                        maps,
                        &uniforms,
                    );
                }
                FramePass::Bloom => {
                    bloom_slot = self.bloom.run(
                        device,
                        encoder,
                        self.resources.hdr.color(hdr::BRIGHT),
                        &self.resources.bloom,
                        settings.bloom_iterations,
                    )?;
                }
                FramePass::Skybox => self.skybox.run(
                    device,
                    queue,
                    encoder,
                    &self.resources.hdr,
                    &self.resources.gbuffer,
                    maps,
                    frame.view,
                    frame.projection,
                )?,
                FramePass::Composite => self.composite.run(
                    device,
                    queue,
                    encoder,
                    &self.resources.hdr,
                    &self.resources.bloom[bloom_slot],
                    target_view,
                    target_format,
                    settings.exposure,
                    settings.tone_map,
                ),
            }
        }

        self.last_bloom_slot = bloom_slot;
        Ok(())
    }
}

fn warn_on_odd_bloom(iterations: u32) {
    if iterations % 2 == 1 {
        log::warn!(
            "{} bloom iterations: the last blur is horizontal only",
            iterations
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gltf_import::MaterialFactors;
    use crate::headless::{read_texture, test_gpu};
    use crate::lighting_pass::luminance;
    use crate::primitives::create_uv_sphere;
    use glam::{Mat4, Vec3};

    fn small_environment() -> EnvironmentSettings {
        EnvironmentSettings {
            cubemap_size: 32,
            irradiance_size: 8,
            prefilter_size: 16,
            prefilter_mips: 3,
            brdf_lut_size: 32,
        }
    }

    #[test]
    fn frame_sequence_is_fixed() {
        assert_eq!(
            FRAME_SEQUENCE,
            [
                FramePass::Geometry,
                FramePass::Lighting,
                FramePass::Bloom,
                FramePass::Skybox,
                FramePass::Composite,
            ]
        );
    }

    #[test]
    fn default_settings_match_scene_constants() {
        let settings = RenderSettings::default();
        assert_eq!(settings.exposure, 2.5);
        assert_eq!(settings.tone_map, ToneMapOperator::None);
        assert_eq!(settings.bloom_iterations, 4);
        assert_eq!(settings.emission_strength, 0.4);
        assert_eq!(settings.specular_strength, 0.5);
        assert_eq!(settings.light.intensity, 50.0);
    }

    /// Render one lit sphere in a uniform environment of radiance `radiance`
    /// and return the RGB of every bright-pass texel.
    fn render_bright_pass(radiance: f32) -> Option<Vec<Vec3>> {
        let gpu = test_gpu(1280, 720)?;
        let (device, queue) = (&gpu.device, &gpu.queue);
        let settings = RenderSettings {
            light: PointLight {
                intensity: 0.0,
                ..PointLight::default()
            },
            ..RenderSettings::default()
        };
        let mut pipeline = RenderPipeline::new(
            device,
            queue,
            gpu.format,
            gpu.width,
            gpu.height,
            small_environment(),
            settings,
        )
        .expect("pipeline");
        pipeline
            .build_environment(device, queue, &EquirectSource::uniform([radiance; 3]))
            .expect("environment");

        let factors = MaterialFactors {
            base_color: [0.5, 0.5, 0.5, 1.0],
            emissive: [0.0; 3],
            metallic: 0.0,
            roughness: 1.0,
        };
        let model = Model::from_mesh(
            device,
            pipeline.materials(),
            "Sphere",
            &create_uv_sphere(0.5, 32, 16),
            factors,
        );
        let handle = pipeline.add_model(model);
        let objects = [SceneObject::new("Sphere", handle, Vec3::ZERO, 1.0)];

        let camera_position = Vec3::new(0.0, 0.0, 3.0);
        let frame = FrameState {
            view: Mat4::look_at_rh(camera_position, Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_rh(45f32.to_radians(), gpu.aspect_ratio(), 0.1, 100.0),
            camera_position,
            delta_time: 0.0,
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("End To End Encoder"),
        });
        pipeline
            .render_frame(device, queue, &mut encoder, &gpu.color_view, gpu.format, &frame, &objects)
            .expect("frame");
        queue.submit(Some(encoder.finish()));

        let bright = &pipeline.resources().hdr.color(hdr::BRIGHT).texture;
        let bytes = read_texture(device, queue, bright, 0, 0).expect("readback");
        let texels = bytes
            .chunks_exact(8)
            .map(|texel| {
                let channel = |i: usize| half::f16::from_le_bytes([texel[i * 2], texel[i * 2 + 1]]).to_f32();
                Vec3::new(channel(0), channel(1), channel(2))
            })
            .collect();
        Some(texels)
    }

    #[test]
    fn dim_environment_produces_no_bloom() {
        let Some(texels) = render_bright_pass(0.25) else {
            return;
        };
        assert_eq!(texels.len(), 1280 * 720);
        assert!(
            texels.iter().all(|&rgb| rgb == Vec3::ZERO),
            "bright pass should be empty"
        );
    }

    #[test]
    fn bright_environment_feeds_bloom() {
        let Some(texels) = render_bright_pass(8.0) else {
            return;
        };
        let threshold = RenderSettings::default().bloom_threshold;
        let lit: Vec<Vec3> = texels.into_iter().filter(|&rgb| rgb != Vec3::ZERO).collect();
        assert!(!lit.is_empty(), "bright pass should contain the sphere");
        // Half-float rounding can shave a texel just above the threshold
        for rgb in lit {
            assert!(
                luminance(rgb) > threshold - 4e-3,
                "{rgb:?} passed the bright filter below threshold {threshold}"
            );
        }
    }

    #[test]
    fn frame_without_environment_is_rejected() {
        let Some(gpu) = test_gpu(64, 64) else {
            return;
        };
        let mut pipeline = RenderPipeline::new(
            &gpu.device,
            &gpu.queue,
            gpu.format,
            64,
            64,
            small_environment(),
            RenderSettings::default(),
        )
        .expect("pipeline");
        let frame = FrameState {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            delta_time: 0.0,
        };
        let mut encoder = gpu.device.create_command_encoder(&Default::default());
        let result = pipeline.render_frame(
            &gpu.device,
            &gpu.queue,
            &mut encoder,
            &gpu.color_view,
            gpu.format,
            &frame,
            &[],
        );
        assert!(matches!(result, Err(RenderError::EnvironmentStage(_))));
    }

    #[test]
    fn latched_resize_applies_before_the_next_frame() {
        let Some(gpu) = test_gpu(64, 64) else {
            return;
        };
        let mut pipeline = RenderPipeline::new(
            &gpu.device,
            &gpu.queue,
            gpu.format,
            64,
            64,
            small_environment(),
            RenderSettings::default(),
        )
        .expect("pipeline");
        pipeline.request_resize(32, 16);
        pipeline.request_resize(48, 24);
        assert_eq!(pipeline.resources().size(), (64, 64));
        assert!(pipeline.apply_pending_resize(&gpu.device).expect("resize"));
        for target in pipeline.resources().targets() {
            assert_eq!(target.size(), (48, 24));
        }
        // Minimized windows report zero sizes
        assert!(!pipeline.resize(&gpu.device, 0, 0).expect("zero resize"));
        assert_eq!(pipeline.resources().size(), (48, 24));
    }
}
