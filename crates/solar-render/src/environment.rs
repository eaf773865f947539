//! Image-based lighting preprocessor
//!
//! Turns an equirectangular HDR panorama into the four maps the lighting
//! pass samples: the environment cubemap (with mips), a diffuse irradiance
//! cubemap, a roughness-prefiltered specular cubemap and the BRDF LUT.
//! The stages always run in that order; every capture pass renders into a
//! shared depth buffer that is resized per pass and restored afterwards.

use crate::context::RenderError;
use crate::targets::DEPTH_FORMAT;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::borrow::Cow;
use std::path::Path;
use wgpu::util::DeviceExt;

pub const CUBEMAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const BRDF_LUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;
pub const EQUIRECT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

pub const CAPTURE_NEAR: f32 = 0.1;
pub const CAPTURE_FAR: f32 = 10.0;

/// Map sizes in texels per face edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub cubemap_size: u32,
    pub irradiance_size: u32,
    pub prefilter_size: u32,
    pub prefilter_mips: u32,
    pub brdf_lut_size: u32,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            cubemap_size: 1024,
            irradiance_size: 64,
            prefilter_size: 256,
            prefilter_mips: 5,
            brdf_lut_size: 1024,
        }
    }
}

impl EnvironmentSettings {
    /// Mip count of the environment cubemap (full chain down to 1x1)
    pub fn cubemap_mips(&self) -> u32 {
        mip_count(self.cubemap_size)
    }

    /// Prefilter mips actually allocated; never more than the base size allows.
    pub fn prefilter_levels(&self) -> u32 {
        self.prefilter_mips.clamp(1, mip_count(self.prefilter_size))
    }

    /// Capture depth size of every pass in one build, ending with the
    /// restore to the cubemap size. The LUT pass only runs when `with_lut`.
    pub fn capture_sizes(&self, with_lut: bool) -> Vec<u32> {
        let mut sizes = vec![self.cubemap_size, self.irradiance_size];
        sizes.extend((0..self.prefilter_levels()).map(|mip| mip_extent(self.prefilter_size, mip)));
        if with_lut {
            sizes.push(self.brdf_lut_size);
        }
        sizes.push(self.cubemap_size);
        sizes
    }
}

/// 90 degree square projection shared by all six capture views.
pub fn capture_projection() -> Mat4 {
    Mat4::perspective_rh(90f32.to_radians(), 1.0, CAPTURE_NEAR, CAPTURE_FAR)
}

/// Views looking down +X, -X, +Y, -Y, +Z, -Z, in cube layer order.
pub fn capture_views() -> [Mat4; 6] {
    let look = |target: Vec3, up: Vec3| Mat4::look_at_rh(Vec3::ZERO, target, up);
    [
        look(Vec3::X, Vec3::NEG_Y),
        look(Vec3::NEG_X, Vec3::NEG_Y),
        look(Vec3::Y, Vec3::Z),
        look(Vec3::NEG_Y, Vec3::NEG_Z),
        look(Vec3::Z, Vec3::NEG_Y),
        look(Vec3::NEG_Z, Vec3::NEG_Y),
    ]
}

/// Roughness the prefilter convolves with at `mip` of `levels`.
pub fn prefilter_roughness(mip: u32, levels: u32) -> f32 {
    if levels <= 1 {
        0.0
    } else {
        mip as f32 / (levels - 1) as f32
    }
}

pub fn mip_extent(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

pub fn mip_count(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CaptureUniforms {
    inv_view_proj: [[f32; 4]; 4],
    /// x = roughness, y = environment face size
    params: [f32; 4],
}

/// CPU copy of an equirectangular HDR panorama
#[derive(Debug, Clone, PartialEq)]
pub struct EquirectSource {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl EquirectSource {
    pub fn from_rgba32f(width: u32, height: u32, pixels: Vec<[f32; 4]>) -> Result<Self, RenderError> {
        if width == 0 || height == 0 || pixels.len() != width as usize * height as usize {
            return Err(RenderError::ImageLoad(format!(
                "{} pixels do not fill a {}x{} panorama",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Same radiance in every direction
    pub fn uniform(radiance: [f32; 3]) -> Self {
        let [r, g, b] = radiance;
        Self {
            width: 1,
            height: 1,
            pixels: vec![[r, g, b, 1.0]],
        }
    }

    pub fn black() -> Self {
        Self::uniform([0.0; 3])
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| RenderError::ImageLoad(format!("{}: {}", path.display(), e)))?
            .into_rgba32f();
        let (width, height) = image.dimensions();
        let pixels = image
            .into_raw()
            .chunks_exact(4)
            .map(|p| [p[0], p[1], p[2], p[3]])
            .collect();
        Self::from_rgba32f(width, height, pixels)
    }

    /// Load the panorama, or fall back to black so the scene still renders.
    pub fn load_or_black<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("{}; using a black environment", e);
                Self::black()
            }
        }
    }

    /// The panorama itself when it fits in one 2D texture on this device,
    /// black otherwise.
    pub fn fit_to_limits(&self, limits: &wgpu::Limits) -> Cow<'_, Self> {
        let max = limits.max_texture_dimension_2d;
        if self.width <= max && self.height <= max {
            return Cow::Borrowed(self);
        }
        log::warn!(
            "{}x{} panorama exceeds max texture dimension {}; using a black environment",
            self.width,
            self.height,
            max
        );
        Cow::Owned(Self::black())
    }

    fn upload(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::Texture {
        device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("Equirectangular Source"),
                size: wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: EQUIRECT_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&self.pixels),
        )
    }
}

/// Preprocessing stages in the only order they may complete in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreprocessStage {
    EnvironmentCubemap,
    Irradiance,
    Prefilter,
    BrdfLut,
}

impl PreprocessStage {
    pub const ORDER: [PreprocessStage; 4] = [
        Self::EnvironmentCubemap,
        Self::Irradiance,
        Self::Prefilter,
        Self::BrdfLut,
    ];
}

/// Records which stages have produced valid maps for the current source.
#[derive(Debug, Default, Clone)]
pub struct StageTracker {
    completed: Vec<PreprocessStage>,
}

impl StageTracker {
    /// Forget every derived map; called when a new source arrives.
    pub fn invalidate(&mut self) {
        self.completed.clear();
    }

    pub fn next(&self) -> Option<PreprocessStage> {
        PreprocessStage::ORDER.get(self.completed.len()).copied()
    }

    pub fn complete(&mut self, stage: PreprocessStage) -> Result<(), RenderError> {
        match self.next() {
            Some(expected) if expected == stage => {
                self.completed.push(stage);
                Ok(())
            }
            Some(expected) => Err(RenderError::EnvironmentStage(format!(
                "{:?} cannot complete before {:?}",
                stage, expected
            ))),
            None => Err(RenderError::EnvironmentStage(format!(
                "{:?} completed twice for one source",
                stage
            ))),
        }
    }

    pub fn is_complete(&self, stage: PreprocessStage) -> bool {
        self.completed.contains(&stage)
    }

    pub fn all_complete(&self) -> bool {
        self.next().is_none()
    }
}

/// A cube texture and the view the lighting pass samples
pub struct CubeMap {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: u32,
    pub mip_levels: u32,
}

impl CubeMap {
    fn new(device: &wgpu::Device, label: &str, size: u32, mip_levels: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CUBEMAP_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Self {
            texture,
            view,
            size,
            mip_levels,
        }
    }

    /// Single face of a single mip, for rendering or reading from
    fn face_view(&self, face: u32, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Cube Face View"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: face,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

/// The derived maps of one environment
pub struct EnvironmentMaps {
    pub environment: CubeMap,
    pub irradiance: CubeMap,
    pub prefilter: CubeMap,
    pub brdf_lut: wgpu::Texture,
    pub brdf_lut_view: wgpu::TextureView,
    /// Trilinear sampler for all cubemaps and the LUT
    pub sampler: wgpu::Sampler,
    source: Option<wgpu::Texture>,
}

impl EnvironmentMaps {
    fn allocate(device: &wgpu::Device, settings: &EnvironmentSettings) -> Self {
        let environment = CubeMap::new(
            device,
            "Environment Cubemap",
            settings.cubemap_size,
            settings.cubemap_mips(),
        );
        let irradiance = CubeMap::new(device, "Irradiance Cubemap", settings.irradiance_size, 1);
        let prefilter = CubeMap::new(
            device,
            "Prefilter Cubemap",
            settings.prefilter_size,
            settings.prefilter_levels(),
        );

        let brdf_lut = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("BRDF LUT"),
            size: wgpu::Extent3d {
                width: settings.brdf_lut_size,
                height: settings.brdf_lut_size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BRDF_LUT_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let brdf_lut_view = brdf_lut.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Environment Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            environment,
            irradiance,
            prefilter,
            brdf_lut,
            brdf_lut_view,
            sampler,
            source: None,
        }
    }

    /// Highest prefilter mip, used to map roughness to a LOD
    pub fn max_reflection_lod(&self) -> f32 {
        (self.prefilter.mip_levels - 1) as f32
    }

    pub fn source(&self) -> Option<&wgpu::Texture> {
        self.source.as_ref()
    }
}

/// Whether the GPU maps exist yet
pub enum EnvironmentState {
    Uninitialized,
    Allocated(EnvironmentMaps),
}

struct CaptureDepth {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: u32,
}

impl CaptureDepth {
    fn new(device: &wgpu::Device, size: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Capture Depth"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, size }
    }
}

/// Owns the capture pipelines and the environment maps they fill
pub struct EnvironmentPreprocessor {
    settings: EnvironmentSettings,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    equirect_bgl: wgpu::BindGroupLayout,
    cube_source_bgl: wgpu::BindGroupLayout,
    mip_source_bgl: wgpu::BindGroupLayout,
    equirect_pipeline: wgpu::RenderPipeline,
    irradiance_pipeline: wgpu::RenderPipeline,
    prefilter_pipeline: wgpu::RenderPipeline,
    brdf_pipeline: wgpu::RenderPipeline,
    mipmap_pipeline: wgpu::RenderPipeline,
    mip_sampler: wgpu::Sampler,
    capture_depth: CaptureDepth,
    capture_history: Vec<u32>,
    state: EnvironmentState,
    stages: StageTracker,
    lut_ready: bool,
    generation: u64,
}

impl EnvironmentPreprocessor {
    pub fn new(device: &wgpu::Device, settings: EnvironmentSettings) -> Self {
        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Capture Uniform BGL"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let equirect_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Equirect Source BGL"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        let sampled_bgl = |label: &str, view_dimension: wgpu::TextureViewDimension| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension,
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
            })
        };
        let cube_source_bgl = sampled_bgl("Cube Source BGL", wgpu::TextureViewDimension::Cube);
        let mip_source_bgl = sampled_bgl("Mip Source BGL", wgpu::TextureViewDimension::D2);

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Capture Uniform Buffer"),
            contents: bytemuck::cast_slice(&[CaptureUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Uniform BG"),
            layout: &uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let capture_depth_state = Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let equirect_pipeline = capture_pipeline(
            device,
            "Equirect Capture",
            include_str!("equirect_shader.wgsl"),
            ("vs_capture", "fs_equirect"),
            &[&uniform_bgl, &equirect_bgl],
            CUBEMAP_FORMAT,
            capture_depth_state.clone(),
        );
        let irradiance_pipeline = capture_pipeline(
            device,
            "Irradiance Capture",
            include_str!("irradiance_shader.wgsl"),
            ("vs_capture", "fs_irradiance"),
            &[&uniform_bgl, &cube_source_bgl],
            CUBEMAP_FORMAT,
            capture_depth_state.clone(),
        );
        let prefilter_pipeline = capture_pipeline(
            device,
            "Prefilter Capture",
            include_str!("prefilter_shader.wgsl"),
            ("vs_capture", "fs_prefilter"),
            &[&uniform_bgl, &cube_source_bgl],
            CUBEMAP_FORMAT,
            capture_depth_state.clone(),
        );
        let brdf_pipeline = capture_pipeline(
            device,
            "BRDF LUT",
            include_str!("brdf_shader.wgsl"),
            ("vs_fullscreen", "fs_brdf"),
            &[],
            BRDF_LUT_FORMAT,
            capture_depth_state,
        );
        let mipmap_pipeline = capture_pipeline(
            device,
            "Cubemap Mipmap",
            include_str!("mipmap_shader.wgsl"),
            ("vs_fullscreen", "fs_downsample"),
            &[&mip_source_bgl],
            CUBEMAP_FORMAT,
            None,
        );

        let mip_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mipmap Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            settings,
            uniform_buffer,
            uniform_bind_group,
            equirect_bgl,
            cube_source_bgl,
            mip_source_bgl,
            equirect_pipeline,
            irradiance_pipeline,
            prefilter_pipeline,
            brdf_pipeline,
            mipmap_pipeline,
            mip_sampler,
            capture_depth: CaptureDepth::new(device, settings.cubemap_size),
            capture_history: Vec::new(),
            state: EnvironmentState::Uninitialized,
            stages: StageTracker::default(),
            lut_ready: false,
            generation: 0,
        }
    }

    /// Run every stage for `source`, allocating maps on the first call and
    /// overwriting them on later ones. The BRDF LUT is only rendered once.
    pub fn build_environment(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &EquirectSource,
    ) -> Result<&EnvironmentMaps, RenderError> {
        log::info!(
            "Building environment maps from {}x{} panorama",
            source.width,
            source.height
        );
        let source = source.fit_to_limits(&device.limits());
        self.stages.invalidate();
        self.capture_history.clear();

        if matches!(self.state, EnvironmentState::Uninitialized) {
            self.state = EnvironmentState::Allocated(EnvironmentMaps::allocate(device, &self.settings));
        }
        let EnvironmentState::Allocated(mut maps) =
            std::mem::replace(&mut self.state, EnvironmentState::Uninitialized)
        else {
            return Err(RenderError::EnvironmentStage("maps were not allocated".into()));
        };

        let result = self.run_stages(device, queue, &source, &mut maps);
        self.state = EnvironmentState::Allocated(maps);
        result?;

        self.generation += 1;
        match &self.state {
            EnvironmentState::Allocated(maps) => Ok(maps),
            EnvironmentState::Uninitialized => {
                Err(RenderError::EnvironmentStage("maps were not allocated".into()))
            }
        }
    }

    fn run_stages(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &EquirectSource,
        maps: &mut EnvironmentMaps,
    ) -> Result<(), RenderError> {
        let with_lut = !self.lut_ready;
        let projection = capture_projection();
        let views = capture_views();
        let inv_view_projs = views.map(|view| (projection * view).inverse());

        // 1. Panorama onto the environment cube, then its mip chain
        let source_texture = source.upload(device, queue);
        let source_view = source_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let source_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Equirect Source BG"),
            layout: &self.equirect_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&source_view),
            }],
        });
        self.set_capture_size(device, maps.environment.size);
        for (face, inv_view_proj) in inv_view_projs.iter().enumerate() {
            self.write_capture_uniforms(queue, *inv_view_proj, 0.0, maps.environment.size);
            let target = maps.environment.face_view(face as u32, 0);
            self.capture(device, queue, "Equirect Capture", &self.equirect_pipeline, &target, Some(&source_bg));
        }
        maps.source = Some(source_texture);
        self.generate_cube_mips(device, queue, &maps.environment);
        self.stages.complete(PreprocessStage::EnvironmentCubemap)?;

        let environment_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Environment Cube BG"),
            layout: &self.cube_source_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&maps.environment.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&maps.sampler),
                },
            ],
        });

        // 2. Diffuse irradiance
        self.set_capture_size(device, maps.irradiance.size);
        for (face, inv_view_proj) in inv_view_projs.iter().enumerate() {
            self.write_capture_uniforms(queue, *inv_view_proj, 0.0, maps.environment.size);
            let target = maps.irradiance.face_view(face as u32, 0);
            self.capture(device, queue, "Irradiance Capture", &self.irradiance_pipeline, &target, Some(&environment_bg));
        }
        self.stages.complete(PreprocessStage::Irradiance)?;

        // 3. Specular prefilter, one roughness per mip
        let levels = maps.prefilter.mip_levels;
        for mip in 0..levels {
            let roughness = prefilter_roughness(mip, levels);
            self.set_capture_size(device, mip_extent(maps.prefilter.size, mip));
            for (face, inv_view_proj) in inv_view_projs.iter().enumerate() {
                self.write_capture_uniforms(queue, *inv_view_proj, roughness, maps.environment.size);
                let target = maps.prefilter.face_view(face as u32, mip);
                self.capture(device, queue, "Prefilter Capture", &self.prefilter_pipeline, &target, Some(&environment_bg));
            }
        }
        self.stages.complete(PreprocessStage::Prefilter)?;

        // 4. BRDF LUT, independent of the source
        if !self.lut_ready {
            let lut_size = maps.brdf_lut.width();
            self.set_capture_size(device, lut_size);
            self.capture(device, queue, "BRDF LUT", &self.brdf_pipeline, &maps.brdf_lut_view, None);
            self.lut_ready = true;
        }
        self.stages.complete(PreprocessStage::BrdfLut)?;

        self.set_capture_size(device, self.settings.cubemap_size);
        let expected = self.settings.capture_sizes(with_lut);
        if self.capture_history != expected {
            return Err(RenderError::EnvironmentStage(format!(
                "capture sizes {:?}, expected {:?}",
                self.capture_history, expected
            )));
        }
        log::info!("Environment maps ready (capture sizes {:?})", self.capture_history);
        Ok(())
    }

    fn write_capture_uniforms(&self, queue: &wgpu::Queue, inv_view_proj: Mat4, roughness: f32, face_size: u32) {
        let uniforms = CaptureUniforms {
            inv_view_proj: inv_view_proj.to_cols_array_2d(),
            params: [roughness, face_size as f32, 0.0, 0.0],
        };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
    }

    /// Resize the shared capture depth buffer when the pass size changes.
    fn set_capture_size(&mut self, device: &wgpu::Device, size: u32) {
        if self.capture_depth.size != size {
            self.capture_depth = CaptureDepth::new(device, size);
        }
        self.capture_history.push(size);
    }

    /// Render one fullscreen capture into `target` and submit it, so the
    /// next uniform write cannot race this pass.
    fn capture(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        target: &wgpu::TextureView,
        source: Option<&wgpu::BindGroup>,
    ) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.capture_depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let size = self.capture_depth.size as f32;
            pass.set_viewport(0.0, 0.0, size, size, 0.0, 1.0);
            pass.set_pipeline(pipeline);
            if let Some(source) = source {
                pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                pass.set_bind_group(1, source, &[]);
            }
            pass.draw(0..3, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    fn generate_cube_mips(&self, device: &wgpu::Device, queue: &wgpu::Queue, cube: &CubeMap) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Cubemap Mip Encoder"),
        });
        for mip in 1..cube.mip_levels {
            for face in 0..6 {
                let source_view = cube.face_view(face, mip - 1);
                let target_view = cube.face_view(face, mip);
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Mip Source BG"),
                    layout: &self.mip_source_bgl,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&self.mip_sampler),
                        },
                    ],
                });
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Cubemap Mip Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target_view,
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
                pass.set_pipeline(&self.mipmap_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    /// Maps from the last complete build
    pub fn maps(&self) -> Option<&EnvironmentMaps> {
        match &self.state {
            EnvironmentState::Allocated(maps) if self.stages.all_complete() => Some(maps),
            _ => None,
        }
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    pub fn stages(&self) -> &StageTracker {
        &self.stages
    }

    pub fn settings(&self) -> &EnvironmentSettings {
        &self.settings
    }

    /// Current edge length of the shared capture depth buffer
    pub fn capture_size(&self) -> u32 {
        self.capture_depth.texture.width()
    }

    /// Capture sizes used by the most recent build, in pass order
    pub fn capture_history(&self) -> &[u32] {
        &self.capture_history
    }

    /// Number of completed builds
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn capture_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    (vs_entry, fs_entry): (&str, &str),
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    format: wgpu::TextureFormat,
    depth_stencil: Option<wgpu::DepthStencilState>,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some(vs_entry),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some(fs_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format,
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
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{read_texture, test_gpu};

    fn small_settings() -> EnvironmentSettings {
        EnvironmentSettings {
            cubemap_size: 16,
            irradiance_size: 4,
            prefilter_size: 16,
            prefilter_mips: 5,
            brdf_lut_size: 16,
        }
    }

    #[test]
    fn capture_views_look_along_cube_axes() {
        let targets = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (view, target) in capture_views().iter().zip(targets) {
            // View space looks down -Z
            let forward = view.inverse().transform_vector3(Vec3::NEG_Z);
            assert!((forward - target).length() < 1e-5, "{:?} vs {:?}", forward, target);
        }
    }

    #[test]
    fn default_map_sizes() {
        let settings = EnvironmentSettings::default();
        assert_eq!(settings.cubemap_size, 1024);
        assert_eq!(settings.irradiance_size, 64);
        assert_eq!(settings.prefilter_size, 256);
        assert_eq!(settings.prefilter_mips, 5);
    }

    #[test]
    fn capture_projection_is_square_ninety_degrees() {
        let p = capture_projection();
        assert!((p.x_axis.x - 1.0).abs() < 1e-5);
        assert!((p.y_axis.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn prefilter_roughness_spans_zero_to_one() {
        let levels = 5;
        let roughness: Vec<f32> = (0..levels).map(|m| prefilter_roughness(m, levels)).collect();
        assert_eq!(roughness, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(prefilter_roughness(0, 1), 0.0);
    }

    #[test]
    fn mip_sizes_halve_down_to_one() {
        let sizes: Vec<u32> = (0..5).map(|m| mip_extent(256, m)).collect();
        assert_eq!(sizes, vec![256, 128, 64, 32, 16]);
        assert_eq!(mip_extent(4, 6), 1);
        assert_eq!(mip_count(1024), 11);
        assert_eq!(mip_count(1), 1);
    }

    #[test]
    fn capture_sizes_follow_each_pass_and_restore() {
        let settings = EnvironmentSettings::default();
        assert_eq!(
            settings.capture_sizes(true),
            vec![1024, 64, 256, 128, 64, 32, 16, 1024, 1024]
        );
        assert_eq!(
            settings.capture_sizes(false),
            vec![1024, 64, 256, 128, 64, 32, 16, 1024]
        );

        // Mips beyond a 4x4 base are clamped
        let tiny = EnvironmentSettings {
            prefilter_size: 4,
            prefilter_mips: 8,
            ..small_settings()
        };
        assert_eq!(tiny.prefilter_levels(), 3);
        assert_eq!(tiny.capture_sizes(false), vec![16, 4, 4, 2, 1, 16]);
    }

    #[test]
    fn stages_must_complete_in_order() {
        let mut tracker = StageTracker::default();
        assert_eq!(tracker.next(), Some(PreprocessStage::EnvironmentCubemap));
        assert!(matches!(
            tracker.complete(PreprocessStage::Irradiance),
            Err(RenderError::EnvironmentStage(_))
        ));
        for stage in PreprocessStage::ORDER {
            tracker.complete(stage).unwrap();
        }
        assert!(tracker.all_complete());
        assert!(tracker.complete(PreprocessStage::BrdfLut).is_err());

        tracker.invalidate();
        assert!(!tracker.is_complete(PreprocessStage::EnvironmentCubemap));
        assert_eq!(tracker.next(), Some(PreprocessStage::EnvironmentCubemap));
    }

    #[test]
    fn equirect_source_rejects_short_pixel_data() {
        assert!(EquirectSource::from_rgba32f(2, 2, vec![[0.0; 4]; 3]).is_err());
        assert!(EquirectSource::from_rgba32f(2, 1, vec![[0.0; 4]; 2]).is_ok());
    }

    #[test]
    fn oversized_panorama_degrades_to_black() {
        let limits = wgpu::Limits::default();
        let max = limits.max_texture_dimension_2d;
        let oversized = EquirectSource {
            width: max * 2,
            height: max,
            pixels: Vec::new(),
        };
        assert_eq!(*oversized.fit_to_limits(&limits), EquirectSource::black());

        let source = gradient_source();
        assert!(matches!(source.fit_to_limits(&limits), Cow::Borrowed(_)));
    }

    #[test]
    fn pixel_count_does_not_wrap_u32() {
        // 65536 * 65536 wraps to zero in u32
        assert!(EquirectSource::from_rgba32f(65536, 65536, Vec::new()).is_err());
    }

    #[test]
    fn missing_panorama_degrades_to_black() {
        let source = EquirectSource::load_or_black("Textures/Missing.hdr");
        assert_eq!(source, EquirectSource::black());
    }

    fn gradient_source() -> EquirectSource {
        let (width, height) = (32, 16);
        let pixels = (0..width * height)
            .map(|i| {
                let (x, y) = (i % width, i / width);
                [x as f32 / width as f32 * 4.0, y as f32 / height as f32, 0.5, 1.0]
            })
            .collect();
        EquirectSource::from_rgba32f(width, height, pixels).unwrap()
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let Some(gpu) = test_gpu(4, 4) else { return };
        let mut preprocessor = EnvironmentPreprocessor::new(&gpu.device, small_settings());
        assert!(matches!(preprocessor.state(), EnvironmentState::Uninitialized));
        assert!(preprocessor.maps().is_none());

        let source = gradient_source();
        let read_faces = |preprocessor: &EnvironmentPreprocessor| -> Vec<Vec<u8>> {
            let maps = preprocessor.maps().unwrap();
            (0..6)
                .map(|face| read_texture(&gpu.device, &gpu.queue, &maps.environment.texture, face, 0).unwrap())
                .collect()
        };

        preprocessor.build_environment(&gpu.device, &gpu.queue, &source).unwrap();
        let first = read_faces(&preprocessor);
        preprocessor.build_environment(&gpu.device, &gpu.queue, &source).unwrap();
        let second = read_faces(&preprocessor);

        assert_eq!(first, second);
        assert_eq!(preprocessor.generation(), 2);
        assert!(first.iter().any(|face| face.iter().any(|&b| b != 0)));
    }

    #[test]
    fn capture_depth_is_resized_per_pass_and_restored() {
        let Some(gpu) = test_gpu(4, 4) else { return };
        let settings = small_settings();
        let mut preprocessor = EnvironmentPreprocessor::new(&gpu.device, settings);
        preprocessor
            .build_environment(&gpu.device, &gpu.queue, &EquirectSource::uniform([1.0, 1.0, 1.0]))
            .unwrap();

        // cubemap, irradiance, 5 prefilter mips, LUT, restore
        assert_eq!(preprocessor.capture_history(), &[16, 4, 16, 8, 4, 2, 1, 16, 16]);
        assert_eq!(preprocessor.capture_history(), settings.capture_sizes(true));
        assert_eq!(preprocessor.capture_size(), settings.cubemap_size);
        assert!(matches!(preprocessor.state(), EnvironmentState::Allocated(_)));

        // The LUT is cached, so a rebuild skips its capture
        preprocessor
            .build_environment(&gpu.device, &gpu.queue, &EquirectSource::black())
            .unwrap();
        assert_eq!(preprocessor.capture_history(), &[16, 4, 16, 8, 4, 2, 1, 16]);
        let maps = preprocessor.maps().unwrap();
        assert_eq!(maps.prefilter.mip_levels, 5);
        assert_eq!(maps.max_reflection_lod(), 4.0);
    }
}
