//! Headless scene-to-PNG render command

use crate::config::SolarConfig;
use crate::setup;
use anyhow::{Context, Result};
use solar_render::{FrameState, HeadlessContext, ProjectionCache, RenderPipeline, ToneMapOperator};
use std::path::PathBuf;

pub struct RenderArgs {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub tone_mapping: Option<String>,
    pub exposure: Option<f32>,
}

pub fn run(config: &SolarConfig, args: RenderArgs) -> Result<()> {
    let mut settings = config.render_settings();
    if let Some(name) = &args.tone_mapping {
        settings.tone_map = ToneMapOperator::from_name(name)
            .with_context(|| format!("Unknown tone mapping '{}'", name))?;
    }
    if let Some(exposure) = args.exposure {
        settings.exposure = exposure;
    }

    let ctx = pollster::block_on(HeadlessContext::new(args.width, args.height))
        .context("Failed to create headless render context")?;

    let mut pipeline = RenderPipeline::new(
        &ctx.device,
        &ctx.queue,
        ctx.format,
        args.width,
        args.height,
        config.environment_settings(),
        settings,
    )
    .context("Failed to create the render pipeline")?;

    setup::build_environment(
        config,
        config.environment.selected,
        &ctx.device,
        &ctx.queue,
        &mut pipeline,
    )
    .context("Failed to build the environment maps")?;
    let objects = setup::load_bodies(config, &ctx.device, &ctx.queue, &mut pipeline);

    let camera = setup::camera_from_config(config);
    let mut projection = ProjectionCache::new(
        camera.zoom,
        ctx.aspect_ratio(),
        config.camera.near,
        config.camera.far,
    );
    let frame = FrameState {
        view: camera.view_matrix(),
        projection: projection.matrix(),
        camera_position: camera.position,
        delta_time: 0.0,
    };

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Headless Frame Encoder"),
        });
    pipeline
        .render_frame(
            &ctx.device,
            &ctx.queue,
            &mut encoder,
            &ctx.color_view,
            ctx.format,
            &frame,
            &objects,
        )
        .context("Failed to render frame")?;
    ctx.queue.submit(std::iter::once(encoder.finish()));

    // Read back pixels
    let pixels = ctx.read_pixels().context("Failed to read rendered pixels")?;

    // Encode as PNG
    let img = image::RgbaImage::from_raw(args.width, args.height, pixels)
        .context("Failed to create image from pixel data")?;
    img.save(&args.output)
        .with_context(|| format!("Failed to save image to {}", args.output.display()))?;

    log::info!(
        "Rendered {}x{} image to {}",
        args.width,
        args.height,
        args.output.display()
    );
    Ok(())
}
