//! Interactive viewer implementing winit ApplicationHandler
//!
//! Owns the window, the surface, the deferred pipeline and the egui
//! settings overlay, and drives the fly camera from keyboard and mouse.

use crate::clock::FrameClock;
use crate::config::SolarConfig;
use crate::input::InputState;
use crate::setup;
use crate::ui::{SettingsAction, SettingsPanel};
use anyhow::Context as _;
use solar_render::{FlyCamera, FrameState, ProjectionCache, RenderContext, RenderPipeline, SceneObject};
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};
use winit::window::{CursorGrabMode, Fullscreen, Window, WindowId};

/// Pixels of trackpad scroll treated as one wheel line
const PIXELS_PER_LINE: f64 = 40.0;

/// Everything that exists only once the window is up
struct GpuState {
    window: Arc<Window>,
    context: RenderContext,
    pipeline: RenderPipeline,
    objects: Vec<SceneObject>,
    egui_winit: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

pub struct SolarApp {
    config: SolarConfig,
    gpu: Option<GpuState>,
    egui_ctx: egui::Context,
    panel: SettingsPanel,
    clock: FrameClock,
    input: InputState,
    camera: FlyCamera,
    projection: ProjectionCache,
    modifiers: ModifiersState,
    /// Environment index to rebuild before the next frame starts
    pending_environment: Option<usize>,
    error: Option<anyhow::Error>,
}

impl SolarApp {
    pub fn new(config: SolarConfig) -> Self {
        let camera = setup::camera_from_config(&config);
        let aspect = config.window.width as f32 / config.window.height as f32;
        let projection = ProjectionCache::new(camera.zoom, aspect, config.camera.near, config.camera.far);
        let panel = SettingsPanel::new(setup::environment_names(&config), config.environment.selected);
        Self {
            config,
            gpu: None,
            egui_ctx: egui::Context::default(),
            panel,
            clock: FrameClock::new(),
            input: InputState::new(),
            camera,
            projection,
            modifiers: ModifiersState::empty(),
            pending_environment: None,
            error: None,
        }
    }

    /// The error that stopped the event loop, if any
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window_attrs = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.window.width, self.config.window.height));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .context("Failed to create window")?,
        );
        if self.config.window.fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let context = pollster::block_on(RenderContext::new(window.clone()))
            .context("Failed to initialize the GPU")?;
        self.projection.set_aspect(context.aspect_ratio());

        let mut pipeline = RenderPipeline::new(
            &context.device,
            &context.queue,
            context.config.format,
            context.config.width,
            context.config.height,
            self.config.environment_settings(),
            self.config.render_settings(),
        )
        .context("Failed to create the render pipeline")?;

        setup::build_environment(
            &self.config,
            self.panel.selected_environment(),
            &context.device,
            &context.queue,
            &mut pipeline,
        )
        .context("Failed to build the environment maps")?;
        let objects = setup::load_bodies(&self.config, &context.device, &context.queue, &mut pipeline);
        log::info!("Scene ready: {} bodies", objects.len());

        let egui_winit = egui_winit::State::new(
            self.egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&context.device, context.config.format, None, 1, false);

        self.gpu = Some(GpuState {
            window,
            context,
            pipeline,
            objects,
            egui_winit,
            egui_renderer,
        });
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn set_mouse_look(&mut self, held: bool) {
        self.input.set_look_held(held);
        let Some(gpu) = &self.gpu else {
            return;
        };
        if held {
            let _ = gpu
                .window
                .set_cursor_grab(CursorGrabMode::Confined)
                .or_else(|_| gpu.window.set_cursor_grab(CursorGrabMode::Locked));
            gpu.window.set_cursor_visible(false);
        } else {
            let _ = gpu.window.set_cursor_grab(CursorGrabMode::None);
            gpu.window.set_cursor_visible(true);
        }
    }

    fn toggle_fullscreen(&self) {
        if let Some(gpu) = &self.gpu {
            if gpu.window.fullscreen().is_some() {
                gpu.window.set_fullscreen(None);
            } else {
                gpu.window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            }
        }
    }

    /// Rebuild the IBL maps between frames, never while one is recorded.
    fn apply_pending_environment(&mut self) -> anyhow::Result<()> {
        let Some(index) = self.pending_environment.take() else {
            return Ok(());
        };
        let Some(gpu) = &mut self.gpu else {
            return Ok(());
        };
        if let Err(e) = setup::build_environment(
            &self.config,
            index,
            &gpu.context.device,
            &gpu.context.queue,
            &mut gpu.pipeline,
        ) {
            if e.is_fatal() {
                return Err(anyhow::Error::new(e).context("Environment rebuild failed"));
            }
            log::warn!("Environment rebuild failed: {}", e);
        }
        Ok(())
    }

    fn apply_actions(&mut self, actions: Vec<SettingsAction>) {
        for action in actions {
            match action {
                SettingsAction::SettingsChanged(settings) => {
                    if let Some(gpu) = &mut self.gpu {
                        gpu.pipeline.set_settings(settings);
                    }
                }
                SettingsAction::RebuildEnvironment(index) => {
                    self.pending_environment = Some(index);
                }
            }
        }
    }

    /// Advance the clock and camera, then draw. An error means the loop
    /// should stop.
    fn redraw(&mut self) -> anyhow::Result<()> {
        self.clock.tick();
        let delta_time = self.clock.delta_seconds();
        if self.input.drive_camera(&mut self.camera, delta_time) {
            self.projection.set_fov(self.camera.zoom);
        }
        self.apply_pending_environment()?;

        let Some(gpu) = &mut self.gpu else {
            return Ok(());
        };

        let output = match gpu.context.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("Surface lost; reconfiguring");
                gpu.context.reconfigure();
                self.input.end_frame();
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                anyhow::bail!("GPU ran out of memory");
            }
            Err(e) => {
                log::warn!("Surface error: {:?}", e);
                self.input.end_frame();
                return Ok(());
            }
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let frame = FrameState {
            view: self.camera.view_matrix(),
            projection: self.projection.matrix(),
            camera_position: self.camera.position,
            delta_time,
        };

        let mut encoder = gpu
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        if let Err(e) = gpu.pipeline.render_frame(
            &gpu.context.device,
            &gpu.context.queue,
            &mut encoder,
            &view,
            gpu.context.config.format,
            &frame,
            &gpu.objects,
        ) {
            if e.is_fatal() {
                return Err(anyhow::Error::new(e).context("Frame rendering failed"));
            }
            log::warn!("Render error: {}", e);
        }

        // Settings overlay on top of the composited frame
        let raw_input = gpu.egui_winit.take_egui_input(&gpu.window);
        let settings = *gpu.pipeline.settings();
        let panel = &mut self.panel;
        let clock = &self.clock;
        let mut actions = Vec::new();
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            actions = panel.show(ctx, &settings, clock);
        });
        gpu.egui_winit
            .handle_platform_output(&gpu.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [gpu.context.config.width, gpu.context.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };
        for (id, image_delta) in &full_output.textures_delta.set {
            gpu.egui_renderer
                .update_texture(&gpu.context.device, &gpu.context.queue, *id, image_delta);
        }
        gpu.egui_renderer.update_buffers(
            &gpu.context.device,
            &gpu.context.queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let mut render_pass = render_pass.forget_lifetime();
            gpu.egui_renderer
                .render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        gpu.context.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        for id in &full_output.textures_delta.free {
            gpu.egui_renderer.free_texture(id);
        }

        self.apply_actions(actions);
        self.input.end_frame();
        Ok(())
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode, state: ElementState) {
        if state == ElementState::Released {
            self.input.process_key_up(key);
            return;
        }
        match key {
            KeyCode::Escape => {
                event_loop.exit();
                return;
            }
            KeyCode::KeyF if !self.modifiers.control_key() && !self.input.is_key_down(key) => {
                self.toggle_fullscreen();
            }
            KeyCode::F1 if !self.input.is_key_down(key) => self.panel.toggle(),
            _ => {}
        }
        self.input.process_key_down(key);
    }
}

impl ApplicationHandler for SolarApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_none() && self.error.is_none() {
            if let Err(e) = self.initialize(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        // Let egui handle the event first
        if let Some(gpu) = &mut self.gpu {
            let response = gpu.egui_winit.on_window_event(&gpu.window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.context.resize(new_size);
                    gpu.pipeline.request_resize(new_size.width, new_size.height);
                    self.projection.set_aspect(gpu.context.aspect_ratio());
                }
            }

            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = modifiers.state();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.handle_key(event_loop, key, event.state);
                }
            }

            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.set_mouse_look(state == ElementState::Pressed);
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => (pos.y / PIXELS_PER_LINE) as f32,
                };
                self.input.process_scroll(lines);
            }

            WindowEvent::Focused(false) => {
                self.set_mouse_look(false);
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            self.input.process_mouse_raw_delta(delta.0, delta.1);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window.request_redraw();
        }
    }
}
