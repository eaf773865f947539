//! wgpu render context setup

use std::sync::Arc;
use thiserror::Error;
use winit::window::Window;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to create surface: {0}")]
    SurfaceCreation(String),
    #[error("Failed to get adapter")]
    AdapterNotFound,
    #[error("Failed to create device: {0}")]
    DeviceCreation(String),
    #[error("Surface error: {0}")]
    SurfaceError(String),
    #[error("Failed to read render buffer: {0}")]
    BufferReadFailed(String),
    #[error("Render target '{target}' is incomplete: {reason}")]
    IncompleteTarget { target: String, reason: String },
    #[error("Cannot copy '{source_label}' into '{destination}': {reason}")]
    CopyMismatch {
        source_label: String,
        destination: String,
        reason: String,
    },
    #[error("Environment preprocessing out of order: {0}")]
    EnvironmentStage(String),
    #[error("Scene object '{object}' references missing model #{handle}")]
    MissingModel { object: String, handle: usize },
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Failed to load image: {0}")]
    ImageLoad(String),
}

impl RenderError {
    /// Errors that leave the frame loop unable to produce a correct image.
    /// Surface hiccups and asset fallbacks are not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::IncompleteTarget { .. }
            | RenderError::MissingModel { .. }
            | RenderError::EnvironmentStage(_)
            | RenderError::CopyMismatch { .. }
            | RenderError::SurfaceCreation(_)
            | RenderError::AdapterNotFound
            | RenderError::DeviceCreation(_) => true,
            RenderError::SurfaceError(_)
            | RenderError::BufferReadFailed(_)
            | RenderError::ModelLoad(_)
            | RenderError::ImageLoad(_) => false,
        }
    }
}

/// wgpu render context containing device, queue, and surface
pub struct RenderContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
}

impl RenderContext {
    /// Create a new render context for a window
    pub async fn new(window: Arc<Window>) -> Result<Self, RenderError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::SurfaceCreation(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::AdapterNotFound)?;

        let (device, queue) = request_device(&adapter, "Solar System Device").await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| RenderError::SurfaceCreation("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
        })
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Reconfigure the surface at its current size (after Lost/Outdated)
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    /// Get aspect ratio
    pub fn aspect_ratio(&self) -> f32 {
        self.size.width as f32 / self.size.height.max(1) as f32
    }
}

/// Request a device whose limits fit the five-attachment geometry buffer.
///
/// The WebGPU default of 32 bytes per sample is below what the G-buffer
/// needs, so the adapter's own ceiling is requested instead.
pub(crate) async fn request_device(
    adapter: &wgpu::Adapter,
    label: &str,
) -> Result<(wgpu::Device, wgpu::Queue), RenderError> {
    let info = adapter.get_info();
    log::info!("Using adapter {} ({:?})", info.name, info.backend);

    let supported = adapter.limits();
    let required_limits = wgpu::Limits {
        max_color_attachment_bytes_per_sample: supported.max_color_attachment_bytes_per_sample,
        ..wgpu::Limits::default()
    };

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .map_err(|e| RenderError::DeviceCreation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_frames_are_fatal() {
        let incomplete = RenderError::IncompleteTarget {
            target: "HDR Target".into(),
            reason: "out of memory".into(),
        };
        let missing = RenderError::MissingModel {
            object: "Mars".into(),
            handle: 7,
        };
        let no_environment = RenderError::EnvironmentStage("maps were not allocated".into());
        assert!(incomplete.is_fatal());
        assert!(missing.is_fatal());
        assert!(no_environment.is_fatal());
    }

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!RenderError::SurfaceError("timeout".into()).is_fatal());
        assert!(!RenderError::ImageLoad("Textures/Missing.hdr".into()).is_fatal());
        assert!(!RenderError::ModelLoad("Models/Missing.glb".into()).is_fatal());
    }
}
