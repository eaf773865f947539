//! Scene assembly shared by the interactive app and the headless render command

use crate::config::SolarConfig;
use glam::Vec3;
use solar_render::{EquirectSource, FlyCamera, RenderError, RenderPipeline, SceneObject};

/// Load every configured body and return the draw list in config order.
/// Missing or broken models come back as stand-in spheres.
pub fn load_bodies(
    config: &SolarConfig,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &mut RenderPipeline,
) -> Vec<SceneObject> {
    config
        .bodies
        .iter()
        .map(|body| {
            let path = config.asset_path(&body.model);
            let handle = pipeline.load_model(device, queue, &path, &body.fallback());
            log::debug!("Body '{}' -> {}", body.name, path.display());
            SceneObject::new(body.name.clone(), handle, Vec3::from(body.translation), body.scale)
        })
        .collect()
}

/// Build the IBL maps from the environment image at `index`. An unreadable
/// image is replaced by a black panorama.
pub fn build_environment(
    config: &SolarConfig,
    index: usize,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &mut RenderPipeline,
) -> Result<(), RenderError> {
    let source = match config.environment_path(index) {
        Some(path) => {
            log::info!("Building environment from {}", path.display());
            EquirectSource::load_or_black(&path)
        }
        None => {
            log::warn!("No environment image at index {}; using black", index);
            EquirectSource::black()
        }
    };
    pipeline.build_environment(device, queue, &source)
}

pub fn camera_from_config(config: &SolarConfig) -> FlyCamera {
    let mut camera = FlyCamera::new(Vec3::from(config.camera.position));
    camera.movement_speed = config.camera.speed;
    camera.mouse_sensitivity = config.camera.sensitivity;
    camera.set_zoom(config.camera.zoom);
    camera
}

/// Display names for the environment picker
pub fn environment_names(config: &SolarConfig) -> Vec<String> {
    config
        .environment
        .images
        .iter()
        .map(|p| {
            p.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use solar_render::{MAX_ZOOM, MIN_ZOOM};

    #[test]
    fn camera_takes_config_values() {
        let mut config = SolarConfig::default();
        config.camera.position = [1.0, 2.0, 3.0];
        config.camera.speed = 7.0;
        config.camera.zoom = 30.0;
        let camera = camera_from_config(&config);
        assert_eq!(camera.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(camera.movement_speed, 7.0);
        assert_eq!(camera.zoom, 30.0);
    }

    #[test]
    fn camera_zoom_is_clamped() {
        let mut config = SolarConfig::default();
        config.camera.zoom = 120.0;
        assert_eq!(camera_from_config(&config).zoom, MAX_ZOOM);
        config.camera.zoom = 0.0;
        assert_eq!(camera_from_config(&config).zoom, MIN_ZOOM);
    }

    #[test]
    fn environment_names_use_file_names() {
        let config = SolarConfig::default();
        assert_eq!(environment_names(&config), vec!["Space.hdr".to_string()]);
    }
}
