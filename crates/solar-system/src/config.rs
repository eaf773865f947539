//! Demo configuration
//!
//! Everything is optional in the TOML file; omitted values fall back to the
//! original scene, so an empty (or missing default) file renders the stock
//! solar system.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use solar_render::{EnvironmentSettings, ModelFallback, PointLight, RenderSettings, ToneMapOperator};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "solar-system.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            fullscreen: false,
        }
    }
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "Solar System".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_position")]
    pub position: [f32; 3],
    /// Vertical field of view in degrees
    #[serde(default = "default_zoom")]
    pub zoom: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: default_camera_position(),
            zoom: default_zoom(),
            near: default_near(),
            far: default_far(),
            speed: default_speed(),
            sensitivity: default_sensitivity(),
        }
    }
}

fn default_camera_position() -> [f32; 3] {
    [0.0, 0.0, 1.0]
}
fn default_zoom() -> f32 {
    45.0
}
fn default_near() -> f32 {
    0.1
}
fn default_far() -> f32 {
    100.0
}
fn default_speed() -> f32 {
    2.5
}
fn default_sensitivity() -> f32 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_exposure")]
    pub exposure: f32,
    /// One of the [`ToneMapOperator::name`] identifiers
    #[serde(default = "default_tone_mapping")]
    pub tone_mapping: String,
    #[serde(default = "default_bloom_iterations")]
    pub bloom_iterations: u32,
    #[serde(default = "default_bloom_threshold")]
    pub bloom_threshold: f32,
    #[serde(default = "default_emission_strength")]
    pub emission_strength: f32,
    #[serde(default = "default_specular_strength")]
    pub specular_strength: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            exposure: default_exposure(),
            tone_mapping: default_tone_mapping(),
            bloom_iterations: default_bloom_iterations(),
            bloom_threshold: default_bloom_threshold(),
            emission_strength: default_emission_strength(),
            specular_strength: default_specular_strength(),
        }
    }
}

fn default_exposure() -> f32 {
    2.5
}
fn default_tone_mapping() -> String {
    ToneMapOperator::None.name().to_string()
}
fn default_bloom_iterations() -> u32 {
    4
}
fn default_bloom_threshold() -> f32 {
    1.0
}
fn default_emission_strength() -> f32 {
    0.4
}
fn default_specular_strength() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    #[serde(default = "default_light_position")]
    pub position: [f32; 3],
    #[serde(default = "default_light_color")]
    pub color: [f32; 3],
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    #[serde(default = "default_attenuation")]
    pub linear: f32,
    #[serde(default = "default_attenuation")]
    pub quadratic: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            position: default_light_position(),
            color: default_light_color(),
            intensity: default_intensity(),
            linear: default_attenuation(),
            quadratic: default_attenuation(),
        }
    }
}

impl LightConfig {
    pub fn to_point_light(&self) -> PointLight {
        PointLight {
            position: Vec3::from(self.position),
            color: Vec3::from(self.color),
            intensity: self.intensity,
            linear: self.linear,
            quadratic: self.quadratic,
        }
    }
}

fn default_light_position() -> [f32; 3] {
    [0.0, 2.0, 0.0]
}
fn default_light_color() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}
fn default_intensity() -> f32 {
    50.0
}
fn default_attenuation() -> f32 {
    1e-6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Equirectangular HDR panoramas, relative to the asset root
    #[serde(default = "default_environment_images")]
    pub images: Vec<PathBuf>,
    #[serde(default)]
    pub selected: usize,
    #[serde(default = "default_cubemap_size")]
    pub cubemap_size: u32,
    /// Irradiance cube face size. 32 gives visually equivalent diffuse light.
    #[serde(default = "default_irradiance_size")]
    pub irradiance_size: u32,
    #[serde(default = "default_prefilter_size")]
    pub prefilter_size: u32,
    #[serde(default = "default_prefilter_mips")]
    pub prefilter_mips: u32,
    #[serde(default = "default_brdf_lut_size")]
    pub brdf_lut_size: u32,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            images: default_environment_images(),
            selected: 0,
            cubemap_size: default_cubemap_size(),
            irradiance_size: default_irradiance_size(),
            prefilter_size: default_prefilter_size(),
            prefilter_mips: default_prefilter_mips(),
            brdf_lut_size: default_brdf_lut_size(),
        }
    }
}

fn default_environment_images() -> Vec<PathBuf> {
    vec![PathBuf::from("Textures/Space.hdr")]
}
fn default_cubemap_size() -> u32 {
    1024
}
fn default_irradiance_size() -> u32 {
    64
}
fn default_prefilter_size() -> u32 {
    256
}
fn default_prefilter_mips() -> u32 {
    5
}
fn default_brdf_lut_size() -> u32 {
    1024
}

/// One sun or planet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyConfig {
    pub name: String,
    /// glTF file relative to the asset root
    pub model: PathBuf,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Albedo of the stand-in sphere when the model is missing
    #[serde(default = "default_fallback_color")]
    pub fallback_color: [f32; 3],
    #[serde(default)]
    pub fallback_emission: [f32; 3],
}

impl BodyConfig {
    fn planet(name: &str, z: f32, color: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            model: PathBuf::from(format!("Models/{name}/{name}.gltf")),
            translation: [0.0, 0.0, z],
            scale: 0.01,
            fallback_color: color,
            fallback_emission: [0.0; 3],
        }
    }

    pub fn fallback(&self) -> ModelFallback {
        ModelFallback {
            albedo: self.fallback_color,
            emission: self.fallback_emission,
        }
    }
}

fn default_scale() -> f32 {
    1.0
}
fn default_fallback_color() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

/// The sun at the origin and the planets alternating along the z axis
pub fn default_bodies() -> Vec<BodyConfig> {
    let sun = BodyConfig {
        name: "Sun".to_string(),
        model: PathBuf::from("Models/Sun/Sun.gltf"),
        translation: [0.0; 3],
        scale: 0.1,
        fallback_color: [1.0, 0.8, 0.4],
        fallback_emission: [8.0, 5.0, 1.5],
    };
    vec![
        sun,
        BodyConfig::planet("Mercury", -1.0, [0.55, 0.52, 0.5]),
        BodyConfig::planet("Venus", 1.0, [0.9, 0.75, 0.45]),
        BodyConfig::planet("Earth", -2.0, [0.2, 0.4, 0.8]),
        BodyConfig::planet("Mars", 2.0, [0.75, 0.3, 0.15]),
        BodyConfig::planet("Jupiter", -3.0, [0.8, 0.65, 0.5]),
        BodyConfig::planet("Saturn", 3.0, [0.85, 0.78, 0.55]),
        BodyConfig::planet("Uranus", -4.0, [0.55, 0.8, 0.85]),
        BodyConfig::planet("Neptune", 4.0, [0.25, 0.4, 0.9]),
        BodyConfig::planet("Pluto", 5.0, [0.7, 0.6, 0.5]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarConfig {
    /// Directory model and environment paths are resolved against
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default = "default_bodies")]
    pub bodies: Vec<BodyConfig>,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            asset_root: default_asset_root(),
            window: WindowConfig::default(),
            camera: CameraConfig::default(),
            render: RenderConfig::default(),
            light: LightConfig::default(),
            environment: EnvironmentConfig::default(),
            bodies: default_bodies(),
        }
    }
}

fn default_asset_root() -> PathBuf {
    PathBuf::from(".")
}

impl SolarConfig {
    pub fn from_toml_str(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: SolarConfig = toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source, path)
    }

    /// Load an explicitly requested file, or the default file when it
    /// exists, or the built-in scene.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load(path)
                } else {
                    log::info!("No {} found; using the built-in scene", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.window.width == 0 || self.window.height == 0 {
            return invalid(format!(
                "window size {}x{} must be non-zero",
                self.window.width, self.window.height
            ));
        }
        if self.bodies.is_empty() {
            return invalid("at least one body is required".to_string());
        }
        if let Some(body) = self.bodies.iter().find(|b| !b.scale.is_finite() || b.scale <= 0.0) {
            return invalid(format!("body '{}' has non-positive scale {}", body.name, body.scale));
        }
        if self.environment.images.is_empty() {
            return invalid("at least one environment image is required".to_string());
        }
        if self.environment.selected >= self.environment.images.len() {
            return invalid(format!(
                "environment index {} out of range for {} images",
                self.environment.selected,
                self.environment.images.len()
            ));
        }
        if ToneMapOperator::from_name(&self.render.tone_mapping).is_none() {
            return invalid(format!("unknown tone mapping '{}'", self.render.tone_mapping));
        }
        if !(self.camera.near > 0.0 && self.camera.far > self.camera.near) {
            return invalid(format!(
                "camera clip range {}..{} is empty",
                self.camera.near, self.camera.far
            ));
        }
        let env = &self.environment;
        let sizes = [
            env.cubemap_size,
            env.irradiance_size,
            env.prefilter_size,
            env.prefilter_mips,
            env.brdf_lut_size,
        ];
        if sizes.contains(&0) {
            return invalid("environment map sizes must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn tone_map(&self) -> ToneMapOperator {
        ToneMapOperator::from_name(&self.render.tone_mapping).unwrap_or_default()
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            exposure: self.render.exposure,
            tone_map: self.tone_map(),
            bloom_iterations: self.render.bloom_iterations,
            bloom_threshold: self.render.bloom_threshold,
            emission_strength: self.render.emission_strength,
            specular_strength: self.render.specular_strength,
            light: self.light.to_point_light(),
            near: self.camera.near,
            far: self.camera.far,
        }
    }

    pub fn environment_settings(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            cubemap_size: self.environment.cubemap_size,
            irradiance_size: self.environment.irradiance_size,
            prefilter_size: self.environment.prefilter_size,
            prefilter_mips: self.environment.prefilter_mips,
            brdf_lut_size: self.environment.brdf_lut_size,
        }
    }

    pub fn asset_path(&self, relative: &Path) -> PathBuf {
        self.asset_root.join(relative)
    }

    pub fn environment_path(&self, index: usize) -> Option<PathBuf> {
        self.environment.images.get(index).map(|p| self.asset_path(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<SolarConfig, ConfigError> {
        SolarConfig::from_toml_str(source, Path::new("test.toml"))
    }

    #[test]
    fn empty_file_is_the_stock_scene() {
        let config = parse("").unwrap();
        assert_eq!(config, SolarConfig::default());
        assert_eq!(config.bodies.len(), 10);
        assert_eq!(config.bodies[0].name, "Sun");
        assert_eq!(config.bodies[0].scale, 0.1);
        assert_eq!(config.bodies[3].translation, [0.0, 0.0, -2.0]);
        assert_eq!(config.render_settings(), RenderSettings::default());
        assert_eq!(config.environment_settings(), EnvironmentSettings::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [render]
            tone_mapping = "aces_filmic"
            exposure = 1.5

            [window]
            width = 800
            "#,
        )
        .unwrap();
        assert_eq!(config.tone_map(), ToneMapOperator::AcesFilmic);
        assert_eq!(config.render.exposure, 1.5);
        assert_eq!(config.render.bloom_iterations, 4);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn irradiance_size_defaults_to_64_and_can_be_lowered() {
        assert_eq!(SolarConfig::default().environment.irradiance_size, 64);
        let config = parse(
            r#"
            [environment]
            irradiance_size = 32
            "#,
        )
        .unwrap();
        assert_eq!(config.environment_settings().irradiance_size, 32);
        assert_eq!(config.environment.prefilter_size, 256);
    }

    #[test]
    fn bodies_replace_the_default_list() {
        let config = parse(
            r#"
            [[bodies]]
            name = "Moon"
            model = "Models/Moon/Moon.gltf"
            translation = [1.0, 0.0, 0.0]
            scale = 0.005
            "#,
        )
        .unwrap();
        assert_eq!(config.bodies.len(), 1);
        assert_eq!(config.bodies[0].fallback_color, [0.5, 0.5, 0.5]);
    }

    #[test]
    fn zero_window_size_is_rejected() {
        let result = parse("[window]\nheight = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_body_list_is_rejected() {
        let mut config = SolarConfig::default();
        config.bodies.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn non_positive_scale_is_rejected() {
        let mut config = SolarConfig::default();
        config.bodies[2].scale = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn environment_index_must_be_in_range() {
        let result = parse("[environment]\nselected = 1\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_tone_mapping_is_rejected() {
        let result = parse("[render]\ntone_mapping = \"hable\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(parse("[window"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_explicit_file_is_an_io_error() {
        let result = SolarConfig::resolve(Some(Path::new("no/such/solar.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn paths_resolve_against_asset_root() {
        let config = parse("asset_root = \"assets\"\n").unwrap();
        assert_eq!(
            config.environment_path(0),
            Some(PathBuf::from("assets").join("Textures/Space.hdr"))
        );
        assert_eq!(config.environment_path(3), None);
    }
}
