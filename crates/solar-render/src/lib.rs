//! Solar Render - deferred PBR renderer for the solar system demo
//!
//! A fixed multi-pass wgpu pipeline: G-buffer geometry pass, image-based
//! Cook-Torrance lighting with a bright-pass split, ping-pong Gaussian
//! bloom, an environment skybox and a tone-mapping composite. Environment
//! maps (cubemap, irradiance, prefiltered specular, BRDF LUT) are derived
//! from an equirectangular HDR panorama on the GPU.

pub mod bloom_pass;
mod camera;
pub mod composite_pass;
mod context;
pub mod environment;
mod frame;
pub mod geometry_pass;
pub mod gltf_import;
mod headless;
pub mod lighting_pass;
pub mod model;
mod primitives;
mod render_pipeline;
mod scene;
pub mod skybox_pass;
pub mod targets;
mod tonemap;

pub use camera::{CameraMovement, FlyCamera, MAX_ZOOM, MIN_ZOOM};
pub use context::{RenderContext, RenderError};
pub use environment::{EnvironmentMaps, EnvironmentPreprocessor, EnvironmentSettings, EquirectSource};
pub use frame::{FrameState, ProjectionCache, ResizeLatch};
pub use gltf_import::MaterialFactors;
pub use headless::{read_texture, HeadlessContext};
pub use model::{MaterialBinder, Model, ModelFallback, FALLBACK_SPHERE_RADIUS};
pub use primitives::{create_uv_sphere, Mesh, Vertex};
pub use render_pipeline::{FramePass, RenderPipeline, RenderSettings, FRAME_SEQUENCE};
pub use scene::{ModelHandle, ModelLibrary, PointLight, SceneObject};
pub use targets::{ResourceSet, HDR_FORMAT};
pub use tonemap::ToneMapOperator;

#[cfg(test)]
mod tests {
    #[test]
    fn geometry_shader_wgsl_parses() {
        let source = include_str!("geometry_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("geometry_shader.wgsl failed to parse");
    }

    #[test]
    fn lighting_shader_wgsl_parses() {
        let source = include_str!("lighting_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("lighting_shader.wgsl failed to parse");
    }

    #[test]
    fn blur_shader_wgsl_parses() {
        let source = include_str!("blur_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("blur_shader.wgsl failed to parse");
    }

    #[test]
    fn skybox_shader_wgsl_parses() {
        let source = include_str!("skybox_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("skybox_shader.wgsl failed to parse");
    }

    #[test]
    fn composite_shader_wgsl_parses() {
        let source = include_str!("composite_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("composite_shader.wgsl failed to parse");
    }

    #[test]
    fn equirect_shader_wgsl_parses() {
        let source = include_str!("equirect_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("equirect_shader.wgsl failed to parse");
    }

    #[test]
    fn irradiance_shader_wgsl_parses() {
        let source = include_str!("irradiance_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("irradiance_shader.wgsl failed to parse");
    }

    #[test]
    fn prefilter_shader_wgsl_parses() {
        let source = include_str!("prefilter_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("prefilter_shader.wgsl failed to parse");
    }

    #[test]
    fn brdf_shader_wgsl_parses() {
        let source = include_str!("brdf_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("brdf_shader.wgsl failed to parse");
    }

    #[test]
    fn mipmap_shader_wgsl_parses() {
        let source = include_str!("mipmap_shader.wgsl");
        naga::front::wgsl::parse_str(source).expect("mipmap_shader.wgsl failed to parse");
    }
}
