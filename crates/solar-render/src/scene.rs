//! Scene description: drawable bodies, their models and the point light

use crate::context::RenderError;
use crate::model::Model;
use glam::{Mat4, Vec3};

/// Index of a model inside a [`ModelLibrary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub usize);

/// A sun or planet: one model drawn with a translate + uniform scale transform
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub model: ModelHandle,
    pub translation: Vec3,
    pub scale: f32,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, model: ModelHandle, translation: Vec3, scale: f32) -> Self {
        Self {
            name: name.into(),
            model,
            translation,
            scale,
        }
    }

    pub fn world_transform(&self) -> Mat4 {
        Mat4::from_translation(self.translation) * Mat4::from_scale(Vec3::splat(self.scale))
    }
}

/// The single point light of the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 0.0),
            color: Vec3::ONE,
            intensity: 50.0,
            linear: 1e-6,
            quadratic: 1e-6,
        }
    }
}

impl PointLight {
    /// Distance falloff: 1 / (1 + linear d + quadratic d^2)
    pub fn attenuation(&self, distance: f32) -> f32 {
        1.0 / (1.0 + self.linear * distance + self.quadratic * distance * distance)
    }
}

/// Loaded models addressed by [`ModelHandle`]
#[derive(Default)]
pub struct ModelLibrary {
    models: Vec<Model>,
}

impl ModelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, model: Model) -> ModelHandle {
        self.models.push(model);
        ModelHandle(self.models.len() - 1)
    }

    pub fn get(&self, handle: ModelHandle) -> Option<&Model> {
        self.models.get(handle.0)
    }

    /// Look up the model an object draws, failing for dangling handles.
    pub fn resolve(&self, object: &SceneObject) -> Result<&Model, RenderError> {
        self.get(object.model).ok_or_else(|| RenderError::MissingModel {
            object: object.name.clone(),
            handle: object.model.0,
        })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
