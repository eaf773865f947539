//! Per-frame state: deferred resize requests and the cached projection

use glam::{Mat4, Vec3};

/// Holds the most recent drawable size until the frame loop is ready for it.
///
/// Window events only record the request; the pipeline applies it at the
/// start of the next frame so no pass ever sees half-resized targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResizeLatch {
    pending: Option<(u32, u32)>,
}

impl ResizeLatch {
    pub fn request(&mut self, width: u32, height: u32) {
        self.pending = Some((width, height));
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the latest request, clearing the latch.
    pub fn take(&mut self) -> Option<(u32, u32)> {
        self.pending.take()
    }
}

/// Perspective projection recomputed only when zoom or aspect change.
#[derive(Debug, Clone)]
pub struct ProjectionCache {
    fov_degrees: f32,
    aspect: f32,
    near: f32,
    far: f32,
    matrix: Mat4,
    dirty: bool,
}

impl ProjectionCache {
    pub fn new(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_degrees,
            aspect,
            near,
            far,
            matrix: Mat4::IDENTITY,
            dirty: true,
        }
    }

    pub fn set_fov(&mut self, fov_degrees: f32) {
        if fov_degrees != self.fov_degrees {
            self.fov_degrees = fov_degrees;
            self.dirty = true;
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 && aspect != self.aspect {
            self.aspect = aspect;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn matrix(&mut self) -> Mat4 {
        if self.dirty {
            self.matrix = Mat4::perspective_rh(self.fov_degrees.to_radians(), self.aspect, self.near, self.far);
            self.dirty = false;
        }
        self.matrix
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }
}

/// Camera data handed to the frame passes
#[derive(Debug, Clone, Copy)]
pub struct FrameState {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub delta_time: f32,
}

impl FrameState {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_keeps_only_latest_request() {
        let mut latch = ResizeLatch::default();
        assert!(!latch.is_dirty());
        latch.request(800, 600);
        latch.request(1024, 768);
        assert!(latch.is_dirty());
        assert_eq!(latch.take(), Some((1024, 768)));
        assert!(!latch.is_dirty());
        assert_eq!(latch.take(), None);
    }

    #[test]
    fn projection_is_cached_until_changed() {
        let mut cache = ProjectionCache::new(45.0, 16.0 / 9.0, 0.01, 1000.0);
        assert!(cache.is_dirty());
        let first = cache.matrix();
        assert!(!cache.is_dirty());

        cache.set_fov(45.0);
        assert!(!cache.is_dirty());
        cache.set_fov(30.0);
        assert!(cache.is_dirty());
        let narrower = cache.matrix();
        assert!(narrower.y_axis.y > first.y_axis.y);

        cache.set_aspect(1.0);
        assert!(cache.is_dirty());
        cache.set_aspect(0.0);
        cache.matrix();
        assert!(!cache.is_dirty());
    }
}
