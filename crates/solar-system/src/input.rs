//! Keyboard and mouse state for the fly camera

use solar_render::{CameraMovement, FlyCamera};
use std::collections::HashSet;
use winit::keyboard::KeyCode;

/// Keypad zoom rate in degrees of field of view per second
pub const ZOOM_RATE: f32 = 50.0;

const MOVEMENT_KEYS: [(KeyCode, CameraMovement); 6] = [
    (KeyCode::KeyW, CameraMovement::Forward),
    (KeyCode::KeyS, CameraMovement::Backward),
    (KeyCode::KeyA, CameraMovement::Left),
    (KeyCode::KeyD, CameraMovement::Right),
    (KeyCode::KeyQ, CameraMovement::Up),
    (KeyCode::KeyE, CameraMovement::Down),
];

/// Tracks held keys and the mouse between frames
#[derive(Debug, Default)]
pub struct InputState {
    keys_down: HashSet<KeyCode>,
    keys_just_pressed: HashSet<KeyCode>,
    /// Right mouse button held: mouse look is active
    look_held: bool,
    /// Raw mouse motion accumulated this frame
    mouse_delta: (f64, f64),
    /// Scroll lines accumulated this frame
    scroll: f32,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_key_down(&mut self, key: KeyCode) {
        if self.keys_down.insert(key) {
            self.keys_just_pressed.insert(key);
        }
    }

    pub fn process_key_up(&mut self, key: KeyCode) {
        self.keys_down.remove(&key);
    }

    pub fn set_look_held(&mut self, held: bool) {
        self.look_held = held;
        if !held {
            self.mouse_delta = (0.0, 0.0);
        }
    }

    pub fn is_look_held(&self) -> bool {
        self.look_held
    }

    /// Raw device motion; ignored unless mouse look is held.
    pub fn process_mouse_raw_delta(&mut self, dx: f64, dy: f64) {
        if self.look_held {
            self.mouse_delta.0 += dx;
            self.mouse_delta.1 += dy;
        }
    }

    pub fn process_scroll(&mut self, lines: f32) {
        self.scroll += lines;
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys_down.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.keys_just_pressed.contains(&key)
    }

    /// Movement directions for the keys currently held
    pub fn movements(&self) -> impl Iterator<Item = CameraMovement> + '_ {
        MOVEMENT_KEYS
            .iter()
            .filter(|(key, _)| self.keys_down.contains(key))
            .map(|(_, movement)| *movement)
    }

    /// Keypad +/- zoom in degrees for this frame; plus narrows the view.
    pub fn keypad_zoom(&self, delta_time: f32) -> f32 {
        if self.is_key_down(KeyCode::NumpadAdd) {
            -ZOOM_RATE * delta_time
        } else if self.is_key_down(KeyCode::NumpadSubtract) {
            ZOOM_RATE * delta_time
        } else {
            0.0
        }
    }

    /// Apply this frame's input to the camera. Returns true when the field
    /// of view changed and the projection must be rebuilt.
    pub fn drive_camera(&self, camera: &mut FlyCamera, delta_time: f32) -> bool {
        for movement in self.movements() {
            camera.process_keyboard(movement, delta_time);
        }
        if self.look_held && self.mouse_delta != (0.0, 0.0) {
            // Screen y grows downward; pitch grows upward
            camera.process_mouse_movement(self.mouse_delta.0 as f32, -self.mouse_delta.1 as f32);
        }

        let mut zoom_changed = false;
        if self.scroll != 0.0 {
            zoom_changed |= camera.process_mouse_scroll(self.scroll);
        }
        let keypad = self.keypad_zoom(delta_time);
        if keypad != 0.0 {
            zoom_changed |= camera.set_zoom(camera.zoom + keypad);
        }
        zoom_changed
    }

    /// Clear per-frame state
    pub fn end_frame(&mut self) {
        self.keys_just_pressed.clear();
        self.mouse_delta = (0.0, 0.0);
        self.scroll = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use solar_render::{MAX_ZOOM, MIN_ZOOM};

    #[test]
    fn just_pressed_lasts_one_frame() {
        let mut input = InputState::new();
        input.process_key_down(KeyCode::KeyF);
        assert!(input.is_key_just_pressed(KeyCode::KeyF));
        input.end_frame();
        assert!(!input.is_key_just_pressed(KeyCode::KeyF));
        assert!(input.is_key_down(KeyCode::KeyF));
        // Key repeat does not re-trigger
        input.process_key_down(KeyCode::KeyF);
        assert!(!input.is_key_just_pressed(KeyCode::KeyF));
    }

    #[test]
    fn q_and_e_move_vertically() {
        let mut input = InputState::new();
        input.process_key_down(KeyCode::KeyQ);
        let mut camera = FlyCamera::new(Vec3::ZERO);
        input.drive_camera(&mut camera, 1.0);
        assert!(camera.position.y > 0.0);

        input.process_key_up(KeyCode::KeyQ);
        input.process_key_down(KeyCode::KeyE);
        let mut camera = FlyCamera::new(Vec3::ZERO);
        input.drive_camera(&mut camera, 1.0);
        assert!(camera.position.y < 0.0);
    }

    #[test]
    fn mouse_look_requires_right_button() {
        let mut input = InputState::new();
        let mut camera = FlyCamera::new(Vec3::ZERO);
        let yaw = camera.yaw;
        input.process_mouse_raw_delta(100.0, 0.0);
        input.drive_camera(&mut camera, 0.016);
        assert_eq!(camera.yaw, yaw);

        input.set_look_held(true);
        input.process_mouse_raw_delta(100.0, 0.0);
        input.drive_camera(&mut camera, 0.016);
        assert!(camera.yaw > yaw);
    }

    #[test]
    fn keypad_zoom_marks_projection_dirty_until_clamped() {
        let mut input = InputState::new();
        let mut camera = FlyCamera::new(Vec3::ZERO);
        input.process_key_down(KeyCode::NumpadAdd);
        assert!(input.drive_camera(&mut camera, 0.1));
        assert!((camera.zoom - (MAX_ZOOM - 5.0)).abs() < 1e-4);

        camera.set_zoom(MIN_ZOOM);
        assert!(!input.drive_camera(&mut camera, 0.1));
        assert_eq!(camera.zoom, MIN_ZOOM);
    }

    #[test]
    fn scroll_zooms_and_clears_each_frame() {
        let mut input = InputState::new();
        let mut camera = FlyCamera::new(Vec3::ZERO);
        input.process_scroll(3.0);
        assert!(input.drive_camera(&mut camera, 0.016));
        assert_eq!(camera.zoom, MAX_ZOOM - 3.0);
        input.end_frame();
        assert!(!input.drive_camera(&mut camera, 0.016));
    }
}
