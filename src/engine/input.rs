// Input state tracking for keyboard and mouse
// Abstracts winit events into a queryable per-frame snapshot

use std::collections::HashSet;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Default)]
pub struct InputState {
    keys_held:    HashSet<KeyCode>,
    buttons_held: HashSet<MouseButton>,

    pub mouse_position: (f32, f32),
    mouse_prev_position: (f32, f32),
    /// Cursor movement over the last frame, in pixels.
    pub mouse_delta: (f32, f32),

    // Accumulated vertical scroll this frame, reset in end_frame()
    pub scroll_delta: f32,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a winit WindowEvent the overlay did not consume.
    pub fn process_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => { self.keys_held.insert(key); }
                        ElementState::Released => { self.keys_held.remove(&key); }
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => { self.buttons_held.insert(*button); }
                ElementState::Released => { self.buttons_held.remove(button); }
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.mouse_position = (position.x as f32, position.y as f32);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 100.0,
                };
                self.scroll_delta += y;
            }
            WindowEvent::Focused(false) => {
                self.keys_held.clear();
                self.buttons_held.clear();
            }
            _ => {}
        }
    }

    /// Call once per frame after update() and render() have consumed input.
    pub fn end_frame(&mut self) {
        self.scroll_delta = 0.0;
        self.mouse_delta = (
            self.mouse_position.0 - self.mouse_prev_position.0,
            self.mouse_position.1 - self.mouse_prev_position.1,
        );
        self.mouse_prev_position = self.mouse_position;
    }

    pub fn is_key_held(&self, key: KeyCode) -> bool {
        self.keys_held.contains(&key)
    }

    pub fn is_mouse_held(&self, button: MouseButton) -> bool {
        self.buttons_held.contains(&button)
    }
}
