// Orbit camera around the mesh centre, plus stored viewpoints.
//
// Camera model:
//   - A target point (the mesh centre) the camera always looks at
//   - Yaw and pitch place the eye on a sphere around the target
//   - Zoom scales the sphere radius
//   - Left-drag orbits, arrow keys orbit at a fixed rate, wheel zooms

use std::path::Path;

use glam::{Mat4, Vec3};
use winit::event::MouseButton;
use winit::keyboard::KeyCode;

use super::containers::GrowableArray;
use super::input::InputState;

const MAX_PITCH: f32 = 89.0 * std::f32::consts::PI / 180.0;

/// A saved camera placement. Stored back to back in viewpoint files.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Viewpoint {
    pub target:   [f32; 3],
    pub yaw:      f32,
    pub pitch:    f32,
    pub distance: f32,
}

pub struct OrbitCamera {
    target: Vec3,

    /// Private: always clamped to [min_distance, max_distance]. Use distance() to read.
    distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,

    /// Radians; 0 looks along -Z.
    pub yaw: f32,
    /// Radians above the horizon.
    pub pitch: f32,

    pub fov:  f32,
    pub near: f32,
    pub far:  f32,

    /// Keyboard orbit rate in radians per second.
    pub rotate_speed: f32,
    /// Drag orbit in radians per pixel.
    pub drag_sensitivity: f32,
    /// Fraction of the distance removed per scroll line.
    pub zoom_speed: f32,
}

impl OrbitCamera {
    /// Camera that frames a sphere of `radius` around `center`.
    pub fn framing(center: Vec3, radius: f32) -> Self {
        let radius = radius.max(1e-3);
        Self {
            target: center,
            distance: radius * 3.0,
            min_distance: radius * 1.05,
            max_distance: radius * 20.0,
            yaw: 0.0,
            pitch: 20.0_f32.to_radians(),
            fov: 45.0_f32.to_radians(),
            near: radius * 0.01,
            far: radius * 50.0,
            rotate_speed: 1.5,
            drag_sensitivity: 0.008,
            zoom_speed: 0.1,
        }
    }

    /// Call once per frame before rendering.
    pub fn update(&mut self, input: &InputState, dt: f32) {
        if input.is_key_held(KeyCode::ArrowLeft)  { self.yaw -= self.rotate_speed * dt; }
        if input.is_key_held(KeyCode::ArrowRight) { self.yaw += self.rotate_speed * dt; }
        if input.is_key_held(KeyCode::ArrowUp)    { self.pitch += self.rotate_speed * dt; }
        if input.is_key_held(KeyCode::ArrowDown)  { self.pitch -= self.rotate_speed * dt; }

        if input.is_mouse_held(MouseButton::Left) {
            self.yaw -= input.mouse_delta.0 * self.drag_sensitivity;
            self.pitch += input.mouse_delta.1 * self.drag_sensitivity;
        }

        // Scroll up (positive) zooms in.
        self.distance *= (1.0 - self.zoom_speed).powf(input.scroll_delta);

        self.clamp();
    }

    fn clamp(&mut self) {
        self.pitch = self.pitch.clamp(-MAX_PITCH, MAX_PITCH);
        self.yaw = self.yaw.rem_euclid(std::f32::consts::TAU);
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);
    }

    pub fn eye_position(&self) -> Vec3 {
        self.target
            + Vec3::new(
                self.yaw.sin() * self.pitch.cos(),
                self.pitch.sin(),
                self.yaw.cos() * self.pitch.cos(),
            ) * self.distance
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye_position(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    pub fn target(&self) -> Vec3 { self.target }
    pub fn distance(&self) -> f32 { self.distance }

    pub fn viewpoint(&self) -> Viewpoint {
        Viewpoint {
            target: self.target.to_array(),
            yaw: self.yaw,
            pitch: self.pitch,
            distance: self.distance,
        }
    }

    pub fn set_viewpoint(&mut self, viewpoint: &Viewpoint) {
        self.target = Vec3::from_array(viewpoint.target);
        self.yaw = viewpoint.yaw;
        self.pitch = viewpoint.pitch;
        self.distance = viewpoint.distance;
        self.clamp();
    }
}

// ============================================================================
// VIEWPOINT FILES
// ============================================================================

pub fn load_viewpoints(path: &Path) -> std::io::Result<GrowableArray<Viewpoint>> {
    let bytes = std::fs::read(path)?;
    let record = std::mem::size_of::<Viewpoint>();
    if bytes.len() % record != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} bytes is not a whole number of {record}-byte viewpoints", bytes.len()),
        ));
    }
    Ok(GrowableArray::from_vec(bytemuck::pod_collect_to_vec(&bytes)))
}

pub fn save_viewpoints(path: &Path, viewpoints: &GrowableArray<Viewpoint>) -> std::io::Result<()> {
    std::fs::write(path, bytemuck::cast_slice::<Viewpoint, u8>(viewpoints.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_looks_at_the_center() {
        let center = Vec3::new(1.0, 2.0, 3.0);
        let camera = OrbitCamera::framing(center, 2.0);
        assert_eq!(camera.target(), center);
        assert!((camera.eye_position().distance(center) - camera.distance()).abs() < 1e-4);

        let clip = camera.view_projection(1.0) * center.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..1.0).contains(&ndc.z));
    }

    #[test]
    fn viewpoint_restores_placement() {
        let mut camera = OrbitCamera::framing(Vec3::ZERO, 1.0);
        camera.yaw = 1.0;
        camera.pitch = -0.5;
        let saved = camera.viewpoint();

        camera.yaw = 3.0;
        camera.pitch = 0.7;
        camera.set_viewpoint(&saved);
        assert_eq!(camera.viewpoint(), saved);
    }

    #[test]
    fn set_viewpoint_clamps() {
        let mut camera = OrbitCamera::framing(Vec3::ZERO, 1.0);
        camera.set_viewpoint(&Viewpoint {
            target: [0.0; 3],
            yaw: 0.0,
            pitch: 10.0,
            distance: 1e6,
        });
        assert!(camera.pitch <= MAX_PITCH);
        assert_eq!(camera.distance(), camera.max_distance);
    }

    #[test]
    fn viewpoint_file_round_trip() {
        let path = std::env::temp_dir().join(format!("ptex_methods_viewpoints_{}.bin", std::process::id()));
        let mut list = GrowableArray::with_capacity(2);
        list.add(Viewpoint { target: [0.0, 1.0, 2.0], yaw: 0.5, pitch: 0.25, distance: 4.0 });
        list.add(Viewpoint { target: [3.0, 4.0, 5.0], yaw: 1.5, pitch: -0.25, distance: 8.0 });

        save_viewpoints(&path, &list).unwrap();
        let loaded = load_viewpoints(&path).unwrap();
        assert_eq!(loaded.as_slice(), list.as_slice());

        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(load_viewpoints(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
