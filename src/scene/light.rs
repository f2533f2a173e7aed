//! Light types for the scene

use glam::Vec3;

/// Directional light (like the sun), the only shadow-casting light
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    /// Direction the light travels in
    pub direction: Vec3,
    /// Up vector of the light's projector basis
    pub up: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::new(Vec3::new(-0.5, -1.0, -0.5), Vec3::ONE, 1.0)
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        let direction = direction.normalize();
        Self {
            direction,
            up: projector_up(direction),
            color,
            intensity,
        }
    }

    /// Point the light somewhere else, keeping the projector basis valid.
    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction.normalize();
        self.up = projector_up(self.direction);
    }
}

/// World up, unless the light is close to vertical
fn projector_up(direction: Vec3) -> Vec3 {
    if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_is_normalized() {
        let light = DirectionalLight::new(Vec3::new(0.0, -3.0, 4.0), Vec3::ONE, 2.0);
        assert!((light.direction.length() - 1.0).abs() < 1e-6);
        assert_eq!(light.up, Vec3::Y);
    }

    #[test]
    fn test_vertical_light_picks_another_up() {
        let mut light = DirectionalLight::default();
        light.set_direction(-Vec3::Y);
        assert_eq!(light.up, Vec3::Z);
    }
}
