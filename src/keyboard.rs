// src/keyboard.rs
use nalgebra::Vector3;

use crate::ball::{BallActuator, ForceMode};
use crate::config::KeyboardConfig;

/// Directional keys held this frame (WASD or arrows).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl KeyState {
    /// Planar input on x/z, at most unit length so diagonals are not faster.
    pub fn direction(&self) -> Vector3<f64> {
        let mut input = Vector3::zeros();
        if self.up {
            input.z += 1.0;
        }
        if self.down {
            input.z -= 1.0;
        }
        if self.left {
            input.x -= 1.0;
        }
        if self.right {
            input.x += 1.0;
        }

        if input.norm() > 1.0 {
            input.normalize_mut();
        }
        input
    }
}

pub struct KeyboardController {
    config: KeyboardConfig,
}

impl KeyboardController {
    pub fn new(config: KeyboardConfig) -> Self {
        Self { config }
    }

    /// Push the ball along the held direction unless it is already at the
    /// speed cap. Returns the force applied, if any.
    pub fn update(&self, keys: KeyState, ball: &mut dyn BallActuator) -> Option<Vector3<f64>> {
        let input = keys.direction();
        if input == Vector3::zeros() {
            return None;
        }

        let velocity = ball.velocity();
        let planar_speed = Vector3::new(velocity.x, 0.0, velocity.z).norm();
        if planar_speed >= self.config.max_speed {
            return None;
        }

        let force = input * self.config.move_force;
        ball.apply_force(force, ForceMode::Force);
        Some(force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::SimBall;
    use crate::config::BallConfig;

    fn make_ball() -> SimBall {
        SimBall::new(&BallConfig {
            gravity: 0.0,
            linear_damping: 0.0,
            ..BallConfig::default()
        })
    }

    #[test]
    fn test_diagonal_matches_axial_magnitude() {
        let controller = KeyboardController::new(KeyboardConfig::default());
        let mut ball = make_ball();

        let axial = controller
            .update(KeyState { up: true, ..Default::default() }, &mut ball)
            .unwrap();
        let diagonal = controller
            .update(KeyState { up: true, right: true, ..Default::default() }, &mut ball)
            .unwrap();

        assert!((axial.norm() - diagonal.norm()).abs() < 1e-12);
        assert!(diagonal.x > 0.0 && diagonal.z > 0.0);
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let controller = KeyboardController::new(KeyboardConfig::default());
        let mut ball = make_ball();
        let keys = KeyState { left: true, right: true, ..Default::default() };
        assert!(controller.update(keys, &mut ball).is_none());
    }

    #[test]
    fn test_speed_cap_blocks_force() {
        let config = KeyboardConfig::default();
        let cap = config.max_speed;
        let controller = KeyboardController::new(config);
        let mut ball = make_ball();

        ball.apply_force(Vector3::new(cap, 0.0, 0.0), ForceMode::VelocityChange);
        assert!(controller.update(KeyState { right: true, ..Default::default() }, &mut ball).is_none());

        // Vertical speed does not count toward the cap
        ball.stop();
        ball.apply_force(Vector3::new(0.0, cap * 2.0, 0.0), ForceMode::VelocityChange);
        assert!(controller.update(KeyState { right: true, ..Default::default() }, &mut ball).is_some());
    }

    #[test]
    fn test_held_key_accelerates_ball() {
        let controller = KeyboardController::new(KeyboardConfig::default());
        let mut ball = make_ball();
        for _ in 0..30 {
            controller.update(KeyState { down: true, ..Default::default() }, &mut ball);
            ball.step(1.0 / 60.0);
        }
        assert!(ball.velocity().z < 0.0);
        assert_eq!(ball.velocity().x, 0.0);
    }
}
