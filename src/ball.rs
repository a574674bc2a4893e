// src/ball.rs - Physics body seen from the controllers
use nalgebra::Vector3;

use crate::config::BallConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    /// Continuous force, integrated over the next step.
    Force,
    /// Immediate change of velocity, mass ignored.
    VelocityChange,
}

/// The rigid body the interaction handlers steer.
///
/// Collision and integration live behind this trait. Forces sent while the
/// body is kinematic are dropped.
pub trait BallActuator {
    fn position(&self) -> Vector3<f64>;
    fn velocity(&self) -> Vector3<f64>;
    fn angular_velocity(&self) -> Vector3<f64>;
    fn is_kinematic(&self) -> bool;

    fn apply_force(&mut self, force: Vector3<f64>, mode: ForceMode);
    fn set_kinematic(&mut self, kinematic: bool);
    /// Zero linear and angular velocity.
    fn stop(&mut self);
    /// Scale linear and angular velocity by `rate`.
    fn slow_down(&mut self, rate: f64);
    /// First-order smoothing toward `target`: `alpha = 1 - exp(-smoothness * dt)`.
    fn move_to(&mut self, target: Vector3<f64>, smoothness: f64, dt: f64);
    fn teleport(&mut self, position: Vector3<f64>);
}

pub fn smoothing_alpha(smoothness: f64, dt: f64) -> f64 {
    if dt <= 0.0 || smoothness <= 0.0 {
        return 0.0;
    }
    1.0 - (-smoothness * dt).exp()
}

/// Point-mass ball on a floor plane at y = 0.
#[derive(Debug, Clone)]
pub struct SimBall {
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    angular_velocity: Vector3<f64>,
    pending_force: Vector3<f64>,
    kinematic: bool,
    radius: f64,
    mass: f64,
    gravity: f64,
    linear_damping: f64,
}

impl SimBall {
    pub fn new(config: &BallConfig) -> Self {
        Self {
            position: Vector3::from(config.spawn),
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            pending_force: Vector3::zeros(),
            kinematic: false,
            radius: config.radius,
            mass: config.mass,
            gravity: config.gravity,
            linear_damping: config.linear_damping,
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Advance one physics step.
    pub fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        if self.kinematic {
            self.pending_force = Vector3::zeros();
            return;
        }

        let acceleration = self.pending_force / self.mass + Vector3::new(0.0, self.gravity, 0.0);
        self.pending_force = Vector3::zeros();

        self.velocity += acceleration * dt;
        self.velocity *= (1.0 - self.linear_damping * dt).clamp(0.0, 1.0);
        self.position += self.velocity * dt;

        // Resting contact with the floor
        if self.position.y < self.radius {
            self.position.y = self.radius;
            if self.velocity.y < 0.0 {
                self.velocity.y = 0.0;
            }
        }

        // Rolling without slipping
        let planar = Vector3::new(self.velocity.x, 0.0, self.velocity.z);
        self.angular_velocity = Vector3::y().cross(&planar) / self.radius;
    }
}

impl BallActuator for SimBall {
    fn position(&self) -> Vector3<f64> {
        self.position
    }

    fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }

    fn angular_velocity(&self) -> Vector3<f64> {
        self.angular_velocity
    }

    fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    fn apply_force(&mut self, force: Vector3<f64>, mode: ForceMode) {
        if self.kinematic {
            return;
        }
        match mode {
            ForceMode::Force => self.pending_force += force,
            ForceMode::VelocityChange => self.velocity += force,
        }
    }

    fn set_kinematic(&mut self, kinematic: bool) {
        self.kinematic = kinematic;
        if kinematic {
            self.pending_force = Vector3::zeros();
        }
    }

    fn stop(&mut self) {
        self.velocity = Vector3::zeros();
        self.angular_velocity = Vector3::zeros();
    }

    fn slow_down(&mut self, rate: f64) {
        self.velocity *= rate;
        self.angular_velocity *= rate;
    }

    fn move_to(&mut self, target: Vector3<f64>, smoothness: f64, dt: f64) {
        let alpha = smoothing_alpha(smoothness, dt);
        self.position += (target - self.position) * alpha;
    }

    fn teleport(&mut self, position: Vector3<f64>) {
        self.position = position;
        self.pending_force = Vector3::zeros();
    }
}
