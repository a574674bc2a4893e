// src/pointing.rs - Fingertip steering for the pointing hand
use nalgebra::Vector3;
use tracing::debug;

use crate::ball::{BallActuator, ForceMode};
use crate::config::HandTrackingConfig;
use crate::tracking::HandSample;

#[derive(Debug, Clone, PartialEq)]
pub struct PointingState {
    pub present_frame_count: u32,
    pub lost_frame_count: u32,
    pub previous_tip_position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub has_valid_position: bool,
}

impl PointingState {
    fn new() -> Self {
        Self {
            present_frame_count: 0,
            lost_frame_count: 0,
            previous_tip_position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            has_valid_position: false,
        }
    }
}

/// What one pointing frame did to the ball.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointingAction {
    /// Hand seen, not yet for enough consecutive frames.
    Debouncing,
    /// Steering impulse applied, before the `dt` scaling.
    Steered { force: Vector3<f64> },
    /// Hand missing, still within tolerance.
    Waiting,
    Coasting,
    Stopped,
}

pub struct PointingController {
    config: HandTrackingConfig,
    state: PointingState,
}

impl PointingController {
    pub fn new(config: HandTrackingConfig) -> Self {
        Self {
            config,
            state: PointingState::new(),
        }
    }

    pub fn state(&self) -> &PointingState {
        &self.state
    }

    /// Distance-proportional pull toward the fingertip, capped at `max_force`.
    pub fn steering_force(&self, direction: Vector3<f64>) -> Vector3<f64> {
        let distance = direction.norm();
        if distance <= f64::EPSILON {
            return Vector3::zeros();
        }
        let magnitude = (distance * self.config.move_force).min(self.config.max_force);
        direction / distance * magnitude
    }

    pub fn update(
        &mut self,
        hand: Option<&HandSample>,
        ball: &mut dyn BallActuator,
        dt: f64,
    ) -> PointingAction {
        let Some(hand) = hand else {
            return self.on_absent(ball);
        };

        self.state.present_frame_count += 1;
        self.state.lost_frame_count = 0;

        let tip = hand.index_tip_position;
        self.state.velocity = if self.state.has_valid_position && dt > 0.0 {
            (tip - self.state.previous_tip_position) / dt
        } else {
            Vector3::zeros()
        };
        self.state.has_valid_position = true;
        self.state.previous_tip_position = tip;

        if self.state.present_frame_count < self.config.required_present_frames {
            return PointingAction::Debouncing;
        }

        let force = self.steering_force(tip - ball.position());
        ball.apply_force(force * dt, ForceMode::VelocityChange);

        let hand_velocity = self.state.velocity;
        if hand_velocity.norm() > self.config.drag_speed_threshold {
            let mut drag = hand_velocity * self.config.move_force * self.config.drag_gain * dt;
            // Drag may push down or sideways, never lift
            drag.y = drag.y.min(0.0);
            ball.apply_force(drag, ForceMode::VelocityChange);
        }

        PointingAction::Steered { force }
    }

    fn on_absent(&mut self, ball: &mut dyn BallActuator) -> PointingAction {
        self.state.present_frame_count = 0;
        self.state.lost_frame_count += 1;
        self.state.has_valid_position = false;
        self.state.velocity = Vector3::zeros();

        if self.state.lost_frame_count < self.config.pointing_lost_frames_tolerance {
            return PointingAction::Waiting;
        }

        ball.slow_down(self.config.slowdown_rate);
        if ball.velocity().norm() < self.config.stop_speed_epsilon {
            if ball.velocity() != Vector3::zeros() {
                debug!("Pointing hand gone, ball stopped");
            }
            ball.stop();
            return PointingAction::Stopped;
        }
        PointingAction::Coasting
    }
}
