// src/gesture.rs - Pinch recognizer for the pickup hand
//
// Idle -> Pinched when the hand closes near the ball, Pinched -> Idle on an
// opened hand, a hand pulled too far away, or a hand that stays lost.
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::ball::BallActuator;
use crate::config::HandTrackingConfig;
use crate::tracking::{Chirality, HandSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinchPhase {
    Idle,
    Pinched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Pinch strength fell below the release threshold.
    Opened,
    /// Distance-only mode: hand moved past the release distance.
    PulledAway,
    /// Hand missing for longer than the lost-frame tolerance.
    HandLost,
    /// Mode exit.
    Forced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureEvent {
    PinchStarted {
        hand: Chirality,
        offset: Vector3<f64>,
        time: f64,
    },
    PinchReleased {
        hand: Chirality,
        reason: ReleaseReason,
        time: f64,
    },
}

/// Post-release window during which pointing stays off.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReleaseGrace {
    pub just_released: bool,
    pub release_timestamp: f64,
}

impl ReleaseGrace {
    pub fn mark(&mut self, now: f64) {
        self.just_released = true;
        self.release_timestamp = now;
    }

    pub fn is_active(&self, now: f64, grace_period: f64) -> bool {
        self.just_released && now - self.release_timestamp < grace_period
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GestureState {
    pub phase: PinchPhase,
    pub active_hand: Option<Chirality>,
    pub pinch_offset: Vector3<f64>,
    pub last_known_palm_position: Vector3<f64>,
    pub lost_frame_count: u32,
}

impl GestureState {
    fn new() -> Self {
        Self {
            phase: PinchPhase::Idle,
            active_hand: None,
            pinch_offset: Vector3::zeros(),
            last_known_palm_position: Vector3::zeros(),
            lost_frame_count: 0,
        }
    }
}

pub struct PinchClassifier {
    config: HandTrackingConfig,
    state: GestureState,
    grace: ReleaseGrace,
}

impl PinchClassifier {
    pub fn new(config: HandTrackingConfig) -> Self {
        Self {
            config,
            state: GestureState::new(),
            grace: ReleaseGrace::default(),
        }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn is_pinched(&self) -> bool {
        self.state.phase == PinchPhase::Pinched
    }

    pub fn in_grace(&self, now: f64) -> bool {
        self.grace.is_active(now, self.config.release_grace_period)
    }

    /// Run one frame for the pinching hand. `hand` is `None` when the hand
    /// is absent or its pose could not be resolved.
    pub fn update(
        &mut self,
        hand: Option<&HandSample>,
        ball: &mut dyn BallActuator,
        now: f64,
        dt: f64,
    ) -> Option<GestureEvent> {
        match self.state.phase {
            PinchPhase::Idle => {
                self.state.lost_frame_count = 0;
                hand.and_then(|h| self.try_start(h, ball, now))
            }
            PinchPhase::Pinched => match hand {
                None => self.hold_while_lost(ball, now, dt),
                Some(h) => self.follow(h, ball, now, dt),
            },
        }
    }

    fn try_start(
        &mut self,
        hand: &HandSample,
        ball: &mut dyn BallActuator,
        now: f64,
    ) -> Option<GestureEvent> {
        let palm = hand.palm_position;
        let dist = (ball.position() - palm).norm();
        let within_reach = dist <= self.config.pinch_distance;

        let start = match hand.pinch_strength {
            Some(strength) => strength > self.config.pinch_threshold && within_reach,
            None => within_reach,
        };
        if !start {
            return None;
        }

        let offset = ball.position() - palm;
        self.state = GestureState {
            phase: PinchPhase::Pinched,
            active_hand: Some(hand.chirality),
            pinch_offset: offset,
            last_known_palm_position: palm,
            lost_frame_count: 0,
        };
        ball.set_kinematic(true);
        info!("Pinch started by {} hand at distance {:.3}", hand.chirality.as_str(), dist);

        Some(GestureEvent::PinchStarted {
            hand: hand.chirality,
            offset,
            time: now,
        })
    }

    fn hold_while_lost(
        &mut self,
        ball: &mut dyn BallActuator,
        now: f64,
        dt: f64,
    ) -> Option<GestureEvent> {
        self.state.lost_frame_count += 1;
        debug!("Pinching hand lost for {} frames", self.state.lost_frame_count);

        if self.state.lost_frame_count >= self.config.hand_lost_frames_tolerance {
            info!("Pinching hand lost for too long, releasing pinch");
            return self.release(ball, now, ReleaseReason::HandLost);
        }

        // Hold at the last known pose, with softer smoothing
        let target = self.state.last_known_palm_position + self.state.pinch_offset;
        ball.move_to(target, self.config.follow_smoothness * 0.5, dt);
        None
    }

    fn follow(
        &mut self,
        hand: &HandSample,
        ball: &mut dyn BallActuator,
        now: f64,
        dt: f64,
    ) -> Option<GestureEvent> {
        self.state.lost_frame_count = 0;
        self.state.active_hand = Some(hand.chirality);

        let palm = hand.palm_position;
        let release = match hand.pinch_strength {
            Some(strength) => {
                (strength < self.config.pinch_release_threshold).then_some(ReleaseReason::Opened)
            }
            None => {
                let limit = self.config.pinch_distance * self.config.release_distance_factor;
                ((ball.position() - palm).norm() > limit).then_some(ReleaseReason::PulledAway)
            }
        };
        if let Some(reason) = release {
            return self.release(ball, now, reason);
        }

        self.state.last_known_palm_position = palm;
        let target = palm + self.state.pinch_offset;
        ball.move_to(target, self.config.follow_smoothness, dt);
        None
    }

    /// Drop the ball. Does nothing when idle.
    pub fn release(
        &mut self,
        ball: &mut dyn BallActuator,
        now: f64,
        reason: ReleaseReason,
    ) -> Option<GestureEvent> {
        if self.state.phase != PinchPhase::Pinched {
            return None;
        }
        let hand = self.state.active_hand.unwrap_or(self.config.pinching_hand);

        self.state = GestureState::new();
        self.grace.mark(now);
        ball.set_kinematic(false);
        ball.stop();
        info!("Ball released ({:?})", reason);

        Some(GestureEvent::PinchReleased {
            hand,
            reason,
            time: now,
        })
    }
}
