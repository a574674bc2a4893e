// src/sim.rs - Headless driver that plays a session without a person
use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::config::{HandTrackingConfig, SimConfig};
use crate::interaction::InteractionMode;
use crate::keyboard::KeyState;
use crate::provider::FrameSender;
use crate::tracking::{Chirality, LengthUnit, RawHand, TrackingFrame};

/// Seconds of velocity subtracted from the aim point, damps overshoot.
const AIM_LEAD: f64 = 0.5;
const KEY_DEADBAND: f64 = 0.1;
/// Carry speed of the pinching palm, m/s.
const CARRY_SPEED: f64 = 2.0;
/// Palm sits this far above the ball while grabbing.
const GRAB_HEIGHT: f64 = 0.1;

/// What the autopilot can see each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub now: f64,
    pub dt: f64,
    pub mode: InteractionMode,
    /// Index and position of the active collectible.
    pub target: Option<(usize, Vector3<f64>)>,
    pub ball_position: Vector3<f64>,
    pub ball_velocity: Vector3<f64>,
    pub pinched: bool,
}

pub struct Autopilot {
    config: SimConfig,
    pinching_hand: Chirality,
    pointing_hand: Chirality,
    /// None when hand tracking is fed from elsewhere, such as a replay.
    sender: Option<FrameSender>,
    frame: u64,
    carry_palm: Option<Vector3<f64>>,
    sender_lost: bool,
}

impl Autopilot {
    pub fn new(config: SimConfig, hand: &HandTrackingConfig, sender: Option<FrameSender>) -> Self {
        Self {
            config,
            pinching_hand: hand.pinching_hand,
            pointing_hand: hand.pointing_hand(),
            sender,
            frame: 0,
            carry_palm: None,
            sender_lost: false,
        }
    }

    /// Keys to hold this tick. In hand tracking mode a frame is sent instead,
    /// when there is a sender.
    pub fn drive(&mut self, obs: &Observation) -> KeyState {
        self.frame += 1;
        match obs.mode {
            InteractionMode::None => {
                self.carry_palm = None;
                KeyState::default()
            }
            InteractionMode::Keyboard => {
                self.carry_palm = None;
                obs.target
                    .map(|(_, target)| keys_toward(target, obs.ball_position, obs.ball_velocity))
                    .unwrap_or_default()
            }
            InteractionMode::HandTracking => {
                if self.sender.is_some() {
                    let frame = self.hand_frame(obs);
                    let delivered = self.sender.as_ref().is_some_and(|sender| sender.send(frame));
                    if !delivered && !self.sender_lost {
                        warn!("Tracking provider dropped, synthetic frames are discarded");
                        self.sender_lost = true;
                    }
                }
                KeyState::default()
            }
        }
    }

    pub fn in_dropout(&self) -> bool {
        let every = self.config.dropout_every_frames as u64;
        every > 0 && self.frame % every < self.config.dropout_length_frames as u64
    }

    fn hand_frame(&mut self, obs: &Observation) -> TrackingFrame {
        let mut frame = TrackingFrame {
            timestamp: obs.now,
            hands: Vec::new(),
        };
        if self.in_dropout() {
            return frame;
        }
        let Some((index, target)) = obs.target else {
            return frame;
        };

        let carry = self.config.pinch_carry && index % 2 == 1;
        if carry {
            let palm = match (obs.pinched, self.carry_palm) {
                (true, Some(palm)) => {
                    let goal = target + Vector3::new(0.0, GRAB_HEIGHT, 0.0);
                    let step = goal - palm;
                    let max_step = CARRY_SPEED * obs.dt;
                    if step.norm() > max_step {
                        palm + step.normalize() * max_step
                    } else {
                        goal
                    }
                }
                _ => obs.ball_position + Vector3::new(0.0, GRAB_HEIGHT, 0.0),
            };
            self.carry_palm = Some(palm);
            frame.hands.push(synthetic_hand(self.pinching_hand, palm, Some(1.0)));
            return frame;
        }

        if obs.pinched {
            // Open the hand over the drop point
            let palm = self.carry_palm.unwrap_or(obs.ball_position);
            frame.hands.push(synthetic_hand(self.pinching_hand, palm, Some(0.0)));
            debug!("Autopilot releasing carried ball");
        }
        self.carry_palm = None;

        let aim = target - obs.ball_velocity * AIM_LEAD;
        frame.hands.push(synthetic_hand(self.pointing_hand, aim, None));
        frame
    }
}

/// Bang-bang key choice with a velocity lead so the ball settles on target.
pub fn keys_toward(target: Vector3<f64>, ball: Vector3<f64>, velocity: Vector3<f64>) -> KeyState {
    let steer = (target - ball) - velocity * AIM_LEAD;
    KeyState {
        up: steer.z > KEY_DEADBAND,
        down: steer.z < -KEY_DEADBAND,
        left: steer.x < -KEY_DEADBAND,
        right: steer.x > KEY_DEADBAND,
    }
}

/// Hand with palm and index tip at `position`, reported in millimeters.
fn synthetic_hand(chirality: Chirality, position: Vector3<f64>, pinch_strength: Option<f64>) -> RawHand {
    let mm = [position.x * 1000.0, position.y * 1000.0, position.z * 1000.0];
    let mut hand = RawHand::new(chirality);
    hand.unit = LengthUnit::Millimeters;
    hand.palm = Some(mm);
    hand.index_tip = Some(mm);
    hand.pinch_strength = pinch_strength;
    hand
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{frame_channel, TrackingProvider};
    use crate::tracking::FrameHands;

    fn make_obs(mode: InteractionMode, target: Vector3<f64>) -> Observation {
        Observation {
            now: 1.0,
            dt: 1.0 / 60.0,
            mode,
            target: Some((0, target)),
            ball_position: Vector3::new(0.0, 0.5, 0.0),
            ball_velocity: Vector3::zeros(),
            pinched: false,
        }
    }

    fn no_dropouts() -> SimConfig {
        SimConfig {
            dropout_every_frames: 0,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_keys_point_at_target() {
        let keys = keys_toward(Vector3::new(2.0, 0.5, -3.0), Vector3::new(0.0, 0.5, 0.0), Vector3::zeros());
        assert_eq!(
            keys,
            KeyState { up: false, down: true, left: false, right: true }
        );

        // Fast approach brakes before arriving
        let keys = keys_toward(Vector3::new(1.0, 0.5, 0.0), Vector3::zeros(), Vector3::new(6.0, 0.0, 0.0));
        assert!(keys.left);
    }

    #[test]
    fn test_hand_frames_are_millimeters() {
        let (tx, mut provider) = frame_channel("sim");
        let mut pilot = Autopilot::new(no_dropouts(), &HandTrackingConfig::default(), Some(tx));

        let target = Vector3::new(1.5, 0.5, 2.0);
        let keys = pilot.drive(&make_obs(InteractionMode::HandTracking, target));
        assert_eq!(keys, KeyState::default());

        let frame = provider.poll_frame().unwrap();
        assert_eq!(frame.hands[0].palm, Some([1500.0, 500.0, 2000.0]));
        let hands = FrameHands::from_frame(&frame);
        let right = hands.get(Chirality::Right).unwrap();
        assert!((right.index_tip_position - target).norm() < 1e-9);
        assert!(hands.get(Chirality::Left).is_none());
    }

    #[test]
    fn test_dropouts_send_empty_frames() {
        let (tx, mut provider) = frame_channel("sim");
        let config = SimConfig {
            dropout_every_frames: 10,
            dropout_length_frames: 3,
            ..SimConfig::default()
        };
        let mut pilot = Autopilot::new(config, &HandTrackingConfig::default(), Some(tx));
        let obs = make_obs(InteractionMode::HandTracking, Vector3::new(1.0, 0.5, 1.0));

        let mut empty = 0;
        for _ in 0..20 {
            pilot.drive(&obs);
            if provider.poll_frame().unwrap().hands.is_empty() {
                empty += 1;
            }
        }
        assert_eq!(empty, 6);
    }

    #[test]
    fn test_odd_collectibles_are_carried() {
        let (tx, mut provider) = frame_channel("sim");
        let mut pilot = Autopilot::new(no_dropouts(), &HandTrackingConfig::default(), Some(tx));
        let mut obs = make_obs(InteractionMode::HandTracking, Vector3::new(3.0, 0.5, 0.0));
        obs.target = Some((1, Vector3::new(3.0, 0.5, 0.0)));

        // Grab above the ball
        pilot.drive(&obs);
        let frame = provider.poll_frame().unwrap();
        let left = &frame.hands[0];
        assert_eq!(left.chirality, Chirality::Left);
        assert_eq!(left.pinch_strength, Some(1.0));
        let palm = left.palm.unwrap();
        assert!((palm[1] - 600.0).abs() < 1e-9);

        // Carry at bounded speed
        obs.pinched = true;
        pilot.drive(&obs);
        let frame = provider.poll_frame().unwrap();
        let carried = frame.hands[0].palm.unwrap();
        assert!((carried[0] - CARRY_SPEED * obs.dt * 1000.0).abs() < 1e-6);

        // Next collectible is pointed at, so the hand opens first
        obs.target = Some((2, Vector3::new(-3.0, 0.5, 0.0)));
        pilot.drive(&obs);
        let frame = provider.poll_frame().unwrap();
        assert_eq!(frame.hands.len(), 2);
        assert_eq!(frame.hands[0].pinch_strength, Some(0.0));
        assert_eq!(frame.hands[1].chirality, Chirality::Right);
    }

    #[test]
    fn test_keyboard_phase_sends_no_frames() {
        let (tx, mut provider) = frame_channel("sim");
        let mut pilot = Autopilot::new(no_dropouts(), &HandTrackingConfig::default(), Some(tx));
        let keys = pilot.drive(&make_obs(InteractionMode::Keyboard, Vector3::new(-2.0, 0.5, 0.0)));
        assert!(keys.left);
        assert!(provider.poll_frame().is_none());
    }

    #[test]
    fn test_without_sender_no_frames_are_built() {
        let mut pilot = Autopilot::new(no_dropouts(), &HandTrackingConfig::default(), None);
        let mut obs = make_obs(InteractionMode::HandTracking, Vector3::new(3.0, 0.5, 0.0));
        obs.target = Some((1, Vector3::new(3.0, 0.5, 0.0)));

        for _ in 0..5 {
            assert_eq!(pilot.drive(&obs), KeyState::default());
        }
        assert!(pilot.carry_palm.is_none());
        assert!(!pilot.sender_lost);
    }
}
