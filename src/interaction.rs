// src/interaction.rs - Interaction mode state machine
//
// Exactly one handler is installed at a time and only that handler sees
// per-tick updates. Switching modes exits the old handler, enters a fresh
// one, and always stops the ball.
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::ball::BallActuator;
use crate::config::{Config, HandTrackingConfig};
use crate::error::TrackingError;
use crate::gesture::{GestureEvent, PinchClassifier, ReleaseReason};
use crate::keyboard::{KeyState, KeyboardController};
use crate::pointing::PointingController;
use crate::provider::ProviderSlot;
use crate::tracking::FrameHands;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    None,
    Keyboard,
    HandTracking,
}

impl InteractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Keyboard => "keyboard",
            Self::HandTracking => "hand_tracking",
        }
    }
}

/// Per-tick input handed to the installed handler.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInput {
    /// Seconds since the session clock started.
    pub now: f64,
    pub dt: f64,
    pub keys: KeyState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    Unchanged,
    Switched {
        from: InteractionMode,
        to: InteractionMode,
    },
}

/// What the session sequencer needs from the ball controller.
pub trait InteractionSurface {
    fn set_interaction_mode(&mut self, mode: InteractionMode) -> ModeChange;
    fn interaction_mode(&self) -> InteractionMode;
    fn update(&mut self, input: &FrameInput);
    /// Drop anything held, stop, and put the ball at `position`.
    fn reset_ball(&mut self, position: Vector3<f64>);
    fn ball_position(&self) -> Vector3<f64>;
    /// Gesture events since the previous call.
    fn drain_events(&mut self) -> Vec<GestureEvent>;
}

struct HandTrackingHandler {
    config: HandTrackingConfig,
    pinch: PinchClassifier,
    pointing: PointingController,
}

impl HandTrackingHandler {
    fn new(config: &HandTrackingConfig) -> Self {
        Self {
            config: config.clone(),
            pinch: PinchClassifier::new(config.clone()),
            pointing: PointingController::new(config.clone()),
        }
    }

    /// Pinch first, then pointing unless the ball is held or just dropped.
    fn on_frame(
        &mut self,
        hands: &FrameHands,
        ball: &mut dyn BallActuator,
        now: f64,
        dt: f64,
    ) -> Option<GestureEvent> {
        let event = self
            .pinch
            .update(hands.get(self.config.pinching_hand), ball, now, dt);

        if !self.pinch.is_pinched() && !self.pinch.in_grace(now) {
            self.pointing.update(hands.get(self.config.pointing_hand()), ball, dt);
        }
        event
    }
}

enum ActiveHandler {
    Inert,
    Keyboard(KeyboardController),
    HandTracking(HandTrackingHandler),
}

impl ActiveHandler {
    fn for_mode(mode: InteractionMode, config: &Config) -> Self {
        match mode {
            InteractionMode::None => Self::Inert,
            InteractionMode::Keyboard => Self::Keyboard(KeyboardController::new(config.keyboard.clone())),
            InteractionMode::HandTracking => Self::HandTracking(HandTrackingHandler::new(&config.hand)),
        }
    }
}

pub struct BallController<A: BallActuator> {
    ball: A,
    provider: ProviderSlot,
    config: Config,
    mode: InteractionMode,
    handler: ActiveHandler,
    provider_status: Option<TrackingError>,
    events: Vec<GestureEvent>,
    clock: f64,
}

impl<A: BallActuator> BallController<A> {
    pub fn new(ball: A, provider: ProviderSlot, config: Config) -> Self {
        Self {
            ball,
            provider,
            config,
            mode: InteractionMode::None,
            handler: ActiveHandler::Inert,
            provider_status: None,
            events: Vec::new(),
            clock: 0.0,
        }
    }

    pub fn ball(&self) -> &A {
        &self.ball
    }

    pub fn ball_mut(&mut self) -> &mut A {
        &mut self.ball
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.mode
    }

    /// Last provider failure seen in hand-tracking mode, cleared on success.
    pub fn provider_status(&self) -> Option<&TrackingError> {
        self.provider_status.as_ref()
    }

    pub fn is_pinched(&self) -> bool {
        matches!(&self.handler, ActiveHandler::HandTracking(h) if h.pinch.is_pinched())
    }

    pub fn drain_events(&mut self) -> Vec<GestureEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn set_interaction_mode(&mut self, mode: InteractionMode) -> ModeChange {
        if mode == self.mode {
            return ModeChange::Unchanged;
        }
        let from = self.mode;

        self.exit_current();

        self.mode = mode;
        self.handler = ActiveHandler::for_mode(mode, &self.config);
        self.enter_current();

        self.ball.stop();
        info!("Interaction mode set to {} (was {})", mode.as_str(), from.as_str());
        ModeChange::Switched { from, to: mode }
    }

    fn exit_current(&mut self) {
        if let ActiveHandler::HandTracking(handler) = &mut self.handler {
            if let Some(event) = handler.pinch.release(&mut self.ball, self.clock, ReleaseReason::Forced) {
                self.events.push(event);
            }
            debug!("Detached from tracking feed");
        }
    }

    fn enter_current(&mut self) {
        match &mut self.handler {
            ActiveHandler::Inert => {}
            ActiveHandler::Keyboard(_) => {}
            ActiveHandler::HandTracking(_) => {
                match self.provider.ensure_resolved() {
                    Ok(()) => {
                        self.provider_status = None;
                        // Only frames from now on
                        self.provider.discard_pending();
                        debug!(
                            "Attached to tracking feed {}",
                            self.provider.provider_name().unwrap_or("?")
                        );
                    }
                    Err(e) => {
                        error!("Hand tracking will not work until a provider is available: {}", e);
                        self.provider_status = Some(e);
                    }
                }
            }
        }
    }

    pub fn update(&mut self, input: &FrameInput) {
        self.clock = input.now;

        match &mut self.handler {
            ActiveHandler::Inert => {}
            ActiveHandler::Keyboard(keyboard) => {
                keyboard.update(input.keys, &mut self.ball);
            }
            ActiveHandler::HandTracking(handler) => {
                let frame = match self.provider.poll_frame() {
                    Ok(frame) => {
                        if self.provider_status.take().is_some() {
                            info!("Tracking provider resolved, hand tracking active");
                        }
                        frame
                    }
                    Err(e) => {
                        self.provider_status = Some(e);
                        return;
                    }
                };
                let Some(frame) = frame else {
                    return;
                };

                let hands = FrameHands::from_frame(&frame);
                if let Some(event) = handler.on_frame(&hands, &mut self.ball, input.now, input.dt) {
                    self.events.push(event);
                }
            }
        }
    }

    pub fn reset_ball(&mut self, position: Vector3<f64>) {
        if let ActiveHandler::HandTracking(handler) = &mut self.handler {
            if let Some(event) = handler.pinch.release(&mut self.ball, self.clock, ReleaseReason::Forced) {
                self.events.push(event);
            }
        }
        self.ball.stop();
        self.ball.teleport(position);
    }
}

impl<A: BallActuator> InteractionSurface for BallController<A> {
    fn set_interaction_mode(&mut self, mode: InteractionMode) -> ModeChange {
        BallController::set_interaction_mode(self, mode)
    }

    fn interaction_mode(&self) -> InteractionMode {
        self.mode
    }

    fn update(&mut self, input: &FrameInput) {
        BallController::update(self, input)
    }

    fn reset_ball(&mut self, position: Vector3<f64>) {
        BallController::reset_ball(self, position)
    }

    fn ball_position(&self) -> Vector3<f64> {
        self.ball.position()
    }

    fn drain_events(&mut self) -> Vec<GestureEvent> {
        BallController::drain_events(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::{ForceMode, SimBall};
    use crate::config::BallConfig;
    use crate::provider::{frame_channel, FrameSender, TrackingProvider};
    use crate::tracking::{Chirality, RawHand, TrackingFrame};

    const DT: f64 = 1.0 / 60.0;

    /// SimBall that counts the calls the state machine makes.
    struct CountingBall {
        inner: SimBall,
        stops: u32,
        kinematic_sets: u32,
    }

    impl CountingBall {
        fn new() -> Self {
            Self {
                inner: SimBall::new(&BallConfig {
                    gravity: 0.0,
                    linear_damping: 0.0,
                    ..BallConfig::default()
                }),
                stops: 0,
                kinematic_sets: 0,
            }
        }
    }

    impl BallActuator for CountingBall {
        fn position(&self) -> Vector3<f64> {
            self.inner.position()
        }
        fn velocity(&self) -> Vector3<f64> {
            self.inner.velocity()
        }
        fn angular_velocity(&self) -> Vector3<f64> {
            self.inner.angular_velocity()
        }
        fn is_kinematic(&self) -> bool {
            self.inner.is_kinematic()
        }
        fn apply_force(&mut self, force: Vector3<f64>, mode: ForceMode) {
            self.inner.apply_force(force, mode)
        }
        fn set_kinematic(&mut self, kinematic: bool) {
            self.kinematic_sets += 1;
            self.inner.set_kinematic(kinematic)
        }
        fn stop(&mut self) {
            self.stops += 1;
            self.inner.stop()
        }
        fn slow_down(&mut self, rate: f64) {
            self.inner.slow_down(rate)
        }
        fn move_to(&mut self, target: Vector3<f64>, smoothness: f64, dt: f64) {
            self.inner.move_to(target, smoothness, dt)
        }
        fn teleport(&mut self, position: Vector3<f64>) {
            self.inner.teleport(position)
        }
    }

    fn make_controller() -> (BallController<CountingBall>, FrameSender) {
        let (tx, provider) = frame_channel("test");
        let slot = ProviderSlot::resolved(Box::new(provider));
        (BallController::new(CountingBall::new(), slot, Config::default()), tx)
    }

    fn pinch_frame(t: f64, palm: [f64; 3], strength: f64) -> TrackingFrame {
        let mut left = RawHand::new(Chirality::Left);
        left.palm = Some(palm);
        left.pinch_strength = Some(strength);
        TrackingFrame {
            timestamp: t,
            hands: vec![left],
        }
    }

    fn point_frame(t: f64, tip: [f64; 3]) -> TrackingFrame {
        let mut right = RawHand::new(Chirality::Right);
        right.index_tip = Some(tip);
        right.palm = Some(tip);
        TrackingFrame {
            timestamp: t,
            hands: vec![right],
        }
    }

    fn input(frame: u32) -> FrameInput {
        FrameInput {
            now: frame as f64 * DT,
            dt: DT,
            keys: KeyState::default(),
        }
    }

    #[test]
    fn test_starts_inert() {
        let (mut controller, _tx) = make_controller();
        assert_eq!(controller.interaction_mode(), InteractionMode::None);
        controller.update(&input(0));
        assert_eq!(controller.ball().stops, 0);
    }

    #[test]
    fn test_same_mode_is_noop() {
        let (mut controller, _tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::Keyboard);
        let stops = controller.ball().stops;

        controller
            .ball_mut()
            .apply_force(Vector3::new(1.0, 0.0, 0.0), ForceMode::VelocityChange);
        assert_eq!(controller.set_interaction_mode(InteractionMode::Keyboard), ModeChange::Unchanged);
        assert_eq!(controller.ball().stops, stops);
        assert_eq!(controller.ball().velocity().x, 1.0);
    }

    #[test]
    fn test_switch_always_stops_ball() {
        let (mut controller, _tx) = make_controller();
        controller
            .ball_mut()
            .apply_force(Vector3::new(3.0, 0.0, 0.0), ForceMode::VelocityChange);

        let change = controller.set_interaction_mode(InteractionMode::Keyboard);
        assert_eq!(
            change,
            ModeChange::Switched {
                from: InteractionMode::None,
                to: InteractionMode::Keyboard
            }
        );
        assert_eq!(controller.ball().velocity(), Vector3::zeros());
    }

    #[test]
    fn test_hand_to_keyboard_releases_pinch_once() {
        let (mut controller, tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::HandTracking);

        tx.send(pinch_frame(0.0, [0.0, 0.6, 0.0], 1.0));
        controller.update(&input(1));
        assert!(controller.is_pinched());
        assert!(controller.ball().is_kinematic());

        controller.set_interaction_mode(InteractionMode::Keyboard);
        assert!(!controller.ball().is_kinematic());
        assert!(!controller.is_pinched());

        let releases = controller
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, GestureEvent::PinchReleased { reason: ReleaseReason::Forced, .. }))
            .count();
        assert_eq!(releases, 1);

        // Going back and forth again has nothing left to release
        controller.set_interaction_mode(InteractionMode::HandTracking);
        controller.set_interaction_mode(InteractionMode::Keyboard);
        assert!(controller.drain_events().is_empty());
    }

    #[test]
    fn test_only_installed_handler_runs() {
        let (mut controller, tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::Keyboard);

        // Hand frames are ignored in keyboard mode
        tx.send(pinch_frame(0.0, [0.0, 0.6, 0.0], 1.0));
        controller.update(&input(1));
        assert!(!controller.ball().is_kinematic());

        // Keys are ignored in hand mode
        controller.set_interaction_mode(InteractionMode::HandTracking);
        let keys = FrameInput {
            keys: KeyState { up: true, ..Default::default() },
            ..input(2)
        };
        controller.update(&keys);
        controller.ball_mut().inner.step(DT);
        assert_eq!(controller.ball().velocity().z, 0.0);
        // The frame queued during keyboard mode was not replayed
        assert!(!controller.ball().is_kinematic());
    }

    #[test]
    fn test_keyboard_mode_moves_ball() {
        let (mut controller, _tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::Keyboard);
        let keys = FrameInput {
            keys: KeyState { right: true, ..Default::default() },
            ..input(1)
        };
        controller.update(&keys);
        controller.ball_mut().inner.step(DT);
        assert!(controller.ball().velocity().x > 0.0);
    }

    #[test]
    fn test_pointing_skipped_while_pinched() {
        let (mut controller, tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::HandTracking);

        tx.send(pinch_frame(0.0, [0.0, 0.6, 0.0], 1.0));
        controller.update(&input(1));
        assert!(controller.is_pinched());

        for i in 2..20 {
            let mut frame = pinch_frame(i as f64 * DT, [0.0, 0.6, 0.0], 1.0);
            frame.hands.extend(point_frame(0.0, [3.0, 0.5, 0.0]).hands);
            tx.send(frame);
            controller.update(&input(i));
        }
        match &controller.handler {
            ActiveHandler::HandTracking(h) => assert_eq!(h.pointing.state().present_frame_count, 0),
            _ => panic!("hand tracking handler not installed"),
        }
    }

    #[test]
    fn test_pointing_steers_after_debounce() {
        let (mut controller, tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::HandTracking);

        for i in 1..=10 {
            tx.send(point_frame(i as f64 * DT, [2.0, 0.5, 0.0]));
            controller.update(&input(i));
        }
        assert!(controller.ball().velocity().x > 0.0);
    }

    #[test]
    fn test_unresolved_provider_is_reported_not_fatal() {
        let mut controller =
            BallController::new(CountingBall::new(), ProviderSlot::lazy(|| None), Config::default());
        controller.set_interaction_mode(InteractionMode::HandTracking);

        assert_eq!(controller.interaction_mode(), InteractionMode::HandTracking);
        assert!(matches!(
            controller.provider_status(),
            Some(TrackingError::ProviderUnresolved { .. })
        ));
        controller.update(&input(1));
        assert_eq!(controller.ball().velocity(), Vector3::zeros());
    }

    #[test]
    fn test_late_provider_starts_working() {
        use crate::provider::RESOLVE_RETRY_POLLS;
        use std::cell::RefCell;
        use std::rc::Rc;

        let pending: Rc<RefCell<Option<Box<dyn TrackingProvider>>>> = Rc::new(RefCell::new(None));
        let source = pending.clone();
        let slot = ProviderSlot::lazy(move || source.borrow_mut().take());
        let mut controller = BallController::new(CountingBall::new(), slot, Config::default());

        controller.set_interaction_mode(InteractionMode::HandTracking);
        assert!(controller.provider_status().is_some());

        let (tx, provider) = frame_channel("late");
        *pending.borrow_mut() = Some(Box::new(provider));
        // Queued before the provider is picked up, so never applied
        tx.send(pinch_frame(0.0, [0.0, 0.6, 0.0], 1.0));

        let mut frame = 1;
        while controller.provider_status().is_some() {
            assert!(frame <= RESOLVE_RETRY_POLLS + 1, "provider never resolved");
            controller.update(&input(frame));
            frame += 1;
        }
        assert!(!controller.is_pinched());

        tx.send(pinch_frame(frame as f64 * DT, [0.0, 0.6, 0.0], 1.0));
        controller.update(&input(frame));
        assert!(controller.is_pinched());
    }

    #[test]
    fn test_pointing_paused_during_release_grace() {
        let (mut controller, tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::HandTracking);

        tx.send(pinch_frame(0.0, [0.0, 0.6, 0.0], 1.0));
        controller.update(&input(1));
        tx.send(pinch_frame(2.0 * DT, [0.0, 0.6, 0.0], 0.0));
        controller.update(&input(2));
        assert!(!controller.is_pinched());

        // Grace is 0.5 s: 30 ticks at 60 Hz
        for i in 3..20 {
            tx.send(point_frame(i as f64 * DT, [2.0, 0.5, 0.0]));
            controller.update(&input(i));
        }
        assert_eq!(controller.ball().velocity(), Vector3::zeros());

        for i in 40..50 {
            tx.send(point_frame(i as f64 * DT, [2.0, 0.5, 0.0]));
            controller.update(&input(i));
        }
        assert!(controller.ball().velocity().x > 0.0);
    }

    #[test]
    fn test_reset_ball_releases_and_moves() {
        let (mut controller, tx) = make_controller();
        controller.set_interaction_mode(InteractionMode::HandTracking);
        tx.send(pinch_frame(0.0, [0.0, 0.6, 0.0], 1.0));
        controller.update(&input(1));

        controller.reset_ball(Vector3::new(1.0, 0.5, 1.0));
        assert!(!controller.is_pinched());
        assert!(!controller.ball().is_kinematic());
        assert_eq!(controller.ball_position(), Vector3::new(1.0, 0.5, 1.0));
    }
}
