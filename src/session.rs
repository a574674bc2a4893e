// src/session.rs - Tutorial and study sequencing
//
// Launch -> keyboard tutorial -> hand tracking tutorial -> transition menu
// -> study in both modes (random order) -> complete.
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, PlacementStrategy, SessionConfig};
use crate::data::TrialRecord;
use crate::gesture::GestureEvent;
use crate::interaction::{FrameInput, InteractionMode, InteractionSurface};

const MAX_PLACEMENT_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Launch,
    Tutorial(InteractionMode),
    TransitionMenu,
    Study(InteractionMode),
    FreePlay(InteractionMode),
    Complete,
}

impl Phase {
    pub fn mode(&self) -> InteractionMode {
        match self {
            Self::Tutorial(m) | Self::Study(m) | Self::FreePlay(m) => *m,
            Self::Launch | Self::TransitionMenu | Self::Complete => InteractionMode::None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Tutorial(_) => "tutorial",
            Self::TransitionMenu => "transition_menu",
            Self::Study(_) => "study",
            Self::FreePlay(_) => "free_play",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collectible {
    pub index: usize,
    pub position: Vector3<f64>,
}

/// One pass over a set of collectibles in a single mode.
#[derive(Debug, Clone)]
struct PhaseRun {
    phase: Phase,
    started_at: f64,
    last_split_at: f64,
    collectibles: Vec<Collectible>,
    current: usize,
    pinches_since_split: u32,
}

impl PhaseRun {
    fn active(&self) -> Option<&Collectible> {
        self.collectibles.get(self.current)
    }

    fn is_finished(&self) -> bool {
        self.current >= self.collectibles.len()
    }
}

pub struct Session<S: InteractionSurface> {
    surface: S,
    config: SessionConfig,
    session_id: Uuid,
    seed: u64,
    spawn: Vector3<f64>,
    tutorial_positions: Vec<Vector3<f64>>,
    study_positions: Vec<Vector3<f64>>,
    study_order: [InteractionMode; 2],
    phase: Phase,
    run: Option<PhaseRun>,
    records: Vec<TrialRecord>,
    clock: f64,
}

impl<S: InteractionSurface> Session<S> {
    pub fn new(surface: S, config: &Config) -> Self {
        let session = config.session.clone();
        let seed = session.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let study_positions = study_positions(&session, &mut rng);
        let tutorial_positions = tutorial_positions(&session);
        let mut study_order = [InteractionMode::Keyboard, InteractionMode::HandTracking];
        study_order.shuffle(&mut rng);

        let session_id = Uuid::new_v4();
        info!(
            "Session {} initialized: seed {}, {} study collectibles, study order {} then {}",
            session_id,
            seed,
            study_positions.len(),
            study_order[0].as_str(),
            study_order[1].as_str()
        );

        Self {
            surface,
            config: session,
            session_id,
            seed,
            spawn: Vector3::from(config.ball.spawn),
            tutorial_positions,
            study_positions,
            study_order,
            phase: Phase::Launch,
            run: None,
            records: Vec::new(),
            clock: 0.0,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn study_order(&self) -> [InteractionMode; 2] {
        self.study_order
    }

    pub fn study_positions(&self) -> &[Vector3<f64>] {
        &self.study_positions
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn active_collectible(&self) -> Option<&Collectible> {
        self.run.as_ref().and_then(|r| r.active())
    }

    /// Seconds since the current phase began.
    pub fn phase_elapsed(&self) -> f64 {
        self.run.as_ref().map(|r| self.clock - r.started_at).unwrap_or(0.0)
    }

    pub fn progress_text(&self) -> String {
        let Some(run) = &self.run else {
            return match self.phase {
                Phase::TransitionMenu => "Tutorials complete".to_string(),
                Phase::Complete => "Study complete".to_string(),
                _ => String::new(),
            };
        };
        let total = run.collectibles.len();
        match run.phase {
            Phase::Tutorial(_) => format!("Tutorial: {}/{} collectibles", run.current, total),
            _ => format!("Experiment: {}/{} collectibles", run.current, total),
        }
    }

    pub fn start_tutorials(&mut self) {
        self.begin_phase(Phase::Tutorial(InteractionMode::Keyboard));
    }

    pub fn restart_tutorial(&mut self) {
        info!("Restarting tutorial sequence");
        self.begin_phase(Phase::Tutorial(InteractionMode::Keyboard));
    }

    /// Start the timed study. Only valid from the transition menu.
    pub fn start_study(&mut self) -> bool {
        if self.phase != Phase::TransitionMenu {
            warn!("Study can only start from the transition menu (phase: {:?})", self.phase);
            return false;
        }
        self.begin_phase(Phase::Study(self.study_order[0]));
        true
    }

    pub fn start_free_play(&mut self, mode: InteractionMode) {
        self.begin_phase(Phase::FreePlay(mode));
    }

    pub fn start_over(&mut self) {
        info!("Returning to launch menu");
        self.run = None;
        self.enter_menu(Phase::Launch);
    }

    /// End the current run now. Remaining collectibles are recorded as missed.
    pub fn end_run(&mut self) {
        if self.run.is_some() {
            warn!("Ending {} run early", self.phase.label());
            self.finish_run();
        }
    }

    pub fn update(&mut self, input: &FrameInput) {
        self.clock = input.now;
        self.surface.update(input);

        let pinches = self
            .surface
            .drain_events()
            .iter()
            .filter(|e| matches!(e, GestureEvent::PinchStarted { .. }))
            .count() as u32;

        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.pinches_since_split += pinches;

        if let (Phase::Study(_), Some(limit)) = (run.phase, self.config.study_time_limit_s) {
            if self.clock - run.started_at > limit {
                warn!("Study run in {} mode hit the {:.0}s limit", run.phase.mode().as_str(), limit);
                self.finish_run();
                return;
            }
        }

        let ball = self.surface.ball_position();
        let in_reach = run
            .active()
            .map(|c| (c.position - ball).norm() <= self.config.pickup_radius)
            .unwrap_or(false);
        if in_reach {
            self.collectible_collected();
        }
    }

    /// Mark the active collectible as picked up and move on.
    pub fn collectible_collected(&mut self) {
        let session_id = self.session_id.to_string();
        let now = self.clock;
        let Some(run) = self.run.as_mut() else {
            debug!("Collectible reported outside a run");
            return;
        };
        let Some(collectible) = run.collectibles.get(run.current) else {
            return;
        };

        self.records.push(TrialRecord::collected(
            &session_id,
            run.phase,
            collectible,
            now - run.last_split_at,
            now - run.started_at,
            run.pinches_since_split,
        ));
        info!(
            "Collected {}/{} in {} ({:.2}s)",
            run.current + 1,
            run.collectibles.len(),
            run.phase.label(),
            now - run.last_split_at
        );

        run.current += 1;
        run.last_split_at = now;
        run.pinches_since_split = 0;

        if run.is_finished() {
            self.finish_run();
        }
    }

    fn finish_run(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let session_id = self.session_id.to_string();
        for missed in run.collectibles.iter().skip(run.current) {
            self.records.push(TrialRecord::missed(&session_id, run.phase, missed));
        }
        info!(
            "Finished {} in {} mode after {:.2}s",
            run.phase.label(),
            run.phase.mode().as_str(),
            self.clock - run.started_at
        );

        match run.phase {
            Phase::Tutorial(InteractionMode::Keyboard) => {
                self.begin_phase(Phase::Tutorial(InteractionMode::HandTracking))
            }
            Phase::Tutorial(_) => self.enter_menu(Phase::TransitionMenu),
            Phase::Study(mode) if mode == self.study_order[0] => {
                self.begin_phase(Phase::Study(self.study_order[1]))
            }
            Phase::Study(_) => self.enter_menu(Phase::Complete),
            _ => self.enter_menu(Phase::Launch),
        }
    }

    fn begin_phase(&mut self, phase: Phase) {
        let positions = match phase {
            Phase::Tutorial(_) => &self.tutorial_positions,
            _ => &self.study_positions,
        };
        let collectibles = positions
            .iter()
            .enumerate()
            .map(|(index, p)| Collectible {
                index,
                position: *p,
            })
            .collect();

        self.surface.set_interaction_mode(phase.mode());
        self.surface.reset_ball(self.spawn);
        self.phase = phase;
        self.run = Some(PhaseRun {
            phase,
            started_at: self.clock,
            last_split_at: self.clock,
            collectibles,
            current: 0,
            pinches_since_split: 0,
        });
        info!("{} phase started in {} mode", phase.label(), phase.mode().as_str());
    }

    fn enter_menu(&mut self, phase: Phase) {
        self.surface.set_interaction_mode(InteractionMode::None);
        self.surface.reset_ball(self.spawn);
        self.phase = phase;
        info!("Entered {}", phase.label());
    }
}

/// Four collectibles slightly inside the arena corners.
pub fn tutorial_positions(config: &SessionConfig) -> Vec<Vector3<f64>> {
    let c = config.arena_radius * 0.7;
    let h = config.collectible_height;
    vec![
        Vector3::new(c, h, c),
        Vector3::new(-c, h, c),
        Vector3::new(-c, h, -c),
        Vector3::new(c, h, -c),
    ]
}

pub fn study_positions(config: &SessionConfig, rng: &mut impl Rng) -> Vec<Vector3<f64>> {
    match config.placement {
        PlacementStrategy::Manual if config.manual_positions.len() >= config.collectible_count => config
            .manual_positions
            .iter()
            .take(config.collectible_count)
            .copied()
            .map(Vector3::from)
            .collect(),
        PlacementStrategy::Manual | PlacementStrategy::Random => random_positions(config, rng),
        PlacementStrategy::Grid => (0..config.collectible_count)
            .map(|i| grid_position(config, i))
            .collect(),
    }
}

/// Random points in the arena disc, at least `min_collectible_spacing` apart.
/// A collectible that cannot be placed gets its grid slot instead.
pub fn random_positions(config: &SessionConfig, rng: &mut impl Rng) -> Vec<Vector3<f64>> {
    let mut placed: Vec<Vector3<f64>> = Vec::new();
    let mut positions = Vec::with_capacity(config.collectible_count);

    for i in 0..config.collectible_count {
        let candidate = (0..MAX_PLACEMENT_ATTEMPTS).find_map(|_| {
            let angle = rng.gen_range(0.0..2.0 * PI);
            let distance = rng.gen_range(1.0..config.arena_radius);
            let p = Vector3::new(
                angle.cos() * distance,
                config.collectible_height,
                angle.sin() * distance,
            );
            placed
                .iter()
                .all(|q| (p - q).norm() >= config.min_collectible_spacing)
                .then_some(p)
        });

        match candidate {
            Some(p) => {
                placed.push(p);
                positions.push(p);
            }
            None => {
                warn!("Could not place collectible {} randomly, using grid position", i);
                positions.push(grid_position(config, i));
            }
        }
    }
    positions
}

pub fn grid_position(config: &SessionConfig, index: usize) -> Vector3<f64> {
    let grid_size = (config.collectible_count as f64).sqrt().ceil().max(1.0) as usize;
    let spacing = config.arena_radius * 2.0 / (grid_size + 1) as f64;
    let row = index / grid_size;
    let col = index % grid_size;
    Vector3::new(
        -config.arena_radius + (col + 1) as f64 * spacing,
        config.collectible_height,
        -config.arena_radius + (row + 1) as f64 * spacing,
    )
}
