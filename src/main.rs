// src/main.rs
mod ball;
mod config;
mod data;
mod error;
mod gesture;
mod interaction;
mod keyboard;
mod pointing;
mod provider;
mod session;
mod sim;
mod tracking;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::ball::{BallActuator, SimBall};
use crate::config::{Config, SimConfig};
use crate::data::SessionExporter;
use crate::interaction::{BallController, FrameInput, InteractionMode};
use crate::provider::{frame_channel, ProviderSlot, ReplayProvider, TrackingProvider};
use crate::session::{Phase, Session};
use crate::sim::{Autopilot, Observation};

type SimSession = Session<BallController<SimBall>>;

/// Plays a keyboard vs. hand-tracking roll-a-ball session with a simulated participant
#[derive(Parser, Debug)]
#[command(name = "roll_a_ball")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "ROLL_A_BALL_CONFIG")]
    config: Option<PathBuf>,

    /// Feed hand tracking from a JSON-lines recording instead of the autopilot
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Run the tutorials this many extra times before the study
    #[arg(long, default_value_t = 0)]
    tutorial_repeats: u32,

    /// Play one untimed free run in this mode instead of the study
    #[arg(long, value_enum)]
    free_play: Option<FreePlayMode>,

    /// Write the effective configuration to this path and continue
    #[arg(long)]
    save_config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FreePlayMode {
    Keyboard,
    HandTracking,
}

impl From<FreePlayMode> for InteractionMode {
    fn from(mode: FreePlayMode) -> Self {
        match mode {
            FreePlayMode::Keyboard => InteractionMode::Keyboard,
            FreePlayMode::HandTracking => InteractionMode::HandTracking,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &cli.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
        info!("Configuration written to {}", path.display());
    }

    // The autopilot only produces hand frames when nothing else does
    let (provider, sender) = match cli.replay {
        Some(path) => {
            info!("Hand tracking will replay {}", path.display());
            (replay_slot(path), None)
        }
        None => {
            let (sender, channel) = frame_channel("autopilot");
            (ProviderSlot::resolved(Box::new(channel)), Some(sender))
        }
    };

    let controller = BallController::new(SimBall::new(&config.ball), provider, config.clone());
    let mut session = Session::new(controller, &config);
    let mut pilot = Autopilot::new(config.sim.clone(), &config.hand, sender);
    let order = session.study_order();
    info!(
        "Running simulated session {} (seed {}, study order {} then {})",
        session.session_id(),
        session.seed(),
        order[0].as_str(),
        order[1].as_str()
    );

    let mut runner = Runner::new(&config.sim);
    match cli.free_play {
        Some(mode) => {
            session.start_free_play(mode.into());
            runner.run(&mut session, &mut pilot, |s| s.phase() == Phase::Launch);
        }
        None => {
            session.start_tutorials();
            let mut repeats_left = cli.tutorial_repeats;
            runner.run(&mut session, &mut pilot, |s| {
                if s.phase() == Phase::TransitionMenu {
                    if repeats_left > 0 {
                        repeats_left -= 1;
                        s.restart_tutorial();
                    } else {
                        s.start_study();
                    }
                }
                s.is_complete()
            });
        }
    }

    if config.export.enabled {
        export(&session, &config)?;
    }
    session.start_over();
    Ok(())
}

/// Replay opened on first entry into hand tracking. A missing file is
/// reported once, then retried quietly by the slot's backoff.
fn replay_slot(path: PathBuf) -> ProviderSlot {
    let mut warned = false;
    ProviderSlot::lazy(move || match ReplayProvider::open(&path, true) {
        Ok(replay) => {
            if warned {
                info!("Replay {} is now available", path.display());
            }
            Some(Box::new(replay) as Box<dyn TrackingProvider>)
        }
        Err(e) => {
            if !warned {
                warn!("Replay unavailable: {:#}", e);
                warned = true;
            }
            None
        }
    })
}

/// Fixed-tick driver for the session and autopilot.
struct Runner {
    dt: f64,
    max_phase_seconds: f64,
    now: f64,
    last_progress: String,
    last_provider_status: Option<String>,
}

impl Runner {
    fn new(sim: &SimConfig) -> Self {
        Self {
            dt: 1.0 / sim.tick_rate_hz,
            max_phase_seconds: sim.max_phase_seconds,
            now: 0.0,
            last_progress: String::new(),
            last_provider_status: None,
        }
    }

    /// Tick until `done` returns true. `done` runs first on every tick and
    /// may also issue operator actions.
    fn run(&mut self, session: &mut SimSession, pilot: &mut Autopilot, mut done: impl FnMut(&mut SimSession) -> bool) {
        let started = self.now;
        while !done(session) {
            self.now += self.dt;
            if session.phase_elapsed() > self.max_phase_seconds {
                session.end_run();
                continue;
            }

            let controller = session.surface();
            let obs = Observation {
                now: self.now,
                dt: self.dt,
                mode: controller.interaction_mode(),
                target: session.active_collectible().map(|c| (c.index, c.position)),
                ball_position: controller.ball().position(),
                ball_velocity: controller.ball().velocity(),
                pinched: controller.is_pinched(),
            };
            let keys = pilot.drive(&obs);

            session.update(&FrameInput { now: self.now, dt: self.dt, keys });
            session.surface_mut().ball_mut().step(self.dt);
            self.report(session);
        }
        info!("Run finished after {:.1}s simulated", self.now - started);
    }

    fn report(&mut self, session: &SimSession) {
        let progress = session.progress_text();
        if progress != self.last_progress {
            info!("{}", progress);
            self.last_progress = progress;
        }

        let status = session.surface().provider_status().map(|e| e.to_string());
        if status != self.last_provider_status {
            match &status {
                Some(message) => warn!("Hand tracking degraded: {}", message),
                None => info!("Hand tracking provider recovered"),
            }
            self.last_provider_status = status;
        }
    }
}

fn export(session: &SimSession, config: &Config) -> Result<()> {
    let mut exporter = SessionExporter::new(&config.export.output_directory, config.export.session_name.clone());
    exporter.add_records(session.records());

    let csv_path = exporter.export_csv().context("Failed to export trial data")?;
    let report_path = exporter.generate_report().context("Failed to generate report")?;
    info!("Data exported to {}", csv_path.display());
    info!("Report saved to {}", report_path.display());
    Ok(())
}
