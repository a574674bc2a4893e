// src/provider.rs - Tracking providers and lazy provider resolution
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::error::TrackingError;
use crate::tracking::TrackingFrame;

/// Source of hand-tracking frames, polled once per tick.
pub trait TrackingProvider {
    fn name(&self) -> &str;

    /// Newest frame delivered since the previous poll, if any.
    fn poll_frame(&mut self) -> Option<TrackingFrame>;

    /// Forget frames queued before a consumer attached.
    fn discard_pending(&mut self) {}
}

pub type ProviderResolver = Box<dyn FnMut() -> Option<Box<dyn TrackingProvider>>>;

/// Polls to sit out after a failed lookup before asking the resolver again.
pub const RESOLVE_RETRY_POLLS: u32 = 30;

enum SlotState {
    Pending(ProviderResolver),
    Resolved(Box<dyn TrackingProvider>),
}

/// Holds the provider once found, or the means to look for it.
pub struct ProviderSlot {
    state: SlotState,
    resolve_attempts: u32,
    retry_in: u32,
}

impl ProviderSlot {
    pub fn resolved(provider: Box<dyn TrackingProvider>) -> Self {
        Self {
            state: SlotState::Resolved(provider),
            resolve_attempts: 0,
            retry_in: 0,
        }
    }

    pub fn lazy<F>(resolver: F) -> Self
    where
        F: FnMut() -> Option<Box<dyn TrackingProvider>> + 'static,
    {
        Self {
            state: SlotState::Pending(Box::new(resolver)),
            resolve_attempts: 0,
            retry_in: 0,
        }
    }

    pub fn provider_name(&self) -> Option<&str> {
        match &self.state {
            SlotState::Resolved(provider) => Some(provider.name()),
            SlotState::Pending(_) => None,
        }
    }

    fn unresolved(&self) -> TrackingError {
        TrackingError::ProviderUnresolved {
            reason: format!("provider not found after {} attempt(s)", self.resolve_attempts),
        }
    }

    /// Ask the resolver now, regardless of any retry backoff.
    pub fn ensure_resolved(&mut self) -> Result<(), TrackingError> {
        let SlotState::Pending(resolver) = &mut self.state else {
            return Ok(());
        };

        self.resolve_attempts += 1;
        match resolver() {
            Some(provider) => {
                info!(
                    "Tracking provider found: {} (attempt {})",
                    provider.name(),
                    self.resolve_attempts
                );
                self.state = SlotState::Resolved(provider);
                self.retry_in = 0;
                Ok(())
            }
            None => {
                self.retry_in = RESOLVE_RETRY_POLLS;
                Err(self.unresolved())
            }
        }
    }

    /// Newest frame from the provider. While unresolved, the resolver is
    /// retried every `RESOLVE_RETRY_POLLS` polls; a provider found here
    /// starts from the frame after this poll.
    pub fn poll_frame(&mut self) -> Result<Option<TrackingFrame>, TrackingError> {
        if let SlotState::Resolved(provider) = &mut self.state {
            return Ok(provider.poll_frame());
        }

        if self.retry_in > 0 {
            self.retry_in -= 1;
            return Err(self.unresolved());
        }
        self.ensure_resolved()?;
        self.discard_pending();
        Ok(None)
    }

    pub fn discard_pending(&mut self) {
        if let SlotState::Resolved(provider) = &mut self.state {
            provider.discard_pending();
        }
    }
}

/// Sending half for frames produced elsewhere, possibly on another thread.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<TrackingFrame>,
}

impl FrameSender {
    /// False once the provider side has been dropped.
    pub fn send(&self, frame: TrackingFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

pub struct ChannelProvider {
    name: String,
    rx: Receiver<TrackingFrame>,
    disconnected: bool,
}

pub fn frame_channel(name: impl Into<String>) -> (FrameSender, ChannelProvider) {
    let (tx, rx) = mpsc::channel();
    (
        FrameSender { tx },
        ChannelProvider {
            name: name.into(),
            rx,
            disconnected: false,
        },
    )
}

impl TrackingProvider for ChannelProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_frame(&mut self) -> Option<TrackingFrame> {
        let mut latest = None;
        let mut skipped = 0usize;
        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    if latest.replace(frame).is_some() {
                        skipped += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        warn!("Frame source for {} disconnected", self.name);
                        self.disconnected = true;
                    }
                    break;
                }
            }
        }
        if skipped > 0 {
            debug!("{} dropped {} stale frame(s)", self.name, skipped);
        }
        latest
    }

    fn discard_pending(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Plays back frames recorded as JSON lines, one frame per poll.
pub struct ReplayProvider {
    path: PathBuf,
    frames: Vec<TrackingFrame>,
    current_frame: usize,
    looping: bool,
}

impl ReplayProvider {
    pub fn open(path: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read frame recording {}", path.display()))?;
        let frames = Self::parse(&content)
            .with_context(|| format!("Invalid frame recording {}", path.display()))?;

        if frames.is_empty() {
            return Err(anyhow::anyhow!("Frame recording has no frames: {}", path.display()));
        }
        info!("Loaded {} frames from {}", frames.len(), path.display());

        Ok(Self {
            path,
            frames,
            current_frame: 0,
            looping,
        })
    }

    pub fn parse(content: &str) -> Result<Vec<TrackingFrame>> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
            })
            .collect()
    }
}

impl TrackingProvider for ReplayProvider {
    fn name(&self) -> &str {
        self.path.to_str().unwrap_or("replay")
    }

    fn poll_frame(&mut self) -> Option<TrackingFrame> {
        if self.current_frame >= self.frames.len() {
            if !self.looping {
                return None;
            }
            self.current_frame = 0;
        }
        let frame = self.frames.get(self.current_frame).cloned();
        self.current_frame += 1;
        frame
    }
}
