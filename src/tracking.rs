// src/tracking.rs - Hand pose adapter: raw provider hands to metric samples
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TrackingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chirality {
    Left,
    Right,
}

impl Chirality {
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    #[default]
    Meters,
    Millimeters,
}

impl LengthUnit {
    pub fn to_meters(self, v: Vector3<f64>) -> Vector3<f64> {
        match self {
            Self::Meters => v,
            Self::Millimeters => v * 0.001,
        }
    }
}

/// Fixed read-only view of one tracked hand.
///
/// A tracking back end implements this once; positions come back in the
/// source's own unit and the adapter functions below do the conversion.
pub trait HandPoseSource {
    fn chirality(&self) -> Chirality;
    fn unit(&self) -> LengthUnit;
    fn palm_position(&self) -> Option<Vector3<f64>>;
    fn index_tip_position(&self) -> Option<Vector3<f64>>;
    /// Finger tips ordered thumb, index, middle, ring, little.
    fn finger_tips(&self) -> Vec<Vector3<f64>>;
    fn pinch_strength(&self) -> Option<f64>;
}

/// Index fingertip in meters: direct accessor, then the second finger of
/// the ordered list, then the palm.
pub fn resolve_index_tip(source: &dyn HandPoseSource) -> Result<Vector3<f64>, TrackingError> {
    tip_without_palm(source)
        .or_else(|| source.palm_position())
        .map(|p| source.unit().to_meters(p))
        .ok_or(TrackingError::PoseUnavailable {
            chirality: source.chirality(),
        })
}

/// Palm in meters, falling back to the fingertip.
pub fn resolve_palm(source: &dyn HandPoseSource) -> Result<Vector3<f64>, TrackingError> {
    source
        .palm_position()
        .or_else(|| tip_without_palm(source))
        .map(|p| source.unit().to_meters(p))
        .ok_or(TrackingError::PoseUnavailable {
            chirality: source.chirality(),
        })
}

fn tip_without_palm(source: &dyn HandPoseSource) -> Option<Vector3<f64>> {
    source
        .index_tip_position()
        .or_else(|| source.finger_tips().get(1).copied())
}

/// Hand as a provider delivers it. Every field except chirality may be
/// missing on a given frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHand {
    pub chirality: Chirality,
    #[serde(default)]
    pub unit: LengthUnit,
    #[serde(default)]
    pub palm: Option<[f64; 3]>,
    #[serde(default)]
    pub index_tip: Option<[f64; 3]>,
    #[serde(default)]
    pub finger_tips: Vec<[f64; 3]>,
    #[serde(default)]
    pub pinch_strength: Option<f64>,
}

impl RawHand {
    pub fn new(chirality: Chirality) -> Self {
        Self {
            chirality,
            unit: LengthUnit::Meters,
            palm: None,
            index_tip: None,
            finger_tips: Vec::new(),
            pinch_strength: None,
        }
    }
}

impl HandPoseSource for RawHand {
    fn chirality(&self) -> Chirality {
        self.chirality
    }

    fn unit(&self) -> LengthUnit {
        self.unit
    }

    fn palm_position(&self) -> Option<Vector3<f64>> {
        self.palm.map(Vector3::from)
    }

    fn index_tip_position(&self) -> Option<Vector3<f64>> {
        self.index_tip.map(Vector3::from)
    }

    fn finger_tips(&self) -> Vec<Vector3<f64>> {
        self.finger_tips.iter().copied().map(Vector3::from).collect()
    }

    fn pinch_strength(&self) -> Option<f64> {
        self.pinch_strength
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingFrame {
    pub timestamp: f64,
    #[serde(default)]
    pub hands: Vec<RawHand>,
}

impl TrackingFrame {
    pub fn hand(&self, chirality: Chirality) -> Option<&RawHand> {
        self.hands.iter().find(|h| h.chirality == chirality)
    }
}

/// One hand, resolved to meters. Lives for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandSample {
    pub chirality: Chirality,
    pub palm_position: Vector3<f64>,
    pub index_tip_position: Vector3<f64>,
    pub pinch_strength: Option<f64>,
    pub present: bool,
}

impl HandSample {
    pub fn from_source(source: &dyn HandPoseSource) -> Result<Self, TrackingError> {
        let palm_position = resolve_palm(source)?;
        let index_tip_position = resolve_index_tip(source)?;
        let pinch_strength = source
            .pinch_strength()
            .filter(|s| !s.is_nan())
            .map(|s| s.clamp(0.0, 1.0));

        Ok(Self {
            chirality: source.chirality(),
            palm_position,
            index_tip_position,
            pinch_strength,
            present: true,
        })
    }
}

/// Usable hands of one frame, at most one per side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameHands {
    pub left: Option<HandSample>,
    pub right: Option<HandSample>,
}

impl FrameHands {
    pub fn from_frame(frame: &TrackingFrame) -> Self {
        let mut hands = Self::default();
        for side in [Chirality::Left, Chirality::Right] {
            let Some(raw) = frame.hand(side) else {
                continue;
            };
            match HandSample::from_source(raw) {
                Ok(sample) => *hands.slot_mut(side) = Some(sample),
                Err(e) => debug!("Skipping hand at t={:.3}: {}", frame.timestamp, e),
            }
        }
        hands
    }

    pub fn get(&self, chirality: Chirality) -> Option<&HandSample> {
        match chirality {
            Chirality::Left => self.left.as_ref(),
            Chirality::Right => self.right.as_ref(),
        }
    }

    fn slot_mut(&mut self, chirality: Chirality) -> &mut Option<HandSample> {
        match chirality {
            Chirality::Left => &mut self.left,
            Chirality::Right => &mut self.right,
        }
    }
}
