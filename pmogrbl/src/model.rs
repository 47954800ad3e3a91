use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine position in machine coordinates (MPos).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance. Only used for ordering, so no square root.
    pub fn distance_sq(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{} Y:{} Z:{}", self.x, self.y, self.z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JogDirection {
    Positive,
    Negative,
}

impl JogDirection {
    fn sign(&self) -> f64 {
        match self {
            JogDirection::Positive => 1.0,
            JogDirection::Negative => -1.0,
        }
    }
}

/// Allowed travel on one axis, bounds included.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Soft travel limits of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TravelLimits {
    pub x: AxisRange,
    pub y: AxisRange,
    pub z: AxisRange,
}

impl TravelLimits {
    pub fn range(&self, axis: Axis) -> AxisRange {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

impl Default for TravelLimits {
    fn default() -> Self {
        Self {
            x: AxisRange::new(0.0, 200.0),
            y: AxisRange::new(0.0, 200.0),
            z: AxisRange::new(0.0, 100.0),
        }
    }
}

/// Playback state of the streaming engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Everything the sender knows about the machine and the stream.
///
/// The cursor is the index of the next line to transmit (`0..=N`).
/// `last_sent` is the index of the last line actually handed to the link.
/// Mutation goes through the crate-internal methods only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MachineState {
    position: Position,
    limits: TravelLimits,
    cursor: usize,
    last_sent: Option<usize>,
    paused: bool,
}

impl MachineState {
    pub fn new(limits: TravelLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn limits(&self) -> TravelLimits {
        self.limits
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_sent(&self) -> Option<usize> {
        self.last_sent
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Replaces the tracked position, all three axes at once.
    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub(crate) fn set_limits(&mut self, limits: TravelLimits) {
        self.limits = limits;
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub(crate) fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub(crate) fn reset_stream(&mut self) {
        self.cursor = 0;
        self.last_sent = None;
    }

    pub(crate) fn seek(&mut self, index: usize) {
        self.cursor = index;
    }

    /// Takes the line under the cursor for transmission: records it as
    /// last sent and moves the cursor by exactly one.
    pub(crate) fn take_next(&mut self, program_len: usize) -> Option<usize> {
        if self.cursor >= program_len {
            return None;
        }
        let index = self.cursor;
        self.last_sent = Some(index);
        self.cursor += 1;
        Some(index)
    }

    /// Target of a one-step jog, or `None` when it would leave the travel limits.
    pub fn jog_target(&self, axis: Axis, direction: JogDirection, step: f64) -> Option<Position> {
        let value = self.position.get(axis) + direction.sign() * step;
        if !self.limits.range(axis).contains(value) {
            return None;
        }
        let mut target = self.position;
        target.set(axis, value);
        Some(target)
    }
}

/// One persistent controller parameter (`$<id>=<value>`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: String,
    pub original_value: String,
}

impl Setting {
    /// Numeric id of the key (`$100` -> 100).
    pub fn id(&self) -> Option<u32> {
        setting_id(&self.key)
    }

    pub fn is_modified(&self) -> bool {
        self.value != self.original_value
    }
}

pub(crate) fn setting_id(key: &str) -> Option<u32> {
    key.strip_prefix('$')?.parse().ok()
}

/// Parameter table captured by one fetch session, ordered by numeric id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    entries: BTreeMap<u32, Setting>,
}

impl SettingsSnapshot {
    pub(crate) fn insert(&mut self, id: u32, setting: Setting) {
        self.entries.insert(id, setting);
    }

    pub fn get(&self, key: &str) -> Option<&Setting> {
        self.entries.get(&setting_id(key)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.entries.values()
    }

    /// Settings sorted numerically by id (`$2` before `$10`).
    pub fn sorted(&self) -> Vec<Setting> {
        self.entries.values().cloned().collect()
    }
}
