//! Minimal G-code word scanning used by position recovery.

use crate::model::{Axis, Position};

/// Axis words present on one line. Absent axes keep their modal value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisWords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl AxisWords {
    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn set_once(&mut self, axis: Axis, value: f64) {
        let slot = match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Updates only the axes mentioned on the line.
    pub fn apply_to(&self, position: &mut Position) {
        for axis in Axis::ALL {
            if let Some(value) = self.get(axis) {
                position.set(axis, value);
            }
        }
    }
}

/// True for lines starting with a rapid (`G0`/`G00`) or linear (`G1`/`G01`) move.
pub fn is_motion_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    if !matches!(bytes.first(), Some(b'G' | b'g')) {
        return false;
    }
    let digits = bytes[1..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    std::str::from_utf8(&bytes[1..1 + digits])
        .ok()
        .and_then(|code| code.parse::<u32>().ok())
        .is_some_and(|code| code <= 1)
}

/// First X, Y and Z values found on the line.
pub fn axis_words(line: &str) -> AxisWords {
    let bytes = line.as_bytes();
    let mut words = AxisWords::default();
    let mut i = 0;

    while i < bytes.len() {
        let axis = match bytes[i].to_ascii_uppercase() {
            b'X' => Axis::X,
            b'Y' => Axis::Y,
            b'Z' => Axis::Z,
            _ => {
                i += 1;
                continue;
            }
        };
        let (value, consumed) = parse_number(&bytes[i + 1..]);
        if let Some(value) = value {
            words.set_once(axis, value);
        }
        i += 1 + consumed;
    }

    words
}

/// Parses `-?digits[.digits]` after optional spaces. Returns the value and
/// the number of bytes consumed.
fn parse_number(bytes: &[u8]) -> (Option<f64>, usize) {
    let mut start = 0usize;
    while start < bytes.len() && bytes[start] == b' ' {
        start += 1;
    }

    let mut end = start;
    if end < bytes.len() && bytes[end] == b'-' {
        end += 1;
    }

    let mut has_digit = false;
    let mut has_dot = false;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_digit() {
            has_digit = true;
        } else if b == b'.' && !has_dot {
            has_dot = true;
        } else {
            break;
        }
        end += 1;
    }

    if !has_digit {
        return (None, start);
    }

    let parsed = std::str::from_utf8(&bytes[start..end])
        .ok()
        .and_then(|s| s.parse::<f64>().ok());
    (parsed, end)
}
