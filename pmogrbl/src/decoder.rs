//! Pattern decoders for inbound controller text.
//!
//! Each decoder looks at whatever text has been received so far and
//! returns the typed fields it found, or nothing. Unrelated or partial
//! text is normal traffic, never an error.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Position;

static MPOS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"MPos:([0-9.\-]+),([0-9.\-]+),([0-9.\-]+)").expect("valid MPos regex")
});

static SETTING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\d+)=([\d.\-]+)").expect("valid setting regex"));

/// Marker opening a status frame (`<Idle|MPos:...>`).
pub const STATUS_FRAME_MARKER: char = '<';

/// Token closing a parameter dump.
pub const ACK_TOKEN: &str = "ok";

/// Decodes the machine position out of a status frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusDecoder;

impl StatusDecoder {
    pub fn decode(&self, text: &str) -> Option<Position> {
        if !text.contains(STATUS_FRAME_MARKER) {
            return None;
        }
        let caps = MPOS_RE.captures(text)?;
        let x = caps[1].parse::<f64>().ok()?;
        let y = caps[2].parse::<f64>().ok()?;
        let z = caps[3].parse::<f64>().ok()?;
        Some(Position::new(x, y, z))
    }
}

/// Decodes `$<id>=<value>` pairs out of a parameter dump.
#[derive(Clone, Copy, Debug, Default)]
pub struct SettingsDecoder;

impl SettingsDecoder {
    /// Every pair in order of appearance, key rendered as `$<id>`.
    pub fn decode(&self, text: &str) -> Vec<(String, String)> {
        SETTING_RE
            .captures_iter(text)
            .map(|caps| (format!("${}", &caps[1]), caps[2].to_string()))
            .collect()
    }
}

/// Detects the end of a parameter dump.
#[derive(Clone, Copy, Debug, Default)]
pub struct AckDecoder;

impl AckDecoder {
    pub fn is_complete(&self, buffer: &str) -> bool {
        buffer.contains(ACK_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_frame_position_is_decoded() {
        let frame = "<Idle|MPos:12.500,-3.000,0.250|FS:0,0>\r\nok\r\n";
        assert_eq!(
            StatusDecoder.decode(frame),
            Some(Position::new(12.5, -3.0, 0.25))
        );
    }

    #[test]
    fn status_needs_frame_marker() {
        assert_eq!(StatusDecoder.decode("MPos:1.000,2.000,3.000"), None);
        assert_eq!(StatusDecoder.decode("<Idle|WPos:1.000,2.000,3.000>"), None);
        assert_eq!(StatusDecoder.decode("<Idle|MPos:1.000,2.0"), None);
    }

    #[test]
    fn malformed_number_is_a_miss() {
        assert_eq!(StatusDecoder.decode("<Run|MPos:1.0.0,2.000,3.000>"), None);
    }

    #[test]
    fn settings_dump_pairs() {
        let pairs = SettingsDecoder.decode("$0=10\r\n$100=250.000\r\n$N0=\r\nok\r\n");
        assert_eq!(
            pairs,
            vec![
                ("$0".to_string(), "10".to_string()),
                ("$100".to_string(), "250.000".to_string())
            ]
        );
    }

    #[test]
    fn ack_detection() {
        assert!(!AckDecoder.is_complete("$0=10\r\n$1=25\r\n"));
        assert!(AckDecoder.is_complete("$0=10\r\n$1=25\r\nok\r\n"));
    }
}
