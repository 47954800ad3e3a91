//! Controller parameter table synchronisation (`$$` / `$<id>=<value>`).
//!
//! A fetch session accumulates every inbound chunk into one buffer until
//! the acknowledgement token shows up, then parses the whole buffer at
//! once. The resulting [`SettingsSnapshot`] replaces the previous one and
//! keeps the fetched values as originals for change detection.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::decoder::{AckDecoder, SettingsDecoder};
use crate::model::{Setting, SettingsSnapshot, setting_id};

/// Parameter dump request.
pub const DUMP_COMMAND: &str = "$$";

/// GRBL v1.1 parameter descriptions.
const DESCRIPTIONS: &[(&str, &str)] = &[
    ("$0", "Step pulse time (μs)"),
    ("$1", "Step idle delay (ms)"),
    ("$2", "Step port invert mask"),
    ("$3", "Direction port invert mask"),
    ("$4", "Step enable invert"),
    ("$5", "Limit pins invert"),
    ("$6", "Probe pin invert"),
    ("$10", "Status report mask"),
    ("$11", "Junction deviation"),
    ("$12", "Arc tolerance"),
    ("$13", "Report inches"),
    ("$20", "Soft limits"),
    ("$21", "Hard limits"),
    ("$22", "Homing cycle"),
    ("$23", "Homing direction invert"),
    ("$24", "Homing feed (mm/min)"),
    ("$25", "Homing seek (mm/min)"),
    ("$26", "Homing debounce (ms)"),
    ("$27", "Homing pull-off (mm)"),
    ("$30", "Max spindle speed"),
    ("$31", "Min spindle speed"),
    ("$32", "Laser mode"),
    ("$100", "X steps/mm"),
    ("$101", "Y steps/mm"),
    ("$102", "Z steps/mm"),
    ("$110", "X max rate (mm/min)"),
    ("$111", "Y max rate (mm/min)"),
    ("$112", "Z max rate (mm/min)"),
    ("$120", "X accel (mm/s^2)"),
    ("$121", "Y accel (mm/s^2)"),
    ("$122", "Z accel (mm/s^2)"),
    ("$130", "X max travel (mm)"),
    ("$131", "Y max travel (mm)"),
    ("$132", "Z max travel (mm)"),
];

/// Static description of a parameter, empty for unknown keys.
pub fn describe(key: &str) -> &'static str {
    DESCRIPTIONS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, description)| *description)
        .unwrap_or("")
}

/// Formats a parameter-set command.
pub fn set_command(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

#[derive(Debug, Default)]
struct FetchSession {
    buffer: String,
}

#[derive(Debug, Default)]
pub struct SettingsSync {
    session: Option<FetchSession>,
    snapshot: SettingsSnapshot,
    settings_decoder: SettingsDecoder,
    ack_decoder: AckDecoder,
}

impl SettingsSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh session, dropping any pending one. Returns the command to send.
    pub fn begin_fetch(&mut self) -> &'static str {
        if self.session.is_some() {
            debug!("Replacing pending settings fetch session");
        }
        self.session = Some(FetchSession::default());
        DUMP_COMMAND
    }

    pub fn abort_fetch(&mut self) {
        self.session = None;
    }

    pub fn is_fetching(&self) -> bool {
        self.session.is_some()
    }

    /// Feeds one chunk to the pending session. Returns the new snapshot
    /// when the chunk completed the dump.
    pub fn accept(&mut self, chunk: &str) -> Option<SettingsSnapshot> {
        let session = self.session.as_mut()?;
        session.buffer.push_str(chunk);
        if !self.ack_decoder.is_complete(&session.buffer) {
            return None;
        }

        let buffer = self.session.take()?.buffer;
        let mut snapshot = SettingsSnapshot::default();
        for (key, value) in self.settings_decoder.decode(&buffer) {
            let Some(id) = setting_id(&key) else {
                continue;
            };
            let description = describe(&key).to_string();
            snapshot.insert(
                id,
                Setting {
                    key,
                    original_value: value.clone(),
                    value,
                    description,
                },
            );
        }

        info!(count = snapshot.len(), "Settings fetched");
        self.snapshot = snapshot.clone();
        Some(snapshot)
    }

    pub fn snapshot(&self) -> &SettingsSnapshot {
        &self.snapshot
    }

    /// Set-commands for every fetched key whose edited value differs from
    /// the fetched one, in numeric key order. Unknown keys are ignored.
    pub fn changes(&self, edited: &HashMap<String, String>) -> Vec<String> {
        self.snapshot
            .iter()
            .filter_map(|setting| {
                let value = edited.get(&setting.key)?.trim();
                (value != setting.original_value).then(|| set_command(&setting.key, value))
            })
            .collect()
    }
}
