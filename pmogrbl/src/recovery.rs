//! Resume-point reconstruction after an interruption.
//!
//! Two strategies, both producing a cursor for the playback controller:
//! - restart at the last transmitted line,
//! - replay the program's motion lines and pick the one whose end point is
//!   nearest to a given machine position.

use serde::Serialize;
use tracing::debug;

use crate::errors::{GrblError, Result};
use crate::gcode::{axis_words, is_motion_line};
use crate::model::{MachineState, Position};
use crate::program::Program;

pub const NO_RECOVERY_POINT: &str = "No recovery point available.";
pub const NO_MATCHING_LINE: &str = "No matching G-code line found for recovery.";

/// Winner of a nearest-position scan.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NearestLine {
    pub index: usize,
    /// Squared distance between the simulated tool position and the target.
    pub distance_sq: f64,
    pub position: Position,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn last_sent_target(&self, machine: &MachineState, program: &Program) -> Result<usize> {
        match machine.last_sent() {
            Some(index) if index < program.len() => Ok(index),
            _ => Err(GrblError::recovery_unavailable(NO_RECOVERY_POINT)),
        }
    }

    /// Simulates the tool from (0,0,0) through every G0/G1 line, each line
    /// only changing the axes it names. The first line reaching the minimum
    /// distance wins.
    pub fn nearest_line(&self, program: &Program, target: Position) -> Result<NearestLine> {
        let mut simulated = Position::ORIGIN;
        let mut best: Option<NearestLine> = None;

        for (index, line) in program.lines().enumerate() {
            if !is_motion_line(line) {
                continue;
            }
            axis_words(line).apply_to(&mut simulated);
            let distance_sq = simulated.distance_sq(&target);

            if best.is_none_or(|b| distance_sq < b.distance_sq) {
                best = Some(NearestLine {
                    index,
                    distance_sq,
                    position: simulated,
                });
            }
        }

        let best = best.ok_or_else(|| GrblError::recovery_unavailable(NO_MATCHING_LINE))?;
        debug!(
            index = best.index,
            distance_sq = best.distance_sq,
            target = %target,
            "Nearest program line found"
        );
        Ok(best)
    }
}
