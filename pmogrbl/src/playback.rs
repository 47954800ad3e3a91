//! Line-by-line streaming state machine.
//!
//! The controller decides *which* line goes out next and keeps the cursor
//! invariants; the caller performs the actual transmission. Every method
//! returning `Some(index)` has already recorded `index` as last sent and
//! moved the cursor past it.
//!
//! Pacing is one line per inbound notification. It approximates a single
//! outstanding command but does not track the controller's input buffer,
//! so long lines can overrun a real device.

use tracing::debug;

use crate::model::{MachineState, PlaybackState};
use crate::program::Program;

#[derive(Clone, Debug, Default)]
pub struct PlaybackController {
    state: PlaybackState,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// A new program was loaded: back to Idle, nothing sent yet.
    pub fn load(&mut self, machine: &mut MachineState) {
        machine.reset_stream();
        machine.set_paused(false);
        self.state = PlaybackState::Idle;
    }

    pub fn play(&mut self, machine: &mut MachineState, program: &Program) -> Option<usize> {
        // Un programme terminé peut être rejoué
        if self.state == PlaybackState::Playing && !self.is_complete(machine, program) {
            debug!("play() ignored: already playing");
            return None;
        }
        if program.is_empty() {
            return None;
        }
        machine.rewind();
        machine.set_paused(false);
        self.state = PlaybackState::Playing;
        self.step(machine, program)
    }

    /// Stops future sends. Lines already transmitted are not recalled.
    pub fn pause(&mut self, machine: &mut MachineState) {
        machine.set_paused(true);
        self.state = PlaybackState::Paused;
    }

    pub fn resume(&mut self, machine: &mut MachineState, program: &Program) -> Option<usize> {
        if self.state != PlaybackState::Paused {
            debug!(state = ?self.state, "resume() ignored: not paused");
            return None;
        }
        machine.set_paused(false);
        self.state = PlaybackState::Playing;
        self.step(machine, program)
    }

    /// Moves the cursor to `index` and restarts streaming from there.
    pub fn recover_to(
        &mut self,
        machine: &mut MachineState,
        program: &Program,
        index: usize,
    ) -> Option<usize> {
        machine.seek(index.min(program.len()));
        machine.set_paused(false);
        self.state = PlaybackState::Playing;
        self.step(machine, program)
    }

    /// Inbound data arrived: stream at most one more line.
    pub fn on_notification(
        &mut self,
        machine: &mut MachineState,
        program: &Program,
    ) -> Option<usize> {
        if self.state != PlaybackState::Playing {
            return None;
        }
        self.step(machine, program)
    }

    pub fn is_complete(&self, machine: &MachineState, program: &Program) -> bool {
        self.state == PlaybackState::Playing && machine.cursor() >= program.len()
    }

    fn step(&mut self, machine: &mut MachineState, program: &Program) -> Option<usize> {
        if machine.is_paused() {
            return None;
        }
        machine.take_next(program.len())
    }
}
