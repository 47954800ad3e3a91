//! The sender core: one object owning the link, the loaded program and the
//! machine state, reacting to two kinds of input only: caller operations
//! and inbound data chunks (plus the status poll tick).
//!
//! Nothing here blocks or waits for the device. Failures are handled where
//! they are detected and turned into [`SenderEvent`]s.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::errors::{GrblError, Result};
use crate::events::{EventBus, SenderEvent};
use crate::model::{
    Axis, JogDirection, MachineState, PlaybackState, Position, SettingsSnapshot, TravelLimits,
};
use crate::playback::PlaybackController;
use crate::poller::{DEFAULT_POLL_INTERVAL, StatusPoller};
use crate::program::Program;
use crate::recovery::RecoveryEngine;
use crate::serial::DEFAULT_BAUD_RATE;
use crate::settings::SettingsSync;

pub const DEFAULT_JOG_STEP: f64 = 1.0;

/// Tunables of a sender, usually built from the configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SenderOptions {
    pub poll_interval: Duration,
    pub limits: TravelLimits,
    pub jog_step: f64,
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            limits: TravelLimits::default(),
            jog_step: DEFAULT_JOG_STEP,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Point-in-time view of the sender, for callers outside the worker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SenderStatus {
    pub machine: MachineState,
    pub playback: PlaybackState,
    pub connected: bool,
    pub program_len: usize,
}

pub struct GrblSender {
    channel: Option<Box<dyn CommandChannel>>,
    program: Program,
    machine: MachineState,
    playback: PlaybackController,
    poller: StatusPoller,
    recovery: RecoveryEngine,
    settings: SettingsSync,
    events: EventBus,
    jog_step: f64,
}

impl GrblSender {
    pub fn new(options: &SenderOptions, events: EventBus) -> Self {
        Self {
            channel: None,
            program: Program::default(),
            machine: MachineState::new(options.limits),
            playback: PlaybackController::new(),
            poller: StatusPoller::new(options.poll_interval),
            recovery: RecoveryEngine,
            settings: SettingsSync::new(),
            events,
            jog_step: options.jog_step,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn machine(&self) -> &MachineState {
        &self.machine
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn settings_snapshot(&self) -> &SettingsSnapshot {
        self.settings.snapshot()
    }

    pub fn is_fetching_settings(&self) -> bool {
        self.settings.is_fetching()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    pub fn set_limits(&mut self, limits: TravelLimits) {
        self.machine.set_limits(limits);
    }

    pub fn status(&self) -> SenderStatus {
        SenderStatus {
            machine: self.machine.clone(),
            playback: self.playback.state(),
            connected: self.is_connected(),
            program_len: self.program.len(),
        }
    }

    // ------------------------------------------------------------------
    // Link
    // ------------------------------------------------------------------

    /// Takes ownership of an open link and starts status polling.
    pub fn attach_channel(&mut self, channel: Box<dyn CommandChannel>) {
        self.detach_channel();
        let name = channel.name().to_string();
        info!(port = %name, "Link attached");
        self.channel = Some(channel);
        self.poller.enable();
        self.events.log(format!("Connected to {name}"));
    }

    pub fn detach_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            info!(port = %channel.name(), "Link detached");
            channel.close();
        }
        self.poller.disable();
        self.settings.abort_fetch();
    }

    /// The link went away on its own (device unplugged, reader stopped).
    /// Reported once: without an attached link this is a no-op.
    pub fn on_link_lost(&mut self) {
        let Some(name) = self.channel.as_ref().map(|c| c.name().to_string()) else {
            return;
        };
        warn!(port = %name, "Serial link lost");
        self.detach_channel();
        self.events.log(format!("Serial link closed: {name}"));
        self.events.broadcast(SenderEvent::LinkError(format!("{name}: serial link closed")));
    }

    pub fn report_connect_failure(&mut self, port: &str, err: &GrblError) {
        warn!(port, "Failed to connect: {}", err);
        self.events.log("Failed to connect");
        self.events.broadcast(SenderEvent::LinkError(format!("{port}: {err}")));
    }

    // ------------------------------------------------------------------
    // Program and playback
    // ------------------------------------------------------------------

    pub fn load_program(&mut self, program: Program) {
        info!(lines = program.len(), "Program loaded");
        self.events.log(format!("Loaded {} lines", program.len()));
        self.program = program;
        self.playback.load(&mut self.machine);
    }

    /// Reads and loads a program file. On failure the current program is
    /// kept and the failure is reported as a log line.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        match Program::from_file(path) {
            Ok(program) => {
                let len = program.len();
                self.load_program(program);
                Ok(len)
            }
            Err(err) => {
                warn!("{}", err);
                self.events.log(err.to_string());
                Err(err)
            }
        }
    }

    pub fn play(&mut self) {
        if let Some(index) = self.playback.play(&mut self.machine, &self.program) {
            self.send_line(index);
        }
    }

    pub fn pause(&mut self) {
        self.playback.pause(&mut self.machine);
        debug!(cursor = self.machine.cursor(), "Playback paused");
    }

    pub fn resume(&mut self) {
        if let Some(index) = self.playback.resume(&mut self.machine, &self.program) {
            self.send_line(index);
        }
    }

    pub fn recover_to_last_sent(&mut self) -> Result<usize> {
        match self.recovery.last_sent_target(&self.machine, &self.program) {
            Ok(index) => {
                self.recover_to(index);
                Ok(index)
            }
            Err(err) => Err(self.recovery_failed(err)),
        }
    }

    pub fn recover_to_position(&mut self, target: Position) -> Result<usize> {
        match self.recovery.nearest_line(&self.program, target) {
            Ok(nearest) => {
                self.recover_to(nearest.index);
                Ok(nearest.index)
            }
            Err(err) => Err(self.recovery_failed(err)),
        }
    }

    fn recover_to(&mut self, index: usize) {
        let text = self.program.line(index).unwrap_or_default();
        info!(index, line = text, "Recovering");
        self.events.log(format!("Recovering to line {index}: {text}"));
        if let Some(index) = self
            .playback
            .recover_to(&mut self.machine, &self.program, index)
        {
            self.send_line(index);
        }
    }

    fn recovery_failed(&self, err: GrblError) -> GrblError {
        let reason = match &err {
            GrblError::RecoveryUnavailable(reason) => reason.clone(),
            other => other.to_string(),
        };
        warn!("{}", reason);
        self.events.log(reason.clone());
        self.events.broadcast(SenderEvent::RecoveryFailed(reason));
        err
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Starts a parameter dump. Status polling is suspended until the dump
    /// completes (see [`GrblSender::handle_data`]).
    pub fn fetch_settings(&mut self) -> Result<()> {
        self.poller.disable();
        let command = self.settings.begin_fetch();
        if let Err(err) = self.transmit(command) {
            self.settings.abort_fetch();
            if self.is_connected() {
                self.poller.enable();
            }
            return Err(err);
        }
        Ok(())
    }

    /// Sends a set-command for each edited value that differs from the
    /// last fetch. Returns the commands actually written.
    pub fn apply_settings(&mut self, edited: &HashMap<String, String>) -> Vec<String> {
        let mut sent = Vec::new();
        for command in self.settings.changes(edited) {
            if self.transmit(&command).is_ok() {
                debug!(command = %command, "Setting sent");
                sent.push(command);
            }
        }
        self.events.log("Sent modified GRBL settings.");
        sent
    }

    // ------------------------------------------------------------------
    // Manual commands
    // ------------------------------------------------------------------

    pub fn send_raw(&mut self, command: &str) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(());
        }
        self.transmit(command)
    }

    /// Moves one jog step along `axis`, within the travel limits.
    /// Returns false when nothing was sent.
    pub fn jog(&mut self, axis: Axis, direction: JogDirection) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(target) = self.machine.jog_target(axis, direction, self.jog_step) else {
            debug!(axis = ?axis, direction = ?direction, "Jog refused by travel limits");
            return false;
        };

        let sign = match direction {
            JogDirection::Positive => "",
            JogDirection::Negative => "-",
        };
        self.machine.set_position(target);
        let command = format!("G91 G0 {}{}{}", axis.letter(), sign, self.jog_step);
        let sent = self.transmit(&command).is_ok();
        self.events.broadcast(SenderEvent::PositionChanged(target));
        sent
    }

    // ------------------------------------------------------------------
    // Event sources
    // ------------------------------------------------------------------

    /// Status poll timer fired.
    pub fn poll_tick(&mut self) {
        let Some(query) = self.poller.poll() else {
            return;
        };
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if let Err(err) = channel.send_realtime(query) {
            // Le writer est mort : on détache au lieu d'échouer à chaque tick
            debug!("Status query not sent: {}", err);
            self.on_link_lost();
        }
    }

    /// Inbound chunk from the link. Returns the settings snapshot when this
    /// chunk completed a pending fetch.
    pub fn handle_data(&mut self, chunk: &str) -> Option<SettingsSnapshot> {
        debug!(chunk = %chunk.escape_debug(), "Data received");
        self.events.log(format!("<< {chunk}"));

        if let Some(position) = self.poller.observe(chunk) {
            self.machine.set_position(position);
            self.events.broadcast(SenderEvent::PositionChanged(position));
        }

        let fetched = self.settings.accept(chunk);
        if let Some(snapshot) = &fetched {
            if self.is_connected() {
                self.poller.enable();
            }
            self.events.broadcast(SenderEvent::SettingsFetched(snapshot.sorted()));
        }

        if let Some(index) = self
            .playback
            .on_notification(&mut self.machine, &self.program)
        {
            self.send_line(index);
        }

        fetched
    }

    // ------------------------------------------------------------------
    // Transmission
    // ------------------------------------------------------------------

    fn send_line(&mut self, index: usize) {
        let Some(text) = self.program.line(index).map(str::to_string) else {
            return;
        };
        // Le curseur a déjà avancé : un échec d'envoi ne le fait pas reculer
        if self.transmit(&text).is_ok() {
            self.events.broadcast(SenderEvent::LineSent { index, text });
        }
    }

    fn transmit(&mut self, text: &str) -> Result<()> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.send(text),
            None => Err(GrblError::link("serial link is not open")),
        };

        match &result {
            Ok(()) => {
                debug!(command = text, "Command sent");
                self.events.log(format!(">> {text}"));
            }
            Err(err) => {
                warn!(command = text, "Send failed: {}", err);
                self.events.log(format!("Cannot send '{text}': {err}"));
                self.events.broadcast(SenderEvent::LinkError(err.to_string()));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    fn connected() -> (GrblSender, MemoryChannel) {
        let link = MemoryChannel::open("mem");
        let mut sender = GrblSender::new(&SenderOptions::default(), EventBus::new());
        sender.attach_channel(Box::new(link.clone()));
        (sender, link)
    }

    #[test]
    fn status_frame_replaces_position() {
        let (mut sender, _link) = connected();
        sender.handle_data("<Idle|MPos:5.000,6.000,7.000|FS:0,0>\r\n");
        assert_eq!(sender.machine().position(), Position::new(5.0, 6.0, 7.0));
        sender.handle_data("garbage without frame");
        assert_eq!(sender.machine().position(), Position::new(5.0, 6.0, 7.0));
    }

    #[test]
    fn poll_tick_sends_realtime_query_only_when_enabled() {
        let (mut sender, link) = connected();
        sender.poll_tick();
        assert_eq!(link.frames(), vec!["?"]);

        sender.fetch_settings().unwrap();
        link.clear();
        sender.poll_tick();
        assert!(link.frames().is_empty());
    }

    #[test]
    fn dead_link_is_reported_once_and_detached() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let link = MemoryChannel::open("mem");
        let mut sender = GrblSender::new(&SenderOptions::default(), events);
        sender.attach_channel(Box::new(link.clone()));
        link.set_open(false);

        sender.poll_tick();
        sender.poll_tick();
        sender.poll_tick();

        let received: Vec<_> = rx.try_iter().collect();
        let link_errors = received
            .iter()
            .filter(|e| matches!(e, SenderEvent::LinkError(_)))
            .count();
        assert_eq!(link_errors, 1);
        assert!(received.contains(&SenderEvent::LogLine("Serial link closed: mem".into())));
        assert!(!sender.is_connected());
        assert!(!sender.poller().is_enabled());
    }

    #[test]
    fn send_raw_trims_and_skips_empty() {
        let (mut sender, link) = connected();
        sender.send_raw("   ").unwrap();
        sender.send_raw("  $H ").unwrap();
        assert_eq!(link.lines(), vec!["$H"]);
    }

    #[test]
    fn send_without_link_is_reported() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let mut sender = GrblSender::new(&SenderOptions::default(), events);

        assert!(sender.send_raw("G0 X1").unwrap_err().is_link_error());
        let received: Vec<_> = rx.try_iter().collect();
        assert!(received.iter().any(|e| matches!(e, SenderEvent::LinkError(_))));
        assert!(received.iter().any(|e| matches!(e, SenderEvent::LogLine(_))));
    }

    #[test]
    fn jog_sends_relative_move_within_limits() {
        let (mut sender, link) = connected();
        assert!(sender.jog(Axis::Y, JogDirection::Positive));
        assert!(!sender.jog(Axis::X, JogDirection::Negative));
        assert!(sender.jog(Axis::Y, JogDirection::Negative));

        assert_eq!(link.lines(), vec!["G91 G0 Y1", "G91 G0 Y-1"]);
        assert_eq!(sender.machine().position(), Position::ORIGIN);
    }

    #[test]
    fn jog_without_link_does_nothing() {
        let mut sender = GrblSender::new(&SenderOptions::default(), EventBus::new());
        assert!(!sender.jog(Axis::X, JogDirection::Positive));
        assert_eq!(sender.machine().position(), Position::ORIGIN);
    }
}
