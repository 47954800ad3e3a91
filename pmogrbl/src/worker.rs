//! Background worker driving a [`GrblSender`].
//!
//! The sender is owned by a single tokio task. Caller operations arrive on
//! a command queue, inbound serial chunks on the link's chunk receiver, and
//! the status poll on a timer; all three are serialised by one `select!`
//! loop, so the sender never needs a lock.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::errors::{GrblError, Result};
use crate::events::{EventBus, SenderEvent};
use crate::model::{Axis, JogDirection, Position, SettingsSnapshot};
use crate::program::Program;
use crate::sender::{GrblSender, SenderOptions, SenderStatus};
use crate::serial::{ChunkReceiver, SerialChannel};

/// Commands sent to the background worker.
pub enum SenderCommand {
    /// Hands an already open link to the sender.
    Attach {
        channel: Box<dyn CommandChannel>,
        chunks: ChunkReceiver,
    },
    Connect {
        port: String,
        baud_rate: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect,
    LoadProgram(Program),
    LoadFile {
        path: PathBuf,
        reply: oneshot::Sender<Result<usize>>,
    },
    Play,
    Pause,
    Resume,
    RecoverToLastSent(oneshot::Sender<Result<usize>>),
    RecoverToPosition {
        target: Position,
        reply: oneshot::Sender<Result<usize>>,
    },
    FetchSettings(oneshot::Sender<Result<SettingsSnapshot>>),
    ApplySettings {
        edited: HashMap<String, String>,
        reply: oneshot::Sender<Vec<String>>,
    },
    SendRaw {
        command: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Jog {
        axis: Axis,
        direction: JogDirection,
        reply: oneshot::Sender<bool>,
    },
    Status(oneshot::Sender<SenderStatus>),
    Shutdown,
}

/// Handle to the spawned worker task.
pub struct SenderWorker {
    join_handle: JoinHandle<()>,
}

impl SenderWorker {
    pub fn spawn(options: SenderOptions) -> (Self, SenderHandle) {
        let (tx, mut rx) = mpsc::channel(32);
        let events = EventBus::new();
        let handle = SenderHandle {
            tx,
            events: events.clone(),
        };

        let join_handle = tokio::spawn(async move {
            info!("Starting GRBL sender worker");

            let mut state = WorkerState::new(&options, events);
            // Intervalle déjà borné par le poller, jamais nul
            let mut ticker = time::interval(state.sender.poller().interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => {
                            state.handle_command(cmd);
                            if state.shutdown {
                                break;
                            }
                        }
                        // Tous les handles ont été abandonnés
                        None => break,
                    },
                    chunk = next_chunk(&mut state.chunks) => state.handle_chunk(chunk),
                    _ = ticker.tick() => state.sender.poll_tick(),
                }
            }

            state.sender.detach_channel();
            state.fail_pending_fetch(GrblError::WorkerClosed);
            info!("GRBL sender worker stopped");
        });

        (Self { join_handle }, handle)
    }

    pub async fn wait(self) -> anyhow::Result<()> {
        if let Err(err) = self.join_handle.await {
            if err.is_cancelled() {
                warn!("Sender worker task cancelled: {err}");
                return Ok(());
            }
            return Err(anyhow!("Sender worker join error: {}", err));
        }
        Ok(())
    }
}

async fn next_chunk(chunks: &mut Option<ChunkReceiver>) -> Option<String> {
    match chunks {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct WorkerState {
    sender: GrblSender,
    chunks: Option<ChunkReceiver>,
    pending_fetch: Option<oneshot::Sender<Result<SettingsSnapshot>>>,
    shutdown: bool,
}

impl WorkerState {
    fn new(options: &SenderOptions, events: EventBus) -> Self {
        Self {
            sender: GrblSender::new(options, events),
            chunks: None,
            pending_fetch: None,
            shutdown: false,
        }
    }

    fn handle_command(&mut self, cmd: SenderCommand) {
        match cmd {
            SenderCommand::Attach { channel, chunks } => self.attach(channel, chunks),
            SenderCommand::Connect {
                port,
                baud_rate,
                reply,
            } => {
                let result = match SerialChannel::open(&port, baud_rate) {
                    Ok((channel, chunks)) => {
                        self.attach(Box::new(channel), chunks);
                        Ok(())
                    }
                    Err(err) => {
                        self.sender.report_connect_failure(&port, &err);
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
            SenderCommand::Disconnect => self.detach(),
            SenderCommand::LoadProgram(program) => self.sender.load_program(program),
            SenderCommand::LoadFile { path, reply } => {
                let _ = reply.send(self.sender.load_file(&path));
            }
            SenderCommand::Play => self.sender.play(),
            SenderCommand::Pause => self.sender.pause(),
            SenderCommand::Resume => self.sender.resume(),
            SenderCommand::RecoverToLastSent(reply) => {
                let _ = reply.send(self.sender.recover_to_last_sent());
            }
            SenderCommand::RecoverToPosition { target, reply } => {
                let _ = reply.send(self.sender.recover_to_position(target));
            }
            SenderCommand::FetchSettings(reply) => {
                self.fail_pending_fetch(GrblError::FetchSuperseded);
                match self.sender.fetch_settings() {
                    Ok(()) => self.pending_fetch = Some(reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            SenderCommand::ApplySettings { edited, reply } => {
                let _ = reply.send(self.sender.apply_settings(&edited));
            }
            SenderCommand::SendRaw { command, reply } => {
                let _ = reply.send(self.sender.send_raw(&command));
            }
            SenderCommand::Jog {
                axis,
                direction,
                reply,
            } => {
                let _ = reply.send(self.sender.jog(axis, direction));
            }
            SenderCommand::Status(reply) => {
                let _ = reply.send(self.sender.status());
            }
            SenderCommand::Shutdown => {
                debug!("Shutdown requested");
                self.shutdown = true;
            }
        }
    }

    fn handle_chunk(&mut self, chunk: Option<String>) {
        match chunk {
            Some(chunk) => {
                if let Some(snapshot) = self.sender.handle_data(&chunk) {
                    if let Some(reply) = self.pending_fetch.take() {
                        let _ = reply.send(Ok(snapshot));
                    }
                }
            }
            None => {
                self.chunks = None;
                self.sender.on_link_lost();
                self.fail_pending_fetch(GrblError::link("serial link closed"));
            }
        }
    }

    fn attach(&mut self, channel: Box<dyn CommandChannel>, chunks: ChunkReceiver) {
        self.fail_pending_fetch(GrblError::link("serial link replaced"));
        self.sender.attach_channel(channel);
        self.chunks = Some(chunks);
    }

    fn detach(&mut self) {
        self.chunks = None;
        self.sender.detach_channel();
        self.fail_pending_fetch(GrblError::link("serial link closed"));
    }

    fn fail_pending_fetch(&mut self, err: GrblError) {
        if let Some(reply) = self.pending_fetch.take() {
            let _ = reply.send(Err(err));
        }
    }
}

/// Cloneable front-end to a running [`SenderWorker`].
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::Sender<SenderCommand>,
    events: EventBus,
}

impl SenderHandle {
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<SenderEvent> {
        self.events.subscribe()
    }

    async fn send(&self, cmd: SenderCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| GrblError::WorkerClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SenderCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| GrblError::WorkerClosed)
    }

    pub async fn attach(
        &self,
        channel: Box<dyn CommandChannel>,
        chunks: ChunkReceiver,
    ) -> Result<()> {
        self.send(SenderCommand::Attach { channel, chunks }).await
    }

    pub async fn connect(&self, port: impl Into<String>, baud_rate: u32) -> Result<()> {
        let port = port.into();
        self.request(|reply| SenderCommand::Connect {
            port,
            baud_rate,
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(SenderCommand::Disconnect).await
    }

    pub async fn load_program(&self, program: Program) -> Result<()> {
        self.send(SenderCommand::LoadProgram(program)).await
    }

    pub async fn load_file(&self, path: impl Into<PathBuf>) -> Result<usize> {
        let path = path.into();
        self.request(|reply| SenderCommand::LoadFile { path, reply })
            .await?
    }

    pub async fn play(&self) -> Result<()> {
        self.send(SenderCommand::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(SenderCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(SenderCommand::Resume).await
    }

    pub async fn recover_to_last_sent(&self) -> Result<usize> {
        self.request(SenderCommand::RecoverToLastSent).await?
    }

    pub async fn recover_to_position(&self, target: Position) -> Result<usize> {
        self.request(|reply| SenderCommand::RecoverToPosition { target, reply })
            .await?
    }

    /// Resolves once the controller acknowledged the dump.
    pub async fn fetch_settings(&self) -> Result<SettingsSnapshot> {
        self.request(SenderCommand::FetchSettings).await?
    }

    pub async fn apply_settings(&self, edited: HashMap<String, String>) -> Result<Vec<String>> {
        self.request(|reply| SenderCommand::ApplySettings { edited, reply })
            .await
    }

    pub async fn send_raw(&self, command: impl Into<String>) -> Result<()> {
        let command = command.into();
        self.request(|reply| SenderCommand::SendRaw { command, reply })
            .await?
    }

    pub async fn jog(&self, axis: Axis, direction: JogDirection) -> Result<bool> {
        self.request(|reply| SenderCommand::Jog {
            axis,
            direction,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<SenderStatus> {
        self.request(SenderCommand::Status).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SenderCommand::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::model::PlaybackState;

    #[tokio::test]
    async fn commands_after_shutdown_report_worker_closed() {
        let (worker, handle) = SenderWorker::spawn(SenderOptions::default());
        handle.shutdown().await.unwrap();
        worker.wait().await.unwrap();

        assert!(matches!(handle.play().await, Err(GrblError::WorkerClosed)));
    }

    #[tokio::test]
    async fn status_reflects_loaded_program() {
        let (worker, handle) = SenderWorker::spawn(SenderOptions::default());
        let (_tx, chunks) = mpsc::unbounded_channel();
        handle
            .attach(Box::new(MemoryChannel::open("mem")), chunks)
            .await
            .unwrap();
        handle
            .load_program(Program::from_lines(["G0 X1", "G0 X2"]))
            .await
            .unwrap();
        handle.play().await.unwrap();

        let status = handle.status().await.unwrap();
        assert!(status.connected);
        assert_eq!(status.program_len, 2);
        assert_eq!(status.playback, PlaybackState::Playing);
        assert_eq!(status.machine.last_sent(), Some(0));

        handle.shutdown().await.unwrap();
        worker.wait().await.unwrap();
    }
}
