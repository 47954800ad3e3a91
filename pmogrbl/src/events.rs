use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

use crate::model::{Position, Setting};

/// Notifications emitted by the sender towards its caller (UI, CLI, ...).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SenderEvent {
    PositionChanged(Position),
    LineSent { index: usize, text: String },
    LogLine(String),
    SettingsFetched(Vec<Setting>),
    LinkError(String),
    RecoveryFailed(String),
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<SenderEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<SenderEvent> {
        let (tx, rx) = unbounded::<SenderEvent>();
        {
            let mut subscribers = self.subscribers.lock().expect("EventBus mutex poisoned");
            subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn broadcast(&self, event: SenderEvent) {
        let mut subscribers = self.subscribers.lock().expect("EventBus mutex poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn log(&self, line: impl Into<String>) {
        self.broadcast(SenderEvent::LogLine(line.into()));
    }
}
