//! Byte link towards the controller.
//!
//! Writing is synchronous and never waits for the device: an implementation
//! only queues bytes. Inbound data travels separately as opaque text chunks
//! (see [`crate::serial`]); one chunk may hold part of a message, several
//! messages, or nothing useful at all.

use std::sync::{Arc, Mutex};

use crate::errors::{GrblError, Result};

pub const LINE_TERMINATOR: &str = "\n";

pub trait CommandChannel: Send {
    /// Human readable name of the link (port name, ...).
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Queues raw bytes. Fails with [`GrblError::Link`] when the link is not open.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    fn close(&mut self);

    /// Sends one command line, terminator appended.
    fn send(&mut self, text: &str) -> Result<()> {
        let mut framed = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        framed.push_str(text);
        framed.push_str(LINE_TERMINATOR);
        self.write(framed.as_bytes())
    }

    /// Sends a real-time command (`?`) as-is, without terminator.
    fn send_realtime(&mut self, text: &str) -> Result<()> {
        self.write(text.as_bytes())
    }
}

#[derive(Debug, Default)]
struct MemoryLink {
    open: bool,
    frames: Vec<Vec<u8>>,
}

/// In-memory link keeping every written frame.
///
/// Clones share the same link, so a test can keep one handle while the
/// sender owns another.
#[derive(Clone, Debug, Default)]
pub struct MemoryChannel {
    name: String,
    link: Arc<Mutex<MemoryLink>>,
}

impl MemoryChannel {
    pub fn open(name: impl Into<String>) -> Self {
        let channel = Self {
            name: name.into(),
            link: Arc::default(),
        };
        channel.set_open(true);
        channel
    }

    pub fn set_open(&self, open: bool) {
        self.lock().open = open;
    }

    /// Every frame written so far, decoded lossily.
    pub fn frames(&self) -> Vec<String> {
        self.lock()
            .frames
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    /// Newline-terminated frames only, terminator stripped.
    pub fn lines(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter_map(|frame| frame.strip_suffix(LINE_TERMINATOR).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().frames.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryLink> {
        self.link.lock().expect("MemoryChannel mutex poisoned")
    }
}

impl CommandChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut link = self.lock();
        if !link.open {
            return Err(GrblError::link(format!("{} is not open", self.name)));
        }
        link.frames.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.set_open(false);
    }
}
