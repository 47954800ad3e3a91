//! Serial link to the controller, backed by `tokio-serial`.
//!
//! The port is split in two background tasks: a writer draining an
//! unbounded queue (so [`CommandChannel::write`] never blocks) and a reader
//! forwarding whatever bytes arrive as text chunks.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info, warn};

use crate::channel::CommandChannel;
use crate::errors::{GrblError, Result};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
const READ_BUFFER_SIZE: usize = 1024;

/// Inbound side of a link: decoded text, one item per read.
///
/// A multi-byte character cut by a read boundary is held back until the
/// rest of it arrives; only truly invalid bytes become U+FFFD.
pub type ChunkReceiver = mpsc::UnboundedReceiver<String>;

pub struct SerialChannel {
    name: String,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl SerialChannel {
    /// Opens `port` in 8N1 at `baud_rate`. Must run inside a tokio runtime.
    pub fn open(port: &str, baud_rate: u32) -> Result<(Self, ChunkReceiver)> {
        let builder = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One);
        let stream = SerialStream::open(&builder)?;
        info!(port, baud_rate, "Serial port opened");
        Ok(Self::from_stream(port, stream))
    }

    /// Wraps any byte stream (serial port, pty, in-memory duplex...).
    pub fn from_stream<S>(name: &str, stream: S) -> (Self, ChunkReceiver)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<String>();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let port = name.to_string();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            let mut pending = Vec::new();
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        debug!(port = %port, "Serial link closed by peer");
                        if !pending.is_empty() {
                            let _ = chunk_tx.send(String::from_utf8_lossy(&pending).into_owned());
                        }
                        break;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        let chunk = take_text(&mut pending);
                        if chunk.is_empty() {
                            continue;
                        }
                        if chunk_tx.send(chunk).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(port = %port, "Serial read failed: {}", err);
                        break;
                    }
                }
            }
        });

        let port = name.to_string();
        tokio::spawn(async move {
            while let Some(bytes) = write_rx.recv().await {
                if let Err(err) = write_half.write_all(&bytes).await {
                    warn!(port = %port, "Serial write failed: {}", err);
                    break;
                }
                if let Err(err) = write_half.flush().await {
                    warn!(port = %port, "Serial flush failed: {}", err);
                    break;
                }
            }
            debug!(port = %port, "Serial writer stopped");
        });

        (
            Self {
                name: name.to_string(),
                writer: Some(write_tx),
                reader: Some(reader),
            },
            chunk_rx,
        )
    }
}

impl CommandChannel for SerialChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.writer.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_ref() else {
            return Err(GrblError::link(format!("{} is not open", self.name)));
        };
        writer
            .send(bytes.to_vec())
            .map_err(|_| GrblError::link(format!("{} writer has stopped", self.name)))
    }

    fn close(&mut self) {
        // Le writer s'arrête de lui-même quand la file est fermée
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drains the decodable prefix of `pending`, keeping an incomplete trailing
/// UTF-8 sequence for the next read.
fn take_text(pending: &mut Vec<u8>) -> String {
    let split = match std::str::from_utf8(pending) {
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        _ => pending.len(),
    };
    let tail = pending.split_off(split);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = tail;
    text
}
