//! # pmogrbl - G-code streaming for GRBL controllers
//!
//! Streams a G-code program line by line over a serial link, paced by the
//! controller's responses, while tracking the machine position from
//! periodic status reports.
//!
//! ## Features
//!
//! - Play / pause / resume of a loaded program
//! - Recovery from the last sent line or from the nearest position
//! - Manual jogging within soft travel limits
//! - Fetching and editing of the `$` parameter table
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pmogrbl::{Program, SenderOptions, SenderWorker};
//!
//! let (worker, handle) = SenderWorker::spawn(SenderOptions::default());
//! let events = handle.subscribe();
//! handle.connect("/dev/ttyUSB0", 115_200).await?;
//! handle.load_file("part.nc").await?;
//! handle.play().await?;
//! ```
//!
//! [`GrblSender`] is the synchronous core; [`SenderWorker`] drives it from
//! a tokio task and is what applications normally use.

pub mod channel;
pub mod config_ext;
pub mod decoder;
pub mod errors;
pub mod events;
pub mod gcode;
pub mod model;
pub mod playback;
pub mod poller;
pub mod program;
pub mod recovery;
pub mod sender;
pub mod serial;
pub mod settings;
pub mod worker;

pub use channel::{CommandChannel, MemoryChannel};
pub use config_ext::GrblConfigExt;
pub use errors::{GrblError, Result};
pub use events::{EventBus, SenderEvent};
pub use model::{
    Axis, AxisRange, JogDirection, MachineState, PlaybackState, Position, Setting,
    SettingsSnapshot, TravelLimits,
};
pub use program::Program;
pub use recovery::NearestLine;
pub use sender::{GrblSender, SenderOptions, SenderStatus};
pub use serial::{ChunkReceiver, SerialChannel};
pub use worker::{SenderCommand, SenderHandle, SenderWorker};
