#![cfg_attr(docsrs, feature(doc_cfg))]
//! Client for the Rainforest EMU-2 energy monitor.
//!
//! Re-exports the wire and notification crates and adds [`Session`], which
//! runs the read loop over any async byte stream and dispatches decoded
//! notifications to registered callbacks.
//!
//! ```rust,no_run
//! use emu_power::{Command, NotificationKind, SessionBuilder, SessionError, Target};
//!
//! # async fn run(port: tokio::io::DuplexStream) -> Result<(), SessionError> {
//! let session = SessionBuilder::from_stream(port).build()?;
//! session.callback(NotificationKind::InstantaneousDemand, |n| println!("{n}"));
//! session.callback(Target::Fallback, |n| println!("other: {}", n.kind()));
//! session.start().await?;
//! session.issue_command(&Command::get_instantaneous_demand()).await?;
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::io;

use thiserror::Error;

pub use emu_types as types;
pub use emu_wire as wire;

pub mod callbacks;
pub mod line;
pub mod session;
pub mod stats;

pub use callbacks::{CallbackRegistry, Dispatched, FailureHandler, Handler, Target};
pub use emu_types::{
    decode, Body, DecodeError, DecodeFailure, Notification, NotificationKind, RegistryError,
    TypeRegistry,
};
pub use emu_wire::{Command, CommandError, ScheduleEvent};
pub use line::LineReader;
pub use session::{Session, SessionBuilder};
pub use stats::{SessionStats, StatsSnapshot};

/// Errors surfaced by a [`Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start` was called while the read loop is active.
    #[error("session is already running")]
    AlreadyRunning,
    /// The operation needs an active read loop.
    #[error("session is not running")]
    NotRunning,
    /// A previous read loop panicked; the transport is gone.
    #[error("session is closed")]
    Closed,
    /// Reading from or writing to the device failed.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("read loop failed: {0}")]
    Join(String),
}
