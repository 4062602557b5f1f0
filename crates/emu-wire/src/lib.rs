#![cfg_attr(docsrs, feature(doc_cfg))]
//! EMU-2 wire layer: transport-agnostic handling of the device's line-broken,
//! multi-root XML stream.
//!
//! The device emits one self-contained fragment per event with no enclosing
//! document and no length prefix:
//!
//! ```text
//! <InstantaneousDemand>
//!   <DeviceMacId>0xd8d5b90000001234</DeviceMacId>
//!   <Demand>0x001000</Demand>
//! </InstantaneousDemand>
//! ```
//!
//! [`Reassembler`] recovers fragment boundaries from such a stream using a
//! fixed alphabet of root tags, the [`field`] functions coerce field text into
//! typed scalars, and [`Command`] renders outbound command fragments.
//!
//! ```rust
//! use emu_wire::{Command, Reassembler};
//!
//! let mut reassembler = Reassembler::new(["TimeCluster"]);
//! let lines = ["<TimeCluster>", "<UTCTime>0x1c6f1b2a</UTCTime>", "</TimeCluster>"];
//! let fragments: Vec<_> = reassembler.fragments(lines).collect();
//! assert_eq!(fragments.len(), 1);
//! assert_eq!(fragments[0].fields.get("UTCTime"), Some("0x1c6f1b2a"));
//!
//! let wire = Command::get_time().encode();
//! assert_eq!(&wire[..], b"<Command><Name>get_time</Name></Command>");
//! ```

pub mod command;
pub mod field;
pub mod fragment;
pub mod token;

/// Wire protocol constants.
pub mod consts {
    /// Seconds between the Unix epoch and 2000-01-01T00:00:00Z, the device epoch.
    pub const UNIX_TIME_OFFSET: u64 = 946_684_800;
    /// Line terminator used by the device's serial stream.
    pub const DEFAULT_LINE_TERMINATOR: &[u8] = b"\r\n";
    /// Root element of every outbound command fragment.
    pub const COMMAND_ROOT: &str = "Command";
    /// Width in hex digits used for command integers unless a command overrides it.
    pub const DEFAULT_HEX_WIDTH: usize = 8;
    /// Width in hex digits of the schedule `Frequency` field.
    pub const FREQUENCY_HEX_WIDTH: usize = 4;
}

pub use command::{encode_command, Command, CommandError, FieldValue, ScheduleEvent};
pub use field::{
    parse_amount, parse_bool, parse_hex_integer, parse_hex_text, parse_text, parse_timestamp,
    FieldError,
};
pub use fragment::{FieldMap, Fragments, LineOutcome, RawFragment, Reassembler};
pub use token::{tokenize_line, LineTokens, Token, TokenError};
