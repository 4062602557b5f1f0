//! Outbound command fragments.
//!
//! A command renders as a single `<Command>` element whose first child is the
//! command `Name`, followed by its parameters in insertion order:
//!
//! ```text
//! <Command><Name>set_schedule</Name><Event>demand</Event><Frequency>0x003c</Frequency><Enabled>Y</Enabled></Command>
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::consts::{COMMAND_ROOT, DEFAULT_HEX_WIDTH, FREQUENCY_HEX_WIDTH};

/// Errors raised while constructing a command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Events whose reporting schedule can be queried or changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleEvent {
    Time,
    Message,
    Price,
    Summation,
    Demand,
    ScheduledPrices,
    ProfileData,
    BillingPeriod,
    BlockPeriod,
}

impl ScheduleEvent {
    pub const ALL: [ScheduleEvent; 9] = [
        ScheduleEvent::Time,
        ScheduleEvent::Message,
        ScheduleEvent::Price,
        ScheduleEvent::Summation,
        ScheduleEvent::Demand,
        ScheduleEvent::ScheduledPrices,
        ScheduleEvent::ProfileData,
        ScheduleEvent::BillingPeriod,
        ScheduleEvent::BlockPeriod,
    ];

    /// Wire spelling of the event.
    pub const fn as_str(self) -> &'static str {
        match self {
            ScheduleEvent::Time => "time",
            ScheduleEvent::Message => "message",
            ScheduleEvent::Price => "price",
            ScheduleEvent::Summation => "summation",
            ScheduleEvent::Demand => "demand",
            ScheduleEvent::ScheduledPrices => "scheduled_prices",
            ScheduleEvent::ProfileData => "profile_data",
            ScheduleEvent::BillingPeriod => "billing_period",
            ScheduleEvent::BlockPeriod => "block_period",
        }
    }
}

impl FromStr for ScheduleEvent {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduleEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<_> = ScheduleEvent::ALL.iter().map(|e| e.as_str()).collect();
                CommandError::InvalidArgument(format!(
                    "event '{s}' must be one of {}",
                    allowed.join(", ")
                ))
            })
    }
}

impl fmt::Display for ScheduleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter value of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Emitted verbatim.
    Text(String),
    /// Emitted as `Y` or `N`.
    Flag(bool),
    /// Emitted as `0x` followed by `width` zero-padded lowercase hex digits.
    Hex { value: u64, width: usize },
}

impl FieldValue {
    pub fn hex(value: u64) -> Self {
        FieldValue::Hex {
            value,
            width: DEFAULT_HEX_WIDTH,
        }
    }

    /// Wire text of the value.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Flag(true) => "Y".to_string(),
            FieldValue::Flag(false) => "N".to_string(),
            FieldValue::Hex { value, width } => format!("0x{value:0width$x}"),
        }
    }
}

/// Typed outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    fields: Vec<(&'static str, FieldValue)>,
}

impl Command {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    fn with(mut self, key: &'static str, value: FieldValue) -> Self {
        self.fields.push((key, value));
        self
    }

    /// Restart the device.
    pub fn restart() -> Self {
        Self::new("restart")
    }

    /// Answered by a `TimeCluster` notification.
    pub fn get_time() -> Self {
        Self::new("get_time")
    }

    /// Answered by one `MessageCluster` per queued message.
    pub fn get_message() -> Self {
        Self::new("get_message")
    }

    pub fn get_network_info() -> Self {
        Self::new("get_network_info")
    }

    pub fn get_connection_status() -> Self {
        Self::new("get_connection_status")
    }

    /// Answered by one `MeterList` per connected meter.
    pub fn get_meter_list() -> Self {
        Self::new("get_meter_list")
    }

    /// Details for one meter; the MAC selects the meter when several are joined.
    ///
    /// The MAC must be up to 16 hex digits, optionally prefixed with `0x`.
    pub fn get_meter_info(meter_mac: Option<&str>) -> Result<Self, CommandError> {
        let command = Self::new("get_meter_info");
        Ok(match meter_mac {
            Some(mac) => {
                check_mac(mac)?;
                command.with("meter_mac_id", FieldValue::Text(mac.to_string()))
            }
            None => command,
        })
    }

    pub fn get_device_info() -> Self {
        Self::new("get_device_info")
    }

    pub fn get_fast_poll_status() -> Self {
        Self::new("get_fast_poll_status")
    }

    pub fn get_billing_periods() -> Self {
        Self::new("get_billing_periods")
    }

    /// Running total since the last `close_current_period`.
    pub fn get_current_period_usage() -> Self {
        Self::new("get_current_period_usage")
    }

    /// Roll the billing period over. The device sends no notification in reply.
    pub fn close_current_period() -> Self {
        Self::new("close_current_period")
    }

    pub fn get_last_period_usage() -> Self {
        Self::new("get_last_period_usage")
    }

    pub fn get_instantaneous_demand() -> Self {
        Self::new("get_instantaneous_demand")
    }

    pub fn get_current_summation_delivered() -> Self {
        Self::new("get_current_summation_delivered")
    }

    pub fn get_current_price() -> Self {
        Self::new("get_current_price")
    }

    /// Only meaningful on block-based tariffs.
    pub fn get_price_blocks() -> Self {
        Self::new("get_price_blocks")
    }

    /// Change how often the device reports `event` (seconds).
    ///
    /// The device only honours this while its schedule is still in the
    /// `default` mode; once the meter pushes its own schedule the command is
    /// ignored.
    pub fn set_schedule(event: &str, frequency: u16, enabled: bool) -> Result<Self, CommandError> {
        let event = event.parse::<ScheduleEvent>()?;
        Ok(Self::set_schedule_for(event, frequency, enabled))
    }

    pub fn set_schedule_for(event: ScheduleEvent, frequency: u16, enabled: bool) -> Self {
        Self::new("set_schedule")
            .with("event", FieldValue::Text(event.as_str().to_string()))
            .with(
                "frequency",
                FieldValue::Hex {
                    value: u64::from(frequency),
                    width: FREQUENCY_HEX_WIDTH,
                },
            )
            .with("enabled", FieldValue::Flag(enabled))
    }

    /// Answered by one `ScheduleInfo` per event, or only for `event` when given.
    pub fn get_schedule(event: Option<&str>) -> Result<Self, CommandError> {
        let event = event.map(str::parse::<ScheduleEvent>).transpose()?;
        Ok(Self::get_schedule_for(event))
    }

    pub fn get_schedule_for(event: Option<ScheduleEvent>) -> Self {
        let command = Self::new("get_schedule");
        match event {
            Some(event) => command.with("event", FieldValue::Text(event.as_str().to_string())),
            None => command,
        }
    }

    /// Command name carried in the `Name` element.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parameters in insertion order, keyed by symbolic name.
    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    /// Render the command as a wire fragment.
    pub fn encode(&self) -> Bytes {
        encode_command(self)
    }
}

/// Render `command` as a wire fragment.
pub fn encode_command(command: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + command.fields.len() * 32);
    put_tag(&mut buf, "", COMMAND_ROOT);
    put_element(&mut buf, "Name", command.name);
    for (key, value) in &command.fields {
        put_element(&mut buf, &title_case(key), &value.render());
    }
    put_tag(&mut buf, "/", COMMAND_ROOT);
    buf.freeze()
}

fn put_tag(buf: &mut BytesMut, prefix: &str, name: &str) {
    buf.put_u8(b'<');
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(name.as_bytes());
    buf.put_u8(b'>');
}

fn put_element(buf: &mut BytesMut, name: &str, text: &str) {
    put_tag(buf, "", name);
    buf.put_slice(text.as_bytes());
    put_tag(buf, "/", name);
}

fn check_mac(mac: &str) -> Result<(), CommandError> {
    let digits = mac
        .strip_prefix("0x")
        .or_else(|| mac.strip_prefix("0X"))
        .unwrap_or(mac);
    if digits.is_empty() || digits.len() > 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CommandError::InvalidArgument(format!(
            "meter MAC '{mac}' must be up to 16 hex digits"
        )));
    }
    Ok(())
}

/// `meter_mac_id` -> `MeterMacId`.
fn title_case(symbol: &str) -> String {
    symbol
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
