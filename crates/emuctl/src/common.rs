use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use emu_power::types::Body;
use emu_power::{Command, Notification, NotificationKind, Session, Target};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

pub const DEFAULT_WAIT_MS: u64 = 2000;

/// Open a serial device node as separate read and write handles.
///
/// A tokio file handle runs one operation at a time; with a shared handle
/// writes would queue behind a parked read.
///
/// The port must already be configured (115200 8N1 for the EMU-2), for
/// example with `stty -F /dev/ttyACM0 115200 raw -echo`.
pub async fn open_device(path: &Path) -> Result<(File, File)> {
    let reader = File::open(path)
        .await
        .with_context(|| format!("open device {} for reading", path.display()))?;
    let writer = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("open device {} for writing", path.display()))?;
    Ok((reader, writer))
}

/// Route every decoded notification into a channel drained by the command.
pub fn forward_notifications<R, W>(session: &Session<R, W>) -> mpsc::UnboundedReceiver<Notification>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    let (tx, rx) = mpsc::unbounded_channel();
    session.callback(Target::Global, move |notification| {
        let _ = tx.send(notification.clone());
    });
    rx
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

pub fn format_unix_time(secs: u64) -> Result<String> {
    let secs = i64::try_from(secs).context("timestamp out of range")?;
    let dt = OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|err| anyhow!("convert time: {err}"))?;
    dt.format(&Rfc3339).context("format timestamp")
}

#[derive(Serialize)]
pub struct NotificationRecord<'a> {
    pub index: usize,
    pub kind: NotificationKind,
    pub time: Option<String>,
    #[serde(flatten)]
    pub notification: &'a Notification,
}

impl<'a> NotificationRecord<'a> {
    pub fn new(index: usize, notification: &'a Notification) -> Self {
        Self {
            index,
            kind: notification.kind(),
            time: notification
                .timestamp
                .and_then(|ts| format_unix_time(ts).ok()),
            notification,
        }
    }
}

/// One-line human summary of a notification.
pub fn summarize(notification: &Notification) -> String {
    let detail = match &notification.body {
        Body::InstantaneousDemand(demand) => match demand.demand {
            Some(kw) => format!("demand={kw:.3} kW"),
            None => "demand=unavailable".to_string(),
        },
        Body::CurrentSummationDelivered(summation) => format!(
            "delivered={} kWh received={} kWh",
            optional(summation.delivered),
            optional(summation.received)
        ),
        Body::CurrentPeriodUsage(usage) => format!("usage={} kWh", optional(usage.usage)),
        Body::PriceCluster(price) => format!(
            "price={} tier={} label={}",
            optional(price.price_per_unit()),
            optional(price.tier),
            price.rate_label.as_deref().unwrap_or("-")
        ),
        Body::ScheduleInfo(schedule) => format!(
            "event={} frequency={}s enabled={} mode={}",
            schedule.event.as_deref().unwrap_or("-"),
            optional(schedule.frequency),
            optional(schedule.enabled),
            schedule.mode.as_deref().unwrap_or("-")
        ),
        Body::ConnectionStatus(status) => format!(
            "status={} link={}",
            status.status.as_deref().unwrap_or("-"),
            optional(status.link_strength)
        ),
        _ => notification.raw.to_string(),
    };
    let time = notification
        .timestamp
        .and_then(|ts| format_unix_time(ts).ok())
        .unwrap_or_else(|| "-".to_string());
    format!("{time} {} {detail}", notification.kind())
}

fn optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Options accepted by `emuctl send` besides the command name.
#[derive(Debug, Default, Clone)]
pub struct CommandArgs {
    pub event: Option<String>,
    pub frequency: Option<u16>,
    pub enabled: bool,
    pub meter_mac: Option<String>,
}

/// Build a command from its wire name.
pub fn build_command(name: &str, args: &CommandArgs) -> Result<Command> {
    let command = match name {
        "restart" => Command::restart(),
        "get_time" => Command::get_time(),
        "get_message" => Command::get_message(),
        "get_network_info" => Command::get_network_info(),
        "get_connection_status" => Command::get_connection_status(),
        "get_meter_list" => Command::get_meter_list(),
        "get_meter_info" => Command::get_meter_info(args.meter_mac.as_deref())?,
        "get_device_info" => Command::get_device_info(),
        "get_fast_poll_status" => Command::get_fast_poll_status(),
        "get_billing_periods" => Command::get_billing_periods(),
        "get_current_period_usage" => Command::get_current_period_usage(),
        "close_current_period" => Command::close_current_period(),
        "get_last_period_usage" => Command::get_last_period_usage(),
        "get_instantaneous_demand" => Command::get_instantaneous_demand(),
        "get_current_summation_delivered" => Command::get_current_summation_delivered(),
        "get_current_price" => Command::get_current_price(),
        "get_price_blocks" => Command::get_price_blocks(),
        "get_schedule" => Command::get_schedule(args.event.as_deref())?,
        "set_schedule" => {
            let event = args
                .event
                .as_deref()
                .ok_or_else(|| anyhow!("set_schedule requires --event"))?;
            let frequency = args
                .frequency
                .ok_or_else(|| anyhow!("set_schedule requires --frequency"))?;
            Command::set_schedule(event, frequency, args.enabled)?
        }
        other => bail!("unknown command '{other}'"),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_power::types::{FieldMap, RawFragment, TypeRegistry};

    #[test]
    fn unix_time_is_rfc3339() {
        assert_eq!(format_unix_time(946_684_800).unwrap(), "2000-01-01T00:00:00Z");
    }

    #[test]
    fn builds_schedule_commands() {
        let args = CommandArgs {
            event: Some("demand".into()),
            frequency: Some(60),
            enabled: true,
            meter_mac: None,
        };
        let command = build_command("set_schedule", &args).unwrap();
        assert_eq!(command.name(), "set_schedule");
        assert!(build_command("set_schedule", &CommandArgs::default()).is_err());
        let bad = CommandArgs {
            event: Some("bogus".into()),
            ..args
        };
        assert!(build_command("set_schedule", &bad).is_err());
    }

    #[test]
    fn rejects_unknown_command() {
        let err = build_command("reboot", &CommandArgs::default()).unwrap_err();
        assert!(err.to_string().contains("reboot"));
    }

    #[test]
    fn summary_includes_demand() {
        let registry = TypeRegistry::standard().unwrap();
        let fields: FieldMap = [
            ("TimeStamp", "0x00000000"),
            ("Demand", "0x00001000"),
            ("Multiplier", "0x00000001"),
            ("Divisor", "0x000003e8"),
        ]
        .into_iter()
        .collect();
        let notification = emu_power::decode(
            &registry,
            RawFragment {
                tag: "InstantaneousDemand".into(),
                fields,
            },
        )
        .unwrap();
        assert_eq!(
            summarize(&notification),
            "2000-01-01T00:00:00Z InstantaneousDemand demand=4.096 kW"
        );
        let value = serde_json::to_value(NotificationRecord::new(1, &notification)).unwrap();
        assert_eq!(value["kind"], "InstantaneousDemand");
        assert_eq!(value["raw"]["Demand"], "0x00001000");
    }
}
