#![cfg_attr(docsrs, feature(doc_cfg))]
//! Typed notifications decoded from EMU-2 fragments.
//!
//! ```rust
//! use emu_types::{decode, Body, FieldMap, RawFragment, TypeRegistry};
//!
//! let registry = TypeRegistry::standard().expect("registry");
//! let fields: FieldMap = [
//!     ("TimeStamp", "0x00000000"),
//!     ("Demand", "0x00001000"),
//!     ("Multiplier", "0x00000001"),
//!     ("Divisor", "0x000003e8"),
//! ]
//! .into_iter()
//! .collect();
//! let fragment = RawFragment { tag: "InstantaneousDemand".into(), fields };
//! let notification = decode(&registry, fragment).expect("decode");
//! assert_eq!(notification.timestamp, Some(946_684_800));
//! let Body::InstantaneousDemand(demand) = &notification.body else { unreachable!() };
//! assert_eq!(demand.demand, Some(4.096));
//! ```

pub mod decode;
pub mod registry;
pub mod variants;

use std::fmt;
use std::str::FromStr;

pub use decode::{decode, DecodeError, DecodeFailure};
pub use emu_wire::{FieldError, FieldMap, RawFragment};
pub use registry::{DecodeFn, RegistryEntry, RegistryError, TypeRegistry};
pub use variants::*;

/// Closed set of notification types the device emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum NotificationKind {
    TimeCluster,
    MessageCluster,
    NetworkInfo,
    ConnectionStatus,
    MeterList,
    MeterInfo,
    DeviceInfo,
    FastPollStatus,
    CurrentPeriodUsage,
    LastPeriodUsage,
    InstantaneousDemand,
    CurrentSummationDelivered,
    PriceCluster,
    BlockPriceDetail,
    ScheduleInfo,
    ProfileData,
    BillingPeriodList,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 17] = [
        NotificationKind::TimeCluster,
        NotificationKind::MessageCluster,
        NotificationKind::NetworkInfo,
        NotificationKind::ConnectionStatus,
        NotificationKind::MeterList,
        NotificationKind::MeterInfo,
        NotificationKind::DeviceInfo,
        NotificationKind::FastPollStatus,
        NotificationKind::CurrentPeriodUsage,
        NotificationKind::LastPeriodUsage,
        NotificationKind::InstantaneousDemand,
        NotificationKind::CurrentSummationDelivered,
        NotificationKind::PriceCluster,
        NotificationKind::BlockPriceDetail,
        NotificationKind::ScheduleInfo,
        NotificationKind::ProfileData,
        NotificationKind::BillingPeriodList,
    ];

    /// Root tag carrying this notification on the wire.
    pub const fn root_name(self) -> &'static str {
        match self {
            NotificationKind::TimeCluster => "TimeCluster",
            NotificationKind::MessageCluster => "MessageCluster",
            NotificationKind::NetworkInfo => "NetworkInfo",
            NotificationKind::ConnectionStatus => "ConnectionStatus",
            NotificationKind::MeterList => "MeterList",
            NotificationKind::MeterInfo => "MeterInfo",
            NotificationKind::DeviceInfo => "DeviceInfo",
            NotificationKind::FastPollStatus => "FastPollStatus",
            NotificationKind::CurrentPeriodUsage => "CurrentPeriodUsage",
            NotificationKind::LastPeriodUsage => "LastPeriodUsage",
            NotificationKind::InstantaneousDemand => "InstantaneousDemand",
            NotificationKind::CurrentSummationDelivered => "CurrentSummationDelivered",
            NotificationKind::PriceCluster => "PriceCluster",
            NotificationKind::BlockPriceDetail => "BlockPriceDetail",
            NotificationKind::ScheduleInfo => "ScheduleInfo",
            NotificationKind::ProfileData => "ProfileData",
            NotificationKind::BillingPeriodList => "BillingPeriodList",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root_name())
    }
}

impl FromStr for NotificationKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationKind::ALL
            .into_iter()
            .find(|kind| kind.root_name() == s)
            .ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

/// Variant-specific payload of a [`Notification`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Body {
    TimeCluster(TimeCluster),
    MessageCluster(MessageCluster),
    NetworkInfo(NetworkInfo),
    ConnectionStatus(ConnectionStatus),
    MeterList(MeterList),
    MeterInfo(MeterInfo),
    DeviceInfo(DeviceInfo),
    FastPollStatus(FastPollStatus),
    CurrentPeriodUsage(CurrentPeriodUsage),
    LastPeriodUsage(LastPeriodUsage),
    InstantaneousDemand(InstantaneousDemand),
    CurrentSummationDelivered(CurrentSummationDelivered),
    PriceCluster(PriceCluster),
    BlockPriceDetail(BlockPriceDetail),
    ScheduleInfo(ScheduleInfo),
    ProfileData(ProfileData),
    BillingPeriodList(BillingPeriodList),
}

impl Body {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Body::TimeCluster(_) => NotificationKind::TimeCluster,
            Body::MessageCluster(_) => NotificationKind::MessageCluster,
            Body::NetworkInfo(_) => NotificationKind::NetworkInfo,
            Body::ConnectionStatus(_) => NotificationKind::ConnectionStatus,
            Body::MeterList(_) => NotificationKind::MeterList,
            Body::MeterInfo(_) => NotificationKind::MeterInfo,
            Body::DeviceInfo(_) => NotificationKind::DeviceInfo,
            Body::FastPollStatus(_) => NotificationKind::FastPollStatus,
            Body::CurrentPeriodUsage(_) => NotificationKind::CurrentPeriodUsage,
            Body::LastPeriodUsage(_) => NotificationKind::LastPeriodUsage,
            Body::InstantaneousDemand(_) => NotificationKind::InstantaneousDemand,
            Body::CurrentSummationDelivered(_) => NotificationKind::CurrentSummationDelivered,
            Body::PriceCluster(_) => NotificationKind::PriceCluster,
            Body::BlockPriceDetail(_) => NotificationKind::BlockPriceDetail,
            Body::ScheduleInfo(_) => NotificationKind::ScheduleInfo,
            Body::ProfileData(_) => NotificationKind::ProfileData,
            Body::BillingPeriodList(_) => NotificationKind::BillingPeriodList,
        }
    }
}

/// A decoded inbound fragment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Notification {
    /// `DeviceMacId` of the reporting EMU.
    pub device_mac: Option<String>,
    /// `MeterMacId` of the meter the reading came from.
    pub meter_mac: Option<String>,
    /// `TimeStamp` shifted onto the Unix epoch (seconds).
    pub timestamp: Option<u64>,
    pub body: Body,
    /// Field map the notification was decoded from.
    pub raw: FieldMap,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        self.body.kind()
    }

    /// Raw text of any field, including ones without a typed accessor.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.raw.get(key)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} notification: {}", self.kind(), self.raw)
    }
}
