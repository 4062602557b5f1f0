//! Variant payloads and their field mappings.
//!
//! Missing fields decode to `None`; only text that cannot be coerced (for
//! example non-hex text in a hex field) fails the whole notification.

use emu_wire::field::{parse_amount, parse_bool, parse_hex_integer, parse_text, parse_timestamp};
use emu_wire::{FieldError, FieldMap};

use crate::Body;

/// Decode a variant payload from a fragment's fields.
pub trait FromFields: Sized {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError>;
}

const MULTIPLIER: &str = "Multiplier";
const DIVISOR: &str = "Divisor";

fn amount(fields: &FieldMap, key: &str) -> Result<Option<f64>, FieldError> {
    parse_amount(fields, key, MULTIPLIER, DIVISOR)
}

/// Device clock. Both times are Unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TimeCluster {
    pub utc_time: Option<u64>,
    pub local_time: Option<u64>,
}

impl FromFields for TimeCluster {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            utc_time: parse_timestamp(fields, "UTCTime")?,
            local_time: parse_timestamp(fields, "LocalTime")?,
        })
    }
}

/// Text message pushed by the utility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MessageCluster {
    pub id: Option<u64>,
    pub text: Option<String>,
    pub priority: Option<String>,
    pub start_time: Option<u64>,
    pub duration: Option<u64>,
    pub confirmation_required: Option<bool>,
    pub confirmed: Option<bool>,
    pub queue: Option<String>,
}

impl FromFields for MessageCluster {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            id: parse_hex_integer(fields, "Id")?,
            text: parse_text(fields, "Text"),
            priority: parse_text(fields, "Priority"),
            start_time: parse_timestamp(fields, "StartTime")?,
            duration: parse_hex_integer(fields, "Duration")?,
            confirmation_required: parse_bool(fields, "ConfirmationRequired"),
            confirmed: parse_bool(fields, "Confirmed"),
            queue: parse_text(fields, "Queue"),
        })
    }
}

/// ZigBee network the EMU has joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NetworkInfo {
    pub coordinator_mac: Option<u64>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub status_code: Option<u64>,
    pub pan_id: Option<String>,
    pub channel: Option<String>,
    pub short_address: Option<String>,
    /// Link quality, 0x00..=0x64.
    pub link_strength: Option<u64>,
}

impl FromFields for NetworkInfo {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            coordinator_mac: parse_hex_integer(fields, "CoordMacId")?,
            status: parse_text(fields, "Status"),
            description: parse_text(fields, "Description"),
            status_code: parse_hex_integer(fields, "StatusCode")?,
            pan_id: parse_text(fields, "ExtPanId"),
            channel: parse_text(fields, "Channel"),
            short_address: parse_text(fields, "ShortAddr"),
            link_strength: parse_hex_integer(fields, "LinkStrength")?,
        })
    }
}

/// State of the link between the EMU and the meter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionStatus {
    pub status: Option<String>,
    pub description: Option<String>,
    pub status_code: Option<u64>,
    pub pan_id: Option<String>,
    pub channel: Option<String>,
    pub short_address: Option<String>,
    pub link_strength: Option<u64>,
}

impl FromFields for ConnectionStatus {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            status: parse_text(fields, "Status"),
            description: parse_text(fields, "Description"),
            status_code: parse_hex_integer(fields, "StatusCode")?,
            pan_id: parse_text(fields, "ExtPanId"),
            channel: parse_text(fields, "Channel"),
            short_address: parse_text(fields, "ShortAddr"),
            link_strength: parse_hex_integer(fields, "LinkStrength")?,
        })
    }
}

/// One entry of the connected-meter list; the meter is the common `meter_mac`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterList {}

impl FromFields for MeterList {
    fn from_fields(_fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {})
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterInfo {
    pub meter_type: Option<u64>,
    pub nickname: Option<String>,
    pub account: Option<String>,
    pub auth: Option<String>,
    pub host: Option<String>,
    pub enabled: Option<bool>,
}

impl FromFields for MeterInfo {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            meter_type: parse_hex_integer(fields, "Type")?,
            nickname: parse_text(fields, "Nickname"),
            account: parse_text(fields, "Account"),
            auth: parse_text(fields, "Auth"),
            host: parse_text(fields, "Host"),
            enabled: parse_bool(fields, "Enabled"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    pub install_code: Option<String>,
    pub link_key: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub image_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub date_code: Option<String>,
}

impl FromFields for DeviceInfo {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            install_code: parse_text(fields, "InstallCode"),
            link_key: parse_text(fields, "LinkKey"),
            firmware_version: parse_text(fields, "FWVersion"),
            hardware_version: parse_text(fields, "HWVersion"),
            image_type: parse_text(fields, "ImageType"),
            manufacturer: parse_text(fields, "Manufacturer"),
            model: parse_text(fields, "ModelId"),
            date_code: parse_text(fields, "DateCode"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FastPollStatus {
    /// Poll period in seconds.
    pub frequency: Option<u64>,
    pub end_time: Option<u64>,
}

impl FromFields for FastPollStatus {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            frequency: parse_hex_integer(fields, "Frequency")?,
            end_time: parse_timestamp(fields, "EndTime")?,
        })
    }
}

/// Usage accumulated since the period was last closed, in kWh.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CurrentPeriodUsage {
    pub usage: Option<f64>,
    pub start_date: Option<u64>,
    pub digits_left: Option<u64>,
    pub digits_right: Option<u64>,
    pub suppress_leading_zeroes: Option<bool>,
}

impl FromFields for CurrentPeriodUsage {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            usage: amount(fields, "CurrentUsage")?,
            start_date: parse_timestamp(fields, "StartDate")?,
            digits_left: parse_hex_integer(fields, "DigitsLeft")?,
            digits_right: parse_hex_integer(fields, "DigitsRight")?,
            suppress_leading_zeroes: parse_bool(fields, "SuppressLeadingZero"),
        })
    }
}

/// Usage of the previous period, in kWh.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LastPeriodUsage {
    pub usage: Option<f64>,
    pub start_date: Option<u64>,
    pub end_date: Option<u64>,
    pub digits_left: Option<u64>,
    pub digits_right: Option<u64>,
    pub suppress_leading_zeroes: Option<bool>,
}

impl FromFields for LastPeriodUsage {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            usage: amount(fields, "LastUsage")?,
            start_date: parse_timestamp(fields, "StartDate")?,
            end_date: parse_timestamp(fields, "EndDate")?,
            digits_left: parse_hex_integer(fields, "DigitsLeft")?,
            digits_right: parse_hex_integer(fields, "DigitsRight")?,
            suppress_leading_zeroes: parse_bool(fields, "SuppressLeadingZero"),
        })
    }
}

/// Present power draw in kW.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstantaneousDemand {
    /// `None` when the reading, multiplier or divisor was not reported.
    pub demand: Option<f64>,
    pub digits_left: Option<u64>,
    pub digits_right: Option<u64>,
    pub suppress_leading_zeroes: Option<bool>,
}

impl FromFields for InstantaneousDemand {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            demand: amount(fields, "Demand")?,
            digits_left: parse_hex_integer(fields, "DigitsLeft")?,
            digits_right: parse_hex_integer(fields, "DigitsRight")?,
            suppress_leading_zeroes: parse_bool(fields, "SuppressLeadingZero"),
        })
    }
}

/// Meter register readings in kWh.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CurrentSummationDelivered {
    pub delivered: Option<f64>,
    pub received: Option<f64>,
    pub digits_left: Option<u64>,
    pub digits_right: Option<u64>,
    pub suppress_leading_zeroes: Option<bool>,
}

impl FromFields for CurrentSummationDelivered {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            delivered: amount(fields, "SummationDelivered")?,
            received: amount(fields, "SummationReceived")?,
            digits_left: parse_hex_integer(fields, "DigitsLeft")?,
            digits_right: parse_hex_integer(fields, "DigitsRight")?,
            suppress_leading_zeroes: parse_bool(fields, "SuppressLeadingZero"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PriceCluster {
    /// Price in currency units scaled by `10^trailing_digits`.
    pub price: Option<u64>,
    /// ISO 4217 numeric currency code (840 is USD).
    pub currency: Option<u64>,
    pub trailing_digits: Option<u64>,
    pub tier: Option<u64>,
    pub start_time: Option<u64>,
    pub duration: Option<u64>,
    pub rate_label: Option<String>,
}

impl PriceCluster {
    /// Price per unit with the trailing digits applied.
    pub fn price_per_unit(&self) -> Option<f64> {
        let price = self.price?;
        let digits = i32::try_from(self.trailing_digits?).ok()?;
        Some(price as f64 / 10f64.powi(digits))
    }
}

impl FromFields for PriceCluster {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            price: parse_hex_integer(fields, "Price")?,
            currency: parse_hex_integer(fields, "Currency")?,
            trailing_digits: parse_hex_integer(fields, "TrailingDigits")?,
            tier: parse_hex_integer(fields, "Tier")?,
            start_time: parse_timestamp(fields, "StartTime")?,
            duration: parse_hex_integer(fields, "Duration")?,
            rate_label: parse_text(fields, "RateLabel"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BlockPriceDetail {
    pub current_start: Option<u64>,
    pub current_duration: Option<u64>,
    pub block_period_consumption: Option<f64>,
    pub number_of_blocks: Option<u64>,
    pub currency: Option<u64>,
    pub trailing_digits: Option<u64>,
}

impl FromFields for BlockPriceDetail {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            current_start: parse_timestamp(fields, "CurrentStart")?,
            current_duration: parse_hex_integer(fields, "CurrentDuration")?,
            block_period_consumption: parse_amount(
                fields,
                "BlockPeriodConsumption",
                "BlockPeriodConsumptionMultiplier",
                "BlockPeriodConsumptionDivisor",
            )?,
            number_of_blocks: parse_hex_integer(fields, "NumberOfBlocks")?,
            currency: parse_hex_integer(fields, "Currency")?,
            trailing_digits: parse_hex_integer(fields, "TrailingDigits")?,
        })
    }
}

/// Reporting schedule of one event type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScheduleInfo {
    /// `default` until the meter pushes its own schedule, then `rest`.
    pub mode: Option<String>,
    pub event: Option<String>,
    pub frequency: Option<u64>,
    pub enabled: Option<bool>,
}

impl FromFields for ScheduleInfo {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            mode: parse_text(fields, "Mode"),
            event: parse_text(fields, "Event"),
            frequency: parse_hex_integer(fields, "Frequency")?,
            enabled: parse_bool(fields, "Enabled"),
        })
    }
}

/// Interval consumption history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProfileData {
    pub end_time: Option<u64>,
    pub status: Option<u64>,
    pub interval_period: Option<u64>,
    pub periods_delivered: Option<u64>,
    /// `IntervalData1`, `IntervalData2`, ... in index order.
    pub intervals: Vec<u64>,
}

impl FromFields for ProfileData {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        let mut indexed = Vec::new();
        for (key, value) in fields.iter() {
            let Some(index) = key
                .strip_prefix("IntervalData")
                .and_then(|suffix| suffix.parse::<u32>().ok())
            else {
                continue;
            };
            indexed.push((index, emu_wire::parse_hex_text(key, value)?));
        }
        indexed.sort_by_key(|(index, _)| *index);
        Ok(Self {
            end_time: parse_timestamp(fields, "EndTime")?,
            status: parse_hex_integer(fields, "Status")?,
            interval_period: parse_hex_integer(fields, "ProfileIntervalPeriod")?,
            periods_delivered: parse_hex_integer(fields, "NumberOfPeriodsDelivered")?,
            intervals: indexed.into_iter().map(|(_, value)| value).collect(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BillingPeriodList {
    pub periods: Option<u64>,
    pub start: Option<u64>,
    pub duration: Option<u64>,
}

impl FromFields for BillingPeriodList {
    fn from_fields(fields: &FieldMap) -> Result<Self, FieldError> {
        Ok(Self {
            periods: parse_hex_integer(fields, "NumPeriods")?,
            start: parse_timestamp(fields, "Start")?,
            duration: parse_hex_integer(fields, "Duration")?,
        })
    }
}

macro_rules! into_body {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Body {
                fn from(value: $variant) -> Self {
                    Body::$variant(value)
                }
            }
        )*
    };
}

into_body!(
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
);

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs.iter().copied().collect()
    }

    #[test]
    fn demand_with_zero_divisor_is_zero() {
        let demand = InstantaneousDemand::from_fields(&map(&[
            ("Demand", "0x00001000"),
            ("Multiplier", "0x00000001"),
            ("Divisor", "0x00000000"),
            ("DigitsRight", "0x03"),
            ("DigitsLeft", "0x0f"),
            ("SuppressLeadingZero", "Y"),
        ]))
        .unwrap();
        assert_eq!(demand.demand, Some(0.0));
        assert_eq!(demand.digits_right, Some(3));
        assert_eq!(demand.digits_left, Some(15));
        assert_eq!(demand.suppress_leading_zeroes, Some(true));
    }

    #[test]
    fn demand_without_multiplier_is_unavailable() {
        let demand = InstantaneousDemand::from_fields(&map(&[
            ("Demand", "0x00001000"),
            ("Divisor", "0x000003e8"),
        ]))
        .unwrap();
        assert_eq!(demand.demand, None);
    }

    #[test]
    fn summation_uses_shared_scale() {
        let summation = CurrentSummationDelivered::from_fields(&map(&[
            ("SummationDelivered", "0x0000000001321a5f"),
            ("SummationReceived", "0x0000000000000000"),
            ("Multiplier", "0x00000001"),
            ("Divisor", "0x000003e8"),
        ]))
        .unwrap();
        let delivered = summation.delivered.unwrap();
        assert!((delivered - 20_060.767).abs() < 1e-9);
        assert_eq!(summation.received, Some(0.0));
    }

    #[test]
    fn price_applies_trailing_digits() {
        let price = PriceCluster::from_fields(&map(&[
            ("Price", "0x0000000e"),
            ("Currency", "0x0348"),
            ("TrailingDigits", "0x02"),
            ("Tier", "0x01"),
            ("StartTime", "0xffffffff"),
            ("Duration", "0xffff"),
            ("RateLabel", "Set by User"),
        ]))
        .unwrap();
        assert_eq!(price.currency, Some(840));
        assert_eq!(price.rate_label.as_deref(), Some("Set by User"));
        assert!((price.price_per_unit().unwrap() - 0.14).abs() < 1e-12);
        assert_eq!(PriceCluster::default().price_per_unit(), None);
    }

    #[test]
    fn block_price_uses_its_own_scale() {
        let detail = BlockPriceDetail::from_fields(&map(&[
            ("BlockPeriodConsumption", "0x0000000000000064"),
            ("BlockPeriodConsumptionMultiplier", "0x00000001"),
            ("BlockPeriodConsumptionDivisor", "0x0000000a"),
            ("Multiplier", "0x00000000"),
            ("NumberOfBlocks", "0x00"),
        ]))
        .unwrap();
        assert_eq!(detail.block_period_consumption, Some(10.0));
        assert_eq!(detail.number_of_blocks, Some(0));
    }

    #[test]
    fn schedule_flags_and_frequency() {
        let info = ScheduleInfo::from_fields(&map(&[
            ("Mode", "default"),
            ("Event", "demand"),
            ("Frequency", "0x0000003c"),
            ("Enabled", "N"),
        ]))
        .unwrap();
        assert_eq!(info.mode.as_deref(), Some("default"));
        assert_eq!(info.frequency, Some(60));
        assert_eq!(info.enabled, Some(false));
    }

    #[test]
    fn profile_intervals_follow_index_order() {
        let profile = ProfileData::from_fields(&map(&[
            ("IntervalData2", "0x0002"),
            ("IntervalData10", "0x000a"),
            ("IntervalData1", "0x0001"),
            ("IntervalDataX", "ignored"),
            ("ProfileIntervalPeriod", "0x03"),
        ]))
        .unwrap();
        assert_eq!(profile.intervals, vec![1, 2, 10]);
        assert_eq!(profile.interval_period, Some(3));
    }

    #[test]
    fn network_info_keeps_text_fields() {
        let info = NetworkInfo::from_fields(&map(&[
            ("CoordMacId", "0x00135003000abcde"),
            ("Status", "Connected"),
            ("Channel", "20"),
            ("LinkStrength", "0x64"),
        ]))
        .unwrap();
        assert_eq!(info.coordinator_mac, Some(0x0013_5003_000a_bcde));
        assert_eq!(info.channel.as_deref(), Some("20"));
        assert_eq!(info.link_strength, Some(100));
        assert_eq!(info.pan_id, None);
    }

    #[test]
    fn coercion_failure_names_the_field() {
        let err = TimeCluster::from_fields(&map(&[("UTCTime", "noon")])).unwrap_err();
        assert!(matches!(err, FieldError::InvalidHex { ref field, .. } if field == "UTCTime"));
    }
}
