//! Fragment to notification decoding.

use emu_wire::field::{parse_text, parse_timestamp};
use emu_wire::{FieldError, RawFragment};
use thiserror::Error;
use tracing::trace;

use crate::registry::TypeRegistry;
use crate::Notification;

const DEVICE_MAC: &str = "DeviceMacId";
const METER_MAC: &str = "MeterMacId";
const TIMESTAMP: &str = "TimeStamp";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown notification type '{0}'")]
    UnknownType(String),
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// A fragment that could not be decoded, kept for diagnostics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot decode {} fragment: {error}", .fragment.tag)]
pub struct DecodeFailure {
    pub error: DecodeError,
    pub fragment: RawFragment,
}

/// Decode `fragment` using the decoder registered for its root tag.
///
/// Missing fields leave the matching attributes empty. Only an unregistered
/// tag or text that cannot be coerced fails.
pub fn decode(registry: &TypeRegistry, fragment: RawFragment) -> Result<Notification, DecodeFailure> {
    let Some(entry) = registry.lookup(&fragment.tag) else {
        return Err(DecodeFailure {
            error: DecodeError::UnknownType(fragment.tag.clone()),
            fragment,
        });
    };
    let fields = &fragment.fields;
    let decoded = parse_timestamp(fields, TIMESTAMP)
        .and_then(|timestamp| Ok((timestamp, (entry.decode)(fields)?)));
    match decoded {
        Ok((timestamp, body)) => {
            trace!(kind = %entry.kind, "fragment decoded");
            Ok(Notification {
                device_mac: parse_text(fields, DEVICE_MAC),
                meter_mac: parse_text(fields, METER_MAC),
                timestamp,
                body,
                raw: fragment.fields,
            })
        }
        Err(err) => Err(DecodeFailure {
            error: err.into(),
            fragment,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Body, FieldMap, NotificationKind};

    fn fragment(tag: &str, pairs: &[(&str, &str)]) -> RawFragment {
        RawFragment {
            tag: tag.to_string(),
            fields: pairs.iter().copied().collect::<FieldMap>(),
        }
    }

    #[test]
    fn common_fields_are_populated() {
        let registry = TypeRegistry::standard().unwrap();
        let notification = decode(
            &registry,
            fragment(
                "TimeCluster",
                &[
                    ("DeviceMacId", "0xd8d5b90000001234"),
                    ("MeterMacId", "0x00135003000abcde"),
                    ("TimeStamp", "0x00000000"),
                    ("UTCTime", "0x00000e10"),
                ],
            ),
        )
        .unwrap();
        assert_eq!(notification.kind(), NotificationKind::TimeCluster);
        assert_eq!(notification.device_mac.as_deref(), Some("0xd8d5b90000001234"));
        assert_eq!(notification.meter_mac.as_deref(), Some("0x00135003000abcde"));
        assert_eq!(notification.timestamp, Some(946_684_800));
        let Body::TimeCluster(time) = &notification.body else {
            panic!("unexpected body {:?}", notification.body);
        };
        assert_eq!(time.utc_time, Some(946_684_800 + 3600));
        assert_eq!(time.local_time, None);
        assert_eq!(notification.raw.len(), 4);
    }

    #[test]
    fn missing_fields_degrade_to_absent() {
        let registry = TypeRegistry::standard().unwrap();
        let notification = decode(&registry, fragment("InstantaneousDemand", &[])).unwrap();
        assert_eq!(notification.timestamp, None);
        assert_eq!(notification.device_mac, None);
        let Body::InstantaneousDemand(demand) = notification.body else {
            panic!("wrong variant");
        };
        assert_eq!(demand.demand, None);
    }

    #[test]
    fn unknown_tag_fails_with_fragment() {
        let registry = TypeRegistry::standard().unwrap();
        let failure = decode(&registry, fragment("Bogus", &[("A", "1")])).unwrap_err();
        assert_eq!(failure.error, DecodeError::UnknownType("Bogus".into()));
        assert_eq!(failure.fragment.fields.get("A"), Some("1"));
        assert_eq!(
            failure.to_string(),
            "cannot decode Bogus fragment: unknown notification type 'Bogus'"
        );
    }

    #[test]
    fn bad_timestamp_is_a_field_failure() {
        let registry = TypeRegistry::standard().unwrap();
        let failure =
            decode(&registry, fragment("MeterList", &[("TimeStamp", "yesterday")])).unwrap_err();
        assert!(matches!(
            failure.error,
            DecodeError::Field(FieldError::InvalidHex { ref field, .. }) if field == "TimeStamp"
        ));
        assert_eq!(failure.fragment.tag, "MeterList");
    }

    #[test]
    fn bad_variant_field_is_a_field_failure() {
        let registry = TypeRegistry::standard().unwrap();
        let failure = decode(
            &registry,
            fragment("PriceCluster", &[("TimeStamp", "0x1"), ("Tier", "high")]),
        )
        .unwrap_err();
        assert!(matches!(failure.error, DecodeError::Field(_)));
    }

    #[test]
    fn registry_without_kind_reports_unknown() {
        let registry = TypeRegistry::from_kinds(&[NotificationKind::TimeCluster]).unwrap();
        let failure = decode(&registry, fragment("MeterList", &[])).unwrap_err();
        assert!(matches!(failure.error, DecodeError::UnknownType(_)));
    }
}
