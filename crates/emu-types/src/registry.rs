//! Table of known root tags and their decoders.
//!
//! The table's root names double as the reassembler's boundary alphabet: a tag
//! that is not registered can never open or close a fragment.

use std::collections::HashMap;
use std::fmt;

use emu_wire::{FieldError, FieldMap, Reassembler};
use thiserror::Error;
use tracing::debug;

use crate::variants::*;
use crate::{Body, NotificationKind};

/// Decodes the variant-specific part of a fragment.
pub type DecodeFn = fn(&FieldMap) -> Result<Body, FieldError>;

/// Errors raised while assembling a registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("root tag '{0}' is registered more than once")]
    DuplicateRoot(String),
    #[error("root tag for {0} is empty")]
    EmptyRoot(NotificationKind),
}

/// One registered notification type.
#[derive(Clone, Copy)]
pub struct RegistryEntry {
    pub root: &'static str,
    pub kind: NotificationKind,
    pub decode: DecodeFn,
}

impl RegistryEntry {
    /// Entry for `kind` using its standard root tag and decoder.
    pub fn standard(kind: NotificationKind) -> Self {
        Self {
            root: kind.root_name(),
            kind,
            decode: decoder_for(kind),
        }
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("root", &self.root)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn decode_as<T>(fields: &FieldMap) -> Result<Body, FieldError>
where
    T: FromFields + Into<Body>,
{
    T::from_fields(fields).map(Into::into)
}

/// Decoder for every variant; the match keeps the table exhaustive.
fn decoder_for(kind: NotificationKind) -> DecodeFn {
    match kind {
        NotificationKind::TimeCluster => decode_as::<TimeCluster>,
        NotificationKind::MessageCluster => decode_as::<MessageCluster>,
        NotificationKind::NetworkInfo => decode_as::<NetworkInfo>,
        NotificationKind::ConnectionStatus => decode_as::<ConnectionStatus>,
        NotificationKind::MeterList => decode_as::<MeterList>,
        NotificationKind::MeterInfo => decode_as::<MeterInfo>,
        NotificationKind::DeviceInfo => decode_as::<DeviceInfo>,
        NotificationKind::FastPollStatus => decode_as::<FastPollStatus>,
        NotificationKind::CurrentPeriodUsage => decode_as::<CurrentPeriodUsage>,
        NotificationKind::LastPeriodUsage => decode_as::<LastPeriodUsage>,
        NotificationKind::InstantaneousDemand => decode_as::<InstantaneousDemand>,
        NotificationKind::CurrentSummationDelivered => decode_as::<CurrentSummationDelivered>,
        NotificationKind::PriceCluster => decode_as::<PriceCluster>,
        NotificationKind::BlockPriceDetail => decode_as::<BlockPriceDetail>,
        NotificationKind::ScheduleInfo => decode_as::<ScheduleInfo>,
        NotificationKind::ProfileData => decode_as::<ProfileData>,
        NotificationKind::BillingPeriodList => decode_as::<BillingPeriodList>,
    }
}

/// Read-only mapping from root tag to decoder, built once per session.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: Vec<RegistryEntry>,
    by_root: HashMap<&'static str, usize>,
}

impl TypeRegistry {
    /// Every notification type the device is known to emit.
    pub fn standard() -> Result<Self, RegistryError> {
        Self::from_kinds(&NotificationKind::ALL)
    }

    /// Registry restricted to `kinds`; other roots become invisible.
    pub fn from_kinds(kinds: &[NotificationKind]) -> Result<Self, RegistryError> {
        Self::from_entries(kinds.iter().copied().map(RegistryEntry::standard).collect())
    }

    pub fn from_entries(entries: Vec<RegistryEntry>) -> Result<Self, RegistryError> {
        let mut by_root = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if entry.root.is_empty() {
                return Err(RegistryError::EmptyRoot(entry.kind));
            }
            if by_root.insert(entry.root, index).is_some() {
                return Err(RegistryError::DuplicateRoot(entry.root.to_string()));
            }
        }
        debug!(entries = entries.len(), "type registry built");
        Ok(Self { entries, by_root })
    }

    /// Entry for `tag`, or `None` when the tag is not a known root.
    pub fn lookup(&self, tag: &str) -> Option<&RegistryEntry> {
        self.by_root.get(tag).map(|&index| &self.entries[index])
    }

    /// Known root tags in registration order.
    pub fn known_roots(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.root)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Fresh reassembler whose boundary alphabet is this registry's roots.
    pub fn reassembler(&self) -> Reassembler {
        Reassembler::new(self.known_roots())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
