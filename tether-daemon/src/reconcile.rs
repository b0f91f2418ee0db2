/*!
 * Reconciliation Engine
 * Merges a live enumeration with the stored names into one device view
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::identity::DeviceIdentity;
use crate::mechanism::RawDeviceRow;
use crate::names::NameMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub identity: DeviceIdentity,
    pub reported_name: String,
    pub status: String,
    pub raw_address_numeric: Option<u64>,
    pub display_name: String,
    /// Stored name only; the device was absent from the live listing.
    pub known_only: bool,
}

/// Live rows first in enumeration order, then every stored identity the
/// enumeration did not report, in name-map order.
///
/// Duplicate identities in `live` are not collapsed; each row becomes its own
/// record.
pub fn reconcile(live: &[RawDeviceRow], names: &NameMap, saved_status: &str) -> Vec<DeviceRecord> {
    let mut seen: HashSet<DeviceIdentity> = HashSet::with_capacity(live.len());
    let mut records: Vec<DeviceRecord> = Vec::with_capacity(live.len() + names.len());

    for row in live {
        let identity = DeviceIdentity::normalize(&row.raw_address);
        let display_name = names
            .get(&identity)
            .cloned()
            .unwrap_or_else(|| row.reported_name.clone());

        seen.insert(identity.clone());
        records.push(DeviceRecord {
            identity,
            reported_name: row.reported_name.clone(),
            status: row.status.clone(),
            raw_address_numeric: row.numeric_address,
            display_name,
            known_only: false,
        });
    }

    for (identity, name) in names {
        if seen.contains(identity) {
            continue;
        }
        records.push(DeviceRecord {
            identity: identity.clone(),
            reported_name: name.clone(),
            status: saved_status.to_string(),
            raw_address_numeric: None,
            display_name: name.clone(),
            known_only: true,
        });
    }

    records
}
