use std::collections::HashMap;

use super::FlagSource;
use crate::overrides::{FlagValue, OverridesBag};

/// Every known flag key and its current value, used only to detect changes.
pub type Snapshot = HashMap<String, FlagValue>;

pub fn capture_snapshot<S: FlagSource + ?Sized>(source: &S) -> Snapshot {
    source
        .flag_keys()
        .into_iter()
        .map(|key| {
            let value = FlagValue::from(source.flag_value(&key));
            (key, value)
        })
        .collect()
}

/// Shallow comparison: a different key count, or any key whose value differs.
pub fn snapshot_changed(baseline: &Snapshot, next: &Snapshot) -> bool {
    baseline.len() != next.len()
        || next
            .iter()
            .any(|(key, value)| baseline.get(key) != Some(value))
}

/// Builds the bag sent to the server. Values and payloads are looked up
/// separately for every key; keys without a payload are left out of `payloads`.
pub fn collect_overrides<S: FlagSource + ?Sized>(source: &S) -> OverridesBag {
    let mut bag = OverridesBag::default();

    for key in source.flag_keys() {
        let value = FlagValue::from(source.flag_value(&key));
        if let Some(payload) = source.flag_payload(&key) {
            bag.payloads.insert(key.clone(), payload);
        }
        bag.flags.insert(key, value);
    }

    bag
}
