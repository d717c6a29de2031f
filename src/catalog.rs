//! TypeCatalog (C1): in-memory `type_id -> TypeInfo` lookup.
//!
//! Preloaded at startup from the Store's `type_catalog` table (populated
//! out-of-band; see spec.md §6.3). Read-only after construction, so any
//! number of readers may use it without locking.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::warn;

use crate::models::TypeInfo;

pub struct TypeCatalog {
    by_id: HashMap<i64, TypeInfo>,
    warned_this_cycle: Mutex<HashSet<i64>>,
}

impl TypeCatalog {
    pub fn new(types: Vec<TypeInfo>) -> Self {
        let by_id = types.into_iter().map(|t| (t.type_id, t)).collect();
        Self {
            by_id,
            warned_this_cycle: Mutex::new(HashSet::new()),
        }
    }

    /// Reset the once-per-cycle unknown-id warning dedup. Call at cycle start.
    pub fn reset_cycle(&self) {
        self.warned_this_cycle.lock().clear();
    }

    pub fn lookup(&self, type_id: i64) -> Option<&TypeInfo> {
        self.by_id.get(&type_id)
    }

    /// Left-joins catalog fields onto `type_id`, logging unknown ids once
    /// per id per cycle and falling back to blanks/zeros (spec.md §4.1).
    pub fn lookup_or_blank(&self, type_id: i64) -> TypeInfo {
        match self.lookup(type_id) {
            Some(info) => info.clone(),
            None => {
                if self.warned_this_cycle.lock().insert(type_id) {
                    warn!(type_id, "unknown type_id in TypeCatalog");
                }
                TypeInfo {
                    type_id,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_lookup_returns_blanks_not_none() {
        let catalog = TypeCatalog::new(vec![]);
        let info = catalog.lookup_or_blank(999);
        assert_eq!(info.type_id, 999);
        assert_eq!(info.type_name, "");
        assert_eq!(info.group_id, 0);
    }

    #[test]
    fn known_lookup_returns_full_info() {
        let catalog = TypeCatalog::new(vec![TypeInfo {
            type_id: 1,
            type_name: "Rifter".into(),
            group_id: 25,
            group_name: "Frigate".into(),
            category_id: 6,
            category_name: "Ship".into(),
        }]);
        let info = catalog.lookup_or_blank(1);
        assert_eq!(info.type_name, "Rifter");
    }
}
