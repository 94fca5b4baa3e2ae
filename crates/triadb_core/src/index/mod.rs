//! The index pair: EAV (entity-keyed) and AVE (attribute-keyed).

pub mod ave;
pub mod eav;

pub use ave::{AveEntry, AveIndex, IdsRef};
pub use eav::{EavIndex, Entity, ManyRange, ManyValues, Slot};

use crate::value::{Value, ValueOrder};
use std::cmp::Ordering;

/// A value tagged with the comparator of its enclosing ordered container.
///
/// B-tree containers cannot carry an external comparator, so ordered maps
/// and sets key on this wrapper instead of on the raw value. Equality is
/// plain value equality; the comparator orders, and every non-canonical
/// comparator tie-breaks canonically, so the two agree on what "equal"
/// means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    order: ValueOrder,
    value: Value,
}

impl SortKey {
    pub(crate) fn new(order: ValueOrder, value: Value) -> Self {
        Self { order, value }
    }

    /// The wrapped value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.value, &other.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn sort_key_orders_by_comparator() {
        let mut set = BTreeSet::new();
        for s in ["b", "A", "c"] {
            set.insert(SortKey::new(ValueOrder::CaseInsensitive, Value::from(s)));
        }
        let order: Vec<&str> = set
            .iter()
            .map(|k| k.value().as_text().unwrap())
            .collect();
        assert_eq!(order, vec!["A", "b", "c"]);
    }

    #[test]
    fn sort_key_equality_is_value_equality() {
        let a = SortKey::new(ValueOrder::CaseInsensitive, Value::from("x"));
        let b = SortKey::new(ValueOrder::CaseInsensitive, Value::from("X"));
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }
}
