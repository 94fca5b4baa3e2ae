//! The EAV index: an entity-keyed store of entity maps.

use crate::ident::{Attr, EntityId, DB_ID};
use crate::index::SortKey;
use crate::schema::ContainerKind;
use crate::value::Value;
use std::collections::btree_set::Range;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::Bound;

/// The container holding a cardinality-many attribute's values.
///
/// The variant follows the schema's many-value container kind; both ordered
/// kinds share the sorted representation, and the range-capable kind's
/// extra queries are served by [`ManyValues::range`], [`ManyValues::rank`]
/// and the nearest-lookup methods.
#[derive(Debug, Clone, PartialEq)]
pub enum ManyValues {
    /// Unordered hash set.
    Unordered(HashSet<Value>),
    /// Sorted set under a named comparator.
    Sorted(BTreeSet<SortKey>),
}

impl ManyValues {
    /// An empty container of the given kind.
    #[must_use]
    pub fn new(kind: ContainerKind) -> Self {
        match kind.order() {
            None => Self::Unordered(HashSet::new()),
            Some(_) => Self::Sorted(BTreeSet::new()),
        }
    }

    fn key(kind: ContainerKind, value: Value) -> SortKey {
        SortKey::new(kind.order().unwrap_or_default(), value)
    }

    /// Inserts a value. Returns whether the container changed.
    pub fn insert(&mut self, kind: ContainerKind, value: Value) -> bool {
        match self {
            Self::Unordered(set) => set.insert(value),
            Self::Sorted(set) => set.insert(Self::key(kind, value)),
        }
    }

    /// Removes a value. Returns whether the container changed.
    pub fn remove(&mut self, kind: ContainerKind, value: &Value) -> bool {
        match self {
            Self::Unordered(set) => set.remove(value),
            Self::Sorted(set) => set.remove(&Self::key(kind, value.clone())),
        }
    }

    /// Whether the container holds the value.
    #[must_use]
    pub fn contains(&self, kind: ContainerKind, value: &Value) -> bool {
        match self {
            Self::Unordered(set) => set.contains(value),
            Self::Sorted(set) => set.contains(&Self::key(kind, value.clone())),
        }
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Unordered(set) => set.len(),
            Self::Sorted(set) => set.len(),
        }
    }

    /// Whether the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates values in arbitrary (unordered) or container (sorted)
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        match self {
            Self::Unordered(set) => ManyIter::Unordered(set.iter()),
            Self::Sorted(set) => ManyIter::Sorted(set.iter()),
        }
    }

    /// Values in a deterministic order: container order for sorted
    /// containers, canonical order otherwise.
    #[must_use]
    pub fn values_ordered(&self) -> Vec<&Value> {
        match self {
            Self::Unordered(set) => {
                let mut values: Vec<&Value> = set.iter().collect();
                values.sort();
                values
            }
            Self::Sorted(set) => set.iter().map(SortKey::value).collect(),
        }
    }

    /// Values within `bounds` in container order. `None` for unordered
    /// containers.
    #[must_use]
    pub fn range(
        &self,
        kind: ContainerKind,
        bounds: (Bound<&Value>, Bound<&Value>),
    ) -> Option<ManyRange<'_>> {
        match self {
            Self::Unordered(_) => None,
            Self::Sorted(set) => {
                let lo = map_bound(bounds.0, kind);
                let hi = map_bound(bounds.1, kind);
                Some(ManyRange {
                    inner: set.range((lo, hi)),
                })
            }
        }
    }

    /// The smallest value at or after `value` in container order. `None`
    /// for unordered containers or when no such value exists.
    #[must_use]
    pub fn first_at_or_after(&self, kind: ContainerKind, value: &Value) -> Option<&Value> {
        match self {
            Self::Unordered(_) => None,
            Self::Sorted(set) => set
                .range((
                    Bound::Included(Self::key(kind, value.clone())),
                    Bound::Unbounded,
                ))
                .next()
                .map(SortKey::value),
        }
    }

    /// The largest value at or before `value` in container order.
    #[must_use]
    pub fn last_at_or_before(&self, kind: ContainerKind, value: &Value) -> Option<&Value> {
        match self {
            Self::Unordered(_) => None,
            Self::Sorted(set) => set
                .range((
                    Bound::Unbounded,
                    Bound::Included(Self::key(kind, value.clone())),
                ))
                .next_back()
                .map(SortKey::value),
        }
    }

    /// Number of values strictly before `value` in container order. `None`
    /// for unordered containers.
    #[must_use]
    pub fn rank(&self, kind: ContainerKind, value: &Value) -> Option<usize> {
        match self {
            Self::Unordered(_) => None,
            Self::Sorted(set) => Some(
                set.range((
                    Bound::Unbounded,
                    Bound::Excluded(Self::key(kind, value.clone())),
                ))
                .count(),
            ),
        }
    }
}

fn map_bound(bound: Bound<&Value>, kind: ContainerKind) -> Bound<SortKey> {
    match bound {
        Bound::Included(v) => Bound::Included(ManyValues::key(kind, v.clone())),
        Bound::Excluded(v) => Bound::Excluded(ManyValues::key(kind, v.clone())),
        Bound::Unbounded => Bound::Unbounded,
    }
}

enum ManyIter<'a> {
    Unordered(std::collections::hash_set::Iter<'a, Value>),
    Sorted(std::collections::btree_set::Iter<'a, SortKey>),
}

impl<'a> Iterator for ManyIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match self {
            Self::Unordered(it) => it.next(),
            Self::Sorted(it) => it.next().map(SortKey::value),
        }
    }
}

/// An iterator over values in an ordered cardinality-many container.
pub struct ManyRange<'a> {
    inner: Range<'a, SortKey>,
}

impl<'a> Iterator for ManyRange<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        self.inner.next().map(SortKey::value)
    }
}

impl<'a> DoubleEndedIterator for ManyRange<'a> {
    fn next_back(&mut self) -> Option<&'a Value> {
        self.inner.next_back().map(SortKey::value)
    }
}

/// The stored value of one attribute on one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A cardinality-one value, stored directly.
    One(Value),
    /// A cardinality-many value set.
    Many(ManyValues),
}

impl Slot {
    /// Whether the slot holds the given value (equality for one, membership
    /// for many).
    #[must_use]
    pub fn holds(&self, kind: ContainerKind, value: &Value) -> bool {
        match self {
            Self::One(v) => v == value,
            Self::Many(set) => set.contains(kind, value),
        }
    }

    /// The values of this slot in a deterministic order.
    #[must_use]
    pub fn values_ordered(&self) -> Vec<&Value> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(set) => set.values_ordered(),
        }
    }
}

/// One entity map.
///
/// The map carries its own identifier; [`Entity::to_value`] surfaces it
/// under the reserved `db/id` key. An entity with no attributes beyond the
/// identifier is never present in the EAV index.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    slots: HashMap<Attr, Slot>,
}

impl Entity {
    /// A fresh entity map with no attributes.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            slots: HashMap::new(),
        }
    }

    /// The entity's own identifier.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The slot stored for an attribute.
    #[must_use]
    pub fn get(&self, attr: &Attr) -> Option<&Slot> {
        self.slots.get(attr)
    }

    /// The direct value of a cardinality-one attribute.
    #[must_use]
    pub fn value(&self, attr: &Attr) -> Option<&Value> {
        match self.slots.get(attr) {
            Some(Slot::One(v)) => Some(v),
            _ => None,
        }
    }

    /// Whether the entity holds the given (attribute, value) binding.
    #[must_use]
    pub fn holds(&self, attr: &Attr, kind: ContainerKind, value: &Value) -> bool {
        self.slots
            .get(attr)
            .is_some_and(|slot| slot.holds(kind, value))
    }

    /// Iterates the entity's attributes.
    pub fn attrs(&self) -> impl Iterator<Item = (&Attr, &Slot)> {
        self.slots.iter()
    }

    /// Number of attributes present (the identifier excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no attributes are present beyond the identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn slot_mut(&mut self, attr: &Attr) -> Option<&mut Slot> {
        self.slots.get_mut(attr)
    }

    pub(crate) fn put(&mut self, attr: Attr, slot: Slot) -> Option<Slot> {
        self.slots.insert(attr, slot)
    }

    pub(crate) fn take(&mut self, attr: &Attr) -> Option<Slot> {
        self.slots.remove(attr)
    }

    /// Renders the entity as a map value, the identifier under `db/id` and
    /// cardinality-many values as set values in canonical order.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(Attr::from(DB_ID), Value::Ref(self.id.clone()));
        for (attr, slot) in &self.slots {
            let value = match slot {
                Slot::One(v) => v.clone(),
                Slot::Many(set) => Value::Set(set.iter().cloned().collect()),
            };
            map.insert(attr.clone(), value);
        }
        Value::Map(map)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// The EAV index: identifier → entity map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EavIndex {
    entities: HashMap<EntityId, Entity>,
}

impl EavIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The entity map for an identifier.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Whether the identifier keys an entity.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of entities stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates all (identifier, entity) pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Entity)> {
        self.entities.iter()
    }

    /// Overwrites a cardinality-one value, creating the entity when absent.
    /// Returns the replaced value.
    pub fn insert_one(&mut self, id: &EntityId, attr: Attr, value: Value) -> Option<Value> {
        let entity = self
            .entities
            .entry(id.clone())
            .or_insert_with(|| Entity::new(id.clone()));
        match entity.put(attr, Slot::One(value)) {
            Some(Slot::One(old)) => Some(old),
            _ => None,
        }
    }

    /// Merges one value into a cardinality-many set, creating the entity
    /// or the set when absent. Returns whether the set changed.
    pub fn insert_many(
        &mut self,
        id: &EntityId,
        attr: &Attr,
        kind: ContainerKind,
        value: Value,
    ) -> bool {
        let entity = self
            .entities
            .entry(id.clone())
            .or_insert_with(|| Entity::new(id.clone()));
        if let Some(Slot::Many(set)) = entity.slot_mut(attr) {
            return set.insert(kind, value);
        }
        let mut set = ManyValues::new(kind);
        set.insert(kind, value);
        entity.put(attr.clone(), Slot::Many(set));
        true
    }

    /// Removes one (identifier, attribute, value) binding. The attribute
    /// disappears when its last value goes; the entity disappears when its
    /// last attribute goes. Returns whether anything was removed.
    pub fn retract(&mut self, id: &EntityId, attr: &Attr, kind: ContainerKind, value: &Value) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        let mut drop_attr = false;
        let removed = match entity.slot_mut(attr) {
            Some(Slot::One(v)) => {
                if &*v == value {
                    drop_attr = true;
                    true
                } else {
                    false
                }
            }
            None => false,
            Some(Slot::Many(set)) => {
                let removed = set.remove(kind, value);
                if set.is_empty() {
                    drop_attr = true;
                }
                removed
            }
        };
        if drop_attr {
            entity.take(attr);
        }
        if entity.is_empty() {
            self.entities.remove(id);
        }
        removed
    }

    /// Removes an entity outright, returning its former map.
    pub fn remove_entity(&mut self, id: &EntityId) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Installs a fully built entity map, replacing any previous entry.
    /// Empty maps are not stored.
    pub fn install(&mut self, entity: Entity) {
        if !entity.is_empty() {
            self.entities.insert(entity.id().clone(), entity);
        }
    }
}
