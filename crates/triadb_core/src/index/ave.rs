//! The AVE index: attribute-keyed secondary maps from value to entity.
//!
//! Entries exist for every attribute that is reference-typed,
//! uniqueness-constrained or explicitly indexed; they are created eagerly
//! at database creation so an indexed attribute always answers through the
//! same entry for the life of the database value.

use crate::ident::{Attr, EntityId};
use crate::index::SortKey;
use crate::schema::{AveShape, AveSpec, MapKind, Schema};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

/// A borrowed view of the identifier(s) stored under one value key.
#[derive(Debug, Clone, Copy)]
pub enum IdsRef<'a> {
    /// Single-entity shape: exactly one identifier.
    One(&'a EntityId),
    /// Entity-set shape: a set of identifiers.
    Many(&'a HashSet<EntityId>),
}

impl<'a> IdsRef<'a> {
    /// Whether the given identifier is present.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        match self {
            Self::One(e) => *e == id,
            Self::Many(set) => set.contains(id),
        }
    }

    /// Iterates the identifiers.
    pub fn iter(&self) -> impl Iterator<Item = &'a EntityId> + '_ {
        match self {
            Self::One(e) => IdsIter::One(std::iter::once(*e)),
            Self::Many(set) => IdsIter::Many(set.iter()),
        }
    }

    /// Number of identifiers present.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(set) => set.len(),
        }
    }

    /// Whether no identifier is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The identifiers in ascending order.
    #[must_use]
    pub fn sorted(&self) -> Vec<&'a EntityId> {
        let mut ids: Vec<&EntityId> = self.iter().collect();
        ids.sort();
        ids
    }
}

enum IdsIter<'a> {
    One(std::iter::Once<&'a EntityId>),
    Many(std::collections::hash_set::Iter<'a, EntityId>),
}

impl<'a> Iterator for IdsIter<'a> {
    type Item = &'a EntityId;

    fn next(&mut self) -> Option<&'a EntityId> {
        match self {
            Self::One(it) => it.next(),
            Self::Many(it) => it.next(),
        }
    }
}

/// A value-keyed map honoring the schema's per-attribute map kind.
#[derive(Debug, Clone, PartialEq)]
enum ValueKeyMap<T> {
    Hash(HashMap<Value, T>),
    Sorted(BTreeMap<SortKey, T>),
}

impl<T> ValueKeyMap<T> {
    fn new(kind: MapKind) -> Self {
        match kind.order() {
            None => Self::Hash(HashMap::new()),
            Some(_) => Self::Sorted(BTreeMap::new()),
        }
    }

    fn key(kind: MapKind, value: Value) -> SortKey {
        SortKey::new(kind.order().unwrap_or_default(), value)
    }

    fn get(&self, kind: MapKind, value: &Value) -> Option<&T> {
        match self {
            Self::Hash(map) => map.get(value),
            Self::Sorted(map) => map.get(&Self::key(kind, value.clone())),
        }
    }

    fn get_mut(&mut self, kind: MapKind, value: &Value) -> Option<&mut T> {
        match self {
            Self::Hash(map) => map.get_mut(value),
            Self::Sorted(map) => map.get_mut(&Self::key(kind, value.clone())),
        }
    }

    fn insert(&mut self, kind: MapKind, value: Value, item: T) -> Option<T> {
        match self {
            Self::Hash(map) => map.insert(value, item),
            Self::Sorted(map) => map.insert(Self::key(kind, value), item),
        }
    }

    fn remove(&mut self, kind: MapKind, value: &Value) -> Option<T> {
        match self {
            Self::Hash(map) => map.remove(value),
            Self::Sorted(map) => map.remove(&Self::key(kind, value.clone())),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Hash(map) => map.len(),
            Self::Sorted(map) => map.len(),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&Value, &T)> + '_> {
        match self {
            Self::Hash(map) => Box::new(map.iter()),
            Self::Sorted(map) => Box::new(map.iter().map(|(k, t)| (k.value(), t))),
        }
    }

    fn range(
        &self,
        kind: MapKind,
        bounds: (Bound<&Value>, Bound<&Value>),
    ) -> Option<Box<dyn DoubleEndedIterator<Item = (&Value, &T)> + '_>> {
        match self {
            Self::Hash(_) => None,
            Self::Sorted(map) => {
                let lo = map_bound(bounds.0, kind);
                let hi = map_bound(bounds.1, kind);
                Some(Box::new(map.range((lo, hi)).map(|(k, t)| (k.value(), t))))
            }
        }
    }

    fn rank(&self, kind: MapKind, value: &Value) -> Option<usize> {
        match self {
            Self::Hash(_) => None,
            Self::Sorted(map) => Some(
                map.range((
                    Bound::Unbounded,
                    Bound::Excluded(Self::key(kind, value.clone())),
                ))
                .count(),
            ),
        }
    }
}

fn map_bound(bound: Bound<&Value>, kind: MapKind) -> Bound<SortKey> {
    match bound {
        Bound::Included(v) => Bound::Included(ValueKeyMap::<()>::key(kind, v.clone())),
        Bound::Excluded(v) => Bound::Excluded(ValueKeyMap::<()>::key(kind, v.clone())),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Repr {
    Single(ValueKeyMap<EntityId>),
    EntitySet(ValueKeyMap<HashSet<EntityId>>),
}

/// One attribute's secondary map.
///
/// The single-entity shape (unique attributes, component reference
/// attributes) binds each value to at most one identifier; the entity-set
/// shape binds each value to a set of identifiers and drops the value key
/// when the set empties.
#[derive(Debug, Clone, PartialEq)]
pub struct AveEntry {
    kind: MapKind,
    repr: Repr,
}

impl AveEntry {
    /// An empty entry of the given specification.
    #[must_use]
    pub fn new(spec: AveSpec) -> Self {
        let repr = match spec.shape {
            AveShape::Single => Repr::Single(ValueKeyMap::new(spec.kind)),
            AveShape::EntitySet => Repr::EntitySet(ValueKeyMap::new(spec.kind)),
        };
        Self {
            kind: spec.kind,
            repr,
        }
    }

    /// The entry's shape.
    #[must_use]
    pub fn shape(&self) -> AveShape {
        match self.repr {
            Repr::Single(_) => AveShape::Single,
            Repr::EntitySet(_) => AveShape::EntitySet,
        }
    }

    /// The entry's map kind.
    #[must_use]
    pub fn kind(&self) -> MapKind {
        self.kind
    }

    /// The identifier bound to a value in the single-entity shape.
    #[must_use]
    pub fn single(&self, value: &Value) -> Option<&EntityId> {
        match &self.repr {
            Repr::Single(map) => map.get(self.kind, value),
            Repr::EntitySet(_) => None,
        }
    }

    /// The identifier(s) bound to a value in either shape.
    #[must_use]
    pub fn ids(&self, value: &Value) -> Option<IdsRef<'_>> {
        match &self.repr {
            Repr::Single(map) => map.get(self.kind, value).map(IdsRef::One),
            Repr::EntitySet(map) => map.get(self.kind, value).map(IdsRef::Many),
        }
    }

    /// Binds `value → id`. For the single-entity shape the previous binding
    /// is replaced and returned; callers check uniqueness and ownership
    /// first. For the entity-set shape the identifier joins the set.
    pub fn insert(&mut self, value: Value, id: EntityId) -> Option<EntityId> {
        let kind = self.kind;
        match &mut self.repr {
            Repr::Single(map) => map.insert(kind, value, id),
            Repr::EntitySet(map) => {
                match map.get_mut(kind, &value) {
                    Some(set) => {
                        set.insert(id);
                    }
                    None => {
                        let mut set = HashSet::new();
                        set.insert(id);
                        map.insert(kind, value, set);
                    }
                }
                None
            }
        }
    }

    /// Unbinds `value → id`. For the entity-set shape the value key
    /// disappears when its set empties. Returns whether a binding was
    /// removed.
    pub fn remove(&mut self, value: &Value, id: &EntityId) -> bool {
        let kind = self.kind;
        match &mut self.repr {
            Repr::Single(map) => {
                if map.get(kind, value) == Some(id) {
                    map.remove(kind, value);
                    true
                } else {
                    false
                }
            }
            Repr::EntitySet(map) => {
                let Some(set) = map.get_mut(kind, value) else {
                    return false;
                };
                let removed = set.remove(id);
                if set.is_empty() {
                    map.remove(kind, value);
                }
                removed
            }
        }
    }

    /// Number of value keys in the entry.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Single(map) => map.len(),
            Repr::EntitySet(map) => map.len(),
        }
    }

    /// Whether the entry has no value keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates all (value, identifiers) pairs; ordered entries iterate in
    /// container order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&Value, IdsRef<'_>)> + '_> {
        match &self.repr {
            Repr::Single(map) => Box::new(map.iter().map(|(v, e)| (v, IdsRef::One(e)))),
            Repr::EntitySet(map) => Box::new(map.iter().map(|(v, s)| (v, IdsRef::Many(s)))),
        }
    }

    /// The (value, identifiers) pairs within `bounds`, in container order.
    /// `None` for hash entries.
    #[must_use]
    pub fn range(
        &self,
        bounds: (Bound<&Value>, Bound<&Value>),
    ) -> Option<Box<dyn DoubleEndedIterator<Item = (&Value, IdsRef<'_>)> + '_>> {
        match &self.repr {
            Repr::Single(map) => map.range(self.kind, bounds).map(|it| {
                Box::new(it.map(|(v, e)| (v, IdsRef::One(e))))
                    as Box<dyn DoubleEndedIterator<Item = (&Value, IdsRef<'_>)>>
            }),
            Repr::EntitySet(map) => map.range(self.kind, bounds).map(|it| {
                Box::new(it.map(|(v, s)| (v, IdsRef::Many(s))))
                    as Box<dyn DoubleEndedIterator<Item = (&Value, IdsRef<'_>)>>
            }),
        }
    }

    /// The smallest value key at or after `value` in container order.
    /// `None` for hash entries or when no such key exists.
    #[must_use]
    pub fn first_at_or_after(&self, value: &Value) -> Option<(&Value, IdsRef<'_>)> {
        self.range((Bound::Included(value), Bound::Unbounded))
            .and_then(|mut it| it.next())
    }

    /// The largest value key at or before `value` in container order.
    #[must_use]
    pub fn last_at_or_before(&self, value: &Value) -> Option<(&Value, IdsRef<'_>)> {
        self.range((Bound::Unbounded, Bound::Included(value)))
            .and_then(|mut it| it.next_back())
    }

    /// Number of value keys strictly before `value` in container order.
    /// `None` for hash entries.
    #[must_use]
    pub fn rank(&self, value: &Value) -> Option<usize> {
        match &self.repr {
            Repr::Single(map) => map.rank(self.kind, value),
            Repr::EntitySet(map) => map.rank(self.kind, value),
        }
    }
}

/// The AVE index: attribute → secondary map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AveIndex {
    entries: HashMap<Attr, AveEntry>,
}

impl AveIndex {
    /// Builds the index with an eager (empty) entry for every indexed
    /// attribute of the schema.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        let mut entries = HashMap::new();
        for (attr, spec) in schema.ave_attrs() {
            entries.insert(attr.clone(), AveEntry::new(*spec));
        }
        Self { entries }
    }

    /// The entry for an attribute, if the attribute is indexed.
    #[must_use]
    pub fn entry(&self, attr: &Attr) -> Option<&AveEntry> {
        self.entries.get(attr)
    }

    pub(crate) fn entry_mut(&mut self, attr: &Attr) -> Option<&mut AveEntry> {
        self.entries.get_mut(attr)
    }

    /// Iterates all (attribute, entry) pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&Attr, &AveEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttrDef, SchemaBuilder};
    use crate::value::ValueOrder;

    fn id(n: u64) -> EntityId {
        EntityId::Id(n)
    }

    fn single_hash() -> AveEntry {
        AveEntry::new(AveSpec {
            shape: AveShape::Single,
            kind: MapKind::Hash,
        })
    }

    fn set_hash() -> AveEntry {
        AveEntry::new(AveSpec {
            shape: AveShape::EntitySet,
            kind: MapKind::Hash,
        })
    }

    #[test]
    fn single_shape_replaces() {
        let mut entry = single_hash();
        assert_eq!(entry.insert(Value::from("a@x"), id(1)), None);
        let old = entry.insert(Value::from("a@x"), id(2));
        assert_eq!(old, Some(id(1)));
        assert_eq!(entry.single(&Value::from("a@x")), Some(&id(2)));
    }

    #[test]
    fn single_shape_remove_checks_identifier() {
        let mut entry = single_hash();
        entry.insert(Value::from("a@x"), id(1));
        assert!(!entry.remove(&Value::from("a@x"), &id(2)));
        assert!(entry.remove(&Value::from("a@x"), &id(1)));
        assert!(entry.is_empty());
    }

    #[test]
    fn entity_set_shape_unions_and_differences() {
        let mut entry = set_hash();
        entry.insert(Value::from("Paris"), id(1));
        entry.insert(Value::from("Paris"), id(2));
        assert_eq!(entry.ids(&Value::from("Paris")).unwrap().len(), 2);

        assert!(entry.remove(&Value::from("Paris"), &id(1)));
        assert_eq!(entry.ids(&Value::from("Paris")).unwrap().len(), 1);

        // Removing the last identifier removes the value key.
        assert!(entry.remove(&Value::from("Paris"), &id(2)));
        assert!(entry.ids(&Value::from("Paris")).is_none());
        assert!(entry.is_empty());
    }

    #[test]
    fn ordered_entry_preserves_comparator_order() {
        let mut entry = AveEntry::new(AveSpec {
            shape: AveShape::EntitySet,
            kind: MapKind::OrderedRange(ValueOrder::Canonical),
        });
        for (n, e) in [(30i64, 1u64), (10, 2), (20, 3)] {
            entry.insert(Value::from(n), id(e));
        }
        let keys: Vec<i64> = entry.iter().map(|(v, _)| v.as_int().unwrap()).collect();
        assert_eq!(keys, vec![10, 20, 30]);

        let hits = entry
            .range((Bound::Included(&Value::from(15i64)), Bound::Unbounded))
            .unwrap()
            .count();
        assert_eq!(hits, 2);
        assert_eq!(entry.rank(&Value::from(30i64)), Some(2));
        assert_eq!(
            entry
                .first_at_or_after(&Value::from(11i64))
                .unwrap()
                .0
                .as_int(),
            Some(20)
        );
        assert_eq!(
            entry
                .last_at_or_before(&Value::from(11i64))
                .unwrap()
                .0
                .as_int(),
            Some(10)
        );
    }

    #[test]
    fn from_schema_creates_eager_entries() {
        let schema = SchemaBuilder::new()
            .attr("person/email", AttrDef::new().unique_identity())
            .attr("person/name", AttrDef::new())
            .build()
            .unwrap();
        let ave = AveIndex::from_schema(&schema);
        assert!(ave.entry(&Attr::from("person/email")).is_some());
        assert!(ave.entry(&Attr::from("person/name")).is_none());
    }
}
