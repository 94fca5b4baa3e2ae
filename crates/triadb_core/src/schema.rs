//! Schema records, creation-time validation and compiled lookups.
//!
//! A schema is immutable after construction. Validation happens once, when
//! the database is created; afterwards the compiled form answers every
//! per-attribute question the engine asks (cardinality, reference-ness,
//! uniqueness flavor, index shape, container kind) without re-deriving it.

use crate::error::{DbError, DbResult};
use crate::ident::Attr;
use crate::value::ValueOrder;
use std::collections::{BTreeMap, HashSet};

/// Attribute cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cardinality {
    /// One value per entity; assertions overwrite.
    #[default]
    One,
    /// A set of distinct values per entity.
    Many,
}

/// Uniqueness flavor of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Uniqueness {
    /// Unique with upsert: a matching value resolves tempids to the holder.
    Identity,
    /// Unique without upsert: a matching value on another entity conflicts.
    Value,
}

/// Shape of a secondary-index map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MapKind {
    /// Hash map; O(1) point lookups only.
    Hash,
    /// Ordered map under the given comparator.
    Ordered(ValueOrder),
    /// Ordered map that additionally serves range, nearest and rank
    /// queries in logarithmic time.
    OrderedRange(ValueOrder),
}

impl MapKind {
    /// The comparator, for the ordered kinds.
    #[must_use]
    pub fn order(self) -> Option<ValueOrder> {
        match self {
            Self::Hash => None,
            Self::Ordered(o) | Self::OrderedRange(o) => Some(o),
        }
    }
}

/// Container kind for cardinality-many values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContainerKind {
    /// Unordered hash set.
    #[default]
    Unordered,
    /// Sorted set under the given comparator.
    Ordered(ValueOrder),
    /// Sorted set that additionally serves range, nearest and rank queries.
    OrderedRange(ValueOrder),
}

impl ContainerKind {
    /// The comparator, for the ordered kinds.
    #[must_use]
    pub fn order(self) -> Option<ValueOrder> {
        match self {
            Self::Unordered => None,
            Self::Ordered(o) | Self::OrderedRange(o) => Some(o),
        }
    }
}

/// Shape of an attribute's AVE entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AveShape {
    /// value → identifier. Used for unique attributes and component
    /// reference attributes.
    Single,
    /// value → set of identifiers. Used for all other indexed attributes.
    EntitySet,
}

/// Compiled AVE entry specification for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AveSpec {
    /// Entry shape.
    pub shape: AveShape,
    /// Per-attribute map kind.
    pub kind: MapKind,
}

/// Declared properties of one attribute.
///
/// Built with the fluent methods; every field defaults to the least
/// constrained setting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttrDef {
    /// Cardinality, default one.
    pub cardinality: Cardinality,
    /// Whether values are entity references.
    pub reference: bool,
    /// Whether referenced entities are owned by the source. Requires
    /// `reference`.
    pub component: bool,
    /// Uniqueness constraint. Requires cardinality one.
    pub unique: Option<Uniqueness>,
    /// Explicit secondary-index map kind.
    pub index: Option<MapKind>,
    /// Container kind for cardinality-many values. Ordered kinds are
    /// forbidden for reference attributes.
    pub container: ContainerKind,
}

impl AttrDef {
    /// A fresh definition with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets cardinality many.
    #[must_use]
    pub fn many(mut self) -> Self {
        self.cardinality = Cardinality::Many;
        self
    }

    /// Marks values as entity references.
    #[must_use]
    pub fn reference(mut self) -> Self {
        self.reference = true;
        self
    }

    /// Marks the reference as a component (owned target).
    #[must_use]
    pub fn component(mut self) -> Self {
        self.reference = true;
        self.component = true;
        self
    }

    /// Adds a uniqueness-identity constraint.
    #[must_use]
    pub fn unique_identity(mut self) -> Self {
        self.unique = Some(Uniqueness::Identity);
        self
    }

    /// Adds a uniqueness-value constraint.
    #[must_use]
    pub fn unique_value(mut self) -> Self {
        self.unique = Some(Uniqueness::Value);
        self
    }

    /// Requests a hash secondary index.
    #[must_use]
    pub fn index_hash(mut self) -> Self {
        self.index = Some(MapKind::Hash);
        self
    }

    /// Requests an ordered secondary index under `order`.
    #[must_use]
    pub fn index_ordered(mut self, order: ValueOrder) -> Self {
        self.index = Some(MapKind::Ordered(order));
        self
    }

    /// Requests a range-capable ordered secondary index under `order`.
    #[must_use]
    pub fn index_range(mut self, order: ValueOrder) -> Self {
        self.index = Some(MapKind::OrderedRange(order));
        self
    }

    /// Requests an ordered cardinality-many container under `order`.
    #[must_use]
    pub fn container_ordered(mut self, order: ValueOrder) -> Self {
        self.container = ContainerKind::Ordered(order);
        self
    }

    /// Requests a range-capable ordered cardinality-many container.
    #[must_use]
    pub fn container_range(mut self, order: ValueOrder) -> Self {
        self.container = ContainerKind::OrderedRange(order);
        self
    }
}

/// A queryable attribute property, for [`Schema::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prop {
    /// Cardinality.
    Cardinality,
    /// Reference-ness.
    Reference,
    /// Component-ness.
    Component,
    /// Uniqueness flavor.
    Unique,
    /// Secondary-index map kind (including index entries implied by
    /// reference-ness or uniqueness).
    Index,
    /// Cardinality-many container kind.
    Container,
}

/// The effective value of an attribute property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropValue {
    /// A cardinality.
    Cardinality(Cardinality),
    /// A boolean property.
    Bool(bool),
    /// A uniqueness flavor, or none.
    Unique(Option<Uniqueness>),
    /// An effective index map kind, or none when the attribute is not
    /// indexed at all.
    Index(Option<MapKind>),
    /// A container kind.
    Container(ContainerKind),
}

/// Builder collecting attribute definitions prior to validation.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    attrs: BTreeMap<Attr, AttrDef>,
}

impl SchemaBuilder {
    /// A fresh, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) one attribute definition.
    #[must_use]
    pub fn attr(mut self, name: impl Into<Attr>, def: AttrDef) -> Self {
        self.attrs.insert(name.into(), def);
        self
    }

    /// Validates the collected definitions and compiles the schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` when any definition violates the schema
    /// rules; no schema is produced.
    pub fn build(self) -> DbResult<Schema> {
        Schema::compile(self.attrs)
    }
}

/// A validated, compiled schema.
///
/// Immutable after construction. Attribute properties are pre-sorted into
/// per-property sets so the hot paths of the transaction processor are set
/// probes rather than record lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    attrs: BTreeMap<Attr, AttrDef>,
    many: HashSet<Attr>,
    refs: HashSet<Attr>,
    components: HashSet<Attr>,
    unique_identity: HashSet<Attr>,
    unique_value: HashSet<Attr>,
    ave: BTreeMap<Attr, AveSpec>,
}

impl Schema {
    /// Validates and compiles a set of attribute definitions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` when a definition violates any rule:
    /// uniqueness on a cardinality-many attribute, component on a
    /// non-reference, an ordered many-value container on a reference
    /// attribute, or an attribute name in the reserved namespace or the
    /// reverse-navigation form.
    pub fn compile(attrs: BTreeMap<Attr, AttrDef>) -> DbResult<Schema> {
        for (attr, def) in &attrs {
            if attr.is_reserved() {
                return Err(DbError::invalid_schema(
                    attr.clone(),
                    "the db namespace is reserved",
                ));
            }
            if attr.is_reverse() {
                return Err(DbError::invalid_schema(
                    attr.clone(),
                    "local segments beginning with an underscore are reserved for reverse navigation",
                ));
            }
            if attr.local().is_empty() {
                return Err(DbError::invalid_schema(attr.clone(), "empty local segment"));
            }
            if def.unique.is_some() && def.cardinality == Cardinality::Many {
                return Err(DbError::invalid_schema(
                    attr.clone(),
                    "unique attributes must be cardinality-one",
                ));
            }
            if def.component && !def.reference {
                return Err(DbError::invalid_schema(
                    attr.clone(),
                    "component requires a reference attribute",
                ));
            }
            if def.reference && def.container != ContainerKind::Unordered {
                return Err(DbError::invalid_schema(
                    attr.clone(),
                    "ordered many-value containers are forbidden for reference attributes",
                ));
            }
        }

        let mut schema = Schema {
            attrs,
            many: HashSet::new(),
            refs: HashSet::new(),
            components: HashSet::new(),
            unique_identity: HashSet::new(),
            unique_value: HashSet::new(),
            ave: BTreeMap::new(),
        };
        for (attr, def) in &schema.attrs {
            if def.cardinality == Cardinality::Many {
                schema.many.insert(attr.clone());
            }
            if def.reference {
                schema.refs.insert(attr.clone());
            }
            if def.component {
                schema.components.insert(attr.clone());
            }
            match def.unique {
                Some(Uniqueness::Identity) => {
                    schema.unique_identity.insert(attr.clone());
                }
                Some(Uniqueness::Value) => {
                    schema.unique_value.insert(attr.clone());
                }
                None => {}
            }
            // AVE entries exist for reference-typed, uniqueness-constrained
            // and explicitly indexed attributes.
            if def.reference || def.unique.is_some() || def.index.is_some() {
                let shape = if def.unique.is_some() || def.component {
                    AveShape::Single
                } else {
                    AveShape::EntitySet
                };
                let kind = def.index.unwrap_or(MapKind::Hash);
                schema.ave.insert(attr.clone(), AveSpec { shape, kind });
            }
        }
        Ok(schema)
    }

    /// The declared definition of an attribute, if any.
    #[must_use]
    pub fn def(&self, attr: &Attr) -> Option<&AttrDef> {
        self.attrs.get(attr)
    }

    /// All declared attributes in name order.
    pub fn attrs(&self) -> impl Iterator<Item = (&Attr, &AttrDef)> {
        self.attrs.iter()
    }

    /// Whether the attribute is cardinality-many.
    #[must_use]
    pub fn is_many(&self, attr: &Attr) -> bool {
        self.many.contains(attr)
    }

    /// Whether the attribute is reference-typed.
    #[must_use]
    pub fn is_ref(&self, attr: &Attr) -> bool {
        self.refs.contains(attr)
    }

    /// Whether the attribute is a component reference.
    #[must_use]
    pub fn is_component(&self, attr: &Attr) -> bool {
        self.components.contains(attr)
    }

    /// The uniqueness flavor of the attribute, if any.
    #[must_use]
    pub fn unique(&self, attr: &Attr) -> Option<Uniqueness> {
        if self.unique_identity.contains(attr) {
            Some(Uniqueness::Identity)
        } else if self.unique_value.contains(attr) {
            Some(Uniqueness::Value)
        } else {
            None
        }
    }

    /// Whether the attribute upserts (uniqueness-identity).
    #[must_use]
    pub fn is_unique_identity(&self, attr: &Attr) -> bool {
        self.unique_identity.contains(attr)
    }

    /// Whether the attribute carries any uniqueness constraint.
    #[must_use]
    pub fn is_unique(&self, attr: &Attr) -> bool {
        self.unique_identity.contains(attr) || self.unique_value.contains(attr)
    }

    /// The AVE entry specification for an attribute, if it is indexed.
    #[must_use]
    pub fn ave_spec(&self, attr: &Attr) -> Option<AveSpec> {
        self.ave.get(attr).copied()
    }

    /// All AVE-indexed attributes, in name order.
    pub fn ave_attrs(&self) -> impl Iterator<Item = (&Attr, &AveSpec)> {
        self.ave.iter()
    }

    /// The reference attributes, iterated in arbitrary order.
    pub fn ref_attrs(&self) -> impl Iterator<Item = &Attr> {
        self.refs.iter()
    }

    /// The component attributes, iterated in arbitrary order.
    pub fn component_attrs(&self) -> impl Iterator<Item = &Attr> {
        self.components.iter()
    }

    /// The container kind for a cardinality-many attribute.
    #[must_use]
    pub fn container(&self, attr: &Attr) -> ContainerKind {
        self.attrs
            .get(attr)
            .map_or(ContainerKind::Unordered, |d| d.container)
    }

    /// The effective value of any (attribute, property) pair.
    ///
    /// Unknown attributes answer with the defaults, mirroring the engine's
    /// treatment of undeclared attributes.
    #[must_use]
    pub fn check(&self, attr: &Attr, prop: Prop) -> PropValue {
        let def = self.attrs.get(attr);
        match prop {
            Prop::Cardinality => {
                PropValue::Cardinality(def.map_or(Cardinality::One, |d| d.cardinality))
            }
            Prop::Reference => PropValue::Bool(def.is_some_and(|d| d.reference)),
            Prop::Component => PropValue::Bool(def.is_some_and(|d| d.component)),
            Prop::Unique => PropValue::Unique(def.and_then(|d| d.unique)),
            Prop::Index => PropValue::Index(self.ave.get(attr).map(|spec| spec.kind)),
            Prop::Container => {
                PropValue::Container(def.map_or(ContainerKind::Unordered, |d| d.container))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(name: &str, def: AttrDef) -> DbResult<Schema> {
        SchemaBuilder::new().attr(name, def).build()
    }

    #[test]
    fn unique_requires_cardinality_one() {
        let err = build("person/email", AttrDef::new().many().unique_identity()).unwrap_err();
        assert!(matches!(err, DbError::InvalidSchema { .. }));
    }

    #[test]
    fn component_implies_reference() {
        // The fluent builder sets reference; a raw def must be rejected.
        let def = AttrDef {
            component: true,
            ..AttrDef::new()
        };
        assert!(build("person/license", def).is_err());
    }

    #[test]
    fn ordered_container_forbidden_for_refs() {
        let def = AttrDef::new()
            .many()
            .reference()
            .container_ordered(ValueOrder::Canonical);
        assert!(build("person/friend", def).is_err());
    }

    #[test]
    fn reserved_names_rejected() {
        assert!(build("db/thing", AttrDef::new()).is_err());
        assert!(build("person/_friend", AttrDef::new()).is_err());
    }

    #[test]
    fn ave_entries_for_refs_uniques_and_indexed() {
        let schema = SchemaBuilder::new()
            .attr("person/email", AttrDef::new().unique_identity())
            .attr("person/friend", AttrDef::new().many().reference())
            .attr("person/city", AttrDef::new().index_hash())
            .attr("person/name", AttrDef::new())
            .build()
            .unwrap();

        assert_eq!(
            schema.ave_spec(&Attr::from("person/email")).unwrap().shape,
            AveShape::Single
        );
        assert_eq!(
            schema.ave_spec(&Attr::from("person/friend")).unwrap().shape,
            AveShape::EntitySet
        );
        assert!(schema.ave_spec(&Attr::from("person/city")).is_some());
        assert!(schema.ave_spec(&Attr::from("person/name")).is_none());
    }

    #[test]
    fn component_entry_is_single_shape() {
        let schema = SchemaBuilder::new()
            .attr("person/license", AttrDef::new().component())
            .build()
            .unwrap();
        assert_eq!(
            schema
                .ave_spec(&Attr::from("person/license"))
                .unwrap()
                .shape,
            AveShape::Single
        );
    }

    #[test]
    fn check_answers_defaults_for_unknown_attrs() {
        let schema = SchemaBuilder::new().build().unwrap();
        let attr = Attr::from("person/age");
        assert_eq!(
            schema.check(&attr, Prop::Cardinality),
            PropValue::Cardinality(Cardinality::One)
        );
        assert_eq!(schema.check(&attr, Prop::Reference), PropValue::Bool(false));
        assert_eq!(schema.check(&attr, Prop::Index), PropValue::Index(None));
    }
}
