//! Transaction forms, grouping and the transaction report.
//!
//! The processor consumes a sequence of [`TxForm`]s. List forms name an
//! operator, an identifier, an attribute and (except for entity retraction)
//! a value; map forms bundle many attribute-value pairs with an optional
//! self-identifier under `db/id` and an optional in-form operator under
//! `db/op`.

pub(crate) mod apply;
pub(crate) mod expand;
pub(crate) mod resolve;

use crate::error::{DbError, DbResult};
use crate::ident::{Attr, EntityId, Ident, DB_ID, DB_OP};
use crate::value::Value;
use std::collections::{HashMap, HashSet};

/// The in-form operator of a map form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapOp {
    /// Assert every pair (the default).
    #[default]
    Assert,
    /// Retract every pair.
    Retract,
}

/// A map-form transaction entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapForm {
    /// Optional self-identifier. A form without one resolves through its
    /// uniqueness-identity pairs or receives a fresh identifier.
    pub id: Option<Ident>,
    /// In-form operator.
    pub op: MapOp,
    /// The attribute-value pairs.
    pub pairs: Vec<(Attr, Value)>,
}

impl MapForm {
    /// An empty assert-form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the self-identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Ident>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Switches the in-form operator to retraction.
    #[must_use]
    pub fn retracting(mut self) -> Self {
        self.op = MapOp::Retract;
        self
    }

    /// Appends one attribute-value pair.
    #[must_use]
    pub fn pair(mut self, attr: impl Into<Attr>, value: impl Into<Value>) -> Self {
        self.pairs.push((attr.into(), value.into()));
        self
    }

    /// Parses a map form from raw string-keyed pairs, honoring the
    /// reserved `db/id` and `db/op` keys.
    ///
    /// # Errors
    ///
    /// - `InvalidOp` for an unknown `db/op` name.
    /// - `InvalidEntityId` for a `db/id` value that is not an identifier:
    ///   an integer (assigned id), text (tempid), a `Ref` or a `LookupRef`.
    pub fn parse<K, I>(pairs: I) -> DbResult<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut form = Self::new();
        for (key, value) in pairs {
            let key: String = key.into();
            if key == DB_ID {
                form.id = Some(ident_from_value(value)?);
            } else if key == DB_OP {
                match value.as_text() {
                    Some("assert") => form.op = MapOp::Assert,
                    Some("retract") => form.op = MapOp::Retract,
                    Some(other) => return Err(DbError::invalid_op(other)),
                    None => return Err(DbError::invalid_op(value.to_string())),
                }
            } else {
                form.pairs.push((Attr::from(key), value));
            }
        }
        Ok(form)
    }
}

fn ident_from_value(value: Value) -> DbResult<Ident> {
    match value {
        Value::Int(n) if n >= 0 => Ok(Ident::id(n as u64)),
        Value::Text(t) => Ok(Ident::Temp(t)),
        Value::Ref(e) => Ok(Ident::Entity(e)),
        Value::Tempid(t) => Ok(Ident::Temp(t)),
        Value::LookupRef(a, v) => Ok(Ident::Lookup(a, v)),
        other => Err(DbError::invalid_id_value(
            &other,
            "not a legal identifier variant",
        )),
    }
}

/// One transaction form.
#[derive(Debug, Clone, PartialEq)]
pub enum TxForm {
    /// Assert a triple.
    Assert {
        /// Identifier slot.
        e: Ident,
        /// Attribute.
        a: Attr,
        /// Value.
        v: Value,
    },
    /// Retract a triple; with the value omitted, retracts the current
    /// value (or all values for cardinality-many).
    Retract {
        /// Identifier slot.
        e: Ident,
        /// Attribute.
        a: Attr,
        /// Optional value.
        v: Option<Value>,
    },
    /// Retract an entity, its component descendants and all incoming
    /// references.
    RetractEntity {
        /// Identifier slot.
        e: Ident,
    },
    /// A map form.
    Map(MapForm),
}

impl TxForm {
    /// An assertion form.
    #[must_use]
    pub fn assert(e: impl Into<Ident>, a: impl Into<Attr>, v: impl Into<Value>) -> Self {
        Self::Assert {
            e: e.into(),
            a: a.into(),
            v: v.into(),
        }
    }

    /// A retraction form with an explicit value.
    #[must_use]
    pub fn retract(e: impl Into<Ident>, a: impl Into<Attr>, v: impl Into<Value>) -> Self {
        Self::Retract {
            e: e.into(),
            a: a.into(),
            v: Some(v.into()),
        }
    }

    /// A retraction form with the value omitted.
    #[must_use]
    pub fn retract_attr(e: impl Into<Ident>, a: impl Into<Attr>) -> Self {
        Self::Retract {
            e: e.into(),
            a: a.into(),
            v: None,
        }
    }

    /// An entity-retraction form.
    #[must_use]
    pub fn retract_entity(e: impl Into<Ident>) -> Self {
        Self::RetractEntity { e: e.into() }
    }
}

impl From<MapForm> for TxForm {
    fn from(form: MapForm) -> Self {
        Self::Map(form)
    }
}

/// One processed (fully resolved) operation of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDatum {
    /// A triple was added.
    Assert {
        /// Entity.
        e: EntityId,
        /// Attribute.
        a: Attr,
        /// Value.
        v: Value,
    },
    /// A triple was removed.
    Retract {
        /// Entity.
        e: EntityId,
        /// Attribute.
        a: Attr,
        /// Value.
        v: Value,
    },
    /// An entity was removed wholesale.
    RetractEntity {
        /// Entity.
        e: EntityId,
    },
}

/// The result of a successful transaction.
#[derive(Debug, Clone)]
pub struct TxReport {
    /// The database value before the transaction.
    pub db_before: crate::database::Database,
    /// The database value after the transaction.
    pub db_after: crate::database::Database,
    /// The processed form: every operation actually applied, resolved.
    pub tx_data: Vec<TxDatum>,
    /// Placeholder label → assigned identifier, for every placeholder the
    /// transaction mentioned.
    pub tempids: HashMap<String, EntityId>,
}

impl TxReport {
    /// The identifier a placeholder label resolved to.
    #[must_use]
    pub fn resolved(&self, label: &str) -> Option<&EntityId> {
        self.tempids.get(label)
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Transaction data grouped by operation, before resolution.
#[derive(Debug, Default)]
pub(crate) struct Grouped {
    pub retract_entities: Vec<Ident>,
    pub retracts: Vec<(Ident, Attr, Option<Value>)>,
    pub asserts: Vec<(Ident, Attr, Value)>,
    pub maps: Vec<MapForm>,
}

/// Groups raw forms by operation, validating identifiers, attribute names
/// and the strict nil rule. Retract-op map forms are lowered into value
/// retractions here (collections elementwise), so expansion and resolution
/// only ever see assert-op maps.
pub(crate) fn group(forms: Vec<TxForm>) -> DbResult<Grouped> {
    let mut grouped = Grouped::default();
    for form in forms {
        match form {
            TxForm::Assert { e, a, v } => {
                check_ident(&e)?;
                check_data_attr(&a)?;
                check_value(&a, &v)?;
                grouped.asserts.push((e, a, v));
            }
            TxForm::Retract { e, a, v } => {
                check_ident(&e)?;
                check_data_attr(&a)?;
                if let Some(v) = &v {
                    check_value(&a, v)?;
                }
                grouped.retracts.push((e, a, v));
            }
            TxForm::RetractEntity { e } => {
                check_ident(&e)?;
                grouped.retract_entities.push(e);
            }
            TxForm::Map(map) => {
                if let Some(id) = &map.id {
                    check_ident(id)?;
                }
                for (a, v) in &map.pairs {
                    check_data_attr(a)?;
                    check_value(a, v)?;
                }
                match map.op {
                    MapOp::Assert => grouped.maps.push(map),
                    MapOp::Retract => {
                        let id = map.id.ok_or_else(|| DbError::InvalidEntityId {
                            value: "(none)".to_owned(),
                            message: "retract map forms require an identifier".to_owned(),
                        })?;
                        for (a, v) in map.pairs {
                            match v {
                                Value::List(items) => {
                                    for item in items {
                                        grouped.retracts.push((
                                            id.clone(),
                                            a.clone(),
                                            Some(item),
                                        ));
                                    }
                                }
                                Value::Set(items) => {
                                    for item in items {
                                        grouped.retracts.push((
                                            id.clone(),
                                            a.clone(),
                                            Some(item),
                                        ));
                                    }
                                }
                                v => grouped.retracts.push((id.clone(), a.clone(), Some(v))),
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(grouped)
}

fn check_ident(ident: &Ident) -> DbResult<()> {
    match ident {
        Ident::Entity(EntityId::Name(name)) => {
            if name.is_empty() {
                return Err(DbError::invalid_entity_id(ident, "empty symbolic name"));
            }
            if name.chars().all(|c| c.is_ascii_digit()) {
                return Err(DbError::invalid_entity_id(
                    ident,
                    "symbolic names must be non-numeric",
                ));
            }
            Ok(())
        }
        Ident::Temp(label) if label.is_empty() => {
            Err(DbError::invalid_entity_id(ident, "empty placeholder label"))
        }
        _ => Ok(()),
    }
}

fn check_data_attr(attr: &Attr) -> DbResult<()> {
    if attr.is_reverse() {
        return Err(DbError::invalid_attribute(
            attr.clone(),
            "reverse-navigation names are not valid data attributes",
        ));
    }
    if attr.is_reserved() {
        return Err(DbError::invalid_attribute(
            attr.clone(),
            "the db namespace is reserved",
        ));
    }
    Ok(())
}

fn check_value(attr: &Attr, value: &Value) -> DbResult<()> {
    if value.contains_nil() {
        return Err(DbError::NilValue { attr: attr.clone() });
    }
    Ok(())
}

/// Generator for placeholders introduced by nested-map expansion.
///
/// Generated labels avoid every label the caller's own forms already use,
/// so expansion can never alias a user placeholder.
#[derive(Debug)]
pub(crate) struct TempidGen {
    counter: u64,
    taken: HashSet<String>,
}

impl TempidGen {
    pub(crate) fn new(grouped: &Grouped) -> Self {
        let mut taken = HashSet::new();
        let mut collect_ident = |ident: &Ident| {
            if let Ident::Temp(label) = ident {
                taken.insert(label.clone());
            }
        };
        for e in &grouped.retract_entities {
            collect_ident(e);
        }
        for (e, _, _) in &grouped.retracts {
            collect_ident(e);
        }
        for (e, _, _) in &grouped.asserts {
            collect_ident(e);
        }
        for map in &grouped.maps {
            if let Some(id) = &map.id {
                collect_ident(id);
            }
        }
        // Placeholders in value slots count too.
        let mut collect_value = |value: &Value| {
            if let Value::Tempid(label) = value {
                taken.insert(label.clone());
            }
        };
        for (_, _, v) in &grouped.asserts {
            walk_values(v, &mut collect_value);
        }
        for (_, _, v) in &grouped.retracts {
            if let Some(v) = v {
                walk_values(v, &mut collect_value);
            }
        }
        for map in &grouped.maps {
            for (_, v) in &map.pairs {
                walk_values(v, &mut collect_value);
            }
        }
        Self { counter: 0, taken }
    }

    pub(crate) fn fresh(&mut self) -> String {
        loop {
            let label = format!("db.tmp/{}", self.counter);
            self.counter += 1;
            if !self.taken.contains(&label) {
                self.taken.insert(label.clone());
                return label;
            }
        }
    }
}

fn walk_values(value: &Value, f: &mut dyn FnMut(&Value)) {
    f(value);
    match value {
        Value::List(items) => {
            for v in items {
                walk_values(v, f);
            }
        }
        Value::Set(items) => {
            for v in items {
                walk_values(v, f);
            }
        }
        Value::Map(pairs) => {
            for v in pairs.values() {
                walk_values(v, f);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_form_parse_reserved_keys() {
        let form = MapForm::parse([
            ("db/id", Value::from("t")),
            ("person/name", Value::from("A")),
        ])
        .unwrap();
        assert_eq!(form.id, Some(Ident::temp("t")));
        assert_eq!(form.op, MapOp::Assert);
        assert_eq!(form.pairs.len(), 1);
    }

    #[test]
    fn map_form_parse_rejects_unknown_op() {
        let err = MapForm::parse([("db/op", Value::from("upsert"))]).unwrap_err();
        assert_eq!(err, DbError::invalid_op("upsert"));
    }

    #[test]
    fn map_form_parse_rejects_bad_id() {
        let err = MapForm::parse([("db/id", Value::from(true))]).unwrap_err();
        assert!(matches!(err, DbError::InvalidEntityId { .. }));
    }

    #[test]
    fn group_rejects_nil_values() {
        let err = group(vec![TxForm::assert(Ident::temp("t"), "person/name", Value::Nil)])
            .unwrap_err();
        assert!(matches!(err, DbError::NilValue { .. }));
    }

    #[test]
    fn group_rejects_nil_in_retract_value() {
        let err = group(vec![TxForm::Retract {
            e: Ident::id(1),
            a: Attr::from("person/name"),
            v: Some(Value::Nil),
        }])
        .unwrap_err();
        assert!(matches!(err, DbError::NilValue { .. }));
    }

    #[test]
    fn group_rejects_numeric_symbolic_names() {
        let err = group(vec![TxForm::assert(
            Ident::name("42"),
            "person/name",
            "A",
        )])
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidEntityId { .. }));
    }

    #[test]
    fn group_rejects_reverse_attrs_in_data() {
        let err = group(vec![TxForm::assert(
            Ident::temp("t"),
            "person/_friend",
            Value::from(1i64),
        )])
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidAttribute { .. }));
    }

    #[test]
    fn group_rejects_reserved_namespace_attrs_in_data() {
        let err = group(vec![TxForm::assert(
            Ident::temp("t"),
            "db/thing",
            Value::from(1i64),
        )])
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidAttribute { .. }));
    }

    #[test]
    fn retract_map_form_lowers_elementwise() {
        let form = MapForm::new()
            .with_id(Ident::id(1))
            .retracting()
            .pair("person/past-cities", Value::from(vec!["Paris", "London"]));
        let grouped = group(vec![form.into()]).unwrap();
        assert_eq!(grouped.retracts.len(), 2);
        assert!(grouped.maps.is_empty());
    }

    #[test]
    fn tempid_gen_avoids_user_labels() {
        let grouped = group(vec![TxForm::assert(
            Ident::temp("db.tmp/0"),
            "person/name",
            "A",
        )])
        .unwrap();
        let mut gen = TempidGen::new(&grouped);
        assert_eq!(gen.fresh(), "db.tmp/1");
    }
}
