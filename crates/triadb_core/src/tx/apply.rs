//! The transaction validator and index updater.
//!
//! The order of operations per transaction is fixed and contractual:
//!
//! 1. Entity retractions, expanded transitively over component attributes,
//!    with every incoming reference nulled across the AVE.
//! 2. Attribute-value retractions, from the retraction tuple set (omitted
//!    values expand against the database-before snapshot).
//! 3. Assertions, in three passes: list forms with stable identifiers,
//!    list forms with resolved placeholders, then map forms. Map forms
//!    against a non-existent entity install the entity map directly after
//!    the per-value invariant checks.
//!
//! Validation reads both the before snapshot and the in-progress draft, so
//! the cardinality-one check can distinguish a value being changed from a
//! value being restored.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::ident::{Attr, EntityId};
use crate::index::{AveIndex, EavIndex, Entity, ManyValues, Slot};
use crate::schema::Schema;
use crate::tx::resolve::{AssertOrigin, Resolution};
use crate::tx::TxDatum;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

/// The outcome of applying a resolved transaction to the index pair.
pub(crate) struct Applied {
    pub eav: EavIndex,
    pub ave: AveIndex,
    pub tx_data: Vec<TxDatum>,
    /// High-water mark over every assigned integer identifier the
    /// transaction touched, for advancing the next-identifier counter.
    pub max_id: u64,
}

struct Applier<'a> {
    before: &'a Database,
    schema: &'a Schema,
    eav: EavIndex,
    ave: AveIndex,
    retracted: HashSet<EntityId>,
    retraction_tuples: HashSet<(EntityId, Attr, Value)>,
    card_one_tx: HashMap<(EntityId, Attr), Value>,
    tx_data: Vec<TxDatum>,
    max_id: u64,
}

/// Applies a resolved transaction, producing the post-transaction index
/// pair. The inputs are never mutated; any error leaves the caller's
/// database untouched.
pub(crate) fn apply(db: &Database, res: &Resolution) -> DbResult<Applied> {
    let mut applier = Applier {
        before: db,
        schema: db.schema(),
        eav: db.eav().clone(),
        ave: db.ave().clone(),
        retracted: entity_closure(db, &res.retract_entities),
        retraction_tuples: HashSet::new(),
        card_one_tx: HashMap::new(),
        tx_data: Vec::new(),
        max_id: 0,
    };

    applier.collect_retraction_tuples(&res.retracts);
    applier.apply_entity_retractions();
    applier.apply_value_retractions();

    for origin in [AssertOrigin::Stable, AssertOrigin::Placeholder] {
        for (e, a, v, o) in &res.asserts {
            if *o == origin {
                applier.assert_slot(e, a, v)?;
            }
        }
    }
    for (e, pairs) in &res.maps {
        applier.assert_map(e, pairs)?;
    }

    Ok(Applied {
        eav: applier.eav,
        ave: applier.ave,
        tx_data: applier.tx_data,
        max_id: applier.max_id,
    })
}

/// The transitive component closure of the entity-retraction roots,
/// computed against the before snapshot. Cycle-safe.
fn entity_closure(db: &Database, roots: &[EntityId]) -> HashSet<EntityId> {
    let mut closure = HashSet::new();
    let mut stack: Vec<EntityId> = roots.to_vec();
    while let Some(e) = stack.pop() {
        if !closure.insert(e.clone()) {
            continue;
        }
        let Some(entity) = db.eav().get(&e) else {
            continue;
        };
        for attr in db.schema().component_attrs() {
            if let Some(slot) = entity.get(attr) {
                for value in slot.values_ordered() {
                    if let Value::Ref(child) = value {
                        if !closure.contains(child) {
                            stack.push(child.clone());
                        }
                    }
                }
            }
        }
    }
    closure
}

impl<'a> Applier<'a> {
    /// Expands the retraction forms into the retraction tuple set. Omitted
    /// values expand against the before snapshot; explicit values are
    /// recorded literally (a tuple that is not present is a no-op later).
    fn collect_retraction_tuples(&mut self, retracts: &[(EntityId, Attr, Option<Value>)]) {
        for (e, a, v) in retracts {
            match v {
                Some(v) => {
                    self.retraction_tuples
                        .insert((e.clone(), a.clone(), v.clone()));
                }
                None => {
                    let Some(entity) = self.before.eav().get(e) else {
                        continue;
                    };
                    if let Some(slot) = entity.get(a) {
                        for value in slot.values_ordered() {
                            self.retraction_tuples
                                .insert((e.clone(), a.clone(), value.clone()));
                        }
                    }
                }
            }
        }
    }

    fn track_id(&mut self, e: &EntityId) {
        if let EntityId::Id(n) = e {
            self.max_id = self.max_id.max(*n);
        }
    }

    fn ave_remove(&mut self, attr: &Attr, value: &Value, e: &EntityId) {
        if let Some(entry) = self.ave.entry_mut(attr) {
            entry.remove(value, e);
        }
    }

    fn ave_insert(&mut self, attr: &Attr, value: Value, e: EntityId) {
        if let Some(entry) = self.ave.entry_mut(attr) {
            entry.insert(value, e);
        }
    }

    // -- Phase 1: entity retractions ------------------------------------

    fn apply_entity_retractions(&mut self) {
        let mut order: Vec<EntityId> = self.retracted.iter().cloned().collect();
        order.sort();
        for e in &order {
            let Some(entity) = self.eav.remove_entity(e) else {
                // Retraction of a non-existent entity is a no-op.
                continue;
            };
            self.tx_data.push(TxDatum::RetractEntity { e: e.clone() });
            for (attr, slot) in entity.attrs() {
                for value in slot.values_ordered() {
                    if let Some(entry) = self.ave.entry_mut(attr) {
                        entry.remove(value, e);
                    }
                    self.tx_data.push(TxDatum::Retract {
                        e: e.clone(),
                        a: attr.clone(),
                        v: value.clone(),
                    });
                }
            }
        }
        // Null every incoming reference across the AVE. Sources that are
        // themselves in the closure are already gone.
        for e in &order {
            let target = Value::Ref(e.clone());
            let ref_attrs: Vec<Attr> = self.schema.ref_attrs().cloned().collect();
            for attr in ref_attrs {
                let sources: Vec<EntityId> = match self
                    .ave
                    .entry(&attr)
                    .and_then(|entry| entry.ids(&target))
                {
                    Some(ids) => ids.iter().cloned().collect(),
                    None => continue,
                };
                let kind = self.schema.container(&attr);
                for source in sources {
                    if self.retracted.contains(&source) {
                        continue;
                    }
                    self.eav.retract(&source, &attr, kind, &target);
                    self.ave_remove(&attr, &target, &source);
                    self.tx_data.push(TxDatum::Retract {
                        e: source,
                        a: attr.clone(),
                        v: target.clone(),
                    });
                }
            }
        }
    }

    // -- Phase 2: attribute-value retractions ---------------------------

    fn apply_value_retractions(&mut self) {
        let mut tuples: Vec<(EntityId, Attr, Value)> =
            self.retraction_tuples.iter().cloned().collect();
        tuples.sort();
        for (e, a, v) in tuples {
            if self.retracted.contains(&e) {
                continue;
            }
            let kind = self.schema.container(&a);
            if self.eav.retract(&e, &a, kind, &v) {
                self.ave_remove(&a, &v, &e);
                self.tx_data.push(TxDatum::Retract { e, a, v });
            }
        }
    }

    // -- Phase 3: assertions --------------------------------------------

    /// Applies one list-form assertion slot: a single value, or each
    /// element of a normalized set under a cardinality-many attribute.
    fn assert_slot(&mut self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        if self.schema.is_many(a) {
            if let Value::Set(items) = v {
                for item in items {
                    self.assert_value(e, a, item)?;
                }
                return Ok(());
            }
        }
        self.assert_value(e, a, v)
    }

    /// Validates and applies one (entity, attribute, value) assertion.
    fn assert_value(&mut self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        self.check_common(e, a, v)?;
        if self.schema.is_many(a) {
            self.assert_many(e, a, v)
        } else {
            self.assert_one(e, a, v)
        }
    }

    fn check_common(&mut self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        if self.retracted.contains(e) {
            return Err(DbError::RetractedEntityConflict { entity: e.clone() });
        }
        if self
            .retraction_tuples
            .contains(&(e.clone(), a.clone(), v.clone()))
        {
            return Err(DbError::AssertRetractConflict {
                entity: e.clone(),
                attr: a.clone(),
                value: v.clone(),
            });
        }
        self.track_id(e);
        if let Value::Ref(target) = v {
            self.track_id(target);
        }
        Ok(())
    }

    fn check_unique(&self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        if !self.schema.is_unique(a) {
            return Ok(());
        }
        if let Some(holder) = self.ave.entry(a).and_then(|entry| entry.single(v)) {
            if holder != e {
                return Err(DbError::UniqueConflict {
                    attr: a.clone(),
                    value: v.clone(),
                    holder: holder.clone(),
                    asserted: e.clone(),
                });
            }
        }
        Ok(())
    }

    /// A component entity is owned by at most one (parent, attribute) pair
    /// globally, across all component attributes.
    fn check_component(&self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        if !self.schema.is_component(a) {
            return Ok(());
        }
        let Value::Ref(target) = v else {
            return Ok(());
        };
        for owner_attr in self.schema.component_attrs() {
            if let Some(holder) = self
                .ave
                .entry(owner_attr)
                .and_then(|entry| entry.single(v))
            {
                if holder != e || owner_attr != a {
                    return Err(DbError::ComponentConflict {
                        attr: a.clone(),
                        target: target.clone(),
                        holder: holder.clone(),
                        holder_attr: owner_attr.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn assert_one(&mut self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        let current = self.eav.get(e).and_then(|entity| entity.value(a)).cloned();
        if current.as_ref() == Some(v) {
            // Asserting a triple already present is a no-op.
            self.card_one_tx
                .insert((e.clone(), a.clone()), v.clone());
            return Ok(());
        }
        if let Some(prev) = self.card_one_tx.get(&(e.clone(), a.clone())) {
            if prev != v {
                let before = self
                    .before
                    .eav()
                    .get(e)
                    .and_then(|entity| entity.value(a));
                if before != Some(v) {
                    return Err(DbError::CardinalityOneConflict {
                        entity: e.clone(),
                        attr: a.clone(),
                        previous: prev.clone(),
                        value: v.clone(),
                    });
                }
            }
        }
        self.check_unique(e, a, v)?;
        self.check_component(e, a, v)?;

        let old = self.eav.insert_one(e, a.clone(), v.clone());
        if let Some(old) = old {
            // Replace the previous binding atomically within the draft.
            self.ave_remove(a, &old, e);
            self.tx_data.push(TxDatum::Retract {
                e: e.clone(),
                a: a.clone(),
                v: old,
            });
        }
        self.ave_insert(a, v.clone(), e.clone());
        self.card_one_tx.insert((e.clone(), a.clone()), v.clone());
        self.tx_data.push(TxDatum::Assert {
            e: e.clone(),
            a: a.clone(),
            v: v.clone(),
        });
        Ok(())
    }

    fn assert_many(&mut self, e: &EntityId, a: &Attr, v: &Value) -> DbResult<()> {
        let kind = self.schema.container(a);
        let present = self
            .eav
            .get(e)
            .map(|entity| entity.holds(a, kind, v))
            .unwrap_or(false);
        if present {
            return Ok(());
        }
        self.check_unique(e, a, v)?;
        self.check_component(e, a, v)?;

        self.eav.insert_many(e, a, kind, v.clone());
        self.ave_insert(a, v.clone(), e.clone());
        self.tx_data.push(TxDatum::Assert {
            e: e.clone(),
            a: a.clone(),
            v: v.clone(),
        });
        Ok(())
    }

    /// Applies one map form. Against a non-existent entity the validated
    /// pairs are installed as the EAV entry directly; otherwise the pairs
    /// merge through the ordinary per-value path.
    fn assert_map(&mut self, e: &EntityId, pairs: &[(Attr, Value)]) -> DbResult<()> {
        if self.eav.contains(e) {
            for (a, v) in pairs {
                self.assert_slot(e, a, v)?;
            }
            return Ok(());
        }
        if pairs.is_empty() {
            return Ok(());
        }

        let mut entity = Entity::new(e.clone());
        for (a, v) in pairs {
            if self.schema.is_many(a) {
                let kind = self.schema.container(a);
                let mut set = ManyValues::new(kind);
                let items: Vec<&Value> = match v {
                    Value::Set(items) => items.iter().collect(),
                    single => vec![single],
                };
                for item in items {
                    self.check_common(e, a, item)?;
                    self.check_unique(e, a, item)?;
                    self.check_component(e, a, item)?;
                    if set.insert(kind, item.clone()) {
                        self.ave_insert(a, item.clone(), e.clone());
                        self.tx_data.push(TxDatum::Assert {
                            e: e.clone(),
                            a: a.clone(),
                            v: item.clone(),
                        });
                    }
                }
                if !set.is_empty() {
                    entity.put(a.clone(), Slot::Many(set));
                }
            } else {
                self.check_common(e, a, v)?;
                if let Some(prev) = self.card_one_tx.get(&(e.clone(), a.clone())) {
                    if prev != v {
                        return Err(DbError::CardinalityOneConflict {
                            entity: e.clone(),
                            attr: a.clone(),
                            previous: prev.clone(),
                            value: v.clone(),
                        });
                    }
                    continue;
                }
                self.check_unique(e, a, v)?;
                self.check_component(e, a, v)?;
                entity.put(a.clone(), Slot::One(v.clone()));
                self.ave_insert(a, v.clone(), e.clone());
                self.card_one_tx.insert((e.clone(), a.clone()), v.clone());
                self.tx_data.push(TxDatum::Assert {
                    e: e.clone(),
                    a: a.clone(),
                    v: v.clone(),
                });
            }
        }
        self.eav.install(entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::ident::Ident;
    use crate::schema::{AttrDef, SchemaBuilder};
    use crate::tx::TxForm;

    fn db() -> Database {
        Database::create(
            SchemaBuilder::new()
                .attr("person/email", AttrDef::new().unique_identity())
                .attr("person/name", AttrDef::new())
                .attr("person/city", AttrDef::new().index_hash())
                .attr("person/past-cities", AttrDef::new().many().index_hash())
                .attr("person/best-friend", AttrDef::new().reference())
                .attr("person/friend", AttrDef::new().many().reference())
                .attr("person/license", AttrDef::new().component())
                .attr("license/number", AttrDef::new().unique_value()),
        )
        .unwrap()
    }

    #[test]
    fn assert_then_retract_same_triple_conflicts() {
        let db = db();
        let e = Ident::temp("t");
        let err = db
            .transact(vec![
                TxForm::assert(e.clone(), "person/name", "A"),
                TxForm::retract(e, "person/name", "A"),
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::AssertRetractConflict { .. }));
    }

    #[test]
    fn cardinality_one_two_values_conflict() {
        let db = db();
        let e = Ident::temp("t");
        let err = db
            .transact(vec![
                TxForm::assert(e.clone(), "person/city", "Oslo"),
                TxForm::assert(e, "person/city", "Bergen"),
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::CardinalityOneConflict { .. }));
    }

    #[test]
    fn cardinality_one_restore_is_allowed() {
        let db = db();
        let report = db
            .transact(vec![TxForm::assert(Ident::temp("t"), "person/city", "Oslo")])
            .unwrap();
        let e = report.resolved("t").unwrap().clone();

        // Change then restore to the pre-transaction value within one tx.
        let report = report
            .db_after
            .transact(vec![
                TxForm::assert(e.clone(), "person/city", "Bergen"),
                TxForm::assert(e.clone(), "person/city", "Oslo"),
            ])
            .unwrap();
        assert_eq!(
            report.db_after.eav().get(&e).unwrap().value(&Attr::from("person/city")),
            Some(&Value::from("Oslo"))
        );
    }

    #[test]
    fn asserting_on_retracted_entity_conflicts() {
        let db = db();
        let report = db
            .transact(vec![TxForm::assert(Ident::temp("t"), "person/name", "A")])
            .unwrap();
        let e = report.resolved("t").unwrap().clone();
        let err = report
            .db_after
            .transact(vec![
                TxForm::retract_entity(e.clone()),
                TxForm::assert(e, "person/name", "B"),
            ])
            .unwrap_err();
        assert!(matches!(err, DbError::RetractedEntityConflict { .. }));
    }

    #[test]
    fn unique_conflict_unless_holder_retracted() {
        let db = db();
        let report = db
            .transact(vec![TxForm::assert(
                Ident::temp("t"),
                "license/number",
                "X",
            )])
            .unwrap();
        let holder = report.resolved("t").unwrap().clone();

        // A different entity claiming the value conflicts...
        let err = report
            .db_after
            .transact(vec![TxForm::assert(
                Ident::temp("u"),
                "license/number",
                "X",
            )])
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueConflict { .. }));

        // ...unless the holder is retracted in the same transaction.
        let report2 = report
            .db_after
            .transact(vec![
                TxForm::retract_entity(holder),
                TxForm::assert(Ident::temp("u"), "license/number", "X"),
            ])
            .unwrap();
        assert_eq!(report2.db_after.eav().len(), 1);
    }

    #[test]
    fn component_single_owner_enforced() {
        let db = db();
        let report = db
            .transact(vec![
                TxForm::assert(Ident::temp("lic"), "license/number", "L1"),
                TxForm::assert(Ident::temp("p1"), "person/license", Value::tempid("lic")),
            ])
            .unwrap();
        let lic = report.resolved("lic").unwrap().clone();

        let err = report
            .db_after
            .transact(vec![TxForm::assert(
                Ident::temp("p2"),
                "person/license",
                Value::Ref(lic),
            )])
            .unwrap_err();
        assert!(matches!(err, DbError::ComponentConflict { .. }));
    }

    #[test]
    fn entity_retraction_nulls_incoming_refs() {
        let db = db();
        let report = db
            .transact(vec![
                TxForm::assert(Ident::temp("a"), "person/name", "A"),
                TxForm::assert(Ident::temp("b"), "person/best-friend", Value::tempid("a")),
                TxForm::assert(Ident::temp("b"), "person/name", "B"),
            ])
            .unwrap();
        let a = report.resolved("a").unwrap().clone();
        let b = report.resolved("b").unwrap().clone();

        let after = report
            .db_after
            .transact(vec![TxForm::retract_entity(a.clone())])
            .unwrap()
            .db_after;
        assert!(!after.eav().contains(&a));
        let b_entity = after.eav().get(&b).unwrap();
        assert!(b_entity.get(&Attr::from("person/best-friend")).is_none());
    }

    #[test]
    fn retract_without_value_clears_many() {
        let db = db();
        let report = db
            .transact(vec![TxForm::Map(
                crate::tx::MapForm::new()
                    .with_id(Ident::temp("t"))
                    .pair("person/past-cities", Value::from(vec!["Paris", "London"]))
                    .pair("person/name", "A"),
            )])
            .unwrap();
        let e = report.resolved("t").unwrap().clone();

        let after = report
            .db_after
            .transact(vec![TxForm::retract_attr(e.clone(), "person/past-cities")])
            .unwrap()
            .db_after;
        let entity = after.eav().get(&e).unwrap();
        assert!(entity.get(&Attr::from("person/past-cities")).is_none());
        assert!(after
            .ave()
            .entry(&Attr::from("person/past-cities"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn retracting_absent_triple_is_noop() {
        let db = db();
        let report = db
            .transact(vec![TxForm::assert(Ident::temp("t"), "person/name", "A")])
            .unwrap();
        let e = report.resolved("t").unwrap().clone();
        let report2 = report
            .db_after
            .transact(vec![TxForm::retract(e, "person/name", "Z")])
            .unwrap();
        assert!(report2.tx_data.is_empty());
        assert_eq!(report2.db_after.eav(), report2.db_before.eav());
    }

    #[test]
    fn cardinality_one_overwrite_replaces_ave_binding() {
        let db = db();
        let report = db
            .transact(vec![TxForm::assert(Ident::temp("t"), "person/city", "Oslo")])
            .unwrap();
        let e = report.resolved("t").unwrap().clone();
        let after = report
            .db_after
            .transact(vec![TxForm::assert(e.clone(), "person/city", "Bergen")])
            .unwrap()
            .db_after;
        let entry = after.ave().entry(&Attr::from("person/city")).unwrap();
        assert!(entry.ids(&Value::from("Oslo")).is_none());
        assert!(entry.ids(&Value::from("Bergen")).unwrap().contains(&e));
    }
}
