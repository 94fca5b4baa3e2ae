//! Structural invariant checks for database values.
//!
//! These quantify the engine's index invariants over a concrete database
//! value; the property suites run them after every generated transaction.

use std::collections::HashMap;
use triadb_core::{AveShape, Database, EntityId, Value};

/// Checks every structural invariant, returning a description of the
/// first violation found.
///
/// # Errors
///
/// A human-readable description of the violated invariant.
pub fn check_invariants(db: &Database) -> Result<(), String> {
    check_self_identifiers(db)?;
    check_ave_backed_by_eav(db)?;
    check_indexed_bindings_present(db)?;
    check_unique_shapes(db)?;
    check_component_ownership(db)?;
    check_no_nil(db)?;
    check_no_empty_entities(db)?;
    check_next_id(db)?;
    Ok(())
}

/// Invariant 2: every EAV value's self-identifier equals its key.
fn check_self_identifiers(db: &Database) -> Result<(), String> {
    for (id, entity) in db.eav().iter() {
        if entity.id() != id {
            return Err(format!("entity keyed {id} carries identifier {}", entity.id()));
        }
    }
    Ok(())
}

/// Invariant 3: every AVE binding is backed by the corresponding entity.
fn check_ave_backed_by_eav(db: &Database) -> Result<(), String> {
    for (attr, entry) in db.ave().iter() {
        let kind = db.schema().container(attr);
        for (value, ids) in entry.iter() {
            for e in ids.iter() {
                let backed = db
                    .eav()
                    .get(e)
                    .is_some_and(|entity| entity.holds(attr, kind, value));
                if !backed {
                    return Err(format!("AVE[{attr}][{value}] → {e} is not backed by EAV"));
                }
            }
        }
    }
    Ok(())
}

/// Invariant 4: indexed attribute bindings appear under AVE.
fn check_indexed_bindings_present(db: &Database) -> Result<(), String> {
    for (id, entity) in db.eav().iter() {
        for (attr, slot) in entity.attrs() {
            if db.schema().ave_spec(attr).is_none() {
                continue;
            }
            let entry = db
                .ave()
                .entry(attr)
                .ok_or_else(|| format!("indexed attribute {attr} has no AVE entry"))?;
            for value in slot.values_ordered() {
                let present = entry.ids(value).is_some_and(|ids| ids.contains(id));
                if !present {
                    return Err(format!("({id}, {attr}, {value}) missing from AVE"));
                }
            }
        }
    }
    Ok(())
}

/// Invariant 5: uniqueness-constrained attributes use the single-entity
/// shape, so a value maps to at most one identifier globally.
fn check_unique_shapes(db: &Database) -> Result<(), String> {
    for (attr, entry) in db.ave().iter() {
        if db.schema().unique(attr).is_some() && entry.shape() != AveShape::Single {
            return Err(format!("unique attribute {attr} is not single-entity shaped"));
        }
    }
    Ok(())
}

/// Invariant 6: a component-referenced entity is owned by at most one
/// (parent, attribute) pair globally, measured against the EAV directly.
fn check_component_ownership(db: &Database) -> Result<(), String> {
    let mut owners: HashMap<EntityId, usize> = HashMap::new();
    for (_, entity) in db.eav().iter() {
        for (attr, slot) in entity.attrs() {
            if !db.schema().is_component(attr) {
                continue;
            }
            for value in slot.values_ordered() {
                if let Value::Ref(target) = value {
                    *owners.entry(target.clone()).or_insert(0) += 1;
                }
            }
        }
    }
    for (target, count) in owners {
        if count > 1 {
            return Err(format!("component {target} has {count} owners"));
        }
    }
    Ok(())
}

/// Invariant 1: no stored value is the absent marker.
fn check_no_nil(db: &Database) -> Result<(), String> {
    for (id, entity) in db.eav().iter() {
        for (attr, slot) in entity.attrs() {
            for value in slot.values_ordered() {
                if value.contains_nil() {
                    return Err(format!("({id}, {attr}) holds nil"));
                }
            }
        }
    }
    Ok(())
}

/// Invariant 7: an entity with no attributes beyond its identifier is not
/// present in the EAV index.
fn check_no_empty_entities(db: &Database) -> Result<(), String> {
    for (id, entity) in db.eav().iter() {
        if entity.is_empty() {
            return Err(format!("entity {id} is empty but present"));
        }
    }
    Ok(())
}

/// Invariant 8: the next-assignable integer strictly exceeds every
/// assigned integer identifier present.
fn check_next_id(db: &Database) -> Result<(), String> {
    for (id, _) in db.eav().iter() {
        if let EntityId::Id(n) = id {
            if *n >= db.next_id() {
                return Err(format!(
                    "assigned id {n} not below next-id {}",
                    db.next_id()
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::fixtures::seeded_person;

    #[test]
    fn seeded_database_satisfies_invariants() {
        let (db, _) = seeded_person("A", "a@x");
        super::check_invariants(&db).unwrap();
    }
}
