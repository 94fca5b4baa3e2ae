//! The nested-map expander.
//!
//! Map values stored under reference attributes are lifted into their own
//! top-level map forms, breadth-first, until no nested map remains. A
//! nested map under a non-component reference must carry at least one
//! uniqueness-constrained attribute. Nested maps without an identifier
//! receive a fresh placeholder so the parent's reference slot can link to
//! them. Cardinality-many values are normalized to sets of distinct values
//! and empty sets are dropped.

use crate::error::{DbError, DbResult};
use crate::ident::{Attr, Ident, DB_ID};
use crate::schema::Schema;
use crate::tx::{Grouped, MapForm, MapOp, TempidGen};
use crate::value::Value;
use std::collections::{BTreeMap, VecDeque};

/// Expands nested maps and normalizes cardinality-many values in place.
pub(crate) fn expand(schema: &Schema, grouped: &mut Grouped, gen: &mut TempidGen) -> DbResult<()> {
    let mut queue: VecDeque<MapForm> = grouped.maps.drain(..).collect();
    let mut done = Vec::new();

    // List-form assertion values participate in lifting too: a map value in
    // the reference slot of an assertion becomes its own form.
    for (_, attr, value) in &mut grouped.asserts {
        if schema.is_ref(attr) {
            let taken = std::mem::replace(value, Value::Nil);
            *value = lift_ref_value(schema, attr, taken, &mut queue, gen)?;
        }
    }

    while let Some(form) = queue.pop_front() {
        let mut pairs = Vec::with_capacity(form.pairs.len());
        for (attr, value) in form.pairs {
            let value = if schema.is_ref(&attr) {
                match value {
                    Value::List(items) => {
                        let mut lifted = Vec::with_capacity(items.len());
                        for item in items {
                            lifted.push(lift_ref_value(schema, &attr, item, &mut queue, gen)?);
                        }
                        Value::List(lifted)
                    }
                    Value::Set(items) => {
                        let mut lifted = std::collections::BTreeSet::new();
                        for item in items {
                            lifted.insert(lift_ref_value(schema, &attr, item, &mut queue, gen)?);
                        }
                        Value::Set(lifted)
                    }
                    single => lift_ref_value(schema, &attr, single, &mut queue, gen)?,
                }
            } else {
                value
            };
            match normalize_many(schema, &attr, value) {
                Some(value) => pairs.push((attr, value)),
                None => {}
            }
        }
        done.push(MapForm {
            id: form.id,
            op: form.op,
            pairs,
        });
    }

    grouped.maps = done;
    Ok(())
}

/// Lifts one map value in a reference slot into its own form, returning
/// the placeholder (or explicit identifier) the slot links through.
fn lift_ref_value(
    schema: &Schema,
    enclosing: &Attr,
    value: Value,
    queue: &mut VecDeque<MapForm>,
    gen: &mut TempidGen,
) -> DbResult<Value> {
    let Value::Map(nested) = value else {
        return Ok(value);
    };
    if !schema.is_component(enclosing)
        && !nested.keys().any(|attr| schema.is_unique(attr))
    {
        return Err(DbError::InvalidNestedEntity {
            attr: enclosing.clone(),
        });
    }
    let (id, pairs) = split_nested(nested, gen)?;
    let slot_value = match &id {
        Ident::Entity(e) => Value::Ref(e.clone()),
        Ident::Temp(label) => Value::Tempid(label.clone()),
        Ident::Lookup(a, v) => Value::LookupRef(a.clone(), v.clone()),
    };
    queue.push_back(MapForm {
        id: Some(id),
        op: MapOp::Assert,
        pairs,
    });
    Ok(slot_value)
}

/// Splits a nested map into its identifier and data pairs, validating the
/// data keys the same way top-level forms are validated.
fn split_nested(
    nested: BTreeMap<Attr, Value>,
    gen: &mut TempidGen,
) -> DbResult<(Ident, Vec<(Attr, Value)>)> {
    let mut id = None;
    let mut pairs = Vec::with_capacity(nested.len());
    for (attr, value) in nested {
        if attr.as_str() == DB_ID {
            id = Some(super::ident_from_value(value)?);
        } else {
            super::check_data_attr(&attr)?;
            pairs.push((attr, value));
        }
    }
    let id = match id {
        Some(id) => {
            super::check_ident(&id)?;
            id
        }
        None => Ident::Temp(gen.fresh()),
    };
    Ok((id, pairs))
}

/// Normalizes a cardinality-many value to a set of distinct values.
/// Returns `None` when the set would be empty.
fn normalize_many(schema: &Schema, attr: &Attr, value: Value) -> Option<Value> {
    if !schema.is_many(attr) {
        return Some(value);
    }
    let set = match value {
        Value::List(items) => items.into_iter().collect(),
        Value::Set(items) => items,
        single => std::iter::once(single).collect(),
    };
    if set.is_empty() {
        None
    } else {
        Some(Value::Set(set))
    }
}
