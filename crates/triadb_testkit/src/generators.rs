//! Property-based test generators using proptest.
//!
//! Strategies generate transaction sequences over the fixture schema.
//! Generated transactions may legitimately be rejected (cardinality or
//! uniqueness conflicts); the property suites accept either outcome and
//! check the engine's invariants after each step.

use proptest::prelude::*;
use triadb_core::{Ident, MapForm, TxForm, Value};

/// Strategy for a small pool of tempid labels, so forms within one
/// transaction collide and unify realistically.
pub fn tempid_strategy() -> impl Strategy<Value = Ident> {
    (0u8..4).prop_map(|n| Ident::temp(format!("t{n}")))
}

/// Strategy for identifiers of entities that may already exist.
pub fn existing_id_strategy() -> impl Strategy<Value = Ident> {
    (1u64..24).prop_map(Ident::id)
}

/// Strategy for email values drawn from a small pool, exercising the
/// upsert paths.
pub fn email_strategy() -> impl Strategy<Value = Value> {
    (0u8..6).prop_map(|n| Value::from(format!("user{n}@x")))
}

/// Strategy for city names.
pub fn city_strategy() -> impl Strategy<Value = Value> {
    prop::sample::select(vec!["Paris", "London", "Oslo", "Rome"]).prop_map(Value::from)
}

/// Strategy for scalar attribute values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z]{1,6}".prop_map(Value::from),
    ]
}

/// Strategy for one transaction form over the fixture schema.
pub fn tx_form_strategy() -> impl Strategy<Value = TxForm> {
    prop_oneof![
        // Plain assertion on an undeclared cardinality-one attribute.
        (tempid_strategy(), scalar_strategy())
            .prop_map(|(e, v)| TxForm::assert(e, "name", v)),
        // Indexed cardinality-one.
        (tempid_strategy(), city_strategy()).prop_map(|(e, v)| TxForm::assert(e, "city", v)),
        // Indexed cardinality-many.
        (tempid_strategy(), city_strategy())
            .prop_map(|(e, v)| TxForm::assert(e, "past-cities", v)),
        // Upsert through the uniqueness-identity attribute.
        (tempid_strategy(), email_strategy())
            .prop_map(|(e, v)| TxForm::assert(e, "email", v)),
        // References between placeholders defined in the same transaction.
        (tempid_strategy(), (0u8..4)).prop_map(|(e, n)| {
            TxForm::assert(e, "friend", Value::tempid(format!("t{n}")))
        }),
        // Map form mixing an upsert pair with plain data.
        (email_strategy(), scalar_strategy()).prop_map(|(email, v)| {
            TxForm::Map(MapForm::new().pair("email", email).pair("name", v))
        }),
        // Retractions against possibly existing entities.
        (existing_id_strategy(), city_strategy())
            .prop_map(|(e, v)| TxForm::retract(e, "past-cities", v)),
        existing_id_strategy().prop_map(|e| TxForm::retract_attr(e, "city")),
        existing_id_strategy().prop_map(|e| TxForm::retract_entity(e)),
    ]
}

/// Strategy for one transaction: the placeholder pool is always defined
/// (each tempid asserts a label of its own), then random forms follow.
pub fn tx_strategy() -> impl Strategy<Value = Vec<TxForm>> {
    prop::collection::vec(tx_form_strategy(), 0..10).prop_map(|mut forms| {
        let mut defined: Vec<TxForm> = (0u8..4)
            .map(|n| {
                TxForm::assert(
                    Ident::temp(format!("t{n}")),
                    "label",
                    Value::from(format!("t{n}")),
                )
            })
            .collect();
        defined.append(&mut forms);
        defined
    })
}

/// Strategy for a sequence of transactions.
pub fn tx_sequence_strategy() -> impl Strategy<Value = Vec<Vec<TxForm>>> {
    prop::collection::vec(tx_strategy(), 1..8)
}
