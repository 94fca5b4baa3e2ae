//! Schema and database fixtures.

use triadb_core::{AttrDef, Database, Ident, SchemaBuilder, TxForm, Value};

/// The reference schema used throughout the test suites:
///
/// - `email`: uniqueness-identity
/// - `city`: cardinality-one, hashed secondary index
/// - `past-cities`: cardinality-many, hashed secondary index
/// - `best-friend`: reference, cardinality-one
/// - `friend`: reference, cardinality-many
/// - `license`: reference, cardinality-one, component
/// - `license-number`: uniqueness-value
#[must_use]
pub fn schema_s0() -> SchemaBuilder {
    SchemaBuilder::new()
        .attr("email", AttrDef::new().unique_identity())
        .attr("city", AttrDef::new().index_hash())
        .attr("past-cities", AttrDef::new().many().index_hash())
        .attr("best-friend", AttrDef::new().reference())
        .attr("friend", AttrDef::new().many().reference())
        .attr("license", AttrDef::new().component())
        .attr("license-number", AttrDef::new().unique_value())
}

/// An empty database over [`schema_s0`].
#[must_use]
pub fn db_s0() -> Database {
    Database::create(schema_s0()).expect("schema S0 is valid")
}

/// Seeds a person with a name and an email, returning the database and the
/// person's identifier.
#[must_use]
pub fn seeded_person(name: &str, email: &str) -> (Database, triadb_core::EntityId) {
    let db = db_s0();
    let report = db
        .transact(vec![
            TxForm::assert(Ident::temp("p"), "name", name),
            TxForm::assert(Ident::temp("p"), "email", email),
        ])
        .expect("seed transaction is valid");
    let id = report.resolved("p").expect("tempid resolved").clone();
    (report.db_after, id)
}

/// Seeds a three-entity best-friend cycle A→B→C→A, returning the database
/// and the identifiers of A, B and C.
#[must_use]
pub fn friend_cycle() -> (Database, [triadb_core::EntityId; 3]) {
    let db = db_s0();
    let report = db
        .transact(vec![
            TxForm::assert(Ident::temp("a"), "name", "A"),
            TxForm::assert(Ident::temp("b"), "name", "B"),
            TxForm::assert(Ident::temp("c"), "name", "C"),
            TxForm::assert(Ident::temp("a"), "best-friend", Value::tempid("b")),
            TxForm::assert(Ident::temp("b"), "best-friend", Value::tempid("c")),
            TxForm::assert(Ident::temp("c"), "best-friend", Value::tempid("a")),
        ])
        .expect("cycle transaction is valid");
    let ids = ["a", "b", "c"].map(|label| {
        report
            .resolved(label)
            .expect("tempid resolved")
            .clone()
    });
    (report.db_after, ids)
}
