//! # TriaDB Core
//!
//! An in-memory, immutable entity-attribute-value database engine.
//!
//! This crate provides:
//! - A schema-driven index pair: EAV (entity-keyed) and AVE (attribute-
//!   keyed, with hash and ordered secondary maps)
//! - A declarative transaction processor with tempid/upsert resolution,
//!   nested-map expansion and full invariant validation
//! - A hierarchical, recursive, cycle-safe retrieval operator ("pull")
//! - A connection cell serializing writers over immutable values
//!
//! Every successful transaction yields a new logical database value; the
//! previous value stays valid and unchanged for as long as it is held.
//!
//! ```rust
//! use triadb_core::{AttrDef, Database, Ident, Pattern, SchemaBuilder, TxForm};
//!
//! let db = Database::create(
//!     SchemaBuilder::new()
//!         .attr("person/email", AttrDef::new().unique_identity())
//!         .attr("person/name", AttrDef::new()),
//! )?;
//!
//! let report = db.transact(vec![
//!     TxForm::assert(Ident::temp("ada"), "person/email", "ada@x"),
//!     TxForm::assert(Ident::temp("ada"), "person/name", "Ada"),
//! ])?;
//!
//! let ada = report.resolved("ada").unwrap().clone();
//! let pulled = report.db_after.pull(&Pattern::everything(), &Ident::Entity(ada))?;
//! assert!(pulled.as_map().is_some());
//! # Ok::<(), triadb_core::DbError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conn;
pub mod database;
pub mod error;
pub mod ident;
pub mod index;
pub mod pull;
pub mod schema;
pub mod tx;
pub mod value;

pub use conn::Conn;
pub use database::Database;
pub use error::{DbError, DbResult};
pub use ident::{Attr, EntityId, Ident, DB_ID, DB_OP};
pub use index::{AveEntry, AveIndex, EavIndex, Entity, IdsRef, ManyValues, Slot};
pub use pull::{attr, join, recur, wildcard, Pattern, PullAttr, PullElem};
pub use schema::{
    AttrDef, AveShape, AveSpec, Cardinality, ContainerKind, MapKind, Prop, PropValue, Schema,
    SchemaBuilder, Uniqueness,
};
pub use tx::{MapForm, MapOp, TxDatum, TxForm, TxReport};
pub use value::{Value, ValueOrder, F64};
