//! The database value and its operations.

use crate::error::{DbError, DbResult};
use crate::ident::{Attr, EntityId, Ident};
use crate::index::{AveIndex, EavIndex, Entity};
use crate::pull::Pattern;
use crate::schema::{Prop, PropValue, Schema, SchemaBuilder};
use crate::tx::{self, TempidGen, TxForm, TxReport};
use crate::value::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// An immutable, in-memory EAV database value.
///
/// Every mutating call produces a logically new value without altering the
/// previous one, so callers may hold past versions by reference. Cloning is
/// cheap for the schema (shared) and linear in the index sizes; within one
/// transaction the engine stages all changes on a draft of the index pair
/// and installs the result atomically from the caller's perspective.
#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    schema: Arc<Schema>,
    eav: EavIndex,
    ave: AveIndex,
    next_id: u64,
    basis_t: u64,
}

impl Database {
    /// Creates an empty database from a schema builder.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` when the schema is rejected; no database is
    /// produced.
    pub fn create(schema: SchemaBuilder) -> DbResult<Self> {
        Ok(Self::with_schema(schema.build()?))
    }

    /// Creates an empty database from an already compiled schema.
    #[must_use]
    pub fn with_schema(schema: Schema) -> Self {
        let ave = AveIndex::from_schema(&schema);
        Self {
            schema: Arc::new(schema),
            eav: EavIndex::new(),
            ave,
            next_id: 1,
            basis_t: 0,
        }
    }

    /// The compiled schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The EAV index.
    #[must_use]
    pub fn eav(&self) -> &EavIndex {
        &self.eav
    }

    /// The AVE index.
    #[must_use]
    pub fn ave(&self) -> &AveIndex {
        &self.ave
    }

    /// The next assignable integer identifier. Strictly exceeds every
    /// assigned integer identifier that has ever existed in this value's
    /// history.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// The transaction counter: how many transactions produced this value.
    #[must_use]
    pub fn basis_t(&self) -> u64 {
        self.basis_t
    }

    /// The effective value of an attribute property.
    #[must_use]
    pub fn check_attr(&self, attr: &Attr, prop: Prop) -> PropValue {
        self.schema.check(attr, prop)
    }

    /// Processes a transaction against this value.
    ///
    /// The transaction is atomic: on any error no index change is
    /// observable and `self` is unchanged.
    ///
    /// # Errors
    ///
    /// Any of the transaction-time diagnostics of [`DbError`].
    pub fn transact(&self, forms: impl IntoIterator<Item = TxForm>) -> DbResult<TxReport> {
        let forms: Vec<TxForm> = forms.into_iter().collect();
        debug!(forms = forms.len(), basis = self.basis_t, "transact");

        let mut grouped = tx::group(forms)?;
        let mut gen = TempidGen::new(&grouped);
        tx::expand::expand(&self.schema, &mut grouped, &mut gen)?;
        let resolution = tx::resolve::resolve(self, grouped)?;
        let applied = tx::apply::apply(self, &resolution)?;

        let db_after = Database {
            schema: Arc::clone(&self.schema),
            eav: applied.eav,
            ave: applied.ave,
            next_id: resolution.next_id.max(applied.max_id + 1),
            basis_t: self.basis_t + 1,
        };
        debug!(
            datums = applied.tx_data.len(),
            next_id = db_after.next_id,
            "transaction committed"
        );
        Ok(TxReport {
            db_before: self.clone(),
            db_after,
            tx_data: applied.tx_data,
            tempids: resolution.tempids,
        })
    }

    /// Evaluates a pull pattern against a starting identifier.
    ///
    /// # Errors
    ///
    /// `InvalidLookupRef` for a lookup ref over a non-unique attribute,
    /// `InvalidEntityId` for a placeholder.
    pub fn pull(&self, pattern: &Pattern, ident: &Ident) -> DbResult<Value> {
        crate::pull::pull(self, pattern, ident)
    }

    /// Applies [`Database::pull`] to a sequence of identifiers in order.
    ///
    /// # Errors
    ///
    /// As for [`Database::pull`]; the first failure aborts.
    pub fn pull_many(&self, pattern: &Pattern, idents: &[Ident]) -> DbResult<Vec<Value>> {
        crate::pull::pull_many(self, pattern, idents)
    }

    /// Resolves an identifier without retrieving data. Stable identifiers
    /// pass through; lookup refs are evaluated against the AVE (`None`
    /// when no entity holds the value).
    ///
    /// # Errors
    ///
    /// `InvalidLookupRef` over a non-unique attribute, `InvalidEntityId`
    /// for a placeholder.
    pub fn entid(&self, ident: &Ident) -> DbResult<Option<EntityId>> {
        match ident {
            Ident::Entity(e) => Ok(Some(e.clone())),
            Ident::Lookup(a, v) => {
                if !self.schema.is_unique(a) {
                    return Err(DbError::invalid_lookup_ref(
                        a.clone(),
                        (**v).clone(),
                        "attribute carries no uniqueness constraint",
                    ));
                }
                Ok(self
                    .ave
                    .entry(a)
                    .and_then(|entry| entry.single(v))
                    .cloned())
            }
            Ident::Temp(_) => Err(DbError::invalid_entity_id(
                ident,
                "placeholders are not valid outside transactions",
            )),
        }
    }

    /// The entity map for an identifier, if the entity exists.
    ///
    /// # Errors
    ///
    /// As for [`Database::entid`].
    pub fn entity(&self, ident: &Ident) -> DbResult<Option<&Entity>> {
        Ok(self.entid(ident)?.and_then(|e| self.eav.get(&e)))
    }

    /// Every (attribute, source) pair referencing the target entity,
    /// gathered from the AVE entries of the reference attributes.
    ///
    /// # Errors
    ///
    /// As for [`Database::entid`].
    pub fn find_reverse_refs(
        &self,
        ident: &Ident,
    ) -> DbResult<BTreeSet<(Attr, EntityId)>> {
        let mut out = BTreeSet::new();
        let Some(target) = self.entid(ident)? else {
            return Ok(out);
        };
        let key = Value::Ref(target);
        for attr in self.schema.ref_attrs() {
            if let Some(ids) = self.ave.entry(attr).and_then(|entry| entry.ids(&key)) {
                for source in ids.iter() {
                    out.insert((attr.clone(), source.clone()));
                }
            }
        }
        Ok(out)
    }
}
