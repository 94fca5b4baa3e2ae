//! Lookup-ref and tempid resolution.
//!
//! Resolution happens in a fixed order:
//!
//! 1. Lookup references in identifier slots are evaluated against the
//!    current AVE.
//! 2. Placeholders are walked through retractions, then list-form
//!    assertions, then map-form assertions. Each placeholder paired with a
//!    uniqueness-identity value resolves against the current AVE first,
//!    then against a transaction-scoped working AVE; a miss assigns a
//!    fresh identifier. Either way the pair is recorded in the working AVE
//!    so later forms unify.
//! 3. Placeholders still unbound receive fresh identifiers.
//! 4. Map forms without an identifier resolve through their
//!    uniqueness-identity pairs, or receive fresh identifiers.
//! 5. Placeholders in the value slots of reference attributes are
//!    replaced; anything left unmappable is a ref-resolution error.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::ident::{Attr, EntityId, Ident};
use crate::tx::Grouped;
use crate::value::Value;
use std::collections::HashMap;

/// Which kind of identifier a list-form assertion originally carried.
/// Drives the three-pass assertion order of the index updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssertOrigin {
    /// The form named a stable identifier (or a lookup ref resolved to
    /// one).
    Stable,
    /// The form named a placeholder.
    Placeholder,
}

/// Fully resolved transaction data.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub retract_entities: Vec<EntityId>,
    pub retracts: Vec<(EntityId, Attr, Option<Value>)>,
    pub asserts: Vec<(EntityId, Attr, Value, AssertOrigin)>,
    pub maps: Vec<(EntityId, Vec<(Attr, Value)>)>,
    pub tempids: HashMap<String, EntityId>,
    pub next_id: u64,
}

struct Resolver<'a> {
    db: &'a Database,
    next_id: u64,
    bindings: HashMap<String, EntityId>,
    tx_ave: HashMap<(Attr, Value), EntityId>,
}

impl<'a> Resolver<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            next_id: db.next_id(),
            bindings: HashMap::new(),
            tx_ave: HashMap::new(),
        }
    }

    fn fresh(&mut self) -> EntityId {
        let id = EntityId::Id(self.next_id);
        self.next_id += 1;
        id
    }

    /// Evaluates a lookup reference against the current AVE.
    fn lookup(&self, attr: &Attr, value: &Value) -> DbResult<Option<EntityId>> {
        if !self.db.schema().is_unique(attr) {
            return Err(DbError::invalid_lookup_ref(
                attr.clone(),
                value.clone(),
                "attribute carries no uniqueness constraint",
            ));
        }
        Ok(self
            .db
            .ave()
            .entry(attr)
            .and_then(|entry| entry.single(value))
            .cloned())
    }

    /// Resolves an identifier slot: lookup refs are evaluated and must
    /// resolve, stable identifiers pass through, placeholders stay.
    fn resolve_id_slot(&self, ident: Ident) -> DbResult<Ident> {
        match ident {
            Ident::Lookup(attr, value) => match self.lookup(&attr, &value)? {
                Some(e) => Ok(Ident::Entity(e)),
                None => Err(DbError::invalid_lookup_ref(
                    attr,
                    *value,
                    "no entity holds this value",
                )),
            },
            other => Ok(other),
        }
    }

    /// One upsert step: a placeholder appeared together with
    /// uniqueness-identity pairs.
    fn upsert(&mut self, label: &str, pairs: &[(Attr, Value)]) -> DbResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let bound = self.bindings.get(label).cloned();
        let mut candidate: Option<(EntityId, Attr, Value)> = None;
        for (attr, value) in pairs {
            let hit = match self.lookup_upsert(attr, value) {
                Some(e) => e,
                None => continue,
            };
            match &candidate {
                None => candidate = Some((hit, attr.clone(), value.clone())),
                Some((c, _, _)) if *c != hit => {
                    return Err(DbError::UniqueConflict {
                        attr: attr.clone(),
                        value: value.clone(),
                        holder: hit,
                        asserted: c.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        let target = match (bound, candidate) {
            (Some(b), Some((c, attr, value))) => {
                if b != c {
                    return Err(DbError::UniqueConflict {
                        attr,
                        value,
                        holder: c,
                        asserted: b,
                    });
                }
                b
            }
            (Some(b), None) => b,
            (None, Some((c, _, _))) => c,
            (None, None) => self.fresh(),
        };
        self.bindings.insert(label.to_owned(), target.clone());
        for (attr, value) in pairs {
            self.tx_ave
                .insert((attr.clone(), value.clone()), target.clone());
        }
        Ok(())
    }

    fn lookup_upsert(&self, attr: &Attr, value: &Value) -> Option<EntityId> {
        self.db
            .ave()
            .entry(attr)
            .and_then(|entry| entry.single(value))
            .cloned()
            .or_else(|| self.tx_ave.get(&(attr.clone(), value.clone())).cloned())
    }

    /// The uniqueness-identity pairs of one form, with placeholder values
    /// skipped (a placeholder cannot match the AVE).
    fn identity_pairs<'p>(
        &self,
        pairs: impl Iterator<Item = (&'p Attr, &'p Value)>,
    ) -> Vec<(Attr, Value)> {
        pairs
            .filter(|(attr, value)| {
                self.db.schema().is_unique_identity(attr) && !value.is_placeholder()
            })
            .map(|(attr, value)| (attr.clone(), value.clone()))
            .collect()
    }

    /// Binds any placeholder still unbound to a fresh identifier.
    fn bind_fresh(&mut self, ident: &Ident) {
        if let Ident::Temp(label) = ident {
            if !self.bindings.contains_key(label) {
                let fresh = self.fresh();
                self.bindings.insert(label.clone(), fresh);
            }
        }
    }

    fn binding(&self, ident: &Ident) -> EntityId {
        match ident {
            Ident::Entity(e) => e.clone(),
            Ident::Temp(label) => self
                .bindings
                .get(label)
                .cloned()
                .expect("placeholder bound before extraction"),
            Ident::Lookup(_, _) => unreachable!("lookup refs resolved in step 1"),
        }
    }

    /// Replaces placeholders in the value slot of a reference attribute.
    fn resolve_ref_value(&self, attr: &Attr, value: Value) -> DbResult<Value> {
        match value {
            Value::Ref(e) => Ok(Value::Ref(e)),
            Value::Int(n) if n >= 0 => Ok(Value::Ref(EntityId::Id(n as u64))),
            Value::Tempid(label) => match self.bindings.get(&label) {
                Some(e) => Ok(Value::Ref(e.clone())),
                None => Err(DbError::ref_resolution(attr.clone(), Value::Tempid(label))),
            },
            Value::LookupRef(la, lv) => match self.lookup(&la, &lv)? {
                Some(e) => Ok(Value::Ref(e)),
                None => Err(DbError::ref_resolution(
                    attr.clone(),
                    Value::LookupRef(la, lv),
                )),
            },
            other => Err(DbError::ref_resolution(attr.clone(), other)),
        }
    }

    /// Resolves one value slot: elementwise for normalized
    /// cardinality-many sets, and rejects placeholders that ended up under
    /// non-reference attributes.
    fn resolve_value_slot(&self, attr: &Attr, value: Value) -> DbResult<Value> {
        if self.db.schema().is_ref(attr) {
            match value {
                Value::Set(items) => {
                    let mut resolved = std::collections::BTreeSet::new();
                    for item in items {
                        resolved.insert(self.resolve_ref_value(attr, item)?);
                    }
                    Ok(Value::Set(resolved))
                }
                single => self.resolve_ref_value(attr, single),
            }
        } else {
            let mut placeholder = None;
            super::walk_values(&value, &mut |v: &Value| {
                if placeholder.is_none() && v.is_placeholder() {
                    placeholder = Some(v.clone());
                }
            });
            match placeholder {
                Some(p) => Err(DbError::ref_resolution(attr.clone(), p)),
                None => Ok(value),
            }
        }
    }
}

/// Runs the five resolution steps over grouped transaction data.
pub(crate) fn resolve(db: &Database, grouped: Grouped) -> DbResult<Resolution> {
    let mut r = Resolver::new(db);

    // Step 1: lookup refs in identifier slots.
    let retract_entities: Vec<Ident> = grouped
        .retract_entities
        .into_iter()
        .map(|e| r.resolve_id_slot(e))
        .collect::<DbResult<_>>()?;
    let retracts: Vec<(Ident, Attr, Option<Value>)> = grouped
        .retracts
        .into_iter()
        .map(|(e, a, v)| Ok((r.resolve_id_slot(e)?, a, v)))
        .collect::<DbResult<_>>()?;
    let asserts: Vec<(Ident, Attr, Value)> = grouped
        .asserts
        .into_iter()
        .map(|(e, a, v)| Ok((r.resolve_id_slot(e)?, a, v)))
        .collect::<DbResult<_>>()?;
    let mut maps = grouped.maps;
    for map in &mut maps {
        if let Some(id) = map.id.take() {
            map.id = Some(r.resolve_id_slot(id)?);
        }
    }

    // Step 2: upsert walk over retractions, then list-form assertions,
    // then map-form assertions.
    for (e, a, v) in &retracts {
        if let (Ident::Temp(label), Some(v)) = (e, v) {
            let pairs = r.identity_pairs(std::iter::once((a, v)));
            r.upsert(label, &pairs)?;
        }
    }
    for (e, a, v) in &asserts {
        if let Ident::Temp(label) = e {
            let pairs = r.identity_pairs(std::iter::once((a, v)));
            r.upsert(label, &pairs)?;
        }
    }
    for map in &maps {
        if let Some(Ident::Temp(label)) = &map.id {
            let label = label.clone();
            let pairs = r.identity_pairs(map.pairs.iter().map(|(a, v)| (a, v)));
            r.upsert(&label, &pairs)?;
        }
    }

    // Step 3: fresh identifiers for whatever is still unbound.
    for e in &retract_entities {
        r.bind_fresh(e);
    }
    for (e, _, _) in &retracts {
        r.bind_fresh(e);
    }
    for (e, _, _) in &asserts {
        r.bind_fresh(e);
    }
    for map in &maps {
        if let Some(id) = &map.id {
            r.bind_fresh(id);
        }
    }

    // Step 4: map forms without an identifier resolve through their
    // uniqueness-identity pairs, falling back to fresh identifiers. The
    // pairs are recorded in the working AVE so identical id-less forms
    // unify within one transaction.
    let mut resolved_maps = Vec::with_capacity(maps.len());
    for map in maps {
        let id = match &map.id {
            Some(id) => r.binding(id),
            None => {
                let pairs = r.identity_pairs(map.pairs.iter().map(|(a, v)| (a, v)));
                let mut target = None;
                for (attr, value) in &pairs {
                    if let Some(hit) = r.lookup_upsert(attr, value) {
                        target = Some(hit);
                        break;
                    }
                }
                let id = target.unwrap_or_else(|| r.fresh());
                for (attr, value) in pairs {
                    r.tx_ave.insert((attr, value), id.clone());
                }
                id
            }
        };
        resolved_maps.push((id, map.pairs));
    }

    // Step 5: placeholders in value slots.
    let retract_entities: Vec<EntityId> =
        retract_entities.iter().map(|e| r.binding(e)).collect();
    let retracts: Vec<(EntityId, Attr, Option<Value>)> = retracts
        .into_iter()
        .map(|(e, a, v)| {
            let e = r.binding(&e);
            let v = match v {
                Some(v) => Some(r.resolve_value_slot(&a, v)?),
                None => None,
            };
            Ok((e, a, v))
        })
        .collect::<DbResult<_>>()?;
    let asserts: Vec<(EntityId, Attr, Value, AssertOrigin)> = asserts
        .into_iter()
        .map(|(e, a, v)| {
            let origin = match &e {
                Ident::Entity(_) => AssertOrigin::Stable,
                _ => AssertOrigin::Placeholder,
            };
            let e = r.binding(&e);
            let v = r.resolve_value_slot(&a, v)?;
            Ok((e, a, v, origin))
        })
        .collect::<DbResult<_>>()?;
    let maps: Vec<(EntityId, Vec<(Attr, Value)>)> = resolved_maps
        .into_iter()
        .map(|(id, pairs)| {
            let pairs = pairs
                .into_iter()
                .map(|(a, v)| {
                    let v = r.resolve_value_slot(&a, v)?;
                    Ok((a, v))
                })
                .collect::<DbResult<Vec<_>>>()?;
            Ok((id, pairs))
        })
        .collect::<DbResult<_>>()?;

    Ok(Resolution {
        retract_entities,
        retracts,
        asserts,
        maps,
        tempids: r.bindings,
        next_id: r.next_id,
    })
}
