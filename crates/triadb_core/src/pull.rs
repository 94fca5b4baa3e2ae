//! The pull operator: hierarchical, recursive, cycle-safe data retrieval.
//!
//! A pattern is a list of composable elements: attribute names, reverse
//! attribute names (`ns/_name`), a wildcard, non-recursive joins (attribute
//! to sub-pattern) and recursive joins (attribute to depth limit).
//! Recursion re-applies the enclosing pattern with a decremented depth and
//! carries a per-descent set of visited identifiers; revisiting yields the
//! identifier-only map form, never infinite descent.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::ident::{Attr, EntityId, Ident, DB_ID};
use crate::index::{IdsRef, Slot};
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

/// A pattern attribute: forward, or reverse navigation over a forward
/// reference attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullAttr {
    /// Follow the attribute from source to target.
    Forward(Attr),
    /// Enumerate sources referencing the entity through the attribute.
    Reverse(Attr),
}

impl PullAttr {
    /// Parses an attribute name, treating a `_`-leading local segment as
    /// reverse navigation over the corresponding forward attribute.
    #[must_use]
    pub fn parse(name: impl Into<Attr>) -> Self {
        let attr: Attr = name.into();
        if attr.is_reverse() {
            Self::Reverse(attr.to_forward())
        } else {
            Self::Forward(attr)
        }
    }

    /// The key this attribute contributes to a result map.
    #[must_use]
    pub fn result_key(&self) -> Attr {
        match self {
            Self::Forward(a) => a.clone(),
            Self::Reverse(a) => a.to_reverse(),
        }
    }
}

/// One pattern element.
#[derive(Debug, Clone, PartialEq)]
pub enum PullElem {
    /// Select the named attribute (or reverse relation).
    Attr(PullAttr),
    /// Select every attribute present on the entity.
    Wildcard,
    /// Non-recursive join: pull targets through a sub-pattern.
    Join {
        /// The joined attribute.
        attr: PullAttr,
        /// The sub-pattern applied to each target.
        pattern: Pattern,
    },
    /// Recursive join: re-apply the enclosing pattern to targets, at most
    /// `depth` levels deep.
    Recur {
        /// The recursed attribute.
        attr: PullAttr,
        /// Remaining depth budget.
        depth: u32,
    },
}

/// A pattern element selecting the named attribute.
#[must_use]
pub fn attr(name: impl Into<Attr>) -> PullElem {
    PullElem::Attr(PullAttr::parse(name))
}

/// The wildcard pattern element.
#[must_use]
pub fn wildcard() -> PullElem {
    PullElem::Wildcard
}

/// A non-recursive join element.
#[must_use]
pub fn join(name: impl Into<Attr>, pattern: Pattern) -> PullElem {
    PullElem::Join {
        attr: PullAttr::parse(name),
        pattern,
    }
}

/// A recursive join element with a depth limit.
#[must_use]
pub fn recur(name: impl Into<Attr>, depth: u32) -> PullElem {
    PullElem::Recur {
        attr: PullAttr::parse(name),
        depth,
    }
}

/// A pull pattern.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern {
    elems: Vec<PullElem>,
}

impl Pattern {
    /// A pattern from explicit elements.
    #[must_use]
    pub fn new(elems: Vec<PullElem>) -> Self {
        Self { elems }
    }

    /// A pattern of plain attribute names.
    #[must_use]
    pub fn of<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Attr>,
    {
        Self::new(names.into_iter().map(attr).collect())
    }

    /// The `[*]` pattern.
    #[must_use]
    pub fn everything() -> Self {
        Self::new(vec![wildcard()])
    }

    /// The pattern's elements.
    #[must_use]
    pub fn elems(&self) -> &[PullElem] {
        &self.elems
    }

    fn keeps_unresolved_identifier(&self) -> bool {
        self.elems.iter().any(|elem| match elem {
            PullElem::Wildcard => true,
            PullElem::Attr(PullAttr::Forward(a)) => a.is_db_id(),
            _ => false,
        })
    }

    /// The enclosing pattern as seen one recursion level down: the given
    /// element index (a `Recur`) has its depth decremented.
    fn descend(&self, recur_index: usize) -> Pattern {
        let mut elems = self.elems.clone();
        if let PullElem::Recur { depth, .. } = &mut elems[recur_index] {
            *depth = depth.saturating_sub(1);
        }
        Pattern { elems }
    }
}

/// The identifier-only map form.
fn id_map(e: &EntityId) -> Value {
    let mut map = BTreeMap::new();
    map.insert(Attr::from(DB_ID), Value::Ref(e.clone()));
    Value::Map(map)
}

fn is_empty_map(value: &Value) -> bool {
    matches!(value, Value::Map(m) if m.is_empty())
}

/// Evaluates a pattern against a starting identifier.
pub(crate) fn pull(db: &Database, pattern: &Pattern, ident: &Ident) -> DbResult<Value> {
    let start = match ident {
        Ident::Entity(e) => e.clone(),
        Ident::Lookup(a, v) => {
            if !db.schema().is_unique(a) {
                return Err(DbError::invalid_lookup_ref(
                    a.clone(),
                    (**v).clone(),
                    "attribute carries no uniqueness constraint",
                ));
            }
            match db.ave().entry(a).and_then(|entry| entry.single(v)) {
                Some(e) => e.clone(),
                None => return Ok(Value::Map(BTreeMap::new())),
            }
        }
        Ident::Temp(_) => {
            return Err(DbError::invalid_entity_id(
                ident,
                "placeholders are not valid outside transactions",
            ))
        }
    };
    trace!(start = %start, "pull");
    Ok(pull_entity(db, pattern, &start, &HashSet::new()))
}

/// Evaluates a pattern against one entity. `seen` holds the identifiers on
/// the current recursive-descent chain, excluding the entity itself.
fn pull_entity(
    db: &Database,
    pattern: &Pattern,
    e: &EntityId,
    seen: &HashSet<EntityId>,
) -> Value {
    if db.eav().get(e).is_none() {
        return if pattern.keeps_unresolved_identifier() {
            id_map(e)
        } else {
            Value::Map(BTreeMap::new())
        };
    }

    let mut result: BTreeMap<Attr, Value> = BTreeMap::new();
    for (index, elem) in pattern.elems().iter().enumerate() {
        match elem {
            PullElem::Attr(pa) => {
                if let Some(value) = eval_plain(db, pa, e, seen) {
                    result.insert(pa.result_key(), value);
                }
            }
            PullElem::Join { attr, pattern } => {
                if let Some(value) = eval_join(db, attr, pattern, e, seen) {
                    result.insert(attr.result_key(), value);
                }
            }
            PullElem::Recur { attr, depth } => {
                if let Some(value) =
                    eval_recur(db, attr, *depth, pattern, index, e, seen)
                {
                    result.insert(attr.result_key(), value);
                }
            }
            PullElem::Wildcard => eval_wildcard(db, e, seen, &mut result),
        }
    }
    Value::Map(result)
}

/// A plain attribute element. References render as identifier-only maps,
/// except component references, which recursively pull the owned entity
/// with a wildcard.
fn eval_plain(
    db: &Database,
    pa: &PullAttr,
    e: &EntityId,
    seen: &HashSet<EntityId>,
) -> Option<Value> {
    match pa {
        PullAttr::Forward(a) if a.is_db_id() => Some(Value::Ref(e.clone())),
        PullAttr::Forward(a) => {
            let slot = db.eav().get(e)?.get(a)?;
            render_forward(db, a, slot, e, seen, None)
        }
        PullAttr::Reverse(a) => eval_reverse(db, a, e, seen, None),
    }
}

/// A non-recursive join element.
fn eval_join(
    db: &Database,
    pa: &PullAttr,
    sub: &Pattern,
    e: &EntityId,
    seen: &HashSet<EntityId>,
) -> Option<Value> {
    match pa {
        PullAttr::Forward(a) => {
            let slot = db.eav().get(e)?.get(a)?;
            render_forward(db, a, slot, e, seen, Some(sub))
        }
        PullAttr::Reverse(a) => eval_reverse(db, a, e, seen, Some(sub)),
    }
}

/// Renders a forward slot: a map for cardinality-one references, a
/// sequence for cardinality-many, raw values for non-references. `None`
/// elides the attribute (every target elided).
fn render_forward(
    db: &Database,
    a: &Attr,
    slot: &Slot,
    e: &EntityId,
    seen: &HashSet<EntityId>,
    sub: Option<&Pattern>,
) -> Option<Value> {
    if !db.schema().is_ref(a) {
        return Some(match slot {
            Slot::One(v) => v.clone(),
            Slot::Many(set) => {
                Value::List(set.values_ordered().into_iter().cloned().collect())
            }
        });
    }
    let render = |target: &EntityId| render_target(db, a, target, e, seen, sub);
    match slot {
        Slot::One(Value::Ref(target)) => render(target),
        Slot::One(v) => Some(v.clone()),
        Slot::Many(set) => {
            let items: Vec<Value> = set
                .values_ordered()
                .into_iter()
                .filter_map(|v| match v {
                    Value::Ref(target) => render(target),
                    other => Some(other.clone()),
                })
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(Value::List(items))
            }
        }
    }
}

/// Renders one forward reference target. `None` elides the target.
fn render_target(
    db: &Database,
    a: &Attr,
    target: &EntityId,
    e: &EntityId,
    seen: &HashSet<EntityId>,
    sub: Option<&Pattern>,
) -> Option<Value> {
    match sub {
        Some(pattern) => {
            let pulled = pull_entity(db, pattern, target, seen);
            if is_empty_map(&pulled) {
                None
            } else {
                Some(pulled)
            }
        }
        None if db.schema().is_component(a) => {
            let mut chain = seen.clone();
            chain.insert(e.clone());
            if chain.contains(target) {
                Some(id_map(target))
            } else {
                Some(pull_entity(db, &Pattern::everything(), target, &chain))
            }
        }
        None => Some(id_map(target)),
    }
}

/// Reverse navigation reads the forward attribute's AVE entry: the
/// single-entity shape yields one map, the entity-set shape a sequence in
/// ascending identifier order.
fn eval_reverse(
    db: &Database,
    a: &Attr,
    e: &EntityId,
    seen: &HashSet<EntityId>,
    sub: Option<&Pattern>,
) -> Option<Value> {
    let entry = db.ave().entry(a)?;
    let key = Value::Ref(e.clone());
    let render = |source: &EntityId| -> Option<Value> {
        match sub {
            Some(pattern) => {
                let pulled = pull_entity(db, pattern, source, seen);
                if is_empty_map(&pulled) {
                    None
                } else {
                    Some(pulled)
                }
            }
            None => Some(id_map(source)),
        }
    };
    match entry.ids(&key)? {
        IdsRef::One(source) => render(source),
        ids @ IdsRef::Many(_) => {
            let items: Vec<Value> = ids.sorted().into_iter().filter_map(render).collect();
            if items.is_empty() {
                None
            } else {
                Some(Value::List(items))
            }
        }
    }
}

/// A recursive join element: re-applies the enclosing pattern with a
/// decremented depth. Exhausted depth and revisited identifiers yield the
/// identifier-only map form.
fn eval_recur(
    db: &Database,
    pa: &PullAttr,
    depth: u32,
    enclosing: &Pattern,
    index: usize,
    e: &EntityId,
    seen: &HashSet<EntityId>,
) -> Option<Value> {
    let mut chain = seen.clone();
    chain.insert(e.clone());
    let next = enclosing.descend(index);
    let render = |target: &EntityId| -> Option<Value> {
        if depth == 0 || chain.contains(target) {
            return Some(id_map(target));
        }
        let pulled = pull_entity(db, &next, target, &chain);
        if is_empty_map(&pulled) {
            None
        } else {
            Some(pulled)
        }
    };
    match pa {
        PullAttr::Forward(a) => {
            let slot = db.eav().get(e)?.get(a)?;
            match slot {
                Slot::One(Value::Ref(target)) => render(target),
                Slot::One(_) => None,
                Slot::Many(set) => {
                    let items: Vec<Value> = set
                        .values_ordered()
                        .into_iter()
                        .filter_map(|v| v.as_ref_id().and_then(&render))
                        .collect();
                    if items.is_empty() {
                        None
                    } else {
                        Some(Value::List(items))
                    }
                }
            }
        }
        PullAttr::Reverse(a) => {
            let entry = db.ave().entry(a)?;
            match entry.ids(&Value::Ref(e.clone()))? {
                IdsRef::One(source) => render(source),
                ids @ IdsRef::Many(_) => {
                    let items: Vec<Value> =
                        ids.sorted().into_iter().filter_map(render).collect();
                    if items.is_empty() {
                        None
                    } else {
                        Some(Value::List(items))
                    }
                }
            }
        }
    }
}

/// The wildcard: every attribute present on the entity. Accumulated join
/// results are never overwritten. Component references expand recursively
/// with a wildcard; other references wrap as identifier-only maps.
fn eval_wildcard(
    db: &Database,
    e: &EntityId,
    seen: &HashSet<EntityId>,
    result: &mut BTreeMap<Attr, Value>,
) {
    let db_id = Attr::from(DB_ID);
    result
        .entry(db_id)
        .or_insert_with(|| Value::Ref(e.clone()));
    let Some(entity) = db.eav().get(e) else {
        return;
    };
    let mut attrs: Vec<(&Attr, &Slot)> = entity.attrs().collect();
    attrs.sort_by(|x, y| x.0.cmp(y.0));
    for (a, slot) in attrs {
        if result.contains_key(a) {
            continue;
        }
        if let Some(value) = render_forward(db, a, slot, e, seen, None) {
            result.insert(a.clone(), value);
        }
    }
}

/// Applies `pull` to a sequence of identifiers in order.
pub(crate) fn pull_many(
    db: &Database,
    pattern: &Pattern,
    idents: &[Ident],
) -> DbResult<Vec<Value>> {
    idents.iter().map(|e| pull(db, pattern, e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_detects_reverse() {
        assert_eq!(
            PullAttr::parse("person/_friend"),
            PullAttr::Reverse(Attr::from("person/friend"))
        );
        assert_eq!(
            PullAttr::parse("person/friend").result_key(),
            Attr::from("person/friend")
        );
        assert_eq!(
            PullAttr::parse("person/_friend").result_key(),
            Attr::from("person/_friend")
        );
    }

    #[test]
    fn descend_decrements_only_the_given_element() {
        let pattern = Pattern::new(vec![attr("person/name"), recur("person/friend", 3)]);
        let next = pattern.descend(1);
        match &next.elems()[1] {
            PullElem::Recur { depth, .. } => assert_eq!(*depth, 2),
            other => panic!("unexpected element {other:?}"),
        }
        assert_eq!(next.elems()[0], attr("person/name"));
    }

    #[test]
    fn unresolved_identifier_policy() {
        let pattern = Pattern::of(["person/name"]);
        assert!(!pattern.keeps_unresolved_identifier());
        assert!(Pattern::everything().keeps_unresolved_identifier());
        assert!(Pattern::of([DB_ID]).keeps_unresolved_identifier());
    }
}
