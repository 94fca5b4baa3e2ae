//! Identifiers and attribute names.

use crate::value::Value;
use std::fmt;

/// The reserved entity-map key holding an entity's own identifier.
pub const DB_ID: &str = "db/id";

/// The reserved map-form key naming the in-form operator.
pub const DB_OP: &str = "db/op";

/// The reserved namespace; off-limits for user attributes.
pub const RESERVED_NAMESPACE: &str = "db";

/// A stable entity identifier.
///
/// Only `EntityId`s appear as EAV keys or inside committed values. The two
/// variants coexist freely within one database:
/// - `Id`: an engine-assigned integer, monotonically increasing within one
///   database value;
/// - `Name`: a user-supplied symbolic name, non-numeric, valid for the
///   life of the entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityId {
    /// Engine-assigned integer identifier.
    Id(u64),
    /// User-supplied symbolic name.
    Name(String),
}

impl EntityId {
    /// Returns the assigned integer, if this is an `Id`.
    #[must_use]
    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Id(n) => Some(*n),
            Self::Name(_) => None,
        }
    }

    /// Returns the symbolic name, if this is a `Name`.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Name(n) => Some(n),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(n) => write!(f, "{n}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self::Id(n)
    }
}

impl From<&str> for EntityId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

/// An identifier slot in a transaction form.
///
/// Beyond the stable [`EntityId`] variants, transactions may use temporary
/// placeholders (resolved before commit) and lookup references (an
/// (attribute, value) pair over a uniqueness-constrained attribute).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ident {
    /// A stable identifier.
    Entity(EntityId),
    /// A temporary placeholder, valid only within one transaction.
    Temp(String),
    /// A lookup reference over a uniqueness-constrained attribute.
    Lookup(Attr, Box<Value>),
}

impl Ident {
    /// An assigned-integer identifier.
    #[must_use]
    pub fn id(n: u64) -> Self {
        Self::Entity(EntityId::Id(n))
    }

    /// A symbolic-name identifier.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Entity(EntityId::Name(name.into()))
    }

    /// A temporary placeholder.
    #[must_use]
    pub fn temp(label: impl Into<String>) -> Self {
        Self::Temp(label.into())
    }

    /// A lookup reference.
    #[must_use]
    pub fn lookup(attr: impl Into<Attr>, value: impl Into<Value>) -> Self {
        Self::Lookup(attr.into(), Box::new(value.into()))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(e) => write!(f, "{e}"),
            Self::Temp(t) => write!(f, "#{t}"),
            Self::Lookup(a, v) => write!(f, "[{a} {v}]"),
        }
    }
}

impl From<EntityId> for Ident {
    fn from(e: EntityId) -> Self {
        Self::Entity(e)
    }
}

impl From<u64> for Ident {
    fn from(n: u64) -> Self {
        Self::id(n)
    }
}

/// A namespaced attribute name, `namespace/name`.
///
/// Local segments beginning with an underscore denote reverse navigation in
/// pull patterns and are not valid data attributes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attr(String);

impl Attr {
    /// Creates an attribute name from its full form.
    #[must_use]
    pub fn new(full: impl Into<String>) -> Self {
        Self(full.into())
    }

    /// The full `namespace/name` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace segment, if present.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(ns, _)| ns)
    }

    /// The local segment (the part after the last `/`).
    #[must_use]
    pub fn local(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, n)| n)
    }

    /// Whether the local segment denotes reverse navigation.
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.local().starts_with('_')
    }

    /// Whether the attribute lives in the reserved namespace.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.namespace() == Some(RESERVED_NAMESPACE)
    }

    /// Whether this is the reserved self-identifier key.
    #[must_use]
    pub fn is_db_id(&self) -> bool {
        self.0 == DB_ID
    }

    /// The forward form of a reverse attribute (`ns/_name` → `ns/name`,
    /// `_name` → `name`).
    ///
    /// Returns a clone of `self` when the attribute is already forward.
    #[must_use]
    pub fn to_forward(&self) -> Attr {
        if !self.is_reverse() {
            return self.clone();
        }
        match self.0.rsplit_once('/') {
            Some((ns, local)) => Attr(format!("{ns}/{}", &local[1..])),
            None => Attr(self.0[1..].to_owned()),
        }
    }

    /// The reverse form of a forward attribute (`ns/name` → `ns/_name`,
    /// `name` → `_name`).
    #[must_use]
    pub fn to_reverse(&self) -> Attr {
        if self.is_reverse() {
            return self.clone();
        }
        match self.0.rsplit_once('/') {
            Some((ns, local)) => Attr(format!("{ns}/_{local}")),
            None => Attr(format!("_{}", self.0)),
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Attr {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Attr {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
