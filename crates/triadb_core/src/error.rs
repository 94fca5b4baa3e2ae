//! Error types for the TriaDB engine.

use crate::ident::{Attr, EntityId, Ident};
use crate::value::Value;
use thiserror::Error;

/// Result type for engine operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur while creating a database or processing a
/// transaction.
///
/// Every variant is fatal for the operation that raised it. `transact` is
/// atomic: when a transaction fails, no index change is observable and the
/// pre-transaction database value is returned untouched inside the error
/// path's scope.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DbError {
    /// The schema rejected at database creation.
    #[error("invalid schema for {attr}: {message}")]
    InvalidSchema {
        /// The offending attribute.
        attr: Attr,
        /// Description of the violated rule.
        message: String,
    },

    /// Unknown transaction operator.
    #[error("invalid operator: {op}")]
    InvalidOp {
        /// The operator name as given.
        op: String,
    },

    /// An identifier slot held something that is not a legal identifier
    /// variant.
    #[error("invalid entity id {value}: {message}")]
    InvalidEntityId {
        /// The offending value, rendered.
        value: String,
        /// Description of why it is not a legal identifier.
        message: String,
    },

    /// An attribute name that is not legal in transaction data: a
    /// reverse-navigation form or a reserved-namespace name.
    #[error("invalid data attribute {attr}: {message}")]
    InvalidAttribute {
        /// The offending attribute name.
        attr: Attr,
        /// Description of why the name is illegal in data.
        message: String,
    },

    /// The absent marker appeared in a value position.
    #[error("nil is not a legal value for {attr}")]
    NilValue {
        /// The attribute whose value slot held nil.
        attr: Attr,
    },

    /// A value in a reference slot could not be mapped to any legal
    /// identifier.
    #[error("cannot resolve {value} in the reference slot of {attr}")]
    RefResolution {
        /// The reference attribute.
        attr: Attr,
        /// The unresolvable value.
        value: Value,
    },

    /// A nested map under a non-component reference attribute carried no
    /// uniqueness-constrained attribute.
    #[error("nested entity under non-component reference {attr} has no unique attribute")]
    InvalidNestedEntity {
        /// The enclosing reference attribute.
        attr: Attr,
    },

    /// The same triple was both asserted and retracted in one transaction.
    #[error("{entity} {attr} {value} is both asserted and retracted")]
    AssertRetractConflict {
        /// Entity of the conflicting triple.
        entity: EntityId,
        /// Attribute of the conflicting triple.
        attr: Attr,
        /// Value of the conflicting triple.
        value: Value,
    },

    /// Two distinct values were asserted for one cardinality-one attribute
    /// of one entity within a single transaction.
    #[error("conflicting values {previous} and {value} for cardinality-one {attr} on {entity}")]
    CardinalityOneConflict {
        /// The entity carrying the attribute.
        entity: EntityId,
        /// The cardinality-one attribute.
        attr: Attr,
        /// The value asserted first within the transaction.
        previous: Value,
        /// The conflicting later value.
        value: Value,
    },

    /// A uniqueness-constrained value is already held by a different entity.
    #[error("unique value {value} for {attr} is held by {holder}, asserted for {asserted}")]
    UniqueConflict {
        /// The unique attribute.
        attr: Attr,
        /// The contested value.
        value: Value,
        /// The entity currently holding the value.
        holder: EntityId,
        /// The entity the assertion targeted.
        asserted: EntityId,
    },

    /// A component entity would be owned by more than one (parent,
    /// attribute) pair.
    #[error("component {target} already owned by {holder} via {holder_attr}, asserted under {attr}")]
    ComponentConflict {
        /// The component attribute of the rejected assertion.
        attr: Attr,
        /// The component entity being claimed.
        target: EntityId,
        /// The parent that already owns the target.
        holder: EntityId,
        /// The component attribute through which the holder owns it.
        holder_attr: Attr,
    },

    /// An assertion targeted an entity that is retracted by an
    /// entity-retraction in the same transaction.
    #[error("cannot assert on {entity}: it is retracted in this transaction")]
    RetractedEntityConflict {
        /// The retracted entity.
        entity: EntityId,
    },

    /// A lookup reference is malformed or did not resolve.
    #[error("invalid lookup ref [{attr} {value}]: {message}")]
    InvalidLookupRef {
        /// The lookup attribute.
        attr: Attr,
        /// The lookup value.
        value: Value,
        /// Description of the failure.
        message: String,
    },
}

impl DbError {
    /// Creates an invalid-schema error.
    pub fn invalid_schema(attr: Attr, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            attr,
            message: message.into(),
        }
    }

    /// Creates an invalid-operator error.
    pub fn invalid_op(op: impl Into<String>) -> Self {
        Self::InvalidOp { op: op.into() }
    }

    /// Creates an invalid-entity-id error for an identifier.
    pub fn invalid_entity_id(ident: &Ident, message: impl Into<String>) -> Self {
        Self::InvalidEntityId {
            value: ident.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid-entity-id error for an arbitrary value.
    pub fn invalid_id_value(value: &Value, message: impl Into<String>) -> Self {
        Self::InvalidEntityId {
            value: value.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid-data-attribute error.
    pub fn invalid_attribute(attr: Attr, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            attr,
            message: message.into(),
        }
    }

    /// Creates a ref-resolution error.
    pub fn ref_resolution(attr: Attr, value: Value) -> Self {
        Self::RefResolution { attr, value }
    }

    /// Creates an unresolved or malformed lookup-ref error.
    pub fn invalid_lookup_ref(attr: Attr, value: Value, message: impl Into<String>) -> Self {
        Self::InvalidLookupRef {
            attr,
            value,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = DbError::NilValue {
            attr: Attr::from("person/name"),
        };
        assert_eq!(err.to_string(), "nil is not a legal value for person/name");
    }

    #[test]
    fn unique_conflict_display() {
        let err = DbError::UniqueConflict {
            attr: Attr::from("person/email"),
            value: Value::from("a@x"),
            holder: EntityId::Id(1),
            asserted: EntityId::Id(2),
        };
        let s = err.to_string();
        assert!(s.contains("person/email"));
        assert!(s.contains("a@x"));
    }
}
