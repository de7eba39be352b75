#![forbid(unsafe_code)]

//! Property values and declared value types.
//!
//! [`Value`] is the run-time representation of anything stored in an entity
//! field. Equality is value-based for primitives (two NaNs are equal, `-0`
//! equals `0`) and identity-based for entities and lists; [`Hash`] agrees
//! with it so values can key hash maps.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::sequence::ObservableList;

/// A stored or computed value.
#[derive(Clone, Default)]
pub enum Value {
    /// "No value yet". Rejected by setters; returned by calculations that
    /// cannot be computed yet.
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Entity(Entity),
    List(ObservableList<Value>),
}

impl Value {
    /// A fresh observable list holding `items`.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null or undefined.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&ObservableList<Value>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Run-time kind name used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Entity(_) => "entity",
            Self::List(_) => "list",
        }
    }

    /// The primitive kind of this value, if it is one.
    #[must_use]
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Boolean(_) => Some(PrimitiveKind::Boolean),
            Self::Number(_) => Some(PrimitiveKind::Number),
            Self::String(_) => Some(PrimitiveKind::String),
            Self::Date(_) => Some(PrimitiveKind::Date),
            _ => None,
        }
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers_equal(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Boolean(b) => b.hash(state),
            Self::Number(n) => {
                let bits = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0
                } else {
                    n.to_bits()
                };
                bits.hash(state);
            }
            Self::String(s) => s.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Entity(e) => e.hash(state),
            Self::List(l) => l.hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "Undefined"),
            Self::Null => write!(f, "Null"),
            Self::Boolean(b) => write!(f, "Boolean({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Self::Entity(e) => write!(f, "Entity({e})"),
            Self::List(l) => write!(f, "List({l:?})"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Entity(e) => write!(f, "{e}"),
            Self::List(l) => {
                write!(f, "[")?;
                l.with_items(|items| -> fmt::Result {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                    Ok(())
                })?;
                write!(f, "]")
            }
        }
    }
}

macro_rules! value_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Self::Number(f64::from(n))
            }
        })*
    };
}

value_from_number!(f64, f32, i32, u32, i16, u16, i8, u8);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Self::Entity(e)
    }
}

impl From<&Entity> for Value {
    fn from(e: &Entity) -> Self {
        Self::Entity(e.clone())
    }
}

impl From<ObservableList<Value>> for Value {
    fn from(l: ObservableList<Value>) -> Self {
        Self::List(l)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Declared types
// ---------------------------------------------------------------------------

/// Primitive kinds a property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
    Date,
}

impl PrimitiveKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }

    /// Initial value for a fresh scalar field of this kind.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Number => Value::Number(0.0),
            Self::String | Self::Date => Value::Null,
        }
    }
}

/// The declared element type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Primitive(PrimitiveKind),
    /// Reference to instances of the named entity type (or its subtypes).
    Entity(String),
}

impl ValueType {
    #[must_use]
    pub fn string() -> Self {
        Self::Primitive(PrimitiveKind::String)
    }

    #[must_use]
    pub fn number() -> Self {
        Self::Primitive(PrimitiveKind::Number)
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::Primitive(PrimitiveKind::Boolean)
    }

    #[must_use]
    pub fn date() -> Self {
        Self::Primitive(PrimitiveKind::Date)
    }

    pub fn entity(type_name: impl Into<String>) -> Self {
        Self::Entity(type_name.into())
    }

    /// The referenced entity type name, for entity-typed properties.
    #[must_use]
    pub fn entity_type_name(&self) -> Option<&str> {
        match self {
            Self::Entity(name) => Some(name),
            Self::Primitive(_) => None,
        }
    }

    /// Initial value for a fresh scalar field of this type.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Primitive(kind) => kind.default_value(),
            Self::Entity(_) => Value::Null,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(kind) => write!(f, "{}", kind.name()),
            Self::Entity(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn nan_equals_nan_and_zero_signs_agree() {
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_eq!(hash_of(&Value::Number(f64::NAN)), hash_of(&Value::Number(-f64::NAN)));
        assert_eq!(Value::Number(0.0), Value::Number(-0.0));
        assert_eq!(hash_of(&Value::Number(0.0)), hash_of(&Value::Number(-0.0)));
    }

    #[test]
    fn kinds_do_not_cross_compare() {
        assert_ne!(Value::Null, Value::Undefined);
        assert_ne!(Value::from(0), Value::from(false));
        assert_ne!(Value::from("1"), Value::from(1));
    }

    #[test]
    fn lists_compare_by_identity() {
        let a = Value::list([1, 2]);
        let b = Value::list([1, 2]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn option_maps_none_to_null() {
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::from("Jane").to_string(), "\"Jane\"");
        assert_eq!(Value::list([1, 2]).to_string(), "[1, 2]");
    }

    #[test]
    fn primitive_defaults() {
        assert_eq!(ValueType::boolean().default_value(), Value::Boolean(false));
        assert_eq!(ValueType::number().default_value(), Value::Number(0.0));
        assert_eq!(ValueType::string().default_value(), Value::Null);
        assert_eq!(ValueType::entity("Person").default_value(), Value::Null);
    }
}
