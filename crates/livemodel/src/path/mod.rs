#![forbid(unsafe_code)]

//! Dependency paths.
//!
//! A [`PropertyPath`] is what rules depend on: either a single
//! [`Property`] or a [`PropertyChain`] of properties joined end to end.
//! Both expose the same subscribe and read surface, reporting events with
//! the root instance as subject.

pub mod chain;
pub mod parse;

use std::fmt;

use crate::entity::Entity;
use crate::error::Result;
use crate::event::Subscription;
use crate::property::Property;
use crate::value::Value;

pub use chain::{PathAccess, PathChange, PropertyChain};
pub use parse::{PathStep, expand_paths, parse_steps};

/// A resolved dependency path.
#[derive(Clone, PartialEq)]
pub enum PropertyPath {
    Property(Property),
    Chain(PropertyChain),
}

impl fmt::Debug for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(property) => write!(f, "PropertyPath({property})"),
            Self::Chain(chain) => write!(f, "PropertyPath({})", chain.path()),
        }
    }
}

impl PropertyPath {
    /// The path text relative to its root type.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Property(property) => property.name(),
            Self::Chain(chain) => chain.path(),
        }
    }

    /// The property the path ends at.
    #[must_use]
    pub fn last_property(&self) -> Option<Property> {
        match self {
            Self::Property(property) => Some(property.clone()),
            Self::Chain(chain) => chain.last_property(),
        }
    }

    /// Attach a change handler; events carry the root instance.
    pub fn subscribe_changed(&self, handler: impl Fn(&PathChange) -> Result<()> + 'static) -> Subscription {
        match self {
            Self::Property(property) => property.subscribe_changed(move |change| {
                handler(&PathChange {
                    root: change.entity.clone(),
                    source: change.clone(),
                })
            }),
            Self::Chain(chain) => chain.subscribe_changed(handler),
        }
    }

    /// Attach an access handler; events carry the root instance.
    pub fn subscribe_accessed(&self, handler: impl Fn(&PathAccess) -> Result<()> + 'static) -> Subscription {
        match self {
            Self::Property(property) => property.subscribe_accessed(move |access| {
                handler(&PathAccess {
                    root: access.entity.clone(),
                    source: access.clone(),
                })
            }),
            Self::Chain(chain) => chain.subscribe_accessed(handler),
        }
    }

    /// The single value at the end of the path.
    pub fn value(&self, root: &Entity) -> Result<Value> {
        match self {
            Self::Property(property) => property.get(root),
            Self::Chain(chain) => chain.value(root),
        }
    }

    /// Every value at the end of the path, flattening lists.
    pub fn values(&self, root: &Entity) -> Result<Vec<Value>> {
        match self {
            Self::Property(property) => Ok(match property.get(root)? {
                Value::List(list) => list.to_vec(),
                value if value.is_nullish() => Vec::new(),
                value => vec![value],
            }),
            Self::Chain(chain) => chain.values(root),
        }
    }

    /// Whether every step from `root` holds a value.
    #[must_use]
    pub fn is_inited(&self, root: &Entity) -> bool {
        match self {
            Self::Property(property) => !property.is_pending_init(root),
            Self::Chain(chain) => chain.is_inited(root),
        }
    }

    /// Visit every `(target, property)` pair along the path.
    pub fn each(&self, root: &Entity, mut visit: impl FnMut(&Entity, &Property) -> Result<bool>) -> Result<bool> {
        match self {
            Self::Property(property) => {
                if property.applies_to(root) {
                    visit(root, property)
                } else {
                    Ok(true)
                }
            }
            Self::Chain(chain) => chain.each(root, visit),
        }
    }
}
