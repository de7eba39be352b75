#![forbid(unsafe_code)]

//! Conditions raised by validation rules.
//!
//! A [`ConditionType`] describes a kind of condition (code, category,
//! default message). When a condition rule finds its predicate true for an
//! entity, a [`Condition`] is attached to that entity and listed in three
//! places, each an [`ObservableList`] so membership changes are observable:
//!
//! - the entity's own conditions,
//! - the condition type's conditions,
//! - the conditions of every [`ConditionTypeSet`] the type belongs to.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::entity::{Entity, WeakEntity};
use crate::error::Result;
use crate::property::Property;
use crate::sequence::ObservableList;

/// Broad classification of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionCategory {
    Error,
    Warning,
    Permission,
    Information,
}

impl fmt::Display for ConditionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Permission => write!(f, "permission"),
            Self::Information => write!(f, "information"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConditionTypeSet
// ---------------------------------------------------------------------------

struct SetInner {
    name: String,
    conditions: ObservableList<Condition>,
}

/// A named group of condition types, e.g. everything checked before save.
#[derive(Clone)]
pub struct ConditionTypeSet {
    inner: Rc<SetInner>,
}

impl PartialEq for ConditionTypeSet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ConditionTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionTypeSet")
            .field("name", &self.inner.name)
            .field("conditions", &self.inner.conditions.len())
            .finish()
    }
}

impl ConditionTypeSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(SetInner {
                name: name.into(),
                conditions: ObservableList::default(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Active conditions of every member type.
    #[must_use]
    pub fn conditions(&self) -> &ObservableList<Condition> {
        &self.inner.conditions
    }
}

// ---------------------------------------------------------------------------
// ConditionType
// ---------------------------------------------------------------------------

struct ConditionTypeInner {
    code: String,
    category: ConditionCategory,
    message: String,
    sets: RefCell<Vec<ConditionTypeSet>>,
    conditions: ObservableList<Condition>,
}

/// A kind of condition, registered once per model.
#[derive(Clone)]
pub struct ConditionType {
    inner: Rc<ConditionTypeInner>,
}

impl PartialEq for ConditionType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConditionType {}

impl fmt::Debug for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionType")
            .field("code", &self.inner.code)
            .field("category", &self.inner.category)
            .finish()
    }
}

impl ConditionType {
    pub(crate) fn new(code: &str, category: ConditionCategory, message: &str) -> Self {
        Self {
            inner: Rc::new(ConditionTypeInner {
                code: code.to_owned(),
                category,
                message: message.to_owned(),
                sets: RefCell::new(Vec::new()),
                conditions: ObservableList::default(),
            }),
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.inner.code
    }

    #[must_use]
    pub fn category(&self) -> ConditionCategory {
        self.inner.category
    }

    /// Default message for conditions of this type.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Active conditions of this type across all entities.
    #[must_use]
    pub fn conditions(&self) -> &ObservableList<Condition> {
        &self.inner.conditions
    }

    #[must_use]
    pub fn sets(&self) -> Vec<ConditionTypeSet> {
        self.inner.sets.borrow().clone()
    }

    /// Make this type a member of `set`. Conditions raised afterwards are
    /// listed in the set as well.
    pub fn add_to_set(&self, set: &ConditionTypeSet) {
        let mut sets = self.inner.sets.borrow_mut();
        if !sets.contains(set) {
            sets.push(set.clone());
        }
    }

    fn lists(&self) -> Vec<ObservableList<Condition>> {
        let mut lists = vec![self.inner.conditions.clone()];
        lists.extend(self.sets().iter().map(|set| set.conditions().clone()));
        lists
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

struct ConditionInner {
    condition_type: ConditionType,
    message: String,
    target: WeakEntity,
    properties: Vec<Property>,
}

/// One active condition on one entity.
#[derive(Clone)]
pub struct Condition {
    inner: Rc<ConditionInner>,
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("code", &self.inner.condition_type.code())
            .field("message", &self.inner.message)
            .field("target", &self.inner.target)
            .finish()
    }
}

impl Condition {
    #[must_use]
    pub fn condition_type(&self) -> &ConditionType {
        &self.inner.condition_type
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// The entity the condition is attached to, while it is alive.
    #[must_use]
    pub fn target(&self) -> Option<Entity> {
        self.inner.target.upgrade()
    }

    /// Properties the condition concerns.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.inner.properties
    }
}

/// Attach a condition of `condition_type` to `entity`, or refresh the
/// message of the one already attached.
pub(crate) fn attach(
    entity: &Entity,
    condition_type: &ConditionType,
    message: String,
    properties: Vec<Property>,
) -> Result<Condition> {
    let existing = entity.condition_of(condition_type);
    if let Some(existing) = &existing
        && existing.message() == message
    {
        return Ok(existing.clone());
    }

    let condition = Condition {
        inner: Rc::new(ConditionInner {
            condition_type: condition_type.clone(),
            message,
            target: entity.downgrade(),
            properties,
        }),
    };
    let mut lists = vec![entity.conditions().clone()];
    lists.extend(condition_type.lists());
    let mut first_failure = None;
    for list in lists {
        let slot = existing.as_ref().and_then(|old| list.index_of(old));
        let outcome = match slot {
            Some(index) => list.set(index, condition.clone()).map(drop),
            None => list.push(condition.clone()),
        };
        if let Err(err) = outcome {
            first_failure.get_or_insert(err);
        }
    }
    trace!(entity = %entity, code = condition_type.code(), "condition attached");
    first_failure.map_or(Ok(condition), Err)
}

/// Remove the condition of `condition_type` from `entity`, if attached.
pub(crate) fn detach(entity: &Entity, condition_type: &ConditionType) -> Result<Option<Condition>> {
    let Some(existing) = entity.condition_of(condition_type) else {
        return Ok(None);
    };
    let mut lists = vec![entity.conditions().clone()];
    lists.extend(condition_type.lists());
    let mut first_failure = None;
    for list in lists {
        if let Err(err) = list.remove_item(&existing) {
            first_failure.get_or_insert(err);
        }
    }
    trace!(entity = %entity, code = condition_type.code(), "condition removed");
    first_failure.map_or(Ok(Some(existing)), Err)
}
