#![forbid(unsafe_code)]

//! Entity instances and their private field storage.
//!
//! An entity owns a value table keyed by property name. A property with no
//! entry in the table is *pending init*: nothing has been supplied for it and
//! nothing has been computed or defaulted yet. All field access goes through
//! [`Property`](crate::property::Property); the accessors here are
//! shorthands that resolve the property by name first.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::condition::{Condition, ConditionType};
use crate::entity_type::EntityType;
use crate::error::Result;
use crate::event::{Event, Subscription};
use crate::model::Model;
use crate::property::PropertyChange;
use crate::sequence::ObservableList;
use crate::value::Value;

pub(crate) struct EntityInner {
    id: u64,
    entity_type: EntityType,
    fields: RefCell<AHashMap<String, Value>>,
    list_links: RefCell<AHashMap<String, Subscription>>,
    conditions: ObservableList<Condition>,
    changed: Event<PropertyChange>,
    registered: Cell<bool>,
}

/// A handle to one instance of an [`EntityType`].
///
/// Cloning yields another handle to the same instance; equality and hashing
/// are by identity.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.inner), state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.entity_type.name(), self.inner.id)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Entity {
    pub(crate) fn new(id: u64, entity_type: EntityType) -> Self {
        Self {
            inner: Rc::new(EntityInner {
                id,
                entity_type,
                fields: RefCell::new(AHashMap::new()),
                list_links: RefCell::new(AHashMap::new()),
                conditions: ObservableList::default(),
                changed: Event::new(),
                registered: Cell::new(false),
            }),
        }
    }

    /// Model-assigned identifier, unique within the model.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.inner.entity_type
    }

    /// Whether this entity is an instance of `ty` or one of its subtypes.
    #[must_use]
    pub fn is_instance_of(&self, ty: &EntityType) -> bool {
        self.inner.entity_type.is_subtype_of(ty)
    }

    /// The owning model.
    pub fn model(&self) -> Result<Model> {
        self.inner.entity_type.model()
    }

    /// Whether the model still tracks this entity.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner.registered.get()
    }

    /// Read a property by name.
    pub fn get(&self, property: &str) -> Result<Value> {
        self.inner.entity_type.property(property)?.get(self)
    }

    /// Assign a property by name.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        self.inner.entity_type.property(property)?.set(self, value)
    }

    /// Read through a dotted path rooted at this entity's type.
    pub fn get_path(&self, path: &str) -> Result<Value> {
        self.inner.entity_type.get_path(path)?.value(self)
    }

    /// Whether the named property is still pending init.
    pub fn is_pending_init(&self, property: &str) -> Result<bool> {
        Ok(self
            .inner
            .entity_type
            .property(property)?
            .is_pending_init(self))
    }

    /// Entity-wide change event, raised after each property-level change.
    #[must_use]
    pub fn changed(&self) -> &Event<PropertyChange> {
        &self.inner.changed
    }

    /// Conditions currently attached to this entity.
    #[must_use]
    pub fn conditions(&self) -> &ObservableList<Condition> {
        &self.inner.conditions
    }

    /// The attached condition of the given type, if any.
    #[must_use]
    pub fn condition_of(&self, condition_type: &ConditionType) -> Option<Condition> {
        self.inner.conditions.with_items(|items| {
            items
                .iter()
                .find(|condition| condition.condition_type() == condition_type)
                .cloned()
        })
    }

    // -----------------------------------------------------------------------
    // Field storage, owned by the property gateway.
    // -----------------------------------------------------------------------

    pub(crate) fn field(&self, name: &str) -> Option<Value> {
        self.inner.fields.borrow().get(name).cloned()
    }

    pub(crate) fn has_field(&self, name: &str) -> bool {
        self.inner.fields.borrow().contains_key(name)
    }

    pub(crate) fn store_field(&self, name: &str, value: Value) {
        self.inner.fields.borrow_mut().insert(name.to_owned(), value);
    }

    pub(crate) fn link_list(&self, name: &str, link: Subscription) {
        let previous = self.inner.list_links.borrow_mut().insert(name.to_owned(), link);
        drop(previous);
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.inner.registered.set(registered);
    }

    pub(crate) fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.inner))
    }

    pub(crate) fn publish_changed(&self, change: &PropertyChange) -> Result<()> {
        self.inner.changed.publish(change)
    }
}

/// Non-owning entity handle.
#[derive(Clone)]
pub(crate) struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    pub(crate) fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(|inner| Entity { inner })
    }

    pub(crate) fn ptr_eq(&self, entity: &Entity) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&entity.inner))
    }
}

impl fmt::Debug for WeakEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(entity) => write!(f, "{entity}"),
            None => write!(f, "<dropped>"),
        }
    }
}
