#![forbid(unsafe_code)]

//! The property value gateway.
//!
//! A [`Property`] is one named, typed slot on an entity type. Reads and
//! writes of entity fields go through it:
//!
//! - [`Property::get`] initializes the field on first use (constant value,
//!   then default function, then the type default), raises `accessed`, and
//!   returns the stored value. Calculated properties stay pending until
//!   their rule has computed them.
//! - [`Property::set`] validates, short-circuits on equality, stores, and
//!   raises `changed` followed by the entity-wide change event. A rule's
//!   first write to a pending calculated field is stored silently.
//! - List fields hold an [`ObservableList`]; its structural changes are
//!   forwarded as `changed` events with `collection_changed` set.
//!
//! Every write runs inside the model's execution scope so rule cascades it
//! triggers are deferred to the outermost scope.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::entity::Entity;
use crate::entity_type::{EntityType, WeakEntityType};
use crate::error::{ModelError, Result};
use crate::event::{Event, Subscription};
use crate::rule::{Rule, WeakRule};
use crate::sequence::{ChangeRecord, ObservableList, update_array};
use crate::value::{Value, ValueType};

type DefaultFn = Rc<dyn Fn(&Entity) -> Value>;

/// Caller-supplied annotations carried by a change event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeExtra {
    /// Name of the rule that produced the write, if any.
    pub rule: Option<String>,
    /// Free-form key/value annotations.
    pub metadata: Vec<(String, Value)>,
}

impl ChangeExtra {
    /// Add one annotation.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub(crate) fn from_rule(rule: &str) -> Self {
        Self {
            rule: Some(rule.to_owned()),
            metadata: Vec::new(),
        }
    }

    /// Look up an annotation.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Arguments of a property `changed` event.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    pub entity: Entity,
    pub property: Property,
    /// Previous value; `Undefined` when the field had none.
    pub old_value: Value,
    pub new_value: Value,
    /// The list held by the field changed structurally.
    pub collection_changed: bool,
    /// Records of the structural change, when `collection_changed`.
    pub changes: Vec<ChangeRecord<Value>>,
    pub extra: ChangeExtra,
}

/// Arguments of a property `accessed` event.
#[derive(Debug, Clone)]
pub struct PropertyAccess {
    pub entity: Entity,
    pub property: Property,
}

/// Declaration of a property, consumed by
/// [`EntityType::add_property`](crate::entity_type::EntityType::add_property).
pub struct PropertyDef {
    pub(crate) name: String,
    pub(crate) value_type: ValueType,
    pub(crate) is_list: bool,
    pub(crate) constant: Option<Value>,
    pub(crate) default_fn: Option<DefaultFn>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            is_list: false,
            constant: None,
            default_fn: None,
        }
    }

    /// The property holds a list of `value_type`.
    #[must_use]
    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    /// The property always holds `value`.
    #[must_use]
    pub fn constant(mut self, value: impl Into<Value>) -> Self {
        self.constant = Some(value.into());
        self
    }

    /// Produce the initial value with `f` instead of the type default.
    #[must_use]
    pub fn default_with(mut self, f: impl Fn(&Entity) -> Value + 'static) -> Self {
        self.default_fn = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDef")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("is_list", &self.is_list)
            .field("constant", &self.constant)
            .finish_non_exhaustive()
    }
}

pub(crate) struct PropertyInner {
    name: String,
    path: String,
    owner: WeakEntityType,
    value_type: ValueType,
    is_list: bool,
    constant: Option<Value>,
    default_fn: Option<DefaultFn>,
    calculation: RefCell<Option<WeakRule>>,
    rules: RefCell<Vec<WeakRule>>,
    changed: Event<PropertyChange>,
    accessed: Event<PropertyAccess>,
}

/// A handle to a declared property.
///
/// Cloning yields another handle to the same property; equality is by
/// identity.
#[derive(Clone)]
pub struct Property {
    inner: Rc<PropertyInner>,
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Property {}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property({})", self.inner.path)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.path)
    }
}

impl Property {
    pub(crate) fn from_def(def: PropertyDef, owner: &EntityType) -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                path: format!("{}.{}", owner.name(), def.name),
                name: def.name,
                owner: owner.downgrade(),
                value_type: def.value_type,
                is_list: def.is_list,
                constant: def.constant,
                default_fn: def.default_fn,
                calculation: RefCell::new(None),
                rules: RefCell::new(Vec::new()),
                changed: Event::new(),
                accessed: Event::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `Owner.Name`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The declaring type.
    pub fn owner(&self) -> Result<EntityType> {
        self.inner.owner.upgrade().ok_or(ModelError::ModelDropped)
    }

    #[must_use]
    pub fn value_type(&self) -> &ValueType {
        &self.inner.value_type
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.inner.is_list
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.inner.constant.is_some()
    }

    /// Whether a calculation rule owns this property's value.
    #[must_use]
    pub fn is_calculated(&self) -> bool {
        self.calculation_rule().is_some()
    }

    /// The rule that calculates this property.
    #[must_use]
    pub fn calculation_rule(&self) -> Option<Rule> {
        self.inner
            .calculation
            .borrow()
            .as_ref()
            .and_then(WeakRule::upgrade)
    }

    /// Rules that target this property.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.inner
            .rules
            .borrow()
            .iter()
            .filter_map(WeakRule::upgrade)
            .collect()
    }

    /// The value a fresh field of this property starts with.
    #[must_use]
    pub fn default_value(&self, entity: &Entity) -> Value {
        if let Some(constant) = &self.inner.constant {
            return constant.clone();
        }
        if let Some(default_fn) = &self.inner.default_fn {
            return default_fn(entity);
        }
        if self.inner.is_list {
            Value::List(ObservableList::default())
        } else {
            self.inner.value_type.default_value()
        }
    }

    #[must_use]
    pub fn changed(&self) -> &Event<PropertyChange> {
        &self.inner.changed
    }

    #[must_use]
    pub fn accessed(&self) -> &Event<PropertyAccess> {
        &self.inner.accessed
    }

    /// Attach a `changed` handler.
    pub fn subscribe_changed(&self, handler: impl Fn(&PropertyChange) -> Result<()> + 'static) -> Subscription {
        self.inner.changed.subscribe(handler)
    }

    /// Attach an `accessed` handler.
    pub fn subscribe_accessed(&self, handler: impl Fn(&PropertyAccess) -> Result<()> + 'static) -> Subscription {
        self.inner.accessed.subscribe(handler)
    }

    /// Whether `entity` is an instance of the declaring type.
    #[must_use]
    pub fn applies_to(&self, entity: &Entity) -> bool {
        self.inner
            .owner
            .upgrade()
            .is_some_and(|owner| entity.is_instance_of(&owner))
    }

    /// Whether the field on `entity` has neither been supplied nor computed.
    #[must_use]
    pub fn is_pending_init(&self, entity: &Entity) -> bool {
        !entity.has_field(&self.inner.name)
    }

    /// The stored value, without initializing the field or raising events.
    #[must_use]
    pub fn peek(&self, entity: &Entity) -> Option<Value> {
        entity.field(&self.inner.name)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read the value of this property on `entity`.
    ///
    /// Returns `Undefined` for a calculated property whose rule could not
    /// produce a value yet.
    pub fn get(&self, entity: &Entity) -> Result<Value> {
        self.check_owner(entity)?;
        self.ensure_initialized(entity)?;
        self.inner.accessed.publish(&PropertyAccess {
            entity: entity.clone(),
            property: self.clone(),
        })?;
        Ok(self.peek(entity).unwrap_or_default())
    }

    fn ensure_initialized(&self, entity: &Entity) -> Result<()> {
        if !self.is_pending_init(entity) || self.is_calculated() {
            return Ok(());
        }
        let initial = self.default_value(entity);
        trace!(property = %self, entity = %entity, "field initialized with default");
        self.store_initial(entity, initial)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Assign `value` on `entity`.
    pub fn set(&self, entity: &Entity, value: impl Into<Value>) -> Result<()> {
        self.set_with(entity, value, ChangeExtra::default())
    }

    /// Assign `value` on `entity`, attaching `extra` to the change event.
    pub fn set_with(&self, entity: &Entity, value: impl Into<Value>, extra: ChangeExtra) -> Result<()> {
        let value = value.into();
        self.check_owner(entity)?;
        if value.is_undefined() {
            warn!(property = %self, entity = %entity, "ignoring assignment of undefined; use null to clear a value");
            return Ok(());
        }
        if self.is_constant() {
            return Err(ModelError::ConstantProperty {
                path: self.inner.path.clone(),
            });
        }
        if self.is_calculated() {
            return Err(ModelError::CalculatedProperty {
                path: self.inner.path.clone(),
            });
        }
        if self.inner.is_list {
            return Err(ModelError::ListAssignment {
                path: self.inner.path.clone(),
            });
        }
        self.check_type(entity, &value)?;
        self.ensure_initialized(entity)?;
        self.write(entity, value, extra)
    }

    /// Supply the initial value of the field without raising events.
    ///
    /// Clears pending init. List values are wrapped as observable lists. A
    /// calculated property accepts the value (a loaded instance may carry
    /// it) but its rule replaces it whenever it runs.
    pub fn init(&self, entity: &Entity, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.check_owner(entity)?;
        if value.is_undefined() {
            warn!(property = %self, entity = %entity, "ignoring initial value of undefined; use null instead");
            return Ok(());
        }
        if self.is_constant() {
            return Err(ModelError::ConstantProperty {
                path: self.inner.path.clone(),
            });
        }
        if self.is_calculated() {
            debug!(property = %self, entity = %entity, "initial value of calculated property kept until its rule runs");
        }
        if self.inner.is_list {
            let items = self.list_items(entity, value)?;
            return self.store_initial(entity, Value::List(items));
        }
        self.check_type(entity, &value)?;
        self.store_initial(entity, value)
    }

    /// Rewrite the list held by this property into `desired` using a
    /// minimal edit. Observers see one `collection_changed` event.
    pub fn update_list(&self, entity: &Entity, desired: &[Value]) -> Result<Vec<ChangeRecord<Value>>> {
        self.check_owner(entity)?;
        if self.is_calculated() {
            return Err(ModelError::CalculatedProperty {
                path: self.inner.path.clone(),
            });
        }
        self.apply_list(entity, desired)
    }

    /// Write produced by a rule. Calculated properties accept it.
    pub(crate) fn write_from_rule(&self, entity: &Entity, value: Value, rule: &str) -> Result<()> {
        self.check_owner(entity)?;
        if value.is_undefined() {
            return Ok(());
        }
        self.check_type(entity, &value)?;
        self.ensure_initialized(entity)?;
        self.write(entity, value, ChangeExtra::from_rule(rule))
    }

    /// Mark a pending field initialized with the type default so the next
    /// write is reported as a change.
    pub(crate) fn mark_initialized(&self, entity: &Entity) -> Result<()> {
        if self.is_pending_init(entity) {
            let initial = if self.inner.is_list {
                Value::List(ObservableList::default())
            } else {
                self.inner.value_type.default_value()
            };
            self.store_initial(entity, initial)?;
        }
        Ok(())
    }

    /// Make the list field equal `desired`. A pending field is initialized
    /// silently; otherwise the minimal edit is applied.
    pub(crate) fn apply_list(&self, entity: &Entity, desired: &[Value]) -> Result<Vec<ChangeRecord<Value>>> {
        if !self.inner.is_list {
            return Err(ModelError::TypeMismatch {
                entity: entity.to_string(),
                property: self.inner.path.clone(),
                expected: self.inner.value_type.to_string(),
                actual: "list".to_owned(),
                value: format!("{} items", desired.len()),
            });
        }
        for item in desired {
            self.check_type(entity, item)?;
        }
        let current = self.peek(entity).and_then(|value| value.as_list().cloned());
        let Some(list) = current else {
            let list: ObservableList<Value> = desired.iter().cloned().collect();
            self.store_initial(entity, Value::List(list))?;
            return Ok(Vec::new());
        };
        let model = entity.model()?;
        model.perform(|| update_array(&list, desired))
    }

    fn write(&self, entity: &Entity, value: Value, extra: ChangeExtra) -> Result<()> {
        let model = entity.model()?;
        model.perform(|| {
            let old = self.peek(entity);
            if old.as_ref() == Some(&value) {
                return Ok(());
            }
            entity.store_field(&self.inner.name, value.clone());
            trace!(property = %self, entity = %entity, value = %value, "field written");

            let Some(old_value) = old else {
                return Ok(());
            };
            let change = PropertyChange {
                entity: entity.clone(),
                property: self.clone(),
                old_value,
                new_value: value,
                collection_changed: false,
                changes: Vec::new(),
                extra,
            };
            self.inner.changed.publish(&change)?;
            entity.publish_changed(&change)
        })
    }

    fn store_initial(&self, entity: &Entity, value: Value) -> Result<()> {
        let value = match value {
            Value::List(list) if self.inner.is_list => {
                self.instrument_list(entity, &list);
                Value::List(list)
            }
            other if self.inner.is_list => {
                let list = self.list_items(entity, other)?;
                self.instrument_list(entity, &list);
                Value::List(list)
            }
            other => other,
        };
        entity.store_field(&self.inner.name, value);
        Ok(())
    }

    fn list_items(&self, entity: &Entity, value: Value) -> Result<ObservableList<Value>> {
        let list = match value {
            Value::List(list) => list,
            Value::Null => ObservableList::default(),
            single => ObservableList::new([single]),
        };
        for item in list.to_vec() {
            self.check_type(entity, &item)?;
        }
        Ok(list)
    }

    /// Forward structural changes of `list` as `changed` events on `entity`.
    fn instrument_list(&self, entity: &Entity, list: &ObservableList<Value>) {
        let property = self.clone();
        let owner = entity.downgrade();
        let link = list.subscribe(move |list_change| {
            let Some(entity) = owner.upgrade() else {
                return Ok(());
            };
            let current = property.peek(&entity).unwrap_or_default();
            let change = PropertyChange {
                entity: entity.clone(),
                property: property.clone(),
                old_value: current.clone(),
                new_value: current,
                collection_changed: true,
                changes: list_change.changes.clone(),
                extra: ChangeExtra::default(),
            };
            let model = entity.model()?;
            model.perform(|| {
                property.inner.changed.publish(&change)?;
                entity.publish_changed(&change)
            })
        });
        entity.link_list(&self.inner.name, link);
    }

    // -----------------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------------

    fn check_owner(&self, entity: &Entity) -> Result<()> {
        if self.applies_to(entity) {
            Ok(())
        } else {
            Err(ModelError::EntityTypeMismatch {
                path: self.inner.path.clone(),
                entity: entity.to_string(),
                actual_type: entity.entity_type().name().to_owned(),
            })
        }
    }

    fn check_type(&self, entity: &Entity, value: &Value) -> Result<()> {
        let accepted = match (&self.inner.value_type, value) {
            (_, Value::Null) => true,
            (ValueType::Primitive(kind), other) => other.primitive_kind() == Some(*kind),
            (ValueType::Entity(type_name), Value::Entity(target)) => {
                target.entity_type().is_named_or_derives(type_name)
            }
            (ValueType::Entity(_), _) => false,
        };
        if accepted {
            return Ok(());
        }
        let actual = match value {
            Value::Entity(target) => target.entity_type().name().to_owned(),
            other => other.kind_name().to_owned(),
        };
        Err(ModelError::TypeMismatch {
            entity: entity.to_string(),
            property: self.inner.path.clone(),
            expected: self.inner.value_type.to_string(),
            actual,
            value: value.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Rule bookkeeping
    // -----------------------------------------------------------------------

    pub(crate) fn set_calculation(&self, rule: &Rule) -> Result<()> {
        if self.is_calculated() {
            return Err(ModelError::AlreadyCalculated {
                path: self.inner.path.clone(),
            });
        }
        *self.inner.calculation.borrow_mut() = Some(rule.downgrade());
        Ok(())
    }

    pub(crate) fn add_rule(&self, rule: &Rule) {
        self.inner.rules.borrow_mut().push(rule.downgrade());
    }
}
