#![forbid(unsafe_code)]

//! The model: type registry, instance pool and execution scope.
//!
//! A [`Model`] is the explicit owner of everything that would otherwise be
//! global: the mapping from type name to [`EntityType`], the registered
//! condition types, the entity id counter, and the single
//! [`ExecutionScope`] that all writes and rule executions run under.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::debug;

use crate::condition::{ConditionCategory, ConditionType};
use crate::config::ModelConfig;
use crate::entity::Entity;
use crate::entity_type::EntityType;
use crate::error::{ModelError, Result};
use crate::scope::{ExecutionScope, ScopeInfo};
use crate::value::Value;

pub(crate) struct ModelInner {
    config: ModelConfig,
    scope: ExecutionScope,
    types: RefCell<AHashMap<String, EntityType>>,
    condition_types: RefCell<AHashMap<String, ConditionType>>,
    instances: RefCell<AHashMap<u64, Entity>>,
    next_entity_id: Cell<u64>,
    next_rule_id: Cell<u64>,
}

/// A handle to a model.
///
/// Cloning yields another handle to the same model.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("config", &self.inner.config)
            .field("types", &self.inner.types.borrow().len())
            .field("instances", &self.inner.instances.borrow().len())
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl Model {
    /// Create an empty model. Zero limits in `config` fall back to defaults.
    #[must_use]
    pub fn new(config: ModelConfig) -> Self {
        let config = config.sanitized();
        debug!(
            max_transfer_count = config.max_transfer_count,
            max_scope_depth = config.max_scope_depth,
            "model created"
        );
        Self {
            inner: Rc::new(ModelInner {
                scope: ExecutionScope::new(config.scope_limits()),
                config,
                types: RefCell::new(AHashMap::new()),
                condition_types: RefCell::new(AHashMap::new()),
                instances: RefCell::new(AHashMap::new()),
                next_entity_id: Cell::new(1),
                next_rule_id: Cell::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ModelInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// The execution scope shared by every write in this model.
    #[must_use]
    pub fn scope(&self) -> &ExecutionScope {
        &self.inner.scope
    }

    /// Run `f` as one unit of work: rule cascades it triggers run when the
    /// outermost unit completes.
    pub fn perform<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.inner.scope.perform(f)
    }

    /// The innermost open scope, for diagnostics.
    #[must_use]
    pub fn current_scope(&self) -> Option<ScopeInfo> {
        self.inner.scope.current()
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    /// Register a type, optionally deriving from an existing one.
    pub fn define_type(&self, name: &str, parent: Option<&str>) -> Result<EntityType> {
        if self.inner.types.borrow().contains_key(name) {
            return Err(ModelError::DuplicateType {
                type_name: name.to_owned(),
            });
        }
        let parent = parent.map(|parent| self.entity_type(parent)).transpose()?;
        let ty = EntityType::new(name, parent, Rc::downgrade(&self.inner));
        self.inner
            .types
            .borrow_mut()
            .insert(name.to_owned(), ty.clone());
        debug!(type_name = name, parent = ty.parent().map(EntityType::name), "type defined");
        Ok(ty)
    }

    /// Look up a registered type.
    pub fn entity_type(&self, name: &str) -> Result<EntityType> {
        self.find_type(name).ok_or_else(|| ModelError::UnknownType {
            type_name: name.to_owned(),
        })
    }

    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<EntityType> {
        self.inner.types.borrow().get(name).cloned()
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Create a new instance, supplying initial field values.
    ///
    /// Supplied fields start initialized and raise no change events. Rules
    /// listening for new instances run before this returns.
    pub fn create<I, K, V>(&self, type_name: &str, values: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.instantiate(type_name, values, true)
    }

    /// Register an existing (e.g. persisted) instance with the given field
    /// values. Rules listening for existing instances run before this
    /// returns.
    pub fn load<I, K, V>(&self, type_name: &str, values: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.instantiate(type_name, values, false)
    }

    fn instantiate<I, K, V>(&self, type_name: &str, values: I, is_new: bool) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let ty = self.entity_type(type_name)?;
        let id = self.inner.next_entity_id.get();
        self.inner.next_entity_id.set(id + 1);
        let entity = Entity::new(id, ty.clone());

        let initialized = self.perform(|| {
            for (name, value) in values {
                ty.property(name.as_ref())?.init(&entity, value)?;
            }
            self.register(&entity);
            ty.raise_init(&entity, is_new)
        });
        if let Err(err) = initialized {
            if self.unregister(&entity) {
                debug!(entity = %entity, error = %err, "instance discarded after failed init");
            }
            return Err(err);
        }
        Ok(entity)
    }

    fn register(&self, entity: &Entity) {
        entity.set_registered(true);
        entity.entity_type().track_instance(entity);
        self.inner
            .instances
            .borrow_mut()
            .insert(entity.id(), entity.clone());
        debug!(entity = %entity, "entity registered");
    }

    /// Stop tracking `entity`. Returns whether it was tracked.
    ///
    /// The entity stays usable through existing handles but is no longer a
    /// known instance of its type.
    pub fn unregister(&self, entity: &Entity) -> bool {
        let removed = self.inner.instances.borrow_mut().remove(&entity.id());
        if removed.is_none() {
            return false;
        }
        entity.set_registered(false);
        entity.entity_type().forget_instance(entity);
        debug!(entity = %entity, "entity unregistered");
        true
    }

    /// Look up a tracked entity by id.
    #[must_use]
    pub fn entity(&self, id: u64) -> Option<Entity> {
        self.inner.instances.borrow().get(&id).cloned()
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.inner.instances.borrow().len()
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    /// Register a condition type under a unique `code`.
    pub fn define_condition_type(
        &self,
        code: &str,
        category: ConditionCategory,
        message: &str,
    ) -> Result<ConditionType> {
        if self.inner.condition_types.borrow().contains_key(code) {
            return Err(ModelError::DuplicateType {
                type_name: code.to_owned(),
            });
        }
        let condition_type = ConditionType::new(code, category, message);
        self.inner
            .condition_types
            .borrow_mut()
            .insert(code.to_owned(), condition_type.clone());
        debug!(code, %category, "condition type defined");
        Ok(condition_type)
    }

    #[must_use]
    pub fn condition_type(&self, code: &str) -> Option<ConditionType> {
        self.inner.condition_types.borrow().get(code).cloned()
    }

    pub(crate) fn next_rule_id(&self) -> u64 {
        let id = self.inner.next_rule_id.get();
        self.inner.next_rule_id.set(id + 1);
        id
    }
}
