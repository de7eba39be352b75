#![forbid(unsafe_code)]

//! Multi-step dependency chains.
//!
//! A [`PropertyChain`] joins properties end to end from a root type, e.g.
//! `Order.Lines.Product`. A step whose property is list-valued fans out over
//! every element.
//!
//! # Lazy wiring
//!
//! The chain's `changed` and `accessed` events are wired on demand: the first
//! handler attached to one of them subscribes one handler per step to that
//! step's property event, and detaching the last handler releases them all.
//! Unobserved chains cost nothing at write time.
//!
//! # Propagation
//!
//! When the property of step `k` fires for entity `e`, the chain republishes
//! the event once for every known root instance connected to `e` through
//! steps `0..k`, with the root as the event's subject. Step 0 republishes
//! for `e` itself when it is a root instance. The connectivity walk reads
//! stored values only; it never initializes fields or raises access events.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::entity::Entity;
use crate::entity_type::{EntityType, WeakEntityType};
use crate::error::{ModelError, Result};
use crate::event::{Event, Subscription, SubscriptionSet};
use crate::property::{Property, PropertyAccess, PropertyChange};
use crate::value::Value;

use super::parse::PathStep;

/// A property change seen through a dependency path.
#[derive(Debug, Clone)]
pub struct PathChange {
    /// Instance of the path's root type the change is relevant to.
    pub root: Entity,
    /// The underlying property-level change.
    pub source: PropertyChange,
}

/// A property access seen through a dependency path.
#[derive(Debug, Clone)]
pub struct PathAccess {
    pub root: Entity,
    pub source: PropertyAccess,
}

struct ChainStep {
    property: Property,
    cast: Option<EntityType>,
}

impl ChainStep {
    fn admits(&self, entity: &Entity) -> bool {
        self.cast
            .as_ref()
            .is_none_or(|cast| entity.is_instance_of(cast))
    }
}

struct ChainInner {
    path: String,
    root: WeakEntityType,
    steps: Vec<ChainStep>,
    changed: Event<PathChange>,
    accessed: Event<PathAccess>,
    change_wiring: RefCell<SubscriptionSet>,
    access_wiring: RefCell<SubscriptionSet>,
}

/// A resolved, subscribable chain of properties.
///
/// Cloning yields another handle to the same chain.
#[derive(Clone)]
pub struct PropertyChain {
    inner: Rc<ChainInner>,
}

impl PartialEq for PropertyChain {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PropertyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChain")
            .field("path", &self.inner.path)
            .field("wired", &self.is_wired())
            .finish()
    }
}

enum Read {
    /// Stored values only.
    Peek,
    /// Through the gateway, initializing and raising access events.
    Get,
}

impl PropertyChain {
    /// Resolve `steps` against `root`, advancing the current type through
    /// each step's value type (or its cast).
    pub(crate) fn resolve(root: &EntityType, path: &str, steps: &[PathStep]) -> Result<Self> {
        let model = root.model()?;
        let mut current = root.clone();
        let mut resolved = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let property = current
                .find_property(&step.name)
                .ok_or_else(|| ModelError::UnknownPath {
                    path: path.to_owned(),
                    type_name: current.name().to_owned(),
                    segment: step.name.clone(),
                })?;

            let cast = match &step.cast {
                None => None,
                Some(cast_name) => {
                    let expected = property.value_type().to_string();
                    let cast_type = model.entity_type(cast_name)?;
                    let admissible = property
                        .value_type()
                        .entity_type_name()
                        .is_some_and(|name| cast_type.is_named_or_derives(name));
                    if !admissible {
                        return Err(ModelError::InvalidCast {
                            path: path.to_owned(),
                            cast: cast_name.clone(),
                            expected,
                        });
                    }
                    Some(cast_type)
                }
            };

            if let Some(next) = steps.get(index + 1) {
                current = match (&cast, property.value_type().entity_type_name()) {
                    (Some(cast_type), _) => cast_type.clone(),
                    (None, Some(type_name)) => model.entity_type(type_name)?,
                    (None, None) => {
                        return Err(ModelError::UnknownPath {
                            path: path.to_owned(),
                            type_name: property.value_type().to_string(),
                            segment: next.name.clone(),
                        });
                    }
                };
            }
            resolved.push(ChainStep { property, cast });
        }

        let chain = Self {
            inner: Rc::new(ChainInner {
                path: path.to_owned(),
                root: root.downgrade(),
                steps: resolved,
                changed: Event::new(),
                accessed: Event::new(),
                change_wiring: RefCell::new(SubscriptionSet::new()),
                access_wiring: RefCell::new(SubscriptionSet::new()),
            }),
        };
        chain.install_watchers();
        Ok(chain)
    }

    fn install_watchers(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.changed.watch_subscribers(move |count| {
            let Some(inner) = weak.upgrade() else { return };
            let chain = PropertyChain { inner };
            if count.became_active() {
                chain.wire_changes();
            } else if count.became_idle() {
                chain.inner.change_wiring.borrow_mut().clear();
                debug!(path = %chain.inner.path, "chain change wiring released");
            }
        });

        let weak = Rc::downgrade(&self.inner);
        self.inner.accessed.watch_subscribers(move |count| {
            let Some(inner) = weak.upgrade() else { return };
            let chain = PropertyChain { inner };
            if count.became_active() {
                chain.wire_accesses();
            } else if count.became_idle() {
                chain.inner.access_wiring.borrow_mut().clear();
                debug!(path = %chain.inner.path, "chain access wiring released");
            }
        });
    }

    fn wire_changes(&self) {
        let mut wiring = self.inner.change_wiring.borrow_mut();
        for (index, step) in self.inner.steps.iter().enumerate() {
            let weak: Weak<ChainInner> = Rc::downgrade(&self.inner);
            wiring.hold(step.property.subscribe_changed(move |change| {
                match weak.upgrade() {
                    Some(inner) => PropertyChain { inner }.step_changed(index, change),
                    None => Ok(()),
                }
            }));
        }
        debug!(path = %self.inner.path, steps = self.inner.steps.len(), "chain change wiring attached");
    }

    fn wire_accesses(&self) {
        let mut wiring = self.inner.access_wiring.borrow_mut();
        for (index, step) in self.inner.steps.iter().enumerate() {
            let weak: Weak<ChainInner> = Rc::downgrade(&self.inner);
            wiring.hold(step.property.subscribe_accessed(move |access| {
                match weak.upgrade() {
                    Some(inner) => PropertyChain { inner }.step_accessed(index, access),
                    None => Ok(()),
                }
            }));
        }
        debug!(path = %self.inner.path, steps = self.inner.steps.len(), "chain access wiring attached");
    }

    fn step_changed(&self, index: usize, change: &PropertyChange) -> Result<()> {
        for root in self.roots_reaching(index, &change.entity) {
            trace!(path = %self.inner.path, step = index, root = %root, "chain change republished");
            self.inner.changed.publish(&PathChange {
                root,
                source: change.clone(),
            })?;
        }
        Ok(())
    }

    fn step_accessed(&self, index: usize, access: &PropertyAccess) -> Result<()> {
        for root in self.roots_reaching(index, &access.entity) {
            self.inner.accessed.publish(&PathAccess {
                root,
                source: access.clone(),
            })?;
        }
        Ok(())
    }

    /// Root instances connected to `target` through steps `0..index`.
    fn roots_reaching(&self, index: usize, target: &Entity) -> Vec<Entity> {
        let Some(root_type) = self.inner.root.upgrade() else {
            return Vec::new();
        };
        if index == 0 {
            return if target.is_instance_of(&root_type) {
                vec![target.clone()]
            } else {
                Vec::new()
            };
        }
        root_type
            .known_instances()
            .into_iter()
            .filter(|root| self.connects(root, index, target))
            .collect()
    }

    fn connects(&self, root: &Entity, index: usize, target: &Entity) -> bool {
        let mut frontier = vec![root.clone()];
        for step_index in 0..index {
            let mut next = Vec::new();
            for entity in &frontier {
                // Peek never fails.
                if let Ok(targets) = self.targets(step_index, entity, Read::Peek) {
                    next.extend(targets);
                }
            }
            if next.is_empty() {
                return false;
            }
            frontier = next;
        }
        frontier.iter().any(|entity| entity == target)
    }

    /// Entities reached from `entity` through step `index`.
    fn targets(&self, index: usize, entity: &Entity, read: Read) -> Result<Vec<Entity>> {
        let step = &self.inner.steps[index];
        if !step.property.applies_to(entity) {
            return Ok(Vec::new());
        }
        let value = match read {
            Read::Peek => step.property.peek(entity),
            Read::Get => Some(step.property.get(entity)?),
        };
        let mut out = Vec::new();
        match value {
            Some(Value::Entity(next)) => out.push(next),
            Some(Value::List(list)) => list.with_items(|items| {
                out.extend(items.iter().filter_map(|item| item.as_entity().cloned()));
            }),
            _ => {}
        }
        out.retain(|next| step.admits(next));
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// The path text this chain was resolved from.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The root type.
    pub fn root_type(&self) -> Result<EntityType> {
        self.inner.root.upgrade().ok_or(ModelError::ModelDropped)
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.steps.len()
    }

    /// Chains always have at least one step.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.steps.is_empty()
    }

    /// The properties along the chain, root first.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        self.inner
            .steps
            .iter()
            .map(|step| step.property.clone())
            .collect()
    }

    /// The property of the final step.
    #[must_use]
    pub fn last_property(&self) -> Option<Property> {
        self.inner.steps.last().map(|step| step.property.clone())
    }

    #[must_use]
    pub fn changed(&self) -> &Event<PathChange> {
        &self.inner.changed
    }

    #[must_use]
    pub fn accessed(&self) -> &Event<PathAccess> {
        &self.inner.accessed
    }

    /// Attach a change handler, wiring the chain if it was idle.
    pub fn subscribe_changed(&self, handler: impl Fn(&PathChange) -> Result<()> + 'static) -> Subscription {
        self.inner.changed.subscribe(handler)
    }

    /// Attach an access handler, wiring the chain if it was idle.
    pub fn subscribe_accessed(&self, handler: impl Fn(&PathAccess) -> Result<()> + 'static) -> Subscription {
        self.inner.accessed.subscribe(handler)
    }

    /// Whether per-step change handlers are currently attached.
    #[must_use]
    pub fn is_wired(&self) -> bool {
        !self.inner.change_wiring.borrow().is_empty()
    }

    /// Visit every `(target, property)` pair along the chain from `root`,
    /// branching per element at list steps. Returning `false` from `visit`
    /// stops the walk; the result says whether the walk ran to completion.
    pub fn each(&self, root: &Entity, mut visit: impl FnMut(&Entity, &Property) -> Result<bool>) -> Result<bool> {
        self.walk(0, root, 0, &mut visit)
    }

    /// Like [`each`](Self::each), but `visit` is only called from the step
    /// whose property is `from` onwards.
    pub fn each_from(
        &self,
        root: &Entity,
        from: &Property,
        mut visit: impl FnMut(&Entity, &Property) -> Result<bool>,
    ) -> Result<bool> {
        let Some(start) = self.inner.steps.iter().position(|step| &step.property == from) else {
            return Ok(true);
        };
        self.walk(0, root, start, &mut visit)
    }

    fn walk(
        &self,
        index: usize,
        entity: &Entity,
        start: usize,
        visit: &mut dyn FnMut(&Entity, &Property) -> Result<bool>,
    ) -> Result<bool> {
        let step = &self.inner.steps[index];
        if !step.property.applies_to(entity) {
            return Ok(true);
        }
        if index >= start && !visit(entity, &step.property)? {
            return Ok(false);
        }
        if index + 1 == self.inner.steps.len() {
            return Ok(true);
        }
        for next in self.targets(index, entity, Read::Get)? {
            if !self.walk(index + 1, &next, start, visit)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether every step along every branch from `root` holds a value.
    ///
    /// A null reference ends its branch and counts as initialized.
    #[must_use]
    pub fn is_inited(&self, root: &Entity) -> bool {
        self.inited_from(0, root)
    }

    fn inited_from(&self, index: usize, entity: &Entity) -> bool {
        let step = &self.inner.steps[index];
        if step.property.is_pending_init(entity) {
            return false;
        }
        if index + 1 == self.inner.steps.len() {
            return true;
        }
        self.targets(index, entity, Read::Peek)
            .unwrap_or_default()
            .iter()
            .all(|next| self.inited_from(index + 1, next))
    }

    /// The single value at the end of the chain.
    ///
    /// A null intermediate yields `Null`; an intermediate that has no value
    /// yet yields `Undefined`. Fails with `NotSingleValued` when an
    /// intermediate step is a list.
    pub fn value(&self, root: &Entity) -> Result<Value> {
        let mut current = root.clone();
        let last = self.inner.steps.len() - 1;
        for (index, step) in self.inner.steps.iter().enumerate() {
            let value = step.property.get(&current)?;
            if index == last {
                return Ok(value);
            }
            current = match value {
                Value::Entity(next) if step.admits(&next) => next,
                Value::List(_) => {
                    return Err(ModelError::NotSingleValued {
                        path: self.inner.path.clone(),
                    });
                }
                Value::Undefined => return Ok(Value::Undefined),
                _ => return Ok(Value::Null),
            };
        }
        Ok(Value::Undefined)
    }

    /// Every value at the end of the chain, flattening list fan-out and
    /// list-valued final steps. Null values are skipped.
    pub fn values(&self, root: &Entity) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        self.collect_values(0, root, &mut out)?;
        Ok(out)
    }

    fn collect_values(&self, index: usize, entity: &Entity, out: &mut Vec<Value>) -> Result<()> {
        let step = &self.inner.steps[index];
        if index + 1 < self.inner.steps.len() {
            for next in self.targets(index, entity, Read::Get)? {
                self.collect_values(index + 1, &next, out)?;
            }
            return Ok(());
        }
        if !step.property.applies_to(entity) {
            return Ok(());
        }
        match step.property.get(entity)? {
            Value::List(list) => out.extend(list.to_vec()),
            value if value.is_nullish() => {}
            value => out.push(value),
        }
        Ok(())
    }
}
