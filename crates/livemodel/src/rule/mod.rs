#![forbid(unsafe_code)]

//! Rules: named units of behavior bound to dependency paths and triggers.
//!
//! A [`Rule`] is declared with a [`RuleBuilder`] obtained from
//! [`EntityType::rule`] and registered when the builder is finished. From
//! then on it lives as long as its type. Registration subscribes the rule to
//!
//! - the `changed` event of every dependency path (push),
//! - its target property's `accessed` event, when flagged (pull),
//! - the type's init-new and init-existing events, when flagged.
//!
//! Init and access triggers run the rule right away. Change triggers are
//! deferred to the exit of the outermost execution scope and coalesced per
//! `(rule, entity)`, so a rule runs once per unit of work no matter how many
//! of its dependencies changed.
//!
//! # Example
//!
//! ```
//! use livemodel::{Model, PropertyDef, Value, ValueType};
//!
//! let model = Model::default();
//! let person = model.define_type("Person", None)?;
//! person.add_property(PropertyDef::new("FirstName", ValueType::string()))?;
//! person.add_property(PropertyDef::new("LastName", ValueType::string()))?;
//! person.add_property(PropertyDef::new("FullName", ValueType::string()))?;
//! person
//!     .rule()
//!     .property("FullName")
//!     .on_change_of(["FirstName", "LastName"])
//!     .calculate(|p| {
//!         let first = p.get("FirstName")?;
//!         let last = p.get("LastName")?;
//!         Ok(Value::from(format!(
//!             "{} {}",
//!             first.as_str().unwrap_or_default(),
//!             last.as_str().unwrap_or_default()
//!         )))
//!     })?;
//!
//! let jane = model.create("Person", [("FirstName", "Jane"), ("LastName", "Doe")])?;
//! assert_eq!(jane.get("FullName")?, Value::from("Jane Doe"));
//! jane.set("FirstName", "June")?;
//! assert_eq!(jane.get("FullName")?, Value::from("June Doe"));
//! # Ok::<(), livemodel::ModelError>(())
//! ```

mod calculated;
mod condition;
mod default;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace};

use crate::condition::ConditionType;
use crate::entity::Entity;
use crate::entity_type::{EntityType, WeakEntityType};
use crate::error::{ModelError, Result};
use crate::event::SubscriptionSet;
use crate::path::PropertyPath;
use crate::property::Property;
use crate::scope::ExitKey;
use crate::value::Value;

use calculated::CalculatedAction;
use condition::ConditionAction;
use default::DefaultAction;

/// What caused a rule to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTrigger {
    /// A new instance of the rule's type was created.
    InitNew,
    /// An existing instance of the rule's type was loaded.
    InitExisting,
    /// The target property was read while pending init.
    Access,
    /// A dependency path changed.
    Change,
}

/// The body of a rule.
pub trait RuleAction {
    /// Short label used in generated rule names.
    fn purpose(&self) -> &'static str;

    /// Run the rule for `entity`.
    fn execute(&self, rule: &Rule, entity: &Entity, trigger: RuleTrigger) -> Result<()>;
}

struct ExecuteAction<F>(F);

impl<F> RuleAction for ExecuteAction<F>
where
    F: Fn(&Entity) -> Result<()>,
{
    fn purpose(&self) -> &'static str {
        "Execute"
    }

    fn execute(&self, _rule: &Rule, entity: &Entity, _trigger: RuleTrigger) -> Result<()> {
        (self.0)(entity)
    }
}

/// Invocation flags of a registered rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTriggers {
    pub on_init_new: bool,
    pub on_init_existing: bool,
    pub on_access: bool,
}

struct RuleInner {
    id: u64,
    name: String,
    root: WeakEntityType,
    target: Option<Property>,
    triggers: RuleTriggers,
    dependencies: Vec<PropertyPath>,
    action: Box<dyn RuleAction>,
    subscriptions: RefCell<SubscriptionSet>,
}

/// A handle to a registered rule.
#[derive(Clone)]
pub struct Rule {
    inner: Rc<RuleInner>,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Rule {}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("target", &self.inner.target)
            .field("triggers", &self.inner.triggers)
            .field("dependencies", &self.inner.dependencies)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl Rule {
    /// Start declaring a rule on `entity_type`.
    #[must_use]
    pub fn builder(entity_type: &EntityType) -> RuleBuilder {
        RuleBuilder::new(entity_type)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The property the rule computes or validates, if any.
    #[must_use]
    pub fn target(&self) -> Option<&Property> {
        self.inner.target.as_ref()
    }

    #[must_use]
    pub fn triggers(&self) -> &RuleTriggers {
        &self.inner.triggers
    }

    /// Paths whose changes re-run the rule.
    #[must_use]
    pub fn dependencies(&self) -> &[PropertyPath] {
        &self.inner.dependencies
    }

    /// Whether `entity` is an instance of the rule's type.
    #[must_use]
    pub fn applies_to(&self, entity: &Entity) -> bool {
        self.inner
            .root
            .upgrade()
            .is_some_and(|root| entity.is_instance_of(&root))
    }

    /// Run the rule for `entity` now, as if a dependency had changed.
    pub fn execute(&self, entity: &Entity) -> Result<()> {
        if !self.applies_to(entity) {
            return Err(ModelError::EntityTypeMismatch {
                path: self.inner.name.clone(),
                entity: entity.to_string(),
                actual_type: entity.entity_type().name().to_owned(),
            });
        }
        self.run(entity, RuleTrigger::Change)
    }

    pub(crate) fn downgrade(&self) -> WeakRule {
        WeakRule(Rc::downgrade(&self.inner))
    }

    fn run(&self, entity: &Entity, trigger: RuleTrigger) -> Result<()> {
        trace!(rule = %self.inner.name, entity = %entity, ?trigger, "rule executing");
        let model = entity.model()?;
        model
            .perform(|| self.inner.action.execute(self, entity, trigger))
            .map_err(|err| {
                if err.is_cascade_limit() || matches!(err, ModelError::RuleFailed { .. }) {
                    return err;
                }
                error!(rule = %self.inner.name, entity = %entity, error = %err, "rule failed");
                ModelError::RuleFailed {
                    rule: self.inner.name.clone(),
                    message: err.to_string(),
                }
            })
    }

    /// Queue a change-triggered run on the current scope.
    fn schedule(&self, entity: &Entity) -> Result<()> {
        if !self.applies_to(entity) {
            return Ok(());
        }
        let model = entity.model()?;
        let key = ExitKey {
            rule: self.inner.id,
            entity: entity.id(),
        };
        let rule = self.downgrade();
        let target = entity.downgrade();
        model.scope().on_exit_keyed(key, move |exit| {
            if exit.is_aborted() {
                return Ok(());
            }
            match (rule.upgrade(), target.upgrade()) {
                (Some(rule), Some(entity)) => rule.run(&entity, RuleTrigger::Change),
                _ => Ok(()),
            }
        })
    }

    fn register(&self, entity_type: &EntityType) {
        let mut subscriptions = SubscriptionSet::new();

        for path in &self.inner.dependencies {
            let rule = self.downgrade();
            subscriptions.hold(path.subscribe_changed(move |change| match rule.upgrade() {
                Some(rule) => rule.schedule(&change.root),
                None => Ok(()),
            }));
        }

        if self.inner.triggers.on_access
            && let Some(target) = &self.inner.target
        {
            let rule = self.downgrade();
            subscriptions.hold(target.subscribe_accessed(move |access| {
                let Some(rule) = rule.upgrade() else {
                    return Ok(());
                };
                let pending = rule
                    .target()
                    .is_some_and(|target| target.is_pending_init(&access.entity));
                if pending && rule.applies_to(&access.entity) {
                    rule.run(&access.entity, RuleTrigger::Access)
                } else {
                    Ok(())
                }
            }));
        }

        if self.inner.triggers.on_init_new {
            let rule = self.downgrade();
            subscriptions.hold(entity_type.init_new().subscribe(move |entity| match rule.upgrade() {
                Some(rule) => rule.run(entity, RuleTrigger::InitNew),
                None => Ok(()),
            }));
        }

        if self.inner.triggers.on_init_existing {
            let rule = self.downgrade();
            subscriptions.hold(entity_type.init_existing().subscribe(move |entity| match rule.upgrade() {
                Some(rule) => rule.run(entity, RuleTrigger::InitExisting),
                None => Ok(()),
            }));
        }

        *self.inner.subscriptions.borrow_mut() = subscriptions;
        entity_type.add_rule(self.clone());
        if let Some(target) = &self.inner.target {
            target.add_rule(self);
        }
        debug!(
            rule = %self.inner.name,
            purpose = self.inner.action.purpose(),
            dependencies = self.inner.dependencies.len(),
            "rule registered"
        );
    }
}

/// Non-owning rule handle.
#[derive(Clone)]
pub(crate) struct WeakRule(Weak<RuleInner>);

impl WeakRule {
    pub(crate) fn upgrade(&self) -> Option<Rule> {
        self.0.upgrade().map(|inner| Rule { inner })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Declares a rule. Finishing calls register it and return the [`Rule`].
///
/// Unset trigger flags take the defaults of the rule kind:
///
/// | Kind | init new | init existing | access |
/// |------|----------|---------------|--------|
/// | [`execute`](Self::execute) | off | off | off |
/// | [`calculate`](Self::calculate) | on | on | always on |
/// | [`default_value`](Self::default_value) | on | on | off |
/// | [`condition`](Self::condition) | on | on | off |
#[must_use]
pub struct RuleBuilder {
    entity_type: EntityType,
    name: Option<String>,
    property: Option<String>,
    on_init_new: Option<bool>,
    on_init_existing: Option<bool>,
    on_access: Option<bool>,
    on_change_of: Vec<String>,
    fallback: Option<Value>,
}

impl fmt::Debug for RuleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleBuilder")
            .field("entity_type", &self.entity_type.name())
            .field("name", &self.name)
            .field("property", &self.property)
            .field("on_change_of", &self.on_change_of)
            .finish_non_exhaustive()
    }
}

impl RuleBuilder {
    pub(crate) fn new(entity_type: &EntityType) -> Self {
        Self {
            entity_type: entity_type.clone(),
            name: None,
            property: None,
            on_init_new: None,
            on_init_existing: None,
            on_access: None,
            on_change_of: Vec::new(),
            fallback: None,
        }
    }

    /// Explicit rule name. Generated from type, property and purpose when
    /// omitted.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The property the rule targets.
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.property = Some(name.into());
        self
    }

    pub fn on_init_new(mut self, enabled: bool) -> Self {
        self.on_init_new = Some(enabled);
        self
    }

    pub fn on_init_existing(mut self, enabled: bool) -> Self {
        self.on_init_existing = Some(enabled);
        self
    }

    /// Shorthand for both init triggers.
    pub fn on_init(self, enabled: bool) -> Self {
        self.on_init_new(enabled).on_init_existing(enabled)
    }

    /// Run when the target is read while still pending init.
    pub fn on_access(mut self, enabled: bool) -> Self {
        self.on_access = Some(enabled);
        self
    }

    /// Dependency paths. Each entry may use brace and comma shorthand.
    pub fn on_change_of<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_change_of.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Value substituted when a calculation fails.
    pub fn fallback(mut self, value: impl Into<Value>) -> Self {
        self.fallback = Some(value.into());
        self
    }

    /// Register a rule that runs `f`.
    pub fn execute(self, f: impl Fn(&Entity) -> Result<()> + 'static) -> Result<Rule> {
        let triggers = self.triggers(false, false, false);
        self.finish(triggers, Box::new(ExecuteAction(f)))
    }

    /// Register a rule that calculates the target property with `f`.
    ///
    /// The property becomes calculated: user writes are rejected, and a
    /// read while pending init runs the calculation.
    pub fn calculate(self, f: impl Fn(&Entity) -> Result<Value> + 'static) -> Result<Rule> {
        let mut triggers = self.triggers(true, true, true);
        triggers.on_access = true;
        let target = self.target()?;
        let action = CalculatedAction::new(f, self.fallback.clone());
        let rule = self.build(triggers, Box::new(action))?;
        target.set_calculation(&rule)?;
        rule.register(&self.entity_type);
        Ok(rule)
    }

    /// Register a rule that supplies the target's value on new instances
    /// and recomputes it when dependencies change.
    pub fn default_value(self, f: impl Fn(&Entity) -> Result<Value> + 'static) -> Result<Rule> {
        let triggers = self.triggers(true, true, false);
        self.target()?;
        let action = DefaultAction::new(f, self.fallback.clone());
        self.finish(triggers, Box::new(action))
    }

    /// Register a rule that attaches a condition of `condition_type` while
    /// `predicate` holds.
    pub fn condition(
        self,
        condition_type: &ConditionType,
        predicate: impl Fn(&Entity) -> Result<bool> + 'static,
    ) -> Result<Rule> {
        let triggers = self.triggers(true, true, false);
        let action = ConditionAction::predicate(condition_type.clone(), predicate);
        self.finish(triggers, Box::new(action))
    }

    /// Register a rule that attaches a condition of `condition_type` while
    /// `message` returns a non-empty message.
    pub fn condition_message(
        self,
        condition_type: &ConditionType,
        message: impl Fn(&Entity) -> Result<Option<String>> + 'static,
    ) -> Result<Rule> {
        let triggers = self.triggers(true, true, false);
        let action = ConditionAction::message(condition_type.clone(), message);
        self.finish(triggers, Box::new(action))
    }

    /// Register a rule with a custom body.
    pub fn action(self, action: impl RuleAction + 'static) -> Result<Rule> {
        let triggers = self.triggers(false, false, false);
        self.finish(triggers, Box::new(action))
    }

    fn triggers(&self, init_new: bool, init_existing: bool, access: bool) -> RuleTriggers {
        RuleTriggers {
            on_init_new: self.on_init_new.unwrap_or(init_new),
            on_init_existing: self.on_init_existing.unwrap_or(init_existing),
            on_access: self.on_access.unwrap_or(access),
        }
    }

    fn target(&self) -> Result<Property> {
        let Some(name) = &self.property else {
            return Err(ModelError::MissingTarget {
                rule: self
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}.?", self.entity_type.name())),
            });
        };
        self.entity_type.property(name)
    }

    fn finish(self, triggers: RuleTriggers, action: Box<dyn RuleAction>) -> Result<Rule> {
        let rule = self.build(triggers, action)?;
        rule.register(&self.entity_type);
        Ok(rule)
    }

    fn build(&self, triggers: RuleTriggers, action: Box<dyn RuleAction>) -> Result<Rule> {
        let target = self
            .property
            .as_deref()
            .map(|name| self.entity_type.property(name))
            .transpose()?;
        let mut dependencies = Vec::new();
        for text in &self.on_change_of {
            dependencies.extend(self.entity_type.get_paths(text)?);
        }
        let name = match &self.name {
            Some(name) => name.clone(),
            None => self.generated_name(target.as_ref(), action.purpose()),
        };
        let model = self.entity_type.model()?;
        Ok(Rule {
            inner: Rc::new(RuleInner {
                id: model.next_rule_id(),
                name,
                root: self.entity_type.downgrade(),
                target,
                triggers,
                dependencies,
                action,
                subscriptions: RefCell::new(SubscriptionSet::new()),
            }),
        })
    }

    fn generated_name(&self, target: Option<&Property>, purpose: &str) -> String {
        let base = match target {
            Some(property) => format!("{}.{}.{}", self.entity_type.name(), property.name(), purpose),
            None => format!("{}.{}", self.entity_type.name(), purpose),
        };
        if !self.entity_type.has_rule_named(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}.{n}");
            if !self.entity_type.has_rule_named(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::model::Model;
    use crate::property::PropertyDef;
    use crate::value::ValueType;

    fn totals() -> (Model, EntityType) {
        let model = Model::default();
        let ty = model.define_type("Line", None).unwrap();
        ty.add_property(PropertyDef::new("Qty", ValueType::number())).unwrap();
        ty.add_property(PropertyDef::new("Price", ValueType::number())).unwrap();
        ty.add_property(PropertyDef::new("Total", ValueType::number())).unwrap();
        (model, ty)
    }

    fn number(entity: &Entity, name: &str) -> Result<f64> {
        Ok(entity.get(name)?.as_number().unwrap_or_default())
    }

    #[test]
    fn generated_names_are_unique_per_type() {
        let (_model, ty) = totals();
        let a = ty.rule().on_change_of(["Qty"]).execute(|_| Ok(())).unwrap();
        let b = ty.rule().on_change_of(["Qty"]).execute(|_| Ok(())).unwrap();
        let c = ty
            .rule()
            .property("Total")
            .calculate(|_| Ok(Value::from(0)))
            .unwrap();
        assert_eq!(a.name(), "Line.Execute");
        assert_eq!(b.name(), "Line.Execute.2");
        assert_eq!(c.name(), "Line.Total.Calculated");
        assert_eq!(ty.rules().len(), 3);
        assert_eq!(ty.property("Total").unwrap().rules(), vec![c]);
    }

    #[test]
    fn change_triggered_rules_coalesce_per_unit_of_work() {
        let (model, ty) = totals();
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        ty.rule()
            .on_change_of(["Qty, Price"])
            .execute(move |_| {
                r.set(r.get() + 1);
                Ok(())
            })
            .unwrap();
        let line = model.create("Line", [("Qty", 1), ("Price", 2)]).unwrap();
        assert_eq!(runs.get(), 0);

        model
            .perform(|| {
                line.set("Qty", 3)?;
                line.set("Price", 4)?;
                line.set("Qty", 5)
            })
            .unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn calculated_property_rejects_writes_and_recomputes() {
        let (model, ty) = totals();
        ty.rule()
            .property("Total")
            .on_change_of(["Qty", "Price"])
            .calculate(|line| Ok(Value::from(number(line, "Qty")? * number(line, "Price")?)))
            .unwrap();
        let line = model.create("Line", [("Qty", 2), ("Price", 5)]).unwrap();
        assert_eq!(line.get("Total").unwrap(), Value::from(10));
        assert!(matches!(
            line.set("Total", 1),
            Err(ModelError::CalculatedProperty { .. })
        ));
        line.set("Qty", 3).unwrap();
        assert_eq!(line.get("Total").unwrap(), Value::from(15));
    }

    #[test]
    fn second_calculation_on_same_property_is_rejected() {
        let (_model, ty) = totals();
        ty.rule()
            .property("Total")
            .calculate(|_| Ok(Value::from(1)))
            .unwrap();
        assert!(matches!(
            ty.rule().property("Total").calculate(|_| Ok(Value::from(2))),
            Err(ModelError::AlreadyCalculated { .. })
        ));
    }

    #[test]
    fn calculation_without_target_is_rejected() {
        let (_model, ty) = totals();
        assert!(matches!(
            ty.rule().calculate(|_| Ok(Value::Null)),
            Err(ModelError::MissingTarget { .. })
        ));
    }

    #[test]
    fn failing_rule_reports_its_name() {
        let (model, ty) = totals();
        ty.rule()
            .name("Explode")
            .on_change_of(["Qty"])
            .execute(|_| Err(ModelError::custom("boom")))
            .unwrap();
        let line = model.create("Line", [("Qty", 1)]).unwrap();
        let err = line.set("Qty", 2).unwrap_err();
        assert_eq!(
            err,
            ModelError::RuleFailed {
                rule: "Explode".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn rules_on_base_type_apply_to_subtypes_only_through_lineage() {
        let (model, _ty) = totals();
        let discounted = model.define_type("DiscountedLine", Some("Line")).unwrap();
        discounted
            .add_property(PropertyDef::new("Discount", ValueType::number()))
            .unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        discounted
            .rule()
            .on_change_of(["Qty"])
            .execute(move |_| {
                h.set(h.get() + 1);
                Ok(())
            })
            .unwrap();

        let plain = model.create("Line", [("Qty", 1)]).unwrap();
        let special = model.create("DiscountedLine", [("Qty", 1)]).unwrap();
        plain.set("Qty", 2).unwrap();
        assert_eq!(hits.get(), 0);
        special.set("Qty", 2).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn explicit_execute_checks_the_instance_type() {
        let (model, ty) = totals();
        model.define_type("Other", None).unwrap();
        let rule = ty.rule().execute(|_| Ok(())).unwrap();
        let other = model.create("Other", Vec::<(&str, Value)>::new()).unwrap();
        assert!(matches!(
            rule.execute(&other),
            Err(ModelError::EntityTypeMismatch { .. })
        ));
    }
}
