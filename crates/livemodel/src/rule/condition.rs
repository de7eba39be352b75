#![forbid(unsafe_code)]

//! Condition rules: attach or remove a condition as a predicate flips.

use super::{Rule, RuleAction, RuleTrigger};
use crate::condition::{self, ConditionType};
use crate::entity::Entity;
use crate::error::Result;
use crate::property::Property;

enum Check {
    Predicate(Box<dyn Fn(&Entity) -> Result<bool>>),
    Message(Box<dyn Fn(&Entity) -> Result<Option<String>>>),
}

pub(super) struct ConditionAction {
    condition_type: ConditionType,
    check: Check,
}

impl ConditionAction {
    pub(super) fn predicate(
        condition_type: ConditionType,
        predicate: impl Fn(&Entity) -> Result<bool> + 'static,
    ) -> Self {
        Self {
            condition_type,
            check: Check::Predicate(Box::new(predicate)),
        }
    }

    pub(super) fn message(
        condition_type: ConditionType,
        message: impl Fn(&Entity) -> Result<Option<String>> + 'static,
    ) -> Self {
        Self {
            condition_type,
            check: Check::Message(Box::new(message)),
        }
    }

    /// The message of the active condition, or `None` when inactive.
    fn evaluate(&self, entity: &Entity) -> Result<Option<String>> {
        match &self.check {
            Check::Predicate(predicate) => {
                Ok(predicate(entity)?.then(|| self.condition_type.message().to_owned()))
            }
            Check::Message(message) => Ok(message(entity)?.filter(|text| !text.is_empty())),
        }
    }
}

/// Properties a condition raised by `rule` concerns: the target, then the
/// end of every dependency path.
fn concerned_properties(rule: &Rule) -> Vec<Property> {
    let mut properties: Vec<Property> = rule.target().cloned().into_iter().collect();
    for path in rule.dependencies() {
        if let Some(property) = path.last_property()
            && !properties.contains(&property)
        {
            properties.push(property);
        }
    }
    properties
}

impl RuleAction for ConditionAction {
    fn purpose(&self) -> &'static str {
        "Condition"
    }

    fn execute(&self, rule: &Rule, entity: &Entity, _trigger: RuleTrigger) -> Result<()> {
        match self.evaluate(entity)? {
            Some(message) => {
                condition::attach(entity, &self.condition_type, message, concerned_properties(rule))?;
            }
            None => {
                condition::detach(entity, &self.condition_type)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::condition::{ConditionCategory, ConditionType, ConditionTypeSet};
    use crate::entity_type::EntityType;
    use crate::model::Model;
    use crate::property::PropertyDef;
    use crate::value::{Value, ValueType};

    fn account() -> (Model, EntityType, ConditionType) {
        let model = Model::default();
        let ty = model.define_type("Account", None).unwrap();
        ty.add_property(PropertyDef::new("Balance", ValueType::number()))
            .unwrap();
        ty.add_property(PropertyDef::new("Owner", ValueType::string()))
            .unwrap();
        let overdrawn = model
            .define_condition_type("Overdrawn", ConditionCategory::Warning, "Balance is negative")
            .unwrap();
        (model, ty, overdrawn)
    }

    #[test]
    fn condition_follows_predicate_across_all_lists() {
        let (model, ty, overdrawn) = account();
        let before_save = ConditionTypeSet::new("BeforeSave");
        overdrawn.add_to_set(&before_save);
        ty.rule()
            .property("Balance")
            .on_change_of(["Balance"])
            .condition(&overdrawn, |acct| {
                Ok(acct.get("Balance")?.as_number().unwrap_or_default() < 0.0)
            })
            .unwrap();

        let acct = model.create("Account", [("Balance", 10)]).unwrap();
        assert!(acct.conditions().is_empty());

        acct.set("Balance", -5).unwrap();
        let condition = acct.condition_of(&overdrawn).unwrap();
        assert_eq!(condition.message(), "Balance is negative");
        assert_eq!(condition.target(), Some(acct.clone()));
        assert_eq!(condition.properties()[0].name(), "Balance");
        assert_eq!(overdrawn.conditions().len(), 1);
        assert_eq!(before_save.conditions().len(), 1);

        acct.set("Balance", -7).unwrap();
        assert_eq!(acct.conditions().len(), 1);

        acct.set("Balance", 3).unwrap();
        assert!(acct.conditions().is_empty());
        assert!(overdrawn.conditions().is_empty());
        assert!(before_save.conditions().is_empty());
    }

    #[test]
    fn message_rule_updates_condition_text() {
        let (model, ty, _overdrawn) = account();
        let missing = model
            .define_condition_type("OwnerRequired", ConditionCategory::Error, "Owner is required")
            .unwrap();
        ty.rule()
            .on_change_of(["Owner"])
            .condition_message(&missing, |acct| {
                Ok(match acct.get("Owner")? {
                    Value::String(owner) if owner.is_empty() => Some("Owner is blank".to_owned()),
                    Value::String(_) => None,
                    _ => Some(String::new()),
                })
            })
            .unwrap();

        let acct = model.create("Account", [("Owner", Value::Null)]).unwrap();
        assert!(acct.condition_of(&missing).is_none(), "empty message means inactive");

        let membership = Rc::new(Cell::new(0));
        let m = Rc::clone(&membership);
        let _sub = acct.conditions().subscribe(move |_| {
            m.set(m.get() + 1);
            Ok(())
        });
        acct.set("Owner", "").unwrap();
        assert_eq!(acct.condition_of(&missing).unwrap().message(), "Owner is blank");
        acct.set("Owner", "Ada").unwrap();
        assert!(acct.condition_of(&missing).is_none());
        assert_eq!(membership.get(), 2);
    }
}
