#![forbid(unsafe_code)]

//! Default-value rules.
//!
//! A default rule fills its target on new instances that were not given a
//! value. Loaded instances keep their persisted value: the rule still runs
//! once for them, discarding the result, so it is known to depend on the
//! instance. Dependency changes recompute the value for both.

use super::calculated::{compute, list_items};
use super::{Rule, RuleAction, RuleTrigger};
use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::value::Value;

type Producer = Box<dyn Fn(&Entity) -> Result<Value>>;

pub(super) struct DefaultAction {
    produce: Producer,
    fallback: Option<Value>,
}

impl DefaultAction {
    pub(super) fn new(produce: impl Fn(&Entity) -> Result<Value> + 'static, fallback: Option<Value>) -> Self {
        Self {
            produce: Box::new(produce),
            fallback,
        }
    }
}

impl RuleAction for DefaultAction {
    fn purpose(&self) -> &'static str {
        "Default"
    }

    fn execute(&self, rule: &Rule, entity: &Entity, trigger: RuleTrigger) -> Result<()> {
        let Some(target) = rule.target() else {
            return Err(ModelError::MissingTarget {
                rule: rule.name().to_owned(),
            });
        };

        match trigger {
            RuleTrigger::InitNew | RuleTrigger::Access => {
                if !target.is_pending_init(entity) {
                    return Ok(());
                }
                let value = compute(rule, entity, &*self.produce, self.fallback.as_ref())?;
                if value.is_undefined() {
                    return Ok(());
                }
                if target.is_list() {
                    target.apply_list(entity, &list_items(value))?;
                    Ok(())
                } else {
                    target.init(entity, value)
                }
            }
            RuleTrigger::InitExisting => {
                compute(rule, entity, &*self.produce, self.fallback.as_ref())?;
                Ok(())
            }
            RuleTrigger::Change => {
                let value = compute(rule, entity, &*self.produce, self.fallback.as_ref())?;
                if value.is_undefined() {
                    return Ok(());
                }
                if target.is_list() {
                    target.apply_list(entity, &list_items(value))?;
                    Ok(())
                } else {
                    target.write_from_rule(entity, value, rule.name())
                }
            }
        }
    }
}
