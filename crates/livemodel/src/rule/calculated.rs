#![forbid(unsafe_code)]

//! Calculated-property rules.

use tracing::warn;

use super::{Rule, RuleAction, RuleTrigger};
use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::value::Value;

type Calculation = Box<dyn Fn(&Entity) -> Result<Value>>;

pub(super) struct CalculatedAction {
    calculate: Calculation,
    fallback: Option<Value>,
}

impl CalculatedAction {
    pub(super) fn new(calculate: impl Fn(&Entity) -> Result<Value> + 'static, fallback: Option<Value>) -> Self {
        Self {
            calculate: Box::new(calculate),
            fallback,
        }
    }
}

/// Run `calculate`, substituting `fallback` for a failure when one is set.
/// Cascade-limit errors are never masked.
pub(super) fn compute(
    rule: &Rule,
    entity: &Entity,
    calculate: &dyn Fn(&Entity) -> Result<Value>,
    fallback: Option<&Value>,
) -> Result<Value> {
    match calculate(entity) {
        Ok(value) => Ok(value),
        Err(err) if err.is_cascade_limit() => Err(err),
        Err(err) => match fallback {
            Some(value) => {
                warn!(rule = %rule, entity = %entity, error = %err, "calculation failed; using fallback");
                Ok(value.clone())
            }
            None => Err(err),
        },
    }
}

/// Items a list property should hold for a calculated `value`.
pub(super) fn list_items(value: Value) -> Vec<Value> {
    match value {
        Value::List(list) => list.to_vec(),
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

impl RuleAction for CalculatedAction {
    fn purpose(&self) -> &'static str {
        "Calculated"
    }

    fn execute(&self, rule: &Rule, entity: &Entity, trigger: RuleTrigger) -> Result<()> {
        let Some(target) = rule.target() else {
            return Err(ModelError::MissingTarget {
                rule: rule.name().to_owned(),
            });
        };
        let value = compute(rule, entity, &*self.calculate, self.fallback.as_ref())?;
        if value.is_undefined() {
            return Ok(());
        }

        if target.is_list() {
            // A pending list is filled silently; afterwards only the
            // minimal edit is published.
            target.apply_list(entity, &list_items(value))?;
            return Ok(());
        }

        if trigger == RuleTrigger::InitNew {
            target.mark_initialized(entity)?;
        }
        target.write_from_rule(entity, value, rule.name())
    }
}
