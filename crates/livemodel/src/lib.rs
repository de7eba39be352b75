#![forbid(unsafe_code)]

//! Reactive entity/property model.
//!
//! Types declared on a [`Model`] carry properties whose values can be
//! calculated, defaulted and validated by [`Rule`]s that re-run as other
//! properties change anywhere in the object graph.
//!
//! - [`Property`]: the value gateway. Reads initialize on first use, writes
//!   validate, short-circuit on equality and raise `changed`.
//! - [`PropertyPath`] / [`PropertyChain`]: dependency paths such as
//!   `"Order.Lines.Price"`, subscribable from the root type and wired to the
//!   graph only while someone listens.
//! - [`Rule`]: calculated, default-value and condition rules, triggered on
//!   init, on access or on dependency change.
//! - [`ExecutionScope`]: the unit of work. Cascading rule runs are deferred
//!   to the outermost scope and bounded by transfer count and depth.
//! - [`ObservableList`] and [`update_array`]: list values that publish
//!   precise add/remove/reorder/replace records, and a minimal differ for
//!   bulk replacement.
//!
//! # Architecture
//!
//! Everything is single-threaded and shared through `Rc` handles. Owning
//! edges run model → type → property and model → entity; back edges
//! (property → type, type → model, rule → type, handlers → rule) are `Weak`
//! so dropping the [`Model`] releases the graph.
//!
//! # Example
//!
//! ```
//! use livemodel::{Model, PropertyDef, ValueType};
//!
//! let model = Model::default();
//! let counter = model.define_type("Counter", None)?;
//! counter.add_property(PropertyDef::new("Count", ValueType::number()))?;
//!
//! let c = model.create("Counter", [("Count", 1)])?;
//! c.set("Count", 2)?;
//! assert_eq!(c.get("Count")?.as_number(), Some(2.0));
//! # Ok::<(), livemodel::ModelError>(())
//! ```

pub mod condition;
pub mod config;
pub mod entity;
pub mod entity_type;
pub mod error;
pub mod event;
pub mod model;
pub mod path;
pub mod property;
pub mod rule;
pub mod scope;
pub mod sequence;
pub mod value;

pub use condition::{Condition, ConditionCategory, ConditionType, ConditionTypeSet};
#[cfg(feature = "policy-config")]
pub use config::ConfigError;
pub use config::{DEFAULT_MAX_SCOPE_DEPTH, DEFAULT_MAX_TRANSFER_COUNT, ModelConfig};
pub use entity::Entity;
pub use entity_type::EntityType;
pub use error::{ModelError, Result};
pub use event::{Event, SubscriberCount, Subscription, SubscriptionSet};
pub use model::Model;
pub use path::{PathAccess, PathChange, PropertyChain, PropertyPath};
pub use property::{ChangeExtra, Property, PropertyAccess, PropertyChange, PropertyDef};
pub use rule::{Rule, RuleAction, RuleBuilder, RuleTrigger, RuleTriggers};
pub use scope::{ExecutionScope, ExitKey, ScopeExit, ScopeInfo, ScopeLimits};
pub use sequence::{
    ChangeKind, ChangeRecord, DiffPlan, ListChange, ObservableList, diff, ensure_observable,
    update_array,
};
pub use value::{PrimitiveKind, Value, ValueType};
