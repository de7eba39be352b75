#![forbid(unsafe_code)]

//! Test support for `livemodel`.
//!
//! - Fixture models: [`person_model`] and [`order_model`].
//! - Recorders that capture events for later assertions:
//!   [`ChangeRecorder`] for property changes, [`ListRecorder`] for list
//!   change batches.
//! - Proptest strategies for diff inputs drawn from a shared item set.
//! - [`init_test_logging`], safe to call from every test.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use livemodel::{
    ChangeRecord, Entity, EntityType, ListChange, Model, ModelConfig, ObservableList, Property, PropertyChange,
    PropertyDef, Result, Subscription, Value, ValueType,
};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly `tracing` subscriber. Repeated calls are no-ops.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Fixture models
// ---------------------------------------------------------------------------

fn text(entity: &Entity, name: &str) -> Result<String> {
    Ok(entity
        .get(name)?
        .as_str()
        .map(str::to_owned)
        .unwrap_or_default())
}

fn number(entity: &Entity, name: &str) -> Result<f64> {
    Ok(entity.get(name)?.as_number().unwrap_or_default())
}

/// `Person { FirstName, LastName, FullName }`, with `FullName` calculated
/// as `"{FirstName} {LastName}"`.
pub fn person_model(config: ModelConfig) -> Result<(Model, EntityType)> {
    let model = Model::new(config);
    let person = model.define_type("Person", None)?;
    person.add_property(PropertyDef::new("FirstName", ValueType::string()))?;
    person.add_property(PropertyDef::new("LastName", ValueType::string()))?;
    person.add_property(PropertyDef::new("FullName", ValueType::string()))?;
    person
        .rule()
        .property("FullName")
        .on_change_of(["FirstName", "LastName"])
        .calculate(|p| {
            Ok(Value::from(format!(
                "{} {}",
                text(p, "FirstName")?,
                text(p, "LastName")?
            )))
        })?;
    Ok((model, person))
}

/// `Order { Lines: [Line], Total }` and `Line { Qty, Price, Amount }`.
///
/// `Line.Amount = Qty * Price` and `Order.Total = sum(Lines.Amount)`, the
/// latter depending on a chain through the list.
pub fn order_model(config: ModelConfig) -> Result<(Model, EntityType, EntityType)> {
    let model = Model::new(config);
    let line = model.define_type("Line", None)?;
    line.add_property(PropertyDef::new("Qty", ValueType::number()))?;
    line.add_property(PropertyDef::new("Price", ValueType::number()))?;
    line.add_property(PropertyDef::new("Amount", ValueType::number()))?;
    line.rule()
        .property("Amount")
        .on_change_of(["Qty", "Price"])
        .calculate(|l| Ok(Value::from(number(l, "Qty")? * number(l, "Price")?)))?;

    let order = model.define_type("Order", None)?;
    order.add_property(PropertyDef::new("Lines", ValueType::entity("Line")).list())?;
    order.add_property(PropertyDef::new("Total", ValueType::number()))?;
    let amounts = order.get_path("Lines.Amount")?;
    order
        .rule()
        .property("Total")
        .on_change_of(["Lines.Amount"])
        .calculate(move |o| {
            let total: f64 = amounts
                .values(o)?
                .iter()
                .filter_map(Value::as_number)
                .sum();
            Ok(Value::from(total))
        })?;
    Ok((model, order, line))
}

// ---------------------------------------------------------------------------
// Recorders
// ---------------------------------------------------------------------------

/// Captures every `changed` event of a property or entity.
pub struct ChangeRecorder {
    log: Rc<RefCell<Vec<PropertyChange>>>,
    _subscription: Subscription,
}

impl ChangeRecorder {
    /// Record changes of `property` on every instance.
    pub fn property(property: &Property) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let subscription = property.subscribe_changed(move |change| {
            sink.borrow_mut().push(change.clone());
            Ok(())
        });
        Self {
            log,
            _subscription: subscription,
        }
    }

    /// Record changes of any property of `entity`.
    pub fn entity(entity: &Entity) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let subscription = entity.changed().subscribe(move |change| {
            sink.borrow_mut().push(change.clone());
            Ok(())
        });
        Self {
            log,
            _subscription: subscription,
        }
    }

    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }

    pub fn changes(&self) -> Vec<PropertyChange> {
        self.log.borrow().clone()
    }

    /// `(old_value, new_value)` of each recorded change.
    pub fn transitions(&self) -> Vec<(Value, Value)> {
        self.log
            .borrow()
            .iter()
            .map(|change| (change.old_value.clone(), change.new_value.clone()))
            .collect()
    }

    /// Names of the changed properties, in order.
    pub fn property_names(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .map(|change| change.property.name().to_owned())
            .collect()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

/// Captures every change batch published by an [`ObservableList`].
pub struct ListRecorder<T> {
    log: Rc<RefCell<Vec<ListChange<T>>>>,
    _subscription: Subscription,
}

impl<T: Clone + PartialEq + 'static> ListRecorder<T> {
    pub fn new(list: &ObservableList<T>) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let subscription = list.subscribe(move |change| {
            sink.borrow_mut().push(change.clone());
            Ok(())
        });
        Self {
            log,
            _subscription: subscription,
        }
    }

    /// Number of published batches.
    pub fn batches(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn all(&self) -> Vec<ListChange<T>> {
        self.log.borrow().clone()
    }
}

/// Replay diff records onto `items`, the way a list observer would.
///
/// Reorder records carry only a span. The span's new order is the order
/// the survivors take in `desired`, i.e. `desired` without the added runs.
pub fn replay<T: Clone + PartialEq + Debug>(items: &mut Vec<T>, records: &[ChangeRecord<T>], desired: &[T]) {
    let mut settled = desired.to_vec();
    for record in records.iter().rev() {
        if let ChangeRecord::Add {
            start_index,
            end_index,
            ..
        } = record
        {
            settled.drain(*start_index..*end_index);
        }
    }

    for record in records {
        match record {
            ChangeRecord::Remove {
                start_index,
                end_index,
                items: removed,
            } => {
                let gone: Vec<T> = items.drain(*start_index..*end_index).collect();
                assert_eq!(&gone, removed, "removed items disagree with record");
            }
            ChangeRecord::Reorder {
                start_index,
                end_index,
            } => {
                let span = &settled[*start_index..*end_index];
                items.splice(*start_index..*end_index, span.iter().cloned());
            }
            ChangeRecord::Add {
                start_index,
                items: added,
                ..
            } => {
                items.splice(*start_index..*start_index, added.iter().cloned());
            }
            ChangeRecord::Replace { .. } => panic!("the differ never replaces in place"),
        }
    }
}

// ---------------------------------------------------------------------------
// Proptest strategies
// ---------------------------------------------------------------------------

/// Items drawn from a small shared alphabet so pairs overlap heavily.
pub fn item() -> impl Strategy<Value = u8> {
    0u8..12
}

/// Two sequences of up to `max_len` items from the shared alphabet.
pub fn sequence_pair(max_len: usize) -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    (
        prop::collection::vec(item(), 0..=max_len),
        prop::collection::vec(item(), 0..=max_len),
    )
}

/// A sequence and a shuffle of it.
pub fn permutation_pair(max_len: usize) -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    prop::collection::vec(item(), 0..=max_len)
        .prop_flat_map(|items| (Just(items.clone()), Just(items).prop_shuffle()))
}
