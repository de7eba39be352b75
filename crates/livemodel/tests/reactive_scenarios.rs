#![forbid(unsafe_code)]

//! End-to-end scenarios: calculated properties, chains through lists,
//! batching, and the cascade bounds of the execution scope.

use std::cell::Cell;
use std::rc::Rc;

use livemodel::{Model, ModelConfig, ModelError, PropertyDef, Value, ValueType};
use livemodel_harness::{ChangeRecorder, init_test_logging, order_model, person_model};

fn number(value: Value) -> f64 {
    value.as_number().unwrap_or(f64::NAN)
}

// ============================================================================
// Calculated properties
// ============================================================================

#[test]
fn full_name_follows_first_name() {
    init_test_logging();
    let (model, person) = person_model(ModelConfig::default()).unwrap();
    let jane = model
        .create("Person", [("FirstName", "Jane"), ("LastName", "Doe")])
        .unwrap();
    assert_eq!(jane.get("FullName").unwrap(), Value::from("Jane Doe"));

    let recorder = ChangeRecorder::property(&person.property("FullName").unwrap());
    jane.set("FirstName", "June").unwrap();

    assert_eq!(recorder.len(), 1);
    assert_eq!(
        recorder.transitions(),
        vec![(Value::from("Jane Doe"), Value::from("June Doe"))]
    );
    assert_eq!(
        recorder.changes()[0].extra.rule.as_deref(),
        Some("Person.FullName.Calculated")
    );
}

#[test]
fn entity_change_event_sees_source_then_calculated() {
    init_test_logging();
    let (model, _person) = person_model(ModelConfig::default()).unwrap();
    let jane = model
        .create("Person", [("FirstName", "Jane"), ("LastName", "Doe")])
        .unwrap();
    let recorder = ChangeRecorder::entity(&jane);

    jane.set("LastName", "Roe").unwrap();
    assert_eq!(recorder.property_names(), vec!["LastName", "FullName"]);
}

#[test]
fn unchanged_assignment_does_not_recalculate() {
    init_test_logging();
    let (model, person) = person_model(ModelConfig::default()).unwrap();
    let jane = model
        .create("Person", [("FirstName", "Jane"), ("LastName", "Doe")])
        .unwrap();
    let recorder = ChangeRecorder::property(&person.property("FullName").unwrap());

    jane.set("FirstName", "Jane").unwrap();
    assert!(recorder.is_empty());
}

#[test]
fn batched_writes_recalculate_once() {
    init_test_logging();
    let (model, person) = person_model(ModelConfig::default()).unwrap();
    let jane = model
        .create("Person", [("FirstName", "Jane"), ("LastName", "Doe")])
        .unwrap();
    let recorder = ChangeRecorder::property(&person.property("FullName").unwrap());

    model
        .perform(|| {
            jane.set("FirstName", "John")?;
            jane.set("LastName", "Smith")
        })
        .unwrap();
    assert_eq!(
        recorder.transitions(),
        vec![(Value::from("Jane Doe"), Value::from("John Smith"))]
    );
}

// ============================================================================
// Chains through lists
// ============================================================================

#[test]
fn order_total_tracks_lines() {
    init_test_logging();
    let (model, _order, _line) = order_model(ModelConfig::default()).unwrap();
    let l1 = model.create("Line", [("Qty", 2), ("Price", 5)]).unwrap();
    let l2 = model.create("Line", [("Qty", 1), ("Price", 3)]).unwrap();
    let order = model
        .create("Order", [("Lines", Value::list([l1.clone(), l2.clone()]))])
        .unwrap();
    assert_eq!(number(order.get("Total").unwrap()), 13.0);

    l1.set("Qty", 3).unwrap();
    assert_eq!(number(order.get("Total").unwrap()), 18.0);

    let lines = order.get("Lines").unwrap();
    let lines = lines.as_list().unwrap();
    let l3 = model.create("Line", [("Qty", 4), ("Price", 1)]).unwrap();
    lines.push(Value::from(&l3)).unwrap();
    assert_eq!(number(order.get("Total").unwrap()), 22.0);

    assert!(lines.remove_item(&Value::from(&l1)).unwrap());
    assert_eq!(number(order.get("Total").unwrap()), 7.0);

    // No longer connected.
    l1.set("Qty", 100).unwrap();
    assert_eq!(number(order.get("Total").unwrap()), 7.0);
}

#[test]
fn failing_cascade_is_returned_by_the_list_mutation() {
    init_test_logging();
    let (model, order_type, _line) = order_model(ModelConfig::default()).unwrap();
    let l1 = model.create("Line", [("Qty", 1), ("Price", 1)]).unwrap();
    let order = model
        .create("Order", [("Lines", Value::list([l1.clone()]))])
        .unwrap();
    order_type
        .rule()
        .name("RejectLines")
        .on_change_of(["Lines"])
        .execute(|_| Err(ModelError::custom("rule exploded")))
        .unwrap();

    let lines = order.get("Lines").unwrap();
    let lines = lines.as_list().unwrap();
    let l2 = model.create("Line", [("Qty", 2), ("Price", 2)]).unwrap();
    let err = lines.push(Value::from(&l2)).unwrap_err();
    assert_eq!(
        err,
        ModelError::RuleFailed {
            rule: "RejectLines".to_owned(),
            message: "rule exploded".to_owned(),
        }
    );
    // The mutation itself stands.
    assert_eq!(lines.len(), 2);

    let err = order
        .entity_type()
        .property("Lines")
        .unwrap()
        .update_list(&order, &[])
        .unwrap_err();
    assert!(matches!(err, ModelError::RuleFailed { .. }));
    assert!(lines.is_empty());
}

#[test]
fn list_mutation_reports_runaway_cascade() {
    init_test_logging();
    let model = Model::new(ModelConfig::default().with_max_transfer_count(5));
    let bag = model.define_type("Bag", None).unwrap();
    bag.add_property(PropertyDef::new("Items", ValueType::number()).list())
        .unwrap();
    bag.rule()
        .on_change_of(["Items"])
        .execute(|b| {
            let items = b.get("Items")?;
            let Some(items) = items.as_list() else {
                return Ok(());
            };
            items.push(Value::from(items.len() as f64))
        })
        .unwrap();

    let b = model.create("Bag", [("Items", Value::list([0]))]).unwrap();
    let items = b.get("Items").unwrap();
    let err = items.as_list().unwrap().push(Value::from(1)).unwrap_err();
    assert!(err.is_cascade_limit(), "unexpected error {err:?}");
}

#[test]
fn leaf_change_reaches_only_connected_orders() {
    init_test_logging();
    let (model, order_type, _line) = order_model(ModelConfig::default()).unwrap();
    let shared = model.create("Line", [("Qty", 1), ("Price", 1)]).unwrap();
    let own = model.create("Line", [("Qty", 1), ("Price", 2)]).unwrap();
    for i in 0..100 {
        model.create("Line", [("Qty", i), ("Price", 1)]).unwrap();
    }
    let a = model
        .create("Order", [("Lines", Value::list([shared.clone()]))])
        .unwrap();
    let b = model
        .create("Order", [("Lines", Value::list([shared.clone(), own.clone()]))])
        .unwrap();
    let c = model
        .create("Order", [("Lines", Value::list([own.clone()]))])
        .unwrap();

    let recorder = ChangeRecorder::property(&order_type.property("Total").unwrap());
    shared.set("Price", 10).unwrap();

    let changed: Vec<_> = recorder.changes().into_iter().map(|c| c.entity).collect();
    assert_eq!(changed, vec![a.clone(), b.clone()]);
    assert_eq!(number(a.get("Total").unwrap()), 10.0);
    assert_eq!(number(b.get("Total").unwrap()), 12.0);
    assert_eq!(number(c.get("Total").unwrap()), 2.0);
}

#[test]
fn reordering_lines_keeps_total() {
    init_test_logging();
    let (model, order_type, _line) = order_model(ModelConfig::default()).unwrap();
    let l1 = model.create("Line", [("Qty", 1), ("Price", 1)]).unwrap();
    let l2 = model.create("Line", [("Qty", 1), ("Price", 2)]).unwrap();
    let order = model
        .create("Order", [("Lines", Value::list([l1.clone(), l2.clone()]))])
        .unwrap();
    let total = ChangeRecorder::property(&order_type.property("Total").unwrap());
    let lines = ChangeRecorder::property(&order_type.property("Lines").unwrap());

    order_type
        .property("Lines")
        .unwrap()
        .update_list(&order, &[Value::from(&l2), Value::from(&l1)])
        .unwrap();

    assert_eq!(lines.len(), 1);
    assert!(lines.changes()[0].collection_changed);
    assert!(total.is_empty(), "same sum, no change event");
}

// ============================================================================
// Cascade bounds
// ============================================================================

fn ping_pong(config: ModelConfig) -> Model {
    let model = Model::new(config);
    let ty = model.define_type("PingPong", None).unwrap();
    ty.add_property(PropertyDef::new("A", ValueType::number())).unwrap();
    ty.add_property(PropertyDef::new("B", ValueType::number())).unwrap();
    ty.rule()
        .on_change_of(["A"])
        .execute(|e| {
            let a = e.get("A")?.as_number().unwrap_or_default();
            e.set("B", a + 1.0)
        })
        .unwrap();
    ty.rule()
        .on_change_of(["B"])
        .execute(|e| {
            let b = e.get("B")?.as_number().unwrap_or_default();
            e.set("A", b + 1.0)
        })
        .unwrap();
    model
}

#[test]
fn mutually_triggering_rules_hit_transfer_limit() {
    init_test_logging();
    let model = ping_pong(ModelConfig::default().with_max_transfer_count(10));
    let e = model.create("PingPong", [("A", 0), ("B", 0)]).unwrap();

    let err = e.set("A", 1).unwrap_err();
    assert_eq!(err, ModelError::TransferLimitExceeded { limit: 10 });
    assert!(!model.scope().is_active(), "scope stack unwinds after the error");

    // The model stays usable.
    let err = e.set("A", -100).unwrap_err();
    assert!(err.is_cascade_limit());
}

#[test]
fn mutually_dependent_calculations_hit_depth_limit() {
    init_test_logging();
    let model = Model::new(ModelConfig::default().with_max_scope_depth(12));
    let ty = model.define_type("Knot", None).unwrap();
    ty.add_property(PropertyDef::new("X", ValueType::number())).unwrap();
    ty.add_property(PropertyDef::new("Y", ValueType::number())).unwrap();
    ty.rule()
        .property("X")
        .on_init(false)
        .calculate(|k| Ok(Value::from(k.get("Y")?.as_number().unwrap_or_default() + 1.0)))
        .unwrap();
    ty.rule()
        .property("Y")
        .on_init(false)
        .calculate(|k| Ok(Value::from(k.get("X")?.as_number().unwrap_or_default() + 1.0)))
        .unwrap();

    let knot = model.create("Knot", Vec::<(&str, Value)>::new()).unwrap();
    let err = knot.get("X").unwrap_err();
    assert_eq!(err, ModelError::DepthLimitExceeded { limit: 12 });
    assert!(!model.scope().is_active());
}

#[test]
fn converging_rules_settle_below_the_limit() {
    init_test_logging();
    let model = Model::new(ModelConfig::default().with_max_transfer_count(10));
    let ty = model.define_type("Clamp", None).unwrap();
    ty.add_property(PropertyDef::new("Value", ValueType::number()))
        .unwrap();
    let runs = Rc::new(Cell::new(0));
    let r = Rc::clone(&runs);
    ty.rule()
        .on_change_of(["Value"])
        .execute(move |e| {
            r.set(r.get() + 1);
            let v = e.get("Value")?.as_number().unwrap_or_default();
            if v > 3.0 {
                e.set("Value", v - 1.0)
            } else {
                Ok(())
            }
        })
        .unwrap();

    let e = model.create("Clamp", [("Value", 0)]).unwrap();
    e.set("Value", 7).unwrap();
    assert_eq!(number(e.get("Value").unwrap()), 3.0);
    assert_eq!(runs.get(), 5);
}
