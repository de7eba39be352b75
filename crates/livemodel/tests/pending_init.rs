#![forbid(unsafe_code)]

//! Pending-init lifecycle of entity fields.

use livemodel::{Model, ModelConfig, PropertyDef, Value, ValueType};
use livemodel_harness::{ChangeRecorder, init_test_logging, person_model};

fn profile() -> Model {
    let model = Model::default();
    let ty = model.define_type("Profile", None).unwrap();
    ty.add_property(PropertyDef::new("Nickname", ValueType::string()))
        .unwrap();
    ty.add_property(PropertyDef::new("Visits", ValueType::number()))
        .unwrap();
    ty.add_property(PropertyDef::new("Active", ValueType::boolean()))
        .unwrap();
    ty.add_property(PropertyDef::new("Tags", ValueType::string()).list())
        .unwrap();
    ty.add_property(
        PropertyDef::new("Greeting", ValueType::string())
            .default_with(|p| Value::from(format!("Hello {}", p.id()))),
    )
    .unwrap();
    ty.add_property(PropertyDef::new("Initials", ValueType::string()))
        .unwrap();
    ty.rule()
        .property("Initials")
        .on_init(false)
        .calculate(|p| {
            let nickname = p.get("Nickname")?;
            Ok(match nickname.as_str() {
                Some(name) => Value::from(name.chars().take(2).collect::<String>()),
                None => Value::Undefined,
            })
        })
        .unwrap();
    model
}

#[test]
fn fresh_entity_fields_are_pending_until_read() {
    init_test_logging();
    let model = profile();
    let p = model.create("Profile", Vec::<(&str, Value)>::new()).unwrap();
    for name in ["Nickname", "Visits", "Active", "Tags", "Greeting", "Initials"] {
        assert!(p.is_pending_init(name).unwrap(), "{name} should start pending");
    }

    assert_eq!(p.get("Visits").unwrap(), Value::from(0));
    assert_eq!(p.get("Active").unwrap(), Value::from(false));
    assert_eq!(p.get("Nickname").unwrap(), Value::Null);
    assert_eq!(p.get("Tags").unwrap().as_list().map(|l| l.len()), Some(0));
    assert_eq!(
        p.get("Greeting").unwrap(),
        Value::from(format!("Hello {}", p.id()))
    );
    for name in ["Nickname", "Visits", "Active", "Tags", "Greeting"] {
        assert!(!p.is_pending_init(name).unwrap(), "{name} should be initialized");
    }
}

#[test]
fn explicit_values_including_null_clear_pending_init() {
    init_test_logging();
    let model = profile();
    let p = model
        .create("Profile", [("Nickname", Value::Null), ("Visits", Value::from(3))])
        .unwrap();
    assert!(!p.is_pending_init("Nickname").unwrap());
    assert!(!p.is_pending_init("Visits").unwrap());
    assert!(p.is_pending_init("Active").unwrap());
}

#[test]
fn first_write_clears_pending_init() {
    init_test_logging();
    let model = profile();
    let p = model.create("Profile", Vec::<(&str, Value)>::new()).unwrap();
    p.set("Active", true).unwrap();
    assert!(!p.is_pending_init("Active").unwrap());
    assert_eq!(p.get("Active").unwrap(), Value::from(true));
}

#[test]
fn calculated_field_stays_pending_until_computable() {
    init_test_logging();
    let model = profile();
    let p = model.create("Profile", Vec::<(&str, Value)>::new()).unwrap();

    assert_eq!(p.get("Initials").unwrap(), Value::Undefined);
    assert!(p.is_pending_init("Initials").unwrap());

    p.set("Nickname", "Ada").unwrap();
    assert!(p.is_pending_init("Initials").unwrap(), "no dependency declared");
    assert_eq!(p.get("Initials").unwrap(), Value::from("Ad"));
    assert!(!p.is_pending_init("Initials").unwrap());
}

#[test]
fn loaded_instance_is_not_recalculated_on_init_new() {
    init_test_logging();
    let (model, person) = person_model(ModelConfig::default()).unwrap();
    let recorder = ChangeRecorder::property(&person.property("FullName").unwrap());
    let loaded = model
        .load("Person", [("FirstName", "Ada"), ("LastName", "Lovelace")])
        .unwrap();

    assert!(recorder.is_empty(), "existing instances compute silently");
    assert_eq!(loaded.get("FullName").unwrap(), Value::from("Ada Lovelace"));

    let created = model
        .create("Person", [("FirstName", "Alan"), ("LastName", "Turing")])
        .unwrap();
    assert_eq!(recorder.len(), 1);
    assert_eq!(recorder.changes()[0].entity, created);
}

#[test]
fn unknown_property_is_reported() {
    init_test_logging();
    let model = profile();
    let p = model.create("Profile", Vec::<(&str, Value)>::new()).unwrap();
    assert!(p.is_pending_init("Missing").is_err());
    assert!(p.get("Missing").is_err());
}
