#![forbid(unsafe_code)]

//! Entity type descriptors.
//!
//! An [`EntityType`] has an optional parent, an owned property table, the
//! rules registered against it, and the init events its rules listen to.
//! Property lookup walks the parent chain explicitly. Known instances of a
//! type include the instances of every subtype.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::debug;

use crate::entity::{Entity, WeakEntity};
use crate::error::{ModelError, Result};
use crate::event::Event;
use crate::model::{Model, ModelInner};
use crate::path::{PropertyChain, PropertyPath, expand_paths, parse_steps};
use crate::property::{Property, PropertyDef};
use crate::rule::{Rule, RuleBuilder};

pub(crate) struct TypeInner {
    name: String,
    parent: Option<EntityType>,
    model: Weak<ModelInner>,
    properties: RefCell<Vec<Property>>,
    property_index: RefCell<AHashMap<String, Property>>,
    rules: RefCell<Vec<Rule>>,
    subtypes: RefCell<Vec<Weak<TypeInner>>>,
    instances: RefCell<Vec<WeakEntity>>,
    init_new: Event<Entity>,
    init_existing: Event<Entity>,
    path_cache: RefCell<AHashMap<String, PropertyPath>>,
}

/// A handle to a registered entity type.
#[derive(Clone)]
pub struct EntityType {
    inner: Rc<TypeInner>,
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.inner.name)
            .field("parent", &self.inner.parent.as_ref().map(EntityType::name))
            .field("properties", &self.inner.properties.borrow().len())
            .field("rules", &self.inner.rules.borrow().len())
            .finish()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl EntityType {
    pub(crate) fn new(name: &str, parent: Option<EntityType>, model: Weak<ModelInner>) -> Self {
        let ty = Self {
            inner: Rc::new(TypeInner {
                name: name.to_owned(),
                parent,
                model,
                properties: RefCell::new(Vec::new()),
                property_index: RefCell::new(AHashMap::new()),
                rules: RefCell::new(Vec::new()),
                subtypes: RefCell::new(Vec::new()),
                instances: RefCell::new(Vec::new()),
                init_new: Event::new(),
                init_existing: Event::new(),
                path_cache: RefCell::new(AHashMap::new()),
            }),
        };
        if let Some(parent) = &ty.inner.parent {
            parent
                .inner
                .subtypes
                .borrow_mut()
                .push(Rc::downgrade(&ty.inner));
        }
        ty
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&EntityType> {
        self.inner.parent.as_ref()
    }

    /// The owning model.
    pub fn model(&self) -> Result<Model> {
        self.inner
            .model
            .upgrade()
            .map(Model::from_inner)
            .ok_or(ModelError::ModelDropped)
    }

    /// Whether this type is `other` or derives from it.
    #[must_use]
    pub fn is_subtype_of(&self, other: &EntityType) -> bool {
        self.lineage().any(|ty| ty == other)
    }

    /// Whether this type is named `name` or derives from a type named `name`.
    #[must_use]
    pub fn is_named_or_derives(&self, name: &str) -> bool {
        self.lineage().any(|ty| ty.name() == name)
    }

    /// This type followed by its ancestors, nearest first.
    pub fn lineage(&self) -> impl Iterator<Item = &EntityType> {
        std::iter::successors(Some(self), |ty| ty.parent())
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    /// Declare a property on this type.
    pub fn add_property(&self, def: PropertyDef) -> Result<Property> {
        if self.find_property(&def.name).is_some() {
            return Err(ModelError::DuplicateProperty {
                type_name: self.inner.name.clone(),
                property: def.name,
            });
        }
        let property = Property::from_def(def, self);
        debug!(property = %property, "property defined");
        self.inner
            .property_index
            .borrow_mut()
            .insert(property.name().to_owned(), property.clone());
        self.inner.properties.borrow_mut().push(property.clone());
        Ok(property)
    }

    /// Look up a property declared on this type or an ancestor.
    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<Property> {
        self.lineage()
            .find_map(|ty| ty.inner.property_index.borrow().get(name).cloned())
    }

    /// Like [`find_property`](Self::find_property), failing with
    /// `UnknownPath`.
    pub fn property(&self, name: &str) -> Result<Property> {
        self.find_property(name).ok_or_else(|| ModelError::UnknownPath {
            path: name.to_owned(),
            type_name: self.inner.name.clone(),
            segment: name.to_owned(),
        })
    }

    /// Properties declared directly on this type, in declaration order.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        self.inner.properties.borrow().clone()
    }

    /// Properties of this type and its ancestors, base type first.
    #[must_use]
    pub fn all_properties(&self) -> Vec<Property> {
        let mut lineage: Vec<&EntityType> = self.lineage().collect();
        lineage.reverse();
        lineage.into_iter().flat_map(EntityType::properties).collect()
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    /// Resolve one dotted path, e.g. `"Address.City"` or
    /// `"Owner<Manager>.Reports"`.
    ///
    /// Resolved paths are cached per type, so equal text yields the same
    /// chain.
    pub fn get_path(&self, text: &str) -> Result<PropertyPath> {
        let mut paths = expand_paths(text)?;
        if paths.len() != 1 {
            return Err(ModelError::InvalidPath {
                path: text.to_owned(),
                reason: format!("expected a single path, found {}", paths.len()),
            });
        }
        let path = paths.remove(0);
        self.resolve(&path)
    }

    /// Resolve a comma-separated list of paths with brace groups, e.g.
    /// `"Name, Address{City,Zip}"`.
    pub fn get_paths(&self, text: &str) -> Result<Vec<PropertyPath>> {
        expand_paths(text)?
            .iter()
            .map(|path| self.resolve(path))
            .collect()
    }

    fn resolve(&self, path: &str) -> Result<PropertyPath> {
        if let Some(cached) = self.inner.path_cache.borrow().get(path) {
            return Ok(cached.clone());
        }
        let steps = parse_steps(path)?;
        let resolved = match steps.as_slice() {
            [single] if single.cast.is_none() => {
                let property = self.find_property(&single.name).ok_or_else(|| ModelError::UnknownPath {
                    path: path.to_owned(),
                    type_name: self.inner.name.clone(),
                    segment: single.name.clone(),
                })?;
                PropertyPath::Property(property)
            }
            _ => PropertyPath::Chain(PropertyChain::resolve(self, path, &steps)?),
        };
        debug!(root = %self, path, "path resolved");
        self.inner
            .path_cache
            .borrow_mut()
            .insert(path.to_owned(), resolved.clone());
        Ok(resolved)
    }

    // -----------------------------------------------------------------------
    // Rules and init events
    // -----------------------------------------------------------------------

    /// Start declaring a rule on this type.
    #[must_use]
    pub fn rule(&self) -> RuleBuilder {
        RuleBuilder::new(self)
    }

    /// Rules registered directly on this type.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.inner.rules.borrow().clone()
    }

    pub(crate) fn has_rule_named(&self, name: &str) -> bool {
        self.inner.rules.borrow().iter().any(|rule| rule.name() == name)
    }

    pub(crate) fn add_rule(&self, rule: Rule) {
        self.inner.rules.borrow_mut().push(rule);
    }

    /// Raised for every new instance of this type or a subtype.
    #[must_use]
    pub fn init_new(&self) -> &Event<Entity> {
        &self.inner.init_new
    }

    /// Raised for every loaded (existing) instance of this type or a subtype.
    #[must_use]
    pub fn init_existing(&self) -> &Event<Entity> {
        &self.inner.init_existing
    }

    /// Raise the init event on every type of `entity`'s lineage, base first.
    pub(crate) fn raise_init(&self, entity: &Entity, is_new: bool) -> Result<()> {
        let mut lineage: Vec<&EntityType> = self.lineage().collect();
        lineage.reverse();
        for ty in lineage {
            let event = if is_new {
                &ty.inner.init_new
            } else {
                &ty.inner.init_existing
            };
            event.publish(entity)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Live instances of this type and all subtypes.
    ///
    /// Order is stable: this type's instances in registration order, then
    /// each subtype's in declaration order.
    #[must_use]
    pub fn known_instances(&self) -> Vec<Entity> {
        let mut out = Vec::new();
        self.collect_instances(&mut out);
        out
    }

    fn collect_instances(&self, out: &mut Vec<Entity>) {
        out.extend(
            self.inner
                .instances
                .borrow()
                .iter()
                .filter_map(WeakEntity::upgrade),
        );
        let subtypes: Vec<EntityType> = self
            .inner
            .subtypes
            .borrow()
            .iter()
            .filter_map(|weak| weak.upgrade().map(|inner| EntityType { inner }))
            .collect();
        for subtype in subtypes {
            subtype.collect_instances(out);
        }
    }

    pub(crate) fn track_instance(&self, entity: &Entity) {
        self.inner.instances.borrow_mut().push(entity.downgrade());
    }

    pub(crate) fn forget_instance(&self, entity: &Entity) {
        self.inner
            .instances
            .borrow_mut()
            .retain(|weak| !weak.ptr_eq(entity) && weak.upgrade().is_some());
    }

    pub(crate) fn downgrade(&self) -> WeakEntityType {
        WeakEntityType(Rc::downgrade(&self.inner))
    }
}

/// Non-owning type handle.
#[derive(Clone)]
pub(crate) struct WeakEntityType(Weak<TypeInner>);

impl WeakEntityType {
    pub(crate) fn upgrade(&self) -> Option<EntityType> {
        self.0.upgrade().map(|inner| EntityType { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueType};

    fn hierarchy() -> (Model, EntityType, EntityType) {
        let model = Model::default();
        let person = model.define_type("Person", None).unwrap();
        person
            .add_property(PropertyDef::new("Name", ValueType::string()))
            .unwrap();
        let employee = model.define_type("Employee", Some("Person")).unwrap();
        employee
            .add_property(PropertyDef::new("Salary", ValueType::number()))
            .unwrap();
        (model, person, employee)
    }

    #[test]
    fn property_lookup_walks_parents() {
        let (_model, person, employee) = hierarchy();
        assert!(employee.find_property("Name").is_some());
        assert!(person.find_property("Salary").is_none());
        assert_eq!(
            employee
                .all_properties()
                .iter()
                .map(|p| p.name().to_owned())
                .collect::<Vec<_>>(),
            vec!["Name", "Salary"]
        );
    }

    #[test]
    fn duplicate_property_rejected_across_hierarchy() {
        let (_model, _person, employee) = hierarchy();
        let err = employee
            .add_property(PropertyDef::new("Name", ValueType::string()))
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateProperty { .. }));
    }

    #[test]
    fn known_instances_include_subtypes() {
        let (model, person, employee) = hierarchy();
        let p = model.create("Person", [("Name", "Pat")]).unwrap();
        let e = model.create("Employee", [("Name", "Eve")]).unwrap();

        assert_eq!(person.known_instances(), vec![p.clone(), e.clone()]);
        assert_eq!(employee.known_instances(), vec![e.clone()]);

        model.unregister(&e);
        assert_eq!(person.known_instances(), vec![p]);
    }

    #[test]
    fn init_events_fire_base_first() {
        let (model, person, employee) = hierarchy();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let _a = employee.init_new().subscribe(move |_| {
            o1.borrow_mut().push("Employee");
            Ok(())
        });
        let o2 = Rc::clone(&order);
        let _b = person.init_new().subscribe(move |_| {
            o2.borrow_mut().push("Person");
            Ok(())
        });

        model.create("Employee", Vec::<(&str, Value)>::new()).unwrap();
        assert_eq!(*order.borrow(), vec!["Person", "Employee"]);
    }

    #[test]
    fn single_segment_resolves_to_property_and_is_cached() {
        let (_model, _person, employee) = hierarchy();
        let path = employee.get_path("Name").unwrap();
        assert!(matches!(path, PropertyPath::Property(_)));
        assert!(employee.get_path("Name").unwrap() == path);
    }

    #[test]
    fn unknown_segment_names_type_and_path() {
        let (_model, person, _employee) = hierarchy();
        match person.get_path("Nickname").unwrap_err() {
            ModelError::UnknownPath {
                type_name, segment, ..
            } => {
                assert_eq!(type_name, "Person");
                assert_eq!(segment, "Nickname");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
