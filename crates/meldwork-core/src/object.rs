//! Composed objects.
//!
//! An `Instance` is a shared handle to one object's state: merged
//! properties, live policy map, inherited pattern snapshots, phase states and
//! built children. Borrows of the state are kept short and never held while
//! user functions run, so methods are free to read and write `this`.

use crate::error::{Error, Result};
use crate::idea::Idea;
use crate::mirror::StaticSlot;
use crate::moc::PolicyMap;
use crate::observer::{Change, Observers};
use crate::ordered::OrderedMap;
use crate::phase::{PhaseState, PhaseTarget};
use crate::runtime::Runtime;
use crate::value::{Props, Value};
use crate::IDEA_LAYER;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::warn;
use uuid::Uuid;

/// Nested idea the builder phase constructed, keyed by dotted path.
#[derive(Clone, Debug)]
pub struct BuiltChild {
    pub idea: Rc<Idea>,
    pub instance: Option<Instance>,
}

pub(crate) struct ObjectState {
    pub(crate) id: Uuid,
    pub(crate) pattern: String,
    pub(crate) args: Vec<Value>,
    /// Applied ancestors in mixin order, ending with the idea layer.
    pub(crate) inherits: Vec<String>,
    /// The exact idea applied for each entry of `inherits`.
    pub(crate) snapshots: HashMap<String, Rc<Idea>>,
    pub(crate) props: Props,
    pub(crate) moc: PolicyMap,
    pub(crate) phases: HashMap<String, PhaseState>,
    pub(crate) built_to: Option<PhaseTarget>,
    pub(crate) machine_live: bool,
    pub(crate) built_children: OrderedMap<BuiltChild>,
    pub(crate) builder: Option<Weak<RefCell<ObjectState>>>,
    pub(crate) path: Option<String>,
    pub(crate) mirrors: HashMap<String, StaticSlot>,
    pub(crate) observers: Observers,
    pub(crate) runtime: Runtime,
}

impl ObjectState {
    /// Mirror-aware read.
    pub(crate) fn read(&self, key: &str) -> Value {
        match self.mirrors.get(key) {
            Some(slot) => slot.get(),
            None => self.props.get(key).cloned().unwrap_or_default(),
        }
    }

    /// Raw write: mirror first, then the local table.
    pub(crate) fn write(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.mirrors.get(key) {
            slot.set(value.clone());
        }
        self.props.insert(key, value);
    }

    /// Snapshots in mixin order.
    pub(crate) fn layers(&self) -> impl Iterator<Item = (&str, &Rc<Idea>)> {
        self.inherits
            .iter()
            .filter_map(|name| self.snapshots.get(name).map(|idea| (name.as_str(), idea)))
    }
}

#[derive(Clone)]
pub struct Instance(Rc<RefCell<ObjectState>>);

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_borrow() {
            Ok(state) => f
                .debug_struct("Instance")
                .field("id", &state.id)
                .field("pattern", &state.pattern)
                .field("inherits", &state.inherits)
                .finish(),
            Err(_) => write!(f, "Instance(<busy>)"),
        }
    }
}

impl Instance {
    pub(crate) fn create(runtime: &Runtime, pattern: &str, args: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(ObjectState {
            id: Uuid::new_v4(),
            pattern: pattern.to_string(),
            args,
            inherits: Vec::new(),
            snapshots: HashMap::new(),
            props: Props::new(),
            moc: PolicyMap::new(),
            phases: HashMap::new(),
            built_to: None,
            machine_live: false,
            built_children: OrderedMap::new(),
            builder: None,
            path: None,
            mirrors: HashMap::new(),
            observers: Observers::default(),
            runtime: runtime.clone(),
        })))
    }

    pub(crate) fn state(&self) -> Ref<'_, ObjectState> {
        self.0.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, ObjectState> {
        self.0.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<ObjectState>> {
        Rc::downgrade(&self.0)
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn id(&self) -> Uuid {
        self.state().id
    }

    /// Primary pattern the object was built as.
    pub fn pattern(&self) -> String {
        self.state().pattern.clone()
    }

    pub fn args(&self) -> Vec<Value> {
        self.state().args.clone()
    }

    pub fn runtime(&self) -> Runtime {
        self.state().runtime.clone()
    }

    /// Applied ancestors in order, ending with the idea layer.
    pub fn inherits(&self) -> Vec<String> {
        self.state().inherits.clone()
    }

    pub fn instance_of(&self, pattern: &str) -> bool {
        pattern != IDEA_LAYER && self.state().snapshots.contains_key(pattern)
    }

    /// The idea applied for `pattern`, if it was mixed in.
    pub fn snapshot(&self, pattern: &str) -> Option<Rc<Idea>> {
        self.state().snapshots.get(pattern).cloned()
    }

    pub fn get(&self, key: &str) -> Value {
        self.state().read(key)
    }

    pub fn has(&self, key: &str) -> bool {
        let state = self.state();
        state.mirrors.contains_key(key) || state.props.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().props.keys().map(String::from).collect()
    }

    /// Copy of the current property table, mirrors resolved.
    pub fn props(&self) -> Props {
        let state = self.state();
        state
            .props
            .keys()
            .map(|k| (k.to_string(), state.read(k)))
            .collect()
    }

    /// Assign one property. Type contracts are checked against the new value:
    /// soft when the old value is unset, an error otherwise. Observers of the
    /// property get a queued change.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut state = self.state_mut();
        let old = state.read(key);
        if old == value {
            return Ok(());
        }
        if let Some(op) = state.moc.resolve(key).and_then(|p| p.violation(&value)) {
            if !old.is_falsy() {
                return Err(Error::type_violation(key, op.name.clone(), value.type_name()));
            }
            warn!("{} rejects '{}' ({}), old value unset", op.name, key, value.type_name());
        }
        if state.observers.watches(key) {
            let limit = state.runtime.config().observer_queue_limit;
            let change = Change {
                property: key.to_string(),
                old,
                new: value.clone(),
            };
            state.observers.enqueue(change, limit)?;
        }
        state.write(key, value);
        Ok(())
    }

    /// Remove a property and its policy.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let mut state = self.state_mut();
        state.mirrors.remove(key);
        state.moc.delete(key);
        state.props.remove(key)
    }

    /// Read `key` here, else on the builder chain above.
    pub fn lookup(&self, key: &str) -> Value {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if object.has(key) {
                return object.get(key);
            }
            current = object.builder();
        }
        Value::Undefined
    }

    /// Object whose builder phase constructed this one.
    pub fn builder(&self) -> Option<Instance> {
        let state = self.state();
        state.builder.as_ref().and_then(Weak::upgrade).map(Instance)
    }

    /// Dotted path under the builder.
    pub fn path(&self) -> Option<String> {
        self.state().path.clone()
    }

    pub fn built_children(&self) -> Vec<(String, BuiltChild)> {
        self.state()
            .built_children
            .iter()
            .map(|(k, c)| (k.to_string(), c.clone()))
            .collect()
    }

    /// Built child at `path`.
    pub fn child(&self, path: &str) -> Option<Instance> {
        self.state()
            .built_children
            .get(path)
            .and_then(|c| c.instance.clone())
    }

    /// Snapshot of the live policy map.
    pub fn policy(&self) -> PolicyMap {
        self.state().moc.clone()
    }

    /// Declare policy for `prop` after construction.
    pub fn set_policy(&self, prop: &str, spec: impl Into<crate::moc::PolicySpec>) -> Result<()> {
        let runtime = self.runtime();
        let ops = runtime.ops();
        let pattern = self.pattern();
        self.state_mut()
            .moc
            .set(prop, &spec.into(), &ops, Some(&pattern))
    }

    /// Pattern whose layer last defined `key`.
    pub fn origin_of(&self, key: &str) -> Option<String> {
        let state = self.state();
        state
            .layers()
            .filter(|(_, idea)| idea.props.contains_key(key))
            .last()
            .map(|(name, _)| name.to_string())
    }

    /// Whether `key` belongs in exports under the current policy.
    fn exported(state: &ObjectState, key: &str, value: &Value, methods: bool) -> bool {
        if value.is_undefined() || (value.is_callable() && !methods) {
            return false;
        }
        match state.moc.get(key) {
            Some(policy) => !policy.is_private() && policy.is_exported(),
            None => true,
        }
    }

    fn declared_in(state: &ObjectState, key: &str, filter: Option<&[&str]>) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        state.layers().any(|(name, idea)| {
            filter.contains(&name) && (idea.props.contains_key(key) || idea.policy.contains_key(key))
        })
    }

    /// Current exportable properties, restricted to keys declared by the
    /// patterns in `filter` when one is given.
    pub fn perspective(&self, filter: Option<&[&str]>, methods: bool) -> Props {
        let state = self.state();
        let mut out = Props::new();
        for key in state.props.keys() {
            let value = state.read(key);
            if Self::exported(&state, key, &value, methods) && Self::declared_in(&state, key, filter) {
                out.insert(key, value);
            }
        }
        out
    }

    /// Back to an idea. `active` exports current values; otherwise the
    /// values the filtered layers declared are folded together.
    pub fn idealize(&self, filter: Option<&[&str]>, active: bool) -> Idea {
        let props = if active {
            self.perspective(filter, false)
        } else {
            let state = self.state();
            let mut props = Props::new();
            for (name, idea) in state.layers() {
                if filter.is_some_and(|f| !f.contains(&name)) {
                    continue;
                }
                for (key, value) in idea.props.iter() {
                    if Self::exported(&state, key, value, false) {
                        props.insert(key, value.clone());
                    }
                }
            }
            props
        };
        let state = self.state();
        let mut idea = Idea::of(state.pattern.clone());
        for name in state.inherits.iter().filter(|n| n.as_str() != IDEA_LAYER) {
            if filter.map_or(true, |f| f.contains(&name.as_str())) {
                idea.inherits.insert(name.clone(), crate::idea::InheritMarker::Hard);
            }
        }
        idea.props = props;
        idea
    }

    /// Export current properties as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        crate::value::props_to_json(&self.perspective(None, false))
    }
}
