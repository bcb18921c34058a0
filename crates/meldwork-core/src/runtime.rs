//! The runtime service: pattern table, op registry, inheritance edges,
//! static slots and singleton instances.
//!
//! Nothing here is a language-level global. A `Runtime` is a cheap-clone
//! handle; tests build isolated ones, callers that want process-wide
//! behaviour use `Runtime::global()`.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::idea::{Idea, Inherits};
use crate::mirror::StaticSlot;
use crate::moc::{PolicyMap, PolicySpec};
use crate::object::Instance;
use crate::phase::{BUILDER_PHASE, OBJECT_PHASE};
use crate::policy::{PolicyRegistry, ShapeFn, Track};
use crate::value::{Props, Value};
use crate::ROOT_PATTERN;
use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// A registered pattern.
#[derive(Debug)]
pub struct Pattern {
    pub name: String,
    /// Normalized inherits; at least one hard ancestor unless this is the root.
    pub inherits: Inherits,
    pub idea: Rc<Idea>,
    /// Policy declared by the idea, already validated.
    pub moc: PolicyMap,
    pub singleton: bool,
}

/// Produces the base property layer of a new object before any pattern is
/// mixed in.
pub trait BaseConstructor {
    fn construct(&self, pattern: &str, args: &[Value]) -> Props;
}

/// Default constructor: a shared base layer copied under every new object.
/// Empty unless a host installs one with `LayeredConstructor::new`.
#[derive(Default)]
pub struct LayeredConstructor {
    base: Props,
}

impl LayeredConstructor {
    pub fn new(base: Props) -> Self {
        Self { base }
    }
}

impl BaseConstructor for LayeredConstructor {
    fn construct(&self, _pattern: &str, _args: &[Value]) -> Props {
        self.base.clone()
    }
}

#[derive(Default)]
pub(crate) struct PatternTable {
    patterns: HashMap<String, Rc<Pattern>>,
    order: Vec<String>,
    descendants: HashMap<String, Vec<String>>,
    resolved: HashMap<String, Vec<String>>,
}

impl PatternTable {
    pub(crate) fn get(&self, name: &str) -> Option<&Rc<Pattern>> {
        self.patterns.get(name)
    }

    fn insert(&mut self, pattern: Pattern) -> Rc<Pattern> {
        let name = pattern.name.clone();
        if let Some(old) = self.patterns.get(&name).cloned() {
            for ancestor in old.inherits.names() {
                if let Some(list) = self.descendants.get_mut(ancestor) {
                    list.retain(|d| d != &name);
                }
            }
        } else {
            self.order.push(name.clone());
        }
        for ancestor in pattern.inherits.names() {
            let list = self.descendants.entry(ancestor.to_string()).or_default();
            if !list.contains(&name) {
                list.push(name.clone());
            }
        }
        let pattern = Rc::new(pattern);
        self.patterns.insert(name, pattern.clone());
        self.resolved.clear();
        pattern
    }
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    ops: RefCell<PolicyRegistry>,
    pub(crate) patterns: RefCell<PatternTable>,
    pub(crate) statics: RefCell<HashMap<(String, String), StaticSlot>>,
    singletons: RefCell<HashMap<String, Instance>>,
    constructor: RefCell<Rc<dyn BaseConstructor>>,
}

#[derive(Clone)]
pub struct Runtime(pub(crate) Rc<RuntimeInner>);

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static GLOBAL: Runtime = Runtime::new();
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let rt = Self(Rc::new(RuntimeInner {
            config,
            ops: RefCell::new(PolicyRegistry::with_builtins()),
            patterns: RefCell::new(PatternTable::default()),
            statics: RefCell::new(HashMap::new()),
            singletons: RefCell::new(HashMap::new()),
            constructor: RefCell::new(Rc::new(LayeredConstructor::default())),
        }));
        if let Err(e) = rt.pattern(ROOT_PATTERN, (), Idea::new()) {
            warn!("Failed to register root pattern: {}", e);
        }
        rt
    }

    /// Process-default runtime for the current thread.
    pub fn global() -> Self {
        GLOBAL.with(Runtime::clone)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn ops(&self) -> Ref<'_, PolicyRegistry> {
        self.0.ops.borrow()
    }

    /// Add a merge op. See `PolicyRegistry::register_op`.
    pub fn register_op(
        &self,
        name: &str,
        track: Track,
        shape: Option<ShapeFn>,
        default: Option<Value>,
        lock_track: bool,
    ) {
        self.0
            .ops
            .borrow_mut()
            .register_op(name, track, shape, default, lock_track);
    }

    pub fn set_constructor(&self, constructor: impl BaseConstructor + 'static) {
        *self.0.constructor.borrow_mut() = Rc::new(constructor);
    }

    pub(crate) fn constructor(&self) -> Rc<dyn BaseConstructor> {
        self.0.constructor.borrow().clone()
    }

    /// Register (or overwrite) a pattern.
    pub fn pattern(
        &self,
        name: &str,
        inherits: impl Into<Inherits>,
        mut idea: Idea,
    ) -> Result<Rc<Pattern>> {
        let mut declared: Inherits = inherits.into();
        declared.extend(&idea.inherits);

        let inherits = if name == ROOT_PATTERN {
            if !declared.is_empty() {
                warn!("Root pattern '{}' cannot inherit; ignoring its inherits", name);
            }
            for phase in [OBJECT_PHASE, BUILDER_PHASE] {
                if !idea.policy.contains_key(phase) {
                    idea.policy.insert(phase, PolicySpec::from("phase"));
                }
            }
            Inherits::none()
        } else {
            let mut normalized = Inherits::none();
            if !declared.has_hard() {
                normalized = normalized.hard(ROOT_PATTERN);
            }
            for (ancestor, marker) in declared.iter() {
                if ancestor == name {
                    warn!("Pattern '{}' lists itself as an ancestor; ignoring", name);
                    continue;
                }
                normalized.insert(ancestor, marker.clone());
            }
            normalized
        };

        let mut moc = PolicyMap::new();
        {
            let ops = self.ops();
            for (prop, spec) in idea.policy.iter() {
                moc.set(prop, spec, &ops, Some(name))?;
            }
        }
        for (prop, policy) in moc.iter() {
            if idea.props.contains_key(prop) {
                continue;
            }
            if let Some(default) = policy.default_value() {
                idea.props.insert(prop, default);
            }
        }
        let singleton = idea.get("is_singleton").and_then(Value::as_bool) == Some(true);
        idea.inherits = Inherits::none();

        debug!(
            "Registered pattern '{}' ({} props, {} inherits)",
            name,
            idea.props.len(),
            inherits.len()
        );
        let pattern = Pattern {
            name: name.to_string(),
            inherits,
            idea: Rc::new(idea),
            moc,
            singleton,
        };
        Ok(self.0.patterns.borrow_mut().insert(pattern))
    }

    pub fn get_pattern(&self, name: &str) -> Option<Rc<Pattern>> {
        self.0.patterns.borrow().get(name).cloned()
    }

    pub fn has_pattern(&self, name: &str) -> bool {
        self.0.patterns.borrow().get(name).is_some()
    }

    /// Registered pattern names in first-registration order.
    pub fn pattern_names(&self) -> Vec<String> {
        self.0.patterns.borrow().order.clone()
    }

    /// Patterns that directly declare `name` as an ancestor (hard or soft).
    pub fn descendants_of(&self, name: &str) -> Vec<String> {
        self.0
            .patterns
            .borrow()
            .descendants
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Full hard ancestor list of `name`, itself included. Cached until the
    /// next registration.
    pub fn resolved_inherits(&self, name: &str) -> Vec<String> {
        if let Some(hit) = self.0.patterns.borrow().resolved.get(name) {
            return hit.clone();
        }
        let resolved = self.extend_inherits(&Inherits::from(name), false);
        self.0
            .patterns
            .borrow_mut()
            .resolved
            .insert(name.to_string(), resolved.clone());
        resolved
    }

    pub fn instance_of(&self, object: &Instance, pattern: &str) -> bool {
        object.instance_of(pattern)
    }

    /// Live singleton instance for any singleton pattern in `ancestors`.
    pub(crate) fn find_singleton(&self, ancestors: &[String]) -> Option<Instance> {
        let singletons = self.0.singletons.borrow();
        ancestors
            .iter()
            .find_map(|name| singletons.get(name).cloned())
    }

    pub(crate) fn claim_singletons(&self, ancestors: &[String], instance: &Instance) {
        let mut singletons = self.0.singletons.borrow_mut();
        for name in ancestors {
            let flagged = self.get_pattern(name).is_some_and(|p| p.singleton);
            if flagged && !singletons.contains_key(name) {
                debug!("Instance {} is the singleton for '{}'", instance.id(), name);
                singletons.insert(name.clone(), instance.clone());
            }
        }
    }

    pub fn singleton(&self, pattern: &str) -> Option<Instance> {
        self.0.singletons.borrow().get(pattern).cloned()
    }
}
