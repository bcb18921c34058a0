//! Melding: combining an idea's properties into a destination under the
//! destination's merge policy.
//!
//! Policy for each property is looked up in the override map, then the
//! destination's own map, then the wildcard entries of both, and defaults to
//! ANY. A property whose incoming value equals the current one is left alone,
//! which makes melding the same idea twice a no-op.

use crate::compose::ComposedMethod;
use crate::error::{Error, Result};
use crate::idea::{Idea, Inherits};
use crate::moc::{PolicyMap, PropertyPolicy, WILDCARD};
use crate::object::Instance;
use crate::policy::{Composition, Melder};
use crate::runtime::Runtime;
use crate::value::{Props, Value};
use tracing::{debug, warn};

/// Keys consumed by construction, never copied onto objects.
const RESERVED: [&str; 2] = ["constructor", "pre_constructor"];

#[derive(Clone, Copy)]
pub struct Merger<'a> {
    runtime: &'a Runtime,
    origin: Option<&'a str>,
    overrides: Option<&'a PolicyMap>,
    deep: bool,
}

impl<'a> Merger<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Self {
            runtime,
            origin: None,
            overrides: None,
            deep: false,
        }
    }

    /// Name of the idea being melded. EXCLUSIVE and STATIC properties only
    /// accept values from the idea that declared them.
    pub fn origin(mut self, origin: &'a str) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Policy consulted before the destination's own.
    pub fn overrides(mut self, overrides: &'a PolicyMap) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Meld `src` into a plain property table.
    pub fn meld(&self, dest: &mut Props, src: &Props, moc: &mut PolicyMap) -> Result<()> {
        for (key, incoming) in src.iter() {
            if RESERVED.contains(&key) {
                continue;
            }
            let current = dest.get(key).cloned().unwrap_or_default();
            if let Some(next) = self.meld_value(key, &current, incoming, moc)? {
                dest.insert(key, next);
            }
        }
        Ok(())
    }

    /// Meld `src` into a built object, wiring STATIC mirrors as they are
    /// declared.
    pub fn meld_into(&self, target: &Instance, src: &Props) -> Result<()> {
        let mut guard = target.state_mut();
        let state = &mut *guard;
        for (key, incoming) in src.iter() {
            if RESERVED.contains(&key) {
                continue;
            }
            let current = state.read(key);
            if matches!(&current, Value::Object(inner) if inner.ptr_eq(target)) {
                continue;
            }
            let Some(next) = self.meld_value(key, &current, incoming, &mut state.moc)? else {
                continue;
            };
            let owner = self
                .resolve(key, &state.moc)
                .filter(|p| p.melder() == Melder::Static)
                .and_then(|p| p.declared_by().map(String::from));
            match owner {
                Some(owner) if !state.mirrors.contains_key(key) => {
                    let slot = self.runtime.static_slot(&owner, key, next);
                    state.props.insert(key, slot.get());
                    state.mirrors.insert(key.to_string(), slot);
                }
                _ => state.write(key, next),
            }
        }
        Ok(())
    }

    fn resolve(&self, key: &str, moc: &PolicyMap) -> Option<PropertyPolicy> {
        self.overrides
            .and_then(|o| o.get(key))
            .or_else(|| moc.get(key))
            .or_else(|| self.overrides.and_then(|o| o.get(WILDCARD)))
            .or_else(|| moc.get(WILDCARD))
            .cloned()
    }

    /// New value for `key`, or `None` when the destination keeps its own.
    fn meld_value(
        &self,
        key: &str,
        current: &Value,
        incoming: &Value,
        moc: &mut PolicyMap,
    ) -> Result<Option<Value>> {
        if current == incoming {
            return Ok(None);
        }
        let policy = self.resolve(key, moc);
        let melder = match &policy {
            Some(p) => p.melder(),
            None if self.deep && matches!((current, incoming), (Value::Map(_), Value::Map(_))) => {
                Melder::Deep
            }
            None => Melder::Any,
        };

        if let Some(op) = policy.as_ref().and_then(|p| p.violation(incoming)) {
            if !current.is_falsy() {
                return Err(Error::type_violation(key, op.name.clone(), incoming.type_name()));
            }
            warn!("{} rejects '{}' ({}), current value unset", op.name, key, incoming.type_name());
        }

        match melder {
            Melder::Compose(kind) => {
                let asynchronous = policy.as_ref().is_some_and(PropertyPolicy::is_async);
                return self.compose(key, kind, asynchronous, current, incoming);
            }
            Melder::Exclusive | Melder::Static => {
                let declared = policy.as_ref().and_then(PropertyPolicy::declared_by);
                if declared.is_some() && declared != self.origin {
                    debug!(
                        "Ignoring '{}' from {:?}: declared by {:?}",
                        key, self.origin, declared
                    );
                    return Ok(None);
                }
                return Ok(Some(incoming.clone()));
            }
            _ => {}
        }

        if let Value::Idea(idea) = incoming {
            if matches!(melder, Melder::Any | Melder::Object | Melder::Deep | Melder::Idea) {
                return self.meld_idea(current, idea);
            }
        }

        let next = match (melder, current, incoming) {
            (Melder::Object | Melder::Deep, _, Value::Map(src)) => {
                let mut target = match current {
                    Value::Map(existing) => existing.clone(),
                    Value::Object(inner) => {
                        inner.meld(src)?;
                        return Ok(None);
                    }
                    _ => Props::new(),
                };
                let sub = Merger {
                    overrides: self.overrides.and_then(|o| o.nested(key)),
                    deep: melder == Melder::Deep,
                    ..*self
                };
                sub.meld(&mut target, src, moc.nest(key))?;
                Value::Map(target)
            }
            // Already ends with the incoming value: re-meld is a no-op.
            (Melder::Concat, Value::Str(a), Value::Str(b)) => {
                if a.ends_with(b.as_str()) {
                    return Ok(None);
                }
                Value::Str(format!("{}{}", a, b))
            }
            (Melder::Concat, Value::Array(a), Value::Array(b)) => {
                if a.ends_with(b) {
                    return Ok(None);
                }
                Value::Array(a.iter().chain(b.iter()).cloned().collect())
            }
            (Melder::Array, Value::Array(a), Value::Array(b)) => {
                let mut merged = a.clone();
                for item in b {
                    if !merged.contains(item) {
                        merged.push(item.clone());
                    }
                }
                if merged.len() == a.len() {
                    return Ok(None);
                }
                Value::Array(merged)
            }
            (Melder::Array, Value::Array(a), item) => {
                if a.contains(item) {
                    return Ok(None);
                }
                let mut merged = a.clone();
                merged.push(item.clone());
                Value::Array(merged)
            }
            _ => incoming.clone(),
        };
        Ok(Some(next))
    }

    fn compose(
        &self,
        key: &str,
        kind: Composition,
        asynchronous: bool,
        current: &Value,
        incoming: &Value,
    ) -> Result<Option<Value>> {
        let entries = match incoming {
            Value::Method(func) => vec![(func.clone(), self.origin.map(String::from))],
            Value::Composed(other) => other
                .stack()
                .into_iter()
                .map(|e| (e.func, e.origin))
                .collect(),
            _ => return Ok(Some(incoming.clone())),
        };
        let (method, fresh) = match current {
            Value::Composed(existing) if existing.kind() == kind => (existing.clone(), false),
            _ => (ComposedMethod::compose(key, kind, asynchronous)?, true),
        };
        for (func, origin) in entries {
            method.push_entry(func, origin.as_deref());
        }
        Ok(fresh.then_some(Value::Composed(method)))
    }

    /// Nested ideas accumulate: patterns become hard inherits, props meld
    /// under the combined policy of both ideas.
    fn meld_idea(&self, current: &Value, idea: &Idea) -> Result<Option<Value>> {
        match current {
            Value::Idea(existing) => {
                let mut merged = (**existing).clone();
                match (&merged.pattern, &idea.pattern) {
                    (None, Some(pattern)) => merged.pattern = Some(pattern.clone()),
                    (Some(own), Some(pattern)) if own != pattern => {
                        merged.inherits.extend(&Inherits::from(pattern.as_str()));
                    }
                    _ => {}
                }
                merged.inherits.extend(&idea.inherits);
                for (prop, spec) in idea.policy.iter() {
                    if !merged.policy.contains_key(prop) {
                        merged.policy.insert(prop, spec.clone());
                    }
                }

                let mut moc = PolicyMap::new();
                {
                    let ops = self.runtime.ops();
                    for (prop, spec) in existing.policy.iter().chain(idea.policy.iter()) {
                        moc.set(prop, spec, &ops, self.origin)?;
                    }
                }
                let sub = Merger {
                    overrides: None,
                    deep: false,
                    ..*self
                };
                sub.meld(&mut merged.props, &idea.props, &mut moc)?;
                if !idea.args.is_empty() {
                    merged.args = idea.args.clone();
                }
                merged.skip_build |= idea.skip_build;
                Ok(Some(Value::Idea(Box::new(merged))))
            }
            Value::Object(inner) => {
                if let Some(pattern) = &idea.pattern {
                    if !inner.instance_of(pattern) {
                        inner.mixin(pattern)?;
                    }
                }
                inner.meld(&idea.props)?;
                Ok(None)
            }
            _ => Ok(Some(Value::Idea(Box::new(idea.clone())))),
        }
    }
}

impl Instance {
    /// Meld plain properties onto this object under its own policy.
    pub fn meld(&self, src: &Props) -> Result<()> {
        let runtime = self.runtime();
        Merger::new(&runtime).meld_into(self, src)
    }
}
