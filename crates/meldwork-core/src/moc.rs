//! Meld Operation Contract: the live per-property policy map.
//!
//! Maps property name → one active op per track, in property insertion
//! order. Locking tracks are monotonic: once set they either stay the same
//! or the assignment fails with `PolicyConflict`. Nested maps hold policy for
//! the fields of nested objects so the objects themselves stay clean.

use crate::error::{Error, Result};
use crate::ordered::OrderedMap;
use crate::policy::{Composition, Melder, OpAction, OpDef, PolicyRegistry, StateKind, Track};
use crate::value::{Props, Value};
use serde_json::Value as Json;
use std::rc::Rc;
use tracing::warn;

/// Wildcard entry consulted for properties without their own policy.
pub const WILDCARD: &str = "*";

/// A policy declaration as written in an idea.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicySpec {
    /// Explicit op names; unknown names are an error.
    Ops(Vec<String>),
    /// Legacy shorthand string; unknown tokens degrade to ANY.
    Shorthand(String),
    /// Per-field policy for a nested object.
    Nested(OrderedMap<PolicySpec>),
}

impl PolicySpec {
    pub fn ops<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::Ops(names.into_iter().map(Into::into).collect())
    }

    pub fn nested<K: Into<String>>(fields: impl IntoIterator<Item = (K, PolicySpec)>) -> Self {
        Self::Nested(fields.into_iter().collect())
    }

    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::String(s) => Self::Shorthand(s.clone()),
            Json::Array(items) => Self::Shorthand(
                items
                    .iter()
                    .filter_map(Json::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Json::Object(fields) => Self::Nested(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
            _ => Self::Shorthand(String::new()),
        }
    }
}

impl From<&str> for PolicySpec {
    fn from(s: &str) -> Self {
        Self::Shorthand(s.to_string())
    }
}

impl From<String> for PolicySpec {
    fn from(s: String) -> Self {
        Self::Shorthand(s)
    }
}

/// Resolved policy of one property.
#[derive(Clone, Debug, Default)]
pub struct PropertyPolicy {
    ops: Vec<Rc<OpDef>>,
    nested: Option<Box<PolicyMap>>,
    declared_by: Option<String>,
}

impl PropertyPolicy {
    pub fn op(&self, track: &Track) -> Option<&Rc<OpDef>> {
        self.ops.iter().find(|op| &op.track == track)
    }

    pub fn ops(&self) -> &[Rc<OpDef>] {
        &self.ops
    }

    pub fn melder(&self) -> Melder {
        self.op(&Track::Melder)
            .and_then(|op| op.melder())
            .unwrap_or(Melder::Any)
    }

    pub fn composition(&self) -> Option<Composition> {
        match self.melder() {
            Melder::Compose(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(
            self.op(&Track::AsyncMethod).map(|op| op.action),
            Some(OpAction::Async(true))
        )
    }

    pub fn state_kind(&self) -> Option<StateKind> {
        match self.op(&Track::StateType).map(|op| op.action) {
            Some(OpAction::State(kind)) => Some(kind),
            _ => None,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(
            self.op(&Track::Visibility).map(|op| op.action),
            Some(OpAction::Visibility(false))
        )
    }

    /// Whether exports should include this property.
    pub fn is_exported(&self) -> bool {
        self.state_kind().map_or(true, StateKind::exported)
    }

    /// Idea that first assigned this property's melder.
    pub fn declared_by(&self) -> Option<&str> {
        self.declared_by.as_deref()
    }

    pub fn nested(&self) -> Option<&PolicyMap> {
        self.nested.as_deref()
    }

    /// Default value of the melder op, if it has one.
    pub fn default_value(&self) -> Option<Value> {
        self.op(&Track::Melder).and_then(|op| op.default.clone())
    }

    pub fn validators(&self) -> impl Iterator<Item = &Rc<OpDef>> {
        self.ops
            .iter()
            .filter(|op| matches!(op.action, OpAction::Assert | OpAction::Exclude))
    }

    /// First validator rejecting `value`.
    pub fn violation(&self, value: &Value) -> Option<&Rc<OpDef>> {
        self.validators()
            .find(|op| op.validate(value) == Some(false))
    }

    fn op_names(&self) -> Vec<Value> {
        self.ops.iter().map(|op| Value::from(op.name.as_str())).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PolicyMap {
    props: OrderedMap<PropertyPolicy>,
}

impl PolicyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn get(&self, prop: &str) -> Option<&PropertyPolicy> {
        self.props.get(prop)
    }

    /// Own entry, else the wildcard entry.
    pub fn resolve(&self, prop: &str) -> Option<&PropertyPolicy> {
        self.props.get(prop).or_else(|| self.props.get(WILDCARD))
    }

    /// Apply a declaration to `prop`.
    pub fn set(
        &mut self,
        prop: &str,
        spec: &PolicySpec,
        registry: &PolicyRegistry,
        origin: Option<&str>,
    ) -> Result<()> {
        match spec {
            PolicySpec::Ops(names) => {
                for name in names {
                    let op = registry.lookup(name)?;
                    self.assign(prop, op, origin)?;
                }
                Ok(())
            }
            PolicySpec::Shorthand(text) => {
                for op in registry.parse_shorthand(text) {
                    self.assign(prop, op, origin)?;
                }
                Ok(())
            }
            PolicySpec::Nested(fields) => {
                let current = self.get(prop).and_then(|p| p.op(&Track::Melder).cloned());
                match current.and_then(|op| op.melder()) {
                    Some(Melder::Deep | Melder::Object | Melder::Idea) => {}
                    _ => self.assign(prop, registry.lookup("DEEP")?, origin)?,
                }
                self.assign(prop, registry.lookup("NESTED_MOC")?, origin)?;
                let child = self.nest(prop);
                for (field, spec) in fields.iter() {
                    child.set(field, spec, registry, origin)?;
                }
                Ok(())
            }
        }
    }

    /// Put `op` on its track for `prop`.
    pub fn assign(&mut self, prop: &str, op: Rc<OpDef>, origin: Option<&str>) -> Result<()> {
        let entry = self.props.entry_or_insert_with(prop, PropertyPolicy::default);
        if let Some(slot) = entry.ops.iter_mut().find(|o| o.track == op.track) {
            if slot.name == op.name {
                return Ok(());
            }
            if slot.locks {
                return Err(Error::policy_conflict(
                    prop,
                    slot.track.to_string(),
                    slot.name.clone(),
                    op.name.clone(),
                ));
            }
            *slot = op;
            return Ok(());
        }
        if op.track == Track::Melder && entry.declared_by.is_none() {
            entry.declared_by = origin.map(String::from);
        }
        entry.ops.push(op);
        Ok(())
    }

    /// Drop all tracking for `prop`.
    pub fn delete(&mut self, prop: &str) -> bool {
        self.props.remove(prop).is_some()
    }

    pub fn ordered_properties(&self) -> impl Iterator<Item = &str> {
        self.props.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyPolicy)> {
        self.props.iter()
    }

    /// Child map for the fields of `prop`, created on first use.
    pub fn nest(&mut self, prop: &str) -> &mut PolicyMap {
        let entry = self.props.entry_or_insert_with(prop, PropertyPolicy::default);
        entry.nested.get_or_insert_with(Default::default)
    }

    pub fn nested(&self, prop: &str) -> Option<&PolicyMap> {
        self.get(prop).and_then(PropertyPolicy::nested)
    }

    /// Fold another map in, conflicts included.
    pub fn absorb(&mut self, other: &PolicyMap, origin: Option<&str>) -> Result<()> {
        for (prop, policy) in other.props.iter() {
            let declared = policy.declared_by.as_deref().or(origin);
            self.props
                .entry_or_insert_with(prop, PropertyPolicy::default);
            for op in &policy.ops {
                self.assign(prop, op.clone(), declared)?;
            }
            if let Some(nested) = &policy.nested {
                self.nest(prop).absorb(nested, origin)?;
            }
        }
        Ok(())
    }

    /// Check every validated property against `props`. Soft mode logs.
    pub fn validate_against(&self, props: &Props, strict: bool) -> Result<()> {
        self.validate_with(|prop| props.get(prop).cloned().unwrap_or_default(), strict)
    }

    pub fn validate_with(&self, read: impl Fn(&str) -> Value, strict: bool) -> Result<()> {
        for (prop, policy) in self.props.iter() {
            if prop == WILDCARD {
                continue;
            }
            let value = read(prop);
            if let Some(op) = policy.violation(&value) {
                if strict {
                    return Err(Error::type_violation(prop, op.name.clone(), value.type_name()));
                }
                warn!("{} rejects '{}' ({})", op.name, prop, value.type_name());
            }
        }
        Ok(())
    }

    /// Phase properties in declaration order.
    pub fn phases(&self) -> Vec<String> {
        self.props
            .iter()
            .filter(|(_, p)| p.composition() == Some(Composition::Phase))
            .map(|(k, _)| k.to_string())
            .collect()
    }

    /// Properties declared as composed methods.
    pub fn composed(&self) -> Vec<(String, Composition, bool)> {
        self.props
            .iter()
            .filter_map(|(k, p)| p.composition().map(|c| (k.to_string(), c, p.is_async())))
            .collect()
    }

    /// Readable view: property → op names (or a nested view).
    pub fn to_value(&self) -> Value {
        let mut out = Props::new();
        for (prop, policy) in self.props.iter() {
            let mut names = policy.op_names();
            if let Some(nested) = policy.nested() {
                names.push(nested.to_value());
            }
            out.insert(prop, Value::Array(names));
        }
        Value::Map(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_spec_marks_deep_and_nests() {
        let reg = PolicyRegistry::with_builtins();
        let mut moc = PolicyMap::new();
        let spec = PolicySpec::nested([("tags", PolicySpec::from("array"))]);
        moc.set("config", &spec, &reg, Some("a")).unwrap();
        assert_eq!(moc.get("config").map(PropertyPolicy::melder), Some(Melder::Deep));
        assert_eq!(
            moc.nested("config").and_then(|n| n.get("tags")).map(PropertyPolicy::melder),
            Some(Melder::Array)
        );
    }

    #[test]
    fn nested_refinement_of_object_is_allowed() {
        let reg = PolicyRegistry::with_builtins();
        let mut moc = PolicyMap::new();
        moc.set("config", &"object".into(), &reg, None).unwrap();
        let spec = PolicySpec::nested([("n", PolicySpec::from("isnumber"))]);
        moc.set("config", &spec, &reg, None).unwrap();
        assert_eq!(moc.get("config").map(PropertyPolicy::melder), Some(Melder::Object));
    }

    #[test]
    fn declared_by_is_first_melder_origin() {
        let reg = PolicyRegistry::with_builtins();
        let mut moc = PolicyMap::new();
        moc.set("id", &"static".into(), &reg, Some("counter")).unwrap();
        moc.set("id", &"static".into(), &reg, Some("other")).unwrap();
        assert_eq!(moc.get("id").and_then(PropertyPolicy::declared_by), Some("counter"));
    }
}
