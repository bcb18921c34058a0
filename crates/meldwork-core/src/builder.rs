//! Object construction.
//!
//! `Runtime::new_object` resolves the hard ancestor list, builds the base
//! layer, mixes every ancestor in resolution order, melds the per-instance
//! idea last under the `idea` layer, composes methods and hands the object to
//! its phase machine. The built-in builder phase constructs nested ideas the
//! same way and links them back to their parent.

use crate::error::{Error, Result};
use crate::function::{Function, Invocation};
use crate::idea::{Idea, Inherits};
use crate::merge::Merger;
use crate::object::{BuiltChild, Instance};
use crate::phase::PhaseTarget;
use crate::runtime::Runtime;
use crate::value::{Props, Value};
use crate::{IDEA_LAYER, ROOT_PATTERN};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// What to build.
#[derive(Clone, Debug)]
pub enum Blueprint {
    /// One named pattern.
    Pattern(String),
    /// Several hard ancestors under the root pattern.
    Patterns(Vec<String>),
    /// An idea naming its own pattern.
    Idea(Idea),
    /// Already built: only advance its phase machine.
    Built(Instance),
}

impl From<&str> for Blueprint {
    fn from(name: &str) -> Self {
        Self::Pattern(name.to_string())
    }
}

impl From<String> for Blueprint {
    fn from(name: String) -> Self {
        Self::Pattern(name)
    }
}

impl From<Vec<&str>> for Blueprint {
    fn from(names: Vec<&str>) -> Self {
        Self::Patterns(names.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for Blueprint {
    fn from(names: Vec<String>) -> Self {
        Self::Patterns(names)
    }
}

impl<const N: usize> From<[&str; N]> for Blueprint {
    fn from(names: [&str; N]) -> Self {
        Self::Patterns(names.into_iter().map(String::from).collect())
    }
}

impl From<Idea> for Blueprint {
    fn from(idea: Idea) -> Self {
        Self::Idea(idea)
    }
}

impl From<Instance> for Blueprint {
    fn from(object: Instance) -> Self {
        Self::Built(object)
    }
}

impl Runtime {
    /// Build an object and advance it to `phase`.
    pub fn new_object(
        &self,
        blueprint: impl Into<Blueprint>,
        idea: Idea,
        phase: impl Into<PhaseTarget>,
    ) -> Result<Instance> {
        let phase = phase.into();
        let (primary, mut inherits, idea) = match blueprint.into() {
            Blueprint::Built(object) => return object.machine(phase),
            Blueprint::Pattern(name) => (name.clone(), Inherits::from(name), idea),
            Blueprint::Patterns(names) => {
                let mut inherits = Inherits::from(ROOT_PATTERN);
                inherits.extend(&Inherits::from(names));
                (ROOT_PATTERN.to_string(), inherits, idea)
            }
            Blueprint::Idea(mut own) => {
                let Some(pattern) = own.pattern.clone() else {
                    return Err(Error::InvalidIdea("idea does not name a pattern".into()));
                };
                own.inherits.extend(&idea.inherits);
                for (key, value) in idea.props {
                    own.props.insert(key, value);
                }
                for (key, spec) in idea.policy {
                    if !own.policy.contains_key(&key) {
                        own.policy.insert(key, spec);
                    }
                }
                if !idea.args.is_empty() {
                    own.args = idea.args;
                }
                (pattern.clone(), Inherits::from(pattern), own)
            }
        };
        inherits.extend(&idea.inherits);

        let mut ancestors = self.extend_inherits(&inherits, false);
        if ancestors.first().map(String::as_str) != Some(ROOT_PATTERN) {
            ancestors.retain(|name| name != ROOT_PATTERN);
            ancestors.insert(0, ROOT_PATTERN.to_string());
        }

        if let Some(existing) = self.find_singleton(&ancestors) {
            debug!("Returning singleton {} for '{}'", existing.id(), primary);
            return Ok(existing);
        }

        let object = Instance::create(self, &primary, idea.args.clone());
        self.construct(&object, &ancestors, &idea)?;
        for ancestor in &ancestors {
            self.apply_pattern(&object, ancestor)?;
        }
        self.apply_idea(&object, idea)?;
        object.rebuild_methods()?;
        self.claim_singletons(&ancestors, &object);
        info!(
            "Built {} as '{}' ({} layers)",
            object.id(),
            primary,
            object.state().inherits.len()
        );
        object.machine(phase)
    }

    /// Build whatever a property value describes. Ideas are built, built
    /// objects advance, anything else is an error.
    pub fn build(&self, value: Value, phase: impl Into<PhaseTarget>) -> Result<Instance> {
        match value {
            Value::Idea(idea) => self.new_object(Blueprint::Idea(*idea), Idea::new(), phase),
            Value::Object(object) => object.machine(phase),
            Value::Str(name) => self.new_object(name, Idea::new(), phase),
            other => Err(Error::InvalidIdea(format!("cannot build a {}", other.type_name()))),
        }
    }

    /// Base layer and constructor hooks.
    fn construct(&self, object: &Instance, ancestors: &[String], idea: &Idea) -> Result<()> {
        let hooks = |key: &str| -> Vec<(String, Function)> {
            ancestors
                .iter()
                .filter_map(|name| self.get_pattern(name))
                .map(|p| (p.name.clone(), p.idea.clone()))
                .chain(std::iter::once((IDEA_LAYER.to_string(), Rc::new(idea.clone()))))
                .filter_map(|(name, layer)| match layer.props.get(key) {
                    Some(Value::Method(func)) => Some((name, func.clone())),
                    _ => None,
                })
                .collect()
        };

        let mut args = object.args();
        for (origin, hook) in hooks("pre_constructor") {
            let inv = Invocation::new(object.clone(), "pre_constructor", args.clone())
                .from_origin(Some(origin));
            if let Value::Array(rewritten) = hook.call(inv)? {
                args = rewritten;
            }
        }

        let base = self.constructor().construct(&object.pattern(), &args);
        {
            let mut state = object.state_mut();
            state.args = args.clone();
            for (key, value) in base {
                state.props.insert(key, value);
            }
        }

        for (origin, hook) in hooks("constructor") {
            let inv = Invocation::new(object.clone(), "constructor", args.clone())
                .from_origin(Some(origin));
            hook.call(inv)?;
        }
        Ok(())
    }

    /// Mix one registered pattern into `object`. Unknown names are skipped.
    pub(crate) fn apply_pattern(&self, object: &Instance, name: &str) -> Result<()> {
        let Some(pattern) = self.get_pattern(name) else {
            warn!("Pattern '{}' is not registered, skipping mixin", name);
            return Ok(());
        };
        let live = {
            let mut state = object.state_mut();
            if state.snapshots.contains_key(name) {
                return Ok(());
            }
            state.snapshots.insert(name.to_string(), pattern.idea.clone());
            state.inherits.push(name.to_string());
            state.moc.absorb(&pattern.moc, Some(name))?;
            state.machine_live
        };
        debug!("Mixing '{}' into {}", name, object.id());
        Merger::new(self)
            .origin(name)
            .meld_into(object, &pattern.idea.props)?;
        if live {
            object.rebuild_methods()?;
        }
        Ok(())
    }

    /// Meld the per-instance idea last, under the `idea` layer.
    fn apply_idea(&self, object: &Instance, idea: Idea) -> Result<()> {
        let idea = Rc::new(idea);
        {
            let ops = self.ops();
            let mut state = object.state_mut();
            state.snapshots.insert(IDEA_LAYER.to_string(), idea.clone());
            state.inherits.push(IDEA_LAYER.to_string());
            for (prop, spec) in idea.policy.iter() {
                state.moc.set(prop, spec, &ops, Some(IDEA_LAYER))?;
            }
        }
        Merger::new(self)
            .origin(IDEA_LAYER)
            .meld_into(object, &idea.props)
    }
}

impl Instance {
    /// Late mixin: apply `pattern` and whichever of its ancestors are not
    /// applied yet, then refresh composed stacks.
    pub fn mixin(&self, pattern: &str) -> Result<()> {
        let runtime = self.runtime();
        if !runtime.has_pattern(pattern) {
            warn!("Cannot mix unknown pattern '{}' into {}", pattern, self.id());
            return Ok(());
        }
        for ancestor in runtime.resolved_inherits(pattern) {
            runtime.apply_pattern(self, &ancestor)?;
        }
        self.rebuild_methods()
    }

    /// Built-in builder phase: construct every buildable nested idea.
    pub(crate) fn builder_phase(&self) -> Result<()> {
        let (found, target) = {
            let state = self.state();
            let mut found = Vec::new();
            collect_ideas(&state.props, &mut Vec::new(), &mut found);
            (found, state.built_to.clone().unwrap_or(PhaseTarget::Final))
        };
        if found.is_empty() {
            return Ok(());
        }

        let runtime = self.runtime();
        for (path, idea) in found {
            let dotted = path.join(".");
            let idea = Rc::new(idea);
            self.state_mut().built_children.insert(
                dotted.clone(),
                BuiltChild {
                    idea: idea.clone(),
                    instance: None,
                },
            );

            let child = runtime.new_object(
                Blueprint::Idea((*idea).clone()),
                Idea::new(),
                PhaseTarget::Skip,
            )?;
            {
                let mut state = child.state_mut();
                state.builder = Some(self.downgrade());
                state.path = Some(dotted.clone());
            }
            debug!("Built child '{}' of {}", dotted, self.id());
            child.machine(target.clone())?;

            let mut state = self.state_mut();
            replace_at(&mut state.props, &path, Value::Object(child.clone()));
            if let Some(entry) = state.built_children.get_mut(&dotted) {
                entry.instance = Some(child);
            }
        }
        Ok(())
    }
}

/// Buildable ideas under `props`, descending into plain maps.
fn collect_ideas(props: &Props, path: &mut Vec<String>, found: &mut Vec<(Vec<String>, Idea)>) {
    for (key, value) in props.iter() {
        path.push(key.to_string());
        match value {
            Value::Idea(idea) if idea.is_buildable() => found.push((path.clone(), (**idea).clone())),
            Value::Map(inner) => collect_ideas(inner, path, found),
            _ => {}
        }
        path.pop();
    }
}

fn replace_at(props: &mut Props, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            props.insert(last.as_str(), value);
        }
        [head, rest @ ..] => {
            if let Some(Value::Map(inner)) = props.get_mut(head) {
                replace_at(inner, rest, value);
            }
        }
    }
}
