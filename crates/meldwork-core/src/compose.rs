//! Method composition.
//!
//! Same-named functions contributed by several ancestors are stacked into one
//! `ComposedMethod`. The stack is collected from the object's applied layers
//! (`pre_name`, `name`, `post_name` blocks, each in ancestor order) and its
//! kind decides how the entries combine. Funnel kinds walk each block most
//! derived first.

use crate::error::{Error, Result};
use crate::function::{Function, Invocation};
use crate::merge::Merger;
use crate::moc::PolicyMap;
use crate::object::{Instance, ObjectState};
use crate::policy::{Composition, Melder};
use crate::value::{Props, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct StackEntry {
    pub func: Function,
    /// Pattern that contributed the function.
    pub origin: Option<String>,
}

struct ComposedState {
    name: String,
    kind: Composition,
    asynchronous: bool,
    /// Derived from the object's layers; replaced on every rebuild.
    stack: Vec<StackEntry>,
    /// Added at runtime through `add`; survives rebuilds.
    added: Vec<StackEntry>,
}

/// Composed callable. Cloning shares the stack.
#[derive(Clone)]
pub struct ComposedMethod(Rc<RefCell<ComposedState>>);

impl fmt::Debug for ComposedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.borrow();
        write!(
            f,
            "{}{}({}, {} entries)",
            if state.asynchronous { "async " } else { "" },
            state.kind.name(),
            state.name,
            state.stack.len() + state.added.len()
        )
    }
}

/// Handle returned by `ComposedMethod::add`.
pub struct Subscription {
    method: Weak<RefCell<ComposedState>>,
    func: Function,
}

impl Subscription {
    /// Take the added function back off the stack.
    pub fn cancel(self) {
        if let Some(method) = self.method.upgrade() {
            method.borrow_mut().added.retain(|e| !e.func.ptr_eq(&self.func));
        }
    }
}

/// Kind name as written in policy, with an optional `async_` prefix.
pub fn parse_kind(name: &str) -> Result<(Composition, bool)> {
    let lower = name.to_lowercase();
    let (asynchronous, bare) = match lower.strip_prefix("async_") {
        Some(rest) => (true, rest),
        None => (false, lower.as_str()),
    };
    let kind = match bare {
        "method" => Composition::Method,
        "phase" => Composition::Phase,
        "chain" => Composition::Chain,
        "chain_funnel" => Composition::ChainFunnel,
        "blender" => Composition::Blender,
        "this_blender" => Composition::ThisBlender,
        "funnel" => Composition::Funnel,
        "this_funnel" => Composition::ThisFunnel,
        "super" => Composition::Super,
        _ => return Err(Error::UnknownCompositionKind(name.to_string())),
    };
    check_kind(kind, asynchronous)?;
    Ok((kind, asynchronous))
}

fn check_kind(kind: Composition, asynchronous: bool) -> Result<()> {
    if asynchronous && matches!(kind, Composition::Phase | Composition::Super) {
        return Err(Error::UnknownCompositionKind(format!("async_{}", kind.name())));
    }
    Ok(())
}

impl ComposedMethod {
    /// Empty composed method. Phases and super calls have no async form.
    pub fn compose(name: &str, kind: Composition, asynchronous: bool) -> Result<Self> {
        check_kind(kind, asynchronous)?;
        Ok(Self(Rc::new(RefCell::new(ComposedState {
            name: name.to_string(),
            kind,
            asynchronous,
            stack: Vec::new(),
            added: Vec::new(),
        }))))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn kind(&self) -> Composition {
        self.0.borrow().kind
    }

    pub fn is_async(&self) -> bool {
        self.0.borrow().asynchronous
    }

    pub fn ptr_eq(&self, other: &ComposedMethod) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Entries in call order.
    pub fn stack(&self) -> Vec<StackEntry> {
        let state = self.0.borrow();
        state.stack.iter().chain(state.added.iter()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let state = self.0.borrow();
        state.stack.len() + state.added.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `func`. With `unique`, a function already on the stack is not
    /// added twice.
    pub fn add(&self, func: Function, unique: bool) -> Subscription {
        let mut state = self.0.borrow_mut();
        let present = state
            .stack
            .iter()
            .chain(state.added.iter())
            .any(|e| e.func.ptr_eq(&func));
        if !(unique && present) {
            state.added.push(StackEntry {
                func: func.clone(),
                origin: None,
            });
        }
        Subscription {
            method: Rc::downgrade(&self.0),
            func,
        }
    }

    pub fn remove(&self, func: &Function) -> bool {
        let mut state = self.0.borrow_mut();
        let before = state.stack.len() + state.added.len();
        state.stack.retain(|e| !e.func.ptr_eq(func));
        state.added.retain(|e| !e.func.ptr_eq(func));
        before != state.stack.len() + state.added.len()
    }

    /// Append one derived entry during a meld, skipping duplicates.
    pub(crate) fn push_entry(&self, func: Function, origin: Option<&str>) {
        let mut state = self.0.borrow_mut();
        if state.stack.iter().any(|e| e.func.ptr_eq(&func)) {
            return;
        }
        let entry = StackEntry {
            func,
            origin: origin.map(String::from),
        };
        if state.kind.is_funnel() {
            state.stack.insert(0, entry);
        } else {
            state.stack.push(entry);
        }
    }

    /// Recompute the derived stack from `this`'s current layers.
    pub fn update_stack(&self, this: &Instance) {
        let state = this.state();
        self.rebuild(&state);
    }

    pub(crate) fn rebuild(&self, object: &ObjectState) {
        let (name, funnel) = {
            let state = self.0.borrow();
            (state.name.clone(), state.kind.is_funnel())
        };
        let stack = find_stack(object, &name, funnel);
        debug!("Composed '{}' from {} entries", name, stack.len());
        self.0.borrow_mut().stack = stack;
    }

    /// Run synchronously against `this`.
    pub fn invoke(&self, this: &Instance, args: Vec<Value>) -> Result<Value> {
        let (name, kind, asynchronous) = {
            let state = self.0.borrow();
            (state.name.clone(), state.kind, state.asynchronous)
        };
        if asynchronous {
            return Err(Error::AsyncRequired(name));
        }
        if kind == Composition::Super {
            return this.super_call(None, &name, args);
        }
        let stack = self.stack();
        let mut run = Run::new(this, &name, kind, args);
        for entry in &stack {
            let ret = entry.func.call(run.invocation(entry))?;
            if let Some(done) = run.step(ret)? {
                return Ok(done);
            }
        }
        Ok(run.finish())
    }

    /// Run with every entry awaited in order.
    pub async fn invoke_async(&self, this: &Instance, args: Vec<Value>) -> Result<Value> {
        let (name, kind) = {
            let state = self.0.borrow();
            (state.name.clone(), state.kind)
        };
        if kind == Composition::Super {
            return this.super_call_async(None, &name, args).await;
        }
        let stack = self.stack();
        let mut run = Run::new(this, &name, kind, args);
        for entry in &stack {
            let ret = entry.func.call_async(run.invocation(entry)).await?;
            if let Some(done) = run.step(ret)? {
                return Ok(done);
            }
        }
        Ok(run.finish())
    }
}

/// `pre_`, main and `post_` blocks over the object's layers.
fn find_stack(object: &ObjectState, name: &str, funnel: bool) -> Vec<StackEntry> {
    let pre_key = format!("pre_{}", name);
    let post_key = format!("post_{}", name);
    let mut blocks: [Vec<StackEntry>; 3] = Default::default();
    for (origin, idea) in object.layers() {
        for (block, key) in [pre_key.as_str(), name, post_key.as_str()].into_iter().enumerate() {
            match idea.props.get(key) {
                Some(Value::Method(func)) => blocks[block].push(StackEntry {
                    func: func.clone(),
                    origin: Some(origin.to_string()),
                }),
                Some(Value::Composed(inner)) => blocks[block].extend(inner.stack()),
                _ => {}
            }
        }
    }
    if funnel {
        for block in &mut blocks {
            block.reverse();
        }
    }
    blocks.into_iter().flatten().collect()
}

/// Accumulator for one composed call.
struct Run<'a> {
    this: &'a Instance,
    name: &'a str,
    kind: Composition,
    args: Vec<Value>,
    last: Value,
}

impl<'a> Run<'a> {
    fn new(this: &'a Instance, name: &'a str, kind: Composition, args: Vec<Value>) -> Self {
        let args = match kind {
            Composition::Blender | Composition::Funnel if args.is_empty() => {
                vec![Value::Map(Props::new())]
            }
            _ => args,
        };
        Self {
            this,
            name,
            kind,
            args,
            last: Value::Undefined,
        }
    }

    fn invocation(&self, entry: &StackEntry) -> Invocation {
        Invocation::new(self.this.clone(), self.name, self.args.clone())
            .from_origin(entry.origin.clone())
    }

    /// Fold one return value. `Some` ends the call early.
    fn step(&mut self, ret: Value) -> Result<Option<Value>> {
        match self.kind {
            Composition::Chain | Composition::ChainFunnel => {
                match self.args.first_mut() {
                    Some(first) => *first = ret.clone(),
                    None => self.args.push(ret.clone()),
                }
                self.last = ret;
                Ok(None)
            }
            Composition::Blender | Composition::Funnel => match ret {
                Value::Bool(false) => Ok(Some(Value::Bool(false))),
                Value::Bool(true) => Ok(Some(self.target())),
                other => {
                    self.blend(other)?;
                    Ok(None)
                }
            },
            _ => match ret {
                Value::Bool(false) => Ok(Some(Value::Bool(false))),
                Value::Bool(true) => Ok(Some(Value::Object(self.this.clone()))),
                Value::Map(props) => {
                    self.absorb(&props)?;
                    Ok(None)
                }
                Value::Idea(idea) => {
                    self.absorb(&idea.props)?;
                    Ok(None)
                }
                _ => Ok(None),
            },
        }
    }

    /// Fold a map returned by a method into `this`. EXCLUSIVE and STATIC
    /// properties are written the way `Instance::set` writes them, so the
    /// shared slot follows; the rest is melded.
    fn absorb(&self, props: &Props) -> Result<()> {
        let mut melded = Props::new();
        for (key, value) in props.iter() {
            let melder = self.this.state().moc.resolve(key).map(|p| p.melder());
            match melder {
                Some(Melder::Exclusive | Melder::Static) => self.this.set(key, value.clone())?,
                _ => {
                    melded.insert(key, value.clone());
                }
            }
        }
        if !melded.is_empty() {
            self.this.meld(&melded)?;
        }
        Ok(())
    }

    fn target(&self) -> Value {
        self.args.first().cloned().unwrap_or_default()
    }

    /// Meld a return value onto the first argument.
    fn blend(&mut self, ret: Value) -> Result<()> {
        let incoming = match ret {
            Value::Map(props) => props,
            Value::Idea(idea) => idea.props,
            _ => return Ok(()),
        };
        match self.args.first_mut() {
            Some(Value::Object(target)) => target.meld(&incoming)?,
            Some(Value::Map(target)) => {
                let runtime = self.this.runtime();
                Merger::new(&runtime).meld(target, &incoming, &mut PolicyMap::new())?;
            }
            Some(slot) => *slot = Value::Map(incoming),
            None => self.args.push(Value::Map(incoming)),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.kind {
            Composition::Chain | Composition::ChainFunnel => self.last,
            Composition::Blender | Composition::Funnel => self.target(),
            _ => Value::Object(self.this.clone()),
        }
    }
}

impl Instance {
    /// Call the property `name` with `this` bound to this object.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match self.get(name) {
            Value::Composed(method) => method.invoke(self, args),
            Value::Method(func) => {
                let origin = self.origin_of(name);
                func.call(Invocation::new(self.clone(), name, args).from_origin(origin))
            }
            _ => Err(Error::NotCallable(name.to_string())),
        }
    }

    pub async fn call_async(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match self.get(name) {
            Value::Composed(method) => method.invoke_async(self, args).await,
            Value::Method(func) => {
                let origin = self.origin_of(name);
                func.call_async(Invocation::new(self.clone(), name, args).from_origin(origin))
                    .await
            }
            _ => Err(Error::NotCallable(name.to_string())),
        }
    }

    /// Nearest definition of `name` strictly above `from` in the applied
    /// layers. `None` starts from the most derived layer.
    fn super_target(&self, from: Option<&str>, name: &str) -> Option<StackEntry> {
        let state = self.state();
        let end = from
            .and_then(|f| state.inherits.iter().position(|n| n == f))
            .unwrap_or(state.inherits.len());
        state.inherits[..end].iter().rev().find_map(|layer| {
            match state.snapshots.get(layer)?.props.get(name)? {
                Value::Method(func) => Some(StackEntry {
                    func: func.clone(),
                    origin: Some(layer.clone()),
                }),
                _ => None,
            }
        })
    }

    /// Call the version of `name` defined by the nearest layer above `from`.
    /// Reaching the top of the chain yields `Undefined`.
    pub fn super_call(&self, from: Option<&str>, name: &str, args: Vec<Value>) -> Result<Value> {
        match self.super_target(from, name) {
            Some(entry) => entry
                .func
                .call(Invocation::new(self.clone(), name, args).from_origin(entry.origin)),
            None => {
                debug!("No super definition of '{}' above {:?}", name, from);
                Ok(Value::Undefined)
            }
        }
    }

    pub async fn super_call_async(
        &self,
        from: Option<&str>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        match self.super_target(from, name) {
            Some(entry) => {
                entry
                    .func
                    .call_async(Invocation::new(self.clone(), name, args).from_origin(entry.origin))
                    .await
            }
            None => Ok(Value::Undefined),
        }
    }

    /// Call exactly `pattern`'s own definition of `name`, bypassing every
    /// override below it.
    pub fn supercede(&self, pattern: &str, name: &str, args: Vec<Value>) -> Result<Value> {
        let func = {
            let state = self.state();
            let idea = state
                .snapshots
                .get(pattern)
                .ok_or_else(|| Error::UnknownPattern(pattern.to_string()))?;
            match idea.props.get(name) {
                Some(Value::Method(func)) => func.clone(),
                _ => return Err(Error::NotCallable(format!("{}.{}", pattern, name))),
            }
        };
        func.call(Invocation::new(self.clone(), name, args).from_origin(Some(pattern.to_string())))
    }

    pub fn composed(&self, name: &str) -> Option<ComposedMethod> {
        match self.get(name) {
            Value::Composed(method) => Some(method),
            _ => None,
        }
    }

    /// Make sure every composed property the policy declares exists and has
    /// a stack matching the current layers.
    pub(crate) fn rebuild_methods(&self) -> Result<()> {
        let mut state = self.state_mut();
        for (name, kind, asynchronous) in state.moc.composed() {
            match state.props.get(&name) {
                Some(Value::Composed(method)) => {
                    method.rebuild(&state);
                    continue;
                }
                Some(Value::Method(_)) | None => {}
                Some(_) => continue,
            }
            let defined = state.layers().any(|(_, idea)| {
                idea.props.contains_key(&name)
                    || idea.props.contains_key(&format!("pre_{}", name))
                    || idea.props.contains_key(&format!("post_{}", name))
            });
            if !defined {
                continue;
            }
            let method = ComposedMethod::compose(&name, kind, asynchronous)?;
            method.rebuild(&state);
            state.props.insert(name, Value::Composed(method));
        }
        Ok(())
    }
}
