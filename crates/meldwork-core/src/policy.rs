//! Merge-op registry.
//!
//! Every op belongs to exactly one track. A property holds at most one op per
//! track; locking tracks refuse to change op once assigned. The registry is a
//! lookup table populated once when the runtime starts.

use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

/// Value-shape predicate.
pub type ShapeFn = fn(&Value) -> bool;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Track {
    Visibility,
    Melder,
    AsyncMethod,
    Nest,
    StateType,
    /// Validate-only track for one `IS*` predicate.
    Assertion(String),
    /// Validate-and-reject track for one `NOT*` predicate.
    Exclusion(String),
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visibility => write!(f, "visibility"),
            Self::Melder => write!(f, "melder"),
            Self::AsyncMethod => write!(f, "async_method"),
            Self::Nest => write!(f, "nest"),
            Self::StateType => write!(f, "state_type"),
            Self::Assertion(name) => write!(f, "{}", name.to_lowercase()),
            Self::Exclusion(name) => write!(f, "{}", name.to_lowercase()),
        }
    }
}

/// How same-named methods from several ancestors become one callable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Composition {
    Method,
    Phase,
    Chain,
    ChainFunnel,
    Blender,
    ThisBlender,
    Funnel,
    ThisFunnel,
    Super,
}

impl Composition {
    /// Whether the stack is walked most-derived first.
    pub fn is_funnel(self) -> bool {
        matches!(self, Self::ChainFunnel | Self::Funnel | Self::ThisFunnel)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Phase => "phase",
            Self::Chain => "chain",
            Self::ChainFunnel => "chain_funnel",
            Self::Blender => "blender",
            Self::ThisBlender => "this_blender",
            Self::Funnel => "funnel",
            Self::ThisFunnel => "this_funnel",
            Self::Super => "super",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Melder {
    Any,
    Concat,
    Array,
    Object,
    Idea,
    Deep,
    Exclusive,
    Static,
    Compose(Composition),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKind {
    Window,
    This,
    Uuid,
    Val,
    Ignore,
}

impl StateKind {
    /// Whether properties of this kind appear in exports.
    pub fn exported(self) -> bool {
        matches!(self, Self::Uuid | Self::Val)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpAction {
    /// `true` for PUB.
    Visibility(bool),
    Meld(Melder),
    /// `true` for ASYNC.
    Async(bool),
    Nest,
    State(StateKind),
    Assert,
    Exclude,
}

#[derive(Clone, Debug)]
pub struct OpDef {
    pub name: String,
    pub track: Track,
    pub action: OpAction,
    pub shape: Option<ShapeFn>,
    pub default: Option<Value>,
    pub locks: bool,
}

impl OpDef {
    pub fn melder(&self) -> Option<Melder> {
        match self.action {
            OpAction::Meld(m) => Some(m),
            _ => None,
        }
    }

    /// Whether `value` has the shape this op works on. Ops without a
    /// predicate accept anything.
    pub fn accepts(&self, value: &Value) -> bool {
        self.shape.map_or(true, |shape| shape(value))
    }

    /// Validation verdict for assertion/exclusion ops. `None` for ops that
    /// do not validate.
    pub fn validate(&self, value: &Value) -> Option<bool> {
        let shape = self.shape?;
        match self.action {
            OpAction::Assert if value.is_defined() => Some(shape(value)),
            OpAction::Exclude if !value.is_undefined() => Some(!shape(value)),
            OpAction::Assert | OpAction::Exclude => Some(true),
            _ => None,
        }
    }
}

pub mod shapes {
    use crate::value::Value;

    pub fn string(v: &Value) -> bool {
        matches!(v, Value::Str(_))
    }
    pub fn number(v: &Value) -> bool {
        matches!(v, Value::Int(_) | Value::Float(_))
    }
    pub fn integer(v: &Value) -> bool {
        matches!(v, Value::Int(_))
    }
    pub fn boolean(v: &Value) -> bool {
        matches!(v, Value::Bool(_))
    }
    pub fn array(v: &Value) -> bool {
        matches!(v, Value::Array(_))
    }
    pub fn object(v: &Value) -> bool {
        matches!(v, Value::Map(_) | Value::Idea(_) | Value::Object(_))
    }
    pub fn function(v: &Value) -> bool {
        v.is_callable()
    }
    pub fn idea(v: &Value) -> bool {
        matches!(v, Value::Idea(_))
    }
    pub fn null(v: &Value) -> bool {
        matches!(v, Value::Null)
    }
    pub fn empty(v: &Value) -> bool {
        match v {
            Value::Str(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }
    pub fn concatenable(v: &Value) -> bool {
        string(v) || array(v)
    }
}

pub struct PolicyRegistry {
    ops: HashMap<String, Rc<OpDef>>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PolicyRegistry {
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Registry with every built-in op.
    pub fn with_builtins() -> Self {
        use Composition as C;
        let mut reg = Self::empty();

        // --- visibility (inert, tracked only) ---
        reg.register(def("PUB", Track::Visibility, OpAction::Visibility(true), None, None, false));
        reg.register(def("PRIV", Track::Visibility, OpAction::Visibility(false), None, None, false));

        // --- melder ---
        let melders: [(&str, Melder, Option<ShapeFn>, Option<Value>); 8] = [
            ("ANY", Melder::Any, None, None),
            ("CONCAT", Melder::Concat, Some(shapes::concatenable), None),
            ("ARRAY", Melder::Array, Some(shapes::array), Some(Value::Array(Vec::new()))),
            ("OBJECT", Melder::Object, Some(shapes::object), Some(Value::Map(Default::default()))),
            ("IDEA", Melder::Idea, Some(shapes::idea), None),
            ("DEEP", Melder::Deep, Some(shapes::object), Some(Value::Map(Default::default()))),
            ("EXCLUSIVE", Melder::Exclusive, None, None),
            ("STATIC", Melder::Static, None, None),
        ];
        for (name, melder, shape, default) in melders {
            reg.register(def(name, Track::Melder, OpAction::Meld(melder), shape, default, true));
        }
        for kind in [
            C::Method,
            C::Phase,
            C::Chain,
            C::ChainFunnel,
            C::Blender,
            C::ThisBlender,
            C::Funnel,
            C::ThisFunnel,
            C::Super,
        ] {
            let name = kind.name().to_uppercase();
            reg.register(def(
                &name,
                Track::Melder,
                OpAction::Meld(Melder::Compose(kind)),
                Some(shapes::function),
                None,
                true,
            ));
        }

        // --- async_method ---
        reg.register(def("ASYNC", Track::AsyncMethod, OpAction::Async(true), None, None, true));
        reg.register(def("SYNC", Track::AsyncMethod, OpAction::Async(false), None, None, true));

        // --- nest ---
        reg.register(def("NESTED_MOC", Track::Nest, OpAction::Nest, None, None, false));

        // --- state_type ---
        for (name, kind) in [
            ("WINDOW", StateKind::Window),
            ("THIS", StateKind::This),
            ("UUID", StateKind::Uuid),
            ("VAL", StateKind::Val),
            ("IGNORE", StateKind::Ignore),
        ] {
            reg.register(def(name, Track::StateType, OpAction::State(kind), None, None, false));
        }

        // --- type assertions ---
        let assertions: [(&str, ShapeFn); 8] = [
            ("ISSTRING", shapes::string),
            ("ISNUMBER", shapes::number),
            ("ISINTEGER", shapes::integer),
            ("ISBOOLEAN", shapes::boolean),
            ("ISARRAY", shapes::array),
            ("ISOBJECT", shapes::object),
            ("ISFUNCTION", shapes::function),
            ("ISIDEA", shapes::idea),
        ];
        for (name, shape) in assertions {
            reg.register_op(name, Track::Assertion(name.into()), Some(shape), None, true);
        }

        // --- exclusions ---
        let exclusions: [(&str, ShapeFn, bool); 5] = [
            ("NOTNULL", shapes::null, false),
            ("NOTEMPTY", shapes::empty, false),
            ("NOTSTRING", shapes::string, true),
            ("NOTNUMBER", shapes::number, true),
            ("NOTARRAY", shapes::array, true),
        ];
        for (name, shape, locks) in exclusions {
            reg.register_op(name, Track::Exclusion(name.into()), Some(shape), None, locks);
        }

        reg
    }

    /// Register a fully specified op. Re-registering a name replaces it.
    pub fn register(&mut self, op: OpDef) -> Rc<OpDef> {
        let op = Rc::new(op);
        self.ops.insert(op.name.clone(), op.clone());
        op
    }

    /// Register an op by track. The action follows from the track: assertion
    /// and exclusion tracks validate with `shape`, a custom melder op merges
    /// like ANY once `shape` accepts the value.
    pub fn register_op(
        &mut self,
        name: &str,
        track: Track,
        shape: Option<ShapeFn>,
        default: Option<Value>,
        lock_track: bool,
    ) -> Rc<OpDef> {
        let action = match &track {
            Track::Visibility => OpAction::Visibility(true),
            Track::Melder => OpAction::Meld(Melder::Any),
            Track::AsyncMethod => OpAction::Async(true),
            Track::Nest => OpAction::Nest,
            Track::StateType => OpAction::State(StateKind::Val),
            Track::Assertion(_) => OpAction::Assert,
            Track::Exclusion(_) => OpAction::Exclude,
        };
        self.register(def(name, track, action, shape, default, lock_track))
    }

    pub fn lookup(&self, name: &str) -> Result<Rc<OpDef>> {
        self.ops
            .get(&name.to_uppercase())
            .cloned()
            .ok_or_else(|| Error::UnknownMergeOp(name.to_string()))
    }

    pub fn track_of(&self, name: &str) -> Result<Track> {
        self.lookup(name).map(|op| op.track.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(&name.to_uppercase())
    }

    /// Parse legacy shorthand such as `"array"`, `"async_chain"` or
    /// `"method priv"`. Unknown tokens degrade to ANY with a warning.
    pub fn parse_shorthand(&self, shorthand: &str) -> Vec<Rc<OpDef>> {
        let mut out = Vec::new();
        for token in shorthand
            .split(|c: char| c.is_whitespace() || c == ',' || c == '|')
            .filter(|t| !t.is_empty())
        {
            let upper = token.to_uppercase();
            if let Ok(op) = self.lookup(&upper) {
                out.push(op);
                continue;
            }
            if let Some(rest) = upper.strip_prefix("ASYNC_") {
                if let (Ok(flag), Ok(op)) = (self.lookup("ASYNC"), self.lookup(rest)) {
                    out.push(flag);
                    out.push(op);
                    continue;
                }
            }
            warn!("Unknown merge op '{}' in shorthand '{}', using ANY", token, shorthand);
            if let Ok(any) = self.lookup("ANY") {
                out.push(any);
            }
        }
        out
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn def(
    name: &str,
    track: Track,
    action: OpAction,
    shape: Option<ShapeFn>,
    default: Option<Value>,
    locks: bool,
) -> OpDef {
    OpDef {
        name: name.to_string(),
        track,
        action,
        shape,
        default,
        locks,
    }
}
