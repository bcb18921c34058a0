//! Runtime values.
//!
//! A property is a tagged union instead of a duck-typed object: plain data,
//! an unbuilt nested pattern idea, a built object, a raw function, or a
//! composed method. Which one it is gets decided when the value is created,
//! never guessed at merge time.

use crate::compose::ComposedMethod;
use crate::function::Function;
use crate::idea::Idea;
use crate::object::Instance;
use crate::ordered::OrderedMap;
use serde_json::Value as Json;
use std::fmt;

/// Property table of an object or idea.
pub type Props = OrderedMap<Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Map(Props),
    /// Unbuilt nested pattern instance, picked up by the builder phase.
    Idea(Box<Idea>),
    /// Built composed object.
    Object(Instance),
    Method(Function),
    Composed(ComposedMethod),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Idea(_) => "idea",
            Self::Object(_) => "object",
            Self::Method(_) => "function",
            Self::Composed(_) => "composed",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined | Self::Null)
    }

    /// Unset-looking values: undefined, null, false, zero, empty string.
    pub fn is_falsy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0 || f.is_nan(),
            Self::Str(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Method(_) | Self::Composed(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Props> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_idea(&self) -> Option<&Idea> {
        match self {
            Self::Idea(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Look up a key on a map, idea or built object.
    pub fn field(&self, key: &str) -> Value {
        match self {
            Self::Map(m) => m.get(key).cloned().unwrap_or_default(),
            Self::Idea(i) => i.props.get(key).cloned().unwrap_or_default(),
            Self::Object(o) => o.get(key),
            _ => Value::Undefined,
        }
    }

    /// Export as JSON. Functions are dropped, built objects export their
    /// current properties.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Undefined | Self::Null | Self::Method(_) | Self::Composed(_) => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::Str(s) => Json::String(s.clone()),
            Self::Array(a) => Json::Array(a.iter().map(Value::to_json).collect()),
            Self::Map(m) => props_to_json(m),
            Self::Idea(idea) => {
                let mut out = match props_to_json(&idea.props) {
                    Json::Object(o) => o,
                    _ => serde_json::Map::new(),
                };
                if let Some(pattern) = &idea.pattern {
                    out.insert("pattern".into(), Json::String(pattern.clone()));
                }
                Json::Object(out)
            }
            Self::Object(o) => props_to_json(&o.perspective(None, false)),
        }
    }

    /// Import JSON. Objects with a string `pattern` key become nested ideas.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(a) => Value::Array(a.iter().map(Value::from_json).collect()),
            Json::Object(o) => match o.get("pattern").and_then(Json::as_str) {
                Some(_) => Value::Idea(Box::new(Idea::from_json_object(o))),
                None => Value::Map(o.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
            },
        }
    }
}

pub(crate) fn props_to_json(props: &Props) -> Json {
    let mut out = serde_json::Map::new();
    for (k, v) in props.iter() {
        if v.is_callable() || v.is_undefined() {
            continue;
        }
        out.insert(k.to_string(), v.to_json());
    }
    Json::Object(out)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Idea(a), Self::Idea(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Method(a), Self::Method(b)) => a.ptr_eq(b),
            (Self::Composed(a), Self::Composed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Array(a) => f.debug_list().entries(a).finish(),
            Self::Map(m) => f.debug_map().entries(m.iter()).finish(),
            Self::Idea(i) => write!(f, "Idea({:?})", i.pattern),
            Self::Object(o) => write!(f, "Object({})", o.pattern()),
            Self::Method(func) => write!(f, "{:?}", func),
            Self::Composed(c) => write!(f, "Composed({})", c.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Self::Array(a)
    }
}

impl From<Props> for Value {
    fn from(m: Props) -> Self {
        Self::Map(m)
    }
}

impl From<Idea> for Value {
    fn from(i: Idea) -> Self {
        Self::Idea(Box::new(i))
    }
}

impl From<Instance> for Value {
    fn from(o: Instance) -> Self {
        Self::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Method(f)
    }
}

/// Build an array value from anything convertible.
pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
    Value::Array(items.into_iter().map(Into::into).collect())
}
