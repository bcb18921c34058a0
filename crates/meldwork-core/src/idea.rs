//! Ideas and inheritance declarations.
//!
//! An idea is the body of a pattern, or an ad-hoc body handed to
//! `Runtime::new_object`. When an idea names a `pattern` and sits inside a
//! property, the builder phase turns it into a built child object.

use crate::error::Result;
use crate::function::{Function, Invocation};
use crate::moc::PolicySpec;
use crate::ordered::OrderedMap;
use crate::value::{Props, Value};
use serde_json::Value as Json;
use std::future::Future;

/// How an ancestor is referenced.
#[derive(Clone, Debug, PartialEq)]
pub enum InheritMarker {
    /// Unconditionally included.
    Hard,
    /// Only included if some other reference hardens it.
    Soft,
    /// Soft, carrying the extra ancestors to pull in if it gets hardened.
    SoftWith(Vec<String>),
}

impl InheritMarker {
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard)
    }

    /// Extra ancestors implied by hardening this reference.
    pub fn payload(&self) -> &[String] {
        match self {
            Self::SoftWith(list) => list,
            _ => &[],
        }
    }
}

/// Ordered ancestor-name → marker map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Inherits(OrderedMap<InheritMarker>);

impl Inherits {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn hard(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name, InheritMarker::Hard);
        self
    }

    pub fn soft(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name, InheritMarker::Soft);
        self
    }

    pub fn soft_with<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        implied: impl IntoIterator<Item = S>,
    ) -> Self {
        let implied: Vec<String> = implied.into_iter().map(Into::into).collect();
        self.0.insert(name, InheritMarker::SoftWith(implied));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, marker: InheritMarker) {
        self.0.insert(name, marker);
    }

    pub fn get(&self, name: &str) -> Option<&InheritMarker> {
        self.0.get(name)
    }

    pub fn has_hard(&self) -> bool {
        self.0.values().any(InheritMarker::is_hard)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InheritMarker)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys()
    }

    /// Append entries from `other` that are not declared here yet. A hard
    /// entry in `other` replaces a soft one already present.
    pub fn extend(&mut self, other: &Inherits) {
        for (name, marker) in other.iter() {
            let replace = match self.0.get(name) {
                None => true,
                Some(existing) => marker.is_hard() && !existing.is_hard(),
            };
            if replace {
                self.0.insert(name, marker.clone());
            }
        }
    }

    /// `"a"`, `["a", "b"]`, or `{"a": true, "b": false, "c": ["d"]}`.
    pub fn from_json(json: &Json) -> Self {
        let mut out = Self::none();
        match json {
            Json::String(s) if !s.is_empty() => out.insert(s.clone(), InheritMarker::Hard),
            Json::Array(items) => {
                for name in items.iter().filter_map(Json::as_str) {
                    out.insert(name, InheritMarker::Hard);
                }
            }
            Json::Object(map) => {
                for (name, marker) in map {
                    let marker = match marker {
                        Json::Bool(true) => InheritMarker::Hard,
                        Json::String(s) => InheritMarker::SoftWith(vec![s.clone()]),
                        Json::Array(a) => InheritMarker::SoftWith(
                            a.iter().filter_map(Json::as_str).map(String::from).collect(),
                        ),
                        Json::Object(o) => InheritMarker::SoftWith(o.keys().cloned().collect()),
                        _ => InheritMarker::Soft,
                    };
                    out.insert(name.clone(), marker);
                }
            }
            _ => {}
        }
        out
    }
}

impl From<&str> for Inherits {
    fn from(name: &str) -> Self {
        if name.is_empty() {
            Self::none()
        } else {
            Self::none().hard(name)
        }
    }
}

impl From<String> for Inherits {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<Vec<&str>> for Inherits {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().fold(Self::none(), Self::hard)
    }
}

impl From<Vec<String>> for Inherits {
    fn from(names: Vec<String>) -> Self {
        names.into_iter().fold(Self::none(), Self::hard)
    }
}

impl<const N: usize> From<[&str; N]> for Inherits {
    fn from(names: [&str; N]) -> Self {
        names.into_iter().fold(Self::none(), Self::hard)
    }
}

impl From<()> for Inherits {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Idea {
    /// Pattern this idea should be built as, when used as a nested value or
    /// handed to `new_object` on its own.
    pub pattern: Option<String>,
    /// Extra ancestors on top of the pattern's own.
    pub inherits: Inherits,
    pub props: Props,
    /// Declared merge policy ("moc").
    pub policy: OrderedMap<PolicySpec>,
    /// Constructor argument list.
    pub args: Vec<Value>,
    /// Keep the builder phase from constructing this idea.
    pub skip_build: bool,
}

impl Idea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nested idea to be built as `pattern`.
    pub fn of(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key, value.into());
        self
    }

    pub fn method(
        self,
        key: impl Into<String>,
        body: impl Fn(Invocation) -> Result<Value> + 'static,
    ) -> Self {
        self.with(key, Function::new(body))
    }

    pub fn async_method<F, Fut>(self, key: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        self.with(key, Function::new_async(body))
    }

    pub fn moc(mut self, key: impl Into<String>, spec: impl Into<PolicySpec>) -> Self {
        self.policy.insert(key, spec.into());
        self
    }

    pub fn inherit(mut self, inherits: impl Into<Inherits>) -> Self {
        self.inherits.extend(&inherits.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn skip_build(mut self) -> Self {
        self.skip_build = true;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    /// Whether the builder phase should construct this idea.
    pub fn is_buildable(&self) -> bool {
        self.pattern.is_some() && !self.skip_build
    }

    pub(crate) fn from_json_object(object: &serde_json::Map<String, Json>) -> Self {
        let mut idea = Idea::new();
        for (key, value) in object {
            match key.as_str() {
                "pattern" => idea.pattern = value.as_str().map(String::from),
                "inherits" => idea.inherits = Inherits::from_json(value),
                "skip_build" => idea.skip_build = value.as_bool().unwrap_or(false),
                "moc" => {
                    if let Json::Object(decls) = value {
                        for (prop, spec) in decls {
                            idea.policy.insert(prop.clone(), PolicySpec::from_json(spec));
                        }
                    }
                }
                _ => {
                    idea.props.insert(key.clone(), Value::from_json(value));
                }
            }
        }
        idea
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherits_from_json_map_markers() {
        let inh = Inherits::from_json(&serde_json::json!({
            "object": true,
            "plugin": false,
            "theme": "dark",
            "extra": ["a", "b"]
        }));
        assert_eq!(inh.get("object"), Some(&InheritMarker::Hard));
        assert_eq!(inh.get("plugin"), Some(&InheritMarker::Soft));
        assert_eq!(inh.get("theme").map(InheritMarker::payload), Some(&["dark".to_string()][..]));
        assert_eq!(inh.get("extra").map(|m| m.payload().len()), Some(2));
    }

    #[test]
    fn inherits_from_json_keeps_key_order() {
        let inh = Inherits::from_json(&serde_json::json!({"zeta": true, "alpha": true}));
        let names: Vec<&str> = inh.names().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn empty_string_inherits_nothing() {
        assert!(Inherits::from("").is_empty());
    }
}
