//! Meldwork Core - pattern registry, merge policy, inheritance resolution,
//! method composition and the object phase machine

pub mod builder;
pub mod compose;
pub mod config;
pub mod error;
pub mod function;
pub mod idea;
pub mod inherit;
pub mod merge;
pub mod mirror;
pub mod moc;
pub mod object;
pub mod observer;
pub mod ordered;
pub mod phase;
pub mod policy;
pub mod runtime;
pub mod value;

/// Name of the root pattern every other pattern descends from.
pub const ROOT_PATTERN: &str = "object";

/// Pseudo-ancestor under which the per-instance idea is melded last.
pub const IDEA_LAYER: &str = "idea";

pub use builder::Blueprint;
pub use compose::{ComposedMethod, Subscription};
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use function::{Function, Invocation};
pub use idea::{Idea, InheritMarker, Inherits};
pub use merge::Merger;
pub use mirror::StaticSlot;
pub use moc::{PolicyMap, PolicySpec, PropertyPolicy};
pub use object::Instance;
pub use observer::Change;
pub use ordered::OrderedMap;
pub use phase::{PhaseState, PhaseTarget};
pub use policy::{Composition, Melder, OpDef, PolicyRegistry, StateKind, Track};
pub use runtime::{BaseConstructor, LayeredConstructor, Pattern, Runtime};
pub use value::{array, Props, Value};
