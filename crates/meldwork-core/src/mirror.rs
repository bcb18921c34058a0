//! Live STATIC property mirrors.
//!
//! A STATIC property's canonical value lives in one slot per
//! (declaring pattern, property). Every instance inheriting the declaration
//! reads and writes through the same slot, so a write on one side is seen by
//! all others at once.

use crate::runtime::Runtime;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct StaticSlot(Rc<RefCell<Value>>);

impl StaticSlot {
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    /// Store `value`. Returns false when it equals the current value, which
    /// is what keeps two-way mirrors from ping-ponging.
    pub fn set(&self, value: Value) -> bool {
        let mut slot = self.0.borrow_mut();
        if *slot == value {
            return false;
        }
        *slot = value;
        true
    }

    pub fn ptr_eq(&self, other: &StaticSlot) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Runtime {
    /// Slot for `pattern.prop`, created with `init` on first use.
    pub fn static_slot(&self, pattern: &str, prop: &str, init: Value) -> StaticSlot {
        let mut statics = self.0.statics.borrow_mut();
        statics
            .entry((pattern.to_string(), prop.to_string()))
            .or_insert_with(|| {
                debug!("Static slot {}.{} created", pattern, prop);
                StaticSlot::new(init)
            })
            .clone()
    }

    /// Canonical value of a STATIC property, if any instance wired it.
    pub fn static_value(&self, pattern: &str, prop: &str) -> Option<Value> {
        self.0
            .statics
            .borrow()
            .get(&(pattern.to_string(), prop.to_string()))
            .map(StaticSlot::get)
    }

    /// Write the canonical value. Every mirrored instance observes it.
    pub fn set_static(&self, pattern: &str, prop: &str, value: Value) {
        let slot = self.static_slot(pattern, prop, Value::Undefined);
        slot.set(value);
    }
}
