//! Property observers.
//!
//! `Instance::set` queues a `Change` for every observed property whose value
//! actually changed. `dispatch_changes` drains the queue in FIFO order and
//! awaits each observer in turn; nothing runs concurrently. The queue is
//! bounded by `RuntimeConfig::observer_queue_limit`.

use crate::error::{Error, Result};
use crate::function::{Function, Invocation};
use crate::object::Instance;
use crate::value::Value;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub property: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Default)]
pub(crate) struct Observers {
    watchers: HashMap<String, Vec<Function>>,
    queue: VecDeque<Change>,
}

impl Observers {
    pub(crate) fn watches(&self, property: &str) -> bool {
        self.watchers.get(property).is_some_and(|w| !w.is_empty())
    }

    pub(crate) fn enqueue(&mut self, change: Change, limit: usize) -> Result<()> {
        if self.queue.len() >= limit {
            return Err(Error::ObserverOverflow {
                property: change.property,
                limit,
            });
        }
        self.queue.push_back(change);
        Ok(())
    }
}

impl Instance {
    /// Call `observer` with `[new, old]` for every change to `property`.
    pub fn observe(&self, property: &str, observer: Function) {
        self.state_mut()
            .observers
            .watchers
            .entry(property.to_string())
            .or_default()
            .push(observer);
    }

    pub fn pending_changes(&self) -> usize {
        self.state().observers.queue.len()
    }

    /// Deliver queued changes. Returns how many changes were delivered.
    /// An observer failure stops the drain; later changes stay queued.
    pub async fn dispatch_changes(&self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let next = self.state_mut().observers.queue.pop_front();
            let Some(change) = next else {
                break;
            };
            let watchers = self
                .state()
                .observers
                .watchers
                .get(&change.property)
                .cloned()
                .unwrap_or_default();
            debug!(
                "Dispatching change of '{}' to {} observer(s)",
                change.property,
                watchers.len()
            );
            for watcher in &watchers {
                let inv = Invocation::new(
                    self.clone(),
                    change.property.clone(),
                    vec![change.new.clone(), change.old.clone()],
                );
                watcher.call_async(inv).await?;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}
