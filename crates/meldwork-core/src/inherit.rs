//! Inheritance resolution.
//!
//! Turns a hard/soft inherits map into the ordered list of hard ancestors.
//! Ancestors resolve depth-first, in declaration order, before the pattern
//! that names them. A hard reference always beats a soft one, no matter which
//! is seen first; hardening a soft entry also hardens the ancestors its
//! payload names.

use crate::idea::{InheritMarker, Inherits};
use crate::ordered::OrderedMap;
use crate::runtime::{PatternTable, Runtime};
use tracing::{debug, warn};

struct Resolver<'a> {
    table: &'a PatternTable,
    acc: OrderedMap<InheritMarker>,
    visiting: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(table: &'a PatternTable) -> Self {
        Self {
            table,
            acc: OrderedMap::new(),
            visiting: Vec::new(),
        }
    }

    fn fold(&mut self, inherits: &Inherits) {
        for (name, marker) in inherits.iter() {
            if marker.is_hard() {
                self.harden(name);
            } else {
                self.soften(name, marker);
            }
        }
    }

    fn harden(&mut self, name: &str) {
        if self.acc.get(name).is_some_and(InheritMarker::is_hard) {
            return;
        }
        if self.visiting.iter().any(|v| v == name) {
            warn!("Inheritance cycle through '{}'; ignoring back edge", name);
            return;
        }
        let Some(pattern) = self.table.get(name).cloned() else {
            warn!("Unknown ancestor pattern '{}', skipping", name);
            return;
        };

        let payload = self
            .acc
            .remove(name)
            .map(|m| m.payload().to_vec())
            .unwrap_or_default();

        self.visiting.push(name.to_string());
        self.fold(&pattern.inherits);
        self.visiting.pop();

        self.acc.insert(name, InheritMarker::Hard);
        for extra in payload {
            self.harden(&extra);
        }
    }

    fn soften(&mut self, name: &str, marker: &InheritMarker) {
        match self.acc.get(name).map(InheritMarker::is_hard) {
            Some(true) => {
                // Already a member: what the soft entry would imply comes along.
                for extra in marker.payload() {
                    self.harden(extra);
                }
            }
            Some(false) => {
                if let Some(existing) = self.acc.get_mut(name) {
                    let mut implied = existing.payload().to_vec();
                    for extra in marker.payload() {
                        if !implied.contains(extra) {
                            implied.push(extra.clone());
                        }
                    }
                    *existing = if implied.is_empty() {
                        InheritMarker::Soft
                    } else {
                        InheritMarker::SoftWith(implied)
                    };
                }
            }
            None => {
                self.acc.insert(name, marker.clone());
            }
        }
    }

    fn finish(self) -> Vec<String> {
        self.acc
            .iter()
            .filter(|(_, m)| m.is_hard())
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

impl Runtime {
    /// Ordered hard ancestor set for `inherits`. With `skip_core` the
    /// configured core patterns are left out.
    pub fn extend_inherits(&self, inherits: &Inherits, skip_core: bool) -> Vec<String> {
        let resolved = {
            let table = self.0.patterns.borrow();
            let mut resolver = Resolver::new(&table);
            resolver.fold(inherits);
            resolver.finish()
        };
        debug!("Resolved inherits: {:?}", resolved);
        if !skip_core {
            return resolved;
        }
        resolved
            .into_iter()
            .filter(|name| !self.config().is_core(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::idea::{Idea, Inherits};
    use crate::runtime::Runtime;

    #[test]
    fn ancestors_precede_descendants() {
        let rt = Runtime::new();
        rt.pattern("shape", "object", Idea::new()).unwrap();
        rt.pattern("square", "shape", Idea::new()).unwrap();
        let list = rt.extend_inherits(&Inherits::from("square"), false);
        assert_eq!(list, vec!["object", "shape", "square"]);
    }

    #[test]
    fn unknown_ancestor_is_skipped() {
        let rt = Runtime::new();
        rt.pattern("a", vec!["object", "ghost"], Idea::new()).unwrap();
        let list = rt.extend_inherits(&Inherits::from("a"), false);
        assert_eq!(list, vec!["object", "a"]);
    }

    #[test]
    fn skip_core_drops_root() {
        let rt = Runtime::new();
        rt.pattern("a", (), Idea::new()).unwrap();
        assert_eq!(rt.extend_inherits(&Inherits::from("a"), true), vec!["a"]);
    }
}
