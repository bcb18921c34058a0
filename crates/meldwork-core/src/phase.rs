//! Phase machine.
//!
//! Phases are properties typed `phase` in the policy map. They run in the
//! order the map first saw them, after the two built-in phases, and each one
//! runs at most once per object: `NotStarted → Running → Completed`. A phase
//! that fails stays `Running`.

use crate::error::Result;
use crate::object::Instance;
use crate::policy::{Melder, StateKind};
use crate::value::Value;
use tracing::{debug, warn};

/// Run every declared phase, including ones declared later.
pub const FINAL: &str = "final";
/// Built-in: static mirrors, UUID state, contract validation.
pub const OBJECT_PHASE: &str = "object_phase";
/// Built-in: construct nested ideas.
pub const BUILDER_PHASE: &str = "builder_phase";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PhaseState {
    #[default]
    NotStarted,
    Running,
    Completed,
}

/// How far `machine` should advance an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhaseTarget {
    Final,
    Named(String),
    /// Build without running any phase.
    Skip,
}

impl PhaseTarget {
    fn stops_at(&self, phase: &str) -> bool {
        matches!(self, Self::Named(name) if name == phase)
    }
}

impl From<&str> for PhaseTarget {
    fn from(name: &str) -> Self {
        if name == FINAL {
            Self::Final
        } else {
            Self::Named(name.to_string())
        }
    }
}

impl From<String> for PhaseTarget {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<bool> for PhaseTarget {
    fn from(run: bool) -> Self {
        if run {
            Self::Final
        } else {
            Self::Skip
        }
    }
}

impl Instance {
    /// Advance through declared phases up to `target`. Re-entrant: completed
    /// phases are skipped, a phase still running stops the walk.
    pub fn machine(&self, target: impl Into<PhaseTarget>) -> Result<Instance> {
        let target = target.into();
        if target == PhaseTarget::Skip {
            return Ok(self.clone());
        }

        let order = {
            let mut state = self.state_mut();
            state.machine_live = true;
            if state.built_to != Some(PhaseTarget::Final) {
                state.built_to = Some(target.clone());
            }
            let mut order = vec![OBJECT_PHASE.to_string(), BUILDER_PHASE.to_string()];
            for phase in state.moc.phases() {
                if !order.contains(&phase) {
                    order.push(phase);
                }
            }
            order
        };
        if let PhaseTarget::Named(name) = &target {
            if !order.contains(name) {
                warn!("Phase '{}' is not declared on {}; running all phases", name, self.pattern());
            }
        }

        for phase in order {
            match self.phase_state(&phase) {
                PhaseState::Completed => {}
                PhaseState::Running => break,
                PhaseState::NotStarted => {
                    self.mark_phase(&phase, PhaseState::Running);
                    debug!("Running phase '{}' on {}", phase, self.pattern());
                    self.run_phase(&phase)?;
                    self.mark_phase(&phase, PhaseState::Completed);
                }
            }
            if target.stops_at(&phase) {
                break;
            }
        }
        Ok(self.clone())
    }

    fn mark_phase(&self, phase: &str, to: PhaseState) {
        self.state_mut().phases.insert(phase.to_string(), to);
    }

    fn run_phase(&self, phase: &str) -> Result<()> {
        match phase {
            OBJECT_PHASE => self.object_phase()?,
            BUILDER_PHASE => self.builder_phase()?,
            _ => {}
        }
        if self.get(phase).is_callable() {
            self.call(phase, Vec::new())?;
        }
        Ok(())
    }

    /// Built-in first phase.
    fn object_phase(&self) -> Result<()> {
        let runtime = self.runtime();
        let mut state = self.state_mut();
        let mut wire = Vec::new();
        let mut fresh = Vec::new();
        for (prop, policy) in state.moc.iter() {
            if policy.melder() == Melder::Static && !state.mirrors.contains_key(prop) {
                if let Some(owner) = policy.declared_by() {
                    wire.push((prop.to_string(), owner.to_string()));
                }
            }
            if policy.state_kind() == Some(StateKind::Uuid) && state.read(prop).is_falsy() {
                fresh.push(prop.to_string());
            }
        }
        for (prop, owner) in wire {
            let slot = runtime.static_slot(&owner, &prop, state.read(&prop));
            state.props.insert(prop.as_str(), slot.get());
            state.mirrors.insert(prop, slot);
        }
        for prop in fresh {
            let id = uuid::Uuid::new_v4().to_string();
            state.write(&prop, Value::Str(id));
        }
        let strict = runtime.config().strict_contracts;
        state.moc.validate_with(|prop| state.read(prop), strict)
    }

    pub fn phase_state(&self, phase: &str) -> PhaseState {
        self.state().phases.get(phase).copied().unwrap_or_default()
    }

    /// Completed phases in run order.
    pub fn completed_phases(&self) -> Vec<String> {
        let state = self.state();
        let mut done: Vec<String> = vec![OBJECT_PHASE.to_string(), BUILDER_PHASE.to_string()];
        for phase in state.moc.phases() {
            if !done.contains(&phase) {
                done.push(phase);
            }
        }
        done.retain(|p| state.phases.get(p) == Some(&PhaseState::Completed));
        done
    }

    /// Target of the most recent `machine` call.
    pub fn built_to(&self) -> Option<PhaseTarget> {
        self.state().built_to.clone()
    }

    pub fn machine_live(&self) -> bool {
        self.state().machine_live
    }
}
