//! Plan execution
//!
//! Walks a [`BatchPlan`] in dependency order and hands each effect to its
//! executor. The shared reload is refresh-only: it runs once, and only when a
//! file notifying it actually changed.

use std::collections::BTreeMap;

use super::{
    BatchPlan, CycleError, EdgeKind, Effect, EffectId, ExecError, FileExecutor, ReloadTrigger,
    ServiceExecutor, UnitState,
};
use crate::units::ValidationError;

/// What happened to one effect
#[derive(Debug)]
pub enum EffectOutcome {
    Changed,
    Unchanged,
    /// Refresh-only effect with no changed notifier
    NotTriggered,
    /// A prerequisite failed or was itself skipped
    Skipped { because: EffectId },
    Failed(ExecError),
}

impl EffectOutcome {
    fn from_result(result: Result<super::Change, ExecError>) -> Self {
        match result {
            Ok(change) if change.changed() => Self::Changed,
            Ok(_) => Self::Unchanged,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed)
    }

    /// Dependents of a failed or skipped effect do not run
    pub fn blocks(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Skipped { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::NotTriggered => "not triggered",
            Self::Skipped { .. } => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of applying one batch
#[derive(Debug)]
pub struct RunReport {
    pub effects: BTreeMap<EffectId, EffectOutcome>,
    pub units: BTreeMap<String, UnitState>,
    pub rejected: BTreeMap<String, ValidationError>,
}

impl RunReport {
    /// Number of times the reload ran (0 or 1)
    pub fn reloads(&self) -> usize {
        match self.effects.get(&EffectId::Reload) {
            Some(EffectOutcome::Changed) => 1,
            _ => 0,
        }
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .filter(|(_, state)| **state == UnitState::Failed)
            .map(|(name, _)| name.as_str())
    }

    /// True if any unit failed or the reload failed
    pub fn has_failures(&self) -> bool {
        self.failed_units().next().is_some()
            || matches!(
                self.effects.get(&EffectId::Reload),
                Some(EffectOutcome::Failed(_))
            )
    }

    pub fn changed(&self) -> impl Iterator<Item = &EffectId> {
        self.effects
            .iter()
            .filter(|(_, outcome)| outcome.is_changed())
            .map(|(id, _)| id)
    }
}

/// Executes plans against a set of executors
pub struct Applier<'a> {
    files: &'a dyn FileExecutor,
    services: &'a dyn ServiceExecutor,
    reload: &'a dyn ReloadTrigger,
}

impl<'a> Applier<'a> {
    pub fn new(
        files: &'a dyn FileExecutor,
        services: &'a dyn ServiceExecutor,
        reload: &'a dyn ReloadTrigger,
    ) -> Self {
        Self {
            files,
            services,
            reload,
        }
    }

    /// Apply every effect of `plan`. Executor errors are recorded in the
    /// report as they were returned; nothing is retried.
    pub async fn apply(&self, plan: &BatchPlan) -> Result<RunReport, CycleError> {
        let order = plan.order()?;
        let mut outcomes: BTreeMap<EffectId, EffectOutcome> = BTreeMap::new();

        for id in order {
            let Some(effect) = plan.effect(&id) else {
                continue;
            };

            let blocker = plan
                .sources(&id, EdgeKind::Before)
                .find(|dep| outcomes.get(*dep).is_some_and(|o| o.blocks()));
            if let Some(dep) = blocker {
                log::warn!("{}: skipped, {} did not succeed", id, dep);
                outcomes.insert(id.clone(), EffectOutcome::Skipped { because: dep.clone() });
                continue;
            }

            let outcome = match effect {
                Effect::File(file) => EffectOutcome::from_result(self.files.apply(file).await),
                Effect::Service(service) => {
                    EffectOutcome::from_result(self.services.apply(service).await)
                }
                Effect::Reload => {
                    let triggered = plan
                        .sources(&id, EdgeKind::Notify)
                        .any(|src| outcomes.get(src).is_some_and(|o| o.is_changed()));
                    if triggered {
                        match self.reload.reload().await {
                            Ok(()) => EffectOutcome::Changed,
                            Err(e) => EffectOutcome::Failed(e),
                        }
                    } else {
                        log::debug!("{}: nothing changed, not triggered", id);
                        EffectOutcome::NotTriggered
                    }
                }
            };

            if let EffectOutcome::Failed(e) = &outcome {
                log::error!("{}: {}", id, e);
            }
            outcomes.insert(id, outcome);
        }

        let units = plan
            .units()
            .iter()
            .map(|(name, state)| (name.clone(), unit_result(name, *state, &outcomes)))
            .collect();

        Ok(RunReport {
            effects: outcomes,
            units,
            rejected: plan.rejected().clone(),
        })
    }
}

fn unit_result(
    name: &str,
    declared: UnitState,
    outcomes: &BTreeMap<EffectId, EffectOutcome>,
) -> UnitState {
    if declared != UnitState::EffectsDeclared {
        return declared;
    }

    let ok = outcomes
        .iter()
        .filter(|(id, _)| id.unit() == Some(name))
        .all(|(_, outcome)| !outcome.blocks());
    let next = if ok {
        UnitState::Applied
    } else {
        UnitState::Failed
    };

    declared.transition(name, next)
}
