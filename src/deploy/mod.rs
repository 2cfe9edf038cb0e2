//! Deployment planning
//!
//! Decides which side effects a unit needs (file write/removal, service
//! management, daemon reload) and how they are ordered. Nothing here touches
//! the host; execution lives in [`apply`] behind the [`executor`] traits.

pub mod apply;
pub mod executor;
mod graph;
mod state;

pub use apply::{Applier, EffectOutcome, RunReport};
pub use executor::{Change, ExecError, FileExecutor, ReloadTrigger, ServiceExecutor};
pub use graph::{CycleError, EffectGraph};
pub use state::UnitState;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde_json::Value;

use crate::units::{self, Ensure, Params, Shape, UnitSpec, ValidationError};

/// Owner, group and mode of every managed unit file
pub const FILE_OWNER: &str = "root";
pub const FILE_GROUP: &str = "root";
pub const FILE_MODE: u32 = 0o644;

/// Identity of a declared effect; names follow the `<unit>_file`,
/// `<unit>_service`, `systemd_reload` convention
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectId {
    File(String),
    Service(String),
    Reload,
}

impl EffectId {
    /// Unit this effect belongs to (None for the shared reload)
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::File(name) | Self::Service(name) => Some(name),
            Self::Reload => None,
        }
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(name) => write!(f, "{}_file", name),
            Self::Service(name) => write!(f, "{}_service", name),
            Self::Reload => f.write_str("systemd_reload"),
        }
    }
}

/// Desired state of a unit file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Present { content: String },
    Absent,
}

/// Write or remove one unit file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEffect {
    pub path: PathBuf,
    pub state: FileState,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

/// Keep a service enabled and running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEffect {
    pub name: String,
    pub running: bool,
    pub enable: bool,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    File(FileEffect),
    Service(ServiceEffect),
    Reload,
}

/// How two effects are related
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// `to` runs after `from`, and only if `from` changed something
    Notify,
    /// `to` runs after `from`, and is skipped if `from` failed
    Before,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub from: EffectId,
    pub to: EffectId,
    pub kind: EdgeKind,
}

impl Edge {
    fn new(from: EffectId, to: EffectId, kind: EdgeKind) -> Self {
        Self { from, to, kind }
    }
}

/// Effects declared for a single unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    pub name: String,
    pub file: FileEffect,
    /// Absent units manage only the file
    pub service: Option<ServiceEffect>,
}

impl UnitPlan {
    pub fn from_spec(spec: &UnitSpec) -> Self {
        let state = match spec.ensure {
            Ensure::Present => FileState::Present {
                content: units::render(spec),
            },
            Ensure::Absent => FileState::Absent,
        };

        let file = FileEffect {
            path: spec.file_path(),
            state,
            owner: FILE_OWNER.to_string(),
            group: FILE_GROUP.to_string(),
            mode: FILE_MODE,
        };

        let service = (spec.ensure == Ensure::Present).then(|| ServiceEffect {
            name: spec.name.clone(),
            running: true,
            enable: true,
            provider: "systemd".to_string(),
        });

        Self {
            name: spec.name.clone(),
            file,
            service,
        }
    }

    pub fn effects(&self) -> Vec<(EffectId, Effect)> {
        let mut effects = vec![(
            EffectId::File(self.name.clone()),
            Effect::File(self.file.clone()),
        )];
        if let Some(service) = &self.service {
            effects.push((
                EffectId::Service(self.name.clone()),
                Effect::Service(service.clone()),
            ));
        }
        effects
    }

    /// The file notifies the shared reload; the service waits for both
    pub fn edges(&self) -> Vec<Edge> {
        let file = EffectId::File(self.name.clone());
        let mut edges = vec![Edge::new(file.clone(), EffectId::Reload, EdgeKind::Notify)];
        if self.service.is_some() {
            let service = EffectId::Service(self.name.clone());
            edges.push(Edge::new(file, service.clone(), EdgeKind::Before));
            edges.push(Edge::new(EffectId::Reload, service, EdgeKind::Before));
        }
        edges
    }
}

/// Single-unit entry point: validate, render and declare effects
pub fn plan_unit(name: &str, params: &Params) -> Result<UnitPlan, ValidationError> {
    let spec = UnitSpec::from_params(name, params)?;
    Ok(UnitPlan::from_spec(&spec))
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("units expects a Hash, got {0}")]
    NotAHash(String),

    #[error("Effect declared twice: {0}")]
    Duplicate(EffectId),
}

/// All effects of one deployment run
///
/// Effects are keyed by identity, so the reload shared by every unit exists
/// exactly once no matter how many units notify it.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    effects: BTreeMap<EffectId, Effect>,
    edges: BTreeSet<Edge>,
    units: BTreeMap<String, UnitState>,
    rejected: BTreeMap<String, ValidationError>,
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchPlan {
    /// An empty plan still carries the (refresh-only) reload
    pub fn new() -> Self {
        let mut effects = BTreeMap::new();
        effects.insert(EffectId::Reload, Effect::Reload);
        Self {
            effects,
            edges: BTreeSet::new(),
            units: BTreeMap::new(),
            rejected: BTreeMap::new(),
        }
    }

    /// Add a unit's effects
    pub fn insert(&mut self, plan: UnitPlan) -> Result<(), PlanError> {
        let effects = plan.effects();
        if let Some((id, _)) = effects.iter().find(|(id, _)| self.effects.contains_key(id)) {
            return Err(PlanError::Duplicate(id.clone()));
        }
        self.effects.extend(effects);
        self.edges.extend(plan.edges());
        self.units.insert(plan.name, UnitState::EffectsDeclared);
        Ok(())
    }

    /// Record a unit that failed validation; it declares no effects
    pub fn reject(&mut self, name: &str, error: ValidationError) {
        self.units.insert(name.to_string(), UnitState::Failed);
        self.rejected.insert(name.to_string(), error);
    }

    pub fn effects(&self) -> impl Iterator<Item = (&EffectId, &Effect)> {
        self.effects.iter()
    }

    pub fn effect(&self, id: &EffectId) -> Option<&Effect> {
        self.effects.get(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Effects pointing at `id` with the given relation
    pub fn sources(&self, id: &EffectId, kind: EdgeKind) -> impl Iterator<Item = &EffectId> {
        let id = id.clone();
        self.edges
            .iter()
            .filter(move |e| e.to == id && e.kind == kind)
            .map(|e| &e.from)
    }

    pub fn units(&self) -> &BTreeMap<String, UnitState> {
        &self.units
    }

    pub fn rejected(&self) -> &BTreeMap<String, ValidationError> {
        &self.rejected
    }

    /// Execution order honouring every edge
    pub fn order(&self) -> Result<Vec<EffectId>, CycleError> {
        let mut graph = EffectGraph::new();
        for id in self.effects.keys() {
            graph.add_node(id.clone());
        }
        for edge in &self.edges {
            graph.add_edge(&edge.from, &edge.to);
        }
        graph.toposort()
    }
}

/// Batch entry point: plan every unit of a `units` mapping
///
/// A unit with bad parameters is rejected on its own; the rest of the batch
/// is still planned.
pub fn plan_batch(units: &Value) -> Result<BatchPlan, PlanError> {
    let Value::Object(units) = units else {
        return Err(PlanError::NotAHash(units.to_string()));
    };

    let mut batch = BatchPlan::new();
    for (name, raw) in units {
        match plan_entry(name, raw) {
            Ok(plan) => batch.insert(plan)?,
            Err(e) => {
                log::warn!("{}", e);
                batch.reject(name, e);
            }
        }
    }

    Ok(batch)
}

fn plan_entry(name: &str, raw: &Value) -> Result<UnitPlan, ValidationError> {
    let Value::Object(params) = raw else {
        return Err(ValidationError {
            unit: name.to_string(),
            field: name.to_string(),
            received: raw.to_string(),
            expected: Shape::Hash,
        });
    };
    let spec = UnitSpec::from_params(name, params)?;
    log::debug!("{}: validated", name);
    Ok(UnitPlan::from_spec(&spec))
}
