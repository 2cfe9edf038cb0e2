//! Per-unit progress through one deployment run
//!
//! ```text
//!     ┌─────────┐
//!     │ Pending │
//!     └────┬────┘
//!          │ parameters ok
//!     ┌────▼──────┐
//!     │ Validated │───────────────┐
//!     └────┬──────┘               │ bad parameter
//!          │ rendered             │
//!     ┌────▼─────┐                │
//!     │ Rendered │                │
//!     └────┬─────┘                │
//!          │ effects declared     │
//!     ┌────▼────────────┐    ┌────▼───┐
//!     │ EffectsDeclared │───►│ Failed │
//!     └────┬────────────┘    └────────┘
//!          │ all effects ok
//!     ┌────▼────┐
//!     │ Applied │
//!     └─────────┘
//! ```

/// Where a unit is in the validate → render → declare → apply pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Validated,
    Rendered,
    EffectsDeclared,
    Applied,
    Failed,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Rendered => "rendered",
            Self::EffectsDeclared => "declared",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }

    /// Applied and Failed end the run for a unit
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    /// Move to `next` if the pipeline allows it
    pub fn advance(self, next: UnitState) -> Option<UnitState> {
        use UnitState::*;
        let ok = match (self, next) {
            (Pending, Validated) | (Validated, Rendered) | (Rendered, EffectsDeclared) => true,
            (EffectsDeclared, Applied) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        };
        ok.then_some(next)
    }

    /// Like [`advance`](Self::advance), but an illegal move is logged as a
    /// bug and the unit keeps its current state
    pub fn transition(self, unit: &str, next: UnitState) -> UnitState {
        match self.advance(next) {
            Some(state) => {
                log::debug!("{}: {} -> {}", unit, self, state);
                state
            }
            None => {
                log::error!("{}: illegal state transition {} -> {}", unit, self, next);
                self
            }
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
