//! sysunit - Declarative systemd unit deployment
//!
//! Turns a mapping of unit names to parameters into .service files and the
//! host changes needed to make them live:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                     manifest                      │
//! ├──────────────────────────────────────────────────┤
//! │  units::validate  →  units::render  →  deploy    │
//! ├──────────────────────────────────────────────────┤
//! │  file effects │ daemon-reload (once) │ services  │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod deploy;
pub mod manifest;
pub mod units;

pub use deploy::{plan_batch, plan_unit, Applier, BatchPlan, RunReport, UnitPlan};
pub use manifest::Manifest;
pub use units::{render, UnitSpec, ValidationError};
