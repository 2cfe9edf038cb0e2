//! Unit descriptions: validation and rendering
//!
//! Raw parameters go through [`UnitSpec::from_params`], and the resulting
//! spec is turned into .service file text by [`render`].

mod render;
mod service;
mod validate;

pub use render::render;
pub use service::*;
pub use validate::{unit_name, Params, Shape, ValidationError};
