mod apply;
mod check;
mod render;

pub use apply::apply;
pub use check::check;
pub use render::render;
