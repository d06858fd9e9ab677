//! The template/expression renderer (§4.D) and its literal-coercion chain.

mod coerce;
mod renderer;

pub use coerce::coerce;
pub use renderer::{render_str_value, render_value, Mode, RenderError};

/// Thin facade mirroring the shape callers reach for (a `Renderer` they
/// can hold onto), even though the underlying implementation is
/// stateless and backed by module-level functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Renderer
    }

    pub fn render(
        &self,
        template: &noetl_core::Value,
        context: &noetl_core::Value,
        mode: Mode,
    ) -> Result<noetl_core::Value, RenderError> {
        render_value(template, context, mode)
    }

    pub fn render_str(
        &self,
        template: &str,
        context: &noetl_core::Value,
        mode: Mode,
    ) -> Result<noetl_core::Value, RenderError> {
        render_str_value(template, context, mode)
    }
}
