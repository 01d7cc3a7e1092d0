//! Pulsing volume indicator
//!
//! Composition is pure (`compose_frame`); a `Renderer` drives it on a fixed
//! tick and hands the draw list to a `Surface`.

mod frame;
mod renderer;
mod surface;

pub use frame::{compose_frame, pulse_alpha, pulse_radius, ring_radii, DrawCommand, PulseStyle, Rgba};
pub use renderer::{Renderer, CANVAS_SIZE};
pub use surface::{Surface, TerminalSurface};
