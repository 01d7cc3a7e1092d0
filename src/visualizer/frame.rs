//! Pure frame composition: volume and elapsed time in, draw commands out.

/// Straight (non-premultiplied) RGBA colour, alpha in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear,
    FillCircle {
        cx: f32,
        cy: f32,
        radius: f32,
        color: Rgba,
    },
    StrokeCircle {
        cx: f32,
        cy: f32,
        radius: f32,
        line_width: f32,
        color: Rgba,
    },
}

/// Colours and sizes of the pulse indicator
#[derive(Debug, Clone)]
pub struct PulseStyle {
    pub base_radius: f32,
    /// Opacity ceiling of the pulse disc
    pub max_alpha: f32,
    pub pulse_color: Rgba,
    pub core_color: Rgba,
    pub inner_ring_color: Rgba,
    pub outer_ring_color: Rgba,
    pub ring_width: f32,
}

impl Default for PulseStyle {
    fn default() -> Self {
        Self {
            base_radius: 50.0,
            max_alpha: 0.6,
            pulse_color: Rgba::new(59, 130, 246, 1.0),
            core_color: Rgba::new(37, 99, 235, 1.0),
            inner_ring_color: Rgba::new(147, 197, 253, 0.5),
            outer_ring_color: Rgba::new(191, 219, 254, 0.3),
            ring_width: 2.0,
        }
    }
}

/// Radius of the pulse disc for a volume in [0, 255]
pub fn pulse_radius(volume: f32, style: &PulseStyle) -> f32 {
    style.base_radius + volume.clamp(0.0, 255.0) / 2.0
}

/// Opacity of the pulse disc, proportional to volume up to `max_alpha`
pub fn pulse_alpha(volume: f32, style: &PulseStyle) -> f32 {
    (volume.max(0.0) / 128.0).min(style.max_alpha)
}

/// Ring radii at `elapsed_ms`; they move even when the volume is zero.
pub fn ring_radii(radius: f32, elapsed_ms: f64) -> (f32, f32) {
    let inner = radius + 10.0 + (elapsed_ms * 0.005).sin() as f32 * 5.0;
    let outer = radius + 20.0 + (elapsed_ms * 0.003).cos() as f32 * 8.0;
    (inner, outer)
}

/// Draw list for one frame, centred on a `width` × `height` canvas.
pub fn compose_frame(
    volume: f32,
    elapsed_ms: f64,
    width: f32,
    height: f32,
    style: &PulseStyle,
) -> Vec<DrawCommand> {
    let cx = width / 2.0;
    let cy = height / 2.0;
    let radius = pulse_radius(volume, style);
    let (inner, outer) = ring_radii(radius, elapsed_ms);

    vec![
        DrawCommand::Clear,
        DrawCommand::FillCircle {
            cx,
            cy,
            radius,
            color: style.pulse_color.with_alpha(pulse_alpha(volume, style)),
        },
        DrawCommand::FillCircle {
            cx,
            cy,
            radius: style.base_radius,
            color: style.core_color,
        },
        DrawCommand::StrokeCircle {
            cx,
            cy,
            radius: inner,
            line_width: style.ring_width,
            color: style.inner_ring_color,
        },
        DrawCommand::StrokeCircle {
            cx,
            cy,
            radius: outer,
            line_width: style.ring_width,
            color: style.outer_ring_color,
        },
    ]
}
