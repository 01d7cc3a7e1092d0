use std::io::{self, Stdout, Write};

use super::frame::{DrawCommand, Rgba};

/// Something the pulse indicator can be drawn onto.
pub trait Surface: Send {
    fn clear(&mut self);

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba);

    fn stroke_circle(&mut self, cx: f32, cy: f32, radius: f32, line_width: f32, color: Rgba);

    /// Flush the finished frame to the output.
    fn present(&mut self) -> io::Result<()>;

    fn draw(&mut self, commands: &[DrawCommand]) {
        for command in commands {
            match *command {
                DrawCommand::Clear => self.clear(),
                DrawCommand::FillCircle {
                    cx,
                    cy,
                    radius,
                    color,
                } => self.fill_circle(cx, cy, radius, color),
                DrawCommand::StrokeCircle {
                    cx,
                    cy,
                    radius,
                    line_width,
                    color,
                } => self.stroke_circle(cx, cy, radius, line_width, color),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    rgb: [f32; 3],
    coverage: f32,
}

impl Cell {
    fn blend(&mut self, color: Rgba) {
        let a = color.a.clamp(0.0, 1.0);
        if a <= 0.0 {
            return;
        }
        let src = [color.r as f32, color.g as f32, color.b as f32];
        for (dst, src) in self.rgb.iter_mut().zip(src) {
            *dst = src * a + *dst * (1.0 - a);
        }
        self.coverage = a + self.coverage * (1.0 - a);
    }
}

const SHADES: [char; 6] = [' ', '.', ':', '+', '#', '@'];

/// Rasterizes onto a character grid and writes ANSI truecolor frames.
///
/// Draw coordinates are in canvas units; each cell samples the canvas at its
/// centre.
pub struct TerminalSurface<W: Write + Send = Stdout> {
    out: W,
    cols: usize,
    rows: usize,
    canvas_width: f32,
    canvas_height: f32,
    cells: Vec<Cell>,
}

impl TerminalSurface<Stdout> {
    pub fn stdout(cols: usize, rows: usize, canvas_width: f32, canvas_height: f32) -> Self {
        Self::new(io::stdout(), cols, rows, canvas_width, canvas_height)
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W, cols: usize, rows: usize, canvas_width: f32, canvas_height: f32) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            out,
            cols,
            rows,
            canvas_width,
            canvas_height,
            cells: vec![Cell::default(); cols * rows],
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn cell_size(&self) -> (f32, f32) {
        (
            self.canvas_width / self.cols as f32,
            self.canvas_height / self.rows as f32,
        )
    }

    /// Blend `color` into every cell whose centre satisfies `hit(distance)`
    fn paint(&mut self, cx: f32, cy: f32, color: Rgba, hit: impl Fn(f32) -> bool) {
        let (cell_w, cell_h) = self.cell_size();
        for row in 0..self.rows {
            let y = (row as f32 + 0.5) * cell_h;
            for col in 0..self.cols {
                let x = (col as f32 + 0.5) * cell_w;
                let distance = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
                if hit(distance) {
                    self.cells[row * self.cols + col].blend(color);
                }
            }
        }
    }

    /// Current frame as text, one line per row
    pub fn render_text(&self) -> String {
        let mut text = String::with_capacity((self.cols + 1) * self.rows);
        for row in self.cells.chunks(self.cols) {
            text.extend(row.iter().map(|cell| shade(cell.coverage)));
            text.push('\n');
        }
        text
    }
}

fn shade(coverage: f32) -> char {
    let idx = (coverage.clamp(0.0, 1.0) * (SHADES.len() - 1) as f32).round() as usize;
    SHADES[idx]
}

impl<W: Write + Send> Surface for TerminalSurface<W> {
    fn clear(&mut self) {
        self.cells.fill(Cell::default());
    }

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba) {
        self.paint(cx, cy, color, |d| d <= radius);
    }

    fn stroke_circle(&mut self, cx: f32, cy: f32, radius: f32, line_width: f32, color: Rgba) {
        // A cell is much coarser than a line; keep rings at least one cell wide
        let (cell_w, cell_h) = self.cell_size();
        let half = (line_width / 2.0).max(cell_w.max(cell_h) / 2.0);
        self.paint(cx, cy, color, |d| (d - radius).abs() <= half);
    }

    fn present(&mut self) -> io::Result<()> {
        let mut frame = String::from("\x1b[H");
        for row in self.cells.chunks(self.cols) {
            for cell in row {
                let [r, g, b] = cell.rgb.map(|c| c.round().clamp(0.0, 255.0) as u8);
                frame.push_str(&format!("\x1b[38;2;{r};{g};{b}m{}", shade(cell.coverage)));
            }
            frame.push_str("\x1b[0m\n");
        }
        self.out.write_all(frame.as_bytes())?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualizer::frame::{compose_frame, PulseStyle};

    fn surface() -> TerminalSurface<Vec<u8>> {
        TerminalSurface::new(Vec::new(), 30, 30, 300.0, 300.0)
    }

    #[test]
    fn test_core_fills_centre_only() {
        let mut s = surface();
        s.fill_circle(150.0, 150.0, 50.0, Rgba::new(255, 0, 0, 1.0));

        let text = s.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 30);
        assert_eq!(lines[15].chars().nth(15), Some('@'));
        assert_eq!(lines[0].chars().next(), Some(' '));
    }

    #[test]
    fn test_clear_resets_cells() {
        let mut s = surface();
        s.fill_circle(150.0, 150.0, 100.0, Rgba::new(255, 255, 255, 1.0));
        s.clear();

        assert!(s.render_text().chars().all(|c| c == ' ' || c == '\n'));
    }

    #[test]
    fn test_ring_leaves_centre_empty() {
        let mut s = surface();
        s.stroke_circle(150.0, 150.0, 100.0, 2.0, Rgba::new(255, 255, 255, 1.0));

        let text = s.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[15].chars().nth(15), Some(' '));
        assert!(lines[15].contains('@'));
    }

    #[test]
    fn test_present_writes_ansi_frame() {
        let mut s = surface();
        s.draw(&compose_frame(100.0, 0.0, 300.0, 300.0, &PulseStyle::default()));
        s.present().unwrap();

        let out = String::from_utf8(s.into_inner()).unwrap();
        assert!(out.starts_with("\x1b[H"));
        assert!(out.contains("\x1b[38;2;37;99;235m@"));
        assert_eq!(out.matches('\n').count(), 30);
    }
}
