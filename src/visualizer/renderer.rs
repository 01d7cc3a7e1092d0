use std::io;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::frame::{compose_frame, PulseStyle};
use super::surface::Surface;

/// Logical canvas the pulse is composed on
pub const CANVAS_SIZE: f32 = 300.0;

/// Redraws the pulse indicator once per tick from the latest volume.
pub struct Renderer<S: Surface> {
    surface: S,
    volume: watch::Receiver<f32>,
    style: PulseStyle,
    frame_interval: Duration,
}

impl<S: Surface> Renderer<S> {
    pub fn new(surface: S, volume: watch::Receiver<f32>, fps: u32) -> Self {
        Self {
            surface,
            volume,
            style: PulseStyle::default(),
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
        }
    }

    pub fn with_style(mut self, style: PulseStyle) -> Self {
        self.style = style;
        self
    }

    /// Draw until `cancel` fires. Returns the number of frames presented.
    ///
    /// The volume is sampled on every tick, so a change shows up on the next
    /// frame and silence still animates the rings.
    pub async fn run(mut self, cancel: CancellationToken) -> io::Result<u64> {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut frames = 0u64;

        info!("Visualizer started ({:?} per frame)", self.frame_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let volume = *self.volume.borrow();
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

                    let commands =
                        compose_frame(volume, elapsed_ms, CANVAS_SIZE, CANVAS_SIZE, &self.style);
                    self.surface.draw(&commands);
                    self.surface.present()?;
                    frames += 1;
                }
            }
        }

        // Leave a blank frame behind
        self.surface.clear();
        self.surface.present()?;

        debug!("Visualizer stopped after {} frames", frames);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualizer::frame::Rgba;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recording {
        fills: Arc<Mutex<Vec<(f32, f32)>>>,
        presents: Arc<Mutex<usize>>,
    }

    impl Surface for Recording {
        fn clear(&mut self) {}

        fn fill_circle(&mut self, _cx: f32, _cy: f32, radius: f32, color: Rgba) {
            self.fills.lock().unwrap().push((radius, color.a));
        }

        fn stroke_circle(&mut self, _: f32, _: f32, _: f32, _: f32, _: Rgba) {}

        fn present(&mut self) -> io::Result<()> {
            *self.presents.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_renders_until_cancelled() {
        let surface = Recording::default();
        let (_tx, rx) = watch::channel(0.0f32);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Renderer::new(surface.clone(), rx, 100).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();

        let frames = task.await.unwrap().unwrap();
        assert!(frames > 0);
        // Every frame plus the final blank one
        assert_eq!(*surface.presents.lock().unwrap() as u64, frames + 1);
    }

    #[tokio::test]
    async fn test_picks_up_volume_change_on_next_frame() {
        let surface = Recording::default();
        let (tx, rx) = watch::channel(0.0f32);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Renderer::new(surface.clone(), rx, 100).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send_replace(100.0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let fills = surface.fills.lock().unwrap();
        // Pulse discs are every other fill (the core follows each)
        let pulses: Vec<f32> = fills.iter().step_by(2).map(|(r, _)| *r).collect();
        assert_eq!(pulses.first().copied(), Some(50.0));
        assert_eq!(pulses.last().copied(), Some(100.0));
    }
}
