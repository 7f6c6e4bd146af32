//! Placeholder render production for generated geometry.
//!
//! No real geometry backend is wired in; each requested view gets a
//! deterministic placeholder image with the configured dimensions so
//! downstream multimodal analysis has a stable input shape. Rendering never
//! fails the run: a view that cannot be written is logged and skipped.

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::config::RenderConfig;

const BACKGROUND: Rgb<u8> = Rgb([8, 20, 40]);
const FRAME: Rgb<u8> = Rgb([90, 110, 140]);
const ACCENT: Rgb<u8> = Rgb([240, 240, 240]);

/// One produced projection image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub view: String,
    pub image_path: PathBuf,
}

/// Generates projection images for reporting and model feedback.
#[derive(Debug, Clone)]
pub struct RenderProducer {
    views: Vec<String>,
    width: u32,
    height: u32,
}

impl RenderProducer {
    pub fn from_config(cfg: &RenderConfig) -> Self {
        Self {
            views: cfg.views.clone(),
            width: cfg.width,
            height: cfg.height,
        }
    }

    /// Produce one image per configured view under `renders_dir`.
    pub fn render(
        &self,
        model_artifact: Option<&Path>,
        iteration: u32,
        renders_dir: &Path,
    ) -> Vec<RenderResult> {
        if let Some(artifact) = model_artifact {
            debug!(artifact = %artifact.display(), "no geometry backend, rendering placeholders");
        }
        if let Err(err) = fs::create_dir_all(renders_dir) {
            warn!(dir = %renders_dir.display(), err = %err, "cannot create renders dir");
            return Vec::new();
        }

        let mut results = Vec::new();
        for view in &self.views {
            let image_path = renders_dir.join(format!("{iteration:02}_{view}.png"));
            let image = self.draw_placeholder(view, iteration);
            match image.save(&image_path) {
                Ok(()) => {
                    info!(view = %view, path = %image_path.display(), "rendered view");
                    results.push(RenderResult {
                        view: view.clone(),
                        image_path,
                    });
                }
                Err(err) => {
                    warn!(view = %view, err = %err, "render failed, skipping view");
                }
            }
        }
        results
    }

    /// Deterministic placeholder: framed background with an accent bar and
    /// diagonal whose positions derive only from the view name and iteration.
    fn draw_placeholder(&self, view: &str, iteration: u32) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let mut image = RgbImage::from_pixel(w, h, BACKGROUND);

        for x in 0..w {
            image.put_pixel(x, 0, FRAME);
            image.put_pixel(x, h - 1, FRAME);
        }
        for y in 0..h {
            image.put_pixel(0, y, FRAME);
            image.put_pixel(w - 1, y, FRAME);
        }

        let seed = fnv1a(view.as_bytes()) ^ (u64::from(iteration).wrapping_mul(0x9e37_79b9));
        if w > 4 && h > 4 {
            let bar_x = 2 + (seed % u64::from(w - 4)) as u32;
            for y in 2..h - 2 {
                image.put_pixel(bar_x, y, ACCENT);
            }
            for step in 0..w.min(h) - 4 {
                image.put_pixel(2 + step, 2 + step, ACCENT);
            }
        }
        image
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}
