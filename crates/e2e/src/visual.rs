//! Visual regression testing with screenshot comparison

use std::path::{Path, PathBuf};

use image::{GenericImageView, Pixel, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-channel difference tolerated for anti-aliasing and compression
const CHANNEL_TOLERANCE: i32 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone, Serialize)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,

    pub total_pixels: u64,

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    pub actual_hash: String,

    pub baseline_hash: String,
}

/// Baseline storage and pixel comparison
#[derive(Debug, Clone)]
pub struct VisualTester {
    /// Directory containing baseline screenshots
    baseline_dir: PathBuf,

    /// Default threshold (0.0 - 100.0 percent)
    threshold: f64,
}

impl VisualTester {
    pub fn new(baseline_dir: impl Into<PathBuf>, threshold: f64) -> Self {
        Self {
            baseline_dir: baseline_dir.into(),
            threshold,
        }
    }

    pub fn baseline_path(&self, name: &str) -> PathBuf {
        self.baseline_dir.join(format!("{}.png", name))
    }

    pub fn has_baseline(&self, name: &str) -> bool {
        self.baseline_path(name).exists()
    }

    /// Compare `actual` against the baseline called `name`.
    ///
    /// Returns `None` when no baseline exists yet. A diff image is written to
    /// `diff_path` when any pixel differs.
    pub fn compare(
        &self,
        name: &str,
        actual: &Path,
        diff_path: &Path,
        threshold: Option<f64>,
    ) -> E2eResult<Option<VisualDiff>> {
        let threshold = threshold.unwrap_or(self.threshold);
        let baseline_path = self.baseline_path(name);

        if !actual.exists() {
            return Err(E2eError::not_found(format!(
                "Actual screenshot not found: {}",
                actual.display()
            )));
        }
        if !self.has_baseline(name) {
            debug!("No baseline for '{}' at {}", name, baseline_path.display());
            return Ok(None);
        }

        let actual_hash = hash_file(actual)?;
        let baseline_hash = hash_file(&baseline_path)?;

        let actual_img = image::open(actual)?;

        // Quick hash comparison
        if actual_hash == baseline_hash {
            debug!("Screenshots match exactly (same hash)");
            return Ok(Some(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: (actual_img.width() as u64) * (actual_img.height() as u64),
                diff_image_path: None,
                actual_hash,
                baseline_hash,
            }));
        }

        let baseline_img = image::open(&baseline_path)?;
        if actual_img.dimensions() != baseline_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: actual {:?} vs baseline {:?}",
                actual_img.dimensions(),
                baseline_img.dimensions()
            );
        }

        let (aw, ah) = actual_img.dimensions();
        let (bw, bh) = baseline_img.dimensions();
        let (width, height) = (aw.max(bw), ah.max(bh));
        let actual_rgba = actual_img.to_rgba8();
        let baseline_rgba = baseline_img.to_rgba8();

        let mut diff_img = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        let total_pixels = (width as u64) * (height as u64);

        for y in 0..height {
            for x in 0..width {
                let in_actual = x < aw && y < ah;
                let in_baseline = x < bw && y < bh;
                if !(in_actual && in_baseline) {
                    // Area only one image covers counts as changed
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                    continue;
                }

                let actual_pixel = actual_rgba.get_pixel(x, y);
                let baseline_pixel = baseline_rgba.get_pixel(x, y);
                if pixels_differ(actual_pixel, baseline_pixel) {
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                } else {
                    let channels = actual_pixel.channels();
                    diff_img.put_pixel(
                        x,
                        y,
                        image::Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                    );
                }
            }
        }

        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            (diff_pixels as f64 / total_pixels as f64) * 100.0
        };
        let matches = diff_percent <= threshold;

        let diff_image_path = if diff_pixels > 0 {
            if let Some(parent) = diff_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            diff_img.save(diff_path)?;
            Some(diff_path.to_path_buf())
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual regression detected in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                name, diff_percent, threshold
            );
        }

        Ok(Some(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            actual_hash,
            baseline_hash,
        }))
    }

    /// Store `actual` as the baseline called `name`
    pub fn update_baseline(&self, name: &str, actual: &Path) -> E2eResult<PathBuf> {
        if !actual.exists() {
            return Err(E2eError::not_found(format!(
                "Cannot update baseline: screenshot not found: {}",
                actual.display()
            )));
        }

        std::fs::create_dir_all(&self.baseline_dir)?;
        let baseline_path = self.baseline_path(name);
        std::fs::copy(actual, &baseline_path)?;
        info!("Updated baseline for '{}'", name);

        Ok(baseline_path)
    }

    /// Names of all stored baselines, sorted
    pub fn list_baselines(&self) -> E2eResult<Vec<String>> {
        if !self.baseline_dir.exists() {
            return Ok(Vec::new());
        }

        let mut baselines: Vec<String> = walkdir::WalkDir::new(&self.baseline_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "png").unwrap_or(false))
            .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        baselines.sort();

        Ok(baselines)
    }
}

/// Check if two pixels differ beyond the channel tolerance
fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_TOLERANCE)
}

/// Hash a file using SHA256
fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}
