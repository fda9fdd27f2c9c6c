//! Cortical image export: per-visual-area 2-D projections of predicted and
//! measured responses, bundled with an index manifest into a single archive.
//!
//! Index manifest row format, one row per rendered image, no header:
//! `stimulus_identifier,FUNCTIONAL|PREDICTION,visual_area,filename`

use crate::error::{Result, WorkerError};
use crate::models::{CorticalLocation, FunctionalData, ImageRecord, ResponseMatrix, ResultBundle};
use image::{Rgba, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Fixed archive filename, so downstream consumers can locate the
/// attachment by a known name
pub const DEFAULT_ARCHIVE_NAME: &str = "cortical-images.tar";
/// Filename of the index manifest inside the archive
pub const INDEX_MANIFEST_NAME: &str = "index.csv";
/// Anatomical visual-area partitions rendered per stimulus
pub const VISUAL_AREAS: [u8; 3] = [1, 2, 3];

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Rendering configuration, passed explicitly per export pass rather than
/// mutating any shared engine state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    /// Gaussian-like smoothing width in degrees of visual angle
    pub smoothing: Option<f64>,
    /// Outlier suppression strength: values are clamped to the
    /// `[1/n, 1 - 1/n]` quantile range of each rendered image
    pub speckle: Option<u32>,
    pub width: u32,
    pub height: u32,
}

impl RenderConfig {
    /// Default configuration for predicted responses: no smoothing, no
    /// speckle suppression
    pub fn prediction() -> Self {
        Self {
            smoothing: None,
            speckle: None,
            width: 400,
            height: 400,
        }
    }

    /// Configuration for measured functional responses, which are noisier
    pub fn functional() -> Self {
        Self {
            smoothing: Some(0.5),
            speckle: Some(500),
            ..Self::prediction()
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::prediction()
    }
}

/// Whether a rendered image came from measured or predicted data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Functional,
    Prediction,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Functional => "FUNCTIONAL",
            SourceKind::Prediction => "PREDICTION",
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            SourceKind::Functional => "func",
            SourceKind::Prediction => "pred",
        }
    }
}

/// One row of the index manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub stimulus_identifier: String,
    pub kind: SourceKind,
    pub visual_area: u8,
    pub filename: String,
}

impl IndexRow {
    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{}",
            self.stimulus_identifier,
            self.kind.as_str(),
            self.visual_area,
            self.filename
        )
    }
}

/// Renders cortical projection images for one run and bundles them into the
/// cortical image archive
pub struct CorticalImageExporter;

impl CorticalImageExporter {
    pub fn new() -> Self {
        Self
    }

    /// Render one projection per (stimulus, visual area) from the predicted
    /// responses, plus the same grid from measured responses when
    /// functional data is supplied, and bundle everything with the index
    /// manifest into `cortical-images.tar` inside the output directory.
    ///
    /// Functional images are emitted before prediction images; within each
    /// pass the order is stimulus index ascending, then visual area
    /// ascending. The index manifest rows match this order exactly, so the
    /// archive is reproducible for identical inputs. Any single rendering
    /// failure aborts the whole export.
    pub fn export(
        &self,
        bundle: &ResultBundle,
        images: &[ImageRecord],
        functional: Option<&FunctionalData>,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let scratch = tempfile::tempdir().map_err(render_io)?;
        let mut rows: Vec<IndexRow> = Vec::new();

        if let Some(func) = functional {
            self.render_pass(
                &func.responses,
                &func.locations,
                bundle.max_eccentricity,
                images,
                SourceKind::Functional,
                &RenderConfig::functional(),
                scratch.path(),
                &mut rows,
            )?;
        }

        self.render_pass(
            &bundle.prediction,
            &bundle.cortex_locations,
            bundle.max_eccentricity,
            images,
            SourceKind::Prediction,
            &RenderConfig::prediction(),
            scratch.path(),
            &mut rows,
        )?;

        let index_path = scratch.path().join(INDEX_MANIFEST_NAME);
        let mut index = File::create(&index_path).map_err(render_io)?;
        for row in &rows {
            writeln!(index, "{}", row.csv_line()).map_err(render_io)?;
        }

        let archive_path = output_dir.join(DEFAULT_ARCHIVE_NAME);
        let mut builder = tar::Builder::new(File::create(&archive_path).map_err(render_io)?);
        for row in &rows {
            builder
                .append_path_with_name(scratch.path().join(&row.filename), &row.filename)
                .map_err(render_io)?;
        }
        builder
            .append_path_with_name(&index_path, INDEX_MANIFEST_NAME)
            .map_err(render_io)?;
        builder.finish().map_err(render_io)?;

        tracing::info!(
            archive = %archive_path.display(),
            image_count = rows.len(),
            functional = functional.is_some(),
            "exported cortical image archive"
        );
        Ok(archive_path)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_pass(
        &self,
        responses: &ResponseMatrix,
        locations: &[CorticalLocation],
        max_eccentricity: f64,
        images: &[ImageRecord],
        kind: SourceKind,
        config: &RenderConfig,
        scratch: &Path,
        rows: &mut Vec<IndexRow>,
    ) -> Result<()> {
        for (image_number, image) in images.iter().enumerate() {
            for &visual_area in &VISUAL_AREAS {
                let rendered = render_projection(
                    responses,
                    locations,
                    max_eccentricity,
                    visual_area,
                    image_number,
                    config,
                )?;
                let filename = format!("{}_{}.v{}.png", kind.file_prefix(), image_number, visual_area);
                rendered
                    .save(scratch.join(&filename))
                    .map_err(|e| WorkerError::RenderError {
                        message: format!("failed to save {}: {}", filename, e),
                    })?;
                rows.push(IndexRow {
                    stimulus_identifier: image.identifier.clone(),
                    kind,
                    visual_area,
                    filename,
                });
            }
        }
        Ok(())
    }
}

impl Default for CorticalImageExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Render one 2-D projection of the response values for a single stimulus
/// restricted to one visual area.
///
/// Each cortical location is painted as a filled disc at its receptive
/// field center, mapped from visual field coordinates (bounded by the
/// maximum eccentricity) onto the image plane, with intensity proportional
/// to its normalized response value.
pub fn render_projection(
    responses: &ResponseMatrix,
    locations: &[CorticalLocation],
    max_eccentricity: f64,
    visual_area: u8,
    image_number: usize,
    config: &RenderConfig,
) -> Result<RgbaImage> {
    if image_number >= responses.stimulus_count() {
        return Err(WorkerError::RenderError {
            message: format!(
                "stimulus index {} out of range ({} stimuli in response matrix)",
                image_number,
                responses.stimulus_count()
            ),
        });
    }
    if locations.len() != responses.location_count() {
        return Err(WorkerError::RenderError {
            message: format!(
                "{} location descriptors for {} response rows",
                locations.len(),
                responses.location_count()
            ),
        });
    }
    if max_eccentricity <= 0.0 {
        return Err(WorkerError::RenderError {
            message: format!("non-positive max eccentricity {}", max_eccentricity),
        });
    }

    let mut selected: Vec<(CorticalLocation, f64)> = Vec::new();
    for (row, location) in locations.iter().enumerate() {
        if location.visual_area != visual_area {
            continue;
        }
        // Row count was checked above; the column is in range
        let value = responses.value(row, image_number).unwrap_or(0.0);
        selected.push((*location, value));
    }

    let mut values: Vec<f64> = selected.iter().map(|(_, v)| *v).collect();
    if let Some(strength) = config.speckle {
        winsorize(&mut values, strength);
    }
    let (lo, hi) = value_range(&values);

    let mut canvas = RgbaImage::from_pixel(config.width, config.height, BACKGROUND);
    let pixels_per_degree = f64::from(config.width) / (2.0 * max_eccentricity);

    for ((location, _), value) in selected.iter().zip(&values) {
        let t = if hi > lo { (value - lo) / (hi - lo) } else { 0.5 };
        let intensity = (t.clamp(0.0, 1.0) * 255.0).round() as u8;

        let cx = (location.prf.center_x + max_eccentricity) * pixels_per_degree;
        let cy = (max_eccentricity - location.prf.center_y) * pixels_per_degree;
        let radius = (location.prf.radius * pixels_per_degree).max(1.0);
        paint_disc(&mut canvas, cx, cy, radius, intensity);
    }

    if let Some(smoothing) = config.smoothing {
        let radius = ((smoothing * pixels_per_degree).round() as u32).max(1);
        box_blur(&mut canvas, radius);
    }

    Ok(canvas)
}

/// Clamp values to the `[1/n, 1 - 1/n]` quantile range, damping isolated
/// outliers before normalization
fn winsorize(values: &mut [f64], strength: u32) {
    if values.len() < 2 || strength < 2 {
        return;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let fraction = 1.0 / f64::from(strength);
    let lo_idx = ((sorted.len() - 1) as f64 * fraction).floor() as usize;
    let hi_idx = ((sorted.len() - 1) as f64 * (1.0 - fraction)).ceil() as usize;
    let (lo, hi) = (sorted[lo_idx], sorted[hi_idx]);
    for value in values.iter_mut() {
        *value = value.clamp(lo, hi);
    }
}

fn value_range(values: &[f64]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &value in values {
        lo = lo.min(value);
        hi = hi.max(value);
    }
    if lo > hi {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

fn paint_disc(canvas: &mut RgbaImage, cx: f64, cy: f64, radius: f64, intensity: u8) {
    let (width, height) = canvas.dimensions();
    let min_x = ((cx - radius).floor().max(0.0)) as u32;
    let max_x = ((cx + radius).ceil().min(f64::from(width) - 1.0)).max(0.0) as u32;
    let min_y = ((cy - radius).floor().max(0.0)) as u32;
    let max_y = ((cy + radius).ceil().min(f64::from(height) - 1.0)).max(0.0) as u32;
    if cx + radius < 0.0 || cy + radius < 0.0 {
        return;
    }
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= radius * radius {
                canvas.put_pixel(x, y, Rgba([intensity, intensity, intensity, 255]));
            }
        }
    }
}

/// Separable box blur over the luminance channels
fn box_blur(canvas: &mut RgbaImage, radius: u32) {
    let (width, height) = canvas.dimensions();
    let radius = radius as i64;
    let pass = |horizontal: bool, source: &RgbaImage| {
        let mut target = source.clone();
        for y in 0..height {
            for x in 0..width {
                let mut sum = 0u64;
                let mut count = 0u64;
                for offset in -radius..=radius {
                    let (sx, sy) = if horizontal {
                        (i64::from(x) + offset, i64::from(y))
                    } else {
                        (i64::from(x), i64::from(y) + offset)
                    };
                    if sx < 0 || sy < 0 || sx >= i64::from(width) || sy >= i64::from(height) {
                        continue;
                    }
                    sum += u64::from(source.get_pixel(sx as u32, sy as u32)[0]);
                    count += 1;
                }
                let v = (sum / count.max(1)) as u8;
                target.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        target
    };
    let horizontal = pass(true, canvas);
    *canvas = pass(false, &horizontal);
}

fn render_io(e: std::io::Error) -> WorkerError {
    WorkerError::RenderError {
        message: e.to_string(),
    }
}
