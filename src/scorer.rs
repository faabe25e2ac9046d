//! Per-cell mark scoring and per-row selection.
//!
//! Every cell of a row is scored on four signals inside a centered region of
//! interest (ROI): mean ink, Sobel edge energy, ink along both diagonals, and
//! an "X" hint from text or the recognizer. The weighted composite is then
//! corrected by a damped per-column baseline so that printed artifacts shared
//! by a whole column do not win, and the best column must beat the runner-up
//! by a configurable margin.

use std::sync::Arc;

use image::{GrayImage, imageops};
use imageproc::gradients::sobel_gradients;
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::document::{BBox, Page};
use crate::grid::{COLUMN_COUNT, GridGeometry, median};
use crate::ocr::Recognizer;

/// Largest Sobel magnitude an 8-bit image can produce.
const SOBEL_MAX: f32 = 1442.5;
/// Runner-up floor used when reporting the margin ratio.
const MARGIN_FLOOR: f32 = 1e-4;
const MARGIN_CAP: f32 = 1e4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellScore {
    pub row: usize,
    /// 0-based column.
    pub column: usize,
    pub darkness: f32,
    pub edge: f32,
    pub diagonal: f32,
    pub ocr_hint: bool,
    pub composite: f32,
}

/// Outcome of one row: a 1-based column or nothing trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Column(u8),
    Unknown,
}

impl Selection {
    pub fn column(&self) -> Option<u8> {
        match self {
            Selection::Column(c) => Some(*c),
            Selection::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDecision {
    pub row: usize,
    pub selection: Selection,
    /// Best adjusted score over the runner-up (floored), capped.
    pub margin: f32,
    pub adjusted: [f32; COLUMN_COUNT],
    pub cells: [CellScore; COLUMN_COUNT],
}

/// Integer pixel rectangle clamped to the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub(crate) fn from_bbox(bbox: &BBox, raster: &GrayImage) -> Option<Self> {
        let x0 = bbox.x0.round().max(0.0) as u32;
        let y0 = bbox.y0.round().max(0.0) as u32;
        let x1 = (bbox.x1.round().max(0.0) as u32).min(raster.width());
        let y1 = (bbox.y1.round().max(0.0) as u32).min(raster.height());
        (x1 >= x0 + 3 && y1 >= y0 + 3).then_some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    fn crop(&self, raster: &GrayImage) -> GrayImage {
        imageops::crop_imm(raster, self.x, self.y, self.width, self.height).to_image()
    }
}

fn ink(raster: &GrayImage, x: u32, y: u32) -> f32 {
    1.0 - raster.get_pixel(x, y).0[0] as f32 / 255.0
}

/// Mean ink over the ROI, 0 for white and 1 for black.
pub(crate) fn darkness(raster: &GrayImage, roi: Roi) -> f32 {
    let mut total = 0.0;
    for y in roi.y..roi.y + roi.height {
        for x in roi.x..roi.x + roi.width {
            total += ink(raster, x, y);
        }
    }
    total / (roi.width * roi.height) as f32
}

/// Mean Sobel magnitude of the ROI scaled to [0, 1].
pub(crate) fn edge_energy(crop: &GrayImage) -> f32 {
    let gradients = sobel_gradients(crop);
    let count = gradients.pixels().len().max(1) as f32;
    let sum: f32 = gradients.pixels().map(|p| p.0[0] as f32).sum();
    (sum / count / SOBEL_MAX).clamp(0.0, 1.0)
}

/// Mean ink along one diagonal of the ROI, shifted horizontally by `offset`.
fn diagonal_line(raster: &GrayImage, roi: Roi, anti: bool, offset: i64) -> f32 {
    let samples = roi.width.max(roi.height);
    let (w, h) = (roi.width as f32 - 1.0, roi.height as f32 - 1.0);
    let max_x = (raster.width() - 1) as i64;
    let mut total = 0.0;
    for t in 0..=samples {
        let f = t as f32 / samples as f32;
        let dx = if anti { (1.0 - f) * w } else { f * w };
        let x = (roi.x as i64 + dx.round() as i64 + offset).clamp(0, max_x) as u32;
        let y = roi.y + (f * h).round() as u32;
        total += ink(raster, x, y);
    }
    total / (samples + 1) as f32
}

/// Geometric mean of the best-offset ink along both diagonals, so a single
/// stroke scores low and an X scores high.
pub(crate) fn diagonal_correlation(raster: &GrayImage, roi: Roi, max_offset: u32) -> f32 {
    let range = -(max_offset as i64)..=max_offset as i64;
    let best = |anti: bool| {
        range
            .clone()
            .map(|o| diagonal_line(raster, roi, anti, o))
            .fold(0.0, f32::max)
    };
    (best(false) * best(true)).sqrt()
}

pub struct CellScorer {
    config: ScoringConfig,
    recognizer: Arc<dyn Recognizer>,
}

impl CellScorer {
    pub fn new(config: ScoringConfig, recognizer: Arc<dyn Recognizer>) -> Self {
        Self { config, recognizer }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score_cell(&self, page: &Page, geometry: &GridGeometry, row: usize, column: usize) -> CellScore {
        let cell = geometry.cell(row, column);
        let roi_box = cell.scaled(self.config.roi_width_fraction, self.config.roi_height_fraction);
        let mut score = CellScore {
            row,
            column,
            darkness: 0.0,
            edge: 0.0,
            diagonal: 0.0,
            ocr_hint: false,
            composite: 0.0,
        };
        let Some(roi) = Roi::from_bbox(&roi_box, &page.raster) else {
            return score;
        };

        let crop = roi.crop(&page.raster);
        score.darkness = darkness(&page.raster, roi);
        score.edge = edge_energy(&crop);
        score.diagonal = diagonal_correlation(&page.raster, roi, self.config.diagonal_offsets);
        score.ocr_hint = page
            .text
            .iter()
            .any(|r| r.text.trim().eq_ignore_ascii_case("x") && cell.contains(r.bbox.center_x(), r.bbox.center_y()))
            || self.recognizer.sees_x(&crop);

        let c = &self.config;
        score.composite = c.weight_darkness * score.darkness
            + c.weight_edge * score.edge
            + c.weight_diagonal * score.diagonal
            + if score.ocr_hint { c.weight_ocr_hint } else { 0.0 };
        score
    }

    pub fn score_row(&self, page: &Page, geometry: &GridGeometry, row: usize) -> [CellScore; COLUMN_COUNT] {
        std::array::from_fn(|column| self.score_cell(page, geometry, row, column))
    }

    /// Median composite of each column over all rows.
    pub fn column_baselines(rows: &[[CellScore; COLUMN_COUNT]]) -> [f32; COLUMN_COUNT] {
        std::array::from_fn(|column| {
            let values: Vec<f32> = rows.iter().map(|r| r[column].composite).collect();
            median(&values).unwrap_or(0.0)
        })
    }

    /// Applies the damped baseline and the selection gate to one row.
    pub fn decide(&self, row: usize, cells: [CellScore; COLUMN_COUNT], baselines: &[f32; COLUMN_COUNT]) -> RowDecision {
        let damping = self.config.baseline_damping_factor;
        let adjusted: [f32; COLUMN_COUNT] =
            std::array::from_fn(|c| cells[c].composite - damping * baselines[c]);

        let mut best = 0;
        for c in 1..COLUMN_COUNT {
            if adjusted[c] > adjusted[best] {
                best = c;
            }
        }
        let runner_up = (0..COLUMN_COUNT)
            .filter(|&c| c != best)
            .map(|c| adjusted[c])
            .fold(f32::NEG_INFINITY, f32::max);

        let top = adjusted[best];
        let margin = (top / runner_up.max(MARGIN_FLOOR)).clamp(0.0, MARGIN_CAP);
        let clears_margin = runner_up <= 0.0 || top >= self.config.confidence_margin_multiplier * runner_up;
        let selection = if top > self.config.min_mark_score && clears_margin {
            Selection::Column(best as u8 + 1)
        } else {
            Selection::Unknown
        };

        RowDecision {
            row,
            selection,
            margin,
            adjusted,
            cells,
        }
    }

    /// Scores every row of the page and decides each one against the page's
    /// own column baselines.
    pub fn select_rows(&self, page: &Page, geometry: &GridGeometry) -> Vec<RowDecision> {
        let scored: Vec<[CellScore; COLUMN_COUNT]> = (0..geometry.row_count())
            .map(|row| self.score_row(page, geometry, row))
            .collect();
        let baselines = Self::column_baselines(&scored);
        scored
            .into_iter()
            .enumerate()
            .map(|(row, cells)| self.decide(row, cells, &baselines))
            .collect()
    }
}
