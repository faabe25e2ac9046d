//! Checkbox grid reconstruction.
//!
//! The form has no usable field structure, so the eight option columns and
//! the trait rows are recovered from whatever evidence the page offers. Each
//! source is a [`GridStrategy`]; all of them produce the same validated
//! [`GridGeometry`].

pub mod header;
pub mod ocr_anchor;
pub mod projection;
pub mod vector;

use serde::Serialize;

use crate::document::{BBox, Document};

pub use header::HeaderAnchor;
pub use ocr_anchor::OcrAnchor;
pub use projection::RasterProjection;
pub use vector::VectorClustering;

/// Option columns A through H.
pub const COLUMN_COUNT: usize = 8;

/// How much the evidence behind a selection can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Vector,
    RasterCorrelation,
    OcrFallback,
    None,
}

/// Reconstructed checkbox grid of one page.
///
/// `columns[i]` is the right-hand boundary of column `i`; column `i` spans
/// from the previous boundary (or `left`) to `columns[i]`. `rows` holds row
/// centers, top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridGeometry {
    left: f32,
    columns: [f32; COLUMN_COUNT],
    rows: Vec<f32>,
    row_height: f32,
}

impl GridGeometry {
    /// Validates and builds a geometry. Rejects anything but strictly
    /// increasing boundaries, the expected row count, a positive row height,
    /// and columns no narrower than `min_column_ratio` times the median width.
    pub fn new(
        left: f32,
        columns: [f32; COLUMN_COUNT],
        rows: Vec<f32>,
        row_height: f32,
        expected_rows: usize,
        min_column_ratio: f32,
    ) -> Option<Self> {
        let finite = left.is_finite()
            && row_height.is_finite()
            && columns.iter().all(|c| c.is_finite())
            && rows.iter().all(|r| r.is_finite());
        if !finite || row_height <= 0.0 || rows.len() != expected_rows || expected_rows == 0 {
            return None;
        }

        let mut previous = left;
        let mut widths = [0f32; COLUMN_COUNT];
        for (width, &boundary) in widths.iter_mut().zip(columns.iter()) {
            if boundary <= previous {
                return None;
            }
            *width = boundary - previous;
            previous = boundary;
        }
        if rows.windows(2).any(|pair| pair[1] <= pair[0]) {
            return None;
        }

        let median = median(&widths)?;
        if widths.iter().any(|&w| w < median * min_column_ratio) {
            return None;
        }

        Some(Self {
            left,
            columns,
            rows,
            row_height,
        })
    }

    /// From the nine vertical line positions bounding the eight columns.
    pub fn from_edges(
        edges: &[f32],
        rows: Vec<f32>,
        row_height: f32,
        expected_rows: usize,
        min_column_ratio: f32,
    ) -> Option<Self> {
        let (&left, rest) = edges.split_first()?;
        let columns: [f32; COLUMN_COUNT] = rest.try_into().ok()?;
        Self::new(left, columns, rows, row_height, expected_rows, min_column_ratio)
    }

    /// From the eight column centers; boundaries sit halfway between centers
    /// and the outer edges half a pitch outside.
    pub fn from_centers(
        centers: &[f32; COLUMN_COUNT],
        rows: Vec<f32>,
        row_height: f32,
        expected_rows: usize,
        min_column_ratio: f32,
    ) -> Option<Self> {
        let first_pitch = centers[1] - centers[0];
        let last_pitch = centers[COLUMN_COUNT - 1] - centers[COLUMN_COUNT - 2];
        let left = centers[0] - first_pitch / 2.0;
        let mut columns = [0f32; COLUMN_COUNT];
        for i in 0..COLUMN_COUNT - 1 {
            columns[i] = (centers[i] + centers[i + 1]) / 2.0;
        }
        columns[COLUMN_COUNT - 1] = centers[COLUMN_COUNT - 1] + last_pitch / 2.0;
        Self::new(left, columns, rows, row_height, expected_rows, min_column_ratio)
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn right(&self) -> f32 {
        self.columns[COLUMN_COUNT - 1]
    }

    pub fn columns(&self) -> &[f32; COLUMN_COUNT] {
        &self.columns
    }

    pub fn rows(&self) -> &[f32] {
        &self.rows
    }

    pub fn row_height(&self) -> f32 {
        self.row_height
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Horizontal extent of a 0-based column.
    pub fn column_span(&self, column: usize) -> (f32, f32) {
        let start = if column == 0 {
            self.left
        } else {
            self.columns[column - 1]
        };
        (start, self.columns[column])
    }

    /// Pixel box of cell (`row`, `column`), both 0-based.
    pub fn cell(&self, row: usize, column: usize) -> BBox {
        let (x0, x1) = self.column_span(column);
        let cy = self.rows[row];
        BBox::new(
            x0,
            cy - self.row_height / 2.0,
            x1,
            cy + self.row_height / 2.0,
        )
    }

    /// True when the grid collapses to a sliver too small to hold checkboxes.
    pub fn is_degenerate(&self) -> bool {
        self.right() - self.left < COLUMN_COUNT as f32 * 2.0 || self.row_height < 2.0
    }
}

/// One independent way of reconstructing the grid.
pub trait GridStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn tier(&self) -> ConfidenceTier;
    /// Geometry of the checkbox grid on `page`, expecting `expected_rows` rows.
    fn reconstruct(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<GridGeometry>;
}

pub(crate) fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Merges sorted-or-not axis positions closer than `tolerance` into weighted
/// cluster centers, returned in ascending order.
pub(crate) fn cluster_positions(values: &[(f32, f32)], tolerance: f32) -> Vec<(f32, f32)> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut clusters: Vec<(f32, f32)> = Vec::new();
    let mut last_member = f32::NEG_INFINITY;
    for (position, weight) in sorted {
        match clusters.last_mut() {
            Some((center, total)) if position - last_member <= tolerance => {
                let merged = *total + weight;
                *center = (*center * *total + position * weight) / merged.max(f32::EPSILON);
                *total = merged;
            }
            _ => clusters.push((position, weight)),
        }
        last_member = position;
    }
    clusters
}

/// Among all runs of `count` consecutive positions whose gaps stay within
/// `regularity` of each other, the one spanning the widest range.
pub(crate) fn widest_regular_window(positions: &[f32], count: usize, regularity: f32) -> Option<Vec<f32>> {
    if count < 2 || positions.len() < count {
        return None;
    }
    let mut best: Option<(f32, usize)> = None;
    for start in 0..=positions.len() - count {
        let window = &positions[start..start + count];
        let gaps: Vec<f32> = window.windows(2).map(|p| p[1] - p[0]).collect();
        let min_gap = gaps.iter().copied().fold(f32::INFINITY, f32::min);
        let max_gap = gaps.iter().copied().fold(0.0, f32::max);
        if min_gap <= 0.0 || max_gap > min_gap * regularity {
            continue;
        }
        let span = window[count - 1] - window[0];
        if best.is_none_or(|(best_span, _)| span > best_span) {
            best = Some((span, start));
        }
    }
    best.map(|(_, start)| positions[start..start + count].to_vec())
}

/// Row centers and height from `count + 1` ruled line positions.
pub(crate) fn rows_between_lines(lines: &[f32]) -> Option<(Vec<f32>, f32)> {
    if lines.len() < 2 {
        return None;
    }
    let centers: Vec<f32> = lines.windows(2).map(|p| (p[0] + p[1]) / 2.0).collect();
    let gaps: Vec<f32> = lines.windows(2).map(|p| p[1] - p[0]).collect();
    Some((centers, median(&gaps)?))
}
