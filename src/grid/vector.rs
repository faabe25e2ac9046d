//! Grid from the page's own vector strokes: cluster the axis-aligned segments
//! into line positions and pick the window that forms the checkbox table.

use tracing::debug;

use super::{
    COLUMN_COUNT, ConfidenceTier, GridGeometry, GridStrategy, cluster_positions, rows_between_lines,
    widest_regular_window,
};
use crate::config::GridConfig;
use crate::document::Document;

pub struct VectorClustering {
    config: GridConfig,
}

impl VectorClustering {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }
}

impl GridStrategy for VectorClustering {
    fn name(&self) -> &'static str {
        "vector_clustering"
    }

    fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::Vector
    }

    fn reconstruct(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<GridGeometry> {
        let page = doc.page(page)?;
        let cfg = &self.config;
        let min_horizontal = cfg.min_horizontal_fraction * page.width() as f32;

        let horizontals: Vec<(f32, f32)> = page
            .segments
            .iter()
            .filter(|s| s.is_horizontal(cfg.axis_slope_tolerance) && s.dx() >= min_horizontal)
            .map(|s| (s.mid().1, s.dx()))
            .collect();
        let rows_y: Vec<f32> = cluster_positions(&horizontals, cfg.cluster_tolerance_px)
            .into_iter()
            .map(|(y, _)| y)
            .collect();
        let Some(lines) = widest_regular_window(&rows_y, expected_rows + 1, cfg.spacing_regularity) else {
            debug!(found = rows_y.len(), expected = expected_rows + 1, "vector: horizontal lines missing");
            return None;
        };
        let (top, bottom) = (lines[0], lines[lines.len() - 1]);
        let (left, right) = page
            .segments
            .iter()
            .filter(|s| s.is_horizontal(cfg.axis_slope_tolerance) && s.dx() >= min_horizontal)
            .filter(|s| lines.iter().any(|y| (y - s.mid().1).abs() <= cfg.cluster_tolerance_px))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
                let (x0, x1) = s.x_range();
                (lo.min(x0), hi.max(x1))
            });

        // Only strokes inside the table's extent that cross its rows.
        let overlap_needed = (bottom - top) * 0.5;
        let verticals: Vec<(f32, f32)> = page
            .segments
            .iter()
            .filter(|s| s.is_vertical(cfg.axis_slope_tolerance) && s.dy() >= cfg.min_vertical_length_px)
            .filter(|s| {
                let x = s.mid().0;
                x >= left - cfg.cluster_tolerance_px && x <= right + cfg.cluster_tolerance_px
            })
            .filter(|s| {
                let (y0, y1) = s.y_range();
                y1.min(bottom) - y0.max(top) >= overlap_needed.min(s.dy() * 0.9)
            })
            .map(|s| (s.mid().0, s.dy()))
            .collect();
        let cols_x: Vec<f32> = cluster_positions(&verticals, cfg.cluster_tolerance_px)
            .into_iter()
            .map(|(x, _)| x)
            .collect();
        let Some(edges) = widest_regular_window(&cols_x, COLUMN_COUNT + 1, cfg.spacing_regularity) else {
            debug!(found = cols_x.len(), "vector: vertical lines missing");
            return None;
        };

        let (rows, row_height) = rows_between_lines(&lines)?;
        GridGeometry::from_edges(&edges, rows, row_height, expected_rows, cfg.min_column_ratio)
    }
}
