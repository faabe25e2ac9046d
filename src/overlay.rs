//! Debug rendering: the reconstructed grid and the chosen cells drawn over the
//! page raster.

use std::path::Path;

use image::RgbImage;
use plotters::prelude::*;
use thiserror::Error;

use crate::document::Page;
use crate::grid::{ConfidenceTier, GridGeometry};
use crate::orchestrator::PageReport;
use crate::scorer::Selection;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("empty page raster")]
    Empty,
    #[error("drawing failed: {0}")]
    Draw(String),
    #[error("cannot write overlay: {0}")]
    Image(#[from] image::ImageError),
}

const GRID_COLOR: RGBColor = RGBColor(80, 140, 230);

fn tier_color(tier: ConfidenceTier) -> RGBColor {
    match tier {
        ConfidenceTier::Vector => RGBColor(30, 170, 60),
        ConfidenceTier::RasterCorrelation => RGBColor(230, 150, 20),
        ConfidenceTier::OcrFallback => RGBColor(200, 40, 200),
        ConfidenceTier::None => RGBColor(220, 30, 30),
    }
}

fn draw_grid<DB: DrawingBackend>(root: &DrawingArea<DB, plotters::coord::Shift>, geometry: &GridGeometry) -> Result<(), OverlayError> {
    let half = geometry.row_height() / 2.0;
    let (top, bottom) = match (geometry.rows().first(), geometry.rows().last()) {
        (Some(first), Some(last)) => ((first - half) as i32, (last + half) as i32),
        _ => return Ok(()),
    };

    let xs = std::iter::once(geometry.left()).chain(geometry.columns().iter().copied());
    for x in xs {
        let x = x.round() as i32;
        root.draw(&PathElement::new([(x, top), (x, bottom)], GRID_COLOR))
            .map_err(|e| OverlayError::Draw(e.to_string()))?;
    }
    let (left, right) = (geometry.left().round() as i32, geometry.right().round() as i32);
    let ys = geometry
        .rows()
        .iter()
        .map(|y| y - half)
        .chain(std::iter::once(bottom as f32));
    for y in ys {
        let y = y.round() as i32;
        root.draw(&PathElement::new([(left, y), (right, y)], GRID_COLOR))
            .map_err(|e| OverlayError::Draw(e.to_string()))?;
    }
    Ok(())
}

/// Renders one page with its grid lines and a frame around every selected
/// cell, colored by confidence tier. Pages without a grid come back as the
/// plain raster.
pub fn render_overlay(page: &Page, report: &PageReport) -> Result<RgbImage, OverlayError> {
    let (width, height) = (page.width(), page.height());
    if width == 0 || height == 0 {
        return Err(OverlayError::Empty);
    }
    let mut rgb: Vec<u8> = page.raster.as_raw().iter().flat_map(|&v| [v, v, v]).collect();

    {
        let root = BitMapBackend::with_buffer(&mut rgb, (width, height)).into_drawing_area();
        if let Some(geometry) = &report.geometry {
            draw_grid(&root, geometry)?;
            for outcome in &report.rows {
                let Selection::Column(column) = outcome.selection else {
                    continue;
                };
                if outcome.row >= geometry.row_count() {
                    continue;
                }
                let cell = geometry.cell(outcome.row, column as usize - 1);
                let style = tier_color(outcome.tier).stroke_width(3);
                root.draw(&Rectangle::new(
                    [
                        (cell.x0.round() as i32, cell.y0.round() as i32),
                        (cell.x1.round() as i32, cell.y1.round() as i32),
                    ],
                    style,
                ))
                .map_err(|e| OverlayError::Draw(e.to_string()))?;
            }
        }
        root.present().map_err(|e| OverlayError::Draw(e.to_string()))?;
    }

    RgbImage::from_raw(width, height, rgb).ok_or(OverlayError::Empty)
}

pub fn save_overlay(path: &Path, page: &Page, report: &PageReport) -> Result<(), OverlayError> {
    render_overlay(page, report)?.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{PageState, RowOutcome};
    use image::{GrayImage, Luma};

    #[test]
    fn selected_cell_is_framed() {
        let page = Page::new(GrayImage::from_pixel(400, 300, Luma([255u8])));
        let edges: Vec<f32> = (0..=8).map(|j| 20.0 + j as f32 * 40.0).collect();
        let geometry = GridGeometry::from_edges(&edges, vec![100.0, 200.0], 100.0, 2, 0.5).expect("grid");
        let report = PageReport {
            page: 1,
            expected_rows: 2,
            state: PageState::Resolved,
            transitions: vec![PageState::NotStarted, PageState::VectorAttempted, PageState::Resolved],
            detector: Some("vector_clustering"),
            geometry: Some(geometry),
            rows: vec![RowOutcome {
                row: 0,
                selection: Selection::Column(3),
                tier: ConfidenceTier::Vector,
                margin: 9.0,
                overridden_by: Vec::new(),
            }],
        };
        let img = render_overlay(&page, &report).expect("overlay");
        assert_eq!(img.dimensions(), (400, 300));
        // Column 3 spans x 100..140; its frame crosses the row-0 midline.
        let frame = img.get_pixel(140, 100);
        assert_ne!(frame.0, [255, 255, 255]);
        // Far corner stays paper.
        assert_eq!(img.get_pixel(395, 295).0, [255, 255, 255]);
    }
}
