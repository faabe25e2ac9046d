//! Grid anchored on the printed column letters "A" through "H".

use tracing::debug;

use super::projection::row_centers_in_band;
use super::{COLUMN_COUNT, ConfidenceTier, GridGeometry, GridStrategy};
use crate::config::GridConfig;
use crate::document::{BBox, Document, Page, TextRun};

const LETTERS: [char; COLUMN_COUNT] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// A row of column letters with every center filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRow {
    pub centers: [f32; COLUMN_COUNT],
    pub bbox: BBox,
    /// How many letters were read rather than interpolated.
    pub found: usize,
}

fn column_letter(run: &TextRun) -> Option<usize> {
    let mut chars = run.text.trim().chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    LETTERS.iter().position(|&l| l == c)
}

/// Finds the topmost row holding at least `header_min_labels` distinct,
/// unambiguous letters spread over a minimum width, and interpolates the
/// missing letters linearly by index between the outermost known ones.
pub fn locate_header(runs: &[TextRun], page_width: u32, cfg: &GridConfig) -> Option<HeaderRow> {
    let mut letters: Vec<(usize, &TextRun)> = runs
        .iter()
        .filter_map(|r| column_letter(r).map(|i| (i, r)))
        .collect();
    letters.sort_by(|a, b| a.1.bbox.center_y().total_cmp(&b.1.bbox.center_y()));

    let mut groups: Vec<Vec<(usize, &TextRun)>> = Vec::new();
    for entry in letters {
        if let Some(group) = groups.last_mut()
            && (entry.1.bbox.center_y() - group[0].1.bbox.center_y()).abs() <= cfg.header_row_tolerance_px
        {
            group.push(entry);
            continue;
        }
        groups.push(vec![entry]);
    }

    let min_span = cfg.header_min_span_fraction * page_width as f32;
    groups
        .iter()
        .find_map(|group| interpolate_row(group, cfg.header_min_labels, min_span))
}

fn interpolate_row(group: &[(usize, &TextRun)], min_labels: usize, min_span: f32) -> Option<HeaderRow> {
    let mut known: [Option<f32>; COLUMN_COUNT] = [None; COLUMN_COUNT];
    for (index, slot) in known.iter_mut().enumerate() {
        let mut hits = group.iter().filter(|(i, _)| *i == index);
        if let (Some((_, run)), None) = (hits.next(), hits.next()) {
            *slot = Some(run.bbox.center_x());
        }
    }

    let present: Vec<(usize, f32)> = known
        .iter()
        .enumerate()
        .filter_map(|(i, x)| x.map(|x| (i, x)))
        .collect();
    if present.len() < min_labels {
        return None;
    }
    if present.windows(2).any(|p| p[1].1 <= p[0].1) {
        return None;
    }
    let (first_index, first_x) = present[0];
    let (last_index, last_x) = present[present.len() - 1];
    if last_x - first_x < min_span {
        return None;
    }

    let pitch = (last_x - first_x) / (last_index - first_index) as f32;
    let mut centers = [0f32; COLUMN_COUNT];
    for (i, center) in centers.iter_mut().enumerate() {
        *center = known[i].unwrap_or(first_x + (i as f32 - first_index as f32) * pitch);
    }
    if centers.windows(2).any(|p| p[1] <= p[0]) {
        return None;
    }

    let bbox = group
        .iter()
        .skip(1)
        .fold(group[0].1.bbox, |acc, (_, r)| acc.union(&r.bbox));
    Some(HeaderRow {
        centers,
        bbox,
        found: present.len(),
    })
}

/// Completes a header into a grid by reading the rows below it.
pub(crate) fn geometry_below_header(
    page: &Page,
    header: &HeaderRow,
    expected_rows: usize,
    cfg: &GridConfig,
) -> Option<GridGeometry> {
    let pitch = (header.centers[COLUMN_COUNT - 1] - header.centers[0]) / (COLUMN_COUNT - 1) as f32;
    let left = header.centers[0] - pitch / 2.0;
    let right = header.centers[COLUMN_COUNT - 1] + pitch / 2.0;
    let (_, _, _, region_bottom) = cfg.checkbox_region.to_pixels(page.width(), page.height());

    let band = BBox::new(left, header.bbox.y1, right, region_bottom);
    let (rows, row_height) = row_centers_in_band(page, band, expected_rows, cfg)?;
    GridGeometry::from_centers(&header.centers, rows, row_height, expected_rows, cfg.min_column_ratio)
}

pub struct HeaderAnchor {
    config: GridConfig,
}

impl HeaderAnchor {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }
}

impl GridStrategy for HeaderAnchor {
    fn name(&self) -> &'static str {
        "header_anchor"
    }

    fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::RasterCorrelation
    }

    fn reconstruct(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<GridGeometry> {
        let page = doc.page(page)?;
        let Some(header) = locate_header(&page.text, page.width(), &self.config) else {
            debug!("header: no A-H label row");
            return None;
        };
        geometry_below_header(page, &header, expected_rows, &self.config)
    }
}
