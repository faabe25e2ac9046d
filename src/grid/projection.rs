//! Grid from raster ink alone: project the ink mask onto both axes and read
//! the ruled lines (or, for rows, the marks themselves) off the profiles.

use image::GrayImage;
use tracing::debug;

use super::{
    COLUMN_COUNT, ConfidenceTier, GridGeometry, GridStrategy, median, rows_between_lines,
    widest_regular_window,
};
use crate::config::GridConfig;
use crate::document::{BBox, Document, Page, ink_mask, otsu_threshold};

pub struct RasterProjection {
    config: GridConfig,
}

impl RasterProjection {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }
}

/// Ink mask of a rectangular band of the page, thresholded on the band's own
/// histogram.
struct Band {
    mask: Vec<u8>,
    width: usize,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

impl Band {
    fn new(page: &Page, bounds: BBox) -> Option<Self> {
        let (w, h) = (page.width() as usize, page.height() as usize);
        let x0 = (bounds.x0.max(0.0) as usize).min(w);
        let y0 = (bounds.y0.max(0.0) as usize).min(h);
        let x1 = (bounds.x1.max(0.0).ceil() as usize).min(w);
        let y1 = (bounds.y1.max(0.0).ceil() as usize).min(h);
        if x1 <= x0 + 1 || y1 <= y0 + 1 {
            return None;
        }

        let raw = page.raster.as_raw();
        let pixels: Vec<u8> = (y0..y1)
            .flat_map(|y| raw[y * w + x0..y * w + x1].iter().copied())
            .collect();
        let threshold = otsu_threshold(&pixels)?;
        let crop = GrayImage::from_raw((x1 - x0) as u32, (y1 - y0) as u32, pixels)?;
        let mask = ink_mask(&crop, threshold).ok()?;
        Some(Self {
            mask,
            width: x1 - x0,
            x0,
            y0,
            x1,
            y1,
        })
    }

    /// `x` and `y` are page coordinates inside the band.
    fn is_ink(&self, x: usize, y: usize) -> bool {
        self.mask[(y - self.y0) * self.width + (x - self.x0)] != 0
    }

    /// Ink count per column of the band.
    fn column_profile(&self) -> Vec<f32> {
        (self.x0..self.x1)
            .map(|x| (self.y0..self.y1).filter(|&y| self.is_ink(x, y)).count() as f32)
            .collect()
    }

    /// Ink count per row of the band, restricted to `[x0, x1)`.
    fn row_profile(&self, x0: usize, x1: usize) -> Vec<f32> {
        (self.y0..self.y1)
            .map(|y| (x0..x1).filter(|&x| self.is_ink(x, y)).count() as f32)
            .collect()
    }
}

pub(crate) fn moving_average(profile: &[f32], window: usize) -> Vec<f32> {
    let half = window / 2;
    (0..profile.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(profile.len());
            profile[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}

/// Contiguous stretches at or above `level`, as (weighted center, peak value).
pub(crate) fn line_runs(profile: &[f32], level: f32) -> Vec<(f32, f32)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < profile.len() {
        if profile[i] < level || profile[i] <= 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < profile.len() && profile[i] >= level {
            i += 1;
        }
        let slice = &profile[start..i];
        let mass: f32 = slice.iter().sum();
        let center = slice
            .iter()
            .enumerate()
            .map(|(k, v)| (start + k) as f32 * v)
            .sum::<f32>()
            / mass;
        let peak = slice.iter().copied().fold(0.0, f32::max);
        runs.push((center, peak));
    }
    runs
}

/// The `count` strongest local maxima no closer than `min_separation`, each
/// refined to the middle of its half-height plateau. Ascending order.
pub(crate) fn pick_peaks(profile: &[f32], count: usize, min_separation: f32, floor: f32) -> Vec<f32> {
    let n = profile.len();
    let mut candidates: Vec<usize> = (0..n)
        .filter(|&i| {
            let v = profile[i];
            v > 0.0
                && v >= floor
                && (i == 0 || v >= profile[i - 1])
                && (i + 1 == n || v >= profile[i + 1])
        })
        .collect();
    candidates.sort_by(|&a, &b| profile[b].total_cmp(&profile[a]).then(a.cmp(&b)));

    let mut accepted: Vec<f32> = Vec::new();
    for i in candidates {
        if accepted.len() == count {
            break;
        }
        let half = profile[i] / 2.0;
        let mut lo = i;
        while lo > 0 && profile[lo - 1] >= half {
            lo -= 1;
        }
        let mut hi = i;
        while hi + 1 < n && profile[hi + 1] >= half {
            hi += 1;
        }
        let center = (lo + hi) as f32 / 2.0;
        if accepted.iter().all(|&a| (a - center).abs() >= min_separation) {
            accepted.push(center);
        }
    }
    accepted.sort_by(|a, b| a.total_cmp(b));
    accepted
}

/// Row centers and height inside `bounds`, looking only at ink between the
/// band's left and right edges. Ruled rows are read from `count + 1` line
/// peaks; otherwise the `count` dominant content peaks are used.
pub(crate) fn row_centers_in_band(
    page: &Page,
    bounds: BBox,
    count: usize,
    cfg: &GridConfig,
) -> Option<(Vec<f32>, f32)> {
    if count == 0 {
        return None;
    }
    let band = Band::new(page, bounds)?;
    let profile = band.row_profile(band.x0, band.x1);
    let span = (band.x1 - band.x0) as f32;
    let offset = band.y0 as f32;

    let ruled: Vec<f32> = line_runs(&profile, cfg.line_fill_ratio * span)
        .into_iter()
        .map(|(center, _)| center + offset)
        .collect();
    if let Some(lines) = widest_regular_window(&ruled, count + 1, cfg.spacing_regularity) {
        return rows_between_lines(&lines);
    }

    let band_height = (band.y1 - band.y0) as f32;
    let pitch = band_height / count as f32;
    let smoothed = moving_average(&profile, ((pitch / 4.0) as usize).max(cfg.smoothing_window));
    let max = smoothed.iter().copied().fold(0.0, f32::max);
    let peaks = pick_peaks(&smoothed, count, pitch / 2.0, max * cfg.row_peak_floor);
    if peaks.len() < count {
        debug!(found = peaks.len(), expected = count, "projection: row peaks missing");
        return None;
    }
    let rows: Vec<f32> = peaks.iter().map(|p| p + offset).collect();
    let row_height = if count > 1 {
        let gaps: Vec<f32> = rows.windows(2).map(|p| p[1] - p[0]).collect();
        median(&gaps)?
    } else {
        pitch
    };
    Some((rows, row_height))
}

impl GridStrategy for RasterProjection {
    fn name(&self) -> &'static str {
        "raster_projection"
    }

    fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::RasterCorrelation
    }

    fn reconstruct(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<GridGeometry> {
        let page = doc.page(page)?;
        let cfg = &self.config;
        let (x0, y0, x1, y1) = cfg.checkbox_region.to_pixels(page.width(), page.height());
        let band = Band::new(page, BBox::new(x0, y0, x1, y1))?;

        let columns = moving_average(&band.column_profile(), cfg.smoothing_window);
        let max = columns.iter().copied().fold(0.0, f32::max);
        if max <= 0.0 {
            return None;
        }
        let lines = line_runs(&columns, max * cfg.line_peak_ratio);
        if lines.len() < COLUMN_COUNT + 1 {
            debug!(found = lines.len(), "projection: too few vertical lines");
            return None;
        }

        let (left, right) = (lines[0].0, lines[lines.len() - 1].0);
        let min_separation = (right - left) / COLUMN_COUNT as f32 * 0.5;
        let mut internal: Vec<(f32, f32)> = lines[1..lines.len() - 1]
            .iter()
            .copied()
            .filter(|(x, _)| x - left >= min_separation && right - x >= min_separation)
            .collect();
        internal.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.total_cmp(&b.0)));
        let mut separators: Vec<f32> = Vec::new();
        for (x, _) in internal {
            if separators.len() == COLUMN_COUNT - 1 {
                break;
            }
            if separators.iter().all(|s| (s - x).abs() >= min_separation) {
                separators.push(x);
            }
        }
        if separators.len() < COLUMN_COUNT - 1 {
            return None;
        }
        separators.sort_by(|a, b| a.total_cmp(b));

        let offset = band.x0 as f32;
        let mut edges = vec![left + offset];
        edges.extend(separators.iter().map(|s| s + offset));
        edges.push(right + offset);

        let grid_band = BBox::new(edges[0], y0, edges[COLUMN_COUNT], y1);
        let (rows, row_height) = row_centers_in_band(page, grid_band, expected_rows, cfg)?;
        GridGeometry::from_edges(&edges, rows, row_height, expected_rows, cfg.min_column_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_keeps_length() {
        let smoothed = moving_average(&[0.0, 3.0, 0.0, 0.0], 3);
        assert_eq!(smoothed.len(), 4);
        assert!((smoothed[0] - 1.5).abs() < 1e-6);
        assert!((smoothed[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn line_runs_report_weighted_centers() {
        let runs = line_runs(&[0.0, 5.0, 5.0, 0.0, 0.0, 9.0, 0.0], 4.0);
        assert_eq!(runs, vec![(1.5, 5.0), (5.0, 9.0)]);
    }

    #[test]
    fn peaks_respect_separation() {
        let profile = [0.0, 4.0, 10.0, 9.0, 0.0, 0.0, 6.0, 0.0];
        assert_eq!(pick_peaks(&profile, 2, 3.0, 1.0), vec![2.5, 6.0]);
        assert_eq!(pick_peaks(&profile, 2, 10.0, 1.0), vec![2.5]);
    }

    #[test]
    fn band_mask_covers_only_the_band() {
        let mut raster = GrayImage::from_pixel(200, 100, image::Luma([255u8]));
        for y in 0..100 {
            raster.put_pixel(150, y, image::Luma([0u8]));
        }
        for x in 20..60 {
            raster.put_pixel(x, 30, image::Luma([0u8]));
        }
        let page = Page::new(raster);
        let band = Band::new(&page, BBox::new(10.0, 20.0, 70.0, 50.0)).expect("band");

        assert_eq!(band.mask.len(), 60 * 30);
        let rows = band.row_profile(band.x0, band.x1);
        assert_eq!(rows.len(), 30);
        assert_eq!(rows[10], 40.0);
        assert_eq!(rows.iter().sum::<f32>(), 40.0);
        let columns = band.column_profile();
        assert_eq!(columns[10], 1.0);
        assert_eq!(columns[5], 0.0);
    }
}
