//! In-memory view of a form: per page a grayscale raster, the vector line
//! segments and the positioned text runs.
//!
//! Coordinates everywhere are raster pixels with a top-left origin. PDF pages
//! are rendered at [`RASTER_SCALE`] so pixel thresholds mean the same thing
//! for every input.

mod pdf;
mod raster;

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat};
use kornia::image::ImageError as KorniaImageError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub(crate) use raster::{ink_mask, otsu_threshold, to_gray};

/// Upscaling applied when rendering PDF pages (72 dpi points to 216 dpi pixels).
pub const RASTER_SCALE: f32 = 3.0;

/// Paths thinner than this, in pixels, are read as a single stroke.
const THIN_PATH_PX: f32 = 4.0;
/// Largest minor/major extent ratio for a path edge to count as a ruling.
const AXIS_EDGE_TOLERANCE: f32 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    /// Builds a box from two corners in any order.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    /// Shrinks the box around its center to the given fractions of its size.
    pub fn scaled(&self, fx: f32, fy: f32) -> BBox {
        let hw = self.width() * fx / 2.0;
        let hh = self.height() * fy / 2.0;
        BBox::new(
            self.center_x() - hw,
            self.center_y() - hh,
            self.center_x() + hw,
            self.center_y() + hh,
        )
    }
}

/// A straight stroke taken from the page's vector content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: (f32, f32),
    pub end: (f32, f32),
}

impl Segment {
    pub fn new(start: (f32, f32), end: (f32, f32)) -> Self {
        Self { start, end }
    }

    pub fn dx(&self) -> f32 {
        (self.end.0 - self.start.0).abs()
    }

    pub fn dy(&self) -> f32 {
        (self.end.1 - self.start.1).abs()
    }

    pub fn is_horizontal(&self, slope_tolerance: f32) -> bool {
        self.dx() > 0.0 && self.dy() <= self.dx() * slope_tolerance
    }

    pub fn is_vertical(&self, slope_tolerance: f32) -> bool {
        self.dy() > 0.0 && self.dx() <= self.dy() * slope_tolerance
    }

    pub fn mid(&self) -> (f32, f32) {
        (
            (self.start.0 + self.end.0) / 2.0,
            (self.start.1 + self.end.1) / 2.0,
        )
    }

    pub fn x_range(&self) -> (f32, f32) {
        (self.start.0.min(self.end.0), self.start.0.max(self.end.0))
    }

    pub fn y_range(&self) -> (f32, f32) {
        (self.start.1.min(self.end.1), self.start.1.max(self.end.1))
    }
}

/// A word (or short run of words) of text with its bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub bbox: BBox,
}

impl TextRun {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub raster: GrayImage,
    pub segments: Vec<Segment>,
    pub text: Vec<TextRun>,
}

impl Page {
    pub fn new(raster: GrayImage) -> Self {
        Self {
            raster,
            segments: Vec::new(),
            text: Vec::new(),
        }
    }

    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_text(mut self, text: Vec<TextRun>) -> Self {
        self.text = text;
        self
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }
}

/// How PDF inputs are rendered and where pdfium is looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub raster_scale: f32,
    /// Directory holding the pdfium shared library; `None` tries the working
    /// directory, then the system library path.
    pub pdfium_library_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            raster_scale: RASTER_SCALE,
            pdfium_library_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentOpenError {
    #[error("document has no content")]
    Empty,
    #[error("unrecognized container format")]
    UnknownFormat,
    #[error("pdfium library unavailable: {0}")]
    PdfiumUnavailable(String),
    #[error("pdf error: {0}")]
    Pdf(String),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("kornia image error: {0}")]
    Kornia(#[from] KorniaImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Pdf,
    Image(ImageFormat),
}

fn sniff(bytes: &[u8]) -> Option<Container> {
    let head = &bytes[..bytes.len().min(1024)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        return Some(Container::Pdf);
    }
    image::guess_format(bytes).ok().map(Container::Image)
}

/// Immutable page collection produced once per extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pages: Vec<Page>,
    scale: f32,
}

impl Document {
    /// Identifies the container by its leading bytes and decodes every page.
    pub fn open(bytes: &[u8], config: &LoaderConfig) -> Result<Self, DocumentOpenError> {
        if bytes.is_empty() {
            return Err(DocumentOpenError::Empty);
        }
        let document = match sniff(bytes).ok_or(DocumentOpenError::UnknownFormat)? {
            Container::Pdf => Self {
                pages: pdf::load_pdf(bytes, config)?,
                scale: config.raster_scale,
            },
            Container::Image(format) => Self {
                pages: vec![raster::load_image(bytes, format)?],
                scale: 1.0,
            },
        };
        if document.pages.is_empty() {
            return Err(DocumentOpenError::Empty);
        }
        debug!(pages = document.pages.len(), scale = document.scale, "document opened");
        Ok(document)
    }

    pub fn open_path(path: &Path, config: &LoaderConfig) -> Result<Self, DocumentOpenError> {
        let bytes = std::fs::read(path)?;
        Self::open(&bytes, config)
    }

    pub fn from_pages(pages: Vec<Page>, scale: f32) -> Self {
        Self { pages, scale }
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pixels per PDF point (1.0 for raster inputs).
    pub fn scale(&self) -> f32 {
        self.scale
    }
}

/// One drawing step of a vector path, already in raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PathStep {
    MoveTo((f32, f32)),
    LineTo((f32, f32)),
    /// Closes the current subpath back to its start.
    Close,
}

/// The axis-aligned strokes of a vector path.
///
/// Each subpath whose extent is thin in one direction (a rule drawn as a
/// filled rectangle, or a single stroked line) becomes one stroke along its
/// centerline. Other subpaths contribute their straight edges; diagonal edges,
/// such as the strokes of a drawn "X", are dropped.
pub(crate) fn segments_from_path(steps: &[PathStep]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut edges: Vec<Segment> = Vec::new();
    let mut start: Option<(f32, f32)> = None;
    let mut pen: Option<(f32, f32)> = None;

    let mut flush = |edges: &mut Vec<Segment>| {
        if let Some(bounds) = edges
            .iter()
            .map(|e| BBox::new(e.start.0, e.start.1, e.end.0, e.end.1))
            .reduce(|a, b| a.union(&b))
        {
            match centerline(bounds) {
                Some(stroke) => segments.push(stroke),
                None if bounds.width() > THIN_PATH_PX && bounds.height() > THIN_PATH_PX => segments.extend(
                    edges
                        .iter()
                        .filter(|e| e.is_horizontal(AXIS_EDGE_TOLERANCE) || e.is_vertical(AXIS_EDGE_TOLERANCE)),
                ),
                None => {}
            }
        }
        edges.clear();
    };

    for step in steps {
        match *step {
            PathStep::MoveTo(point) => {
                flush(&mut edges);
                start = Some(point);
                pen = Some(point);
            }
            PathStep::LineTo(point) => {
                if let Some(from) = pen
                    && from != point
                {
                    edges.push(Segment::new(from, point));
                }
                pen = Some(point);
            }
            PathStep::Close => {
                if let (Some(from), Some(to)) = (pen, start)
                    && from != to
                {
                    edges.push(Segment::new(from, to));
                }
                pen = start;
            }
        }
    }
    flush(&mut edges);
    segments
}

/// A subpath thin across one axis and long along the other reads as a
/// single stroke.
fn centerline(bounds: BBox) -> Option<Segment> {
    let (w, h) = (bounds.width(), bounds.height());
    if h <= THIN_PATH_PX && w > THIN_PATH_PX {
        let y = bounds.center_y();
        return Some(Segment::new((bounds.x0, y), (bounds.x1, y)));
    }
    if w <= THIN_PATH_PX && h > THIN_PATH_PX {
        let x = bounds.center_x();
        return Some(Segment::new((x, bounds.y0), (x, bounds.y1)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<PathStep> {
        vec![
            PathStep::MoveTo((x0, y0)),
            PathStep::LineTo((x1, y0)),
            PathStep::LineTo((x1, y1)),
            PathStep::LineTo((x0, y1)),
            PathStep::Close,
        ]
    }

    #[test]
    fn thin_subpaths_become_single_strokes() {
        let horizontal = segments_from_path(&rect(10.0, 50.0, 300.0, 51.5));
        assert_eq!(horizontal.len(), 1);
        assert!(horizontal[0].is_horizontal(0.01));

        let vertical = segments_from_path(&[PathStep::MoveTo((40.0, 10.0)), PathStep::LineTo((40.0, 200.0))]);
        assert_eq!(vertical, vec![Segment::new((40.0, 10.0), (40.0, 200.0))]);

        assert!(segments_from_path(&rect(0.0, 0.0, 2.0, 2.0)).is_empty());
    }

    #[test]
    fn rectangles_become_four_edges() {
        let edges = segments_from_path(&rect(0.0, 0.0, 90.0, 120.0));
        assert_eq!(edges.len(), 4);
        assert_eq!(edges.iter().filter(|s| s.is_horizontal(0.01)).count(), 2);
        assert_eq!(edges.iter().filter(|s| s.is_vertical(0.01)).count(), 2);
    }

    #[test]
    fn every_subpath_of_a_table_path_is_kept() {
        let mut steps = Vec::new();
        for i in 0..4 {
            let y = 100.0 + i as f32 * 50.0;
            steps.push(PathStep::MoveTo((10.0, y)));
            steps.push(PathStep::LineTo((400.0, y)));
        }
        for i in 0..3 {
            let x = 10.0 + i as f32 * 195.0;
            steps.push(PathStep::MoveTo((x, 100.0)));
            steps.push(PathStep::LineTo((x, 250.0)));
        }
        let segments = segments_from_path(&steps);
        assert_eq!(segments.len(), 7);
        assert_eq!(segments.iter().filter(|s| s.is_horizontal(0.01)).count(), 4);
    }

    #[test]
    fn diagonal_strokes_are_dropped() {
        let x_mark = [
            PathStep::MoveTo((250.0, 320.0)),
            PathStep::LineTo((310.0, 400.0)),
            PathStep::MoveTo((310.0, 320.0)),
            PathStep::LineTo((250.0, 400.0)),
        ];
        assert!(segments_from_path(&x_mark).is_empty());

        let single = [PathStep::MoveTo((250.0, 320.0)), PathStep::LineTo((310.0, 400.0))];
        assert!(segments_from_path(&single).is_empty());
    }

    #[test]
    fn sniff_detects_pdf_and_rejects_garbage() {
        assert_eq!(sniff(b"%PDF-1.7\n..."), Some(Container::Pdf));
        assert_eq!(sniff(b"hello world"), None);
        assert!(matches!(
            Document::open(b"hello world", &LoaderConfig::default()),
            Err(DocumentOpenError::UnknownFormat)
        ));
        assert!(matches!(
            Document::open(b"", &LoaderConfig::default()),
            Err(DocumentOpenError::Empty)
        ));
    }

    #[test]
    fn png_bytes_open_as_single_raster_page() {
        let img = GrayImage::from_pixel(40, 30, image::Luma([255u8]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).expect("encode png");

        let doc = Document::open(bytes.get_ref(), &LoaderConfig::default()).expect("open png");
        assert_eq!(doc.page_count(), 1);
        let page = doc.page(0).expect("page");
        assert_eq!((page.width(), page.height()), (40, 30));
        assert!(page.segments.is_empty());
        assert!(page.text.is_empty());
    }
}
