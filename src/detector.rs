//! The single detection capability and the priority registry of its
//! implementations.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::{ExtractConfig, FallbackMode};
use crate::document::Document;
use crate::grid::{
    ConfidenceTier, GridGeometry, GridStrategy, HeaderAnchor, OcrAnchor, RasterProjection,
    VectorClustering,
};
use crate::ocr::Recognizer;
use crate::scorer::{CellScorer, RowDecision, Selection};

/// Which evidence a detector works from; drives the page state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Vector,
    Raster,
    Header,
    OcrAnchor,
}

/// A reconstructed grid together with the decision for every row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageDetection {
    pub detector: &'static str,
    pub tier: ConfidenceTier,
    pub geometry: GridGeometry,
    pub rows: Vec<RowDecision>,
}

impl PageDetection {
    /// A detection worth nothing: collapsed geometry or no row resolved.
    pub fn is_degenerate(&self) -> bool {
        self.geometry.is_degenerate() || self.rows.iter().all(|r| r.selection == Selection::Unknown)
    }
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> DetectorKind;
    fn tier(&self) -> ConfidenceTier;
    fn detect(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<PageDetection>;
}

/// Any grid strategy paired with the cell scorer.
pub struct GridDetector<S> {
    strategy: S,
    kind: DetectorKind,
    scorer: Arc<CellScorer>,
}

impl<S: GridStrategy> GridDetector<S> {
    pub fn new(strategy: S, kind: DetectorKind, scorer: Arc<CellScorer>) -> Self {
        Self {
            strategy,
            kind,
            scorer,
        }
    }
}

impl<S: GridStrategy> Detector for GridDetector<S> {
    fn name(&self) -> &'static str {
        self.strategy.name()
    }

    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn tier(&self) -> ConfidenceTier {
        self.strategy.tier()
    }

    fn detect(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<PageDetection> {
        let geometry = self.strategy.reconstruct(doc, page, expected_rows)?;
        let rows = self.scorer.select_rows(doc.page(page)?, &geometry);
        debug!(
            detector = self.name(),
            page,
            resolved = rows.iter().filter(|r| r.selection != Selection::Unknown).count(),
            "grid detected"
        );
        Some(PageDetection {
            detector: self.name(),
            tier: self.tier(),
            geometry,
            rows,
        })
    }
}

/// Detectors in priority order for the configured fallback mode:
/// vector, raster projection, header anchor, OCR anchor.
pub fn registry(
    config: &ExtractConfig,
    scorer: Arc<CellScorer>,
    recognizer: Arc<dyn Recognizer>,
) -> Vec<Box<dyn Detector>> {
    let grid = &config.grid;
    let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
    if config.fallback_mode != FallbackMode::Force {
        detectors.push(Box::new(GridDetector::new(
            VectorClustering::new(grid.clone()),
            DetectorKind::Vector,
            scorer.clone(),
        )));
    }
    if config.fallback_mode != FallbackMode::Off {
        detectors.push(Box::new(GridDetector::new(
            RasterProjection::new(grid.clone()),
            DetectorKind::Raster,
            scorer.clone(),
        )));
        detectors.push(Box::new(GridDetector::new(
            HeaderAnchor::new(grid.clone()),
            DetectorKind::Header,
            scorer.clone(),
        )));
        detectors.push(Box::new(GridDetector::new(
            OcrAnchor::new(grid.clone(), recognizer),
            DetectorKind::OcrAnchor,
            scorer,
        )));
    }
    detectors
}
