//! Header anchoring over recognized words, for scans with no text layer.

use std::sync::Arc;

use tracing::debug;

use super::header::{geometry_below_header, locate_header};
use super::{ConfidenceTier, GridGeometry, GridStrategy};
use crate::config::GridConfig;
use crate::document::Document;
use crate::ocr::Recognizer;

pub struct OcrAnchor {
    config: GridConfig,
    recognizer: Arc<dyn Recognizer>,
}

impl OcrAnchor {
    pub fn new(config: GridConfig, recognizer: Arc<dyn Recognizer>) -> Self {
        Self { config, recognizer }
    }
}

impl GridStrategy for OcrAnchor {
    fn name(&self) -> &'static str {
        "ocr_anchor"
    }

    fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::OcrFallback
    }

    fn reconstruct(&self, doc: &Document, page: usize, expected_rows: usize) -> Option<GridGeometry> {
        let page = doc.page(page)?;
        let words = self.recognizer.recognize_words(&page.raster);
        if words.is_empty() {
            debug!(recognizer = self.recognizer.name(), "ocr anchor: no words recognized");
            return None;
        }
        let header = locate_header(&words, page.width(), &self.config)?;
        geometry_below_header(page, &header, expected_rows, &self.config)
    }
}
