//! The public entry point: bytes in, `ExtractionResult` out.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assemble::{ExtractionResult, ResultAssembler, detect_not_observed};
use crate::config::{ConfigError, ExtractConfig, FallbackMode};
use crate::detector::registry;
use crate::document::{Document, DocumentOpenError, Page};
use crate::layout::FormLayout;
use crate::locator::{AdminFields, TextFieldLocator};
use crate::ocr::{Recognizer, build_recognizer};
use crate::orchestrator::Orchestrator;
use crate::scorer::CellScorer;
use crate::vocab::Vocabulary;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot open document: {0}")]
    Open(#[from] DocumentOpenError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Reusable, read-only extraction engine. One call per document; calls share
/// no mutable state and may run on any number of threads.
pub struct Extractor {
    config: ExtractConfig,
    recognizer: Arc<dyn Recognizer>,
}

impl Extractor {
    /// Validates `config` and builds the recognizer it names.
    pub fn new(config: ExtractConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        let recognizer = build_recognizer(&config)?;
        Ok(Self { config, recognizer })
    }

    pub fn with_layout(mut self, layout: FormLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.config.vocabulary = vocabulary;
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn layout(&self) -> &FormLayout {
        &self.config.layout
    }

    pub fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let doc = Document::open(bytes, &self.config.loader)?;
        Ok(self.extract_document(&doc))
    }

    pub fn extract_path(&self, path: &Path) -> Result<ExtractionResult, ExtractError> {
        let doc = Document::open_path(path, &self.config.loader)?;
        Ok(self.extract_document(&doc))
    }

    /// Like [`Extractor::extract`], but an unreadable document becomes a
    /// `failed` result instead of an error.
    pub fn extract_or_failed(&self, bytes: &[u8]) -> ExtractionResult {
        self.extract(bytes).unwrap_or_else(|err| {
            warn!(error = %err, "extraction failed");
            ExtractionResult::failed(err.to_string())
        })
    }

    pub fn extract_document(&self, doc: &Document) -> ExtractionResult {
        let layout = &self.config.layout;
        let assembler = ResultAssembler::new(layout, self.config.strict_no_defaults);
        let admin = match doc.page(layout.admin_page) {
            Some(page) => {
                let recognized;
                let page = if page.text.is_empty() {
                    recognized = self.with_recognized_words(page);
                    &recognized
                } else {
                    page
                };
                let admin = TextFieldLocator::new(&self.config.vocabulary, layout).locate_all(page);
                if detect_not_observed(page, layout, &self.config.not_observed, &self.config.scoring) {
                    info!("form marked not observed, skipping traits");
                    return assembler.not_observed(&admin);
                }
                admin
            }
            None => {
                warn!(page = layout.admin_page, "administrative page missing");
                AdminFields::default()
            }
        };

        let orchestrator = self.orchestrator();
        let pages = layout
            .trait_pages
            .iter()
            .map(|tp| orchestrator.resolve_page(doc, tp.page_index, tp.rows))
            .collect();
        let result = assembler.assemble(&admin, pages);
        debug!(
            traits = result.trait_scores().len(),
            unresolved = result.unresolved_traits().len(),
            "extraction assembled"
        );
        result
    }

    /// A scanned page has no text layer; read its words off the raster.
    fn with_recognized_words(&self, page: &Page) -> Page {
        let words = self.recognizer.recognize_words(&page.raster);
        debug!(
            recognizer = self.recognizer.name(),
            words = words.len(),
            "no text layer, using recognized words"
        );
        page.clone().with_text(words)
    }

    fn orchestrator(&self) -> Orchestrator {
        let scorer = Arc::new(CellScorer::new(self.config.scoring.clone(), self.recognizer.clone()));
        let detectors = registry(&self.config, scorer, self.recognizer.clone());
        Orchestrator::new(
            detectors,
            self.config.reconcile.clone(),
            self.config.fallback_mode != FallbackMode::Off,
        )
    }
}
