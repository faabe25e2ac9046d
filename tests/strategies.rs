use std::sync::Arc;

use image::GrayImage;

use fitrep_reader::config::GridConfig;
use fitrep_reader::document::{Document, TextRun};
use fitrep_reader::fixture::{AdminSpec, GridSpec, checkbox_page, form_document};
use fitrep_reader::grid::{
    COLUMN_COUNT, GridGeometry, GridStrategy, HeaderAnchor, OcrAnchor, RasterProjection,
    VectorClustering,
};
use fitrep_reader::ocr::Recognizer;
use fitrep_reader::{ConfidenceTier, ExtractConfig, Extractor, FormLayout};

/// Hands back a fixed set of words, as a page-level OCR engine would.
struct FixedWords(Vec<TextRun>);

impl Recognizer for FixedWords {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn sees_x(&self, _crop: &GrayImage) -> bool {
        false
    }

    fn recognize_words(&self, _page: &GrayImage) -> Vec<TextRun> {
        self.0.clone()
    }
}

fn assert_well_formed(geometry: &GridGeometry, spec: &GridSpec, strategy: &str) {
    let columns = geometry.columns();
    assert_eq!(columns.len(), COLUMN_COUNT, "{strategy}");
    assert!(columns[0] > geometry.left(), "{strategy}");
    assert!(columns.windows(2).all(|p| p[1] > p[0]), "{strategy}: {columns:?}");
    assert_eq!(geometry.row_count(), spec.rows(), "{strategy}");
    assert!((geometry.left() - spec.left).abs() <= 3.0, "{strategy}: left {}", geometry.left());
    assert!((geometry.right() - spec.right()).abs() <= 3.0, "{strategy}: right {}", geometry.right());
    let first_row = spec.top + spec.cell_height / 2.0;
    assert!((geometry.rows()[0] - first_row).abs() <= 3.0, "{strategy}: rows {:?}", geometry.rows());
}

#[test]
fn every_strategy_yields_eight_increasing_columns() {
    let spec = GridSpec {
        header_labels: true,
        ..GridSpec::with_marks(vec![Some(1), Some(4), Some(8), Some(3), Some(6)])
    };
    let page = checkbox_page(&spec);
    let words = page.text.clone();
    let raster_only = Document::from_pages(
        vec![checkbox_page(&GridSpec {
            vector_lines: false,
            header_labels: false,
            ..spec.clone()
        })],
        1.0,
    );
    let doc = Document::from_pages(vec![page], 1.0);
    let config = GridConfig::default();

    let strategies: Vec<(Box<dyn GridStrategy>, &Document)> = vec![
        (Box::new(VectorClustering::new(config.clone())), &doc),
        (Box::new(RasterProjection::new(config.clone())), &raster_only),
        (Box::new(HeaderAnchor::new(config.clone())), &doc),
        (
            Box::new(OcrAnchor::new(config.clone(), Arc::new(FixedWords(words)))),
            &raster_only,
        ),
    ];
    for (strategy, doc) in strategies {
        let geometry = strategy
            .reconstruct(doc, 0, spec.rows())
            .unwrap_or_else(|| panic!("{} found no grid", strategy.name()));
        assert_well_formed(&geometry, &spec, strategy.name());
    }
}

#[test]
fn raster_only_form_is_read_by_projection() {
    let layout = FormLayout::default();
    let base = GridSpec {
        vector_lines: false,
        ..GridSpec::default()
    };
    let marks = vec![vec![Some(2), Some(7), Some(5), Some(1), Some(3)]];
    let doc = form_document(&AdminSpec::default(), &marks, &base, &layout);

    let result = Extractor::new(ExtractConfig::default())
        .expect("extractor")
        .extract_document(&doc);
    let first = &result.pages()[0];
    assert_eq!(first.detector, Some("raster_projection"));
    let letters: Vec<char> = result.trait_scores().iter().take(5).map(|(_, l)| *l).collect();
    assert_eq!(letters, vec!['B', 'G', 'E', 'A', 'C']);
    assert!(
        result.traits()[..5]
            .iter()
            .all(|t| t.tier == ConfidenceTier::RasterCorrelation)
    );
}
