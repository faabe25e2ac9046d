use std::sync::Arc;

use fitrep_reader::config::ReconcileConfig;
use fitrep_reader::detector::registry;
use fitrep_reader::document::Document;
use fitrep_reader::fixture::{GridSpec, checkbox_page, draw_x};
use fitrep_reader::ocr::StrokeRecognizer;
use fitrep_reader::orchestrator::{Orchestrator, PageState};
use fitrep_reader::scorer::CellScorer;
use fitrep_reader::{ConfidenceTier, ExtractConfig, Selection};

/// A page whose vector rules sit half a column right of the printed table,
/// as when the vector layer is misregistered against the raster. Row 0 carries a
/// mark centered on the vector cells; the other rows are marked in the
/// printed cells.
fn misaligned_page() -> (Document, Vec<Option<u8>>) {
    let printed = vec![None, Some(6), Some(2), Some(8), Some(5)];
    let spec = GridSpec {
        vector_lines: false,
        header_labels: true,
        ..GridSpec::with_marks(printed.clone())
    };
    let shifted = GridSpec {
        left: spec.left + spec.cell_width / 2.0,
        ..GridSpec::with_marks(vec![None; 5])
    };

    let mut page = checkbox_page(&spec);
    page.segments = checkbox_page(&shifted).segments;
    draw_x(&mut page.raster, shifted.cell(0, 2), 0, spec.stroke);
    (Document::from_pages(vec![page], 1.0), printed)
}

fn orchestrator(config: &ExtractConfig) -> Orchestrator {
    let recognizer = Arc::new(StrokeRecognizer::from(&config.scoring));
    let scorer = Arc::new(CellScorer::new(config.scoring.clone(), recognizer.clone()));
    Orchestrator::new(registry(config, scorer, recognizer), ReconcileConfig::default(), true)
}

#[test]
fn agreeing_raster_detectors_correct_weak_vector_rows() {
    let (doc, printed) = misaligned_page();
    let report = orchestrator(&ExtractConfig::default()).resolve_page(&doc, 0, 5);

    assert_eq!(report.state, PageState::Resolved);
    assert_eq!(report.detector, Some("vector_clustering"));
    assert_eq!(report.rows[0].selection, Selection::Column(3));
    assert_eq!(report.rows[0].tier, ConfidenceTier::Vector);
    assert!(report.rows[0].overridden_by.is_empty());

    for (row, column) in printed.iter().enumerate().skip(1) {
        let column = column.expect("marked row");
        assert_eq!(report.rows[row].selection, Selection::Column(column), "row {row}");
    }
    let overridden: Vec<_> = report.rows.iter().filter(|r| !r.overridden_by.is_empty()).collect();
    assert!(!overridden.is_empty());
    for row in overridden {
        assert_eq!(row.overridden_by, vec!["raster_projection", "header_anchor"]);
        assert_eq!(row.tier, ConfidenceTier::RasterCorrelation);
    }
}

#[test]
fn vector_only_mode_keeps_the_misread() {
    let (doc, _) = misaligned_page();
    let config = ExtractConfig {
        fallback_mode: fitrep_reader::FallbackMode::Off,
        ..ExtractConfig::default()
    };
    let recognizer = Arc::new(StrokeRecognizer::from(&config.scoring));
    let scorer = Arc::new(CellScorer::new(config.scoring.clone(), recognizer.clone()));
    let report = Orchestrator::new(registry(&config, scorer, recognizer), ReconcileConfig::default(), false)
        .resolve_page(&doc, 0, 5);

    assert_eq!(report.rows[0].selection, Selection::Column(3));
    assert!(report.rows.iter().all(|r| r.overridden_by.is_empty()));
    assert!(report.rows.iter().all(|r| r.tier != ConfidenceTier::RasterCorrelation));
}
