use std::sync::Arc;

use fitrep_reader::Selection;
use fitrep_reader::config::{GridConfig, ScoringConfig};
use fitrep_reader::document::Document;
use fitrep_reader::fixture::{GridSpec, checkbox_page};
use fitrep_reader::grid::{GridStrategy, VectorClustering};
use fitrep_reader::ocr::StrokeRecognizer;
use fitrep_reader::scorer::CellScorer;

const INK_LEVELS: [u8; 6] = [0, 40, 80, 120, 160, 200];

fn scorer() -> CellScorer {
    let config = ScoringConfig::default();
    let recognizer = Arc::new(StrokeRecognizer::from(&config));
    CellScorer::new(config, recognizer)
}

fn page_with_mark(row: usize, column: u8, ink: u8) -> Document {
    let mut marks = vec![None; 5];
    marks[row] = Some(column);
    let spec = GridSpec {
        ink,
        ..GridSpec::with_marks(marks)
    };
    Document::from_pages(vec![checkbox_page(&spec)], 1.0)
}

#[test]
fn single_mark_is_found_at_every_ink_level() {
    let scorer = scorer();
    let strategy = VectorClustering::new(GridConfig::default());
    for ink in INK_LEVELS {
        for column in 1..=8u8 {
            let row = (column as usize) % 5;
            let doc = page_with_mark(row, column, ink);
            let geometry = strategy.reconstruct(&doc, 0, 5).expect("grid");
            let page = doc.page(0).expect("page");
            let decisions = scorer.select_rows(page, &geometry);
            assert_eq!(
                decisions[row].selection,
                Selection::Column(column),
                "ink {ink}, column {column}"
            );
            for other in decisions.iter().filter(|d| d.row != row) {
                assert_eq!(other.selection, Selection::Unknown, "blank row {} at ink {ink}", other.row);
            }
        }
    }
}

#[test]
fn composite_grows_with_ink_density() {
    let scorer = scorer();
    let strategy = VectorClustering::new(GridConfig::default());
    let mut previous = 0.0f32;
    // Lighter marks first: higher gray level means less ink.
    for ink in INK_LEVELS.iter().rev().copied() {
        let doc = page_with_mark(2, 6, ink);
        let geometry = strategy.reconstruct(&doc, 0, 5).expect("grid");
        let cell = scorer.score_cell(doc.page(0).expect("page"), &geometry, 2, 5);
        assert!(
            cell.composite >= previous,
            "composite {} at ink {ink} below {previous}",
            cell.composite
        );
        previous = cell.composite;
    }
    assert!(previous > 1.0);
}

#[test]
fn two_equal_marks_leave_the_row_unknown() {
    let spec = GridSpec::with_marks(vec![Some(1), Some(2), None, Some(4), Some(5)]);
    let mut page = checkbox_page(&spec);
    fitrep_reader::fixture::draw_x(&mut page.raster, spec.cell(2, 1), 0, 5);
    fitrep_reader::fixture::draw_x(&mut page.raster, spec.cell(2, 6), 0, 5);
    let doc = Document::from_pages(vec![page], 1.0);

    let geometry = VectorClustering::new(GridConfig::default())
        .reconstruct(&doc, 0, 5)
        .expect("grid");
    let decisions = scorer().select_rows(doc.page(0).expect("page"), &geometry);
    assert_eq!(decisions[2].selection, Selection::Unknown);
    assert_eq!(decisions[0].selection, Selection::Column(1));
    assert_eq!(decisions[4].selection, Selection::Column(5));
}
