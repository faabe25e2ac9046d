//! Runs the detectors of a page in priority order and takes a second opinion
//! on rows the accepted detection is unsure about.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ReconcileConfig;
use crate::detector::{Detector, DetectorKind, PageDetection};
use crate::document::Document;
use crate::grid::{ConfidenceTier, GridGeometry};
use crate::scorer::Selection;

/// Progress of one page through the detector chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    NotStarted,
    VectorAttempted,
    RasterAttempted,
    HeaderAttempted,
    OcrAttempted,
    Resolved,
    Failed,
}

impl From<DetectorKind> for PageState {
    fn from(kind: DetectorKind) -> Self {
        match kind {
            DetectorKind::Vector => PageState::VectorAttempted,
            DetectorKind::Raster => PageState::RasterAttempted,
            DetectorKind::Header => PageState::HeaderAttempted,
            DetectorKind::OcrAnchor => PageState::OcrAttempted,
        }
    }
}

/// Final decision for one row of a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOutcome {
    pub row: usize,
    pub selection: Selection,
    pub tier: ConfidenceTier,
    pub margin: f32,
    /// Detectors whose agreement replaced the primary decision.
    pub overridden_by: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageReport {
    pub page: usize,
    pub expected_rows: usize,
    pub state: PageState,
    /// Every state the page passed through, in order.
    pub transitions: Vec<PageState>,
    pub detector: Option<&'static str>,
    pub geometry: Option<GridGeometry>,
    pub rows: Vec<RowOutcome>,
}

impl PageReport {
    fn unresolved(page: usize, expected_rows: usize, transitions: Vec<PageState>, geometry: Option<GridGeometry>) -> Self {
        Self {
            page,
            expected_rows,
            state: PageState::Failed,
            transitions,
            detector: None,
            geometry,
            rows: (0..expected_rows)
                .map(|row| RowOutcome {
                    row,
                    selection: Selection::Unknown,
                    tier: ConfidenceTier::None,
                    margin: 0.0,
                    overridden_by: Vec::new(),
                })
                .collect(),
        }
    }
}

pub struct Orchestrator {
    detectors: Vec<Box<dyn Detector>>,
    reconcile: ReconcileConfig,
    reconcile_enabled: bool,
}

impl Orchestrator {
    pub fn new(detectors: Vec<Box<dyn Detector>>, reconcile: ReconcileConfig, reconcile_enabled: bool) -> Self {
        Self {
            detectors,
            reconcile,
            reconcile_enabled,
        }
    }

    /// Walks the detector chain until one yields a usable grid, then
    /// reconciles its weak rows.
    pub fn resolve_page(&self, doc: &Document, page: usize, expected_rows: usize) -> PageReport {
        let mut transitions = vec![PageState::NotStarted];
        let mut fallback_geometry: Option<GridGeometry> = None;
        let mut accepted: Option<(usize, PageDetection)> = None;

        for (index, detector) in self.detectors.iter().enumerate() {
            transitions.push(detector.kind().into());
            let Some(detection) = detector.detect(doc, page, expected_rows) else {
                debug!(page, detector = detector.name(), "no grid");
                continue;
            };
            if detection.is_degenerate() {
                debug!(page, detector = detector.name(), "degenerate detection");
                fallback_geometry.get_or_insert(detection.geometry);
                continue;
            }
            accepted = Some((index, detection));
            break;
        }

        let Some((primary, detection)) = accepted else {
            transitions.push(PageState::Failed);
            info!(page, "no detector resolved the page");
            return PageReport::unresolved(page, expected_rows, transitions, fallback_geometry);
        };

        let rows = self.reconcile_rows(doc, page, expected_rows, primary, &detection);
        transitions.push(PageState::Resolved);
        PageReport {
            page,
            expected_rows,
            state: PageState::Resolved,
            transitions,
            detector: Some(detection.detector),
            geometry: Some(detection.geometry),
            rows,
        }
    }

    fn is_weak(&self, selection: Selection, margin: f32) -> bool {
        selection == Selection::Unknown || margin < self.reconcile.reconcile_margin_multiplier
    }

    /// Re-scores weak rows with the other detectors, in priority order, and
    /// overrides the primary only when the alternates gathered all agree on a
    /// different column.
    fn reconcile_rows(
        &self,
        doc: &Document,
        page: usize,
        expected_rows: usize,
        primary: usize,
        detection: &PageDetection,
    ) -> Vec<RowOutcome> {
        let mut alternates: Vec<Option<Option<PageDetection>>> = vec![None; self.detectors.len()];
        let mut outcomes = Vec::with_capacity(detection.rows.len());

        for decision in &detection.rows {
            let mut outcome = RowOutcome {
                row: decision.row,
                selection: decision.selection,
                tier: if decision.selection == Selection::Unknown {
                    ConfidenceTier::None
                } else {
                    detection.tier
                },
                margin: decision.margin,
                overridden_by: Vec::new(),
            };

            if self.reconcile_enabled && self.is_weak(decision.selection, decision.margin) {
                let mut votes: Vec<(&'static str, ConfidenceTier, Selection)> = Vec::new();
                for (index, detector) in self.detectors.iter().enumerate() {
                    if index == primary || votes.len() >= self.reconcile.max_alternates {
                        continue;
                    }
                    let cached = alternates[index]
                        .get_or_insert_with(|| detector.detect(doc, page, expected_rows));
                    let Some(alt) = cached.as_ref() else {
                        continue;
                    };
                    if let Some(alt_row) = alt.rows.get(decision.row)
                        && alt_row.selection != Selection::Unknown
                    {
                        votes.push((alt.detector, alt.tier, alt_row.selection));
                    }
                }

                let agreed = votes.len() >= self.reconcile.max_alternates.max(2)
                    && votes.windows(2).all(|pair| pair[0].2 == pair[1].2);
                if agreed && votes[0].2 != decision.selection {
                    info!(
                        page,
                        row = decision.row,
                        from = ?decision.selection,
                        to = ?votes[0].2,
                        "row overridden by agreeing alternates"
                    );
                    outcome.selection = votes[0].2;
                    outcome.tier = votes[0].1;
                    outcome.overridden_by = votes.iter().map(|v| v.0).collect();
                }
            }
            outcomes.push(outcome);
        }

        // Rows missing from the detection stay unknown.
        for row in outcomes.len()..expected_rows {
            outcomes.push(RowOutcome {
                row,
                selection: Selection::Unknown,
                tier: ConfidenceTier::None,
                margin: 0.0,
                overridden_by: Vec::new(),
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::COLUMN_COUNT;
    use crate::scorer::{CellScore, RowDecision};
    use image::GrayImage;

    use crate::document::Page;

    struct Fixed {
        name: &'static str,
        kind: DetectorKind,
        tier: ConfidenceTier,
        rows: Option<Vec<(Selection, f32)>>,
    }

    fn geometry(rows: usize) -> GridGeometry {
        let edges: Vec<f32> = (0..=COLUMN_COUNT).map(|i| 100.0 + i as f32 * 50.0).collect();
        let centers = (0..rows).map(|r| 50.0 + r as f32 * 40.0).collect();
        GridGeometry::from_edges(&edges, centers, 40.0, rows, 0.5).expect("geometry")
    }

    impl Detector for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn kind(&self) -> DetectorKind {
            self.kind
        }

        fn tier(&self) -> ConfidenceTier {
            self.tier
        }

        fn detect(&self, _doc: &Document, _page: usize, expected_rows: usize) -> Option<PageDetection> {
            let rows = self.rows.as_ref()?;
            let cells: [CellScore; COLUMN_COUNT] = std::array::from_fn(|column| CellScore {
                row: 0,
                column,
                darkness: 0.0,
                edge: 0.0,
                diagonal: 0.0,
                ocr_hint: false,
                composite: 0.0,
            });
            Some(PageDetection {
                detector: self.name,
                tier: self.tier,
                geometry: geometry(expected_rows),
                rows: rows
                    .iter()
                    .enumerate()
                    .map(|(row, &(selection, margin))| RowDecision {
                        row,
                        selection,
                        margin,
                        adjusted: [0.0; COLUMN_COUNT],
                        cells,
                    })
                    .collect(),
            })
        }
    }

    fn fixed(name: &'static str, kind: DetectorKind, tier: ConfidenceTier, rows: Option<Vec<(Selection, f32)>>) -> Box<dyn Detector> {
        Box::new(Fixed { name, kind, tier, rows })
    }

    fn doc() -> Document {
        Document::from_pages(vec![Page::new(GrayImage::new(10, 10))], 1.0)
    }

    const STRONG: f32 = 50.0;
    const WEAK: f32 = 1.6;

    #[test]
    fn first_usable_detector_wins() {
        let orchestrator = Orchestrator::new(
            vec![
                fixed("vector", DetectorKind::Vector, ConfidenceTier::Vector, None),
                fixed("raster", DetectorKind::Raster, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(2), STRONG)])),
            ],
            ReconcileConfig::default(),
            true,
        );
        let report = orchestrator.resolve_page(&doc(), 1, 1);
        assert_eq!(report.state, PageState::Resolved);
        assert_eq!(report.detector, Some("raster"));
        assert_eq!(
            report.transitions,
            vec![PageState::NotStarted, PageState::VectorAttempted, PageState::RasterAttempted, PageState::Resolved]
        );
        assert_eq!(report.rows[0].tier, ConfidenceTier::RasterCorrelation);
    }

    #[test]
    fn all_unknown_detection_is_skipped_and_page_fails() {
        let orchestrator = Orchestrator::new(
            vec![fixed("vector", DetectorKind::Vector, ConfidenceTier::Vector, Some(vec![(Selection::Unknown, 0.0); 3]))],
            ReconcileConfig::default(),
            true,
        );
        let report = orchestrator.resolve_page(&doc(), 1, 3);
        assert_eq!(report.state, PageState::Failed);
        assert!(report.geometry.is_some());
        assert_eq!(report.rows.len(), 3);
        assert!(report.rows.iter().all(|r| r.selection == Selection::Unknown && r.tier == ConfidenceTier::None));
    }

    #[test]
    fn two_agreeing_alternates_override_weak_row() {
        let orchestrator = Orchestrator::new(
            vec![
                fixed("vector", DetectorKind::Vector, ConfidenceTier::Vector, Some(vec![(Selection::Column(1), STRONG), (Selection::Column(3), WEAK)])),
                fixed("raster", DetectorKind::Raster, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(2), STRONG), (Selection::Column(5), STRONG)])),
                fixed("header", DetectorKind::Header, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(2), STRONG), (Selection::Column(5), STRONG)])),
            ],
            ReconcileConfig::default(),
            true,
        );
        let report = orchestrator.resolve_page(&doc(), 1, 2);
        // Strong rows are never second-guessed.
        assert_eq!(report.rows[0].selection, Selection::Column(1));
        assert_eq!(report.rows[0].tier, ConfidenceTier::Vector);
        assert_eq!(report.rows[1].selection, Selection::Column(5));
        assert_eq!(report.rows[1].tier, ConfidenceTier::RasterCorrelation);
        assert_eq!(report.rows[1].overridden_by, vec!["raster", "header"]);
    }

    #[test]
    fn disagreeing_or_single_alternate_keeps_primary() {
        let disagree = Orchestrator::new(
            vec![
                fixed("vector", DetectorKind::Vector, ConfidenceTier::Vector, Some(vec![(Selection::Column(3), WEAK)])),
                fixed("raster", DetectorKind::Raster, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(5), STRONG)])),
                fixed("header", DetectorKind::Header, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(6), STRONG)])),
            ],
            ReconcileConfig::default(),
            true,
        );
        assert_eq!(disagree.resolve_page(&doc(), 1, 1).rows[0].selection, Selection::Column(3));

        let single = Orchestrator::new(
            vec![
                fixed("vector", DetectorKind::Vector, ConfidenceTier::Vector, Some(vec![(Selection::Column(3), WEAK)])),
                fixed("raster", DetectorKind::Raster, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(5), STRONG)])),
                fixed("header", DetectorKind::Header, ConfidenceTier::RasterCorrelation, None),
            ],
            ReconcileConfig::default(),
            true,
        );
        assert_eq!(single.resolve_page(&doc(), 1, 1).rows[0].selection, Selection::Column(3));
    }

    #[test]
    fn reconciliation_can_be_disabled() {
        let orchestrator = Orchestrator::new(
            vec![
                fixed("vector", DetectorKind::Vector, ConfidenceTier::Vector, Some(vec![(Selection::Column(3), WEAK)])),
                fixed("raster", DetectorKind::Raster, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(5), STRONG)])),
                fixed("header", DetectorKind::Header, ConfidenceTier::RasterCorrelation, Some(vec![(Selection::Column(5), STRONG)])),
            ],
            ReconcileConfig::default(),
            false,
        );
        assert_eq!(orchestrator.resolve_page(&doc(), 1, 1).rows[0].selection, Selection::Column(3));
    }
}
