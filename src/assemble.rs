//! Packages located fields and per-row decisions into the extraction result.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::config::{NotObservedConfig, ScoringConfig};
use crate::document::{BBox, Page};
use crate::grid::ConfidenceTier;
use crate::layout::{FormLayout, not_observed_boxes};
use crate::locator::{AdminFields, LocateStrategy, Located, OfficialFields};
use crate::orchestrator::{PageReport, RowOutcome};
use crate::scorer::{Roi, Selection, diagonal_correlation};
use crate::text::{find_label, group_lines};

pub const LETTERS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// Share of the checkbox side sampled for the "Not Observed" mark.
const NOT_OBSERVED_ROI: f32 = 0.7;
/// Horizontal reach, in label heights, of a typed "X" beside the label.
const NOT_OBSERVED_X_REACH: f32 = 6.0;
const NOT_OBSERVED_MAX_LINE: usize = 50;

/// 1 → A … 8 → H. Column 8 means the trait itself was not observed.
pub fn column_letter(column: u8) -> Option<char> {
    LETTERS.get((column as usize).checked_sub(1)?).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    NotObserved,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraitSelection {
    pub index: usize,
    pub name: String,
    pub selection: Selection,
    pub letter: Option<char>,
    pub tier: ConfidenceTier,
    /// The letter is the layout default, not a detected mark.
    pub defaulted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdministrativeInfo {
    pub last_name: Option<String>,
    pub grade: Option<String>,
    pub occasion: Option<String>,
    pub period_from: Option<String>,
    pub period_to: Option<String>,
    pub record_id: Option<String>,
    pub organization: Option<String>,
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfficialInfo {
    pub name: Option<String>,
    pub rank: Option<String>,
    pub id: Option<String>,
}

impl From<&OfficialFields> for OfficialInfo {
    fn from(fields: &OfficialFields) -> Self {
        Self {
            name: fields.name.clone(),
            rank: fields.rank.clone(),
            id: fields.id.clone(),
        }
    }
}

/// Immutable result of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    outcome: Outcome,
    administrative_info: AdministrativeInfo,
    reporting_official: OfficialInfo,
    reviewing_official: OfficialInfo,
    traits: Vec<TraitSelection>,
    unresolved_traits: Vec<String>,
    field_sources: BTreeMap<&'static str, LocateStrategy>,
    pages: Vec<PageReport>,
    strict: bool,
    failure: Option<String>,
}

impl ExtractionResult {
    /// Result for a document that could not be opened at all.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed,
            administrative_info: AdministrativeInfo::default(),
            reporting_official: OfficialInfo::default(),
            reviewing_official: OfficialInfo::default(),
            traits: Vec::new(),
            unresolved_traits: Vec::new(),
            field_sources: BTreeMap::new(),
            pages: Vec::new(),
            strict: false,
            failure: Some(reason.into()),
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn administrative_info(&self) -> &AdministrativeInfo {
        &self.administrative_info
    }

    pub fn reporting_official(&self) -> &OfficialInfo {
        &self.reporting_official
    }

    pub fn reviewing_official(&self) -> &OfficialInfo {
        &self.reviewing_official
    }

    pub fn traits(&self) -> &[TraitSelection] {
        &self.traits
    }

    pub fn unresolved_traits(&self) -> &[String] {
        &self.unresolved_traits
    }

    pub fn field_sources(&self) -> &BTreeMap<&'static str, LocateStrategy> {
        &self.field_sources
    }

    pub fn pages(&self) -> &[PageReport] {
        &self.pages
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Trait name and letter for every trait that carries a letter, in form order.
    pub fn trait_scores(&self) -> Vec<(&str, char)> {
        self.traits
            .iter()
            .filter_map(|t| t.letter.map(|l| (t.name.as_str(), l)))
            .collect()
    }

    pub fn to_record(&self) -> ExtractionRecord<'_> {
        ExtractionRecord {
            outcome: self.outcome,
            administrative_info: &self.administrative_info,
            trait_scores: TraitScores(&self.traits),
            reporting_official_info: &self.reporting_official,
            reviewing_official_info: &self.reviewing_official,
            extraction_metadata: ExtractionMetadata {
                strict: self.strict,
                failure: self.failure.as_deref(),
                field_sources: &self.field_sources,
                traits: &self.traits,
                unresolved_traits: &self.unresolved_traits,
                pages: &self.pages,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_record())
    }
}

/// The serialized shape of a result, consumed by downstream storage.
#[derive(Debug, Serialize)]
pub struct ExtractionRecord<'a> {
    pub outcome: Outcome,
    pub administrative_info: &'a AdministrativeInfo,
    pub trait_scores: TraitScores<'a>,
    pub reporting_official_info: &'a OfficialInfo,
    pub reviewing_official_info: &'a OfficialInfo,
    pub extraction_metadata: ExtractionMetadata<'a>,
}

#[derive(Debug, Serialize)]
pub struct ExtractionMetadata<'a> {
    pub strict: bool,
    pub failure: Option<&'a str>,
    pub field_sources: &'a BTreeMap<&'static str, LocateStrategy>,
    pub traits: &'a [TraitSelection],
    pub unresolved_traits: &'a [String],
    pub pages: &'a [PageReport],
}

/// Trait name to letter, serialized as a map in form order.
#[derive(Debug)]
pub struct TraitScores<'a>(&'a [TraitSelection]);

impl Serialize for TraitScores<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.0
                .iter()
                .filter_map(|t| t.letter.map(|l| (t.name.as_str(), l))),
        )
    }
}

fn administrative(
    admin: &AdminFields,
) -> (AdministrativeInfo, BTreeMap<&'static str, LocateStrategy>) {
    let mut sources = BTreeMap::new();
    let mut take = |key: &'static str, field: &Option<Located<String>>| {
        field.as_ref().map(|found| {
            sources.insert(key, found.strategy);
            found.value.clone()
        })
    };
    let info = AdministrativeInfo {
        last_name: take("last_name", &admin.last_name),
        grade: take("grade", &admin.grade),
        occasion: take("occasion", &admin.occasion),
        period_from: take("period_from", &admin.period_from),
        period_to: take("period_to", &admin.period_to),
        record_id: take("record_id", &admin.record_id),
        organization: take("organization", &admin.organization),
        subject_id: admin.identity_chain.first().cloned(),
    };
    if info.subject_id.is_some() {
        sources.insert("subject_id", LocateStrategy::LineScan);
    }
    (info, sources)
}

pub struct ResultAssembler<'a> {
    layout: &'a FormLayout,
    strict: bool,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(layout: &'a FormLayout, strict: bool) -> Self {
        Self { layout, strict }
    }

    /// Result for a form whose "Not Observed" box is marked: no trait scores.
    pub fn not_observed(&self, admin: &AdminFields) -> ExtractionResult {
        let (administrative_info, field_sources) = administrative(admin);
        ExtractionResult {
            outcome: Outcome::NotObserved,
            administrative_info,
            reporting_official: (&admin.reporting).into(),
            reviewing_official: (&admin.reviewing).into(),
            traits: Vec::new(),
            unresolved_traits: Vec::new(),
            field_sources,
            pages: Vec::new(),
            strict: self.strict,
            failure: None,
        }
    }

    /// Maps every trait row of the layout to a letter. Unknown rows are left
    /// out in strict mode and take the layout default otherwise.
    pub fn assemble(&self, admin: &AdminFields, pages: Vec<PageReport>) -> ExtractionResult {
        let (administrative_info, field_sources) = administrative(admin);
        let mut traits = Vec::with_capacity(self.layout.trait_count());
        let mut unresolved_traits = Vec::new();

        for trait_page in &self.layout.trait_pages {
            let report = pages.iter().find(|p| p.page == trait_page.page_index);
            for row in 0..trait_page.rows {
                let index = trait_page.first_trait + row;
                let name = self.layout.trait_name(index);
                let outcome: Option<&RowOutcome> = report.and_then(|r| r.rows.get(row));
                let (selection, tier) = outcome
                    .map(|o| (o.selection, o.tier))
                    .unwrap_or((Selection::Unknown, ConfidenceTier::None));

                let entry = match selection {
                    Selection::Column(column) => TraitSelection {
                        index,
                        name,
                        selection,
                        letter: column_letter(column),
                        tier,
                        defaulted: false,
                    },
                    Selection::Unknown if self.strict => {
                        unresolved_traits.push(name.clone());
                        TraitSelection {
                            index,
                            name,
                            selection,
                            letter: None,
                            tier: ConfidenceTier::None,
                            defaulted: false,
                        }
                    }
                    Selection::Unknown => {
                        unresolved_traits.push(name.clone());
                        TraitSelection {
                            index,
                            name,
                            selection: Selection::Column(self.layout.default_column),
                            letter: column_letter(self.layout.default_column),
                            tier: ConfidenceTier::None,
                            defaulted: true,
                        }
                    }
                };
                traits.push(entry);
            }
        }

        ExtractionResult {
            outcome: Outcome::Ok,
            administrative_info,
            reporting_official: (&admin.reporting).into(),
            reviewing_official: (&admin.reviewing).into(),
            traits,
            unresolved_traits,
            field_sources,
            pages,
            strict: self.strict,
            failure: None,
        }
    }
}

/// Whether the form-level "Not Observed" box beside its label is marked,
/// either by a typed "X" on the label's line or by an X-shaped mark in the
/// square to the left or right of the label. Without a readable label the
/// calibrated box position of the layout is sampled instead.
pub fn detect_not_observed(
    page: &Page,
    layout: &FormLayout,
    config: &NotObservedConfig,
    scoring: &ScoringConfig,
) -> bool {
    let squares = match find_label(&page.text, &layout.not_observed_label) {
        Some(label) => {
            if typed_x_beside(page, &label) {
                return true;
            }
            not_observed_boxes(&label, config.box_size_factor).to_vec()
        }
        None => {
            debug!("not observed label unreadable, sampling calibrated box");
            vec![layout.not_observed_box_px(page.width(), page.height())]
        }
    };

    squares
        .iter()
        .filter_map(|square| {
            Roi::from_bbox(&square.scaled(NOT_OBSERVED_ROI, NOT_OBSERVED_ROI), &page.raster)
        })
        .any(|roi| {
            diagonal_correlation(&page.raster, roi, scoring.diagonal_offsets) >= config.min_diagonal_score
        })
}

/// A typed "X" on the label's own line. Long lines and the "extended" remark
/// are prose, not the checkbox.
fn typed_x_beside(page: &Page, label: &BBox) -> bool {
    let h = label.height().max(1.0);
    let label_line = group_lines(&page.text)
        .into_iter()
        .find(|line| line.bbox.contains(label.center_x(), label.center_y()));
    let plain_line = label_line.is_none_or(|line| {
        let text = line.text();
        text.len() < NOT_OBSERVED_MAX_LINE && !text.to_ascii_lowercase().contains("extended")
    });
    if !plain_line {
        return false;
    }
    let reach = NOT_OBSERVED_X_REACH * h;
    page.text.iter().any(|r| {
        r.text.trim().eq_ignore_ascii_case("x")
            && (r.bbox.center_y() - label.center_y()).abs() <= h
            && r.bbox.center_x() >= label.x0 - reach
            && r.bbox.center_x() <= label.x1 + reach
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TraitPage;
    use crate::orchestrator::PageState;

    fn layout() -> FormLayout {
        FormLayout {
            trait_pages: vec![TraitPage {
                page_index: 1,
                first_trait: 0,
                rows: 3,
            }],
            ..FormLayout::default()
        }
    }

    fn report(selections: &[Selection]) -> PageReport {
        PageReport {
            page: 1,
            expected_rows: selections.len(),
            state: PageState::Resolved,
            transitions: vec![PageState::NotStarted, PageState::VectorAttempted, PageState::Resolved],
            detector: Some("vector_clustering"),
            geometry: None,
            rows: selections
                .iter()
                .enumerate()
                .map(|(row, &selection)| RowOutcome {
                    row,
                    selection,
                    tier: ConfidenceTier::Vector,
                    margin: 10.0,
                    overridden_by: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn letters_map_one_to_eight() {
        assert_eq!(column_letter(1), Some('A'));
        assert_eq!(column_letter(8), Some('H'));
        assert_eq!(column_letter(0), None);
        assert_eq!(column_letter(9), None);
    }

    #[test]
    fn strict_mode_omits_unknown_rows() {
        let layout = layout();
        let pages = vec![report(&[Selection::Column(2), Selection::Unknown, Selection::Column(8)])];
        let result = ResultAssembler::new(&layout, true).assemble(&AdminFields::default(), pages);
        assert_eq!(
            result.trait_scores(),
            vec![("Mission Accomplishment", 'B'), ("Individual Character", 'H')]
        );
        assert_eq!(result.unresolved_traits(), &["Proficiency".to_string()]);
    }

    #[test]
    fn relaxed_mode_defaults_to_d() {
        let layout = layout();
        let pages = vec![report(&[Selection::Column(2), Selection::Unknown, Selection::Column(8)])];
        let result = ResultAssembler::new(&layout, false).assemble(&AdminFields::default(), pages);
        assert_eq!(result.trait_scores()[1], ("Proficiency", 'D'));
        assert!(result.traits()[1].defaulted);
        assert_eq!(result.traits()[1].tier, ConfidenceTier::None);
    }

    #[test]
    fn record_keeps_nulls_and_map_order() {
        let layout = layout();
        let pages = vec![report(&[Selection::Column(3), Selection::Column(1), Selection::Column(2)])];
        let result = ResultAssembler::new(&layout, true).assemble(&AdminFields::default(), pages);
        let json = result.to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["outcome"], "ok");
        assert!(value["administrative_info"]["grade"].is_null());
        assert!(value["reviewing_official_info"]["name"].is_null());
        assert_eq!(value["trait_scores"]["Mission Accomplishment"], "C");

        let first = json.find("Mission Accomplishment").expect("first");
        let second = json.find("\"Proficiency\"").expect("second");
        assert!(first < second);
    }

    #[test]
    fn unreadable_label_falls_back_to_calibrated_box() {
        use crate::fixture::{AdminSpec, NotObservedMark, admin_page};

        let layout = FormLayout::default();
        let check = |mark: NotObservedMark| {
            let spec = AdminSpec {
                not_observed: mark,
                ..AdminSpec::default()
            };
            let scanned = Page::new(admin_page(&spec).raster);
            detect_not_observed(&scanned, &layout, &NotObservedConfig::default(), &ScoringConfig::default())
        };
        assert!(check(NotObservedMark::Drawn));
        assert!(!check(NotObservedMark::Blank));
    }
}
