//! Finds the administrative scalars of the first page from positioned text.
//!
//! Every lookup degrades through progressively looser strategies and records
//! which one produced the value. A field that cannot be found is `None`.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::document::{BBox, Page, TextRun};
use crate::layout::FormLayout;
use crate::text::{find_label, group_lines, join_text, reading_order};
use crate::vocab::Vocabulary;

static IDENTITY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{10}\b").expect("identity pattern"));
static RECORD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)FITREP\s+ID\s*#?\s*(\d{7})\b").expect("record id pattern"));
static LOOSE_RECORD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bID\s*#?\s*(\d{7})\b").expect("loose record id pattern"));
static DATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}$").expect("date pattern"));

/// Runs read after a "Grade" caption when the other grade strategies miss.
const GRADE_LABEL_WINDOW: usize = 30;

/// Which rule produced a located value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStrategy {
    /// Pattern scan over the page text in reading order.
    LineScan,
    /// Pattern anchored on a printed caption.
    AnchorToken,
    GradeRegion,
    TopThird,
    /// A known OCR misreading mapped back to its grade.
    Confusable,
    LabelProximity,
    TextBlock,
    LatestDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Located<T> {
    pub value: T,
    pub strategy: LocateStrategy,
}

impl<T> Located<T> {
    fn new(value: T, strategy: LocateStrategy) -> Self {
        Self { value, strategy }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OccasionAndDates {
    pub occasion: Option<Located<String>>,
    pub period_from: Option<Located<String>>,
    pub period_to: Option<Located<String>>,
}

/// Name, rank and identity number of one official, taken from the line that
/// carries the identity number.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfficialFields {
    pub id: Option<String>,
    pub name: Option<String>,
    pub rank: Option<String>,
}

/// Everything the locator recovers from the administrative page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdminFields {
    pub identity_chain: Vec<String>,
    pub last_name: Option<Located<String>>,
    pub grade: Option<Located<String>>,
    pub occasion: Option<Located<String>>,
    pub period_from: Option<Located<String>>,
    pub period_to: Option<Located<String>>,
    pub record_id: Option<Located<String>>,
    pub organization: Option<Located<String>>,
    pub reporting: OfficialFields,
    pub reviewing: OfficialFields,
}

fn is_calendar_date(token: &str) -> bool {
    DATE_TOKEN.is_match(token) && NaiveDate::parse_from_str(token, "%Y%m%d").is_ok()
}

fn date_token(run: &TextRun) -> Option<&str> {
    let token = run.text.trim_matches(|c: char| !c.is_ascii_digit());
    is_calendar_date(token).then_some(token)
}

fn on_same_line(a: &BBox, b: &BBox) -> bool {
    let tolerance = 0.5 * a.height().max(b.height()).max(1.0);
    (a.center_y() - b.center_y()).abs() <= tolerance
}

pub struct TextFieldLocator<'a> {
    vocab: &'a Vocabulary,
    layout: &'a FormLayout,
}

impl<'a> TextFieldLocator<'a> {
    pub fn new(vocab: &'a Vocabulary, layout: &'a FormLayout) -> Self {
        Self { vocab, layout }
    }

    /// Runs all field lookups against the administrative page.
    pub fn locate_all(&self, page: &Page) -> AdminFields {
        let identity_chain = self
            .find_identity_chain(page)
            .map(|found| found.value)
            .unwrap_or_default();
        let dates = self.find_occasion_and_dates(page);

        let last_name = self.find_last_name(page).or_else(|| {
            let subject = identity_chain.first()?;
            let name = self.find_official(page, subject).name?;
            Some(Located::new(name, LocateStrategy::AnchorToken))
        });

        AdminFields {
            last_name,
            grade: self.find_grade(page),
            occasion: dates.occasion,
            period_from: dates.period_from,
            period_to: dates.period_to,
            record_id: self.find_record_id(page),
            organization: self.find_organization(page),
            reporting: identity_chain
                .get(1)
                .map(|id| self.find_official(page, id))
                .unwrap_or_default(),
            reviewing: identity_chain
                .get(2)
                .map(|id| self.find_official(page, id))
                .unwrap_or_default(),
            identity_chain,
        }
    }

    /// Distinct 10-digit numbers in reading order. Position carries the role:
    /// subject, reporting official, reviewing official.
    pub fn find_identity_chain(&self, page: &Page) -> Option<Located<Vec<String>>> {
        let mut chain: Vec<String> = Vec::new();
        for run in reading_order(&page.text) {
            for found in IDENTITY_NUMBER.find_iter(&run.text) {
                let id = found.as_str();
                if !chain.iter().any(|known| known == id) {
                    chain.push(id.to_string());
                }
            }
        }
        if chain.is_empty() {
            debug!("no identity numbers on page");
            return None;
        }
        Some(Located::new(chain, LocateStrategy::LineScan))
    }

    fn grade_in<'r>(
        &self,
        runs: impl Iterator<Item = &'r TextRun> + Clone,
        exact_strategy: LocateStrategy,
    ) -> Option<Located<String>> {
        runs.clone()
            .find_map(|r| self.vocab.grade_exact(&r.text))
            .map(|g| Located::new(g.to_string(), exact_strategy))
            .or_else(|| {
                runs.into_iter()
                    .find_map(|r| self.vocab.grade_confusable(&r.text))
                    .map(|g| Located::new(g.to_string(), LocateStrategy::Confusable))
            })
    }

    /// Subject grade: calibrated region first, then the top third of the page,
    /// then the runs following a "Grade" caption.
    pub fn find_grade(&self, page: &Page) -> Option<Located<String>> {
        let ordered = reading_order(&page.text);

        let region = self.layout.grade_region_px(page.width(), page.height());
        let in_region = ordered
            .iter()
            .copied()
            .filter(|r| region.contains(r.bbox.center_x(), r.bbox.center_y()));
        if let Some(found) = self.grade_in(in_region, LocateStrategy::GradeRegion) {
            return Some(found);
        }

        let top_third = page.height() as f32 / 3.0;
        let upper = ordered
            .iter()
            .copied()
            .filter(|r| r.bbox.center_y() < top_third);
        if let Some(found) = self.grade_in(upper, LocateStrategy::TopThird) {
            return Some(found);
        }

        let label = find_label(&page.text, "Grade")?;
        let start = ordered
            .iter()
            .position(|r| r.bbox.x0 >= label.x0 && on_same_line(&r.bbox, &label))?;
        let window = ordered
            .iter()
            .copied()
            .skip(start)
            .filter(|r| !self.vocab.is_field_label(&r.text))
            .take(GRADE_LABEL_WINDOW);
        let found = self
            .grade_in(window, LocateStrategy::LabelProximity)
            .map(|g| Located::new(g.value, LocateStrategy::LabelProximity));
        if found.is_none() {
            debug!("grade not found");
        }
        found
    }

    /// Occasion code with the reporting period. The period is read from the
    /// text block holding the occasion code: two dates give from/to, one date
    /// is the end of the period. Without an occasion block the latest date on
    /// the page is taken as the end of the period.
    pub fn find_occasion_and_dates(&self, page: &Page) -> OccasionAndDates {
        let lines = group_lines(&page.text);
        let mut result = OccasionAndDates::default();

        for (i, line) in lines.iter().enumerate() {
            let Some(code) = line.runs.iter().find_map(|r| self.vocab.occasion(&r.text)) else {
                continue;
            };
            result.occasion = Some(Located::new(code.to_string(), LocateStrategy::TextBlock));

            let mut block: Vec<&TextRun> = line.runs.clone();
            if !block.iter().any(|r| date_token(r).is_some())
                && let Some(next) = lines.get(i + 1)
            {
                block.extend(next.runs.iter().copied());
            }
            let mut dates: Vec<(f32, &str)> = block
                .iter()
                .filter_map(|r| date_token(r).map(|d| (r.bbox.x0, d)))
                .collect();
            dates.sort_by(|a, b| a.0.total_cmp(&b.0));

            match dates.as_slice() {
                [] => {}
                [(_, to)] => {
                    result.period_to = Some(Located::new(to.to_string(), LocateStrategy::TextBlock));
                }
                [(_, from), (_, to), ..] => {
                    result.period_from =
                        Some(Located::new(from.to_string(), LocateStrategy::TextBlock));
                    result.period_to = Some(Located::new(to.to_string(), LocateStrategy::TextBlock));
                }
            }
            break;
        }

        if result.period_to.is_none() {
            result.period_to = page
                .text
                .iter()
                .filter_map(date_token)
                .max()
                .map(|d| Located::new(d.to_string(), LocateStrategy::LatestDate));
        }
        result
    }

    /// Seven-digit report identifier after a "FITREP ID" caption.
    pub fn find_record_id(&self, page: &Page) -> Option<Located<String>> {
        let text = join_text(&reading_order(&page.text));
        if let Some(caps) = RECORD_ID.captures(&text) {
            return Some(Located::new(caps[1].to_string(), LocateStrategy::AnchorToken));
        }
        LOOSE_RECORD_ID
            .captures(&text)
            .map(|caps| Located::new(caps[1].to_string(), LocateStrategy::LineScan))
    }

    /// Nearest uppercase name token below or to the right of "Last Name".
    pub fn find_last_name(&self, page: &Page) -> Option<Located<String>> {
        let label = find_label(&page.text, "Last Name")?;
        let h = label.height().max(1.0);

        page.text
            .iter()
            .filter(|r| self.vocab.is_name_like(&r.text))
            .filter(|r| {
                let right = on_same_line(&r.bbox, &label) && r.bbox.x0 >= label.x1;
                let below = r.bbox.center_y() > label.y1
                    && r.bbox.center_y() - label.y1 <= 4.0 * h
                    && r.bbox.x0 >= label.x0 - 2.0 * h
                    && r.bbox.x0 <= label.x1 + 6.0 * h;
                right || below
            })
            .min_by(|a, b| {
                let da = (a.bbox.x0 - label.x0).abs() + (a.bbox.y0 - label.y0).abs();
                let db = (b.bbox.x0 - label.x0).abs() + (b.bbox.y0 - label.y0).abs();
                da.total_cmp(&db)
            })
            .map(|r| {
                let name = r.text.trim_matches(|c: char| !c.is_alphanumeric());
                Located::new(name.to_string(), LocateStrategy::LabelProximity)
            })
    }

    /// Text after the "Organization" caption on its own line, else the line below.
    pub fn find_organization(&self, page: &Page) -> Option<Located<String>> {
        let label = find_label(&page.text, "Organization")?;
        let h = label.height().max(1.0);
        let lines = group_lines(&page.text);

        let same: Vec<&TextRun> = lines
            .iter()
            .filter(|l| on_same_line(&l.bbox, &label))
            .flat_map(|l| l.runs.iter().copied())
            .filter(|r| r.bbox.x0 >= label.x1)
            .collect();
        let value = if !same.is_empty() {
            join_text(&same)
        } else {
            let below = lines.iter().find(|l| {
                l.center_y() > label.y1 && l.center_y() - label.y1 <= 4.0 * h
            })?;
            let runs: Vec<&TextRun> = below
                .runs
                .iter()
                .copied()
                .filter(|r| r.bbox.x0 >= label.x0 - 2.0 * h)
                .collect();
            join_text(&runs)
        };
        (!value.is_empty()).then(|| Located::new(value, LocateStrategy::LabelProximity))
    }

    /// Name and rank printed on the same line as an official's identity number.
    pub fn find_official(&self, page: &Page, id: &str) -> OfficialFields {
        let mut fields = OfficialFields {
            id: Some(id.to_string()),
            ..OfficialFields::default()
        };
        let Some(anchor) = page.text.iter().find(|r| r.text.contains(id)) else {
            return fields;
        };

        let mut line: Vec<&TextRun> = page
            .text
            .iter()
            .filter(|r| on_same_line(&r.bbox, &anchor.bbox))
            .collect();
        line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));

        fields.name = line
            .iter()
            .find(|r| self.vocab.is_name_like(&r.text))
            .map(|r| r.text.trim_matches(|c: char| !c.is_alphanumeric()).to_string());
        fields.rank = line
            .iter()
            .find_map(|r| self.vocab.grade_exact(&r.text))
            .or_else(|| {
                line.iter()
                    .filter(|r| !r.text.contains(id))
                    .find_map(|r| self.vocab.grade_confusable(&r.text))
            })
            .map(str::to_string);
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn run(text: &str, x: f32, y: f32) -> TextRun {
        TextRun::new(text, BBox::new(x, y, x + 12.0 * text.len() as f32, y + 24.0))
    }

    fn page(runs: Vec<TextRun>) -> Page {
        Page::new(GrayImage::new(1000, 1300)).with_text(runs)
    }

    #[test]
    fn identity_chain_dedupes_in_order() {
        let p = page(vec![
            run("1234567890", 500.0, 200.0),
            run("2345678901", 500.0, 700.0),
            run("1234567890", 500.0, 900.0),
        ]);
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let found = TextFieldLocator::new(&vocab, &layout)
            .find_identity_chain(&p)
            .expect("chain");
        assert_eq!(found.value, vec!["1234567890", "2345678901"]);
    }

    #[test]
    fn grade_prefers_region_then_confusable_then_label() {
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let locator = TextFieldLocator::new(&vocab, &layout);

        let in_region = page(vec![run("CAPT", 600.0, 190.0), run("MAJ", 100.0, 1000.0)]);
        let found = locator.find_grade(&in_region).expect("grade");
        assert_eq!(found.value, "CAPT");
        assert_eq!(found.strategy, LocateStrategy::GradeRegion);

        let misread = page(vec![run("LRCOL", 600.0, 190.0)]);
        let found = locator.find_grade(&misread).expect("grade");
        assert_eq!(found.value, "LTCOL");
        assert_eq!(found.strategy, LocateStrategy::Confusable);

        let labelled = page(vec![run("Grade", 100.0, 800.0), run("GYSGT", 100.0, 830.0)]);
        let found = locator.find_grade(&labelled).expect("grade");
        assert_eq!(found.value, "GYSGT");
        assert_eq!(found.strategy, LocateStrategy::LabelProximity);
    }

    #[test]
    fn occasion_block_gives_period() {
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let locator = TextFieldLocator::new(&vocab, &layout);

        let p = page(vec![
            run("TR", 150.0, 260.0),
            run("20231231", 450.0, 262.0),
            run("20230101", 300.0, 258.0),
        ]);
        let found = locator.find_occasion_and_dates(&p);
        assert_eq!(found.occasion.expect("occasion").value, "TR");
        assert_eq!(found.period_from.expect("from").value, "20230101");
        assert_eq!(found.period_to.expect("to").value, "20231231");

        let single = page(vec![run("AN", 150.0, 260.0), run("20240630", 300.0, 260.0)]);
        let found = locator.find_occasion_and_dates(&single);
        assert!(found.period_from.is_none());
        assert_eq!(found.period_to.expect("to").value, "20240630");
    }

    #[test]
    fn latest_date_is_fallback_and_invalid_dates_ignored() {
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let p = page(vec![
            run("20220115", 100.0, 400.0),
            run("20231301", 100.0, 500.0),
            run("20230704", 100.0, 600.0),
        ]);
        let found = TextFieldLocator::new(&vocab, &layout).find_occasion_and_dates(&p);
        assert!(found.occasion.is_none());
        let to = found.period_to.expect("to");
        assert_eq!(to.value, "20230704");
        assert_eq!(to.strategy, LocateStrategy::LatestDate);
    }

    #[test]
    fn record_id_follows_anchor() {
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let p = page(vec![run("FITREP", 600.0, 60.0), run("ID", 700.0, 60.0), run("1234567", 740.0, 60.0)]);
        let found = TextFieldLocator::new(&vocab, &layout).find_record_id(&p).expect("id");
        assert_eq!(found.value, "1234567");
        assert_eq!(found.strategy, LocateStrategy::AnchorToken);
    }

    #[test]
    fn official_name_skips_captions_and_service() {
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let p = page(vec![
            run("USMC", 20.0, 700.0),
            run("SMITH", 100.0, 700.0),
            run("2345678901", 300.0, 702.0),
            run("MAJ", 500.0, 700.0),
        ]);
        let found = TextFieldLocator::new(&vocab, &layout).find_official(&p, "2345678901");
        assert_eq!(found.name.as_deref(), Some("SMITH"));
        assert_eq!(found.rank.as_deref(), Some("MAJ"));
    }

    #[test]
    fn last_name_below_caption() {
        let vocab = Vocabulary::default();
        let layout = FormLayout::default();
        let p = page(vec![
            run("Last", 100.0, 160.0),
            run("Name", 160.0, 160.0),
            run("DOE", 100.0, 200.0),
            run("CAPT", 600.0, 200.0),
        ]);
        let found = TextFieldLocator::new(&vocab, &layout).find_last_name(&p).expect("name");
        assert_eq!(found.value, "DOE");
    }
}
