//! Synthetic evaluation forms: rasters drawn with `imageproc`, the matching
//! vector segments and positioned text, and an optional PDF rendition.

use std::path::Path;

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use oxidize_pdf::{Color, Font};

use crate::document::{BBox, Document, Page, Segment, TextRun};
use crate::grid::COLUMN_COUNT;
use crate::layout::{FormLayout, not_observed_boxes};

pub const PAGE_WIDTH: u32 = 1000;
pub const PAGE_HEIGHT: u32 = 1300;

const PAPER: u8 = 255;
const RULE: u8 = 0;
const RULE_WIDTH: u32 = 2;
const CHAR_WIDTH: f32 = 12.0;
const TEXT_HEIGHT: f32 = 24.0;
/// Mark strokes run between these fractions of the cell.
const MARK_INSET: f32 = 0.2;
const HEADER_LETTERS: [&str; COLUMN_COUNT] = ["A", "B", "C", "D", "E", "F", "G", "H"];

/// One checkbox page: where the grid sits and what is marked in it.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub left: f32,
    pub top: f32,
    pub cell_width: f32,
    pub cell_height: f32,
    /// One entry per row: the marked 1-based column, if any.
    pub marks: Vec<Option<u8>>,
    /// Draw the table rules into the raster.
    pub ruled: bool,
    /// Emit the table rules as vector segments.
    pub vector_lines: bool,
    /// Print the "A".."H" letters above the table as text runs.
    pub header_labels: bool,
    /// Gray level of the marks.
    pub ink: u8,
    pub stroke: u32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            left: 150.0,
            top: 300.0,
            cell_width: 90.0,
            cell_height: 120.0,
            marks: Vec::new(),
            ruled: true,
            vector_lines: true,
            header_labels: false,
            ink: 0,
            stroke: 5,
        }
    }
}

impl GridSpec {
    pub fn with_marks(marks: Vec<Option<u8>>) -> Self {
        Self {
            marks,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> usize {
        self.marks.len()
    }

    pub fn right(&self) -> f32 {
        self.left + COLUMN_COUNT as f32 * self.cell_width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.rows() as f32 * self.cell_height
    }

    /// Cell at a 0-based row and 0-based column.
    pub fn cell(&self, row: usize, column: usize) -> BBox {
        let x0 = self.left + column as f32 * self.cell_width;
        let y0 = self.top + row as f32 * self.cell_height;
        BBox::new(x0, y0, x0 + self.cell_width, y0 + self.cell_height)
    }

    fn row_lines(&self) -> impl Iterator<Item = f32> + '_ {
        (0..=self.rows()).map(|i| self.top + i as f32 * self.cell_height)
    }

    fn column_lines(&self) -> impl Iterator<Item = f32> + '_ {
        (0..=COLUMN_COUNT).map(|j| self.left + j as f32 * self.cell_width)
    }
}

fn blank() -> GrayImage {
    GrayImage::from_pixel(PAGE_WIDTH, PAGE_HEIGHT, Luma([PAPER]))
}

/// A run of `text` with its top-left corner at (x, y).
pub fn text_run(text: &str, x: f32, y: f32) -> TextRun {
    let width = CHAR_WIDTH * text.chars().count() as f32;
    TextRun::new(text, BBox::new(x, y, x + width, y + TEXT_HEIGHT))
}

/// Two strokes corner to corner across the inner part of `cell`.
pub fn draw_x(raster: &mut GrayImage, cell: BBox, ink: u8, stroke: u32) {
    let inner = cell.scaled(1.0 - 2.0 * MARK_INSET, 1.0 - 2.0 * MARK_INSET);
    let half = (stroke / 2) as i32;
    for d in -half..=half {
        let d = d as f32;
        draw_line_segment_mut(raster, (inner.x0 + d, inner.y0), (inner.x1 + d, inner.y1), Luma([ink]));
        draw_line_segment_mut(raster, (inner.x1 + d, inner.y0), (inner.x0 + d, inner.y1), Luma([ink]));
    }
}

fn draw_rule(raster: &mut GrayImage, from: (f32, f32), to: (f32, f32)) {
    let half = (RULE_WIDTH / 2) as f32;
    let x = from.0.min(to.0) - half;
    let y = from.1.min(to.1) - half;
    let w = (to.0 - from.0).abs() as u32 + RULE_WIDTH;
    let h = (to.1 - from.1).abs() as u32 + RULE_WIDTH;
    draw_filled_rect_mut(raster, Rect::at(x as i32, y as i32).of_size(w, h), Luma([RULE]));
}

/// Table rules of a grid as (start, end) pairs, horizontals first.
fn rules(spec: &GridSpec) -> Vec<((f32, f32), (f32, f32))> {
    let mut lines: Vec<_> = spec
        .row_lines()
        .map(|y| ((spec.left, y), (spec.right(), y)))
        .collect();
    lines.extend(spec.column_lines().map(|x| ((x, spec.top), (x, spec.bottom()))));
    lines
}

/// A trait page with the table, the marks, and optionally the header letters.
pub fn checkbox_page(spec: &GridSpec) -> Page {
    let mut raster = blank();
    let rules = rules(spec);
    if spec.ruled {
        for (from, to) in &rules {
            draw_rule(&mut raster, *from, *to);
        }
    }
    for (row, mark) in spec.marks.iter().enumerate() {
        if let Some(column) = (*mark).filter(|c| (1..=COLUMN_COUNT as u8).contains(c)) {
            draw_x(&mut raster, spec.cell(row, column as usize - 1), spec.ink, spec.stroke);
        }
    }

    let segments = if spec.vector_lines {
        rules.iter().map(|(from, to)| Segment::new(*from, *to)).collect()
    } else {
        Vec::new()
    };
    let text = if spec.header_labels {
        HEADER_LETTERS
            .iter()
            .enumerate()
            .map(|(j, letter)| {
                let cx = spec.left + (j as f32 + 0.5) * spec.cell_width;
                text_run(letter, cx - CHAR_WIDTH / 2.0, spec.top - 2.0 * TEXT_HEIGHT)
            })
            .collect()
    } else {
        Vec::new()
    };
    Page::new(raster).with_segments(segments).with_text(text)
}

/// How the form-level "Not Observed" box is filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotObservedMark {
    #[default]
    Blank,
    /// An X drawn inside the box.
    Drawn,
    /// A typed "X" beside the label.
    Typed,
}

/// An official line: name, grade, 10-digit identity number.
#[derive(Debug, Clone, PartialEq)]
pub struct OfficialSpec {
    pub name: String,
    pub rank: String,
    pub id: String,
}

impl OfficialSpec {
    pub fn new(name: &str, rank: &str, id: &str) -> Self {
        Self {
            name: name.to_string(),
            rank: rank.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminSpec {
    pub record_id: Option<String>,
    pub last_name: Option<String>,
    pub grade: Option<String>,
    pub occasion: Option<String>,
    pub period_from: Option<String>,
    pub period_to: Option<String>,
    pub organization: Option<String>,
    pub subject_id: Option<String>,
    pub reporting: Option<OfficialSpec>,
    pub reviewing: Option<OfficialSpec>,
    pub not_observed: NotObservedMark,
}

impl Default for AdminSpec {
    fn default() -> Self {
        Self {
            record_id: Some("1234567".into()),
            last_name: Some("DOE".into()),
            grade: Some("CAPT".into()),
            occasion: Some("TR".into()),
            period_from: Some("20230101".into()),
            period_to: Some("20231231".into()),
            organization: Some("HQBN".into()),
            subject_id: Some("1234567890".into()),
            reporting: Some(OfficialSpec::new("SMITH", "MAJ", "2345678901")),
            reviewing: Some(OfficialSpec::new("JONES", "LTCOL", "3456789012")),
            not_observed: NotObservedMark::Blank,
        }
    }
}

/// Positioned text of the administrative page.
fn admin_text(spec: &AdminSpec) -> Vec<TextRun> {
    let mut runs = Vec::new();
    if let Some(id) = &spec.record_id {
        runs.push(text_run("FITREP", 600.0, 60.0));
        runs.push(text_run("ID", 700.0, 60.0));
        runs.push(text_run(id, 740.0, 60.0));
    }
    runs.push(text_run("Last", 100.0, 160.0));
    runs.push(text_run("Name", 160.0, 160.0));
    runs.push(text_run("Grade", 600.0, 160.0));
    if let Some(name) = &spec.last_name {
        runs.push(text_run(name, 100.0, 200.0));
    }
    if let Some(grade) = &spec.grade {
        runs.push(text_run(grade, 600.0, 200.0));
    }
    if let Some(occasion) = &spec.occasion {
        runs.push(text_run(occasion, 150.0, 260.0));
    }
    if let Some(from) = &spec.period_from {
        runs.push(text_run(from, 300.0, 260.0));
    }
    if let Some(to) = &spec.period_to {
        runs.push(text_run(to, 450.0, 260.0));
    }
    runs.push(text_run("Organization", 100.0, 330.0));
    if let Some(org) = &spec.organization {
        runs.push(text_run(org, 300.0, 330.0));
    }
    if let Some(id) = &spec.subject_id {
        runs.push(text_run(id, 300.0, 400.0));
    }
    for (official, y) in [(&spec.reporting, 700.0), (&spec.reviewing, 900.0)] {
        if let Some(official) = official {
            runs.push(text_run(&official.name, 100.0, y));
            runs.push(text_run(&official.id, 300.0, y + 2.0));
            runs.push(text_run(&official.rank, 500.0, y));
        }
    }
    runs.push(text_run("Not", 300.0, 1100.0));
    runs.push(text_run("Observed", 350.0, 1100.0));
    if spec.not_observed == NotObservedMark::Typed {
        runs.push(text_run("X", 470.0, 1100.0));
    }
    runs
}

/// Page 1: administrative block and the form-level "Not Observed" box.
pub fn admin_page(spec: &AdminSpec) -> Page {
    let mut raster = blank();
    let text = admin_text(spec);

    let label = text
        .iter()
        .filter(|r| r.text == "Not" || r.text == "Observed")
        .map(|r| r.bbox)
        .reduce(|a, b| a.union(&b));
    if let Some(label) = label {
        let [left_box, _] = not_observed_boxes(&label, 1.5);
        let rect = Rect::at(left_box.x0 as i32, left_box.y0 as i32)
            .of_size(left_box.width() as u32, left_box.height() as u32);
        draw_hollow_rect_mut(&mut raster, rect, Luma([RULE]));
        if spec.not_observed == NotObservedMark::Drawn {
            draw_x(&mut raster, left_box, 0, 3);
        }
    }
    Page::new(raster).with_text(text)
}

/// A full form: the administrative page followed by one checkbox page per
/// trait page of `layout`. Missing mark rows are left blank.
pub fn form_document(
    admin: &AdminSpec,
    marks: &[Vec<Option<u8>>],
    base: &GridSpec,
    layout: &FormLayout,
) -> Document {
    let mut pages = vec![admin_page(admin)];
    for (i, trait_page) in layout.trait_pages.iter().enumerate() {
        let mut row_marks = marks.get(i).cloned().unwrap_or_default();
        row_marks.resize(trait_page.rows, None);
        pages.push(checkbox_page(&GridSpec {
            marks: row_marks,
            ..base.clone()
        }));
    }
    Document::from_pages(pages, 1.0)
}

/// Writes `doc` as a vector PDF: rules become stroked paths, text runs become
/// Helvetica text, marks become two stroked diagonals. Pages map onto A4 with
/// the same scale on both axes.
pub fn write_form_pdf(
    path: &Path,
    admin: &AdminSpec,
    marks: &[Vec<Option<u8>>],
    base: &GridSpec,
    layout: &FormLayout,
) -> oxidize_pdf::Result<()> {
    let mut pdf = oxidize_pdf::Document::new();
    pdf.set_title("Synthetic evaluation form");

    let template = oxidize_pdf::Page::a4();
    let scale = template.width() / PAGE_WIDTH as f64;
    let page_height = template.height();
    let to_pdf = move |(x, y): (f32, f32)| (x as f64 * scale, page_height - y as f64 * scale);

    let write_text = |page: &mut oxidize_pdf::Page, runs: &[TextRun]| -> oxidize_pdf::Result<()> {
        for run in runs {
            let (x, y) = to_pdf((run.bbox.x0, run.bbox.y1));
            page.text()
                .set_font(Font::Helvetica, run.bbox.height() as f64 * scale)
                .at(x, y)
                .write(&run.text)?;
        }
        Ok(())
    };

    let mut first = oxidize_pdf::Page::a4();
    write_text(&mut first, &admin_text(admin))?;
    pdf.add_page(first);

    for (i, trait_page) in layout.trait_pages.iter().enumerate() {
        let mut row_marks = marks.get(i).cloned().unwrap_or_default();
        row_marks.resize(trait_page.rows, None);
        let spec = GridSpec {
            marks: row_marks,
            ..base.clone()
        };

        let mut page = oxidize_pdf::Page::a4();
        for (from, to) in rules(&spec) {
            let (x0, y0) = to_pdf(from);
            let (x1, y1) = to_pdf(to);
            page.graphics()
                .set_stroke_color(Color::black())
                .set_line_width(RULE_WIDTH as f64 * scale)
                .move_to(x0, y0)
                .line_to(x1, y1)
                .stroke();
        }
        for (row, mark) in spec.marks.iter().enumerate() {
            let Some(column) = (*mark).filter(|c| (1..=COLUMN_COUNT as u8).contains(c)) else {
                continue;
            };
            let inner = spec
                .cell(row, column as usize - 1)
                .scaled(1.0 - 2.0 * MARK_INSET, 1.0 - 2.0 * MARK_INSET);
            for (from, to) in [
                ((inner.x0, inner.y0), (inner.x1, inner.y1)),
                ((inner.x1, inner.y0), (inner.x0, inner.y1)),
            ] {
                let (x0, y0) = to_pdf(from);
                let (x1, y1) = to_pdf(to);
                page.graphics()
                    .set_stroke_color(Color::Gray(spec.ink as f64 / 255.0))
                    .set_line_width(spec.stroke as f64 * scale)
                    .move_to(x0, y0)
                    .line_to(x1, y1)
                    .stroke();
            }
        }
        if spec.header_labels {
            write_text(&mut page, &checkbox_page(&spec).text)?;
        }
        pdf.add_page(page);
    }

    pdf.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_land_in_their_cells() {
        let spec = GridSpec::with_marks(vec![Some(2), None]);
        let page = checkbox_page(&spec);
        let cell = spec.cell(0, 1);
        let center = page
            .raster
            .get_pixel(cell.center_x() as u32, cell.center_y() as u32);
        assert_eq!(center.0[0], 0);
        let empty = spec.cell(1, 1);
        let center = page
            .raster
            .get_pixel(empty.center_x() as u32, empty.center_y() as u32);
        assert_eq!(center.0[0], PAPER);
        assert_eq!(page.segments.len(), 3 + COLUMN_COUNT + 1);
    }

    #[test]
    fn form_has_one_page_per_trait_page() {
        let layout = FormLayout::default();
        let doc = form_document(&AdminSpec::default(), &[], &GridSpec::default(), &layout);
        assert_eq!(doc.page_count(), 1 + layout.trait_pages.len());
        assert_eq!(doc.page(3).map(|p| p.segments.len()), Some(4 + 1 + COLUMN_COUNT + 1));
    }
}
