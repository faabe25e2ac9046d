//! Reading-order helpers over positioned text runs.

use std::cmp::Ordering;

use crate::document::{BBox, TextRun};
use crate::vocab::normalize_token;

/// Runs sharing a baseline, sorted left to right.
#[derive(Debug, Clone)]
pub struct TextLine<'a> {
    pub runs: Vec<&'a TextRun>,
    pub bbox: BBox,
}

impl TextLine<'_> {
    pub fn text(&self) -> String {
        join_text(&self.runs)
    }

    pub fn center_y(&self) -> f32 {
        self.bbox.center_y()
    }
}

fn same_line(a: &BBox, b: &BBox) -> bool {
    let tolerance = 0.5 * a.height().max(b.height()).max(1.0);
    (a.center_y() - b.center_y()).abs() <= tolerance
}

fn by_position(a: &&TextRun, b: &&TextRun) -> Ordering {
    a.bbox
        .center_y()
        .total_cmp(&b.bbox.center_y())
        .then(a.bbox.x0.total_cmp(&b.bbox.x0))
}

/// Groups runs into lines, top to bottom. A run joins the current line when
/// its vertical center is within half a glyph height of the line's first run.
pub fn group_lines(runs: &[TextRun]) -> Vec<TextLine<'_>> {
    let mut sorted: Vec<&TextRun> = runs.iter().filter(|r| !r.text.trim().is_empty()).collect();
    sorted.sort_by(by_position);

    let mut lines: Vec<TextLine> = Vec::new();
    for run in sorted {
        if let Some(line) = lines.last_mut()
            && same_line(&line.runs[0].bbox, &run.bbox)
        {
            line.bbox = line.bbox.union(&run.bbox);
            line.runs.push(run);
            continue;
        }
        lines.push(TextLine {
            runs: vec![run],
            bbox: run.bbox,
        });
    }
    for line in &mut lines {
        line.runs.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
    }
    lines
}

/// All runs in reading order: line by line, left to right.
pub fn reading_order(runs: &[TextRun]) -> Vec<&TextRun> {
    group_lines(runs).into_iter().flat_map(|line| line.runs).collect()
}

pub fn join_text(runs: &[&TextRun]) -> String {
    runs.iter()
        .map(|r| r.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Finds a caption such as "Last Name" spread over consecutive runs of one
/// line, comparing normalized words. Returns the union of the matched runs.
pub fn find_label(runs: &[TextRun], label: &str) -> Option<BBox> {
    let wanted: Vec<String> = label
        .split_whitespace()
        .map(normalize_token)
        .filter(|w| !w.is_empty())
        .collect();
    if wanted.is_empty() {
        return None;
    }

    for line in group_lines(runs) {
        let words: Vec<(String, BBox)> = line
            .runs
            .iter()
            .copied()
            .flat_map(|r| {
                r.text
                    .split_whitespace()
                    .map(normalize_token)
                    .filter(|w| !w.is_empty())
                    .map(move |w| (w, r.bbox))
            })
            .collect();
        if words.len() < wanted.len() {
            continue;
        }
        for start in 0..=words.len() - wanted.len() {
            let window = &words[start..start + wanted.len()];
            if window.iter().zip(&wanted).all(|((w, _), want)| w == want) {
                let bbox = window
                    .iter()
                    .skip(1)
                    .fold(window[0].1, |acc, (_, b)| acc.union(b));
                return Some(bbox);
            }
        }
    }
    None
}
