//! Page layout of the fitness report: which page carries which trait rows, the
//! trait names, and the calibrated regions the locators sample.

use serde::{Deserialize, Serialize};

use crate::config::Region;
use crate::document::BBox;

/// Trait names in form order, pages 2 to 4.
pub const TRAIT_NAMES: [&str; 14] = [
    "Mission Accomplishment",
    "Proficiency",
    "Individual Character",
    "Effectiveness Under Stress",
    "Initiative",
    "Leadership",
    "Developing Subordinates",
    "Setting the Example",
    "Ensuring Well-being of Subordinates",
    "Communication Skills",
    "Intellect and Wisdom",
    "Decision Making Ability",
    "Judgment",
    "Fulfillment of Evaluation Responsibilities",
];

/// Column used for an unresolved row when defaults are allowed ("D").
pub const DEFAULT_COLUMN: u8 = 4;

const GRADE_REGION: Region = Region {
    x0: 0.45,
    y0: 0.08,
    x1: 0.80,
    y1: 0.22,
};

/// Left-hand "Not Observed" checkbox, sampled when the label cannot be read.
const NOT_OBSERVED_BOX: Region = Region {
    x0: 0.258,
    y0: 0.8415,
    x1: 0.294,
    y1: 0.8692,
};

/// Contiguous block of trait rows printed on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitPage {
    pub page_index: usize,
    /// Global index of the first trait row on the page.
    pub first_trait: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormLayout {
    pub admin_page: usize,
    pub trait_pages: Vec<TraitPage>,
    pub trait_names: Vec<String>,
    /// Where the subject's grade is printed on the administrative page.
    pub grade_region: Region,
    pub not_observed_label: String,
    /// Calibrated position of the "Not Observed" checkbox on the administrative page.
    pub not_observed_box: Region,
    pub default_column: u8,
}

impl Default for FormLayout {
    fn default() -> Self {
        Self {
            admin_page: 0,
            trait_pages: vec![
                TraitPage {
                    page_index: 1,
                    first_trait: 0,
                    rows: 5,
                },
                TraitPage {
                    page_index: 2,
                    first_trait: 5,
                    rows: 5,
                },
                TraitPage {
                    page_index: 3,
                    first_trait: 10,
                    rows: 4,
                },
            ],
            trait_names: TRAIT_NAMES.iter().map(|s| s.to_string()).collect(),
            grade_region: GRADE_REGION,
            not_observed_label: "Not Observed".to_string(),
            not_observed_box: NOT_OBSERVED_BOX,
            default_column: DEFAULT_COLUMN,
        }
    }
}

impl FormLayout {
    pub fn trait_count(&self) -> usize {
        self.trait_pages.iter().map(|p| p.rows).sum()
    }

    /// Name of a global trait row; rows beyond the name list get a positional name.
    pub fn trait_name(&self, index: usize) -> String {
        self.trait_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Trait {}", index + 1))
    }

    pub fn grade_region_px(&self, width: u32, height: u32) -> BBox {
        let (x0, y0, x1, y1) = self.grade_region.to_pixels(width, height);
        BBox::new(x0, y0, x1, y1)
    }

    pub fn not_observed_box_px(&self, width: u32, height: u32) -> BBox {
        let (x0, y0, x1, y1) = self.not_observed_box.to_pixels(width, height);
        BBox::new(x0, y0, x1, y1)
    }
}

/// Candidate checkbox squares on either side of the "Not Observed" label,
/// left first. The square is `factor` times the label height and sits a quarter
/// label height away from it.
pub fn not_observed_boxes(label: &BBox, factor: f32) -> [BBox; 2] {
    let h = label.height().max(1.0);
    let side = h * factor;
    let gap = h * 0.25;
    let cy = label.center_y();
    [
        BBox::new(label.x0 - gap - side, cy - side / 2.0, label.x0 - gap, cy + side / 2.0),
        BBox::new(label.x1 + gap, cy - side / 2.0, label.x1 + gap + side, cy + side / 2.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_covers_every_trait() {
        let layout = FormLayout::default();
        assert_eq!(layout.trait_count(), TRAIT_NAMES.len());
        let mut next = 0;
        for page in &layout.trait_pages {
            assert_eq!(page.first_trait, next);
            next += page.rows;
        }
    }

    #[test]
    fn boxes_flank_the_label() {
        let label = BBox::new(100.0, 50.0, 200.0, 70.0);
        let [left, right] = not_observed_boxes(&label, 1.5);
        assert!(left.x1 < label.x0);
        assert!(right.x0 > label.x1);
        assert!((left.width() - 30.0).abs() < 1e-3);
        assert!((right.center_y() - label.center_y()).abs() < 1e-3);
    }
}
