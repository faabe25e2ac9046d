//! Tunable parameters for every stage of the extraction.
//!
//! Defaults are built from the named constants below. Every struct
//! deserializes with `#[serde(default)]`, so a JSON file only needs the keys
//! it overrides.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::LoaderConfig;
use crate::layout::FormLayout;
use crate::vocab::Vocabulary;

const ROI_WIDTH_FRACTION: f32 = 0.6;
const ROI_HEIGHT_FRACTION: f32 = 0.6;
const WEIGHT_DARKNESS: f32 = 1.0;
const WEIGHT_EDGE: f32 = 0.5;
const WEIGHT_DIAGONAL: f32 = 1.5;
const WEIGHT_OCR_HINT: f32 = 2.0;
const BASELINE_DAMPING_FACTOR: f32 = 0.5;
const CONFIDENCE_MARGIN_MULTIPLIER: f32 = 1.5;
const MIN_MARK_SCORE: f32 = 0.15;
const DIAGONAL_OFFSETS: u32 = 2;
const INK_THRESHOLD: u8 = 128;

const CLUSTER_TOLERANCE_PX: f32 = 4.0;
const AXIS_SLOPE_TOLERANCE: f32 = 0.02;
const MIN_HORIZONTAL_FRACTION: f32 = 0.25;
const MIN_VERTICAL_LENGTH_PX: f32 = 20.0;
const SPACING_REGULARITY: f32 = 1.5;
const MIN_COLUMN_RATIO: f32 = 0.5;
const HEADER_ROW_TOLERANCE_PX: f32 = 8.0;
const HEADER_MIN_LABELS: usize = 6;
const HEADER_MIN_SPAN_FRACTION: f32 = 0.2;
const SMOOTHING_WINDOW: usize = 3;
const LINE_PEAK_RATIO: f32 = 0.5;
const LINE_FILL_RATIO: f32 = 0.6;
const ROW_PEAK_FLOOR: f32 = 0.1;

const RECONCILE_MARGIN_MULTIPLIER: f32 = 2.5;
const MAX_ALTERNATES: usize = 2;

const NOT_OBSERVED_BOX_FACTOR: f32 = 1.5;
const NOT_OBSERVED_MIN_DIAGONAL: f32 = 0.35;

const OCR_LANGUAGE: &str = "eng";
const OCR_MIN_CONFIDENCE: i32 = 60;

/// How far the orchestrator may go past the primary vector strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Vector clustering only, no row reconciliation.
    Off,
    /// Full strategy chain and row reconciliation.
    #[default]
    Auto,
    /// Skip vector clustering and start from the raster strategies.
    Force,
}

impl FromStr for FallbackMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            "force" => Ok(Self::Force),
            other => Err(ConfigError::Invalid(format!("unknown fallback mode '{other}'"))),
        }
    }
}

/// Cell scoring weights and the selection gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub roi_width_fraction: f32,
    pub roi_height_fraction: f32,
    pub weight_darkness: f32,
    pub weight_edge: f32,
    pub weight_diagonal: f32,
    pub weight_ocr_hint: f32,
    pub baseline_damping_factor: f32,
    pub confidence_margin_multiplier: f32,
    /// Adjusted score the best column must reach before the margin is checked.
    pub min_mark_score: f32,
    /// Half-range, in pixels, of the diagonal template shifts.
    pub diagonal_offsets: u32,
    /// Intensity at or below which a pixel counts as ink for the recognizer.
    pub ink_threshold: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            roi_width_fraction: ROI_WIDTH_FRACTION,
            roi_height_fraction: ROI_HEIGHT_FRACTION,
            weight_darkness: WEIGHT_DARKNESS,
            weight_edge: WEIGHT_EDGE,
            weight_diagonal: WEIGHT_DIAGONAL,
            weight_ocr_hint: WEIGHT_OCR_HINT,
            baseline_damping_factor: BASELINE_DAMPING_FACTOR,
            confidence_margin_multiplier: CONFIDENCE_MARGIN_MULTIPLIER,
            min_mark_score: MIN_MARK_SCORE,
            diagonal_offsets: DIAGONAL_OFFSETS,
            ink_threshold: INK_THRESHOLD,
        }
    }
}

/// A rectangle expressed as fractions of the page size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Region {
    pub const FULL: Region = Region {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };

    /// Pixel bounds `(x0, y0, x1, y1)` on a page of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let w = width as f32;
        let h = height as f32;
        (
            (self.x0 * w).clamp(0.0, w),
            (self.y0 * h).clamp(0.0, h),
            (self.x1 * w).clamp(0.0, w),
            (self.y1 * h).clamp(0.0, h),
        )
    }

    pub(crate) fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.x0)
            && (0.0..=1.0).contains(&self.y0)
            && (0.0..=1.0).contains(&self.x1)
            && (0.0..=1.0).contains(&self.y1)
            && self.x0 < self.x1
            && self.y0 < self.y1
    }
}

/// Geometric thresholds for grid reconstruction, in raster pixels unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cluster_tolerance_px: f32,
    /// Maximum |minor/major| extent for a segment to count as axis-aligned.
    pub axis_slope_tolerance: f32,
    /// Minimum horizontal line length as a fraction of page width.
    pub min_horizontal_fraction: f32,
    pub min_vertical_length_px: f32,
    /// Largest allowed ratio between the widest and narrowest gap of a line window.
    pub spacing_regularity: f32,
    /// Narrowest column allowed, relative to the median column width.
    pub min_column_ratio: f32,
    pub header_row_tolerance_px: f32,
    pub header_min_labels: usize,
    /// Minimum x-span of the header labels as a fraction of page width.
    pub header_min_span_fraction: f32,
    pub smoothing_window: usize,
    /// Column-profile level, relative to its maximum, that marks a vertical line.
    pub line_peak_ratio: f32,
    /// Fraction of the grid width a row must cover in ink to count as a ruled line.
    pub line_fill_ratio: f32,
    /// Row-profile peaks below this fraction of the maximum are ignored.
    pub row_peak_floor: f32,
    /// Area of the checkbox pages searched by the raster strategies.
    pub checkbox_region: Region,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cluster_tolerance_px: CLUSTER_TOLERANCE_PX,
            axis_slope_tolerance: AXIS_SLOPE_TOLERANCE,
            min_horizontal_fraction: MIN_HORIZONTAL_FRACTION,
            min_vertical_length_px: MIN_VERTICAL_LENGTH_PX,
            spacing_regularity: SPACING_REGULARITY,
            min_column_ratio: MIN_COLUMN_RATIO,
            header_row_tolerance_px: HEADER_ROW_TOLERANCE_PX,
            header_min_labels: HEADER_MIN_LABELS,
            header_min_span_fraction: HEADER_MIN_SPAN_FRACTION,
            smoothing_window: SMOOTHING_WINDOW,
            line_peak_ratio: LINE_PEAK_RATIO,
            line_fill_ratio: LINE_FILL_RATIO,
            row_peak_floor: ROW_PEAK_FLOOR,
            checkbox_region: Region::FULL,
        }
    }
}

/// Controls the second opinion taken on weak rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Rows whose best/second ratio falls below this are re-scored.
    pub reconcile_margin_multiplier: f32,
    /// Alternate results gathered per weak row.
    pub max_alternates: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            reconcile_margin_multiplier: RECONCILE_MARGIN_MULTIPLIER,
            max_alternates: MAX_ALTERNATES,
        }
    }
}

/// Detection of the form-level "Not Observed" checkbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotObservedConfig {
    /// Checkbox side length relative to the label height.
    pub box_size_factor: f32,
    pub min_diagonal_score: f32,
}

impl Default for NotObservedConfig {
    fn default() -> Self {
        Self {
            box_size_factor: NOT_OBSERVED_BOX_FACTOR,
            min_diagonal_score: NOT_OBSERVED_MIN_DIAGONAL,
        }
    }
}

/// Which engine reads words and "X" marks off the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngine {
    /// Geometric "X" test only; no word recognition.
    #[default]
    Stroke,
    /// Tesseract word and character recognition (needs the `tesseract` feature).
    Tesseract,
}

impl FromStr for OcrEngine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stroke" => Ok(Self::Stroke),
            "tesseract" => Ok(Self::Tesseract),
            other => Err(ConfigError::Invalid(format!("unknown ocr engine '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub engine: OcrEngine,
    /// Tesseract language code.
    pub language: String,
    /// Words below this mean confidence (0-100) are discarded.
    pub min_confidence: i32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngine::default(),
            language: OCR_LANGUAGE.to_string(),
            min_confidence: OCR_MIN_CONFIDENCE,
        }
    }
}

/// Top-level configuration bundle.
///
/// The scoring options are flattened so the JSON keys read
/// `roi_width_fraction`, `weight_diagonal`, ... at the top level.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub fallback_mode: FallbackMode,
    /// Unresolved rows stay unknown instead of falling back to the default letter.
    pub strict_no_defaults: bool,
    #[serde(flatten)]
    pub scoring: ScoringConfig,
    pub grid: GridConfig,
    pub reconcile: ReconcileConfig,
    pub not_observed: NotObservedConfig,
    pub loader: LoaderConfig,
    pub ocr: OcrConfig,
    /// Form layout; a file only needs the keys it overrides.
    pub layout: FormLayout,
    pub vocabulary: Vocabulary,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ExtractConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects values that would make the scorer or the grid checks meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        for (name, value) in [
            ("roi_width_fraction", s.roi_width_fraction),
            ("roi_height_fraction", s.roi_height_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1], got {value}")));
            }
        }
        for (name, value) in [
            ("weight_darkness", s.weight_darkness),
            ("weight_edge", s.weight_edge),
            ("weight_diagonal", s.weight_diagonal),
            ("weight_ocr_hint", s.weight_ocr_hint),
            ("min_mark_score", s.min_mark_score),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-negative, got {value}")));
            }
        }
        if !(0.0..=1.0).contains(&s.baseline_damping_factor) {
            return Err(ConfigError::Invalid(format!(
                "baseline_damping_factor must be in [0, 1], got {}",
                s.baseline_damping_factor
            )));
        }
        if !(s.confidence_margin_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "confidence_margin_multiplier must be >= 1, got {}",
                s.confidence_margin_multiplier
            )));
        }
        if !self.grid.checkbox_region.is_valid() {
            return Err(ConfigError::Invalid("checkbox_region must lie inside the page".into()));
        }
        if self.grid.header_min_labels == 0 || self.grid.header_min_labels > 8 {
            return Err(ConfigError::Invalid("header_min_labels must be in 1..=8".into()));
        }
        if !(self.grid.spacing_regularity >= 1.0) {
            return Err(ConfigError::Invalid("spacing_regularity must be >= 1".into()));
        }
        if !(self.loader.raster_scale > 0.0) {
            return Err(ConfigError::Invalid("raster_scale must be positive".into()));
        }
        if !(0..=100).contains(&self.ocr.min_confidence) {
            return Err(ConfigError::Invalid("ocr min_confidence must be in 0..=100".into()));
        }
        let layout = &self.layout;
        if !(1..=8).contains(&layout.default_column) {
            return Err(ConfigError::Invalid(format!(
                "default_column must be in 1..=8, got {}",
                layout.default_column
            )));
        }
        if layout.trait_pages.is_empty() {
            return Err(ConfigError::Invalid("layout needs at least one trait page".into()));
        }
        if !layout.grade_region.is_valid() || !layout.not_observed_box.is_valid() {
            return Err(ConfigError::Invalid("layout regions must lie inside the page".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ExtractConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn json_uses_flat_scoring_keys() {
        let cfg = ExtractConfig::from_json_str(
            r#"{ "fallback_mode": "force", "strict_no_defaults": true, "weight_ocr_hint": 3.5 }"#,
        )
        .expect("parse");
        assert_eq!(cfg.fallback_mode, FallbackMode::Force);
        assert!(cfg.strict_no_defaults);
        assert_eq!(cfg.scoring.weight_ocr_hint, 3.5);
        assert_eq!(cfg.scoring.weight_darkness, WEIGHT_DARKNESS);
    }

    #[test]
    fn margin_below_one_is_rejected() {
        let err = ExtractConfig::from_json_str(r#"{ "confidence_margin_multiplier": 0.5 }"#)
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_column_must_name_a_letter() {
        for column in [0, 9] {
            let json = format!(r#"{{ "layout": {{ "default_column": {column} }} }}"#);
            assert!(matches!(ExtractConfig::from_json_str(&json), Err(ConfigError::Invalid(_))));
        }
        let cfg = ExtractConfig::from_json_str(r#"{ "layout": { "default_column": 3 } }"#).expect("parse");
        assert_eq!(cfg.layout.default_column, 3);
        assert_eq!(cfg.layout.trait_count(), 14);
    }

    #[test]
    fn layout_and_vocabulary_load_from_json() {
        let cfg = ExtractConfig::from_json_str(
            r#"{
                "layout": { "not_observed_label": "N/O" },
                "vocabulary": { "grades": ["CAPT", "MAJ"] },
                "ocr": { "engine": "tesseract", "language": "deu" }
            }"#,
        )
        .expect("parse");
        assert_eq!(cfg.layout.not_observed_label, "N/O");
        assert_eq!(cfg.vocabulary.grades, vec!["CAPT".to_string(), "MAJ".to_string()]);
        assert_eq!(cfg.vocabulary.occasion_codes, Vocabulary::default().occasion_codes);
        assert_eq!(cfg.ocr.engine, OcrEngine::Tesseract);
        assert_eq!(cfg.ocr.min_confidence, OCR_MIN_CONFIDENCE);
    }

    #[test]
    fn fallback_mode_parses_case_insensitively() {
        assert_eq!("OFF".parse::<FallbackMode>().unwrap(), FallbackMode::Off);
        assert!("sometimes".parse::<FallbackMode>().is_err());
    }
}
