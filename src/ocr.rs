//! Narrow-vocabulary recognition: is this crop an "X", and, when a word
//! engine is available, which words sit where on a scanned page.

use std::sync::Arc;

use image::GrayImage;

use crate::config::{ConfigError, ExtractConfig, OcrEngine, ScoringConfig};
use crate::document::TextRun;

const MIN_DIAGONAL_COVERAGE: f32 = 0.6;
const MIN_FILL: f32 = 0.02;
const MAX_FILL: f32 = 0.6;

pub trait Recognizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the crop shows a hand or printed "X" mark.
    fn sees_x(&self, crop: &GrayImage) -> bool;

    /// Positioned words on a full page, in raster pixels. Engines without word
    /// recognition return nothing.
    fn recognize_words(&self, _page: &GrayImage) -> Vec<TextRun> {
        Vec::new()
    }
}

/// Recognizes an "X" from its geometry: both diagonals of the crop must be
/// traced by ink while the crop as a whole stays mostly blank.
#[derive(Debug, Clone)]
pub struct StrokeRecognizer {
    ink_threshold: u8,
    min_coverage: f32,
}

impl StrokeRecognizer {
    pub fn new(ink_threshold: u8) -> Self {
        Self {
            ink_threshold,
            min_coverage: MIN_DIAGONAL_COVERAGE,
        }
    }

    fn is_ink(&self, crop: &GrayImage, x: i64, y: i64, radius: i64) -> bool {
        let (w, h) = (crop.width() as i64, crop.height() as i64);
        for yy in (y - radius).max(0)..=(y + radius).min(h - 1) {
            for xx in (x - radius).max(0)..=(x + radius).min(w - 1) {
                if crop.get_pixel(xx as u32, yy as u32).0[0] <= self.ink_threshold {
                    return true;
                }
            }
        }
        false
    }

    /// Fraction of sample points along a diagonal that touch ink.
    fn coverage(&self, crop: &GrayImage, anti: bool) -> f32 {
        let (w, h) = (crop.width() as f32, crop.height() as f32);
        let samples = crop.width().max(crop.height());
        let radius = (crop.width().min(crop.height()) / 10).max(1) as i64;
        let hits = (0..=samples)
            .filter(|&t| {
                let f = t as f32 / samples as f32;
                let x = f * (w - 1.0);
                let y = if anti { (1.0 - f) * (h - 1.0) } else { f * (h - 1.0) };
                self.is_ink(crop, x.round() as i64, y.round() as i64, radius)
            })
            .count();
        hits as f32 / (samples + 1) as f32
    }
}

impl From<&ScoringConfig> for StrokeRecognizer {
    fn from(config: &ScoringConfig) -> Self {
        Self::new(config.ink_threshold)
    }
}

impl Recognizer for StrokeRecognizer {
    fn name(&self) -> &'static str {
        "stroke"
    }

    fn sees_x(&self, crop: &GrayImage) -> bool {
        if crop.width() < 5 || crop.height() < 5 {
            return false;
        }
        let total = (crop.width() * crop.height()) as f32;
        let ink = crop.pixels().filter(|p| p.0[0] <= self.ink_threshold).count() as f32;
        let fill = ink / total;
        if !(MIN_FILL..=MAX_FILL).contains(&fill) {
            return false;
        }
        self.coverage(crop, false) >= self.min_coverage && self.coverage(crop, true) >= self.min_coverage
    }
}

/// The recognizer selected by `config.ocr`. Asking for Tesseract in a build
/// without the `tesseract` feature is a configuration error.
pub fn build_recognizer(config: &ExtractConfig) -> Result<Arc<dyn Recognizer>, ConfigError> {
    let stroke = StrokeRecognizer::from(&config.scoring);
    match config.ocr.engine {
        OcrEngine::Stroke => Ok(Arc::new(stroke)),
        #[cfg(feature = "tesseract")]
        OcrEngine::Tesseract => Ok(Arc::new(TesseractRecognizer::new(
            config.ocr.language.clone(),
            config.ocr.min_confidence,
            stroke,
        ))),
        #[cfg(not(feature = "tesseract"))]
        OcrEngine::Tesseract => Err(ConfigError::Invalid(
            "ocr engine 'tesseract' needs a build with the `tesseract` feature".into(),
        )),
    }
}

#[cfg(feature = "tesseract")]
pub use tesseract::TesseractRecognizer;

#[cfg(feature = "tesseract")]
mod tesseract {
    use image::GrayImage;
    use leptess::{LepTess, Variable};
    use tracing::{debug, warn};

    use super::{Recognizer, StrokeRecognizer};
    use crate::document::{BBox, TextRun};

    /// Word recognition through Tesseract; "X" checks combine the stroke test
    /// with a single-character read.
    pub struct TesseractRecognizer {
        language: String,
        min_confidence: i32,
        stroke: StrokeRecognizer,
    }

    impl TesseractRecognizer {
        pub fn new(language: impl Into<String>, min_confidence: i32, stroke: StrokeRecognizer) -> Self {
            Self {
                language: language.into(),
                min_confidence,
                stroke,
            }
        }

        fn engine(&self, image: &GrayImage, psm: &str) -> Option<LepTess> {
            let mut lt = match LepTess::new(None, &self.language) {
                Ok(lt) => lt,
                Err(err) => {
                    warn!(error = %err, "tesseract init failed");
                    return None;
                }
            };
            lt.set_variable(Variable::TesseditPagesegMode, psm).ok()?;

            let mut png = std::io::Cursor::new(Vec::new());
            image.write_to(&mut png, image::ImageFormat::Png).ok()?;
            lt.set_image_from_mem(png.get_ref()).ok()?;
            Some(lt)
        }
    }

    impl Recognizer for TesseractRecognizer {
        fn name(&self) -> &'static str {
            "tesseract"
        }

        fn sees_x(&self, crop: &GrayImage) -> bool {
            if self.stroke.sees_x(crop) {
                return true;
            }
            // Single character mode.
            let Some(mut lt) = self.engine(crop, "10") else {
                return false;
            };
            let text = lt.get_utf8_text().unwrap_or_default();
            matches!(text.trim(), "X" | "x")
        }

        fn recognize_words(&self, page: &GrayImage) -> Vec<TextRun> {
            let Some(mut lt) = self.engine(page, "11") else {
                return Vec::new();
            };
            let Some(boxes) =
                lt.get_component_boxes(leptess::capi::TessPageIteratorLevel_RIL_WORD, true)
            else {
                return Vec::new();
            };

            let mut words = Vec::new();
            for bbox in &boxes {
                let geom = bbox.get_geometry();
                lt.set_rectangle(geom.x, geom.y, geom.w, geom.h);
                let text = lt.get_utf8_text().unwrap_or_default().trim().to_string();
                if text.is_empty() || lt.mean_text_conf() < self.min_confidence {
                    continue;
                }
                let (x, y) = (geom.x as f32, geom.y as f32);
                words.push(TextRun::new(
                    text,
                    BBox::new(x, y, x + geom.w as f32, y + geom.h as f32),
                ));
            }
            debug!(words = words.len(), "tesseract words recognized");
            words
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
    use imageproc::rect::Rect;

    fn blank(size: u32) -> GrayImage {
        GrayImage::from_pixel(size, size, Luma([255u8]))
    }

    fn thick_line(img: &mut GrayImage, from: (f32, f32), to: (f32, f32), ink: u8) {
        for d in -2..=2 {
            let d = d as f32;
            draw_line_segment_mut(img, (from.0 + d, from.1), (to.0 + d, to.1), Luma([ink]));
        }
    }

    #[test]
    fn x_mark_is_seen() {
        let mut img = blank(60);
        thick_line(&mut img, (0.0, 0.0), (59.0, 59.0), 0);
        thick_line(&mut img, (59.0, 0.0), (0.0, 59.0), 0);
        assert!(StrokeRecognizer::new(128).sees_x(&img));
    }

    #[test]
    fn single_stroke_blank_and_fill_are_not_x() {
        let recognizer = StrokeRecognizer::new(128);
        assert!(!recognizer.sees_x(&blank(60)));

        let mut slash = blank(60);
        thick_line(&mut slash, (0.0, 0.0), (59.0, 59.0), 0);
        assert!(!recognizer.sees_x(&slash));

        let mut solid = blank(60);
        draw_filled_rect_mut(&mut solid, Rect::at(0, 0).of_size(60, 60), Luma([0u8]));
        assert!(!recognizer.sees_x(&solid));
    }

    #[test]
    fn configured_engine_is_built() {
        let config = ExtractConfig::default();
        assert_eq!(build_recognizer(&config).expect("stroke").name(), "stroke");

        let mut tesseract = ExtractConfig::default();
        tesseract.ocr.engine = OcrEngine::Tesseract;
        let built = build_recognizer(&tesseract);
        if cfg!(feature = "tesseract") {
            assert_eq!(built.expect("tesseract").name(), "tesseract");
        } else {
            assert!(matches!(built, Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn light_strokes_fall_below_ink_threshold() {
        let mut img = blank(60);
        thick_line(&mut img, (0.0, 0.0), (59.0, 59.0), 200);
        thick_line(&mut img, (59.0, 0.0), (0.0, 59.0), 200);
        assert!(!StrokeRecognizer::new(128).sees_x(&img));
    }
}
