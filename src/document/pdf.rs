//! PDF backend: renders pages through pdfium and pulls out the path objects
//! and text segments in raster coordinates.

use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::{BBox, DocumentOpenError, LoaderConfig, Page, PathStep, TextRun, raster, segments_from_path};

fn pdf_error(err: PdfiumError) -> DocumentOpenError {
    DocumentOpenError::Pdf(err.to_string())
}

fn bind(config: &LoaderConfig) -> Result<Pdfium, DocumentOpenError> {
    let bindings = match &config.pdfium_library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| DocumentOpenError::PdfiumUnavailable(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

pub(super) fn load_pdf(bytes: &[u8], config: &LoaderConfig) -> Result<Vec<Page>, DocumentOpenError> {
    let pdfium = bind(config)?;
    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(pdf_error)?;

    let mut pages = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let converted = convert_page(&page, config.raster_scale)?;
        debug!(
            page = index,
            segments = converted.segments.len(),
            runs = converted.text.len(),
            "pdf page converted"
        );
        pages.push(converted);
    }
    Ok(pages)
}

fn convert_page(page: &PdfPage, scale: f32) -> Result<Page, DocumentOpenError> {
    let page_height = page.height().value;
    let pixel_width = (page.width().value * scale).round() as i32;
    let pixel_height = (page_height * scale).round() as i32;

    let bitmap = page
        .render_with_config(
            &PdfRenderConfig::new()
                .set_target_width(pixel_width)
                .set_target_height(pixel_height)
                .render_form_data(true)
                .render_annotations(true),
        )
        .map_err(pdf_error)?;
    let raster = raster::to_gray(&bitmap.as_image())?;

    // PDF space has a bottom-left origin in points.
    let to_px = |x: f32, y: f32| (x * scale, (page_height - y) * scale);

    let mut segments = Vec::new();
    for object in page.objects().iter() {
        let Some(path) = object.as_path_object() else {
            continue;
        };
        let mut steps = Vec::new();
        for point in path.segments().iter() {
            let at = to_px(point.x().value, point.y().value);
            match point.segment_type() {
                PdfPathSegmentType::MoveTo | PdfPathSegmentType::BezierTo => steps.push(PathStep::MoveTo(at)),
                PdfPathSegmentType::LineTo => steps.push(PathStep::LineTo(at)),
                _ => continue,
            }
            if point.is_close() {
                steps.push(PathStep::Close);
            }
        }
        segments.extend(segments_from_path(&steps));
    }

    let mut text = Vec::new();
    match page.text() {
        Ok(page_text) => {
            for segment in page_text.segments().iter() {
                let content = segment.text();
                let bounds = segment.bounds();
                let (x0, y0) = to_px(bounds.left().value, bounds.top().value);
                let (x1, y1) = to_px(bounds.right().value, bounds.bottom().value);
                text.extend(split_words(&content, BBox::new(x0, y0, x1, y1)));
            }
        }
        Err(err) => warn!(error = %err, "page text unavailable"),
    }

    Ok(Page {
        raster,
        segments,
        text,
    })
}

/// Breaks a text segment into word runs, sharing the segment's width out in
/// proportion to character offsets.
fn split_words(content: &str, bounds: BBox) -> Vec<TextRun> {
    let chars: Vec<char> = content.chars().collect();
    let total = chars.len().max(1) as f32;
    let char_width = bounds.width() / total;

    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in chars.iter().chain(std::iter::once(&' ')).enumerate() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                let word: String = chars[s..i].iter().collect();
                let x0 = bounds.x0 + s as f32 * char_width;
                let x1 = bounds.x0 + i as f32 * char_width;
                runs.push(TextRun::new(word, BBox::new(x0, bounds.y0, x1, bounds.y1)));
                start = None;
            }
            _ => {}
        }
    }
    runs
}
