use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use fitrep_reader::config::OcrEngine;
use fitrep_reader::overlay::save_overlay;
use fitrep_reader::{Document, ExtractConfig, ExtractionRecord, ExtractionResult, Extractor, FallbackMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Parser, Debug)]
#[command(
    name = "fitrep_cli",
    about = "Extract administrative fields and trait markings from evaluation forms",
    version
)]
struct Cli {
    /// Form file, or a directory of PDF and image files
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// JSON configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Leave unresolved traits out instead of defaulting them
    #[arg(long = "strict")]
    strict: bool,

    /// Grid fallback chain: off, auto or force
    #[arg(long = "fallback")]
    fallback: Option<FallbackMode>,

    /// Recognizer for scanned pages: stroke or tesseract
    #[arg(long = "ocr")]
    ocr: Option<OcrEngine>,

    #[arg(long = "format", value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Output file (stdout when omitted)
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Write one grid overlay PNG per trait page into this directory
    #[arg(long = "overlay-dir")]
    overlay_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct FileRecord<'a> {
    file: String,
    #[serde(flatten)]
    record: ExtractionRecord<'a>,
}

fn is_form_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "pdf" | "png" | "jpg" | "jpeg" | "bmp" | "tif" | "tiff"
    )
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("no such file or directory: {}", input.display());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(input)
        .with_context(|| format!("reading {}", input.display()))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_form_file(p))
        .collect();
    files.sort();
    Ok(files)
}

fn write_overlays(dir: &Path, source: &Path, doc: &Document, result: &ExtractionResult) {
    let stem = source.file_stem().and_then(OsStr::to_str).unwrap_or("form");
    for report in result.pages() {
        let Some(page) = doc.page(report.page) else {
            continue;
        };
        let out = dir.join(format!("{stem}_page{}.png", report.page + 1));
        if let Err(err) = save_overlay(&out, page, report) {
            warn!(file = %out.display(), error = %err, "overlay not written");
        }
    }
}

fn process(extractor: &Extractor, path: &Path, overlay_dir: Option<&Path>) -> ExtractionResult {
    let doc = match Document::open_path(path, &extractor.config().loader) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "cannot open form");
            return ExtractionResult::failed(err.to_string());
        }
    };
    let result = extractor.extract_document(&doc);
    if let Some(dir) = overlay_dir {
        write_overlays(dir, path, &doc, &result);
    }
    info!(file = %path.display(), outcome = ?result.outcome(), "form processed");
    result
}

fn write_json(out: &mut dyn Write, results: &[(PathBuf, ExtractionResult)]) -> Result<()> {
    let records: Vec<FileRecord<'_>> = results
        .iter()
        .map(|(path, result)| FileRecord {
            file: path.display().to_string(),
            record: result.to_record(),
        })
        .collect();
    serde_json::to_writer_pretty(&mut *out, &records)?;
    writeln!(out)?;
    Ok(())
}

fn write_csv(out: Box<dyn Write>, results: &[(PathBuf, ExtractionResult)], trait_names: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header: Vec<&str> = vec![
        "file",
        "outcome",
        "last_name",
        "grade",
        "occasion",
        "period_from",
        "period_to",
        "record_id",
        "organization",
        "subject_id",
        "reporting_name",
        "reporting_rank",
        "reviewing_name",
        "reviewing_rank",
    ];
    header.extend(trait_names.iter().map(String::as_str));
    header.push("unresolved");
    writer.write_record(&header)?;

    for (path, result) in results {
        let admin = result.administrative_info();
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        let outcome = serde_json::to_value(result.outcome())?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let mut row = vec![
            path.display().to_string(),
            outcome,
            field(&admin.last_name),
            field(&admin.grade),
            field(&admin.occasion),
            field(&admin.period_from),
            field(&admin.period_to),
            field(&admin.record_id),
            field(&admin.organization),
            field(&admin.subject_id),
            field(&result.reporting_official().name),
            field(&result.reporting_official().rank),
            field(&result.reviewing_official().name),
            field(&result.reviewing_official().rank),
        ];
        let letters: BTreeMap<&str, char> = result.trait_scores().into_iter().collect();
        row.extend(
            trait_names
                .iter()
                .map(|name| letters.get(name.as_str()).map(char::to_string).unwrap_or_default()),
        );
        row.push(result.unresolved_traits().join(";"));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ExtractConfig::from_path(path).with_context(|| format!("loading {}", path.display()))?,
        None => ExtractConfig::default(),
    };
    if cli.strict {
        config.strict_no_defaults = true;
    }
    if let Some(mode) = cli.fallback {
        config.fallback_mode = mode;
    }
    if let Some(engine) = cli.ocr {
        config.ocr.engine = engine;
    }
    let extractor = Extractor::new(config)?;

    let inputs = collect_inputs(&cli.input)?;
    if inputs.is_empty() {
        warn!(dir = %cli.input.display(), "no forms found");
        return Ok(());
    }
    if let Some(dir) = &cli.overlay_dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let overlay_dir = cli.overlay_dir.as_deref();
    let results: Vec<(PathBuf, ExtractionResult)> = inputs
        .par_iter()
        .map(|path| (path.clone(), process(&extractor, path, overlay_dir)))
        .collect();

    let mut out: Box<dyn Write> = match &cli.out {
        Some(path) => Box::new(
            fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    match cli.format {
        Format::Json => write_json(&mut *out, &results)?,
        Format::Csv => write_csv(out, &results, &extractor.layout().trait_names)?,
    }
    Ok(())
}
