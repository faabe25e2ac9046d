use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use fitrep_reader::FormLayout;
use fitrep_reader::fixture::{AdminSpec, GridSpec, NotObservedMark, form_document, write_form_pdf};

#[derive(Parser, Debug)]
#[command(
    name = "render_fixture",
    about = "Write a synthetic evaluation form as PDF and per-page PNG",
    version
)]
struct Cli {
    /// Output directory
    #[arg(short = 'o', long = "out-dir", default_value = "fixture")]
    out_dir: PathBuf,

    /// Marked columns per trait page, pages separated by '/', rows by ',';
    /// 0 leaves a row blank. Example: 1,4,8,3,6/2,2,2,2,2/5,5,5,5
    #[arg(short = 'm', long = "marks", default_value = "4,4,4,4,4/4,4,4,4,4/4,4,4,4")]
    marks: String,

    /// Mark the form-level "Not Observed" box
    #[arg(long = "not-observed")]
    not_observed: bool,

    /// Print the A-H letters above each table
    #[arg(long = "header-labels")]
    header_labels: bool,

    /// Gray level of the marks (0 is black)
    #[arg(long = "ink", default_value_t = 0)]
    ink: u8,

    /// Skip the PDF and only write PNG pages
    #[arg(long = "png-only")]
    png_only: bool,
}

fn parse_marks(spec: &str) -> Result<Vec<Vec<Option<u8>>>> {
    spec.split('/')
        .map(|page| {
            page.split(',')
                .map(|cell| {
                    let column: u8 = cell.trim().parse().with_context(|| format!("bad column {cell:?}"))?;
                    match column {
                        0 => Ok(None),
                        1..=8 => Ok(Some(column)),
                        _ => bail!("column {column} outside 1..=8"),
                    }
                })
                .collect()
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let marks = parse_marks(&cli.marks)?;
    let layout = FormLayout::default();
    let admin = AdminSpec {
        not_observed: if cli.not_observed {
            NotObservedMark::Drawn
        } else {
            NotObservedMark::Blank
        },
        ..AdminSpec::default()
    };
    let base = GridSpec {
        header_labels: cli.header_labels,
        ink: cli.ink,
        ..GridSpec::default()
    };

    fs::create_dir_all(&cli.out_dir).with_context(|| format!("creating {}", cli.out_dir.display()))?;

    let doc = form_document(&admin, &marks, &base, &layout);
    for (i, page) in doc.pages().iter().enumerate() {
        let out = cli.out_dir.join(format!("form_page{}.png", i + 1));
        page.raster
            .save(&out)
            .with_context(|| format!("writing {}", out.display()))?;
        info!(file = %out.display(), "page written");
    }

    if !cli.png_only {
        let out = cli.out_dir.join("form.pdf");
        write_form_pdf(&out, &admin, &marks, &base, &layout)
            .map_err(|e| anyhow::anyhow!("writing {}: {e}", out.display()))?;
        info!(file = %out.display(), "pdf written");
    }
    Ok(())
}
