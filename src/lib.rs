//! Structured data extraction from scanned or vector-rendered fitness report forms.
//!
//! The engine reads a multi-page evaluation form with no usable form fields and
//! recovers the administrative block of the first page plus the selected option
//! (A–H) for every trait row of the checkbox pages:
//!
//! 1. [`document`] opens the container and exposes raster, line segments and
//!    positioned text per page.
//! 2. [`locator`] finds the administrative scalars.
//! 3. [`grid`] reconstructs the checkbox grid with several independent strategies.
//! 4. [`scorer`] scores every cell and applies the confidence margin.
//! 5. [`detector`] and [`orchestrator`] run the strategies in priority order and
//!    reconcile weak rows.
//! 6. [`assemble`] packages everything into an [`ExtractionResult`].
//!
//! [`Extractor`] ties the stages together.

pub mod assemble;
pub mod config;
pub mod detector;
pub mod document;
pub mod extract;
pub mod fixture;
pub mod grid;
pub mod layout;
pub mod locator;
pub mod ocr;
pub mod orchestrator;
pub mod overlay;
pub mod scorer;
pub mod text;
pub mod vocab;

pub use assemble::{ExtractionRecord, ExtractionResult, Outcome, TraitSelection};
pub use config::{ConfigError, ExtractConfig, FallbackMode};
pub use document::{Document, DocumentOpenError};
pub use extract::{ExtractError, Extractor};
pub use grid::{ConfidenceTier, GridGeometry};
pub use layout::FormLayout;
pub use scorer::Selection;
pub use vocab::Vocabulary;
