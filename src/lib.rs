// THEORY:
// This file is the main entry point for the `notebook_a11y` library crate.
//
// The crate scans notebook cells for accessibility defects (images without alt text
// and images whose dominant color blends into the cell background) and keeps a live
// per-cell issue index in step with edits.
//
// The public surface is deliberately small:
// - `ScanOrchestrator`: watch cells, react to edits, own the enable gate.
// - `CellScanner` + `ScanConfig`: one-shot analysis of a single cell.
// - `IssueIndex` + `Presenter`: the live issue state and its host-side rendering.
// - `NotebookCell`, `ImageLoader`, `ContrastScorer`: seams for the host and the
//   outside world.
// The image and markup analysis stages live in `core_modules`.

pub mod cell;
pub mod core_modules;
pub mod error;
pub mod issue_index;
pub mod orchestrator;
pub mod scanner;

pub use crate::cell::{CellId, CellKind, CellSnapshot, MemoryCell, NotebookCell, NotebookEvent};
pub use crate::core_modules::color_sampler::{HttpImageLoader, ImageLoader};
pub use crate::core_modules::contrast::{ContrastPolicy, ContrastScorer, RemoteContrastService, WcagContrast};
pub use crate::core_modules::finding::{Finding, FindingDetail, FindingKind};
pub use crate::core_modules::pixel::pixel::Rgb;
pub use crate::error::{ScanError, ScanResult};
pub use crate::issue_index::{IndexChange, IssueEntry, IssueIndex, Presenter};
pub use crate::orchestrator::{ScanOrchestrator, ScanOutcome};
pub use crate::scanner::{CellScanner, ScanConfig, ScoringPolicy};
