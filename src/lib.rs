//! An in-memory spreadsheet engine: a sparse cell grid, a dependency
//! graph between cells, and a small arithmetic formula language with
//! A1-style references.
//!
//! The public surface is [`Sheet`]: it owns the grid, admits cell
//! mutations (parsing and cycle-checking formulas before committing
//! them), and renders both computed values and raw text.

mod cell;
mod formula;
mod position;
mod sheet;

pub use cell::{Cell, CellValue};
pub use formula::{Formula, FormulaError, ParseError};
pub use position::{Position, Size, MAX_COLS, MAX_ROWS};
pub use sheet::{Sheet, SheetError};
