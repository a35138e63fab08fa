//! The sparse cell grid: storage, formula admission (with cycle
//! rejection), cache invalidation, and text rendering.

use crate::cell::{classify, Cell, CellValue, NewImplementation, ParsedInput};
use crate::formula::{Formula, ParseError};
use crate::position::{Position, Size};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, trace};

/// Structural failures raised by `Sheet` mutation entry points. Unlike
/// `FormulaError`, these are genuine Rust errors: on any of them, the
/// sheet is left exactly as it was before the call (the strong
/// exception guarantee).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SheetError {
    #[error("position out of bounds")]
    InvalidPosition,
    #[error("formula error: {0}")]
    Formula(#[from] ParseError),
    #[error("formula would create a circular dependency")]
    CircularDependency,
}

/// Sparse 2D cell store keyed by `Position`. Cells are materialized
/// lazily on first write or first incoming reference, and dropped once
/// both `Empty` and free of `dependents`.
#[derive(Debug, Default)]
pub struct Sheet {
    cells: IndexMap<Position, Cell>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle to a materialized, non-empty cell.
    pub fn get_cell(&self, pos: Position) -> Result<Option<&Cell>, SheetError> {
        self.check_bounds(pos)?;
        Ok(self.cells.get(&pos).filter(|c| !c.is_empty_variant()))
    }

    /// Mutable handle to a materialized, non-empty cell. Structural
    /// mutations (text, dependency edges) still go through `set_cell`;
    /// this is for callers that need to poke at a cell's own mutable
    /// surface directly (e.g. forcing a cache recompute).
    pub fn get_cell_mut(&mut self, pos: Position) -> Result<Option<&mut Cell>, SheetError> {
        self.check_bounds(pos)?;
        Ok(self.cells.get_mut(&pos).filter(|c| !c.is_empty_variant()))
    }

    /// The cell's current value (memoized). Cells that were never
    /// written, or are materialized as `Empty`, read as `CellValue::Empty`.
    pub fn get_value(&mut self, pos: Position) -> Result<CellValue, SheetError> {
        self.check_bounds(pos)?;
        Ok(self.value_at(pos))
    }

    /// The cell's raw stored text, `""` if never written.
    pub fn get_text(&self, pos: Position) -> Result<String, SheetError> {
        self.check_bounds(pos)?;
        Ok(self.cells.get(&pos).map(|c| c.text()).unwrap_or_default())
    }

    /// Set a cell's content from raw text: `=...` is a formula, a
    /// string that parses fully as a finite decimal is a number, empty
    /// text clears the cell, anything else is plain text (with `'` as
    /// an escape sign). Leaves the sheet unchanged on any error.
    pub fn set_cell(&mut self, pos: Position, text: &str) -> Result<(), SheetError> {
        self.check_bounds(pos)?;

        let current_text = self.cells.get(&pos).map(|c| c.text()).unwrap_or_default();
        if current_text == text {
            return Ok(());
        }

        let new_impl = match classify(text) {
            ParsedInput::Empty => NewImplementation::default(),
            ParsedInput::Number(n) => NewImplementation::number(text.to_string(), n),
            ParsedInput::Text => NewImplementation::text(text.to_string()),
            ParsedInput::FormulaSource(body) => {
                let formula = Formula::parse(body)?;
                self.check_for_cycle(pos, &formula)?;
                NewImplementation::formula(formula)
            }
        };

        debug!(?pos, "committing cell mutation");
        self.commit(pos, text, new_impl);
        Ok(())
    }

    pub fn clear_cell(&mut self, pos: Position) -> Result<(), SheetError> {
        self.set_cell(pos, "")
    }

    /// Smallest rectangle covering all cells whose variant is not
    /// `Empty`. `(0, 0)` if the sheet has no such cell.
    pub fn get_printable_size(&self) -> Size {
        let mut max_row = None;
        let mut max_col = None;
        for (pos, cell) in &self.cells {
            if cell.is_empty_variant() {
                continue;
            }
            max_row = Some(max_row.map_or(pos.row(), |m: u32| m.max(pos.row())));
            max_col = Some(max_col.map_or(pos.col(), |m: u32| m.max(pos.col())));
        }
        match (max_row, max_col) {
            (Some(r), Some(c)) => Size::new(r + 1, c + 1),
            _ => Size::new(0, 0),
        }
    }

    /// Renders computed values: tab-separated fields, newline-terminated
    /// rows, over the printable rectangle.
    pub fn print_values(&mut self, out: &mut impl std::fmt::Write) -> std::fmt::Result {
        let size = self.get_printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col > 0 {
                    write!(out, "\t")?;
                }
                let value = self.value_at(Position::new(row, col));
                write!(out, "{}", value.display())?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Renders raw texts: same layout as `print_values`, but emitting
    /// `Cell::text()` for each field.
    pub fn print_texts(&self, out: &mut impl std::fmt::Write) -> std::fmt::Result {
        let size = self.get_printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col > 0 {
                    write!(out, "\t")?;
                }
                let pos = Position::new(row, col);
                let text = self.cells.get(&pos).map(|c| c.text()).unwrap_or_default();
                write!(out, "{text}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Convenience wrapper returning an owned `String`.
    pub fn values_to_string(&mut self) -> String {
        let mut s = String::new();
        self.print_values(&mut s).expect("String writer is infallible");
        s
    }

    /// Convenience wrapper returning an owned `String`.
    pub fn texts_to_string(&self) -> String {
        let mut s = String::new();
        self.print_texts(&mut s).expect("String writer is infallible");
        s
    }

    fn check_bounds(&self, pos: Position) -> Result<(), SheetError> {
        if pos.is_valid() {
            Ok(())
        } else {
            Err(SheetError::InvalidPosition)
        }
    }

    /// `cache`-aware read, materializing no cells: absent or `Empty`
    /// cells read as `CellValue::Empty`. Recomputes and memoizes a
    /// formula cell's value on a cache miss, recursing through `self`
    /// for every position the formula references.
    fn value_at(&mut self, pos: Position) -> CellValue {
        let Some(mut cell) = self.cells.swap_remove(&pos) else {
            return CellValue::Empty;
        };
        let value = cell.value_or_else(|formula| {
            let result = formula.evaluate(|referenced| {
                if referenced == pos {
                    // Self-reference inside a formula that otherwise
                    // admitted cleanly (e.g. it only appears inside a
                    // branch cycle-detection doesn't reach) would
                    // recurse forever; defensively treat it as the
                    // in-band reference error rather than looping.
                    return CellValue::Error(crate::formula::FormulaError::Ref);
                }
                self.value_at(referenced)
            });
            match result {
                Ok(n) => CellValue::Number(n),
                Err(e) => CellValue::Error(e),
            }
        });
        self.cells.insert(pos, cell);
        value
    }

    /// Depth-first search from each of `formula`'s valid references,
    /// failing if `pos` itself is reachable.
    fn check_for_cycle(&self, pos: Position, formula: &Formula) -> Result<(), SheetError> {
        let new_refs: Vec<Position> = formula
            .get_referenced_cells()
            .iter()
            .filter(|p| p.is_valid())
            .copied()
            .collect();

        if new_refs.contains(&pos) {
            trace!(?pos, "formula directly references its own cell");
            return Err(SheetError::CircularDependency);
        }

        let mut visited: HashSet<Position> = HashSet::new();
        let mut stack = new_refs;
        while let Some(current) = stack.pop() {
            if current == pos {
                trace!(?pos, "formula admission would close a cycle");
                return Err(SheetError::CircularDependency);
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(cell) = self.cells.get(&current) {
                for &next in cell.depends_on() {
                    stack.push(next);
                }
            }
        }
        Ok(())
    }

    /// Commits a staged implementation: swaps it in, rewires edges,
    /// and cascades cache invalidation over the reverse-dependency
    /// closure. Assumes the cycle check (if any) has already passed.
    fn commit(&mut self, pos: Position, new_raw: &str, new_impl: NewImplementation) {
        let cell = self.cells.entry(pos).or_insert_with(Cell::new);
        let Some(plan) = cell.set(new_raw, new_impl) else {
            return;
        };

        for dep in &plan.previous_depends_on {
            if !plan.new_depends_on.contains(dep) {
                if let Some(dep_cell) = self.cells.get_mut(dep) {
                    dep_cell.dependents_mut().remove(&pos);
                    self.drop_if_vacant(*dep);
                }
            }
        }
        for &dep in &plan.new_depends_on {
            let dep_cell = self.cells.entry(dep).or_insert_with(Cell::new);
            dep_cell.dependents_mut().insert(pos);
        }

        self.invalidate_cascade(pos);
        self.drop_if_vacant(pos);
    }

    /// Work-list cache invalidation, bounded by the graph's acyclicity: clears
    /// `start`'s cache and recurses over its `dependents`, stopping a
    /// branch as soon as a cache is already absent.
    fn invalidate_cascade(&mut self, start: Position) {
        trace!(?start, "invalidation cascade starting");
        let mut stack = vec![start];
        let mut visited: HashSet<Position> = HashSet::new();
        while let Some(pos) = stack.pop() {
            if !visited.insert(pos) {
                continue;
            }
            let Some(cell) = self.cells.get_mut(&pos) else {
                continue;
            };
            if pos != start && cell.cache().is_none() {
                continue;
            }
            trace!(?pos, "clearing cached value");
            cell.clear_cache();
            stack.extend(cell.dependents().iter().copied());
        }
    }

    /// Drops a cell that is both `Empty` and has no incoming edges —
    /// it was only materialized to host a reference, and nothing
    /// references it anymore.
    fn drop_if_vacant(&mut self, pos: Position) {
        if let Some(cell) = self.cells.get(&pos) {
            if cell.is_empty_variant() && cell.dependents().is_empty() {
                self.cells.shift_remove(&pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(a1: &str) -> Position {
        Position::parse(a1).unwrap()
    }

    #[test]
    fn scenario_simple_arithmetic_formula() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=1+2*3").unwrap();
        assert_eq!(sheet.get_value(pos("A1")).unwrap(), CellValue::Number(7.0));
        assert_eq!(sheet.get_text(pos("A1")).unwrap(), "=1+2*3");
        assert_eq!(sheet.get_printable_size(), Size::new(1, 1));
    }

    #[test]
    fn scenario_circular_dependency_leaves_sheet_unchanged() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=B1").unwrap();
        sheet.set_cell(pos("B1"), "=C1").unwrap();

        let before_text = sheet.texts_to_string();
        let err = sheet.set_cell(pos("C1"), "=A1").unwrap_err();
        assert_eq!(err, SheetError::CircularDependency);
        assert_eq!(sheet.texts_to_string(), before_text);
    }

    #[test]
    fn scenario_error_propagation_through_dependents() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "7").unwrap();
        sheet.set_cell(pos("B1"), "=A1+3").unwrap();
        assert_eq!(sheet.get_value(pos("B1")).unwrap(), CellValue::Number(10.0));

        sheet.set_cell(pos("A1"), "hello").unwrap();
        assert!(matches!(
            sheet.get_value(pos("B1")).unwrap(),
            CellValue::Error(crate::formula::FormulaError::Value)
        ));

        sheet.set_cell(pos("A1"), "=1/0").unwrap();
        assert!(matches!(
            sheet.get_value(pos("A1")).unwrap(),
            CellValue::Error(crate::formula::FormulaError::Arithmetic)
        ));
        assert!(matches!(
            sheet.get_value(pos("B1")).unwrap(),
            CellValue::Error(crate::formula::FormulaError::Arithmetic)
        ));
    }

    #[test]
    fn scenario_clearing_drops_materialized_empty_dependency() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=B2").unwrap();
        sheet.clear_cell(pos("A1")).unwrap();
        assert_eq!(sheet.get_printable_size(), Size::new(0, 0));
    }

    #[test]
    fn scenario_escaped_text_has_no_dependency_edges() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "'=1+2").unwrap();
        assert_eq!(
            sheet.get_value(pos("A1")).unwrap(),
            CellValue::Text("=1+2".to_string())
        );
        assert_eq!(sheet.get_text(pos("A1")).unwrap(), "'=1+2");
        assert!(sheet.get_cell(pos("A1")).unwrap().unwrap().depends_on().is_empty());
    }

    #[test]
    fn lone_escape_sign_is_zero_when_referenced_by_a_formula() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "'").unwrap();
        assert_eq!(sheet.get_value(pos("A1")).unwrap(), CellValue::Text(String::new()));

        sheet.set_cell(pos("B1"), "=A1+1").unwrap();
        assert_eq!(sheet.get_value(pos("B1")).unwrap(), CellValue::Number(1.0));
    }

    #[test]
    fn scenario_canonical_expression_normalization() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=(1+2)*3").unwrap();
        assert_eq!(sheet.get_text(pos("A1")).unwrap(), "=(1+2)*3");

        sheet.set_cell(pos("A1"), "=1+2+3").unwrap();
        assert_eq!(sheet.get_text(pos("A1")).unwrap(), "=1+2+3");

        sheet.set_cell(pos("A1"), "=1+(2+3)").unwrap();
        assert_eq!(sheet.get_text(pos("A1")).unwrap(), "=1+2+3");
    }

    #[test]
    fn get_cell_mut_returns_a_handle_to_a_materialized_cell() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=1+2").unwrap();
        assert_eq!(sheet.get_value(pos("A1")).unwrap(), CellValue::Number(3.0));

        let cell = sheet.get_cell_mut(pos("A1")).unwrap().expect("A1 is materialized");
        assert!(cell.cache().is_some());
        assert_eq!(cell.get_referenced_cells(), Vec::new());
    }

    #[test]
    fn get_cell_mut_is_none_for_empty_and_unmaterialized_cells() {
        let mut sheet = Sheet::new();
        assert!(sheet.get_cell_mut(pos("A1")).unwrap().is_none());
    }

    #[test]
    fn invalid_position_is_rejected() {
        let mut sheet = Sheet::new();
        let invalid = Position::new(100_000, 0);
        assert_eq!(sheet.set_cell(invalid, "1").unwrap_err(), SheetError::InvalidPosition);
    }

    #[test]
    fn setting_same_text_is_a_no_op_and_keeps_cache() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "7").unwrap();
        sheet.set_cell(pos("B1"), "=A1+1").unwrap();
        assert_eq!(sheet.get_value(pos("B1")).unwrap(), CellValue::Number(8.0));

        // Re-setting B1 to the exact same formula text must not touch
        // anything (and in particular must not re-run the cycle check
        // or clear the now-warm cache).
        sheet.set_cell(pos("B1"), "=A1+1").unwrap();
        assert_eq!(sheet.get_value(pos("B1")).unwrap(), CellValue::Number(8.0));
    }

    #[test]
    fn clearing_cell_with_dependents_keeps_it_as_empty() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("B1"), "=A1+1").unwrap();
        sheet.set_cell(pos("A1"), "5").unwrap();
        assert_eq!(sheet.get_value(pos("B1")).unwrap(), CellValue::Number(6.0));

        sheet.clear_cell(pos("A1")).unwrap();
        assert_eq!(sheet.get_value(pos("A1")).unwrap(), CellValue::Empty);
        assert_eq!(sheet.get_value(pos("B1")).unwrap(), CellValue::Number(1.0));
    }

    #[test]
    fn print_values_uses_fixed_error_tokens() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=1/0").unwrap();
        sheet.set_cell(pos("B1"), "=A99999").unwrap();
        let out = sheet.values_to_string();
        assert!(out.contains("#ARITHM!"));
        assert!(out.contains("#REF!"));
    }

    #[test]
    fn printable_size_ignores_empty_rows_between_data() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "1").unwrap();
        sheet.set_cell(pos("A3"), "2").unwrap();
        let out = sheet.values_to_string();
        assert_eq!(out, "1\n\n2\n");
    }
}
