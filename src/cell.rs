//! Cell value model and the per-cell implementation variant.

use crate::formula::{Formula, FormulaError};
use crate::position::Position;
use std::collections::HashSet;

/// The value a cell currently holds or computes to.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// An empty cell. Also the display value of a non-empty `Text`
    /// cell whose only content is the escape sign.
    Empty,
    Text(String),
    Number(f64),
    Error(FormulaError),
}

impl CellValue {
    /// The rendered text `PrintValues` emits for this value: a double
    /// as its shortest round-tripping decimal form, a string as-is, an
    /// error as its fixed token.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format!("{n}"),
            CellValue::Error(e) => e.token().to_string(),
        }
    }
}

/// The per-cell implementation variant, as a tagged union. Exactly
/// one of these is live at a time; `Cell::set` replaces the whole
/// value rather than mutating a shared representation.
#[derive(Debug, Clone, PartialEq)]
enum Implementation {
    Empty,
    /// Raw text as typed, including a leading escape sign if present.
    Text(String),
    /// Raw text as typed, plus the parsed value.
    Number(String, f64),
    Formula(Formula),
}

/// A single spreadsheet cell: its current implementation, memoized
/// value, and dependency edges.
///
/// `depends_on`/`dependents` are *relations* keyed by `Position`, not
/// pointers to other cells — this is what makes it safe for `Sheet` to
/// add, drop, and rewire cells without aliasing concerns.
#[derive(Debug, Clone)]
pub struct Cell {
    implementation: Implementation,
    cache: Option<CellValue>,
    depends_on: HashSet<Position>,
    dependents: HashSet<Position>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            implementation: Implementation::Empty,
            cache: None,
            depends_on: HashSet::new(),
            dependents: HashSet::new(),
        }
    }
}

/// What a successful `Cell::set` needs `Sheet` to do to keep the graph
/// coherent: the previous and new outgoing-reference sets.
pub struct RewirePlan {
    pub previous_depends_on: HashSet<Position>,
    pub new_depends_on: HashSet<Position>,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty_variant(&self) -> bool {
        matches!(self.implementation, Implementation::Empty)
    }

    pub fn depends_on(&self) -> &HashSet<Position> {
        &self.depends_on
    }

    /// Outgoing references as an ordered, deduplicated sequence: empty
    /// for non-formula cells, and excluding invalid (out-of-range)
    /// references, which never become graph edges even though they
    /// stay in the formula's own AST.
    pub fn get_referenced_cells(&self) -> Vec<Position> {
        match &self.implementation {
            Implementation::Formula(f) => f
                .get_referenced_cells()
                .iter()
                .filter(|p| p.is_valid())
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn dependents(&self) -> &HashSet<Position> {
        &self.dependents
    }

    /// Internal to `Sheet`'s edge rewiring — the dependency graph is a
    /// relation `Sheet` maintains, not something an external caller
    /// should poke at directly.
    pub(crate) fn dependents_mut(&mut self) -> &mut HashSet<Position> {
        &mut self.dependents
    }

    pub fn cache(&self) -> Option<&CellValue> {
        self.cache.as_ref()
    }

    /// Internal to `Sheet`'s invalidation cascade; see `dependents_mut`.
    pub(crate) fn clear_cache(&mut self) {
        self.cache = None;
    }

    /// The formula AST, if this cell currently holds one.
    pub fn formula(&self) -> Option<&Formula> {
        match &self.implementation {
            Implementation::Formula(f) => Some(f),
            _ => None,
        }
    }

    /// Raw stored text: `""` for Empty, the original text for Number
    /// and Text (escape sign included), `"="` + canonical expression
    /// for Formula.
    pub fn text(&self) -> String {
        match &self.implementation {
            Implementation::Empty => String::new(),
            Implementation::Text(raw) => raw.clone(),
            Implementation::Number(raw, _) => raw.clone(),
            Implementation::Formula(f) => format!("={}", f.get_expression()),
        }
    }

    /// The non-memoized value for non-formula variants, or `None` for
    /// `Formula` (callers must evaluate that one via `Sheet`, which can
    /// resolve references).
    fn direct_value(&self) -> Option<CellValue> {
        match &self.implementation {
            Implementation::Empty => Some(CellValue::Empty),
            Implementation::Number(_, n) => Some(CellValue::Number(*n)),
            Implementation::Text(raw) => Some(CellValue::Text(strip_escape(raw).to_string())),
            Implementation::Formula(_) => None,
        }
    }

    /// Returns the cached value if present, else computes it via
    /// `evaluate_formula` (used only for the `Formula` variant),
    /// caches it, and returns it.
    pub fn value_or_else<E>(&mut self, evaluate_formula: E) -> CellValue
    where
        E: FnOnce(&Formula) -> CellValue,
    {
        if let Some(cached) = &self.cache {
            return cached.clone();
        }
        let value = match &self.implementation {
            Implementation::Formula(f) => evaluate_formula(f),
            _ => self.direct_value().expect("non-formula variant always has a direct value"),
        };
        self.cache = Some(value.clone());
        value
    }

    /// Whole-value replacement. `new_raw` is the raw text passed to
    /// `Sheet::set_cell`; `new_impl` is the already-staged
    /// implementation to swap in (formula admission is staged by
    /// `Sheet` so cycle checks happen before any mutation here).
    ///
    /// Returns `None` if `new_raw` equals the cell's current raw text:
    /// a no-op, with no cache invalidation and no edge work.
    pub(crate) fn set(&mut self, new_raw: &str, new_impl: NewImplementation) -> Option<RewirePlan> {
        if self.text() == new_raw {
            return None;
        }
        let previous_depends_on = self.depends_on.clone();
        let new_depends_on = new_impl.depends_on.clone();
        self.implementation = new_impl.implementation;
        self.depends_on = new_depends_on.clone();
        self.cache = None;
        Some(RewirePlan {
            previous_depends_on,
            new_depends_on,
        })
    }
}

/// A staged implementation ready to commit, carrying the outgoing
/// reference set `Sheet` needs for edge rewiring (empty for
/// non-formula variants).
pub(crate) struct NewImplementation {
    implementation: Implementation,
    depends_on: HashSet<Position>,
}

impl NewImplementation {
    pub(crate) fn text(raw: String) -> Self {
        NewImplementation {
            implementation: Implementation::Text(raw),
            depends_on: HashSet::new(),
        }
    }

    pub(crate) fn number(raw: String, value: f64) -> Self {
        NewImplementation {
            implementation: Implementation::Number(raw, value),
            depends_on: HashSet::new(),
        }
    }

    pub(crate) fn formula(formula: Formula) -> Self {
        // Only valid references are part of the dependency graph; an
        // out-of-range reference stays in the AST (it evaluates to
        // `FormulaError::Ref`) but never becomes a graph edge.
        let depends_on = formula
            .get_referenced_cells()
            .iter()
            .filter(|p| p.is_valid())
            .copied()
            .collect();
        NewImplementation {
            implementation: Implementation::Formula(formula),
            depends_on,
        }
    }
}

impl Default for NewImplementation {
    fn default() -> Self {
        NewImplementation {
            implementation: Implementation::Empty,
            depends_on: HashSet::new(),
        }
    }
}

/// Classifies raw input text the way `Cell::set` (via `Sheet::set_cell`)
/// needs to, without committing anything: empty / number / text /
/// formula-source. `Sheet` parses the formula source itself so it can
/// run the cycle check before staging a `NewImplementation::formula`.
pub enum ParsedInput<'a> {
    Empty,
    Number(f64),
    Text,
    FormulaSource(&'a str),
}

pub fn classify(raw: &str) -> ParsedInput<'_> {
    if raw.is_empty() {
        return ParsedInput::Empty;
    }
    if raw.starts_with('=') && raw.len() > 1 {
        return ParsedInput::FormulaSource(&raw[1..]);
    }
    if let Ok(n) = raw.parse::<f64>() {
        if n.is_finite() {
            return ParsedInput::Number(n);
        }
    }
    ParsedInput::Text
}

/// Strips a single leading escape sign (`'`), which marks a text cell
/// that would otherwise look like a formula or a number.
fn strip_escape(raw: &str) -> &str {
    raw.strip_prefix('\'').unwrap_or(raw)
}
