//! Accrual indicators and the formulas describing them.
//!
//! Formula strings are descriptive metadata for the reporting front-end.
//! Nothing in this service parses or evaluates them.

use serde::Serialize;

/// An indicator joined with its formula.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct IndicatorWithFormula {
    pub name: String,
    pub description: String,
    pub string_formula: String,
    pub human_readable_formula: String,
}

/// Seed definition for one indicator and its formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub formula: &'static str,
    pub human_readable_formula: &'static str,
}
