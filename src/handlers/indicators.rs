//! Indicator catalogue endpoint.

use axum::{Json, extract::State};

use crate::{error::AppError, models::indicator::IndicatorWithFormula, state::AppState};

const LIST_INDICATORS: &str = r#"
    SELECT i.name, i.description, f.string_formula, f.human_readable_formula
    FROM indicators i
    JOIN formulas f ON f.name = i.formula_name
    ORDER BY i.name
"#;

/// List the seeded indicators together with their formulas.
///
/// # Endpoint
///
/// `GET /api/v1/indicators`
///
/// # Response (200 OK)
///
/// ```json
/// [
///   {
///     "name": "accrual_total",
///     "description": "Total Accrual",
///     "string_formula": "lambda accrual_accumulated_annual,accrual_quadrennial_mwh: ...",
///     "human_readable_formula": "accrual_accumulated_annual + accrual_quadrennial_mwh"
///   }
/// ]
/// ```
pub async fn list_indicators(
    State(state): State<AppState>,
) -> Result<Json<Vec<IndicatorWithFormula>>, AppError> {
    let indicators = state.db.list::<IndicatorWithFormula>(LIST_INDICATORS, &[]).await?;

    Ok(Json(indicators))
}
