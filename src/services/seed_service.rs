//! Initial data for a fresh database (`initdata` command).
//!
//! Seeds the accrual indicators and their formulas. Running it again
//! updates the rows in place, keyed by name.

use chrono::{DateTime, Utc};

use crate::db::{Database, Record, SqlValue};
use crate::error::AppError;
use crate::models::indicator::IndicatorSeed;

/// Accrual indicators in calculation order.
///
/// Indicators accumulated straight from stored data carry an empty formula.
pub const INDICATOR_SEEDS: [IndicatorSeed; 16] = [
    IndicatorSeed {
        name: "generation_accumulated",
        description: "Year generation accumulated. The data is accumulated from the DB, there is no formula for that.",
        formula: "",
        human_readable_formula: "SUM(generation_mwh)",
    },
    IndicatorSeed {
        name: "contract_accumulated",
        description: "Contract year generation accumulated. The data is accumulated from the contract registered on DB, there is no formula for that.",
        formula: "",
        human_readable_formula: "SUM(contract_generation_mwh)",
    },
    IndicatorSeed {
        name: "delta_accumulated_perc",
        description: "The delta between generation_accumulated and contract_accumulated",
        formula: "lambda generation_accumulated,contract_accumulated: generation_accumulated / contract_accumulated",
        human_readable_formula: "generation_accumulated / contract_accumulated",
    },
    IndicatorSeed {
        name: "delta_accumulated_mwh",
        description: "The difference between generation_mwh and contract_generation",
        formula: "lambda generation_mwh,contract_generation: generation_mwh - contract_generation",
        human_readable_formula: "generation_mwh - contract_generation",
    },
    IndicatorSeed {
        name: "accrual_without_adjustment_and_price_effect",
        description: "The multiplication between delta_accumulated_mwh and contract_price",
        formula: "lambda delta_accumulated_mwh,contract_price: delta_accumulated_mwh * contract_price",
        human_readable_formula: "delta_accumulated_mwh * contract_price",
    },
    IndicatorSeed {
        name: "accrual_quadrennial_mwh",
        description: "The quadrennial accrual in MWh",
        formula: "lambda delta_accumulated_mwh,delta_accumulated_perc,contract_accumulated: delta_accumulated_mwh if delta_accumulated_perc>=0.9 else contract_accumulated-contract_accumulated * 0.9",
        human_readable_formula: "=IF(delta_accumulated_perc>=90%;delta_accumulated_mwh;(contract_accumulated-contract_accumulated*90%))",
    },
    IndicatorSeed {
        name: "accrual_annual_mwh",
        description: "",
        formula: "lambda delta_accumulated_mwh,accrual_quadrennial_mwh: delta_accumulated_mwh - accrual_quadrennial_mwh",
        human_readable_formula: "delta_accumulated_mwh - accrual_quadrennial_mwh",
    },
    IndicatorSeed {
        name: "pld_avg_annual",
        description: "Year average pld. The data is accumulated from the DB, there is no formula for that.",
        formula: "",
        human_readable_formula: "AVG(pld)",
    },
    IndicatorSeed {
        name: "pld_avg_quadrennial",
        description: "Quadrennial average pld. The data is accumulated from the DB, there is no formula for that.",
        formula: "",
        human_readable_formula: "AVG(pld)",
    },
    IndicatorSeed {
        name: "accrual_price_annual",
        description: "Total Accrual Price Annual",
        formula: "lambda pld_avg_annual,contract_price: pld_avg_annual*1.15 if pld_avg_annual*1.15 > contract_price*1.15 else contract_price*1.15",
        human_readable_formula: "MAX(pld_avg_annual:contract_price) * 1.15",
    },
    IndicatorSeed {
        name: "accrual_price_quadrennial",
        description: "Total Accrual Price Quadrennial",
        formula: "lambda contract_price,accrual_quadrennial_mwh,pld_avg_quadrennial: contract_price if accrual_quadrennial_mwh > 0 else (pld_avg_quadrennial if pld_avg_quadrennial>contract_price else contract_price)",
        human_readable_formula: "=IF(accrual_quadrennial_mwh>0;contract_price;MAX(pld_avg_quadrennial:contract_price;1))",
    },
    IndicatorSeed {
        name: "accrual_accumulated_quadrennial",
        description: "Total Accrual Quadrennial",
        formula: "lambda accrual_quadrennial_mwh,accrual_price_quadrennial: accrual_quadrennial_mwh * accrual_price_quadrennial",
        human_readable_formula: "accrual_quadrennial_mwh * accrual_price_quadrennial",
    },
    IndicatorSeed {
        name: "accrual_accumulated_annual",
        description: "Total Accrual Annual",
        formula: "lambda accrual_price_annual,accrual_annual_mwh: accrual_price_annual * accrual_annual_mwh",
        human_readable_formula: "accrual_price_annual * accrual_annual_mwh",
    },
    IndicatorSeed {
        name: "accrual_total",
        description: "Total Accrual",
        formula: "lambda accrual_accumulated_annual,accrual_quadrennial_mwh: accrual_accumulated_annual + accrual_quadrennial_mwh",
        human_readable_formula: "accrual_accumulated_annual + accrual_quadrennial_mwh",
    },
    IndicatorSeed {
        name: "accrual_total_generation_effect",
        description: "",
        formula: "lambda accrual_without_adjustment_and_price_effect: accrual_without_adjustment_and_price_effect",
        human_readable_formula: "accrual_without_adjustment_and_price_effect",
    },
    IndicatorSeed {
        name: "accrual_total_price_effect",
        description: "",
        formula: "lambda accrual_total,accrual_total_generation_effect: accrual_total - accrual_total_generation_effect",
        human_readable_formula: "accrual_total - accrual_total_generation_effect",
    },
];

/// One `formulas` row per seed. The formula shares the indicator's name.
fn formula_records(seeds: &[IndicatorSeed], now: DateTime<Utc>) -> Vec<Record> {
    seeds
        .iter()
        .map(|seed| {
            Record::from([
                ("name".to_string(), SqlValue::from(seed.name)),
                ("string_formula".to_string(), SqlValue::from(seed.formula)),
                ("description".to_string(), SqlValue::from(seed.description)),
                (
                    "human_readable_formula".to_string(),
                    SqlValue::from(seed.human_readable_formula),
                ),
                ("date_update".to_string(), SqlValue::from(now)),
            ])
        })
        .collect()
}

fn indicator_records(seeds: &[IndicatorSeed], now: DateTime<Utc>) -> Vec<Record> {
    seeds
        .iter()
        .map(|seed| {
            Record::from([
                ("name".to_string(), SqlValue::from(seed.name)),
                ("description".to_string(), SqlValue::from(seed.description)),
                ("formula_name".to_string(), SqlValue::from(seed.name)),
                ("date_update".to_string(), SqlValue::from(now)),
            ])
        })
        .collect()
}

/// Insert or refresh every seeded formula and indicator.
///
/// Formulas are written first since indicators reference them by name.
pub async fn seed_indicators(db: &Database) -> Result<usize, AppError> {
    let now = Utc::now();

    tracing::info!("Seeding {} formulas", INDICATOR_SEEDS.len());
    db.upsert("formulas", &formula_records(&INDICATOR_SEEDS, now), &["name"])
        .await?;

    tracing::info!("Seeding {} indicators", INDICATOR_SEEDS.len());
    db.upsert(
        "indicators",
        &indicator_records(&INDICATOR_SEEDS, now),
        &["name"],
    )
    .await?;

    Ok(INDICATOR_SEEDS.len())
}
