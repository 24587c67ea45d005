// In: src/pipelines/engineering.rs

//! Ingestion-facing preparation: run parameters resolved at refresh time and
//! the column-level cleanup applied to each source table right after it
//! lands in the chunk store.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use chrono::{Duration, NaiveDate, Utc};
use log::info;

use crate::config::PreprocessingConfig;
use crate::error::CarouselError;
use crate::table::LogicalTable;
use crate::transforms;
use crate::types::Cell;

/// Name of the constant reference-date column attached during preprocessing.
pub const REFRESH_COLUMN: &str = "refresh_date";

/// Channel-flag derivations: output column and the channel token that sets it.
const CHANNEL_FLAGS: &[(&str, &str)] = &[
    ("in_store_event", "instore"),
    ("online_event", "online"),
    ("delivery_event", "delivery"),
];

//==================================================================================
// 1. Run Parameters
//==================================================================================

/// Dates resolved once per pipeline run. The refresh date is shifted five
/// hours forward so runs started late in the UTC day already count as the
/// next business date; the unknown date is the fallback for missing
/// timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicParams {
    pub refresh_date: NaiveDate,
    pub unknown_date: NaiveDate,
}

impl DynamicParams {
    pub fn init() -> Self {
        let now = Utc::now();
        DynamicParams {
            refresh_date: (now + Duration::hours(5)).date_naive(),
            unknown_date: now.date_naive(),
        }
    }

    pub fn refresh_str(&self) -> String {
        self.refresh_date.format("%Y-%m-%d").to_string()
    }
}

//==================================================================================
// 2. Table Preparation
//==================================================================================

/// The common cleanup sequence: attach the refresh-date constant, fill
/// configured gaps, force integer columns, normalize date-shaped strings and
/// replace them with their day distance from the refresh date.
fn preprocess_table(
    data: &LogicalTable,
    config: &PreprocessingConfig,
    params: &DynamicParams,
) -> Result<LogicalTable, CarouselError> {
    let mut df = transforms::add_constant(data, REFRESH_COLUMN, Cell::Date(params.refresh_date))?;
    for rule in &config.fillna {
        df = transforms::fillna(&df, &rule.columns, &rule.value)?;
    }
    df = transforms::force_int(&df, &config.force_int)?;
    df = transforms::normalize_date(&df, &config.datetime, params.unknown_date, None)?;
    df = transforms::date_difference(&df, &config.days_difference, REFRESH_COLUMN, true)?;
    Ok(df)
}

pub fn preprocess_events(
    data: &LogicalTable,
    config: &PreprocessingConfig,
    params: &DynamicParams,
) -> Result<LogicalTable, CarouselError> {
    info!(
        "Preprocessing events table ({} columns) for refresh {}",
        data.column_names().len(),
        params.refresh_str()
    );
    preprocess_table(data, config, params)
}

pub fn preprocess_transactions(
    data: &LogicalTable,
    config: &PreprocessingConfig,
    params: &DynamicParams,
) -> Result<LogicalTable, CarouselError> {
    info!(
        "Preprocessing transactions table ({} columns) for refresh {}",
        data.column_names().len(),
        params.refresh_str()
    );
    preprocess_table(data, config, params)
}

/// Normalizes the comma-separated channel set (lowercased, trimmed) and
/// derives the per-channel event flags from it.
pub fn preprocess_channels(
    data: &LogicalTable,
    source: &str,
) -> Result<LogicalTable, CarouselError> {
    let values = crate::table::to_rendered_opts(&data.evaluate(source)?)?;
    let normalized: Vec<Option<String>> = values
        .into_iter()
        .map(|v| {
            v.map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<String>>()
                    .join(",")
            })
        })
        .collect();
    let array: ArrayRef = Arc::new(StringArray::from(normalized));
    let mut df = data.with_materialized(source, array)?;
    for (flag, token) in CHANNEL_FLAGS {
        df = df.set_virtual(
            flag,
            crate::table::Expr::TokenIndicator {
                input: Box::new(crate::table::Expr::col(source)),
                token: (*token).to_string(),
            },
        );
    }
    let df = df.materialize(
        &CHANNEL_FLAGS
            .iter()
            .map(|(flag, _)| (*flag).to_string())
            .collect::<Vec<String>>(),
    )?;
    // The flags are materialized, so the working column drops out entirely.
    Ok(df.drop_columns(&[source.to_string()]))
}

/// Restores the canonical 8-4-4-4-12 hyphenation on anonymous ids that
/// arrive as bare 32-character hex strings. Values of any other shape pass
/// through untouched.
pub fn normalize_anonymous_uid(
    data: &LogicalTable,
    source: &str,
) -> Result<LogicalTable, CarouselError> {
    let values = crate::table::to_rendered_opts(&data.evaluate(source)?)?;
    let rehyphenated: Vec<Option<String>> = values
        .into_iter()
        .map(|v| v.map(|s| rehyphenate(&s)))
        .collect();
    let array: ArrayRef = Arc::new(StringArray::from(rehyphenated));
    data.with_materialized(source, array)
}

fn rehyphenate(s: &str) -> String {
    if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        format!(
            "{}-{}-{}-{}-{}",
            &s[0..8],
            &s[8..12],
            &s[12..16],
            &s[16..20],
            &s[20..32]
        )
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rehyphenate_bare_uuid() {
        assert_eq!(
            rehyphenate("0123456789abcdef0123456789abcdef"),
            "01234567-89ab-cdef-0123-456789abcdef"
        );
    }

    #[test]
    fn test_rehyphenate_leaves_other_shapes() {
        assert_eq!(rehyphenate("user-42"), "user-42");
        assert_eq!(
            rehyphenate("01234567-89ab-cdef-0123-456789abcdef"),
            "01234567-89ab-cdef-0123-456789abcdef"
        );
    }

    #[test]
    fn test_dynamic_params_refresh_format() {
        let params = DynamicParams::init();
        let s = params.refresh_str();
        assert_eq!(s.len(), 10);
        assert_eq!(&s[4..5], "-");
    }
}
