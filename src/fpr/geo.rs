//! Geo-relevance rows and per-country selection.

use std::collections::BTreeSet;

use crate::config::RunConfig;
use crate::metadata::records::{flag_values, optional_f64, required_ids};
use crate::store::Table;
use crate::util::error::PipelineError;

const FRAME: &str = "geo_relevance";

#[derive(Debug, Clone, PartialEq)]
pub struct GeoRelevanceRow {
    pub subreddit_id: String,
    pub geo_country_code: String,
    pub users_percent_by_subreddit_l28: Option<f64>,
    pub users_percent_by_country_standardized: Option<f64>,
    pub geo_relevance_default: Option<bool>,
}

impl GeoRelevanceRow {
    /// # Errors
    /// Missing id/country columns or mistyped score columns.
    pub fn from_table(table: &Table) -> Result<Vec<Self>, PipelineError> {
        let ids = required_ids(table, FRAME, "subreddit_id")?;
        let countries = required_ids(table, FRAME, "geo_country_code")?;
        let rows = table.num_rows();
        let column = |name: &str| -> Result<Vec<Option<f64>>, PipelineError> {
            Ok(optional_f64(table, FRAME, name)?.unwrap_or_else(|| vec![None; rows]))
        };
        let l28 = column("users_percent_by_subreddit_l28")?;
        let standardized = column("users_percent_by_country_standardized")?;
        let defaults = flag_values(table, "geo_relevance_default")
            .map_err(|e| PipelineError::from_store(FRAME, e))?
            .unwrap_or_else(|| vec![None; rows]);

        Ok((0..rows)
            .map(|row| GeoRelevanceRow {
                subreddit_id: ids[row].clone(),
                geo_country_code: countries[row].clone(),
                users_percent_by_subreddit_l28: l28[row],
                users_percent_by_country_standardized: standardized[row],
                geo_relevance_default: defaults[row],
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoThresholds {
    pub min_users_percent_l28: f64,
    pub min_country_standardized: f64,
}

impl GeoThresholds {
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            min_users_percent_l28: config.geo_min_users_percent_by_subreddit_l28,
            min_country_standardized: config.geo_min_country_standardized_relevance,
        }
    }

    #[must_use]
    pub fn passes(&self, row: &GeoRelevanceRow) -> bool {
        row.geo_relevance_default == Some(true)
            || row
                .users_percent_by_subreddit_l28
                .is_some_and(|v| v >= self.min_users_percent_l28)
            || row
                .users_percent_by_country_standardized
                .is_some_and(|v| v >= self.min_country_standardized)
    }
}

/// Subreddit ids that are geo-relevant to `country` (case-insensitive code).
#[must_use]
pub fn relevant_ids(
    rows: &[GeoRelevanceRow],
    country: &str,
    thresholds: &GeoThresholds,
) -> BTreeSet<String> {
    rows.iter()
        .filter(|row| row.geo_country_code.eq_ignore_ascii_case(country))
        .filter(|row| thresholds.passes(row))
        .map(|row| row.subreddit_id.clone())
        .collect()
}
