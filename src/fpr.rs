//! Per-country FPR construction.

pub mod builder;
pub mod geo;
pub mod output;
pub mod policy;

pub use builder::{
    ClusterSummary, CountryFpr, FprBuilder, FprRow, QaSummary, SweepPoint, choose_min_subs,
};
pub use geo::{GeoRelevanceRow, GeoThresholds, relevant_ids};
pub use output::{clusters_to_table, qa_summary_to_table, rows_to_table, to_json_lines};
pub use policy::{
    FprPolicy, PolicySubject, QaRow, QaStatus, build_subjects, derive_status, effective_topic,
};
