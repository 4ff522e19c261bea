//! Per-country seed → counterpart construction.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use super::policy::{FprPolicy, PolicySubject, QaStatus};
use crate::clustering::ClusterLabels;
use crate::resize::{DynamicClusters, ResizeOptions, ResizeStrategy, resize};

/// Orphan count for one `min_subs_in_cluster` candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPoint {
    pub min_subs: usize,
    pub orphan_clusters: usize,
}

/// One seed row of `df_fpr`.
#[derive(Debug, Clone, PartialEq)]
pub struct FprRow {
    pub country: String,
    pub subreddit_id: String,
    pub subreddit_name: String,
    pub qa_status: QaStatus,
    pub cluster_label: String,
    pub cluster_label_k: String,
    pub cluster_majority_primary_topic: Option<String>,
    pub cluster_topic_mix: Option<String>,
    pub orphan: bool,
    pub counterpart_ids: Vec<String>,
    pub counterpart_names: Vec<String>,
}

/// One row of `df_fpr_cluster_summary`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub country: String,
    pub cluster_label: String,
    pub cluster_label_k: String,
    pub cluster_majority_primary_topic: Option<String>,
    pub cluster_topic_mix: Option<String>,
    pub subreddit_count: usize,
    pub seed_count: usize,
    pub recommend_count: usize,
    pub orphan: bool,
    pub private_count: usize,
    pub allow_discovery_f_count: usize,
    pub missing_topic_count: usize,
    pub seed_ids: Vec<String>,
    pub recommend_ids: Vec<String>,
}

/// One row of `df_fpr_qa_summary`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QaSummary {
    pub country: String,
    pub min_subs_in_cluster: Option<usize>,
    pub geo_relevant_count: usize,
    pub seed_count: usize,
    pub recommend_count: usize,
    pub cluster_count: usize,
    pub orphan_cluster_count: usize,
    pub seeds_published: usize,
    pub seeds_in_orphan_clusters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountryFpr {
    pub country: String,
    /// Seed id → counterpart ids; seeds without counterparts are left out.
    pub mapping: BTreeMap<String, Vec<String>>,
    pub rows: Vec<FprRow>,
    pub clusters: Vec<ClusterSummary>,
    pub summary: QaSummary,
    pub sweep: Vec<SweepPoint>,
}

impl CountryFpr {
    fn empty(country: &str, geo_relevant_count: usize) -> Self {
        Self {
            country: country.to_string(),
            mapping: BTreeMap::new(),
            rows: Vec::new(),
            clusters: Vec::new(),
            summary: QaSummary {
                country: country.to_string(),
                geo_relevant_count,
                ..QaSummary::default()
            },
            sweep: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

/// Smallest orphan count; ties go to the larger `min_subs`.
#[must_use]
pub fn choose_min_subs(sweep: &[SweepPoint]) -> Option<SweepPoint> {
    let mut best: Option<SweepPoint> = None;
    for point in sweep {
        let better = best.is_none_or(|b| {
            point.orphan_clusters < b.orphan_clusters
                || (point.orphan_clusters == b.orphan_clusters && point.min_subs > b.min_subs)
        });
        if better {
            best = Some(*point);
        }
    }
    best
}

/// Shared inputs for building every country.
pub struct FprBuilder<'a> {
    labels: &'a ClusterLabels,
    subjects: HashMap<&'a str, &'a PolicySubject>,
    policy: &'a FprPolicy,
    strategy: ResizeStrategy,
    min_subs_sweep: Vec<usize>,
    resize_options: ResizeOptions,
}

impl<'a> FprBuilder<'a> {
    #[must_use]
    pub fn new(
        labels: &'a ClusterLabels,
        subjects: &'a [PolicySubject],
        policy: &'a FprPolicy,
        strategy: ResizeStrategy,
        min_subs_sweep: &[usize],
        resize_options: ResizeOptions,
    ) -> Self {
        let mut sweep = min_subs_sweep.to_vec();
        sweep.sort_unstable();
        sweep.dedup();
        Self {
            labels,
            subjects: subjects.iter().map(|s| (s.subreddit_id.as_str(), s)).collect(),
            policy,
            strategy,
            min_subs_sweep: sweep,
            resize_options,
        }
    }

    /// Builds the FPR for `country` over its geo-relevant subreddit ids.
    #[must_use]
    pub fn build(&self, country: &str, geo_ids: &BTreeSet<String>) -> CountryFpr {
        let rows: Vec<usize> = self
            .labels
            .ids
            .iter()
            .enumerate()
            .filter(|(_, id)| geo_ids.contains(id.as_str()))
            .filter(|(_, id)| {
                self.subjects
                    .get(id.as_str())
                    .is_some_and(|s| self.policy.is_seed(s))
            })
            .map(|(row, _)| row)
            .collect();
        if rows.is_empty() {
            warn!(
                country,
                geo_relevant = geo_ids.len(),
                "no seeds for country; emitting empty FPR"
            );
            return CountryFpr::empty(country, geo_ids.len());
        }
        let country_labels = self.labels.take(&rows);

        let mut sweep = Vec::with_capacity(self.min_subs_sweep.len());
        let mut resized: BTreeMap<usize, DynamicClusters> = BTreeMap::new();
        for &min_subs in &self.min_subs_sweep {
            let dynamic = resize(&country_labels, self.strategy, min_subs, &self.resize_options);
            let orphan_clusters = dynamic.orphan_count();
            debug!(country, min_subs, orphan_clusters, "min_subs sweep");
            sweep.push(SweepPoint {
                min_subs,
                orphan_clusters,
            });
            resized.insert(min_subs, dynamic);
        }
        let Some(chosen) = choose_min_subs(&sweep) else {
            return CountryFpr::empty(country, geo_ids.len());
        };
        let Some(dynamic) = resized.remove(&chosen.min_subs) else {
            return CountryFpr::empty(country, geo_ids.len());
        };

        let mut fpr = self.emit(country, &dynamic);
        fpr.summary.min_subs_in_cluster = Some(chosen.min_subs);
        fpr.summary.geo_relevant_count = geo_ids.len();
        fpr.sweep = sweep;
        info!(
            country,
            min_subs = chosen.min_subs,
            seeds = fpr.summary.seed_count,
            published = fpr.summary.seeds_published,
            orphan_clusters = fpr.summary.orphan_cluster_count,
            "country FPR built"
        );
        fpr
    }

    fn emit(&self, country: &str, dynamic: &DynamicClusters) -> CountryFpr {
        let subject = |row: usize| self.subjects.get(dynamic.ids[row].as_str()).copied();
        let name = |row: usize| {
            dynamic.names[row]
                .clone()
                .or_else(|| subject(row).map(|s| s.subreddit_name.clone()))
                .unwrap_or_default()
        };

        let mut mapping = BTreeMap::new();
        let mut rows = Vec::new();
        let mut clusters = Vec::new();
        let mut summary = QaSummary {
            country: country.to_string(),
            ..QaSummary::default()
        };

        for (label, members) in dynamic.members() {
            let first = &dynamic.assignments[members[0]];
            let mut seeds: Vec<usize> = Vec::new();
            let mut recommends: Vec<usize> = Vec::new();
            let (mut private, mut adf, mut missing_topic) = (0, 0, 0);
            for &row in &members {
                let Some(s) = subject(row) else { continue };
                if self.policy.is_seed(s) {
                    seeds.push(row);
                }
                if self.policy.is_recommendable(s) {
                    recommends.push(row);
                }
                private += usize::from(s.is_private());
                adf += usize::from(s.qa_status == QaStatus::AllowDiscoveryF);
                missing_topic += usize::from(s.missing_topic());
            }
            seeds.sort_by(|a, b| dynamic.ids[*a].cmp(&dynamic.ids[*b]));
            recommends.sort_by(|a, b| dynamic.ids[*a].cmp(&dynamic.ids[*b]));
            let orphan = seeds.len() <= 1 || recommends.is_empty();

            for &seed in &seeds {
                let counterparts: Vec<usize> = if orphan {
                    Vec::new()
                } else {
                    recommends.iter().copied().filter(|&r| r != seed).collect()
                };
                let counterpart_ids: Vec<String> =
                    counterparts.iter().map(|&r| dynamic.ids[r].clone()).collect();
                if !counterpart_ids.is_empty() {
                    mapping.insert(dynamic.ids[seed].clone(), counterpart_ids.clone());
                    summary.seeds_published += 1;
                } else if orphan {
                    summary.seeds_in_orphan_clusters += 1;
                }
                let assignment = &dynamic.assignments[seed];
                rows.push(FprRow {
                    country: country.to_string(),
                    subreddit_id: dynamic.ids[seed].clone(),
                    subreddit_name: name(seed),
                    qa_status: subject(seed).map_or(QaStatus::Review, |s| s.qa_status),
                    cluster_label: label.to_string(),
                    cluster_label_k: assignment.cluster_label_k(),
                    cluster_majority_primary_topic: assignment.majority_topic.clone(),
                    cluster_topic_mix: assignment.topic_mix.clone(),
                    orphan,
                    counterpart_ids,
                    counterpart_names: counterparts.iter().map(|&r| name(r)).collect(),
                });
            }

            summary.seed_count += seeds.len();
            summary.recommend_count += recommends.len();
            summary.cluster_count += 1;
            summary.orphan_cluster_count += usize::from(orphan);
            clusters.push(ClusterSummary {
                country: country.to_string(),
                cluster_label: label.to_string(),
                cluster_label_k: first.cluster_label_k(),
                cluster_majority_primary_topic: first.majority_topic.clone(),
                cluster_topic_mix: first.topic_mix.clone(),
                subreddit_count: members.len(),
                seed_count: seeds.len(),
                recommend_count: recommends.len(),
                orphan,
                private_count: private,
                allow_discovery_f_count: adf,
                missing_topic_count: missing_topic,
                seed_ids: seeds.iter().map(|&r| dynamic.ids[r].clone()).collect(),
                recommend_ids: recommends.iter().map(|&r| dynamic.ids[r].clone()).collect(),
            });
        }

        CountryFpr {
            country: country.to_string(),
            mapping,
            rows,
            clusters,
            summary,
            sweep: Vec::new(),
        }
    }
}
