//! QA status derivation and seed / recommendation rules.

use std::collections::{BTreeSet, HashMap};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::metadata::SubredditRecord;
use crate::metadata::records::{optional_utf8, required_ids};
use crate::store::Table;
use crate::util::error::PipelineError;

const FRAME: &str = "qa";
const SAFE_RATING: &str = "E";
const PRIVATE: &str = "private";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QaStatus {
    #[serde(rename = "recommend")]
    Recommend,
    #[serde(rename = "remove")]
    Remove,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "review-missing_topic")]
    ReviewMissingTopic,
    #[serde(rename = "allow_discovery_f")]
    AllowDiscoveryF,
}

impl QaStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QaStatus::Recommend => "recommend",
            QaStatus::Remove => "remove",
            QaStatus::Review => "review",
            QaStatus::ReviewMissingTopic => "review-missing_topic",
            QaStatus::AllowDiscoveryF => "allow_discovery_f",
        }
    }

    /// Statuses whose subreddits may key an FPR entry.
    #[must_use]
    pub fn allows_seed(self) -> bool {
        matches!(
            self,
            QaStatus::Recommend | QaStatus::AllowDiscoveryF | QaStatus::ReviewMissingTopic
        )
    }
}

/// One row of the QA table.
#[derive(Debug, Clone, PartialEq)]
pub struct QaRow {
    pub subreddit_id: String,
    pub combined_filter: Option<String>,
    pub predicted_topic: Option<String>,
    pub predicted_rating: Option<String>,
}

impl QaRow {
    /// # Errors
    /// Missing id column or mistyped text columns.
    pub fn from_table(table: &Table) -> Result<Vec<Self>, PipelineError> {
        let ids = required_ids(table, FRAME, "subreddit_id")?;
        let filters = optional_utf8(table, FRAME, "combined_filter")?;
        let topics = optional_utf8(table, FRAME, "predicted_topic")?;
        let ratings = optional_utf8(table, FRAME, "predicted_rating")?;
        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(row, subreddit_id)| QaRow {
                subreddit_id,
                combined_filter: filters[row].clone(),
                predicted_topic: topics[row].clone(),
                predicted_rating: ratings[row].clone(),
            })
            .collect())
    }
}

/// Everything the policy needs to know about one subreddit.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySubject {
    pub subreddit_id: String,
    pub subreddit_name: String,
    pub rating: Option<String>,
    pub sub_type: Option<String>,
    pub over_18: Option<bool>,
    pub allow_discovery: Option<bool>,
    pub primary_topic: Option<String>,
    pub qa_status: QaStatus,
}

impl PolicySubject {
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.sub_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(PRIVATE))
    }

    #[must_use]
    pub fn missing_topic(&self) -> bool {
        self.primary_topic.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

/// QA status for a subreddit.
///
/// `qa_row` is `None` when no QA table is configured; a configured table
/// without a row for the subreddit yields [`QaStatus::Review`].
#[must_use]
pub fn derive_status(
    sub: &SubredditRecord,
    qa_row: Option<Option<&QaRow>>,
    topic: Option<&str>,
) -> QaStatus {
    let base = match qa_row {
        None => QaStatus::Recommend,
        Some(None) => QaStatus::Review,
        Some(Some(row)) => match row.combined_filter.as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("recommend") => QaStatus::Recommend,
            Some(f) if f.eq_ignore_ascii_case("remove") => QaStatus::Remove,
            _ => QaStatus::Review,
        },
    };
    if base != QaStatus::Recommend {
        return base;
    }
    if sub.allow_discovery == Some(false) {
        QaStatus::AllowDiscoveryF
    } else if topic.is_none_or(|t| t.trim().is_empty()) {
        QaStatus::ReviewMissingTopic
    } else {
        QaStatus::Recommend
    }
}

/// Metadata topic, or the QA table's `predicted_topic` when metadata has none.
#[must_use]
pub fn effective_topic(sub: &SubredditRecord, qa_row: Option<&QaRow>) -> Option<String> {
    sub.topic
        .clone()
        .or_else(|| qa_row.and_then(|r| r.predicted_topic.clone()))
}

/// Joins subreddit metadata with the QA table into policy subjects.
///
/// The topic falls back to the QA table's `predicted_topic` and the rating
/// to `predicted_rating` when metadata leaves them empty.
#[must_use]
pub fn build_subjects(subreddits: &[SubredditRecord], qa: Option<&[QaRow]>) -> Vec<PolicySubject> {
    let by_id: Option<HashMap<&str, &QaRow>> =
        qa.map(|rows| rows.iter().map(|r| (r.subreddit_id.as_str(), r)).collect());
    subreddits
        .iter()
        .map(|sub| {
            let row = by_id.as_ref().map(|m| m.get(sub.subreddit_id.as_str()).copied());
            let qa_row = row.flatten();
            let topic = effective_topic(sub, qa_row);
            let rating = sub
                .rating
                .clone()
                .or_else(|| qa_row.and_then(|r| r.predicted_rating.clone()));
            PolicySubject {
                subreddit_id: sub.subreddit_id.clone(),
                subreddit_name: sub.subreddit_name.clone(),
                rating,
                sub_type: sub.sub_type.clone(),
                over_18: sub.over_18,
                allow_discovery: sub.allow_discovery,
                qa_status: derive_status(sub, row, topic.as_deref()),
                primary_topic: topic,
            }
        })
        .collect()
}

/// Seed and recommendation rules for one run.
#[derive(Debug, Clone)]
pub struct FprPolicy {
    sensitive_topics: BTreeSet<String>,
    blocked: Option<AhoCorasick>,
}

impl FprPolicy {
    /// # Errors
    /// The blocked-keyword automaton cannot be built.
    pub fn new(
        sensitive_topics: BTreeSet<String>,
        blocked_keywords: &[String],
    ) -> Result<Self, aho_corasick::BuildError> {
        let patterns: Vec<&str> = blocked_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        let blocked = if patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .match_kind(MatchKind::LeftmostFirst)
                    .ascii_case_insensitive(true)
                    .build(&patterns)?,
            )
        };
        Ok(Self {
            sensitive_topics: sensitive_topics
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            blocked,
        })
    }

    /// # Errors
    /// Same as [`FprPolicy::new`].
    pub fn from_config(config: &RunConfig) -> Result<Self, aho_corasick::BuildError> {
        Self::new(config.sensitive_topics.clone(), &config.blocked_name_keywords)
    }

    /// Name contains a blocked keyword; such subreddits are neither seeds
    /// nor recommendations.
    #[must_use]
    pub fn is_blocked(&self, name: &str) -> bool {
        self.blocked.as_ref().is_some_and(|ac| ac.is_match(name))
    }

    #[must_use]
    pub fn is_sensitive(&self, topic: Option<&str>) -> bool {
        topic.is_some_and(|t| self.sensitive_topics.contains(&t.to_lowercase()))
    }

    /// Seed eligibility apart from geo relevance.
    #[must_use]
    pub fn is_seed(&self, subject: &PolicySubject) -> bool {
        subject.qa_status.allows_seed() && !self.is_blocked(&subject.subreddit_name)
    }

    #[must_use]
    pub fn is_recommendable(&self, subject: &PolicySubject) -> bool {
        subject.qa_status == QaStatus::Recommend
            && !self.is_blocked(&subject.subreddit_name)
            && !subject.is_private()
            && subject.allow_discovery != Some(false)
            && subject
                .rating
                .as_deref()
                .is_some_and(|r| r.trim().eq_ignore_ascii_case(SAFE_RATING))
            && subject.over_18 != Some(true)
            && !self.is_sensitive(subject.primary_topic.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(name: &str) -> SubredditRecord {
        SubredditRecord {
            subreddit_id: format!("t5_{name}"),
            subreddit_name: name.to_string(),
            description_text: None,
            topic: Some("Sports".into()),
            rating: Some("E".into()),
            sub_type: Some("public".into()),
            over_18: Some(false),
            allow_discovery: Some(true),
        }
    }

    fn policy() -> FprPolicy {
        FprPolicy::from_config(&RunConfig::default()).expect("policy")
    }

    fn subject(record: SubredditRecord) -> PolicySubject {
        build_subjects(&[record], None).remove(0)
    }

    #[test]
    fn clean_subreddit_is_seed_and_recommendable() {
        let s = subject(sub("fussball"));
        assert_eq!(s.qa_status, QaStatus::Recommend);
        assert!(policy().is_seed(&s));
        assert!(policy().is_recommendable(&s));
    }

    #[test]
    fn over_18_blocks_recommendation_only() {
        let mut record = sub("nsfwfussball");
        record.over_18 = Some(true);
        let s = subject(record);
        assert!(policy().is_seed(&s));
        assert!(!policy().is_recommendable(&s));
    }

    #[test]
    fn allow_discovery_f_is_seed_not_recommend() {
        let mut record = sub("hidden");
        record.allow_discovery = Some(false);
        let s = subject(record);
        assert_eq!(s.qa_status, QaStatus::AllowDiscoveryF);
        assert!(policy().is_seed(&s));
        assert!(!policy().is_recommendable(&s));
    }

    #[test]
    fn blocked_names_are_excluded_everywhere() {
        let s = subject(sub("CovidGermany"));
        assert!(!policy().is_seed(&s));
        assert!(!policy().is_recommendable(&s));
    }

    #[test]
    fn sensitive_topics_are_not_recommended() {
        let mut record = sub("politik");
        record.topic = Some("politics".into());
        assert!(!policy().is_recommendable(&subject(record)));
    }

    #[test]
    fn qa_table_rows_drive_status() {
        let subs = [sub("a"), sub("b"), sub("c")];
        let qa = [
            QaRow {
                subreddit_id: "t5_a".into(),
                combined_filter: Some("remove".into()),
                predicted_topic: None,
                predicted_rating: None,
            },
            QaRow {
                subreddit_id: "t5_b".into(),
                combined_filter: Some("recommend".into()),
                predicted_topic: None,
                predicted_rating: None,
            },
        ];
        let statuses: Vec<QaStatus> = build_subjects(&subs, Some(&qa))
            .iter()
            .map(|s| s.qa_status)
            .collect();
        assert_eq!(statuses, vec![QaStatus::Remove, QaStatus::Recommend, QaStatus::Review]);
    }

    #[test]
    fn missing_topic_is_a_seed_status() {
        let mut record = sub("notopic");
        record.topic = None;
        let s = subject(record);
        assert_eq!(s.qa_status, QaStatus::ReviewMissingTopic);
        assert!(policy().is_seed(&s));
        assert!(!policy().is_recommendable(&s));
    }
}
