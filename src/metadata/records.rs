//! Typed rows for subreddit, post and comment metadata.

use crate::store::{Column, StoreError, Table};
use crate::util::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct SubredditRecord {
    pub subreddit_id: String,
    pub subreddit_name: String,
    pub description_text: Option<String>,
    pub topic: Option<String>,
    pub rating: Option<String>,
    pub sub_type: Option<String>,
    pub over_18: Option<bool>,
    pub allow_discovery: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub post_id: String,
    pub subreddit_id: String,
    pub text_len: Option<f64>,
    pub text_word_count: Option<f64>,
    pub post_type: Option<String>,
    pub weighted_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub comment_id: String,
    pub post_id: String,
    pub subreddit_id: String,
    pub text_len: Option<f64>,
    /// Value of the configured aggregation weight column.
    pub weight: Option<f64>,
}

/// Parses `t`/`f` style flags as well as native booleans.
pub(crate) fn flag_values(
    table: &Table,
    name: &str,
) -> Result<Option<Vec<Option<bool>>>, StoreError> {
    if !table.has_column(name) {
        return Ok(None);
    }
    let values = match table.column(name)? {
        Column::Bool(values) => values.clone(),
        Column::Utf8(values) => values
            .iter()
            .map(|v| v.as_deref().and_then(parse_flag))
            .collect(),
        Column::Int64(values) => values.iter().map(|v| v.map(|x| x != 0)).collect(),
        other => {
            return Err(StoreError::ColumnType {
                column: name.to_string(),
                expected: "bool",
                actual: other.type_name(),
            });
        }
    };
    Ok(Some(values))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" => Some(true),
        "f" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Required id column with no nulls.
pub(crate) fn required_ids(
    table: &Table,
    frame: &str,
    name: &str,
) -> Result<Vec<String>, PipelineError> {
    let values = table
        .utf8(name)
        .map_err(|e| PipelineError::from_store(frame, e))?;
    values
        .iter()
        .enumerate()
        .map(|(row, v)| {
            v.clone()
                .ok_or_else(|| PipelineError::schema(frame, format!("null {name} at row {row}")))
        })
        .collect()
}

pub(crate) fn optional_utf8(
    table: &Table,
    frame: &str,
    name: &str,
) -> Result<Vec<Option<String>>, PipelineError> {
    match table.utf8_opt(name) {
        Ok(Some(values)) => Ok(values.to_vec()),
        Ok(None) => Ok(vec![None; table.num_rows()]),
        Err(e) => Err(PipelineError::from_store(frame, e)),
    }
}

pub(crate) fn optional_f64(
    table: &Table,
    frame: &str,
    name: &str,
) -> Result<Option<Vec<Option<f64>>>, PipelineError> {
    if !table.has_column(name) {
        return Ok(None);
    }
    table
        .f64_values(name)
        .map(Some)
        .map_err(|e| PipelineError::from_store(frame, e))
}

#[allow(clippy::cast_precision_loss)]
fn char_len(values: &[Option<String>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.as_ref().map(|s| s.chars().count() as f64))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn word_count(values: &[Option<String>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.as_ref().map(|s| s.split_whitespace().count() as f64))
        .collect()
}

impl SubredditRecord {
    /// # Errors
    /// Missing id/name columns or mistyped optional columns.
    pub fn from_table(table: &Table) -> Result<Vec<Self>, PipelineError> {
        const FRAME: &str = "subreddits";
        let ids = required_ids(table, FRAME, "subreddit_id")?;
        let names = required_ids(table, FRAME, "subreddit_name")?;
        let descriptions = optional_utf8(table, FRAME, "description_text")?;
        let topic_col = if table.has_column("topic") {
            "topic"
        } else {
            "primary_topic"
        };
        let topics = optional_utf8(table, FRAME, topic_col)?;
        let ratings = optional_utf8(table, FRAME, "rating")?;
        let types = optional_utf8(table, FRAME, "type")?;
        let rows = table.num_rows();
        let over_18 = flag_values(table, "over_18")
            .map_err(|e| PipelineError::from_store(FRAME, e))?
            .unwrap_or_else(|| vec![None; rows]);
        let allow_discovery = flag_values(table, "allow_discovery")
            .map_err(|e| PipelineError::from_store(FRAME, e))?
            .unwrap_or_else(|| vec![None; rows]);

        Ok((0..rows)
            .map(|row| SubredditRecord {
                subreddit_id: ids[row].clone(),
                subreddit_name: names[row].to_lowercase(),
                description_text: descriptions[row].clone(),
                topic: topics[row].clone(),
                rating: ratings[row].clone(),
                sub_type: types[row].clone(),
                over_18: over_18[row],
                allow_discovery: allow_discovery[row],
            })
            .collect())
    }
}

impl PostRecord {
    /// # Errors
    /// Missing id columns or mistyped optional columns.
    pub fn from_table(table: &Table) -> Result<Vec<Self>, PipelineError> {
        const FRAME: &str = "posts";
        let ids = required_ids(table, FRAME, "post_id")?;
        let subs = required_ids(table, FRAME, "subreddit_id")?;
        let text = optional_utf8(table, FRAME, "text")?;
        let text_len = optional_f64(table, FRAME, "text_len")?.unwrap_or_else(|| char_len(&text));
        let word_counts =
            optional_f64(table, FRAME, "text_word_count")?.unwrap_or_else(|| word_count(&text));
        let post_types = optional_utf8(table, FRAME, "post_type")?;
        let languages = optional_utf8(table, FRAME, "weighted_language")?;

        Ok((0..table.num_rows())
            .map(|row| PostRecord {
                post_id: ids[row].clone(),
                subreddit_id: subs[row].clone(),
                text_len: text_len[row],
                text_word_count: word_counts[row],
                post_type: post_types[row].clone(),
                weighted_language: languages[row].clone(),
            })
            .collect())
    }
}

impl CommentRecord {
    /// `weight_col` names the aggregation weight; `None` leaves weights unset.
    ///
    /// # Errors
    /// Missing id columns, or a configured weight column that is absent.
    pub fn from_table(table: &Table, weight_col: Option<&str>) -> Result<Vec<Self>, PipelineError> {
        const FRAME: &str = "comments";
        let ids = required_ids(table, FRAME, "comment_id")?;
        let posts = required_ids(table, FRAME, "post_id")?;
        let subs = required_ids(table, FRAME, "subreddit_id")?;
        let text_len = match optional_f64(table, FRAME, "comment_text_len")? {
            Some(values) => values,
            None => char_len(&optional_utf8(table, FRAME, "comment_text")?),
        };
        let weights = match weight_col {
            Some("comment_text_len") => Some(text_len.clone()),
            Some(name) => Some(
                table
                    .f64_values(name)
                    .map_err(|e| PipelineError::from_store(FRAME, e))?,
            ),
            None => None,
        };

        Ok((0..table.num_rows())
            .map(|row| CommentRecord {
                comment_id: ids[row].clone(),
                post_id: posts[row].clone(),
                subreddit_id: subs[row].clone(),
                text_len: text_len[row],
                weight: weights.as_ref().and_then(|w| w[row]),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[Option<&str>]) -> Column {
        Column::Utf8(values.iter().map(|v| v.map(str::to_string)).collect())
    }

    #[test]
    fn subreddit_flags_accept_string_and_bool() {
        let table = Table::new()
            .with_column("subreddit_id", text(&[Some("t5_1"), Some("t5_2")]))
            .and_then(|t| t.with_column("subreddit_name", text(&[Some("Fussball"), Some("de")])))
            .and_then(|t| t.with_column("over_18", text(&[Some("f"), Some("t")])))
            .and_then(|t| t.with_column("allow_discovery", Column::Bool(vec![Some(true), None])))
            .and_then(|t| t.with_column("primary_topic", text(&[Some("Sports"), None])))
            .expect("table");
        let subs = SubredditRecord::from_table(&table).expect("subs");
        assert_eq!(subs[0].subreddit_name, "fussball");
        assert_eq!(subs[0].over_18, Some(false));
        assert_eq!(subs[1].over_18, Some(true));
        assert_eq!(subs[1].allow_discovery, None);
        assert_eq!(subs[0].topic.as_deref(), Some("Sports"));
    }

    #[test]
    fn missing_weight_column_is_a_schema_error() {
        let table = Table::new()
            .with_column("comment_id", Column::Utf8(vec![Some("c1".into())]))
            .and_then(|t| t.with_column("post_id", Column::Utf8(vec![Some("p1".into())])))
            .and_then(|t| t.with_column("subreddit_id", Column::Utf8(vec![Some("t5_1".into())])))
            .expect("table");
        let err = CommentRecord::from_table(&table, Some("upvotes")).expect_err("missing weight");
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));

        let comments = CommentRecord::from_table(&table, None).expect("no weight");
        assert_eq!(comments[0].weight, None);
    }
}
