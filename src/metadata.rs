//! Subreddit, post and comment metadata.

pub mod language;
pub mod loader;
pub mod records;

pub use loader::{
    LoadReport, LoaderOptions, Metadata, SubredditProfile, load_metadata, profiles_to_table,
};
pub use records::{CommentRecord, PostRecord, SubredditRecord};
