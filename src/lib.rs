#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::similar_names,
    clippy::many_single_char_names,
    clippy::too_many_lines
)]

pub mod clustering;
pub mod config;
pub mod embedding;
pub mod fpr;
pub mod metadata;
pub mod observability;
pub mod pipeline;
pub mod resize;
pub mod similarity;
pub mod store;
pub mod util;
