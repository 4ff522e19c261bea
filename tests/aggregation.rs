use ndarray::{Array2, array};
use subclu::embedding::{AggregationInput, AggregationWeights, EmbeddingFrame, aggregate};
use subclu::metadata::{CommentRecord, PostRecord, SubredditRecord, loader::profile_subreddits};
use subclu::similarity::cosine_similarity;

fn post(id: &str, sub: &str, language: Option<&str>) -> PostRecord {
    PostRecord {
        post_id: id.into(),
        subreddit_id: sub.into(),
        text_len: Some(40.0),
        text_word_count: Some(8.0),
        post_type: Some("text".into()),
        weighted_language: language.map(str::to_string),
    }
}

fn comment(id: &str, post_id: &str, sub: &str) -> CommentRecord {
    CommentRecord {
        comment_id: id.into(),
        post_id: post_id.into(),
        subreddit_id: sub.into(),
        text_len: Some(2.0),
        weight: Some(2.0),
    }
}

fn frame(name: &str, id_col: &str, ids: &[&str], vectors: Array2<f32>) -> EmbeddingFrame {
    let ids = ids.iter().map(|s| (*s).to_string()).collect();
    EmbeddingFrame::new(name, id_col, ids, vectors).expect("frame")
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "{actual:?} != {expected:?}");
    }
}

#[test]
fn two_subreddit_toy_matches_hand_computation() {
    let posts = vec![post("p1", "A", None), post("p2", "B", None)];
    let comments = vec![comment("c1", "p1", "A")];
    let post_embeddings = frame("posts", "post_id", &["p1", "p2"], array![[1.0, 0.0], [0.0, 1.0]]);
    let comment_embeddings = frame("comments", "comment_id", &["c1"], array![[0.5, 0.5]]);

    let output = aggregate(
        &AggregationInput {
            posts: &posts,
            comments: &comments,
            post_embeddings: &post_embeddings,
            comment_embeddings: Some(&comment_embeddings),
            subreddit_embeddings: None,
            weighted_comments: true,
        },
        AggregationWeights::default(),
    )
    .expect("aggregate");

    let expected_a = [80.0 / 90.0, 10.0 / 90.0];
    let sub_c = &output.sub_level_c.frame;
    assert_close(sub_c.get("A").expect("A").as_slice().expect("contiguous"), &expected_a);
    assert_close(sub_c.get("B").expect("B").as_slice().expect("contiguous"), &[0.0, 1.0]);
    assert_close(
        output.post_level_b.get("p1").expect("p1").as_slice().expect("contiguous"),
        &expected_a,
    );
    assert_eq!(output.sub_level_c.posts_for_embeddings_count, vec![1, 1]);

    let sim = cosine_similarity(sub_c.vectors());
    assert!((sim[[0, 1]] - 0.124).abs() < 1e-3, "cosine was {}", sim[[0, 1]]);
}

#[test]
fn single_post_without_comments_is_its_own_subreddit_vector() {
    let posts = vec![post("p1", "A", None)];
    let post_embeddings = frame("posts", "post_id", &["p1"], array![[0.3, -0.7, 0.2]]);
    let output = aggregate(
        &AggregationInput {
            posts: &posts,
            comments: &[],
            post_embeddings: &post_embeddings,
            comment_embeddings: None,
            subreddit_embeddings: None,
            weighted_comments: false,
        },
        AggregationWeights::default(),
    )
    .expect("aggregate");
    let a = output.sub_level_a.frame.get("A").expect("A");
    assert_eq!(a.to_vec(), vec![0.3, -0.7, 0.2]);
}

#[test]
fn duplicate_language_codes_collapse_into_one_language() {
    let sub = SubredditRecord {
        subreddit_id: "t5_zh".into(),
        subreddit_name: "china_irl".into(),
        description_text: None,
        topic: None,
        rating: None,
        sub_type: None,
        over_18: None,
        allow_discovery: None,
    };
    let posts = vec![
        post("p1", "t5_zh", Some("zh")),
        post("p2", "t5_zh", Some("zh-Latn")),
        post("p3", "t5_zh", Some("zh")),
        post("p4", "t5_zh", Some("en")),
    ];
    let profiles = profile_subreddits(&[sub], &posts, 0.008);
    let profile = &profiles[0];
    assert_eq!(profile.primary_post_language.as_deref(), Some("Chinese"));
    let percent = profile.primary_post_language_percent.expect("percent");
    assert!((percent - 0.75).abs() < 1e-9);
    assert_eq!(profile.secondary_post_language.as_deref(), Some("English"));
}
