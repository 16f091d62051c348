//! Fruit basket report.
//!
//! For each basket, in order: the distinct fruits (first-seen order)
//! and a count per fruit. Baskets are processed one after another with
//! `concat_map`; within a basket the distinct list and the counts are
//! computed independently and zipped.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use ripple_core::{KeyCount, Single, Stream};
use serde::Serialize;

use crate::ApiState;
use crate::body::{StreamFormat, StreamReply};

const BASKET1: &[&str] = &["kiwi", "orange", "lemon", "orange", "lemon", "kiwi"];
const BASKET2: &[&str] = &["banana", "lemon", "lemon", "kiwi"];
const BASKET3: &[&str] = &["strawberry", "orange", "lemon", "grape", "strawberry"];

/// Summary of one basket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FruitInfo {
    pub distinct_fruits: Vec<String>,
    pub count_fruits: KeyCount<String>,
}

impl FruitInfo {
    pub fn new(distinct_fruits: Vec<String>, count_fruits: KeyCount<String>) -> Self {
        Self {
            distinct_fruits,
            count_fruits,
        }
    }
}

pub fn default_baskets() -> Vec<Vec<String>> {
    [BASKET1, BASKET2, BASKET3]
        .iter()
        .map(|basket| basket.iter().map(|fruit| fruit.to_string()).collect())
        .collect()
}

fn summarize(basket: Vec<String>) -> Single<FruitInfo> {
    let distinct = Stream::from_iterable(basket.clone()).distinct().collect_list();
    let counts = Stream::from_iterable(basket)
        .group_by(|fruit: &String| fruit.clone())
        .concat_map(|group| {
            let fruit = group.key().clone();
            group.count().map(move |count| KeyCount::single(fruit.clone(), count))
        })
        .reduce(KeyCount::merge);
    distinct.zip_with(counts, FruitInfo::new)
}

/// One [`FruitInfo`] per basket, in basket order.
pub fn fruit_report(baskets: Vec<Vec<String>>) -> Stream<FruitInfo> {
    Stream::from_iterable(baskets).concat_map(summarize)
}

/// GET /basket
pub async fn basket(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    StreamReply::new(fruit_report(default_baskets()), StreamFormat::negotiate(&headers))
        .keep_alive(state.config.sse_keep_alive())
        .render()
        .await
}
