use std::sync::Arc;

use warp::{Filter, Rejection, Reply};

use crate::pipeline::ChatPipeline;

mod chat;

const MAX_BODY_BYTES: u64 = 1024 * 1024;

pub fn routes(
    pipeline: Arc<ChatPipeline>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("api")
        .and(warp::path("chat"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_pipeline(pipeline))
        .and_then(chat::handle_chat)
}

fn with_pipeline(
    pipeline: Arc<ChatPipeline>,
) -> impl Filter<Extract = (Arc<ChatPipeline>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}
