use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;
use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::hyper::Body;
use warp::reply::Response;
use warp::Rejection;

use crate::agents::FragmentStream;
use crate::metrics;
use crate::models::Turn;
use crate::pipeline::ChatPipeline;

#[instrument(skip_all, fields(request_id = %Uuid::new_v4(), turns = turns.len()))]
pub async fn handle_chat(
    turns: Vec<Turn>,
    pipeline: Arc<ChatPipeline>,
) -> Result<Response, Rejection> {
    info!("Processing chat request");

    match pipeline.run(turns).await {
        Ok(fragments) => {
            metrics::record_outcome("streamed");
            Ok(stream_response(fragments))
        }
        Err(e) => {
            metrics::record_outcome("failed");
            Err(warp::reject::custom(e))
        }
    }
}

/// 200 with the raw reply text as a chunked body. A failing fragment aborts
/// the body, so the client sees a truncated transfer rather than a clean end.
fn stream_response(fragments: FragmentStream) -> Response {
    let mut response = Response::new(Body::wrap_stream(fragments));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
