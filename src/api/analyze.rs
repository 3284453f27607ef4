// Analysis Endpoints
//
// POST handlers for the combined (NFT + POAP + ERC-20) and ERC-20-only
// overlap analyses, plus the server-sent-event variant of the combined one.

use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::helpers::{analysis_error, bad_request, ApiResult};
use super::AppState;
use crate::aggregator::OverlapAggregator;
use crate::constants::PROGRESS_CHANNEL_CAPACITY;
use crate::error::AnalysisError;
use crate::metrics;
use crate::progress::ProgressReporter;
use crate::telemetry::short_address;
use crate::types::{AnalyzeRequest, AnalyzeResult, Erc20OverlapRequest};
use crate::validation::{validate_request, ValidatedRequest};

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, (axum::http::StatusCode, Json<super::ApiError>)> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| bad_request(format!("Invalid request body: {}", rejection.body_text())))
}

fn validate(request: &AnalyzeRequest) -> Result<ValidatedRequest, (axum::http::StatusCode, Json<super::ApiError>)> {
    validate_request(request).map_err(|e| {
        metrics::increment_analyses("rejected");
        analysis_error(e)
    })
}

/// POST /api/analyze-combined-overlap
/// Ranks wallets sharing the selected NFTs, POAPs and ERC-20 tokens.
pub async fn analyze_combined_overlap(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<AnalyzeResult> {
    let request = parse_body(body)?;
    let validated = validate(&request)?;

    state
        .aggregator
        .analyze(&validated, &ProgressReporter::disabled(), &CancellationToken::new())
        .await
        .map(Json)
        .map_err(analysis_error)
}

/// POST /api/analyze-erc20-overlap
/// ERC-20-only analysis: any shared token qualifies, smaller ranking.
pub async fn analyze_erc20_overlap(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<Erc20OverlapRequest>, JsonRejection>,
) -> ApiResult<AnalyzeResult> {
    let request = AnalyzeRequest::from(parse_body(body)?);
    let validated = validate(&request)?;

    state
        .erc20_aggregator
        .analyze(&validated, &ProgressReporter::disabled(), &CancellationToken::new())
        .await
        .map(Json)
        .map_err(analysis_error)
}

/// POST /api/analyze-combined-overlap/stream
///
/// Validation errors are answered with a plain 400 before the stream
/// opens. After that every outcome is an event: progress ticks, then one
/// `result` or `error`, then end-of-stream. Closing the connection cancels
/// the analysis at the next page boundary.
pub async fn analyze_combined_overlap_stream(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let validated = match parse_body(body).and_then(|request| validate(&request)) {
        Ok(validated) => validated,
        Err(rejection) => return rejection.into_response(),
    };

    let (reporter, rx) = ProgressReporter::channel(PROGRESS_CHANNEL_CAPACITY);
    let aggregator = state.aggregator.clone();

    tokio::spawn(async move {
        let wallet = short_address(&validated.source_wallet);
        let cancel = CancellationToken::new();
        let result = run_until_disconnect(&aggregator, &validated, &reporter, &cancel).await;

        let delivered = match result {
            Ok(result) => reporter.finish(result).await,
            Err(AnalysisError::Cancelled) => {
                info!(wallet = %wallet, "Stream closed by client, analysis stopped");
                return;
            }
            Err(e) => {
                let (_, Json(body)) = analysis_error(e);
                reporter.fail(body.error).await
            }
        };
        if !delivered {
            debug!(wallet = %wallet, "Stream reader gone before the final event");
        }
    });

    let events = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Run the analysis; if the reader disconnects first, cancel and let the
/// aggregator wind down at its next checkpoint
async fn run_until_disconnect(
    aggregator: &OverlapAggregator,
    request: &ValidatedRequest,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<AnalyzeResult, AnalysisError> {
    let analysis = aggregator.analyze(request, reporter, cancel);
    tokio::pin!(analysis);

    let finished = tokio::select! {
        result = &mut analysis => Some(result),
        _ = reporter.closed() => None,
    };

    match finished {
        Some(result) => result,
        None => {
            cancel.cancel();
            analysis.await
        }
    }
}
