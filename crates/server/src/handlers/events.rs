//! Event ingestion endpoint.

use crate::error::{ApiError, ApiResult};
use crate::ingest::{EventBatch, IngestError, IngestOutcome};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Result of applying a batch of events.
#[derive(Debug, Default, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub created: usize,
    pub duplicates: usize,
    pub marked_deleted: usize,
    pub updated: usize,
    pub ignored: usize,
    /// Per-event rejections, by position in the batch.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedEvent>,
}

#[derive(Debug, Serialize)]
pub struct RejectedEvent {
    pub index: usize,
    pub message: String,
}

/// POST /v1/events - Apply one envelope or an array of envelopes.
///
/// Malformed envelopes are reported and skipped; a metadata failure aborts
/// the batch so the producer redelivers it.
pub async fn ingest_events(
    State(state): State<AppState>,
    Json(batch): Json<EventBatch>,
) -> ApiResult<Json<IngestResponse>> {
    let events = batch.into_vec();
    let mut response = IngestResponse::default();

    for (index, event) in events.iter().enumerate() {
        match state.ingestor.apply(event).await {
            Ok(outcome) => {
                response.accepted += 1;
                match outcome {
                    IngestOutcome::Created => response.created += 1,
                    IngestOutcome::Duplicate => response.duplicates += 1,
                    IngestOutcome::MarkedDeleted => response.marked_deleted += 1,
                    IngestOutcome::Updated => response.updated += 1,
                    IngestOutcome::Ignored => response.ignored += 1,
                }
            }
            Err(IngestError::InvalidEvent(message)) => {
                tracing::warn!(
                    index,
                    event_type = %event.event_type,
                    kind = %event.event_type.kind(),
                    error = %message,
                    "Rejected event"
                );
                response.rejected.push(RejectedEvent { index, message });
            }
            Err(IngestError::Metadata(e)) => return Err(ApiError::Metadata(e)),
        }
    }

    tracing::info!(
        events = events.len(),
        created = response.created,
        duplicates = response.duplicates,
        marked_deleted = response.marked_deleted,
        updated = response.updated,
        rejected = response.rejected.len(),
        "Events ingested"
    );
    Ok(Json(response))
}
