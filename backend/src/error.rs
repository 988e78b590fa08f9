//! Crate-wide error taxonomy (spec.md §7). No internal failure is allowed
//! to unwind a session task; the dispatcher turns every `Err` into a logged
//! message and continues.

use thiserror::Error;

use crate::elevation::ElevationError;
use crate::graph_store::GraphStoreError;
use crate::ingest::IngestError;
use crate::prepare::PrepareError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    GraphStore(#[from] GraphStoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error(transparent)]
    Elevation(#[from] ElevationError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no active graph loaded")]
    NoActiveGraph,
    #[error("an enumeration is already active for this session")]
    EnumerationActive,
    #[error("invalid request: {0}")]
    InvalidInput(String),
}
