//! Persistence contracts the punch pipeline depends on.
//!
//! The engines never perform I/O themselves: callers load the gallery and
//! today's events through these traits, run the pure engines, then append.

use std::future::Future;

use chrono::NaiveDate;

use crate::attendance::AttendanceEvent;
use crate::types::Gallery;

/// Read access to the embeddings of active identities.
pub trait GalleryRepository {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Every active identity with its embeddings, in registration order.
    fn active_embeddings(&self) -> impl Future<Output = Result<Gallery, Self::Error>> + Send;
}

/// Append-only attendance log.
pub trait AttendanceRepository {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Events of one identity on one UTC day, ascending by timestamp.
    fn events_for(
        &self,
        identity_id: &str,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<AttendanceEvent>, Self::Error>> + Send;

    fn append(
        &self,
        event: &AttendanceEvent,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
