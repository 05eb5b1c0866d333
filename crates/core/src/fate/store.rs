//! Storage abstraction for the fate ticket workflow.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{
    BatchQueueEntry, Event, EventDate, FateBatch, FateTicket, NewFateBatch, NewFateTicket, Shop,
};

/// Error type for fate store operations.
#[derive(Debug, Error)]
pub enum FateError {
    /// Row not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Cannot perform operation due to current state.
    #[error("cannot {operation} {entity} {id}: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        operation: &'static str,
        reason: String,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl FateError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        FateError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Proof that the caller runs as a trusted internal operation.
///
/// Bulk ticket writes require one of these. It can only be minted inside
/// this crate, so HTTP handlers and other end-user paths reach those writes
/// only through the generator and the service functions.
#[derive(Debug)]
pub struct ServiceRole {
    _private: (),
}

impl ServiceRole {
    pub(crate) fn elevate() -> Self {
        Self { _private: () }
    }
}

/// Filter for listing fate tickets.
#[derive(Debug, Clone, Default)]
pub struct FateTicketFilter {
    pub event_id: Option<String>,
    pub event_date_id: Option<String>,
    pub batch_id: Option<String>,
    /// Only `status = active` tickets whose batch is also active.
    pub active_only: bool,
    /// Include soft-deleted tickets.
    pub include_deleted: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl FateTicketFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_event_date(mut self, event_date_id: impl Into<String>) -> Self {
        self.event_date_id = Some(event_date_id.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether `ticket` passes every ticket-level condition. Pagination and
    /// the batch status required by `active_only` are left to the store.
    pub fn matches(&self, ticket: &FateTicket) -> bool {
        if let Some(ref event_id) = self.event_id {
            if &ticket.event_id != event_id {
                return false;
            }
        }
        if let Some(ref event_date_id) = self.event_date_id {
            if &ticket.event_date_id != event_date_id {
                return false;
            }
        }
        if let Some(ref batch_id) = self.batch_id {
            if &ticket.batch_id != batch_id {
                return false;
            }
        }
        if self.active_only && ticket.status != super::FateStatus::Active {
            return false;
        }
        if !self.include_deleted && ticket.is_deleted() {
            return false;
        }
        true
    }
}

/// Trait for fate ticket storage backends.
///
/// Listing orders tickets by batch (creation time, then batch id) and then by
/// `fate_position`.
pub trait FateStore: Send + Sync {
    // --- catalog -----------------------------------------------------------

    fn get_event(&self, id: &str) -> Result<Option<Event>, FateError>;

    fn get_event_date(&self, id: &str) -> Result<Option<EventDate>, FateError>;

    fn get_shop(&self, id: &str) -> Result<Option<Shop>, FateError>;

    /// Ids of shops registered as attending the event date.
    fn attending_shop_ids(&self, event_date_id: &str) -> Result<Vec<String>, FateError>;

    /// Insert or replace an event.
    fn put_event(&self, event: &Event) -> Result<(), FateError>;

    /// Insert or replace an event date.
    fn put_event_date(&self, event_date: &EventDate) -> Result<(), FateError>;

    /// Insert or replace a shop.
    fn put_shop(&self, shop: &Shop) -> Result<(), FateError>;

    /// Register a shop as attending an event date. Registering twice is a no-op.
    fn register_attendance(&self, event_date_id: &str, shop_id: &str) -> Result<(), FateError>;

    // --- batch queue -------------------------------------------------------

    /// Create a queue entry in `pending` status.
    fn create_queue_entry(
        &self,
        event_id: &str,
        event_date_id: &str,
    ) -> Result<BatchQueueEntry, FateError>;

    fn get_queue_entry(&self, id: &str) -> Result<Option<BatchQueueEntry>, FateError>;

    /// Move a queue entry to `processing` and attach its batch.
    fn mark_queue_processing(
        &self,
        id: &str,
        batch_id: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError>;

    /// Move a queue entry to `completed`.
    fn mark_queue_completed(
        &self,
        id: &str,
        batch_id: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError>;

    /// Move a queue entry to `error`. Calling this again overwrites the message.
    fn mark_queue_error(
        &self,
        id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError>;

    // --- batches -----------------------------------------------------------

    /// Create a batch in `pending` status.
    fn create_batch(&self, batch: &NewFateBatch) -> Result<FateBatch, FateError>;

    fn get_batch(&self, id: &str) -> Result<Option<FateBatch>, FateError>;

    /// Move a batch to `active`.
    fn activate_batch(
        &self,
        id: &str,
        at: DateTime<Utc>,
        role: &ServiceRole,
    ) -> Result<FateBatch, FateError>;

    // --- tickets -----------------------------------------------------------

    /// Bulk insert tickets in `pending` status. All or nothing.
    fn insert_tickets(
        &self,
        tickets: &[NewFateTicket],
        role: &ServiceRole,
    ) -> Result<Vec<FateTicket>, FateError>;

    /// Bulk set `fate_position` and move tickets to `active`. All or nothing.
    /// Returns the number of tickets updated.
    fn activate_tickets(
        &self,
        positions: &[(String, u32)],
        role: &ServiceRole,
    ) -> Result<usize, FateError>;

    /// Soft-delete tickets. Unknown or already-deleted ids are skipped.
    /// Returns the number of tickets newly marked deleted.
    fn soft_delete_tickets(
        &self,
        ids: &[String],
        at: DateTime<Utc>,
        role: &ServiceRole,
    ) -> Result<usize, FateError>;

    /// Atomically take the lowest-positioned drawable ticket of an active
    /// batch for the event date and mark it drawn.
    fn draw_next_ticket(
        &self,
        event_date_id: &str,
        drawn_by: &str,
        at: DateTime<Utc>,
        role: &ServiceRole,
    ) -> Result<Option<FateTicket>, FateError>;

    fn get_ticket(&self, id: &str) -> Result<Option<FateTicket>, FateError>;

    fn list_tickets(&self, filter: &FateTicketFilter) -> Result<Vec<FateTicket>, FateError>;

    fn count_tickets(&self, filter: &FateTicketFilter) -> Result<i64, FateError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fate::FateStatus;

    fn ticket(status: FateStatus) -> FateTicket {
        FateTicket {
            id: "t-1".to_string(),
            batch_id: "b-1".to_string(),
            shop_id: "s-1".to_string(),
            event_id: "e-1".to_string(),
            event_date_id: "d-1".to_string(),
            status,
            fate_position: None,
            is_drawn: false,
            drawn_at: None,
            drawn_by: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_filter_defaults() {
        let filter = FateTicketFilter::new();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset, 0);
        assert!(!filter.active_only);
        assert!(!filter.include_deleted);
    }

    #[test]
    fn test_filter_matches_event_and_date() {
        let t = ticket(FateStatus::Active);
        assert!(FateTicketFilter::new().with_event("e-1").matches(&t));
        assert!(!FateTicketFilter::new().with_event("e-2").matches(&t));
        assert!(FateTicketFilter::new().with_event_date("d-1").matches(&t));
        assert!(!FateTicketFilter::new().with_event_date("d-2").matches(&t));
        assert!(!FateTicketFilter::new().with_batch("b-2").matches(&t));
    }

    #[test]
    fn test_filter_active_only() {
        let filter = FateTicketFilter::new().active_only();
        assert!(filter.matches(&ticket(FateStatus::Active)));
        assert!(!filter.matches(&ticket(FateStatus::Pending)));
    }

    #[test]
    fn test_filter_excludes_deleted_by_default() {
        let mut t = ticket(FateStatus::Active);
        t.deleted_at = Some(Utc::now());

        assert!(!FateTicketFilter::new().matches(&t));
        assert!(FateTicketFilter::new().including_deleted().matches(&t));
    }

    #[test]
    fn test_error_display() {
        let err = FateError::not_found("batch", "b-9");
        assert_eq!(err.to_string(), "batch not found: b-9");
    }
}
