//! Fate ticket domain types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Catalog
// ============================================================================

/// An event that fate tickets are generated for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A single day of an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventDate {
    pub id: String,
    pub event_id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EventDate {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A vendor that can be assigned fate tickets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shop {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Shop {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Registration of a shop for one event date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShopAttendance {
    pub event_date_id: String,
    pub shop_id: String,
}

// ============================================================================
// Allocation inputs
// ============================================================================

/// Relative allocation share of one vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorWeight {
    pub shop_id: String,
    pub weight: u32,
}

impl VendorWeight {
    pub fn new(shop_id: impl Into<String>, weight: u32) -> Self {
        Self {
            shop_id: shop_id.into(),
            weight,
        }
    }
}

/// One unit of allocation, not yet persisted or positioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketStub {
    pub shop_id: String,
}

// ============================================================================
// Batch queue
// ============================================================================

/// Status of a batch generation request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            "error" => Some(QueueStatus::Error),
            _ => None,
        }
    }

    /// Completed and error entries are never transitioned again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Error)
    }
}

/// Audit record tracking one generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchQueueEntry {
    pub id: String,
    pub event_id: String,
    pub event_date_id: String,
    pub status: QueueStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

// ============================================================================
// Batches and tickets
// ============================================================================

/// Lifecycle of batches and tickets. Only `Active` rows are ever surfaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FateStatus {
    Pending,
    Active,
}

impl FateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FateStatus::Pending => "pending",
            FateStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FateStatus::Pending),
            "active" => Some(FateStatus::Active),
            _ => None,
        }
    }
}

/// One complete set of fate tickets for an event date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FateBatch {
    pub id: String,
    pub event_id: String,
    pub event_date_id: String,
    /// Sum of the vendor weights; equals the number of tickets created.
    pub batch_size: u32,
    pub status: FateStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

/// A single allocable unit belonging to one vendor within one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FateTicket {
    pub id: String,
    pub batch_id: String,
    pub shop_id: String,
    pub event_id: String,
    pub event_date_id: String,
    pub status: FateStatus,
    /// 1-indexed rank within the batch, set on activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fate_position: Option<u32>,
    pub is_drawn: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawn_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawn_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FateTicket {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether a customer could draw this ticket right now.
    pub fn is_drawable(&self) -> bool {
        self.status == FateStatus::Active && !self.is_drawn && !self.is_deleted()
    }
}

/// Ticket row to insert during generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFateTicket {
    pub batch_id: String,
    pub shop_id: String,
    pub event_id: String,
    pub event_date_id: String,
}

/// Batch row to insert during generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFateBatch {
    pub event_id: String,
    pub event_date_id: String,
    pub batch_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> FateTicket {
        FateTicket {
            id: "t-1".to_string(),
            batch_id: "b-1".to_string(),
            shop_id: "shop-a".to_string(),
            event_id: "e-1".to_string(),
            event_date_id: "d-1".to_string(),
            status: FateStatus::Active,
            fate_position: Some(1),
            is_drawn: false,
            drawn_at: None,
            drawn_by: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_queue_status_round_trip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Error,
        ] {
            assert_eq!(QueueStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QueueStatus::parse("bogus"), None);
    }

    #[test]
    fn test_queue_status_terminal() {
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Error.is_terminal());
    }

    #[test]
    fn test_queue_status_serializes_snake_case() {
        let json = serde_json::to_string(&QueueStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_ticket_drawable() {
        let mut t = ticket();
        assert!(t.is_drawable());

        t.is_drawn = true;
        assert!(!t.is_drawable());

        let mut t = ticket();
        t.deleted_at = Some(Utc::now());
        assert!(!t.is_drawable());

        let mut t = ticket();
        t.status = FateStatus::Pending;
        assert!(!t.is_drawable());
    }

    #[test]
    fn test_ticket_serialization_skips_empty_draw_fields() {
        let json = serde_json::to_value(ticket()).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["fate_position"], 1);
        assert!(json.get("drawn_at").is_none());
        assert!(json.get("deleted_at").is_none());
    }
}
