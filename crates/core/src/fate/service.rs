//! Ticket operations exposed to the API: deletion, listing, drawing and
//! run lookups. Bulk writes go through here so callers never need a
//! [`ServiceRole`] of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::store::{FateError, FateStore, FateTicketFilter, ServiceRole};
use super::types::{BatchQueueEntry, FateBatch, FateTicket};
use crate::config::FateConfig;
use crate::metrics;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Every active ticket for the event date has been drawn or deleted.
    #[error("no fate tickets left for event date {0}")]
    SoldOut(String),

    #[error("store error: {0}")]
    Store(#[from] FateError),
}

impl ServiceError {
    /// Message safe to show to the caller.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::InvalidRequest(msg) | ServiceError::NotFound(msg) => msg.clone(),
            ServiceError::SoldOut(_) => "No fate tickets left for this event date".to_string(),
            ServiceError::Store(_) => "Internal storage error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletionReport {
    pub deleted_count: usize,
    pub deleted_at: DateTime<Utc>,
}

/// Query for [`list_active_tickets`]. Missing page values fall back to the
/// first page and the configured default size.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ListTicketsQuery {
    pub event_id: Option<String>,
    pub event_date_id: Option<String>,
    pub page: Option<u32>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketPage {
    pub tickets: Vec<FateTicket>,
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Soft-delete tickets by id. Unknown and already-deleted ids are ignored
/// and not counted. Batches and other tickets are untouched.
pub fn delete_tickets(
    store: &dyn FateStore,
    ticket_ids: &[String],
) -> Result<DeletionReport, ServiceError> {
    if ticket_ids.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "ticket_ids must not be empty".to_string(),
        ));
    }
    if ticket_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ServiceError::InvalidRequest(
            "ticket_ids must not contain empty ids".to_string(),
        ));
    }

    let deleted_at = Utc::now();
    let deleted_count = store.soft_delete_tickets(ticket_ids, deleted_at, &ServiceRole::elevate())?;
    metrics::TICKETS_DELETED.inc_by(deleted_count as u64);

    info!(
        requested = ticket_ids.len(),
        deleted = deleted_count,
        "Soft-deleted fate tickets"
    );

    Ok(DeletionReport {
        deleted_count,
        deleted_at,
    })
}

/// One page of active, non-deleted tickets.
pub fn list_active_tickets(
    store: &dyn FateStore,
    config: &FateConfig,
    query: &ListTicketsQuery,
) -> Result<TicketPage, ServiceError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ServiceError::InvalidRequest(
            "page starts at 1".to_string(),
        ));
    }
    let page_size = query
        .page_size
        .unwrap_or(config.default_page_size)
        .clamp(1, config.max_page_size.max(1));

    let mut filter = FateTicketFilter::new().active_only();
    if let Some(event_id) = query.event_id.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.with_event(event_id);
    }
    if let Some(event_date_id) = query.event_date_id.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.with_event_date(event_date_id);
    }

    let total_count = store.count_tickets(&filter)?.max(0) as u64;
    let offset = u64::from(page - 1) * u64::from(page_size);
    let tickets = store.list_tickets(
        &filter
            .with_limit(i64::from(page_size))
            .with_offset(offset as i64),
    )?;

    debug!(page, page_size, total_count, returned = tickets.len(), "Listed fate tickets");

    Ok(TicketPage {
        tickets,
        total_count,
        total_pages: total_count.div_ceil(u64::from(page_size)),
        page,
        page_size,
    })
}

/// Draw the next ticket for an event date on behalf of `drawn_by`.
pub fn draw_ticket(
    store: &dyn FateStore,
    event_date_id: &str,
    drawn_by: &str,
) -> Result<FateTicket, ServiceError> {
    if event_date_id.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "event_date_id is required".to_string(),
        ));
    }

    let ticket = store
        .draw_next_ticket(event_date_id, drawn_by, Utc::now(), &ServiceRole::elevate())?
        .ok_or_else(|| ServiceError::SoldOut(event_date_id.to_string()))?;
    metrics::TICKETS_DRAWN.inc();

    info!(
        ticket_id = %ticket.id,
        shop_id = %ticket.shop_id,
        fate_position = ?ticket.fate_position,
        drawn_by,
        "Fate ticket drawn"
    );

    Ok(ticket)
}

pub fn queue_entry(store: &dyn FateStore, id: &str) -> Result<BatchQueueEntry, ServiceError> {
    store
        .get_queue_entry(id)?
        .ok_or_else(|| ServiceError::NotFound(format!("Queue entry not found: {}", id)))
}

pub fn batch(store: &dyn FateStore, id: &str) -> Result<FateBatch, ServiceError> {
    store
        .get_batch(id)?
        .ok_or_else(|| ServiceError::NotFound(format!("Batch not found: {}", id)))
}
