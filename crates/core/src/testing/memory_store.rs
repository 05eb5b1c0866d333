//! In-memory fate store for tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::fate::{
    BatchQueueEntry, Event, EventDate, FateBatch, FateError, FateStatus, FateStore, FateTicket,
    FateTicketFilter, NewFateBatch, NewFateTicket, QueueStatus, ServiceRole, Shop,
};

/// Store operations that can be made to fail with [`InMemoryFateStore::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetEvent,
    GetEventDate,
    GetShop,
    AttendingShops,
    CreateQueueEntry,
    MarkQueueProcessing,
    MarkQueueCompleted,
    MarkQueueError,
    CreateBatch,
    ActivateBatch,
    InsertTickets,
    ActivateTickets,
    SoftDeleteTickets,
    DrawNextTicket,
    ListTickets,
    CountTickets,
}

#[derive(Default)]
struct State {
    events: HashMap<String, Event>,
    event_dates: HashMap<String, EventDate>,
    shops: HashMap<String, Shop>,
    attendance: HashMap<String, BTreeSet<String>>,
    queue: HashMap<String, BatchQueueEntry>,
    /// Batch plus its creation sequence number, used to break timestamp ties.
    batches: HashMap<String, (FateBatch, u64)>,
    next_batch_seq: u64,
    /// Insertion order.
    tickets: Vec<FateTicket>,
    failures: HashSet<Operation>,
    calls: Vec<Operation>,
}

impl State {
    fn check(&mut self, op: Operation) -> Result<(), FateError> {
        self.calls.push(op);
        if self.failures.contains(&op) {
            return Err(FateError::Database(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }

    /// Batch creation time, batch sequence, position, then id.
    fn sort_key<'a>(
        &self,
        ticket: &'a FateTicket,
    ) -> (Option<DateTime<Utc>>, u64, u32, &'a str) {
        let batch = self.batches.get(&ticket.batch_id);
        (
            batch.map(|(b, _)| b.created_at),
            batch.map_or(u64::MAX, |(_, seq)| *seq),
            ticket.fate_position.unwrap_or(u32::MAX),
            ticket.id.as_str(),
        )
    }

    fn batch_active(&self, batch_id: &str) -> bool {
        self.batches
            .get(batch_id)
            .is_some_and(|(b, _)| b.status == FateStatus::Active)
    }

    fn visible(&self, filter: &FateTicketFilter, ticket: &FateTicket) -> bool {
        filter.matches(ticket) && (!filter.active_only || self.batch_active(&ticket.batch_id))
    }

    fn sorted_matching(&self, filter: &FateTicketFilter) -> Vec<FateTicket> {
        let mut matching: Vec<&FateTicket> = self
            .tickets
            .iter()
            .filter(|t| self.visible(filter, t))
            .collect();
        matching.sort_by(|a, b| self.sort_key(a).cmp(&self.sort_key(b)));
        matching.into_iter().cloned().collect()
    }

    fn queue_entry_mut(&mut self, id: &str) -> Result<&mut BatchQueueEntry, FateError> {
        self.queue
            .get_mut(id)
            .ok_or_else(|| FateError::not_found("queue entry", id))
    }
}

/// Thread-safe in-memory [`FateStore`] with per-operation fault injection.
///
/// Every store call is recorded, so tests can assert which phases ran.
///
/// ```rust,ignore
/// let store = InMemoryFateStore::new();
/// store.fail_on(Operation::ActivateTickets);
/// // generation now fails in the activation phase
/// ```
#[derive(Default)]
pub struct InMemoryFateStore {
    state: Mutex<State>,
}

impl InMemoryFateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call of `op` fail with a database error.
    pub fn fail_on(&self, op: Operation) {
        self.state().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Operations called so far, in call order.
    pub fn calls(&self) -> Vec<Operation> {
        self.state().calls.clone()
    }

    pub fn queue_entries(&self) -> Vec<BatchQueueEntry> {
        let mut entries: Vec<_> = self.state().queue.values().cloned().collect();
        entries.sort_by_key(|e| e.requested_at);
        entries
    }

    pub fn batches(&self) -> Vec<FateBatch> {
        let state = self.state();
        let mut batches: Vec<_> = state.batches.values().cloned().collect();
        batches.sort_by_key(|(_, seq)| *seq);
        batches.into_iter().map(|(b, _)| b).collect()
    }

    /// All tickets including soft-deleted ones, in insertion order.
    pub fn tickets(&self) -> Vec<FateTicket> {
        self.state().tickets.clone()
    }
}

impl FateStore for InMemoryFateStore {
    fn get_event(&self, id: &str) -> Result<Option<Event>, FateError> {
        let mut state = self.state();
        state.check(Operation::GetEvent)?;
        Ok(state.events.get(id).cloned())
    }

    fn get_event_date(&self, id: &str) -> Result<Option<EventDate>, FateError> {
        let mut state = self.state();
        state.check(Operation::GetEventDate)?;
        Ok(state.event_dates.get(id).cloned())
    }

    fn get_shop(&self, id: &str) -> Result<Option<Shop>, FateError> {
        let mut state = self.state();
        state.check(Operation::GetShop)?;
        Ok(state.shops.get(id).cloned())
    }

    fn attending_shop_ids(&self, event_date_id: &str) -> Result<Vec<String>, FateError> {
        let mut state = self.state();
        state.check(Operation::AttendingShops)?;
        Ok(state
            .attendance
            .get(event_date_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn put_event(&self, event: &Event) -> Result<(), FateError> {
        self.state().events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    fn put_event_date(&self, event_date: &EventDate) -> Result<(), FateError> {
        self.state()
            .event_dates
            .insert(event_date.id.clone(), event_date.clone());
        Ok(())
    }

    fn put_shop(&self, shop: &Shop) -> Result<(), FateError> {
        self.state().shops.insert(shop.id.clone(), shop.clone());
        Ok(())
    }

    fn register_attendance(&self, event_date_id: &str, shop_id: &str) -> Result<(), FateError> {
        self.state()
            .attendance
            .entry(event_date_id.to_string())
            .or_default()
            .insert(shop_id.to_string());
        Ok(())
    }

    fn create_queue_entry(
        &self,
        event_id: &str,
        event_date_id: &str,
    ) -> Result<BatchQueueEntry, FateError> {
        let mut state = self.state();
        state.check(Operation::CreateQueueEntry)?;

        let entry = BatchQueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            event_date_id: event_date_id.to_string(),
            status: QueueStatus::Pending,
            requested_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            error_message: None,
            batch_id: None,
        };
        state.queue.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    fn get_queue_entry(&self, id: &str) -> Result<Option<BatchQueueEntry>, FateError> {
        Ok(self.state().queue.get(id).cloned())
    }

    fn mark_queue_processing(
        &self,
        id: &str,
        batch_id: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError> {
        let mut state = self.state();
        state.check(Operation::MarkQueueProcessing)?;
        let entry = state.queue_entry_mut(id)?;
        entry.status = QueueStatus::Processing;
        entry.batch_id = Some(batch_id.to_string());
        entry.processed_at = Some(at);
        Ok(entry.clone())
    }

    fn mark_queue_completed(
        &self,
        id: &str,
        batch_id: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError> {
        let mut state = self.state();
        state.check(Operation::MarkQueueCompleted)?;
        let entry = state.queue_entry_mut(id)?;
        entry.status = QueueStatus::Completed;
        entry.batch_id = Some(batch_id.to_string());
        entry.processed_at = Some(at);
        entry.completed_at = Some(at);
        Ok(entry.clone())
    }

    fn mark_queue_error(
        &self,
        id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<BatchQueueEntry, FateError> {
        let mut state = self.state();
        state.check(Operation::MarkQueueError)?;
        let entry = state.queue_entry_mut(id)?;
        entry.status = QueueStatus::Error;
        entry.error_message = Some(message.to_string());
        entry.processed_at = Some(at);
        Ok(entry.clone())
    }

    fn create_batch(&self, batch: &NewFateBatch) -> Result<FateBatch, FateError> {
        let mut state = self.state();
        state.check(Operation::CreateBatch)?;

        let created = FateBatch {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: batch.event_id.clone(),
            event_date_id: batch.event_date_id.clone(),
            batch_size: batch.batch_size,
            status: FateStatus::Pending,
            created_at: Utc::now(),
            activated_at: None,
        };
        let seq = state.next_batch_seq;
        state.next_batch_seq += 1;
        state
            .batches
            .insert(created.id.clone(), (created.clone(), seq));
        Ok(created)
    }

    fn get_batch(&self, id: &str) -> Result<Option<FateBatch>, FateError> {
        Ok(self.state().batches.get(id).map(|(b, _)| b.clone()))
    }

    fn activate_batch(
        &self,
        id: &str,
        at: DateTime<Utc>,
        _role: &ServiceRole,
    ) -> Result<FateBatch, FateError> {
        let mut state = self.state();
        state.check(Operation::ActivateBatch)?;

        let (batch, _) = state
            .batches
            .get_mut(id)
            .ok_or_else(|| FateError::not_found("batch", id))?;
        if batch.status == FateStatus::Active {
            return Err(FateError::InvalidState {
                entity: "batch",
                id: id.to_string(),
                operation: "activate",
                reason: "already active".to_string(),
            });
        }
        batch.status = FateStatus::Active;
        batch.activated_at = Some(at);
        Ok(batch.clone())
    }

    fn insert_tickets(
        &self,
        tickets: &[NewFateTicket],
        _role: &ServiceRole,
    ) -> Result<Vec<FateTicket>, FateError> {
        let mut state = self.state();
        state.check(Operation::InsertTickets)?;

        let now = Utc::now();
        let created: Vec<FateTicket> = tickets
            .iter()
            .map(|t| FateTicket {
                id: uuid::Uuid::new_v4().to_string(),
                batch_id: t.batch_id.clone(),
                shop_id: t.shop_id.clone(),
                event_id: t.event_id.clone(),
                event_date_id: t.event_date_id.clone(),
                status: FateStatus::Pending,
                fate_position: None,
                is_drawn: false,
                drawn_at: None,
                drawn_by: None,
                created_at: now,
                deleted_at: None,
            })
            .collect();
        state.tickets.extend(created.iter().cloned());
        Ok(created)
    }

    fn activate_tickets(
        &self,
        positions: &[(String, u32)],
        _role: &ServiceRole,
    ) -> Result<usize, FateError> {
        let mut state = self.state();
        state.check(Operation::ActivateTickets)?;

        let index: HashMap<&str, usize> = state
            .tickets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();

        let mut updates = Vec::with_capacity(positions.len());
        for (id, position) in positions {
            let slot = index
                .get(id.as_str())
                .copied()
                .filter(|&i| {
                    let t = &state.tickets[i];
                    t.status == FateStatus::Pending && !t.is_deleted()
                })
                .ok_or_else(|| FateError::InvalidState {
                    entity: "ticket",
                    id: id.clone(),
                    operation: "activate",
                    reason: "missing, deleted or already active".to_string(),
                })?;
            updates.push((slot, *position));
        }

        for (slot, position) in &updates {
            let ticket = &mut state.tickets[*slot];
            ticket.fate_position = Some(*position);
            ticket.status = FateStatus::Active;
        }
        Ok(updates.len())
    }

    fn soft_delete_tickets(
        &self,
        ids: &[String],
        at: DateTime<Utc>,
        _role: &ServiceRole,
    ) -> Result<usize, FateError> {
        let mut state = self.state();
        state.check(Operation::SoftDeleteTickets)?;

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut deleted = 0;
        for ticket in state.tickets.iter_mut() {
            if wanted.contains(ticket.id.as_str()) && !ticket.is_deleted() {
                ticket.deleted_at = Some(at);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn draw_next_ticket(
        &self,
        event_date_id: &str,
        drawn_by: &str,
        at: DateTime<Utc>,
        _role: &ServiceRole,
    ) -> Result<Option<FateTicket>, FateError> {
        let mut state = self.state();
        state.check(Operation::DrawNextTicket)?;

        let next = state
            .tickets
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.event_date_id == event_date_id
                    && t.is_drawable()
                    && state.batch_active(&t.batch_id)
            })
            .min_by(|(_, a), (_, b)| state.sort_key(a).cmp(&state.sort_key(b)))
            .map(|(i, _)| i);

        let Some(slot) = next else {
            return Ok(None);
        };

        let ticket = &mut state.tickets[slot];
        ticket.is_drawn = true;
        ticket.drawn_at = Some(at);
        ticket.drawn_by = Some(drawn_by.to_string());
        Ok(Some(ticket.clone()))
    }

    fn get_ticket(&self, id: &str) -> Result<Option<FateTicket>, FateError> {
        Ok(self.state().tickets.iter().find(|t| t.id == id).cloned())
    }

    fn list_tickets(&self, filter: &FateTicketFilter) -> Result<Vec<FateTicket>, FateError> {
        let mut state = self.state();
        state.check(Operation::ListTickets)?;

        Ok(state
            .sorted_matching(filter)
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    fn count_tickets(&self, filter: &FateTicketFilter) -> Result<i64, FateError> {
        let mut state = self.state();
        state.check(Operation::CountTickets)?;
        Ok(state
            .tickets
            .iter()
            .filter(|t| state.visible(filter, t))
            .count() as i64)
    }
}
