//! Fate tickets: weighted vendor lottery batches for event dates.

mod allocation;
mod generator;
mod service;
mod shuffle;
mod sqlite_store;
mod store;
mod types;

pub use allocation::{allocate, total_weight, AllocationError};
pub use generator::{
    BatchGenerator, GenerateBatchRequest, GenerationError, GenerationPhase, GenerationReport,
    ShopWeight,
};
pub use service::{
    batch, delete_tickets, draw_ticket, list_active_tickets, queue_entry, DeletionReport,
    ListTicketsQuery, ServiceError, TicketPage,
};
pub use shuffle::{adjacent_repeats, arrange_non_adjacent, Arrangement};
pub use sqlite_store::SqliteFateStore;
pub use store::{FateError, FateStore, FateTicketFilter, ServiceRole};
pub use types::{
    BatchQueueEntry, Event, EventDate, FateBatch, FateStatus, FateTicket, NewFateBatch,
    NewFateTicket, QueueStatus, Shop, ShopAttendance, TicketStub, VendorWeight,
};
