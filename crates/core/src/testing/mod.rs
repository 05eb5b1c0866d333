//! Testing utilities: an in-memory fate store and catalog fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use fateticket_core::testing::{fixtures, InMemoryFateStore, Operation};
//!
//! let store = InMemoryFateStore::new();
//! fixtures::seed_catalog(&store, &["shop-a", "shop-b"])?;
//! store.fail_on(Operation::InsertTickets);
//! ```

mod memory_store;

pub use memory_store::{InMemoryFateStore, Operation};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{NaiveDate, Utc};

    use crate::fate::{
        Event, EventDate, FateError, FateStore, GenerateBatchRequest, Shop, ShopWeight,
    };

    pub const EVENT_ID: &str = "event-spring-market";
    pub const EVENT_DATE_ID: &str = "date-spring-market-day-1";

    pub fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            name: "Spring Market".to_string(),
            deleted_at: None,
        }
    }

    pub fn event_date(id: &str, event_id: &str) -> EventDate {
        EventDate {
            id: id.to_string(),
            event_id: event_id.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, 18).unwrap_or_default(),
            deleted_at: None,
        }
    }

    pub fn shop(id: &str) -> Shop {
        Shop {
            id: id.to_string(),
            name: format!("Shop {}", id),
            deleted_at: None,
        }
    }

    pub fn deleted_shop(id: &str) -> Shop {
        Shop {
            deleted_at: Some(Utc::now()),
            ..shop(id)
        }
    }

    /// Seed [`EVENT_ID`] / [`EVENT_DATE_ID`] with the given shops, all attending.
    pub fn seed_catalog<S: FateStore + ?Sized>(
        store: &S,
        shop_ids: &[&str],
    ) -> Result<(), FateError> {
        store.put_event(&event(EVENT_ID))?;
        store.put_event_date(&event_date(EVENT_DATE_ID, EVENT_ID))?;
        for id in shop_ids {
            store.put_shop(&shop(id))?;
            store.register_attendance(EVENT_DATE_ID, id)?;
        }
        Ok(())
    }

    /// A generation request for the seeded event date.
    pub fn request(weights: &[(&str, u32)]) -> GenerateBatchRequest {
        GenerateBatchRequest {
            event_id: EVENT_ID.to_string(),
            event_date_id: EVENT_DATE_ID.to_string(),
            shops: weights
                .iter()
                .map(|(id, ratio)| ShopWeight {
                    id: id.to_string(),
                    destiny_ratio: i64::from(*ratio),
                })
                .collect(),
        }
    }
}
