//! Batch generation: turns a weighted shop list into an active, shuffled
//! batch of fate tickets for one event date.
//!
//! Every run is tracked by a queue entry. Once the entry exists, any failure
//! marks it `error` before the error is returned.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::allocation::{allocate, total_weight};
use super::shuffle::{adjacent_repeats, arrange_non_adjacent};
use super::store::{FateError, FateStore, ServiceRole};
use super::types::{FateTicket, NewFateBatch, NewFateTicket, VendorWeight};
use crate::config::FateConfig;
use crate::metrics;

/// One shop and its share of the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShopWeight {
    pub id: String,
    /// Relative share, validated against `fate.max_weight`. Signed so that
    /// negative input is reported as an invalid request.
    pub destiny_ratio: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateBatchRequest {
    pub event_id: String,
    pub event_date_id: String,
    pub shops: Vec<ShopWeight>,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationReport {
    pub queue_id: String,
    pub batch_id: String,
    pub ticket_count: u32,
    pub event_id: String,
    pub event_date_id: String,
}

/// Stage of a generation run, for logs, errors and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Request,
    Enqueue,
    Validate,
    CreateBatch,
    GenerateTickets,
    Activate,
    Complete,
}

impl GenerationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPhase::Request => "request",
            GenerationPhase::Enqueue => "enqueue",
            GenerationPhase::Validate => "validate",
            GenerationPhase::CreateBatch => "create_batch",
            GenerationPhase::GenerateTickets => "generate_tickets",
            GenerationPhase::Activate => "activate",
            GenerationPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Malformed request, rejected before anything is written.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The valid shops' weights sum to zero.
    #[error("total weight of valid shops is zero")]
    NoValidWeight,

    #[error("store error during {phase}: {source}")]
    Store {
        phase: GenerationPhase,
        #[source]
        source: FateError,
    },
}

impl GenerationError {
    fn at(phase: GenerationPhase) -> impl Fn(FateError) -> Self {
        move |source| GenerationError::Store { phase, source }
    }

    /// Message safe to show to the caller. Store details stay internal.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::InvalidRequest(msg) | GenerationError::NotFound(msg) => msg.clone(),
            GenerationError::NoValidWeight => {
                "Total destiny ratio of valid shops must be greater than zero".to_string()
            }
            GenerationError::Store { .. } => "Failed to generate fate batch".to_string(),
        }
    }

    /// Phase the run stopped in.
    pub fn phase(&self) -> GenerationPhase {
        match self {
            GenerationError::InvalidRequest(_) => GenerationPhase::Request,
            GenerationError::NotFound(_) | GenerationError::NoValidWeight => {
                GenerationPhase::Validate
            }
            GenerationError::Store { phase, .. } => *phase,
        }
    }

    /// Metric label for the outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::InvalidRequest(_) => "invalid_request",
            GenerationError::NotFound(_) => "not_found",
            GenerationError::NoValidWeight => "no_valid_weight",
            GenerationError::Store { .. } => "store_error",
        }
    }

    /// Text persisted on the queue entry.
    fn queue_message(&self) -> String {
        match self {
            GenerationError::Store { phase, source } => {
                format!("{} ({} phase): {}", self.user_message(), phase, source)
            }
            _ => self.user_message(),
        }
    }
}

/// Orchestrates fate batch generation against a [`FateStore`].
pub struct BatchGenerator {
    store: Arc<dyn FateStore>,
    config: FateConfig,
    rng: Mutex<StdRng>,
}

impl BatchGenerator {
    pub fn new(store: Arc<dyn FateStore>, config: FateConfig) -> Self {
        Self {
            store,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Use a fixed RNG seed so arrangements are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn config(&self) -> &FateConfig {
        &self.config
    }

    /// Run the whole workflow for one request.
    pub fn generate(
        &self,
        request: &GenerateBatchRequest,
    ) -> Result<GenerationReport, GenerationError> {
        let started = Instant::now();
        let result = self.run(request);
        metrics::BATCH_GENERATION_DURATION.observe(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.kind(),
        };
        metrics::BATCHES_TOTAL.with_label_values(&[outcome]).inc();

        result
    }

    fn run(&self, request: &GenerateBatchRequest) -> Result<GenerationReport, GenerationError> {
        let requested = self.check_request(request)?;

        let entry = self
            .store
            .create_queue_entry(&request.event_id, &request.event_date_id)
            .map_err(GenerationError::at(GenerationPhase::Enqueue))
            .inspect_err(|e| {
                error!(
                    event_id = %request.event_id,
                    event_date_id = %request.event_date_id,
                    error = %e,
                    "Failed to enqueue fate batch generation"
                )
            })?;

        debug!(queue_id = %entry.id, "Fate batch generation queued");

        self.process(&entry.id, request, requested)
            .inspect_err(|e| self.record_failure(&entry.id, e))
    }

    /// Request checks; nothing has been written when these fail.
    fn check_request(
        &self,
        request: &GenerateBatchRequest,
    ) -> Result<Vec<VendorWeight>, GenerationError> {
        if request.event_id.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "event_id is required".to_string(),
            ));
        }
        if request.event_date_id.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "event_date_id is required".to_string(),
            ));
        }
        if request.shops.is_empty() {
            return Err(GenerationError::InvalidRequest(
                "At least one shop is required".to_string(),
            ));
        }

        let max = self.config.max_weight;
        let mut seen = HashSet::new();
        let mut weights = Vec::with_capacity(request.shops.len());
        let mut total: u32 = 0;

        for shop in &request.shops {
            if shop.id.trim().is_empty() {
                return Err(GenerationError::InvalidRequest(
                    "Shop id is required".to_string(),
                ));
            }
            if !seen.insert(shop.id.as_str()) {
                return Err(GenerationError::InvalidRequest(format!(
                    "Duplicate shop id: {}",
                    shop.id
                )));
            }
            let weight = u32::try_from(shop.destiny_ratio)
                .ok()
                .filter(|w| *w <= max)
                .ok_or_else(|| {
                    GenerationError::InvalidRequest(format!(
                        "destiny_ratio for shop {} must be between 0 and {}",
                        shop.id, max
                    ))
                })?;
            total = total.checked_add(weight).ok_or_else(|| {
                GenerationError::InvalidRequest("Total destiny_ratio is too large".to_string())
            })?;
            weights.push(VendorWeight::new(shop.id.clone(), weight));
        }

        Ok(weights)
    }

    fn process(
        &self,
        queue_id: &str,
        request: &GenerateBatchRequest,
        requested: Vec<VendorWeight>,
    ) -> Result<GenerationReport, GenerationError> {
        let vendors = self.valid_vendors(request, requested)?;
        let batch_size = total_weight(&vendors);
        debug!(queue_id, vendors = vendors.len(), batch_size, "Validated fate batch request");

        let batch = self
            .store
            .create_batch(&NewFateBatch {
                event_id: request.event_id.clone(),
                event_date_id: request.event_date_id.clone(),
                batch_size,
            })
            .map_err(GenerationError::at(GenerationPhase::CreateBatch))?;
        self.store
            .mark_queue_processing(queue_id, &batch.id, Utc::now())
            .map_err(GenerationError::at(GenerationPhase::CreateBatch))?;
        debug!(queue_id, batch_id = %batch.id, "Fate batch created");

        let role = ServiceRole::elevate();

        let stubs = allocate(&vendors).map_err(|_| GenerationError::NoValidWeight)?;
        let new_tickets: Vec<NewFateTicket> = stubs
            .into_iter()
            .map(|stub| NewFateTicket {
                batch_id: batch.id.clone(),
                shop_id: stub.shop_id,
                event_id: batch.event_id.clone(),
                event_date_id: batch.event_date_id.clone(),
            })
            .collect();
        let tickets = self
            .store
            .insert_tickets(&new_tickets, &role)
            .map_err(GenerationError::at(GenerationPhase::GenerateTickets))?;
        debug!(queue_id, batch_id = %batch.id, count = tickets.len(), "Fate tickets inserted");

        let repeats = self.position_and_activate(&tickets, &role)?;
        self.store
            .activate_batch(&batch.id, Utc::now(), &role)
            .map_err(GenerationError::at(GenerationPhase::Activate))?;
        debug!(queue_id, batch_id = %batch.id, adjacent_repeats = repeats, "Fate batch activated");

        self.store
            .mark_queue_completed(queue_id, &batch.id, Utc::now())
            .map_err(GenerationError::at(GenerationPhase::Complete))?;

        let ticket_count = tickets.len() as u32;
        metrics::TICKETS_GENERATED.inc_by(u64::from(ticket_count));

        info!(
            queue_id,
            batch_id = %batch.id,
            event_date_id = %batch.event_date_id,
            ticket_count,
            "Fate batch generated"
        );

        Ok(GenerationReport {
            queue_id: queue_id.to_string(),
            batch_id: batch.id,
            ticket_count,
            event_id: batch.event_id,
            event_date_id: batch.event_date_id,
        })
    }

    /// Requested shops that attend the date and still exist, in request order.
    fn valid_vendors(
        &self,
        request: &GenerateBatchRequest,
        requested: Vec<VendorWeight>,
    ) -> Result<Vec<VendorWeight>, GenerationError> {
        let store_err = GenerationError::at(GenerationPhase::Validate);

        let event = self
            .store
            .get_event(&request.event_id)
            .map_err(&store_err)?
            .filter(|event| !event.is_deleted())
            .ok_or_else(|| GenerationError::NotFound("Event not found".to_string()))?;

        let event_date = self
            .store
            .get_event_date(&request.event_date_id)
            .map_err(&store_err)?
            .filter(|date| !date.is_deleted() && date.event_id == event.id)
            .ok_or_else(|| {
                GenerationError::NotFound("Event date not found for this event".to_string())
            })?;

        let attending: HashSet<String> = self
            .store
            .attending_shop_ids(&event_date.id)
            .map_err(&store_err)?
            .into_iter()
            .collect();

        let mut vendors = Vec::with_capacity(requested.len());
        for vendor in requested {
            if !attending.contains(&vendor.shop_id) {
                debug!(shop_id = %vendor.shop_id, "Skipping shop not attending event date");
                continue;
            }
            match self.store.get_shop(&vendor.shop_id).map_err(&store_err)? {
                Some(shop) if !shop.is_deleted() => vendors.push(vendor),
                _ => debug!(shop_id = %vendor.shop_id, "Skipping missing or deleted shop"),
            }
        }

        if vendors.is_empty() {
            return Err(GenerationError::NotFound(
                "No valid shops found for this event date".to_string(),
            ));
        }
        if total_weight(&vendors) == 0 {
            return Err(GenerationError::NoValidWeight);
        }

        Ok(vendors)
    }

    /// Shuffle the inserted tickets and write their positions. Returns the
    /// number of same-vendor neighbours left in the arrangement.
    fn position_and_activate(
        &self,
        tickets: &[FateTicket],
        role: &ServiceRole,
    ) -> Result<usize, GenerationError> {
        let tags: Vec<&str> = tickets.iter().map(|t| t.shop_id.as_str()).collect();

        let arrangement = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            arrange_non_adjacent(&tags, &mut *rng)
        };
        if arrangement.recovered {
            metrics::SHUFFLE_RECOVERIES.inc();
        }

        let repeats = adjacent_repeats(&tags, &arrangement.order);
        if repeats > 0 {
            debug!(repeats, "Arrangement keeps some same-vendor neighbours");
        }

        let positions: Vec<(String, u32)> = arrangement
            .positions()
            .into_iter()
            .map(|(idx, position)| (tickets[idx].id.clone(), position))
            .collect();

        self.store
            .activate_tickets(&positions, role)
            .map_err(GenerationError::at(GenerationPhase::Activate))?;
        metrics::SHUFFLE_ADJACENT_REPEATS.inc_by(repeats as u64);

        Ok(repeats)
    }

    fn record_failure(&self, queue_id: &str, err: &GenerationError) {
        match err {
            GenerationError::Store { phase, source } => error!(
                queue_id,
                phase = %phase,
                error = %source,
                "Fate batch generation failed"
            ),
            _ => warn!(
                queue_id,
                phase = %err.phase(),
                reason = %err.user_message(),
                "Fate batch generation rejected"
            ),
        }

        if let Err(mark_err) = self
            .store
            .mark_queue_error(queue_id, &err.queue_message(), Utc::now())
        {
            error!(
                queue_id,
                error = %mark_err,
                "Failed to record generation error on queue entry"
            );
        }
    }
}
