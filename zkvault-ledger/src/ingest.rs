//! Webhook batch ingestion.
//!
//! Logs are handled one at a time in delivery order. A failing log is
//! counted and logged, and the batch carries on.

use ethers::types::{Address, Log};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::{ChainError, ChainReader};
use crate::events::{self, DecodeError, Decoded, VaultEvent};
use crate::reconcile::{EventContext, LedgerReconciler, ReconcileError};
use crate::store::UpsertOutcome;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unparseable log: {0}")]
    Parse(String),
    #[error("log is missing {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Per-batch counts. `received == applied + skipped + failed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum LogOutcome {
    Applied(UpsertOutcome),
    Skipped(&'static str),
}

pub struct WebhookIngestor {
    chain: Arc<dyn ChainReader>,
    reconciler: LedgerReconciler,
    vault: Address,
}

impl WebhookIngestor {
    pub fn new(chain: Arc<dyn ChainReader>, reconciler: LedgerReconciler, vault: Address) -> Self {
        Self {
            chain,
            reconciler,
            vault,
        }
    }

    /// Ingests one delivery. Entries may be log objects or arrays of them
    /// (providers that group logs per block).
    pub async fn ingest(&self, batch: Vec<Value>) -> IngestReport {
        let entries = flatten(batch);
        let mut report = IngestReport {
            received: entries.len(),
            ..Default::default()
        };
        let mut timestamps = HashMap::new();

        for (position, entry) in entries.into_iter().enumerate() {
            match self.ingest_one(entry, &mut timestamps).await {
                Ok(LogOutcome::Applied(outcome)) => {
                    report.applied += 1;
                    debug!(position, ?outcome, "log applied");
                }
                Ok(LogOutcome::Skipped(reason)) => {
                    report.skipped += 1;
                    debug!(position, reason, "log skipped");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(position, error = %err, "log failed");
                }
            }
        }

        info!(
            received = report.received,
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "webhook batch ingested"
        );
        report
    }

    async fn ingest_one(
        &self,
        entry: Value,
        timestamps: &mut HashMap<u64, u64>,
    ) -> Result<LogOutcome, IngestError> {
        let log: Log = serde_json::from_value(entry).map_err(|e| IngestError::Parse(e.to_string()))?;
        if log.address != self.vault {
            return Ok(LogOutcome::Skipped("foreign address"));
        }

        let event = match events::decode(&log)? {
            Decoded::Event(event) => event,
            Decoded::Unrecognized => return Ok(LogOutcome::Skipped("unrecognized event")),
        };

        let tx_hash = log
            .transaction_hash
            .ok_or(IngestError::MissingField("transactionHash"))?;
        let log_index = log.log_index.ok_or(IngestError::MissingField("logIndex"))?;
        let block_number = log
            .block_number
            .ok_or(IngestError::MissingField("blockNumber"))?
            .as_u64();

        let block_time = match timestamps.get(&block_number) {
            Some(timestamp) => *timestamp,
            None => {
                let timestamp = self.chain.block_timestamp(block_number).await?;
                timestamps.insert(block_number, timestamp);
                timestamp
            }
        };

        let tx_from = match event {
            VaultEvent::Deposited { .. } => Some(self.chain.transaction_sender(tx_hash).await?),
            _ => None,
        };

        let ctx = EventContext {
            tx_hash: format!("{tx_hash:#x}"),
            log_index: log_index.low_u64(),
            block_number,
            block_time,
            tx_from,
        };

        let outcome = self.reconciler.reconcile(&event, &ctx)?;
        info!(
            kind = %event.kind(),
            tx_hash = %ctx.tx_hash,
            log_index = ctx.log_index,
            block_number,
            "ledger row upserted"
        );
        Ok(LogOutcome::Applied(outcome))
    }
}

fn flatten(batch: Vec<Value>) -> Vec<Value> {
    batch
        .into_iter()
        .flat_map(|entry| match entry {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}
