//! zkvault-ledger
//!
//! Off-chain mirror of vault events.
//!
//! Webhook batches of raw logs are decoded against the vault's event ABI,
//! enriched with block time (and the sender for deposits), and upserted into
//! one table per event kind under the natural key
//! `(kind, tx_hash, log_index)`. Redelivering a log, in any order and any
//! number of times, leaves exactly one row behind.
//!
//! Balance and history read models are derived from the same rows.

pub mod chain;
pub mod events;
pub mod ingest;
pub mod reconcile;
pub mod store;

pub use chain::{ChainError, ChainReader, RpcChainReader};
pub use events::{decode, DecodeError, Decoded, EventKind, VaultEvent};
pub use ingest::{IngestError, IngestReport, WebhookIngestor};
pub use reconcile::{row_for, EventContext, LedgerReconciler, ReconcileError};
pub use store::{
    DepositedRow, Ledger, LedgerRecord, LedgerStore, NaturalKey, PaidRow, RegisteredRow,
    StoreError, UpsertOutcome, WithdrawnRow, DEFAULT_LEDGER_DB_PATH,
};
