//! Ledger rows and the store they are upserted into.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use zkvault_common::{FieldElement, ZkVaultError};

use crate::events::EventKind;

pub const DEFAULT_LEDGER_DB_PATH: &str = "data/ledger";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("ledger backend error: {0}")]
    Backend(String),
    #[error("corrupt ledger row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
    #[error("ledger store lock poisoned")]
    Poisoned,
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<StoreError> for ZkVaultError {
    fn from(err: StoreError) -> Self {
        ZkVaultError::StoreWriteFailed(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROWS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositedRow {
    pub amount: String,
    pub username_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_time: String,
    pub block_number: String,
    pub from_address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidRow {
    pub amount: String,
    pub from_username_hash: String,
    pub to_username_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_time: String,
    pub block_number: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawnRow {
    pub amount: String,
    pub from_username_hash: String,
    pub to_address: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_time: String,
    pub block_number: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredRow {
    pub username_hash: String,
    pub credential_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_time: String,
    pub block_number: String,
}

/// One mirrored vault event. Serialized with a `kind` tag so history
/// entries of different tables can share a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Deposited(DepositedRow),
    Paid(PaidRow),
    Withdrawn(WithdrawnRow),
    Registered(RegisteredRow),
}

/// `(kind, tx_hash, log_index)`; the hash is compared case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub kind: EventKind,
    pub tx_hash: String,
    pub log_index: u64,
}

impl NaturalKey {
    pub fn new(kind: EventKind, tx_hash: &str, log_index: u64) -> Self {
        Self {
            kind,
            tx_hash: tx_hash.to_ascii_lowercase(),
            log_index,
        }
    }

    /// Key within the kind's tree.
    fn storage_key(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.tx_hash.len() + 8);
        buf.extend_from_slice(self.tx_hash.as_bytes());
        buf.extend_from_slice(&self.log_index.to_be_bytes());
        buf
    }
}

impl LedgerRecord {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerRecord::Deposited(_) => EventKind::Deposited,
            LedgerRecord::Paid(_) => EventKind::Paid,
            LedgerRecord::Withdrawn(_) => EventKind::Withdrawn,
            LedgerRecord::Registered(_) => EventKind::Registered,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            LedgerRecord::Deposited(row) => &row.tx_hash,
            LedgerRecord::Paid(row) => &row.tx_hash,
            LedgerRecord::Withdrawn(row) => &row.tx_hash,
            LedgerRecord::Registered(row) => &row.tx_hash,
        }
    }

    pub fn log_index(&self) -> u64 {
        match self {
            LedgerRecord::Deposited(row) => row.log_index,
            LedgerRecord::Paid(row) => row.log_index,
            LedgerRecord::Withdrawn(row) => row.log_index,
            LedgerRecord::Registered(row) => row.log_index,
        }
    }

    pub fn block_number(&self) -> Result<U256, StoreError> {
        let raw = match self {
            LedgerRecord::Deposited(row) => &row.block_number,
            LedgerRecord::Paid(row) => &row.block_number,
            LedgerRecord::Withdrawn(row) => &row.block_number,
            LedgerRecord::Registered(row) => &row.block_number,
        };
        U256::from_dec_str(raw).map_err(|e| StoreError::Corrupt {
            table: self.kind().table(),
            reason: format!("block_number {raw:?}: {e}"),
        })
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.kind(), self.tx_hash(), self.log_index())
    }

    /// Identity hashes (decimal) named by the row's identity columns,
    /// without repeats.
    pub fn identities(&self) -> Vec<&str> {
        match self {
            LedgerRecord::Deposited(row) => vec![row.username_hash.as_str()],
            LedgerRecord::Paid(row) if row.from_username_hash == row.to_username_hash => {
                vec![row.from_username_hash.as_str()]
            }
            LedgerRecord::Paid(row) => vec![
                row.from_username_hash.as_str(),
                row.to_username_hash.as_str(),
            ],
            LedgerRecord::Withdrawn(row) => vec![row.from_username_hash.as_str()],
            LedgerRecord::Registered(row) => vec![row.username_hash.as_str()],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only event mirror with idempotent writes.
///
/// `upsert` is the only write. It keeps an identity index current, so the
/// read models only visit rows of the identity asked about.
pub trait Ledger: Send + Sync {
    /// Insert the row, or replace the row sharing its natural key.
    fn upsert(&self, record: LedgerRecord) -> Result<UpsertOutcome, StoreError>;

    /// Every row of one kind.
    fn records(&self, kind: EventKind) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Rows of one kind whose identity columns name `identity`.
    fn records_for(
        &self,
        identity: &FieldElement,
        kind: EventKind,
    ) -> Result<Vec<LedgerRecord>, StoreError>;

    fn is_registered(&self, identity: &FieldElement) -> Result<bool, StoreError> {
        Ok(!self.records_for(identity, EventKind::Registered)?.is_empty())
    }

    /// Deposits plus payments received, minus payments sent and withdrawals.
    ///
    /// `None` when the identity has no ledger rows at all. A mirror that has
    /// seen more debits than credits reports zero.
    fn balance(&self, identity: &FieldElement) -> Result<Option<U256>, StoreError> {
        let decimal = identity.to_string();
        let mut present = false;
        let mut credits = U256::zero();
        let mut debits = U256::zero();

        for kind in EventKind::ALL {
            for record in self.records_for(identity, kind)? {
                present = true;
                match &record {
                    LedgerRecord::Deposited(row) => {
                        credits = credits.saturating_add(amount(&row.amount, kind)?)
                    }
                    LedgerRecord::Paid(row) => {
                        let value = amount(&row.amount, kind)?;
                        if row.to_username_hash == decimal {
                            credits = credits.saturating_add(value);
                        }
                        if row.from_username_hash == decimal {
                            debits = debits.saturating_add(value);
                        }
                    }
                    LedgerRecord::Withdrawn(row) => {
                        debits = debits.saturating_add(amount(&row.amount, kind)?)
                    }
                    LedgerRecord::Registered(_) => {}
                }
            }
        }

        Ok(present.then(|| credits.saturating_sub(debits)))
    }

    /// Every row touching the identity, newest block first.
    fn history(&self, identity: &FieldElement) -> Result<Vec<LedgerRecord>, StoreError> {
        let mut rows = Vec::new();
        for kind in EventKind::ALL {
            for record in self.records_for(identity, kind)? {
                rows.push((record.block_number()?, record.log_index(), record));
            }
        }
        rows.sort_by_key(|(block, log_index, _)| Reverse((*block, *log_index)));
        Ok(rows.into_iter().map(|(_, _, record)| record).collect())
    }
}

fn amount(raw: &str, kind: EventKind) -> Result<U256, StoreError> {
    U256::from_dec_str(raw).map_err(|e| StoreError::Corrupt {
        table: kind.table(),
        reason: format!("amount {raw:?}: {e}"),
    })
}

/// Sled tree holding `identity ‖ 0 ‖ table ‖ 0 ‖ row key → row key`.
const IDENTITY_INDEX: &str = "index_identity";

fn index_prefix(identity: &str, kind: EventKind) -> Vec<u8> {
    let table = kind.table();
    let mut buf = Vec::with_capacity(identity.len() + table.len() + 2);
    buf.extend_from_slice(identity.as_bytes());
    buf.push(0);
    buf.extend_from_slice(table.as_bytes());
    buf.push(0);
    buf
}

fn index_entries(record: &LedgerRecord, row_key: &[u8]) -> Vec<Vec<u8>> {
    record
        .identities()
        .into_iter()
        .map(|identity| {
            let mut entry = index_prefix(identity, record.kind());
            entry.extend_from_slice(row_key);
            entry
        })
        .collect()
}

fn decode_row(table: &'static str, value: &[u8]) -> Result<LedgerRecord, StoreError> {
    serde_json::from_slice(value).map_err(|e| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

#[derive(Clone)]
pub struct LedgerStore {
    backend: Arc<LedgerBackend>,
}

enum LedgerBackend {
    InMemory(Mutex<MemoryTables>),
    Persistent(sled::Db),
}

#[derive(Default)]
struct MemoryTables {
    rows: BTreeMap<NaturalKey, LedgerRecord>,
    by_identity: BTreeSet<(String, NaturalKey)>,
}

impl MemoryTables {
    fn upsert(&mut self, record: LedgerRecord) -> bool {
        let key = record.key();
        for identity in record.identities() {
            self.by_identity.insert((identity.to_string(), key.clone()));
        }
        let previous = self.rows.insert(key.clone(), record);
        if let Some(previous) = &previous {
            let current = &self.rows[&key];
            for identity in previous.identities() {
                if !current.identities().contains(&identity) {
                    self.by_identity.remove(&(identity.to_string(), key.clone()));
                }
            }
        }
        previous.is_some()
    }

    fn records_for(&self, identity: String, kind: EventKind) -> Vec<LedgerRecord> {
        let lower = (identity, NaturalKey::new(kind, "", 0));
        self.by_identity
            .range(lower.clone()..)
            .take_while(|(id, key)| *id == lower.0 && key.kind == kind)
            .filter_map(|(_, key)| self.rows.get(key).cloned())
            .collect()
    }
}

impl LedgerStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(LedgerBackend::InMemory(Mutex::new(MemoryTables::default()))),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StoreError::Backend(format!(
                        "failed to create directory for ledger db at {}: {err}",
                        path.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path).map_err(|err| {
            StoreError::Backend(format!("failed to open ledger db at {}: {err}", path.display()))
        })?;
        Ok(Self::from_db(db))
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self {
            backend: Arc::new(LedgerBackend::Persistent(db)),
        }
    }
}

impl Ledger for LedgerStore {
    fn upsert(&self, record: LedgerRecord) -> Result<UpsertOutcome, StoreError> {
        let previous = match &*self.backend {
            LedgerBackend::InMemory(tables) => tables
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .upsert(record),
            LedgerBackend::Persistent(db) => {
                let key = record.key();
                let table = key.kind.table();
                let row_key = key.storage_key();
                let value = serde_json::to_vec(&record).map_err(|e| StoreError::Corrupt {
                    table,
                    reason: e.to_string(),
                })?;
                let entries = index_entries(&record, &row_key);

                let rows = db.open_tree(table)?;
                let index = db.open_tree(IDENTITY_INDEX)?;
                (&rows, &index)
                    .transaction(
                        |(rows, index)| -> ConflictableTransactionResult<bool, StoreError> {
                            let previous = rows.insert(row_key.as_slice(), value.as_slice())?;
                            if let Some(previous) = &previous {
                                let previous = decode_row(table, previous)
                                    .map_err(ConflictableTransactionError::Abort)?;
                                for entry in index_entries(&previous, &row_key) {
                                    index.remove(entry)?;
                                }
                            }
                            for entry in &entries {
                                index.insert(entry.as_slice(), row_key.as_slice())?;
                            }
                            Ok(previous.is_some())
                        },
                    )
                    .map_err(|err| match err {
                        TransactionError::Abort(err) => err,
                        TransactionError::Storage(err) => err.into(),
                    })?
            }
        };

        Ok(if previous {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn records(&self, kind: EventKind) -> Result<Vec<LedgerRecord>, StoreError> {
        match &*self.backend {
            LedgerBackend::InMemory(tables) => Ok(tables
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .rows
                .iter()
                .filter(|(key, _)| key.kind == kind)
                .map(|(_, record)| record.clone())
                .collect()),
            LedgerBackend::Persistent(db) => db
                .open_tree(kind.table())?
                .iter()
                .values()
                .map(|value| decode_row(kind.table(), &value?))
                .collect(),
        }
    }

    fn records_for(
        &self,
        identity: &FieldElement,
        kind: EventKind,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let identity = identity.to_string();
        match &*self.backend {
            LedgerBackend::InMemory(tables) => Ok(tables
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .records_for(identity, kind)),
            LedgerBackend::Persistent(db) => {
                let rows = db.open_tree(kind.table())?;
                db.open_tree(IDENTITY_INDEX)?
                    .scan_prefix(index_prefix(&identity, kind))
                    .values()
                    .map(|row_key| {
                        let row_key = row_key?;
                        let value = rows.get(&row_key)?.ok_or_else(|| StoreError::Corrupt {
                            table: kind.table(),
                            reason: "identity index points at a missing row".into(),
                        })?;
                        decode_row(kind.table(), &value)
                    })
                    .collect()
            }
        }
    }
}
