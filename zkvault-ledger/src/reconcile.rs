//! Decoded events to ledger rows.

use chrono::{DateTime, SecondsFormat, Utc};
use ethers::types::Address;
use ethers::utils::to_checksum;
use std::sync::Arc;
use thiserror::Error;
use zkvault_common::ZkVaultError;

use crate::events::VaultEvent;
use crate::store::{
    DepositedRow, Ledger, LedgerRecord, PaidRow, RegisteredRow, StoreError, UpsertOutcome,
    WithdrawnRow,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("deposit in {0} has no transaction sender")]
    MissingSender(String),
    #[error("block timestamp {0} is out of range")]
    InvalidTimestamp(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ReconcileError> for ZkVaultError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Store(err) => err.into(),
            other => ZkVaultError::InvalidInput(other.to_string()),
        }
    }
}

/// Where a log sits on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    /// Block timestamp, Unix seconds.
    pub block_time: u64,
    /// Sender of the emitting transaction; required for deposits only.
    pub tx_from: Option<Address>,
}

/// `2023-11-14T22:13:20Z`
pub fn format_block_time(timestamp: u64) -> Result<String, ReconcileError> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or(ReconcileError::InvalidTimestamp(timestamp))
}

/// Builds the row for one event. Pure.
pub fn row_for(event: &VaultEvent, ctx: &EventContext) -> Result<LedgerRecord, ReconcileError> {
    let block_time = format_block_time(ctx.block_time)?;
    let tx_hash = ctx.tx_hash.clone();
    let log_index = ctx.log_index;
    let block_number = ctx.block_number.to_string();

    Ok(match event {
        VaultEvent::Deposited {
            username_hash,
            amount,
        } => {
            let sender = ctx
                .tx_from
                .ok_or_else(|| ReconcileError::MissingSender(ctx.tx_hash.clone()))?;
            LedgerRecord::Deposited(DepositedRow {
                amount: amount.to_string(),
                username_hash: username_hash.to_string(),
                tx_hash,
                log_index,
                block_time,
                block_number,
                from_address: to_checksum(&sender, None),
            })
        }
        VaultEvent::Paid {
            from_username_hash,
            to_username_hash,
            amount,
        } => LedgerRecord::Paid(PaidRow {
            amount: amount.to_string(),
            from_username_hash: from_username_hash.to_string(),
            to_username_hash: to_username_hash.to_string(),
            tx_hash,
            log_index,
            block_time,
            block_number,
        }),
        VaultEvent::Withdrawn {
            from_username_hash,
            to_address,
            amount,
        } => LedgerRecord::Withdrawn(WithdrawnRow {
            amount: amount.to_string(),
            from_username_hash: from_username_hash.to_string(),
            to_address: to_checksum(to_address, None),
            tx_hash,
            log_index,
            block_time,
            block_number,
        }),
        VaultEvent::Registered {
            username_hash,
            credential_hash,
        } => LedgerRecord::Registered(RegisteredRow {
            username_hash: username_hash.to_string(),
            credential_hash: credential_hash.to_string(),
            tx_hash,
            log_index,
            block_time,
            block_number,
        }),
    })
}

#[derive(Clone)]
pub struct LedgerReconciler {
    ledger: Arc<dyn Ledger>,
}

impl LedgerReconciler {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Upserts the event's row; repeated calls with the same input are no-ops.
    pub fn reconcile(
        &self,
        event: &VaultEvent,
        ctx: &EventContext,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let record = row_for(event, ctx)?;
        Ok(self.ledger.upsert(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::store::LedgerStore;
    use ethers::types::U256;

    fn sender() -> Address {
        "0x52908400098527886e0f7030069857d2e4169ee7".parse().unwrap()
    }

    fn deposit_ctx() -> EventContext {
        EventContext {
            tx_hash: "0xabc".into(),
            log_index: 0,
            block_number: 100,
            block_time: 1_700_000_000,
            tx_from: Some(sender()),
        }
    }

    #[test]
    fn deposited_row_matches_ledger_shape() {
        let event = VaultEvent::Deposited {
            username_hash: U256::from(12345u64),
            amount: U256::from(1_000_000u64),
        };
        let row = row_for(&event, &deposit_ctx()).unwrap();

        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["amount"], "1000000");
        assert_eq!(value["username_hash"], "12345");
        assert_eq!(value["tx_hash"], "0xabc");
        assert_eq!(value["log_index"], 0);
        assert_eq!(value["block_time"], "2023-11-14T22:13:20Z");
        assert_eq!(value["block_number"], "100");
        assert_eq!(value["from_address"], "0x52908400098527886E0F7030069857D2E4169EE7");
    }

    #[test]
    fn deposit_without_sender_fails() {
        let event = VaultEvent::Deposited {
            username_hash: U256::one(),
            amount: U256::one(),
        };
        let ctx = EventContext {
            tx_from: None,
            ..deposit_ctx()
        };
        assert!(matches!(
            row_for(&event, &ctx),
            Err(ReconcileError::MissingSender(_))
        ));
    }

    #[test]
    fn amounts_beyond_u128_stay_exact() {
        let huge = U256::MAX;
        let event = VaultEvent::Paid {
            from_username_hash: U256::one(),
            to_username_hash: U256::from(2u64),
            amount: huge,
        };
        let LedgerRecord::Paid(row) = row_for(&event, &deposit_ctx()).unwrap() else {
            panic!("expected payment row");
        };
        assert_eq!(row.amount, huge.to_string());
        assert_eq!(U256::from_dec_str(&row.amount).unwrap(), huge);
    }

    #[test]
    fn reconcile_twice_is_idempotent() {
        let store = Arc::new(LedgerStore::in_memory());
        let reconciler = LedgerReconciler::new(store.clone());
        let event = VaultEvent::Registered {
            username_hash: U256::from(7u64),
            credential_hash: U256::from(8u64),
        };

        assert_eq!(
            reconciler.reconcile(&event, &deposit_ctx()).unwrap(),
            UpsertOutcome::Inserted
        );
        let once = store.records(EventKind::Registered).unwrap();
        assert_eq!(
            reconciler.reconcile(&event, &deposit_ctx()).unwrap(),
            UpsertOutcome::Replaced
        );
        assert_eq!(store.records(EventKind::Registered).unwrap(), once);
    }

    #[test]
    fn withdrawal_recipient_is_checksummed() {
        let event = VaultEvent::Withdrawn {
            from_username_hash: U256::one(),
            to_address: sender(),
            amount: U256::from(10u64),
        };
        let LedgerRecord::Withdrawn(row) = row_for(&event, &deposit_ctx()).unwrap() else {
            panic!("expected withdrawal row");
        };
        assert_eq!(row.to_address, "0x52908400098527886E0F7030069857D2E4169EE7");
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        assert!(format_block_time(u64::MAX).is_err());
        assert_eq!(format_block_time(0).unwrap(), "1970-01-01T00:00:00Z");
    }
}
