//! Vault event decoding.
//!
//! Only the four events the ledger mirrors are decoded. Everything else the
//! vault proxy emits (upgrades, role changes, initialization) comes back as
//! [`Decoded::Unrecognized`].

use ethers::abi::{self, Abi, RawLog, Token};
use ethers::types::{Address, Log, H256, U256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const VAULT_EVENTS: [&str; 4] = [
    "event Deposited(uint256 indexed usernameHash, uint256 amount)",
    "event Paid(uint256 indexed fromUsernameHash, uint256 indexed toUsernameHash, uint256 amount)",
    "event Withdrawn(uint256 indexed fromUsernameHash, address indexed toUserAddress, uint256 amount)",
    "event Registered(uint256 indexed usernameHash, uint256 credentialHash)",
];

static VAULT_ABI: Lazy<Abi> =
    Lazy::new(|| abi::parse_abi(&VAULT_EVENTS).expect("vault event ABI is valid"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed {event} log: {reason}")]
    Malformed { event: EventKind, reason: String },
    #[error("{event} log is missing field {field}")]
    MissingField { event: EventKind, field: &'static str },
}

/// Event kinds mirrored into the ledger; one table each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Deposited,
    Paid,
    Withdrawn,
    Registered,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Deposited,
        EventKind::Paid,
        EventKind::Withdrawn,
        EventKind::Registered,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Deposited => "Deposited",
            EventKind::Paid => "Paid",
            EventKind::Withdrawn => "Withdrawn",
            EventKind::Registered => "Registered",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EventKind::Deposited => "event_deposited",
            EventKind::Paid => "event_paid",
            EventKind::Withdrawn => "event_withdrawn",
            EventKind::Registered => "event_registered",
        }
    }

    /// Topic 0 of logs of this kind.
    pub fn topic(&self) -> H256 {
        abi_event(*self).signature()
    }

    fn from_topic(topic: &H256) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == *topic)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn abi_event(kind: EventKind) -> &'static abi::Event {
    // Every kind has exactly one entry in VAULT_EVENTS.
    &VAULT_ABI.events[kind.name()][0]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultEvent {
    Deposited {
        username_hash: U256,
        amount: U256,
    },
    Paid {
        from_username_hash: U256,
        to_username_hash: U256,
        amount: U256,
    },
    Withdrawn {
        from_username_hash: U256,
        to_address: Address,
        amount: U256,
    },
    Registered {
        username_hash: U256,
        credential_hash: U256,
    },
}

impl VaultEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            VaultEvent::Deposited { .. } => EventKind::Deposited,
            VaultEvent::Paid { .. } => EventKind::Paid,
            VaultEvent::Withdrawn { .. } => EventKind::Withdrawn,
            VaultEvent::Registered { .. } => EventKind::Registered,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Event(VaultEvent),
    /// Not an event the ledger mirrors; skip it.
    Unrecognized,
}

pub fn decode(log: &Log) -> Result<Decoded, DecodeError> {
    decode_raw(&log.topics, &log.data)
}

pub fn decode_raw(topics: &[H256], data: &[u8]) -> Result<Decoded, DecodeError> {
    let Some(kind) = topics.first().and_then(EventKind::from_topic) else {
        return Ok(Decoded::Unrecognized);
    };

    let parsed = abi_event(kind)
        .parse_log(RawLog {
            topics: topics.to_vec(),
            data: data.to_vec(),
        })
        .map_err(|e| DecodeError::Malformed {
            event: kind,
            reason: e.to_string(),
        })?;

    let fields = Fields {
        kind,
        params: parsed.params,
    };

    let event = match kind {
        EventKind::Deposited => VaultEvent::Deposited {
            username_hash: fields.uint("usernameHash")?,
            amount: fields.uint("amount")?,
        },
        EventKind::Paid => VaultEvent::Paid {
            from_username_hash: fields.uint("fromUsernameHash")?,
            to_username_hash: fields.uint("toUsernameHash")?,
            amount: fields.uint("amount")?,
        },
        EventKind::Withdrawn => VaultEvent::Withdrawn {
            from_username_hash: fields.uint("fromUsernameHash")?,
            to_address: fields.address("toUserAddress")?,
            amount: fields.uint("amount")?,
        },
        EventKind::Registered => VaultEvent::Registered {
            username_hash: fields.uint("usernameHash")?,
            credential_hash: fields.uint("credentialHash")?,
        },
    };

    Ok(Decoded::Event(event))
}

struct Fields {
    kind: EventKind,
    params: Vec<abi::LogParam>,
}

impl Fields {
    fn token(&self, field: &'static str) -> Result<&Token, DecodeError> {
        self.params
            .iter()
            .find(|p| p.name == field)
            .map(|p| &p.value)
            .ok_or(DecodeError::MissingField {
                event: self.kind,
                field,
            })
    }

    fn uint(&self, field: &'static str) -> Result<U256, DecodeError> {
        match self.token(field)? {
            Token::Uint(value) => Ok(*value),
            other => Err(self.unexpected(field, other)),
        }
    }

    fn address(&self, field: &'static str) -> Result<Address, DecodeError> {
        match self.token(field)? {
            Token::Address(value) => Ok(*value),
            other => Err(self.unexpected(field, other)),
        }
    }

    fn unexpected(&self, field: &str, token: &Token) -> DecodeError {
        DecodeError::Malformed {
            event: self.kind,
            reason: format!("{field} has unexpected type: {token:?}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::utils::keccak256;

    pub(crate) fn word(value: U256) -> H256 {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        H256(bytes)
    }

    pub(crate) fn deposited_log(username_hash: U256, amount: U256) -> (Vec<H256>, Vec<u8>) {
        (
            vec![EventKind::Deposited.topic(), word(username_hash)],
            abi::encode(&[Token::Uint(amount)]),
        )
    }

    #[test]
    fn topics_match_event_signatures() {
        assert_eq!(
            EventKind::Deposited.topic(),
            H256(keccak256("Deposited(uint256,uint256)"))
        );
        assert_eq!(
            EventKind::Withdrawn.topic(),
            H256(keccak256("Withdrawn(uint256,address,uint256)"))
        );
    }

    #[test]
    fn decodes_deposited() {
        let (topics, data) = deposited_log(U256::from(77u64), U256::from(1_000_000u64));
        let decoded = decode_raw(&topics, &data).unwrap();
        assert_eq!(
            decoded,
            Decoded::Event(VaultEvent::Deposited {
                username_hash: U256::from(77u64),
                amount: U256::from(1_000_000u64),
            })
        );
    }

    #[test]
    fn decodes_paid_with_two_indexed_hashes() {
        let topics = vec![
            EventKind::Paid.topic(),
            word(U256::from(1u64)),
            word(U256::from(2u64)),
        ];
        let data = abi::encode(&[Token::Uint(U256::from(50u64))]);
        let Decoded::Event(event) = decode_raw(&topics, &data).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(
            event,
            VaultEvent::Paid {
                from_username_hash: U256::from(1u64),
                to_username_hash: U256::from(2u64),
                amount: U256::from(50u64),
            }
        );
    }

    #[test]
    fn decodes_withdrawn_recipient_address() {
        let recipient = Address::repeat_byte(0xab);
        let topics = vec![
            EventKind::Withdrawn.topic(),
            word(U256::from(9u64)),
            H256::from(recipient),
        ];
        let data = abi::encode(&[Token::Uint(U256::from(3u64))]);
        let Decoded::Event(VaultEvent::Withdrawn { to_address, .. }) =
            decode_raw(&topics, &data).unwrap()
        else {
            panic!("expected withdrawal");
        };
        assert_eq!(to_address, recipient);
    }

    #[test]
    fn decodes_registered() {
        let topics = vec![EventKind::Registered.topic(), word(U256::from(5u64))];
        let data = abi::encode(&[Token::Uint(U256::from(6u64))]);
        let decoded = decode_raw(&topics, &data).unwrap();
        assert_eq!(
            decoded,
            Decoded::Event(VaultEvent::Registered {
                username_hash: U256::from(5u64),
                credential_hash: U256::from(6u64),
            })
        );
    }

    #[test]
    fn admin_events_are_unrecognized() {
        // RoleGranted(bytes32,address,address)
        let role_granted = H256(keccak256("RoleGranted(bytes32,address,address)"));
        assert_eq!(
            decode_raw(&[role_granted], &[]).unwrap(),
            Decoded::Unrecognized
        );
        assert_eq!(decode_raw(&[], &[]).unwrap(), Decoded::Unrecognized);
    }

    #[test]
    fn truncated_body_is_malformed() {
        let topics = vec![EventKind::Deposited.topic(), word(U256::one())];
        let err = decode_raw(&topics, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { event: EventKind::Deposited, .. }));
    }

    #[test]
    fn tables_follow_kind() {
        assert_eq!(EventKind::Paid.table(), "event_paid");
        assert_eq!(EventKind::Registered.to_string(), "Registered");
    }
}
