#![allow(missing_docs)]

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoStaticStr};

use crate::utils::many_to_one;

/// Chains with a stable numeric id known to the ingester. The ids are the
/// ones emitted in every normalized event.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Debug,
    strum::Display,
    EnumString,
    IntoStaticStr,
    EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum KnownChain {
    Solana = 1,
    Ethereum = 2,
    #[strum(to_string = "bsc", serialize = "binancesmartchain")]
    Bsc = 4,
    Polygon = 5,
    Avalanche = 6,
    Algorand = 8,
    Fantom = 10,
    Celo = 14,
    Near = 15,
    Moonbeam = 16,
    Injective = 19,
    Osmosis = 20,
    Sui = 21,
    Arbitrum = 23,
    Optimism = 24,
    Base = 30,
    Sei = 32,
    Evmos = 4001,
    Kujira = 4002,
}

/// RPC protocol families. Each family is served by one chain crate.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChainProtocol {
    /// Ethereum JSON-RPC
    Evm,
    /// Solana JSON-RPC
    Solana,
    /// Sui JSON-RPC
    Sui,
    /// Tendermint JSON-RPC of Cosmos-SDK chains
    Cosmos,
    /// Near JSON-RPC
    Near,
    /// Algorand algod and indexer REST APIs
    Algorand,
}

impl KnownChain {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|c| c.id() == id)
    }

    pub const fn protocol(self) -> ChainProtocol {
        use KnownChain::*;

        many_to_one!(match self {
            ChainProtocol::Evm: [
                Ethereum, Bsc, Polygon, Avalanche, Fantom, Celo, Moonbeam, Arbitrum, Optimism, Base,
            ],
            ChainProtocol::Solana: [Solana],
            ChainProtocol::Sui: [Sui],
            ChainProtocol::Cosmos: [Injective, Osmosis, Sei, Evmos, Kujira],
            ChainProtocol::Near: [Near],
            ChainProtocol::Algorand: [Algorand],
        })
    }
}

/// Identity of a chain as used for configuration lookups and in emitted
/// events.
#[derive(Clone, Eq, PartialEq, Hash)]
pub enum ChainIdentity {
    Known(KnownChain),
    Unknown {
        id: u16,
        name: String,
        protocol: ChainProtocol,
    },
}

impl ChainIdentity {
    /// Resolve a configured chain. Known names take precedence; anything else
    /// needs an explicit id and protocol.
    pub fn from_config(
        name: &str,
        id: Option<u16>,
        protocol: Option<ChainProtocol>,
    ) -> Result<Self, ChainIdentityError> {
        match KnownChain::from_str(name) {
            Ok(known) => {
                if let Some(id) = id.filter(|id| *id != known.id()) {
                    return Err(ChainIdentityError::IdMismatch {
                        name: name.to_owned(),
                        expected: known.id(),
                        configured: id,
                    });
                }
                Ok(Self::Known(known))
            }
            Err(_) => match (id, protocol) {
                (Some(id), Some(protocol)) => Ok(Self::Unknown {
                    id,
                    name: name.to_owned(),
                    protocol,
                }),
                _ => Err(ChainIdentityError::Unknown(name.to_owned())),
            },
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            ChainIdentity::Known(chain) => chain.id(),
            ChainIdentity::Unknown { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ChainIdentity::Known(chain) => chain.as_str(),
            ChainIdentity::Unknown { name, .. } => name,
        }
    }

    pub fn protocol(&self) -> ChainProtocol {
        match self {
            ChainIdentity::Known(chain) => chain.protocol(),
            ChainIdentity::Unknown { protocol, .. } => *protocol,
        }
    }

    pub fn known(&self) -> Option<KnownChain> {
        match self {
            ChainIdentity::Known(chain) => Some(*chain),
            ChainIdentity::Unknown { .. } => None,
        }
    }

    pub fn is_known(&self, chain: KnownChain) -> bool {
        self.known() == Some(chain)
    }
}

impl From<KnownChain> for ChainIdentity {
    fn from(chain: KnownChain) -> Self {
        ChainIdentity::Known(chain)
    }
}

impl Debug for ChainIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

impl Display for ChainIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainIdentityError {
    #[error("Unknown chain `{0}`; configure `chain_id` and `protocol` for it")]
    Unknown(String),
    #[error("Chain `{name}` has id {expected}, but {configured} was configured")]
    IdMismatch {
        name: String,
        expected: u16,
        configured: u16,
    },
}
