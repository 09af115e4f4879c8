//! Monitored token -> Uniswap V2 pair registry
//!
//! The map is replaced wholesale on every update. Readers clone the `Arc`
//! under a short read lock, so a scan in flight keeps the set it started with.

use ethers::types::Address;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ChainError, PairLookup};
use crate::types::{address_key, PairInfo, PairSide};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no pair exists for token {0:?}")]
    NoPair(Address),
    #[error("lookup failed for token {token:?}: {source}")]
    Lookup {
        token: Address,
        #[source]
        source: ChainError,
    },
}

/// Pairs keyed by pair address
pub type PairMap = HashMap<Address, PairInfo>;

pub struct PairRegistry {
    lookup: Arc<dyn PairLookup>,
    reference: Address,
    pairs: RwLock<Arc<PairMap>>,
}

impl PairRegistry {
    pub fn new(lookup: Arc<dyn PairLookup>, reference: Address) -> Self {
        Self {
            lookup,
            reference,
            pairs: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn reference(&self) -> Address {
        self.reference
    }

    /// Resolve the pair and metadata for one token
    pub async fn register(&self, token: Address) -> Result<PairInfo, RegistryError> {
        let pair_address = self
            .lookup
            .get_pair(token, self.reference)
            .await
            .map_err(|source| RegistryError::Lookup { token, source })?;

        if pair_address.is_zero() {
            return Err(RegistryError::NoPair(token));
        }

        let metadata = self
            .lookup
            .token_metadata(token)
            .await
            .map_err(|source| RegistryError::Lookup { token, source })?;

        Ok(PairInfo {
            pair_address,
            token_address: token,
            token_name: metadata.name,
            token_symbol: metadata.symbol,
            token_decimals: metadata.decimals,
            reference_side: PairSide::of_reference(&self.reference, &token),
        })
    }

    /// Rebuild the registry from `tokens`, replacing whatever was there.
    ///
    /// Tokens without a pair are left out. A token whose lookup fails keeps
    /// the pair it already had, if any. Returns the number of pairs now
    /// registered.
    pub async fn update(&self, tokens: &[Address]) -> usize {
        let previous = self.snapshot();
        let mut next = HashMap::with_capacity(tokens.len());

        for token in tokens {
            match self.register(*token).await {
                Ok(info) => {
                    info!(
                        "📌 Monitoring {} ({}) via pair {}",
                        info.token_symbol,
                        address_key(token),
                        address_key(&info.pair_address)
                    );
                    next.insert(info.pair_address, info);
                }
                Err(RegistryError::NoPair(_)) => {
                    warn!("⚠️  No Uniswap V2 pair for {}, skipping", address_key(token));
                }
                Err(e) => match previous.values().find(|p| &p.token_address == token) {
                    Some(known) => {
                        warn!(
                            "⚠️  Failed to refresh {}: {}. Keeping pair {}",
                            address_key(token),
                            e,
                            address_key(&known.pair_address)
                        );
                        next.insert(known.pair_address, known.clone());
                    }
                    None => warn!("⚠️  Failed to register {}: {}", address_key(token), e),
                },
            }
        }

        let count = next.len();
        match self.pairs.write() {
            Ok(mut guard) => *guard = Arc::new(next),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(next),
        }

        info!("✅ Pair registry updated: {}/{} tokens", count, tokens.len());
        count
    }

    /// Point-in-time view of the registry
    pub fn snapshot(&self) -> Arc<PairMap> {
        match self.pairs.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.snapshot().values().map(|p| p.token_address).collect()
    }

    pub fn get_by_token(&self, token: &Address) -> Option<PairInfo> {
        self.snapshot()
            .values()
            .find(|p| &p.token_address == token)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
