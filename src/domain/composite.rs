//! Composite Collection Record
//!
//! The aggregator's output: one record per contract address merging the
//! seven marketplace sub-resources. Every field is independently optional;
//! sub-fetches that degraded are listed in `partial_failures`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::ContractAddress;

/// The marketplace sub-resources fetched for each collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubResource {
    Collection,
    Stats,
    Sales,
    Offers,
    Owners,
    Events,
    Traits,
}

impl SubResource {
    /// All sub-resources in fan-out order
    pub const ALL: [SubResource; 7] = [
        SubResource::Collection,
        SubResource::Stats,
        SubResource::Sales,
        SubResource::Offers,
        SubResource::Owners,
        SubResource::Events,
        SubResource::Traits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubResource::Collection => "collection",
            SubResource::Stats => "stats",
            SubResource::Sales => "sales",
            SubResource::Offers => "offers",
            SubResource::Owners => "owners",
            SubResource::Events => "events",
            SubResource::Traits => "traits",
        }
    }

    /// Logical endpoint key; each key owns one rate-limit window and one queue
    pub fn endpoint_key(&self) -> &'static str {
        self.as_str()
    }

    /// Dedup key for a request against this resource
    pub fn coalescing_key(&self, address: &ContractAddress) -> String {
        format!("{}:{}", self.as_str(), address)
    }
}

impl fmt::Display for SubResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "totalSupply", alias = "total")]
    pub total_supply: Option<u64>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default, alias = "canMint")]
    pub can_mint: bool,
    #[serde(default, alias = "canMelt")]
    pub can_melt: bool,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CollectionInfo {
    /// Supply can neither grow nor shrink
    pub fn is_immutable(&self) -> bool {
        !self.can_mint && !self.can_melt
    }

    /// Collection name with any `#<n>` item suffix removed
    pub fn base_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(|n| n.split('#').next().unwrap_or(n).trim())
    }
}

/// Market statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    #[serde(default, alias = "floorPrice")]
    pub floor_price: Option<f64>,
    #[serde(default, alias = "volume24h", alias = "one_day_volume")]
    pub volume_24h: Option<f64>,
    #[serde(default, alias = "totalVolume")]
    pub total_volume: Option<f64>,
    #[serde(default, alias = "numOwners")]
    pub num_owners: Option<u64>,
    #[serde(default, alias = "marketCap")]
    pub market_cap: Option<f64>,
    #[serde(default, alias = "priceChange24h")]
    pub price_change_24h: Option<f64>,
}

/// A completed sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    #[serde(alias = "tokenId")]
    pub token_id: String,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default, alias = "txHash", alias = "hash")]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An open offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub maker: Option<String>,
    #[serde(default, alias = "tokenId")]
    pub token_id: Option<String>,
    #[serde(default, alias = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A holder and the number of items held
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub address: String,
    #[serde(default = "default_quantity", alias = "count")]
    pub quantity: u64,
}

fn default_quantity() -> u64 {
    1
}

/// Generic on-chain or marketplace activity (transfers, mints, listings)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(alias = "type", alias = "eventType")]
    pub kind: String,
    #[serde(default, alias = "txHash", alias = "hash")]
    pub tx_hash: Option<String>,
    #[serde(default, alias = "tokenId")]
    pub token_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Trait type -> trait value -> item count
pub type TraitDistribution = BTreeMap<String, BTreeMap<String, u64>>;

/// A successfully decoded sub-resource body
#[derive(Debug, Clone, PartialEq)]
pub enum SubPayload {
    Collection(CollectionInfo),
    Stats(CollectionStats),
    Sales(Vec<Sale>),
    Offers(Vec<Offer>),
    Owners(Vec<Owner>),
    Events(Vec<ActivityEvent>),
    Traits(TraitDistribution),
}

impl SubPayload {
    /// The resource this payload answers
    pub fn resource(&self) -> SubResource {
        match self {
            SubPayload::Collection(_) => SubResource::Collection,
            SubPayload::Stats(_) => SubResource::Stats,
            SubPayload::Sales(_) => SubResource::Sales,
            SubPayload::Offers(_) => SubResource::Offers,
            SubPayload::Owners(_) => SubResource::Owners,
            SubPayload::Events(_) => SubResource::Events,
            SubPayload::Traits(_) => SubResource::Traits,
        }
    }
}

/// A sub-fetch that degraded to its default value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub resource: SubResource,
    pub reason: String,
}

/// Merged view of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRecord {
    pub address: ContractAddress,
    pub collection: Option<CollectionInfo>,
    pub stats: Option<CollectionStats>,
    pub sales: Vec<Sale>,
    pub offers: Vec<Offer>,
    pub owners: Vec<Owner>,
    pub events: Vec<ActivityEvent>,
    pub traits: Option<TraitDistribution>,
    pub fetched_at: DateTime<Utc>,
    pub partial_failures: Vec<PartialFailure>,
}

impl CompositeRecord {
    /// An empty record with nothing fetched yet
    pub fn empty(address: ContractAddress, fetched_at: DateTime<Utc>) -> Self {
        Self {
            address,
            collection: None,
            stats: None,
            sales: Vec::new(),
            offers: Vec::new(),
            owners: Vec::new(),
            events: Vec::new(),
            traits: None,
            fetched_at,
            partial_failures: Vec::new(),
        }
    }

    /// Place a payload into its field
    pub fn apply(&mut self, payload: SubPayload) {
        match payload {
            SubPayload::Collection(c) => self.collection = Some(c),
            SubPayload::Stats(s) => self.stats = Some(s),
            SubPayload::Sales(s) => self.sales = s,
            SubPayload::Offers(o) => self.offers = o,
            SubPayload::Owners(o) => self.owners = o,
            SubPayload::Events(e) => self.events = e,
            SubPayload::Traits(t) => self.traits = Some(t),
        }
    }

    /// Record a degraded sub-fetch
    pub fn record_failure(&mut self, resource: SubResource, reason: impl Into<String>) {
        self.partial_failures.push(PartialFailure {
            resource,
            reason: reason.into(),
        });
    }

    pub fn is_degraded(&self) -> bool {
        !self.partial_failures.is_empty()
    }

    /// Names of the sub-fetches that degraded
    pub fn failed_resources(&self) -> Vec<SubResource> {
        self.partial_failures.iter().map(|f| f.resource).collect()
    }

    /// Distinct holders, preferring the owners list over reported stats
    pub fn holder_count(&self) -> Option<u64> {
        if !self.owners.is_empty() {
            return Some(self.owners.len() as u64);
        }
        self.stats.as_ref().and_then(|s| s.num_owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ContractAddress {
        ContractAddress::parse("0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d").unwrap()
    }

    #[test]
    fn test_coalescing_key_format() {
        let key = SubResource::Stats.coalescing_key(&address());
        assert_eq!(key, "stats:0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d");
    }

    #[test]
    fn test_apply_and_failures() {
        let mut record = CompositeRecord::empty(address(), Utc::now());
        record.apply(SubPayload::Owners(vec![
            Owner { address: "a".into(), quantity: 2 },
            Owner { address: "b".into(), quantity: 1 },
        ]));
        record.record_failure(SubResource::Sales, "Request timed out");

        assert_eq!(record.holder_count(), Some(2));
        assert!(record.is_degraded());
        assert_eq!(record.failed_resources(), vec![SubResource::Sales]);
        assert!(record.sales.is_empty());
    }

    #[test]
    fn test_collection_aliases_and_immutability() {
        let json = r#"{"name": "Hathor Punks #12", "totalSupply": 1, "canMint": false, "canMelt": false}"#;
        let info: CollectionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.total_supply, Some(1));
        assert!(info.is_immutable());
        assert_eq!(info.base_name(), Some("Hathor Punks"));
    }

    #[test]
    fn test_owner_quantity_defaults_to_one() {
        let owner: Owner = serde_json::from_str(r#"{"address": "0xabc"}"#).unwrap();
        assert_eq!(owner.quantity, 1);
    }

    #[test]
    fn test_payload_resource_mapping() {
        for resource in SubResource::ALL {
            let payload = match resource {
                SubResource::Collection => SubPayload::Collection(CollectionInfo::default()),
                SubResource::Stats => SubPayload::Stats(CollectionStats::default()),
                SubResource::Sales => SubPayload::Sales(vec![]),
                SubResource::Offers => SubPayload::Offers(vec![]),
                SubResource::Owners => SubPayload::Owners(vec![]),
                SubResource::Events => SubPayload::Events(vec![]),
                SubResource::Traits => SubPayload::Traits(TraitDistribution::new()),
            };
            assert_eq!(payload.resource(), resource);
        }
    }
}
