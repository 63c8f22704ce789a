use crate::error::AppError;
use crate::market::types::{Chain, OrderBy, RankBy, TimeFrame, TokenRecord, DEFAULT_CHAIN};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_MAX_AGE_SECS: u64 = 86_400;

/// Process-wide filter state shared by both result sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerFilters {
    pub chain: Chain,
    pub min_volume: f64,
    pub max_age_secs: u64,
    /// Applied client side; the REST api has no market-cap parameter.
    pub min_market_cap: f64,
    pub exclude_honeypots: bool,
    pub min_liquidity: Option<f64>,
    pub max_liquidity: Option<f64>,
    pub min_buys_24h: Option<u64>,
    pub min_sells_24h: Option<u64>,
    pub min_txns_24h: Option<u64>,
    pub verified: Option<bool>,
    pub dexes: Option<Vec<String>>,
    pub virtual_dexes: Option<Vec<String>>,
    pub time_frame: Option<TimeFrame>,
}

impl Default for ScannerFilters {
    fn default() -> Self {
        Self::for_chain(DEFAULT_CHAIN)
    }
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A settled filter change. Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPatch {
    pub chain: Option<Chain>,
    pub min_volume: Option<f64>,
    pub max_age_secs: Option<u64>,
    pub min_market_cap: Option<f64>,
    pub exclude_honeypots: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_liquidity: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_liquidity: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_buys_24h: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_sells_24h: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_txns_24h: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub verified: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option")]
    pub dexes: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub virtual_dexes: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub time_frame: Option<Option<TimeFrame>>,
}

impl ScannerFilters {
    pub fn for_chain(chain: Chain) -> Self {
        Self {
            chain,
            min_volume: 0.0,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            min_market_cap: 0.0,
            exclude_honeypots: true,
            min_liquidity: None,
            max_liquidity: None,
            min_buys_24h: None,
            min_sells_24h: None,
            min_txns_24h: None,
            verified: None,
            dexes: None,
            virtual_dexes: None,
            time_frame: None,
        }
    }

    /// Validates and applies a patch; returns whether anything changed.
    pub fn apply(&mut self, patch: FilterPatch) -> Result<bool, AppError> {
        let mut next = self.clone();
        if let Some(chain) = patch.chain {
            next.chain = chain;
        }
        if let Some(min_volume) = patch.min_volume {
            next.min_volume = min_volume;
        }
        if let Some(max_age_secs) = patch.max_age_secs {
            next.max_age_secs = max_age_secs;
        }
        if let Some(min_market_cap) = patch.min_market_cap {
            next.min_market_cap = min_market_cap;
        }
        if let Some(exclude_honeypots) = patch.exclude_honeypots {
            next.exclude_honeypots = exclude_honeypots;
        }
        if let Some(value) = patch.min_liquidity {
            next.min_liquidity = value;
        }
        if let Some(value) = patch.max_liquidity {
            next.max_liquidity = value;
        }
        if let Some(value) = patch.min_buys_24h {
            next.min_buys_24h = value;
        }
        if let Some(value) = patch.min_sells_24h {
            next.min_sells_24h = value;
        }
        if let Some(value) = patch.min_txns_24h {
            next.min_txns_24h = value;
        }
        if let Some(value) = patch.verified {
            next.verified = value;
        }
        if let Some(value) = patch.dexes {
            next.dexes = value;
        }
        if let Some(value) = patch.virtual_dexes {
            next.virtual_dexes = value;
        }
        if let Some(value) = patch.time_frame {
            next.time_frame = value;
        }

        next.validate()?;
        let changed = next != *self;
        *self = next;
        Ok(changed)
    }

    fn validate(&self) -> Result<(), AppError> {
        let non_negative = |value: f64| value.is_finite() && value >= 0.0;
        if !non_negative(self.min_volume) || !non_negative(self.min_market_cap) {
            return Err(AppError::InvalidArgument(
                "minVolume and minMarketCap must be finite non-negative numbers".to_string(),
            ));
        }
        let liquidity_ok = [self.min_liquidity, self.max_liquidity]
            .into_iter()
            .flatten()
            .all(non_negative);
        if !liquidity_ok {
            return Err(AppError::InvalidArgument(
                "liquidity bounds must be finite non-negative numbers".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_liquidity, self.max_liquidity) {
            if min > max {
                return Err(AppError::InvalidArgument(
                    "minLiquidity must not exceed maxLiquidity".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn admits(&self, record: &TokenRecord) -> bool {
        self.min_market_cap <= 0.0 || record.market_cap >= self.min_market_cap
    }

    pub fn descriptor(&self, rank_by: RankBy, order_by: OrderBy, page: u32) -> FilterDescriptor {
        FilterDescriptor {
            chain: self.chain,
            rank_by,
            order_by,
            is_not_hp: self.exclude_honeypots,
            min_vol_24h: self.min_volume,
            max_age: self.max_age_secs,
            min_liq: self.min_liquidity,
            max_liq: self.max_liquidity,
            min_buys_24h: self.min_buys_24h,
            min_sells_24h: self.min_sells_24h,
            min_txns_24h: self.min_txns_24h,
            is_verified: self.verified,
            dexes: canonical_list(self.dexes.as_deref()),
            virtual_dexes: canonical_list(self.virtual_dexes.as_deref()),
            time_frame: self.time_frame,
            page: page.max(1),
        }
    }
}

fn canonical_list(values: Option<&[String]>) -> Option<Vec<String>> {
    let mut list: Vec<String> = values?
        .iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    if list.is_empty() {
        return None;
    }
    list.sort_unstable();
    list.dedup();
    Some(list)
}

/// Full query scope sent to both the REST api and the push filter channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDescriptor {
    pub chain: Chain,
    pub rank_by: RankBy,
    pub order_by: OrderBy,
    #[serde(rename = "isNotHP")]
    pub is_not_hp: bool,
    #[serde(rename = "minVol24H")]
    pub min_vol_24h: f64,
    pub max_age: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_liq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_liq: Option<f64>,
    #[serde(rename = "minBuys24H", skip_serializing_if = "Option::is_none")]
    pub min_buys_24h: Option<u64>,
    #[serde(rename = "minSells24H", skip_serializing_if = "Option::is_none")]
    pub min_sells_24h: Option<u64>,
    #[serde(rename = "minTxns24H", skip_serializing_if = "Option::is_none")]
    pub min_txns_24h: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dexes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_dexes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_frame: Option<TimeFrame>,
    pub page: u32,
}

impl FilterDescriptor {
    /// Deterministic serialization used to deduplicate filter subscriptions.
    pub fn canonical_key(&self) -> Result<String, AppError> {
        Ok(simd_json::to_string(self)?)
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("chain", self.chain.as_str().to_string()),
            ("rankBy", self.rank_by.as_str().to_string()),
            ("orderBy", self.order_by.as_str().to_string()),
            ("isNotHP", self.is_not_hp.to_string()),
            ("minVol24H", self.min_vol_24h.to_string()),
            ("maxAge", self.max_age.to_string()),
        ];
        if let Some(value) = self.min_liq {
            pairs.push(("minLiq", value.to_string()));
        }
        if let Some(value) = self.max_liq {
            pairs.push(("maxLiq", value.to_string()));
        }
        if let Some(value) = self.min_buys_24h {
            pairs.push(("minBuys24H", value.to_string()));
        }
        if let Some(value) = self.min_sells_24h {
            pairs.push(("minSells24H", value.to_string()));
        }
        if let Some(value) = self.min_txns_24h {
            pairs.push(("minTxns24H", value.to_string()));
        }
        if let Some(value) = self.is_verified {
            pairs.push(("isVerified", value.to_string()));
        }
        for dex in self.dexes.iter().flatten() {
            pairs.push(("dexes", dex.clone()));
        }
        for dex in self.virtual_dexes.iter().flatten() {
            pairs.push(("virtualDexes", dex.clone()));
        }
        if let Some(time_frame) = self.time_frame {
            pairs.push(("timeFrame", time_frame.as_str().to_string()));
        }
        pairs.push(("page", self.page.to_string()));
        pairs
    }
}
