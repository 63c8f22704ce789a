use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api-rs.dexcelerate.com";
pub const DEFAULT_WS_URL: &str = "wss://api-rs.dexcelerate.com/ws";
pub const DEFAULT_FLUSH_WINDOW_MS: u64 = 100;
pub const DEFAULT_BACKOFF_FLOOR_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 30_000;
pub const DEFAULT_SEND_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CHAIN: Chain = Chain::Sol;
pub const MIN_FLUSH_WINDOW_MS: u64 = 10;
pub const MAX_FLUSH_WINDOW_MS: u64 = 1_000;
pub const MIN_BACKOFF_FLOOR_MS: u64 = 100;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const PRICE_HISTORY_CAPACITY: usize = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Live,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Chain {
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "SOL")]
    Sol,
    #[serde(rename = "BASE")]
    Base,
    #[serde(rename = "BSC")]
    Bsc,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eth => "ETH",
            Self::Sol => "SOL",
            Self::Base => "BASE",
            Self::Bsc => "BSC",
        }
    }

    /// Numeric chain ids as reported by the scanner REST records.
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            1 => Self::Eth,
            11_155_111 => Self::Sol,
            8_453 => Self::Base,
            _ => Self::Bsc,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ETH" => Ok(Self::Eth),
            "SOL" => Ok(Self::Sol),
            "BASE" => Ok(Self::Base),
            "BSC" => Ok(Self::Bsc),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported chain '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RankBy {
    #[serde(rename = "volume")]
    Volume,
    #[serde(rename = "age")]
    Age,
    #[serde(rename = "trending")]
    Trending,
    #[serde(rename = "price5M")]
    Price5M,
    #[serde(rename = "price1H")]
    Price1H,
    #[serde(rename = "price6H")]
    Price6H,
    #[serde(rename = "price24H")]
    Price24H,
    #[serde(rename = "liquidity")]
    Liquidity,
    #[serde(rename = "mcap")]
    MarketCap,
    #[serde(rename = "txns")]
    Transactions,
    #[serde(rename = "buys")]
    Buys,
    #[serde(rename = "sells")]
    Sells,
}

impl RankBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Age => "age",
            Self::Trending => "trending",
            Self::Price5M => "price5M",
            Self::Price1H => "price1H",
            Self::Price6H => "price6H",
            Self::Price24H => "price24H",
            Self::Liquidity => "liquidity",
            Self::MarketCap => "mcap",
            Self::Transactions => "txns",
            Self::Buys => "buys",
            Self::Sells => "sells",
        }
    }
}

impl FromStr for RankBy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        const ALL: [RankBy; 12] = [
            RankBy::Volume,
            RankBy::Age,
            RankBy::Trending,
            RankBy::Price5M,
            RankBy::Price1H,
            RankBy::Price6H,
            RankBy::Price24H,
            RankBy::Liquidity,
            RankBy::MarketCap,
            RankBy::Transactions,
            RankBy::Buys,
            RankBy::Sells,
        ];
        let trimmed = value.trim();
        ALL.into_iter()
            .find(|rank| rank.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| AppError::InvalidArgument(format!("unsupported rankBy '{trimmed}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    Asc,
    Desc,
}

impl OrderBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    #[serde(rename = "5M")]
    M5,
    #[serde(rename = "1H")]
    H1,
    #[serde(rename = "6H")]
    H6,
    #[serde(rename = "24H")]
    H24,
}

impl TimeFrame {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M5 => "5M",
            Self::H1 => "1H",
            Self::H6 => "6H",
            Self::H24 => "24H",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Trending,
    New,
}

impl TableKind {
    pub const ALL: [TableKind; 2] = [TableKind::Trending, TableKind::New];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::New => "new",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
}

/// Bounded, oldest-first sequence of recently observed prices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceHistory(VecDeque<f64>);

impl PriceHistory {
    pub fn seeded(price: f64) -> Self {
        let mut history = Self::default();
        if price.is_finite() && price > 0.0 {
            history.push(price);
        }
        history
    }

    pub fn push(&mut self, price: f64) {
        if !price.is_finite() {
            return;
        }
        self.0.push_back(price);
        while self.0.len() > PRICE_HISTORY_CAPACITY {
            self.0.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceChangePercents {
    #[serde(rename = "5m")]
    pub m5: f64,
    #[serde(rename = "1h")]
    pub h1: f64,
    #[serde(rename = "6h")]
    pub h6: f64,
    #[serde(rename = "24h")]
    pub h24: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transactions {
    pub buys: u64,
    pub sells: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liquidity {
    pub current: f64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFlags {
    pub mintable: bool,
    pub freezable: bool,
    pub honeypot: bool,
    pub contract_verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    pub discord: Option<String>,
    pub telegram: Option<String>,
    pub twitter: Option<String>,
    pub website: Option<String>,
}

/// One row of a result set. `id` is the pair address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: String,
    pub token_address: String,
    pub pair_address: String,
    pub chain: Chain,
    pub token_name: String,
    pub token_symbol: String,
    pub token_image_uri: Option<String>,
    pub exchange: String,
    pub price_usd: f64,
    pub volume_usd: f64,
    pub market_cap: f64,
    pub total_supply: Option<f64>,
    pub token0_decimals: Option<u32>,
    pub token1_decimals: Option<u32>,
    pub price_change_percent: PriceChangePercents,
    pub transactions: Transactions,
    pub liquidity: Liquidity,
    pub audit: AuditFlags,
    pub links: SocialLinks,
    pub dex_paid: bool,
    pub migration_percent: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub price_history: PriceHistory,
}

impl TokenRecord {
    pub fn has_valid_price(&self) -> bool {
        self.price_usd.is_finite() && self.price_usd > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfigArgs {
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub flush_window_ms: Option<u64>,
    pub backoff_floor_ms: Option<u64>,
    pub backoff_ceiling_ms: Option<u64>,
    pub send_retry_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub chain: Option<Chain>,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub flush_window_ms: u64,
    pub backoff_floor_ms: u64,
    pub backoff_ceiling_ms: u64,
    pub send_retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub chain: Chain,
}

impl ScannerConfig {
    pub fn flush_window(&self) -> Duration {
        Duration::from_millis(self.flush_window_ms)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            flush_window_ms: DEFAULT_FLUSH_WINDOW_MS,
            backoff_floor_ms: DEFAULT_BACKOFF_FLOOR_MS,
            backoff_ceiling_ms: DEFAULT_BACKOFF_CEILING_MS,
            send_retry_delay_ms: DEFAULT_SEND_RETRY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            chain: DEFAULT_CHAIN,
        }
    }
}

impl ScannerConfigArgs {
    pub fn normalize(self) -> Result<ScannerConfig, AppError> {
        let api_base_url = self
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(AppError::InvalidArgument(
                "apiBaseUrl must be an http(s) url".to_string(),
            ));
        }

        let ws_url = self
            .ws_url
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string())
            .trim()
            .to_string();
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(AppError::InvalidArgument(
                "wsUrl must be a ws(s) url".to_string(),
            ));
        }

        let flush_window_ms = self.flush_window_ms.unwrap_or(DEFAULT_FLUSH_WINDOW_MS);
        if !(MIN_FLUSH_WINDOW_MS..=MAX_FLUSH_WINDOW_MS).contains(&flush_window_ms) {
            return Err(AppError::InvalidArgument(format!(
                "flushWindowMs must be between {MIN_FLUSH_WINDOW_MS} and {MAX_FLUSH_WINDOW_MS}"
            )));
        }

        let backoff_floor_ms = self.backoff_floor_ms.unwrap_or(DEFAULT_BACKOFF_FLOOR_MS);
        let backoff_ceiling_ms = self
            .backoff_ceiling_ms
            .unwrap_or(DEFAULT_BACKOFF_CEILING_MS);
        if backoff_floor_ms < MIN_BACKOFF_FLOOR_MS {
            return Err(AppError::InvalidArgument(format!(
                "backoffFloorMs must be at least {MIN_BACKOFF_FLOOR_MS}"
            )));
        }
        if backoff_ceiling_ms < backoff_floor_ms {
            return Err(AppError::InvalidArgument(
                "backoffCeilingMs must not be below backoffFloorMs".to_string(),
            ));
        }

        let send_retry_delay_ms = self
            .send_retry_delay_ms
            .unwrap_or(DEFAULT_SEND_RETRY_DELAY_MS);
        let request_timeout_ms = self
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&request_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "requestTimeoutMs must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }

        Ok(ScannerConfig {
            api_base_url,
            ws_url,
            flush_window_ms,
            backoff_floor_ms,
            backoff_ceiling_ms,
            send_retry_delay_ms,
            request_timeout_ms,
            chain: self.chain.unwrap_or(DEFAULT_CHAIN),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_chain_ids() {
        assert_eq!(Chain::from_chain_id(1), Chain::Eth);
        assert_eq!(Chain::from_chain_id(11_155_111), Chain::Sol);
        assert_eq!(Chain::from_chain_id(8_453), Chain::Base);
        assert_eq!(Chain::from_chain_id(56), Chain::Bsc);
        assert_eq!(Chain::from_chain_id(999), Chain::Bsc);
    }

    #[test]
    fn parses_chain_names_case_insensitively() {
        assert_eq!("sol".parse::<Chain>().ok(), Some(Chain::Sol));
        assert_eq!(" Base ".parse::<Chain>().ok(), Some(Chain::Base));
        assert!("DOGE".parse::<Chain>().is_err());
    }

    #[test]
    fn parses_rank_by_wire_names() {
        assert_eq!("volume".parse::<RankBy>().ok(), Some(RankBy::Volume));
        assert_eq!("price5M".parse::<RankBy>().ok(), Some(RankBy::Price5M));
        assert_eq!("MCAP".parse::<RankBy>().ok(), Some(RankBy::MarketCap));
        assert!("bogus".parse::<RankBy>().is_err());
    }

    #[test]
    fn price_history_evicts_oldest_first() {
        let mut history = PriceHistory::seeded(1.0);
        for step in 0..40 {
            history.push(2.0 + step as f64);
        }

        assert_eq!(history.len(), PRICE_HISTORY_CAPACITY);
        let values = history.to_vec();
        assert_eq!(values.first().copied(), Some(12.0));
        assert_eq!(values.last().copied(), Some(41.0));
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn seeded_history_skips_non_positive_price() {
        assert!(PriceHistory::seeded(0.0).is_empty());
        assert!(PriceHistory::seeded(f64::NAN).is_empty());
        assert_eq!(PriceHistory::seeded(1.5).to_vec(), vec![1.5]);
    }

    #[test]
    fn normalizes_config_defaults() {
        let config = ScannerConfigArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.flush_window_ms, DEFAULT_FLUSH_WINDOW_MS);
        assert_eq!(config.backoff_floor_ms, DEFAULT_BACKOFF_FLOOR_MS);
        assert_eq!(config.backoff_ceiling_ms, DEFAULT_BACKOFF_CEILING_MS);
        assert_eq!(config.send_retry_delay_ms, DEFAULT_SEND_RETRY_DELAY_MS);
        assert_eq!(config.chain, DEFAULT_CHAIN);
    }

    #[test]
    fn trims_trailing_slash_from_api_url() {
        let config = ScannerConfigArgs {
            api_base_url: Some("http://localhost:8080/".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("local url should be valid");

        assert_eq!(config.api_base_url, "http://localhost:8080");
    }

    #[test]
    fn validates_flush_window_range() {
        let result = ScannerConfigArgs {
            flush_window_ms: Some(1),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_backoff_bounds() {
        let result = ScannerConfigArgs {
            backoff_floor_ms: Some(5_000),
            backoff_ceiling_ms: Some(1_000),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_websocket_url() {
        let result = ScannerConfigArgs {
            ws_url: Some("https://example.com/ws".to_string()),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }
}
