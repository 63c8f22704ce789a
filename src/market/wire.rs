use crate::error::AppError;
use crate::market::filters::FilterDescriptor;
use crate::market::subscriptions::RowKey;
use crate::market::{PAIR_STATS_EVENT, SCANNER_PAIRS_EVENT, TICK_EVENT};
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;

/// Decoders tolerant to the scanner feed's habit of sending numbers as strings.
pub(crate) mod lenient {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number, a numeric string or null")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(value.is_finite().then_some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite()))
        }

        fn visit_bool<E: de::Error>(self, _value: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(NumberVisitor)
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        deserializer.deserialize_any(NumberVisitor)
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let value = deserializer.deserialize_any(NumberVisitor)?;
        Ok(value
            .filter(|number| *number >= 0.0)
            .map(|number| number.round() as u64))
    }

    struct TextVisitor;

    impl<'de> Visitor<'de> for TextVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string, a number or null")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(TextVisitor)
        }
    }

    pub fn opt_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        deserializer.deserialize_any(TextVisitor)
    }

    /// Like `opt_text`, with `null` read as an empty string.
    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(opt_text(deserializer)?.unwrap_or_default())
    }

    /// RFC 3339 strings or unix epoch milliseconds.
    pub fn opt_timestamp<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(raw) = deserializer.deserialize_any(TextVisitor)? else {
            return Ok(None);
        };
        let trimmed = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
        Ok(trimmed
            .parse::<f64>()
            .ok()
            .filter(|millis| millis.is_finite())
            .and_then(|millis| Utc.timestamp_millis_opt(millis as i64).single()))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawScannerRecord {
    #[serde(default, deserialize_with = "lenient::text")]
    pub pair_address: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub token1_address: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub token1_name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub token1_symbol: String,
    #[serde(default)]
    pub token1_image_uri: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub router_address: Option<String>,
    #[serde(default)]
    pub virtual_router_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub current_mcap: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub initial_mcap: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub pair_mcap_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub pair_mcap_usd_initial: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub token1_total_supply_formatted: Option<String>,
    #[serde(rename = "diff5M", default, deserialize_with = "lenient::opt_f64")]
    pub diff_5m: Option<f64>,
    #[serde(rename = "diff1H", default, deserialize_with = "lenient::opt_f64")]
    pub diff_1h: Option<f64>,
    #[serde(rename = "diff6H", default, deserialize_with = "lenient::opt_f64")]
    pub diff_6h: Option<f64>,
    #[serde(rename = "diff24H", default, deserialize_with = "lenient::opt_f64")]
    pub diff_24h: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub liquidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub percent_change_in_liquidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub buys: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub sells: Option<u64>,
    #[serde(default)]
    pub honey_pot: Option<bool>,
    #[serde(default)]
    pub is_mint_auth_disabled: Option<bool>,
    #[serde(default)]
    pub is_freeze_auth_disabled: Option<bool>,
    #[serde(default)]
    pub contract_verified: Option<bool>,
    #[serde(default)]
    pub dex_paid: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub token0_decimals: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub token1_decimals: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub age: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub link_discord: Option<String>,
    #[serde(default)]
    pub link_telegram: Option<String>,
    #[serde(default)]
    pub link_twitter: Option<String>,
    #[serde(default)]
    pub link_website: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerPageWire {
    #[serde(default)]
    pub pairs: Vec<RawScannerRecord>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub total_rows: Option<u64>,
}

/// The filter scope echoed back by the server on a snapshot push.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EchoedFilter {
    #[serde(default)]
    pub rank_by: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScannerPairsResults {
    #[serde(default)]
    pub pairs: Vec<RawScannerRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerPairsPayload {
    #[serde(default)]
    pub filter: EchoedFilter,
    pub results: ScannerPairsResults,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PairStatsPair {
    #[serde(default, deserialize_with = "lenient::text")]
    pub pair_address: String,
    #[serde(default)]
    pub token1_address: Option<String>,
    #[serde(default)]
    pub token1_name: Option<String>,
    #[serde(default)]
    pub token1_symbol: Option<String>,
    #[serde(default)]
    pub token1_image_uri: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub router_address: Option<String>,
    #[serde(default)]
    pub virtual_router_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub pair_price0_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub pair_price1_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub pair_marketcap_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub pair_reserves1_usd: Option<f64>,
    #[serde(default)]
    pub mint_authority_renounced: Option<bool>,
    #[serde(default)]
    pub freeze_authority_renounced: Option<bool>,
    #[serde(default)]
    pub token1_is_honeypot: Option<bool>,
    #[serde(default)]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub dex_paid: Option<bool>,
    #[serde(default)]
    pub link_discord: Option<String>,
    #[serde(default)]
    pub link_telegram: Option<String>,
    #[serde(default)]
    pub link_twitter: Option<String>,
    #[serde(default)]
    pub link_website: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub pair_created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStatsPayload {
    pub pair: PairStatsPair,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub migration_progress: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TickPair {
    #[serde(default, deserialize_with = "lenient::text")]
    pub pair: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwapWire {
    #[serde(default)]
    pub is_outlier: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price_token0_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price_token1_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub amount_token0: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub amount_token1: Option<f64>,
    #[serde(default)]
    pub token_in_address: Option<String>,
}

impl SwapWire {
    pub fn is_outlier(&self) -> bool {
        self.is_outlier.unwrap_or(false)
    }

    /// Token1 price is preferred; token0 is the fallback.
    pub fn usable_price(&self) -> Option<f64> {
        self.price_token1_usd
            .or(self.price_token0_usd)
            .filter(|price| price.is_finite())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TickPayload {
    pub pair: TickPair,
    #[serde(default)]
    pub swaps: Vec<SwapWire>,
}

impl TickPayload {
    pub fn latest_usable_swap(&self) -> Option<&SwapWire> {
        self.swaps.iter().rev().find(|swap| !swap.is_outlier())
    }
}

/// A well-formed inbound frame before its payload is decoded for a specific event kind.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub event: String,
    #[serde(default)]
    pub data: Option<OwnedValue>,
}

#[derive(Debug, Clone)]
pub enum ScannerEvent {
    Snapshot(ScannerPairsPayload),
    PairStats(PairStatsPayload),
    Tick(TickPayload),
    Ignored(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundMessage {
    ScannerFilter(FilterDescriptor),
    UnsubscribeScannerFilter(FilterDescriptor),
    SubscribePair(RowKey),
    UnsubscribePair(RowKey),
    SubscribePairStats(RowKey),
    UnsubscribePairStats(RowKey),
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ScannerFilter(_) => "scanner-filter",
            Self::UnsubscribeScannerFilter(_) => "unsubscribe-scanner-filter",
            Self::SubscribePair(_) => "subscribe-pair",
            Self::UnsubscribePair(_) => "unsubscribe-pair",
            Self::SubscribePairStats(_) => "subscribe-pair-stats",
            Self::UnsubscribePairStats(_) => "unsubscribe-pair-stats",
        }
    }
}

pub fn parse_inbound_frame(payload: &mut [u8]) -> Result<InboundMessage, AppError> {
    let message: InboundMessage = simd_json::serde::from_slice(payload)?;
    Ok(message)
}

pub fn decode_event(message: InboundMessage) -> Result<ScannerEvent, AppError> {
    let InboundMessage { event, data } = message;
    let known = matches!(
        event.as_str(),
        SCANNER_PAIRS_EVENT | PAIR_STATS_EVENT | TICK_EVENT
    );
    if !known {
        return Ok(ScannerEvent::Ignored(event));
    }

    let data = data.ok_or_else(|| {
        AppError::InvalidArgument(format!("'{event}' event arrived without a data payload"))
    })?;

    let decoded = match event.as_str() {
        SCANNER_PAIRS_EVENT => ScannerEvent::Snapshot(simd_json::serde::from_owned_value(data)?),
        PAIR_STATS_EVENT => ScannerEvent::PairStats(simd_json::serde::from_owned_value(data)?),
        _ => ScannerEvent::Tick(simd_json::serde::from_owned_value(data)?),
    };
    Ok(decoded)
}

pub fn parse_scanner_page(payload: &mut [u8]) -> Result<ScannerPageWire, AppError> {
    let page: ScannerPageWire = simd_json::serde::from_slice(payload)?;
    Ok(page)
}

pub fn encode_outbound(message: &OutboundMessage) -> Result<String, AppError> {
    Ok(simd_json::to_string(message)?)
}
