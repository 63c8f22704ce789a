use crate::market::types::{
    AuditFlags, Chain, Liquidity, PriceChangePercents, PriceHistory, SocialLinks, TokenRecord,
    Transactions,
};
use crate::market::wire::RawScannerRecord;

/// Parses abbreviated amounts such as `1.5M`, `250k` or `1,000,000`.
pub fn parse_human_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != ',' && *ch != '_')
        .collect();
    let last = cleaned.chars().last()?;
    let multiplier = match last.to_ascii_uppercase() {
        'K' => 1e3,
        'M' => 1e6,
        'B' => 1e9,
        'T' => 1e12,
        _ => 1.0,
    };
    let digits = if multiplier > 1.0 {
        &cleaned[..cleaned.len() - last.len_utf8()]
    } else {
        cleaned.as_str()
    };
    let value = digits.parse::<f64>().ok()? * multiplier;
    value.is_finite().then_some(value)
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|number| number.is_finite() && *number > 0.0)
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|number| number.is_finite()).unwrap_or(0.0)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Market cap priority: current, initial, pair, pair initial, then supply times price.
fn derive_market_cap(raw: &RawScannerRecord, total_supply: Option<f64>, price: f64) -> f64 {
    positive(raw.current_mcap)
        .or_else(|| positive(raw.initial_mcap))
        .or_else(|| positive(raw.pair_mcap_usd))
        .or_else(|| positive(raw.pair_mcap_usd_initial))
        .or_else(|| {
            let supply = total_supply?;
            (price > 0.0).then_some(supply * price)
        })
        .unwrap_or(0.0)
}

pub fn normalize(raw: &RawScannerRecord) -> TokenRecord {
    let price_usd = finite_or_zero(raw.price);
    let total_supply = positive(
        raw.token1_total_supply_formatted
            .as_deref()
            .and_then(parse_human_number),
    );
    let market_cap = derive_market_cap(raw, total_supply, price_usd);
    let exchange = non_empty(raw.router_address.as_deref())
        .or_else(|| non_empty(raw.virtual_router_type.as_deref()))
        .unwrap_or_default();

    TokenRecord {
        id: raw.pair_address.clone(),
        token_address: raw.token1_address.clone(),
        pair_address: raw.pair_address.clone(),
        chain: raw.chain_id.map(Chain::from_chain_id).unwrap_or(Chain::Bsc),
        token_name: raw.token1_name.clone(),
        token_symbol: raw.token1_symbol.clone(),
        token_image_uri: non_empty(raw.token1_image_uri.as_deref()),
        exchange,
        price_usd,
        volume_usd: finite_or_zero(raw.volume),
        market_cap,
        total_supply,
        token0_decimals: raw.token0_decimals.map(|value| value as u32),
        token1_decimals: raw.token1_decimals.map(|value| value as u32),
        price_change_percent: PriceChangePercents {
            m5: finite_or_zero(raw.diff_5m),
            h1: finite_or_zero(raw.diff_1h),
            h6: finite_or_zero(raw.diff_6h),
            h24: finite_or_zero(raw.diff_24h),
        },
        transactions: Transactions {
            buys: raw.buys.unwrap_or(0),
            sells: raw.sells.unwrap_or(0),
        },
        liquidity: Liquidity {
            current: finite_or_zero(raw.liquidity),
            change_percent: finite_or_zero(raw.percent_change_in_liquidity),
        },
        audit: AuditFlags {
            mintable: raw.is_mint_auth_disabled.unwrap_or(false),
            freezable: raw.is_freeze_auth_disabled.unwrap_or(false),
            honeypot: raw.honey_pot.unwrap_or(false),
            contract_verified: raw.contract_verified.unwrap_or(false),
        },
        links: SocialLinks {
            discord: non_empty(raw.link_discord.as_deref()),
            telegram: non_empty(raw.link_telegram.as_deref()),
            twitter: non_empty(raw.link_twitter.as_deref()),
            website: non_empty(raw.link_website.as_deref()),
        },
        dex_paid: raw.dex_paid.unwrap_or(false),
        migration_percent: None,
        created_at: raw.age,
        price_history: PriceHistory::seeded(price_usd),
    }
}
