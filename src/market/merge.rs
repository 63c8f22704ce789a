use crate::market::batching::{TickBuffer, TickDelta, TradeSide};
use crate::market::normalize::normalize;
use crate::market::scanner_api::ScannerPage;
use crate::market::store::{ResultSet, ScannerState};
use crate::market::types::{
    AuditFlags, Chain, LoadState, PriceHistory, RankBy, SocialLinks, TableKind, TokenRecord,
};
use crate::market::wire::{
    EchoedFilter, PairStatsPair, PairStatsPayload, ScannerPairsPayload, SwapWire, TickPayload,
};
use std::collections::{HashMap, HashSet};

/// Raw token amounts above this are assumed to be in base units.
const RAW_AMOUNT_THRESHOLD: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotRoute {
    /// The echoed scope matches the table's active rank and chain.
    Replace(TableKind),
    /// No table matches the echoed scope; rows are upserted without removals.
    Merge(TableKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Replaced { table: TableKind, removed: usize },
    Merged { table: TableKind, inserted: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOutcome {
    Updated(usize),
    Inserted,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Buffered { armed: bool },
    UnknownRow,
    NoUsableSwap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PricePolicy {
    PreferExisting,
    TakeIncoming,
}

/// Buy when the swap moved the row's own token in, sell when it moved another one.
/// `None` when either address is missing.
pub fn classify_trade(swap: &SwapWire, token_address: &str) -> Option<TradeSide> {
    let moved_in = swap
        .token_in_address
        .as_deref()
        .map(str::trim)
        .filter(|address| !address.is_empty())?;
    if token_address.trim().is_empty() {
        return None;
    }
    if moved_in.eq_ignore_ascii_case(token_address.trim()) {
        Some(TradeSide::Buy)
    } else {
        Some(TradeSide::Sell)
    }
}

fn scaled_amount(amount: Option<f64>, decimals: Option<u32>) -> Option<f64> {
    let amount = amount
        .filter(|amount| amount.is_finite() && *amount != 0.0)?
        .abs();
    match decimals {
        Some(decimals) if decimals > 0 && amount > RAW_AMOUNT_THRESHOLD => {
            Some(amount / 10_f64.powi(decimals as i32))
        }
        _ => Some(amount),
    }
}

/// Token1 notional when the swap carries a token1 amount, else the token0 side.
fn trade_volume_usd(swap: &SwapWire, row: &TokenRecord, price: f64) -> f64 {
    let finite = |value: &f64| value.is_finite() && *value > 0.0;
    if let Some(amount) = scaled_amount(swap.amount_token1, row.token1_decimals) {
        return amount * swap.price_token1_usd.filter(finite).unwrap_or(price);
    }
    match scaled_amount(swap.amount_token0, row.token0_decimals) {
        Some(amount) => amount * swap.price_token0_usd.filter(finite).unwrap_or(price),
        None => 0.0,
    }
}

/// Replaces the table whose active rank and chain match the echoed scope. Anything
/// else is merged into the table that last requested the echoed rank, or trending.
pub fn route_snapshot(state: &ScannerState, echoed: &EchoedFilter) -> SnapshotRoute {
    let chain_matches = match echoed.chain.as_deref() {
        Some(raw) => raw
            .parse::<Chain>()
            .is_ok_and(|chain| chain == state.filters.chain),
        None => true,
    };
    let rank_by = echoed
        .rank_by
        .as_deref()
        .and_then(|raw| raw.parse::<RankBy>().ok());
    let Some(rank_by) = rank_by else {
        return SnapshotRoute::Merge(TableKind::Trending);
    };

    if chain_matches {
        let replaced = [&state.trending, &state.new]
            .into_iter()
            .filter(|table| table.rank_by == rank_by)
            .max_by_key(|table| table.filter_seq);
        if let Some(table) = replaced {
            return SnapshotRoute::Replace(table.kind);
        }
    }

    let requested = [&state.trending, &state.new]
        .into_iter()
        .filter_map(|table| Some((table.last_request_for(rank_by)?, table.kind)))
        .max_by_key(|(seq, _)| *seq)
        .map(|(_, kind)| kind);
    SnapshotRoute::Merge(requested.unwrap_or(TableKind::Trending))
}

/// Drops rows without a pair address or below the client-side market cap floor, and
/// keeps the first of each id.
fn admitted_rows(state: &ScannerState, records: impl Iterator<Item = TokenRecord>) -> Vec<TokenRecord> {
    let mut seen = HashSet::new();
    records
        .filter(|row| !row.id.is_empty() && state.filters.admits(row))
        .filter(|row| seen.insert(row.id.clone()))
        .collect()
}

fn carry_forward(existing: &TokenRecord, mut incoming: TokenRecord, policy: PricePolicy) -> TokenRecord {
    incoming.token_address = existing.token_address.clone();
    incoming.pair_address = existing.pair_address.clone();
    incoming.chain = existing.chain;
    incoming.price_history = existing.price_history.clone();
    incoming.transactions.buys = incoming.transactions.buys.max(existing.transactions.buys);
    incoming.transactions.sells = incoming.transactions.sells.max(existing.transactions.sells);
    incoming.total_supply = incoming.total_supply.or(existing.total_supply);
    incoming.token0_decimals = incoming.token0_decimals.or(existing.token0_decimals);
    incoming.token1_decimals = incoming.token1_decimals.or(existing.token1_decimals);
    incoming.migration_percent = incoming.migration_percent.or(existing.migration_percent);

    if policy == PricePolicy::PreferExisting && existing.has_valid_price() {
        incoming.price_usd = existing.price_usd;
        if existing.market_cap > 0.0 {
            incoming.market_cap = existing.market_cap;
        }
    }
    incoming
}

/// Replaces the table's rows, carrying client-derived state into surviving ids.
/// Returns how many previous rows are gone.
fn replace_rows(table: &mut ResultSet, incoming: Vec<TokenRecord>, policy: PricePolicy) -> usize {
    let mut previous: HashMap<String, TokenRecord> = table
        .rows
        .drain(..)
        .map(|row| (row.id.clone(), row))
        .collect();
    table.rows = incoming
        .into_iter()
        .map(|row| match previous.remove(&row.id) {
            Some(existing) => carry_forward(&existing, row, policy),
            None => row,
        })
        .collect();
    previous.len()
}

fn upsert_rows(table: &mut ResultSet, incoming: Vec<TokenRecord>) -> usize {
    let mut inserted = 0;
    for row in incoming {
        match table.position(&row.id) {
            Some(index) => {
                let merged = carry_forward(&table.rows[index], row, PricePolicy::PreferExisting);
                table.rows[index] = merged;
            }
            None => {
                table.rows.push(row);
                inserted += 1;
            }
        }
    }
    inserted
}

pub fn apply_snapshot(state: &mut ScannerState, payload: &ScannerPairsPayload) -> SnapshotOutcome {
    let route = route_snapshot(state, &payload.filter);
    let records = payload.results.pairs.iter().map(normalize);
    let incoming = admitted_rows(state, records);

    match route {
        SnapshotRoute::Replace(kind) => {
            let removed = replace_rows(state.table_mut(kind), incoming, PricePolicy::PreferExisting);
            SnapshotOutcome::Replaced {
                table: kind,
                removed,
            }
        }
        SnapshotRoute::Merge(kind) => {
            let inserted = upsert_rows(state.table_mut(kind), incoming);
            SnapshotOutcome::Merged {
                table: kind,
                inserted,
            }
        }
    }
}

/// Applies a REST page. `page_number` is the page that was requested.
pub fn apply_page(
    state: &mut ScannerState,
    kind: TableKind,
    page: ScannerPage,
    page_number: u32,
    append: bool,
) {
    let fetched = page.rows.len();
    let incoming = admitted_rows(state, page.rows.into_iter());
    let table = state.table_mut(kind);

    if append {
        let known: HashSet<String> = table.rows.iter().map(|row| row.id.clone()).collect();
        table
            .rows
            .extend(incoming.into_iter().filter(|row| !known.contains(&row.id)));
        table.page = page_number.max(table.page);
        table.total_rows = if fetched == 0 {
            table.rows.len() as u64
        } else {
            page.total_rows
        };
        table.loading_more = false;
    } else {
        replace_rows(table, incoming, PricePolicy::TakeIncoming);
        table.page = page_number;
        table.total_rows = page.total_rows;
        table.load_state = LoadState::Ready;
    }
    table.error = None;
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn stats_price(pair: &PairStatsPair) -> Option<f64> {
    [pair.pair_price1_usd, pair.pair_price0_usd]
        .into_iter()
        .flatten()
        .find(|price| price.is_finite() && *price > 0.0)
}

fn apply_stats_fields(row: &mut TokenRecord, payload: &PairStatsPayload) {
    let pair = &payload.pair;
    if let Some(name) = non_empty(pair.token1_name.as_deref()) {
        row.token_name = name;
    }
    if let Some(symbol) = non_empty(pair.token1_symbol.as_deref()) {
        row.token_symbol = symbol;
    }
    if let Some(image) = non_empty(pair.token1_image_uri.as_deref()) {
        row.token_image_uri = Some(image);
    }
    if let Some(exchange) = non_empty(pair.router_address.as_deref())
        .or_else(|| non_empty(pair.virtual_router_type.as_deref()))
    {
        row.exchange = exchange;
    }

    row.links = SocialLinks {
        discord: non_empty(pair.link_discord.as_deref()),
        telegram: non_empty(pair.link_telegram.as_deref()),
        twitter: non_empty(pair.link_twitter.as_deref()),
        website: non_empty(pair.link_website.as_deref()),
    };
    let audit = &mut row.audit;
    if let Some(value) = pair.mint_authority_renounced {
        audit.mintable = value;
    }
    if let Some(value) = pair.freeze_authority_renounced {
        audit.freezable = value;
    }
    if let Some(value) = pair.token1_is_honeypot {
        audit.honeypot = value;
    }
    if let Some(value) = pair.is_verified {
        audit.contract_verified = value;
    }
    if let Some(value) = pair.dex_paid {
        row.dex_paid = value;
    }
    if let Some(created_at) = pair.pair_created_at {
        row.created_at = Some(created_at);
    }
    if let Some(progress) = payload.migration_progress {
        row.migration_percent = Some(progress);
    }

    if let Some(price) = stats_price(pair) {
        row.price_usd = price;
    }
    if let Some(market_cap) = pair.pair_marketcap_usd.filter(|value| value.is_finite()) {
        row.market_cap = market_cap;
    }
    if let Some(liquidity) = pair.pair_reserves1_usd.filter(|value| value.is_finite()) {
        row.liquidity.current = liquidity;
    }
}

fn synthesize_row(payload: &PairStatsPayload, default_chain: Chain) -> Option<TokenRecord> {
    let pair = &payload.pair;
    let token_address = non_empty(pair.token1_address.as_deref())?;
    let symbol = non_empty(pair.token1_symbol.as_deref());
    let name = non_empty(pair.token1_name.as_deref());
    if symbol.is_none() && name.is_none() {
        return None;
    }
    let chain = pair
        .chain
        .as_deref()
        .and_then(|raw| raw.parse::<Chain>().ok())
        .unwrap_or(default_chain);
    let price = stats_price(pair).unwrap_or(0.0);

    let mut row = TokenRecord {
        id: pair.pair_address.clone(),
        token_address,
        pair_address: pair.pair_address.clone(),
        chain,
        token_name: name.clone().or_else(|| symbol.clone()).unwrap_or_default(),
        token_symbol: symbol.or(name).unwrap_or_default(),
        token_image_uri: None,
        exchange: String::new(),
        price_usd: price,
        volume_usd: 0.0,
        market_cap: 0.0,
        total_supply: None,
        token0_decimals: None,
        token1_decimals: None,
        price_change_percent: Default::default(),
        transactions: Default::default(),
        liquidity: Default::default(),
        audit: AuditFlags::default(),
        links: SocialLinks::default(),
        dex_paid: false,
        migration_percent: None,
        created_at: None,
        price_history: PriceHistory::seeded(price),
    };
    apply_stats_fields(&mut row, payload);
    Some(row)
}

/// Updates the row wherever it is shown; an unseen row is synthesized at the top of "new".
pub fn apply_pair_stats(state: &mut ScannerState, payload: &PairStatsPayload) -> StatsOutcome {
    let id = payload.pair.pair_address.as_str();
    if id.is_empty() {
        return StatsOutcome::Skipped;
    }

    let mut updated = 0;
    for table in state.tables_mut() {
        if let Some(row) = table.row_mut(id) {
            apply_stats_fields(row, payload);
            updated += 1;
        }
    }
    if updated > 0 {
        return StatsOutcome::Updated(updated);
    }

    match synthesize_row(payload, state.filters.chain) {
        Some(row) if state.filters.admits(&row) => {
            state.new.rows.insert(0, row);
            state.new.total_rows = state.new.total_rows.max(state.new.rows.len() as u64);
            StatsOutcome::Inserted
        }
        _ => StatsOutcome::Skipped,
    }
}

/// Folds a tick into the buffer. Nothing is applied to rows until the flush.
pub fn accumulate_tick(
    state: &ScannerState,
    buffer: &mut TickBuffer,
    payload: &TickPayload,
) -> TickOutcome {
    let Some(row) = state.find_row(&payload.pair.pair) else {
        return TickOutcome::UnknownRow;
    };
    let Some(swap) = payload.latest_usable_swap() else {
        return TickOutcome::NoUsableSwap;
    };
    let Some(price) = swap.usable_price().filter(|price| *price > 0.0) else {
        return TickOutcome::NoUsableSwap;
    };

    let delta = TickDelta {
        price,
        market_cap: row.total_supply.map(|supply| supply * price),
        volume_usd: trade_volume_usd(swap, row, price),
        side: classify_trade(swap, &row.token_address),
    };
    let armed = buffer.record(&row.id, delta);
    TickOutcome::Buffered { armed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::batching::apply_flush;
    use crate::market::filters::ScannerFilters;
    use crate::market::store::fixtures::record;
    use crate::market::wire::{
        decode_event, parse_inbound_frame, RawScannerRecord, ScannerEvent, ScannerPairsResults,
        TickPair,
    };

    fn normalize_all(records: &[RawScannerRecord]) -> Vec<TokenRecord> {
        records.iter().map(normalize).collect()
    }

    fn raw(id: &str, price: f64) -> RawScannerRecord {
        RawScannerRecord {
            pair_address: id.to_string(),
            token1_address: format!("{id}-token"),
            token1_symbol: id.to_ascii_uppercase(),
            chain_id: Some(11_155_111),
            price: Some(price),
            ..Default::default()
        }
    }

    fn snapshot(rank_by: &str, chain: &str, rows: Vec<RawScannerRecord>) -> ScannerPairsPayload {
        ScannerPairsPayload {
            filter: EchoedFilter {
                rank_by: Some(rank_by.to_string()),
                chain: Some(chain.to_string()),
            },
            results: ScannerPairsResults { pairs: rows },
        }
    }

    fn tick(pair: &str, swaps: Vec<SwapWire>) -> TickPayload {
        TickPayload {
            pair: TickPair {
                pair: pair.to_string(),
                ..Default::default()
            },
            swaps,
        }
    }

    fn swap(price: f64, token_in: &str) -> SwapWire {
        SwapWire {
            price_token1_usd: Some(price),
            amount_token1: Some(2.0),
            token_in_address: Some(token_in.to_string()),
            ..Default::default()
        }
    }

    fn state_with_trending(rows: Vec<TokenRecord>) -> ScannerState {
        let mut state = ScannerState::new(ScannerFilters::default());
        state.trending.rows = rows;
        state
    }

    #[test]
    fn classifies_by_token_moved_in() {
        assert_eq!(classify_trade(&swap(1.0, "0xABC"), "0xabc"), Some(TradeSide::Buy));
        assert_eq!(classify_trade(&swap(1.0, "0xother"), "0xabc"), Some(TradeSide::Sell));
        assert_eq!(classify_trade(&SwapWire::default(), "0xabc"), None);
        assert_eq!(classify_trade(&swap(1.0, "  "), "0xabc"), None);
        assert_eq!(classify_trade(&swap(1.0, "0xabc"), ""), None);
    }

    #[test]
    fn falls_back_to_token0_notional() {
        let mut row = record("p1", 2.0);
        row.token0_decimals = Some(6);
        let token0_only = SwapWire {
            amount_token0: Some(-3_000_000_000.0),
            price_token0_usd: Some(0.5),
            ..Default::default()
        };
        let zero_token1 = SwapWire {
            amount_token1: Some(0.0),
            amount_token0: Some(4.0),
            ..Default::default()
        };

        assert!((trade_volume_usd(&token0_only, &row, 2.0) - 1_500.0).abs() < 1e-9);
        assert!((trade_volume_usd(&zero_token1, &row, 2.0) - 8.0).abs() < 1e-9);
        assert_eq!(trade_volume_usd(&SwapWire::default(), &row, 2.0), 0.0);
    }

    #[test]
    fn scales_raw_amounts_by_decimals() {
        let mut row = record("p1", 1.0);
        row.token1_decimals = Some(9);
        let large = SwapWire {
            amount_token1: Some(5_000_000_000.0),
            ..Default::default()
        };
        let small = SwapWire {
            amount_token1: Some(-40.0),
            ..Default::default()
        };

        assert!((trade_volume_usd(&large, &row, 2.0) - 10.0).abs() < 1e-9);
        assert!((trade_volume_usd(&small, &row, 2.0) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn routes_to_table_with_matching_rank() {
        let state = ScannerState::new(ScannerFilters::default());
        let echoed = EchoedFilter {
            rank_by: Some("age".to_string()),
            chain: Some("SOL".to_string()),
        };
        assert_eq!(route_snapshot(&state, &echoed), SnapshotRoute::Replace(TableKind::New));
    }

    #[test]
    fn tie_break_prefers_most_recent_filter_subscription() {
        let mut state = ScannerState::new(ScannerFilters::default());
        state.new.rank_by = RankBy::Volume;
        state.trending.note_filter_request(RankBy::Volume, 1);
        state.new.note_filter_request(RankBy::Volume, 2);
        let echoed = EchoedFilter {
            rank_by: Some("volume".to_string()),
            chain: None,
        };

        assert_eq!(route_snapshot(&state, &echoed), SnapshotRoute::Replace(TableKind::New));

        state.trending.note_filter_request(RankBy::Volume, 3);
        assert_eq!(
            route_snapshot(&state, &echoed),
            SnapshotRoute::Replace(TableKind::Trending)
        );
    }

    #[test]
    fn unmatched_rank_falls_back_to_last_requester() {
        let mut state = ScannerState::new(ScannerFilters::default());
        state.new.note_filter_request(RankBy::Liquidity, 4);
        let liquidity = EchoedFilter {
            rank_by: Some("liquidity".to_string()),
            chain: Some("SOL".to_string()),
        };
        let mcap = EchoedFilter {
            rank_by: Some("mcap".to_string()),
            chain: Some("SOL".to_string()),
        };

        assert_eq!(route_snapshot(&state, &liquidity), SnapshotRoute::Merge(TableKind::New));
        assert_eq!(route_snapshot(&state, &mcap), SnapshotRoute::Merge(TableKind::Trending));
    }

    #[test]
    fn foreign_chain_snapshot_merges_without_removals() {
        let mut state = state_with_trending(vec![record("a", 1.0)]);
        state.trending.note_filter_request(RankBy::Volume, 1);

        let outcome = apply_snapshot(&mut state, &snapshot("volume", "ETH", vec![raw("z", 1.0)]));

        assert_eq!(
            outcome,
            SnapshotOutcome::Merged {
                table: TableKind::Trending,
                inserted: 1
            }
        );
        let ids: Vec<&str> = state.trending.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[test]
    fn unparsable_chain_routes_to_last_requester() {
        let mut state = ScannerState::new(ScannerFilters::default());
        state.new.note_filter_request(RankBy::Age, 2);
        let echoed = EchoedFilter {
            rank_by: Some("age".to_string()),
            chain: Some("MOON".to_string()),
        };

        assert_eq!(route_snapshot(&state, &echoed), SnapshotRoute::Merge(TableKind::New));
    }

    #[test]
    fn snapshot_with_null_name_keeps_every_row() {
        let mut frame = br#"{"event":"scanner-pairs","data":{"filter":{"rankBy":"volume","chain":"SOL"},
            "results":{"pairs":[{"pairAddress":"a","token1Address":"a-token","token1Name":"Alpha","price":"1"},
                                {"pairAddress":"b","token1Address":"b-token","token1Name":null,"price":"2"},
                                {"pairAddress":null,"token1Address":"c-token","price":"3"}]}}}"#
            .to_vec();
        let message = parse_inbound_frame(&mut frame).expect("frame is valid json");
        let ScannerEvent::Snapshot(payload) = decode_event(message).expect("snapshot decodes") else {
            panic!("expected snapshot event");
        };
        let mut state = state_with_trending(vec![record("a", 1.0)]);

        apply_snapshot(&mut state, &payload);

        let ids: Vec<&str> = state.trending.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(state.trending.row("b").map(|row| row.token_name.as_str()), Some(""));
    }

    #[test]
    fn snapshot_replaces_rows_and_reports_removals() {
        let mut state = state_with_trending(vec![record("a", 1.0), record("b", 1.0)]);
        let outcome = apply_snapshot(
            &mut state,
            &snapshot("volume", "SOL", vec![raw("a", 1.0), raw("c", 3.0), raw("c", 4.0)]),
        );

        assert_eq!(
            outcome,
            SnapshotOutcome::Replaced {
                table: TableKind::Trending,
                removed: 1
            }
        );
        let ids: Vec<&str> = state.trending.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(state.trending.row("c").map(|row| row.price_usd), Some(3.0));
    }

    #[test]
    fn snapshot_never_regresses_a_positive_price() {
        let mut existing = record("a", 1.3);
        existing.market_cap = 1_300.0;
        existing.price_history = PriceHistory::seeded(1.0);
        existing.price_history.push(1.3);
        existing.transactions.buys = 9;
        let mut state = state_with_trending(vec![existing]);
        let mut stale = raw("a", 0.9);
        stale.current_mcap = Some(900.0);
        stale.buys = Some(4);

        apply_snapshot(&mut state, &snapshot("volume", "SOL", vec![stale]));

        let row = state.trending.row("a").expect("row survives");
        assert_eq!(row.price_usd, 1.3);
        assert_eq!(row.market_cap, 1_300.0);
        assert_eq!(row.price_history.to_vec(), vec![1.0, 1.3]);
        assert_eq!(row.transactions.buys, 9);
    }

    #[test]
    fn snapshot_takes_incoming_price_when_existing_is_unset() {
        let mut state = state_with_trending(vec![record("a", 0.0)]);
        apply_snapshot(&mut state, &snapshot("volume", "SOL", vec![raw("a", 0.5)]));

        assert_eq!(state.trending.row("a").map(|row| row.price_usd), Some(0.5));
    }

    #[test]
    fn fallback_merge_keeps_existing_rows() {
        let mut state = state_with_trending(vec![record("a", 1.0), record("b", 1.0)]);
        let outcome = apply_snapshot(&mut state, &snapshot("mcap", "SOL", vec![raw("b", 2.0), raw("c", 1.0)]));

        assert_eq!(
            outcome,
            SnapshotOutcome::Merged {
                table: TableKind::Trending,
                inserted: 1
            }
        );
        let ids: Vec<&str> = state.trending.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(state.trending.row("b").map(|row| row.price_usd), Some(1.0));
    }

    #[test]
    fn min_market_cap_filters_incoming_rows() {
        let mut state = state_with_trending(Vec::new());
        state.filters.min_market_cap = 1_000.0;
        let mut rich = raw("rich", 1.0);
        rich.current_mcap = Some(5_000.0);
        let mut poor = raw("poor", 1.0);
        poor.current_mcap = Some(10.0);

        apply_snapshot(&mut state, &snapshot("volume", "SOL", vec![rich, poor]));

        assert_eq!(state.trending.rows.len(), 1);
        assert_eq!(state.trending.rows[0].id, "rich");
    }

    #[test]
    fn rest_reload_takes_incoming_price_but_keeps_history() {
        let mut existing = record("a", 1.0);
        existing.price_history.push(1.2);
        let mut state = state_with_trending(vec![existing]);
        let page = ScannerPage {
            rows: normalize_all(&[raw("a", 2.0), raw("b", 1.0)]),
            total_rows: 50,
        };

        apply_page(&mut state, TableKind::Trending, page, 1, false);

        let row = state.trending.row("a").expect("row survives reload");
        assert_eq!(row.price_usd, 2.0);
        assert_eq!(row.price_history.to_vec(), vec![1.0, 1.2]);
        assert_eq!(state.trending.total_rows, 50);
        assert_eq!(state.trending.load_state, LoadState::Ready);
        assert!(state.trending.has_more());
    }

    #[test]
    fn load_more_appends_unseen_rows_only() {
        let mut state = state_with_trending(vec![record("a", 1.0)]);
        state.trending.loading_more = true;
        let page = ScannerPage {
            rows: normalize_all(&[raw("a", 9.0), raw("b", 1.0)]),
            total_rows: 2,
        };

        apply_page(&mut state, TableKind::Trending, page, 2, true);

        let ids: Vec<&str> = state.trending.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(state.trending.rows[0].price_usd, 1.0);
        assert_eq!(state.trending.page, 2);
        assert!(!state.trending.loading_more);
        assert!(!state.trending.has_more());
    }

    #[test]
    fn empty_load_more_page_exhausts_the_table() {
        let mut state = state_with_trending(vec![record("a", 1.0)]);
        state.trending.total_rows = 80;

        apply_page(&mut state, TableKind::Trending, ScannerPage { rows: Vec::new(), total_rows: 80 }, 2, true);

        assert_eq!(state.trending.total_rows, 1);
        assert!(!state.trending.has_more());
    }

    #[test]
    fn stats_update_rows_in_both_tables() {
        let mut state = state_with_trending(vec![record("a", 1.0)]);
        state.new.rows = vec![record("a", 1.0)];
        let payload = PairStatsPayload {
            pair: PairStatsPair {
                pair_address: "a".to_string(),
                pair_price1_usd: Some(1.7),
                pair_marketcap_usd: Some(17_000.0),
                pair_reserves1_usd: Some(4_000.0),
                token1_is_honeypot: Some(true),
                router_address: Some("raydium".to_string()),
                link_website: Some("https://a.example".to_string()),
                ..Default::default()
            },
            migration_progress: Some(55.0),
        };

        assert_eq!(apply_pair_stats(&mut state, &payload), StatsOutcome::Updated(2));
        for table in [&state.trending, &state.new] {
            let row = table.row("a").expect("row present");
            assert_eq!(row.price_usd, 1.7);
            assert_eq!(row.market_cap, 17_000.0);
            assert_eq!(row.liquidity.current, 4_000.0);
            assert!(row.audit.honeypot);
            assert_eq!(row.exchange, "raydium");
            assert_eq!(row.links.website.as_deref(), Some("https://a.example"));
            assert_eq!(row.migration_percent, Some(55.0));
            assert_eq!(row.price_history.to_vec(), vec![1.0]);
        }
    }

    #[test]
    fn stats_for_unseen_row_synthesize_into_new() {
        let mut state = ScannerState::new(ScannerFilters::default());
        state.new.rows = vec![record("old", 1.0)];
        let payload = PairStatsPayload {
            pair: PairStatsPair {
                pair_address: "fresh".to_string(),
                token1_address: Some("fresh-token".to_string()),
                token1_symbol: Some("FRSH".to_string()),
                pair_price0_usd: Some(0.25),
                ..Default::default()
            },
            migration_progress: None,
        };

        assert_eq!(apply_pair_stats(&mut state, &payload), StatsOutcome::Inserted);
        let row = &state.new.rows[0];
        assert_eq!(row.id, "fresh");
        assert_eq!(row.chain, Chain::Sol);
        assert_eq!(row.token_name, "FRSH");
        assert_eq!(row.price_history.to_vec(), vec![0.25]);
        assert!(state.trending.rows.is_empty());
    }

    #[test]
    fn stats_without_descriptive_fields_are_skipped() {
        let mut state = ScannerState::new(ScannerFilters::default());
        let payload = PairStatsPayload {
            pair: PairStatsPair {
                pair_address: "ghost".to_string(),
                token1_address: Some("ghost-token".to_string()),
                ..Default::default()
            },
            migration_progress: None,
        };

        assert_eq!(apply_pair_stats(&mut state, &payload), StatsOutcome::Skipped);
        assert!(state.new.rows.is_empty());
    }

    #[test]
    fn tick_skips_outliers_unknown_rows_and_missing_prices() {
        let state = state_with_trending(vec![record("p1", 1.0)]);
        let mut buffer = TickBuffer::default();
        let outlier = SwapWire {
            is_outlier: Some(true),
            ..swap(5.0, "p1-token")
        };

        assert_eq!(
            accumulate_tick(&state, &mut buffer, &tick("p1", vec![outlier])),
            TickOutcome::NoUsableSwap
        );
        assert_eq!(
            accumulate_tick(&state, &mut buffer, &tick("p1", vec![SwapWire::default()])),
            TickOutcome::NoUsableSwap
        );
        assert_eq!(
            accumulate_tick(&state, &mut buffer, &tick("zz", vec![swap(1.0, "x")])),
            TickOutcome::UnknownRow
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn tick_recomputes_market_cap_from_supply() {
        let mut row = record("p1", 1.0);
        row.total_supply = Some(1_000.0);
        row.market_cap = 1_000.0;
        let mut state = state_with_trending(vec![row]);
        let mut buffer = TickBuffer::default();

        let outcome = accumulate_tick(&state, &mut buffer, &tick("p1", vec![swap(1.5, "p1-token")]));
        assert_eq!(outcome, TickOutcome::Buffered { armed: true });
        apply_flush(&mut state, &buffer.drain());

        let row = &state.trending.rows[0];
        assert_eq!(row.market_cap, 1_500.0);
        assert_eq!(row.transactions.buys, 1);
        assert!((row.volume_usd - 3.0).abs() < 1e-9);
    }

    #[test]
    fn tick_without_supply_leaves_market_cap() {
        let mut row = record("p1", 1.0);
        row.market_cap = 777.0;
        let mut state = state_with_trending(vec![row]);
        let mut buffer = TickBuffer::default();

        accumulate_tick(&state, &mut buffer, &tick("p1", vec![swap(2.0, "other")]));
        apply_flush(&mut state, &buffer.drain());

        assert_eq!(state.trending.rows[0].market_cap, 777.0);
        assert_eq!(state.trending.rows[0].transactions.sells, 1);
    }

    #[test]
    fn tick_without_moved_in_address_counts_no_trade() {
        let mut state = state_with_trending(vec![record("p1", 1.0)]);
        let mut buffer = TickBuffer::default();
        let unknown_side = SwapWire {
            price_token1_usd: Some(1.1),
            amount_token1: Some(2.0),
            ..Default::default()
        };

        accumulate_tick(&state, &mut buffer, &tick("p1", vec![unknown_side]));
        apply_flush(&mut state, &buffer.drain());

        let row = &state.trending.rows[0];
        assert_eq!(row.price_usd, 1.1);
        assert_eq!(row.transactions.buys, 0);
        assert_eq!(row.transactions.sells, 0);
        assert!((row.volume_usd - 2.2).abs() < 1e-9);
    }

    #[test]
    fn burst_of_ticks_matches_end_to_end_history() {
        let mut state = state_with_trending(vec![record("P1", 1.0)]);
        let mut buffer = TickBuffer::default();
        let mut armed = 0;

        for price in [1.1, 1.2, 1.3] {
            if let TickOutcome::Buffered { armed: true } =
                accumulate_tick(&state, &mut buffer, &tick("P1", vec![swap(price, "P1-token")]))
            {
                armed += 1;
            }
        }
        apply_flush(&mut state, &buffer.drain());

        assert_eq!(armed, 1);
        let row = &state.trending.rows[0];
        assert_eq!(row.price_usd, 1.3);
        assert_eq!(row.price_history.to_vec(), vec![1.0, 1.1, 1.2, 1.3]);
    }
}
