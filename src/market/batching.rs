use crate::market::store::ScannerState;
use crate::market::types::{TokenRecord, PRICE_HISTORY_CAPACITY};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// The effect of one accepted tick, before coalescing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDelta {
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume_usd: f64,
    /// `None` when the trade direction is unknown; no buy or sell is counted.
    pub side: Option<TradeSide>,
}

/// Accumulated, not yet applied effect of every tick for one row inside a flush window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingTick {
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume_delta: f64,
    pub buys: u64,
    pub sells: u64,
    /// Every price seen in the window, oldest first, bounded like the row history.
    pub price_samples: Vec<f64>,
}

impl PendingTick {
    fn merge(&mut self, delta: &TickDelta) {
        self.price = delta.price;
        if delta.market_cap.is_some() {
            self.market_cap = delta.market_cap;
        }
        self.volume_delta += delta.volume_usd;
        match delta.side {
            Some(TradeSide::Buy) => self.buys += 1,
            Some(TradeSide::Sell) => self.sells += 1,
            None => {}
        }
        self.price_samples.push(delta.price);
        if self.price_samples.len() > PRICE_HISTORY_CAPACITY {
            let overflow = self.price_samples.len() - PRICE_HISTORY_CAPACITY;
            self.price_samples.drain(..overflow);
        }
    }

    fn apply_to(&self, row: &mut TokenRecord) {
        row.price_usd = self.price;
        if let Some(market_cap) = self.market_cap {
            row.market_cap = market_cap;
        }
        row.volume_usd += self.volume_delta;
        row.transactions.buys += self.buys;
        row.transactions.sells += self.sells;
        for sample in &self.price_samples {
            row.price_history.push(*sample);
        }
    }
}

/// Per-row tick coalescing with a single flush timer.
#[derive(Debug, Default)]
pub struct TickBuffer {
    pending: HashMap<String, PendingTick>,
    armed: bool,
}

impl TickBuffer {
    /// Folds a delta into the pending entry. Returns `true` when this call armed the
    /// flush timer, which happens only for the first entry after the last drain.
    pub fn record(&mut self, row_id: &str, delta: TickDelta) -> bool {
        self.pending
            .entry(row_id.to_string())
            .or_default()
            .merge(&delta);
        if self.armed {
            return false;
        }
        self.armed = true;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Empties the buffer and disarms the timer in one step.
    pub fn drain(&mut self) -> HashMap<String, PendingTick> {
        self.armed = false;
        std::mem::take(&mut self.pending)
    }
}

/// Applies drained ticks to every table holding the row. Returns the number of rows touched.
pub fn apply_flush(state: &mut ScannerState, pending: &HashMap<String, PendingTick>) -> usize {
    let mut touched = 0;
    for table in state.tables_mut() {
        for row in table.rows.iter_mut() {
            if let Some(tick) = pending.get(&row.id) {
                tick.apply_to(row);
                touched += 1;
            }
        }
    }
    touched
}
