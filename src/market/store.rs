use crate::market::filters::{FilterDescriptor, ScannerFilters};
use crate::market::subscriptions::RowKey;
use crate::market::types::{ConnectionState, LoadState, OrderBy, RankBy, TableKind, TokenRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// One of the two independently ranked tables.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub kind: TableKind,
    pub rows: Vec<TokenRecord>,
    pub page: u32,
    pub total_rows: u64,
    pub rank_by: RankBy,
    pub order_by: OrderBy,
    pub load_state: LoadState,
    pub loading_more: bool,
    pub error: Option<String>,
    /// Descriptor currently registered on the push filter channel for this table.
    pub active_filter: Option<FilterDescriptor>,
    /// Sequence number of the latest filter subscription issued by this table.
    pub filter_seq: u64,
    rank_requests: HashMap<RankBy, u64>,
}

impl ResultSet {
    pub fn new(kind: TableKind) -> Self {
        let (rank_by, order_by) = match kind {
            TableKind::Trending => (RankBy::Volume, OrderBy::Desc),
            TableKind::New => (RankBy::Age, OrderBy::Desc),
        };
        Self {
            kind,
            rows: Vec::new(),
            page: 1,
            total_rows: 0,
            rank_by,
            order_by,
            load_state: LoadState::Idle,
            loading_more: false,
            error: None,
            active_filter: None,
            filter_seq: 0,
            rank_requests: HashMap::new(),
        }
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }

    pub fn row(&self, id: &str) -> Option<&TokenRecord> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn row_mut(&mut self, id: &str) -> Option<&mut TokenRecord> {
        self.rows.iter_mut().find(|row| row.id == id)
    }

    pub fn has_more(&self) -> bool {
        (self.rows.len() as u64) < self.total_rows
    }

    pub fn is_loading(&self) -> bool {
        self.load_state == LoadState::Loading || self.loading_more
    }

    /// Remembers that this table issued a filter subscription for `rank_by`.
    pub fn note_filter_request(&mut self, rank_by: RankBy, seq: u64) {
        self.filter_seq = seq;
        self.rank_requests.insert(rank_by, seq);
    }

    pub fn last_request_for(&self, rank_by: RankBy) -> Option<u64> {
        self.rank_requests.get(&rank_by).copied()
    }
}

/// The engine-owned state: both tables and the shared filter state.
#[derive(Debug, Clone)]
pub struct ScannerState {
    pub trending: ResultSet,
    pub new: ResultSet,
    pub filters: ScannerFilters,
    seq: u64,
}

impl ScannerState {
    pub fn new(filters: ScannerFilters) -> Self {
        Self {
            trending: ResultSet::new(TableKind::Trending),
            new: ResultSet::new(TableKind::New),
            filters,
            seq: 0,
        }
    }

    pub fn table(&self, kind: TableKind) -> &ResultSet {
        match kind {
            TableKind::Trending => &self.trending,
            TableKind::New => &self.new,
        }
    }

    pub fn table_mut(&mut self, kind: TableKind) -> &mut ResultSet {
        match kind {
            TableKind::Trending => &mut self.trending,
            TableKind::New => &mut self.new,
        }
    }

    pub fn tables_mut(&mut self) -> [&mut ResultSet; 2] {
        [&mut self.trending, &mut self.new]
    }

    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn find_row(&self, id: &str) -> Option<&TokenRecord> {
        self.trending.row(id).or_else(|| self.new.row(id))
    }

    /// Union of row keys across both tables; the desired row subscriptions.
    pub fn row_keys(&self) -> BTreeSet<RowKey> {
        self.trending
            .rows
            .iter()
            .chain(self.new.rows.iter())
            .map(RowKey::from_record)
            .collect()
    }

    pub fn view(&self, connection: ConnectionState) -> ScannerView {
        ScannerView {
            trending: TableView::from(&self.trending),
            new: TableView::from(&self.new),
            filters: self.filters.clone(),
            connection,
            updated_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub kind: TableKind,
    pub rows: Vec<TokenRecord>,
    pub page: u32,
    pub total_rows: u64,
    pub has_more: bool,
    pub rank_by: RankBy,
    pub order_by: OrderBy,
    pub load_state: LoadState,
    pub loading_more: bool,
    pub error: Option<String>,
}

impl From<&ResultSet> for TableView {
    fn from(set: &ResultSet) -> Self {
        Self {
            kind: set.kind,
            rows: set.rows.clone(),
            page: set.page,
            total_rows: set.total_rows,
            has_more: set.has_more(),
            rank_by: set.rank_by,
            order_by: set.order_by,
            load_state: set.load_state,
            loading_more: set.loading_more,
            error: set.error.clone(),
        }
    }
}

/// Read-only snapshot published for the UI after every state change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerView {
    pub trending: TableView,
    pub new: TableView,
    pub filters: ScannerFilters,
    pub connection: ConnectionState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScannerView {
    pub fn idle(filters: ScannerFilters) -> Self {
        let mut view = ScannerState::new(filters).view(ConnectionState::Stopped);
        view.updated_at = None;
        view
    }

    pub fn table(&self, kind: TableKind) -> &TableView {
        match kind {
            TableKind::Trending => &self.trending,
            TableKind::New => &self.new,
        }
    }
}
