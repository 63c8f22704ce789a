use crate::error::AppError;
use crate::market::filters::FilterDescriptor;
use crate::market::normalize::normalize;
use crate::market::types::{ScannerConfig, TokenRecord};
use crate::market::wire::{parse_scanner_page, ScannerPageWire};
use reqwest::Client;
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub type ScannerWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn scanner_endpoint(api_base_url: &str) -> String {
    format!("{api_base_url}/scanner")
}

pub async fn connect_scanner_stream(ws_url: &str) -> Result<ScannerWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(ws_url, Some(ws_config), true).await?;
    Ok(stream)
}

/// One normalized REST page.
#[derive(Debug, Clone, Default)]
pub struct ScannerPage {
    pub rows: Vec<TokenRecord>,
    pub total_rows: u64,
}

impl From<ScannerPageWire> for ScannerPage {
    fn from(wire: ScannerPageWire) -> Self {
        let rows: Vec<TokenRecord> = wire.pairs.iter().map(normalize).collect();
        let total_rows = wire.total_rows.unwrap_or(rows.len() as u64);
        Self { rows, total_rows }
    }
}

pub trait ScannerPageSource: Send + Sync + 'static {
    fn fetch_page(
        &self,
        descriptor: &FilterDescriptor,
    ) -> impl Future<Output = Result<ScannerPage, AppError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpScannerApi {
    client: Client,
    api_base_url: String,
}

impl HttpScannerApi {
    pub fn new(config: &ScannerConfig) -> Result<Self, AppError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
        })
    }
}

impl ScannerPageSource for HttpScannerApi {
    async fn fetch_page(&self, descriptor: &FilterDescriptor) -> Result<ScannerPage, AppError> {
        let endpoint = scanner_endpoint(&self.api_base_url);
        debug!(
            rank_by = descriptor.rank_by.as_str(),
            page = descriptor.page,
            "fetching scanner page"
        );

        let response = self
            .client
            .get(endpoint)
            .query(&descriptor.query_pairs())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut payload = response.bytes().await?.to_vec();
        let wire = parse_scanner_page(payload.as_mut_slice())?;
        Ok(wire.into())
    }
}
