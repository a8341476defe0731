//! ECS inventory collector: walks every page of the inventory API on
//! each scrape and streams one sample per metric family per instance.
//!
//! Nothing is cached between scrapes. A transport, status or decode error
//! ends the current scrape; samples already sent for earlier pages stay
//! sent, and the next scrape starts over from page 1.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ApiConfig, DEFAULT_PAGE_SIZE};
use crate::token::TokenCache;

pub mod metrics;
pub mod record;

pub use metrics::{map_record, MetricDescs, Sample};
use record::{InventoryQuery, PageResponse};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("api request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api request returned status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("json unmarshal error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("sample receiver closed")]
    SinkClosed,
}

/// Counters for one scrape, reported whether it finished or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub pages: u32,
    pub records: u64,
    pub samples: u64,
    pub total_size: i64,
    /// The page cap stopped the walk before `totalSize` was reached.
    pub truncated: bool,
}

pub struct EcsCollector {
    client: reqwest::Client,
    endpoint: String,
    page_size: u32,
    max_pages: u32,
    request_timeout: Duration,
    body: Vec<u8>,
    tokens: Arc<TokenCache>,
    descs: MetricDescs,
}

impl EcsCollector {
    pub fn new(cfg: &ApiConfig, tokens: Arc<TokenCache>) -> anyhow::Result<Self> {
        if cfg.insecure_skip_verify {
            warn!(
                endpoint = %cfg.endpoint,
                "TLS certificate verification disabled for inventory endpoint"
            );
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            page_size: if cfg.page_size == 0 { DEFAULT_PAGE_SIZE } else { cfg.page_size },
            max_pages: cfg.max_pages,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs.max(1)),
            body: serde_json::to_vec(&InventoryQuery::instances())?,
            tokens,
            descs: MetricDescs::new()?,
        })
    }

    pub fn describe(&self) -> Vec<&prometheus::core::Desc> {
        self.descs.all()
    }

    /// Run one scrape, sending samples to `tx` as each page arrives.
    /// Errors are logged here and never reach the caller.
    pub async fn collect(&self, tx: mpsc::Sender<Sample>) {
        let started = Instant::now();
        let mut stats = ScrapeStats::default();
        let result = self.scrape(&tx, &mut stats).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => info!(
                pages = stats.pages,
                records = stats.records,
                samples = stats.samples,
                total_size = stats.total_size,
                truncated = stats.truncated,
                elapsed_ms,
                "scrape complete"
            ),
            Err(e) => error!(
                pages = stats.pages,
                samples = stats.samples,
                elapsed_ms,
                "scrape aborted: {}",
                e
            ),
        }
    }

    /// Walk pages from 1 until `pageNo * pageSize >= totalSize`, using the
    /// `totalSize` of the page just fetched.
    pub async fn scrape(
        &self,
        tx: &mpsc::Sender<Sample>,
        stats: &mut ScrapeStats,
    ) -> Result<(), ScrapeError> {
        let mut page_no: u32 = 1;

        loop {
            let page = self.fetch_page(page_no).await?;
            stats.pages += 1;
            stats.total_size = page.total_size;
            debug!(
                page_no,
                upstream_page_no = page.page_no,
                upstream_page_size = page.page_size,
                total_size = page.total_size,
                records = page.datas.len(),
                "fetched inventory page"
            );

            for item in &page.datas {
                stats.records += 1;
                for sample in map_record(item) {
                    tx.send(sample).await.map_err(|_| ScrapeError::SinkClosed)?;
                    stats.samples += 1;
                }
            }

            if i64::from(page_no) * i64::from(self.page_size) >= page.total_size {
                return Ok(());
            }
            if self.max_pages > 0 && page_no >= self.max_pages {
                warn!(
                    max_pages = self.max_pages,
                    total_size = page.total_size,
                    "page limit reached before totalSize; ending scrape"
                );
                stats.truncated = true;
                return Ok(());
            }
            page_no += 1;
        }
    }

    async fn fetch_page(&self, page_no: u32) -> Result<PageResponse, ScrapeError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("pageNo", page_no), ("pageSize", self.page_size)])
            .header(AUTH_TOKEN_HEADER, self.tokens.token())
            .header(CONTENT_TYPE, "application/json")
            .body(self.body.clone())
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ScrapeError::UnexpectedStatus(status));
        }

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{api_config, MockUpstream};
    use crate::token::IamClient;
    use super::metrics::{RAM_METRIC, RUNNING_TIME_METRIC};
    use std::sync::atomic::Ordering;

    async fn collector(upstream: &MockUpstream, tweak: impl FnOnce(&mut ApiConfig)) -> EcsCollector {
        let mut cfg = api_config(&upstream.base_url);
        tweak(&mut cfg);
        let tokens = Arc::new(TokenCache::new(
            IamClient::new(&cfg).unwrap(),
            Duration::from_secs(3600),
        ));
        tokens.refresh().await.unwrap();
        EcsCollector::new(&cfg, tokens).unwrap()
    }

    /// Run a scrape to completion and gather everything it sent.
    async fn run(collector: &EcsCollector) -> (Result<(), ScrapeError>, ScrapeStats, Vec<Sample>) {
        let (tx, mut rx) = mpsc::channel(16);
        let mut stats = ScrapeStats::default();
        let drain = async move {
            let mut out = Vec::new();
            while let Some(s) = rx.recv().await {
                out.push(s);
            }
            out
        };
        let (result, samples) = tokio::join!(
            async {
                let r = collector.scrape(&tx, &mut stats).await;
                drop(tx);
                r
            },
            drain
        );
        (result, stats, samples)
    }

    #[tokio::test]
    async fn test_walks_all_pages() {
        let upstream = MockUpstream::start().await.with_total(250);
        let collector = collector(&upstream, |_| {}).await;

        let (result, stats, samples) = run(&collector).await;
        result.unwrap();

        let hits = upstream.state.hits();
        let pages: Vec<u32> = hits.iter().map(|h| h.page_no).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(hits.iter().all(|h| h.page_size == 100));
        assert!(hits.iter().all(|h| h.token == "token-1"));

        assert_eq!(stats.pages, 3);
        assert_eq!(stats.records, 250);
        assert_eq!(samples.len(), 500);
        assert!(!stats.truncated);
    }

    #[tokio::test]
    async fn test_exact_multiple_stops_on_last_full_page() {
        let upstream = MockUpstream::start().await.with_total(200);
        let collector = collector(&upstream, |_| {}).await;

        let (result, stats, _) = run(&collector).await;
        result.unwrap();
        assert_eq!(upstream.state.hits().len(), 2);
        assert_eq!(stats.records, 200);
    }

    #[tokio::test]
    async fn test_empty_inventory_issues_one_request() {
        let upstream = MockUpstream::start().await.with_total(0);
        let collector = collector(&upstream, |_| {}).await;

        let (result, stats, samples) = run(&collector).await;
        result.unwrap();
        assert_eq!(upstream.state.hits().len(), 1);
        assert_eq!(stats.records, 0);
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_zero_page_size_defaults_to_100() {
        let upstream = MockUpstream::start().await.with_total(150);
        let collector = collector(&upstream, |cfg| cfg.page_size = 0).await;

        let (result, _, _) = run(&collector).await;
        result.unwrap();
        let hits = upstream.state.hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].page_size, 100);
    }

    #[tokio::test]
    async fn test_error_on_page_two_keeps_page_one() {
        let upstream = MockUpstream::start().await.with_total(250);
        upstream.state.fail_page.store(2, Ordering::SeqCst);
        let collector = collector(&upstream, |_| {}).await;

        let (result, stats, samples) = run(&collector).await;
        assert!(matches!(
            result,
            Err(ScrapeError::UnexpectedStatus(s)) if s == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(upstream.state.hits().len(), 2);
        assert_eq!(stats.pages, 1);
        assert_eq!(samples.len(), 200);
        assert!(samples.iter().all(|s| {
            let n: u32 = s.labels[0].trim_start_matches("vm-").parse().unwrap();
            n < 100
        }));
    }

    #[tokio::test]
    async fn test_undecodable_page_aborts() {
        let upstream = MockUpstream::start().await.with_total(250);
        upstream.state.garbage_page.store(1, Ordering::SeqCst);
        let collector = collector(&upstream, |_| {}).await;

        let (result, _, samples) = run(&collector).await;
        assert!(matches!(result, Err(ScrapeError::Decode(_))));
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_page_cap_ends_runaway_total() {
        let upstream = MockUpstream::start().await;
        upstream.state.grow_total.store(true, Ordering::SeqCst);
        let collector = collector(&upstream, |cfg| {
            cfg.page_size = 10;
            cfg.max_pages = 5;
        })
        .await;

        let (result, stats, samples) = run(&collector).await;
        result.unwrap();
        assert_eq!(upstream.state.hits().len(), 5);
        assert!(stats.truncated);
        assert_eq!(samples.len(), 100);
    }

    #[tokio::test]
    async fn test_closed_receiver_stops_scrape() {
        let upstream = MockUpstream::start().await.with_total(250);
        let collector = collector(&upstream, |_| {}).await;

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut stats = ScrapeStats::default();
        let result = collector.scrape(&tx, &mut stats).await;
        assert!(matches!(result, Err(ScrapeError::SinkClosed)));
        assert_eq!(upstream.state.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_collect_swallows_errors() {
        let upstream = MockUpstream::start().await.with_total(250);
        upstream.state.fail_page.store(1, Ordering::SeqCst);
        let collector = collector(&upstream, |_| {}).await;

        let (tx, mut rx) = mpsc::channel(16);
        collector.collect(tx).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_samples_carry_record_fields() {
        let upstream = MockUpstream::start().await.with_total(1);
        let collector = collector(&upstream, |_| {}).await;

        let (result, _, samples) = run(&collector).await;
        result.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric, RUNNING_TIME_METRIC);
        assert_eq!(samples[0].labels[0], "vm-0");
        assert_eq!(samples[0].labels[2], "ACTIVE");
        assert_eq!(samples[1].metric, RAM_METRIC);
        assert_eq!(samples[1].value, 8.0);
    }

    #[tokio::test]
    async fn test_describe_lists_both_families() {
        let upstream = MockUpstream::start().await;
        let collector = collector(&upstream, |_| {}).await;
        let names: Vec<&str> = collector.describe().iter().map(|d| d.fq_name.as_str()).collect();
        assert_eq!(names, vec![RUNNING_TIME_METRIC, RAM_METRIC]);
    }
}
