//! # Continuation Fetcher
//!
//! Turns one [`SeriesRequest`] into as many governor-gated round-trips as the
//! provider needs, then returns one ascending, de-duplicated series.
//!
//! The provider session carries at most one page loop at a time: the loop
//! holds the shared session lock from the first page to the last.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::governor::AdmissionGovernor;
use crate::normalizer;
use crate::provider::{
    FinancialQuery, MarketDataProvider, PageCursor, ProviderError, SeriesQuery, SeriesRequest,
    STATUS_NO_DATA, STATUS_OK,
};
use crate::{Bar, FinancialPeriod, FinancialStatement, InstrumentCode, QuotaClass};

pub const DEFAULT_PAGE_SIZE: u32 = 2_000;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-zero, non-empty-range status. Rows of the failed loop are discarded.
    #[error("provider rejected request with status {status}: {message}")]
    Rejected { status: i32, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl FetchError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Provider(error) if error.is_connectivity())
    }
}

#[derive(Clone)]
pub struct ContinuationFetcher {
    provider: Arc<dyn MarketDataProvider>,
    governor: Arc<AdmissionGovernor>,
    session: Arc<Mutex<()>>,
    page_size: u32,
}

impl ContinuationFetcher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        governor: Arc<AdmissionGovernor>,
        page_size: u32,
    ) -> Self {
        Self {
            provider,
            governor,
            session: Arc::new(Mutex::new(())),
            page_size: page_size.max(1),
        }
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    /// Fetch every bar of `request`, oldest first.
    ///
    /// A "no data in range" status yields an empty series. Any other
    /// non-zero status aborts the loop with [`FetchError::Rejected`].
    pub async fn fetch(&self, request: &SeriesRequest) -> Result<Vec<Bar>, FetchError> {
        let fields = normalizer::field_ids(request.granularity);
        let query = SeriesQuery::from_request(request, fields, self.page_size);

        let _session = self.session.lock().await;
        let mut cursor: Option<PageCursor> = None;
        let mut bars = Vec::new();
        let mut pages = 0_usize;

        loop {
            let permit = self.governor.acquire(QuotaClass::Quote).await;
            let page = self.provider.series_page(&query, cursor.as_ref()).await?;
            drop(permit);
            pages += 1;

            match page.status {
                STATUS_OK => {}
                STATUS_NO_DATA => {
                    warn!(
                        code = %request.code,
                        granularity = %request.granularity,
                        from = query.from_date,
                        to = query.to_date,
                        message = %page.message,
                        "no data in requested range"
                    );
                    return Ok(Vec::new());
                }
                status => {
                    error!(
                        code = %request.code,
                        granularity = %request.granularity,
                        status,
                        message = %page.message,
                        "provider rejected chart request"
                    );
                    return Err(FetchError::Rejected {
                        status,
                        message: page.message,
                    });
                }
            }

            if page.rows.is_empty() {
                break;
            }

            debug!(
                code = %request.code,
                page = pages,
                rows = page.rows.len(),
                more = page.continuation.is_some(),
                "chart page received"
            );
            bars.extend(normalizer::parse_page(&request.code, &query.fields, &page.rows));

            match page.continuation {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let bars = normalizer::order_series(bars);
        info!(
            code = %request.code,
            granularity = %request.granularity,
            pages,
            bars = bars.len(),
            "series fetched"
        );
        Ok(bars)
    }

    /// One gated financial statement round-trip, oldest statement first.
    pub async fn fetch_financials(
        &self,
        code: &InstrumentCode,
        period: FinancialPeriod,
        count: u32,
    ) -> Result<Vec<FinancialStatement>, FetchError> {
        let query = FinancialQuery {
            code: code.clone(),
            period,
            count: count.max(1),
        };

        let page = {
            let _session = self.session.lock().await;
            let _permit = self.governor.acquire(QuotaClass::Quote).await;
            self.provider.financials(&query).await?
        };

        if page.status != STATUS_OK {
            error!(
                code = %code,
                period = %period,
                status = page.status,
                message = %page.message,
                "provider rejected financial statement request"
            );
            return Err(FetchError::Rejected {
                status: page.status,
                message: page.message,
            });
        }

        Ok(normalizer::financial_statements(code, period, &page.rows))
    }
}
