use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::http_client::{
    HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient, DEFAULT_TIMEOUT,
};
use crate::provider::{
    FetchPage, FinancialPage, FinancialQuery, MarketDataProvider, PageCursor, ProviderError,
    ProviderFuture, QuotaSource, RawFinancialRow, RawRow, SeriesQuery,
};
use crate::{
    ControlKind, Instrument, InstrumentCode, MarketSegment, QuotaClass, QuotaStatus, SectionKind,
    SupervisionKind, TradingStatus,
};

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8765";

/// HTTP status the bridge uses when it has no live terminal session.
const STATUS_SESSION_UNAVAILABLE: u16 = 503;

/// Provider adapter for the local bridge process that fronts the broker
/// terminal session.
#[derive(Clone)]
pub struct BridgeAdapter {
    base_url: String,
    http_client: Arc<dyn HttpClient>,
    token: Option<String>,
    timeout: Duration,
}

impl BridgeAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()), base_url)
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http_client,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        let request = request
            .with_bearer(self.token.as_deref())
            .with_timeout(self.timeout);
        let url = request.url.clone();

        let response = self.http_client.execute(request).await.map_err(|error| {
            if error.is_connect() {
                ProviderError::not_connected(format!("bridge unreachable: {}", error.message()))
            } else {
                ProviderError::transport(format!("bridge transport error: {}", error.message()))
            }
        })?;

        debug!(url = %url, status = response.status, "bridge response");
        if response.status == STATUS_SESSION_UNAVAILABLE {
            return Err(ProviderError::not_connected(
                "bridge reports no terminal session",
            ));
        }
        if !response.is_success() {
            return Err(ProviderError::transport(format!(
                "bridge returned HTTP status {}",
                response.status
            )));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self.send(HttpRequest::get(self.url(path))).await?;
        decode(path, &response.body)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let body = serde_json::to_string(body).map_err(|error| {
            ProviderError::protocol(format!("failed to encode {path} request: {error}"))
        })?;
        let response = self
            .send(HttpRequest::post_json(self.url(path), body))
            .await?;
        decode(path, &response.body)
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|error| {
        ProviderError::protocol(format!("failed to decode {path} response: {error}"))
    })
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct QuotaPayload {
    remaining_per_second: u32,
    remaining_per_minute: u32,
    second_reset_ms: u64,
    minute_reset_ms: u64,
}

#[derive(Debug, Serialize)]
struct ChartBody<'a> {
    query: &'a SeriesQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a PageCursor>,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    status: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    rows: Vec<RawRow>,
    #[serde(default)]
    continuation: Option<PageCursor>,
}

#[derive(Debug, Deserialize)]
struct DirectoryPayload {
    instruments: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    code: String,
    name: String,
    #[serde(default)]
    section: u8,
    #[serde(default)]
    control: u8,
    #[serde(default)]
    supervision: u8,
    #[serde(default)]
    status: u8,
}

#[derive(Debug, Serialize)]
struct FinancialBody<'a> {
    code: &'a InstrumentCode,
    period: char,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct FinancialPayload {
    status: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    rows: Vec<RawFinancialRow>,
}

impl DirectoryEntry {
    fn into_instrument(self, market: MarketSegment) -> Option<Instrument> {
        match InstrumentCode::parse(&self.code) {
            Ok(code) => Some(Instrument {
                code,
                name: self.name,
                market,
                section: SectionKind::from_code(self.section),
                control: ControlKind::from_code(self.control),
                supervision: SupervisionKind::from_code(self.supervision),
                status: TradingStatus::from_code(self.status),
            }),
            Err(error) => {
                warn!(market = %market, code = %self.code, error = %error, "skipping directory entry");
                None
            }
        }
    }
}

impl MarketDataProvider for BridgeAdapter {
    fn id(&self) -> &'static str {
        "bridge"
    }

    fn is_connected<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            match self.get_json::<StatusPayload>("/v1/status").await {
                Ok(payload) => Ok(payload.connected),
                Err(error) if error.is_connectivity() => Ok(false),
                Err(error) => Err(error),
            }
        })
    }

    fn series_page<'a>(
        &'a self,
        query: &'a SeriesQuery,
        cursor: Option<&'a PageCursor>,
    ) -> ProviderFuture<'a, FetchPage> {
        Box::pin(async move {
            let payload: ChartPayload = self
                .post_json("/v1/chart", &ChartBody { query, cursor })
                .await?;
            Ok(FetchPage {
                status: payload.status,
                message: payload.message,
                rows: payload.rows,
                continuation: payload.continuation,
            })
        })
    }

    fn instrument_directory<'a>(
        &'a self,
        market: MarketSegment,
    ) -> ProviderFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let path = format!("/v1/instruments?market={}", market.code());
            let payload: DirectoryPayload = self.get_json(&path).await?;
            Ok(payload
                .instruments
                .into_iter()
                .filter_map(|entry| entry.into_instrument(market))
                .collect())
        })
    }

    fn financials<'a>(&'a self, query: &'a FinancialQuery) -> ProviderFuture<'a, FinancialPage> {
        Box::pin(async move {
            let body = FinancialBody {
                code: &query.code,
                period: query.period.code(),
                count: query.count,
            };
            let payload: FinancialPayload = self.post_json("/v1/financials", &body).await?;
            Ok(FinancialPage {
                status: payload.status,
                message: payload.message,
                rows: payload.rows,
            })
        })
    }
}

impl QuotaSource for BridgeAdapter {
    fn quota_status<'a>(&'a self, class: QuotaClass) -> ProviderFuture<'a, QuotaStatus> {
        Box::pin(async move {
            let path = format!("/v1/quota/{}", urlencoding::encode(class.as_str()));
            let payload: QuotaPayload = self.get_json(&path).await?;
            Ok(QuotaStatus {
                remaining_per_second: payload.remaining_per_second,
                remaining_per_minute: payload.remaining_per_minute,
                second_reset: Duration::from_millis(payload.second_reset_ms),
                minute_reset: Duration::from_millis(payload.minute_reset_ms),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::http_client::{HttpError, HttpFuture, HttpMethod};
    use crate::provider::SeriesRequest;
    use crate::{BarTime, FinancialPeriod, Granularity};
    use time::macros::date;

    #[derive(Debug, Default)]
    struct RecordingHttpClient {
        responses: BTreeMap<String, Result<HttpResponse, HttpError>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn respond(mut self, path: &str, response: Result<HttpResponse, HttpError>) -> Self {
            self.responses
                .insert(format!("{DEFAULT_BRIDGE_URL}{path}"), response);
            self
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> HttpFuture<'a> {
            let response = self
                .responses
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "")));
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            Box::pin(async move { response })
        }
    }

    fn adapter(client: Arc<RecordingHttpClient>) -> BridgeAdapter {
        BridgeAdapter::with_http_client(client, format!("{DEFAULT_BRIDGE_URL}/"))
    }

    #[tokio::test]
    async fn chart_request_posts_query_and_decodes_page() {
        let client = Arc::new(RecordingHttpClient::default().respond(
            "/v1/chart",
            Ok(HttpResponse::ok_json(
                r#"{"status":0,"message":"","rows":[[20240103,100,110,95,105,1000,105000]],"continuation":"c-2"}"#,
            )),
        ));
        let bridge = adapter(client.clone()).with_token(Some(String::from("secret")));
        let request = SeriesRequest {
            code: InstrumentCode::parse("A005930").expect("code"),
            granularity: Granularity::Daily,
            start: BarTime::from_date(date!(2024 - 01 - 01)),
            end: BarTime::from_date(date!(2024 - 01 - 10)),
            adjusted: true,
        };
        let query = SeriesQuery::from_request(&request, &[0, 2, 3, 4, 5, 8, 9], 2_000);

        let page = bridge.series_page(&query, None).await.expect("page");

        assert_eq!(page.status, 0);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.continuation, Some(PageCursor::new("c-2")));

        let sent = client.recorded_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(
            sent[0].bearer.as_deref(),
            Some("secret")
        );
        let body: serde_json::Value =
            serde_json::from_str(sent[0].json_body.as_deref().expect("body")).expect("json body");
        assert_eq!(body["query"]["code"], "A005930");
        assert_eq!(body["query"]["period"], "D");
        assert_eq!(body["query"]["from_date"], 20240101);
        assert!(body.get("cursor").is_none());
    }

    #[tokio::test]
    async fn quota_payload_maps_reset_delays() {
        let client = Arc::new(RecordingHttpClient::default().respond(
            "/v1/quota/quote",
            Ok(HttpResponse::ok_json(
                r#"{"remaining_per_second":0,"remaining_per_minute":42,"second_reset_ms":750,"minute_reset_ms":31000}"#,
            )),
        ));

        let status = adapter(client)
            .quota_status(QuotaClass::Quote)
            .await
            .expect("quota");

        assert_eq!(status.remaining_per_second, 0);
        assert_eq!(status.remaining_per_minute, 42);
        assert_eq!(status.second_reset, Duration::from_millis(750));
    }

    #[tokio::test]
    async fn directory_entries_keep_flags_and_skip_bad_codes() {
        let client = Arc::new(RecordingHttpClient::default().respond(
            "/v1/instruments?market=2",
            Ok(HttpResponse::ok_json(
                r#"{"instruments":[
                    {"code":"A035720","name":"카카오","section":0,"control":0,"supervision":0,"status":0},
                    {"code":"A09-99","name":"broken"},
                    {"code":"A000020","name":"동화약품","section":0,"control":0,"supervision":1,"status":0}
                ]}"#,
            )),
        ));

        let instruments = adapter(client)
            .instrument_directory(MarketSegment::Kosdaq)
            .await
            .expect("directory");

        assert_eq!(instruments.len(), 2);
        assert_eq!(instruments[0].market, MarketSegment::Kosdaq);
        assert_eq!(instruments[1].supervision, SupervisionKind::Flagged(1));
    }

    #[tokio::test]
    async fn financial_request_sends_period_code() {
        let client = Arc::new(RecordingHttpClient::default().respond(
            "/v1/financials",
            Ok(HttpResponse::ok_json(
                r#"{"status":0,"rows":[{"settlement":202403,"quarter":1,"sales":71.9,"operating_profit":6.6,"net_profit":6.7,"per":null,"pbr":null,"roe":null,"debt_ratio":26.1}]}"#,
            )),
        ));
        let query = FinancialQuery {
            code: InstrumentCode::parse("A005930").expect("code"),
            period: FinancialPeriod::Quarter,
            count: 4,
        };

        let page = adapter(client.clone())
            .financials(&query)
            .await
            .expect("financials");

        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].per, None);
        let body = client.recorded_requests()[0].json_body.clone().expect("body");
        assert!(body.contains(r#""period":"Q""#), "{body}");
    }

    #[tokio::test]
    async fn unreachable_bridge_reads_as_disconnected() {
        let client = Arc::new(RecordingHttpClient::default().respond(
            "/v1/status",
            Err(HttpError::connect("connection refused")),
        ));
        let bridge = adapter(client);

        assert!(!bridge.is_connected().await.expect("probe"));

        let query = FinancialQuery {
            code: InstrumentCode::parse("A005930").expect("code"),
            period: FinancialPeriod::Annual,
            count: 1,
        };
        let error = bridge.financials(&query).await.expect_err("404 must fail");
        assert!(!error.is_connectivity());
    }

    #[tokio::test]
    async fn session_unavailable_and_bad_json_are_classified() {
        let client = Arc::new(
            RecordingHttpClient::default()
                .respond(
                    "/v1/quota/order",
                    Ok(HttpResponse {
                        status: 503,
                        body: String::new(),
                    }),
                )
                .respond("/v1/quota/realtime", Ok(HttpResponse::ok_json("not json"))),
        );
        let bridge = adapter(client);

        let error = bridge
            .quota_status(QuotaClass::Order)
            .await
            .expect_err("503");
        assert!(error.is_connectivity());

        let error = bridge
            .quota_status(QuotaClass::Realtime)
            .await
            .expect_err("protocol");
        assert_eq!(error.code(), "provider.protocol");
    }
}
