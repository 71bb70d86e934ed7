use axum::http::StatusCode;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::auth::Session;
use crate::series::intervals::Granularity;
use crate::series::reading::{DeviceId, RawBatch};
use crate::services::catalog::{DeviceTypeInfo, ObjectInfo, ParameterGroup, Period};
use crate::services::live::DeviceDashboard;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream base url cannot carry a path: {0}")]
    InvalidBaseUrl(String),
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode upstream {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl UpstreamError {
    /// Credential problems are the caller's; everything else is a bad gateway.
    pub fn into_rejection(self) -> (StatusCode, String) {
        match self {
            Self::Status { status, .. }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                (status, "Upstream rejected credentials".to_string())
            }
            other => {
                tracing::warn!(error = %other, "upstream metering API call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "Upstream metering API unavailable".to_string(),
                )
            }
        }
    }
}

/// Filter set for one readings fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingsQuery {
    pub period: Period,
    pub meter_type: String,
    pub aggregation: Granularity,
    pub object_ids: Vec<i64>,
    pub meter_ids: Vec<DeviceId>,
    pub parameters: Vec<String>,
}

impl ReadingsQuery {
    /// Query pairs with list filters as repeated keys.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("period", self.period.as_str().to_string())];
        if let Some((from, to)) = self.period.custom_bounds() {
            pairs.push(("dateFrom", from));
            pairs.push(("dateTo", to));
        }
        pairs.push(("meterType", self.meter_type.clone()));
        pairs.push(("aggregation", self.aggregation.as_str().to_string()));
        pairs.extend(self.object_ids.iter().map(|id| ("objectIds", id.to_string())));
        pairs.extend(self.meter_ids.iter().map(|id| ("meterIds", id.to_string())));
        pairs.extend(self.parameters.iter().map(|code| ("parameters", code.clone())));
        pairs
    }
}

#[derive(Deserialize)]
struct ReadingsEnvelope {
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
}

/// Typed client for the upstream metering API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: Url,
}

impl UpstreamClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, UpstreamError> {
        if base_url.cannot_be_a_base() {
            return Err(UpstreamError::InvalidBaseUrl(base_url.to_string()));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn readings_url(&self, query: &ReadingsQuery) -> Result<Url, UpstreamError> {
        let mut url = self.endpoint(&["api", "Visualization", "data"])?;
        url.query_pairs_mut()
            .extend_pairs(query.pairs().iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        bearer: Option<String>,
        what: &'static str,
    ) -> Result<T, UpstreamError> {
        let mut request = self.http.get(url);
        if let Some(bearer) = bearer {
            request = request.header(AUTHORIZATION, bearer);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        resp.json::<T>()
            .await
            .map_err(|source| UpstreamError::Decode { what, source })
    }

    pub async fn fetch_readings(
        &self,
        session: &Session,
        query: &ReadingsQuery,
    ) -> Result<RawBatch, UpstreamError> {
        let url = self.readings_url(query)?;
        let envelope: ReadingsEnvelope = self
            .get_json(url, Some(session.bearer()), "readings")
            .await?;
        Ok(RawBatch::decode(envelope.data.unwrap_or_default()))
    }

    pub async fn fetch_objects(&self, session: &Session) -> Result<Vec<ObjectInfo>, UpstreamError> {
        let url = self.endpoint(&["api", "Visualization", "objects"])?;
        self.get_json(url, Some(session.bearer()), "objects").await
    }

    pub async fn fetch_device_types(
        &self,
        session: &Session,
    ) -> Result<Vec<DeviceTypeInfo>, UpstreamError> {
        let url = self.endpoint(&["api", "Visualization", "device-types"])?;
        self.get_json(url, Some(session.bearer()), "device types")
            .await
    }

    pub async fn fetch_parameters(
        &self,
        session: &Session,
        meter_type: &str,
    ) -> Result<Vec<ParameterGroup>, UpstreamError> {
        let url = self.endpoint(&["api", "Visualization", "parameters-readable", meter_type])?;
        self.get_json(url, Some(session.bearer()), "parameters")
            .await
    }

    /// The background feed has no caller session; it uses the service token when configured.
    pub async fn fetch_device_board(
        &self,
        session: Option<&Session>,
    ) -> Result<DeviceDashboard, UpstreamError> {
        let url = self.endpoint(&["api", "Device", "dashboard"])?;
        self.get_json(url, session.map(Session::bearer), "device dashboard")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn client(base: &str) -> UpstreamClient {
        UpstreamClient::new(Url::parse(base).expect("url"), Duration::from_secs(5))
            .expect("client")
    }

    fn query(period: Period) -> ReadingsQuery {
        ReadingsQuery {
            period,
            meter_type: "electrical".to_string(),
            aggregation: Granularity::Hour,
            object_ids: vec![1, 2],
            meter_ids: vec![10],
            parameters: vec!["IL1".to_string(), "U L1".to_string()],
        }
    }

    #[test]
    fn readings_url_repeats_list_keys() {
        let url = client("http://meters.local:5000")
            .readings_url(&query(Period::LastWeek))
            .expect("url");
        assert_eq!(url.path(), "/api/Visualization/data");
        assert_eq!(
            url.query(),
            Some(
                "period=lastWeek&meterType=electrical&aggregation=hour&objectIds=1&objectIds=2&meterIds=10&parameters=IL1&parameters=U+L1"
            )
        );
    }

    #[test]
    fn custom_period_adds_date_bounds() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).expect("date");
        let period = Period::Custom {
            from: day.and_hms_opt(8, 0, 0).expect("time"),
            to: day.and_hms_opt(18, 30, 0).expect("time"),
        };
        let pairs = query(period).pairs();
        assert_eq!(pairs[0], ("period", "custom".to_string()));
        assert_eq!(pairs[1], ("dateFrom", "2025-06-01T08:00".to_string()));
        assert_eq!(pairs[2], ("dateTo", "2025-06-01T18:30".to_string()));
    }

    #[test]
    fn endpoints_keep_base_path_and_escape_segments() {
        let upstream = client("https://gateway.local/metering/");
        let url = upstream
            .endpoint(&["api", "Visualization", "parameters-readable", "hot water"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://gateway.local/metering/api/Visualization/parameters-readable/hot%20water"
        );
    }

    #[test]
    fn readings_envelope_keeps_elements_undecoded() {
        let envelope: ReadingsEnvelope = serde_json::from_str(
            r#"{"data":[{"timestamp":null,"deviceId":1,"values":{}},{"timestamp":"2025-06-02T09:00:00Z","deviceId":1,"values":{"IL1":1.0}}]}"#,
        )
        .expect("envelope");
        let batch = RawBatch::decode(envelope.data.unwrap_or_default());
        assert_eq!(batch.readings.len(), 2);
        assert_eq!(batch.malformed, 0);

        let empty: ReadingsEnvelope = serde_json::from_str(r#"{"data":null}"#).expect("null data");
        assert!(empty.data.is_none());
    }

    #[test]
    fn credential_failures_pass_through_and_others_become_bad_gateway() {
        let (status, _) = UpstreamError::Status {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        }
        .into_rejection();
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, message) = UpstreamError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        }
        .into_rejection();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!message.contains("boom"));
    }
}
