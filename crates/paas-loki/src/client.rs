//! Loki `query_range` client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use paas_domain::error::{Error, Result};
use paas_domain::ports::LogQuerier;

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const BUILD_LOG_LIMIT: u32 = 5000;

/// Queries a Loki-compatible endpoint for historical pod logs.
pub struct LokiClient {
    base_url: String,
    http: reqwest::Client,
}

impl LokiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(Error::internal)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<String> {
        let start_ns = start.timestamp_nanos_opt().unwrap_or(0).to_string();
        let end_ns = end.timestamp_nanos_opt().unwrap_or(0).to_string();
        let limit = limit.to_string();
        let params = [
            ("query", query),
            ("start", start_ns.as_str()),
            ("end", end_ns.as_str()),
            ("direction", "forward"),
            ("limit", limit.as_str()),
        ];

        let url = format!("{}/loki/api/v1/query_range", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::internal(format!("loki: request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::internal(format!(
                "loki: unexpected status {status}"
            )));
        }

        let body: QueryRangeResponse = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("loki: decode response: {e}")))?;
        if body.status != "success" {
            return Err(Error::internal(format!(
                "loki: query status {:?}",
                body.status
            )));
        }

        Ok(extract_logs(body.data))
    }
}

#[async_trait]
impl LogQuerier for LokiClient {
    /// Build pods are named after the job, `kaniko-{id-without-dashes}`.
    async fn query_build_logs(
        &self,
        namespace: &str,
        build_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<String> {
        let pod_prefix = format!("kaniko-{}", build_id.replace('-', ""));
        let query = format!(r#"{{namespace="{namespace}", pod=~"{pod_prefix}.*"}}"#);
        self.query_range(&query, start, end, BUILD_LOG_LIMIT).await
    }

    async fn query_app_logs(
        &self,
        namespace: &str,
        app_name: &str,
        lane: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<String> {
        let pod_prefix = if lane.is_empty() {
            format!("{app_name}-")
        } else {
            format!("{app_name}-{lane}-")
        };
        let query = format!(r#"{{namespace="{namespace}", pod=~"{pod_prefix}.*"}}"#);
        self.query_range(&query, start, end, limit).await
    }
}

// Loki query_range response, modelling only the fields we read.

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    data: QueryRangeData,
}

#[derive(Debug, Default, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<Stream>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    /// Entries as `[timestamp_ns, line]` pairs.
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Merge all streams, sort by timestamp, and join the lines.
fn extract_logs(data: QueryRangeData) -> String {
    let mut entries: Vec<(String, String)> = Vec::new();
    for stream in data.result {
        for value in stream.values {
            if let [ts, line, ..] = value.as_slice() {
                entries.push((ts.clone(), line.clone()));
            }
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    for (_, line) in entries {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
