//! REST client for a PostgREST-style hosted backend.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::realtime_socket;
use super::{
    RealtimeStream, RemoteClient, RemoteError, RemoteFilter, RemoteResult, RemoteRow, UpsertAck,
};
use crate::config::BackendConfig;
use crate::util::{compact_text, millis_to_datetime};
use crate::version::VersionPolicy;

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct PostgrestRemote {
    config: BackendConfig,
    client: reqwest::Client,
    page_size: usize,
}

impl std::fmt::Debug for PostgrestRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestRemote")
            .field("config", &self.config)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl PostgrestRemote {
    pub fn new(config: BackendConfig) -> RemoteResult<Self> {
        Ok(Self {
            config,
            client: reqwest::Client::builder().build()?,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url,
            urlencoding::encode(table)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.config.bearer_token())
            .header("Accept", "application/json")
    }
}

#[async_trait]
impl RemoteClient for PostgrestRemote {
    async fn select(&self, table: &str, filter: RemoteFilter) -> RemoteResult<Vec<RemoteRow>> {
        let mut rows: Vec<RemoteRow> = Vec::new();
        let mut cursor = None;

        loop {
            let query = page_query(filter, cursor.as_ref(), self.page_size);
            let response = self
                .authorize(self.client.get(self.table_url(table)))
                .query(&query)
                .send()
                .await?;
            let response = ensure_success(response).await?;
            let page: Vec<RemoteRow> = response
                .json()
                .await
                .map_err(|error| RemoteError::Decode(format!("{table}: {error}")))?;

            let fetched = page.len();
            rows.extend(page);
            match rows.last() {
                Some(last) if fetched >= self.page_size => cursor = Some(PageCursor::after(last)),
                _ => break,
            }
        }

        tracing::debug!(table, rows = rows.len(), "Fetched remote rows");
        Ok(rows)
    }

    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> RemoteResult<UpsertAck> {
        if rows.is_empty() {
            return Ok(UpsertAck { rows: 0 });
        }

        let response = self
            .authorize(self.client.post(self.table_url(table)))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(UpsertAck { rows: rows.len() })
    }

    async fn subscribe(&self, topic: &str) -> RemoteResult<RealtimeStream> {
        realtime_socket::connect(&self.config, topic).await
    }

    async fn version_policy(&self, platform: &str) -> RemoteResult<VersionPolicy> {
        let url = format!("{}/rest/v1/rpc/client_version_policy", self.config.base_url);
        let response = self
            .authorize(self.client.post(url))
            .json(&json!({ "platform": platform }))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let payload = response
            .json::<VersionPolicyResponse>()
            .await
            .map_err(|error| RemoteError::Decode(error.to_string()))?;
        payload.try_into()
    }
}

/// Position after the last row of a page, in `(updated_at, id)` order.
///
/// Rows updated while the fetch is running move behind the cursor instead of
/// shifting later pages, so no row is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageCursor {
    updated_at: String,
    id: String,
}

impl PageCursor {
    fn after(row: &RemoteRow) -> Self {
        Self {
            updated_at: format_timestamp(row.updated_at),
            id: row.id.to_string(),
        }
    }
}

/// Full precision so the equality arm of the cursor matches stored values.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn page_query(
    filter: RemoteFilter,
    cursor: Option<&PageCursor>,
    page_size: usize,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        ("order", "updated_at.asc,id.asc".to_string()),
        ("limit", page_size.to_string()),
    ];
    match (cursor, filter) {
        // The cursor is already past the checkpoint.
        (Some(cursor), _) => query.push((
            "or",
            format!(
                "(updated_at.gt.\"{ts}\",and(updated_at.eq.\"{ts}\",id.gt.\"{id}\"))",
                ts = cursor.updated_at,
                id = cursor.id
            ),
        )),
        (None, RemoteFilter::UpdatedAfter(millis)) => query.push((
            "updated_at",
            format!("gt.{}", format_timestamp(millis_to_datetime(millis))),
        )),
        (None, RemoteFilter::All) => {}
    }
    query
}

#[derive(Debug, Deserialize)]
struct VersionPolicyResponse {
    min_version: String,
    current_version: String,
}

impl TryFrom<VersionPolicyResponse> for VersionPolicy {
    type Error = RemoteError;

    fn try_from(value: VersionPolicyResponse) -> RemoteResult<Self> {
        let parse = |raw: &str| {
            raw.parse()
                .map_err(|_| RemoteError::Decode(format!("invalid version '{raw}'")))
        };
        Ok(Self {
            min_version: parse(&value.min_version)?,
            current_version: parse(&value.current_version)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

pub(crate) async fn ensure_success(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.details {
                Some(details) if !details.trim().is_empty() => {
                    format!("{} ({})", message.trim(), compact_text(&details))
                }
                _ => message.trim().to_string(),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}
