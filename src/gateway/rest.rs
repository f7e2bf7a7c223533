//! PostgREST client for the dashboard backend.
//!
//! Uses reqwest with the project's anon key sent as both `apikey` and
//! Bearer token. Reads target `{base}/rest/v1/{collection}`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::{realtime, ChangeFeed, DataGateway, Query, Update};
use crate::error::GatewayError;

/// Media type asking PostgREST for a bare object instead of an array.
const SINGLE_OBJECT_ACCEPT: &str = "application/vnd.pgrst.object+json";

pub struct RestGateway {
    client: reqwest::Client,
    base: Url,
    api_key: String,
}

impl RestGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GatewayError> {
        let base = Url::parse(base_url.trim_end_matches('/'))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            api_key: api_key.to_string(),
        })
    }

    fn collection_url(&self, collection: &str) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["rest", "v1", collection]);
        Ok(url)
    }

    /// Build the request URL for a read.
    pub fn select_url(&self, query: &Query) -> Result<Url, GatewayError> {
        let mut url = self.collection_url(&query.collection)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for (column, value) in &query.filters {
                pairs.append_pair(column, &format!("eq.{}", filter_literal(value)));
            }
            if let Some((column, direction)) = &query.order {
                pairs.append_pair("order", &format!("{}.{}", column, direction.as_str()));
            }
            if let Some(n) = query.limit {
                pairs.append_pair("limit", &n.to_string());
            }
        }
        Ok(url)
    }

    /// Build the request URL for an update-by-id.
    pub fn update_url(&self, update: &Update) -> Result<Url, GatewayError> {
        let mut url = self.collection_url(&update.collection)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", update.id));
        Ok(url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn select_request(&self, query: &Query) -> Result<reqwest::Request, GatewayError> {
        let mut builder = self.authorized(self.client.get(self.select_url(query)?));
        if query.single {
            builder = builder.header("Accept", SINGLE_OBJECT_ACCEPT);
        }
        Ok(builder.build()?)
    }

    fn update_request(&self, update: &Update) -> Result<reqwest::Request, GatewayError> {
        Ok(self
            .authorized(self.client.patch(self.update_url(update)?))
            .header("Prefer", "return=minimal")
            .json(&update.set)
            .build()?)
    }
}

/// PostgREST filter literal: strings unquoted, everything else as JSON.
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn a read response into rows.
///
/// A single-object read answered with 406 has zero (or several) rows and
/// yields none. Bodies may be an array, a bare object or empty.
fn read_rows(status: StatusCode, body: &str, query: &Query) -> Result<Vec<Value>, GatewayError> {
    if query.single && status == StatusCode::NOT_ACCEPTABLE {
        log::debug!("Gateway: no single row in {}", query.collection);
        return Ok(Vec::new());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound(query.collection.clone()));
    }
    if !status.is_success() {
        return Err(api_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(match serde_json::from_str::<Value>(body)? {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        row => vec![row],
    })
}

fn check_write(status: StatusCode, body: &str) -> Result<(), GatewayError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(api_error(status, body))
    }
}

fn api_error(status: StatusCode, body: &str) -> GatewayError {
    GatewayError::Api {
        status: status.as_u16(),
        message: body.to_string(),
    }
}

#[async_trait]
impl DataGateway for RestGateway {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let resp = self.client.execute(self.select_request(query)?).await?;
        let status = resp.status();
        let body = resp.text().await?;
        read_rows(status, &body, query)
    }

    async fn update(&self, update: &Update) -> Result<(), GatewayError> {
        let resp = self.client.execute(self.update_request(update)?).await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        check_write(status, &body)
    }

    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, GatewayError> {
        let endpoint = realtime::socket_url(&self.base, &self.api_key)?;
        realtime::connect(endpoint, channel).await
    }
}
