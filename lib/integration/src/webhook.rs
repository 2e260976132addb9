//! Webhook registrations.
//!
//! Some triggers are narrowed through `properties`: a deal-stage trigger
//! scoped to one stage carries the pipeline and stage ids, a form trigger
//! carries the form ids.

use crate::cache::TtlCache;
use crate::error::{ConnectorError, api_error};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, warn};
use umsatzio_core::{FormId, PipelineId, StageId, WebhookId};
use umsatzio_graphql::{GraphqlClient, GraphqlRequest};

/// Trigger fired when a deal moves between stages.
pub const UPDATE_DEAL_STAGE: &str = "updateDealStage";
/// Trigger fired when a lead form is submitted.
pub const SUBMIT_FORM: &str = "submitForm";

/// How long a URL to webhook mapping is trusted.
pub const WEBHOOK_URL_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Webhooks by exact URL.
///
/// Filled by lookups and by create or update echoes; deletes through the
/// same connector evict their entries.
pub type WebhookIndex = TtlCache<String, Webhook>;

const LIST_WEBHOOKS: &str = "query GetWebhooks { webhooks { id url triggers } }";
const CREATE_WEBHOOK: &str = "mutation CreateWebhook($input: CreateWebhookInput!) { createWebhook(input: $input) { id url triggers } }";
const UPDATE_WEBHOOK: &str = "mutation UpdateWebhook($id: ID!, $input: UpdateWebhookInput!) { updateWebhook(id: $id, input: $input) { id url triggers } }";
const DELETE_WEBHOOK: &str =
    "mutation DeleteWebhook($id: ID!) { deleteWebhook(id: $id) { id url triggers } }";

/// A registered webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub triggers: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Whether a deal-stage trigger fires for every stage or one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStageScope {
    #[default]
    All,
    Specific,
}

/// Parameters of `webhook.create` and `webhook.update`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookParams {
    /// Required for create, ignored when blank on update.
    #[serde(default)]
    pub webhook_id: Option<WebhookId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub deal_stage_scope: DealStageScope,
    #[serde(default)]
    pub pipeline_id: Option<PipelineId>,
    #[serde(default)]
    pub stage_id: Option<StageId>,
    #[serde(default)]
    pub form_ids: Vec<FormId>,
}

impl WebhookParams {
    /// Returns `properties` extended by what the selected triggers need.
    ///
    /// # Errors
    ///
    /// A stage-scoped deal-stage trigger without pipeline or stage.
    pub fn assemble_properties(&self, operation: &str) -> Result<Vec<String>, ConnectorError> {
        let mut properties = self.properties.clone();
        let has = |trigger: &str| self.triggers.iter().any(|t| t == trigger);

        if has(UPDATE_DEAL_STAGE) && self.deal_stage_scope == DealStageScope::Specific {
            let pipeline = non_blank(self.pipeline_id.as_ref().map(PipelineId::as_str))
                .ok_or_else(|| ConnectorError::invalid(operation, "updateDealStage requires a pipeline."))?;
            let stage = non_blank(self.stage_id.as_ref().map(StageId::as_str))
                .ok_or_else(|| ConnectorError::invalid(operation, "updateDealStage requires a stage."))?;
            properties.push(pipeline.to_string());
            properties.push(stage.to_string());
        }
        if has(SUBMIT_FORM) {
            properties.extend(self.form_ids.iter().map(|id| id.as_str().to_string()));
        }
        Ok(properties)
    }

    fn url(&self) -> Option<&str> {
        non_blank(self.url.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Deserialize)]
struct WebhooksData {
    #[serde(default)]
    webhooks: Option<Vec<Webhook>>,
}

/// Lists every registered webhook.
pub async fn list(
    client: &GraphqlClient,
    operation: &str,
) -> Result<Vec<Webhook>, Report<ConnectorError>> {
    let request = GraphqlRequest::new(LIST_WEBHOOKS).with_operation_name("GetWebhooks");
    let data: WebhooksData = client
        .call_as(&request)
        .await
        .map_err(api_error(operation))?;
    Ok(data.webhooks.unwrap_or_default())
}

/// Registers a webhook.
pub async fn create(
    client: &GraphqlClient,
    params: &WebhookParams,
) -> Result<Value, Report<ConnectorError>> {
    const OP: &str = "webhook.create";
    let url = params
        .url()
        .ok_or_else(|| ConnectorError::invalid(OP, "url is required"))?;
    if params.triggers.is_empty() {
        return Err(ConnectorError::invalid(OP, "at least one trigger is required").into());
    }
    let properties = params.assemble_properties(OP)?;

    let mut input = Map::new();
    input.insert("url".to_string(), json!(url));
    input.insert("triggers".to_string(), json!(params.triggers));
    if !properties.is_empty() {
        input.insert("properties".to_string(), json!(properties));
    }

    let request = GraphqlRequest::new(CREATE_WEBHOOK)
        .with_variables(&json!({ "input": input }))
        .with_operation_name("CreateWebhook");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    Ok(data.remove("createWebhook").unwrap_or_else(|| json!({})))
}

/// Changes url, triggers or properties of a webhook. Omitted parts are kept.
pub async fn update(
    client: &GraphqlClient,
    params: &WebhookParams,
) -> Result<Value, Report<ConnectorError>> {
    const OP: &str = "webhook.update";
    let id = params
        .webhook_id
        .as_ref()
        .filter(|id| !id.as_str().trim().is_empty())
        .ok_or_else(|| ConnectorError::invalid(OP, "webhookId is required"))?;

    let mut input = Map::new();
    if let Some(url) = params.url() {
        input.insert("url".to_string(), json!(url));
    }
    let properties = if params.triggers.is_empty() {
        params.properties.clone()
    } else {
        input.insert("triggers".to_string(), json!(params.triggers));
        params.assemble_properties(OP)?
    };
    if !properties.is_empty() {
        input.insert("properties".to_string(), json!(properties));
    }

    let request = GraphqlRequest::new(UPDATE_WEBHOOK)
        .with_variables(&json!({ "id": id, "input": input }))
        .with_operation_name("UpdateWebhook");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    Ok(data.remove("updateWebhook").unwrap_or_else(|| json!({})))
}

/// Deletes a webhook, returning the deleted registration if the API echoes it.
pub async fn delete(
    client: &GraphqlClient,
    operation: &str,
    id: &WebhookId,
) -> Result<Value, Report<ConnectorError>> {
    let request = GraphqlRequest::new(DELETE_WEBHOOK)
        .with_variables(&json!({ "id": id }))
        .with_operation_name("DeleteWebhook");
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(data.remove("deleteWebhook").unwrap_or(Value::Null))
}

/// Finds the webhook registered for exactly `url`.
///
/// A fresh index entry answers without a request. Misses are not cached.
pub async fn find_by_url(
    client: &GraphqlClient,
    index: &WebhookIndex,
    url: &str,
) -> Result<Option<Webhook>, Report<ConnectorError>> {
    let key = url.to_string();
    if let Some(hit) = index.get(&key) {
        debug!(webhook_id = %hit.id, "webhook found in url index");
        return Ok(Some(hit));
    }

    let webhooks = list(client, "webhook.findByUrl").await?;
    let found = webhooks.into_iter().find(|w| w.url == url);
    if let Some(hit) = &found {
        index.insert(key, hit.clone());
    }
    Ok(found)
}

/// Indexes the webhook echoed by a create or update mutation.
pub fn remember(index: &WebhookIndex, echoed: &Value) {
    let Ok(webhook) = serde_json::from_value::<Webhook>(echoed.clone()) else {
        return;
    };
    forget(index, &webhook.id);
    if !webhook.url.is_empty() {
        index.insert(webhook.url.clone(), webhook);
    }
}

/// Drops every index entry pointing at `id`.
pub fn forget(index: &WebhookIndex, id: &WebhookId) {
    index.retain(|_, cached| cached.id != *id);
}

/// Retry settings for [`delete_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRetry {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub fail_on_error: bool,
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for DeleteRetry {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            fail_on_error: false,
        }
    }
}

impl DeleteRetry {
    /// Delay after the failed attempt `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Deletes a webhook, retrying with exponential backoff.
///
/// Returns `false` once retries are exhausted unless `fail_on_error` is set.
pub async fn delete_with_retry(
    client: &GraphqlClient,
    id: &WebhookId,
    retry: DeleteRetry,
) -> Result<bool, Report<ConnectorError>> {
    let mut attempt = 0;
    loop {
        match delete(client, "webhook.deleteWithRetry", id).await {
            Ok(_) => return Ok(true),
            Err(err) => {
                warn!(
                    webhook_id = %id,
                    attempt = attempt + 1,
                    attempts = retry.retries + 1,
                    error = %err.current_context(),
                    "deleting webhook failed"
                );
                if attempt >= retry.retries {
                    return if retry.fail_on_error { Err(err) } else { Ok(false) };
                }
                tokio::time::sleep(retry.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> WebhookParams {
        serde_json::from_value(value).expect("params")
    }

    #[test]
    fn specific_deal_stage_appends_pipeline_and_stage() {
        let p = params(json!({
            "url": "https://hook",
            "triggers": ["updateDealStage"],
            "properties": ["existing"],
            "dealStageScope": "specific",
            "pipelineId": "p1",
            "stageId": "s1"
        }));
        assert_eq!(
            p.assemble_properties("webhook.create").expect("properties"),
            vec!["existing", "p1", "s1"]
        );
    }

    #[test]
    fn specific_deal_stage_requires_ids() {
        let p = params(json!({
            "triggers": ["updateDealStage"],
            "dealStageScope": "specific",
            "pipelineId": "p1"
        }));
        let err = p.assemble_properties("webhook.create").unwrap_err();
        assert!(err.to_string().contains("requires a stage"));

        let p = params(json!({
            "triggers": ["updateDealStage"],
            "dealStageScope": "specific",
            "stageId": "s1"
        }));
        let err = p.assemble_properties("webhook.create").unwrap_err();
        assert!(err.to_string().contains("requires a pipeline"));
    }

    #[test]
    fn all_stages_scope_adds_nothing() {
        let p = params(json!({
            "triggers": ["updateDealStage"],
            "pipelineId": "p1",
            "stageId": "s1"
        }));
        assert!(p.assemble_properties("webhook.create").expect("properties").is_empty());
    }

    #[test]
    fn submit_form_appends_form_ids() {
        let p = params(json!({
            "triggers": ["submitForm", "createContact"],
            "formIds": ["f1", "f2"]
        }));
        assert_eq!(
            p.assemble_properties("webhook.create").expect("properties"),
            vec!["f1", "f2"]
        );
    }

    #[test]
    fn delete_backoff_doubles() {
        let retry = DeleteRetry::default();
        assert_eq!(retry.delay(0), Duration::from_millis(500));
        assert_eq!(retry.delay(1), Duration::from_millis(1000));
        assert_eq!(retry.delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn remember_moves_an_updated_url() {
        let index = WebhookIndex::new(WEBHOOK_URL_CACHE_TTL);
        remember(&index, &json!({"id": "w1", "url": "https://old", "triggers": []}));
        remember(&index, &json!({"id": "w1", "url": "https://new", "triggers": ["submitForm"]}));

        assert!(index.get(&"https://old".to_string()).is_none());
        let hit = index.get(&"https://new".to_string()).expect("indexed");
        assert_eq!(hit.triggers, vec!["submitForm"]);

        remember(&index, &json!({"id": "w1"}));
        assert!(index.get(&"https://new".to_string()).is_none());

        remember(&index, &json!({"id": "w2", "url": "https://x"}));
        forget(&index, &WebhookId::new("w2"));
        assert!(index.get(&"https://x".to_string()).is_none());
    }

    #[test]
    fn webhook_tolerates_null_triggers() {
        let webhook: Webhook =
            serde_json::from_value(json!({"id": "w1", "url": "https://hook", "triggers": null}))
                .expect("webhook");
        assert!(webhook.triggers.is_empty());
    }
}
