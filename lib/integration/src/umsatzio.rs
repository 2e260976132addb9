//! The Umsatz.io CRM connector.

use crate::activity::{self, CallResultParams, ContactPageParams, LogEmailParams, MatchPhoneCallParams};
use crate::cache::TtlCache;
use crate::connector::{
    Connector, ConnectorCapability, ConnectorInfo, Operation, OperationInfo, OperationMetadata,
    OperationResult,
};
use crate::contact::{self, ContactWriteParams, FilterListParams, GetByEmailParams, SearchParams};
use crate::deal::{
    self, CreateDealParams, DealFilterListParams, DealIdParams, ListByStageParams, MoveStageParams,
    UpdateDealParams,
};
use crate::error::{ConnectorError, api_error};
use crate::fields::{FieldKindMap, ServiceType, kind_map, load_fields};
use crate::note::{self, CreateNoteParams};
use crate::pipeline::{self, PipelineParams};
use crate::webhook::{self, DeleteRetry, WEBHOOK_URL_CACHE_TTL, WebhookIndex, WebhookParams};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};
use umsatzio_core::{Result, WebhookId};
use umsatzio_graphql::{ErrorKind, GraphqlClient, GraphqlRequest};

/// How long fetched field kinds are reused for coercion.
pub const FIELD_KIND_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const OPERATIONS: &[(&str, &str)] = &[
    ("graphql.raw", "Run an arbitrary GraphQL document"),
    ("credential.test", "Check that the credential can reach the API"),
    ("field.list", "List custom fields of contact or deal cards"),
    ("contact.create", "Create a contact"),
    ("contact.update", "Update a contact by id"),
    ("contact.upsert", "Update the contact with the mapped e-mail or create it"),
    ("contact.getByEmail", "Get a contact by e-mail"),
    ("contact.search", "Search contacts"),
    ("contact.listByFilterGroup", "List contacts matched by a saved filter group"),
    ("deal.create", "Create a deal for a contact on a pipeline stage"),
    ("deal.update", "Update a deal by id"),
    ("deal.get", "Get a deal with pipeline, stage and contact"),
    ("deal.findByEmail", "List the deals of the contact with an e-mail"),
    ("deal.listByStage", "List the deals on a stage"),
    ("deal.listByFilterGroup", "List the deals of a stage matched by a saved filter group"),
    ("deal.moveStage", "Move a deal to another pipeline stage"),
    ("pipeline.list", "List pipelines"),
    ("pipeline.get", "Get a pipeline with its stages"),
    ("pipeline.listStages", "List the stages of a pipeline"),
    ("note.create", "Create a note on a contact or deal"),
    ("activity.logEmail", "Log an e-mail on a contact"),
    ("activity.listEmails", "List the e-mail activities of a contact"),
    ("activity.listPhoneCalls", "List the phone-call activities of a contact"),
    ("activity.listNotes", "List the notes of a contact"),
    ("activity.listPhoneCallTypes", "List phone-call activity types"),
    ("activity.callResults", "List the call results per call category"),
    ("activity.matchPhoneCall", "Match a pushed phone call against a call type and result"),
    ("webhook.list", "List webhooks"),
    ("webhook.create", "Register a webhook"),
    ("webhook.update", "Change a webhook"),
    ("webhook.delete", "Delete a webhook"),
    ("webhook.findByUrl", "Find the webhook registered for a URL"),
    ("webhook.deleteWithRetry", "Delete a webhook, retrying on failure"),
];

const SESSION_ONLY: &[&str] = &["contact.listByFilterGroup", "deal.listByFilterGroup"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParams {
    query: String,
    #[serde(default)]
    variables: Option<Value>,
    #[serde(default)]
    operation_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldListParams {
    #[serde(default = "default_service")]
    service_type: ServiceType,
}

fn default_service() -> ServiceType {
    ServiceType::Contact
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookIdParams {
    webhook_id: WebhookId,
}

#[derive(Deserialize)]
struct EmailParams {
    email: String,
}

#[derive(Debug, Deserialize)]
struct UrlParams {
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteWithRetryParams {
    webhook_id: WebhookId,
    #[serde(flatten)]
    retry: DeleteRetry,
}

/// Parses operation parameters; `null` counts as no parameters.
fn parse<T: DeserializeOwned>(operation: &str, parameters: Value) -> Result<T, ConnectorError> {
    let parameters = match parameters {
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(parameters)
        .map_err(|e| ConnectorError::invalid(operation, e.to_string()).into())
}

/// Connector exposing contacts, deals, activities, fields and webhooks of
/// Umsatz.io.
///
/// Owns the field-kind cache and the webhook URL index; clones of the client
/// share a session but each connector has its own caches.
#[derive(Debug, Clone)]
pub struct UmsatzConnector {
    client: GraphqlClient,
    webhooks_by_url: WebhookIndex,
    field_kinds: TtlCache<ServiceType, Arc<FieldKindMap>>,
}

impl UmsatzConnector {
    #[must_use]
    pub fn new(client: GraphqlClient) -> Self {
        Self {
            client,
            webhooks_by_url: TtlCache::new(WEBHOOK_URL_CACHE_TTL),
            field_kinds: TtlCache::new(FIELD_KIND_CACHE_TTL),
        }
    }

    #[must_use]
    pub fn client(&self) -> &GraphqlClient {
        &self.client
    }

    async fn field_kinds(
        &self,
        operation: &str,
        service: ServiceType,
    ) -> Result<Arc<FieldKindMap>, ConnectorError> {
        if let Some(kinds) = self.field_kinds.get(&service) {
            return Ok(kinds);
        }
        let fields = load_fields(&self.client, service)
            .await
            .map_err(api_error(operation))?;
        let kinds = Arc::new(kind_map(&fields));
        self.field_kinds.insert(service, Arc::clone(&kinds));
        Ok(kinds)
    }

    async fn dispatch(&self, name: &str, parameters: Value) -> Result<Value, ConnectorError> {
        match name {
            "graphql.raw" => {
                let params: RawParams = parse(name, parameters)?;
                let mut request = GraphqlRequest::new(params.query);
                if let Some(variables) = &params.variables {
                    request = request.with_variables(variables);
                }
                if let Some(operation_name) = &params.operation_name {
                    request = request.with_operation_name(operation_name);
                }
                let data = self.client.call(&request).await.map_err(api_error(name))?;
                Ok(Value::Object(data))
            }
            "credential.test" => {
                self.client.ping().await.map_err(api_error(name))?;
                Ok(json!({ "ok": true }))
            }
            "field.list" => {
                let params: FieldListParams = parse(name, parameters)?;
                let service = params.service_type;
                let fields = load_fields(&self.client, service)
                    .await
                    .map_err(api_error(name))?;
                self.field_kinds
                    .insert(service, Arc::new(kind_map(&fields)));
                let fields: Vec<Value> = fields
                    .iter()
                    .filter(|f| service != ServiceType::Deal || f.is_writable_deal_field())
                    .map(|f| {
                        json!({
                            "id": f.id,
                            "name": f.key(),
                            "displayName": f.display_name(),
                            "kind": f.kind(),
                            "fieldType": f.field_type,
                            "dataType": f.data_type,
                        })
                    })
                    .collect();
                Ok(json!({ "serviceType": service, "fields": fields }))
            }
            "contact.create" | "contact.update" | "contact.upsert" => {
                let params: ContactWriteParams = parse(name, parameters)?;
                let kinds = self.field_kinds(name, ServiceType::Contact).await?;
                match name {
                    "contact.create" => contact::create(&self.client, &kinds, &params).await,
                    "contact.update" => contact::update(&self.client, &kinds, &params).await,
                    _ => contact::upsert(&self.client, &kinds, &params).await,
                }
            }
            "contact.getByEmail" => {
                let params: GetByEmailParams = parse(name, parameters)?;
                contact::get_by_email(&self.client, &params).await
            }
            "contact.search" => {
                let params: SearchParams = parse(name, parameters)?;
                contact::search(&self.client, &params).await
            }
            "contact.listByFilterGroup" => {
                let params: FilterListParams = parse(name, parameters)?;
                contact::list_by_filter_group(&self.client, &params).await
            }
            "deal.create" => {
                let params: CreateDealParams = parse(name, parameters)?;
                let kinds = self.field_kinds(name, ServiceType::Deal).await?;
                deal::create(&self.client, &kinds, &params).await
            }
            "deal.update" => {
                let params: UpdateDealParams = parse(name, parameters)?;
                let kinds = self.field_kinds(name, ServiceType::Deal).await?;
                deal::update(&self.client, &kinds, &params).await
            }
            "deal.get" => {
                let params: DealIdParams = parse(name, parameters)?;
                deal::get(&self.client, &params).await
            }
            "deal.findByEmail" => {
                let params: EmailParams = parse(name, parameters)?;
                deal::find_by_email(&self.client, &params.email).await
            }
            "deal.listByStage" => {
                let params: ListByStageParams = parse(name, parameters)?;
                deal::list_by_stage(&self.client, &params).await
            }
            "deal.listByFilterGroup" => {
                let params: DealFilterListParams = parse(name, parameters)?;
                deal::list_by_filter_group(&self.client, &params).await
            }
            "deal.moveStage" => {
                let params: MoveStageParams = parse(name, parameters)?;
                deal::move_stage(&self.client, &params).await
            }
            "pipeline.list" => {
                let pipelines = pipeline::list(&self.client, name).await?;
                Ok(json!({ "pipelines": pipelines }))
            }
            "pipeline.get" => {
                let params: PipelineParams = parse(name, parameters)?;
                pipeline::get(&self.client, name, &params).await
            }
            "pipeline.listStages" => {
                let params: PipelineParams = parse(name, parameters)?;
                pipeline::list_stages(&self.client, &params).await
            }
            "activity.logEmail" => {
                let params: LogEmailParams = parse(name, parameters)?;
                activity::log_email(&self.client, &params).await
            }
            "activity.listEmails" | "activity.listPhoneCalls" | "activity.listNotes" => {
                let params: ContactPageParams = parse(name, parameters)?;
                match name {
                    "activity.listEmails" => activity::list_emails(&self.client, &params).await,
                    "activity.listPhoneCalls" => {
                        activity::list_phone_calls(&self.client, &params).await
                    }
                    _ => activity::list_notes(&self.client, &params).await,
                }
            }
            "activity.listPhoneCallTypes" => {
                let types = activity::phone_call_types(&self.client, name).await?;
                Ok(json!({ "types": types }))
            }
            "activity.callResults" => {
                let params: CallResultParams = parse(name, parameters)?;
                Ok(activity::call_results(&params))
            }
            "activity.matchPhoneCall" => {
                let params: MatchPhoneCallParams = parse(name, parameters)?;
                activity::match_phone_call(&self.client, &params).await
            }
            "note.create" => {
                let params: CreateNoteParams = parse(name, parameters)?;
                note::run_create(&self.client, params).await
            }
            "webhook.list" => {
                let webhooks = webhook::list(&self.client, name).await?;
                Ok(json!({ "webhooks": webhooks }))
            }
            "webhook.create" => {
                let params: WebhookParams = parse(name, parameters)?;
                let created = webhook::create(&self.client, &params).await?;
                webhook::remember(&self.webhooks_by_url, &created);
                Ok(created)
            }
            "webhook.update" => {
                let params: WebhookParams = parse(name, parameters)?;
                let updated = webhook::update(&self.client, &params).await?;
                webhook::remember(&self.webhooks_by_url, &updated);
                Ok(updated)
            }
            "webhook.delete" => {
                let params: WebhookIdParams = parse(name, parameters)?;
                let deleted = webhook::delete(&self.client, name, &params.webhook_id).await?;
                webhook::forget(&self.webhooks_by_url, &params.webhook_id);
                Ok(json!({ "deleted": deleted }))
            }
            "webhook.findByUrl" => {
                let params: UrlParams = parse(name, parameters)?;
                let found =
                    webhook::find_by_url(&self.client, &self.webhooks_by_url, &params.url).await?;
                Ok(json!({ "webhook": found }))
            }
            "webhook.deleteWithRetry" => {
                let params: DeleteWithRetryParams = parse(name, parameters)?;
                let deleted =
                    webhook::delete_with_retry(&self.client, &params.webhook_id, params.retry)
                        .await?;
                if deleted {
                    webhook::forget(&self.webhooks_by_url, &params.webhook_id);
                }
                Ok(json!({ "deleted": deleted }))
            }
            other => Err(ConnectorError::OperationNotSupported {
                operation: other.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl Connector for UmsatzConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            id: "umsatzio".to_string(),
            name: "Umsatz.io".to_string(),
            description:
                "Contacts, deals, pipelines, activities, custom fields and webhooks of the Umsatz.io CRM"
                    .to_string(),
            protocol: "graphql".to_string(),
            operations: OPERATIONS
                .iter()
                .map(|(name, description)| {
                    let info = OperationInfo::new(name, description);
                    if SESSION_ONLY.contains(name) {
                        info.session_only()
                    } else {
                        info
                    }
                })
                .collect(),
            capabilities: vec![
                ConnectorCapability::Read,
                ConnectorCapability::Write,
                ConnectorCapability::Update,
                ConnectorCapability::Delete,
                ConnectorCapability::Subscribe,
                ConnectorCapability::ApiToken,
                ConnectorCapability::Session,
            ],
        }
    }

    #[instrument(skip(self, operation), fields(operation = %operation.name))]
    async fn execute(&self, operation: Operation) -> Result<OperationResult, ConnectorError> {
        let started = Instant::now();
        let data = self.dispatch(&operation.name, operation.parameters).await?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(latency_ms, "operation completed");
        Ok(OperationResult::new(
            data,
            OperationMetadata {
                operation: operation.name,
                latency_ms,
            },
        ))
    }

    async fn health_check(&self) -> Result<bool, ConnectorError> {
        match self.client.ping().await {
            Ok(()) => Ok(true),
            Err(err) => match err.current_context().kind() {
                ErrorKind::Configuration | ErrorKind::Authorization | ErrorKind::Graphql => {
                    tracing::warn!(error = %err.current_context(), "credential check failed");
                    Ok(false)
                }
                ErrorKind::Transport | ErrorKind::Protocol => Err(api_error("credential.test")(err)),
            },
        }
    }
}
