//! Deal operations.
//!
//! Name, contact, pipeline and stage travel as dedicated inputs; everything
//! else is custom field data coerced against the deal field kinds.

use crate::contact::{
    DEFAULT_TIMEZONE, clamp_limit, find_id_by_email, initial_note, merge, split_page, trimmed,
};
use crate::error::{ConnectorError, api_error};
use crate::fields::{FieldKindMap, ServiceType, coerce_fields};
use crate::filter::{require_session, with_loaded_filter_group};
use crate::note::NoteInput;
use serde::Deserialize;
use serde_json::{Value, json};
use umsatzio_core::{ContactId, DealId, FilterGroupId, PipelineId, Result, StageId};
use umsatzio_graphql::{GraphqlClient, GraphqlRequest, JsonMap};

const CREATE_DEAL: &str = "mutation CreateDeal($name: String!, $contactId: String!, $pipelineId: String!, $stageId: String!, $data: JSONObject, $f: Boolean) { \
    createDeal(input: { name: $name, contactId: $contactId, pipelineId: $pipelineId, stageId: $stageId, data: $data }, filterUnknownFields: $f) { \
    id name contactId pipelineId stageId data createdAt updatedAt } }";

const UPDATE_DEAL: &str = "mutation UpdateDeal($input: CRMDealUpdateInput!, $filterUnknownFields: Boolean!) { \
    updateDeal(input: $input, filterUnknownFields: $filterUnknownFields) { \
    id name contactId pipelineId stageId data updatedAt } }";

const MOVE_DEAL_STAGE: &str = "mutation UpdateDealStageOnly($input: CRMDealUpdateInput!, $filterUnknownFields: Boolean!) { \
    updateDeal(input: $input, filterUnknownFields: $filterUnknownFields) { \
    id pipelineId stageId name contactId data updatedAt } }";

const GET_DEAL: &str = "query Deal($dealId: String!) { deal(dealId: $dealId) { \
    id data name pipelineId pipeline { id name } isArchived createdAt updatedAt \
    stage { id name color } contact { id data } } }";

const CONTACT_DEALS: &str = "query ContactDeals($contactId: ID!) { contact(contactId: $contactId) { id \
    deals { id name contactId pipelineId stageId data isArchived createdAt updatedAt } } }";

const DEALS_BY_STAGE: &str = "query Deals($searchString: String, $stageId: String!, $isFilterActive: Boolean, \
    $pagination: PaginationInput!, $sort: CRMFilterSortInput, $timezone: String) { \
    deals(stageId: $stageId, searchString: $searchString, pagination: $pagination, isFilterActive: $isFilterActive, sort: $sort, timezone: $timezone) { \
    data { id data name contactId pipelineId stageId isArchived createdAt updatedAt lastContactAttempt \
    stage { id name color } contact { id data lastContactAttempt } } \
    pagination { page limit total } } }";

/// Parameters of `deal.create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDealParams {
    pub name: String,
    pub contact_id: ContactId,
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
    #[serde(default)]
    pub fields: JsonMap,
    #[serde(default = "default_true")]
    pub filter_unknown_fields: bool,
    #[serde(default)]
    pub initial_note: Option<NoteInput>,
}

/// Parameters of `deal.update`.
///
/// Pipeline and stage move together: giving one requires the other.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDealParams {
    pub deal_id: DealId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pipeline_id: Option<PipelineId>,
    #[serde(default)]
    pub stage_id: Option<StageId>,
    #[serde(default)]
    pub fields: JsonMap,
    #[serde(default = "default_true")]
    pub filter_unknown_fields: bool,
    #[serde(default)]
    pub initial_note: Option<NoteInput>,
}

/// Parameters of `deal.moveStage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStageParams {
    pub deal_id: DealId,
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealIdParams {
    pub deal_id: DealId,
}

/// Parameters of `deal.listByStage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListByStageParams {
    pub stage_id: StageId,
    #[serde(default)]
    pub search_string: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Parameters of `deal.listByFilterGroup`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealFilterListParams {
    pub filter_group_id: FilterGroupId,
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
    #[serde(default)]
    pub search_string: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_true() -> bool {
    true
}

fn required<'a>(operation: &str, name: &str, value: &'a str) -> Result<&'a str, ConnectorError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConnectorError::invalid(operation, format!("{name} is required")).into());
    }
    Ok(value)
}

async fn update_deal(
    client: &GraphqlClient,
    operation: &str,
    (document, operation_name): (&str, &str),
    input: &JsonMap,
    filter_unknown_fields: bool,
) -> Result<Option<Value>, ConnectorError> {
    let request = GraphqlRequest::new(document)
        .with_variables(&json!({ "input": input, "filterUnknownFields": filter_unknown_fields }))
        .with_operation_name(operation_name);
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(data.remove("updateDeal").filter(|v| !v.is_null()))
}

/// Creates a deal, optionally followed by an initial note on it.
pub async fn create(
    client: &GraphqlClient,
    kinds: &FieldKindMap,
    params: &CreateDealParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.create";
    let name = required(OP, "name", &params.name)?;
    let contact_id = required(OP, "contactId", params.contact_id.as_str())?;
    let pipeline_id = required(OP, "pipelineId", params.pipeline_id.as_str())?;
    let stage_id = required(OP, "stageId", params.stage_id.as_str())?;

    let data = coerce_fields(ServiceType::Deal, &params.fields, kinds);
    let request = GraphqlRequest::new(CREATE_DEAL)
        .with_variables(&json!({
            "name": name,
            "contactId": contact_id,
            "pipelineId": pipeline_id,
            "stageId": stage_id,
            "data": data,
            "f": params.filter_unknown_fields,
        }))
        .with_operation_name("CreateDeal");
    let mut response = client.call(&request).await.map_err(api_error(OP))?;
    let created = response.remove("createDeal").filter(|v| !v.is_null());

    let created_id = created
        .as_ref()
        .and_then(|d| d.get("id"))
        .and_then(Value::as_str);
    let note_id = initial_note(client, OP, created_id, params.initial_note.as_ref()).await?;

    let mut input = JsonMap::new();
    input.insert("name".to_string(), json!(name));
    input.insert("contactId".to_string(), json!(contact_id));
    input.insert("pipelineId".to_string(), json!(pipeline_id));
    input.insert("stageId".to_string(), json!(stage_id));
    input.extend(data);

    Ok(merge(
        created,
        [("inputData", Value::Object(input)), ("initialNoteId", note_id)],
    ))
}

/// Updates name, custom fields and optionally pipeline and stage in one mutation.
pub async fn update(
    client: &GraphqlClient,
    kinds: &FieldKindMap,
    params: &UpdateDealParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.update";
    let deal_id = required(OP, "dealId", params.deal_id.as_str())?;
    let name = trimmed(params.name.as_deref());
    let pipeline_id = trimmed(params.pipeline_id.as_ref().map(PipelineId::as_str));
    let stage_id = trimmed(params.stage_id.as_ref().map(StageId::as_str));
    let data = coerce_fields(ServiceType::Deal, &params.fields, kinds);

    let mut input = JsonMap::new();
    input.insert("id".to_string(), json!(deal_id));
    if let Some(name) = name {
        input.insert("name".to_string(), json!(name));
    }
    if !data.is_empty() {
        input.insert("data".to_string(), Value::Object(data));
    }
    match (pipeline_id, stage_id) {
        (Some(pipeline_id), Some(stage_id)) => {
            input.insert("pipelineId".to_string(), json!(pipeline_id));
            input.insert("stageId".to_string(), json!(stage_id));
        }
        (None, None) => {}
        _ => {
            return Err(ConnectorError::invalid(
                OP,
                "To update pipeline/stage, both pipelineId and stageId are required.",
            )
            .into());
        }
    }
    if input.len() == 1 {
        return Err(ConnectorError::invalid(OP, "No fields provided to update.").into());
    }

    let updated = update_deal(
        client,
        OP,
        (UPDATE_DEAL, "UpdateDeal"),
        &input,
        params.filter_unknown_fields,
    )
    .await?;
    let note_id = initial_note(client, OP, Some(deal_id), params.initial_note.as_ref()).await?;

    Ok(merge(
        updated,
        [("inputData", Value::Object(input)), ("initialNoteId", note_id)],
    ))
}

/// Moves a deal to another pipeline stage.
///
/// `changed` is true only if the echoed deal sits on the requested stage.
pub async fn move_stage(
    client: &GraphqlClient,
    params: &MoveStageParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.moveStage";
    let deal_id = required(OP, "dealId", params.deal_id.as_str())?;
    let pipeline_id = required(OP, "pipelineId", params.pipeline_id.as_str())?;
    let stage_id = required(OP, "stageId", params.stage_id.as_str())?;

    let mut input = JsonMap::new();
    input.insert("id".to_string(), json!(deal_id));
    input.insert("pipelineId".to_string(), json!(pipeline_id));
    input.insert("stageId".to_string(), json!(stage_id));

    let updated =
        update_deal(client, OP, (MOVE_DEAL_STAGE, "UpdateDealStageOnly"), &input, true).await?;
    let changed = updated.as_ref().is_some_and(|deal| {
        deal.get("pipelineId").and_then(Value::as_str) == Some(pipeline_id)
            && deal.get("stageId").and_then(Value::as_str) == Some(stage_id)
    });

    Ok(merge(
        updated,
        [("inputData", Value::Object(input)), ("changed", json!(changed))],
    ))
}

/// Fetches a deal with pipeline, stage and contact; `{}` when unknown.
pub async fn get(client: &GraphqlClient, params: &DealIdParams) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.get";
    let deal_id = required(OP, "dealId", params.deal_id.as_str())?;
    let request = GraphqlRequest::new(GET_DEAL)
        .with_variables(&json!({ "dealId": deal_id }))
        .with_operation_name("Deal");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    Ok(data
        .remove("deal")
        .filter(|v| !v.is_null())
        .unwrap_or_else(|| json!({})))
}

/// Lists the deals of the contact owning `email`.
pub async fn find_by_email(
    client: &GraphqlClient,
    email: &str,
) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.findByEmail";
    let email = required(OP, "email", email)?;
    let Some(contact_id) = find_id_by_email(client, OP, email).await? else {
        return Ok(json!({ "email": email, "foundContact": false, "deals": [] }));
    };

    let request = GraphqlRequest::new(CONTACT_DEALS)
        .with_variables(&json!({ "contactId": contact_id }))
        .with_operation_name("ContactDeals");
    let data = client.call(&request).await.map_err(api_error(OP))?;
    let deals = data
        .get("contact")
        .and_then(|c| c.get("deals"))
        .filter(|d| d.is_array())
        .cloned()
        .unwrap_or_else(|| json!([]));

    Ok(json!({
        "email": email,
        "contactId": contact_id,
        "foundContact": true,
        "deals": deals,
    }))
}

/// Lists the deals on a stage, optionally narrowed by a search string.
pub async fn list_by_stage(
    client: &GraphqlClient,
    params: &ListByStageParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.listByStage";
    let stage_id = required(OP, "stageId", params.stage_id.as_str())?;
    let mut variables = json!({
        "stageId": stage_id,
        "pagination": { "page": params.page.max(0), "limit": clamp_limit(params.limit) },
    });
    if let Some(search) = trimmed(params.search_string.as_deref()) {
        variables["searchString"] = json!(search);
    }

    let request = GraphqlRequest::new(DEALS_BY_STAGE)
        .with_variables(&variables)
        .with_operation_name("Deals");
    let data = client.call(&request).await.map_err(api_error(OP))?;
    let (pagination, deals) = split_page(data, "deals");
    Ok(json!({ "stageId": stage_id, "pagination": pagination, "deals": deals }))
}

/// Lists the deals of one pipeline stage matched by a saved filter group.
///
/// The API filters by stage; deals of other pipelines are dropped here.
pub async fn list_by_filter_group(
    client: &GraphqlClient,
    params: &DealFilterListParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "deal.listByFilterGroup";
    require_session(client, OP).await?;
    required(OP, "filterGroupId", params.filter_group_id.as_str())?;
    let pipeline_id = required(OP, "pipelineId", params.pipeline_id.as_str())?;
    let stage_id = required(OP, "stageId", params.stage_id.as_str())?;

    let search = trimmed(params.search_string.as_deref());
    let timezone = trimmed(params.timezone.as_deref()).unwrap_or(DEFAULT_TIMEZONE);
    let mut variables = json!({
        "stageId": stage_id,
        "pagination": { "page": params.page.max(0), "limit": clamp_limit(params.limit) },
        "isFilterActive": true,
        "timezone": timezone,
    });
    if let Some(search) = search {
        variables["searchString"] = json!(search);
    }

    let (pagination, deals) = with_loaded_filter_group(
        client,
        OP,
        ServiceType::Deal,
        &params.filter_group_id,
        true,
        || async {
            let request = GraphqlRequest::new(DEALS_BY_STAGE)
                .with_variables(&variables)
                .with_operation_name("Deals");
            let data = client.call(&request).await.map_err(api_error(OP))?;
            Ok(split_page(data, "deals"))
        },
    )
    .await?;

    let deals: Vec<Value> = match deals {
        Value::Array(deals) => deals
            .into_iter()
            .filter(|deal| deal.get("pipelineId").and_then(Value::as_str) == Some(pipeline_id))
            .collect(),
        _ => Vec::new(),
    };

    Ok(json!({
        "constraints": {
            "filterGroupId": params.filter_group_id,
            "pipelineId": pipeline_id,
            "stageId": stage_id,
            "searchString": search,
            "timezone": timezone,
        },
        "pagination": pagination,
        "deals": deals,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_params_default_to_filtering() {
        let params: UpdateDealParams =
            serde_json::from_value(json!({ "dealId": "d1", "name": "Renamed" })).expect("params");
        assert!(params.filter_unknown_fields);
        assert!(params.pipeline_id.is_none());
        assert!(params.fields.is_empty());
    }

    #[test]
    fn create_params_require_dedicated_inputs() {
        let err = serde_json::from_value::<CreateDealParams>(json!({
            "name": "Deal",
            "contactId": "c1",
            "pipelineId": "p1"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("stageId"));
    }

    #[test]
    fn blank_required_value_is_rejected() {
        let err = required("deal.get", "dealId", "  ").unwrap_err();
        match err.current_context() {
            ConnectorError::InvalidParameters { reason, .. } => {
                assert_eq!(reason, "dealId is required");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(required("deal.get", "dealId", " d1 ").expect("value"), "d1");
    }
}
