//! Contact operations.
//!
//! Field values are coerced against the contact field kinds before every
//! write; the caller supplies the kind map.

use crate::error::{ConnectorError, api_error};
use crate::fields::{FieldKindMap, ServiceType, coerce_fields};
use crate::filter::{require_session, with_loaded_filter_group};
use crate::note::{NoteInput, create_note};
use serde::Deserialize;
use serde_json::{Value, json};
use umsatzio_core::{ContactId, FilterGroupId, Result};
use umsatzio_graphql::{GraphqlClient, GraphqlRequest, JsonMap};

/// Contact field holding the primary e-mail address.
pub const EMAIL_FIELD: &str = "global_contact_email";

/// Timezone used for filter evaluation when none is given.
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

const CREATE_CONTACT: &str = "mutation CreateContact($data: JSONObject!, $filterUnknownFields: Boolean) { createContact(input: { data: $data }, filterUnknownFields: $filterUnknownFields) { id __typename } }";

const UPDATE_CONTACT: &str = "mutation UpdateContact($contactId: String!, $data: JSONObject, $filterUnknownFields: Boolean) { updateContact(input: { id: $contactId, data: $data }, filterUnknownFields: $filterUnknownFields) { id data updatedAt } }";

const LOOKUP_BY_EMAIL: &str =
    "query ContactByEmail($email: String!) { contactByEmail(email: $email) { id } }";

const GET_BY_EMAIL: &str = "query ContactByEmail($email: String!) { contactByEmail(email: $email) { \
    id data isArchived lastContactAttempt createdAt updatedAt \
    author { profile { email firstName lastName } } \
    lastContactPerson { id role createdAt profile { id email firstName lastName } } \
    deals { id name pipeline { id name } stage { id name } } } }";

const SEARCH_CONTACTS: &str = "query Contacts($searchString: String, $pagination: PaginationInput!) { \
    contacts(searchString: $searchString, pagination: $pagination) { \
    data { id data isArchived lastContactAttempt lastContactPersonId createdAt updatedAt \
    lastContactPerson { id role createdAt deletedAt } \
    deals { id pipelineId stageId contactId name data isArchived authorId lastContactAttempt createdAt updatedAt } } \
    pagination { page limit total } } }";

const FILTERED_CONTACTS: &str = "query Contacts($searchString: String, $isFilterActive: Boolean, \
    $pagination: PaginationInput!, $sort: CRMFilterSortInput, $timezone: String) { \
    contacts(searchString: $searchString, isFilterActive: $isFilterActive, pagination: $pagination, sort: $sort, timezone: $timezone) { \
    data { id data lastContactAttempt \
    lastContactPerson { id role createdAt deletedAt profile { id email firstName lastName avatarUrl isEmailBrandingEnabled preferredLanguage } } \
    deals { id name pipeline { id name } stage { id name color } } updatedAt createdAt } \
    pagination { page limit total } } }";

fn default_true() -> bool {
    true
}

/// Parameters shared by `contact.create`, `contact.update` and `contact.upsert`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactWriteParams {
    /// Only read by `contact.update`.
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub fields: JsonMap,
    #[serde(default = "default_true")]
    pub filter_unknown_fields: bool,
    /// Only read by `contact.update`.
    #[serde(default)]
    pub allow_change_email: bool,
    #[serde(default)]
    pub initial_note: Option<NoteInput>,
}

/// Parameters of `contact.getByEmail`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetByEmailParams {
    pub email: String,
}

/// Parameters of `contact.search`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default)]
    pub search_string: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Parameters of `contact.listByFilterGroup`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterListParams {
    pub filter_group_id: FilterGroupId,
    #[serde(default)]
    pub search_string: Option<String>,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Clamps a page size to `1..=100`, defaulting to 50.
#[must_use]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(limit) if limit > 0 => limit.min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    }
}

pub(crate) fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Spreads `payload` (when it is an object) and appends `extra`.
pub(crate) fn merge(payload: Option<Value>, extra: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut out = match payload {
        Some(Value::Object(map)) => map,
        _ => JsonMap::new(),
    };
    for (key, value) in extra {
        out.insert(key.to_string(), value);
    }
    Value::Object(out)
}

async fn create_contact(
    client: &GraphqlClient,
    operation: &str,
    data: &JsonMap,
    filter_unknown_fields: bool,
) -> Result<Option<Value>, ConnectorError> {
    let request = GraphqlRequest::new(CREATE_CONTACT)
        .with_variables(&json!({ "data": data, "filterUnknownFields": filter_unknown_fields }))
        .with_operation_name("CreateContact");
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(data.remove("createContact"))
}

async fn update_contact(
    client: &GraphqlClient,
    operation: &str,
    contact_id: &ContactId,
    data: &JsonMap,
    filter_unknown_fields: bool,
) -> Result<Option<Value>, ConnectorError> {
    let request = GraphqlRequest::new(UPDATE_CONTACT)
        .with_variables(&json!({
            "contactId": contact_id,
            "data": data,
            "filterUnknownFields": filter_unknown_fields,
        }))
        .with_operation_name("UpdateContact");
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(data.remove("updateContact"))
}

/// Creates the optional note following a write; `null` when there is none.
pub(crate) async fn initial_note(
    client: &GraphqlClient,
    operation: &str,
    parent_id: Option<&str>,
    note: Option<&NoteInput>,
) -> Result<Value, ConnectorError> {
    match (parent_id, note) {
        (Some(parent_id), Some(note)) if !note.text.trim().is_empty() => {
            let id = create_note(client, operation, parent_id, note).await?;
            Ok(json!(id))
        }
        _ => Ok(Value::Null),
    }
}

/// Looks up the id of the contact owning `email`.
pub async fn find_id_by_email(
    client: &GraphqlClient,
    operation: &str,
    email: &str,
) -> Result<Option<ContactId>, ConnectorError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Lookup {
        contact_by_email: Option<IdOnly>,
    }
    #[derive(Deserialize)]
    struct IdOnly {
        id: ContactId,
    }

    let request = GraphqlRequest::new(LOOKUP_BY_EMAIL)
        .with_variables(&json!({ "email": email }))
        .with_operation_name("ContactByEmail");
    let data: Lookup = client.call_as(&request).await.map_err(api_error(operation))?;
    Ok(data.contact_by_email.map(|c| c.id))
}

/// Creates a contact, optionally followed by an initial note.
pub async fn create(
    client: &GraphqlClient,
    kinds: &FieldKindMap,
    params: &ContactWriteParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "contact.create";
    let data = coerce_fields(ServiceType::Contact, &params.fields, kinds);
    let created = create_contact(client, OP, &data, params.filter_unknown_fields).await?;

    let created_id = created
        .as_ref()
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str);
    let note_id = initial_note(client, OP, created_id, params.initial_note.as_ref()).await?;

    Ok(merge(
        created,
        [("inputData", Value::Object(data)), ("initialNoteId", note_id)],
    ))
}

/// Updates a contact by id.
///
/// The e-mail field is dropped unless `allow_change_email` is set.
pub async fn update(
    client: &GraphqlClient,
    kinds: &FieldKindMap,
    params: &ContactWriteParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "contact.update";
    let contact_id = params
        .contact_id
        .as_ref()
        .filter(|id| !id.as_str().trim().is_empty())
        .ok_or_else(|| ConnectorError::invalid(OP, "contact.update requires a contactId."))?;

    let mut data = coerce_fields(ServiceType::Contact, &params.fields, kinds);
    if !params.allow_change_email {
        data.remove(EMAIL_FIELD);
    }
    if data.is_empty() {
        return Err(ConnectorError::invalid(OP, "No fields provided to update.").into());
    }

    let updated = update_contact(client, OP, contact_id, &data, params.filter_unknown_fields).await?;
    let note_id = initial_note(
        client,
        OP,
        Some(contact_id.as_str()),
        params.initial_note.as_ref(),
    )
    .await?;

    Ok(merge(
        updated,
        [("inputData", Value::Object(data)), ("initialNoteId", note_id)],
    ))
}

/// Updates the contact owning the mapped e-mail, or creates one.
pub async fn upsert(
    client: &GraphqlClient,
    kinds: &FieldKindMap,
    params: &ContactWriteParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "contact.upsert";
    let mut data = coerce_fields(ServiceType::Contact, &params.fields, kinds);
    let email = data
        .get(EMAIL_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ConnectorError::invalid(OP, "Upsert requires global_contact_email in the mapped fields.")
        })?;

    match find_id_by_email(client, OP, &email).await? {
        Some(contact_id) => {
            data.remove(EMAIL_FIELD);
            tracing::debug!(%contact_id, "upsert matched existing contact");
            let updated =
                update_contact(client, OP, &contact_id, &data, params.filter_unknown_fields)
                    .await?;
            Ok(merge(
                updated,
                [
                    ("mode", json!("found-and-updated")),
                    ("inputData", Value::Object(data)),
                ],
            ))
        }
        None => {
            let created = create_contact(client, OP, &data, params.filter_unknown_fields).await?;
            Ok(merge(
                created,
                [
                    ("mode", json!("created-new")),
                    ("inputData", Value::Object(data)),
                ],
            ))
        }
    }
}

/// Fetches a contact with author, last contact person and deals.
pub async fn get_by_email(
    client: &GraphqlClient,
    params: &GetByEmailParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "contact.getByEmail";
    let email = params.email.trim();
    if email.is_empty() {
        return Err(ConnectorError::invalid(OP, "email is required").into());
    }
    let request = GraphqlRequest::new(GET_BY_EMAIL)
        .with_variables(&json!({ "email": email }))
        .with_operation_name("ContactByEmail");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    Ok(json!({
        "email": email,
        "contact": data.remove("contactByEmail").unwrap_or(Value::Null),
    }))
}

/// Splits a `{ key: { data, pagination } }` page into pagination and list.
pub(crate) fn split_page(mut data: JsonMap, key: &str) -> (Value, Value) {
    let mut page = match data.remove(key) {
        Some(Value::Object(map)) => map,
        _ => JsonMap::new(),
    };
    let pagination = page.remove("pagination").unwrap_or(Value::Null);
    let list = match page.remove("data") {
        Some(list @ Value::Array(_)) => list,
        _ => json!([]),
    };
    (pagination, list)
}

/// Full-text search over all contacts.
pub async fn search(
    client: &GraphqlClient,
    params: &SearchParams,
) -> Result<Value, ConnectorError> {
    let search_string = trimmed(params.search_string.as_deref());
    let limit = clamp_limit(params.limit);
    let request = GraphqlRequest::new(SEARCH_CONTACTS)
        .with_variables(&json!({
            "searchString": search_string,
            "pagination": { "page": params.page.max(0), "limit": limit },
        }))
        .with_operation_name("Contacts");
    let data = client
        .call(&request)
        .await
        .map_err(api_error("contact.search"))?;
    let (pagination, contacts) = split_page(data, "contacts");
    Ok(json!({
        "searchString": search_string,
        "pagination": pagination,
        "contacts": contacts,
    }))
}

/// Lists the contacts matched by a saved filter group.
///
/// Filter groups belong to a user session, so API-token credentials are
/// refused before any request is made.
pub async fn list_by_filter_group(
    client: &GraphqlClient,
    params: &FilterListParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "contact.listByFilterGroup";
    require_session(client, OP).await?;
    if params.filter_group_id.as_str().trim().is_empty() {
        return Err(ConnectorError::invalid(OP, "filterGroupId is required").into());
    }

    let limit = clamp_limit(params.limit);
    let timezone = trimmed(params.timezone.as_deref()).unwrap_or(DEFAULT_TIMEZONE);
    let mut variables = json!({
        "pagination": { "page": params.page.max(0), "limit": limit },
        "isFilterActive": true,
        "timezone": timezone,
    });
    if let Some(search) = trimmed(params.search_string.as_deref()) {
        variables["searchString"] = json!(search);
    }

    let (pagination, contacts) = with_loaded_filter_group(
        client,
        OP,
        ServiceType::Contact,
        &params.filter_group_id,
        true,
        || async {
            let request = GraphqlRequest::new(FILTERED_CONTACTS)
                .with_variables(&variables)
                .with_operation_name("Contacts");
            let data = client.call(&request).await.map_err(api_error(OP))?;
            Ok(split_page(data, "contacts"))
        },
    )
    .await?;

    Ok(json!({
        "filterGroupId": params.filter_group_id,
        "timezone": timezone,
        "pagination": pagination,
        "contacts": contacts,
    }))
}
