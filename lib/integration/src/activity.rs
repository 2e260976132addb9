//! Contact activities: logged e-mails, phone calls and the note timeline.
//!
//! Phone calls arrive through webhooks with only part of the record. The
//! matcher checks the pushed body against a wanted call type and result and
//! enriches it with the full activity.

use crate::contact::{EMAIL_FIELD, clamp_limit};
use crate::error::{ConnectorError, api_error};
use crate::fields::normalize_date;
use crate::note::ensure_rich_text;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use umsatzio_core::{ContactId, Result, best_effort};
use umsatzio_graphql::{ClientError, GraphqlClient, GraphqlRequest, JsonMap};

const CONTACT: &str = "query Contact($contactId: ID!) { contact(contactId: $contactId) { id data } }";

const CREATE_EMAIL_ACTIVITY: &str = "mutation CreateEmailActivity($parentId: String!, $description: String, \
    $activityTime: DateTime!, $parentType: ParentType!, $email: String) { \
    createEmailActivity(input: { parentId: $parentId, parentType: $parentType, description: $description, \
    activityTime: $activityTime, emailAddress: $email }) { id __typename } }";

const EMAIL_ACTIVITIES: &str = "query ContactEmailActivities($contactId: ID!, $pagination: PaginationInput!) { \
    contactEmailActivities(contactId: $contactId, pagination: $pagination) { \
    activities { id description activityTime emailAddress subject from to cc bcc status createdAt updatedAt } \
    pagination { page limit total } } }";

const PHONE_CALL_FIELDS: &str = "id description activityTime phoneCallResult phoneCallActivityTypeId phoneNumber \
    parentType createdAt updatedAt isPinned \
    author { id createdAt deletedAt profile { id email firstName lastName } } \
    phoneCallActivityType { id domainType label category }";

const NOTES: &str = "query ContactNotes($contactId: ID!, $pagination: PaginationInput!) { \
    contactNotes(contactId: $contactId, pagination: $pagination) { \
    notes { data { id description isPinned createdAt updatedAt } pagination { page limit total } } \
    pinnedNotes { id description isPinned createdAt updatedAt } count } }";

const PHONE_CALL_TYPES: &str =
    "query GetPhoneCallActivityTypes { phoneCallActivityTypes { id label category } }";

const PHONE_CALL_BY_ID: &str = "query PhoneCallById($id: ID!) { PhoneCallActivity(id: $id) { \
    id activityTime phoneCallResult phoneCallActivityType { id label category } \
    parentId parentType phoneNumber description \
    author { id profile { email firstName lastName } } createdAt updatedAt } }";

/// Category of a phone-call activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallCategory {
    OpeningCall,
    SettingCall,
    ClosingCall,
}

impl CallCategory {
    pub const ALL: [Self; 3] = [Self::OpeningCall, Self::SettingCall, Self::ClosingCall];

    /// Results a call of this category can be logged with.
    #[must_use]
    pub fn results(self) -> &'static [&'static str] {
        match self {
            Self::ClosingCall => &["notReached", "rescheduled", "cancelled", "sold", "notSold"],
            Self::SettingCall => &[
                "notReached",
                "rescheduled",
                "cancelled",
                "followUp",
                "qualified",
                "scheduled",
                "unqualified",
            ],
            Self::OpeningCall => &[
                "notReached",
                "decisionMakerWithInterestWithAppointment",
                "decisionMakerWithInterestWithoutAppointment",
                "decisionMakerWithoutInterest",
                "gatekeeper",
                "withInterestWithAppointment",
                "withInterestWithoutAppointment",
                "withoutInterest",
                "gatekeeperAndDecisionMakerWithInterestWithAppointment",
                "gatekeeperAndDecisionMakerWithInterestWithoutAppointment",
                "gatekeeperAndDecisionMakerWithoutInterest",
            ],
        }
    }
}

impl fmt::Display for CallCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpeningCall => "openingCall",
            Self::SettingCall => "settingCall",
            Self::ClosingCall => "closingCall",
        })
    }
}

/// Parameters of `activity.logEmail`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEmailParams {
    pub contact_id: ContactId,
    pub activity_time: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bold: bool,
}

/// Paging over one contact's timeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPageParams {
    pub contact_id: ContactId,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Parameters of `activity.callResults`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallResultParams {
    #[serde(default)]
    pub category: Option<CallCategory>,
}

/// Parameters of `activity.matchPhoneCall`.
///
/// Unset wants match any call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPhoneCallParams {
    pub body: Value,
    #[serde(default)]
    pub phone_call_activity_type_id: Option<String>,
    #[serde(default)]
    pub call_result: Option<String>,
}

fn required_contact<'a>(operation: &str, id: &'a ContactId) -> Result<&'a str, ConnectorError> {
    let id = id.as_str().trim();
    if id.is_empty() {
        return Err(ConnectorError::invalid(operation, "contactId is required").into());
    }
    Ok(id)
}

fn page_variables(contact_id: &str, page: i64, limit: Option<i64>) -> Value {
    json!({
        "contactId": contact_id,
        "pagination": { "page": page.max(0), "limit": clamp_limit(limit) },
    })
}

async fn contact_email(
    client: &GraphqlClient,
    operation: &str,
    contact_id: &str,
) -> Result<Option<String>, ConnectorError> {
    let request = GraphqlRequest::new(CONTACT)
        .with_variables(&json!({ "contactId": contact_id }))
        .with_operation_name("Contact");
    let data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(data
        .get("contact")
        .and_then(|c| c.get("data"))
        .and_then(|d| d.get(EMAIL_FIELD))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string))
}

/// Logs an e-mail on a contact's timeline, addressed to its primary e-mail.
pub async fn log_email(
    client: &GraphqlClient,
    params: &LogEmailParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "activity.logEmail";
    let contact_id = required_contact(OP, &params.contact_id)?;
    let activity_time = normalize_date(&params.activity_time).ok_or_else(|| {
        ConnectorError::invalid(OP, format!("Invalid date for activityTime: {}", params.activity_time))
    })?;
    let Some(email) = contact_email(client, OP, contact_id).await? else {
        return Err(ConnectorError::invalid(
            OP,
            format!("Contact {contact_id}: {EMAIL_FIELD} is not set."),
        )
        .into());
    };

    let request = GraphqlRequest::new(CREATE_EMAIL_ACTIVITY)
        .with_variables(&json!({
            "parentId": contact_id,
            "parentType": "contact",
            "activityTime": activity_time,
            "email": email,
            "description": ensure_rich_text(&params.description, params.bold),
        }))
        .with_operation_name("CreateEmailActivity");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    Ok(data
        .remove("createEmailActivity")
        .filter(|v| !v.is_null())
        .unwrap_or_else(|| json!({})))
}

pub async fn list_emails(
    client: &GraphqlClient,
    params: &ContactPageParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "activity.listEmails";
    let contact_id = required_contact(OP, &params.contact_id)?;
    let request = GraphqlRequest::new(EMAIL_ACTIVITIES)
        .with_variables(&page_variables(contact_id, params.page, params.limit))
        .with_operation_name("ContactEmailActivities");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    let mut page = take_object(&mut data, "contactEmailActivities");
    Ok(json!({
        "scope": "contact",
        "parentId": contact_id,
        "activities": take_list(&mut page, "activities"),
        "pagination": page.remove("pagination").unwrap_or(Value::Null),
    }))
}

pub async fn list_phone_calls(
    client: &GraphqlClient,
    params: &ContactPageParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "activity.listPhoneCalls";
    let contact_id = required_contact(OP, &params.contact_id)?;
    let query = format!(
        "query ContactPhoneCallActivities($contactId: ID!, $pagination: PaginationInput!) {{ \
         contactPhoneCallActivities(contactId: $contactId, pagination: $pagination) {{ \
         activities {{ data {{ {PHONE_CALL_FIELDS} }} pagination {{ page limit total }} }} \
         pinnedActivities {{ {PHONE_CALL_FIELDS} }} }} }}"
    );
    let request = GraphqlRequest::new(query)
        .with_variables(&page_variables(contact_id, params.page, params.limit))
        .with_operation_name("ContactPhoneCallActivities");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    let mut calls = take_object(&mut data, "contactPhoneCallActivities");
    let mut activities = take_object(&mut calls, "activities");
    Ok(json!({
        "scope": "contact",
        "parentId": contact_id,
        "activities": take_list(&mut activities, "data"),
        "pagination": activities.remove("pagination").unwrap_or(Value::Null),
        "pinned": take_list(&mut calls, "pinnedActivities"),
    }))
}

pub async fn list_notes(
    client: &GraphqlClient,
    params: &ContactPageParams,
) -> Result<Value, ConnectorError> {
    const OP: &str = "activity.listNotes";
    let contact_id = required_contact(OP, &params.contact_id)?;
    let request = GraphqlRequest::new(NOTES)
        .with_variables(&page_variables(contact_id, params.page, params.limit))
        .with_operation_name("ContactNotes");
    let mut data = client.call(&request).await.map_err(api_error(OP))?;
    let mut timeline = take_object(&mut data, "contactNotes");
    let mut notes = take_object(&mut timeline, "notes");
    Ok(json!({
        "scope": "contact",
        "parentId": contact_id,
        "notes": take_list(&mut notes, "data"),
        "pagination": notes.remove("pagination").unwrap_or(Value::Null),
        "pinned": take_list(&mut timeline, "pinnedNotes"),
        "count": timeline.remove("count").filter(Value::is_number).unwrap_or(json!(0)),
    }))
}

/// Lists the configured phone-call activity types.
pub async fn phone_call_types(
    client: &GraphqlClient,
    operation: &str,
) -> Result<Vec<Value>, ConnectorError> {
    let request =
        GraphqlRequest::new(PHONE_CALL_TYPES).with_operation_name("GetPhoneCallActivityTypes");
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(match data.remove("phoneCallActivityTypes") {
        Some(Value::Array(types)) => types,
        _ => Vec::new(),
    })
}

/// Call results per category, or for a single one.
#[must_use]
pub fn call_results(params: &CallResultParams) -> Value {
    let categories: Vec<CallCategory> = match params.category {
        Some(category) => vec![category],
        None => CallCategory::ALL.to_vec(),
    };
    let mut out = JsonMap::new();
    for category in categories {
        out.insert(category.to_string(), json!(category.results()));
    }
    json!({ "results": out })
}

fn take_object(data: &mut JsonMap, key: &str) -> JsonMap {
    match data.remove(key) {
        Some(Value::Object(map)) => map,
        _ => JsonMap::new(),
    }
}

fn take_list(data: &mut JsonMap, key: &str) -> Value {
    match data.remove(key) {
        Some(list @ Value::Array(_)) => list,
        _ => json!([]),
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Id, type id and result as pushed in a webhook body.
#[derive(Debug, Default, PartialEq, Eq)]
struct CallFacts {
    id: Option<String>,
    type_id: Option<String>,
    result: Option<String>,
}

impl CallFacts {
    fn of(call: &Value) -> Self {
        let type_id = non_blank(call.get("phoneCallActivityType").and_then(|t| t.get("id")))
            .or_else(|| non_blank(call.get("phoneCallActivityTypeId")));
        Self {
            id: non_blank(call.get("id")),
            type_id,
            result: non_blank(call.get("phoneCallResult")),
        }
    }

    fn matches(&self, want_type: Option<&str>, want_result: Option<&str>) -> bool {
        want_type.is_none_or(|t| self.type_id.as_deref() == Some(t))
            && want_result.is_none_or(|r| self.result.as_deref() == Some(r))
    }
}

/// `description` parsed as JSON when it holds a JSON document.
fn parsed_description(description: Option<&Value>) -> Value {
    match description {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

fn with_parsed_description(activity: Value) -> Value {
    let mut activity = match activity {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    };
    let parsed = parsed_description(activity.get("description"));
    activity.insert("descriptionParsed".to_string(), parsed);
    Value::Object(activity)
}

async fn fetch_phone_call(
    client: &GraphqlClient,
    id: &str,
) -> Result<Option<Value>, ClientError> {
    let request = GraphqlRequest::new(PHONE_CALL_BY_ID)
        .with_variables(&json!({ "id": id }))
        .with_operation_name("PhoneCallById");
    let mut data = client.call(&request).await?;
    Ok(data.remove("PhoneCallActivity").filter(|v| !v.is_null()))
}

/// Matches a pushed phone call against the wanted type and result.
///
/// Returns `{match: null}` when it does not match or has no id. A body that
/// already matches is returned even when the lookup fails, using the pushed
/// fields; a body that does not match is re-checked on the full record.
pub async fn match_phone_call(
    client: &GraphqlClient,
    params: &MatchPhoneCallParams,
) -> Result<Value, ConnectorError> {
    let want_type = params
        .phone_call_activity_type_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let want_result = params
        .call_result
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let body = &params.body;
    let facts = CallFacts::of(body);
    let Some(id) = facts.id.as_deref() else {
        return Ok(json!({ "match": null }));
    };

    let fetched = best_effort("phone_call_lookup", fetch_phone_call(client, id)).await;
    let activity = if facts.matches(want_type, want_result) {
        match fetched {
            Some(Some(enriched)) => Some(with_parsed_description(enriched)),
            Some(None) => None,
            None => Some(json!({
                "id": id,
                "activityTime": body.get("activityTime").cloned().unwrap_or(Value::Null),
                "phoneCallResult": facts.result,
                "phoneCallActivityType": facts.type_id.as_ref().map(|type_id| json!({
                    "id": type_id,
                    "label": body.pointer("/phoneCallActivityType/label").cloned().unwrap_or(Value::Null),
                    "category": body.pointer("/phoneCallActivityType/category").cloned().unwrap_or(Value::Null),
                })),
                "descriptionParsed": parsed_description(body.get("description")),
            })),
        }
    } else {
        fetched
            .flatten()
            .filter(|enriched| CallFacts::of(enriched).matches(want_type, want_result))
            .map(with_parsed_description)
    };

    tracing::debug!(call_id = id, matched = activity.is_some(), "phone call matched");
    Ok(match activity {
        Some(activity) => json!({ "match": { "body": body, "activity": activity } }),
        None => json!({ "match": null }),
    })
}
