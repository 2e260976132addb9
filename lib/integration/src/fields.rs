//! Custom field metadata and value coercion.
//!
//! Contact and deal cards carry custom fields whose `fieldType`/`dataType`
//! decide what a valid value looks like. [`FieldKind`] folds those into a
//! closed set and owns the single coercion table used before writes.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};
use std::collections::HashMap;
use std::fmt;
use umsatzio_core::FieldId;
use umsatzio_graphql::{ClientError, GraphqlClient, GraphqlRequest, JsonMap};

/// Contact fields maintained by the CRM itself; never written.
pub const READ_ONLY_CONTACT_FIELDS: [&str; 5] = [
    "global_contact_last_reached",
    "global_contact_last_reached_decision_maker",
    "global_contact_phone_call_count",
    "global_contact_createdAt",
    "global_contact_createdBy",
];

/// Deal fields maintained by the CRM itself; never written.
pub const READ_ONLY_DEAL_FIELDS: [&str; 5] = [
    "global_deal_createdAt",
    "global_deal_createdBy",
    "global_deal_last_contact_attempt",
    "global_deal_last_activity",
    "global_deal_phone_call_count",
];

/// Deal fields set through dedicated inputs rather than custom field data.
pub const EXCLUDED_DEAL_FIELDS: [&str; 4] = ["name", "contactId", "pipelineId", "stageId"];

/// Field kind by field key (`name`, or `id` when unnamed).
pub type FieldKindMap = HashMap<String, FieldKind>;

/// CRM entity a card belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Contact,
    Deal,
}

impl ServiceType {
    /// Keys that must never appear in written field data.
    #[must_use]
    pub fn is_protected_field(self, key: &str) -> bool {
        match self {
            Self::Contact => READ_ONLY_CONTACT_FIELDS.contains(&key),
            Self::Deal => READ_ONLY_DEAL_FIELDS.contains(&key) || EXCLUDED_DEAL_FIELDS.contains(&key),
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contact => write!(f, "contact"),
            Self::Deal => write!(f, "deal"),
        }
    }
}

/// Input shape of a custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Boolean,
    Numeric,
    Date,
    Option,
    Multiselect,
    Text,
}

impl FieldKind {
    /// Classifies a field by its `fieldType` and `dataType`, case-insensitively.
    #[must_use]
    pub fn classify(field_type: Option<&str>, data_type: Option<&str>) -> Self {
        let ft = field_type.unwrap_or_default().trim().to_ascii_lowercase();
        let dt = data_type.unwrap_or_default().trim().to_ascii_lowercase();
        match (ft.as_str(), dt.as_str()) {
            ("switch" | "booleandropdown", _) | (_, "boolean") => Self::Boolean,
            ("numeric" | "currency", _) | (_, "number" | "float" | "int") => Self::Numeric,
            ("day" | "time" | "daytime", _) | (_, "date" | "datetime") => Self::Date,
            ("dropdown" | "select", _) | (_, "enum") => Self::Option,
            ("multiselect", _) => Self::Multiselect,
            _ => Self::Text,
        }
    }

    /// Coerces a raw value for this kind. `None` means the field is omitted.
    #[must_use]
    pub fn coerce(self, value: &Value) -> Option<Value> {
        if is_empty(value) {
            return None;
        }
        match self {
            Self::Boolean => Some(Value::Bool(match value {
                Value::Bool(b) => *b,
                Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
                _ => false,
            })),
            Self::Numeric => {
                let n = match value {
                    Value::Number(n) => n.as_f64()?,
                    Value::String(s) => s.trim().replacen(',', ".", 1).parse::<f64>().ok()?,
                    _ => return None,
                };
                if !n.is_finite() || n == 0.0 {
                    return None;
                }
                match value {
                    Value::Number(_) => Some(value.clone()),
                    _ => Some(number_value(n)),
                }
            }
            Self::Date => Some(match value {
                Value::String(s) => normalize_date(s)
                    .map(Value::String)
                    .unwrap_or_else(|| value.clone()),
                other => other.clone(),
            }),
            Self::Option | Self::Multiselect | Self::Text => Some(value.clone()),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// Whole numbers stay integers on the wire.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

pub(crate) fn normalize_date(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(
            at.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let at = day.and_hms_opt(0, 0, 0)?.and_utc();
    Some(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Metadata of a custom field on a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: FieldId,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn kind(&self) -> FieldKind {
        FieldKind::classify(self.field_type.as_deref(), self.data_type.as_deref())
    }

    /// Label, then name, then id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        [self.label.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }

    /// The key field values are written under: name, or id when unnamed.
    #[must_use]
    pub fn key(&self) -> &str {
        self.name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }

    /// False for deal fields that have dedicated inputs.
    #[must_use]
    pub fn is_writable_deal_field(&self) -> bool {
        let name = self.name.as_deref().unwrap_or_default().trim();
        !EXCLUDED_DEAL_FIELDS.contains(&name)
    }
}

#[derive(Deserialize)]
struct CardsData {
    #[serde(default)]
    cards: Option<Vec<Card>>,
}

#[derive(Deserialize)]
struct Card {
    #[serde(default)]
    fields: Option<Vec<RawField>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    field_type: Option<String>,
    #[serde(default)]
    data_type: Option<String>,
}

const CARDS_QUERY: &str = "query Cards($serviceType: ServiceType!) { cards(serviceType: $serviceType) { fields { id label name fieldType dataType } } }";

/// Loads the custom fields of every card of a service. Fields without id are skipped.
pub async fn load_fields(
    client: &GraphqlClient,
    service: ServiceType,
) -> Result<Vec<FieldDescriptor>, Report<ClientError>> {
    let request = GraphqlRequest::new(CARDS_QUERY)
        .with_variables(&json!({ "serviceType": service }))
        .with_operation_name("Cards");
    let data: CardsData = client.call_as(&request).await?;
    Ok(data
        .cards
        .unwrap_or_default()
        .into_iter()
        .flat_map(|card| card.fields.unwrap_or_default())
        .filter_map(|field| {
            let id = field.id.filter(|id| !id.trim().is_empty())?;
            Some(FieldDescriptor {
                id: FieldId::new(id),
                label: field.label,
                name: field.name,
                field_type: field.field_type,
                data_type: field.data_type,
            })
        })
        .collect())
}

/// Builds the kind map; the first field seen for a key wins.
#[must_use]
pub fn kind_map(fields: &[FieldDescriptor]) -> FieldKindMap {
    let mut map = FieldKindMap::new();
    for field in fields {
        map.entry(field.key().to_string()).or_insert_with(|| field.kind());
    }
    map
}

/// Coerces input values for a write, dropping protected and empty fields.
///
/// Keys without metadata are treated as text.
#[must_use]
pub fn coerce_fields(service: ServiceType, input: &JsonMap, kinds: &FieldKindMap) -> JsonMap {
    input
        .iter()
        .filter(|(key, _)| !service.is_protected_field(key))
        .filter_map(|(key, value)| {
            let kind = kinds.get(key).copied().unwrap_or(FieldKind::Text);
            kind.coerce(value).map(|v| (key.clone(), v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_field_type() {
        assert_eq!(FieldKind::classify(Some("Switch"), None), FieldKind::Boolean);
        assert_eq!(FieldKind::classify(Some("booleanDropdown"), None), FieldKind::Boolean);
        assert_eq!(FieldKind::classify(Some("currency"), None), FieldKind::Numeric);
        assert_eq!(FieldKind::classify(Some("DAYTIME"), None), FieldKind::Date);
        assert_eq!(FieldKind::classify(Some("time"), None), FieldKind::Date);
        assert_eq!(FieldKind::classify(Some("select"), None), FieldKind::Option);
        assert_eq!(FieldKind::classify(Some("multiselect"), None), FieldKind::Multiselect);
        assert_eq!(FieldKind::classify(Some("textarea"), None), FieldKind::Text);
        assert_eq!(FieldKind::classify(None, None), FieldKind::Text);
    }

    #[test]
    fn classify_by_data_type() {
        assert_eq!(FieldKind::classify(None, Some("BOOLEAN")), FieldKind::Boolean);
        assert_eq!(FieldKind::classify(Some("input"), Some("float")), FieldKind::Numeric);
        assert_eq!(FieldKind::classify(None, Some("datetime")), FieldKind::Date);
        assert_eq!(FieldKind::classify(None, Some("enum")), FieldKind::Option);
    }

    #[test]
    fn empty_values_are_omitted_for_every_kind() {
        for kind in [
            FieldKind::Boolean,
            FieldKind::Numeric,
            FieldKind::Date,
            FieldKind::Option,
            FieldKind::Multiselect,
            FieldKind::Text,
        ] {
            assert_eq!(kind.coerce(&Value::Null), None);
            assert_eq!(kind.coerce(&json!("   ")), None);
        }
    }

    #[test]
    fn boolean_coercion() {
        assert_eq!(FieldKind::Boolean.coerce(&json!(true)), Some(json!(true)));
        assert_eq!(FieldKind::Boolean.coerce(&json!("TRUE")), Some(json!(true)));
        assert_eq!(FieldKind::Boolean.coerce(&json!("yes")), Some(json!(false)));
        assert_eq!(FieldKind::Boolean.coerce(&json!(1)), Some(json!(false)));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(FieldKind::Numeric.coerce(&json!(3.5)), Some(json!(3.5)));
        assert_eq!(FieldKind::Numeric.coerce(&json!("12,5")), Some(json!(12.5)));
        assert_eq!(FieldKind::Numeric.coerce(&json!("42")), Some(json!(42)));
        assert_eq!(FieldKind::Numeric.coerce(&json!("0")), None);
        assert_eq!(FieldKind::Numeric.coerce(&json!(0)), None);
        assert_eq!(FieldKind::Numeric.coerce(&json!("abc")), None);
        assert_eq!(FieldKind::Numeric.coerce(&json!("inf")), None);
    }

    #[test]
    fn date_coercion() {
        assert_eq!(
            FieldKind::Date.coerce(&json!("2024-03-01T10:00:00+02:00")),
            Some(json!("2024-03-01T08:00:00.000Z"))
        );
        assert_eq!(
            FieldKind::Date.coerce(&json!("2024-03-01")),
            Some(json!("2024-03-01T00:00:00.000Z"))
        );
        assert_eq!(FieldKind::Date.coerce(&json!("next week")), Some(json!("next week")));
    }

    #[test]
    fn other_kinds_pass_through() {
        assert_eq!(FieldKind::Multiselect.coerce(&json!(["a", "b"])), Some(json!(["a", "b"])));
        assert_eq!(FieldKind::Text.coerce(&json!(" hi ")), Some(json!(" hi ")));
    }

    fn field(id: &str, label: Option<&str>, name: Option<&str>) -> FieldDescriptor {
        FieldDescriptor {
            id: FieldId::new(id),
            label: label.map(str::to_string),
            name: name.map(str::to_string),
            field_type: None,
            data_type: None,
        }
    }

    #[test]
    fn display_name_falls_back() {
        assert_eq!(field("f1", Some("Phone"), Some("phone")).display_name(), "Phone");
        assert_eq!(field("f1", None, Some("phone")).display_name(), "phone");
        assert_eq!(field("f1", Some(" "), None).display_name(), "f1");
    }

    #[test]
    fn deal_exclusions() {
        assert!(!field("f1", None, Some("pipelineId")).is_writable_deal_field());
        assert!(field("f2", None, Some("budget")).is_writable_deal_field());
    }

    #[test]
    fn contact_coercion_drops_read_only_and_uses_kinds() {
        let mut kinds = FieldKindMap::new();
        kinds.insert("budget".to_string(), FieldKind::Numeric);
        kinds.insert("newsletter".to_string(), FieldKind::Boolean);

        let input = json!({
            "global_contact_createdAt": "2024-01-01",
            "budget": "1.000,5",
            "newsletter": "true",
            "notes": "",
            "city": "Berlin"
        });
        let Value::Object(input) = input else {
            panic!("object expected")
        };
        let out = coerce_fields(ServiceType::Contact, &input, &kinds);

        assert_eq!(
            Value::Object(out),
            json!({"newsletter": true, "city": "Berlin"})
        );
    }

    #[test]
    fn deal_coercion_drops_dedicated_and_read_only_fields() {
        let mut kinds = FieldKindMap::new();
        kinds.insert("volume".to_string(), FieldKind::Numeric);

        let Value::Object(input) = json!({
            "name": "Big deal",
            "stageId": "s1",
            "global_deal_phone_call_count": 4,
            "volume": "2500",
            "source": "fair"
        }) else {
            panic!("object expected")
        };
        let out = coerce_fields(ServiceType::Deal, &input, &kinds);

        assert_eq!(Value::Object(out), json!({"volume": 2500, "source": "fair"}));
        assert!(ServiceType::Contact.is_protected_field("global_contact_createdBy"));
        assert!(!ServiceType::Contact.is_protected_field("name"));
    }

    #[test]
    fn kind_map_first_field_wins() {
        let mut a = field("f1", None, Some("x"));
        a.field_type = Some("switch".to_string());
        let mut b = field("f2", None, Some("x"));
        b.field_type = Some("numeric".to_string());
        let map = kind_map(&[a, b]);
        assert_eq!(map.get("x"), Some(&FieldKind::Boolean));
    }
}
