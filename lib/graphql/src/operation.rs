//! Request and response envelopes and typed GraphQL operations.

use crate::error::ClientError;
use crate::session::SessionTokens;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A JSON object, the shape of GraphQL `data`.
pub type JsonMap = Map<String, Value>;

/// GraphQL request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variables: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operation_name: Option<String>,
}

impl GraphqlRequest {
    /// Create a request without variables.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Attach variables.
    ///
    /// Values that cannot be represented as JSON are replaced by `{}`.
    #[must_use]
    pub fn with_variables<V: Serialize + ?Sized>(mut self, variables: &V) -> Self {
        self.variables = Some(sanitize_variables(variables));
        self
    }

    /// Attach an operation name. Blank names are ignored.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim();
        self.operation_name = (!name.is_empty()).then(|| name.to_string());
        self
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn variables(&self) -> Option<&Value> {
        self.variables.as_ref()
    }

    #[must_use]
    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    /// Returns the request with a blank operation name dropped.
    #[must_use]
    pub(crate) fn normalized(&self) -> Self {
        let request = Self {
            query: self.query.clone(),
            variables: self.variables.clone(),
            operation_name: None,
        };
        match &self.operation_name {
            Some(name) => request.with_operation_name(name),
            None => request,
        }
    }
}

/// Serializes variables to JSON, falling back to an empty object.
pub fn sanitize_variables<V: Serialize + ?Sized>(variables: &V) -> Value {
    match serde_json::to_value(variables) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "variables not representable as JSON, sending {{}}");
            Value::Object(Map::new())
        }
    }
}

/// GraphQL error location; absent coordinates read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlErrorLocation {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// GraphQL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphqlPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

impl fmt::Display for GraphqlPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A single entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_locations")]
    pub locations: Vec<GraphqlErrorLocation>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub path: Vec<GraphqlPathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    /// Returns `extensions.code` when it is a string.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }

    /// Returns the path joined with dots, or `None` when empty.
    #[must_use]
    pub fn path_string(&self) -> Option<String> {
        if self.path.is_empty() {
            return None;
        }
        Some(
            self.path
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("."),
        )
    }
}

/// GraphQL response container.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    /// Returns `data` as an object, or the composed error.
    ///
    /// # Errors
    ///
    /// `Graphql` for a non-empty `errors` array, `InvalidResponse` if `data`
    /// is present but not an object.
    pub fn into_data(self) -> Result<JsonMap, ClientError> {
        if !self.errors.is_empty() {
            return Err(ClientError::from_graphql_errors(self.errors));
        }
        match self.data {
            None | Some(Value::Null) => Ok(JsonMap::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(ClientError::InvalidResponse {
                reason: format!("data is not an object: {other}"),
            }),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// Locations are diagnostic only; entries that do not parse are dropped so
// the error message still reaches the caller.
fn lenient_locations<'de, D>(deserializer: D) -> Result<Vec<GraphqlErrorLocation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let entries = match raw {
        Some(Value::Array(entries)) => entries,
        _ => return Ok(Vec::new()),
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

/// Deserializes `data` into a narrow result type.
///
/// # Errors
///
/// Returns `InvalidResponse` if the shape does not match.
pub fn unwrap_data<T: DeserializeOwned>(data: JsonMap) -> Result<T, ClientError> {
    serde_json::from_value(Value::Object(data)).map_err(|e| ClientError::InvalidResponse {
        reason: e.to_string(),
    })
}

/// Typed GraphQL operation definition.
///
/// Implement this trait for each query or mutation.
pub trait GraphqlOperation {
    /// Variables type.
    type Variables: Serialize + Send + Sync;
    /// Response data type.
    type ResponseData: DeserializeOwned + Send;

    /// GraphQL query text.
    const QUERY: &'static str;
    /// Operation name.
    const OPERATION_NAME: &'static str;

    /// Builds the request envelope.
    fn request(variables: &Self::Variables) -> GraphqlRequest {
        GraphqlRequest::new(Self::QUERY)
            .with_variables(variables)
            .with_operation_name(Self::OPERATION_NAME)
    }
}

/// Variables for operations that take none; serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NoVariables {}

/// Login mutation input.
#[derive(Clone, Serialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInput")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginVariables {
    pub input: LoginInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub login: SessionTokens,
}

/// Exchanges email and password for session tokens.
pub struct LoginMutation;

impl GraphqlOperation for LoginMutation {
    type Variables = LoginVariables;
    type ResponseData = LoginData;

    const QUERY: &'static str = "mutation Login($input: IAMLoginInput!) { login(input: $input) { accessToken refreshToken } }";
    const OPERATION_NAME: &'static str = "Login";
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshVariables {
    pub refresh_token: String,
}

impl fmt::Debug for RefreshVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshVariables").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshData {
    pub refresh_token: SessionTokens,
}

/// Exchanges a refresh token for new session tokens.
pub struct RefreshMutation;

impl GraphqlOperation for RefreshMutation {
    type Variables = RefreshVariables;
    type ResponseData = RefreshData;

    const QUERY: &'static str = "mutation Refresh($refreshToken: String!) { refreshToken(token: $refreshToken) { accessToken refreshToken } }";
    const OPERATION_NAME: &'static str = "Refresh";
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Viewer {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountData {
    #[serde(default)]
    pub viewer: Option<Viewer>,
}

/// Fetches the role of the authenticated viewer.
pub struct AccountQuery;

impl GraphqlOperation for AccountQuery {
    type Variables = NoVariables;
    type ResponseData = AccountData;

    const QUERY: &'static str = "query Account { viewer { role } }";
    const OPERATION_NAME: &'static str = "Account";
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PingData {
    #[serde(default, rename = "__typename")]
    pub typename: Option<String>,
}

/// Cheapest possible authenticated round trip.
pub struct PingQuery;

impl GraphqlOperation for PingQuery {
    type Variables = NoVariables;
    type ResponseData = PingData;

    const QUERY: &'static str = "query __Ping { __typename }";
    const OPERATION_NAME: &'static str = "__Ping";
}
