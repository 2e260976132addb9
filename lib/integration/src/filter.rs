//! Saved CRM filter groups.
//!
//! A filter group is activated for the session user, queries run against it,
//! and it is unloaded afterwards.

use crate::error::{ConnectorError, api_error};
use crate::fields::ServiceType;
use serde_json::json;
use std::future::Future;
use umsatzio_core::{FilterGroupId, Result, best_effort};
use umsatzio_graphql::{AuthMode, GraphqlClient, GraphqlRequest};

const LOAD_FILTER_GROUP: &str =
    "mutation LoadFilterGroup($id: ID!) { loadFilterGroup(id: $id) { id name __typename } }";

const UNLOAD_FILTER_GROUP: &str = "mutation UnloadFilterGroup($serviceType: ServiceType!, $deleteFilters: Boolean!) { unloadFilterGroup(serviceType: $serviceType, deleteFilters: $deleteFilters) }";

/// Refuses API-token credentials; filter groups belong to a user session.
pub async fn require_session(client: &GraphqlClient, operation: &str) -> Result<(), ConnectorError> {
    if client.auth_mode().await.map_err(api_error(operation))? != AuthMode::EmailPassword {
        return Err(ConnectorError::RequiresEmailPassword {
            operation: operation.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Loads `filter_group_id`, runs `f`, then unloads the group.
///
/// Unloading happens whether `f` succeeds or not and its failure is only
/// logged. A failed load skips both `f` and the unload.
pub async fn with_loaded_filter_group<T, F, Fut>(
    client: &GraphqlClient,
    operation: &str,
    service: ServiceType,
    filter_group_id: &FilterGroupId,
    delete_filters: bool,
    f: F,
) -> Result<T, ConnectorError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let load = GraphqlRequest::new(LOAD_FILTER_GROUP)
        .with_variables(&json!({ "id": filter_group_id }))
        .with_operation_name("LoadFilterGroup");
    client.call(&load).await.map_err(api_error(operation))?;
    tracing::debug!(%filter_group_id, %service, "filter group loaded");

    let result = f().await;

    let unload = GraphqlRequest::new(UNLOAD_FILTER_GROUP)
        .with_variables(&json!({ "serviceType": service, "deleteFilters": delete_filters }))
        .with_operation_name("UnloadFilterGroup");
    best_effort("unload_filter_group", client.call(&unload)).await;

    result
}
