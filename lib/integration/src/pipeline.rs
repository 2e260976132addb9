//! Deal pipelines and their stages.

use crate::error::{ConnectorError, api_error};
use serde::Deserialize;
use serde_json::{Value, json};
use umsatzio_core::{PipelineId, Result};
use umsatzio_graphql::{GraphqlClient, GraphqlRequest};

const PIPELINES: &str = "query Pipelines { pipelines { id name dealsTotal __typename } }";

const PIPELINE: &str = "query Pipeline($pipelineId: String!) { pipeline(pipelineId: $pipelineId) { \
    id name dealsTotal stages { id name color deals { id __typename } __typename } __typename } }";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineParams {
    pub pipeline_id: PipelineId,
}

/// Lists all pipelines with their deal totals.
pub async fn list(client: &GraphqlClient, operation: &str) -> Result<Vec<Value>, ConnectorError> {
    let request = GraphqlRequest::new(PIPELINES).with_operation_name("Pipelines");
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(match data.remove("pipelines") {
        Some(Value::Array(pipelines)) => pipelines,
        _ => Vec::new(),
    })
}

/// Fetches one pipeline with its stages; `{}` when unknown.
pub async fn get(
    client: &GraphqlClient,
    operation: &str,
    params: &PipelineParams,
) -> Result<Value, ConnectorError> {
    let pipeline_id = params.pipeline_id.as_str().trim();
    if pipeline_id.is_empty() {
        return Err(ConnectorError::invalid(operation, "pipelineId is required").into());
    }
    let request = GraphqlRequest::new(PIPELINE)
        .with_variables(&json!({ "pipelineId": pipeline_id }))
        .with_operation_name("Pipeline");
    let mut data = client.call(&request).await.map_err(api_error(operation))?;
    Ok(data
        .remove("pipeline")
        .filter(|v| !v.is_null())
        .unwrap_or_else(|| json!({})))
}

/// Stages of a pipeline in board order, each with its deal count.
pub async fn list_stages(
    client: &GraphqlClient,
    params: &PipelineParams,
) -> Result<Value, ConnectorError> {
    let pipeline = get(client, "pipeline.listStages", params).await?;
    Ok(json!({
        "pipelineId": params.pipeline_id,
        "stages": stage_summaries(&pipeline),
    }))
}

fn stage_summaries(pipeline: &Value) -> Vec<Value> {
    pipeline
        .get("stages")
        .and_then(Value::as_array)
        .map(|stages| {
            stages
                .iter()
                .map(|stage| {
                    let deals = stage.get("deals").and_then(Value::as_array).map_or(0, Vec::len);
                    json!({
                        "id": stage.get("id").cloned().unwrap_or(Value::Null),
                        "name": stage.get("name").cloned().unwrap_or(Value::Null),
                        "color": stage.get("color").cloned().unwrap_or(Value::Null),
                        "dealCount": deals,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_summaries_count_deals() {
        let pipeline = json!({
            "id": "p1",
            "stages": [
                { "id": "s1", "name": "Lead", "color": "#fff", "deals": [{ "id": "d1" }, { "id": "d2" }] },
                { "id": "s2", "name": "Won", "deals": null }
            ]
        });
        let stages = stage_summaries(&pipeline);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0]["dealCount"], 2);
        assert_eq!(stages[1]["dealCount"], 0);
        assert_eq!(stages[1]["color"], Value::Null);
    }

    #[test]
    fn unknown_pipeline_has_no_stages() {
        assert!(stage_summaries(&json!({})).is_empty());
    }
}
