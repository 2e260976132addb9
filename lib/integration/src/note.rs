//! Notes on contacts and deals.
//!
//! Note bodies are Slate rich-text documents serialized as JSON strings.

use crate::error::{ConnectorError, api_error};
use serde::Deserialize;
use serde_json::{Value, json};
use umsatzio_core::{NoteId, Result, best_effort};
use umsatzio_graphql::{GraphqlClient, GraphqlRequest};

const CREATE_NOTE: &str = "mutation CreateNote($parentId: String!, $description: String!) { createNote(input: { parentId: $parentId, description: $description }) { id __typename } }";

const PIN_NOTE: &str =
    "mutation PinNote($noteId: ID!) { pinNote(noteId: $noteId, isPinned: true) { id __typename } }";

/// Converts plain text into a single-paragraph rich-text document.
///
/// Input that already looks like JSON (starts with `[` or `{`) is returned
/// trimmed but otherwise unchanged.
#[must_use]
pub fn ensure_rich_text(input: &str, bold: bool) -> String {
    let text = input.trim();
    if text.starts_with('[') || text.starts_with('{') {
        return text.to_string();
    }
    let leaf = if bold && !text.is_empty() {
        json!({ "text": text, "bold": true })
    } else {
        json!({ "text": text })
    };
    json!([{ "type": "paragraph", "children": [leaf] }]).to_string()
}

/// Note to create together with a contact write.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub pin: bool,
    #[serde(default)]
    pub bold: bool,
}

/// Parameters of `note.create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteParams {
    /// Contact or deal the note is attached to.
    pub parent_id: String,
    #[serde(flatten)]
    pub note: NoteInput,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNoteData {
    create_note: Option<IdOnly>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: NoteId,
}

/// Creates a note and optionally pins it.
///
/// Pinning is best-effort; a failed pin never fails the call.
pub async fn create_note(
    client: &GraphqlClient,
    operation: &str,
    parent_id: &str,
    note: &NoteInput,
) -> Result<Option<NoteId>, ConnectorError> {
    let parent_id = parent_id.trim();
    if parent_id.is_empty() {
        return Err(ConnectorError::invalid(operation, "parentId is required").into());
    }

    let request = GraphqlRequest::new(CREATE_NOTE)
        .with_variables(&json!({
            "parentId": parent_id,
            "description": ensure_rich_text(&note.text, note.bold),
        }))
        .with_operation_name("CreateNote");
    let data: CreateNoteData = client
        .call_as(&request)
        .await
        .map_err(api_error(operation))?;
    let note_id = data.create_note.map(|n| n.id);

    if note.pin
        && let Some(id) = &note_id
    {
        let request = GraphqlRequest::new(PIN_NOTE)
            .with_variables(&json!({ "noteId": id }))
            .with_operation_name("PinNote");
        best_effort("pin_note", client.call(&request)).await;
    }
    Ok(note_id)
}

/// Runs `note.create`.
pub(crate) async fn run_create(
    client: &GraphqlClient,
    params: CreateNoteParams,
) -> Result<Value, ConnectorError> {
    let note_id = create_note(client, "note.create", &params.parent_id, &params.note).await?;
    Ok(json!({ "noteId": note_id, "pinned": params.note.pin && note_id.is_some() }))
}
