//! Typed messages exchanged with the engine.
//!
//! [`Event`]s are facts arriving from collaborators (the UI, the file store,
//! the worker, ...). [`Command`]s are requests the engine sends back out, one
//! variant per collaborator. Loosely-shaped wire payloads are decoded here,
//! at the boundary, before anything reaches a reducer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::scheduler::RequestId;
use crate::state::{DesignOrigin, FileNode, ParamDef, Solid, ValueMap};

/// Remote load request/reply id.
pub const LOAD_REMOTE: &str = "loadRemote";
/// File-store add id for content fetched remotely.
pub const REMOTE_FILE: &str = "remoteFile";
/// File-store add id for drag and drop.
pub const DROPPED_DATA: &str = "droppedData";
/// Watch request id for the entry point.
pub const WATCH_SCRIPT: &str = "watchScript";
/// Watch reply id carrying a refreshed tree.
pub const WATCH_FILES: &str = "watchFiles";
/// File-store write id for the geometry cache.
pub const CACHED_GEOMETRY: &str = "cachedGeometry";
/// File-store read id for the geometry cache.
pub const LOAD_CACHED_GEOMETRY: &str = "loadCachedGeometry";
/// Virtual root for dropped files.
pub const DROPPED_ROOT: &str = "realFs:";

// ============================================================================
// Worker
// ============================================================================

/// Everything the worker needs to regenerate geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub main_path: String,
    pub parameter_values: ValueMap,
    pub files_and_folders: Vec<FileNode>,
    pub vtree_mode: bool,
    pub lookup: ValueMap,
    pub lookup_counts: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum WorkerRequest {
    Generate(GenerateRequest),
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerResponse {
    #[serde(rename_all = "camelCase")]
    Solids {
        #[serde(default)]
        solids: Vec<Value>,
        #[serde(default)]
        lookup: Option<ValueMap>,
        #[serde(default)]
        lookup_counts: Option<ValueMap>,
    },
    #[serde(rename_all = "camelCase")]
    Params {
        #[serde(default)]
        parameter_defaults: Option<ValueMap>,
        #[serde(default)]
        parameter_definitions: Option<Vec<ParamDef>>,
    },
    Error { error: String },
}

impl WorkerResponse {
    /// Decode a raw worker message. Any payload with an `error` field is an
    /// error, whatever its `type`.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        if let Some(error) = raw.get("error") {
            let error = match error {
                Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            return Ok(WorkerResponse::Error { error });
        }
        serde_json::from_value(raw)
    }
}

/// A decoded, validated solids result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryResult {
    pub solids: Option<Vec<Solid>>,
    pub lookup: Option<ValueMap>,
    pub lookup_counts: Option<ValueMap>,
}

// ============================================================================
// Settings store
// ============================================================================

/// The persisted subset of a design. Every field is optional on read so a
/// partial or stale payload can be recognised and ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDesign {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_path: Option<String>,
    /// An origin this build does not know reads as absent.
    #[serde(
        default,
        deserialize_with = "lenient_origin",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin: Option<DesignOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_values: Option<ValueMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtree_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reload: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instant_update: Option<bool>,
    /// Stored as a number; the UI field may have written a float.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solids_time_out: Option<f64>,
}

fn lenient_origin<'de, D>(deserializer: D) -> Result<Option<DesignOrigin>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| match serde_json::from_value(raw.clone()) {
        Ok(origin) => Some(origin),
        Err(_) => {
            warn!(origin = %raw, "settings: unknown design origin, ignoring it");
            None
        }
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SettingsRequest {
    Read { key: String },
    Write { key: String, data: PersistedDesign },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SettingsReply {
    Read {
        key: String,
        #[serde(default)]
        data: Option<Value>,
    },
    #[serde(rename = "write")]
    Written { key: String },
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddData {
    Tree(Vec<FileNode>),
    Raw(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOptions {
    pub is_raw_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FileStoreRequest {
    Add {
        id: String,
        path: String,
        data: AddData,
        options: FileOptions,
    },
    Watch {
        id: String,
        path: String,
        options: WatchOptions,
    },
    Write {
        id: String,
        path: String,
        data: String,
        options: FileOptions,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileStoreEvent {
    #[serde(rename = "add")]
    Added { data: Vec<FileNode> },
    #[serde(rename = "watch", rename_all = "camelCase")]
    Watched {
        id: String,
        path: String,
        files_and_folders: Vec<FileNode>,
    },
    #[serde(rename = "read")]
    CachedGeometry {
        id: String,
        #[serde(default)]
        data: Option<String>,
    },
}

/// Serialized geometry cache written under the cached-geometry path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryCache {
    #[serde(default)]
    pub solids: Vec<Solid>,
    #[serde(default)]
    pub lookup: ValueMap,
    #[serde(default)]
    pub lookup_counts: ValueMap,
}

// ============================================================================
// Remote loader
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RemoteRequest {
    Read { id: String, urls: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteReply {
    Failed {
        id: String,
        url: String,
        error: String,
    },
    Loaded {
        id: String,
        url: String,
        data: String,
    },
}

// ============================================================================
// Engine-level events and commands
// ============================================================================

/// Controls of the design panel.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ExampleSelected { path: String },
    /// "Update" button: read every control and apply.
    ParametersSubmitted { values: ValueMap },
    /// A control changed while typing; reading the controls may fail.
    ParametersEdited { values: Result<ValueMap, String> },
    ToggleAutoReload(bool),
    ToggleInstantUpdate(bool),
    ToggleVtreeMode(bool),
    SetSolidsTimeout(u64),
}

impl UiEvent {
    /// Parse the timeout text field. Returns `None` for anything that is not
    /// a non-negative finite number.
    pub fn solids_timeout_from_text(text: &str) -> Option<UiEvent> {
        let millis = text.trim().parse::<f64>().ok()?;
        if !millis.is_finite() || millis < 0.0 {
            return None;
        }
        Some(UiEvent::SetSolidsTimeout(millis.round() as u64))
    }
}

/// Facts delivered to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ui(UiEvent),
    TitleBar { url: String },
    FilesDropped { files: Vec<FileNode> },
    Files(FileStoreEvent),
    Remote(RemoteReply),
    Worker(WorkerResponse),
    Settings(SettingsReply),
    RecomputeTimerElapsed { request_id: RequestId },
}

/// Requests the engine issues, one variant per collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Worker(WorkerRequest),
    Settings(SettingsRequest),
    Files(FileStoreRequest),
    Remote(RemoteRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generate_request_carries_its_command_tag() {
        let request = WorkerRequest::Generate(GenerateRequest {
            main_path: "/a.js".to_string(),
            parameter_values: ValueMap::new(),
            files_and_folders: Vec::new(),
            vtree_mode: false,
            lookup: ValueMap::new(),
            lookup_counts: ValueMap::new(),
        });
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["cmd"], json!("generate"));
        assert_eq!(wire["mainPath"], json!("/a.js"));
        assert_eq!(
            serde_json::to_value(&WorkerRequest::Cancel).unwrap(),
            json!({"cmd": "cancel"})
        );
    }

    #[test]
    fn worker_responses_decode_by_type() {
        let solids = WorkerResponse::from_value(json!({
            "type": "solids",
            "solids": [{"class": "CSG"}],
            "lookupCounts": {"k": 1}
        }))
        .unwrap();
        let WorkerResponse::Solids {
            solids,
            lookup,
            lookup_counts,
        } = solids
        else {
            panic!("expected solids");
        };
        assert_eq!(solids.len(), 1);
        assert!(lookup.is_none());
        assert_eq!(lookup_counts.unwrap()["k"], json!(1));

        let params = WorkerResponse::from_value(json!({
            "type": "params",
            "parameterDefaults": {"r": 1},
            "parameterDefinitions": [{"name": "r", "type": "float"}]
        }))
        .unwrap();
        assert!(matches!(params, WorkerResponse::Params { .. }));
    }

    #[test]
    fn any_error_field_makes_an_error_response() {
        let response =
            WorkerResponse::from_value(json!({"type": "solids", "error": "syntax error"})).unwrap();
        assert_eq!(
            response,
            WorkerResponse::Error {
                error: "syntax error".to_string()
            }
        );
    }

    #[test]
    fn settings_requests_match_the_store_protocol() {
        let read = SettingsRequest::Read {
            key: "design".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&read).unwrap(),
            json!({"type": "read", "key": "design"})
        );
        let reply: SettingsReply =
            serde_json::from_value(json!({"type": "read", "key": "design"})).unwrap();
        assert_eq!(
            reply,
            SettingsReply::Read {
                key: "design".to_string(),
                data: None
            }
        );
    }

    #[test]
    fn remote_replies_distinguish_failures() {
        let failed: RemoteReply = serde_json::from_value(json!({
            "id": "loadRemote", "url": "http://x/a.js", "error": "404"
        }))
        .unwrap();
        assert!(matches!(failed, RemoteReply::Failed { .. }));

        let loaded: RemoteReply = serde_json::from_value(json!({
            "id": "loadRemote", "url": "http://x/a.js", "data": "main()"
        }))
        .unwrap();
        assert!(matches!(loaded, RemoteReply::Loaded { .. }));
    }

    #[test]
    fn file_store_events_decode_from_wire_shapes() {
        let watched: FileStoreEvent = serde_json::from_value(json!({
            "type": "watch",
            "id": "watchFiles",
            "path": "/a.js",
            "filesAndFolders": [{"name": "a.js", "fullPath": "/a.js", "source": ""}]
        }))
        .unwrap();
        assert!(matches!(watched, FileStoreEvent::Watched { .. }));
    }

    #[test]
    fn timeout_text_parses_floats() {
        assert_eq!(
            UiEvent::solids_timeout_from_text(" 1500.4 "),
            Some(UiEvent::SetSolidsTimeout(1500))
        );
        assert_eq!(UiEvent::solids_timeout_from_text("soon"), None);
        assert_eq!(UiEvent::solids_timeout_from_text("-5"), None);
    }

    #[test]
    fn an_unknown_stored_origin_keeps_the_rest_of_the_payload() {
        let stored: PersistedDesign = serde_json::from_value(json!({
            "origin": "gist",
            "vtreeMode": true,
            "parameterValues": {"teeth": 10}
        }))
        .unwrap();
        assert_eq!(stored.origin, None);
        assert_eq!(stored.vtree_mode, Some(true));
        assert_eq!(stored.parameter_values.unwrap()["teeth"], json!(10));

        let known: PersistedDesign =
            serde_json::from_value(json!({"origin": "local", "vtreeMode": false})).unwrap();
        assert_eq!(known.origin, Some(DesignOrigin::Local));
    }
}
