//! The design record and its sibling substates.
//!
//! [`AppState`] is the immutable snapshot every component observes. It is
//! never mutated in place: reducers return a [`Patch`](crate::Patch) and the
//! [`Store`](crate::Store) produces the next snapshot.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Policy;
use crate::error::DesignError;

/// Insertion-ordered string-keyed map (serde_json is built with `preserve_order`).
pub type ValueMap = serde_json::Map<String, Value>;

/// Where the current design came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignOrigin {
    Http,
    Local,
}

/// The last writer of `parameterValues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParametersOrigin {
    UiManualUpdate,
    UiInstantUpdate,
    Store,
    Worker,
    TitleBar,
}

impl fmt::Display for ParametersOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ParametersOrigin::UiManualUpdate => "uiManualUpdate",
            ParametersOrigin::UiInstantUpdate => "uiInstantUpdate",
            ParametersOrigin::Store => "store",
            ParametersOrigin::Worker => "worker",
            ParametersOrigin::TitleBar => "titleBar",
        };
        f.write_str(tag)
    }
}

/// One node of the project tree: a file with content or a folder with children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    pub full_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn file(full_path: impl Into<String>, source: impl Into<String>) -> Self {
        let full_path = full_path.into();
        Self {
            name: base_name(&full_path).to_string(),
            full_path,
            source: Some(source.into()),
            children: None,
        }
    }

    pub fn folder(full_path: impl Into<String>, children: Vec<FileNode>) -> Self {
        let full_path = full_path.into();
        Self {
            name: base_name(&full_path).to_string(),
            full_path,
            source: None,
            children: Some(children),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.children.is_some()
    }
}

/// Last path segment, ignoring a trailing separator.
pub(crate) fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parameter control kind. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamKind {
    Int,
    Float,
    Number,
    Slider,
    Checkbox,
    Choice,
    Text,
    Color,
    Date,
    Email,
    Url,
    Password,
    Group,
    Other(String),
}

impl From<String> for ParamKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "int" => ParamKind::Int,
            "float" => ParamKind::Float,
            "number" => ParamKind::Number,
            "slider" => ParamKind::Slider,
            "checkbox" => ParamKind::Checkbox,
            "choice" => ParamKind::Choice,
            "text" => ParamKind::Text,
            "color" => ParamKind::Color,
            "date" => ParamKind::Date,
            "email" => ParamKind::Email,
            "url" => ParamKind::Url,
            "password" => ParamKind::Password,
            "group" => ParamKind::Group,
            _ => ParamKind::Other(raw),
        }
    }
}

impl From<ParamKind> for String {
    fn from(kind: ParamKind) -> Self {
        match kind {
            ParamKind::Int => "int".into(),
            ParamKind::Float => "float".into(),
            ParamKind::Number => "number".into(),
            ParamKind::Slider => "slider".into(),
            ParamKind::Checkbox => "checkbox".into(),
            ParamKind::Choice => "choice".into(),
            ParamKind::Text => "text".into(),
            ParamKind::Color => "color".into(),
            ParamKind::Date => "date".into(),
            ParamKind::Email => "email".into(),
            ParamKind::Url => "url".into(),
            ParamKind::Password => "password".into(),
            ParamKind::Group => "group".into(),
            ParamKind::Other(raw) => raw,
        }
    }
}

/// A parameter definition as reported by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captions: Option<Vec<String>>,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            caption: None,
            initial: None,
            min: None,
            max: None,
            step: None,
            values: None,
            captions: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_choices(mut self, values: Vec<Value>, captions: Option<Vec<String>>) -> Self {
        self.values = Some(values);
        self.captions = captions;
        self
    }
}

/// Geometry kind of a solid. The wire tags are the worker's class names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolidKind {
    #[serde(rename = "CSG")]
    Solid3D,
    #[serde(rename = "CAG")]
    Shape2D,
}

/// A computed geometric artifact, kept in its compact encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    #[serde(rename = "class")]
    pub kind: SolidKind,
    #[serde(flatten)]
    pub compact: ValueMap,
}

impl Solid {
    /// Rebuild a solid from the worker's compact representation.
    pub fn from_compact(raw: Value) -> Result<Self, DesignError> {
        let Value::Object(mut fields) = raw else {
            return Err(DesignError::WorkerComputation {
                message: "solid is not an object".to_string(),
            });
        };
        let kind = match fields.remove("class") {
            Some(Value::String(class)) if class == "CSG" => SolidKind::Solid3D,
            Some(Value::String(class)) if class == "CAG" => SolidKind::Shape2D,
            Some(other) => {
                return Err(DesignError::WorkerComputation {
                    message: format!("unknown solid class {other}"),
                })
            }
            None => {
                return Err(DesignError::WorkerComputation {
                    message: "solid has no class".to_string(),
                })
            }
        };
        Ok(Self {
            kind,
            compact: fields,
        })
    }
}

/// Timing of the most recent recompute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeTimings {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `end_time - start_time`, in milliseconds.
    pub total_time: i64,
}

impl Default for RecomputeTimings {
    fn default() -> Self {
        Self {
            start_time: DateTime::<Utc>::UNIX_EPOCH,
            end_time: DateTime::<Utc>::UNIX_EPOCH,
            total_time: 0,
        }
    }
}

/// The canonical in-memory record of a design and its derived artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignState {
    // identity
    pub name: String,
    pub path: String,
    pub main_path: String,
    pub origin: Option<DesignOrigin>,
    pub files_and_folders: Vec<FileNode>,

    // parameters
    pub parameter_definitions: Vec<ParamDef>,
    pub parameter_values: ValueMap,
    pub parameter_defaults: ValueMap,
    pub parameters_origin: Option<ParametersOrigin>,

    // policy
    pub instant_update: bool,
    pub auto_reload: bool,
    /// Overwrite existing code with converted input instead of importing it.
    pub convert_supported_types: bool,
    pub solids_time_out: u64,

    // geometry and its cache
    pub solids: Vec<Solid>,
    pub vtree_mode: bool,
    pub lookup: ValueMap,
    pub lookup_counts: ValueMap,

    pub debug: RecomputeTimings,
}

impl DesignState {
    pub fn with_policy(policy: Policy) -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            main_path: String::new(),
            origin: None,
            files_and_folders: Vec::new(),
            parameter_definitions: Vec::new(),
            parameter_values: ValueMap::new(),
            parameter_defaults: ValueMap::new(),
            parameters_origin: None,
            instant_update: policy.instant_update,
            auto_reload: policy.auto_reload,
            convert_supported_types: false,
            solids_time_out: policy.solids_time_out,
            solids: Vec::new(),
            vtree_mode: false,
            lookup: ValueMap::new(),
            lookup_counts: ValueMap::new(),
            debug: RecomputeTimings::default(),
        }
    }
}

impl Default for DesignState {
    fn default() -> Self {
        Self::with_policy(Policy::default())
    }
}

/// Busy flag and the last surfaced error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub busy: bool,
    pub error: Option<DesignError>,
}

impl Status {
    pub fn busy() -> Self {
        Self {
            busy: true,
            error: None,
        }
    }
}

/// Export information derived from the latest solids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IoState {
    pub export_format: Option<String>,
    pub export_file_path: Option<String>,
    pub available_export_formats: Vec<String>,
}

/// Camera behaviours the viewer applies on the next geometry update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    pub reset_view_on: Vec<String>,
    pub zoom_to_fit_on: Vec<String>,
}

/// One immutable snapshot of the whole session.
///
/// `design` is shared behind an `Arc` so a reducer that leaves it untouched
/// hands back the very same allocation (observable with `Arc::ptr_eq`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppState {
    pub design: Arc<DesignState>,
    /// `None` until the first transition that touches it.
    pub status: Option<Status>,
    pub io: Option<IoState>,
    pub viewer: ViewerState,
    pub app_title: String,
}

impl AppState {
    pub fn is_busy(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.busy)
    }

    pub fn error(&self) -> Option<&DesignError> {
        self.status.as_ref().and_then(|status| status.error.as_ref())
    }
}
