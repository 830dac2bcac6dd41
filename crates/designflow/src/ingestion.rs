//! Routing of design sources into content events, and the file-store
//! requests that follow the design around (watching, geometry cache).

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};
use url::Url;

use crate::equality::canonical;
use crate::machine::{Decision, Decisions, Machine};
use crate::protocol::{
    AddData, Command, FileOptions, FileStoreRequest, GeometryCache, RemoteRequest, WatchOptions,
    CACHED_GEOMETRY, DROPPED_DATA, DROPPED_ROOT, LOAD_REMOTE, REMOTE_FILE, WATCH_FILES,
    WATCH_SCRIPT,
};
use crate::reducers::{request_write_cached_geometry, DesignContent};
use crate::state::{AppState, DesignState, FileNode, Solid, ValueMap};

/// Query parameters that address the design rather than parameterize it.
const ADDRESS_PARAMS: [&str; 2] = ["uri", "proxyUrl"];

#[derive(Debug)]
pub struct IngestionRouter {
    cached_geometry_path: String,
    last_watch: Option<(String, bool)>,
    last_design: Option<Arc<DesignState>>,
    last_solids: Option<String>,
}

impl IngestionRouter {
    pub fn new(cached_geometry_path: impl Into<String>) -> Self {
        Self {
            cached_geometry_path: cached_geometry_path.into(),
            last_watch: None,
            last_design: None,
            last_solids: canonical(&Vec::<Solid>::new()),
        }
    }

    /// An example was picked from the gallery.
    pub fn example_selected(&self, path: String) -> Command {
        remote_read(vec![path])
    }

    /// The title bar changed. Returns a remote load when the URL addresses a
    /// design, through `?uri=` or a `#http(s)://` / `#examples/` fragment.
    pub fn title_bar(&self, address: &str) -> Option<Command> {
        document_uri(address).map(|uri| remote_read(vec![uri]))
    }

    /// Files were dropped onto the window.
    pub fn dropped(&self, files: Vec<FileNode>) -> Command {
        Command::Files(FileStoreRequest::Add {
            id: DROPPED_DATA.to_string(),
            path: DROPPED_ROOT.to_string(),
            data: AddData::Tree(files),
            options: FileOptions { is_raw_data: false },
        })
    }

    /// A remote source was fetched; hand it to the file store.
    pub fn remote_loaded(&self, id: &str, url: String, data: String) -> Option<Command> {
        if id != LOAD_REMOTE {
            debug!(id, "ingestion: ignoring remote reply");
            return None;
        }
        Some(Command::Files(FileStoreRequest::Add {
            id: REMOTE_FILE.to_string(),
            path: url,
            data: AddData::Raw(data),
            options: FileOptions { is_raw_data: true },
        }))
    }

    /// The file store added a tree: its first node is the design root.
    pub fn content_from_added(&self, files: Vec<FileNode>) -> Option<DesignContent> {
        let Some(root) = files.first() else {
            warn!("ingestion: file store added an empty tree");
            return None;
        };
        let path = root.full_path.clone();
        Some(DesignContent {
            files_and_folders: files,
            path,
        })
    }

    /// A watched tree changed on disk.
    pub fn content_from_watch(
        &self,
        id: &str,
        path: String,
        files: Vec<FileNode>,
    ) -> Option<DesignContent> {
        (id == WATCH_FILES).then_some(DesignContent {
            files_and_folders: files,
            path,
        })
    }

    fn watch_request(&mut self, design: &DesignState) -> Option<Decision> {
        if design.main_path.is_empty() {
            return None;
        }
        let key = (design.main_path.clone(), design.auto_reload);
        if self.last_watch.as_ref() == Some(&key) {
            return None;
        }
        self.last_watch = Some(key);
        Some(Decision::Emit(Command::Files(FileStoreRequest::Watch {
            id: WATCH_SCRIPT.to_string(),
            path: design.main_path.clone(),
            options: WatchOptions {
                enabled: design.auto_reload,
            },
        })))
    }

    fn cache_write(&mut self, design: &Arc<DesignState>) -> Option<Decision> {
        if design.main_path.is_empty() {
            return None;
        }
        if self
            .last_design
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, design))
        {
            return None;
        }
        self.last_design = Some(Arc::clone(design));

        let solids = canonical(&design.solids);
        if solids.is_none() || solids == self.last_solids {
            return None;
        }
        self.last_solids = solids;

        let cache = GeometryCache {
            solids: design.solids.clone(),
            lookup: design.lookup.clone(),
            lookup_counts: design.lookup_counts.clone(),
        };
        match request_write_cached_geometry(&cache) {
            Ok(data) => Some(Decision::Emit(Command::Files(FileStoreRequest::Write {
                id: CACHED_GEOMETRY.to_string(),
                path: self.cached_geometry_path.clone(),
                data,
                options: FileOptions { is_raw_data: true },
            }))),
            Err(err) => {
                warn!("ingestion: could not serialize geometry cache: {err}");
                None
            }
        }
    }
}

impl Machine for IngestionRouter {
    fn observe(&mut self, state: &Arc<AppState>) -> Decisions {
        let mut decisions = SmallVec::new();
        decisions.extend(self.watch_request(&state.design));
        decisions.extend(self.cache_write(&state.design));
        decisions
    }
}

fn remote_read(urls: Vec<String>) -> Command {
    Command::Remote(RemoteRequest::Read {
        id: LOAD_REMOTE.to_string(),
        urls,
    })
}

/// The design address carried by a title-bar URL, if any.
pub fn document_uri(address: &str) -> Option<String> {
    let url = Url::parse(address).ok()?;
    if let Some((_, uri)) = url.query_pairs().find(|(key, _)| key == "uri") {
        return Some(uri.into_owned());
    }
    let fragment = url.fragment()?;
    let addressed = fragment.starts_with("http://")
        || fragment.starts_with("https://")
        || fragment.starts_with("examples/");
    (addressed && !fragment.chars().any(char::is_whitespace)).then(|| fragment.to_string())
}

/// Query parameters of a title-bar URL that parameterize the design.
pub fn title_bar_parameters(address: &str) -> Option<ValueMap> {
    let url = Url::parse(address).ok()?;
    let mut values = ValueMap::new();
    for (key, value) in url.query_pairs() {
        if ADDRESS_PARAMS.contains(&&*key) {
            continue;
        }
        values.insert(key.into_owned(), serde_json::Value::String(value.into_owned()));
    }
    (!values.is_empty()).then_some(values)
}
