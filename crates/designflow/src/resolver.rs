//! Entry-point and name resolution over a virtual file tree.

use serde::Deserialize;

use crate::state::{base_name, FileNode};

/// Resolves which file of a project is its entry point, and what the
/// project is called. Pure: it only looks at the tree it is given.
pub trait ProjectResolver: Send + Sync {
    fn entry_point(&self, files: &[FileNode], root_path: &str) -> String;

    fn design_name(&self, files: &[FileNode], root_path: &str) -> String;
}

const SCRIPT_EXTENSIONS: [&str; 2] = ["jscad", "js"];

#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    name: Option<String>,
    main: Option<String>,
}

/// Resolution rules for script-based designs.
///
/// A root path naming a file is its own entry point. A folder is resolved
/// through `package.json` (`main`), then `index.js`, `index.jscad`,
/// `<folder>.jscad`, `<folder>.js`, then the first script file it contains.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProjectResolver;

impl DefaultProjectResolver {
    fn manifest(folder: &FileNode) -> Option<PackageManifest> {
        let source = folder
            .children
            .as_deref()?
            .iter()
            .find(|child| child.name == "package.json")?
            .source
            .as_deref()?;
        match serde_json::from_str(source) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                tracing::warn!(path = %folder.full_path, "ignoring unreadable package.json: {err}");
                None
            }
        }
    }
}

impl ProjectResolver for DefaultProjectResolver {
    fn entry_point(&self, files: &[FileNode], root_path: &str) -> String {
        let Some(root) = find_node(files, root_path) else {
            return root_path.to_string();
        };
        let Some(children) = root.children.as_deref() else {
            return root.full_path.clone();
        };

        if let Some(main) = Self::manifest(root).and_then(|manifest| manifest.main) {
            return join(&root.full_path, &main);
        }

        let folder_name = base_name(&root.full_path);
        let candidates = [
            "index.js".to_string(),
            "index.jscad".to_string(),
            format!("{folder_name}.jscad"),
            format!("{folder_name}.js"),
        ];
        for candidate in &candidates {
            if let Some(found) = children.iter().find(|child| &child.name == candidate) {
                return found.full_path.clone();
            }
        }

        children
            .iter()
            .find(|child| !child.is_folder() && is_script(&child.name))
            .map(|child| child.full_path.clone())
            .unwrap_or_default()
    }

    fn design_name(&self, files: &[FileNode], root_path: &str) -> String {
        if let Some(name) = find_node(files, root_path)
            .filter(|node| node.is_folder())
            .and_then(Self::manifest)
            .and_then(|manifest| manifest.name)
        {
            return name;
        }
        strip_extension(base_name(root_path)).to_string()
    }
}

/// Depth-first lookup of a node by its full path.
pub fn find_node<'a>(files: &'a [FileNode], full_path: &str) -> Option<&'a FileNode> {
    let wanted = full_path.trim_end_matches('/');
    for node in files {
        if node.full_path.trim_end_matches('/') == wanted {
            return Some(node);
        }
        if let Some(found) = node
            .children
            .as_deref()
            .and_then(|children| find_node(children, full_path))
        {
            return Some(found);
        }
    }
    None
}

/// Directory part of a path; `"."` when there is none.
pub fn dir_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    }
}

fn join(folder: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches("./");
    format!("{}/{}", folder.trim_end_matches('/'), relative)
}

fn is_script(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| SCRIPT_EXTENSIONS.contains(&ext))
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
