//! Loading declared records from YAML manifests on disk.

use std::path::Path;

use itertools::Itertools;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::template::Template;

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Parse every template document in a single YAML file.
///
/// A file may hold several documents separated by `---`. Empty documents
/// are skipped.
///
/// # Errors
///
/// Returns `FileReadFailed` if the file cannot be read, or the parse and
/// validation errors of [`Template::from_yaml`].
pub fn load_file(path: &Path) -> Result<Vec<Template>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    serde_yaml::Deserializer::from_str(&content)
        .map(|document| -> Result<Option<Template>> {
            // Empty documents (blank files, comments, a trailing `---`) are null.
            let template = Option::<Template>::deserialize(document).map_err(|e| {
                Error::yaml_parse_failed(format!("{}: {e}", path.display()))
            })?;
            template.as_ref().map(Template::validate).transpose()?;
            Ok(template)
        })
        .flatten_ok()
        .collect()
}

/// Load all `*.yaml`/`*.yml` manifests in a directory, in file name order.
///
/// # Errors
///
/// Returns `DirectoryNotFound` if `dir` is not a directory, or the first
/// error met while reading a manifest.
pub fn load_dir(dir: &Path) -> Result<Vec<Template>> {
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .filter(|path| is_manifest(path))
        .sorted()
        .collect_vec();

    let mut templates = Vec::new();
    for path in paths {
        let loaded = load_file(&path)?;
        debug!(path = %path.display(), count = loaded.len(), "Loaded manifest");
        templates.extend(loaded);
    }
    Ok(templates)
}
