// ABOUTME: Merges a tool server entry into a project's JSON configuration file.
// ABOUTME: Sibling entries are preserved; an unchanged entry is not rewritten.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key holding the server map inside the configuration document.
pub const SERVERS_KEY: &str = "mcp";

const SCHEMA_KEY: &str = "$schema";
const SCHEMA_URL: &str = "https://opencode.ai/config.json";

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Existing content is not something we can merge into; it is left untouched.
    #[error("{} is not a valid configuration document: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

/// A server declaration as written to the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub enabled: bool,
}

impl ServerEntry {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            kind: "remote".to_string(),
            url: url.into(),
            enabled: true,
        }
    }
}

/// What `install_entry` did, kept so the entry can be reverted later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEntry {
    pub path: PathBuf,
    pub name: String,
    /// The file did not exist before.
    pub created_file: bool,
    /// The server map did not exist before.
    pub created_section: bool,
    /// False when the file already held this exact entry.
    pub changed: bool,
}

/// Add or update `name` in the server map of the file at `path`.
pub fn install_entry(
    path: &Path,
    name: &str,
    entry: &ServerEntry,
) -> Result<InstalledEntry, ConfigFileError> {
    let existing = read_document(path)?;
    let created_file = existing.is_none();
    let mut doc = existing.unwrap_or_else(|| {
        let mut doc = Map::new();
        doc.insert(SCHEMA_KEY.to_string(), Value::String(SCHEMA_URL.to_string()));
        doc
    });

    let created_section = !doc.contains_key(SERVERS_KEY);
    let servers = doc
        .entry(SERVERS_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ConfigFileError::Invalid {
            path: path.to_path_buf(),
            reason: format!("\"{}\" is not an object", SERVERS_KEY),
        })?;

    let value = serde_json::to_value(entry).map_err(|e| ConfigFileError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let changed = servers.get(name) != Some(&value);
    if changed {
        servers.insert(name.to_string(), value);
        write_document(path, &doc)?;
    }

    Ok(InstalledEntry {
        path: path.to_path_buf(),
        name: name.to_string(),
        created_file,
        created_section,
        changed,
    })
}

/// Remove the entry added by `install_entry`, leaving everything else in place.
///
/// A file we created that ends up holding nothing but the schema marker is deleted.
pub fn remove_entry(installed: &InstalledEntry) -> Result<(), ConfigFileError> {
    let path = installed.path.as_path();
    let Some(mut doc) = read_document(path)? else {
        return Ok(());
    };

    let Some(servers) = doc.get_mut(SERVERS_KEY).and_then(Value::as_object_mut) else {
        return Ok(());
    };
    if servers.remove(&installed.name).is_none() {
        return Ok(());
    }
    if servers.is_empty() && installed.created_section {
        doc.remove(SERVERS_KEY);
    }

    let only_schema_left = doc.keys().all(|k| k == SCHEMA_KEY);
    if installed.created_file && only_schema_left {
        return std::fs::remove_file(path).map_err(|source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        });
    }

    write_document(path, &doc)
}

/// Read the entry currently declared under `name`, if any.
pub fn read_entry(path: &Path, name: &str) -> Result<Option<ServerEntry>, ConfigFileError> {
    let Some(doc) = read_document(path)? else {
        return Ok(None);
    };
    let Some(value) = doc.get(SERVERS_KEY).and_then(|s| s.get(name)) else {
        return Ok(None);
    };
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|e| ConfigFileError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn read_document(path: &Path) -> Result<Option<Map<String, Value>>, ConfigFileError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigFileError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if contents.trim().is_empty() {
        return Ok(Some(Map::new()));
    }

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(doc)) => Ok(Some(doc)),
        Ok(_) => Err(ConfigFileError::Invalid {
            path: path.to_path_buf(),
            reason: "top level is not an object".to_string(),
        }),
        Err(e) => Err(ConfigFileError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Write through a temp file in the same directory, then rename over the target.
fn write_document(path: &Path, doc: &Map<String, Value>) -> Result<(), ConfigFileError> {
    let write_err = |source: std::io::Error| ConfigFileError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut contents = serde_json::to_string_pretty(doc).map_err(|e| ConfigFileError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    contents.push('\n');

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
