//! Persistence layer for saving/loading document trees.
//!
//! Supports both JSON (human-readable) and bincode (efficient binary) formats,
//! plus a [`TreeStore`] directory holding one tree per document id.

use crate::error::{PageIndexError, Result};
use crate::tree::DocumentTree;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default filename for the tree index.
pub const DEFAULT_INDEX_FILENAME: &str = "tree_index.json";

/// Save format for tree indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bin") | Some("bincode") => SaveFormat::Bincode,
            _ => SaveFormat::Json,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Json => "json",
            SaveFormat::Bincode => "bin",
        }
    }
}

/// Save a DocumentTree to a file.
pub fn save_tree(tree: &DocumentTree, path: &Path) -> Result<()> {
    save_tree_with_format(tree, path, SaveFormat::from_path(path))
}

/// Save a DocumentTree with specific format.
pub fn save_tree_with_format(tree: &DocumentTree, path: &Path, format: SaveFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| PageIndexError::io(parent, e))?;
        }
    }

    let data = match format {
        SaveFormat::Json => serde_json::to_string_pretty(tree)
            .map_err(|e| PageIndexError::Serialization(e.to_string()))?
            .into_bytes(),
        SaveFormat::Bincode => bincode::encode_to_vec(tree, bincode::config::standard())
            .map_err(|e| PageIndexError::Serialization(e.to_string()))?,
    };

    // Readers never see a partially written file.
    let staging = path.with_extension("partial");
    fs::write(&staging, &data).map_err(|e| PageIndexError::io(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| PageIndexError::io(path, e))?;

    debug!(path = %path.display(), bytes = data.len(), "saved tree");
    Ok(())
}

/// Load a DocumentTree from a file.
pub fn load_tree(path: &Path) -> Result<DocumentTree> {
    if !path.exists() {
        return Err(PageIndexError::IndexNotFound(path.to_path_buf()));
    }
    load_tree_with_format(path, SaveFormat::from_path(path))
}

/// Load a DocumentTree with specific format.
pub fn load_tree_with_format(path: &Path, format: SaveFormat) -> Result<DocumentTree> {
    let data = fs::read(path).map_err(|e| PageIndexError::io(path, e))?;

    let tree = match format {
        SaveFormat::Json => serde_json::from_slice(&data)
            .map_err(|e| PageIndexError::Serialization(e.to_string()))?,
        SaveFormat::Bincode => {
            let (tree, _): (DocumentTree, usize) =
                bincode::decode_from_slice(&data, bincode::config::standard())
                    .map_err(|e| PageIndexError::Serialization(e.to_string()))?;
            tree
        }
    };

    Ok(tree)
}

/// Check if an index file exists at the given path.
pub fn tree_exists(path: &Path) -> bool {
    path.is_file()
}

/// Get the size of an index file in bytes.
pub fn tree_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|e| PageIndexError::io(path, e))?;
    Ok(metadata.len())
}

/// A directory of trees, one file per document id.
///
/// Saving under an existing id replaces the previous tree wholesale.
#[derive(Debug, Clone)]
pub struct TreeStore {
    root: PathBuf,
    format: SaveFormat,
}

impl TreeStore {
    /// Open (creating if needed) a JSON store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_format(root, SaveFormat::Json)
    }

    pub fn open_with_format(root: impl Into<PathBuf>, format: SaveFormat) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PageIndexError::io(&root, e))?;
        Ok(Self { root, format })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `id`.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !valid {
            return Err(PageIndexError::InvalidConfig(format!(
                "document id '{}' may only contain letters, digits, '-', '_' and '.'",
                id
            )));
        }
        Ok(self.root.join(format!("{}.{}", id, self.format.extension())))
    }

    pub fn save(&self, id: &str, tree: &DocumentTree) -> Result<PathBuf> {
        let path = self.path_for(id)?;
        save_tree_with_format(tree, &path, self.format)?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<DocumentTree> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(PageIndexError::IndexNotFound(path));
        }
        load_tree_with_format(&path, self.format)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.path_for(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Remove the tree for `id`. Returns whether one existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PageIndexError::io(path, e)),
        }
    }

    /// Stored document ids, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| PageIndexError::io(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PageIndexError::io(&self.root, e))?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.format.extension()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
