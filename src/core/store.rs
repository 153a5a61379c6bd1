use crate::core::record::Record;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Asset root does not exist: {path}")]
    MissingRoot { path: String },

    #[error("Asset root is not a directory: {path}")]
    NotADirectory { path: String },

    #[error("{field} {value:?} cannot be used as a path component")]
    UnsafeName { field: &'static str, value: String },
}

/// On-disk image layout: `<root>/<database>/images/<id>.jpg`.
///
/// Acquisition writes to these paths and every later stage reads from them, so
/// this is the only place the scheme is spelled out.
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), StoreError> {
        if !self.root.exists() {
            return Err(StoreError::MissingRoot {
                path: self.root.to_string_lossy().to_string(),
            });
        }
        if !self.root.is_dir() {
            return Err(StoreError::NotADirectory {
                path: self.root.to_string_lossy().to_string(),
            });
        }
        Ok(())
    }

    /// Fails when `database` or `id` would resolve outside its own directory.
    pub fn image_path(&self, database: &str, id: &str) -> Result<PathBuf, StoreError> {
        check_component("database", database)?;
        check_component("id", id)?;
        Ok(self
            .root
            .join(database)
            .join("images")
            .join(format!("{}.jpg", id)))
    }

    pub fn path_for(&self, record: &Record) -> Result<PathBuf, StoreError> {
        self.image_path(&record.database, record.id.as_str())
    }

    pub fn exists(&self, record: &Record) -> bool {
        self.path_for(record).is_ok_and(|path| path.exists())
    }
}

fn check_component(field: &'static str, value: &str) -> Result<(), StoreError> {
    let mut components = Path::new(value).components();
    let single = match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_str() == Some(value),
        _ => false,
    };
    if single && !value.contains('\\') {
        Ok(())
    } else {
        Err(StoreError::UnsafeName {
            field,
            value: value.to_string(),
        })
    }
}
