//! Turning public and system identifiers into input streams

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Content of a resolved external entity
pub enum EntitySource {
    /// Raw bytes; encoding is detected like for a document
    Bytes(Box<dyn Read>),
    /// Already decoded characters
    Text(String),
}

pub struct ResolvedEntity {
    pub source: EntitySource,
    /// Base URI for identifiers found inside the entity
    pub base_uri: Option<String>,
}

/// Resolves external identifiers of entities and the external subset
pub trait EntityResolver {
    /// `Ok(None)` means the identifier is not known to this resolver.
    fn resolve(
        &self,
        public_id: Option<&str>,
        system_id: &str,
        base_uri: Option<&str>,
    ) -> io::Result<Option<ResolvedEntity>>;
}

/// Resolves system identifiers as file paths, relative to the base URI
#[derive(Clone, Debug, Default)]
pub struct FileResolver {
    root: Option<PathBuf>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative identifiers without base URI are resolved against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn locate(&self, system_id: &str, base_uri: Option<&str>) -> Option<PathBuf> {
        let system_id = system_id.strip_prefix("file://").unwrap_or(system_id);
        if system_id.contains("://") {
            return None;
        }
        let path = Path::new(system_id);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        let base_dir = base_uri
            .map(|base| base.strip_prefix("file://").unwrap_or(base))
            .and_then(|base| Path::new(base).parent().map(Path::to_path_buf))
            .or_else(|| self.root.clone());
        Some(match base_dir {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        })
    }
}

impl EntityResolver for FileResolver {
    fn resolve(
        &self,
        _public_id: Option<&str>,
        system_id: &str,
        base_uri: Option<&str>,
    ) -> io::Result<Option<ResolvedEntity>> {
        let path = match self.locate(system_id, base_uri) {
            Some(path) => path,
            None => return Ok(None),
        };
        let file = File::open(&path)?;
        Ok(Some(ResolvedEntity {
            source: EntitySource::Bytes(Box::new(io::BufReader::new(file))),
            base_uri: Some(path.to_string_lossy().into_owned()),
        }))
    }
}

/// Serves entities from memory, keyed by system or public identifier
#[derive(Clone, Debug, Default)]
pub struct MemoryResolver {
    by_system: HashMap<String, Vec<u8>>,
    by_public: HashMap<String, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, system_id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.by_system.insert(system_id.into(), content.into());
        self
    }

    pub fn with_public_entity(
        mut self,
        public_id: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.by_public.insert(public_id.into(), content.into());
        self
    }
}

impl EntityResolver for MemoryResolver {
    fn resolve(
        &self,
        public_id: Option<&str>,
        system_id: &str,
        _base_uri: Option<&str>,
    ) -> io::Result<Option<ResolvedEntity>> {
        let content = public_id
            .and_then(|id| self.by_public.get(id))
            .or_else(|| self.by_system.get(system_id));
        Ok(content.map(|bytes| ResolvedEntity {
            source: EntitySource::Bytes(Box::new(io::Cursor::new(bytes.clone()))),
            base_uri: Some(system_id.to_string()),
        }))
    }
}
