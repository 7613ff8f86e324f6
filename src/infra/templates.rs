//! Startup and reload-time template loading.
//!
//! The loader owns the static file-name → page-id table; the same table
//! drives the file watcher's event mapping. Compilation failures carry the
//! offending file name so the operator knows what to fix.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use metrics::counter;
use thiserror::Error;
use tokio::fs;

use crate::domain::{
    template::{Template, TemplateError},
    types::PageId,
};

#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error("failed to read template `{file}`: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template `{file}` failed to compile: {source}")]
    Syntax {
        file: String,
        #[source]
        source: TemplateError,
    },
}

/// Every template the portal serves, compiled.
#[derive(Debug)]
pub struct LoadedTemplates {
    pub frame: Template,
    pub pages: HashMap<PageId, Template>,
    /// The key-derivation page template; absent when the file is not
    /// deployed, in which case the key page stays unavailable.
    pub key: Option<Template>,
}

pub struct TemplateLoader {
    dir: PathBuf,
    frame_file: String,
    key_file: String,
    table: HashMap<String, PageId>,
}

impl TemplateLoader {
    pub fn new(
        dir: PathBuf,
        frame_file: String,
        key_file: String,
        table: HashMap<String, PageId>,
    ) -> Self {
        Self {
            dir,
            frame_file,
            key_file,
            table,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_file(&self) -> &str {
        &self.frame_file
    }

    /// File-name → page-id mapping, shared with the watcher.
    pub fn page_table(&self) -> &HashMap<String, PageId> {
        &self.table
    }

    /// Read and compile every configured template.
    pub async fn load_all(&self) -> Result<LoadedTemplates, TemplateLoadError> {
        let frame = self.load_file(&self.frame_file).await?;

        let mut pages = HashMap::with_capacity(self.table.len());
        for (file, id) in &self.table {
            pages.insert(id.clone(), self.load_file(file).await?);
        }

        let key = match self.load_file(&self.key_file).await {
            Ok(template) => Some(template),
            Err(TemplateLoadError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                None
            }
            Err(err) => return Err(err),
        };

        Ok(LoadedTemplates { frame, pages, key })
    }

    async fn load_file(&self, file: &str) -> Result<Template, TemplateLoadError> {
        let source = fs::read_to_string(self.dir.join(file))
            .await
            .map_err(|source| TemplateLoadError::Io {
                file: file.to_string(),
                source,
            })?;

        let template = Template::compile(&source).map_err(|source| TemplateLoadError::Syntax {
            file: file.to_string(),
            source,
        })?;
        counter!("pooldash_template_reload_total").increment(1);
        Ok(template)
    }
}
