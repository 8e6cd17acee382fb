//! TOML module manifests
//!
//! ```toml
//! [walk]
//! parallelism = 4
//! walker = "rescan"
//!
//! [[module]]
//! name = "api"
//! requires = ["db"]
//! optional = ["cache"]
//! provides = ["http"]
//! priority = 10
//! ```

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use modgraph::{Descriptor, GraphBuilder, WalkConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading a manifest
#[derive(Error, Debug, Diagnostic)]
pub enum ManifestError {
    #[error("Failed to read manifest {}", path.display())]
    #[diagnostic(code(modgraph_cli::manifest::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest {}", path.display())]
    #[diagnostic(
        code(modgraph_cli::manifest::parse),
        help("Modules are declared as [[module]] tables with a `name`")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Module '{name}' is declared more than once")]
    #[diagnostic(code(modgraph_cli::manifest::duplicate_module))]
    DuplicateModule { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] modgraph::Error),
}

/// A parsed manifest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Walk settings
    #[serde(default)]
    pub walk: WalkConfig,

    /// Declared modules, in file order
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleEntry>,
}

/// One `[[module]]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
    pub name: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub priority: u32,
}

impl ModuleEntry {
    fn descriptor(&self) -> modgraph::Result<Descriptor<String>> {
        let mut builder = Descriptor::builder(self.name.clone()).execution_priority(self.priority);
        for key in &self.requires {
            builder = builder.requires(key.clone());
        }
        for key in &self.optional {
            builder = builder.requires_optionally(key.clone());
        }
        for key in &self.provides {
            builder = builder.provides(key.clone());
        }
        builder.build()
    }
}

impl Manifest {
    /// Read and parse the manifest at `path`
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            path = %path.display(),
            modules = manifest.modules.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Parse manifest text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Collect the declared modules into a graph builder
    pub fn builder(&self) -> Result<GraphBuilder<String, String>, ManifestError> {
        let mut seen = HashSet::new();
        let mut builder = GraphBuilder::new();
        for entry in &self.modules {
            if !seen.insert(entry.name.as_str()) {
                return Err(ManifestError::DuplicateModule {
                    name: entry.name.clone(),
                });
            }
            builder.add(entry.name.clone(), entry.descriptor()?);
        }
        Ok(builder)
    }
}
