//! Data-only pattern declaration files.
//!
//! A declaration file lists patterns as `[[pattern]]` tables (TOML) or a
//! `{"pattern": [...]}` document (JSON). Each entry carries a name, its
//! inherits, plain properties and a merge policy. Functions cannot be
//! declared this way; phases and composed methods stay empty.

use anyhow::{Context, Result};
use meldwork_core::{Idea, Inherits, PolicySpec, Runtime, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Declarations {
    #[serde(default, rename = "pattern")]
    pub patterns: Vec<PatternDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDecl {
    pub name: String,
    /// `"a"`, `["a", "b"]`, or a map of name → `true` (hard), `false`
    /// (soft), or the ancestors implied when the soft reference hardens.
    #[serde(default)]
    pub inherits: Json,
    #[serde(default)]
    pub props: Map<String, Json>,
    #[serde(default)]
    pub moc: Map<String, Json>,
}

impl PatternDecl {
    pub fn inherits(&self) -> Inherits {
        Inherits::from_json(&self.inherits)
    }

    /// The idea this declaration registers.
    pub fn to_idea(&self) -> Idea {
        let mut idea = Idea::new();
        for (key, value) in &self.props {
            idea.props.insert(key.clone(), Value::from_json(value));
        }
        for (prop, spec) in &self.moc {
            idea.policy.insert(prop.clone(), PolicySpec::from_json(spec));
        }
        idea
    }
}

impl Declarations {
    /// Read a `.toml` or `.json` declaration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let decls = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content)?,
            _ => Self::from_json(&content)?,
        };
        info!("Loaded {} pattern(s) from {}", decls.patterns.len(), path.display());
        Ok(decls)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML declarations")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid JSON declarations")
    }

    /// Register every declared pattern, in file order.
    pub fn register(&self, runtime: &Runtime) -> Result<usize> {
        for decl in &self.patterns {
            debug!("Registering declared pattern '{}'", decl.name);
            runtime
                .pattern(&decl.name, decl.inherits(), decl.to_idea())
                .with_context(|| format!("Pattern '{}' could not be registered", decl.name))?;
        }
        Ok(self.patterns.len())
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name.as_str()).collect()
    }
}
