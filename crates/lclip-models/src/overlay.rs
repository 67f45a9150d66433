//! Overlay configuration supplied by the asset/font configuration collaborator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::composition::{FontSpec, OverlayPosition, OverlayRole};

/// Per-role text styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoleStyle {
    pub size: u32,
    #[serde(default = "default_color")]
    pub color: String,
    pub position: OverlayPosition,
}

fn default_color() -> String {
    "white".to_string()
}

/// Fonts by language and text sizes by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverlayConfig {
    /// Font file per language code (`en`, `ko`, ...)
    #[serde(default)]
    pub fonts: BTreeMap<String, PathBuf>,
    /// Font used when a language has no entry
    #[serde(default)]
    pub default_font: Option<PathBuf>,
    /// Styling per role
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<OverlayRole, RoleStyle>,
    /// Border width for every overlay
    #[serde(default = "default_border")]
    pub border_width: u32,
    /// Maximum keywords shown from the similar-expression list
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

fn default_border() -> u32 {
    2
}

fn default_max_keywords() -> usize {
    3
}

fn default_roles() -> BTreeMap<OverlayRole, RoleStyle> {
    let mut roles = BTreeMap::new();
    roles.insert(
        OverlayRole::Title,
        RoleStyle {
            size: 42,
            color: "white".into(),
            position: OverlayPosition::top(),
        },
    );
    roles.insert(
        OverlayRole::Expression,
        RoleStyle {
            size: 64,
            color: "yellow".into(),
            position: OverlayPosition::middle(),
        },
    );
    roles.insert(
        OverlayRole::Translation,
        RoleStyle {
            size: 48,
            color: "white".into(),
            position: OverlayPosition::Centered { y_ratio: 0.55 },
        },
    );
    roles.insert(
        OverlayRole::Keyword,
        RoleStyle {
            size: 36,
            color: "white".into(),
            position: OverlayPosition::Centered { y_ratio: 0.70 },
        },
    );
    roles.insert(
        OverlayRole::Dialogue,
        RoleStyle {
            size: 40,
            color: "white".into(),
            position: OverlayPosition::bottom(),
        },
    );
    roles
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            fonts: BTreeMap::new(),
            default_font: None,
            roles: default_roles(),
            border_width: default_border(),
            max_keywords: default_max_keywords(),
        }
    }
}

impl OverlayConfig {
    /// Load from a JSON file. Missing role entries fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OverlayConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| OverlayConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: OverlayConfig = serde_json::from_str(&raw)?;
        for (role, style) in default_roles() {
            config.roles.entry(role).or_insert(style);
        }
        Ok(config)
    }

    /// Font file for a language, falling back to the default font.
    pub fn font_for(&self, language: &str) -> Option<&PathBuf> {
        self.fonts
            .get(&language.to_lowercase())
            .or(self.default_font.as_ref())
    }

    /// Style for a role.
    pub fn style(&self, role: OverlayRole) -> RoleStyle {
        self.roles
            .get(&role)
            .cloned()
            .or_else(|| default_roles().remove(&role))
            .unwrap_or(RoleStyle {
                size: 40,
                color: default_color(),
                position: OverlayPosition::bottom(),
            })
    }

    /// Full font selection for a role rendered in `language`.
    pub fn font_spec(&self, role: OverlayRole, language: &str) -> FontSpec {
        let style = self.style(role);
        FontSpec {
            file: self.font_for(language).cloned(),
            size: style.size,
            color: style.color,
            border_width: self.border_width,
        }
    }
}

/// Overlay configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum OverlayConfigError {
    #[error("Failed to read overlay config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid overlay config: {0}")]
    Parse(#[from] serde_json::Error),
}
