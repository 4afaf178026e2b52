//! Language profile registry.
//!
//! Maps a language identifier to the toolchain needed to judge it: runtime
//! image, source file name, working directory inside the sandbox, optional
//! compile command, and run command. Loaded once at startup from a TOML
//! table and immutable afterwards.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Toolchain profile for one supported language.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    /// Isolated runtime image the sandbox runs this language in
    pub image: String,
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    /// Working directory inside the sandbox where the workspace is mounted
    pub work_dir: String,
    /// Compile command as argv (None if the language is not compiled)
    pub compile_command: Option<Vec<String>>,
    /// Run command as argv
    pub run_command: Vec<String>,
}

/// Raw TOML entry for a language.
#[derive(Debug, Deserialize)]
struct RawProfile {
    image: String,
    source_file: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    aliases: Vec<String>,
}

fn default_work_dir() -> String {
    "/box".to_string()
}

/// Immutable lookup table from language id to profile.
#[derive(Debug)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// Load the registry from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language config at {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse the registry from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: HashMap<String, RawProfile> =
            toml::from_str(content).context("Failed to parse language config")?;

        let mut profiles = HashMap::new();
        for (name, raw) in raw {
            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for language {}", name);
            }

            let profile = LanguageProfile {
                image: raw.image,
                source_file: raw.source_file,
                work_dir: raw.work_dir,
                compile_command: raw.compile_command.as_deref().map(into_command),
                run_command,
            };

            for alias in &raw.aliases {
                profiles.insert(alias.to_lowercase(), profile.clone());
            }
            profiles.insert(name.to_lowercase(), profile);
        }

        Ok(Self { profiles })
    }

    /// Look up a profile by language id. `None` means the language is not
    /// configured on this worker — a configuration error, not a user error.
    pub fn profile(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(&language.to_lowercase())
    }

    /// Names of all configured languages (including aliases).
    pub fn supported_languages(&self) -> Vec<&str> {
        self.profiles.keys().map(|s| s.as_str()).collect()
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
