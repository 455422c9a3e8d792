//! Language table: which image a language's sandboxes run and how code is invoked.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::LanguageConfig;

/// Execution environment of one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    /// Image the language's sandboxes are created from.
    pub image: String,
    /// Interpreter argv; the code payload is appended as the final element.
    pub command: Vec<String>,
}

/// Error building a [`Languages`] table from configuration.
#[derive(Debug, thiserror::Error)]
#[error("invalid command for language '{language}': {message}")]
pub struct LanguageError {
    language: String,
    message: String,
}

/// Immutable mapping from language tag to [`LanguageSpec`].
#[derive(Debug, Clone, Default)]
pub struct Languages {
    table: BTreeMap<String, LanguageSpec>,
}

impl Languages {
    /// Builds the table, splitting each configured command shell-style.
    pub fn from_config(config: &BTreeMap<String, LanguageConfig>) -> Result<Self, LanguageError> {
        let mut table = BTreeMap::new();
        for (name, language) in config {
            let command = shell_words::split(&language.command).map_err(|e| LanguageError {
                language: name.clone(),
                message: e.to_string(),
            })?;
            if command.is_empty() {
                return Err(LanguageError {
                    language: name.clone(),
                    message: "command is empty".to_string(),
                });
            }
            table.insert(
                name.clone(),
                LanguageSpec {
                    image: language.image.clone(),
                    command,
                },
            );
        }
        Ok(Self { table })
    }

    /// Builds a table from `(language, image, argv-prefix)` triples.
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = (&'a str, &'a str, &'a [&'a str])>) -> Self {
        let table = specs
            .into_iter()
            .map(|(name, image, command)| {
                (
                    name.to_string(),
                    LanguageSpec {
                        image: image.to_string(),
                        command: command.iter().map(ToString::to_string).collect(),
                    },
                )
            })
            .collect();
        Self { table }
    }

    /// True when no language is configured.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// True when `language` is configured.
    pub fn contains(&self, language: &str) -> bool {
        self.table.contains_key(language)
    }

    /// Image and invocation for `language`.
    pub fn get(&self, language: &str) -> Option<&LanguageSpec> {
        self.table.get(language)
    }

    /// Configured language tags, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Each distinct image with the languages that use it.
    pub fn images(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut images: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, spec) in &self.table {
            images.entry(spec.image.as_str()).or_default().insert(name.as_str());
        }
        images
    }

    /// Full argv running `code` for `language`, or `None` if the language is unsupported.
    pub fn invocation(&self, language: &str, code: &str) -> Option<Vec<String>> {
        let spec = self.table.get(language)?;
        let mut argv = spec.command.clone();
        argv.push(code.to_string());
        Some(argv)
    }
}
