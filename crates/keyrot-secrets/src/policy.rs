//! Recipient map: ordered rules binding store paths to recipients

use crate::keys::Recipient;
use keyrot_core::utils::write_atomic;
use keyrot_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One rule of a [`RecipientMap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationRule {
    /// Regex matched against the store's relative path
    pub path_regex: String,
    pub recipients: Vec<Recipient>,
}

/// Ordered policy; the first rule whose pattern matches a path applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientMap {
    pub creation_rules: Vec<CreationRule>,
}

impl RecipientMap {
    /// A map with one catch-all rule
    pub fn single(recipient: Recipient) -> Self {
        Self {
            creation_rules: vec![CreationRule {
                path_regex: ".*".to_string(),
                recipients: vec![recipient],
            }],
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let map: RecipientMap = serde_yaml_ng::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid recipient map: {}", e)))?;
        map.validate()?;
        Ok(map)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::configuration(format!("Recipient map not found: {}", path.display()))
            } else {
                Error::io_at(path, e)
            }
        })?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Atomically write to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_yaml()?.as_bytes(), None)
    }

    /// Check every rule has a compilable pattern and at least one recipient
    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }

    /// Validate and compile every rule pattern for repeated lookups
    pub fn compile(&self) -> Result<CompiledMap> {
        if self.creation_rules.is_empty() {
            return Err(Error::configuration("Recipient map has no creation rules"));
        }

        let mut rules = Vec::with_capacity(self.creation_rules.len());
        for (index, rule) in self.creation_rules.iter().enumerate() {
            let pattern = Regex::new(&rule.path_regex).map_err(|e| {
                Error::configuration(format!(
                    "Rule {} has an invalid path_regex '{}': {}",
                    index, rule.path_regex, e
                ))
            })?;
            if rule.recipients.is_empty() {
                return Err(Error::configuration(format!(
                    "Rule {} ('{}') has no recipients",
                    index, rule.path_regex
                )));
            }
            rules.push(CompiledRule {
                pattern,
                recipients: rule.recipients.clone(),
            });
        }

        Ok(CompiledMap { rules })
    }

    /// Whether any rule names `recipient`
    pub fn contains(&self, recipient: &Recipient) -> bool {
        self.creation_rules
            .iter()
            .any(|rule| rule.recipients.contains(recipient))
    }

    /// Every distinct recipient named by the map, in first-seen order
    pub fn all_recipients(&self) -> Vec<Recipient> {
        let mut seen = Vec::new();
        for recipient in self.creation_rules.iter().flat_map(|r| &r.recipients) {
            if !seen.contains(recipient) {
                seen.push(recipient.clone());
            }
        }
        seen
    }

    /// Copy of this map with `old` replaced by `new` in every rule
    ///
    /// Co-recipients are preserved. Rules that already name `new` are not
    /// given a duplicate. Fails when `old` appears in no rule.
    pub fn stage_replacement(&self, old: &Recipient, new: &Recipient) -> Result<Self> {
        if !self.contains(old) {
            return Err(Error::configuration(format!(
                "Active recipient {} is not named by any rule in the recipient map",
                old
            )));
        }

        let creation_rules = self
            .creation_rules
            .iter()
            .map(|rule| {
                let mut recipients: Vec<Recipient> = Vec::with_capacity(rule.recipients.len());
                for recipient in &rule.recipients {
                    let next = if recipient == old { new } else { recipient };
                    if !recipients.contains(next) {
                        recipients.push(next.clone());
                    }
                }
                CreationRule {
                    path_regex: rule.path_regex.clone(),
                    recipients,
                }
            })
            .collect();

        let staged = Self { creation_rules };
        staged.validate()?;
        Ok(staged)
    }

    /// Ensure every path in `relative_paths` is covered by a rule
    pub fn check_coverage<'a>(&self, relative_paths: impl IntoIterator<Item = &'a str>) -> Result<()> {
        self.compile()?.check_coverage(relative_paths)
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    recipients: Vec<Recipient>,
}

/// A validated [`RecipientMap`] with its patterns compiled once
///
/// Built by [`RecipientMap::compile`]; lookups never touch the regex parser.
#[derive(Debug, Clone)]
pub struct CompiledMap {
    rules: Vec<CompiledRule>,
}

impl CompiledMap {
    /// Recipients of the first rule matching `relative_path`
    pub fn recipients_for(&self, relative_path: &str) -> Option<&[Recipient]> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(relative_path))
            .map(|rule| rule.recipients.as_slice())
    }

    /// Like [`Self::recipients_for`] but an unmatched path is an error
    pub fn require_recipients(&self, relative_path: &str) -> Result<&[Recipient]> {
        self.recipients_for(relative_path).ok_or_else(|| {
            Error::configuration(format!(
                "No recipient rule matches store {}",
                relative_path
            ))
        })
    }

    /// Ensure every path in `relative_paths` is covered by a rule
    pub fn check_coverage<'a>(&self, relative_paths: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let uncovered: Vec<&str> = relative_paths
            .into_iter()
            .filter(|p| self.recipients_for(p).is_none())
            .collect();

        if uncovered.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration(format!(
                "No recipient rule matches: {}",
                uncovered.join(", ")
            )))
        }
    }
}
