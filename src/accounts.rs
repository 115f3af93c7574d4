use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AccountEntry {
    #[schemars(description = "Ledger account code (e.g. '131', '33311')")]
    pub code: String,

    #[schemars(description = "Account display name")]
    pub name: String,
}

/// Chart-of-accounts catalog. Purely presentational: resolution works on codes
/// alone, the catalog only supplies names for display.
#[derive(Debug, Clone, Default)]
pub struct AccountCatalog {
    by_code: BTreeMap<String, String>,
}

impl AccountCatalog {
    pub fn new(entries: &[AccountEntry]) -> Self {
        Self {
            by_code: entries
                .iter()
                .map(|e| (e.code.clone(), e.name.clone()))
                .collect(),
        }
    }

    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    /// Display name for a code, falling back to the code itself.
    pub fn name_or_code<'a>(&'a self, code: &'a str) -> &'a str {
        self.name_of(code).unwrap_or(code)
    }

    pub fn search_by_name(&self, term: &str) -> Vec<(&str, &str)> {
        let term_lower = term.to_lowercase();
        self.by_code
            .iter()
            .filter(|(_, name)| name.to_lowercase().contains(&term_lower))
            .map(|(code, name)| (code.as_str(), name.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
