use crate::accounts::AccountEntry;
use crate::error::{EngineError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// A business transaction category (e.g. "DO_SALE", "CASH_IN").
///
/// The set of valid tags is declared entirely by configuration; the engine never
/// hardcodes the enumeration.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct TransactionType(pub String);

impl TransactionType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySide {
    #[schemars(description = "Debit side of a journal entry (Nợ)")]
    Debit,

    #[schemars(description = "Credit side of a journal entry (Có)")]
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountSource {
    #[schemars(description = "The rule carries a literal account code")]
    Fixed,

    #[schemars(
        description = "The account code is resolved through the item-group or partner-group GL mapping table"
    )]
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingGroupType {
    #[schemars(description = "Group classifies items/products; LOOKUP rules consult the item-group table")]
    ItemGroup,

    #[schemars(description = "Group classifies partners; LOOKUP rules consult the partner-group table")]
    PartnerGroup,
}

/// One declared business transaction: its tag, display name, free-text
/// description and the lexical signals that identify it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DocumentTypeDescriptor {
    pub transaction_type: TransactionType,

    #[schemars(description = "Human-readable transaction name (e.g. 'Phiếu xuất kho bán hàng')")]
    pub name: String,

    #[schemars(description = "Free-text description, also embedded for similarity scoring")]
    #[serde(default)]
    pub description: String,

    #[schemars(description = "Literal phrases whose presence in a question signals this transaction")]
    pub keywords: Vec<String>,

    #[schemars(description = "Domain concepts attached to this transaction (e.g. 'bán hàng', 'tồn kho')")]
    #[serde(default)]
    pub concepts: Vec<String>,
}

/// A template line a transaction expands into.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PostingRule {
    #[schemars(description = "Role of this line within the transaction (e.g. 'AR_ACCOUNT', 'COGS_ACCOUNT')")]
    pub role_key: String,

    pub side: EntrySide,

    pub account_source_type: AccountSource,

    #[schemars(description = "Literal account code; required when account_source_type is FIXED")]
    #[serde(default)]
    pub fixed_account_code: String,

    #[schemars(description = "Ascending sort key; defines the order of the resolved entries")]
    pub priority: u32,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PostingRuleSet {
    pub transaction_type: TransactionType,
    pub rules: Vec<PostingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PostingGroup {
    #[schemars(description = "Group code as supplied by callers (e.g. 'GOODS', 'CUSTOMER')")]
    pub code: String,

    pub posting_group_type: PostingGroupType,
}

/// Two independent (group_code, role_key) -> account_code tables. Which one a
/// LOOKUP rule consults is decided by the posting group type of the caller's
/// item group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GlMapping {
    #[serde(default)]
    pub item_groups: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default)]
    pub partner_groups: BTreeMap<String, BTreeMap<String, String>>,
}

/// Concepts belonging to the same domain (e.g. "sale", "cash") are connected
/// pairwise with RELATED edges in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConceptDomain {
    pub name: String,
    pub members: Vec<String>,
}

/// Overrides default scoring when two transactions are lexically similar.
/// Rules are evaluated in declaration order; the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DisambiguationRule {
    #[schemars(description = "All of these phrases must be present in the question")]
    pub require: Vec<String>,

    #[schemars(description = "None of these phrases may be present in the question")]
    #[serde(default)]
    pub exclude: Vec<String>,

    pub transaction_type: TransactionType,

    pub boost: f64,
}

fn default_history_capacity() -> usize {
    5
}

fn default_follow_up_max_chars() -> usize {
    48
}

fn default_follow_up_indicators() -> Vec<String> {
    [
        "còn", "vậy", "thì sao", "cái đó", "nó", "ví dụ", "thêm", "tiếp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConversationSettings {
    #[schemars(description = "Ring buffer capacity; the oldest entry is evicted once full")]
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[schemars(description = "Questions at or above this many characters are never follow-ups")]
    #[serde(default = "default_follow_up_max_chars")]
    pub follow_up_max_chars: usize,

    #[schemars(description = "Deictic phrases that mark a short question as a follow-up")]
    #[serde(default = "default_follow_up_indicators")]
    pub follow_up_indicators: Vec<String>,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            follow_up_max_chars: default_follow_up_max_chars(),
            follow_up_indicators: default_follow_up_indicators(),
        }
    }
}

/// The complete rule configuration. Loaded once at startup, validated, and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub document_types: Vec<DocumentTypeDescriptor>,

    pub posting_rules: Vec<PostingRuleSet>,

    #[serde(default)]
    pub posting_groups: Vec<PostingGroup>,

    #[serde(default)]
    pub gl_mapping: GlMapping,

    #[serde(default)]
    pub concept_domains: Vec<ConceptDomain>,

    #[schemars(description = "Domain term -> colloquial variants, used for query expansion in both directions")]
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,

    #[schemars(description = "Transaction tag -> phrases indicating it is NOT the right classification")]
    #[serde(default)]
    pub negative_keywords: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub disambiguation_rules: Vec<DisambiguationRule>,

    #[schemars(description = "Returned when no signal produces a positive score")]
    pub default_transaction: TransactionType,

    #[serde(default)]
    pub conversation: ConversationSettings,

    #[schemars(description = "Optional chart-of-accounts catalog used to annotate resolved entries")]
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn descriptor(&self, tx: &TransactionType) -> Option<&DocumentTypeDescriptor> {
        self.document_types
            .iter()
            .find(|d| &d.transaction_type == tx)
    }

    pub fn declares(&self, tx: &TransactionType) -> bool {
        self.descriptor(tx).is_some()
    }

    /// Checks referential integrity between the rule tables. A failure here is
    /// a fatal startup error; the engine refuses to run on a broken ruleset.
    pub fn validate(&self) -> Result<()> {
        if self.document_types.is_empty() {
            return Err(EngineError::ConfigError {
                item: "document_types".to_string(),
                details: "at least one document type must be declared".to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for doc in &self.document_types {
            if doc.transaction_type.as_str().is_empty() {
                return Err(EngineError::ConfigError {
                    item: "document_types".to_string(),
                    details: "transaction_type must not be empty".to_string(),
                });
            }
            if !seen.insert(doc.transaction_type.clone()) {
                return Err(EngineError::ConfigError {
                    item: doc.transaction_type.to_string(),
                    details: "duplicate transaction type declaration".to_string(),
                });
            }
        }

        let mut ruled = BTreeSet::new();
        for set in &self.posting_rules {
            if !self.declares(&set.transaction_type) {
                return Err(EngineError::UnknownTransactionType(
                    set.transaction_type.to_string(),
                ));
            }
            if !ruled.insert(set.transaction_type.clone()) {
                return Err(EngineError::ConfigError {
                    item: set.transaction_type.to_string(),
                    details: "duplicate posting rule set".to_string(),
                });
            }
            for rule in &set.rules {
                match rule.account_source_type {
                    AccountSource::Fixed if rule.fixed_account_code.is_empty() => {
                        return Err(EngineError::ConfigError {
                            item: format!("{}/{}", set.transaction_type, rule.role_key),
                            details: "FIXED rule requires a non-empty fixed_account_code"
                                .to_string(),
                        });
                    }
                    AccountSource::Lookup if !rule.fixed_account_code.is_empty() => {
                        return Err(EngineError::ConfigError {
                            item: format!("{}/{}", set.transaction_type, rule.role_key),
                            details: "LOOKUP rule must not carry a fixed_account_code"
                                .to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        for tag in self.negative_keywords.keys() {
            if !self.declares(&TransactionType::new(tag.clone())) {
                return Err(EngineError::UnknownTransactionType(tag.clone()));
            }
        }

        for rule in &self.disambiguation_rules {
            if !self.declares(&rule.transaction_type) {
                return Err(EngineError::UnknownTransactionType(
                    rule.transaction_type.to_string(),
                ));
            }
            if rule.require.is_empty() {
                return Err(EngineError::ConfigError {
                    item: rule.transaction_type.to_string(),
                    details: "disambiguation rule requires at least one positive phrase"
                        .to_string(),
                });
            }
        }

        if !self.declares(&self.default_transaction) {
            return Err(EngineError::UnknownTransactionType(
                self.default_transaction.to_string(),
            ));
        }

        if self.conversation.history_capacity == 0 {
            return Err(EngineError::ConfigError {
                item: "conversation.history_capacity".to_string(),
                details: "capacity must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = Self::generate_json_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}
