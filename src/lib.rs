//! # Journal Engine
//!
//! A library for answering natural-language accounting questions by classifying
//! them into configured business-transaction types and expanding the result
//! into concrete debit/credit journal entries.
//!
//! ## Core Concepts
//!
//! - **Knowledge Graph**: transactions, accounts, keywords and concepts from
//!   the rule configuration, connected by typed edges
//! - **Multi-Signal Retrieval**: weighted keyword/concept/expansion scoring,
//!   negative keywords, ordered disambiguation rules, RELATED-edge traversal
//!   and embedding similarity
//! - **Conversation Context**: a bounded history that lets short follow-up
//!   questions reuse the previously resolved transaction
//! - **Posting Resolution**: deterministic expansion of a transaction type into
//!   priority-ordered entries, with FIXED or group-mapped LOOKUP accounts
//!
//! ## Example
//!
//! ```rust,ignore
//! use journal_engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::from_file("rules/posting_engine.json")?;
//! let engine = Engine::new(config, None)?;
//!
//! let outcome = engine.ask("xuất kho bán hàng giá vốn 5 triệu", "GOODS", "CUSTOMER");
//! println!("{} via {:?}", outcome.classification.transaction_type, outcome.classification.method);
//! for line in engine.describe_entries(&outcome.entries) {
//!     println!("{}", line);
//! }
//! ```
//!
//! The HTTP/chat layer around this engine is intentionally out of scope: the
//! caller supplies questions and the item/partner group dimensions, and
//! formats prose around the structured result.

pub mod accounts;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod resolver;
pub mod retriever;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use accounts::{AccountCatalog, AccountEntry};
pub use config::*;
pub use context::{ConversationContext, ConversationEntry};
pub use embedding::{cosine_similarity, EmbeddingService};
pub use error::{EngineError, Result};
pub use graph::{Edge, EdgeKind, KnowledgeGraph, NodeId, NodeKind};
pub use resolver::{JournalEntry, PostingResolver};
pub use retriever::{Classification, RetrievalMethod, Retriever};

#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;

use log::{debug, info};
use std::sync::{Mutex, MutexGuard};

/// Classification plus the resolved entries, as returned by [`Engine::ask`].
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub classification: Classification,
    pub entries: Vec<JournalEntry>,
}

/// The complete classification and resolution pipeline for one conversational
/// session. Everything except the conversation buffer is immutable after
/// construction, so an `Engine` can be shared read-only across threads; the
/// buffer itself is guarded by a mutex.
pub struct Engine {
    config: EngineConfig,
    graph: KnowledgeGraph,
    retriever: Retriever,
    resolver: PostingResolver,
    catalog: AccountCatalog,
    context: Mutex<ConversationContext>,
    embedder: Option<Box<dyn EmbeddingService>>,
}

impl Engine {
    /// Validates the configuration, builds the knowledge graph and rule
    /// tables, and precomputes the per-transaction description embeddings.
    /// Configuration errors are fatal; an unreachable embedding service only
    /// disables the embedding signal.
    pub fn new(
        config: EngineConfig,
        embedder: Option<Box<dyn EmbeddingService>>,
    ) -> Result<Self> {
        config.validate()?;

        let graph = KnowledgeGraph::build(&config)?;
        let retriever = Retriever::new(&config, embedder.as_deref());
        let resolver = PostingResolver::new(&config);
        let catalog = AccountCatalog::new(&config.accounts);
        let context = Mutex::new(ConversationContext::new(&config.conversation));

        info!(
            "engine ready: {} transaction types, {} graph nodes",
            config.document_types.len(),
            graph.node_count()
        );

        Ok(Self {
            config,
            graph,
            retriever,
            resolver,
            catalog,
            context,
            embedder,
        })
    }

    /// Classifies a question, substituting the prior transaction for
    /// low-confidence follow-ups, and records the outcome in the history.
    pub fn classify(&self, question: &str) -> Classification {
        let mut result =
            self.retriever
                .retrieve(&self.graph, question, self.embedder.as_deref());

        let mut context = self.context_guard();
        if !result.has_lexical_signal() && context.is_follow_up(question) {
            if let Some(prior) = context.last_transaction().cloned() {
                debug!(
                    "follow-up detected, substituting {} for {}",
                    prior, result.transaction_type
                );
                result.transaction_type = prior;
                result.method = RetrievalMethod::FollowUp;
            }
        }
        context.record(question, result.transaction_type.clone());

        result
    }

    /// Expands a transaction type into its journal entries. Pure passthrough
    /// to the resolver; no history involvement.
    pub fn resolve(
        &self,
        transaction_type: &TransactionType,
        item_group: &str,
        partner_group: &str,
    ) -> Vec<JournalEntry> {
        self.resolver.resolve(transaction_type, item_group, partner_group)
    }

    /// The full pipeline: classify the question, then resolve the entries.
    pub fn ask(&self, question: &str, item_group: &str, partner_group: &str) -> AskOutcome {
        let classification = self.classify(question);
        let entries = self.resolve(&classification.transaction_type, item_group, partner_group);
        AskOutcome {
            classification,
            entries,
        }
    }

    /// Renders entries as display lines ("Nợ TK 131: Phải thu của khách hàng"),
    /// flagging LOOKUP accounts with a marker the way downstream formatters
    /// expect.
    pub fn describe_entries(&self, entries: &[JournalEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| {
                let side = match entry.side {
                    EntrySide::Debit => "Nợ",
                    EntrySide::Credit => "Có",
                };
                let marker = if entry.is_lookup { " (*)" } else { "" };
                format!(
                    "{} TK {}: {}{}",
                    side,
                    entry.account_code,
                    self.catalog.name_or_code(&entry.account_code),
                    marker
                )
            })
            .collect()
    }

    pub fn transaction_name(&self, tag: &TransactionType) -> Option<&str> {
        self.config.descriptor(tag).map(|d| d.name.as_str())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn accounts(&self) -> &AccountCatalog {
        &self.catalog
    }

    pub fn history_len(&self) -> usize {
        self.context_guard().len()
    }

    pub fn clear_history(&self) {
        self.context_guard().clear();
    }

    fn context_guard(&self) -> MutexGuard<'_, ConversationContext> {
        // A poisoned lock only means another thread panicked mid-record; the
        // buffer itself is still structurally valid.
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> EngineConfig {
        let raw = serde_json::json!({
            "document_types": [
                {
                    "transaction_type": "DO_SALE",
                    "name": "Phiếu xuất kho bán hàng",
                    "description": "Xuất kho bán hàng, giao hàng cho khách, ghi nhận giá vốn",
                    "keywords": ["xuất kho", "giá vốn", "giao hàng"],
                    "concepts": ["bán hàng", "tồn kho"]
                },
                {
                    "transaction_type": "GRN_PURCHASE",
                    "name": "Phiếu nhập kho mua hàng",
                    "description": "Nhập kho mua hàng, nhận hàng từ nhà cung cấp",
                    "keywords": ["nhập kho", "mua hàng"],
                    "concepts": ["mua hàng", "tồn kho"]
                }
            ],
            "posting_rules": [
                {
                    "transaction_type": "DO_SALE",
                    "rules": [
                        {
                            "role_key": "COGS_ACCOUNT",
                            "side": "DEBIT",
                            "account_source_type": "FIXED",
                            "fixed_account_code": "632",
                            "priority": 1,
                            "description": "Giá vốn hàng bán"
                        },
                        {
                            "role_key": "INVENTORY_ACCOUNT",
                            "side": "CREDIT",
                            "account_source_type": "LOOKUP",
                            "priority": 2,
                            "description": "Hàng tồn kho"
                        }
                    ]
                }
            ],
            "posting_groups": [
                { "code": "GOODS", "posting_group_type": "ITEM_GROUP" }
            ],
            "gl_mapping": {
                "item_groups": {
                    "GOODS": { "INVENTORY_ACCOUNT": "156" }
                }
            },
            "accounts": [
                { "code": "632", "name": "Giá vốn hàng bán" },
                { "code": "156", "name": "Hàng hóa" }
            ],
            "default_transaction": "DO_SALE"
        })
        .to_string();
        EngineConfig::from_json(&raw).unwrap()
    }

    #[test]
    fn test_end_to_end_ask() {
        let engine = Engine::new(full_config(), None).unwrap();
        let outcome = engine.ask("xuất kho bán hàng giá vốn 5 triệu", "GOODS", "CUSTOMER");

        assert_eq!(outcome.classification.transaction_type.as_str(), "DO_SALE");
        assert_eq!(outcome.classification.method, RetrievalMethod::Keyword);
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.entries[0].account_code, "632");
        assert_eq!(outcome.entries[1].account_code, "156");
        assert_eq!(engine.history_len(), 1);
    }

    #[test]
    fn test_follow_up_reuses_prior_transaction() {
        let engine = Engine::new(full_config(), None).unwrap();
        let first = engine.classify("nhập kho mua hàng");
        assert_eq!(first.transaction_type.as_str(), "GRN_PURCHASE");

        let second = engine.classify("còn thuế thì sao");
        assert_eq!(second.transaction_type.as_str(), "GRN_PURCHASE");
        assert_eq!(second.method, RetrievalMethod::FollowUp);
        assert_eq!(engine.history_len(), 2);
    }

    #[test]
    fn test_follow_up_not_triggered_with_direct_signal() {
        let engine = Engine::new(full_config(), None).unwrap();
        engine.classify("nhập kho mua hàng");
        // Short and contains "còn", but "xuất kho" is a direct keyword hit.
        let result = engine.classify("còn xuất kho?");
        assert_eq!(result.transaction_type.as_str(), "DO_SALE");
        assert_ne!(result.method, RetrievalMethod::FollowUp);
    }

    #[test]
    fn test_describe_entries_uses_catalog_names() {
        let engine = Engine::new(full_config(), None).unwrap();
        let entries = engine.resolve(&TransactionType::from("DO_SALE"), "GOODS", "CUSTOMER");
        let lines = engine.describe_entries(&entries);
        assert_eq!(lines[0], "Nợ TK 632: Giá vốn hàng bán");
        assert_eq!(lines[1], "Có TK 156: Hàng hóa (*)");
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let mut config = full_config();
        config.default_transaction = TransactionType::from("MISSING");
        assert!(Engine::new(config, None).is_err());
    }

    #[test]
    fn test_transaction_name_lookup() {
        let engine = Engine::new(full_config(), None).unwrap();
        assert_eq!(
            engine.transaction_name(&TransactionType::from("DO_SALE")),
            Some("Phiếu xuất kho bán hàng")
        );
        assert_eq!(engine.transaction_name(&TransactionType::from("NOPE")), None);
    }
}
