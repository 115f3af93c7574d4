use crate::config::{DisambiguationRule, EngineConfig, TransactionType};
use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::graph::{EdgeKind, KnowledgeGraph};
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Score added per keyword hit.
const KEYWORD_WEIGHT: f64 = 3.0;
/// Score added per concept hit.
const CONCEPT_WEIGHT: f64 = 2.0;
/// Reduced keyword weight when the hit came from query expansion; keeps
/// expansion noise below exact matches.
const EXPANSION_WEIGHT: f64 = 2.0;
/// Score subtracted per negative-keyword hit.
const NEGATIVE_PENALTY: f64 = 2.0;
/// Multiplier applied to the RELATED edge weight during graph traversal.
const TRAVERSAL_WEIGHT: f64 = 0.5;
/// Embedding similarity blend for transactions that already have lexical signal.
const EMBEDDING_BLEND_WEIGHT: f64 = 0.5;
/// Embedding similarity weight for transactions with no lexical signal at all.
const EMBEDDING_SOLO_WEIGHT: f64 = 1.5;

/// Which signal produced the decisive classification, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Disambiguation,
    Keyword,
    Concept,
    GraphTraversal,
    Embedding,
    FollowUp,
    Fallback,
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disambiguation => "disambiguation",
            Self::Keyword => "keyword",
            Self::Concept => "concept",
            Self::GraphTraversal => "graph_traversal",
            Self::Embedding => "embedding",
            Self::FollowUp => "follow_up",
            Self::Fallback => "fallback",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub transaction_type: TransactionType,
    pub score: f64,
    pub method: RetrievalMethod,
    pub matched_keywords: Vec<String>,
    pub matched_concepts: Vec<String>,
    /// Full per-transaction score map, for diagnostics.
    pub scores: BTreeMap<TransactionType, f64>,
}

impl Classification {
    /// True when neither a keyword nor a concept matched; such a result is a
    /// low-confidence guess and a candidate for follow-up substitution.
    pub fn has_lexical_signal(&self) -> bool {
        !self.matched_keywords.is_empty() || !self.matched_concepts.is_empty()
    }
}

/// Multi-signal scorer over the knowledge graph. All tables are prepared at
/// construction (lowercased, order fixed) and read-only afterwards.
pub struct Retriever {
    declaration_order: Vec<TransactionType>,
    synonyms: Vec<(String, Vec<String>)>,
    negative_keywords: Vec<(TransactionType, Vec<String>)>,
    disambiguation_rules: Vec<DisambiguationRule>,
    default_transaction: TransactionType,
    tx_embeddings: BTreeMap<TransactionType, Vec<f32>>,
}

impl Retriever {
    /// Prepares the scoring tables and precomputes one description embedding
    /// per transaction. A failing encode here only disables the embedding
    /// signal; it never prevents the engine from starting.
    pub fn new(config: &EngineConfig, embedder: Option<&dyn EmbeddingService>) -> Self {
        let declaration_order: Vec<TransactionType> = config
            .document_types
            .iter()
            .map(|d| d.transaction_type.clone())
            .collect();

        let synonyms = config
            .synonyms
            .iter()
            .map(|(term, variants)| {
                (
                    term.to_lowercase(),
                    variants.iter().map(|v| v.to_lowercase()).collect(),
                )
            })
            .collect();

        let negative_keywords = config
            .negative_keywords
            .iter()
            .map(|(tag, phrases)| {
                (
                    TransactionType::new(tag.clone()),
                    phrases.iter().map(|p| p.to_lowercase()).collect(),
                )
            })
            .collect();

        let disambiguation_rules = config
            .disambiguation_rules
            .iter()
            .map(|rule| DisambiguationRule {
                require: rule.require.iter().map(|p| p.to_lowercase()).collect(),
                exclude: rule.exclude.iter().map(|p| p.to_lowercase()).collect(),
                transaction_type: rule.transaction_type.clone(),
                boost: rule.boost,
            })
            .collect();

        let mut tx_embeddings = BTreeMap::new();
        if let Some(embedder) = embedder {
            for doc in &config.document_types {
                let text = format!(
                    "{} {} {} {}",
                    doc.transaction_type,
                    doc.name,
                    doc.description,
                    doc.keywords.join(" ")
                );
                match embedder.encode(&text, true) {
                    Ok(vector) => {
                        tx_embeddings.insert(doc.transaction_type.clone(), vector);
                    }
                    Err(e) => {
                        warn!(
                            "failed to precompute embedding for {}: {}; embedding signal disabled",
                            doc.transaction_type, e
                        );
                        tx_embeddings.clear();
                        break;
                    }
                }
            }
        }

        Self {
            declaration_order,
            synonyms,
            negative_keywords,
            disambiguation_rules,
            default_transaction: config.default_transaction.clone(),
            tx_embeddings,
        }
    }

    pub fn retrieve(
        &self,
        graph: &KnowledgeGraph,
        question: &str,
        embedder: Option<&dyn EmbeddingService>,
    ) -> Classification {
        let question_lower = question.to_lowercase();
        let mut scores: BTreeMap<TransactionType, f64> = BTreeMap::new();
        let mut matched_keywords: Vec<String> = Vec::new();
        let mut matched_concepts: Vec<String> = Vec::new();
        let mut keyword_hits: BTreeSet<TransactionType> = BTreeSet::new();
        let mut concept_hits: BTreeSet<TransactionType> = BTreeSet::new();

        // 1. Keyword matching
        for (text, node) in graph.keywords() {
            if question_lower.contains(text) {
                matched_keywords.push(text.to_string());
                for edge in graph.in_neighbors(node, EdgeKind::HasKeyword) {
                    if let Some(tag) = graph.transaction_tag(edge.target) {
                        *scores.entry(tag.clone()).or_default() += KEYWORD_WEIGHT;
                        keyword_hits.insert(tag.clone());
                    }
                }
            }
        }

        // 2. Concept matching
        for (text, node) in graph.concepts() {
            if question_lower.contains(text) {
                matched_concepts.push(text.to_string());
                for edge in graph.in_neighbors(node, EdgeKind::HasConcept) {
                    if let Some(tag) = graph.transaction_tag(edge.target) {
                        *scores.entry(tag.clone()).or_default() += CONCEPT_WEIGHT;
                        concept_hits.insert(tag.clone());
                    }
                }
            }
        }

        // 3. Query expansion, only when the question produced no direct signal
        if matched_keywords.is_empty() && matched_concepts.is_empty() {
            let expanded = self.expand_query(&question_lower);
            if expanded != question_lower {
                debug!("expanded query: {}", expanded);
                for (text, node) in graph.keywords() {
                    if expanded.contains(text) {
                        matched_keywords.push(text.to_string());
                        for edge in graph.in_neighbors(node, EdgeKind::HasKeyword) {
                            if let Some(tag) = graph.transaction_tag(edge.target) {
                                *scores.entry(tag.clone()).or_default() += EXPANSION_WEIGHT;
                                keyword_hits.insert(tag.clone());
                            }
                        }
                    }
                }
            }
        }

        // 4. Negative-keyword penalty
        for (tag, phrases) in &self.negative_keywords {
            for phrase in phrases {
                if question_lower.contains(phrase.as_str()) {
                    *scores.entry(tag.clone()).or_default() -= NEGATIVE_PENALTY;
                }
            }
        }

        // 5. Disambiguation rules, first match wins
        let mut boosted: Option<TransactionType> = None;
        for rule in &self.disambiguation_rules {
            let positives_hold = rule
                .require
                .iter()
                .all(|p| question_lower.contains(p.as_str()));
            let negatives_hold = rule
                .exclude
                .iter()
                .any(|p| question_lower.contains(p.as_str()));
            if positives_hold && !negatives_hold {
                *scores.entry(rule.transaction_type.clone()).or_default() += rule.boost;
                boosted = Some(rule.transaction_type.clone());
                break;
            }
        }

        // 6. Graph traversal: transactions in the same domain borrow a little
        // signal from each other. Bonuses are computed against a snapshot of
        // the positive set so the outcome is order-independent.
        let positive: Vec<TransactionType> = self
            .declaration_order
            .iter()
            .filter(|tag| scores.get(tag).copied().unwrap_or(0.0) > 0.0)
            .cloned()
            .collect();
        let mut traversal_bonus: BTreeMap<TransactionType, f64> = BTreeMap::new();
        for tag in &positive {
            let Some(tx_node) = graph.transaction_node(tag) else {
                continue;
            };
            for concept_edge in graph.out_neighbors(tx_node, EdgeKind::HasConcept) {
                for related_edge in graph.out_neighbors(concept_edge.target, EdgeKind::Related) {
                    for owner_edge in graph.in_neighbors(related_edge.target, EdgeKind::HasConcept)
                    {
                        if owner_edge.target == tx_node {
                            continue;
                        }
                        if let Some(other) = graph.transaction_tag(owner_edge.target) {
                            *traversal_bonus.entry(other.clone()).or_default() +=
                                TRAVERSAL_WEIGHT * related_edge.weight;
                        }
                    }
                }
            }
        }
        let traversal_hits: BTreeSet<TransactionType> =
            traversal_bonus.keys().cloned().collect();
        for (tag, bonus) in traversal_bonus {
            *scores.entry(tag).or_default() += bonus;
        }

        // 7. Embedding similarity: low-weight blend where lexical signal
        // exists, higher weight where it is the only signal available.
        let mut embedding_failed = false;
        let mut embedding_used = false;
        if !self.tx_embeddings.is_empty() {
            if let Some(embedder) = embedder {
                match embedder.encode(question, true) {
                    Ok(query_vector) => {
                        for (tag, tx_vector) in &self.tx_embeddings {
                            let similarity = cosine_similarity(&query_vector, tx_vector);
                            let weight = if keyword_hits.contains(tag) || concept_hits.contains(tag)
                            {
                                EMBEDDING_BLEND_WEIGHT
                            } else {
                                EMBEDDING_SOLO_WEIGHT
                            };
                            *scores.entry(tag.clone()).or_default() += weight * similarity;
                        }
                        embedding_used = true;
                    }
                    Err(e) => {
                        warn!("query embedding failed, lexical scoring only: {}", e);
                        embedding_failed = true;
                    }
                }
            }
        }

        // 8. Selection: max score, declaration order breaks ties.
        let mut winner: Option<(TransactionType, f64)> = None;
        for tag in &self.declaration_order {
            let Some(&score) = scores.get(tag) else {
                continue;
            };
            let better = match &winner {
                Some((_, best)) => score > *best,
                None => true,
            };
            if better {
                winner = Some((tag.clone(), score));
            }
        }

        let (transaction_type, score, defaulted) = match winner {
            Some((tag, score)) if score > 0.0 => (tag, score, false),
            _ => (self.default_transaction.clone(), 0.0, true),
        };

        let method = if embedding_failed || defaulted {
            RetrievalMethod::Fallback
        } else if boosted.as_ref() == Some(&transaction_type) {
            RetrievalMethod::Disambiguation
        } else if keyword_hits.contains(&transaction_type) {
            RetrievalMethod::Keyword
        } else if concept_hits.contains(&transaction_type) {
            RetrievalMethod::Concept
        } else if traversal_hits.contains(&transaction_type) {
            RetrievalMethod::GraphTraversal
        } else if embedding_used {
            RetrievalMethod::Embedding
        } else {
            RetrievalMethod::Fallback
        };

        debug!(
            "retrieved {} (score {:.3}, method {}) for question: {}",
            transaction_type, score, method, question
        );

        Classification {
            transaction_type,
            score,
            method,
            matched_keywords,
            matched_concepts,
            scores,
        }
    }

    /// Appends the canonical term for every colloquial variant present in the
    /// question, and the variants for every canonical term present.
    fn expand_query(&self, question_lower: &str) -> String {
        let mut expanded = question_lower.to_string();
        for (term, variants) in &self.synonyms {
            if variants.iter().any(|v| question_lower.contains(v.as_str()))
                && !expanded.contains(term.as_str())
            {
                expanded.push(' ');
                expanded.push_str(term);
            }
            if question_lower.contains(term.as_str()) {
                for variant in variants {
                    if !expanded.contains(variant.as_str()) {
                        expanded.push(' ');
                        expanded.push_str(variant);
                    }
                }
            }
        }
        expanded
    }
}
