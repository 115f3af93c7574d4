use crate::config::{AccountSource, EngineConfig, EntrySide, TransactionType};
use crate::error::{EngineError, Result};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

pub type NodeId = usize;

/// Weight carried by the pairwise RELATED edges between concepts of the same
/// declared domain.
pub const RELATED_EDGE_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Transaction {
        tag: TransactionType,
        name: String,
        description: String,
    },
    Account {
        code: String,
    },
    Keyword {
        text: String,
    },
    Concept {
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    HasKeyword,
    HasConcept,
    Debit,
    Credit,
    Related,
}

/// `target` is the node at the other end of the edge, regardless of whether the
/// edge was reached through the outgoing or the incoming adjacency list.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub target: NodeId,
    pub kind: EdgeKind,
    pub weight: f64,
}

/// Heterogeneous knowledge graph over transactions, accounts, keywords and
/// concepts. Built once at startup from the rule configuration; read-only (and
/// therefore freely shareable across threads) afterwards.
pub struct KnowledgeGraph {
    nodes: Vec<NodeKind>,
    outgoing: Vec<Vec<Edge>>,
    incoming: Vec<Vec<Edge>>,
    keyword_index: BTreeMap<String, NodeId>,
    concept_index: BTreeMap<String, NodeId>,
    transaction_index: BTreeMap<TransactionType, NodeId>,
    account_index: BTreeMap<String, NodeId>,
}

impl KnowledgeGraph {
    pub fn build(config: &EngineConfig) -> Result<Self> {
        let mut graph = Self {
            nodes: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            keyword_index: BTreeMap::new(),
            concept_index: BTreeMap::new(),
            transaction_index: BTreeMap::new(),
            account_index: BTreeMap::new(),
        };

        for doc in &config.document_types {
            let tx_node = graph.add_node(NodeKind::Transaction {
                tag: doc.transaction_type.clone(),
                name: doc.name.clone(),
                description: doc.description.clone(),
            });
            graph
                .transaction_index
                .insert(doc.transaction_type.clone(), tx_node);

            for keyword in &doc.keywords {
                let text = keyword.to_lowercase();
                let kw_node = match graph.keyword_index.get(&text) {
                    Some(&id) => id,
                    None => {
                        let id = graph.add_node(NodeKind::Keyword { text: text.clone() });
                        graph.keyword_index.insert(text, id);
                        id
                    }
                };
                graph.add_edge(tx_node, kw_node, EdgeKind::HasKeyword, 1.0);
            }

            for concept in &doc.concepts {
                let text = concept.to_lowercase();
                let concept_node = match graph.concept_index.get(&text) {
                    Some(&id) => id,
                    None => {
                        let id = graph.add_node(NodeKind::Concept { text: text.clone() });
                        graph.concept_index.insert(text, id);
                        id
                    }
                };
                graph.add_edge(tx_node, concept_node, EdgeKind::HasConcept, 1.0);
            }
        }

        for set in &config.posting_rules {
            let tx_node = *graph
                .transaction_index
                .get(&set.transaction_type)
                .ok_or_else(|| {
                    EngineError::UnknownTransactionType(set.transaction_type.to_string())
                })?;

            for rule in &set.rules {
                if rule.account_source_type != AccountSource::Fixed {
                    continue;
                }
                let code = rule.fixed_account_code.clone();
                let account_node = match graph.account_index.get(&code) {
                    Some(&id) => id,
                    None => {
                        let id = graph.add_node(NodeKind::Account { code: code.clone() });
                        graph.account_index.insert(code, id);
                        id
                    }
                };
                let kind = match rule.side {
                    EntrySide::Debit => EdgeKind::Debit,
                    EntrySide::Credit => EdgeKind::Credit,
                };
                graph.add_edge(tx_node, account_node, kind, 1.0);
            }
        }

        // Concepts of the same domain borrow signal from each other during
        // graph traversal. Members never attached to any transaction carry no
        // signal, so unknown ones are skipped rather than created.
        let mut connected: BTreeSet<(NodeId, NodeId)> = BTreeSet::new();
        for domain in &config.concept_domains {
            let members: Vec<NodeId> = domain
                .members
                .iter()
                .filter_map(|m| {
                    let id = graph.concept_index.get(&m.to_lowercase()).copied();
                    if id.is_none() {
                        debug!(
                            "concept domain '{}': member '{}' is not attached to any transaction",
                            domain.name, m
                        );
                    }
                    id
                })
                .collect();

            for (i, &a) in members.iter().enumerate() {
                for &b in members.iter().skip(i + 1) {
                    let key = (a.min(b), a.max(b));
                    if connected.insert(key) {
                        graph.add_edge(a, b, EdgeKind::Related, RELATED_EDGE_WEIGHT);
                        graph.add_edge(b, a, EdgeKind::Related, RELATED_EDGE_WEIGHT);
                    }
                }
            }
        }

        debug!(
            "knowledge graph built: {} nodes, {} transactions, {} keywords, {} concepts, {} accounts",
            graph.nodes.len(),
            graph.transaction_index.len(),
            graph.keyword_index.len(),
            graph.concept_index.len(),
            graph.account_index.len()
        );

        Ok(graph)
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(kind);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    fn add_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind, weight: f64) {
        self.outgoing[source].push(Edge {
            target,
            kind,
            weight,
        });
        self.incoming[target].push(Edge {
            target: source,
            kind,
            weight,
        });
    }

    pub fn node(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn out_neighbors(&self, node: NodeId, kind: EdgeKind) -> impl Iterator<Item = &Edge> {
        self.outgoing[node].iter().filter(move |e| e.kind == kind)
    }

    pub fn in_neighbors(&self, node: NodeId, kind: EdgeKind) -> impl Iterator<Item = &Edge> {
        self.incoming[node].iter().filter(move |e| e.kind == kind)
    }

    /// Keyword nodes in sorted text order; iteration order is deterministic.
    pub fn keywords(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.keyword_index.iter().map(|(t, &id)| (t.as_str(), id))
    }

    pub fn concepts(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.concept_index.iter().map(|(t, &id)| (t.as_str(), id))
    }

    pub fn transaction_node(&self, tag: &TransactionType) -> Option<NodeId> {
        self.transaction_index.get(tag).copied()
    }

    pub fn transaction_tag(&self, node: NodeId) -> Option<&TransactionType> {
        match &self.nodes[node] {
            NodeKind::Transaction { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn account_node(&self, code: &str) -> Option<NodeId> {
        self.account_index.get(code).copied()
    }
}
