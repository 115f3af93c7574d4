use crate::config::{
    AccountSource, EngineConfig, EntrySide, PostingGroupType, PostingRule, TransactionType,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// One resolved journal line. `is_lookup` lets callers flag computed accounts
/// differently from fixed ones when rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub side: EntrySide,
    pub account_code: String,
    pub priority: u32,
    pub description: String,
    pub is_lookup: bool,
}

/// Deterministic expansion of a transaction type into journal entries. All
/// tables are prepared once from the configuration; `resolve` is pure.
pub struct PostingResolver {
    rules: BTreeMap<TransactionType, Vec<PostingRule>>,
    group_types: BTreeMap<String, PostingGroupType>,
    item_groups: BTreeMap<String, BTreeMap<String, String>>,
    partner_groups: BTreeMap<String, BTreeMap<String, String>>,
}

impl PostingResolver {
    pub fn new(config: &EngineConfig) -> Self {
        let mut rules = BTreeMap::new();
        for set in &config.posting_rules {
            let mut sorted = set.rules.clone();
            sorted.sort_by_key(|r| r.priority);
            rules.insert(set.transaction_type.clone(), sorted);
        }

        let group_types = config
            .posting_groups
            .iter()
            .map(|g| (g.code.clone(), g.posting_group_type))
            .collect();

        Self {
            rules,
            group_types,
            item_groups: config.gl_mapping.item_groups.clone(),
            partner_groups: config.gl_mapping.partner_groups.clone(),
        }
    }

    /// Expands `transaction_type` into its journal entries, ordered by rule
    /// priority. A LOOKUP rule consults the item-group table when the caller's
    /// item group is declared as an ITEM_GROUP posting group, the partner-group
    /// table otherwise. A missing mapping resolves to an empty account code;
    /// that is a data-quality condition for the caller, not an engine error.
    pub fn resolve(
        &self,
        transaction_type: &TransactionType,
        item_group: &str,
        partner_group: &str,
    ) -> Vec<JournalEntry> {
        let Some(rules) = self.rules.get(transaction_type) else {
            return Vec::new();
        };

        rules
            .iter()
            .map(|rule| {
                let account_code = match rule.account_source_type {
                    AccountSource::Fixed => rule.fixed_account_code.clone(),
                    AccountSource::Lookup => self.lookup(&rule.role_key, item_group, partner_group),
                };
                JournalEntry {
                    side: rule.side,
                    account_code,
                    priority: rule.priority,
                    description: rule.description.clone(),
                    is_lookup: rule.account_source_type == AccountSource::Lookup,
                }
            })
            .collect()
    }

    fn lookup(&self, role_key: &str, item_group: &str, partner_group: &str) -> String {
        let use_item_table = matches!(
            self.group_types.get(item_group),
            Some(PostingGroupType::ItemGroup)
        );
        let (table, group) = if use_item_table {
            (&self.item_groups, item_group)
        } else {
            (&self.partner_groups, partner_group)
        };
        table
            .get(group)
            .and_then(|roles| roles.get(role_key))
            .cloned()
            .unwrap_or_default()
    }
}
