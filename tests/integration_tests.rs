use journal_engine::*;

/// Deterministic stand-in for the external embedding model: projects text onto
/// a few domain axes so similarity behaves plausibly without a real model.
struct StubEmbedder;

impl EmbeddingService for StubEmbedder {
    fn encode(&self, text: &str, _normalize: bool) -> Result<Vec<f32>> {
        let t = text.to_lowercase();
        let axes = ["bán", "mua", "tiền", "hóa đơn", "kho"];
        let mut v: Vec<f32> = axes
            .iter()
            .map(|a| if t.contains(a) { 1.0 } else { 0.0 })
            .collect();
        v.push(0.1);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(v.into_iter().map(|x| x / norm).collect())
    }
}

struct DownEmbedder;

impl EmbeddingService for DownEmbedder {
    fn encode(&self, _text: &str, _normalize: bool) -> Result<Vec<f32>> {
        Err(EngineError::EmbeddingError(
            "embedding host unreachable".to_string(),
        ))
    }
}

/// Rule configuration modeled on a Vietnamese trading company: six document
/// types covering the sale and purchase cycles.
fn trading_config() -> EngineConfig {
    let raw = serde_json::json!({
        "document_types": [
            {
                "transaction_type": "DO_SALE",
                "name": "Phiếu xuất kho bán hàng",
                "description": "Xuất kho bán hàng, giao hàng cho khách, giảm tồn kho, ghi nhận giá vốn",
                "keywords": ["xuất kho", "giá vốn", "giao hàng", "xuất bán"],
                "concepts": ["bán hàng", "tồn kho"]
            },
            {
                "transaction_type": "SALES_INVOICE",
                "name": "Hóa đơn phải thu",
                "description": "Xuất hóa đơn bán hàng, ghi nhận công nợ phải thu, thuế GTGT đầu ra",
                "keywords": ["hóa đơn bán", "phải thu", "ghi nợ 131"],
                "concepts": ["bán hàng", "công nợ"]
            },
            {
                "transaction_type": "CASH_IN",
                "name": "Phiếu thu tiền",
                "description": "Thu tiền từ khách hàng, phiếu thu, nhận thanh toán",
                "keywords": ["thu tiền", "phiếu thu"],
                "concepts": ["tiền mặt", "công nợ"]
            },
            {
                "transaction_type": "GRN_PURCHASE",
                "name": "Phiếu nhập kho mua hàng",
                "description": "Nhập kho mua hàng, nhận hàng từ nhà cung cấp, tăng tồn kho",
                "keywords": ["nhập kho", "mua hàng"],
                "concepts": ["mua hàng", "tồn kho"]
            },
            {
                "transaction_type": "PURCHASE_INVOICE",
                "name": "Hóa đơn phải chi",
                "description": "Nhận hóa đơn mua hàng, ghi nhận công nợ phải trả, thuế GTGT đầu vào",
                "keywords": ["hóa đơn mua", "phải trả"],
                "concepts": ["mua hàng", "công nợ"]
            },
            {
                "transaction_type": "CASH_OUT",
                "name": "Phiếu chi tiền",
                "description": "Chi tiền cho nhà cung cấp, phiếu chi, thanh toán công nợ",
                "keywords": ["chi tiền", "phiếu chi"],
                "concepts": ["tiền mặt", "công nợ"]
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
                    },
                    {
                        "role_key": "CLEARING_ACCOUNT",
                        "side": "DEBIT",
                        "account_source_type": "FIXED",
                        "fixed_account_code": "13881",
                        "priority": 3,
                        "description": "Phải thu tạm"
                    },
                    {
                        "role_key": "REVENUE_ACCOUNT",
                        "side": "CREDIT",
                        "account_source_type": "FIXED",
                        "fixed_account_code": "511",
                        "priority": 4,
                        "description": "Doanh thu bán hàng"
                    }
                ]
            },
            {
                "transaction_type": "SALES_INVOICE",
                "rules": [
                    {
                        "role_key": "AR_ACCOUNT",
                        "side": "DEBIT",
                        "account_source_type": "LOOKUP",
                        "priority": 1,
                        "description": "Phải thu của khách hàng"
                    },
                    {
                        "role_key": "CLEARING_ACCOUNT",
                        "side": "CREDIT",
                        "account_source_type": "FIXED",
                        "fixed_account_code": "13881",
                        "priority": 2,
                        "description": "Phải thu tạm"
                    },
                    {
                        "role_key": "VAT_OUT_ACCOUNT",
                        "side": "CREDIT",
                        "account_source_type": "FIXED",
                        "fixed_account_code": "33311",
                        "priority": 3,
                        "description": "Thuế GTGT đầu ra"
                    }
                ]
            },
            {
                "transaction_type": "GRN_PURCHASE",
                "rules": [
                    {
                        "role_key": "INVENTORY_ACCOUNT",
                        "side": "DEBIT",
                        "account_source_type": "LOOKUP",
                        "priority": 1,
                        "description": "Hàng tồn kho"
                    },
                    {
                        "role_key": "CLEARING_ACCOUNT",
                        "side": "CREDIT",
                        "account_source_type": "FIXED",
                        "fixed_account_code": "33881",
                        "priority": 2,
                        "description": "Phải trả tạm"
                    }
                ]
            },
            {
                "transaction_type": "CASH_IN",
                "rules": [
                    {
                        "role_key": "CASH_ACCOUNT",
                        "side": "DEBIT",
                        "account_source_type": "FIXED",
                        "fixed_account_code": "111",
                        "priority": 1,
                        "description": "Tiền mặt"
                    },
                    {
                        "role_key": "AR_ACCOUNT",
                        "side": "CREDIT",
                        "account_source_type": "LOOKUP",
                        "priority": 2,
                        "description": "Phải thu của khách hàng"
                    }
                ]
            }
        ],
        "posting_groups": [
            { "code": "GOODS", "posting_group_type": "ITEM_GROUP" },
            { "code": "FINISHED", "posting_group_type": "ITEM_GROUP" },
            { "code": "CUSTOMER", "posting_group_type": "PARTNER_GROUP" },
            { "code": "VENDOR", "posting_group_type": "PARTNER_GROUP" }
        ],
        "gl_mapping": {
            "item_groups": {
                "GOODS": { "INVENTORY_ACCOUNT": "156" },
                "FINISHED": { "INVENTORY_ACCOUNT": "155" }
            },
            "partner_groups": {
                "CUSTOMER": { "AR_ACCOUNT": "131" },
                "VENDOR": { "AP_ACCOUNT": "331" }
            }
        },
        "concept_domains": [
            { "name": "sale", "members": ["bán hàng", "công nợ"] },
            { "name": "purchase", "members": ["mua hàng", "công nợ"] },
            { "name": "cash", "members": ["tiền mặt", "công nợ"] }
        ],
        "synonyms": {
            "thu tiền": ["khách trả tiền", "nhận tiền"],
            "xuất kho": ["xuất hàng"]
        },
        "negative_keywords": {
            "DO_SALE": ["hóa đơn"],
            "GRN_PURCHASE": ["hóa đơn"]
        },
        "disambiguation_rules": [
            {
                "require": ["hóa đơn", "bán"],
                "exclude": ["mua"],
                "transaction_type": "SALES_INVOICE",
                "boost": 5.0
            },
            {
                "require": ["hóa đơn", "mua"],
                "exclude": [],
                "transaction_type": "PURCHASE_INVOICE",
                "boost": 5.0
            }
        ],
        "accounts": [
            { "code": "111", "name": "Tiền mặt" },
            { "code": "131", "name": "Phải thu của khách hàng" },
            { "code": "156", "name": "Hàng hóa" },
            { "code": "511", "name": "Doanh thu bán hàng" },
            { "code": "632", "name": "Giá vốn hàng bán" },
            { "code": "13881", "name": "Phải thu tạm" },
            { "code": "33311", "name": "Thuế GTGT đầu ra" },
            { "code": "33881", "name": "Phải trả tạm" }
        ],
        "default_transaction": "DO_SALE"
    })
    .to_string();
    EngineConfig::from_json(&raw).unwrap()
}

#[test]
fn test_stock_issue_question_classified_by_keyword() {
    let engine = Engine::new(trading_config(), Some(Box::new(StubEmbedder))).unwrap();
    let outcome = engine.ask("xuất kho bán hàng giá vốn 5 triệu", "GOODS", "CUSTOMER");

    assert_eq!(outcome.classification.transaction_type.as_str(), "DO_SALE");
    assert_eq!(outcome.classification.method, RetrievalMethod::Keyword);
    assert_eq!(outcome.entries.len(), 4);
    assert_eq!(outcome.entries[0].account_code, "632");
    assert_eq!(outcome.entries[1].account_code, "156");
    assert!(outcome.entries[1].is_lookup);
}

#[test]
fn test_invoice_question_classified_as_sales_invoice() {
    let engine = Engine::new(trading_config(), Some(Box::new(StubEmbedder))).unwrap();
    let result = engine.classify("hóa đơn bán hàng ghi nợ 131");

    // "hóa đơn" penalizes the stock-issue transaction while the first
    // disambiguation rule boosts the invoice past it.
    assert_eq!(result.transaction_type.as_str(), "SALES_INVOICE");
    assert_eq!(result.method, RetrievalMethod::Disambiguation);
}

#[test]
fn test_lookup_resolution_for_sales_invoice() {
    let engine = Engine::new(trading_config(), None).unwrap();
    // "SERVICE" is not a declared item group, so LOOKUP rules consult the
    // partner-group table.
    let entries = engine.resolve(&TransactionType::from("SALES_INVOICE"), "SERVICE", "CUSTOMER");

    assert_eq!(entries[0].side, EntrySide::Debit);
    assert_eq!(entries[0].account_code, "131");
    assert!(entries[0].is_lookup);
    assert_eq!(entries[1].account_code, "13881");
    assert_eq!(entries[2].account_code, "33311");
}

#[test]
fn test_garbled_question_with_embedding_down_defaults() {
    let engine = Engine::new(trading_config(), Some(Box::new(DownEmbedder))).unwrap();
    let outcome = engine.ask("lorem ipsum dolor", "GOODS", "CUSTOMER");

    assert_eq!(outcome.classification.method, RetrievalMethod::Fallback);
    assert_eq!(
        outcome.classification.transaction_type,
        engine.config().default_transaction
    );
    // Resolution still proceeds on the default transaction.
    assert!(!outcome.entries.is_empty());
}

#[test]
fn test_two_turn_follow_up_conversation() {
    let engine = Engine::new(trading_config(), Some(Box::new(StubEmbedder))).unwrap();

    let first = engine.classify("nhập kho mua hàng");
    assert_eq!(first.transaction_type.as_str(), "GRN_PURCHASE");

    let second = engine.classify("còn thuế thì sao");
    assert_eq!(second.transaction_type.as_str(), "GRN_PURCHASE");
    assert_eq!(second.method, RetrievalMethod::FollowUp);
}

#[test]
fn test_retrieve_is_deterministic_across_calls() {
    let engine = Engine::new(trading_config(), Some(Box::new(StubEmbedder))).unwrap();
    let questions = [
        "xuất kho bán hàng",
        "hóa đơn bán hàng ghi nợ 131",
        "khách trả tiền công nợ",
        "lorem ipsum",
    ];
    for question in questions {
        let first = engine.classify(question);
        engine.clear_history();
        let second = engine.classify(question);
        engine.clear_history();
        assert_eq!(first.transaction_type, second.transaction_type, "{}", question);
        assert_eq!(first.method, second.method, "{}", question);
        assert_eq!(first.score, second.score, "{}", question);
    }
}

#[test]
fn test_resolver_priority_ordering_and_purity() {
    let engine = Engine::new(trading_config(), None).unwrap();
    for tag in ["DO_SALE", "SALES_INVOICE", "GRN_PURCHASE", "CASH_IN"] {
        let tx = TransactionType::from(tag);
        let first = engine.resolve(&tx, "GOODS", "CUSTOMER");
        let second = engine.resolve(&tx, "GOODS", "CUSTOMER");
        assert_eq!(first, second, "{} must resolve identically", tag);
        assert!(
            first.windows(2).all(|w| w[0].priority <= w[1].priority),
            "{} entries must be non-decreasing in priority",
            tag
        );
    }
}

#[test]
fn test_negative_keyword_strictly_decreases_score() {
    let engine = Engine::new(trading_config(), None).unwrap();
    let clean = engine.classify("xuất kho giá vốn");
    engine.clear_history();
    let penalized = engine.classify("xuất kho giá vốn hóa đơn");

    let tx = TransactionType::from("DO_SALE");
    assert!(penalized.scores[&tx] < clean.scores[&tx]);
}

#[test]
fn test_disambiguation_precedence_over_raw_scores() {
    let engine = Engine::new(trading_config(), None).unwrap();
    let result = engine.classify("hóa đơn mua hàng của nhà cung cấp");

    // The second rule fires (contains "hóa đơn" and "mua"); the boosted
    // transaction must outrank everything else.
    assert_eq!(result.transaction_type.as_str(), "PURCHASE_INVOICE");
    assert_eq!(result.method, RetrievalMethod::Disambiguation);
    let winner_score = result.scores[&result.transaction_type];
    for (tag, score) in &result.scores {
        if tag != &result.transaction_type {
            assert!(winner_score > *score, "{} must trail the boosted winner", tag);
        }
    }
}

#[test]
fn test_query_expansion_handles_colloquial_phrasing() {
    let engine = Engine::new(trading_config(), None).unwrap();
    let result = engine.classify("khách trả tiền xong chưa nhỉ");

    assert_eq!(result.transaction_type.as_str(), "CASH_IN");
    assert!(result.matched_keywords.contains(&"thu tiền".to_string()));
}

#[test]
fn test_rendered_entries_match_catalog() {
    let engine = Engine::new(trading_config(), None).unwrap();
    let entries = engine.resolve(&TransactionType::from("GRN_PURCHASE"), "GOODS", "VENDOR");
    let lines = engine.describe_entries(&entries);

    assert_eq!(lines[0], "Nợ TK 156: Hàng hóa (*)");
    assert_eq!(lines[1], "Có TK 33881: Phải trả tạm");
}

#[test]
fn test_config_round_trips_through_file() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join("journal_engine_rules.json");
    std::fs::write(&path, serde_json::to_string_pretty(&trading_config())?)?;

    let loaded = EngineConfig::from_file(&path)?;
    std::fs::remove_file(&path).ok();

    let engine = Engine::new(loaded, None)?;
    let outcome = engine.ask("xuất kho bán hàng giá vốn 5 triệu", "GOODS", "CUSTOMER");
    assert_eq!(outcome.classification.transaction_type.as_str(), "DO_SALE");
    Ok(())
}

#[test]
fn test_history_is_bounded() {
    let engine = Engine::new(trading_config(), None).unwrap();
    for i in 0..10 {
        engine.classify(&format!("xuất kho lần {}", i));
    }
    assert_eq!(engine.history_len(), 5);
}
