use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Transaction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    StartsWith,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
}

/// Decides which newly added transactions are worth an alert.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    rules: Vec<(FilterRule, Option<Regex>)>,
    min_amount: Option<f64>,
}

fn matches(description: &str, rule: &FilterRule, compiled: Option<&Regex>) -> bool {
    let desc_upper = description.to_uppercase();
    let pat_upper = rule.pattern.to_uppercase();
    match rule.match_type {
        MatchType::Contains => desc_upper.contains(&pat_upper),
        MatchType::StartsWith => desc_upper.starts_with(&pat_upper),
        MatchType::Regex => compiled.is_some_and(|re| re.is_match(description)),
    }
}

impl NotificationFilter {
    pub fn new(rules: Vec<FilterRule>, min_amount: Option<f64>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let compiled = match rule.match_type {
                    MatchType::Regex => RegexBuilder::new(&rule.pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| warn!(pattern = %rule.pattern, error = %e, "ignoring invalid regex rule"))
                        .ok(),
                    _ => None,
                };
                (rule, compiled)
            })
            .collect();
        Self { rules, min_amount }
    }

    pub fn matches(&self, txn: &Transaction) -> bool {
        if let Some(min) = self.min_amount {
            if txn.amount.abs() < min {
                return false;
            }
        }
        self.rules.is_empty()
            || self
                .rules
                .iter()
                .any(|(rule, compiled)| matches(&txn.description, rule, compiled.as_ref()))
    }

    pub fn select(&self, records: &[Transaction]) -> Vec<Transaction> {
        records.iter().filter(|t| self.matches(t)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionStatus;

    fn txn(description: &str, amount: f64) -> Transaction {
        Transaction {
            account_id: "acc-1".into(),
            transaction_id: description.into(),
            internal_transaction_id: None,
            institution_id: None,
            iban: None,
            date: "2024-01-15".into(),
            description: description.into(),
            amount,
            currency: Some("EUR".into()),
            status: TransactionStatus::Booked,
            raw: serde_json::Value::Null,
        }
    }

    fn rule(pattern: &str, match_type: MatchType) -> FilterRule {
        FilterRule { pattern: pattern.into(), match_type }
    }

    #[test]
    fn test_no_rules_matches_everything() {
        let filter = NotificationFilter::default();
        assert!(filter.matches(&txn("ANYTHING", -1.0)));
    }

    #[test]
    fn test_contains_rule() {
        let filter = NotificationFilter::new(vec![rule("adobe", MatchType::Contains)], None);
        assert!(filter.matches(&txn("ADOBE CREATIVE CLOUD", -50.0)));
        assert!(!filter.matches(&txn("SPOTIFY", -10.0)));
    }

    #[test]
    fn test_starts_with_rule() {
        let filter = NotificationFilter::new(vec![rule("STRIPE", MatchType::StartsWith)], None);
        let selected = filter.select(&[txn("STRIPE PAYMENT", 10.0), txn("PAY STRIPE FEE", -1.0)]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].description, "STRIPE PAYMENT");
    }

    #[test]
    fn test_regex_rule_is_case_insensitive() {
        let filter = NotificationFilter::new(vec![rule(r"^aws.*\d+$", MatchType::Regex)], None);
        assert!(filter.matches(&txn("AWS Services 12345", -20.0)));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        let filter = NotificationFilter::new(vec![rule("([", MatchType::Regex)], None);
        assert!(!filter.matches(&txn("([", -1.0)));
    }

    #[test]
    fn test_min_amount_applies_to_absolute_value() {
        let filter = NotificationFilter::new(Vec::new(), Some(100.0));
        assert!(filter.matches(&txn("Rent", -1200.0)));
        assert!(filter.matches(&txn("Salary", 100.0)));
        assert!(!filter.matches(&txn("Coffee", -3.5)));
    }
}
