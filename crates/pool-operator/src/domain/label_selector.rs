//! Node label selector parsing and matching.

use core::error::Error;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use error_stack::Report;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum LabelSelectorError {
    #[display("unsupported operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },
    #[display("operator {operator} for key {key:?} requires at least one value")]
    MissingValues { key: String, operator: String },
    #[display("operator {operator} for key {key:?} must not have values")]
    UnexpectedValues { key: String, operator: String },
    #[display("empty label key")]
    EmptyKey,
}

impl Error for LabelSelectorError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => labels.get(key).map_or(true, |v| !values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// A validated [`LabelSelector`]. All requirements must hold for a match; an
/// empty selector matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSelector {
    requirements: Vec<Requirement>,
}

impl NodeSelector {
    pub fn parse(selector: &LabelSelector) -> Result<Self, Report<LabelSelectorError>> {
        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            if key.is_empty() {
                return Err(Report::new(LabelSelectorError::EmptyKey));
            }
            requirements.push(Requirement::Equals(key.clone(), value.clone()));
        }

        for expr in selector.match_expressions.iter().flatten() {
            if expr.key.is_empty() {
                return Err(Report::new(LabelSelectorError::EmptyKey));
            }
            let key = expr.key.clone();
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(Report::new(LabelSelectorError::MissingValues {
                        key,
                        operator: expr.operator.clone(),
                    }))
                }
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(Report::new(LabelSelectorError::UnexpectedValues {
                        key,
                        operator: expr.operator.clone(),
                    }))
                }
                "In" => Requirement::In(key, values),
                "NotIn" => Requirement::NotIn(key, values),
                "Exists" => Requirement::Exists(key),
                "DoesNotExist" => Requirement::DoesNotExist(key),
                other => {
                    return Err(Report::new(LabelSelectorError::UnknownOperator {
                        key,
                        operator: other.to_string(),
                    }))
                }
            };
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use similar_asserts::assert_eq;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expression(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: (!values.is_empty()).then(|| values.iter().map(|v| v.to_string()).collect()),
        }
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = NodeSelector::parse(&LabelSelector::default()).expect("should parse");
        assert!(selector.matches(&BTreeMap::new()));
        assert!(selector.matches(&labels(&[("gpu", "a100")])));
    }

    #[test]
    fn match_labels_and_expressions_are_anded() {
        let selector = NodeSelector::parse(&LabelSelector {
            match_labels: Some(labels(&[("pool", "training")])),
            match_expressions: Some(vec![
                expression("gpu", "In", &["a100", "h100"]),
                expression("cordoned", "DoesNotExist", &[]),
                expression("zone", "NotIn", &["edge"]),
                expression("nvidia.com/mig.capable", "Exists", &[]),
            ]),
        })
        .expect("should parse");

        assert!(selector.matches(&labels(&[
            ("pool", "training"),
            ("gpu", "h100"),
            ("nvidia.com/mig.capable", "true"),
        ])));
        assert!(!selector.matches(&labels(&[
            ("pool", "training"),
            ("gpu", "t4"),
            ("nvidia.com/mig.capable", "true"),
        ])));
        assert!(!selector.matches(&labels(&[
            ("pool", "training"),
            ("gpu", "a100"),
            ("nvidia.com/mig.capable", "true"),
            ("cordoned", "yes"),
        ])));
        assert!(!selector.matches(&labels(&[
            ("pool", "training"),
            ("gpu", "a100"),
            ("zone", "edge"),
            ("nvidia.com/mig.capable", "true"),
        ])));
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        let cases = [
            (
                expression("gpu", "Like", &["a100"]),
                LabelSelectorError::UnknownOperator {
                    key: "gpu".to_string(),
                    operator: "Like".to_string(),
                },
            ),
            (
                expression("gpu", "In", &[]),
                LabelSelectorError::MissingValues {
                    key: "gpu".to_string(),
                    operator: "In".to_string(),
                },
            ),
            (
                expression("gpu", "Exists", &["a100"]),
                LabelSelectorError::UnexpectedValues {
                    key: "gpu".to_string(),
                    operator: "Exists".to_string(),
                },
            ),
            (expression("", "Exists", &[]), LabelSelectorError::EmptyKey),
        ];

        for (expr, expected) in cases {
            let err = NodeSelector::parse(&LabelSelector {
                match_labels: None,
                match_expressions: Some(vec![expr]),
            })
            .expect_err("should reject invalid expression");
            assert_eq!(err.current_context(), &expected);
        }
    }
}
