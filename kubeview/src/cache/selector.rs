//! Label selectors evaluated against cached objects

use crate::Error;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::{BTreeMap, BTreeSet};

/// A conjunction of label requirements
///
/// The empty selector matches every object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(Vec<Requirement>);

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

// === impl Selector ===

impl Selector {
    /// Matches every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Matches objects carrying every given label
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        Self(
            labels
                .iter()
                .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Matches objects carrying `key=value`
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![Requirement::Equals(key.into(), value.into())])
    }

    /// Adds the requirements of `other` to this selector
    pub fn and(mut self, other: Selector) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the textual selector syntax, e.g. `app=web,tier!=db,env in (a,b),!legacy`
    pub fn parse(s: &str) -> Result<Self, Error> {
        split_top_level(s)
            .into_iter()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Returns true if the labels satisfy every requirement
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.0.iter().all(|r| r.matches(labels))
    }
}

impl TryFrom<&metav1::LabelSelector> for Selector {
    type Error = Error;

    fn try_from(sel: &metav1::LabelSelector) -> Result<Self, Error> {
        let mut reqs = sel
            .match_labels
            .as_ref()
            .map(|labels| Self::from_labels(labels).0)
            .unwrap_or_default();

        for expr in sel.match_expressions.iter().flatten() {
            let key = expr.key.clone();
            let values = || {
                expr.values
                    .iter()
                    .flatten()
                    .cloned()
                    .collect::<BTreeSet<_>>()
            };
            let req = match expr.operator.as_str() {
                "In" => Requirement::In(key, values()),
                "NotIn" => Requirement::NotIn(key, values()),
                "Exists" => Requirement::Exists(key),
                "DoesNotExist" => Requirement::DoesNotExist(key),
                op => {
                    return Err(Error::BadRequest(format!(
                        "unsupported label selector operator {op:?}"
                    )))
                }
            };
            reqs.push(req);
        }

        Ok(Self(reqs))
    }
}

// === impl Requirement ===

impl Requirement {
    fn parse(term: &str) -> Result<Self, Error> {
        let invalid = || Error::BadRequest(format!("invalid label selector {term:?}"));

        if let Some(key) = term.strip_prefix('!') {
            return Ok(Self::DoesNotExist(valid_key(key.trim()).ok_or_else(invalid)?));
        }
        if let Some((k, v)) = term.split_once("!=") {
            let key = valid_key(k.trim()).ok_or_else(invalid)?;
            return Ok(Self::NotEquals(key, v.trim().to_string()));
        }
        if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
            let key = valid_key(k.trim()).ok_or_else(invalid)?;
            return Ok(Self::Equals(key, v.trim().to_string()));
        }

        let mut words = term.splitn(2, char::is_whitespace);
        let key = valid_key(words.next().unwrap_or_default()).ok_or_else(invalid)?;
        let rest = match words.next().map(str::trim) {
            None => return Ok(Self::Exists(key)),
            Some(rest) => rest,
        };
        let (op, set) = rest
            .split_once(char::is_whitespace)
            .map(|(op, set)| (op, set.trim()))
            .or_else(|| rest.find('(').map(|i| (rest[..i].trim(), &rest[i..])))
            .ok_or_else(invalid)?;
        let values = set
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(invalid)?
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        match op {
            "in" => Ok(Self::In(key, values)),
            "notin" => Ok(Self::NotIn(key, values)),
            _ => Err(invalid()),
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::In(k, vs) => labels.get(k).is_some_and(|v| vs.contains(v)),
            Self::NotIn(k, vs) => labels.get(k).is_none_or(|v| !vs.contains(v)),
            Self::Exists(k) => labels.contains_key(k),
            Self::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

fn valid_key(key: &str) -> Option<String> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    ok.then(|| key.to_string())
}

/// Splits on commas that are not inside a parenthesized value set
fn split_top_level(s: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&s[start..]);
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn parses_and_matches() {
        let sel =
            Selector::parse("app=web, tier!=db, env in (prod, staging), !legacy, team").unwrap();
        let labels = btreemap! {
            "app".to_string() => "web".to_string(),
            "env".to_string() => "prod".to_string(),
            "team".to_string() => "core".to_string(),
        };
        assert!(sel.matches(Some(&labels)));

        let mut legacy = labels.clone();
        legacy.insert("legacy".to_string(), "true".to_string());
        assert!(!sel.matches(Some(&legacy)));

        let mut dev = labels;
        dev.insert("env".to_string(), "dev".to_string());
        assert!(!sel.matches(Some(&dev)));
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = Selector::parse("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(None));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Selector::parse("env in prod"),
            Err(Error::BadRequest(_))
        ));
        assert!(Selector::parse("a b (c)").is_err());
    }

    #[test]
    fn converts_label_selectors() {
        let sel = metav1::LabelSelector {
            match_labels: Some(btreemap! { "app".to_string() => "web".to_string() }),
            match_expressions: Some(vec![metav1::LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["db".to_string()]),
            }]),
        };
        let sel = Selector::try_from(&sel).unwrap();
        assert!(sel.matches(Some(&btreemap! { "app".to_string() => "web".to_string() })));
        assert!(!sel.matches(Some(&btreemap! {
            "app".to_string() => "web".to_string(),
            "tier".to_string() => "db".to_string(),
        })));
    }
}
