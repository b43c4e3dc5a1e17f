//! Label selectors in the usual `kubectl -l` syntax.

use std::collections::BTreeMap;
use std::fmt;

use kube::core::DynamicObject;

use crate::InformerError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
            Requirement::In(k, vs) => labels.get(k).is_some_and(|v| vs.contains(v)),
            Requirement::NotIn(k, vs) => labels.get(k).map_or(true, |v| !vs.contains(v)),
        }
    }
}

/// Conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    /// Parse `k=v`, `k==v`, `k!=v`, `k`, `!k`, `k in (a,b)` and `k notin (a,b)`,
    /// separated by commas.
    pub fn parse(selector: &str) -> Result<Self, InformerError> {
        let invalid = |reason: &str| InformerError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };
        let mut requirements = Vec::new();
        for term in split_terms(selector).map_err(|r| invalid(r))? {
            let term = term.trim();
            if term.is_empty() {
                if selector.trim().is_empty() {
                    continue;
                }
                return Err(invalid("empty requirement"));
            }
            requirements.push(parse_term(term).map_err(|r| invalid(r))?);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn matches_object(&self, obj: &DynamicObject) -> bool {
        if self.is_empty() {
            return true;
        }
        match &obj.metadata.labels {
            Some(labels) => self.matches(labels),
            None => self.matches(&BTreeMap::new()),
        }
    }
}

/// Split on commas that are not inside a value list.
fn split_terms(s: &str) -> Result<Vec<&str>, &'static str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or("unbalanced ')'")?,
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unterminated value list");
    }
    out.push(&s[start..]);
    Ok(out)
}

fn parse_term(term: &str) -> Result<Requirement, &'static str> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(label_key(key)?));
    }
    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(label_key(k)?, v.trim().to_string()));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(label_key(k)?, v.trim().to_string()));
    }
    let words: Vec<&str> = term.splitn(2, char::is_whitespace).collect();
    if let [key, rest] = words.as_slice() {
        let rest = rest.trim_start();
        if let Some(list) = rest.strip_prefix("notin") {
            return Ok(Requirement::NotIn(label_key(key)?, value_list(list)?));
        }
        if let Some(list) = rest.strip_prefix("in") {
            return Ok(Requirement::In(label_key(key)?, value_list(list)?));
        }
        return Err("expected 'in' or 'notin' after key");
    }
    Ok(Requirement::Exists(label_key(term)?))
}

fn label_key(k: &str) -> Result<String, &'static str> {
    let k = k.trim();
    if k.is_empty() || k.contains(char::is_whitespace) {
        return Err("invalid label key");
    }
    Ok(k.to_string())
}

fn value_list(s: &str) -> Result<Vec<String>, &'static str> {
    let inner = s
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or("expected parenthesized value list")?;
    Ok(inner.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect())
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match r {
                Requirement::Equals(k, v) => write!(f, "{k}={v}")?,
                Requirement::NotEquals(k, v) => write!(f, "{k}!={v}")?,
                Requirement::Exists(k) => f.write_str(k)?,
                Requirement::NotExists(k) => write!(f, "!{k}")?,
                Requirement::In(k, vs) => write!(f, "{k} in ({})", vs.join(","))?,
                Requirement::NotIn(k, vs) => write!(f, "{k} notin ({})", vs.join(","))?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for LabelSelector {
    type Err = InformerError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn equality_and_existence() {
        let l = labels(&[("app", "web"), ("tier", "frontend")]);
        assert!(LabelSelector::parse("app=web").unwrap().matches(&l));
        assert!(LabelSelector::parse("app==web,tier").unwrap().matches(&l));
        assert!(!LabelSelector::parse("app!=web").unwrap().matches(&l));
        assert!(LabelSelector::parse("!canary").unwrap().matches(&l));
        assert!(!LabelSelector::parse("tier,!app").unwrap().matches(&l));
    }

    #[test]
    fn set_based_requirements() {
        let l = labels(&[("env", "prod")]);
        let s = LabelSelector::parse("env in (prod, staging),tier notin (db)").unwrap();
        assert!(s.matches(&l));
        assert!(!LabelSelector::parse("env notin (prod)").unwrap().matches(&l));
        assert!(!LabelSelector::parse("zone in (a)").unwrap().matches(&l));
        assert_eq!(s.to_string(), "env in (prod,staging),tier notin (db)");
    }

    #[test]
    fn empty_selector_matches_everything() {
        let s = LabelSelector::parse("").unwrap();
        assert!(s.is_empty());
        assert!(s.matches(&labels(&[])));
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in ["app in prod", "env in (a", "a,,b", "app web", "=x"] {
            assert!(LabelSelector::parse(bad).is_err(), "{bad:?}");
        }
    }
}
