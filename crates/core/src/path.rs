//! Property paths: `a.b[0]`, `a[*].b`, `["key.with.dots"]`.

use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

use crate::error::PathParseError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathComponent {
    Key(String),
    Index(usize),
    /// Matches every element of an array.
    Wildcard,
}

impl From<&str> for PathComponent {
    fn from(k: &str) -> Self { Self::Key(k.to_string()) }
}

impl From<usize> for PathComponent {
    fn from(i: usize) -> Self { Self::Index(i) }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PropertyPath(SmallVec<[PathComponent; 4]>);

impl PropertyPath {
    pub fn root() -> Self { Self::default() }

    pub fn components(&self) -> &[PathComponent] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn push(&mut self, c: impl Into<PathComponent>) { self.0.push(c.into()); }
    pub fn pop(&mut self) -> Option<PathComponent> { self.0.pop() }

    /// Copy of this path extended by one component.
    pub fn child(&self, c: impl Into<PathComponent>) -> Self {
        let mut next = self.clone();
        next.push(c);
        next
    }

    /// Every node of a plain JSON tree this path reaches. Wildcards fan out,
    /// so the result may hold more than one value; a miss yields none.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for c in self.components() {
            current = current
                .into_iter()
                .flat_map(|v| -> Vec<&'a Value> {
                    match (c, v) {
                        (PathComponent::Key(k), Value::Object(map)) => map.get(k).into_iter().collect(),
                        (PathComponent::Index(i), Value::Array(items)) => items.get(*i).into_iter().collect(),
                        (PathComponent::Wildcard, Value::Array(items)) => items.iter().collect(),
                        _ => Vec::new(),
                    }
                })
                .collect();
        }
        current
    }

    /// Strict parse; rejects empty keys, dangling dots and unterminated brackets.
    pub fn parse(s: &str) -> Result<Self, PathParseError> {
        let chars: Vec<char> = s.chars().collect();
        if chars.is_empty() {
            return Err(PathParseError::new(s, 0, "empty path"));
        }
        let mut out = SmallVec::new();
        let mut i = 0usize;
        loop {
            if chars[i] == '[' {
                let (comp, next) = parse_bracket(s, &chars, i)?;
                out.push(comp);
                i = next;
            } else {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' { i += 1; }
                if i == start {
                    return Err(PathParseError::new(s, start, "expected a property name"));
                }
                out.push(PathComponent::Key(chars[start..i].iter().collect()));
            }
            if i == chars.len() { break; }
            match chars[i] {
                '.' => {
                    i += 1;
                    if i == chars.len() || chars[i] == '.' || chars[i] == '[' {
                        return Err(PathParseError::new(s, i, "expected a property name after '.'"));
                    }
                }
                '[' => {}
                _ => return Err(PathParseError::new(s, i, "expected '.' or '[' after ']'")),
            }
        }
        Ok(Self(out))
    }
}

fn parse_bracket(s: &str, chars: &[char], open: usize) -> Result<(PathComponent, usize), PathParseError> {
    let mut i = open + 1;
    match chars.get(i) {
        Some('*') => {
            if chars.get(i + 1) != Some(&']') {
                return Err(PathParseError::new(s, i + 1, "expected ']' after '*'"));
            }
            Ok((PathComponent::Wildcard, i + 2))
        }
        Some(c) if c.is_ascii_digit() => {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() { i += 1; }
            if chars.get(i) != Some(&']') {
                return Err(PathParseError::new(s, i, "expected ']' after array index"));
            }
            let digits: String = chars[start..i].iter().collect();
            let idx = digits
                .parse::<usize>()
                .map_err(|_| PathParseError::new(s, start, "array index out of range"))?;
            Ok((PathComponent::Index(idx), i + 1))
        }
        Some('"') => {
            i += 1;
            let mut key = String::new();
            loop {
                match chars.get(i) {
                    None => return Err(PathParseError::new(s, i, "unterminated quoted key")),
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some(c @ ('"' | '\\')) => key.push(*c),
                            _ => return Err(PathParseError::new(s, i, "invalid escape in quoted key")),
                        }
                        i += 2;
                    }
                    Some('"') => { i += 1; break; }
                    Some(c) => { key.push(*c); i += 1; }
                }
            }
            if chars.get(i) != Some(&']') {
                return Err(PathParseError::new(s, i, "expected ']' after quoted key"));
            }
            Ok((PathComponent::Key(key), i + 1))
        }
        _ => Err(PathParseError::new(s, i, "expected index, '*' or quoted key after '['")),
    }
}

fn is_plain_key(k: &str) -> bool {
    !k.is_empty() && !k.contains(&['.', '[', ']', '"', '\\'][..])
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, c) in self.0.iter().enumerate() {
            match c {
                PathComponent::Key(k) if is_plain_key(k) => {
                    if n > 0 { f.write_str(".")?; }
                    f.write_str(k)?;
                }
                PathComponent::Key(k) => {
                    let escaped = k.replace('\\', "\\\\").replace('"', "\\\"");
                    write!(f, "[\"{}\"]", escaped)?;
                }
                PathComponent::Index(i) => write!(f, "[{}]", i)?,
                PathComponent::Wildcard => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for PropertyPath {
    type Err = PathParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl<C: Into<PathComponent>> FromIterator<C> for PropertyPath {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_indices_and_wildcards() {
        let p = PropertyPath::parse("spec.containers[0].ports[*].name").unwrap();
        assert_eq!(
            p.components(),
            &[
                PathComponent::from("spec"),
                PathComponent::from("containers"),
                PathComponent::Index(0),
                PathComponent::from("ports"),
                PathComponent::Wildcard,
                PathComponent::from("name"),
            ]
        );
        assert_eq!(p.to_string(), "spec.containers[0].ports[*].name");
    }

    #[test]
    fn quoted_keys_round_trip_through_display() {
        let p = PropertyPath::parse(r#"metadata.annotations["app.kubernetes.io/name"]"#).unwrap();
        assert_eq!(p.components()[2], PathComponent::from("app.kubernetes.io/name"));
        assert_eq!(p.to_string(), r#"metadata.annotations["app.kubernetes.io/name"]"#);
        assert_eq!(PropertyPath::parse(&p.to_string()).unwrap(), p);
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", ".a", "a.", "a..b", "a[", "a[x]", "a[0", "a[0]b", r#"a["x]"#, "a.[0]"] {
            assert!(PropertyPath::parse(bad).is_err(), "expected error for {:?}", bad);
        }
    }

    #[test]
    fn select_walks_plain_json() {
        let doc = serde_json::json!({
            "status": {"conditions": [{"type": "Ready", "status": "True"}, {"type": "Synced", "status": "False"}]},
        });
        let first = PropertyPath::parse("status.conditions[0].type").unwrap();
        assert_eq!(first.select(&doc), vec![&serde_json::json!("Ready")]);
        let all = PropertyPath::parse("status.conditions[*].status").unwrap();
        assert_eq!(all.select(&doc).len(), 2);
        assert!(PropertyPath::parse("status.phase").unwrap().select(&doc).is_empty());
        assert!(PropertyPath::parse("status[0]").unwrap().select(&doc).is_empty());
    }

    #[test]
    fn leading_bracket_is_allowed() {
        let p = PropertyPath::parse("[1].a").unwrap();
        assert_eq!(p.components(), &[PathComponent::Index(1), PathComponent::from("a")]);
    }
}
