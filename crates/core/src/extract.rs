//! Strongly typed extraction with provenance.
//!
//! [`extract`] decodes a property map into any `DeserializeOwned` target and
//! reports whether the data the target actually consumed was unknown, secret,
//! or derived from other resources. Properties the target does not declare
//! never influence the summary.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::de::{PlainDeserializer, Recorder};
use crate::decode::decode;
use crate::error::ExtractError;
use crate::traverse::traverse_map;
use crate::value::{PropertyMap, PropertyValue, Urn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Fail with [`ExtractError::ContainsUnknowns`] when any consumed value is unknown.
    pub reject_unknowns: bool,
}

impl ExtractOptions {
    pub fn reject_unknowns() -> Self { Self { reject_unknowns: true } }
}

/// Summary of the annotations found along consumed paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractResult {
    /// Resources the extracted data depends on, known or not.
    pub dependencies: BTreeSet<Urn>,
    pub contains_unknowns: bool,
    pub contains_secrets: bool,
}

impl ExtractResult {
    fn observe(&mut self, v: &PropertyValue) {
        match v {
            PropertyValue::Computed(_) => self.contains_unknowns = true,
            PropertyValue::Output(o) => {
                self.dependencies.extend(o.dependencies.iter().cloned());
                self.contains_unknowns |= !o.known;
                self.contains_secrets |= o.secret;
            }
            PropertyValue::Secret(_) => self.contains_secrets = true,
            _ => {}
        }
    }
}

/// Decode `props` into `T` and summarize the provenance of what `T` used.
///
/// Unknown values arrive as zero values (or `None` for `Option` fields).
/// Fields absent from the map follow the target's serde defaults, so targets
/// usually carry `#[serde(default)]`. Serde attributes control property names.
pub fn extract<T: DeserializeOwned>(
    props: &PropertyMap,
    opts: &ExtractOptions,
) -> Result<(T, ExtractResult), ExtractError> {
    let plain = Value::Object(decode(props)?);
    let recorder = Recorder::default();
    let target = T::deserialize(PlainDeserializer::root(&plain, &recorder))?;

    let used = recorder.into_paths();
    let mut result = ExtractResult::default();
    for path in &used {
        traverse_map(props, path, |v| result.observe(v));
    }
    debug!(
        paths = used.len(),
        unknowns = result.contains_unknowns,
        secrets = result.contains_secrets,
        dependencies = result.dependencies.len(),
        "extracted properties"
    );

    if opts.reject_unknowns && result.contains_unknowns {
        return Err(ExtractError::ContainsUnknowns { dependencies: result.dependencies });
    }
    Ok((target, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    const RES1: &str = "urn:ksync:test::test::kubernetes:core/v1:Namespace::some-namespace";

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Nested {
        string: String,
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Required {
        number: i64,
        numbers: Vec<i64>,
        #[serde(rename = "struct")]
        nested: Nested,
        structs: Vec<Nested>,
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Optional {
        number: Option<i64>,
        numbers: Vec<Option<i64>>,
        #[serde(rename = "struct")]
        nested: Option<Nested>,
        structs: Vec<Option<Nested>>,
    }

    fn props(entries: Vec<(&str, PropertyValue)>) -> PropertyMap {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn num(n: f64) -> PropertyValue { PropertyValue::Number(n) }
    fn output(element: PropertyValue, known: bool, secret: bool) -> PropertyValue {
        if known {
            PropertyValue::known_output(element, secret, [Urn::from(RES1)])
        } else {
            PropertyValue::unknown_output(secret, [Urn::from(RES1)])
        }
    }

    fn summary(unknowns: bool, secrets: bool, deps: &[&str]) -> ExtractResult {
        ExtractResult {
            dependencies: deps.iter().map(|d| Urn::from(*d)).collect(),
            contains_unknowns: unknowns,
            contains_secrets: secrets,
        }
    }

    fn run<T: DeserializeOwned>(p: PropertyMap) -> (T, ExtractResult) {
        extract(&p, &ExtractOptions::default()).unwrap()
    }

    #[test]
    fn reject_unknowns_reports_dependencies() {
        let p = props(vec![("number", output(num(42.0), false, false))]);
        let err = extract::<Required>(&p, &ExtractOptions::reject_unknowns()).unwrap_err();
        assert!(err.is_contains_unknowns());
        let want: BTreeSet<Urn> = [Urn::from(RES1)].into_iter().collect();
        assert_eq!(err.dependencies(), Some(&want));
    }

    #[test]
    fn plain_and_null_values() {
        let (r, s) = run::<Required>(props(vec![("number", PropertyValue::Null)]));
        assert_eq!(r, Required::default());
        assert_eq!(s, summary(false, false, &[]));

        let (o, s) = run::<Optional>(props(vec![("number", PropertyValue::Null)]));
        assert_eq!(o.number, None);
        assert_eq!(s, summary(false, false, &[]));

        let (r, s) = run::<Required>(props(vec![("number", num(42.0))]));
        assert_eq!(r.number, 42);
        assert_eq!(s, summary(false, false, &[]));
    }

    #[test]
    fn secrets_and_computed_values() {
        let (r, s) = run::<Required>(props(vec![("number", PropertyValue::secret(num(42.0)))]));
        assert_eq!(r.number, 42);
        assert_eq!(s, summary(false, true, &[]));

        let byzantine = PropertyValue::secret(PropertyValue::computed(num(42.0)));
        let (r, s) = run::<Required>(props(vec![("number", byzantine)]));
        assert_eq!(r.number, 0);
        assert_eq!(s, summary(true, true, &[]));

        let (r, s) = run::<Required>(props(vec![("number", PropertyValue::computed(num(42.0)))]));
        assert_eq!(r.number, 0);
        assert_eq!(s, summary(true, false, &[]));

        let (o, s) = run::<Optional>(props(vec![("number", PropertyValue::computed(num(42.0)))]));
        assert_eq!(o.number, None);
        assert_eq!(s, summary(true, false, &[]));
    }

    #[test]
    fn outputs_carry_dependencies() {
        let cases = [
            (false, false, 0, summary(true, false, &[RES1])),
            (false, true, 0, summary(true, true, &[RES1])),
            (true, false, 42, summary(false, false, &[RES1])),
            (true, true, 42, summary(false, true, &[RES1])),
        ];
        for (known, secret, want, expected) in cases {
            let (r, s) = run::<Required>(props(vec![("number", output(num(42.0), known, secret))]));
            assert_eq!(r.number, want, "known={known} secret={secret}");
            assert_eq!(s, expected, "known={known} secret={secret}");
        }

        let byzantine = output(PropertyValue::secret(num(42.0)), true, false);
        let (r, s) = run::<Required>(props(vec![("number", byzantine)]));
        assert_eq!(r.number, 42);
        assert_eq!(s, summary(false, true, &[RES1]));
    }

    #[test]
    fn arrays() {
        let (r, s) = run::<Required>(props(vec![("numbers", PropertyValue::Null)]));
        assert!(r.numbers.is_empty());
        assert_eq!(s, summary(false, false, &[]));

        let (r, s) = run::<Required>(props(vec![("numbers", PropertyValue::computed(PropertyValue::Array(vec![])))]));
        assert!(r.numbers.is_empty());
        assert_eq!(s, summary(true, false, &[]));

        let (r, s) = run::<Required>(props(vec![("numbers", PropertyValue::secret(PropertyValue::Array(vec![num(42.0)])))]));
        assert_eq!(r.numbers, vec![42]);
        assert_eq!(s, summary(false, true, &[]));

        let (r, s) = run::<Required>(props(vec![("numbers", PropertyValue::Array(vec![PropertyValue::Null]))]));
        assert_eq!(r.numbers, vec![0]);
        assert_eq!(s, summary(false, false, &[]));

        let (r, _) = run::<Required>(props(vec![("numbers", PropertyValue::Array(vec![num(42.0)]))]));
        assert_eq!(r.numbers, vec![42]);

        let (o, s) = run::<Optional>(props(vec![("numbers", PropertyValue::Array(vec![num(42.0)]))]));
        assert_eq!(o.numbers, vec![Some(42)]);
        assert_eq!(s, summary(false, false, &[]));

        let (r, s) = run::<Required>(props(vec![(
            "numbers",
            PropertyValue::Array(vec![PropertyValue::computed(num(42.0))]),
        )]));
        assert_eq!(r.numbers, vec![0]);
        assert_eq!(s, summary(true, false, &[]));
    }

    #[test]
    fn array_elements_of_struct_type() {
        let secret = PropertyValue::object([("string", PropertyValue::secret("foo".into()))]);
        let (r, s) = run::<Required>(props(vec![("structs", PropertyValue::Array(vec![secret]))]));
        assert_eq!(r.structs, vec![Nested { string: "foo".into() }]);
        assert_eq!(s, summary(false, true, &[]));

        let computed = PropertyValue::object([("string", PropertyValue::computed("foo".into()))]);
        let (r, s) = run::<Required>(props(vec![("structs", PropertyValue::Array(vec![computed]))]));
        assert_eq!(r.structs, vec![Nested::default()]);
        assert_eq!(s, summary(true, false, &[]));
    }

    #[test]
    fn objects() {
        let (r, s) = run::<Required>(props(vec![("struct", PropertyValue::Null)]));
        assert_eq!(r.nested, Nested::default());
        assert_eq!(s, summary(false, false, &[]));

        let (o, s) = run::<Optional>(props(vec![("struct", PropertyValue::Null)]));
        assert_eq!(o.nested, None);
        assert_eq!(s, summary(false, false, &[]));

        let empty = || PropertyValue::Object(PropertyMap::new());
        let (r, s) = run::<Required>(props(vec![("struct", empty())]));
        assert_eq!(r.nested, Nested::default());
        assert_eq!(s, summary(false, false, &[]));

        let (r, s) = run::<Required>(props(vec![("struct", PropertyValue::computed(empty()))]));
        assert_eq!(r.nested, Nested::default());
        assert_eq!(s, summary(true, false, &[]));

        let (r, s) = run::<Required>(props(vec![("struct", PropertyValue::secret(empty()))]));
        assert_eq!(r.nested, Nested::default());
        assert_eq!(s, summary(false, true, &[]));

        let obj = PropertyValue::object([("string", PropertyValue::string("foo"))]);
        let (r, s) = run::<Required>(props(vec![("struct", obj)]));
        assert_eq!(r.nested.string, "foo");
        assert_eq!(s, summary(false, false, &[]));
    }

    #[test]
    fn undeclared_properties_do_not_count() {
        let obj = PropertyValue::object([
            ("string", PropertyValue::string("foo")),
            ("ignored", PropertyValue::computed("".into())),
        ]);
        let (r, s) = run::<Required>(props(vec![("struct", obj)]));
        assert_eq!(r.nested.string, "foo");
        assert_eq!(s, summary(false, false, &[]));

        for ignored in [
            PropertyValue::computed("".into()),
            output("ignored".into(), false, false),
            PropertyValue::secret("foo".into()),
        ] {
            let (r, s) = run::<Required>(props(vec![("number", num(42.0)), ("ignored", ignored)]));
            assert_eq!(r.number, 42);
            assert_eq!(s, summary(false, false, &[]));
        }
    }

    #[test]
    fn map_targets_consume_every_key() {
        let p = props(vec![
            ("a", PropertyValue::string("x")),
            ("b", PropertyValue::secret("y".into())),
        ]);
        let (m, s) = run::<BTreeMap<String, String>>(p);
        assert_eq!(m.get("b").map(String::as_str), Some("y"));
        assert_eq!(s, summary(false, true, &[]));
    }

    #[test]
    fn type_mismatch_is_a_deserialize_error() {
        let p = props(vec![("number", PropertyValue::string("forty-two"))]);
        let err = extract::<Required>(&p, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, ExtractError::Deserialize(_)));
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    enum Policy {
        #[default]
        Always,
        Never,
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Spec {
        policy: Policy,
        replicas: i64,
    }

    #[test]
    fn unknown_enums_take_their_first_variant() {
        let p = props(vec![("policy", PropertyValue::computed("Never".into())), ("replicas", num(3.0))]);
        let (spec, s) = run::<Spec>(p);
        assert_eq!(spec, Spec { policy: Policy::Always, replicas: 3 });
        assert_eq!(s, summary(true, false, &[]));

        let p = props(vec![("policy", PropertyValue::string("Never")), ("replicas", num(3.0))]);
        assert_eq!(run::<Spec>(p).0.policy, Policy::Never);
    }

    #[test]
    fn unknown_enums_are_rejected_as_unknowns() {
        let p = props(vec![("policy", output(PropertyValue::Null, false, false)), ("replicas", num(3.0))]);
        let err = extract::<Spec>(&p, &ExtractOptions::reject_unknowns()).unwrap_err();
        assert!(err.is_contains_unknowns(), "{err}");
        let want: BTreeSet<Urn> = [Urn::from(RES1)].into_iter().collect();
        assert_eq!(err.dependencies(), Some(&want));
    }

    #[test]
    fn fractional_numbers_do_not_fill_integers() {
        let p = props(vec![("number", num(1.5))]);
        assert!(extract::<Required>(&p, &ExtractOptions::default()).is_err());
    }
}
