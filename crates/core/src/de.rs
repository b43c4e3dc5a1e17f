//! Lenient serde deserializer over a decoded plain tree.
//!
//! Two things differ from `serde_json::from_value`:
//! - every node the target actually consumes is recorded by path, so the
//!   caller can summarize provenance for used data only;
//! - `null` (an unknown or explicitly empty value) fills any target with its
//!   zero value, and whole floats fill integer targets.

use std::cell::RefCell;
use std::collections::BTreeSet;

use serde::de::value::BorrowedStrDeserializer;
use serde::de::{self, DeserializeSeed, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde_json::{Error, Number, Value};

use crate::path::{PathComponent, PropertyPath};

static NULL: Value = Value::Null;
const NO_FIELDS: &[&str] = &[];

/// Paths consumed while deserializing.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    used: RefCell<Vec<PropertyPath>>,
}

impl Recorder {
    fn record(&self, path: &PropertyPath) {
        if !path.is_empty() {
            self.used.borrow_mut().push(path.clone());
        }
    }

    /// Recorded paths, duplicates removed.
    pub(crate) fn into_paths(self) -> BTreeSet<PropertyPath> { self.used.into_inner().into_iter().collect() }
}

pub(crate) struct PlainDeserializer<'de, 'r> {
    value: &'de Value,
    path: PropertyPath,
    /// `None` for synthesized zero values that have no source node.
    recorder: Option<&'r Recorder>,
}

impl<'de, 'r> PlainDeserializer<'de, 'r> {
    pub(crate) fn root(value: &'de Value, recorder: &'r Recorder) -> Self {
        Self { value, path: PropertyPath::root(), recorder: Some(recorder) }
    }

    fn zero() -> Self {
        Self { value: &NULL, path: PropertyPath::root(), recorder: None }
    }

    fn mark(&self) {
        if let Some(r) = self.recorder {
            r.record(&self.path);
        }
    }

    fn seq(&self, items: &'de [Value]) -> SeqDe<'de, 'r> {
        SeqDe { items: items.iter().enumerate(), path: self.path.clone(), recorder: self.recorder }
    }

    fn map(&self, map: &'de serde_json::Map<String, Value>) -> MapDe<'de, 'r> {
        MapDe { iter: map.iter(), pending: None, path: self.path.clone(), recorder: self.recorder }
    }
}

fn visit_integer<'de, V: Visitor<'de>>(n: &Number, visitor: V) -> Result<V::Value, Error> {
    if let Some(u) = n.as_u64() {
        return visitor.visit_u64(u);
    }
    if let Some(i) = n.as_i64() {
        return visitor.visit_i64(i);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64 => visitor.visit_u64(f as u64),
        Some(f) if f.fract() == 0.0 && f < 0.0 && f >= i64::MIN as f64 => visitor.visit_i64(f as i64),
        // let the visitor report the mismatch
        Some(f) => visitor.visit_f64(f),
        None => Err(de::Error::custom("unrepresentable number")),
    }
}

macro_rules! deserialize_integer {
    ($($method:ident)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
            self.mark();
            match self.value {
                Value::Null => visitor.visit_u64(0),
                Value::Number(n) => visit_integer(n, visitor),
                other => Deserializer::$method(other, visitor),
            }
        }
    )*};
}

impl<'de, 'r> Deserializer<'de> for PlainDeserializer<'de, 'r> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Array(items) => visitor.visit_seq(self.seq(items)),
            Value::Object(map) => visitor.visit_map(self.map(map)),
            other => Deserializer::deserialize_any(other, visitor),
        }
    }

    deserialize_integer! {
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_f64(0.0),
            other => Deserializer::deserialize_f64(other, visitor),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_bool(false),
            other => Deserializer::deserialize_bool(other, visitor),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        Deserializer::deserialize_char(self.value, visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_borrowed_str(""),
            other => Deserializer::deserialize_str(other, visitor),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_borrowed_bytes(&[]),
            other => Deserializer::deserialize_bytes(other, visitor),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        Deserializer::deserialize_unit(self.value, visitor)
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(self, name: &'static str, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        Deserializer::deserialize_unit_struct(self.value, name, visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_seq(ZeroSeq { remaining: 0 }),
            Value::Array(items) => visitor.visit_seq(self.seq(items)),
            other => Deserializer::deserialize_seq(other, visitor),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_seq(ZeroSeq { remaining: len }),
            Value::Array(items) => visitor.visit_seq(self.seq(items)),
            other => Deserializer::deserialize_tuple(other, len, visitor),
        }
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            Value::Null => visitor.visit_map(ZeroFields { fields: NO_FIELDS.iter() }),
            Value::Object(map) => visitor.visit_map(self.map(map)),
            other => Deserializer::deserialize_map(other, visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            // every field of an unknown struct is zero
            Value::Null => visitor.visit_map(ZeroFields { fields: fields.iter() }),
            Value::Object(map) => visitor.visit_map(self.map(map)),
            other => Deserializer::deserialize_struct(other, name, fields, visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.mark();
        match self.value {
            // an unknown enum is its first variant, zero-filled
            Value::Null => visitor.visit_enum(ZeroVariant { variants }),
            other => Deserializer::deserialize_enum(other, name, variants, visitor),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        Deserializer::deserialize_identifier(self.value, visitor)
    }

    // Fields the target does not declare end up here; they are not recorded.
    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }
}

struct SeqDe<'de, 'r> {
    items: std::iter::Enumerate<std::slice::Iter<'de, Value>>,
    path: PropertyPath,
    recorder: Option<&'r Recorder>,
}

impl<'de, 'r> SeqAccess<'de> for SeqDe<'de, 'r> {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>, Error> {
        match self.items.next() {
            Some((i, value)) => seed
                .deserialize(PlainDeserializer { value, path: self.path.child(i), recorder: self.recorder })
                .map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> { Some(self.items.len()) }
}

struct MapDe<'de, 'r> {
    iter: serde_json::map::Iter<'de>,
    pending: Option<(&'de str, &'de Value)>,
    path: PropertyPath,
    recorder: Option<&'r Recorder>,
}

impl<'de, 'r> MapAccess<'de> for MapDe<'de, 'r> {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Error> {
        match self.iter.next() {
            Some((k, v)) => {
                self.pending = Some((k.as_str(), v));
                seed.deserialize(BorrowedStrDeserializer::<Error>::new(k.as_str())).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        let (k, value) = self
            .pending
            .take()
            .ok_or_else(|| <Error as de::Error>::custom("map value requested before its key"))?;
        seed.deserialize(PlainDeserializer {
            value,
            path: self.path.child(PathComponent::Key(k.to_string())),
            recorder: self.recorder,
        })
    }

    fn size_hint(&self) -> Option<usize> { Some(self.iter.len()) }
}

/// Sequence of `remaining` zero values.
struct ZeroSeq {
    remaining: usize,
}

impl<'de> SeqAccess<'de> for ZeroSeq {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>, Error> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(PlainDeserializer::zero()).map(Some)
    }

    fn size_hint(&self) -> Option<usize> { Some(self.remaining) }
}

/// Struct body where every listed field is a zero value.
struct ZeroFields {
    fields: std::slice::Iter<'static, &'static str>,
}

impl<'de> MapAccess<'de> for ZeroFields {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Error> {
        match self.fields.next() {
            Some(field) => seed.deserialize(BorrowedStrDeserializer::<Error>::new(field)).map(Some),
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        seed.deserialize(PlainDeserializer::zero())
    }
}

/// First variant of an enum, with zero-valued content.
struct ZeroVariant {
    variants: &'static [&'static str],
}

impl<'de> EnumAccess<'de> for ZeroVariant {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self), Error> {
        let first = self
            .variants
            .first()
            .ok_or_else(|| <Error as de::Error>::custom("cannot zero-fill an enum without variants"))?;
        let variant = seed.deserialize(BorrowedStrDeserializer::<Error>::new(first))?;
        Ok((variant, self))
    }
}

impl<'de> VariantAccess<'de> for ZeroVariant {
    type Error = Error;

    fn unit_variant(self) -> Result<(), Error> { Ok(()) }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, Error> {
        seed.deserialize(PlainDeserializer::zero())
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_seq(ZeroSeq { remaining: len })
    }

    fn struct_variant<V: Visitor<'de>>(self, fields: &'static [&'static str], visitor: V) -> Result<V::Value, Error> {
        visitor.visit_map(ZeroFields { fields: fields.iter() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_paths_are_deduplicated_in_order() {
        let rec = Recorder::default();
        for p in ["spec.b", "spec.a", "spec.b", "spec.a"] {
            rec.record(&PropertyPath::parse(p).unwrap());
        }
        rec.record(&PropertyPath::root());
        let paths: Vec<String> = rec.into_paths().iter().map(ToString::to_string).collect();
        assert_eq!(paths, vec!["spec.a", "spec.b"]);
    }
}
