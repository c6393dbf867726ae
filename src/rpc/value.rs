//! Argument and return values carried by RPC messages.
//!
//! Bodies are postcard-encoded [`RpcMessage`]s.  Values form a small
//! self-describing tree, enough for selectors, bundle identifiers,
//! environment dictionaries and launch options.
//!
//! Decoding is hand-written so that array and dictionary nesting is
//! bounded by [`MAX_NESTING`]; the tree arrives from the device.

use core::fmt;
use std::collections::BTreeMap;

use serde::de::{self, DeserializeSeed, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Fault code the device uses for "no such item" (unknown bundle).
pub const FAULT_NOT_FOUND: i64 = 4;
/// Fault code for requests refused by device policy.
pub const FAULT_DENIED: i64 = 1;

/// Deepest array/dictionary nesting accepted when decoding a value.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RpcValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<RpcValue>),
    Dict(BTreeMap<String, RpcValue>),
}

impl RpcValue {
    /// Build a dictionary from key/value pairs.
    pub fn dict<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<RpcValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Non-negative integer value, whichever signedness it was sent with.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U64(v) => Some(v),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I64(v) => Some(v),
            Self::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&RpcValue> {
        match self {
            Self::Dict(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<bool> for RpcValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for RpcValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u64> for RpcValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<&str> for RpcValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<RpcValue>> for RpcValue {
    fn from(v: Vec<RpcValue>) -> Self {
        Self::Array(v)
    }
}

// ── Bounded decoding ─────────────────────────────────────────

/// Variant names in declaration order; the index is the wire tag.
const VARIANTS: &[&str] = &[
    "Null", "Bool", "I64", "U64", "String", "Bytes", "Array", "Dict",
];

#[derive(Clone, Copy)]
enum Tag {
    Null,
    Bool,
    I64,
    U64,
    String,
    Bytes,
    Array,
    Dict,
}

impl Tag {
    const ALL: [Tag; 8] = [
        Tag::Null,
        Tag::Bool,
        Tag::I64,
        Tag::U64,
        Tag::String,
        Tag::Bytes,
        Tag::Array,
        Tag::Dict,
    ];
}

struct TagVisitor;

impl Visitor<'_> for TagVisitor {
    type Value = Tag;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an RpcValue variant")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Tag, E> {
        usize::try_from(v)
            .ok()
            .and_then(|i| Tag::ALL.get(i).copied())
            .ok_or_else(|| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Tag, E> {
        VARIANTS
            .iter()
            .position(|name| *name == v)
            .map(|i| Tag::ALL[i])
            .ok_or_else(|| E::unknown_variant(v, VARIANTS))
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_identifier(TagVisitor)
    }
}

/// Decodes one value found `depth` containers below the root.
#[derive(Clone, Copy)]
struct ValueSeed {
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = RpcValue;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<RpcValue, D::Error> {
        if self.depth > MAX_NESTING {
            return Err(de::Error::custom(format_args!(
                "value nested deeper than {MAX_NESTING} levels"
            )));
        }
        deserializer.deserialize_enum("RpcValue", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed {
    type Value = RpcValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an RpcValue")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<RpcValue, A::Error> {
        let (tag, variant) = data.variant::<Tag>()?;
        let inner = ContainerSeed {
            depth: self.depth + 1,
        };
        match tag {
            Tag::Null => variant.unit_variant().map(|()| RpcValue::Null),
            Tag::Bool => variant.newtype_variant().map(RpcValue::Bool),
            Tag::I64 => variant.newtype_variant().map(RpcValue::I64),
            Tag::U64 => variant.newtype_variant().map(RpcValue::U64),
            Tag::String => variant.newtype_variant().map(RpcValue::String),
            Tag::Bytes => variant.newtype_variant().map(RpcValue::Bytes),
            Tag::Array => variant
                .newtype_variant_seed(ArraySeed(inner))
                .map(RpcValue::Array),
            Tag::Dict => variant
                .newtype_variant_seed(DictSeed(inner))
                .map(RpcValue::Dict),
        }
    }
}

/// Depth of the elements inside an array or dictionary.
#[derive(Clone, Copy)]
struct ContainerSeed {
    depth: usize,
}

impl ContainerSeed {
    fn element(self) -> ValueSeed {
        ValueSeed { depth: self.depth }
    }
}

struct ArraySeed(ContainerSeed);

impl<'de> DeserializeSeed<'de> for ArraySeed {
    type Value = Vec<RpcValue>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ArraySeed {
    type Value = Vec<RpcValue>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of RpcValue")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        // Length prefixes come from the device; do not trust them for capacity.
        let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(256));
        while let Some(value) = seq.next_element_seed(self.0.element())? {
            out.push(value);
        }
        Ok(out)
    }
}

struct DictSeed(ContainerSeed);

impl<'de> DeserializeSeed<'de> for DictSeed {
    type Value = BTreeMap<String, RpcValue>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DictSeed {
    type Value = BTreeMap<String, RpcValue>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a dictionary of RpcValue")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut out = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(self.0.element())?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

impl<'de> Deserialize<'de> for RpcValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ValueSeed { depth: 0 }.deserialize(deserializer)
    }
}

/// One message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcMessage {
    /// Call `selector` on the addressed channel.
    Invoke {
        selector: String,
        args: Vec<RpcValue>,
    },
    /// Successful return value.
    Reply(RpcValue),
    /// Remote exception.
    Fault { code: i64, description: String },
}

impl RpcMessage {
    pub fn invoke(selector: &str, args: Vec<RpcValue>) -> Self {
        Self::Invoke {
            selector: selector.to_string(),
            args,
        }
    }
}
