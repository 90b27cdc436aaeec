//! Canonical argument encodings for cache fingerprints.
//!
//! Every argument of a cached call is turned into bytes by the encode
//! function registered for its exact type. Encodings must be deterministic
//! and independent of in-memory layout: unordered containers are sorted,
//! keys use their dimension set rather than their display order.

use std::any::{Any, TypeId, type_name};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::core::{Blake3Hasher, Hash32, Value};
use crate::graph::Ident;
use crate::key::Key;

type EncodeFn = Arc<dyn Fn(&dyn Any, &mut Vec<u8>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct Rule {
    tag: &'static str,
    encode: EncodeFn,
}

pub(crate) enum EncodeError {
    /// No rule for the argument's type.
    Unregistered(&'static str),
    Failed(anyhow::Error),
}

/// Type → encode function dispatch table, plus per-function ignored
/// parameters.
#[derive(Clone)]
pub struct Encoder {
    rules: HashMap<TypeId, Rule>,
    ignored: HashMap<String, HashSet<String>>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! register_le_bytes {
    ($encoder:expr, $($ty:ty),+) => {
        $(
            $encoder.register::<$ty, _>(|value, out| {
                out.extend_from_slice(&value.to_le_bytes());
                Ok(())
            });
        )+
    };
}

impl Encoder {
    /// An encoder that knows no types at all.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
            ignored: HashMap::new(),
        }
    }

    /// An encoder with the built-in rules: numbers, strings, paths, keys,
    /// string collections and JSON values.
    pub fn new() -> Self {
        let mut encoder = Self::empty();

        register_le_bytes!(encoder, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

        encoder
            .register::<(), _>(|_, _| Ok(()))
            .register::<bool, _>(|value, out| {
                out.push(u8::from(*value));
                Ok(())
            })
            .register::<usize, _>(|value, out| {
                out.extend_from_slice(&(*value as u64).to_le_bytes());
                Ok(())
            })
            .register::<isize, _>(|value, out| {
                out.extend_from_slice(&(*value as i64).to_le_bytes());
                Ok(())
            })
            .register::<f32, _>(|value, out| {
                out.extend_from_slice(&value.to_bits().to_le_bytes());
                Ok(())
            })
            .register::<f64, _>(|value, out| {
                out.extend_from_slice(&value.to_bits().to_le_bytes());
                Ok(())
            })
            .register::<char, _>(|value, out| {
                out.extend_from_slice(&u32::from(*value).to_le_bytes());
                Ok(())
            })
            .register::<String, _>(|value, out| {
                out.extend_from_slice(value.as_bytes());
                Ok(())
            })
            .register::<&'static str, _>(|value, out| {
                out.extend_from_slice(value.as_bytes());
                Ok(())
            })
            .register::<Utf8PathBuf, _>(|value, out| {
                out.extend_from_slice(value.as_str().as_bytes());
                Ok(())
            })
            .register::<PathBuf, _>(|value, out| {
                out.extend_from_slice(value.as_os_str().as_encoded_bytes());
                Ok(())
            })
            .register::<Key, _>(|value, out| {
                encode_key(value, out);
                Ok(())
            })
            .register::<Ident, _>(|value, out| {
                match value {
                    Ident::Key(key) => encode_key(key, out),
                    Ident::Name(name) => frame(out, name.as_bytes()),
                }
                Ok(())
            })
            .register::<Vec<String>, _>(|value, out| {
                encode_strings(value.iter(), out);
                Ok(())
            })
            .register::<BTreeSet<String>, _>(|value, out| {
                encode_strings(value.iter(), out);
                Ok(())
            })
            .register::<HashSet<String>, _>(|value, out| {
                let mut sorted: Vec<_> = value.iter().collect();
                sorted.sort();
                encode_strings(sorted.into_iter(), out);
                Ok(())
            })
            .register::<BTreeMap<String, String>, _>(|value, out| {
                encode_pairs(value.iter(), out);
                Ok(())
            })
            .register::<HashMap<String, String>, _>(|value, out| {
                let mut sorted: Vec<_> = value.iter().collect();
                sorted.sort();
                encode_pairs(sorted.into_iter(), out);
                Ok(())
            })
            .register::<Vec<i64>, _>(|value, out| {
                out.extend_from_slice(&(value.len() as u64).to_le_bytes());
                for item in value {
                    out.extend_from_slice(&item.to_le_bytes());
                }
                Ok(())
            })
            .register::<Vec<f64>, _>(|value, out| {
                out.extend_from_slice(&(value.len() as u64).to_le_bytes());
                for item in value {
                    out.extend_from_slice(&item.to_bits().to_le_bytes());
                }
                Ok(())
            })
            .register::<serde_json::Value, _>(|value, out| {
                encode_json(value, out);
                Ok(())
            });

        encoder
    }

    /// Installs `encode` for arguments of type `T`, replacing any earlier
    /// rule for that type.
    pub fn register<T, F>(&mut self, encode: F) -> &mut Self
    where
        T: Any,
        F: Fn(&T, &mut Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let encode: EncodeFn = Arc::new(move |value: &dyn Any, out: &mut Vec<u8>| {
            let value = value
                .downcast_ref::<T>()
                .ok_or_else(|| anyhow::anyhow!("encoder for {} got another type", type_name::<T>()))?;
            encode(value, out)
        });

        let rule = Rule {
            tag: type_name::<T>(),
            encode,
        };

        if self.rules.insert(TypeId::of::<T>(), rule).is_some() {
            tracing::debug!("Override encoder for {}", type_name::<T>());
        }

        self
    }

    /// Encodes `T` through its [`Hash`] implementation.
    ///
    /// Only suitable for types whose `Hash` does not depend on iteration
    /// order or memory addresses.
    pub fn register_hash<T>(&mut self) -> &mut Self
    where
        T: Any + Hash,
    {
        self.register::<T, _>(|value, out| {
            let mut hasher = Blake3Hasher::new();
            value.hash(&mut hasher);
            out.extend_from_slice(Hash32::from(hasher).as_bytes());
            Ok(())
        })
    }

    /// Encodes `T` as CBOR through its [`Serialize`] implementation.
    pub fn register_serde<T>(&mut self) -> &mut Self
    where
        T: Any + Serialize,
    {
        self.register::<T, _>(|value, out| {
            ciborium::into_writer(value, out).map_err(|err| anyhow::anyhow!("{err}"))
        })
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.rules.contains_key(&TypeId::of::<T>())
    }

    /// Excludes parameter `param` of the cached function `function` from its
    /// fingerprints.
    pub fn ignore(&mut self, function: &str, param: &str) -> &mut Self {
        self.ignored
            .entry(function.to_owned())
            .or_default()
            .insert(param.to_owned());
        self
    }

    pub fn is_ignored(&self, function: &str, param: &str) -> bool {
        self.ignored
            .get(function)
            .is_some_and(|params| params.contains(param))
    }

    /// The rule's tag and the canonical bytes of `value`.
    pub(crate) fn encode(&self, value: &Value) -> Result<(&'static str, Vec<u8>), EncodeError> {
        let rule = self
            .rules
            .get(&value.payload_type_id())
            .ok_or(EncodeError::Unregistered(value.type_name()))?;

        let mut out = Vec::new();
        (rule.encode)(value.as_any(), &mut out).map_err(EncodeError::Failed)?;

        Ok((rule.tag, out))
    }
}

fn frame(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn encode_key(key: &Key, out: &mut Vec<u8>) {
    frame(out, key.name().as_bytes());
    out.extend_from_slice(&(key.dim_set().len() as u64).to_le_bytes());
    for dim in key.dim_set() {
        frame(out, dim.as_bytes());
    }
    match key.tag() {
        Some(tag) => {
            out.push(1);
            frame(out, tag.as_bytes());
        }
        None => out.push(0),
    }
}

fn encode_strings<'a>(items: impl ExactSizeIterator<Item = &'a String>, out: &mut Vec<u8>) {
    out.extend_from_slice(&(items.len() as u64).to_le_bytes());
    for item in items {
        frame(out, item.as_bytes());
    }
}

fn encode_pairs<'a>(
    items: impl ExactSizeIterator<Item = (&'a String, &'a String)>,
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(&(items.len() as u64).to_le_bytes());
    for (key, value) in items {
        frame(out, key.as_bytes());
        frame(out, value.as_bytes());
    }
}

/// JSON with object members sorted by key, whatever order the map keeps.
fn encode_json(value: &serde_json::Value, out: &mut Vec<u8>) {
    use serde_json::Value as Json;

    match value {
        Json::Null => out.push(0),
        Json::Bool(b) => out.extend_from_slice(&[1, u8::from(*b)]),
        Json::Number(n) => {
            out.push(2);
            frame(out, n.to_string().as_bytes());
        }
        Json::String(s) => {
            out.push(3);
            frame(out, s.as_bytes());
        }
        Json::Array(items) => {
            out.push(4);
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                encode_json(item, out);
            }
        }
        Json::Object(map) => {
            out.push(5);
            let mut members: Vec<_> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            out.extend_from_slice(&(members.len() as u64).to_le_bytes());
            for (key, item) in members {
                frame(out, key.as_bytes());
                encode_json(item, out);
            }
        }
    }
}
