//! Names of multi-dimensional quantities.
//!
//! A [`Key`] identifies a quantity by its base name, the set of dimensions it
//! varies over, and an optional tag distinguishing variants. The string form
//! is `name[:dims][:tag]` with dimensions joined by `-`, for example
//! `emissions:n-t-y:baseline`.
//!
//! Dimension *order* is kept for display and for order-sensitive derivations,
//! but never takes part in identity: `x:i-j` and `x:j-i` name the same node.

use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::ArcStr;
use crate::error::KeyError;

const SEP: char = ':';
const DIM_SEP: char = '-';
const TAG_JOIN: char = '+';

#[derive(Clone)]
pub struct Key {
    name: ArcStr,
    /// Display order.
    dims: Arc<[ArcStr]>,
    /// Sorted view of `dims`; the identity used by `Eq`, `Hash` and `Ord`.
    set: Arc<[ArcStr]>,
    tag: Option<ArcStr>,
}

impl Key {
    /// Creates a key, validating every part so that the result always
    /// survives a round trip through its string form.
    pub fn new<D, S>(name: impl AsRef<str>, dims: D, tag: Option<&str>) -> Result<Self, KeyError>
    where
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.as_ref();
        let dims: Vec<String> = dims.into_iter().map(|d| d.as_ref().to_owned()).collect();
        let repr = || render(name, &dims, tag);

        check_name(name).map_err(|reason| KeyError::malformed(repr(), reason))?;
        check_dims(&dims).map_err(|reason| KeyError::malformed(repr(), reason))?;
        if let Some(tag) = tag {
            check_tag(tag).map_err(|reason| KeyError::malformed(repr(), reason))?;
        }

        Ok(Self::assemble(
            name.into(),
            dims.iter().map(|d| ArcStr::from(d.as_str())).collect(),
            tag.map(ArcStr::from),
        ))
    }

    /// Parses the `name[:dims][:tag]` form.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = input.split(SEP).collect();

        let (name, dims, tag) = match parts.as_slice() {
            [name] => (*name, "", None),
            [name, dims] => (*name, *dims, None),
            [name, dims, tag] => (*name, *dims, Some(*tag)),
            _ => {
                return Err(KeyError::malformed(input, "expected name[:dims][:tag]"));
            }
        };

        let dims: Vec<&str> = match dims {
            "" => Vec::new(),
            dims => dims.split(DIM_SEP).collect(),
        };

        Self::new(name, dims, tag).map_err(|err| match err {
            KeyError::Malformed { reason, .. } => KeyError::malformed(input, reason),
            other => other,
        })
    }

    /// The only place where a key comes into being; both dimension views are
    /// derived here and nowhere else.
    fn assemble(name: ArcStr, dims: Vec<ArcStr>, tag: Option<ArcStr>) -> Self {
        let mut set = dims.clone();
        set.sort();

        Self {
            name,
            dims: dims.into(),
            set: set.into(),
            tag,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimensions in display order.
    pub fn dims(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.dims.iter().map(|d| &**d)
    }

    /// Dimensions in sorted order.
    pub fn dim_set(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.set.iter().map(|d| &**d)
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.set.binary_search_by(|d| (**d).cmp(dim)).is_ok()
    }

    /// Whether the key has every one of `dims`.
    pub fn covers<'a>(&self, dims: impl IntoIterator<Item = &'a str>) -> bool {
        dims.into_iter().all(|dim| self.has_dim(dim))
    }

    /// Same identity, dimensions listed in `order`.
    pub fn permute_dims<S>(&self, order: impl IntoIterator<Item = S>) -> Result<Self, KeyError>
    where
        S: AsRef<str>,
    {
        let order: Vec<String> = order.into_iter().map(|d| d.as_ref().to_owned()).collect();

        let mut sorted: Vec<&str> = order.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        if !sorted.iter().copied().eq(self.dim_set()) {
            return Err(KeyError::DimensionMismatch {
                key: self.clone(),
                order,
            });
        }

        Ok(Self::assemble(
            self.name.clone(),
            order.iter().map(|d| ArcStr::from(d.as_str())).collect(),
            self.tag.clone(),
        ))
    }

    /// Appends `tag` to the existing tag, joined with `+`.
    pub fn add_tag(&self, tag: &str) -> Result<Self, KeyError> {
        check_tag(tag).map_err(|reason| KeyError::malformed(tag, reason))?;

        let tag = match &self.tag {
            Some(old) => format!("{old}{TAG_JOIN}{tag}"),
            None => tag.to_owned(),
        };

        Ok(Self::assemble(
            self.name.clone(),
            self.dims.to_vec(),
            Some(tag.into()),
        ))
    }

    /// Removes the named dimensions; names the key doesn't have are ignored.
    pub fn drop<'a>(&self, dims: impl IntoIterator<Item = &'a str>) -> Self {
        let dropped: Vec<&str> = dims.into_iter().collect();

        Self::assemble(
            self.name.clone(),
            self.dims
                .iter()
                .filter(|d| !dropped.contains(&&***d))
                .cloned()
                .collect(),
            self.tag.clone(),
        )
    }

    /// Adds dimensions at the end; ones already present are ignored.
    pub fn append<S>(&self, dims: impl IntoIterator<Item = S>) -> Result<Self, KeyError>
    where
        S: AsRef<str>,
    {
        let mut all: Vec<String> = self.dims().map(str::to_owned).collect();

        for dim in dims {
            let dim = dim.as_ref();
            if !all.iter().any(|d| d == dim) {
                all.push(dim.to_owned());
            }
        }

        Self::new(&*self.name, all, self.tag())
    }

    /// Every partial sum of this key: each proper subset of dimensions that
    /// can be summed out, paired with the key over the remaining ones.
    ///
    /// Keys with more remaining dimensions come first, so `x:a-b-c` yields
    /// `x:a-b`, `x:a-c`, `x:b-c`, then `x:a`, `x:b`, `x:c`, then `x`.
    pub fn iter_sums(&self) -> impl Iterator<Item = (Vec<String>, Key)> + '_ {
        let n = self.dims.len();

        (0..n).rev().flat_map(move |size| {
            combinations(n, size).into_iter().map(move |keep| {
                let removed = (0..n)
                    .filter(|i| !keep.contains(i))
                    .map(|i| self.dims[i].to_string())
                    .collect();
                let kept = keep.iter().map(|&i| self.dims[i].clone()).collect();

                (removed, Self::assemble(self.name.clone(), kept, self.tag.clone()))
            })
        })
    }

    /// A key named `name` over the union of the dimensions of `keys`, in the
    /// order in which they first appear.
    pub fn product<'a>(
        name: &str,
        keys: impl IntoIterator<Item = &'a Key>,
        tag: Option<&str>,
    ) -> Result<Self, KeyError> {
        let mut dims: Vec<&str> = Vec::new();

        for key in keys {
            for dim in key.dims() {
                if !dims.contains(&dim) {
                    dims.push(dim);
                }
            }
        }

        Self::new(name, dims, tag)
    }
}

fn render<S: AsRef<str>>(name: &str, dims: &[S], tag: Option<&str>) -> String {
    let mut out = name.to_owned();

    if !dims.is_empty() || tag.is_some() {
        out.push(SEP);
        for (i, dim) in dims.iter().enumerate() {
            if i > 0 {
                out.push(DIM_SEP);
            }
            out.push_str(dim.as_ref());
        }
    }

    if let Some(tag) = tag {
        out.push(SEP);
        out.push_str(tag);
    }

    out
}

fn check_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name.contains(SEP) {
        return Err("name contains ':'");
    }
    Ok(())
}

fn check_dims(dims: &[String]) -> Result<(), &'static str> {
    for (i, dim) in dims.iter().enumerate() {
        if dim.is_empty() {
            return Err("empty dimension");
        }
        if dim.contains(SEP) || dim.contains(DIM_SEP) {
            return Err("dimension contains ':' or '-'");
        }
        if dims[..i].contains(dim) {
            return Err("repeated dimension");
        }
    }
    Ok(())
}

fn check_tag(tag: &str) -> Result<(), &'static str> {
    if tag.is_empty() {
        return Err("empty tag");
    }
    if tag.contains(SEP) {
        return Err("tag contains ':'");
    }
    Ok(())
}

/// Index combinations of `size` out of `n`, in lexicographic order.
fn combinations(n: usize, size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current: Vec<usize> = (0..size).collect();

    if size > n {
        return out;
    }

    loop {
        out.push(current.clone());

        // rightmost index that can still move
        let Some(i) = (0..size).rev().find(|&i| current[i] < n - size + i) else {
            return out;
        };

        current[i] += 1;
        for j in i + 1..size {
            current[j] = current[j - 1] + 1;
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tag == other.tag && self.set == other.set
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.set.hash(state);
        self.tag.hash(state);
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.set.cmp(&other.set))
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render(&self.name, &self.dims, self.tag()))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{self}>")
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse(s)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Key::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    fn hash_of(key: &Key) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_parse_display() {
        assert_eq!(key("x").to_string(), "x");
        assert_eq!(key("x:i-j").to_string(), "x:i-j");
        assert_eq!(key("x:i-j:baseline").to_string(), "x:i-j:baseline");
        assert_eq!(key("x::baseline").to_string(), "x::baseline");
        assert_eq!(key("x:").to_string(), "x");

        let k = key("x:j-i:baseline");
        assert_eq!(k.name(), "x");
        assert_eq!(k.dims().collect::<Vec<_>>(), ["j", "i"]);
        assert_eq!(k.dim_set().collect::<Vec<_>>(), ["i", "j"]);
        assert_eq!(k.tag(), Some("baseline"));
    }

    #[test]
    fn test_order_insensitive_identity() {
        assert_eq!(key("x:i-j:baseline"), key("x:j-i:baseline"));
        assert_ne!(key("x:i-j:baseline"), key("x:i-j:scenario2"));
        assert_ne!(key("x:i-j"), key("x:i"));
        assert_ne!(key("x:i-j"), key("y:i-j"));
        assert_eq!(hash_of(&key("x:a-b-c")), hash_of(&key("x:c-a-b")));
    }

    #[test]
    fn test_malformed() {
        for input in ["", ":a", "x:a:b:c", "x:a--b", "x:a-a", "x:a:", "x::"] {
            let err = Key::parse(input).unwrap_err();
            assert!(
                matches!(&err, KeyError::Malformed { input: i, .. } if i == input),
                "{input}: {err:?}"
            );
        }

        assert!(Key::new("x", ["a-b"], None).is_err());
        assert!(Key::new("x", ["a"], Some("t:u")).is_err());
    }

    #[test]
    fn test_permute_dims() {
        let k = key("x:a-b-c:t");
        let p = k.permute_dims(["c", "a", "b"]).unwrap();
        assert_eq!(p, k);
        assert_eq!(p.to_string(), "x:c-a-b:t");

        let err = k.permute_dims(["a", "b"]).unwrap_err();
        assert!(matches!(err, KeyError::DimensionMismatch { .. }));
        assert!(k.permute_dims(["a", "b", "d"]).is_err());
        assert!(k.permute_dims(["a", "a", "b"]).is_err());
    }

    #[test]
    fn test_derivations() {
        let k = key("x:a-b-c");
        assert_eq!(k.drop(["b", "z"]).to_string(), "x:a-c");
        assert_eq!(k.append(["d", "a"]).unwrap().to_string(), "x:a-b-c-d");
        assert_eq!(k.add_tag("agg").unwrap().to_string(), "x:a-b-c:agg");
        assert_eq!(
            k.add_tag("agg").unwrap().add_tag("sel").unwrap().tag(),
            Some("agg+sel")
        );

        let product = Key::product("z", [&key("x:a-b"), &key("y:b-c")], None).unwrap();
        assert_eq!(product.to_string(), "z:a-b-c");
    }

    #[test]
    fn test_iter_sums() {
        let sums: Vec<String> = key("x:a-b-c")
            .iter_sums()
            .map(|(_, k)| k.to_string())
            .collect();

        assert_eq!(sums, ["x:a-b", "x:a-c", "x:b-c", "x:a", "x:b", "x:c", "x"]);

        let (removed, first) = key("x:a-b").iter_sums().next().unwrap();
        assert_eq!(removed, ["b"]);
        assert_eq!(first, key("x:a"));

        assert_eq!(key("x").iter_sums().count(), 0);
    }

    #[test]
    fn test_serde_as_string() {
        let k = key("x:a-b:t");
        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, r#""x:a-b:t""#);
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, k);
        assert!(serde_json::from_str::<Key>(r#""x:a--b""#).is_err());
    }

    fn key_parts() -> impl Strategy<Value = (String, Vec<String>, Vec<String>, Option<String>)> {
        (
            "[a-z][a-z0-9_]{0,5}",
            prop::collection::btree_set("[a-z]{1,3}", 0..5),
            prop::option::of("[a-z]{1,4}"),
        )
            .prop_flat_map(|(name, dims, tag)| {
                let dims: Vec<String> = dims.into_iter().collect();
                (
                    Just(name),
                    Just(dims.clone()),
                    Just(dims).prop_shuffle(),
                    Just(tag),
                )
            })
    }

    proptest! {
        #[test]
        fn prop_permuted_keys_are_identical((name, dims, shuffled, tag) in key_parts()) {
            let a = Key::new(&name, &dims, tag.as_deref()).unwrap();
            let b = Key::new(&name, &shuffled, tag.as_deref()).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
            prop_assert_eq!(&a.permute_dims(&shuffled).unwrap(), &a);
        }

        #[test]
        fn prop_string_round_trip((name, _, shuffled, tag) in key_parts()) {
            let k = Key::new(&name, &shuffled, tag.as_deref()).unwrap();
            let back = Key::parse(&k.to_string()).unwrap();
            prop_assert_eq!(&back, &k);
            prop_assert!(back.dims().eq(k.dims()));
        }
    }
}
