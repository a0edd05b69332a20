//! Key Derivation Module
//!
//! Turns a call's scope, bound instance and arguments into a [`CacheKey`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::canonical;
use crate::error::{CacheError, Result};

// == Cache Key ==
/// Lookup key of one cached call.
///
/// `scope` names the wrapped computation and is what `clear` matches on;
/// `digest` is the SHA-256 of the instance identity and arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub scope: String,
    pub digest: String,
}

impl CacheKey {
    pub fn new(scope: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            digest: digest.into(),
        }
    }

    pub fn in_scope(&self, scope: &str) -> bool {
        self.scope == scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.digest)
    }
}

// == Instance Identity ==
/// Identity of the value a cached method is bound to.
///
/// Two instances returning different keys never share entries. Free
/// functions use `()`, which has no identity.
pub trait InstanceKey {
    fn instance_key(&self) -> Option<Cow<'_, str>>;
}

impl InstanceKey for () {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        None
    }
}

impl InstanceKey for str {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self))
    }
}

impl InstanceKey for String {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.as_str()))
    }
}

impl<T: InstanceKey + ?Sized> InstanceKey for &T {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        (**self).instance_key()
    }
}

impl<T: InstanceKey + ?Sized> InstanceKey for Box<T> {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        (**self).instance_key()
    }
}

impl<T: InstanceKey + ?Sized> InstanceKey for Arc<T> {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        (**self).instance_key()
    }
}

// == Call Args ==
/// Positional and keyword arguments of a call with a dynamic signature.
///
/// Each argument is canonically encoded when added, so an unhashable value
/// fails at the point it is supplied. Keyword arguments are kept sorted by
/// name, which makes their supply order irrelevant.
///
/// Set arguments should be passed as `BTreeSet`: serde writes a `HashSet`
/// as a plain sequence in iteration order, so equal sets may encode
/// differently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    positional: Vec<Vec<u8>>,
    keyword: BTreeMap<String, Vec<u8>>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.positional.push(canonical::encode(value)?);
        Ok(self)
    }

    /// Sets a keyword argument, replacing an earlier one with the same name.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.keyword.insert(name.into(), canonical::encode(value)?);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for CallArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let positional: Vec<Encoded<'_>> = self.positional.iter().map(|b| Encoded(b)).collect();
        let keyword: BTreeMap<&str, Encoded<'_>> = self
            .keyword
            .iter()
            .map(|(name, b)| (name.as_str(), Encoded(b)))
            .collect();

        let mut state = serializer.serialize_struct("CallArgs", 2)?;
        state.serialize_field("args", &positional)?;
        state.serialize_field("kwargs", &keyword)?;
        state.end()
    }
}

/// An argument that is already canonically encoded.
struct Encoded<'a>(&'a [u8]);

impl Serialize for Encoded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

// == Key Deriver ==
/// Derives keys for one scope.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    scope: String,
}

impl KeyDeriver {
    /// Creates a deriver for a scope; the name must not be empty.
    pub fn new(scope: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(CacheError::config("scope name must not be empty"));
        }
        Ok(Self { scope })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Derives the key for a call.
    ///
    /// Fails with `UnhashableArgument` when the arguments have no canonical
    /// encoding; no backend is touched before this succeeds.
    ///
    /// Maps are sorted before hashing, sets are not. Pass `BTreeSet` rather
    /// than `HashSet`, whose iteration order would leak into the key.
    pub fn derive<I, A>(&self, instance: &I, args: &A) -> Result<CacheKey>
    where
        I: InstanceKey + ?Sized,
        A: Serialize + ?Sized,
    {
        let encoded_args = canonical::encode(args)?;

        let mut hasher = Sha256::new();
        match instance.instance_key() {
            Some(identity) => {
                hasher.update([1u8]);
                hasher.update((identity.len() as u64).to_be_bytes());
                hasher.update(identity.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(&encoded_args);

        Ok(CacheKey::new(
            self.scope.clone(),
            hex::encode(hasher.finalize()),
        ))
    }
}
