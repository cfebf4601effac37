//! Match keys: deterministic hashes over the identifying parts of a request

use std::collections::BTreeSet;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::interaction::Request;

/// Which parts of a request take part in matching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRules {
    /// Lowercased header names whose values must agree
    headers_to_check: BTreeSet<String>,
    /// Query parameter names dropped before comparison
    parameters_to_ignore: BTreeSet<String>,
}

impl MatchRules {
    /// Build rules from header names and ignored query parameters
    pub fn new<H, P>(headers_to_check: H, parameters_to_ignore: P) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            headers_to_check: headers_to_check
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
            parameters_to_ignore: parameters_to_ignore
                .into_iter()
                .map(|name| name.as_ref().to_string())
                .collect(),
        }
    }

    /// Header names checked during matching (lowercased)
    pub fn headers_to_check(&self) -> &BTreeSet<String> {
        &self.headers_to_check
    }

    /// Query parameters ignored during matching
    pub fn parameters_to_ignore(&self) -> &BTreeSet<String> {
        &self.parameters_to_ignore
    }
}

/// SHA-256 digest identifying a request under a set of [`MatchRules`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey([u8; 32]);

impl MatchKey {
    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as hex, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// URL split into the exactly-compared prefix and the sorted query pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    /// Scheme, authority and path
    pub base: String,
    /// Decoded query pairs, ignored names removed, sorted
    pub query: Vec<(String, String)>,
}

/// Compute the match key of a request
///
/// The key covers:
/// 1. Method (case-sensitive)
/// 2. URL prefix and sorted query pairs, minus ignored parameters
/// 3. Values of the checked headers (absent is distinct from any value)
/// 4. Body (absent and empty are the same)
#[must_use]
pub fn match_key(request: &Request, rules: &MatchRules) -> MatchKey {
    let mut hasher = Sha256::new();

    // 1. Method
    update_field(&mut hasher, request.method.as_bytes());

    // 2. URL
    let url = normalize_url(&request.url, &rules.parameters_to_ignore);
    update_field(&mut hasher, url.base.as_bytes());
    hasher.update((url.query.len() as u32).to_le_bytes());
    for (key, value) in &url.query {
        update_field(&mut hasher, key.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }

    // 3. Checked headers, in sorted name order
    for name in &rules.headers_to_check {
        update_field(&mut hasher, name.as_bytes());
        match request.header(name) {
            Some(value) => {
                hasher.update([1]);
                update_field(&mut hasher, value.as_bytes());
            }
            None => hasher.update([0]),
        }
    }

    // 4. Body
    match request.body.as_deref() {
        Some(body) if !body.is_empty() => {
            hasher.update([1]);
            update_field(&mut hasher, body);
        }
        _ => hasher.update([0]),
    }

    MatchKey(hasher.finalize().into())
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

/// Normalize a URL for comparison
///
/// The fragment is dropped, the query is decoded into pairs, pairs whose
/// name is in `ignore` are removed and the rest are sorted.
#[must_use]
pub fn normalize_url(url: &str, ignore: &BTreeSet<String>) -> NormalizedUrl {
    let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);

    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, query),
        None => (without_fragment, ""),
    };

    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            (decode_component(key), decode_component(value))
        })
        .filter(|(key, _)| !ignore.contains(key))
        .collect();
    pairs.sort();

    NormalizedUrl {
        base: base.to_string(),
        query: pairs,
    }
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |decoded| decoded.into_owned())
}
