//! Ordered multi-valued containers for header fields and query parameters.
//!
//! Header names compare case-insensitively but the first-seen casing is kept
//! for display and wire output. Insertion order is preserved across all
//! operations, which matters both for signing schemes and for query strings.

use std::fmt;

/// A single query parameter value. `NoValue` distinguishes `?key` from
/// `?key=` (which is `Value("")`) and from `?key=v`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Value(String),
    NoValue,
}

impl Param {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::Value(v) => Some(v),
            Param::NoValue => None,
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Value(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Value(value)
    }
}

/// Ordered, case-insensitive, multi-valued header mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// First value for `name`, if any.
    pub fn get_one(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Appends a value, keeping any existing values for `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with a single value. The new entry
    /// takes the position of the first removed one when present.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(idx) => {
                self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
                self.entries.insert(idx.min(self.entries.len()), (name, value));
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Removes and returns the first value for `name`.
    pub fn pop_one(&mut self, name: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    /// Removes and returns every value for `name`.
    pub fn pop_all(&mut self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Inserts `value` only if no value for `name` exists yet.
    pub fn setdefault(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.contains(&name) {
            self.entries.push((name, value.into()));
        }
    }

    pub fn extend<I, K, V>(&mut self, items: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in items {
            self.add(k, v);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// All `(name, value)` pairs in insertion order, original casing.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Distinct names in first-seen order and casing.
    pub fn names(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for (k, _) in &self.entries {
            if !seen.iter().any(|s| s.eq_ignore_ascii_case(k)) {
                seen.push(k);
            }
        }
        seen
    }

    /// Values for `name` folded with `", "`. `Set-Cookie` is never foldable
    /// and returns `None` whenever more than one value is present.
    pub fn get_folded(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        match values.len() {
            0 => None,
            1 => Some(values[0].to_string()),
            _ if name.eq_ignore_ascii_case("set-cookie") => None,
            _ => Some(values.join(", ")),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.items() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Ordered multi-valued query parameter mapping. Unlike [`Headers`], keys
/// compare case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, Param)>,
}

impl Params {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get_one(&self, key: &str) -> Option<&Param> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_all(&self, key: &str) -> Vec<&Param> {
        self.entries.iter().filter(|(k, _)| k == key).map(|(_, v)| v).collect()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Param>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Adds a bare key (`?key` with no `=`).
    pub fn add_no_value(&mut self, key: impl Into<String>) {
        self.entries.push((key.into(), Param::NoValue));
    }

    pub fn pop_all(&mut self, key: &str) -> Vec<Param> {
        let mut removed = Vec::new();
        self.entries.retain(|(k, v)| {
            if k == key {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn extend(&mut self, other: Params) {
        self.entries.extend(other.entries);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serializes into query-string form using the form encode set
    /// (space becomes `+`; `*`, `-`, `.` and `_` stay literal).
    pub fn to_query_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.items() {
            if !out.is_empty() {
                out.push('&');
            }
            out.extend(form_urlencoded::byte_serialize(key.as_bytes()));
            if let Param::Value(v) = value {
                out.push('=');
                out.extend(form_urlencoded::byte_serialize(v.as_bytes()));
            }
        }
        out
    }

    /// Parses a raw query string, keeping the `?k` / `?k=` distinction.
    pub fn from_query_string(query: &str) -> Params {
        let mut params = Params::new();
        if query.is_empty() {
            return params;
        }
        for piece in query.split('&') {
            if piece.is_empty() {
                continue;
            }
            match piece.split_once('=') {
                Some((k, v)) => {
                    let key = percent_decode(k);
                    let value = percent_decode(v);
                    params.add(key, value);
                }
                None => params.add_no_value(percent_decode(piece)),
            }
        }
        params
    }
}

impl<K: Into<String>, V: Into<Param>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.add(k, v);
        }
        params
    }
}

fn percent_decode(input: &str) -> String {
    let plus_replaced = input.replace('+', " ");
    percent_encoding::percent_decode_str(&plus_replaced)
        .decode_utf8_lossy()
        .into_owned()
}
