//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use indexmap::IndexMap;

/// Header key identifying the service instance that produced a message.
pub const SERVER_NAME_HEADER: &str = "serverName";

/// Append-only header bag with an optional status code and description.
///
/// Keys keep their insertion order and may carry several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    code: Option<u16>,
    description: Option<String>,
    entries: IndexMap<String, Vec<String>>,
}

impl Headers {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a header set carrying a protocol-style status.
    pub fn with_status(code: Option<u16>, description: Option<&str>) -> Self {
        Self {
            code,
            description: description.map(str::to_owned),
            entries: IndexMap::new(),
        }
    }

    /// Append a value under `key`, keeping earlier values.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// Append every pair in iteration order.
    pub fn extend_pairs<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self.append(key, value);
        }
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value stored under `key`.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether at least one value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Status code, if any.
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// Status description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Flattened `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |v| (key.as_str(), v.as_str())))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are stored. Status fields are not counted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stamps outgoing header sets with the owning service's display name.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    server_name: String,
}

impl HeaderBuilder {
    /// Builder for the service identified by `server_name`.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    /// Display name stamped into every header set.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Base header set: optional status plus the `serverName` entry.
    pub fn build(&self, code: Option<u16>, description: Option<&str>) -> Headers {
        let mut headers = Headers::with_status(code, description);
        headers.append(SERVER_NAME_HEADER, self.server_name.clone());
        headers
    }

    /// Base header set extended with caller pairs in iteration order.
    pub fn with_params<I, K, V>(
        &self,
        params: I,
        code: Option<u16>,
        description: Option<&str>,
    ) -> Headers
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut headers = self.build(code, description);
        headers.extend_pairs(params);
        headers
    }
}
