use serde::{Deserialize, Serialize};

/// Path-like identifier of a managed asset (e.g. `raw/events`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(path.into_iter().map(Into::into).collect())
    }

    /// Parse a `/`-separated user string into a key.
    pub fn from_user_string(s: &str) -> Self {
        Self::new(s.split('/').filter(|part| !part.is_empty()))
    }

    pub fn path(&self) -> &[String] {
        &self.0
    }

    pub fn to_user_string(&self) -> String {
        self.0.join("/")
    }

    /// Whether this key starts with every segment of `prefix`.
    pub fn has_prefix(&self, prefix: &[String]) -> bool {
        self.0.len() >= prefix.len() && self.0.iter().zip(prefix).all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_user_string())
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self::from_user_string(s)
    }
}

impl TryFrom<String> for AssetKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let key = Self::from_user_string(&s);
        if key.0.is_empty() {
            return Err(format!("asset key '{}' has no path segments", s));
        }
        Ok(key)
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.to_user_string()
    }
}

/// One partition of an asset. Unpartitioned assets have exactly one implicit
/// partition, serialized as `null`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartitionKey {
    Unpartitioned,
    Key(String),
}

impl PartitionKey {
    pub fn key(k: impl Into<String>) -> Self {
        PartitionKey::Key(k.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PartitionKey::Unpartitioned => None,
            PartitionKey::Key(k) => Some(k.as_str()),
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKey::Unpartitioned => write!(f, "<unpartitioned>"),
            PartitionKey::Key(k) => write!(f, "{}", k),
        }
    }
}

/// Address of a single partition of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetPartition {
    pub asset_key: AssetKey,
    pub partition_key: PartitionKey,
}

impl std::fmt::Display for AssetPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.partition_key {
            PartitionKey::Unpartitioned => write!(f, "{}", self.asset_key),
            PartitionKey::Key(k) => write!(f, "{}[{}]", self.asset_key, k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_string_round_trips_path() {
        let key = AssetKey::from_user_string("warehouse/orders");
        assert_eq!(key.path(), &["warehouse".to_string(), "orders".to_string()]);
        assert_eq!(key.to_user_string(), "warehouse/orders");
    }

    #[test]
    fn empty_key_is_rejected_on_deserialize() {
        let parsed: Result<AssetKey, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn unpartitioned_serializes_as_null() {
        let json = serde_json::to_string(&vec![
            PartitionKey::Unpartitioned,
            PartitionKey::key("2024-01-01"),
        ])
        .unwrap();
        assert_eq!(json, "[null,\"2024-01-01\"]");
        let back: Vec<PartitionKey> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0], PartitionKey::Unpartitioned);
    }

    #[test]
    fn prefix_match() {
        let key = AssetKey::new(["a", "b", "c"]);
        assert!(key.has_prefix(&["a".to_string(), "b".to_string()]));
        assert!(!key.has_prefix(&["b".to_string()]));
    }

    #[test]
    fn asset_partition_display() {
        let ap = AssetPartition {
            asset_key: "a".into(),
            partition_key: PartitionKey::key("1"),
        };
        assert_eq!(ap.to_string(), "a[1]");
    }
}
