use serde::{Deserialize, Serialize};

use cadence_core::AssetKey;

/// A filter over dependency asset keys, used by the dependency fan-out
/// conditions to include or exclude parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSelection {
    /// Exactly these assets.
    Keys(Vec<AssetKey>),
    /// Every asset whose path starts with these segments.
    KeyPrefix(Vec<String>),
}

impl AssetSelection {
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        AssetSelection::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn key_prefix(prefix: &str) -> Self {
        AssetSelection::KeyPrefix(AssetKey::from_user_string(prefix).path().to_vec())
    }

    pub fn matches(&self, key: &AssetKey) -> bool {
        match self {
            AssetSelection::Keys(keys) => keys.contains(key),
            AssetSelection::KeyPrefix(prefix) => key.has_prefix(prefix),
        }
    }
}

impl std::fmt::Display for AssetSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetSelection::Keys(keys) => {
                let names: Vec<String> = keys.iter().map(|k| k.to_user_string()).collect();
                write!(f, "[{}]", names.join(", "))
            }
            AssetSelection::KeyPrefix(prefix) => write!(f, "prefix {}/", prefix.join("/")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_selection_matches_nested_keys() {
        let sel = AssetSelection::key_prefix("raw");
        assert!(sel.matches(&AssetKey::from_user_string("raw/events")));
        assert!(!sel.matches(&AssetKey::from_user_string("mart/events")));
        assert_eq!(sel.to_string(), "prefix raw/");
    }

    #[test]
    fn keys_selection_from_yaml() {
        let sel: AssetSelection = serde_yaml::from_str("keys: [a, b/c]").unwrap();
        assert!(sel.matches(&AssetKey::from_user_string("b/c")));
        assert_eq!(sel.to_string(), "[a, b/c]");
    }
}
