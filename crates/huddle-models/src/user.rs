use serde::{Deserialize, Serialize};

/// A resolved user identity. Immutable for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub username: String,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(id: i64, username: impl Into<String>, display_name: Option<String>) -> Self {
        let username = username.into();
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| username.clone());
        Self {
            id,
            username,
            display_name,
        }
    }
}
