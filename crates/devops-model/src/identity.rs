//! Users, roles and claims managed by an endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A role defined on an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Server-side id.
    pub id: String,
    /// Role name (e.g. `SUPER_USER`).
    pub name: String,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Role {
    /// Create a role.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A claim defined on an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Server-side id.
    pub id: String,
    /// Claim name (e.g. `LIST_VM`).
    pub name: String,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claim {
    /// Create a claim.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A user account on an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Server-side id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Assigned roles.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Assigned claims.
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// Server fields not modelled explicitly.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Create a user with no roles or claims.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: None,
            email: None,
            roles: Vec::new(),
            claims: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Request body for creating or updating a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    /// Login name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Password; only sent when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Role names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Claim names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_deserializes_nested_roles() {
        let user: User = serde_json::from_value(json!({
            "id": "u1",
            "username": "root",
            "email": "root@example.com",
            "roles": [{"id": "r1", "name": "SUPER_USER"}],
            "isSuperUser": true
        }))
        .expect("valid user");

        assert_eq!(user.roles, vec![Role::new("r1", "SUPER_USER")]);
        assert!(user.claims.is_empty());
        assert_eq!(user.extra.get("isSuperUser"), Some(&json!(true)));
    }

    #[test]
    fn test_user_request_skips_unset_fields() {
        let request = UserRequest {
            name: Some("Jane".to_string()),
            ..UserRequest::default()
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value, json!({"name": "Jane"}));
    }
}
