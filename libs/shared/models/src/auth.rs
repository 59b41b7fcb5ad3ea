use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor {
            id: Some(self.id.clone()),
            role: ActorRole::from_claim(self.role.as_deref()),
        }
    }
}

/// Role of whoever triggers a lifecycle operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Staff,
    User,
    Anonymous,
}

impl ActorRole {
    pub fn from_claim(role: Option<&str>) -> Self {
        match role.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("admin") => ActorRole::Admin,
            Some("staff") => ActorRole::Staff,
            Some("user") | Some("authenticated") => ActorRole::User,
            _ => ActorRole::Anonymous,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, ActorRole::Admin)
    }

    pub fn is_staff_or_admin(&self) -> bool {
        matches!(self, ActorRole::Admin | ActorRole::Staff)
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Admin => write!(f, "admin"),
            ActorRole::Staff => write!(f, "staff"),
            ActorRole::User => write!(f, "user"),
            ActorRole::Anonymous => write!(f, "anonymous"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Option<String>,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: Some(id.into()),
            role,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: None,
            role: ActorRole::Anonymous,
        }
    }

    /// Background jobs act with administrative rights but carry no user id.
    pub fn system() -> Self {
        Self {
            id: Some("system".to_string()),
            role: ActorRole::Admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_claims_map_to_actor_roles() {
        assert_eq!(ActorRole::from_claim(Some("admin")), ActorRole::Admin);
        assert_eq!(ActorRole::from_claim(Some("Staff")), ActorRole::Staff);
        assert_eq!(ActorRole::from_claim(Some("authenticated")), ActorRole::User);
        assert_eq!(ActorRole::from_claim(Some("doctor")), ActorRole::Anonymous);
        assert_eq!(ActorRole::from_claim(None), ActorRole::Anonymous);
    }
}
