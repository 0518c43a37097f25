use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn actor_role(&self) -> ActorRole {
        ActorRole::from_claim(self.role.as_deref())
    }
}

/// Who is acting on a slot. Only `Admin` may override payment-ledger guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Practitioner,
    Client,
}

impl ActorRole {
    pub fn from_claim(role: Option<&str>) -> Self {
        match role {
            Some("admin") | Some("service_role") => ActorRole::Admin,
            Some("practitioner") | Some("doctor") => ActorRole::Practitioner,
            _ => ActorRole::Client,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, ActorRole::Admin)
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, ActorRole::Admin | ActorRole::Practitioner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_claims_map_to_actor_roles() {
        assert_eq!(ActorRole::from_claim(Some("admin")), ActorRole::Admin);
        assert_eq!(ActorRole::from_claim(Some("practitioner")), ActorRole::Practitioner);
        assert_eq!(ActorRole::from_claim(Some("authenticated")), ActorRole::Client);
        assert_eq!(ActorRole::from_claim(None), ActorRole::Client);
    }

    #[test]
    fn only_admin_is_privileged() {
        assert!(ActorRole::Admin.is_privileged());
        assert!(!ActorRole::Practitioner.is_privileged());
        assert!(ActorRole::Practitioner.is_operator());
        assert!(!ActorRole::Client.is_operator());
    }
}
