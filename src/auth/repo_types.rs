use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::profile::Profile;
use crate::error::StoreError;

/// Portal role. Selects the profile variant and is part of the login key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Provider,
    Payor,
}

#[derive(Debug, Error)]
#[error("Role must be one of patient, provider, payor")]
pub struct UnknownRole;

impl Role {
    pub const ALL: [Role; 3] = [Role::Patient, Role::Provider, Role::Payor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Provider => "provider",
            Role::Payor => "payor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "provider" => Ok(Role::Provider),
            "payor" => Ok(Role::Payor),
            _ => Err(UnknownRole),
        }
    }
}

/// User record as held by the store. Deliberately not `Serialize`: the only
/// way out of the service is [`User::safe_view`].
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String, // argon2 PHC string
    pub name: String,
    pub profile: Profile,
    pub is_active: bool,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    /// The user without its password hash.
    pub fn safe_view(&self) -> SafeUser {
        SafeUser {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            profile: self.profile.clone(),
            is_active: self.is_active,
            last_login: self.last_login,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Sanitized user returned to clients and cached by the session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(flatten)]
    pub profile: Profile, // emits `role` and `profile`
    pub is_active: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SafeUser {
    pub fn role(&self) -> Role {
        self.profile.role()
    }
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub profile: Json<serde_json::Value>,
    pub is_active: bool,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role: Role = r
            .role
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("user {} has role {:?}", r.id, r.role)))?;
        let profile = Profile::from_input(role, r.profile.0)
            .map_err(|e| StoreError::Corrupt(format!("user {}: {e}", r.id)))?;
        Ok(User {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            name: r.name,
            profile,
            is_active: r.is_active,
            last_login: r.last_login,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}
