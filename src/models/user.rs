//! Represents a platform account that can submit or review uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Privilege level attached to a user record.
///
/// `Superadmin` is the single distinguished role allowed to grant the
/// `Admin` role to others. Ordinary admins review uploads but cannot
/// promote users.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account.
///
/// Accounts are provisioned out-of-band (identity-provider sync or the
/// startup bootstrap); this service resolves bearer tokens against them but
/// never issues tokens itself.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Unique account email.
    pub email: String,

    /// Display name.
    pub name: String,

    /// Opaque bearer token presented in the `Authorization` header.
    /// Never serialized into responses.
    #[serde(skip_serializing, default)]
    pub api_token: String,

    /// Privilege level.
    pub role: Role,

    /// When the account was provisioned.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// True for both ordinary admins and the super-admin.
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Superadmin)
    }
}
