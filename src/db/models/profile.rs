//! Profile model and role-based access control.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};

use super::common::{parse_string_list, ParseEnumError};

/// Application role carried by every profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Posts work requests and answers quotes
    Client,
    /// Accepts work requests and writes quotes
    Professional,
    /// Manages accounts and can override any status
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Professional => "professional",
            Role::Admin => "admin",
        }
    }

    /// Roles a visitor may pick for themselves at sign-up
    pub fn is_self_service(&self) -> bool {
        matches!(self, Role::Client | Role::Professional)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "professional" => Ok(Role::Professional),
            "admin" => Ok(Role::Admin),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub user_id: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub company_name: Option<String>,
    /// JSON array of specialty names
    pub specialties: Option<String>,
    pub hourly_rate: Option<f64>,
    pub bio: Option<String>,
    pub avatar_path: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Profile {
    /// Stored roles are validated on write; unknown values degrade to the least privileged role
    pub fn role_enum(&self) -> Role {
        self.role.parse().unwrap_or(Role::Client)
    }

    pub fn display_name(&self) -> String {
        match &self.company_name {
            Some(company) if self.role_enum() == Role::Professional && !company.is_empty() => {
                company.clone()
            }
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }

    pub fn to_response(&self, email: Option<String>) -> ProfileResponse {
        ProfileResponse {
            user_id: self.user_id.clone(),
            email,
            role: self.role_enum(),
            display_name: self.display_name(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            postal_code: self.postal_code.clone(),
            company_name: self.company_name.clone(),
            specialties: parse_string_list(self.specialties.as_deref()),
            hourly_rate: self.hourly_rate,
            bio: self.bio.clone(),
            avatar_url: self.avatar_path.as_ref().map(|p| format!("/uploads/{}", p)),
            is_active: self.is_active,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub company_name: Option<String>,
    pub specialties: Vec<String>,
    pub hourly_rate: Option<f64>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Profile joined with the account email, for admin listings
#[derive(Debug, Clone, FromRow)]
pub struct ProfileWithEmail {
    #[sqlx(flatten)]
    pub profile: Profile,
    pub email: String,
}

/// Partial update of the caller's own profile. Role and activation are admin-only.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub company_name: Option<String>,
    pub specialties: Option<Vec<String>>,
    pub hourly_rate: Option<f64>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfessionalQuery {
    pub specialty: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
    /// Matches email, first/last name or company name
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Fetch the profile row for an account
pub async fn get_profile<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: &str,
) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await
}
