//! Caller identity: roles, borrower types and JWT claims

use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Postgres};
use utoipa::ToSchema;

use crate::error::{AppError, LedgerError};

/// Campus role carried in the identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Faculty,
    Admin,
    CanteenStaff,
}

impl Role {
    /// Borrower type for roles allowed to hold loans
    pub fn borrower_type(&self) -> Option<BorrowerType> {
        match self {
            Role::Student => Some(BorrowerType::Student),
            Role::Faculty => Some(BorrowerType::Faculty),
            Role::Admin | Role::CanteenStaff => None,
        }
    }

    /// Roles allowed to act on other people's loans
    pub fn is_library_staff(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Borrower category, fixed on the loan at borrow time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BorrowerType {
    Student,
    Faculty,
}

impl BorrowerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowerType::Student => "student",
            BorrowerType::Faculty => "faculty",
        }
    }
}

impl std::fmt::Display for BorrowerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BorrowerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "student" => Ok(BorrowerType::Student),
            "faculty" => Ok(BorrowerType::Faculty),
            _ => Err(format!("Invalid borrower type: {}", s)),
        }
    }
}

// SQLx conversion for BorrowerType
impl sqlx::Type<Postgres> for BorrowerType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for BorrowerType {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for BorrowerType {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// JWT claims issued by the campus identity service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub user_id: i32,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl UserClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    // Authorization checks
    pub fn require_library_staff(&self) -> Result<(), LedgerError> {
        if self.role.is_library_staff() {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(
                "Library staff role required".to_string(),
            ))
        }
    }

    /// The caller must be the borrower or library staff
    pub fn require_borrower_or_staff(&self, borrower_id: i32) -> Result<(), LedgerError> {
        if self.user_id == borrower_id || self.role.is_library_staff() {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(
                "Only the borrower or library staff may access this loan".to_string(),
            ))
        }
    }

    /// Work out who a borrow request is for.
    ///
    /// Students and faculty borrow for themselves; staff must name the
    /// borrower and their type.
    pub fn resolve_borrower(
        &self,
        borrower_id: Option<i32>,
        borrower_type: Option<BorrowerType>,
    ) -> Result<(i32, BorrowerType), AppError> {
        if let Some(own_type) = self.role.borrower_type() {
            if borrower_id.map_or(false, |id| id != self.user_id) {
                return Err(LedgerError::Unauthorized(
                    "Only library staff may borrow on behalf of another user".to_string(),
                )
                .into());
            }
            return Ok((self.user_id, own_type));
        }

        self.require_library_staff()?;
        match (borrower_id, borrower_type) {
            (Some(id), Some(t)) => Ok((id, t)),
            _ => Err(AppError::BadRequest(
                "borrower_id and borrower_type are required when issuing for a borrower".to_string(),
            )),
        }
    }
}
