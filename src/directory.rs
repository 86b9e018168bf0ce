// Lookups the scheduler needs from the rest of the platform: client contact
// details, account display data, and a default actor identity for invoices
// created without an explicit author.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, FromRow)]
pub struct ClientContact {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
}

impl ClientContact {
    /// Company name when present, otherwise the personal name, otherwise a
    /// generic placeholder.
    pub fn display_name(&self) -> String {
        if let Some(company) = self.company.as_deref().filter(|c| !c.is_empty()) {
            return company.to_string();
        }
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if full.is_empty() {
            "Client".to_string()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AccountProfile {
    pub id: Uuid,
    pub company_name: Option<String>,
}

/// Identity stamped onto materialized invoices as their creator.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub display_name: String,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            user_id: None,
            display_name: "System".to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    async fn client(&self, id: Uuid) -> BillingResult<Option<ClientContact>>;

    async fn account(&self, id: Uuid) -> BillingResult<Option<AccountProfile>>;

    /// Default "created by" identity for an account. Falls back to a
    /// synthetic system actor when the account has no profiles.
    async fn default_actor(&self, account_id: Uuid) -> BillingResult<Actor>;
}

#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[async_trait]
impl Directory for PgDirectory {
    async fn client(&self, id: Uuid) -> BillingResult<Option<ClientContact>> {
        let client = sqlx::query_as::<_, ClientContact>(
            "SELECT id, first_name, last_name, company, email FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    async fn account(&self, id: Uuid) -> BillingResult<Option<AccountProfile>> {
        let account = sqlx::query_as::<_, AccountProfile>(
            "SELECT id, company_name FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn default_actor(&self, account_id: Uuid) -> BillingResult<Actor> {
        let profile = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id, first_name, last_name FROM profiles
             WHERE account_id = $1
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(profile) = profile else {
            return Ok(Actor::system());
        };

        let name = format!(
            "{} {}",
            profile.first_name.as_deref().unwrap_or(""),
            profile.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();

        Ok(Actor {
            user_id: Some(profile.user_id),
            display_name: if name.is_empty() {
                "System".to_string()
            } else {
                name.to_string()
            },
        })
    }
}
