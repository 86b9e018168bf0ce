// Share-link provisioning. The primary token source is a database function;
// when it fails we fall back to a locally generated token from the OS CSPRNG
// and retry the persistence write. Total failure is non-fatal: the invoice
// stands without a share link.

use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::InvoiceStore;

/// Length of locally generated fallback tokens: 12 alphanumeric characters,
/// matching what the database function produces.
pub const TOKEN_LENGTH: usize = 12;

#[async_trait]
pub trait TokenGenerator: Send + Sync {
    async fn generate(&self, invoice_id: Uuid) -> BillingResult<String>;
}

/// Primary path: the store's own token facility.
#[derive(Debug, Clone)]
pub struct PgTokenGenerator {
    pool: PgPool,
}

impl PgTokenGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenGenerator for PgTokenGenerator {
    async fn generate(&self, _invoice_id: Uuid) -> BillingResult<String> {
        let token = sqlx::query_scalar::<_, String>("SELECT generate_invoice_share_token()")
            .fetch_one(&self.pool)
            .await?;

        if token.is_empty() {
            return Err(BillingError::TokenGeneration(
                "database returned an empty token".to_string(),
            ));
        }

        Ok(token)
    }
}

/// Fallback path: OS CSPRNG, alphanumeric alphabet.
#[derive(Debug, Clone, Default)]
pub struct LocalTokenGenerator;

#[async_trait]
impl TokenGenerator for LocalTokenGenerator {
    async fn generate(&self, _invoice_id: Uuid) -> BillingResult<String> {
        let token: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();

        Ok(token)
    }
}

#[derive(Clone)]
pub struct ShareLinkProvisioner {
    primary: Arc<dyn TokenGenerator>,
    fallback: Arc<dyn TokenGenerator>,
    invoices: Arc<dyn InvoiceStore>,
}

impl ShareLinkProvisioner {
    pub fn new(
        primary: Arc<dyn TokenGenerator>,
        fallback: Arc<dyn TokenGenerator>,
        invoices: Arc<dyn InvoiceStore>,
    ) -> Self {
        Self {
            primary,
            fallback,
            invoices,
        }
    }

    /// Obtain and persist a share token for the invoice. Tries the primary
    /// generator first; on any error (generation or persistence) the
    /// fallback generator gets one attempt, including a fresh persistence
    /// write.
    pub async fn provision(&self, invoice_id: Uuid) -> BillingResult<String> {
        match self.generate_and_store(&*self.primary, invoice_id).await {
            Ok(token) => Ok(token),
            Err(err) => {
                warn!(
                    %invoice_id,
                    error = %err,
                    "Primary share token path failed, trying local fallback"
                );
                self.generate_and_store(&*self.fallback, invoice_id).await
            }
        }
    }

    async fn generate_and_store(
        &self,
        generator: &dyn TokenGenerator,
        invoice_id: Uuid,
    ) -> BillingResult<String> {
        let token = generator.generate(invoice_id).await?;
        self.invoices.set_share_token(invoice_id, &token).await?;
        Ok(token)
    }
}
