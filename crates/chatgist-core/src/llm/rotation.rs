//! Credential rotation on quota exhaustion.
//!
//! A [`CredentialCursor`] is created per operation. It starts at the model's
//! active credential and allows at most `pool_size - 1` rotations; once every
//! credential has been tried the operation fails with `QuotaExceeded`.

use std::future::Future;

use chatgist_types::error::GistError;
use chatgist_types::llm::ProviderError;

use crate::context::OperationContext;

use super::provider::GistModel;
use super::retry::{Retried, RetryError, RetryPolicy, retry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCursor {
    pool_size: usize,
    start: usize,
    rotations: usize,
}

impl CredentialCursor {
    pub fn new(pool_size: usize, start: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            pool_size,
            start: start % pool_size,
            rotations: 0,
        }
    }

    /// Cursor positioned at the model's active credential.
    pub fn for_model<M: GistModel>(model: &M) -> Self {
        Self::new(model.credential_count(), model.active_credential())
    }

    pub fn current(&self) -> usize {
        (self.start + self.rotations) % self.pool_size
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.rotations + 1 >= self.pool_size
    }

    /// Move to the next untried credential.
    pub fn rotate(&mut self) -> Result<usize, GistError> {
        if self.is_exhausted() {
            return Err(GistError::QuotaExceeded {
                pool_size: self.pool_size,
            });
        }
        self.rotations += 1;
        Ok(self.current())
    }
}

/// Retry `call` and, when the active credential's quota is spent, rotate to
/// the next one and invoke the same call again.
pub async fn call_with_rotation<M, T, F, Fut>(
    model: &M,
    cursor: &mut CredentialCursor,
    policy: &RetryPolicy,
    ctx: &OperationContext,
    operation: &'static str,
    mut call: F,
) -> Result<Retried<T>, GistError>
where
    M: GistModel,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    loop {
        match retry(policy, ctx, &mut call).await {
            Ok(retried) => return Ok(retried),
            Err(RetryError::QuotaExhausted(err)) => {
                let next = cursor.rotate()?;
                tracing::warn!(
                    provider = %model.name(),
                    operation,
                    credential = next,
                    error = %err,
                    "Quota exhausted, rotating credential"
                );
                model.select_credential(next);
            }
            Err(other) => return Err(other.into_gist_error(operation)),
        }
    }
}
