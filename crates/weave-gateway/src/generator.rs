//! Text generator trait

use crate::error::GatewayError;
use crate::types::{GenerationRequest, GenerationResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// A text-generation backend
///
/// Implementations must be safe to call concurrently; the pipeline issues
/// advisor and interconnection calls in parallel.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run one generation call
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError>;

    /// Backend name for logs
    fn name(&self) -> &str {
        "generator"
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        (**self).generate(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
