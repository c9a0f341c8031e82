//! Shaped generation calls and per-run token metering

use crate::error::StageError;
use crate::shape::{parse_shape, Shape};
use async_trait::async_trait;
use parking_lot::Mutex;
use weave_gateway::{GatewayError, GenerationRequest, GenerationResponse, TextGenerator, TokenUsage};

/// Issue `request` and parse the response as `T`
///
/// Shape failures are returned as-is; they are never retried here.
///
/// # Errors
/// Returns error if the call fails or the text does not match `T`
pub async fn generate_shaped<T: Shape>(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
) -> Result<T, StageError> {
    let response = generator.generate(request).await?;
    parse_shape::<T>(&response.text).map_err(|e| {
        tracing::warn!(label = %request.label, error = %e, "response did not match its shape");
        StageError::Shape(e)
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct Meter {
    usage: TokenUsage,
    calls: u64,
    failures: u64,
}

/// Generator wrapper summing token usage over one run
pub struct MeteredGenerator<'a> {
    inner: &'a dyn TextGenerator,
    meter: Mutex<Meter>,
}

impl<'a> MeteredGenerator<'a> {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: &'a dyn TextGenerator) -> Self {
        Self {
            inner,
            meter: Mutex::new(Meter::default()),
        }
    }

    /// Tokens consumed so far
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        self.meter.lock().usage
    }

    /// Calls issued so far (successful, failed)
    #[must_use]
    pub fn calls(&self) -> (u64, u64) {
        let meter = self.meter.lock();
        (meter.calls, meter.failures)
    }
}

#[async_trait]
impl TextGenerator for MeteredGenerator<'_> {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let result = self.inner.generate(request).await;
        let mut meter = self.meter.lock();
        match &result {
            Ok(response) => {
                meter.calls += 1;
                meter.usage += response.usage;
            }
            Err(_) => meter.failures += 1,
        }
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{PatchSet, ShapeError};
    use weave_test_utils::ScriptedGenerator;

    #[tokio::test]
    async fn meter_sums_usage() {
        let scripted = ScriptedGenerator::new()
            .reply_with_usage("a", r#"{"patches": []}"#, TokenUsage::new(10, 5))
            .fail("b", GatewayError::Timeout { timeout_ms: 1 });
        let metered = MeteredGenerator::new(&scripted);

        let set: PatchSet = generate_shaped(&metered, &GenerationRequest::new("a", "", ""))
            .await
            .unwrap();
        assert!(set.patches.is_empty());
        let err = generate_shaped::<PatchSet>(&metered, &GenerationRequest::new("b", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Gateway(GatewayError::Timeout { .. })));

        assert_eq!(metered.usage(), TokenUsage::new(10, 5));
        assert_eq!(metered.calls(), (1, 1));
    }

    #[tokio::test]
    async fn shape_failure_is_not_a_gateway_error() {
        let scripted = ScriptedGenerator::new().reply("a", "sorry, no JSON today");
        let err = generate_shaped::<PatchSet>(&scripted, &GenerationRequest::new("a", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Shape(ShapeError::NoJson(_))));
        assert_eq!(err.failure_class(), None);
    }
}
