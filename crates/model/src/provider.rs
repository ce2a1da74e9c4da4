use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// An LLM wrapper: the entry point for sending requests to a model.
///
/// Once created, a provider should behave like a stateless object. It may
/// keep internal state (connection pools, counters), but callers must not
/// rely on it, and the provider may be dropped at any time.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a request to the model.
    ///
    /// The returned future must not borrow `self`.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Returns a stable string describing everything about this provider
    /// that affects its output: model name, sampling parameters, endpoint.
    ///
    /// Two providers with the same fingerprint must answer the same request
    /// interchangeably. Response caches combine it with the request to
    /// derive their keys.
    fn fingerprint(&self) -> String {
        std::any::type_name::<Self>().to_owned()
    }
}
