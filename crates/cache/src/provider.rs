use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use chainlet_model::{
    ModelProvider, ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
};
use pin_project_lite::pin_project;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::{Cache, CacheKey, CachedGeneration};

/// A provider that answers from a [`Cache`] when it can, and records the
/// inner provider's successful responses otherwise.
///
/// Cache failures never fail a request: lookups that error are treated as
/// misses, and writes that error are logged.
///
/// Lookups run inline. Writes run on tokio's blocking pool when a runtime is
/// available, and the recorded stream ends once its write has finished.
pub struct CachedProvider<P> {
    inner: P,
    cache: Arc<dyn Cache>,
}

impl<P: ModelProvider> CachedProvider<P> {
    /// Wraps `inner` with `cache`.
    #[inline]
    pub fn new(inner: P, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }

    /// Returns the wrapped provider.
    #[inline]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Returns the cache in use.
    #[inline]
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }
}

enum Lookup<F> {
    Hit(CachedGeneration),
    Miss(F),
}

impl<P: ModelProvider> ModelProvider for CachedProvider<P> {
    type Error = P::Error;
    type Response = CachedResponse<P::Response>;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let key = CacheKey::new(req, &self.inner.fingerprint());
        let cached = self.cache.lookup(&key).unwrap_or_else(|err| {
            warn!("cache lookup failed, treating as a miss: {err}");
            None
        });
        let lookup = match cached {
            Some(generation) => {
                debug!("cache hit for {key}");
                Lookup::Hit(generation)
            }
            None => {
                debug!("cache miss for {key}");
                Lookup::Miss(self.inner.send_request(req))
            }
        };
        let cache = Arc::clone(&self.cache);

        async move {
            match lookup {
                Lookup::Hit(generation) => Ok(CachedResponse::replay(generation)),
                Lookup::Miss(fut) => Ok(CachedResponse::record(fut.await?, cache, key)),
            }
        }
    }

    #[inline]
    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }
}

pin_project! {
    /// A response that either replays a cached generation or streams from
    /// the inner provider while recording it.
    pub struct CachedResponse<R> {
        #[pin]
        live: Option<R>,
        replay: VecDeque<ModelResponseEvent>,
        recorded: Vec<ModelResponseEvent>,
        sink: Option<(Arc<dyn Cache>, CacheKey)>,
        writing: Option<JoinHandle<()>>,
    }
}

impl<R> CachedResponse<R> {
    fn replay(generation: CachedGeneration) -> Self {
        Self {
            live: None,
            replay: generation.events.into(),
            recorded: vec![],
            sink: None,
            writing: None,
        }
    }

    fn record(live: R, cache: Arc<dyn Cache>, key: CacheKey) -> Self {
        Self {
            live: Some(live),
            replay: Default::default(),
            recorded: vec![],
            sink: Some((cache, key)),
            writing: None,
        }
    }

    /// Returns `true` if this response is served from the cache.
    #[inline]
    pub fn is_cache_hit(&self) -> bool {
        self.live.is_none()
    }
}

impl<R: ModelResponse> ModelResponse for CachedResponse<R> {
    type Error = R::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        if this.writing.is_some() {
            return poll_write(this.writing, cx);
        }
        let Some(live) = this.live.as_pin_mut() else {
            return Poll::Ready(Ok(this.replay.pop_front()));
        };

        match ready!(live.poll_next_event(cx)) {
            Ok(Some(event)) => {
                if this.sink.is_some() {
                    this.recorded.push(event.clone());
                }
                Poll::Ready(Ok(Some(event)))
            }
            Ok(None) => {
                if let Some((cache, key)) = this.sink.take() {
                    let generation = CachedGeneration {
                        events: mem::take(this.recorded),
                    };
                    match Handle::try_current() {
                        Ok(handle) => {
                            *this.writing = Some(handle.spawn_blocking(move || {
                                write_generation(&*cache, &key, generation)
                            }));
                            return poll_write(this.writing, cx);
                        }
                        Err(_) => write_generation(&*cache, &key, generation),
                    }
                }
                Poll::Ready(Ok(None))
            }
            Err(err) => {
                // Partial streams are never cached.
                if this.sink.take().is_some() {
                    this.recorded.clear();
                }
                Poll::Ready(Err(err))
            }
        }
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.live.as_ref()?.make_opaque_message()
    }
}

fn write_generation(cache: &dyn Cache, key: &CacheKey, generation: CachedGeneration) {
    match cache.update(key, generation) {
        Ok(()) => trace!("cached response for {key}"),
        Err(err) => warn!("failed to cache response: {err}"),
    }
}

fn poll_write<E>(
    writing: &mut Option<JoinHandle<()>>,
    cx: &mut Context<'_>,
) -> Poll<Result<Option<ModelResponseEvent>, E>> {
    if let Some(handle) = writing {
        if let Err(err) = ready!(Pin::new(handle).poll(cx)) {
            warn!("cache write task failed: {err}");
        }
        *writing = None;
    }
    Poll::Ready(Ok(None))
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use chainlet_model::{ErrorKind, ModelFinishReason, ModelProviderError, ToolCallRequest};
    use chainlet_test_model::{PresetEvent, PresetResponse, TestModelProvider};
    use serde_json::json;

    use super::*;
    use crate::{CacheError, CacheStats, InMemoryCache};

    async fn collect<R: ModelResponse>(
        resp: R,
    ) -> (Vec<ModelResponseEvent>, Option<OpaqueMessage>) {
        let mut resp = pin!(resp);
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }
        (events, resp.make_opaque_message())
    }

    fn cached(model: &TestModelProvider) -> CachedProvider<TestModelProvider> {
        CachedProvider::new(model.clone(), Arc::new(InMemoryCache::new()))
    }

    #[tokio::test]
    async fn test_replays_on_hit() {
        let model = TestModelProvider::default();
        model.push_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Checking.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "calculator".to_owned(),
                arguments: json!("1 + 1"),
            }),
        ]));
        model.push_response(PresetResponse::with_text("never served"));
        let provider = cached(&model);
        let req = ModelRequest::with_user_input("What is 1 + 1?");

        let first = provider.send_request(&req).await.unwrap();
        assert!(!first.is_cache_hit());
        let (live_events, opaque) = collect(first).await;
        assert!(opaque.is_some());
        assert_eq!(
            live_events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::ToolCalls))
        );

        let second = provider.send_request(&req).await.unwrap();
        assert!(second.is_cache_hit());
        let (replayed, opaque) = collect(second).await;
        assert_eq!(replayed, live_events);
        assert!(opaque.is_none());

        assert_eq!(model.requests().len(), 1);
        assert_eq!(model.remaining(), 1);
        assert_eq!(provider.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_fingerprint_separates_entries() {
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let mut cold = TestModelProvider::default();
        cold.set_label("cold");
        cold.push_response(PresetResponse::with_text("brr"));
        let mut warm = TestModelProvider::default();
        warm.set_label("warm");
        warm.push_response(PresetResponse::with_text("toasty"));

        let req = ModelRequest::with_user_input("How are you?");
        let cold = CachedProvider::new(cold, Arc::clone(&cache));
        let warm = CachedProvider::new(warm, Arc::clone(&cache));
        assert_eq!(warm.fingerprint(), "test-model:warm");

        collect(cold.send_request(&req).await.unwrap()).await;
        let resp = warm.send_request(&req).await.unwrap();
        assert!(!resp.is_cache_hit());
        let (events, _) = collect(resp).await;
        assert_eq!(events[0], ModelResponseEvent::MessageDelta("toasty".to_owned()));
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let model = TestModelProvider::default();
        model.push_response(PresetResponse::with_text("ok").with_failures(1));
        let provider = cached(&model);
        let req = ModelRequest::with_user_input("Hi");

        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(provider.cache().stats().entries, 0);

        collect(provider.send_request(&req).await.unwrap()).await;
        assert_eq!(provider.cache().stats().entries, 1);
    }

    #[tokio::test]
    async fn test_dropped_stream_is_not_cached() {
        let model = TestModelProvider::default();
        model.push_response(PresetResponse::with_text("partial"));
        let provider = cached(&model);
        let req = ModelRequest::with_user_input("Hi");

        let resp = provider.send_request(&req).await.unwrap();
        drop(resp);
        assert_eq!(provider.cache().stats().entries, 0);
    }

    struct WriterThread {
        inner: InMemoryCache,
        writer: std::sync::Mutex<Option<std::thread::ThreadId>>,
    }

    impl Cache for WriterThread {
        fn lookup(&self, key: &CacheKey) -> Result<Option<CachedGeneration>, CacheError> {
            self.inner.lookup(key)
        }

        fn update(
            &self,
            key: &CacheKey,
            generation: CachedGeneration,
        ) -> Result<(), CacheError> {
            *self.writer.lock().unwrap() = Some(std::thread::current().id());
            self.inner.update(key, generation)
        }

        fn clear(&self) -> Result<(), CacheError> {
            self.inner.clear()
        }

        fn stats(&self) -> CacheStats {
            self.inner.stats()
        }
    }

    #[tokio::test]
    async fn test_writes_off_the_polling_thread() {
        let model = TestModelProvider::default();
        model.push_response(PresetResponse::with_text("stored"));
        let cache = Arc::new(WriterThread {
            inner: InMemoryCache::new(),
            writer: Default::default(),
        });
        let provider = CachedProvider::new(model, cache.clone());
        let req = ModelRequest::with_user_input("Hi");

        collect(provider.send_request(&req).await.unwrap()).await;
        assert_eq!(cache.stats().entries, 1);
        let writer = cache.writer.lock().unwrap().unwrap();
        assert_ne!(writer, std::thread::current().id());
    }
}
