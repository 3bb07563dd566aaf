//! End-to-end tests for cached conversion

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::{CacheMetrics, CacheOperation, EvictionReason};
    use async_trait::async_trait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Upper-cases text files into `.png` siblings
    #[derive(Default)]
    struct Upcase {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
        lose_output: bool,
    }

    impl Upcase {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Converter for Upcase {
        async fn convert(
            &self,
            input: &Path,
            output_format: &str,
            _options: &ConversionOptions,
        ) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(CacheError::Conversion("decoder exploded".into()));
            }

            let output = self.output_location(input, output_format);
            if self.lose_output {
                return Ok(output.with_extension("lost"));
            }
            let bytes = tokio::fs::read(input).await?;
            tokio::fs::write(&output, bytes.to_ascii_uppercase()).await?;
            Ok(output)
        }

        fn supported_formats(&self) -> SupportedFormats {
            SupportedFormats::new(["txt"], ["png"])
        }
    }

    #[derive(Default)]
    struct Counting {
        hits: AtomicUsize,
        misses: AtomicUsize,
        fallbacks: AtomicUsize,
        keyed_fallbacks: AtomicUsize,
    }

    impl CacheMetrics for Counting {
        fn record_hit(&self, _key: &str) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        fn record_miss(&self, _key: &str) {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }
        fn record_latency(&self, _operation: CacheOperation, _duration: Duration) {}
        fn record_eviction(&self, _reason: EvictionReason) {}
        fn record_fallback(&self, key: Option<&str>) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
            if key.is_some() {
                self.keyed_fallbacks.fetch_add(1, Ordering::SeqCst);
            }
        }
        fn record_size(&self, _entries: usize, _bytes: u64) {}
    }

    struct Fixture {
        dir: TempDir,
        cache: ConversionCache,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with(|c| c).await
        }

        async fn with(config: impl FnOnce(CacheConfig) -> CacheConfig) -> Self {
            let dir = TempDir::new().unwrap();
            let cache = ConversionCache::open(config(CacheConfig::new(dir.path().join("cache"))))
                .await
                .unwrap();
            Self { dir, cache }
        }

        fn input(&self, name: &str, contents: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, contents).unwrap();
            path
        }
    }

    fn quality(q: i64) -> ConversionOptions {
        ConversionOptions::new().with("quality", q)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase::default());

        let first = convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();
        fs::remove_file(&first).unwrap();

        let second = convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();

        assert_eq!(converter.calls(), 1);
        assert_eq!(second, first);
        assert_eq!(fs::read(&second).unwrap(), b"HELLO");

        let info = fx.cache.info().await.unwrap();
        assert_eq!(info.entries, 1);
        assert_eq!(info.hits, 1);
    }

    #[tokio::test]
    async fn test_stored_entry_round_trips() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase::default());
        convert_with_cache(Some(&fx.cache), &converter, &input, "PNG", &quality(95))
            .await
            .unwrap();

        let key = crate::KeyGenerator::new()
            .key_for_path(&input, "png", &quality(95))
            .unwrap();
        let entry = fx
            .cache
            .store()
            .lookup(&key.to_string())
            .await
            .unwrap()
            .entry()
            .unwrap();

        assert_eq!(entry.output_format, "png");
        assert_eq!(entry.original_filename, "x.txt");
        assert_eq!(entry.conversion_options, quality(95));
        assert_eq!(entry.size_bytes, 5);
    }

    #[tokio::test]
    async fn test_inputs_are_discriminated() {
        let fx = Fixture::new().await;
        let a = fx.input("a.txt", b"same");
        let b = fx.input("b.txt", b"other");
        let converter = Arc::new(Upcase::default());

        for (input, q) in [(&a, 95), (&a, 80), (&b, 95), (&a, 95)] {
            convert_with_cache(Some(&fx.cache), &converter, input, "png", &quality(q))
                .await
                .unwrap();
        }

        assert_eq!(converter.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_convert_once() {
        let fx = Fixture::new().await;
        let payload = vec![b'a'; 256 * 1024];
        let input = fx.input("big.txt", &payload);
        let cache = fx.cache.clone();
        let converter = Arc::new(Upcase::slow(Duration::from_millis(50)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let converter = converter.clone();
            let input = input.clone();
            handles.push(tokio::spawn(async move {
                convert_with_cache(Some(&cache), &converter, &input, "png", &quality(95)).await
            }));
        }

        let expected = payload.to_ascii_uppercase();
        for handle in handles {
            let output = handle.await.unwrap().unwrap();
            assert_eq!(fs::read(&output).unwrap(), expected);
        }
        assert_eq!(converter.calls(), 1);

        // Requests that waited on the converting one were served from cache
        let info = cache.info().await.unwrap();
        assert_eq!(info.misses, 1);
        assert_eq!(info.hits, 7);
    }

    #[tokio::test]
    async fn test_abandoned_request_still_caches() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase::slow(Duration::from_millis(200)));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95)),
        )
        .await;
        assert!(abandoned.is_err());

        let mut stored = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if fx.cache.info().await.unwrap().entries == 1 {
                stored = true;
                break;
            }
        }
        assert!(stored, "conversion was dropped with its caller");

        convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();
        assert_eq!(converter.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_passes_through() {
        let fx = Fixture::with(CacheConfig::disabled).await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase::default());

        for _ in 0..2 {
            convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
                .await
                .unwrap();
        }
        convert_with_cache(None, &converter, &input, "png", &quality(95))
            .await
            .unwrap();

        assert_eq!(converter.calls(), 3);
        assert_eq!(fx.cache.info().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_conversion_error_surfaces_once() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase {
            fail: true,
            ..Default::default()
        });

        let err = convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Conversion(_)));
        assert_eq!(converter.calls(), 1);
    }

    #[tokio::test]
    async fn test_broken_cache_falls_back() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(Counting::default());
        let cache_dir = dir.path().join("cache");
        let cache = ConversionCache::open_with_metrics(CacheConfig::new(&cache_dir), metrics.clone())
            .await
            .unwrap();

        // Entry lookups now fail with ENOTDIR instead of NotFound
        fs::remove_dir_all(&cache_dir).unwrap();
        fs::write(&cache_dir, b"not a directory").unwrap();

        let input = dir.path().join("x.txt");
        fs::write(&input, b"hello").unwrap();
        let converter = Arc::new(Upcase::default());

        let output = convert_with_cache(Some(&cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();

        assert_eq!(fs::read(output).unwrap(), b"HELLO");
        assert_eq!(converter.calls(), 1);
        assert_eq!(metrics.fallbacks.load(Ordering::SeqCst), 1);
        // The key was already computed when the lookup failed
        assert_eq!(metrics.keyed_fallbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase {
            lose_output: true,
            ..Default::default()
        });

        let output = convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();

        assert_eq!(output.extension().unwrap(), "lost");
        let info = fx.cache.info().await.unwrap();
        assert_eq!(info.store_failures, 1);
        assert_eq!(info.entries, 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_reconverts() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase::default());
        convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();

        // Drop every cached artifact behind the store's back
        for entry in fs::read_dir(&fx.cache.config().store.cache_dir).unwrap() {
            let entry_dir = entry.unwrap().path();
            fs::remove_file(entry_dir.join("output.png")).unwrap();
        }

        let output = convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
            .await
            .unwrap();
        assert_eq!(fs::read(output).unwrap(), b"HELLO");
        assert_eq!(converter.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_hits() {
        let fx = Fixture::with(|c| c.ttl(Duration::ZERO)).await;
        let input = fx.input("x.txt", b"hello");
        let converter = Arc::new(Upcase::default());

        for _ in 0..2 {
            convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(converter.calls(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_enforces_size_cap() {
        let fx = Fixture::with(|c| c.max_size(2048)).await;
        let converter = Arc::new(Upcase::default());

        for name in ["a.txt", "b.txt", "c.txt"] {
            let input = fx.input(name, &[b'x'; 1000]);
            convert_with_cache(Some(&fx.cache), &converter, &input, "png", &quality(95))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = fx.cache.cleanup().await.unwrap();
        assert!(stats.evicted_for_size >= 2);
        assert!(stats.remaining_bytes <= 2048);

        // The newest entry is the survivor
        let c = fx.dir.path().join("c.txt");
        fs::remove_file(c.with_extension("png")).unwrap();
        convert_with_cache(Some(&fx.cache), &converter, &c, "png", &quality(95))
            .await
            .unwrap();
        assert_eq!(converter.calls(), 3);
    }

    #[tokio::test]
    async fn test_cached_converter_is_a_converter() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = CachedConverter::new(fx.cache.clone(), Upcase::default());

        assert!(converter.supported_formats().produces("png"));
        let boxed: Box<dyn Converter> = Box::new(converter);
        boxed.convert(&input, "png", &quality(95)).await.unwrap();
        boxed.convert(&input, "png", &quality(95)).await.unwrap();

        assert_eq!(fx.cache.info().await.unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_uncached_converter() {
        let fx = Fixture::new().await;
        let input = fx.input("x.txt", b"hello");
        let converter = CachedConverter::uncached(Upcase::default());
        assert!(converter.cache().is_none());

        converter.convert(&input, "png", &quality(95)).await.unwrap();
        converter.convert(&input, "png", &quality(95)).await.unwrap();
        assert_eq!(converter.inner().calls(), 2);
    }
}
