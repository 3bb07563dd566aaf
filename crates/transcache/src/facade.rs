//! Caching in front of a [`Converter`]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};
use transcache_core::{
    CacheError, CacheKey, CacheOperation, ConversionOptions, Converter, KeyGenerator, Lookup,
    Result, SupportedFormats,
};

use crate::coordinator::{KeyGuard, Materialized};
use crate::service::ConversionCache;

/// Where a failure on the cached path came from
enum Fault {
    /// The wrapped converter failed; surfaced as is
    Converter(CacheError),
    /// The cache failed; the conversion is retried without it
    Cache {
        error: CacheError,
        key: Option<String>,
    },
}

impl Fault {
    fn cache(key: &str) -> impl FnOnce(CacheError) -> Fault + '_ {
        move |error| Fault::Cache {
            error,
            key: Some(key.to_string()),
        }
    }
}

/// Convert `input`, serving and filling the cache when one is available
///
/// Cache faults never reach the caller: they are logged and the conversion
/// runs uncached. Only errors from `converter` itself are returned.
///
/// On a miss the conversion and the store run on a spawned task that holds
/// the key's lock, so a caller that gives up early still leaves the result
/// cached for the next one.
pub async fn convert_with_cache<C>(
    cache: Option<&ConversionCache>,
    converter: &Arc<C>,
    input: &Path,
    output_format: &str,
    options: &ConversionOptions,
) -> Result<PathBuf>
where
    C: Converter + ?Sized,
{
    let Some(cache) = cache.filter(|c| c.is_enabled()) else {
        return converter.convert(input, output_format, options).await;
    };

    match cached(cache, converter, input, output_format, options).await {
        Ok(path) => Ok(path),
        Err(Fault::Converter(err)) => Err(err),
        Err(Fault::Cache { error, key }) => {
            warn!(
                input = %input.display(),
                format = output_format,
                key = key.as_deref().unwrap_or("-"),
                error = %error,
                "cache path failed, converting without cache"
            );
            cache.metrics().record_fallback(key.as_deref());
            converter.convert(input, output_format, options).await
        }
    }
}

async fn cached<C>(
    cache: &ConversionCache,
    converter: &Arc<C>,
    input: &Path,
    output_format: &str,
    options: &ConversionOptions,
) -> std::result::Result<PathBuf, Fault>
where
    C: Converter + ?Sized,
{
    let store = cache.store();
    let coordinator = cache.coordinator();
    let metrics = cache.metrics();

    let start = Instant::now();
    let key = {
        let input = input.to_path_buf();
        let format = output_format.to_string();
        let options = options.clone();
        store
            .pool()
            .run(move || KeyGenerator::new().key_for_path(&input, &format, &options))
            .await
            .map_err(|error| Fault::Cache { error, key: None })?
    };
    metrics.record_latency(CacheOperation::Hash, start.elapsed());

    let key_str = key.to_string();
    let dest = converter.output_location(input, output_format);

    // Each request is counted once, by how it was finally served
    if let Lookup::Hit(entry) = store.revalidate(&key_str).await.map_err(Fault::cache(&key_str))? {
        match coordinator
            .materialize(&entry, &dest)
            .await
            .map_err(Fault::cache(&key_str))?
        {
            Materialized::Copied(path) => {
                store.record_lookup(&key_str, true);
                debug!(key = %key_str, "served conversion from cache");
                return Ok(path);
            }
            Materialized::Vanished => {
                debug!(key = %key_str, "cached artifact vanished, reconverting");
            }
        }
    }

    // Single flight: whoever gets the lock first converts, the rest find
    // the stored entry on re-check
    let guard = coordinator.lock(&key_str).await;
    if let Lookup::Hit(entry) = store.revalidate(&key_str).await.map_err(Fault::cache(&key_str))? {
        if let Materialized::Copied(path) = coordinator
            .materialize_locked(&entry, &dest, &guard)
            .await
            .map_err(Fault::cache(&key_str))?
        {
            store.record_lookup(&key_str, true);
            debug!(key = %key_str, "served conversion from cache after wait");
            return Ok(path);
        }
    }
    store.record_lookup(&key_str, false);

    let task = tokio::spawn(convert_and_store(
        cache.clone(),
        converter.clone(),
        input.to_path_buf(),
        output_format.to_string(),
        options.clone(),
        key,
        guard,
    ));
    match task.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(Fault::Cache {
            error: CacheError::Io(format!("conversion task cancelled: {err}")),
            key: Some(key_str),
        }),
    }
}

/// Miss path, detached from the caller
///
/// Holds `guard` until the result is stored so waiters re-check after it.
async fn convert_and_store<C>(
    cache: ConversionCache,
    converter: Arc<C>,
    input: PathBuf,
    output_format: String,
    options: ConversionOptions,
    key: CacheKey,
    guard: KeyGuard,
) -> std::result::Result<PathBuf, Fault>
where
    C: Converter + ?Sized,
{
    let store = cache.store();
    let key_str = guard.key().to_string();

    let start = Instant::now();
    let output = converter
        .convert(&input, &output_format, &options)
        .await
        .map_err(Fault::Converter)?;
    cache
        .metrics()
        .record_latency(CacheOperation::Convert, start.elapsed());

    let original = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Err(err) = store
        .store(
            &key_str,
            &original,
            &output,
            key.output_format(),
            &options,
            store.config().default_ttl,
        )
        .await
    {
        warn!(key = %key_str, error = %err, "failed to cache conversion result");
    }

    drop(guard);
    Ok(output)
}

/// A [`Converter`] that caches another converter's results
///
/// Composes anywhere a converter is expected.
pub struct CachedConverter<C: ?Sized> {
    cache: Option<ConversionCache>,
    inner: Arc<C>,
}

impl<C: Converter> CachedConverter<C> {
    pub fn new(cache: ConversionCache, inner: C) -> Self {
        Self::shared(cache, Arc::new(inner))
    }

    /// Pass-through wrapper for when no cache could be opened
    pub fn uncached(inner: C) -> Self {
        Self {
            cache: None,
            inner: Arc::new(inner),
        }
    }
}

impl<C: Converter + ?Sized> CachedConverter<C> {
    /// Wrap a converter that is also used elsewhere
    pub fn shared(cache: ConversionCache, inner: Arc<C>) -> Self {
        Self {
            cache: Some(cache),
            inner,
        }
    }

    pub fn cache(&self) -> Option<&ConversionCache> {
        self.cache.as_ref()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: Converter + ?Sized> Converter for CachedConverter<C> {
    async fn convert(
        &self,
        input: &Path,
        output_format: &str,
        options: &ConversionOptions,
    ) -> Result<PathBuf> {
        convert_with_cache(self.cache.as_ref(), &self.inner, input, output_format, options).await
    }

    fn supported_formats(&self) -> SupportedFormats {
        self.inner.supported_formats()
    }

    fn output_location(&self, input: &Path, output_format: &str) -> PathBuf {
        self.inner.output_location(input, output_format)
    }
}
