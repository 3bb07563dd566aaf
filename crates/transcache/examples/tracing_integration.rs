use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use transcache::TracingMetrics; // Explicit import
use transcache::prelude::*;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

struct Passthrough;

#[async_trait]
impl Converter for Passthrough {
    async fn convert(
        &self,
        input: &Path,
        output_format: &str,
        _options: &ConversionOptions,
    ) -> Result<PathBuf> {
        let output = self.output_location(input, output_format);
        tokio::fs::copy(input, &output).await?;
        Ok(output)
    }

    fn supported_formats(&self) -> SupportedFormats {
        SupportedFormats::new(["txt"], ["md"])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing subscriber
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE) // TRACE shows latency records
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    println!("🔍 Initialized tracing...");

    // 2. Open the cache with the TracingMetrics adapter
    let workdir = std::env::temp_dir().join("transcache-tracing");
    tokio::fs::create_dir_all(&workdir).await?;
    let metrics = TracingMetrics::new().with_service_name("example-service");
    let config = CacheConfig::new(workdir.join("cache")).cleanup_interval(Duration::from_secs(1));
    let cache = ConversionCache::open_with_metrics(config, Arc::new(metrics)).await?;
    let maintenance = cache.start_maintenance();

    let input = workdir.join("notes.txt");
    tokio::fs::write(&input, b"# hello").await?;
    let converter = CachedConverter::new(cache.clone(), Passthrough);

    println!("\n⚡ Converting (miss)...");
    converter.convert(&input, "md", &ConversionOptions::new()).await?;

    println!("\n⚡ Converting again (hit)...");
    converter.convert(&input, "md", &ConversionOptions::new()).await?;

    println!("\n⏳ Waiting for a maintenance sweep...");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    maintenance.shutdown().await;

    println!("\n✅ Check your console output for structured logs!");
    Ok(())
}
