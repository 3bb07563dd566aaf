use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use transcache::prelude::*;

/// Stand-in for a real image converter
struct SlowCopy;

#[async_trait]
impl Converter for SlowCopy {
    async fn convert(
        &self,
        input: &Path,
        output_format: &str,
        _options: &ConversionOptions,
    ) -> Result<PathBuf> {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let output = self.output_location(input, output_format);
        tokio::fs::copy(input, &output).await?;
        Ok(output)
    }

    fn supported_formats(&self) -> SupportedFormats {
        SupportedFormats::new(["jpg", "jpeg"], ["png", "webp"])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let workdir = std::env::temp_dir().join("transcache-basic");
    tokio::fs::create_dir_all(&workdir).await?;
    let input = workdir.join("photo.jpg");
    tokio::fs::write(&input, b"not really a jpeg").await?;

    println!("📦 Opening cache in {}", workdir.join("cache").display());
    let cache = ConversionCache::open(CacheConfig::new(workdir.join("cache"))).await?;
    let converter = CachedConverter::new(cache.clone(), SlowCopy);
    let options = ConversionOptions::new().with("quality", 95);

    for attempt in 1..=3 {
        let start = Instant::now();
        let output = converter.convert(&input, "png", &options).await?;
        println!(
            "   #{attempt}: {} in {:?}",
            output.display(),
            start.elapsed()
        );
    }

    let info = cache.info().await?;
    println!(
        "\n📊 {} entries, {} bytes, hit rate {:.0}%",
        info.entries,
        info.total_bytes,
        info.hit_rate * 100.0
    );

    println!("🧹 Cleared {} entries", cache.clear().await?);
    Ok(())
}
