//! The conversion capability the cache wraps

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{ConversionOptions, Result};

/// Formats a converter accepts and produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupportedFormats {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

impl SupportedFormats {
    pub fn new<I, O, S, T>(input: I, output: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            input: input.into_iter().map(Into::into).collect(),
            output: output.into_iter().map(Into::into).collect(),
        }
    }

    /// Case-insensitive input check
    pub fn accepts(&self, format: &str) -> bool {
        self.input.iter().any(|f| f.eq_ignore_ascii_case(format))
    }

    /// Case-insensitive output check
    pub fn produces(&self, format: &str) -> bool {
        self.output.iter().any(|f| f.eq_ignore_ascii_case(format))
    }
}

/// A format converter
///
/// Treated by the cache as an opaque, possibly slow, possibly failing black
/// box. Failures must be reported as [`crate::CacheError::Conversion`] or
/// [`crate::CacheError::UnsupportedFormat`] so the caching layer can tell
/// them apart from its own faults.
#[async_trait]
pub trait Converter: Send + Sync + 'static {
    /// Convert `input` and return the path of the produced file
    async fn convert(
        &self,
        input: &Path,
        output_format: &str,
        options: &ConversionOptions,
    ) -> Result<PathBuf>;

    /// Formats this converter handles
    fn supported_formats(&self) -> SupportedFormats;

    /// Where a conversion of `input` to `output_format` is expected to land
    ///
    /// Cache hits are materialized at this path. Defaults to a sibling of the
    /// input with the extension swapped.
    fn output_location(&self, input: &Path, output_format: &str) -> PathBuf {
        input.with_extension(output_format.to_ascii_lowercase())
    }
}

#[async_trait]
impl<C: Converter + ?Sized> Converter for Arc<C> {
    async fn convert(
        &self,
        input: &Path,
        output_format: &str,
        options: &ConversionOptions,
    ) -> Result<PathBuf> {
        (**self).convert(input, output_format, options).await
    }

    fn supported_formats(&self) -> SupportedFormats {
        (**self).supported_formats()
    }

    fn output_location(&self, input: &Path, output_format: &str) -> PathBuf {
        (**self).output_location(input, output_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheError;

    struct Uppercase;

    #[async_trait]
    impl Converter for Uppercase {
        async fn convert(
            &self,
            input: &Path,
            output_format: &str,
            _options: &ConversionOptions,
        ) -> Result<PathBuf> {
            if !self.supported_formats().produces(output_format) {
                return Err(CacheError::UnsupportedFormat(output_format.to_string()));
            }
            Ok(self.output_location(input, output_format))
        }

        fn supported_formats(&self) -> SupportedFormats {
            SupportedFormats::new(["txt"], ["md"])
        }
    }

    #[test]
    fn test_supported_formats() {
        let formats = SupportedFormats::new(["jpg", "png"], ["webp"]);
        assert!(formats.accepts("JPG"));
        assert!(formats.produces("webp"));
        assert!(!formats.produces("gif"));
    }

    #[test]
    fn test_default_output_location() {
        let path = Uppercase.output_location(Path::new("/data/in/notes.txt"), "MD");
        assert_eq!(path, PathBuf::from("/data/in/notes.md"));
    }

    #[tokio::test]
    async fn test_arc_delegates() {
        let conv: Arc<dyn Converter> = Arc::new(Uppercase);
        let out = conv
            .convert(Path::new("a.txt"), "md", &ConversionOptions::new())
            .await
            .unwrap();
        assert_eq!(out, PathBuf::from("a.md"));

        let err = conv
            .convert(Path::new("a.txt"), "pdf", &ConversionOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_conversion());
    }
}
