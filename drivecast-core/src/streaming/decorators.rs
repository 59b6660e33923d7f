//! Per-format response header decorators.
//!
//! Decorators only shape headers for client compatibility. They run after
//! the protocol headers are set and never touch status, length, or range.

use axum::http::header::{self, HeaderMap, HeaderValue};
use tracing::debug;

use crate::streaming::media_type::is_matroska;
use crate::upstream::MediaDescriptor;

/// Adds format-specific headers to stream responses.
pub trait ResponseDecorator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this decorator handles the descriptor's format.
    fn applies_to(&self, descriptor: &MediaDescriptor) -> bool;

    /// Adds headers. Called only when [`applies_to`](Self::applies_to) is true.
    fn decorate(&self, descriptor: &MediaDescriptor, headers: &mut HeaderMap);
}

/// Matroska playback hints.
///
/// Browser support for Matroska is uneven; an inline disposition keeps the
/// player from offering a download and `nosniff` stops content sniffing
/// from overriding the declared type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatroskaCompatibility;

impl ResponseDecorator for MatroskaCompatibility {
    fn name(&self) -> &'static str {
        "matroska"
    }

    fn applies_to(&self, descriptor: &MediaDescriptor) -> bool {
        is_matroska(&descriptor.classified_content_type)
    }

    fn decorate(&self, descriptor: &MediaDescriptor, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&inline_disposition(&descriptor.declared_name)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }
}

/// `Content-Disposition: inline` value carrying both an ASCII fallback
/// filename and the RFC 5987 encoded original.
pub fn inline_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();
    let fallback = if fallback.trim().is_empty() {
        "video".to_string()
    } else {
        fallback
    };

    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

/// Ordered set of decorators applied to every stream response.
pub struct DecoratorChain {
    decorators: Vec<Box<dyn ResponseDecorator>>,
}

impl DecoratorChain {
    /// Chain with no decorators.
    pub fn empty() -> Self {
        Self {
            decorators: Vec::new(),
        }
    }

    /// Chain with the built-in format decorators.
    pub fn standard() -> Self {
        Self::empty().with(MatroskaCompatibility)
    }

    /// Appends a decorator.
    pub fn with(mut self, decorator: impl ResponseDecorator + 'static) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    /// Runs every applicable decorator in order.
    pub fn apply(&self, descriptor: &MediaDescriptor, headers: &mut HeaderMap) {
        for decorator in &self.decorators {
            if decorator.applies_to(descriptor) {
                debug!("Applying {} headers to {}", decorator.name(), descriptor.id);
                decorator.decorate(descriptor, headers);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

impl Default for DecoratorChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.decorators.iter().map(|d| d.name()).collect();
        f.debug_struct("DecoratorChain").field("decorators", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn descriptor(name: &str, declared: &str) -> MediaDescriptor {
        let url = Url::parse("https://files.example.net/dl").unwrap();
        MediaDescriptor::new("item", name, 1024, declared, url)
    }

    #[test]
    fn test_matroska_gets_compatibility_headers() {
        let mut headers = HeaderMap::new();
        DecoratorChain::standard().apply(
            &descriptor("Trip 2019.mkv", "application/octet-stream"),
            &mut headers,
        );

        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        let disposition = headers.get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.starts_with("inline; filename=\"Trip 2019.mkv\""));
        assert!(disposition.contains("filename*=UTF-8''Trip%202019.mkv"));
    }

    #[test]
    fn test_audio_matroska_is_decorated() {
        let mut headers = HeaderMap::new();
        let descriptor = descriptor("set.mka", "application/octet-stream");
        DecoratorChain::standard().apply(&descriptor, &mut headers);

        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert!(headers.contains_key(header::CONTENT_DISPOSITION));
    }

    #[test]
    fn test_other_formats_are_untouched() {
        let mut headers = HeaderMap::new();
        DecoratorChain::standard().apply(&descriptor("clip.mp4", "video/mp4"), &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_disposition_fallback_is_ascii() {
        let value = inline_disposition("Überfilm \"cut\".mkv");
        assert!(value.starts_with("inline; filename=\"_berfilm _cut_.mkv\""));
        assert!(value.contains("filename*=UTF-8''%C3%9Cberfilm%20%22cut%22.mkv"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn test_empty_chain_does_nothing() {
        let chain = DecoratorChain::empty();
        assert!(chain.is_empty());

        let mut headers = HeaderMap::new();
        chain.apply(&descriptor("a.mkv", "video/x-matroska"), &mut headers);
        assert!(headers.is_empty());
    }
}
