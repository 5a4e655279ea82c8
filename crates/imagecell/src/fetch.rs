//! Image acquisition.
//!
//! [`HttpImageFetcher`] downloads a URL with a bounded timeout and a browser
//! User-Agent, then [`normalize_image`] decodes the payload, drops any alpha
//! channel and re-encodes it as PNG. Everything stays in memory; the buffers
//! are dropped when the caller is done with the [`FetchedImage`].

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::convert::ConvertOptions;
use crate::error::{ConvertError, FetchError};

/// A downloaded image, re-encoded as PNG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    /// PNG bytes
    pub png: Vec<u8>,
    /// Natural width in pixels
    pub width: u32,
    /// Natural height in pixels
    pub height: u32,
}

/// Something that can turn a URL into image bytes.
///
/// The HTTP implementation is [`HttpImageFetcher`]; tests and offline
/// callers can plug in their own.
pub trait ImageSource {
    /// Fetch and normalize the image at `url`
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

/// Fetches images over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::blocking::Client,
}

impl HttpImageFetcher {
    /// Build a fetcher using the timeout and User-Agent from `options`
    pub fn from_options(options: &ConvertOptions) -> Result<Self, ConvertError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(options.fetch_timeout)
            .user_agent(options.user_agent.as_str())
            .build()
            .map_err(|e| ConvertError::InvalidOptions(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::Network(e.to_string()))?;

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

impl ImageSource for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let url = url.trim();
        log::debug!("fetching image {url}");
        let bytes = self.download(url)?;
        normalize_image(&bytes)
    }
}

/// Decode `bytes` as an image and re-encode it as PNG.
///
/// Images with an alpha channel (including palette images with
/// transparency) are flattened to RGB.
pub fn normalize_image(bytes: &[u8]) -> Result<FetchedImage, FetchError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| FetchError::InvalidImage(e.to_string()))?;

    let decoded = if decoded.color().has_alpha() {
        DynamicImage::ImageRgb8(decoded.into_rgb8())
    } else {
        decoded
    };

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| FetchError::InvalidImage(e.to_string()))?;

    Ok(FetchedImage {
        png,
        width: decoded.width(),
        height: decoded.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn rgba_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 128]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_normalize_flattens_alpha() {
        let fetched = normalize_image(&rgba_png(4, 3)).unwrap();
        assert_eq!((fetched.width, fetched.height), (4, 3));

        let reloaded = image::load_from_memory(&fetched.png).unwrap();
        assert!(!reloaded.color().has_alpha());
        assert_eq!(image::guess_format(&fetched.png).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_normalize_rejects_non_images() {
        let err = normalize_image(b"<html>not found</html>").unwrap_err();
        assert!(matches!(err, FetchError::InvalidImage(_)));
        assert!(err.to_string().starts_with("Invalid image format: "));
    }
}
