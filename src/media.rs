use std::io::Cursor;

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use spin_sdk::http::Response;

use crate::config::{media_key, IMAGE_JPEG_QUALITY, MAX_IMAGE_DIMENSION};
use crate::core::context::AppContext;
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{new_id, require_id};

/// Durable blob storage for uploaded images.
pub trait MediaStore {
    /// Stores `data` and returns the URL it will be served from.
    fn upload(&self, data: &[u8], content_type: &str) -> anyhow::Result<String>;
    fn fetch(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Keeps blobs next to the documents, under `media:{id}`.
pub struct KvMediaStore<S> {
    store: S,
    base_url: String,
}

impl<S: KvStore> KvMediaStore<S> {
    pub fn new(store: S, base_url: &str) -> Self {
        Self {
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl<S: KvStore> MediaStore for KvMediaStore<S> {
    fn upload(&self, data: &[u8], content_type: &str) -> anyhow::Result<String> {
        let id = new_id();
        self.store.set(&media_key(&id), data)?;
        tracing::debug!(media_id = %id, content_type, bytes = data.len(), "stored media");
        Ok(format!("{}/media/{}", self.base_url, id))
    }

    fn fetch(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.store.get(&media_key(id))
    }
}

/// Decodes an uploaded image, shrinks it to fit inside
/// `MAX_IMAGE_DIMENSION` square (aspect kept, never enlarged) and re-encodes
/// it as JPEG.
pub fn transcode(data: &[u8]) -> Result<Vec<u8>, ApiError> {
    let decoded = image::load_from_memory(data).map_err(|err| {
        tracing::debug!(error = %err, "rejecting undecodable upload");
        ApiError::validation("Unsupported or corrupt image")
    })?;

    let fitted = if decoded.width() > MAX_IMAGE_DIMENSION || decoded.height() > MAX_IMAGE_DIMENSION {
        decoded.resize(MAX_IMAGE_DIMENSION, MAX_IMAGE_DIMENSION, FilterType::Lanczos3)
    } else {
        decoded
    };

    // JPEG has no alpha channel.
    let rgb = fitted.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, IMAGE_JPEG_QUALITY)
        .encode_image(&rgb)
        .context("jpeg encoding failed")?;
    Ok(out.into_inner())
}

/// Normalizes and stores an image, returning its URL.
pub fn store_image(ctx: &AppContext, data: &[u8]) -> Result<String, ApiError> {
    let jpeg = transcode(data)?;
    let url = ctx.media().upload(&jpeg, "image/jpeg")?;
    Ok(url)
}

// === HTTP Handlers ===

pub fn handle_get_media(ctx: &AppContext, raw_id: &str) -> Result<Response, ApiError> {
    let id = require_id(raw_id, "Media")?;
    let data = ctx
        .media()
        .fetch(&id)?
        .ok_or_else(|| ApiError::not_found("Media not found"))?;

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "image/jpeg")
        .header("Cache-Control", "public, max-age=31536000, immutable")
        .body(data)
        .build())
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 90, 128]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::test_context;

    fn dimensions(jpeg: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn large_images_shrink_to_fit() {
        let jpeg = transcode(&sample_png(1600, 1200)).unwrap();
        assert_eq!(dimensions(&jpeg), (800, 600));
    }

    #[test]
    fn tall_images_fit_by_height() {
        let jpeg = transcode(&sample_png(500, 2000)).unwrap();
        assert_eq!(dimensions(&jpeg), (200, 800));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let jpeg = transcode(&sample_png(120, 80)).unwrap();
        assert_eq!(dimensions(&jpeg), (120, 80));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = transcode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn stored_images_are_served_back() {
        let (ctx, _) = test_context();
        let url = store_image(&ctx, &sample_png(10, 10)).unwrap();
        let id = url.rsplit('/').next().unwrap();

        let resp = handle_get_media(&ctx, id).unwrap();
        assert_eq!(*resp.status(), 200);
        assert_eq!(dimensions(resp.body()), (10, 10));

        let missing = handle_get_media(&ctx, &new_id()).unwrap_err();
        assert!(matches!(missing, ApiError::NotFound(_)));
    }
}
