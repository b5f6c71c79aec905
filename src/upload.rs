// Image upload: encode as JPEG and PUT into a bucket under a fresh key

use crate::client::CloudVision;
use crate::error::{SyncError, SyncResult};
use crate::types::UploadedImage;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use std::path::Path;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const JPEG_QUALITY: u8 = 100;

/// Encode at maximum quality. Alpha is dropped.
pub fn encode_jpeg(image: &DynamicImage) -> SyncResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(SyncError::ImageEncoding("image has no pixels".to_string()));
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode(rgb.as_raw(), width, height, ColorType::Rgb8)
        .map_err(|e| SyncError::ImageEncoding(e.to_string()))?;
    Ok(buffer)
}

/// `{lowercase uuid v4}.jpg`
pub fn generate_image_key() -> String {
    format!("{}.jpg", uuid::Uuid::new_v4())
}

/// Decode an image file from disk (any format the `image` features enable).
pub fn load_image(path: &Path) -> SyncResult<DynamicImage> {
    image::open(path).map_err(|e| SyncError::ImageEncoding(format!("{:?}: {}", path, e)))
}

impl CloudVision {
    /// Encode `image` as JPEG and store it in `bucket` under a generated key.
    pub async fn upload_image(&self, image: &DynamicImage, bucket: &str) -> SyncResult<UploadedImage> {
        let jpeg = encode_jpeg(image)?;
        self.upload_jpeg(jpeg, bucket).await
    }

    /// Store already-encoded JPEG bytes in `bucket` under a generated key.
    pub async fn upload_jpeg(&self, jpeg: Vec<u8>, bucket: &str) -> SyncResult<UploadedImage> {
        let key = generate_image_key();
        let url = self.object_url(bucket, &key)?;
        let token = self.get_token().await?;
        let size = jpeg.len();

        log::info!("Uploading {} bytes to bucket '{}' as {}", size, bucket, key);

        let response = self
            .http
            .put(url.clone())
            .header(AUTHORIZATION, token.bearer())
            .header(CONTENT_TYPE, JPEG_CONTENT_TYPE)
            .header(CONTENT_LENGTH, size)
            .timeout(self.config.request_timeout)
            .body(jpeg)
            .send()
            .await
            .map_err(SyncError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Protocol {
                status: Some(status.as_u16()),
                message: format!("Upload of {} was rejected", key),
            });
        }

        Ok(UploadedImage {
            bucket: bucket.to_string(),
            key,
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, RgbaImage};

    #[test]
    fn encodes_rgb_image_as_jpeg() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, Rgb([200, 10, 10])));
        let bytes = encode_jpeg(&img).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn alpha_channel_is_dropped() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(3, 3));
        assert!(encode_jpeg(&img).is_ok());
    }

    #[test]
    fn empty_image_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(encode_jpeg(&img), Err(SyncError::ImageEncoding(_))));
    }

    #[test]
    fn keys_are_unique_lowercase_jpg() {
        let a = generate_image_key();
        let b = generate_image_key();
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a, a.to_lowercase());
        assert_eq!(a.len(), 36 + 4);
    }
}
