use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;

use crate::commands::MediaFile;
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

/// Read an image from disk and get it ready for the gateway.
///
/// Files above the configured size limit are re-encoded as JPEG. A `data:`
/// URL preview is attached when inline fallback is enabled.
pub async fn load_media_file(file_path: &str, config: &Config) -> AppResult<MediaFile> {
    InputValidator::validate_image_file(file_path)?;

    let bytes = tokio::fs::read(file_path).await?;
    let format = image::guess_format(&bytes)?;
    if !is_supported_format(format) {
        return Err(AppError::invalid_file_type(file_path));
    }
    let max_bytes = config.max_image_size_mb * 1024 * 1024;

    let file_name = Path::new(file_path)
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let file_name = InputValidator::sanitize_filename(&file_name);

    let (file_name, bytes, mime_type) = if should_compress_image(bytes.len() as u64, max_bytes) {
        log::info!(
            "{} is {} KB, re-encoding as JPEG (quality {})",
            file_name,
            bytes.len() / 1024,
            config.compress_quality
        );
        let compressed = compress_image_bytes(&bytes, config.compress_quality)?;
        if compressed.len() as u64 > max_bytes {
            return Err(AppError::file_too_large(file_path, config.max_image_size_mb));
        }
        let stem = Path::new(&file_name)
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        (format!("{}.jpg", stem), compressed, "image/jpeg".to_string())
    } else {
        (file_name, bytes, format.to_mime_type().to_string())
    };

    let preview = if config.inline_image_fallback {
        Some(build_preview_data_url(&bytes, &mime_type))
    } else {
        None
    };

    log::info!(
        "Loaded {} ({} KB, {})",
        file_name,
        bytes.len() / 1024,
        mime_type
    );

    Ok(MediaFile {
        file_name,
        bytes,
        mime_type,
        preview,
    })
}

pub fn should_compress_image(size_bytes: u64, max_bytes: u64) -> bool {
    size_bytes > max_bytes
}

pub fn build_preview_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Re-encode an image as JPEG, shrinking very large dimensions first.
pub fn compress_image_bytes(bytes: &[u8], quality: u8) -> AppResult<Vec<u8>> {
    if quality == 0 || quality > 100 {
        return Err(AppError::validation(
            "quality",
            "Quality must be between 1 and 100",
        ));
    }

    let mut img = image::load_from_memory(bytes)?;

    const MAX_DIMENSION: u32 = 4096;
    if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        log::info!("Resizing large image from {}x{}", img.width(), img.height());
        img = img.resize(
            MAX_DIMENSION,
            MAX_DIMENSION,
            image::imageops::FilterType::Lanczos3,
        );
    }

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();

    let mut output = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut output), quality);
    rgb.write_with_encoder(encoder)?;

    Ok(output)
}

pub fn is_supported_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Gif
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encoded_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_preview_data_url() {
        assert_eq!(
            build_preview_data_url(b"hi", "image/png"),
            "data:image/png;base64,aGk="
        );
    }

    #[test]
    fn test_compress_image_bytes_produces_jpeg() {
        let jpeg = compress_image_bytes(&encoded_png(64, 32), 80).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        assert!(compress_image_bytes(&encoded_png(4, 4), 0).is_err());
    }

    #[tokio::test]
    async fn test_load_media_file_with_preview() {
        let path = write_temp("broadcaster_load_media.png", &encoded_png(8, 8));
        let config = Config::default();

        let media = load_media_file(&path.to_string_lossy(), &config).await;
        let _ = std::fs::remove_file(&path);

        let media = media.unwrap();
        assert_eq!(media.file_name, "broadcaster_load_media.png");
        assert_eq!(media.mime_type, "image/png");
        assert!(media
            .preview
            .as_deref()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_load_media_file_without_preview() {
        let path = write_temp("broadcaster_no_preview.png", &encoded_png(8, 8));
        let config = Config {
            inline_image_fallback: false,
            ..Config::default()
        };

        let media = load_media_file(&path.to_string_lossy(), &config).await;
        let _ = std::fs::remove_file(&path);

        assert!(media.unwrap().preview.is_none());
    }

    #[tokio::test]
    async fn test_load_media_file_rejects_non_image() {
        let path = write_temp("broadcaster_fake.png", b"This is not an image");

        let result = load_media_file(&path.to_string_lossy(), &Config::default()).await;
        let _ = std::fs::remove_file(&path);

        assert!(result.is_err());
    }

    #[test]
    fn test_should_compress_image() {
        assert!(!should_compress_image(1024, 16 * 1024 * 1024));
        assert!(should_compress_image(17 * 1024 * 1024, 16 * 1024 * 1024));
    }
}
