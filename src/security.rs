use regex::Regex;
use std::path::Path;
use crate::broadcast::hosts::clean_instance_id;
use crate::errors::{AppError, AppResult};

/// Longest text WhatsApp accepts in one message
pub const MAX_MESSAGE_CHARS: usize = 4096;
/// Ten minutes between two sends is already far beyond any sane pacing
pub const MAX_DELAY_MS: u64 = 600_000;
/// Files above this are refused before reading them into memory
pub const MAX_SOURCE_FILE_BYTES: u64 = 50 * 1024 * 1024;

fn pattern(re: &str) -> AppResult<Regex> {
    Regex::new(re).map_err(|e| AppError::Internal(format!("Invalid pattern {}: {}", re, e)))
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_account_name(name: &str) -> AppResult<()> {
        let trimmed = name.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("name", "Account name cannot be empty"));
        }

        if trimmed.chars().count() > 100 {
            return Err(AppError::validation("name", "Account name too long (max 100 characters)"));
        }

        let unsafe_chars = pattern(r"[<>\x00-\x1f]")?;
        if unsafe_chars.is_match(trimmed) {
            return Err(AppError::validation("name", "Account name contains invalid characters"));
        }

        Ok(())
    }

    pub fn validate_instance_id(instance_id: &str) -> AppResult<()> {
        let cleaned = clean_instance_id(instance_id);

        if cleaned.is_empty() {
            return Err(AppError::invalid_account("instance id cannot be empty"));
        }

        if !pattern(r"^[A-Za-z0-9_\-]{1,64}$")?.is_match(&cleaned) {
            return Err(AppError::invalid_account(
                "instance id may only contain letters, digits, '-' and '_'",
            ));
        }

        Ok(())
    }

    pub fn validate_token(token: &str) -> AppResult<()> {
        let trimmed = token.trim();

        if trimmed.is_empty() {
            return Err(AppError::invalid_account("token cannot be empty"));
        }

        if !pattern(r"^[A-Za-z0-9_\-]{4,128}$")?.is_match(trimmed) {
            return Err(AppError::invalid_account("token has an unexpected format"));
        }

        Ok(())
    }

    pub fn validate_message(text: &str, has_image: bool) -> AppResult<()> {
        if text.trim().is_empty() && !has_image {
            return Err(AppError::validation("text", "Message text or an image is required"));
        }

        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::validation("text", "Message is longer than 4096 characters"));
        }

        Ok(())
    }

    pub fn validate_delay_ms(delay_ms: u64) -> AppResult<()> {
        if delay_ms > MAX_DELAY_MS {
            return Err(AppError::validation("delay_ms", "Must be 600000ms (10 minutes) or less"));
        }
        Ok(())
    }

    /// Turn a typed phone number into the digits-only form the gateway
    /// expects. WhatsApp chat ids (`...@g.us`, `...@c.us`) pass through.
    pub fn normalize_phone(raw: &str) -> AppResult<String> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("phone", "Phone number cannot be empty"));
        }

        let lowered = trimmed.to_lowercase();
        if lowered.ends_with("@g.us") || lowered.ends_with("@c.us") {
            if !pattern(r"^[0-9\-]+@[gc]\.us$")?.is_match(&lowered) {
                return Err(AppError::validation("phone", "Malformed WhatsApp chat id"));
            }
            return Ok(lowered);
        }

        let compact: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
            .collect();
        let digits = compact
            .strip_prefix('+')
            .or_else(|| compact.strip_prefix("00"))
            .unwrap_or(&compact);

        if !pattern(r"^\d{7,15}$")?.is_match(digits) {
            return Err(AppError::validation(
                "phone",
                &format!("'{}' is not a dialable phone number", trimmed),
            ));
        }

        Ok(digits.to_string())
    }

    pub fn validate_file_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if path.contains("..") {
            return Err(AppError::validation("file_path", "Invalid file path detected"));
        }

        if let Some(extension) = path_obj.extension() {
            let ext = extension.to_string_lossy().to_lowercase();
            if !matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif") {
                return Err(AppError::invalid_file_type(path));
            }
        } else {
            return Err(AppError::validation("file_path", "File must have an extension"));
        }

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        Ok(())
    }

    pub fn validate_image_file(file_path: &str) -> AppResult<()> {
        Self::validate_file_path(file_path)?;

        let size = FileSystemGuard::get_file_size(file_path)?;
        if size > MAX_SOURCE_FILE_BYTES {
            return Err(AppError::file_too_large(file_path, MAX_SOURCE_FILE_BYTES / 1024 / 1024));
        }

        // Header only, the pixels are decoded later if at all
        image::ImageReader::open(file_path)?
            .with_guessed_format()?
            .into_dimensions()?;

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = match pattern(r#"[<>:"/\\|?*\x00-\x1f]"#) {
            Ok(unsafe_chars) => unsafe_chars.replace_all(filename.trim(), "_").to_string(),
            Err(_) => filename.trim().to_string(),
        };

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized
        }
    }
}

pub struct FileSystemGuard;

impl FileSystemGuard {
    pub fn get_file_size(path: &str) -> AppResult<u64> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.len())
    }
}
