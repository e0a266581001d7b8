//! Client for the remote background-removal service.

use async_trait::async_trait;
use log::{info, warn};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::working_image::ImageData;

#[derive(Debug, thiserror::Error)]
pub enum BackgroundError {
    #[error("Invalid background color '{0}', expected #RRGGBB or 'transparent'")]
    InvalidColor(String),
    #[error("A background removal is already running for this session")]
    AlreadyRunning,
    #[error("No image to process")]
    NoImage,
    #[error("Background removal request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Background removal service answered {status}: {body}")]
    Service { status: u16, body: String },
    #[error("Background removal service returned an unreadable image: {0}")]
    InvalidResponse(#[source] image::ImageError),
}

/// Solid replacement background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackgroundColor {
    Solid([u8; 3]),
    Transparent,
}

impl Default for BackgroundColor {
    fn default() -> Self {
        BackgroundColor::Solid([255, 255, 255])
    }
}

impl FromStr for BackgroundColor {
    type Err = BackgroundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("transparent") {
            return Ok(BackgroundColor::Transparent);
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BackgroundError::InvalidColor(s.to_string()));
        }

        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| BackgroundError::InvalidColor(s.to_string()))
        };
        Ok(BackgroundColor::Solid([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for BackgroundColor {
    type Error = BackgroundError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackgroundColor> for String {
    fn from(value: BackgroundColor) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundColor::Solid([r, g, b]) => write!(f, "#{:02x}{:02x}{:02x}", r, g, b),
            BackgroundColor::Transparent => write!(f, "transparent"),
        }
    }
}

#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Returns the recomposited image. Implementations must not have side
    /// effects beyond the remote call.
    async fn remove_background(
        &self,
        image: &ImageData,
        color: BackgroundColor,
    ) -> Result<ImageData, BackgroundError>;
}

pub struct HttpBackgroundRemover {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackgroundRemover {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl BackgroundRemover for HttpBackgroundRemover {
    async fn remove_background(
        &self,
        image: &ImageData,
        color: BackgroundColor,
    ) -> Result<ImageData, BackgroundError> {
        let file = Part::bytes(image.png().to_vec())
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = Form::new().part("file", file).text("color", color.to_string());

        info!(
            "Sending image {} to background removal ({})",
            image.hash(),
            color
        );
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Background removal failed with {}: {}", status, body);
            return Err(BackgroundError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let processed = image::load_from_memory(&bytes).map_err(BackgroundError::InvalidResponse)?;
        ImageData::from_pixels(processed).map_err(BackgroundError::InvalidResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colors() {
        assert_eq!(
            "#ffffff".parse::<BackgroundColor>().unwrap(),
            BackgroundColor::Solid([255, 255, 255])
        );
        assert_eq!(
            "1E90ff".parse::<BackgroundColor>().unwrap(),
            BackgroundColor::Solid([0x1e, 0x90, 0xff])
        );
        assert_eq!(
            "Transparent".parse::<BackgroundColor>().unwrap(),
            BackgroundColor::Transparent
        );
    }

    #[test]
    fn test_reject_bad_colors() {
        for bad in ["", "#fff", "#gggggg", "blue", "#1234567"] {
            assert!(
                matches!(
                    bad.parse::<BackgroundColor>(),
                    Err(BackgroundError::InvalidColor(_))
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_color_wire_format() {
        assert_eq!(BackgroundColor::Solid([0, 128, 255]).to_string(), "#0080ff");
        assert_eq!(BackgroundColor::default().to_string(), "#ffffff");

        let parsed: BackgroundColor = serde_json::from_str("\"#00ff00\"").unwrap();
        assert_eq!(parsed, BackgroundColor::Solid([0, 255, 0]));
        assert!(serde_json::from_str::<BackgroundColor>("\"nope\"").is_err());
    }
}
