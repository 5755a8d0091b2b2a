//! Wire types for the signal-field query service.
//!
//! The service speaks HTTP+JSON over three endpoints:
//! - Floorplan upload → base64 PNG of the (resized) floorplan plus its
//!   canonical pixel shape.
//! - Point query → binary image bytes of the computed field around a point.
//! - Best-point search → the sampled optimum as a `{row, col}` grid point.
//!
//! Failures arrive as non-2xx responses whose body is either a JSON
//! `{"detail": ...}` object or plain text; [`error_detail`] tolerates both.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use geometry::Extent;

/// Addressing for the query service. One instance per session; no globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: String,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload-floorplan", self.base_url)
    }

    pub fn point_query_url(&self) -> String {
        format!("{}/heatmap", self.base_url)
    }

    pub fn best_point_url(&self, sample_count: u32) -> String {
        format!("{}/best-router?sample_count={sample_count}", self.base_url)
    }
}

/// Body of a point query: canonical-space click coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointQuery {
    pub x: u32,
    pub y: u32,
}

/// A canonical-space grid location as the service reports it (row-major).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPoint {
    pub row: u32,
    pub col: u32,
}

/// Successful upload response.
///
/// `resized_shape` is `[height, width]`, matching the service's row-major
/// array shape convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub image_b64: String,
    pub resized_shape: [u32; 2],
}

impl UploadResponse {
    pub fn canonical_extent(&self) -> Extent {
        let [height, width] = self.resized_shape;
        Extent::new(width, height)
    }

    /// Decodes the base64 floorplan payload into encoded image bytes.
    pub fn decode_image(&self) -> Result<Vec<u8>, WireError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.image_b64)
            .map_err(|e| WireError::BadImagePayload(e.to_string()))
    }
}

/// Successful best-point response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPointResponse {
    pub best_point: GridPoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    BadImagePayload(String),
    BadBody(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::BadImagePayload(msg) => write!(f, "undecodable image payload: {msg}"),
            WireError::BadBody(msg) => write!(f, "undecodable response body: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}

pub fn parse_upload_response(body: &str) -> Result<UploadResponse, WireError> {
    serde_json::from_str(body).map_err(|e| WireError::BadBody(e.to_string()))
}

pub fn parse_best_point_response(body: &str) -> Result<BestPointResponse, WireError> {
    serde_json::from_str(body).map_err(|e| WireError::BadBody(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: String,
}

/// Extracts the human-readable detail from an error response body.
///
/// Non-JSON and empty bodies fall back to `fallback`; this path must never
/// fail, whatever the service sends.
pub fn error_detail(body: &str, fallback: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.detail.is_empty() => parsed.detail,
        _ => fallback.to_string(),
    }
}
