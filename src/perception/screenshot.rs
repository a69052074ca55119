use base64::Engine as _;
use image::DynamicImage;

use crate::errors::{DeskZoomError, DeskZoomResult};

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> DeskZoomResult<Vec<u8>> {
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| DeskZoomError::Perception(format!("PNG encode: {e}")))?;
    Ok(out)
}

/// Encode an image as a `data:image/png;base64,…` URI, the form the model
/// gateway and the task store both accept.
pub fn to_data_uri(img: &DynamicImage) -> DeskZoomResult<String> {
    let png = encode_png(img)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
    Ok(format!("data:image/png;base64,{b64}"))
}

/// Decode a base64 image, with or without a data-URI prefix.
pub fn from_base64(payload: &str) -> DeskZoomResult<DynamicImage> {
    let b64 = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| DeskZoomError::Perception(format!("base64 decode: {e}")))?;
    image::load_from_memory(&bytes)
        .map_err(|e| DeskZoomError::Perception(format!("load image: {e}")))
}
