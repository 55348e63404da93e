use std::env;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use lookbook_contracts::storyboard::ImagePayload;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// All scene images are requested at the same portrait ratio.
pub const SCENE_ASPECT_RATIO: &str = "9:16";

/// First inline image payload found in a synthesis response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

pub fn image_part(payload: &ImagePayload) -> Value {
    json!({
        "inlineData": {
            "mimeType": payload.mime_type,
            "data": payload.data,
        }
    })
}

pub fn text_part(text: &str) -> Value {
    json!({ "text": text })
}

/// The hosted model boundary: two opaque call shapes. Structured calls return
/// parseable JSON text; image calls return the first inline image, or `None`
/// when the response legitimately omits one.
pub trait GenerationModel: Send + Sync {
    fn name(&self) -> &str;
    fn generate_structured(&self, parts: &[Value]) -> Result<Value>;
    fn generate_image(&self, parts: &[Value], aspect_ratio: &str) -> Result<Option<InlineImage>>;
}

pub struct GeminiModel {
    api_base: String,
    http: HttpClient,
    text_model: String,
    image_model: String,
}

impl GeminiModel {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl Default for GeminiModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_structured(&self, parts: &[Value]) -> Result<Value> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let response = self.post_content(&self.text_model, &payload)?;
        let text = extract_text(&response)
            .ok_or_else(|| anyhow::anyhow!("Gemini response carried no text part"))?;
        serde_json::from_str(&text).context("Gemini structured output is not valid JSON")
    }

    fn generate_image(&self, parts: &[Value], aspect_ratio: &str) -> Result<Option<InlineImage>> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "imageConfig": { "aspectRatio": aspect_ratio } },
        });
        let response = self.post_content(&self.image_model, &payload)?;
        Ok(extract_inline_image(&response))
    }
}

/// Deterministic offline model: canned structured output, solid-color PNG
/// scenes whose color derives from the prompt text.
pub struct DryrunModel;

impl DryrunModel {
    fn joined_text(parts: &[Value]) -> String {
        parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("\n")
    }

    fn has_inline_image(parts: &[Value]) -> bool {
        parts.iter().any(|part| part.get("inlineData").is_some())
    }
}

impl GenerationModel for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_structured(&self, parts: &[Value]) -> Result<Value> {
        // Identity analysis sends the two reference images; the plan call is
        // text-only.
        if Self::has_inline_image(parts) {
            return Ok(json!({
                "character": {
                    "gender": "nữ",
                    "hair": "tóc dài tự nhiên",
                    "age": "ngoài 20",
                    "original_outfit": "áo thun trắng, quần jean",
                },
                "target_outfit": {
                    "colors": ["be", "nâu"],
                    "materials": ["linen"],
                    "items": ["áo sơ mi", "chân váy"],
                    "description": "set linen be trang nhã",
                },
            }));
        }

        let instruction = Self::joined_text(parts);
        let rows: Vec<Value> = (1..=5)
            .map(|ordinal| {
                json!({
                    "scene_id": ordinal,
                    "scene_name": format!("Cảnh {ordinal}"),
                    "image_prompt_text": format!(
                        "Khung hình {ordinal}: {}",
                        truncate_text(&instruction, 48)
                    ),
                    "video_prompt_text": format!("Chuyển động máy quay cho cảnh {ordinal}"),
                })
            })
            .collect();
        Ok(Value::Array(rows))
    }

    fn generate_image(&self, parts: &[Value], _aspect_ratio: &str) -> Result<Option<InlineImage>> {
        let prompt = Self::joined_text(parts);
        let (r, g, b) = color_from_prompt(&prompt);
        let mut pixels = RgbImage::new(9, 16);
        for pixel in pixels.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        pixels
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .context("failed to encode dryrun scene image")?;
        Ok(Some(InlineImage {
            mime_type: "image/png".to_string(),
            data: BASE64.encode(bytes),
        }))
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// First text part across candidates.
pub fn extract_text(response: &Value) -> Option<String> {
    for part in candidate_parts(response) {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// First inline image part across candidates.
pub fn extract_inline_image(response: &Value) -> Option<InlineImage> {
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Some(InlineImage {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        });
    }
    None
}

fn candidate_parts(response: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        out.extend(parts);
    }
    out
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        let body = response.text().unwrap_or_default();
        bail!("{provider} request failed ({code}): {}", truncate_text(&body, 512));
    }
    response
        .json()
        .with_context(|| format!("failed parsing {provider} JSON response"))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extract_inline_image_walks_candidate_parts() {
        let response = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "mô tả" },
                        { "inlineData": { "mimeType": "image/png", "data": "QUJD" } },
                    ]
                }
            }]
        });
        let image = extract_inline_image(&response).expect("inline image");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "QUJD");
    }

    #[test]
    fn extract_inline_image_tolerates_missing_payloads() {
        assert!(extract_inline_image(&json!({})).is_none());
        assert!(extract_inline_image(&json!({
            "candidates": [{ "content": { "parts": [{ "text": "chỉ có chữ" }] } }]
        }))
        .is_none());
    }

    #[test]
    fn extract_text_prefers_first_non_empty_part() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "  " }, { "text": "{\"ok\":true}" }] }
            }]
        });
        assert_eq!(extract_text(&response).as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn dryrun_structured_distinguishes_identity_from_plan() -> Result<()> {
        let model = DryrunModel;
        let identity = model.generate_structured(&[
            image_part(&ImagePayload::from_bytes("image/png", b"a")),
            image_part(&ImagePayload::from_bytes("image/png", b"b")),
            text_part("Phân tích 2 ảnh"),
        ])?;
        assert!(identity.get("character").is_some());

        let plan = model.generate_structured(&[text_part("kịch bản 5 khung hình")])?;
        let rows = plan.as_array().expect("array plan");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0]["scene_id"], json!(1));
        Ok(())
    }

    #[test]
    fn dryrun_image_is_decodable_png() -> Result<()> {
        let model = DryrunModel;
        let inline = model
            .generate_image(&[text_part("cảnh 1")], SCENE_ASPECT_RATIO)?
            .expect("dryrun always renders");
        let bytes = BASE64.decode(inline.data.as_bytes())?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!(decoded.width(), 9);
        assert_eq!(decoded.height(), 16);
        Ok(())
    }

    #[test]
    fn dryrun_image_color_is_stable_per_prompt() -> Result<()> {
        let model = DryrunModel;
        let first = model.generate_image(&[text_part("cảnh 1")], SCENE_ASPECT_RATIO)?;
        let again = model.generate_image(&[text_part("cảnh 1")], SCENE_ASPECT_RATIO)?;
        let other = model.generate_image(&[text_part("cảnh 2")], SCENE_ASPECT_RATIO)?;
        assert_eq!(first, again);
        assert_ne!(first, other);
        Ok(())
    }

    #[test]
    fn gemini_endpoint_accepts_bare_and_prefixed_model_names() {
        let model = GeminiModel::new();
        assert!(model
            .endpoint_for_model("gemini-2.5-flash-image")
            .ends_with("/models/gemini-2.5-flash-image:generateContent"));
        assert!(model
            .endpoint_for_model("models/gemini-3-flash-preview")
            .ends_with("/models/gemini-3-flash-preview:generateContent"));
    }
}
