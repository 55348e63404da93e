use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Fixed stand-in shown when the remote model returns no usable image data.
pub const PLACEHOLDER_IMAGE_URL: &str = "https://picsum.photos/400/700";

/// Every storyboard is exactly five scenes, ordinals 1..=5.
pub const SCENE_COUNT: usize = 5;

/// All prompt content is produced in a single fixed language.
pub const PROMPT_LANGUAGE: &str = "vi";

pub const VIDEO_PROMPT_DURATION_SECONDS: u64 = 8;

pub const IMAGE_PROMPT_CONSTRAINTS: [&str; 2] = ["không phụ đề", "không văn bản hiển thị"];

pub const VIDEO_PROMPT_CONSTRAINTS: [&str; 4] =
    ["không phụ đề", "không văn bản", "không logo", "không cover"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStyle {
    UnboxShow,
    ProductReview,
    FashionLookbook,
}

impl VideoStyle {
    pub fn all() -> [VideoStyle; 3] {
        [
            VideoStyle::UnboxShow,
            VideoStyle::ProductReview,
            VideoStyle::FashionLookbook,
        ]
    }

    pub fn key(&self) -> &'static str {
        match self {
            VideoStyle::UnboxShow => "UNBOX_SHOW",
            VideoStyle::ProductReview => "PRODUCT_REVIEW",
            VideoStyle::FashionLookbook => "FASHION_LOOKBOOK",
        }
    }

    pub fn parse(raw: &str) -> Option<VideoStyle> {
        let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "UNBOX_SHOW" | "UNBOX" => Some(VideoStyle::UnboxShow),
            "PRODUCT_REVIEW" | "REVIEW" => Some(VideoStyle::ProductReview),
            "FASHION_LOOKBOOK" | "LOOKBOOK" => Some(VideoStyle::FashionLookbook),
            _ => None,
        }
    }
}

/// A binary-encoded input image (character photo, outfit photo, background).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn from_data_url(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some(rest) = trimmed.strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data URL missing payload separator");
        };
        let mime_type = header
            .split(';')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("image/png");
        if data.trim().is_empty() {
            bail!("data URL carries no image bytes");
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.trim().to_string(),
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(self.data.as_bytes())?)
    }

    pub fn is_empty(&self) -> bool {
        self.data.trim().is_empty()
    }
}

/// Generated scene pixels, or the fixed placeholder when the model returned none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneImage {
    Inline { mime_type: String, data: String },
    Placeholder,
}

impl SceneImage {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SceneImage::Placeholder)
    }

    /// Display reference: a data URL for inline pixels, the stand-in URL otherwise.
    pub fn reference(&self) -> String {
        match self {
            SceneImage::Inline { mime_type, data } => {
                format!("data:{mime_type};base64,{data}")
            }
            SceneImage::Placeholder => PLACEHOLDER_IMAGE_URL.to_string(),
        }
    }

    pub fn decode(&self) -> Option<Vec<u8>> {
        match self {
            SceneImage::Inline { data, .. } => BASE64.decode(data.as_bytes()).ok(),
            SceneImage::Placeholder => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub content: String,
    pub language: String,
    pub constraints: Vec<String>,
}

impl PromptRecord {
    pub fn image(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: PROMPT_LANGUAGE.to_string(),
            constraints: IMAGE_PROMPT_CONSTRAINTS
                .iter()
                .map(|value| value.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPromptRecord {
    pub content: String,
    pub language: String,
    pub duration_seconds: u64,
    pub constraints: Vec<String>,
}

impl VideoPromptRecord {
    pub fn video(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: PROMPT_LANGUAGE.to_string(),
            duration_seconds: VIDEO_PROMPT_DURATION_SECONDS,
            constraints: VIDEO_PROMPT_CONSTRAINTS
                .iter()
                .map(|value| value.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub ordinal: u8,
    pub name: String,
    pub image: SceneImage,
    pub image_prompt: PromptRecord,
    pub video_prompt: VideoPromptRecord,
}

/// One row of the plan call's structured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub ordinal: u8,
    pub name: String,
    pub image_prompt_text: String,
    pub video_prompt_text: String,
}

impl SceneDescriptor {
    /// Tolerant parse of a plan row. The remote model may nest prompt text
    /// under `image_prompt.content` instead of the flat field.
    pub fn from_value(value: &Value) -> Self {
        let ordinal = value
            .get("scene_id")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(u8::MAX as u64) as u8;
        let name = value
            .get("scene_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let image_prompt_text = flat_or_nested_text(value, "image_prompt_text", "image_prompt");
        let video_prompt_text = flat_or_nested_text(value, "video_prompt_text", "video_prompt");
        Self {
            ordinal,
            name,
            image_prompt_text,
            video_prompt_text,
        }
    }

    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            ordinal: scene.ordinal,
            name: scene.name.clone(),
            image_prompt_text: scene.image_prompt.content.clone(),
            video_prompt_text: scene.video_prompt.content.clone(),
        }
    }
}

fn flat_or_nested_text(value: &Value, flat_key: &str, nested_key: &str) -> String {
    if let Some(text) = value.get(flat_key).and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.to_string();
        }
    }
    value
        .get(nested_key)
        .and_then(Value::as_object)
        .and_then(|record| record.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub gender: String,
    pub hair: String,
    pub age: String,
    pub original_outfit: String,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            gender: "nữ".to_string(),
            hair: "tóc tự nhiên".to_string(),
            age: "trẻ".to_string(),
            original_outfit: "trang phục thường ngày".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutfitProfile {
    pub colors: Vec<String>,
    pub materials: Vec<String>,
    pub items: Vec<String>,
    pub description: String,
}

/// Reusable character/outfit description extracted once per generation and
/// shared by all five scene-image calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub character: CharacterProfile,
    pub outfit: OutfitProfile,
}

impl IdentityProfile {
    /// Field-by-field tolerant parse; any missing field keeps its generic default.
    pub fn from_value(value: &Value) -> Self {
        let mut profile = IdentityProfile::default();
        let Some(root) = value.as_object() else {
            return profile;
        };

        if let Some(character) = root.get("character").and_then(Value::as_object) {
            read_string(character, "gender", &mut profile.character.gender);
            read_string(character, "hair", &mut profile.character.hair);
            read_string(character, "age", &mut profile.character.age);
            read_string(
                character,
                "original_outfit",
                &mut profile.character.original_outfit,
            );
        }
        if let Some(outfit) = root.get("target_outfit").and_then(Value::as_object) {
            profile.outfit.colors = read_string_list(outfit, "colors");
            profile.outfit.materials = read_string_list(outfit, "materials");
            profile.outfit.items = read_string_list(outfit, "items");
            read_string(outfit, "description", &mut profile.outfit.description);
        }
        profile
    }

    pub fn subject_line(&self) -> String {
        let noun = if self.character.gender == "nữ" {
            "Cô gái"
        } else {
            "Chàng trai"
        };
        format!(
            "{noun} ({}, {})",
            self.character.hair, self.character.age
        )
    }
}

fn read_string(map: &serde_json::Map<String, Value>, key: &str, target: &mut String) {
    if let Some(text) = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        *target = text.to_string();
    }
}

fn read_string_list(map: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// One generation request: a themed sequence of exactly five scenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryboardRequest {
    pub id: String,
    pub style: VideoStyle,
    pub created_at: String,
    pub scenes: Vec<Scene>,
    pub reference_image: Option<ImagePayload>,
}

impl StoryboardRequest {
    pub fn new(
        style: VideoStyle,
        scenes: Vec<Scene>,
        reference_image: Option<ImagePayload>,
    ) -> Result<Self> {
        validate_scene_sequence(&scenes)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            style,
            created_at: now_utc_iso(),
            scenes,
            reference_image,
        })
    }

    pub fn scene(&self, ordinal: u8) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.ordinal == ordinal)
    }

    /// Replaces exactly one scene slot in place; the slot must already exist.
    pub fn replace_scene(&mut self, replacement: Scene) -> Result<()> {
        let Some(slot) = self
            .scenes
            .iter_mut()
            .find(|scene| scene.ordinal == replacement.ordinal)
        else {
            bail!(
                "storyboard {} has no scene with ordinal {}",
                self.id,
                replacement.ordinal
            );
        };
        *slot = replacement;
        Ok(())
    }

    /// Storage-safe projection: drops the reference image and swaps every
    /// scene image for the placeholder so persisted history fits the quota.
    pub fn storage_projection(&self) -> StoryboardRequest {
        let mut projected = self.clone();
        projected.reference_image = None;
        for scene in &mut projected.scenes {
            scene.image = SceneImage::Placeholder;
        }
        projected
    }
}

fn validate_scene_sequence(scenes: &[Scene]) -> Result<()> {
    if scenes.len() != SCENE_COUNT {
        bail!(
            "storyboard requires exactly {SCENE_COUNT} scenes, got {}",
            scenes.len()
        );
    }
    for (index, scene) in scenes.iter().enumerate() {
        let expected = (index + 1) as u8;
        if scene.ordinal != expected {
            bail!(
                "scene at position {index} carries ordinal {}, expected {expected}",
                scene.ordinal
            );
        }
    }
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn scene_for_test(ordinal: u8, name: &str) -> Scene {
        Scene {
            ordinal,
            name: name.to_string(),
            image: SceneImage::Inline {
                mime_type: "image/png".to_string(),
                data: "aGVsbG8=".to_string(),
            },
            image_prompt: PromptRecord::image(format!("ảnh cảnh {ordinal}")),
            video_prompt: VideoPromptRecord::video(format!("video cảnh {ordinal}")),
        }
    }

    pub(crate) fn storyboard_for_test(style: VideoStyle) -> StoryboardRequest {
        let scenes = (1..=5)
            .map(|ordinal| scene_for_test(ordinal, &format!("Cảnh {ordinal}")))
            .collect();
        StoryboardRequest::new(style, scenes, Some(ImagePayload::from_bytes("image/png", b"ref")))
            .expect("valid storyboard")
    }

    #[test]
    fn image_payload_data_url_roundtrip() -> Result<()> {
        let payload = ImagePayload::from_bytes("image/jpeg", b"pixels");
        let url = payload.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let parsed = ImagePayload::from_data_url(&url)?;
        assert_eq!(parsed, payload);
        assert_eq!(parsed.decode()?, b"pixels");
        Ok(())
    }

    #[test]
    fn image_payload_rejects_non_data_urls() {
        assert!(ImagePayload::from_data_url("https://example.test/a.png").is_err());
        assert!(ImagePayload::from_data_url("data:image/png;base64,").is_err());
    }

    #[test]
    fn storyboard_requires_five_ordered_scenes() {
        let short = vec![scene_for_test(1, "Nhận hàng")];
        assert!(StoryboardRequest::new(VideoStyle::UnboxShow, short, None).is_err());

        let mut scenes: Vec<Scene> = (1..=5)
            .map(|ordinal| scene_for_test(ordinal, "Cảnh"))
            .collect();
        scenes.swap(1, 3);
        assert!(StoryboardRequest::new(VideoStyle::UnboxShow, scenes, None).is_err());
    }

    #[test]
    fn replace_scene_touches_exactly_one_slot() -> Result<()> {
        let mut request = storyboard_for_test(VideoStyle::UnboxShow);
        let before = request.clone();

        let mut replacement = scene_for_test(3, request.scene(3).map(|s| s.name.as_str()).unwrap_or(""));
        replacement.image = SceneImage::Placeholder;
        request.replace_scene(replacement.clone())?;

        assert_eq!(request.id, before.id);
        for ordinal in [1u8, 2, 4, 5] {
            assert_eq!(request.scene(ordinal), before.scene(ordinal));
        }
        assert_eq!(request.scene(3), Some(&replacement));
        Ok(())
    }

    #[test]
    fn replace_scene_rejects_unknown_ordinal() {
        let mut request = storyboard_for_test(VideoStyle::UnboxShow);
        let mut rogue = scene_for_test(5, "Cảnh");
        rogue.ordinal = 9;
        assert!(request.replace_scene(rogue).is_err());
    }

    #[test]
    fn storage_projection_strips_all_pixel_data() {
        let request = storyboard_for_test(VideoStyle::FashionLookbook);
        let projected = request.storage_projection();

        assert!(projected.reference_image.is_none());
        assert!(projected
            .scenes
            .iter()
            .all(|scene| scene.image.is_placeholder()));
        // Prompt text survives the projection.
        assert_eq!(
            projected.scenes[0].image_prompt.content,
            request.scenes[0].image_prompt.content
        );
        assert_eq!(projected.id, request.id);
    }

    #[test]
    fn identity_profile_falls_back_per_field() {
        let profile = IdentityProfile::from_value(&json!({
            "character": {"gender": "nam", "hair": "tóc ngắn"},
            "target_outfit": {"colors": ["đen", ""], "description": "áo khoác dạ"},
        }));
        assert_eq!(profile.character.gender, "nam");
        assert_eq!(profile.character.hair, "tóc ngắn");
        // Missing fields keep generic defaults.
        assert_eq!(profile.character.age, "trẻ");
        assert_eq!(profile.outfit.colors, vec!["đen".to_string()]);
        assert_eq!(profile.outfit.description, "áo khoác dạ");
        assert!(profile.outfit.materials.is_empty());
        assert!(profile.subject_line().starts_with("Chàng trai"));
    }

    #[test]
    fn identity_profile_from_non_object_is_default() {
        let profile = IdentityProfile::from_value(&json!("not an object"));
        assert_eq!(profile, IdentityProfile::default());
        assert!(profile.subject_line().starts_with("Cô gái"));
    }

    #[test]
    fn scene_descriptor_reads_flat_and_nested_prompt_text() {
        let flat = SceneDescriptor::from_value(&json!({
            "scene_id": 2,
            "scene_name": "Khui gói",
            "image_prompt_text": "mở thùng carton",
            "video_prompt_text": "máy quay cận tay",
        }));
        assert_eq!(flat.ordinal, 2);
        assert_eq!(flat.image_prompt_text, "mở thùng carton");

        let nested = SceneDescriptor::from_value(&json!({
            "scene_id": 4,
            "scene_name": "Diện đồ",
            "image_prompt": {"content": "góc máy trung"},
            "video_prompt": {"content": "xoay nhẹ"},
        }));
        assert_eq!(nested.image_prompt_text, "góc máy trung");
        assert_eq!(nested.video_prompt_text, "xoay nhẹ");
    }

    #[test]
    fn video_style_serializes_as_screaming_snake_case() -> Result<()> {
        let raw = serde_json::to_string(&VideoStyle::UnboxShow)?;
        assert_eq!(raw, "\"UNBOX_SHOW\"");
        assert_eq!(VideoStyle::parse("unbox-show"), Some(VideoStyle::UnboxShow));
        assert_eq!(VideoStyle::parse("lookbook"), Some(VideoStyle::FashionLookbook));
        assert_eq!(VideoStyle::parse("nope"), None);
        Ok(())
    }
}
