use anyhow::{bail, Result};
use serde_json::Value;

use lookbook_contracts::storyboard::{
    IdentityProfile, ImagePayload, PromptRecord, Scene, SceneDescriptor, SceneImage,
    VideoPromptRecord, VideoStyle, SCENE_COUNT,
};
use lookbook_contracts::styles::{scene_constraint, style_template, BackgroundReference};

use crate::model::{image_part, text_part, GenerationModel, SCENE_ASPECT_RATIO};

/// Explicit per-sub-call result: the model either returned usable output or
/// the value is a documented fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome<T> {
    Returned(T),
    Fallback(T),
}

impl<T> ModelOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            ModelOutcome::Returned(value) | ModelOutcome::Fallback(value) => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            ModelOutcome::Returned(value) | ModelOutcome::Fallback(value) => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ModelOutcome::Fallback(_))
    }
}

const IDENTITY_INSTRUCTION: &str = "Phân tích 2 ảnh. Trả về JSON tiếng Việt: { character: \
{ gender: 'nam'|'nữ', hair: 'mô tả tóc', age: 'độ tuổi', original_outfit: 'mô tả đồ gốc \
nhân vật đang mặc' }, target_outfit: { colors: ['màu'], materials: ['chất liệu'], items: \
['danh sách món'], description: 'mô tả tổng quát đồ mới' } }.";

const SCENE_QUALITY_SUFFIX: &str = "Chất lượng 4K, siêu thực, không chữ, không phụ đề.";

/// Wraps the injected model with the three remote operations the storyboard
/// pipeline needs.
pub struct GenerationClient {
    model: Box<dyn GenerationModel>,
}

impl GenerationClient {
    pub fn new(model: Box<dyn GenerationModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// One analysis call shared by all five scene syntheses. Remote or parse
    /// failure degrades to the generic default profile.
    pub fn analyze_identity(
        &self,
        character: &ImagePayload,
        outfit: &ImagePayload,
    ) -> ModelOutcome<IdentityProfile> {
        let parts = vec![
            image_part(character),
            image_part(outfit),
            text_part(IDENTITY_INSTRUCTION),
        ];
        match self.model.generate_structured(&parts) {
            Ok(value) if value.is_object() => {
                ModelOutcome::Returned(IdentityProfile::from_value(&value))
            }
            Ok(_) | Err(_) => ModelOutcome::Fallback(IdentityProfile::default()),
        }
    }

    /// Requests the five scene descriptors. The sole non-recoverable remote
    /// failure: a failed or short plan propagates.
    pub fn plan_storyboard(
        &self,
        identity: &IdentityProfile,
        style: VideoStyle,
        background: &BackgroundReference,
    ) -> Result<Vec<SceneDescriptor>> {
        let instruction = plan_instruction(identity, style, background);
        let response = self.model.generate_structured(&[text_part(&instruction)])?;
        let Some(rows) = response.as_array() else {
            bail!("plan response is not an array of scene descriptors");
        };
        if rows.len() < SCENE_COUNT {
            bail!(
                "plan returned {} scene descriptors, need {SCENE_COUNT}",
                rows.len()
            );
        }

        let template = style_template(style);
        let mut descriptors = Vec::with_capacity(SCENE_COUNT);
        for (index, row) in rows.iter().take(SCENE_COUNT).enumerate() {
            let mut descriptor = SceneDescriptor::from_value(row);
            // Rows are taken in array order and re-stamped 1..5; blank names
            // fall back to the style's role label.
            descriptor.ordinal = (index + 1) as u8;
            if descriptor.name.trim().is_empty() {
                descriptor.name = template.scene_roles[index].to_string();
            }
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    /// One scene synthesis. Never fails: a transport error or a response
    /// without inline image data degrades to the placeholder.
    pub fn synthesize_scene_image(
        &self,
        index: usize,
        descriptor: &SceneDescriptor,
        character: &ImagePayload,
        outfit: &ImagePayload,
        background: &BackgroundReference,
    ) -> Scene {
        let mut parts = vec![image_part(character), image_part(outfit)];
        if let Some(payload) = background.as_image() {
            parts.push(image_part(payload));
        }
        parts.push(text_part(&scene_prompt(index, descriptor)));

        let image = match self.model.generate_image(&parts, SCENE_ASPECT_RATIO) {
            Ok(Some(inline)) => SceneImage::Inline {
                mime_type: inline.mime_type,
                data: inline.data,
            },
            Ok(None) | Err(_) => SceneImage::Placeholder,
        };

        Scene {
            ordinal: descriptor.ordinal,
            name: descriptor.name.clone(),
            image,
            image_prompt: PromptRecord::image(descriptor.image_prompt_text.clone()),
            video_prompt: VideoPromptRecord::video(descriptor.video_prompt_text.clone()),
        }
    }
}

fn plan_instruction(
    identity: &IdentityProfile,
    style: VideoStyle,
    background: &BackgroundReference,
) -> String {
    let template = style_template(style);
    format!(
        "Bạn là chuyên gia kịch bản video UGC thương mại. Hãy tạo kịch bản 5 khung hình \
chuyên nghiệp.\n\
BẮT BUỘC: Tất cả nội dung prompt ảnh và video phải bằng TIẾNG VIỆT.\n\n\
PHONG CÁCH: {display} ({roles}).\n\
NHÂN VẬT: {subject}.\n\
ĐỒ GỐC ĐANG MẶC: {original_outfit}.\n\
TRANG PHỤC ĐÍNH KÈM (ĐỒ MỚI): {outfit_description}.\n\
BỐI CẢNH: {background}.\n\n\
QUY TẮC 5 CẢNH (CHI TIẾT):\n\
1. CẢNH 1 (Nhận hàng): Nhân vật mặc ĐỒ GỐC, đang nhận một thùng carton giấy kích thước \
mỏng 40x30x30 còn nguyên băng keo.\n\
2. CẢNH 2 (Mở hộp): Nhân vật mặc ĐỒ GỐC, hai cánh tay đang mở thùng carton giấy 40x30x30 \
(đã mở nắp), bên trong để lộ ra MỘT PHẦN trang phục đính kèm (màu {colors}), trang phục \
đang được kéo nhẹ lên từ thùng, tại không gian đã chọn.\n\
3. CẢNH 3 (Góc nhìn phía sau): Nhân vật ĐANG MẶC trang phục đính kèm (ĐỒ MỚI). Góc nhìn \
từ PHÍA SAU LƯNG, để lộ vai, không nhìn rõ mặt. Tập trung vào phom dáng lưng, vai và chất \
liệu vải của đồ mới.\n\
4. CẢNH 4 (Diện đồ trung): Nhân vật mặc TRANG PHỤC ĐÍNH KÈM (đồ mới). Góc nhìn từ eo trở \
lên (Medium Shot), tay chỉnh sửa chi tiết áo hoặc tóc, thần thái tự tin.\n\
5. CẢNH 5 (Toàn thân): Avatar nhân vật chính mặc hoàn chỉnh TRANG PHỤC ĐÍNH KÈM (đồ mới). \
GÓC NHÌN TOÀN THÂN (Full Body), tạo dáng tự tin, bối cảnh đồng nhất.\n\n\
Trả về JSON mảng 5 phần tử. Mỗi phần tử có scene_id, scene_name, image_prompt_text và \
video_prompt_text chi tiết bằng tiếng Việt.",
        display = template.display_name,
        roles = template.scene_roles.join(", "),
        subject = identity.subject_line(),
        original_outfit = identity.character.original_outfit,
        outfit_description = identity.outfit.description,
        background = background.description(),
        colors = identity.outfit.colors.join(", "),
    )
}

fn scene_prompt(index: usize, descriptor: &SceneDescriptor) -> String {
    let constraint = scene_constraint(index).unwrap_or_default();
    format!(
        "Prompt chi tiết bằng tiếng Việt: {}.\nRàng buộc bố cục: {constraint} {SCENE_QUALITY_SUFFIX}",
        descriptor.image_prompt_text
    )
}
