use crate::storyboard::{ImagePayload, VideoStyle, SCENE_COUNT};

/// Descriptive metadata per style: display name plus the five canonical
/// scene-role labels. Generation logic only reads these for naming/theming;
/// the compositional beat sequence below is identical for every style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleTemplate {
    pub style: VideoStyle,
    pub display_name: &'static str,
    pub scene_roles: [&'static str; SCENE_COUNT],
}

const STYLE_TEMPLATES: [StyleTemplate; 3] = [
    StyleTemplate {
        style: VideoStyle::UnboxShow,
        display_name: "Unbox & Show Dáng",
        scene_roles: ["Nhận hàng", "Khui gói", "Kiểm tra", "Mặc thử", "Cận cảnh chi tiết"],
    },
    StyleTemplate {
        style: VideoStyle::ProductReview,
        display_name: "Review Sản Phẩm",
        scene_roles: ["Giới thiệu", "Tính năng", "Trải nghiệm", "So sánh", "Tổng kết"],
    },
    StyleTemplate {
        style: VideoStyle::FashionLookbook,
        display_name: "Fashion Lookbook",
        scene_roles: ["Dáng đứng", "Chuyển động", "Phối đồ", "Chất liệu", "Pose cuối"],
    },
];

pub fn style_template(style: VideoStyle) -> &'static StyleTemplate {
    STYLE_TEMPLATES
        .iter()
        .find(|template| template.style == style)
        .unwrap_or(&STYLE_TEMPLATES[0])
}

pub fn all_style_templates() -> &'static [StyleTemplate] {
    &STYLE_TEMPLATES
}

/// Fixed per-ordinal compositional constraints (0-indexed). This table is what
/// keeps five independent synthesis calls coherent as one five-beat narrative.
const SCENE_CONSTRAINTS: [&str; SCENE_COUNT] = [
    "Nhân vật mặc ĐỒ GỐC. Đang cầm thùng carton 40x30x30 mới nguyên băng keo.",
    "Nhân vật mặc ĐỒ GỐC. Ngồi xuống hoặc đỡ thùng carton 40x30x30 đã mở nắp. Bên trong lộ \
     một phần ĐỒ MỚI xếp gọn, đúng màu sắc và chất liệu.",
    "Góc nhìn PHÍA SAU LƯNG. Nhân vật ĐANG MẶC ĐỒ MỚI (trang phục đính kèm). Để lộ vai, \
     không thấy rõ mặt. Thấy rõ chất liệu và phom dáng lưng của đồ mới.",
    "Đã mặc ĐỒ MỚI (trang phục đính kèm). Góc máy Medium Shot từ eo lên. Giữ đúng gương mặt \
     avatar gốc.",
    "Đã mặc ĐỒ MỚI hoàn chỉnh. GÓC NHÌN TOÀN THÂN (FULL BODY). Tạo dáng tự tin trong không \
     gian bối cảnh đồng nhất.",
];

pub fn scene_constraint(index: usize) -> Option<&'static str> {
    SCENE_CONSTRAINTS.get(index).copied()
}

pub const PRIVATE_BACKGROUND_PRESETS: [&str; 10] = [
    "Phòng sinh hoạt cá nhân ánh sáng buổi sáng",
    "Phòng ngủ tối giản, ánh sáng cửa sổ",
    "Căn hộ studio phong cách Nhật",
    "Phòng thay đồ nhỏ gọn, gương đứng",
    "Phòng khách căn hộ chung cư yên tĩnh",
    "Không gian làm việc tại nhà",
    "Phòng đọc sách riêng tư",
    "Căn hộ loft nhỏ, trần cao",
    "Phòng sinh hoạt cá nhân buổi chiều",
    "Phòng riêng ánh sáng đèn vàng ấm",
];

pub const PUBLIC_BACKGROUND_PRESETS: [&str; 10] = [
    "Sảnh chung cư hiện đại",
    "Hành lang căn hộ cao cấp",
    "Sảnh khách sạn boutique",
    "Studio chụp ảnh trong nhà",
    "Không gian showroom thời trang",
    "Khu sinh hoạt chung tòa nhà",
    "Sảnh văn phòng nhỏ",
    "Không gian co-working yên tĩnh",
    "Phòng trưng bày sản phẩm",
    "Không gian triển lãm nhỏ",
];

pub fn default_background_preset() -> &'static str {
    PRIVATE_BACKGROUND_PRESETS[0]
}

/// Background for a generation: an uploaded image, or a preset label.
/// Resolution priority when both are offered: image, then label, then default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundReference {
    Image(ImagePayload),
    Preset(String),
}

impl BackgroundReference {
    pub fn resolve(image: Option<ImagePayload>, preset: Option<String>) -> Self {
        if let Some(image) = image.filter(|payload| !payload.is_empty()) {
            return BackgroundReference::Image(image);
        }
        let label = preset
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default_background_preset().to_string());
        BackgroundReference::Preset(label)
    }

    pub fn as_image(&self) -> Option<&ImagePayload> {
        match self {
            BackgroundReference::Image(payload) => Some(payload),
            BackgroundReference::Preset(_) => None,
        }
    }

    /// Clause interpolated into the plan instruction.
    pub fn description(&self) -> String {
        match self {
            BackgroundReference::Image(_) => {
                "Thống nhất theo ảnh bối cảnh người dùng cung cấp".to_string()
            }
            BackgroundReference::Preset(label) => label.clone(),
        }
    }
}

impl Default for BackgroundReference {
    fn default() -> Self {
        BackgroundReference::Preset(default_background_preset().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_style_has_a_template_with_five_roles() {
        for style in VideoStyle::all() {
            let template = style_template(style);
            assert_eq!(template.style, style);
            assert_eq!(template.scene_roles.len(), SCENE_COUNT);
            assert!(!template.display_name.is_empty());
        }
        assert_eq!(all_style_templates().len(), 3);
    }

    #[test]
    fn constraint_table_covers_the_five_beats() {
        assert!(scene_constraint(0).unwrap().contains("nguyên băng keo"));
        assert!(scene_constraint(1).unwrap().contains("đã mở nắp"));
        assert!(scene_constraint(2).unwrap().contains("PHÍA SAU LƯNG"));
        assert!(scene_constraint(3).unwrap().contains("Medium Shot"));
        assert!(scene_constraint(4).unwrap().contains("TOÀN THÂN"));
        assert!(scene_constraint(5).is_none());
    }

    #[test]
    fn background_resolution_prefers_image_then_label_then_default() {
        let image = ImagePayload::from_bytes("image/png", b"bg");
        let resolved = BackgroundReference::resolve(
            Some(image.clone()),
            Some("Sảnh khách sạn boutique".to_string()),
        );
        assert_eq!(resolved.as_image(), Some(&image));

        let labeled = BackgroundReference::resolve(None, Some("Sảnh khách sạn boutique".to_string()));
        assert_eq!(labeled.as_image(), None);
        assert_eq!(labeled.description(), "Sảnh khách sạn boutique");

        let fallback = BackgroundReference::resolve(None, Some("   ".to_string()));
        assert_eq!(fallback.description(), default_background_preset());
    }
}
