use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::storyboard::{Scene, StoryboardRequest};

pub const ARCHIVE_FOLDER: &str = "Lookbook-Images";

const PROMPT_SEPARATOR: &str = "\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Image,
    Video,
}

impl PromptKind {
    pub fn label(&self) -> &'static str {
        match self {
            PromptKind::Image => "image",
            PromptKind::Video => "video",
        }
    }
}

/// Archive entry name: ordinal plus scene name with whitespace normalized.
pub fn scene_file_name(scene: &Scene) -> String {
    let name = scene
        .name
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join("_");
    format!("Scene-{}_{}.png", scene.ordinal, name)
}

/// All five scenes' prompts of one kind, concatenated with a visible separator.
pub fn prompt_export_text(request: &StoryboardRequest, kind: PromptKind) -> String {
    request
        .scenes
        .iter()
        .map(|scene| {
            let content = match kind {
                PromptKind::Image => scene.image_prompt.content.as_str(),
                PromptKind::Video => scene.video_prompt.content.as_str(),
            };
            format!("CẢNH {} ({}):\n{}\n", scene.ordinal, scene.name, content)
        })
        .collect::<Vec<String>>()
        .join(PROMPT_SEPARATOR)
}

pub fn write_prompt_export(
    request: &StoryboardRequest,
    kind: PromptKind,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, prompt_export_text(request, kind))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Packs one image file per scene into a ZIP archive. Placeholder scenes have
/// no pixel data and are skipped; returns the number of entries written.
pub fn write_image_archive(request: &StoryboardRequest, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let mut packed = 0usize;
    for scene in &request.scenes {
        let Some(bytes) = scene.image.decode() else {
            continue;
        };
        let entry = format!("{}/{}", ARCHIVE_FOLDER, scene_file_name(scene));
        archive
            .start_file(entry, options)
            .context("failed to start archive entry")?;
        archive.write_all(&bytes)?;
        packed += 1;
    }
    archive.finish().context("failed to finalize archive")?;
    Ok(packed)
}

pub fn archive_file_name(request: &StoryboardRequest) -> String {
    format!("Lookbook-Storyboard-{}.zip", request.id)
}

pub fn prompt_file_name(kind: PromptKind) -> String {
    format!("Lookbook-Prompts-{}.txt", kind.label())
}
