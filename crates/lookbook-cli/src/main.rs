use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use lookbook_contracts::events::EventWriter;
use lookbook_contracts::export::{
    archive_file_name, prompt_file_name, scene_file_name, write_image_archive,
    write_prompt_export, PromptKind,
};
use lookbook_contracts::history::{FileHistoryBackend, HistoryStore};
use lookbook_contracts::storyboard::{ImagePayload, StoryboardRequest, VideoStyle};
use lookbook_contracts::styles::{
    all_style_templates, BackgroundReference, PRIVATE_BACKGROUND_PRESETS,
    PUBLIC_BACKGROUND_PRESETS,
};
use lookbook_engine::{
    DryrunModel, GeminiModel, GenerationClient, GenerationModel, ReferenceImages, StoryboardEngine,
};

#[derive(Debug, Parser)]
#[command(name = "lookbook", version, about = "Five-scene marketing storyboard CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a fresh five-scene storyboard from two reference photos.
    Generate(GenerateArgs),
    /// Re-render one scene of a saved storyboard with its stored prompt.
    Regenerate(RegenerateArgs),
    /// Export a saved storyboard as a ZIP archive plus prompt text files.
    Export(ExportArgs),
    /// List stored storyboards, newest first.
    History(HistoryArgs),
    /// List the available styles and background presets.
    Styles,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Character reference photo.
    #[arg(long)]
    character: PathBuf,
    /// Outfit reference photo.
    #[arg(long)]
    outfit: PathBuf,
    /// Optional background reference photo; wins over --preset.
    #[arg(long)]
    background: Option<PathBuf>,
    /// Background preset label used when no background photo is given.
    #[arg(long)]
    preset: Option<String>,
    #[arg(long, default_value = "unbox-show")]
    style: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// gemini or dryrun.
    #[arg(long, default_value = "gemini")]
    model: String,
    #[arg(long, default_value = ".lookbook")]
    state_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct RegenerateArgs {
    /// Saved storyboard.json from a previous generate run.
    #[arg(long)]
    storyboard: PathBuf,
    /// Scene ordinal to re-render (1-5).
    #[arg(long)]
    scene: u8,
    #[arg(long)]
    character: PathBuf,
    #[arg(long)]
    outfit: PathBuf,
    #[arg(long)]
    background: Option<PathBuf>,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    model: String,
    #[arg(long, default_value = ".lookbook")]
    state_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    storyboard: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long, default_value = ".lookbook")]
    state_dir: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lookbook error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Regenerate(args) => run_regenerate(args),
        Command::Export(args) => run_export(args),
        Command::History(args) => run_history(args),
        Command::Styles => run_styles(),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let style = parse_style(&args.style)?;
    let references = ReferenceImages::new(
        load_image(&args.character)?,
        load_image(&args.outfit)?,
    )?;
    let background = resolve_background(args.background.as_deref(), args.preset)?;

    let mut engine = build_engine(&args.model, &args.state_dir, &args.out, args.events)?;
    let request = engine.generate_storyboard(style, &references, &background)?;
    write_storyboard_outputs(&request, &args.out)?;

    let placeholders = request
        .scenes
        .iter()
        .filter(|scene| scene.image.is_placeholder())
        .count();
    println!(
        "Storyboard {} ready: {} scenes, {} placeholder(s), written to {}",
        request.id,
        request.scenes.len(),
        placeholders,
        args.out.display()
    );
    Ok(0)
}

fn run_regenerate(args: RegenerateArgs) -> Result<i32> {
    let mut request = read_storyboard(&args.storyboard)?;
    let references = ReferenceImages::new(
        load_image(&args.character)?,
        load_image(&args.outfit)?,
    )?;
    let background = resolve_background(args.background.as_deref(), args.preset)?;

    let mut engine = build_engine(&args.model, &args.state_dir, &args.out, args.events)?;
    let scene = engine.regenerate_scene(&mut request, args.scene, &references, &background)?;
    write_storyboard_outputs(&request, &args.out)?;

    println!(
        "Scene {} ({}) of storyboard {} re-rendered{}",
        scene.ordinal,
        scene.name,
        request.id,
        if scene.image.is_placeholder() {
            ", placeholder returned"
        } else {
            ""
        }
    );
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let request = read_storyboard(&args.storyboard)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let archive_path = args.out.join(archive_file_name(&request));
    let packed = write_image_archive(&request, &archive_path)?;
    write_prompt_export(
        &request,
        PromptKind::Image,
        &args.out.join(prompt_file_name(PromptKind::Image)),
    )?;
    write_prompt_export(
        &request,
        PromptKind::Video,
        &args.out.join(prompt_file_name(PromptKind::Video)),
    )?;

    println!(
        "Exported {} image(s) and both prompt files to {}",
        packed,
        args.out.display()
    );
    Ok(0)
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let store = HistoryStore::load(Box::new(FileHistoryBackend::new(&args.state_dir)));
    if store.is_empty() {
        println!("No stored storyboards.");
        return Ok(0);
    }
    for entry in store.entries() {
        println!(
            "{}  {}  {}  {} scene(s)",
            entry.created_at,
            entry.style.key(),
            entry.id,
            entry.scenes.len()
        );
    }
    Ok(0)
}

fn run_styles() -> Result<i32> {
    print!("{}", styles_listing());
    Ok(0)
}

/// Styles plus the preset labels accepted by `--preset`.
fn styles_listing() -> String {
    let mut out = String::from("Styles:\n");
    for template in all_style_templates() {
        out.push_str(&format!(
            "  {}  {}  [{}]\n",
            template.style.key(),
            template.display_name,
            template.scene_roles.join(", ")
        ));
    }
    out.push_str("\nBackground presets (private spaces):\n");
    for label in PRIVATE_BACKGROUND_PRESETS {
        out.push_str(&format!("  {label}\n"));
    }
    out.push_str("\nBackground presets (public spaces):\n");
    for label in PUBLIC_BACKGROUND_PRESETS {
        out.push_str(&format!("  {label}\n"));
    }
    out
}

fn build_engine(
    model: &str,
    state_dir: &Path,
    out: &Path,
    events: Option<PathBuf>,
) -> Result<StoryboardEngine> {
    let model = build_model(model)?;
    let history = HistoryStore::load(Box::new(FileHistoryBackend::new(state_dir)));
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    let writer = EventWriter::new(events_path, Uuid::new_v4().to_string());
    Ok(StoryboardEngine::new(
        GenerationClient::new(model),
        history,
        writer,
    ))
}

fn build_model(name: &str) -> Result<Box<dyn GenerationModel>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "gemini" => Ok(Box::new(GeminiModel::new())),
        "dryrun" => Ok(Box::new(DryrunModel)),
        other => bail!("unknown model '{other}' (expected gemini or dryrun)"),
    }
}

fn parse_style(raw: &str) -> Result<VideoStyle> {
    VideoStyle::parse(raw).with_context(|| {
        let known: Vec<&str> = all_style_templates()
            .iter()
            .map(|template| template.style.key())
            .collect();
        format!("unknown style '{raw}' (expected one of {})", known.join(", "))
    })
}

fn resolve_background(
    image_path: Option<&Path>,
    preset: Option<String>,
) -> Result<BackgroundReference> {
    let image = match image_path {
        Some(path) => Some(load_image(path)?),
        None => None,
    };
    Ok(BackgroundReference::resolve(image, preset))
}

fn load_image(path: &Path) -> Result<ImagePayload> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(ImagePayload::from_bytes(guess_image_mime(path), &bytes))
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}

fn read_storyboard(path: &Path) -> Result<StoryboardRequest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read storyboard {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("storyboard {} is not valid JSON", path.display()))
}

/// Writes storyboard.json plus one PNG per scene that carries pixel data.
fn write_storyboard_outputs(request: &StoryboardRequest, out: &Path) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let json_path = out.join("storyboard.json");
    fs::write(&json_path, serde_json::to_string_pretty(request)?)
        .with_context(|| format!("failed to write {}", json_path.display()))?;

    for scene in &request.scenes {
        let Some(bytes) = scene.image.decode() else {
            continue;
        };
        let scene_path = out.join(scene_file_name(scene));
        fs::write(&scene_path, bytes)
            .with_context(|| format!("failed to write {}", scene_path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lookbook_contracts::styles::default_background_preset;

    use super::*;

    #[test]
    fn mime_guess_covers_common_extensions() {
        assert_eq!(guess_image_mime(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(guess_image_mime(Path::new("a.JPEG")), "image/jpeg");
        assert_eq!(guess_image_mime(Path::new("a.webp")), "image/webp");
        assert_eq!(guess_image_mime(Path::new("a.png")), "image/png");
        assert_eq!(guess_image_mime(Path::new("noext")), "image/png");
    }

    #[test]
    fn style_parsing_accepts_cli_spellings() {
        assert_eq!(parse_style("unbox-show").ok(), Some(VideoStyle::UnboxShow));
        assert_eq!(parse_style("LOOKBOOK").ok(), Some(VideoStyle::FashionLookbook));
        assert!(parse_style("cinematic").is_err());
    }

    #[test]
    fn styles_listing_names_every_style_and_preset_label() {
        let listing = styles_listing();
        for template in all_style_templates() {
            assert!(listing.contains(template.style.key()));
            assert!(listing.contains(template.display_name));
        }
        for label in PRIVATE_BACKGROUND_PRESETS
            .iter()
            .chain(PUBLIC_BACKGROUND_PRESETS.iter())
        {
            assert!(listing.contains(label), "missing preset {label}");
        }
    }

    #[test]
    fn background_falls_back_to_default_preset() -> Result<()> {
        let resolved = resolve_background(None, None)?;
        assert_eq!(resolved.description(), default_background_preset());
        Ok(())
    }

    #[test]
    fn load_image_reads_bytes_with_guessed_mime() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("photo.jpg");
        fs::write(&path, b"jpeg bytes")?;
        let payload = load_image(&path)?;
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!(payload.decode()?, b"jpeg bytes");
        Ok(())
    }

    #[test]
    fn storyboard_outputs_round_trip_through_disk() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("run");

        let mut engine = StoryboardEngine::new(
            GenerationClient::new(Box::new(DryrunModel)),
            HistoryStore::load(Box::new(FileHistoryBackend::new(temp.path().join("state")))),
            EventWriter::new(out.join("events.jsonl"), "test"),
        );
        let references = ReferenceImages::new(
            ImagePayload::from_bytes("image/png", b"char"),
            ImagePayload::from_bytes("image/png", b"outfit"),
        )?;
        let request = engine.generate_storyboard(
            VideoStyle::UnboxShow,
            &references,
            &BackgroundReference::default(),
        )?;
        write_storyboard_outputs(&request, &out)?;

        let reloaded = read_storyboard(&out.join("storyboard.json"))?;
        assert_eq!(reloaded, request);
        for scene in &request.scenes {
            assert!(out.join(scene_file_name(scene)).exists());
        }
        Ok(())
    }
}
