pub mod client;
pub mod model;

use anyhow::{bail, Context, Result};
use serde_json::json;

use lookbook_contracts::events::{EventPayload, EventWriter};
use lookbook_contracts::history::{HistoryStore, PersistOutcome};
use lookbook_contracts::storyboard::{
    ImagePayload, Scene, SceneDescriptor, StoryboardRequest, VideoStyle,
};
use lookbook_contracts::styles::BackgroundReference;

pub use client::{GenerationClient, ModelOutcome};
pub use model::{DryrunModel, GeminiModel, GenerationModel};

/// The two reference photos every generation starts from.
#[derive(Debug, Clone)]
pub struct ReferenceImages {
    pub character: ImagePayload,
    pub outfit: ImagePayload,
}

impl ReferenceImages {
    pub fn new(character: ImagePayload, outfit: ImagePayload) -> Result<Self> {
        if character.is_empty() {
            bail!("character reference image carries no data");
        }
        if outfit.is_empty() {
            bail!("outfit reference image carries no data");
        }
        Ok(Self { character, outfit })
    }
}

/// Drives one session: identity analysis, plan, five sequential scene
/// syntheses, then history bookkeeping. Each step emits an event.
pub struct StoryboardEngine {
    client: GenerationClient,
    history: HistoryStore,
    events: EventWriter,
}

impl StoryboardEngine {
    pub fn new(client: GenerationClient, history: HistoryStore, events: EventWriter) -> Self {
        Self {
            client,
            history,
            events,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Full five-scene generation. Only a failed plan call aborts; identity
    /// analysis and individual scene syntheses degrade instead.
    pub fn generate_storyboard(
        &mut self,
        style: VideoStyle,
        references: &ReferenceImages,
        background: &BackgroundReference,
    ) -> Result<StoryboardRequest> {
        self.emit(
            "storyboard_started",
            payload(&[
                ("style", json!(style.key())),
                ("model", json!(self.client.model_name())),
            ]),
        )?;

        let identity = self
            .client
            .analyze_identity(&references.character, &references.outfit);
        self.emit(
            "identity_analyzed",
            payload(&[("fallback", json!(identity.is_fallback()))]),
        )?;

        let descriptors =
            match self
                .client
                .plan_storyboard(identity.value(), style, background)
            {
                Ok(descriptors) => descriptors,
                Err(err) => {
                    self.emit(
                        "generation_failed",
                        payload(&[
                            ("stage", json!("plan")),
                            ("error", json!(format!("{err:#}"))),
                        ]),
                    )?;
                    return Err(err).context("storyboard plan failed");
                }
            };
        self.emit(
            "plan_ready",
            payload(&[("scene_count", json!(descriptors.len()))]),
        )?;

        let mut scenes = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            let scene = self.client.synthesize_scene_image(
                index,
                descriptor,
                &references.character,
                &references.outfit,
                background,
            );
            self.emit(
                "scene_rendered",
                payload(&[
                    ("ordinal", json!(scene.ordinal)),
                    ("fallback", json!(scene.image.is_placeholder())),
                ]),
            )?;
            scenes.push(scene);
        }

        let request =
            StoryboardRequest::new(style, scenes, Some(references.character.clone()))?;
        let outcome = self.history.record(request.clone())?;
        self.emit_persist_outcome(outcome)?;

        self.emit(
            "storyboard_ready",
            payload(&[
                ("storyboard_id", json!(request.id.clone())),
                (
                    "placeholder_count",
                    json!(request
                        .scenes
                        .iter()
                        .filter(|scene| scene.image.is_placeholder())
                        .count()),
                ),
            ]),
        )?;
        Ok(request)
    }

    /// Re-runs one scene's image synthesis with the stored prompt text. The
    /// slot's ordinal and name are preserved; the other four scenes are
    /// untouched.
    pub fn regenerate_scene(
        &mut self,
        request: &mut StoryboardRequest,
        ordinal: u8,
        references: &ReferenceImages,
        background: &BackgroundReference,
    ) -> Result<Scene> {
        let Some(existing) = request.scene(ordinal) else {
            bail!("storyboard {} has no scene with ordinal {ordinal}", request.id);
        };
        let descriptor = SceneDescriptor::from_scene(existing);

        let scene = self.client.synthesize_scene_image(
            (ordinal - 1) as usize,
            &descriptor,
            &references.character,
            &references.outfit,
            background,
        );
        request.replace_scene(scene.clone())?;

        let outcome = self.history.update(request)?;
        self.emit_persist_outcome(outcome)?;
        self.emit(
            "scene_regenerated",
            payload(&[
                ("storyboard_id", json!(request.id.clone())),
                ("ordinal", json!(ordinal)),
                ("fallback", json!(scene.image.is_placeholder())),
            ]),
        )?;
        Ok(scene)
    }

    fn emit_persist_outcome(&self, outcome: PersistOutcome) -> Result<()> {
        match outcome {
            PersistOutcome::Saved => self.emit("history_persisted", EventPayload::new())?,
            PersistOutcome::ClearedOnQuota => {
                self.emit("history_cleared_on_quota", EventPayload::new())?
            }
        };
        Ok(())
    }

    fn emit(&self, event_type: &str, payload: EventPayload) -> Result<serde_json::Value> {
        self.events.emit(event_type, payload)
    }
}

fn payload(fields: &[(&str, serde_json::Value)]) -> EventPayload {
    let mut map = EventPayload::new();
    for (key, value) in fields {
        map.insert((*key).to_string(), value.clone());
    }
    map
}
