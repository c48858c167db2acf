use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use nbox_contracts::history::{EditHistoryItem, HistoryKind, HistoryLogs};
use nbox_contracts::prompts::presets::{
    floorplan_prompt, interior_seed_prompt, DEFAULT_EXTERIOR_PROMPT, EXTERIOR_ANGLE_PRESETS,
    FLOORPLAN_ROOM_STYLES, FLOORPLAN_ROOM_TYPES, INTERIOR_ANGLE_PRESETS,
};
use nbox_contracts::prompts::{find_utility_task, RenderType, TaskService, UpscaleTier};
use nbox_contracts::store::{HistoryPersistence, JsonFileStore};
use nbox_contracts::{NboxError, NboxResult, SourceImage};

use crate::client::{GenerationClient, GenerationRequest, DEFAULT_RENDER_COUNT};
use crate::config::EngineConfig;
use crate::gemini::GeminiBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    Exterior,
    Interior,
    Floorplan,
    Edit,
    Utilities,
}

impl Workflow {
    pub fn render_type(self) -> Option<RenderType> {
        match self {
            Self::Exterior => Some(RenderType::Exterior),
            Self::Interior => Some(RenderType::Interior),
            Self::Floorplan => Some(RenderType::Floorplan),
            Self::Edit | Self::Utilities => None,
        }
    }

    fn gated(self) -> bool {
        matches!(self, Self::Interior | Self::Floorplan | Self::Edit)
    }
}

impl From<RenderType> for Workflow {
    fn from(value: RenderType) -> Self {
        match value {
            RenderType::Exterior => Self::Exterior,
            RenderType::Interior => Self::Interior,
            RenderType::Floorplan => Self::Floorplan,
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exterior => "exterior",
            Self::Interior => "interior",
            Self::Floorplan => "floorplan",
            Self::Edit => "edit",
            Self::Utilities => "utilities",
        };
        f.write_str(label)
    }
}

/// Requested versus received image count of the last render batch that came back short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: usize,
    pub received: usize,
}

/// Handle for one in-flight description. Only applied while its epoch is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionTicket {
    epoch: u64,
    image: SourceImage,
}

impl DescriptionTicket {
    pub fn image(&self) -> &SourceImage {
        &self.image
    }
}

/// Ephemeral session fields plus the in-memory history logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub workflow: Workflow,
    pub source: Option<SourceImage>,
    pub reference: Option<SourceImage>,
    pub exterior_prompt: String,
    pub interior_prompt: String,
    pub angle_prompt: String,
    pub room_type: String,
    pub room_style: String,
    pub render_count: usize,
    pub results: Vec<String>,
    pub selected: usize,
    pub edit_source: Option<SourceImage>,
    pub edit_prompt: String,
    pub edit_result: Option<String>,
    pub history: HistoryLogs,
    pub is_loading: bool,
    pub is_describing: bool,
    pub is_editing: bool,
    pub upscaling_index: Option<usize>,
    pub last_shortfall: Option<Shortfall>,
    description_epoch: u64,
}

impl SessionState {
    fn new(history: HistoryLogs) -> Self {
        Self {
            workflow: Workflow::Exterior,
            source: None,
            reference: None,
            exterior_prompt: DEFAULT_EXTERIOR_PROMPT.to_string(),
            interior_prompt: String::new(),
            angle_prompt: EXTERIOR_ANGLE_PRESETS[0].to_string(),
            room_type: FLOORPLAN_ROOM_TYPES[0].to_string(),
            room_style: FLOORPLAN_ROOM_STYLES[0].to_string(),
            render_count: DEFAULT_RENDER_COUNT,
            results: Vec::new(),
            selected: 0,
            edit_source: None,
            edit_prompt: String::new(),
            edit_result: None,
            history,
            is_loading: false,
            is_describing: false,
            is_editing: false,
            upscaling_index: None,
            last_shortfall: None,
            description_epoch: 0,
        }
    }

    /// Invalidates any outstanding description.
    fn bump_epoch(&mut self) {
        self.description_epoch += 1;
        self.is_describing = false;
    }

    fn enter(&mut self, workflow: Workflow) {
        if self.workflow != workflow {
            self.bump_epoch();
        }
        self.workflow = workflow;
        match workflow {
            Workflow::Exterior => self.angle_prompt = EXTERIOR_ANGLE_PRESETS[0].to_string(),
            Workflow::Interior => self.angle_prompt = INTERIOR_ANGLE_PRESETS[0].to_string(),
            _ => {}
        }
    }

    fn active_prompt(&self) -> &str {
        match self.workflow {
            Workflow::Interior => &self.interior_prompt,
            _ => &self.exterior_prompt,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BusySurface {
    Loading,
    Editing,
    Upscaling,
}

/// Clears a busy flag when dropped, so every settle path resets it.
struct BusyGuard<'a> {
    controller: &'a SessionController,
    surface: BusySurface,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.controller.state();
        match self.surface {
            BusySurface::Loading => state.is_loading = false,
            BusySurface::Editing => state.is_editing = false,
            BusySurface::Upscaling => state.upscaling_index = None,
        }
    }
}

/// Owns the workflow state and the history logs.
///
/// State is only locked to validate, snapshot and apply. Model calls run with the lock
/// released, so a slow generation never blocks an upscale or a read.
pub struct SessionController {
    client: GenerationClient,
    state: Mutex<SessionState>,
    persistence: Mutex<HistoryPersistence>,
    features_locked: bool,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("features_locked", &self.features_locked)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(
        client: GenerationClient,
        mut persistence: HistoryPersistence,
        features_locked: bool,
    ) -> Self {
        let history = persistence.load_all();
        Self {
            client,
            state: Mutex::new(SessionState::new(history)),
            persistence: Mutex::new(persistence),
            features_locked,
        }
    }

    /// Wires the HTTP backend and the JSON history file named by `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        if !config.has_credential() {
            tracing::warn!("no API key configured; model calls will be rejected");
        }
        let backend = Arc::new(GeminiBackend::new(config));
        let client = GenerationClient::new(backend, config);
        let persistence =
            HistoryPersistence::new(Box::new(JsonFileStore::new(config.history_path.clone())));
        Self::new(client, persistence, config.features_locked)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn busy(&self, surface: BusySurface) -> BusyGuard<'_> {
        BusyGuard {
            controller: self,
            surface,
        }
    }

    fn persist(&self, kind: HistoryKind) {
        let mut persistence = self
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let logs = self.state().history.clone();
        persistence.save(kind, &logs);
    }

    fn ensure_unlocked(&self, what: &str) -> NboxResult<()> {
        if self.features_locked {
            tracing::info!(feature = what, "feature is locked for maintenance");
            return Err(NboxError::FeatureLocked);
        }
        Ok(())
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn features_locked(&self) -> bool {
        self.features_locked
    }

    pub fn snapshot(&self) -> SessionState {
        self.state().clone()
    }

    pub fn history(&self) -> HistoryLogs {
        self.state().history.clone()
    }

    pub fn workflow(&self) -> Workflow {
        self.state().workflow
    }

    pub fn last_shortfall(&self) -> Option<Shortfall> {
        self.state().last_shortfall
    }

    pub fn switch_workflow(&self, workflow: Workflow) -> NboxResult<()> {
        if workflow.gated() {
            self.ensure_unlocked(match workflow {
                Workflow::Interior => "interior",
                Workflow::Floorplan => "floorplan",
                _ => "edit",
            })?;
        }
        self.state().enter(workflow);
        Ok(())
    }

    /// Replaces the source image. In the interior workflow this returns a ticket for the
    /// automatic description that seeds the prompt.
    pub fn set_source_image(&self, image: SourceImage) -> Option<DescriptionTicket> {
        let mut state = self.state();
        state.bump_epoch();
        state.source = Some(image.clone());
        if state.workflow != Workflow::Interior {
            return None;
        }
        state.interior_prompt.clear();
        state.is_describing = true;
        Some(DescriptionTicket {
            epoch: state.description_epoch,
            image,
        })
    }

    pub fn remove_source_image(&self) {
        let mut state = self.state();
        state.bump_epoch();
        state.source = None;
        state.reference = None;
    }

    pub fn set_reference_image(&self, image: Option<SourceImage>) {
        self.state().reference = image;
    }

    /// Sets the prompt of the active render workflow.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        let mut state = self.state();
        match state.workflow {
            Workflow::Interior => state.interior_prompt = prompt,
            _ => state.exterior_prompt = prompt,
        }
    }

    pub fn set_angle_prompt(&self, prompt: impl Into<String>) {
        self.state().angle_prompt = prompt.into();
    }

    pub fn set_floorplan_options(&self, room_type: impl Into<String>, room_style: impl Into<String>) {
        let mut state = self.state();
        state.room_type = room_type.into();
        state.room_style = room_style.into();
    }

    pub fn set_render_count(&self, count: usize) -> NboxResult<()> {
        if count == 0 {
            return Err(NboxError::Validation(
                "At least one image must be requested.".to_string(),
            ));
        }
        self.state().render_count = count;
        Ok(())
    }

    pub fn select_result(&self, index: usize) -> NboxResult<()> {
        let mut state = self.state();
        if index >= state.results.len() {
            return Err(NboxError::Validation(format!("There is no result #{}.", index + 1)));
        }
        state.selected = index;
        Ok(())
    }

    /// Uploads a source image and, for interiors, runs the description inline.
    pub fn upload_source(&self, image: SourceImage) -> NboxResult<Option<String>> {
        match self.set_source_image(image) {
            Some(ticket) => self.describe_source(ticket),
            None => Ok(None),
        }
    }

    /// Runs the description for `ticket` and applies it if nothing moved on meanwhile.
    pub fn describe_source(&self, ticket: DescriptionTicket) -> NboxResult<Option<String>> {
        let result = self.client.describe(&ticket.image);
        self.apply_description(&ticket, result)
    }

    /// Drops a pending description, e.g. because the user typed a prompt instead.
    pub fn dismiss_description(&self, ticket: DescriptionTicket) {
        let mut state = self.state();
        if ticket.epoch == state.description_epoch {
            state.is_describing = false;
        }
    }

    /// Applies a description outcome. Stale tickets are discarded and yield `Ok(None)`.
    pub fn apply_description(
        &self,
        ticket: &DescriptionTicket,
        result: NboxResult<String>,
    ) -> NboxResult<Option<String>> {
        let mut state = self.state();
        if ticket.epoch != state.description_epoch || state.workflow != Workflow::Interior {
            tracing::debug!(ticket = ticket.epoch, current = state.description_epoch, "discarding stale description");
            return Ok(None);
        }
        state.is_describing = false;
        match result {
            Ok(description) => {
                let prompt = interior_seed_prompt(&description);
                state.interior_prompt = prompt.clone();
                Ok(Some(prompt))
            }
            Err(err) => {
                tracing::warn!(error = %err, "interior description failed");
                Err(err)
            }
        }
    }

    /// Renders the active exterior or interior prompt.
    pub fn generate(&self) -> NboxResult<Vec<String>> {
        let (render_type, prompt) = {
            let state = self.state();
            let Some(render_type) = state
                .workflow
                .render_type()
                .filter(|render_type| *render_type != RenderType::Floorplan)
            else {
                return Err(NboxError::Validation(
                    "Switch to the exterior or interior workflow to render.".to_string(),
                ));
            };
            (render_type, state.active_prompt().to_string())
        };
        self.run_generation(render_type, prompt, false)
    }

    /// Renders the current source from the angle prompt. Any reference image is ignored.
    pub fn generate_angle(&self) -> NboxResult<Vec<String>> {
        let (render_type, prompt) = {
            let state = self.state();
            let render_type = match state.workflow {
                Workflow::Exterior => RenderType::Exterior,
                Workflow::Interior => RenderType::Interior,
                _ => {
                    return Err(NboxError::Validation(
                        "Angle changes are only available for exterior and interior renders."
                            .to_string(),
                    ))
                }
            };
            (render_type, state.angle_prompt.clone())
        };
        self.run_generation(render_type, prompt, true)
    }

    pub fn generate_floorplan(&self) -> NboxResult<Vec<String>> {
        self.ensure_unlocked("floorplan")?;
        let prompt = {
            let state = self.state();
            floorplan_prompt(&state.room_type, &state.room_style)
        };
        self.run_generation(RenderType::Floorplan, prompt, false)
    }

    fn run_generation(
        &self,
        render_type: RenderType,
        prompt: String,
        is_angle: bool,
    ) -> NboxResult<Vec<String>> {
        let request = {
            let mut state = self.state();
            let Some(source) = state.source.clone() else {
                return Err(validation_for(render_type));
            };
            if prompt.trim().is_empty() {
                return Err(validation_for(render_type));
            }
            if state.is_loading {
                return Err(NboxError::Busy("generation"));
            }
            state.is_loading = true;
            state.last_shortfall = None;
            state.results.clear();
            state.selected = 0;
            let mut request = GenerationRequest::new(source, prompt, render_type);
            request.count = state.render_count;
            request.is_angle = is_angle;
            request.reference = match (is_angle, render_type) {
                (false, RenderType::Exterior | RenderType::Interior) => state.reference.clone(),
                _ => None,
            };
            request
        };
        let _busy = self.busy(BusySurface::Loading);

        let images = match self.client.generate(&request) {
            Ok(images) if images.is_empty() => {
                tracing::warn!(render_type = %render_type, "generation produced no images");
                return Err(NboxError::NoImageProduced);
            }
            Ok(images) => images,
            Err(err) => {
                tracing::warn!(render_type = %render_type, error = %err, "generation failed");
                return Err(err);
            }
        };

        {
            let mut state = self.state();
            state.last_shortfall = if images.len() < request.count {
                tracing::warn!(
                    requested = request.count,
                    received = images.len(),
                    "generation returned fewer images than requested"
                );
                Some(Shortfall {
                    requested: request.count,
                    received: images.len(),
                })
            } else {
                None
            };
            state.results = images.clone();
            state.selected = 0;
            state
                .history
                .record_render(render_type, images.clone(), request.prompt.clone(), Utc::now());
        }
        self.persist(render_type.into());
        tracing::info!(render_type = %render_type, images = images.len(), "generation complete");
        Ok(images)
    }

    /// Upscales the result at `index` and patches every render log that holds the original.
    pub fn upscale(&self, index: usize, tier: UpscaleTier) -> NboxResult<String> {
        let (original, image) = {
            let mut state = self.state();
            if state.upscaling_index.is_some() {
                return Err(NboxError::Busy("upscale"));
            }
            let Some(original) = state.results.get(index).cloned() else {
                return Err(NboxError::Validation(format!("There is no result #{}.", index + 1)));
            };
            let Some(image) = SourceImage::from_data_url(&original) else {
                return Err(NboxError::Validation(
                    "This image format cannot be upscaled.".to_string(),
                ));
            };
            state.upscaling_index = Some(index);
            (original, image)
        };
        let _busy = self.busy(BusySurface::Upscaling);

        let upscaled = match self.client.upscale(&image, tier) {
            Ok(Some(upscaled)) => upscaled,
            Ok(None) => {
                tracing::warn!(index, tier = %tier, "upscale returned no image");
                return Err(NboxError::NoImageProduced);
            }
            Err(err) => {
                tracing::warn!(index, tier = %tier, error = %err, "upscale failed");
                return Err(err);
            }
        };

        let touched = {
            let mut state = self.state();
            if let Some(slot) = state.results.get_mut(index) {
                if *slot == original {
                    *slot = upscaled.clone();
                }
            }
            state.history.patch_upscaled(&original, index, &upscaled)
        };
        for render_type in &touched {
            self.persist((*render_type).into());
        }
        tracing::info!(index, tier = %tier, patched_logs = touched.len(), "upscale complete");
        Ok(upscaled)
    }

    /// Makes a previous result the new source for an angle change. Creates no history.
    pub fn change_angle(&self, index: usize) -> NboxResult<()> {
        let mut state = self.state();
        let Some(url) = state.results.get(index) else {
            return Err(NboxError::Validation(format!("There is no result #{}.", index + 1)));
        };
        let Some(image) = SourceImage::from_data_url(url) else {
            return Err(NboxError::Validation(
                "This image format cannot be used as a source.".to_string(),
            ));
        };
        state.bump_epoch();
        state.source = Some(image);
        state.reference = None;
        Ok(())
    }

    /// Empties one log. Nothing happens unless the caller confirmed.
    pub fn clear_history(&self, kind: HistoryKind, confirmed: bool) -> bool {
        if !confirmed {
            return false;
        }
        self.state().history.clear(kind);
        self.persist(kind);
        tracing::info!(log = %kind, "history cleared");
        true
    }

    /// Restores a past result set into the result view.
    pub fn select_history_item(&self, kind: HistoryKind, id: i64) -> NboxResult<()> {
        let Some(render_type) = kind.render_type() else {
            return self.restore_edit_history(id).map(|_| ());
        };
        if render_type != RenderType::Exterior {
            self.ensure_unlocked(kind.as_str())?;
        }
        let mut state = self.state();
        let Some(item) = state.history.find_render(render_type, id).cloned() else {
            return Err(missing_history(kind, id));
        };
        state.results = item.images;
        state.selected = 0;
        state.enter(render_type.into());
        Ok(())
    }

    /// Stages a result image for the edit workflow.
    pub fn request_edit(&self, data_url: &str) -> NboxResult<()> {
        self.ensure_unlocked("edit")?;
        let Some(image) = SourceImage::from_data_url(data_url) else {
            return Err(NboxError::Validation(
                "This image format cannot be edited.".to_string(),
            ));
        };
        self.stage_edit_image(image)
    }

    pub fn stage_edit_image(&self, image: SourceImage) -> NboxResult<()> {
        self.ensure_unlocked("edit")?;
        let mut state = self.state();
        state.edit_source = Some(image);
        state.edit_result = None;
        state.enter(Workflow::Edit);
        Ok(())
    }

    /// Runs a masked edit on the staged image and records it in the edit log.
    pub fn edit(&self, mask: SourceImage, prompt: &str) -> NboxResult<String> {
        self.ensure_unlocked("edit")?;
        let source = {
            let mut state = self.state();
            let Some(source) = state.edit_source.clone() else {
                return Err(NboxError::Validation(
                    "Please choose an image to edit.".to_string(),
                ));
            };
            if prompt.trim().is_empty() {
                return Err(NboxError::Validation(
                    "Please describe the change to make.".to_string(),
                ));
            }
            if state.is_editing {
                return Err(NboxError::Busy("edit"));
            }
            state.is_editing = true;
            state.edit_prompt = prompt.to_string();
            source
        };
        let _busy = self.busy(BusySurface::Editing);

        let result = match self.client.edit(&source, &mask, prompt) {
            Ok(Some(result)) => result,
            Ok(None) => {
                tracing::warn!("edit returned no image");
                return Err(NboxError::NoImageProduced);
            }
            Err(err) => {
                tracing::warn!(error = %err, "edit failed");
                return Err(err);
            }
        };

        {
            let mut state = self.state();
            state.edit_result = Some(result.clone());
            state.history.record_edit(
                prompt.to_string(),
                result.clone(),
                Some(source),
                Some(mask),
                Utc::now(),
            );
        }
        self.persist(HistoryKind::Edit);
        Ok(result)
    }

    /// Puts a past edit back on the edit surface.
    pub fn restore_edit_history(&self, id: i64) -> NboxResult<EditHistoryItem> {
        self.ensure_unlocked("edit history")?;
        let mut state = self.state();
        let Some(item) = state.history.find_edit(id).cloned() else {
            return Err(missing_history(HistoryKind::Edit, id));
        };
        state.edit_source = item
            .source_image
            .clone()
            .or_else(|| SourceImage::from_data_url(&item.result_image));
        state.edit_prompt = item.prompt.clone();
        state.edit_result = Some(item.result_image.clone());
        state.enter(Workflow::Edit);
        Ok(item)
    }

    /// Runs one utility task. Utilities leave the history logs alone.
    pub fn run_utility(
        &self,
        task_id: &str,
        first: Option<SourceImage>,
        second: Option<SourceImage>,
        prompt: &str,
    ) -> NboxResult<String> {
        let Some(task) = find_utility_task(task_id) else {
            return Err(NboxError::Validation(format!("Unknown utility task '{task_id}'.")));
        };
        if task.locked_under_maintenance {
            self.ensure_unlocked(task.id)?;
        }
        if !task.can_run(first.as_ref(), second.as_ref(), prompt) {
            return Err(NboxError::Validation(
                "Please provide every image and a prompt for this task.".to_string(),
            ));
        }
        {
            let mut state = self.state();
            if state.is_loading {
                return Err(NboxError::Busy("generation"));
            }
            state.is_loading = true;
        }
        let _busy = self.busy(BusySurface::Loading);

        let engineered = task.engineer(prompt);
        tracing::info!(task = task.id, "running utility task");
        let produced = match (task.service, first) {
            (TaskService::TextToImage, _) => self.client.text_to_image(&engineered)?,
            (_, Some(image)) => {
                let mut request = GenerationRequest::new(image, engineered, RenderType::Interior);
                request.count = 1;
                request.use_raw = true;
                request.reference = second;
                self.client.generate(&request)?.into_iter().next()
            }
            (_, None) => {
                return Err(NboxError::Validation(
                    "Please provide every image and a prompt for this task.".to_string(),
                ))
            }
        };
        produced.ok_or(NboxError::NoImageProduced)
    }
}

fn validation_for(render_type: RenderType) -> NboxError {
    let message = match render_type {
        RenderType::Floorplan => "Please upload a floorplan image.",
        _ => "Please upload a source image and enter a prompt.",
    };
    NboxError::Validation(message.to_string())
}

fn missing_history(kind: HistoryKind, id: i64) -> NboxError {
    NboxError::Validation(format!("No {kind} history item with id {id}."))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use nbox_contracts::store::MemoryStore;

    use super::*;
    use crate::testing::{image, Reply, ScriptedModel};

    fn controller(model: &Arc<ScriptedModel>) -> SessionController {
        controller_with(model, HistoryPersistence::in_memory(), false)
    }

    fn controller_with(
        model: &Arc<ScriptedModel>,
        persistence: HistoryPersistence,
        features_locked: bool,
    ) -> SessionController {
        let client = GenerationClient::new(model.clone(), &EngineConfig::default());
        SessionController::new(client, persistence, features_locked)
    }

    #[test]
    fn generate_without_source_makes_no_model_call() {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);

        let err = session.generate().unwrap_err();
        assert!(matches!(err, NboxError::Validation(_)));
        session.set_source_image(image("U1JD"));
        session.set_prompt("   ");
        assert!(matches!(session.generate(), Err(NboxError::Validation(_))));

        assert_eq!(model.call_count(), 0);
        assert!(!session.snapshot().is_loading);
    }

    #[test]
    fn generation_replaces_results_and_prepends_history() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.set_source_image(image("U1JD"));

        let images = session.generate()?;

        assert_eq!(images.len(), DEFAULT_RENDER_COUNT);
        let state = session.snapshot();
        assert_eq!(state.results, images);
        assert_eq!(state.selected, 0);
        assert!(!state.is_loading);
        assert_eq!(state.history.exterior.len(), 1);
        assert_eq!(state.history.exterior[0].prompt, DEFAULT_EXTERIOR_PROMPT);
        assert!(state.history.interior.is_empty());
        assert_eq!(session.last_shortfall(), None);
        Ok(())
    }

    #[test]
    fn short_batch_is_accepted_and_reported() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([
            Reply::Image("QQ=="),
            Reply::Empty,
            Reply::Image("Qg=="),
            Reply::Empty,
        ]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));

        let images = session.generate()?;

        assert_eq!(images.len(), 2);
        assert_eq!(
            session.last_shortfall(),
            Some(Shortfall {
                requested: 4,
                received: 2
            })
        );
        Ok(())
    }

    #[test]
    fn render_count_controls_batch_size() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        assert!(matches!(session.set_render_count(0), Err(NboxError::Validation(_))));
        session.set_render_count(2)?;

        assert_eq!(session.generate()?.len(), 2);
        assert_eq!(model.call_count(), 2);
        Ok(())
    }

    #[test]
    fn failed_generation_clears_busy_flag_and_keeps_history() {
        let model = Arc::new(ScriptedModel::new().replies([Reply::Fail("boom")]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));

        assert!(matches!(session.generate(), Err(NboxError::Transport { .. })));
        let state = session.snapshot();
        assert!(!state.is_loading);
        assert!(state.history.exterior.is_empty());
    }

    #[test]
    fn angle_generation_drops_reference_image() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.set_reference_image(Some(image("UkVG")));
        session.set_angle_prompt("High drone view");

        session.generate_angle()?;

        let call = &model.content_calls()[0];
        assert_eq!(call.parts.len(), 2);
        Ok(())
    }

    #[test]
    fn upscale_patches_only_logs_holding_the_original() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([
            Reply::Image("QQ=="),
            Reply::Image("Qg=="),
            Reply::Image("Qw=="),
            Reply::Image("RA=="),
            Reply::Image("VVA="),
        ]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        let images = session.generate()?;
        let interior_before = session.history().interior;

        let upscaled = session.upscale(2, UpscaleTier::FourK)?;

        assert_eq!(upscaled, "data:image/png;base64,VVA=");
        let state = session.snapshot();
        assert_eq!(state.results[2], upscaled);
        assert_eq!(state.history.exterior[0].images, state.results);
        for (index, url) in images.iter().enumerate().filter(|(index, _)| *index != 2) {
            assert_eq!(&state.results[index], url);
        }
        assert_eq!(state.history.interior, interior_before);
        assert_eq!(state.upscaling_index, None);
        Ok(())
    }

    #[test]
    fn upscale_of_duplicate_result_keeps_history_aligned() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([
            Reply::Image("T1JJRw=="),
            Reply::Image("T1JJRw=="),
            Reply::Image("T1JJRw=="),
            Reply::Image("T1JJRw=="),
            Reply::Image("VVA="),
        ]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.generate()?;

        let upscaled = session.upscale(2, UpscaleTier::FourK)?;

        let state = session.snapshot();
        let original = "data:image/png;base64,T1JJRw==";
        assert_eq!(
            state.results,
            vec![original, original, upscaled.as_str(), original]
        );
        assert_eq!(state.history.exterior[0].images, state.results);
        Ok(())
    }

    #[test]
    fn upscale_without_image_reports_failure_and_clears_flag() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([
            Reply::Image("QQ=="),
            Reply::Image("QQ=="),
            Reply::Image("QQ=="),
            Reply::Image("QQ=="),
            Reply::Empty,
        ]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        let images = session.generate()?;

        assert!(matches!(
            session.upscale(0, UpscaleTier::TwoK),
            Err(NboxError::NoImageProduced)
        ));
        assert!(matches!(
            session.upscale(9, UpscaleTier::TwoK),
            Err(NboxError::Validation(_))
        ));
        let state = session.snapshot();
        assert_eq!(state.upscaling_index, None);
        assert_eq!(state.results, images);
        Ok(())
    }

    #[test]
    fn clearing_one_log_leaves_the_others() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.generate()?;
        session.switch_workflow(Workflow::Floorplan)?;
        session.set_source_image(image("UExBTg=="));
        session.generate_floorplan()?;
        let before = session.history();

        assert!(!session.clear_history(HistoryKind::Floorplan, false));
        assert_eq!(session.history(), before);

        assert!(session.clear_history(HistoryKind::Floorplan, true));
        let after = session.history();
        assert!(after.floorplan.is_empty());
        assert_eq!(after.exterior, before.exterior);
        assert_eq!(after.interior, before.interior);
        assert_eq!(after.edit, before.edit);
        Ok(())
    }

    #[test]
    fn stale_description_is_discarded() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([Reply::Text("a cosy loft")]));
        let session = controller(&model);
        session.switch_workflow(Workflow::Interior)?;

        let Some(ticket) = session.set_source_image(image("TE9GVA==")) else {
            anyhow::bail!("interior upload should request a description");
        };
        assert!(session.snapshot().is_describing);
        session.remove_source_image();

        assert_eq!(session.describe_source(ticket)?, None);
        let state = session.snapshot();
        assert!(state.interior_prompt.is_empty());
        assert!(!state.is_describing);
        Ok(())
    }

    #[test]
    fn current_description_seeds_interior_prompt() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([Reply::Text("a cosy loft")]));
        let session = controller(&model);
        session.switch_workflow(Workflow::Interior)?;

        let prompt = session.upload_source(image("TE9GVA=="))?;

        assert_eq!(prompt.as_deref(), Some("create a realistic photo of a cosy loft"));
        assert_eq!(session.snapshot().interior_prompt, "create a realistic photo of a cosy loft");
        Ok(())
    }

    #[test]
    fn dismissed_description_clears_flag_without_call() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.switch_workflow(Workflow::Interior)?;
        let Some(ticket) = session.set_source_image(image("TE9GVA==")) else {
            anyhow::bail!("interior upload should request a description");
        };

        session.dismiss_description(ticket);
        session.set_prompt("a bright studio");

        let state = session.snapshot();
        assert!(!state.is_describing);
        assert_eq!(state.interior_prompt, "a bright studio");
        assert_eq!(model.call_count(), 0);
        Ok(())
    }

    #[test]
    fn exterior_upload_skips_description() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        assert_eq!(session.upload_source(image("U1JD"))?, None);
        assert_eq!(model.call_count(), 0);
        Ok(())
    }

    #[test]
    fn locked_features_change_nothing() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller_with(&model, HistoryPersistence::in_memory(), true);
        let before = session.snapshot();

        assert!(matches!(session.switch_workflow(Workflow::Interior), Err(NboxError::FeatureLocked)));
        assert!(matches!(session.switch_workflow(Workflow::Floorplan), Err(NboxError::FeatureLocked)));
        assert!(matches!(
            session.request_edit("data:image/png;base64,QQ=="),
            Err(NboxError::FeatureLocked)
        ));
        assert!(matches!(session.restore_edit_history(1), Err(NboxError::FeatureLocked)));
        assert!(matches!(
            session.select_history_item(HistoryKind::Interior, 1),
            Err(NboxError::FeatureLocked)
        ));
        assert!(matches!(
            session.run_utility("change_style", Some(image("QQ==")), None, "x"),
            Err(NboxError::FeatureLocked)
        ));

        assert_eq!(session.snapshot(), before);
        assert_eq!(model.call_count(), 0);
        Ok(())
    }

    #[test]
    fn select_history_item_restores_results() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        let images = session.generate()?;
        let id = session.history().exterior[0].id;
        session.switch_workflow(Workflow::Utilities)?;

        session.select_history_item(HistoryKind::Exterior, id)?;

        let state = session.snapshot();
        assert_eq!(state.workflow, Workflow::Exterior);
        assert_eq!(state.results, images);
        assert!(matches!(
            session.select_history_item(HistoryKind::Exterior, id + 1),
            Err(NboxError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn edit_records_history_and_restores() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([Reply::Image("RURJVA==")]));
        let session = controller(&model);
        session.request_edit("data:image/png;base64,U1JD")?;
        assert_eq!(session.workflow(), Workflow::Edit);

        let result = session.edit(image("TUFTSw=="), "replace the sofa")?;

        assert_eq!(result, "data:image/png;base64,RURJVA==");
        let history = session.history();
        assert_eq!(history.edit.len(), 1);
        assert_eq!(history.edit[0].mask_image, Some(image("TUFTSw==")));

        session.switch_workflow(Workflow::Exterior)?;
        let restored = session.restore_edit_history(history.edit[0].id)?;
        let state = session.snapshot();
        assert_eq!(state.workflow, Workflow::Edit);
        assert_eq!(state.edit_source, Some(image("U1JD")));
        assert_eq!(state.edit_result.as_deref(), Some(restored.result_image.as_str()));
        Ok(())
    }

    #[test]
    fn change_angle_reuses_result_and_clears_reference() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.set_reference_image(Some(image("UkVG")));
        let images = session.generate()?;

        session.change_angle(1)?;

        let state = session.snapshot();
        assert_eq!(state.source.map(|source| source.to_data_url()), Some(images[1].clone()));
        assert_eq!(state.reference, None);
        assert_eq!(state.history.exterior.len(), 1);
        Ok(())
    }

    #[test]
    fn utility_runs_raw_prompt_without_history() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);

        let result = session.run_utility(
            "render_from_moodboard",
            Some(image("TU9PRA==")),
            None,
            "a calm reading corner",
        )?;

        assert!(result.starts_with("data:image/png;base64,"));
        let calls = model.content_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(session.history(), HistoryLogs::default());
        assert!(matches!(
            session.run_utility("render_from_moodboard", None, None, "x"),
            Err(NboxError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn angle_generation_outside_render_workflows_is_rejected() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new());
        let session = controller(&model);
        session.switch_workflow(Workflow::Floorplan)?;
        session.set_source_image(image("U1JD"));

        assert!(matches!(session.generate_angle(), Err(NboxError::Validation(_))));
        session.switch_workflow(Workflow::Edit)?;
        assert!(matches!(session.generate_angle(), Err(NboxError::Validation(_))));
        session.switch_workflow(Workflow::Utilities)?;
        assert!(matches!(session.generate_angle(), Err(NboxError::Validation(_))));

        assert_eq!(model.call_count(), 0);
        assert_eq!(session.history(), HistoryLogs::default());
        assert!(!session.snapshot().is_loading);

        session.switch_workflow(Workflow::Interior)?;
        session.set_source_image(image("U1JD"));
        session.set_render_count(1)?;
        session.generate_angle()?;
        let history = session.history();
        assert_eq!(history.interior.len(), 1);
        assert!(history.exterior.is_empty());
        Ok(())
    }

    #[test]
    fn failed_generation_resets_previous_shortfall() -> anyhow::Result<()> {
        let model = Arc::new(ScriptedModel::new().replies([
            Reply::Image("QQ=="),
            Reply::Empty,
            Reply::Empty,
            Reply::Empty,
            Reply::Fail("quota"),
        ]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.generate()?;
        assert!(session.last_shortfall().is_some());

        assert!(session.generate().is_err());
        assert_eq!(session.last_shortfall(), None);
        Ok(())
    }

    #[test]
    fn second_generation_is_rejected_while_one_is_in_flight() -> anyhow::Result<()> {
        let gate = Arc::new(Barrier::new(2));
        let model = Arc::new(ScriptedModel::new().replies([Reply::Held(gate.clone(), "QQ==")]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.set_render_count(1)?;

        let first = thread::scope(|scope| {
            let running = scope.spawn(|| session.generate());
            gate.wait();

            assert!(session.snapshot().is_loading);
            assert!(matches!(session.generate(), Err(NboxError::Busy("generation"))));
            assert!(matches!(
                session.run_utility("render_from_moodboard", Some(image("TU9PRA==")), None, "nook"),
                Err(NboxError::Busy("generation"))
            ));

            gate.wait();
            running.join()
        });

        let images = first.map_err(|_| anyhow::anyhow!("generation thread panicked"))??;
        assert_eq!(images, vec!["data:image/png;base64,QQ==".to_string()]);
        assert_eq!(model.call_count(), 1);
        assert!(!session.snapshot().is_loading);
        assert_eq!(session.history().exterior.len(), 1);
        Ok(())
    }

    #[test]
    fn upscale_in_flight_blocks_another_upscale_but_not_generation() -> anyhow::Result<()> {
        let gate = Arc::new(Barrier::new(2));
        let model = Arc::new(ScriptedModel::new().replies([
            Reply::Image("QQ=="),
            Reply::Held(gate.clone(), "VVA="),
        ]));
        let session = controller(&model);
        session.set_source_image(image("U1JD"));
        session.set_render_count(1)?;
        session.generate()?;

        let upscaled = thread::scope(|scope| -> anyhow::Result<_> {
            let running = scope.spawn(|| session.upscale(0, UpscaleTier::TwoK));
            gate.wait();

            assert_eq!(session.snapshot().upscaling_index, Some(0));
            assert!(matches!(
                session.upscale(0, UpscaleTier::FourK),
                Err(NboxError::Busy("upscale"))
            ));
            let overlapping = session.generate();

            gate.wait();
            let upscaled = running
                .join()
                .map_err(|_| anyhow::anyhow!("upscale thread panicked"))?;
            overlapping?;
            Ok(upscaled)
        })?;

        assert_eq!(upscaled?, "data:image/png;base64,VVA=");
        let state = session.snapshot();
        assert_eq!(state.upscaling_index, None);
        assert_eq!(state.history.exterior.len(), 2);
        assert_eq!(model.call_count(), 3);
        Ok(())
    }

    #[test]
    fn history_survives_a_restart() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let model = Arc::new(ScriptedModel::new());
        {
            let persistence = HistoryPersistence::new(Box::new(JsonFileStore::new(&path)));
            let session = controller_with(&model, persistence, false);
            session.set_source_image(image("U1JD"));
            session.generate()?;
        }

        let persistence = HistoryPersistence::new(Box::new(JsonFileStore::new(&path)));
        let session = controller_with(&model, persistence, false);
        assert_eq!(session.history().exterior.len(), 1);
        Ok(())
    }

    #[test]
    fn malformed_stored_log_loads_empty() {
        let model = Arc::new(ScriptedModel::new());
        let store = MemoryStore::new()
            .with_value("floorplanHistory", "not json")
            .with_value("editHistory", "[]");
        let session = controller_with(&model, HistoryPersistence::new(Box::new(store)), false);
        assert_eq!(session.history(), HistoryLogs::default());
    }
}
