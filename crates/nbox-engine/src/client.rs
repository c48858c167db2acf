use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use nbox_contracts::prompts::instructions::DESCRIBE_INTERIOR_INSTRUCTION;
use nbox_contracts::prompts::{
    elaborate, masked_edit_instruction, upscale_instruction, PromptContext, RenderType,
    UpscaleTier,
};
use nbox_contracts::{NboxError, NboxResult, SourceImage};

use crate::config::EngineConfig;
use crate::gemini::{ContentRequest, GenerativeModel, ImagesRequest, Modality, Part};

pub const DEFAULT_RENDER_COUNT: usize = 4;
const TEXT_TO_IMAGE_MIME: &str = "image/jpeg";
const TEXT_TO_IMAGE_ASPECT_RATIO: &str = "1:1";

/// Inputs for one render batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub image: SourceImage,
    pub prompt: String,
    pub render_type: RenderType,
    pub count: usize,
    pub reference: Option<SourceImage>,
    pub is_angle: bool,
    pub use_raw: bool,
}

impl GenerationRequest {
    pub fn new(image: SourceImage, prompt: impl Into<String>, render_type: RenderType) -> Self {
        Self {
            image,
            prompt: prompt.into(),
            render_type,
            count: DEFAULT_RENDER_COUNT,
            reference: None,
            is_angle: false,
            use_raw: false,
        }
    }

    fn prompt_context(&self) -> PromptContext {
        PromptContext {
            render_type: self.render_type,
            has_reference: self.reference.is_some(),
            is_angle: self.is_angle,
            use_raw: self.use_raw,
        }
    }
}

/// Wraps every call to the hosted model. Holds no session state.
#[derive(Clone)]
pub struct GenerationClient {
    model: Arc<dyn GenerativeModel>,
    text_model: String,
    image_model: String,
    imagen_model: String,
}

impl GenerationClient {
    pub fn new(model: Arc<dyn GenerativeModel>, config: &EngineConfig) -> Self {
        Self {
            model,
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            imagen_model: config.imagen_model.clone(),
        }
    }

    fn ensure_credential(&self) -> NboxResult<()> {
        if self.model.has_credential() {
            return Ok(());
        }
        Err(NboxError::MissingCredential)
    }

    fn image_request(&self, parts: Vec<Part>) -> ContentRequest {
        ContentRequest {
            model: self.image_model.clone(),
            parts,
            response_modalities: vec![Modality::Image, Modality::Text],
        }
    }

    fn single_image(
        &self,
        operation: &'static str,
        request: &ContentRequest,
    ) -> NboxResult<Option<String>> {
        let response = self
            .model
            .generate_content(request)
            .map_err(|err| NboxError::transport(operation, err))?;
        Ok(response.first_image().map(SourceImage::to_data_url))
    }

    pub fn describe(&self, image: &SourceImage) -> NboxResult<String> {
        self.ensure_credential()?;
        let request = ContentRequest {
            model: self.text_model.clone(),
            parts: vec![
                Part::Image(image.clone()),
                Part::Text(DESCRIBE_INTERIOR_INSTRUCTION.to_string()),
            ],
            response_modalities: Vec::new(),
        };
        let response = self
            .model
            .generate_content(&request)
            .map_err(|err| NboxError::transport("describe", err))?;
        let text = response.text().trim().to_string();
        if text.is_empty() {
            return Err(NboxError::NoTextProduced);
        }
        Ok(text)
    }

    /// Issues `count` identical calls in parallel.
    ///
    /// Results arrive in completion order. Calls that return no image are dropped, so
    /// the result may be shorter than `count`. Any call error fails the whole batch once
    /// every call has settled.
    pub fn generate(&self, request: &GenerationRequest) -> NboxResult<Vec<String>> {
        self.ensure_credential()?;
        if request.count == 0 {
            return Err(NboxError::Validation(
                "At least one image must be requested.".to_string(),
            ));
        }

        let prompt = elaborate(&request.prompt, &request.prompt_context());
        let mut parts = vec![Part::Image(request.image.clone())];
        if let Some(reference) = &request.reference {
            parts.push(Part::Image(reference.clone()));
        }
        parts.push(Part::Text(prompt));
        let content_request = self.image_request(parts);

        tracing::info!(
            render_type = %request.render_type,
            count = request.count,
            model = %self.image_model,
            "starting parallel generation"
        );

        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for index in 0..request.count {
                let tx = tx.clone();
                let content_request = &content_request;
                scope.spawn(move || {
                    let outcome = self.model.generate_content(content_request);
                    // The receiver outlives the scope, so a send can only fail if it was dropped.
                    let _ = tx.send((index, outcome));
                });
            }
        });
        drop(tx);

        let mut images = Vec::with_capacity(request.count);
        let mut first_error = None;
        for (index, outcome) in rx {
            match outcome {
                Ok(response) => match response.first_image() {
                    Some(image) => images.push(image.to_data_url()),
                    None => tracing::debug!(call = index, "generation call returned no image"),
                },
                Err(err) => {
                    tracing::debug!(call = index, error = %format!("{err:#}"), "generation call failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(NboxError::transport("generate", err));
        }
        Ok(images)
    }

    pub fn upscale(&self, image: &SourceImage, tier: UpscaleTier) -> NboxResult<Option<String>> {
        self.ensure_credential()?;
        let request = self.image_request(vec![
            Part::Image(image.clone()),
            Part::Text(upscale_instruction(tier)),
        ]);
        self.single_image("upscale", &request)
    }

    /// Masked edit. Only the mask's white region may change; the model is trusted on that.
    pub fn edit(
        &self,
        image: &SourceImage,
        mask: &SourceImage,
        prompt: &str,
    ) -> NboxResult<Option<String>> {
        self.ensure_credential()?;
        let request = self.image_request(vec![
            Part::Image(image.clone()),
            Part::Image(mask.clone()),
            Part::Text(masked_edit_instruction(prompt)),
        ]);
        self.single_image("edit", &request)
    }

    pub fn text_to_image(&self, prompt: &str) -> NboxResult<Option<String>> {
        self.ensure_credential()?;
        let request = ImagesRequest {
            model: self.imagen_model.clone(),
            prompt: prompt.to_string(),
            sample_count: 1,
            output_mime_type: TEXT_TO_IMAGE_MIME.to_string(),
            aspect_ratio: TEXT_TO_IMAGE_ASPECT_RATIO.to_string(),
        };
        let predictions = self
            .model
            .generate_images(&request)
            .map_err(|err| NboxError::transport("text-to-image", err))?;
        let Some(first) = predictions.into_iter().next() else {
            return Ok(None);
        };
        match first.image {
            Some(image) => Ok(Some(image.to_data_url())),
            None => Err(NboxError::NoImageProduced),
        }
    }
}
