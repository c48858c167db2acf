use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Mutex};

use anyhow::{anyhow, Result};
use nbox_contracts::SourceImage;

use crate::gemini::{
    ContentRequest, ContentResponse, GeneratedImage, GenerativeModel, ImagesRequest, Part,
};

pub(crate) fn image(base64: &str) -> SourceImage {
    SourceImage {
        base64: base64.to_string(),
        mime_type: "image/png".to_string(),
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Image(&'static str),
    Text(&'static str),
    Empty,
    Fail(&'static str),
    /// Meets the test at the barrier once on entry and again before answering with the image.
    Held(Arc<Barrier>, &'static str),
}

#[derive(Debug, Clone)]
pub(crate) enum Call {
    Content(ContentRequest),
    Images(ImagesRequest),
}

/// In-memory model that replays scripted replies and records every request.
///
/// Once the script runs out every content call yields a fixed PNG payload.
#[derive(Debug)]
pub(crate) struct ScriptedModel {
    credential: bool,
    content: Mutex<VecDeque<Reply>>,
    predictions: Mutex<VecDeque<Vec<GeneratedImage>>>,
    calls: Mutex<Vec<Call>>,
}

pub(crate) const FALLBACK_IMAGE: &str = "RkFMTEJBQ0s=";

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self {
            credential: true,
            content: Mutex::new(VecDeque::new()),
            predictions: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn without_credential() -> Self {
        Self {
            credential: false,
            ..Self::new()
        }
    }

    pub(crate) fn replies(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.content.lock().unwrap().extend(replies);
        self
    }

    pub(crate) fn predictions(self, images: Vec<GeneratedImage>) -> Self {
        self.predictions.lock().unwrap().push_back(images);
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn content_calls(&self) -> Vec<ContentRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::Content(request) => Some(request.clone()),
                Call::Images(_) => None,
            })
            .collect()
    }

    pub(crate) fn image_calls(&self) -> Vec<ImagesRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::Images(request) => Some(request.clone()),
                Call::Content(_) => None,
            })
            .collect()
    }
}

impl GenerativeModel for ScriptedModel {
    fn has_credential(&self) -> bool {
        self.credential
    }

    fn generate_content(&self, request: &ContentRequest) -> Result<ContentResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Content(request.clone()));
        let reply = self
            .content
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Image(FALLBACK_IMAGE));
        match reply {
            Reply::Image(data) => Ok(ContentResponse {
                parts: vec![Part::Image(image(data))],
            }),
            Reply::Text(text) => Ok(ContentResponse {
                parts: vec![Part::Text(text.to_string())],
            }),
            Reply::Empty => Ok(ContentResponse::default()),
            Reply::Fail(message) => Err(anyhow!(message)),
            Reply::Held(barrier, data) => {
                barrier.wait();
                barrier.wait();
                Ok(ContentResponse {
                    parts: vec![Part::Image(image(data))],
                })
            }
        }
    }

    fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<GeneratedImage>> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Images(request.clone()));
        Ok(self
            .predictions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}
