use crate::backend::BackendError;
use crate::request::GenerationRequest;
use crate::session::GenerationSession;
use crate::settings::SettingsStore;
use image::{DynamicImage, RgbImage};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("script hook failed: {0}")]
    Script(String),
    #[error("pipeline failed: {0}")]
    Pipeline(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One generated (or referenced) gallery image.
///
/// `already_saved_as` carries the saved-file location when the pixel data on
/// disk is authoritative; reconciliation placeholders are 1x1 buffers whose
/// reference is the only meaningful payload.
#[derive(Debug, Clone)]
pub struct OutputImage {
    pub image: DynamicImage,
    pub already_saved_as: Option<String>,
}

impl OutputImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            already_saved_as: None,
        }
    }

    /// A 1x1 stand-in for an image that already exists at `saved_as`.
    pub fn placeholder(saved_as: impl Into<String>) -> Self {
        Self {
            image: DynamicImage::ImageRgb8(RgbImage::new(1, 1)),
            already_saved_as: Some(saved_as.into()),
        }
    }

    pub fn reference(&self) -> Option<&str> {
        self.already_saved_as.as_deref()
    }
}

/// Normalized output of one generation run.
///
/// `infotexts` is parallel to `images` (one textual parameter record per
/// image); `info` summarizes the representative first image for display.
#[derive(Debug, Clone, Default)]
pub struct GenerationResult {
    pub images: Vec<OutputImage>,
    pub infotexts: Vec<String>,
    pub info: String,
    pub comments: String,
}

impl GenerationResult {
    /// Deterministic JSON encoding of the result.
    ///
    /// Pixel data is excluded; each image contributes only its saved-file
    /// reference (or null when it was never saved).
    pub fn to_json(&self) -> String {
        json!({
            "images": self
                .images
                .iter()
                .map(|image| image.already_saved_as.clone())
                .collect::<Vec<_>>(),
            "infotexts": self.infotexts,
            "info": self.info,
            "comments": self.comments,
        })
        .to_string()
    }

    /// Rebuilds a result from `to_json` output. Saved references come back
    /// as placeholders; pixel data does not survive the round trip.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Blob {
            #[serde(default)]
            images: Vec<Option<String>>,
            #[serde(default)]
            infotexts: Vec<String>,
            #[serde(default)]
            info: String,
            #[serde(default)]
            comments: String,
        }

        let blob: Blob = serde_json::from_str(raw)?;
        Ok(Self {
            images: blob
                .images
                .into_iter()
                .map(|reference| OutputImage {
                    image: DynamicImage::ImageRgb8(RgbImage::new(1, 1)),
                    already_saved_as: reference,
                })
                .collect(),
            infotexts: blob.infotexts,
            info: blob.info,
            comments: blob.comments,
        })
    }
}

/// A pluggable request handler that may claim a request outright.
///
/// Returning `Ok(None)` means "not mine"; the dispatcher then tries the next
/// runner and finally the default pipeline.
pub trait ScriptRunner: Send + Sync {
    fn try_run(
        &self,
        request: &GenerationRequest,
        session: &GenerationSession,
    ) -> Result<Option<GenerationResult>, DispatchError>;
}

/// The default image-processing path, invoked when no script claims the
/// request.
pub trait ImagePipeline: Send + Sync {
    fn process(
        &self,
        request: &GenerationRequest,
        session: &GenerationSession,
    ) -> Result<GenerationResult, DispatchError>;
}

/// Ordered script hooks; the first runner to return a result wins.
#[derive(Default)]
pub struct ScriptChain {
    runners: Vec<Box<dyn ScriptRunner>>,
}

impl ScriptChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, runner: Box<dyn ScriptRunner>) {
        self.runners.push(runner);
    }

    pub fn run(
        &self,
        request: &GenerationRequest,
        session: &GenerationSession,
    ) -> Result<Option<GenerationResult>, DispatchError> {
        for runner in &self.runners {
            if let Some(result) = runner.try_run(request, session)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}

/// Routes a request through the script chain, falling back to the default
/// pipeline, and applies the post-generation settings side effects.
pub struct Dispatcher {
    scripts: ScriptChain,
    default_pipeline: Box<dyn ImagePipeline>,
}

impl Dispatcher {
    pub fn new(scripts: ScriptChain, default_pipeline: Box<dyn ImagePipeline>) -> Self {
        Self {
            scripts,
            default_pipeline,
        }
    }

    /// Runs one generation request to completion.
    ///
    /// The request is consumed: its resources (notably the decoded
    /// first-pass image) are released on every exit path, success or error.
    /// Errors from scripts and the pipeline propagate unchanged; there are
    /// no retries.
    pub fn dispatch(
        &self,
        request: GenerationRequest,
        session: &GenerationSession,
        opts: &SettingsStore,
    ) -> Result<GenerationResult, DispatchError> {
        let mut processed = match self.scripts.run(&request, session)? {
            Some(result) => result,
            None => self.default_pipeline.process(&request, session)?,
        };
        drop(request);

        // The progress display is process-wide; reset it so the next request
        // starts from a clean slate.
        session.progress.clear();

        if opts.bool_value("samples_log_stdout") {
            log::info!("{}", processed.to_json());
        }

        if opts.bool_value("do_not_show_images") {
            processed.images.clear();
        }

        Ok(processed)
    }
}
