use crate::fields::RawFormFields;
use crate::parser;
use image::DynamicImage;
use serde_json::{Map, Value};

/// UI sentinel meaning "inherit the base checkpoint for the high-res pass".
pub const USE_SAME_CHECKPOINT: &str = "Use same checkpoint";
/// UI sentinel meaning "inherit the base sampler for the high-res pass".
pub const USE_SAME_SAMPLER: &str = "Use same sampler";
/// UI sentinel meaning "inherit the base scheduler for the high-res pass".
pub const USE_SAME_SCHEDULER: &str = "Use same scheduler";

/// Second-pass refinement options. Present if and only if the high-res pass
/// is enabled; the `None` overrides inherit the base pipeline choice.
#[derive(Debug, Clone, PartialEq)]
pub struct HighResPass {
    pub scale: f64,
    pub upscaler: String,
    pub second_pass_steps: u32,
    pub resize_x: u32,
    pub resize_y: u32,
    pub checkpoint_name: Option<String>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub prompt: String,
    pub negative_prompt: String,
}

/// One fully-assembled generation request.
///
/// Created per invocation and never mutated after dispatch begins. The
/// decoded first-pass image (regeneration flow only) is owned here, so it is
/// released with the request on every exit path.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub styles: Vec<String>,
    pub batch_size: u32,
    pub iteration_count: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    pub sampler_name: String,
    pub scheduler_name: String,
    pub high_res: Option<HighResPass>,
    pub denoising_strength: f64,
    pub override_settings: Map<String, Value>,
    pub seed: i64,
    pub subseed: i64,
    pub firstpass_image: Option<DynamicImage>,
    pub user: String,
    pub script_args: Vec<Value>,
}

/// Assembles a request from raw form fields.
///
/// `force_enable_hr` turns the high-res pass on regardless of the form flag
/// (the regenerate-one-image flow always wants a second pass). Numeric
/// ranges are not validated here; invalid values surface when the pipeline
/// runs them.
pub fn build_request(
    fields: RawFormFields,
    session_user: &str,
    force_enable_hr: bool,
) -> GenerationRequest {
    let RawFormFields {
        prompt,
        negative_prompt,
        styles,
        iteration_count,
        batch_size,
        cfg_scale,
        height,
        width,
        sampler_name,
        scheduler_name,
        seed,
        subseed,
        enable_hr,
        denoising_strength,
        hr_scale,
        hr_upscaler,
        hr_second_pass_steps,
        hr_resize_x,
        hr_resize_y,
        hr_checkpoint_name,
        hr_sampler_name,
        hr_scheduler,
        hr_prompt,
        hr_negative_prompt,
        override_settings_text,
        script_args,
    } = fields;

    let high_res = if enable_hr || force_enable_hr {
        Some(HighResPass {
            scale: hr_scale,
            upscaler: hr_upscaler,
            second_pass_steps: hr_second_pass_steps,
            resize_x: hr_resize_x,
            resize_y: hr_resize_y,
            checkpoint_name: collapse_sentinel(hr_checkpoint_name, USE_SAME_CHECKPOINT),
            sampler_name: collapse_sentinel(hr_sampler_name, USE_SAME_SAMPLER),
            scheduler: collapse_sentinel(hr_scheduler, USE_SAME_SCHEDULER),
            prompt: hr_prompt,
            negative_prompt: hr_negative_prompt,
        })
    } else {
        None
    };

    GenerationRequest {
        prompt,
        negative_prompt,
        styles,
        batch_size,
        iteration_count,
        cfg_scale,
        width,
        height,
        sampler_name,
        scheduler_name,
        high_res,
        denoising_strength,
        override_settings: parser::parse_override_settings(&override_settings_text),
        seed,
        subseed,
        firstpass_image: None,
        user: session_user.to_string(),
        script_args,
    }
}

fn collapse_sentinel(value: String, sentinel: &str) -> Option<String> {
    if value == sentinel {
        None
    } else {
        Some(value)
    }
}
