//! Typed boundary for the UI's loosely-typed form submission.
//!
//! The toolkit delivers one flat, ordered value list per generation click.
//! `RawFormFields::from_positional` is the only place that ordering is
//! interpreted; everything past the fixed slots rides along as opaque
//! script arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Number of fixed positional slots before the trailing script arguments.
pub const FIXED_FIELD_COUNT: usize = 25;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("expected at least {expected} form values, got {got}")]
    WrongArity { expected: usize, got: usize },
    #[error("form value {index} ({name}) is not a {expected}")]
    BadSlot {
        index: usize,
        name: &'static str,
        expected: &'static str,
    },
}

/// Raw form values for one generation submission, in UI order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFormFields {
    pub prompt: String,
    pub negative_prompt: String,
    pub styles: Vec<String>,
    pub iteration_count: u32,
    pub batch_size: u32,
    pub cfg_scale: f64,
    pub height: u32,
    pub width: u32,
    pub sampler_name: String,
    pub scheduler_name: String,
    pub seed: i64,
    pub subseed: i64,
    pub enable_hr: bool,
    pub denoising_strength: f64,
    pub hr_scale: f64,
    pub hr_upscaler: String,
    pub hr_second_pass_steps: u32,
    pub hr_resize_x: u32,
    pub hr_resize_y: u32,
    pub hr_checkpoint_name: String,
    pub hr_sampler_name: String,
    pub hr_scheduler: String,
    pub hr_prompt: String,
    pub hr_negative_prompt: String,
    pub override_settings_text: String,
    /// Trailing positional values, passed through untouched to the script
    /// hook chain.
    pub script_args: Vec<Value>,
}

impl RawFormFields {
    /// Decodes the fixed positional contract.
    ///
    /// Slot order: prompt, negative_prompt, styles, iteration_count,
    /// batch_size, cfg_scale, height, width, sampler_name, scheduler_name,
    /// seed, subseed, enable_hr, denoising_strength, hr_scale, hr_upscaler,
    /// hr_second_pass_steps, hr_resize_x, hr_resize_y, hr_checkpoint_name,
    /// hr_sampler_name, hr_scheduler, hr_prompt, hr_negative_prompt,
    /// override_settings_text. Values beyond that become `script_args`.
    pub fn from_positional(values: &[Value]) -> Result<Self, FieldError> {
        if values.len() < FIXED_FIELD_COUNT {
            return Err(FieldError::WrongArity {
                expected: FIXED_FIELD_COUNT,
                got: values.len(),
            });
        }

        Ok(Self {
            prompt: expect_str(values, 0, "prompt")?,
            negative_prompt: expect_str(values, 1, "negative_prompt")?,
            styles: expect_str_list(values, 2, "styles")?,
            iteration_count: expect_u32(values, 3, "iteration_count")?,
            batch_size: expect_u32(values, 4, "batch_size")?,
            cfg_scale: expect_f64(values, 5, "cfg_scale")?,
            height: expect_u32(values, 6, "height")?,
            width: expect_u32(values, 7, "width")?,
            sampler_name: expect_str(values, 8, "sampler_name")?,
            scheduler_name: expect_str(values, 9, "scheduler_name")?,
            seed: expect_i64(values, 10, "seed")?,
            subseed: expect_i64(values, 11, "subseed")?,
            enable_hr: expect_bool(values, 12, "enable_hr")?,
            denoising_strength: expect_f64(values, 13, "denoising_strength")?,
            hr_scale: expect_f64(values, 14, "hr_scale")?,
            hr_upscaler: expect_str(values, 15, "hr_upscaler")?,
            hr_second_pass_steps: expect_u32(values, 16, "hr_second_pass_steps")?,
            hr_resize_x: expect_u32(values, 17, "hr_resize_x")?,
            hr_resize_y: expect_u32(values, 18, "hr_resize_y")?,
            hr_checkpoint_name: expect_str(values, 19, "hr_checkpoint_name")?,
            hr_sampler_name: expect_str(values, 20, "hr_sampler_name")?,
            hr_scheduler: expect_str(values, 21, "hr_scheduler")?,
            hr_prompt: expect_str(values, 22, "hr_prompt")?,
            hr_negative_prompt: expect_str(values, 23, "hr_negative_prompt")?,
            override_settings_text: expect_str(values, 24, "override_settings_text")?,
            script_args: values[FIXED_FIELD_COUNT..].to_vec(),
        })
    }
}

fn expect_str(values: &[Value], index: usize, name: &'static str) -> Result<String, FieldError> {
    values[index]
        .as_str()
        .map(str::to_string)
        .ok_or(FieldError::BadSlot {
            index,
            name,
            expected: "string",
        })
}

fn expect_str_list(
    values: &[Value],
    index: usize,
    name: &'static str,
) -> Result<Vec<String>, FieldError> {
    let bad_slot = || FieldError::BadSlot {
        index,
        name,
        expected: "string array",
    };
    let Some(items) = values[index].as_array() else {
        return Err(bad_slot());
    };

    let mut list = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(text) => list.push(text.to_string()),
            None => return Err(bad_slot()),
        }
    }
    Ok(list)
}

fn expect_bool(values: &[Value], index: usize, name: &'static str) -> Result<bool, FieldError> {
    values[index].as_bool().ok_or(FieldError::BadSlot {
        index,
        name,
        expected: "boolean",
    })
}

fn expect_f64(values: &[Value], index: usize, name: &'static str) -> Result<f64, FieldError> {
    values[index].as_f64().ok_or(FieldError::BadSlot {
        index,
        name,
        expected: "number",
    })
}

fn expect_i64(values: &[Value], index: usize, name: &'static str) -> Result<i64, FieldError> {
    values[index].as_i64().ok_or(FieldError::BadSlot {
        index,
        name,
        expected: "integer",
    })
}

fn expect_u32(values: &[Value], index: usize, name: &'static str) -> Result<u32, FieldError> {
    values[index]
        .as_u64()
        .and_then(|raw| u32::try_from(raw).ok())
        .ok_or(FieldError::BadSlot {
            index,
            name,
            expected: "unsigned integer",
        })
}

/// Canonical positional value list used across the crate's tests.
#[cfg(test)]
pub(crate) fn sample_positional() -> Vec<Value> {
    use serde_json::json;

    vec![
        json!("a castle on a hill"),
        json!("blurry"),
        json!(["cinematic", "portrait"]),
        json!(2),
        json!(4),
        json!(7.5),
        json!(768),
        json!(512),
        json!("Euler a"),
        json!("Karras"),
        json!(-1),
        json!(-1),
        json!(false),
        json!(0.55),
        json!(2.0),
        json!("Latent"),
        json!(12),
        json!(0),
        json!(0),
        json!("Use same checkpoint"),
        json!("Use same sampler"),
        json!("Use same scheduler"),
        json!(""),
        json!(""),
        json!("CLIP_stop_at_last_layers: 2"),
    ]
}
