use crate::fields::RawFormFields;
use crate::gallery::{decode_source, reconcile, GallerySource, GenerationInfo};
use crate::html::plaintext_to_html;
use crate::parser::parse_infotext;
use crate::pipeline::OutputImage;
use crate::request::build_request;
use crate::settings::{SettingUpdate, SettingValue};
use crate::AppState;
use serde_json::Value;

/// Four-tuple handed back to the UI after a generation call.
pub type GenerationOutput = (Vec<OutputImage>, String, String, String);

/// Runs one full generation from the form's positional values.
///
/// Returns `(images, generation_info_json, info_html, comments_html)`.
pub fn txt2img(state: &AppState, user: &str, values: &[Value]) -> Result<GenerationOutput, String> {
    let fields = RawFormFields::from_positional(values).map_err(|error| error.to_string())?;

    let opts = state
        .settings
        .read()
        .map_err(|_| "Failed to read settings".to_string())?;

    if opts.bool_value("enable_console_prompts") {
        log::info!("txt2img: {}", fields.prompt);
    }

    let request = build_request(fields, user, false);
    let processed = state
        .dispatcher
        .dispatch(request, &state.session, &opts)
        .map_err(|error| error.to_string())?;

    let generation_info = processed.to_json();
    let info_html = plaintext_to_html(&processed.info, None);
    let comments_html = plaintext_to_html(&processed.comments, Some("comments"));

    Ok((processed.images, generation_info, info_html, comments_html))
}

/// Regenerates one gallery image with a forced high-res pass and splices
/// the result back in.
///
/// The selected image becomes the first-pass input and its recorded seeds
/// are reused, so the refinement stays anchored to the original. Returns
/// the rebuilt gallery in place of raw images.
pub fn txt2img_upscale(
    state: &AppState,
    user: &str,
    gallery: &[GallerySource],
    gallery_index: usize,
    generation_info: &str,
    values: &[Value],
) -> Result<GenerationOutput, String> {
    if gallery.is_empty() {
        return Err("no image to upscale".to_string());
    }
    if gallery_index >= gallery.len() {
        return Err(format!("bad image index: {}", gallery_index));
    }

    let fields = RawFormFields::from_positional(values).map_err(|error| error.to_string())?;

    let opts = state
        .settings
        .read()
        .map_err(|_| "Failed to read settings".to_string())?;

    if opts.bool_value("enable_console_prompts") {
        log::info!("txt2img (upscale): {}", fields.prompt);
    }

    let mut request = build_request(fields, user, true);
    request.batch_size = 1;
    request.iteration_count = 1;

    let mut info =
        GenerationInfo::from_json(generation_info).map_err(|error| error.to_string())?;

    request.firstpass_image =
        Some(decode_source(&gallery[gallery_index]).map_err(|error| error.to_string())?);

    let recorded = parse_infotext(info.infotexts.get(gallery_index).map_or("", String::as_str));
    request.seed = recorded.seed();
    request.subseed = recorded.variation_seed();

    // The first pass already exists on disk.
    request.override_settings.insert(
        "save_images_before_highres_fix".to_string(),
        Value::Bool(false),
    );

    let processed = state
        .dispatcher
        .dispatch(request, &state.session, &opts)
        .map_err(|error| error.to_string())?;

    let outcome = reconcile(gallery, gallery_index, &mut info, &processed)
        .map_err(|error| error.to_string())?;

    Ok((
        outcome.gallery,
        outcome.generation_info_json,
        outcome.info_html,
        outcome.comments_html,
    ))
}

/// Applies a full settings-panel submission.
pub fn run_settings(state: &AppState, values: &[SettingValue]) -> Result<(String, String), String> {
    let mut store = state
        .settings
        .write()
        .map_err(|_| "Failed to update settings".to_string())?;
    state
        .panel
        .apply_all(&mut store, values)
        .map_err(|error| error.to_string())
}

/// Applies a single setting change (quicksettings and per-widget events).
pub fn run_settings_single(
    state: &AppState,
    value: Option<SettingValue>,
    key: &str,
) -> Result<(SettingUpdate, String), String> {
    let mut store = state
        .settings
        .write()
        .map_err(|_| "Failed to update settings".to_string())?;
    Ok(state.panel.apply_single(&mut store, value, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::sample_positional;
    use crate::pipeline::{
        DispatchError, Dispatcher, GenerationResult, ImagePipeline, ScriptChain,
    };
    use crate::request::GenerationRequest;
    use crate::session::GenerationSession;
    use crate::settings::default_ui_settings;
    use image::{DynamicImage, RgbImage};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// What the stub pipeline observed about the dispatched request.
    #[derive(Debug, Clone, Default)]
    struct SeenRequest {
        enable_hr: bool,
        batch_size: u32,
        iteration_count: u32,
        seed: i64,
        subseed: i64,
        has_firstpass: bool,
        save_before_highres: Option<Value>,
    }

    struct StubPipeline {
        seen: Mutex<Option<SeenRequest>>,
        result: GenerationResult,
    }

    impl ImagePipeline for StubPipeline {
        fn process(
            &self,
            request: &GenerationRequest,
            _session: &GenerationSession,
        ) -> Result<GenerationResult, DispatchError> {
            *self.seen.lock().expect("seen lock poisoned") = Some(SeenRequest {
                enable_hr: request.high_res.is_some(),
                batch_size: request.batch_size,
                iteration_count: request.iteration_count,
                seed: request.seed,
                subseed: request.subseed,
                has_firstpass: request.firstpass_image.is_some(),
                save_before_highres: request
                    .override_settings
                    .get("save_images_before_highres_fix")
                    .cloned(),
            });
            Ok(self.result.clone())
        }
    }

    /// Forwards to a leaked stub so the test can inspect it after dispatch.
    struct LeakedPipeline(&'static StubPipeline);

    impl ImagePipeline for LeakedPipeline {
        fn process(
            &self,
            request: &GenerationRequest,
            session: &GenerationSession,
        ) -> Result<GenerationResult, DispatchError> {
            self.0.process(request, session)
        }
    }

    fn state_with(result: GenerationResult) -> (AppState, &'static StubPipeline) {
        static CONFIG_SEQ: AtomicUsize = AtomicUsize::new(0);

        let pipeline: &'static StubPipeline = Box::leak(Box::new(StubPipeline {
            seen: Mutex::new(None),
            result,
        }));
        let dispatcher = Dispatcher::new(ScriptChain::new(), Box::new(LeakedPipeline(pipeline)));
        let config_path = std::env::temp_dir().join(format!(
            "forge_gen_link_cmd_{}_{}.json",
            std::process::id(),
            CONFIG_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        let state = AppState::new(dispatcher, default_ui_settings(), config_path);
        (state, pipeline)
    }

    fn single_image_result(infotext: &str, saved_as: &str) -> GenerationResult {
        GenerationResult {
            images: vec![OutputImage::placeholder(saved_as)],
            infotexts: vec![infotext.into()],
            info: infotext.into(),
            comments: "note".into(),
        }
    }

    fn write_temp_png(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "forge_gen_link_gallery_{}_{}.png",
            tag,
            std::process::id()
        ));
        DynamicImage::ImageRgb8(RgbImage::new(2, 2))
            .save(&path)
            .expect("failed to write temp png");
        path
    }

    #[test]
    fn txt2img_returns_images_and_rendered_info() {
        let (state, _) = state_with(single_image_result("Steps: 20, Seed: 7", "outputs/a.png"));
        let values = sample_positional();

        let (images, generation_info, info_html, comments_html) =
            txt2img(&state, "artist", &values).expect("txt2img failed");

        assert_eq!(images.len(), 1);
        assert!(generation_info.contains("Steps: 20, Seed: 7"));
        assert_eq!(info_html, "<p>Steps: 20, Seed: 7</p>");
        assert_eq!(comments_html, "<p class=\"comments\">note</p>");
    }

    #[test]
    fn txt2img_rejects_malformed_positional_values() {
        let (state, _) = state_with(GenerationResult::default());
        let error = txt2img(&state, "artist", &sample_positional()[..5]).unwrap_err();
        assert!(error.contains("form values"));
    }

    #[test]
    fn upscale_pins_single_image_settings_and_recovers_seeds() {
        let (state, pipeline) = state_with(single_image_result("B2", "outputs/b2.png"));
        let png = write_temp_png("seed_recovery");
        let gallery = vec![
            GallerySource::Saved {
                name: format!("{}?t=1", png.display()),
            },
            GallerySource::Saved {
                name: png.display().to_string(),
            },
        ];
        let generation_info = serde_json::json!({
            "infotexts": ["A1", "B1\nSteps: 20, Seed: 12345, Variation seed: 777"],
            "info": "A1",
        })
        .to_string();

        txt2img_upscale(
            &state,
            "artist",
            &gallery,
            1,
            &generation_info,
            &sample_positional(),
        )
        .expect("upscale failed");

        let seen = pipeline
            .seen
            .lock()
            .expect("seen lock poisoned")
            .clone()
            .expect("pipeline never ran");
        assert!(seen.enable_hr);
        assert_eq!(seen.batch_size, 1);
        assert_eq!(seen.iteration_count, 1);
        assert_eq!(seen.seed, 12345);
        assert_eq!(seen.subseed, 777);
        assert!(seen.has_firstpass);
        assert_eq!(seen.save_before_highres, Some(Value::Bool(false)));

        let _ = std::fs::remove_file(png);
    }

    #[test]
    fn upscale_splices_middle_image_of_three() {
        let (state, _) = state_with(single_image_result("B2", "outputs/b2.png"));
        let png = write_temp_png("splice");
        let gallery = vec![
            GallerySource::Saved {
                name: "outputs/a1.png?t=1".into(),
            },
            GallerySource::Saved {
                name: png.display().to_string(),
            },
            GallerySource::Saved {
                name: "outputs/c1.png".into(),
            },
        ];
        let generation_info = serde_json::json!({
            "infotexts": ["A1", "B1", "C1"],
            "info": "A1",
        })
        .to_string();

        let (new_gallery, info_json, info_html, _) = txt2img_upscale(
            &state,
            "artist",
            &gallery,
            1,
            &generation_info,
            &sample_positional(),
        )
        .expect("upscale failed");

        assert_eq!(new_gallery.len(), 3);
        assert_eq!(new_gallery[0].reference(), Some("outputs/a1.png"));
        assert_eq!(new_gallery[1].reference(), Some("outputs/b2.png"));
        assert_eq!(new_gallery[2].reference(), Some("outputs/c1.png"));

        let info: Value = serde_json::from_str(&info_json).expect("bad info json");
        assert_eq!(info["infotexts"], serde_json::json!(["A1", "B2", "C1"]));
        assert_eq!(info["info"], serde_json::json!("B2"));
        assert_eq!(info_html, "<p>B2</p>");

        let _ = std::fs::remove_file(png);
    }

    #[test]
    fn upscale_rejects_empty_gallery_and_bad_index() {
        let (state, _) = state_with(GenerationResult::default());
        let error =
            txt2img_upscale(&state, "artist", &[], 0, "{}", &sample_positional()).unwrap_err();
        assert_eq!(error, "no image to upscale");

        let gallery = vec![GallerySource::Saved {
            name: "outputs/a1.png".into(),
        }];
        let error = txt2img_upscale(&state, "artist", &gallery, 5, "{}", &sample_positional())
            .unwrap_err();
        assert_eq!(error, "bad image index: 5");
    }

    #[test]
    fn settings_surface_round_trips_through_the_panel() {
        let (state, _) = state_with(GenerationResult::default());

        let (update, snapshot) = run_settings_single(
            &state,
            Some(SettingValue::Bool(true)),
            "do_not_show_images",
        )
        .expect("apply failed");
        assert_eq!(update, SettingUpdate::Value(SettingValue::Bool(true)));
        assert!(snapshot.contains("\"do_not_show_images\":true"));

        let values = vec![
            SettingValue::Bool(false),
            SettingValue::Bool(false),
            SettingValue::Bool(false),
        ];
        let (_, summary) = run_settings(&state, &values).expect("batch apply failed");
        assert_eq!(summary, "1 settings changed: do_not_show_images.");
    }
}
