use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use walkdir::WalkDir;

/// Short content-hash length, matching what infotexts record for a model.
const SHORTHASH_LEN: usize = 10;
const HASH_READ_CAPACITY: usize = 1024 * 1024;

/// Subdirectories under a model root that hold non-checkpoint weights.
const BLOCKED_SEGMENTS: &[&str] = &[
    "lora",
    "loras",
    "lycoris",
    "embeddings",
    "vae",
    "controlnet",
    "hypernetwork",
    "hypernetworks",
    "upscaler",
    "upscalers",
    "esrgan",
    "codeformer",
    "gfpgan",
    "clip",
    "textualinversion",
];

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One checkpoint file eligible for hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointFile {
    pub name: String,
    pub path: PathBuf,
}

/// A computed checkpoint shorthash.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointHash {
    pub name: String,
    pub shorthash: String,
}

/// Recursively collects checkpoint files under `dir`.
///
/// Only `.safetensors`/`.ckpt`/`.gguf` files count, and anything inside a
/// known auxiliary-weights subdirectory (LoRA, VAE, upscalers, ...) is
/// skipped. Results are sorted by name for stable ordering.
pub fn discover_checkpoints(dir: &Path) -> Vec<CheckpointFile> {
    let mut checkpoints = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        if ext != "safetensors" && ext != "ckpt" && ext != "gguf" {
            continue;
        }

        let lowered = path.to_string_lossy().to_ascii_lowercase();
        let blocked = BLOCKED_SEGMENTS.iter().any(|segment| {
            lowered.contains(&format!("/{}/", segment))
                || lowered.contains(&format!("\\{}\\", segment))
        });
        if blocked {
            continue;
        }

        let Some(name) = path.file_name().and_then(|value| value.to_str()) else {
            continue;
        };
        checkpoints.push(CheckpointFile {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }

    checkpoints.sort_by(|a, b| a.name.cmp(&b.name));
    checkpoints
}

/// Computes shorthashes for every checkpoint on a fixed-size worker pool.
///
/// The pool has `max_threads` workers (at least 1) and the call blocks until
/// every entry has been processed. Failures are per item: one unreadable
/// checkpoint is reported in its own slot and never cancels the others.
/// `progress` receives `(completed, total)` after each item finishes, in
/// completion order.
pub fn hash_all(
    entries: &[CheckpointFile],
    max_threads: usize,
    progress: &(dyn Fn(usize, usize) + Sync),
) -> Vec<Result<CheckpointHash, HashError>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads.max(1))
        .thread_name(|idx| format!("ckpt-hash-{}", idx))
        .build()
        .expect("failed to create checkpoint hash threadpool");

    let total = entries.len();
    let completed = AtomicUsize::new(0);

    let results = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| {
                let result = compute_shorthash(&entry.path).map(|shorthash| CheckpointHash {
                    name: entry.name.clone(),
                    shorthash,
                });
                if let Err(error) = &result {
                    log::warn!("Hash failed for {}: {}", entry.name, error);
                }

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("{} / {}", done, total);
                progress(done, total);

                result
            })
            .collect()
    });

    log::info!("Finished calculating hashes for {} checkpoints", total);
    results
}

/// Full-file SHA-256, truncated to the shorthash length.
fn compute_shorthash(path: &Path) -> Result<String, HashError> {
    let read_err = |source| HashError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_err)?;
    let mut reader = BufReader::with_capacity(HASH_READ_CAPACITY, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_READ_CAPACITY];

    loop {
        let read = reader.read(&mut buffer).map_err(read_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let mut hex = hex_encode(&hasher.finalize()[..]);
    hex.truncate(SHORTHASH_LEN);
    Ok(hex)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}
