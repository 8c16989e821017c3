//! `facepunch setup`: download and verify the ONNX models the daemon loads.

use anyhow::{bail, Context, Result};
use facepunch_models::{file_sha256, ModelFile, MODELS};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Pick the model directory.
///
/// Explicit argument first, then `FACEPUNCH_MODEL_DIR`. As root the default
/// is `/var/lib/facepunch/models`; otherwise `$XDG_DATA_HOME/facepunch/models`.
fn resolve_model_dir(
    explicit: Option<String>,
    root: bool,
    var: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    if let Some(dir) = explicit.or_else(|| var("FACEPUNCH_MODEL_DIR")) {
        return PathBuf::from(dir);
    }
    if root {
        return PathBuf::from("/var/lib/facepunch/models");
    }
    let data_home = var("XDG_DATA_HOME").unwrap_or_else(|| {
        let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
        format!("{home}/.local/share")
    });
    PathBuf::from(data_home).join("facepunch/models")
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}

/// Whether `path` already holds the expected file.
fn is_current(model: &ModelFile, path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    match file_sha256(path) {
        Ok(digest) if digest.eq_ignore_ascii_case(model.sha256) => true,
        Ok(_) => {
            println!("  {} exists but checksum differs, re-downloading", model.name);
            false
        }
        Err(_) => {
            println!("  {} exists but unreadable, re-downloading", model.name);
            false
        }
    }
}

/// Download one model with progress output, verify it, then move it into place.
fn download_model(model: &ModelFile, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", model.name, model.size_display);

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|len| *len > 0);

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    let digest = file_sha256(&tmp_path)?;
    if !digest.eq_ignore_ascii_case(model.sha256) {
        fs::remove_file(&tmp_path).ok();
        bail!(
            "checksum mismatch for {}:\n  expected: {}\n  got:      {}",
            model.name,
            model.sha256,
            digest
        );
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;
    tracing::debug!(model = model.name, path = %dest.display(), "model installed");

    Ok(())
}

/// Download every model in the manifest that is missing or stale.
pub fn run(model_dir: Option<String>) -> Result<()> {
    let dir = resolve_model_dir(model_dir, is_root(), |k| std::env::var(k).ok());

    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut skipped = 0;

    for model in MODELS {
        let dest = model.path_in(&dir);
        if is_current(model, &dest) {
            println!("  {} already present (checksum ok)", model.name);
            skipped += 1;
            continue;
        }
        download_model(model, &dest)?;
        downloaded += 1;
    }

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} model(s) downloaded, {skipped} already present.");
    } else {
        println!("All models already present. Nothing to download.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_explicit_dir_wins() {
        let dir = resolve_model_dir(
            Some("/opt/models".into()),
            true,
            env(&[("FACEPUNCH_MODEL_DIR", "/elsewhere")]),
        );
        assert_eq!(dir, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_env_dir_before_defaults() {
        let dir = resolve_model_dir(None, true, env(&[("FACEPUNCH_MODEL_DIR", "/srv/m")]));
        assert_eq!(dir, PathBuf::from("/srv/m"));
    }

    #[test]
    fn test_root_default() {
        let dir = resolve_model_dir(None, true, env(&[("HOME", "/root")]));
        assert_eq!(dir, PathBuf::from("/var/lib/facepunch/models"));
    }

    #[test]
    fn test_user_default_follows_xdg() {
        let dir = resolve_model_dir(None, false, env(&[("XDG_DATA_HOME", "/data")]));
        assert_eq!(dir, PathBuf::from("/data/facepunch/models"));

        let dir = resolve_model_dir(None, false, env(&[("HOME", "/home/ana")]));
        assert_eq!(dir, PathBuf::from("/home/ana/.local/share/facepunch/models"));
    }

    #[test]
    fn test_stale_file_is_not_current() {
        let dir = std::env::temp_dir().join(format!("facepunch-setup-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let model = &MODELS[0];
        let path = model.path_in(&dir);

        assert!(!is_current(model, &path));
        fs::write(&path, b"not a model").unwrap();
        assert!(!is_current(model, &path));

        fs::remove_dir_all(&dir).ok();
    }
}
