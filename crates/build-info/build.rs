use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

use chrono::Utc;

fn main() {
    println!("cargo:rerun-if-env-changed=GENRELAY_BUILD_ID_OVERRIDE");
    if let Some(path) = git_ref_path() {
        println!("cargo:rerun-if-changed={}", path);
    }

    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let revision = git_revision().unwrap_or_else(|| "unknown".to_string());
    let build_id = env::var("GENRELAY_BUILD_ID_OVERRIDE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("{} | {}", build_time, revision));

    println!("cargo:rustc-env=GENRELAY_BUILD_ID={}", build_id);
    println!("cargo:rustc-env=GENRELAY_BUILD_TIME={}", build_time);
    println!("cargo:rustc-env=GENRELAY_BUILD_GIT={}", revision);
}

/// The ref file HEAD points at, so a new commit retriggers the script.
fn git_ref_path() -> Option<String> {
    let head = Path::new(".git/HEAD");
    let contents = fs::read_to_string(head).ok()?;
    let resolved = contents
        .strip_prefix("ref: ")
        .map(|reference| format!(".git/{}", reference.trim()))
        .filter(|path| Path::new(path).exists());
    Some(resolved.unwrap_or_else(|| head.display().to_string()))
}

fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--dirty", "--always"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let label = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!label.is_empty()).then_some(label)
}
