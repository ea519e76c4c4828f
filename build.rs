use std::env;
use std::path::Path;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn stamp(name: &str, fallback: impl FnOnce() -> Option<String>) {
    println!("cargo:rerun-if-env-changed={}", name);
    let value = env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(fallback)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env={}={}", name, value);
}

/// Rebuilds when HEAD moves, either to another branch or to a new commit.
fn watch_git_head() {
    let Some(git_dir) = git(&["rev-parse", "--git-dir"]) else {
        return;
    };
    let git_dir = Path::new(&git_dir);
    println!("cargo:rerun-if-changed={}", git_dir.join("HEAD").display());
    if let Some(head_ref) = git(&["symbolic-ref", "-q", "HEAD"]) {
        let ref_path = git_dir.join(head_ref);
        if ref_path.exists() {
            println!("cargo:rerun-if-changed={}", ref_path.display());
        } else {
            println!("cargo:rerun-if-changed={}", git_dir.join("packed-refs").display());
        }
    }
}

fn main() {
    watch_git_head();
    stamp("ADMINUI_BUILD_COMMIT", || git(&["rev-parse", "--short", "HEAD"]));
    stamp("ADMINUI_BUILD_BRANCH", || {
        git(&["rev-parse", "--abbrev-ref", "HEAD"])
    });
    stamp("ADMINUI_BUILD_TIME", || Some(chrono::Utc::now().to_rfc3339()));
}
