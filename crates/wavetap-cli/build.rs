use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Nearest ancestor of `start` holding a `.git` entry, with that entry.
fn find_git_dir(start: &Path) -> Option<(PathBuf, PathBuf)> {
    start.ancestors().find_map(|dir| {
        let git = dir.join(".git");
        git.exists().then(|| (dir.to_path_buf(), git))
    })
}

/// Files whose change moves `HEAD`. Worktrees (`.git` is a file) only track
/// the pointer file itself.
fn watch_head(git: &Path) {
    println!("cargo:rerun-if-changed={}", git.display());
    if !git.is_dir() {
        return;
    }
    let head = git.join("HEAD");
    println!("cargo:rerun-if-changed={}", head.display());
    if let Some(reference) = fs::read_to_string(&head)
        .ok()
        .and_then(|s| s.strip_prefix("ref: ").map(|r| r.trim().to_string()))
    {
        println!("cargo:rerun-if-changed={}", git.join(reference).display());
    }
    println!("cargo:rerun-if-changed={}", git.join("packed-refs").display());
}

fn git_sha(root: &Path) -> Option<String> {
    let out = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let sha = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let git_sha = match find_git_dir(&manifest_dir) {
        Some((root, git)) => {
            watch_head(&git);
            git_sha(&root)
        }
        None => None,
    }
    .unwrap_or_else(|| "unknown".to_string());

    let build_date = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown-date".to_string());

    println!("cargo:rustc-env=GIT_SHA={git_sha}");
    println!("cargo:rustc-env=BUILD_DATE={build_date}");
}
