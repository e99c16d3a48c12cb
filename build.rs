use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    let build_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    let commit = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", commit);

    let branch =
        git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=GIT_BRANCH={}", branch);

    println!("cargo:rustc-env=GIT_DIRTY={}", worktree_status());

    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

/// Trimmed stdout of a successful git command.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn worktree_status() -> &'static str {
    // Outside a work tree there is nothing to compare against
    if git(&["rev-parse", "--is-inside-work-tree"]).as_deref() != Some("true") {
        return "unknown";
    }
    match Command::new("git")
        .args(["diff", "--quiet", "--ignore-submodules"])
        .status()
    {
        Ok(status) if status.success() => "clean",
        Ok(_) => "dirty",
        Err(_) => "unknown",
    }
}
