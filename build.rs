//! Build metadata
//!
//! Stamps the git revision into the binary as `GIT_HASH`. The startup log
//! in `main` prints it, so a running control plane can always be matched
//! to the exact source it was built from, dirty trees included. Builds
//! outside a git checkout get "unknown".

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    let hash = match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) => {
            // Uncommitted changes are flagged so the startup log never
            // claims a clean build it cannot reproduce.
            let dirty = git(&["status", "--porcelain"])
                .map(|status| !status.is_empty())
                .unwrap_or(false);
            if dirty {
                format!("{hash}-dirty")
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    };

    println!("cargo:rustc-env=GIT_HASH={hash}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
