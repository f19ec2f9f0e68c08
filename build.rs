use std::process::Command;

const UNKNOWN: &str = "unknown";

fn main() {
    let built_at = utc_timestamp().unwrap_or_else(|| UNKNOWN.into());
    let git_sha = run("git", &["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| UNKNOWN.into());

    println!("cargo:rustc-env=BUILD_TIMESTAMP={built_at}");
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}

/// `SOURCE_DATE_EPOCH` pins the stamp for reproducible builds.
fn utc_timestamp() -> Option<String> {
    const FORMAT: &str = "+%Y-%m-%dT%H:%M:%SZ";
    match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) if epoch.trim().parse::<i64>().is_ok() => {
            run("date", &["-u", "-d", &format!("@{}", epoch.trim()), FORMAT])
        }
        _ => run("date", &["-u", FORMAT]),
    }
}

/// Trimmed stdout of a successful command, `None` otherwise.
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
