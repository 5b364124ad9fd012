use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

/// Git variables read from the environment when the build runs outside a
/// checkout (container builds, source tarballs), with their fallbacks.
const GIT_FALLBACKS: [(&str, &str); 4] = [
    ("VERGEN_GIT_SHA", "unknown"),
    ("VERGEN_GIT_BRANCH", "unknown"),
    ("VERGEN_GIT_COMMIT_TIMESTAMP", "unknown"),
    ("VERGEN_GIT_DIRTY", "false"),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&BuildBuilder::all_build()?)?
        .add_instructions(&CargoBuilder::all_cargo()?)?
        .add_instructions(&RustcBuilder::all_rustc()?)?;

    match GitclBuilder::all_git() {
        Ok(git) => {
            emitter.add_instructions(&git)?;
        }
        Err(_) => {
            for (name, fallback) in GIT_FALLBACKS {
                let value = std::env::var(name).unwrap_or_else(|_| fallback.to_string());
                println!("cargo::rustc-env={name}={value}");
            }
        }
    }

    emitter.emit()?;
    Ok(())
}
