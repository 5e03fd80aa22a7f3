use vergen_gix::{BuildBuilder, GixBuilder};

// Exposes VERGEN_BUILD_TIMESTAMP, VERGEN_GIT_SHA and VERGEN_GIT_DESCRIBE to the startup log
fn main() -> Result<(), Box<dyn std::error::Error>> {
    vergen_gix::Emitter::default()
        .add_instructions(&BuildBuilder::all_build()?)?
        .add_instructions(&GixBuilder::all_git()?)?
        .emit()?;
    Ok(())
}
