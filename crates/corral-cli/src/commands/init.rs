//! `corral init`: container-side entry point.
//!
//! Re-executed by the launcher inside the new namespaces. Never returns on
//! success: the process image is replaced by the container command.

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if filesystem setup or exec fails; the container
/// then exits with that error's code.
pub fn execute() -> anyhow::Result<u8> {
    match corral_runtime::init::run()? {}
}
