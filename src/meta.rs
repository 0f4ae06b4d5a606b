/// Version of this runtime, as stamped by the build.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Checks that the tool that generated a recognizer and the runtime it was
/// compiled against agree with this runtime on major.minor.
///
/// Patch and suffix differences are benign and stay silent; a major or
/// minor mismatch prints one warning line per disagreeing component to
/// standard error. Generated recognizers call this once at load time.
pub fn check_version(generating_tool_version: Option<&str>, compile_time_version: &str) {
    for line in version_warnings(generating_tool_version, compile_time_version, RUNTIME_VERSION) {
        eprintln!("{}", line);
    }
}

/// The warnings [check_version] would print, comparison factored out so it
/// is testable against a fixed runtime version.
fn version_warnings(
    generating_tool_version: Option<&str>,
    compile_time_version: &str,
    runtime_version: &str,
) -> Vec<String> {
    let runtime_mm = major_minor(runtime_version);
    let mut warnings = Vec::new();
    if let Some(tool) = generating_tool_version {
        if major_minor(tool) != runtime_mm {
            warnings.push(format!(
                "Tool version {} used for code generation does not match the current runtime version {}",
                tool, runtime_version
            ));
        }
    }
    if major_minor(compile_time_version) != runtime_mm {
        warnings.push(format!(
            "Runtime version {} used for parser compilation does not match the current runtime version {}",
            compile_time_version, runtime_version
        ));
    }
    warnings
}

/// The `major.minor` prefix of a version string; suffixes after the second
/// dot (or after a dash) are ignored.
fn major_minor(version: &str) -> &str {
    let end = version
        .match_indices(['.', '-'])
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(version.len());
    &version[..end]
}
