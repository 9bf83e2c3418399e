//! Command line of the child invocation.

use harness_types::BuildInfo;

use crate::error::LaunchError;
use crate::options::{LauncherOptions, REMOTE_DEBUG_AGENT};

/// Flag through which the child learns where to write its lifecycle events.
pub const SUBPROCESS_REPORT_FILE_FLAG: &str = "--subprocess-report-file";

/// Build the child's argv, without the trailing report-file flag.
///
/// Layout: `<interpreter> [<debug agent>] -cp <root>/* <entry point> <config>
/// (-n | --log-level VERBOSE --log-level-display VERBOSE) --test-tag <tag>
/// [--build-id <id>] --branch <branch> --build-flavor <flavor> [--apk-path <path>]*`
pub fn build_child_args(
    options: &LauncherOptions,
    build: &BuildInfo,
    config_name: &str,
) -> Result<Vec<String>, LaunchError> {
    let root = build.root_dir().ok_or_else(|| LaunchError::MissingRootDir {
        build_id: build.build_id.clone(),
    })?;

    let mut args = vec![options.interpreter.clone()];
    if options.remote_debug {
        args.push(REMOTE_DEBUG_AGENT.to_string());
    }
    args.push("-cp".to_string());
    args.push(root.join("*").display().to_string());
    args.push(options.entry_point.clone());
    args.push(config_name.to_string());

    if options.use_virtual_device {
        // A child with its own device gets verbose logs.
        args.extend(
            ["--log-level", "VERBOSE", "--log-level-display", "VERBOSE"].map(String::from),
        );
    } else {
        args.push("-n".to_string());
    }

    args.push("--test-tag".to_string());
    args.push(build.test_tag.clone());
    if let Some(build_id) = &options.sub_build_id {
        args.push("--build-id".to_string());
        args.push(build_id.clone());
    }

    let branch = options
        .sub_branch
        .as_ref()
        .or(build.branch.as_ref())
        .ok_or(LaunchError::MissingBranch)?;
    args.push("--branch".to_string());
    args.push(branch.clone());

    let flavor = options
        .sub_build_flavor
        .as_ref()
        .or(build.flavor.as_ref())
        .ok_or(LaunchError::MissingBuildFlavor)?;
    args.push("--build-flavor".to_string());
    args.push(flavor.clone());

    for apk in &options.sub_apk_paths {
        args.push("--apk-path".to_string());
        args.push(root.join(apk).display().to_string());
    }
    Ok(args)
}
