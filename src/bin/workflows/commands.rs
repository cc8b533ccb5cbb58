use std::process::ExitCode;

use anyhow::{bail, Result};

use super::layout::{explicit_project_root, locate_project_root};
use super::parse::{parse_convert_args, parse_profile, parse_run_args};
use super::release;

pub(crate) fn run_release_command(args: &[String]) -> Result<ExitCode> {
    let run_args = parse_run_args(args)?;
    let project_root = locate_project_root()?;
    release::run_release(&project_root, run_args.profile, run_args.skip_preflight)
}

pub(crate) fn run_convert_command(args: &[String]) -> Result<ExitCode> {
    let (profile, raw_root) = parse_convert_args(args)?;
    let project_root = explicit_project_root(raw_root)?;
    release::convert_in_place(&project_root, profile)
}

pub(crate) fn run_paths_command(args: &[String]) -> Result<ExitCode> {
    let profile = match args {
        [] => parse_profile(None)?,
        [profile] => parse_profile(Some(profile))?,
        _ => bail!("`paths` expects at most one profile argument"),
    };
    let project_root = locate_project_root()?;
    release::print_paths(&project_root, profile)?;
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn run_preflight_command() -> Result<ExitCode> {
    let project_root = locate_project_root()?;
    release::preflight(&project_root)?;
    Ok(ExitCode::SUCCESS)
}
