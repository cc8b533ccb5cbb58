use anyhow::{bail, Result};
use release_pipeline::Profile;

pub(crate) const DEFAULT_PROFILE: Profile = Profile::Release;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunArgs {
    pub(crate) profile: Profile,
    pub(crate) skip_preflight: bool,
}

pub(crate) fn parse_profile(value: Option<&str>) -> Result<Profile> {
    match value {
        None => Ok(DEFAULT_PROFILE),
        Some(raw) => raw.parse(),
    }
}

pub(crate) fn parse_run_args(args: &[String]) -> Result<RunArgs> {
    let mut profile = None;
    let mut skip_preflight = false;
    for arg in args {
        match arg.as_str() {
            "--skip-preflight" => skip_preflight = true,
            flag if flag.starts_with('-') => bail!("unknown flag '{}' for `run`", flag),
            value if profile.is_none() => profile = Some(value.parse()?),
            value => bail!(
                "unexpected argument '{}' for `run`; expected at most one profile",
                value
            ),
        }
    }
    Ok(RunArgs {
        profile: profile.unwrap_or(DEFAULT_PROFILE),
        skip_preflight,
    })
}

pub(crate) fn parse_convert_args(args: &[String]) -> Result<(Profile, &str)> {
    match args {
        [profile, root] => Ok((profile.parse()?, root.as_str())),
        _ => bail!(
            "`convert` expects exactly `<debug|release> <project_root>`, got {} argument(s)",
            args.len()
        ),
    }
}
