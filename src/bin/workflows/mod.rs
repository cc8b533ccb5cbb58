mod commands;
mod layout;
mod parse;
mod release;

pub(crate) use commands::{
    run_convert_command, run_paths_command, run_preflight_command, run_release_command,
};
