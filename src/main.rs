//! # Command Line Interface
//!
//! Argument definitions are in `cli.rs`, which is shared with `build.rs`.
//! The subcommands themselves are in the `commands` module.

use env_logger;
#[cfg(windows)]
use colored;
use log::error;
use a2vfs::commands;
use a2vfs::commands::CommandError;

mod cli;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    #[cfg(windows)]
    let _ = colored::control::set_virtual_terminal(true);
    let main_cmd = cli::build_cli();
    let matches = main_cmd.clone().get_matches();

    if let Some(cmd) = matches.subcommand_matches("mkdsk") {
        return commands::mkdsk::mkdsk(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("stat") {
        return commands::stat::stat(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("catalog") {
        return commands::stat::catalog(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("tree") {
        return commands::stat::tree(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("audit") {
        return commands::stat::audit(cmd);
    }

    // Modify a disk image

    if let Some(cmd) = matches.subcommand_matches("mkdir") {
        return commands::modify::mkdir(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("delete") {
        return commands::modify::delete(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("lock") {
        return commands::modify::lock(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("unlock") {
        return commands::modify::unlock(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("rename") {
        return commands::modify::rename(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("retype") {
        return commands::modify::retype(cmd);
    }

    // Move data in or out

    if let Some(cmd) = matches.subcommand_matches("put") {
        return commands::put::put(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("get") {
        return commands::get::get(cmd);
    }

    if let Some(cmd) = matches.subcommand_matches("completions") {
        return commands::completions::generate(main_cmd,cmd);
    }

    error!("No subcommand was found, try `a2vfs --help`");
    return Err(Box::new(CommandError::InvalidCommand));
}
