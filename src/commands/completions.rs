use clap_complete::shells;
use super::{CommandError,required};
use crate::STDRESULT;

pub fn generate(mut main_cmd: clap::Command,cmd: &clap::ArgMatches) -> STDRESULT {
    let out = &mut std::io::stdout();
    match required(cmd,"shell")?.as_str() {
        "bash" => clap_complete::generate(shells::Bash,&mut main_cmd,"a2vfs",out),
        "elv" => clap_complete::generate(shells::Elvish,&mut main_cmd,"a2vfs",out),
        "fish" => clap_complete::generate(shells::Fish,&mut main_cmd,"a2vfs",out),
        "ps1" => clap_complete::generate(shells::PowerShell,&mut main_cmd,"a2vfs",out),
        "zsh" => clap_complete::generate(shells::Zsh,&mut main_cmd,"a2vfs",out),
        _ => return Err(Box::new(CommandError::InvalidCommand))
    }
    Ok(())
}
