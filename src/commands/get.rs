use clap;
use std::io::Write;
use std::str::FromStr;
use log::error;
use super::{ItemType,CommandError,required};
use crate::fs::Fork;
use crate::STDRESULT;

/// Read a fork or a block from the selected volume and send it to stdout.
/// A console gets a hex dump, a pipe gets the raw bytes.
pub fn get(cmd: &clap::ArgMatches) -> STDRESULT {
    let src_path = required(cmd,"file")?;
    let typ = match cmd.get_one::<String>("type") {
        Some(s) => ItemType::from_str(s)?,
        None => ItemType::Data
    };
    let mut vol = super::open(cmd)?;
    let disk = super::driver(&mut vol,cmd)?;
    let object = match typ {
        ItemType::Block => {
            let iblock = super::parse_number::<u32>(src_path)?;
            disk.img().read_block(iblock)?
        },
        ItemType::Data | ItemType::Resource => {
            let fork = match typ {
                ItemType::Resource => Fork::Resource,
                _ => Fork::Data
            };
            let id = disk.find(src_path)?;
            if disk.files().get(id).map_or(false,|r| r.is_dir()) {
                error!("{} is a directory",src_path);
                return Err(Box::new(CommandError::UnsupportedItemType));
            }
            let desc = disk.open(id,fork)?;
            let result = disk.read_all(&desc);
            disk.close(desc)?;
            result?
        }
    };
    if atty::is(atty::Stream::Stdout) {
        crate::display_block(0,&object);
    } else {
        std::io::stdout().write_all(&object)?;
    }
    Ok(())
}
