use clap;
use std::io::Read;
use std::str::FromStr;
use log::{debug,error};
use super::{ItemType,CommandError,required};
use crate::fs::{self,Fork,NewFile};
use crate::fs::prodos::types::{parse_file_type,parse_aux_type};
use crate::STDRESULT;

/// Read stdin and write it to a fork or a block of the selected volume.
/// Missing directories along the path are created.  An existing file is rewritten,
/// unless `--unique` is given, in which case a new name is generated.
pub fn put(cmd: &clap::ArgMatches) -> STDRESULT {
    if atty::is(atty::Stream::Stdin) {
        error!("cannot use `put` with console input, please pipe something in");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let dest_path = required(cmd,"file")?;
    let path_to_img = required(cmd,"dimg")?;
    let typ = match cmd.get_one::<String>("type") {
        Some(s) => ItemType::from_str(s)?,
        None => ItemType::Data
    };
    let file_type = match cmd.get_one::<String>("ftype") {
        Some(s) => parse_file_type(s).ok_or(CommandError::OutOfRange)?,
        None => fs::prodos::types::FileType::Binary as u8
    };
    let aux_type = match cmd.get_one::<String>("aux") {
        Some(s) => parse_aux_type(s).ok_or(CommandError::OutOfRange)?,
        None => 0
    };
    let mut file_data = Vec::new();
    std::io::stdin().read_to_end(&mut file_data)?;
    if file_data.len()==0 {
        error!("put did not receive any data from previous node");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let ctx = super::context(cmd);
    let mut vol = super::open(cmd)?;
    let disk = super::driver(&mut vol,cmd)?;
    match typ {
        ItemType::Block => {
            let iblock = super::parse_number::<u32>(dest_path)?;
            disk.put_block(iblock,&file_data)?;
        },
        ItemType::Data | ItemType::Resource => {
            let existing = match ctx.unique_names {
                true => Err(fs::Error::FileNotFound),
                false => disk.find(dest_path)
            };
            let id = match existing {
                Ok(id) => {
                    debug!("rewriting {}",dest_path);
                    id
                },
                Err(fs::Error::FileNotFound) => {
                    let (parent_path,name) = fs::split_path(dest_path);
                    let parent = disk.create_path(&parent_path)?;
                    let attr = match typ {
                        ItemType::Resource => NewFile::forked(file_type,aux_type),
                        _ => NewFile::file(file_type,aux_type)
                    };
                    disk.create_file(parent,&name,&attr)?
                },
                Err(e) => return Err(Box::new(e))
            };
            let fork = match typ {
                ItemType::Resource => Fork::Resource,
                _ => Fork::Data
            };
            let desc = disk.open(id,fork)?;
            let result = disk.write(&desc,&file_data);
            disk.close(desc)?;
            result?;
        }
    }
    crate::save_volume(&vol,path_to_img)
}
