use clap;
use log::error;
use super::{CommandError,required};
use crate::fs::{self,DiskFS};
use crate::fs::prodos::types::{STD_ACCESS,LOCKED_ACCESS,parse_file_type,parse_aux_type};
use crate::STDRESULT;

/// Open the image, run `f` against the selected file system, and save if it succeeds
fn modify(cmd: &clap::ArgMatches,f: impl FnOnce(&mut Box<dyn DiskFS>,&str) -> STDRESULT) -> STDRESULT {
    let path_to_img = required(cmd,"dimg")?;
    let path_in_img = required(cmd,"file")?;
    let mut vol = super::open(cmd)?;
    let disk = super::driver(&mut vol,cmd)?;
    f(disk,path_in_img)?;
    crate::save_volume(&vol,path_to_img)
}

pub fn mkdir(cmd: &clap::ArgMatches) -> STDRESULT {
    modify(cmd,|disk,path| {
        if disk.find(path).is_ok() {
            error!("{} already exists",path);
            return Err(Box::new(fs::Error::DirectoryExists));
        }
        disk.create_path(path)?;
        Ok(())
    })
}

pub fn delete(cmd: &clap::ArgMatches) -> STDRESULT {
    modify(cmd,|disk,path| {
        let id = disk.find(path)?;
        Ok(disk.delete_file(id)?)
    })
}

pub fn rename(cmd: &clap::ArgMatches) -> STDRESULT {
    let name = required(cmd,"name")?;
    modify(cmd,|disk,path| {
        let id = disk.find(path)?;
        Ok(disk.rename_file(id,name)?)
    })
}

pub fn lock(cmd: &clap::ArgMatches) -> STDRESULT {
    modify(cmd,|disk,path| {
        let id = disk.find(path)?;
        Ok(disk.set_access(id,LOCKED_ACCESS)?)
    })
}

pub fn unlock(cmd: &clap::ArgMatches) -> STDRESULT {
    modify(cmd,|disk,path| {
        let id = disk.find(path)?;
        Ok(disk.set_access(id,STD_ACCESS)?)
    })
}

pub fn retype(cmd: &clap::ArgMatches) -> STDRESULT {
    let typ = parse_file_type(required(cmd,"type")?).ok_or(CommandError::OutOfRange)?;
    let aux = parse_aux_type(required(cmd,"aux")?).ok_or(CommandError::OutOfRange)?;
    modify(cmd,|disk,path| {
        let id = disk.find(path)?;
        Ok(disk.retype(id,typ,aux)?)
    })
}
