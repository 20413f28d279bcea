//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.  Every subcommand that works on an existing image
//! takes `--dimg`, and optionally `--sub` to select a volume nested inside a container.

pub mod mkdsk;
pub mod put;
pub mod get;
pub mod modify;
pub mod stat;
pub mod completions;

use std::str::FromStr;
use log::error;
use regex::Regex;
use crate::fs::{self,DiskFS,Volume};
use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Item type is not yet supported")]
    UnsupportedItemType,
    #[error("Item type is unknown")]
    UnknownItemType,
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("Input source is not supported")]
    UnsupportedFormat,
    #[error("Sub-volume not found")]
    VolumeNotFound,
    #[error("Volume has no file system")]
    NoFileSystem,
    #[error("Allocation audit failed")]
    AuditFailed
}

/// Types of items that can be moved in or out of a disk image
#[derive(PartialEq,Clone,Copy,Debug)]
pub enum ItemType {
    /// data fork of a file
    Data,
    /// resource fork of a file
    Resource,
    /// raw block, the path is the block number
    Block
}

impl FromStr for ItemType {
    type Err = CommandError;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "data" => Ok(Self::Data),
            "rsrc" => Ok(Self::Resource),
            "block" => Ok(Self::Block),
            _ => Err(CommandError::UnknownItemType)
        }
    }
}

/// Get a required argument, clap has already checked it is there
pub fn required<'a>(cmd: &'a clap::ArgMatches,id: &str) -> Result<&'a String,CommandError> {
    match cmd.get_one::<String>(id) {
        Some(s) => Ok(s),
        None => {
            error!("missing argument {}",id);
            Err(CommandError::InvalidCommand)
        }
    }
}

/// Map command line flags onto a context, flags not defined for a subcommand are ignored
pub fn context(cmd: &clap::ArgMatches) -> fs::Context {
    let flag = |id: &str| matches!(cmd.try_get_one::<bool>(id),Ok(Some(true)));
    let mut ctx = fs::Context::default();
    ctx.strict = flag("strict");
    ctx.read_only = flag("read-only");
    ctx.unique_names = flag("unique");
    if let Ok(Some(depth)) = cmd.try_get_one::<usize>("max-depth") {
        ctx.max_depth = *depth;
    }
    ctx
}

/// Parse `--sub`, e.g. `1/0` is the first volume inside the second volume
pub fn sub_path(cmd: &clap::ArgMatches) -> Result<Vec<usize>,CommandError> {
    let mut ans = Vec::new();
    if let Ok(Some(s)) = cmd.try_get_one::<String>("sub") {
        let patt = Regex::new(r"^/?[0-9]+(/[0-9]+)*/?$").map_err(|_| CommandError::InvalidCommand)?;
        if !patt.is_match(s) {
            error!("sub-volume path `{}` should look like `1/0`",s);
            return Err(CommandError::InvalidCommand);
        }
        for node in s.split('/').filter(|n| n.len()>0) {
            match usize::from_str(node) {
                Ok(i) => ans.push(i),
                Err(_) => return Err(CommandError::OutOfRange)
            }
        }
    }
    Ok(ans)
}

/// Open the image named by `--dimg`
pub fn open(cmd: &clap::ArgMatches) -> Result<Volume,DYNERR> {
    let path_to_img = required(cmd,"dimg")?;
    crate::open_volume_from_file(path_to_img,&context(cmd))
}

/// Select the volume named by `--sub`
pub fn select<'a>(vol: &'a mut Volume,cmd: &clap::ArgMatches) -> Result<&'a mut Volume,DYNERR> {
    let path = sub_path(cmd)?;
    match vol.sub_volume_mut(&path) {
        Some(v) => Ok(v),
        None => {
            error!("there is no sub-volume {:?}",path);
            Err(Box::new(CommandError::VolumeNotFound))
        }
    }
}

/// Select the file system of the volume named by `--sub`
pub fn driver<'a>(vol: &'a mut Volume,cmd: &clap::ArgMatches) -> Result<&'a mut Box<dyn DiskFS>,DYNERR> {
    let sel = select(vol,cmd)?;
    let format = sel.format();
    match sel.fs_mut() {
        Some(disk) => Ok(disk),
        None => {
            error!("{} volume has no file system, try `--sub`",format);
            Err(Box::new(CommandError::NoFileSystem))
        }
    }
}

/// Parse a number given in decimal, or hex with `$` or `0x` prefix
pub fn parse_number<T: num_traits::Num>(s: &str) -> Result<T,CommandError> {
    let ans = if let Some(h) = s.strip_prefix('$') {
        T::from_str_radix(h,16)
    } else if let Some(h) = s.strip_prefix("0x") {
        T::from_str_radix(h,16)
    } else {
        T::from_str_radix(s,10)
    };
    ans.map_err(|_| CommandError::OutOfRange)
}

#[test]
fn numbers() {
    assert_eq!(parse_number::<u8>("$FF").unwrap(),255);
    assert_eq!(parse_number::<u16>("0x2000").unwrap(),0x2000);
    assert_eq!(parse_number::<u16>("768").unwrap(),768);
    assert!(parse_number::<u8>("256").is_err());
}
