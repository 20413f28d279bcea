use clap;
use std::io::Write;
use std::str::FromStr;
use log::{info,error};
use crate::fs::{self,DiskFS,dos3x,prodos};
use crate::img::{self,BlockStore,SectorOrder};
use super::{CommandError,required};
use crate::STDRESULT;

/// Blocks for each kind of disk
fn blocks_for_kind(kind: &str) -> Result<u32,CommandError> {
    match kind {
        "5.25in" => Ok(280),
        "5.25in-40" => Ok(320),
        "3.5in" => Ok(1600),
        "hdmax" => Ok(65535),
        _ => Err(CommandError::OutOfRange)
    }
}

fn mkstore(img_typ: &str,blocks: u32) -> Result<(Box<dyn BlockStore>,SectorOrder),CommandError> {
    match img_typ {
        "po" => Ok((Box::new(img::dsk_po::PO::create(blocks)),SectorOrder::ProDOS)),
        "do" => Ok((Box::new(img::dsk_po::PO::create(blocks)),SectorOrder::DOS)),
        "2mg" => Ok((Box::new(img::dot2mg::Dot2mg::create(blocks,SectorOrder::ProDOS)),SectorOrder::ProDOS)),
        _ => Err(CommandError::UnsupportedFormat)
    }
}

fn mkdos33(vol: &str,img: img::Image,ctx: &fs::Context) -> Result<Vec<u8>,Box<dyn std::error::Error>> {
    let tracks = match img.total_blocks() {
        280 => 35,
        320 => 40,
        _ => {
            error!("DOS 3.3 only supports 5.25 inch disks");
            return Err(Box::new(CommandError::OutOfRange));
        }
    };
    if img.ordering()!=SectorOrder::DOS {
        error!("ProDOS ordered DOS is refused, use a `do` image");
        return Err(Box::new(CommandError::UnsupportedFormat));
    }
    let v = match u8::from_str(vol) {
        Ok(v) if v>=1 && v<=254 => v,
        _ => {
            error!("volume must be from 1 to 254");
            return Err(Box::new(CommandError::OutOfRange));
        }
    };
    let mut disk = dos3x::Disk::from_img(img,ctx);
    disk.format(v,tracks,16)?;
    Ok(disk.img().to_bytes())
}

fn mkprodos(vol: &str,img: img::Image,ctx: &fs::Context) -> Result<Vec<u8>,Box<dyn std::error::Error>> {
    let mut disk = prodos::Disk::from_img(img,ctx);
    disk.format(vol,Some(chrono::Local::now().naive_local()))?;
    Ok(disk.img().to_bytes())
}

pub fn mkdsk(cmd: &clap::ArgMatches) -> STDRESULT {
    let which_fs = required(cmd,"os")?;
    let img_typ = required(cmd,"type")?;
    let kind = required(cmd,"kind")?;
    let path_to_img = required(cmd,"dimg")?;
    let default_vol = match which_fs.as_str() {
        "dos33" => "254".to_string(),
        _ => "NEW.DISK".to_string()
    };
    let vol = cmd.get_one::<String>("volume").unwrap_or(&default_vol);
    if std::path::Path::new(path_to_img).exists() {
        error!("refusing to overwrite {}",path_to_img);
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let blocks = blocks_for_kind(kind)?;
    let (store,ordering) = mkstore(img_typ,blocks)?;
    let img = img::Image::from_store(store,ordering);
    let ctx = super::context(cmd);
    info!("creating {} image of {} blocks",which_fs,blocks);
    let buf = match which_fs.as_str() {
        "dos33" => mkdos33(vol,img,&ctx)?,
        "prodos" => mkprodos(vol,img,&ctx)?,
        _ => return Err(Box::new(CommandError::UnsupportedFormat))
    };
    let mut file = std::fs::File::create(path_to_img)?;
    file.write_all(&buf)?;
    Ok(())
}
