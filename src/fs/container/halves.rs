//! ## Halved volumes
//!
//! OzDOS and UNIDOS put two 400K DOS 3.3 volumes (50 tracks of 32 sectors) on an 800K disk.
//! OzDOS gives the first half of every block to volume 1 and the second half to volume 2.
//! UNIDOS simply concatenates the two volumes.  Both halves have to be DOS 3.3 or neither is used.

use log::debug;
use super::Slot;
use crate::img::{self,Remap};
use crate::fs::{Error,Result};
use crate::fs::dos3x;

pub const IMAGE_BLOCKS: u32 = 1600;
pub const HALF_BLOCKS: u32 = 800;

fn ozdos_halves(img: &img::Image) -> Result<[img::Image;2]> {
    let sectors = 2*HALF_BLOCKS as u64;
    Ok([
        img.sub_image(Remap::Interleave { start: 0, phase: 0 },sectors)?,
        img.sub_image(Remap::Interleave { start: 0, phase: 1 },sectors)?
    ])
}

fn unidos_halves(img: &img::Image) -> Result<[img::Image;2]> {
    Ok([img.sub_blocks(0,HALF_BLOCKS)?,img.sub_blocks(HALF_BLOCKS,HALF_BLOCKS)?])
}

fn both_dos(halves: Result<[img::Image;2]>) -> bool {
    match halves {
        Ok([a,b]) => dos3x::Disk::test_img(&a) && dos3x::Disk::test_img(&b),
        Err(_) => false
    }
}

pub fn test_ozdos(img: &img::Image) -> bool {
    if img.total_blocks()!=IMAGE_BLOCKS {
        return false;
    }
    let ans = both_dos(ozdos_halves(img));
    if !ans {
        debug!("OzDOS halves are not both DOS 3.3");
    }
    ans
}

pub fn test_unidos(img: &img::Image) -> bool {
    if img.total_blocks()!=IMAGE_BLOCKS {
        return false;
    }
    let ans = both_dos(unidos_halves(img));
    if !ans {
        debug!("UNIDOS halves are not both DOS 3.3");
    }
    ans
}

pub fn ozdos_slots(img: &img::Image) -> Result<Vec<Slot>> {
    if img.total_blocks()!=IMAGE_BLOCKS {
        return Err(Error::FormatNotFound);
    }
    let [a,b] = ozdos_halves(img)?;
    Ok(vec![
        Slot { img: a, region: Some((0,IMAGE_BLOCKS)), note: None },
        Slot { img: b, region: None, note: None }
    ])
}

pub fn unidos_slots(img: &img::Image) -> Result<Vec<Slot>> {
    if img.total_blocks()!=IMAGE_BLOCKS {
        return Err(Error::FormatNotFound);
    }
    let [a,b] = unidos_halves(img)?;
    Ok(vec![
        Slot { img: a, region: Some((0,HALF_BLOCKS)), note: None },
        Slot { img: b, region: Some((HALF_BLOCKS,HALF_BLOCKS)), note: None }
    ])
}
