//! ## Equal partitions
//!
//! CFFA cards split a CompactFlash card into 4 or 8 partitions of 65536 blocks, the last
//! of which may be short.  Nothing on the card marks the scheme, so the size has to fit and the
//! first partition has to hold a file system the card could boot.

use log::{debug,trace};
use super::Slot;
use crate::img;
use crate::fs::{Error,Result};
use crate::fs::{prodos,hfs};

pub const CFFA_PARTITION_BLOCKS: u32 = 65536;

/// Number of CFFA partitions implied by the image size, if any
fn cffa_count(total: u32) -> Option<u32> {
    let parts = (total + CFFA_PARTITION_BLOCKS - 1) / CFFA_PARTITION_BLOCKS;
    match parts {
        4 | 8 => Some(parts),
        _ => None
    }
}

pub fn test_cffa(img: &img::Image) -> bool {
    let total = img.total_blocks();
    if cffa_count(total).is_none() {
        trace!("{} blocks is not a CFFA size",total);
        return false;
    }
    let first = match img.sub_blocks(0,CFFA_PARTITION_BLOCKS) {
        Ok(first) => first,
        Err(_) => return false
    };
    if prodos::Disk::test_img(&first) || hfs::Disk::test_img(&first) {
        return true;
    }
    debug!("first CFFA partition is neither ProDOS nor HFS");
    false
}

pub fn cffa_slots(img: &img::Image) -> Result<Vec<Slot>> {
    let total = img.total_blocks();
    let count = cffa_count(total).ok_or(Error::FormatNotFound)?;
    let mut ans = Vec::new();
    for i in 0..count {
        let start = i*CFFA_PARTITION_BLOCKS;
        let len = u32::min(CFFA_PARTITION_BLOCKS,total-start);
        ans.push(Slot::linear(img,start,len)?);
    }
    Ok(ans)
}

/// Split the image into `count` partitions of equal size, any remainder is left to the container.
pub fn equal_slots(img: &img::Image,count: u32) -> Result<Vec<Slot>> {
    if count==0 || img.total_blocks() < count {
        return Err(Error::InvalidBlock);
    }
    let each = img.total_blocks() / count;
    (0..count).map(|i| Slot::linear(img,i*each,each)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,SectorOrder,dsk_po::PO};

    #[test]
    fn cffa_sizes() {
        assert_eq!(cffa_count(4*65536),Some(4));
        assert_eq!(cffa_count(3*65536+1),Some(4));
        assert_eq!(cffa_count(8*65536),Some(8));
        assert_eq!(cffa_count(5*65536),None);
        assert_eq!(cffa_count(1600),None);
    }

    #[test]
    fn equal_split() {
        let img = Image::from_store(Box::new(PO::create(1601)),SectorOrder::ProDOS);
        let slots = equal_slots(&img,4).unwrap();
        assert_eq!(slots.len(),4);
        assert_eq!(slots[3].region,Some((1200,400)));
        assert_eq!(slots[3].img.total_blocks(),400);
    }
}
