//! ## MicroDrive
//!
//! The partition table lives in block 0.  There are two banks of up to 8 partitions,
//! each with a start and length as LE32.  The high byte of a length is reserved for drive
//! select flags, so only the low 24 bits count.

use log::{debug,warn};
use super::Slot;
use crate::img;
use crate::fs::Result;

pub const MAGIC: u16 = 0xccca;
const NUM_PART1: usize = 0x0c;
const NUM_PART2: usize = 0x0d;
const START1: usize = 0x20;
const LEN1: usize = 0x40;
const START2: usize = 0x80;
const LEN2: usize = 0xa0;
const MAX_PARTITIONS: usize = 8;

fn le32(buf: &[u8],offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset],buf[offset+1],buf[offset+2],buf[offset+3]])
}

/// (start,length) for every table row, lengths masked
fn table(buf: &[u8]) -> Vec<(u32,u32)> {
    let mut ans = Vec::new();
    let banks = [(buf[NUM_PART1] as usize,START1,LEN1),(buf[NUM_PART2] as usize,START2,LEN2)];
    for (count,starts,lens) in banks {
        for i in 0..usize::min(count,MAX_PARTITIONS) {
            ans.push((le32(buf,starts+4*i),le32(buf,lens+4*i) & 0xffffff));
        }
    }
    ans
}

pub fn test_img(img: &img::Image) -> bool {
    let buf = match img.read_block(0) {
        Ok(buf) => buf,
        Err(_) => return false
    };
    if u16::from_le_bytes([buf[0],buf[1]])!=MAGIC {
        return false;
    }
    let rows = table(&buf);
    if buf[NUM_PART1] as usize > MAX_PARTITIONS || buf[NUM_PART2] as usize > MAX_PARTITIONS || rows.len()==0 {
        debug!("MicroDrive partition counts {} and {}",buf[NUM_PART1],buf[NUM_PART2]);
        return false;
    }
    if rows.iter().any(|(start,_)| *start==0 || *start >= img.total_blocks()) {
        debug!("MicroDrive partition starts outside the image");
        return false;
    }
    true
}

/// Partitions running past the end are clamped to the remaining blocks and noted
pub fn slots(img: &img::Image) -> Result<Vec<Slot>> {
    let buf = img.read_block(0)?;
    let total = img.total_blocks();
    let mut ans = Vec::new();
    for (start,len) in table(&buf) {
        if start >= total || len==0 {
            debug!("skipping empty MicroDrive row at {}",start);
            continue;
        }
        let mut slot = Slot::linear(img,start,u32::min(len,total-start))?;
        if len > total-start {
            let note = format!("partition at {} clamped from {} to {} blocks",start,len,total-start);
            warn!("{}",note);
            slot.note = Some(note);
        }
        ans.push(slot);
    }
    Ok(ans)
}

/// Build a block 0 table, used to create test images
pub fn table_block(bank1: &[(u32,u32)],bank2: &[(u32,u32)]) -> Vec<u8> {
    let mut ans = vec![0;img::BLOCK_SIZE];
    ans[0..2].copy_from_slice(&u16::to_le_bytes(MAGIC));
    ans[NUM_PART1] = bank1.len() as u8;
    ans[NUM_PART2] = bank2.len() as u8;
    for (bank,starts,lens) in [(bank1,START1,LEN1),(bank2,START2,LEN2)] {
        for (i,(start,len)) in bank.iter().take(MAX_PARTITIONS).enumerate() {
            ans[starts+4*i..starts+4*i+4].copy_from_slice(&u32::to_le_bytes(*start));
            ans[lens+4*i..lens+4*i+4].copy_from_slice(&u32::to_le_bytes(*len));
        }
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,SectorOrder,dsk_po::PO};

    #[test]
    fn length_mask_and_clamp() {
        let img = Image::from_store(Box::new(PO::create(1000)),SectorOrder::ProDOS);
        // drive select flags in the high byte are ignored, second row runs past the end
        img.write_block(0,&table_block(&[(1,0x8000_0190)],&[(401,800)])).unwrap();
        assert!(test_img(&img));
        let slots = slots(&img).unwrap();
        assert_eq!(slots.len(),2);
        assert_eq!(slots[0].region,Some((1,400)));
        assert_eq!(slots[1].region,Some((401,599)));
        assert!(slots[1].note.is_some());
    }

    #[test]
    fn needs_magic() {
        let img = Image::from_store(Box::new(PO::create(1000)),SectorOrder::ProDOS);
        let mut buf = table_block(&[(1,400)],&[]);
        buf[1] = 0;
        img.write_block(0,&buf).unwrap();
        assert!(!test_img(&img));
    }
}
