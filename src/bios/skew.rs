//! ## Sector Skewing Module
//!
//! Non-trivial transformations between ProDOS blocks and DOS sectors.
//! Kept apart from file systems and images so that either can use the same tables.

/// Translate DOS 3.3 logical sector to physical sector
pub const DOS_LSEC_TO_DOS_PSEC: [usize;16] = [0,13,11,9,7,5,3,1,14,12,10,8,6,4,2,15];
/// Translate DOS 3.3 physical sector to logical sector
pub const DOS_PSEC_TO_DOS_LSEC: [usize;16] = [0,7,14,6,13,5,12,4,11,3,10,2,9,1,8,15];

const BLOCK_TO_SECTOR1: [usize;8] = [0,13,11,9,7,5,3,1];
const BLOCK_TO_SECTOR2: [usize;8] = [14,12,10,8,6,4,2,15];

/// Get block number and byte offset into block corresponding to
/// track and logical sector of a 16 sector disk.  Returned in tuple (block,offset)
pub fn prodos_block_from_ts(track: usize,sector: usize) -> (usize,usize) {
    let block_offset: [usize;16] = [0,7,6,6,5,5,4,4,3,3,2,2,1,1,0,7];
    let byte_offset: [usize;16] = [0,0,256,0,256,0,256,0,256,0,256,0,256,0,256,256];
    (8*track + block_offset[sector%16], byte_offset[sector%16])
}

/// Get the two track and logical sector pairs holding a block on a 16 sector disk, in order
pub fn ts_from_prodos_block(block: usize) -> [[usize;2];2] {
    [[block/8,BLOCK_TO_SECTOR1[block%8]],[block/8,BLOCK_TO_SECTOR2[block%8]]]
}

#[test]
fn block_ts_inverse() {
    for block in 0..280 {
        let [[t1,s1],[t2,s2]] = ts_from_prodos_block(block);
        assert_eq!(prodos_block_from_ts(t1,s1),(block,0));
        assert_eq!(prodos_block_from_ts(t2,s2),(block,256));
    }
    for lsec in 0..16 {
        assert_eq!(DOS_PSEC_TO_DOS_LSEC[DOS_LSEC_TO_DOS_PSEC[lsec]],lsec);
    }
}
