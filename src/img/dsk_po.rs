//! ## Support for flat disk images (PO, DO, DSK, HDV)
//!
//! These are a simple sequential dump of the already-decoded sector data.
//! Whether the sequence is ProDOS ordered or DOS ordered cannot be verified here,
//! that is decided by probing at the file system layer.

use log::{debug,error};
use super::{BlockStore,Error,BLOCK_SIZE};

pub const MAX_BLOCKS: u32 = 8*65536;

pub fn file_extensions() -> Vec<String> {
    vec!["po".to_string(),"do".to_string(),"dsk".to_string(),"hdv".to_string(),"img".to_string()]
}

/// In-memory flat block store
pub struct PO {
    blocks: u32,
    write_protected: bool,
    data: Vec<u8>
}

impl PO {
    /// Create a zeroed store
    pub fn create(blocks: u32) -> Self {
        Self {
            blocks,
            write_protected: false,
            data: vec![0;blocks as usize*BLOCK_SIZE]
        }
    }
    /// Wrap a flat image, must be a whole number of blocks
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len()==0 || data.len()%BLOCK_SIZE > 0 || data.len()/BLOCK_SIZE > MAX_BLOCKS as usize {
            debug!("flat image size {} is not plausible",data.len());
            return None;
        }
        Some(Self {
            blocks: (data.len()/BLOCK_SIZE) as u32,
            write_protected: false,
            data: data.to_vec()
        })
    }
    pub fn set_write_protected(&mut self,wp: bool) {
        self.write_protected = wp;
    }
}

impl BlockStore for PO {
    fn read_blocks(&mut self,start: u32,count: u16) -> Result<Vec<u8>,Error> {
        let end = start as usize + count as usize;
        if end > self.blocks as usize {
            debug!("read of blocks {}..{} beyond end {}",start,end,self.blocks);
            return Err(Error::OutOfRange);
        }
        Ok(self.data[start as usize*BLOCK_SIZE..end*BLOCK_SIZE].to_vec())
    }
    fn write_blocks(&mut self,start: u32,dat: &[u8]) -> Result<(),Error> {
        if self.write_protected {
            error!("attempt to write a protected image");
            return Err(Error::WriteProtected);
        }
        let count = (dat.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let end = start as usize + count;
        if end > self.blocks as usize {
            debug!("write of blocks {}..{} beyond end {}",start,end,self.blocks);
            return Err(Error::OutOfRange);
        }
        let beg = start as usize*BLOCK_SIZE;
        self.data[beg..end*BLOCK_SIZE].fill(0);
        self.data[beg..beg+dat.len()].copy_from_slice(dat);
        Ok(())
    }
    fn total_blocks(&self) -> u32 {
        self.blocks
    }
    fn flush(&mut self) -> Result<(),Error> {
        Ok(())
    }
    fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }
}

#[test]
fn bounds_and_protection() {
    let mut store = PO::create(4);
    assert!(store.read_blocks(3,2).is_err());
    store.write_blocks(3,&[1,2,3]).expect("write failed");
    assert_eq!(store.read_blocks(3,1).unwrap()[0..4].to_vec(),vec![1,2,3,0]);
    store.set_write_protected(true);
    assert!(store.write_blocks(0,&[0;512]).is_err());
    assert!(PO::from_bytes(&vec![0;700]).is_none());
}
