//! ## Support for 2MG disk images
//!
//! This format consists of a header followed by data in either DSK or NIB format.
//! At the end of the data there can be a comment and creator information.
//! Only sector data (DOS or ProDOS ordered) is accepted; nibble data belongs to the
//! track level codec, which is outside this crate.

use binrw::{binrw,BinRead,BinWrite};
use std::io::Cursor;
use log::{debug,info,error};
use super::{BlockStore,Error,SectorOrder,BLOCK_SIZE};
use super::dsk_po::PO;

const HEADER_LEN: u32 = 64;

pub fn file_extensions() -> Vec<String> {
    vec!["2mg".to_string(),"2img".to_string()]
}

// all header entries are LE numbers
#[binrw]
#[brw(little, magic = b"2IMG")]
#[derive(Clone,Debug)]
pub struct Header {
    creator_id: [u8;4],
    header_len: u16,
    version: u16,
    /// 0=DO, 1=PO, 2=nib
    img_fmt: u32,
    /// bits 0-7=volume if bit 8, write protected if bit 31
    flags: u32,
    blocks: u32,
    data_offset: u32,
    data_len: u32,
    comment_offset: u32,
    comment_len: u32,
    creator_offset: u32,
    creator_len: u32,
    pad: [u8;16]
}

/// 2MG wrapper around a flat store
pub struct Dot2mg {
    header: Header,
    raw: PO,
    comment: Vec<u8>,
    creator_info: Vec<u8>
}

fn slice_or_empty(data: &[u8],offset: u32,len: u32) -> Vec<u8> {
    let (beg,end) = (offset as usize,offset as usize + len as usize);
    match offset>0 && len>0 && end<=data.len() {
        true => data[beg..end].to_vec(),
        false => Vec::new()
    }
}

impl Dot2mg {
    pub fn create(blocks: u32,ordering: SectorOrder) -> Self {
        let creator_info = format!("a2vfs v{}",env!("CARGO_PKG_VERSION")).into_bytes();
        let data_len = blocks * BLOCK_SIZE as u32;
        Self {
            header: Header {
                creator_id: *b"A2VF",
                header_len: HEADER_LEN as u16,
                version: 1,
                img_fmt: match ordering { SectorOrder::DOS => 0, _ => 1 },
                flags: 0,
                blocks,
                data_offset: HEADER_LEN,
                data_len,
                comment_offset: 0,
                comment_len: 0,
                creator_offset: HEADER_LEN + data_len,
                creator_len: creator_info.len() as u32,
                pad: [0;16]
            },
            raw: PO::create(blocks),
            comment: Vec::new(),
            creator_info
        }
    }
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = match Header::read(&mut Cursor::new(data)) {
            Ok(h) => h,
            Err(e) => {
                debug!("2MG header not found: {}",e);
                return None;
            }
        };
        if header.img_fmt > 1 {
            info!("2MG nibble data is not supported");
            return None;
        }
        // blocks is only trusted for PO, otherwise use data length
        let data_len = match header.img_fmt {
            1 if header.blocks > 0 => header.blocks as usize * BLOCK_SIZE,
            _ => header.data_len as usize
        };
        let beg = header.data_offset as usize;
        if beg < HEADER_LEN as usize || beg + data_len > data.len() {
            debug!("2MG data segment out of bounds");
            return None;
        }
        let mut raw = PO::from_bytes(&data[beg..beg+data_len])?;
        raw.set_write_protected(header.flags & 0x8000_0000 > 0);
        Some(Self {
            comment: slice_or_empty(data,header.comment_offset,header.comment_len),
            creator_info: slice_or_empty(data,header.creator_offset,header.creator_len),
            header,
            raw
        })
    }
    /// Ordering declared by the header, useful as a probing hint
    pub fn ordering(&self) -> SectorOrder {
        match self.header.img_fmt {
            0 => SectorOrder::DOS,
            _ => SectorOrder::ProDOS
        }
    }
    /// DOS volume number stored in the header, if any
    pub fn volume(&self) -> Option<u8> {
        match self.header.flags & 0x100 {
            0 => None,
            _ => Some((self.header.flags & 0xff) as u8)
        }
    }
    pub fn comment(&self) -> String {
        String::from_utf8_lossy(&self.comment).to_string()
    }
}

impl BlockStore for Dot2mg {
    fn read_blocks(&mut self,start: u32,count: u16) -> Result<Vec<u8>,Error> {
        self.raw.read_blocks(start,count)
    }
    fn write_blocks(&mut self,start: u32,dat: &[u8]) -> Result<(),Error> {
        self.raw.write_blocks(start,dat)
    }
    fn total_blocks(&self) -> u32 {
        self.raw.total_blocks()
    }
    fn flush(&mut self) -> Result<(),Error> {
        self.raw.flush()
    }
    fn to_bytes(&self) -> Vec<u8> {
        let data = self.raw.to_bytes();
        let mut header = self.header.clone();
        header.header_len = HEADER_LEN as u16;
        header.data_offset = HEADER_LEN;
        header.data_len = data.len() as u32;
        let mut offset = HEADER_LEN + data.len() as u32;
        header.comment_offset = match self.comment.len() { 0 => 0, _ => offset };
        header.comment_len = self.comment.len() as u32;
        offset += self.comment.len() as u32;
        header.creator_offset = match self.creator_info.len() { 0 => 0, _ => offset };
        header.creator_len = self.creator_info.len() as u32;
        let mut cursor = Cursor::new(Vec::new());
        if let Err(e) = header.write(&mut cursor) {
            error!("could not serialize 2MG header: {}",e);
            return Vec::new();
        }
        [cursor.into_inner(),data,self.comment.clone(),self.creator_info.clone()].concat()
    }
}

#[test]
fn header_survives_save() {
    let mut img = Dot2mg::create(280,SectorOrder::DOS);
    img.write_blocks(5,&[0xee;512]).expect("write failed");
    let bytes = img.to_bytes();
    assert_eq!(bytes[0..4].to_vec(),b"2IMG".to_vec());
    let mut reloaded = Dot2mg::from_bytes(&bytes).expect("could not reload");
    assert_eq!(reloaded.ordering(),SectorOrder::DOS);
    assert_eq!(reloaded.total_blocks(),280);
    assert_eq!(reloaded.read_blocks(5,1).unwrap()[511],0xee);
}
