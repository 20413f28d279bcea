//! ### ProDOS directory structures
//!
//! Directory blocks, headers, and entries are unpacked from byte slices into owned
//! structures, and packed back in place.  Every multi-byte field is little endian.
//!
//! Block   | Contents
//! --------|----------------------
//! 0       | Loader
//! 1       | Loader
//! 2       | Volume Directory Key
//! 3 - n   | Volume Directory
//! n+1 - p | Volume Bitmap

use chrono::{Datelike,Timelike};
use super::types::*;
use super::names;

pub fn pack_time(time: Option<chrono::NaiveDateTime>) -> [u8;4] {
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    let (_is_common_era,year) = now.year_ce();
    let packed_date = (now.day() + (now.month() << 5) + (year%100 << 9)) as u16;
    let packed_time = (now.minute() + (now.hour() << 8)) as u16;
    let bytes_date = u16::to_le_bytes(packed_date);
    let bytes_time = u16::to_le_bytes(packed_time);
    [bytes_date[0],bytes_date[1],bytes_time[0],bytes_time[1]]
}

pub fn unpack_time(prodos_date_time: [u8;4]) -> Option<chrono::NaiveDateTime> {
    let date = u16::from_le_bytes([prodos_date_time[0],prodos_date_time[1]]);
    let time = u16::from_le_bytes([prodos_date_time[2],prodos_date_time[3]]);
    let yearmod100 = date >> 9;
    // earliest plausible stamp is 1979, so two digit years below that are the 2000s
    let year = match yearmod100 < 79 {
        true => 2000 + yearmod100,
        false => 1900 + yearmod100
    };
    let month = (date >> 5) & 15;
    let day = date & 31;
    let hour = (time >> 8) & 255;
    let minute = time & 255;
    match chrono::NaiveDate::from_ymd_opt(year as i32,month as u32,day as u32) {
        Some(date) => date.and_hms_opt(hour as u32,minute as u32,0),
        None => None
    }
}

fn le16(buf: &[u8],offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset],buf[offset+1]])
}

fn put16(buf: &mut [u8],offset: usize,val: u16) {
    buf[offset..offset+2].copy_from_slice(&u16::to_le_bytes(val));
}

fn le24(buf: &[u8],offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset],buf[offset+1],buf[offset+2],0])
}

fn put24(buf: &mut [u8],offset: usize,val: u32) {
    buf[offset..offset+3].copy_from_slice(&u32::to_le_bytes(val)[0..3]);
}

/// Convert stored name bytes to a string, escaping anything that is not printable ASCII
pub fn name_from_bytes(bytes: &[u8]) -> String {
    match bytes.iter().all(|c| *c > 0x20 && *c < 0x7f) {
        true => String::from_utf8_lossy(bytes).to_string(),
        false => crate::escaped_ascii_from_bytes(bytes)
    }
}

/// (prev,next) links at the start of any directory block
pub fn links(buf: &[u8]) -> (u32,u32) {
    (le16(buf,0) as u32,le16(buf,2) as u32)
}

pub fn set_links(buf: &mut [u8],prev: u32,next: u32) {
    put16(buf,0,prev as u16);
    put16(buf,2,next as u16);
}

/// Pointer `idx` of an index or master index block
pub fn index_ptr(buf: &[u8],idx: usize) -> u32 {
    u16::from_le_bytes([buf[idx],buf[idx+256]]) as u32
}

/// put a u16 into an index block in the prescribed fashion
pub fn set_index_ptr(buf: &mut [u8],idx: usize,ptr: u32) {
    let bytes = u16::to_le_bytes(ptr as u16);
    buf[idx] = bytes[0];
    buf[idx+256] = bytes[1];
}

/// Entry locations available in a directory block, the key block gives up its first slot to the header
pub fn entry_locations(iblock: u32,is_key: bool) -> Vec<EntryLocation> {
    let first = match is_key { true => 2, false => 1 };
    (first..=ENTRIES_PER_BLOCK).map(|idx| EntryLocation { block: iblock, idx }).collect()
}

/// Directory entry, 0x27 bytes
#[derive(Clone,Debug,PartialEq)]
pub struct Entry {
    pub storage: u8,
    pub name: Vec<u8>,
    pub file_type: u8,
    pub key_ptr: u16,
    pub blocks_used: u16,
    pub eof: u32,
    pub created: [u8;4],
    /// lower case flags, overlaying version and min version
    pub case_flags: u16,
    pub access: u8,
    pub aux_type: u16,
    pub modified: [u8;4],
    pub header_ptr: u16
}

impl Entry {
    pub fn unpack(buf: &[u8]) -> Self {
        let name_len = usize::min((buf[0] & 0x0f) as usize,MAX_NAME_LEN);
        Self {
            storage: buf[0] >> 4,
            name: buf[1..1+name_len].to_vec(),
            file_type: buf[0x10],
            key_ptr: le16(buf,0x11),
            blocks_used: le16(buf,0x13),
            eof: le24(buf,0x15),
            created: [buf[0x18],buf[0x19],buf[0x1a],buf[0x1b]],
            case_flags: le16(buf,0x1c),
            access: buf[0x1e],
            aux_type: le16(buf,0x1f),
            modified: [buf[0x21],buf[0x22],buf[0x23],buf[0x24]],
            header_ptr: le16(buf,0x25)
        }
    }
    /// Pack into the first 0x27 bytes of `buf`
    pub fn pack(&self,buf: &mut [u8]) {
        buf[0..ENTRY_LEN].fill(0);
        buf[0] = (self.storage << 4) | self.name.len() as u8;
        buf[1..1+self.name.len()].copy_from_slice(&self.name);
        buf[0x10] = self.file_type;
        put16(buf,0x11,self.key_ptr);
        put16(buf,0x13,self.blocks_used);
        put24(buf,0x15,self.eof);
        buf[0x18..0x1c].copy_from_slice(&self.created);
        put16(buf,0x1c,self.case_flags);
        buf[0x1e] = self.access;
        put16(buf,0x1f,self.aux_type);
        buf[0x21..0x25].copy_from_slice(&self.modified);
        put16(buf,0x25,self.header_ptr);
    }
    pub fn is_active(&self) -> bool {
        self.storage > 0
    }
    pub fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_nibs(self.storage << 4)
    }
    /// Name as stored, upper case
    pub fn raw_name(&self) -> String {
        name_from_bytes(&self.name)
    }
    /// Name with lower case flags applied
    pub fn name(&self) -> String {
        names::apply_case(&self.raw_name(),self.case_flags)
    }
    /// Set name from a legal, possibly mixed case, string
    pub fn set_name(&mut self,legal: &str) {
        self.name = names::stored(legal).into_bytes();
        self.case_flags = names::case_flags(legal);
    }
}

/// Directory header, occupies the first entry slot of a key block (offset 4).
/// Volume and subdirectory headers differ only in the last four bytes.
#[derive(Clone,Debug,PartialEq)]
pub struct Header {
    pub storage: u8,
    pub name: Vec<u8>,
    pub pad: [u8;8],
    pub created: [u8;4],
    pub vers: u8,
    pub min_vers: u8,
    pub access: u8,
    pub entry_len: u8,
    pub entries_per_block: u8,
    pub file_count: u16,
    tail: [u8;4]
}

impl Header {
    /// Unpack from a whole key block
    pub fn unpack(buf: &[u8]) -> Self {
        let name_len = usize::min((buf[4] & 0x0f) as usize,MAX_NAME_LEN);
        let mut pad = [0;8];
        pad.copy_from_slice(&buf[0x14..0x1c]);
        Self {
            storage: buf[4] >> 4,
            name: buf[5..5+name_len].to_vec(),
            pad,
            created: [buf[0x1c],buf[0x1d],buf[0x1e],buf[0x1f]],
            vers: buf[0x20],
            min_vers: buf[0x21],
            access: buf[0x22],
            entry_len: buf[0x23],
            entries_per_block: buf[0x24],
            file_count: le16(buf,0x25),
            tail: [buf[0x27],buf[0x28],buf[0x29],buf[0x2a]]
        }
    }
    /// Pack into a whole key block, links are untouched
    pub fn pack(&self,buf: &mut [u8]) {
        buf[4..4+ENTRY_LEN].fill(0);
        buf[4] = (self.storage << 4) | self.name.len() as u8;
        buf[5..5+self.name.len()].copy_from_slice(&self.name);
        buf[0x14..0x1c].copy_from_slice(&self.pad);
        buf[0x1c..0x20].copy_from_slice(&self.created);
        buf[0x20] = self.vers;
        buf[0x21] = self.min_vers;
        buf[0x22] = self.access;
        buf[0x23] = self.entry_len;
        buf[0x24] = self.entries_per_block;
        put16(buf,0x25,self.file_count);
        buf[0x27..0x2b].copy_from_slice(&self.tail);
    }
    pub fn new_volume(legal_name: &str,total_blocks: u32,time: Option<chrono::NaiveDateTime>) -> Self {
        let mut ans = Self {
            storage: StorageType::VolDirHeader as u8,
            name: Vec::new(),
            pad: [0;8],
            created: pack_time(time),
            vers: 0,
            min_vers: 0,
            access: STD_ACCESS,
            entry_len: ENTRY_LEN as u8,
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: 0,
            tail: [0;4]
        };
        ans.set_name(legal_name);
        put16(&mut ans.tail,0,BITMAP_PTR as u16);
        put16(&mut ans.tail,2,total_blocks as u16);
        ans
    }
    pub fn new_subdir(legal_name: &str,parent: &EntryLocation,time: Option<chrono::NaiveDateTime>) -> Self {
        let mut ans = Self {
            storage: StorageType::SubDirHeader as u8,
            name: Vec::new(),
            pad: [0x75,0,0,0,0,0,0,0],
            created: pack_time(time),
            vers: 0,
            min_vers: 0,
            access: STD_ACCESS,
            entry_len: ENTRY_LEN as u8,
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: 0,
            tail: [0,0,parent.idx as u8,ENTRY_LEN as u8]
        };
        ans.set_name(legal_name);
        put16(&mut ans.tail,0,parent.block as u16);
        ans
    }
    pub fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_nibs(self.storage << 4)
    }
    fn is_volume(&self) -> bool {
        self.storage==StorageType::VolDirHeader as u8
    }
    pub fn raw_name(&self) -> String {
        name_from_bytes(&self.name)
    }
    /// Name with lower case flags applied, only the volume header carries them
    pub fn name(&self) -> String {
        match self.is_volume() {
            true => names::apply_case(&self.raw_name(),le16(&self.pad,6)),
            false => self.raw_name()
        }
    }
    pub fn set_name(&mut self,legal: &str) {
        self.name = names::stored(legal).into_bytes();
        if self.is_volume() {
            put16(&mut self.pad,6,names::case_flags(legal));
        }
    }
    pub fn bitmap_ptr(&self) -> u32 {
        le16(&self.tail,0) as u32
    }
    pub fn total_blocks(&self) -> u32 {
        le16(&self.tail,2) as u32
    }
    pub fn parent_ptr(&self) -> u32 {
        le16(&self.tail,0) as u32
    }
    pub fn parent_entry_num(&self) -> usize {
        self.tail[2] as usize
    }
    pub fn parent_entry_len(&self) -> u8 {
        self.tail[3]
    }
    pub fn set_parent(&mut self,loc: &EntryLocation) {
        put16(&mut self.tail,0,loc.block as u16);
        self.tail[2] = loc.idx as u8;
    }
}

/// Fork descriptor inside an extended file's key block, data at 0x00, resource at 0x100
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct ForkEntry {
    pub storage: u8,
    pub key_ptr: u16,
    pub blocks_used: u16,
    pub eof: u32
}

impl ForkEntry {
    pub fn unpack(buf: &[u8],offset: usize) -> Self {
        Self {
            storage: buf[offset] & 0x0f,
            key_ptr: le16(buf,offset+1),
            blocks_used: le16(buf,offset+3),
            eof: le24(buf,offset+5)
        }
    }
    pub fn pack(&self,buf: &mut [u8],offset: usize) {
        buf[offset] = self.storage;
        put16(buf,offset+1,self.key_ptr);
        put16(buf,offset+3,self.blocks_used);
        put24(buf,offset+5,self.eof);
    }
    pub fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_nibs(self.storage << 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_packing() {
        let t = chrono::NaiveDate::from_ymd_opt(2024,3,15).unwrap().and_hms_opt(13,45,0).unwrap();
        assert_eq!(unpack_time(pack_time(Some(t))),Some(t));
        let old = chrono::NaiveDate::from_ymd_opt(1986,9,1).unwrap().and_hms_opt(0,0,0).unwrap();
        assert_eq!(unpack_time(pack_time(Some(old))),Some(old));
        assert_eq!(unpack_time([0;4]),None);
    }

    #[test]
    fn entry_layout() {
        let mut entry = Entry::unpack(&[0;ENTRY_LEN]);
        entry.storage = StorageType::Sapling as u8;
        entry.set_name("My.File.TXT");
        entry.file_type = 0x04;
        entry.key_ptr = 0x123;
        entry.eof = 0x012345;
        entry.aux_type = 0x2000;
        entry.header_ptr = 2;
        let mut buf = vec![0;ENTRY_LEN];
        entry.pack(&mut buf);
        assert_eq!(buf[0],0x2b);
        assert_eq!(&buf[1..12],b"MY.FILE.TXT");
        assert_eq!(buf[0x11..0x13].to_vec(),vec![0x23,0x01]);
        assert_eq!(buf[0x15..0x18].to_vec(),vec![0x45,0x23,0x01]);
        assert_eq!(buf[0x1d] & 0x80,0x80);
        assert_eq!(buf[0x25],2);
        let back = Entry::unpack(&buf);
        assert_eq!(back,entry);
        assert_eq!(back.name(),"My.File.TXT");
        assert_eq!(back.raw_name(),"MY.FILE.TXT");
    }

    #[test]
    fn volume_header_layout() {
        let mut buf = vec![0;BLOCK_SIZE];
        set_links(&mut buf,0,3);
        Header::new_volume("Work",1600,None).pack(&mut buf);
        assert_eq!(buf[4],0xf4);
        assert_eq!(buf[0x23],0x27);
        assert_eq!(buf[0x24],0x0d);
        assert_eq!(buf[0x27],6);
        assert_eq!(u16::from_le_bytes([buf[0x29],buf[0x2a]]),1600);
        let hdr = Header::unpack(&buf);
        assert_eq!(hdr.name(),"Work");
        assert_eq!(hdr.raw_name(),"WORK");
        assert_eq!(links(&buf),(0,3));
    }
}
