//! # Disk Image Module
//!
//! Disk images are reached through two layers.
//!
//! * `BlockStore` is the thin transport: read a run of 512 byte blocks, write a run of blocks, report
//!   the block count, flush.  Real device access lives outside this crate; `dsk_po` and `dot2mg` provide
//!   in-memory stores for flat and 2MG image files.
//! * `Image` is a bounded window over a shared store.  Windows can be nested to any depth, so a
//!   partition inside a partition is just another window.  Windows are addressed in 256 byte sectors,
//!   which lets a window select either half of each block (half-block interleaved volumes).
//!
//! ## Sector Orderings
//!
//! A file system asks for its own kind of address, either a ProDOS block or a DOS (track,sector) pair.
//! The `SectorOrder` attached to an `Image` says how the bytes of the window are laid out, and therefore
//! how each request is mapped onto window sectors.  The skew tables are kept in `bios::skew`.

pub mod dsk_po;
pub mod dot2mg;

use std::rc::Rc;
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use log::{trace,debug,warn,error};
use crate::bios::skew;

pub const BLOCK_SIZE: usize = 512;
pub const SECTOR_SIZE: usize = 256;
/// Number of times a `NotReady` condition is retried before it is surfaced
pub const MAX_RETRIES: usize = 3;

/// Enumerates block layer errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("block address out of range")]
    OutOfRange,
    #[error("short read from block store")]
    ShortRead,
    #[error("block store is write protected")]
    WriteProtected,
    #[error("device not ready")]
    NotReady,
    #[error("image size did not match the request")]
    ImageSizeMismatch,
    #[error("image type not compatible with request")]
    ImageTypeMismatch,
    #[error("error while accessing internal structures")]
    InternalStructureAccess
}

/// Capability required from the block transport.  Blocks are always 512 bytes at this level.
pub trait BlockStore {
    /// Read `count` blocks starting at `start`, result must be exactly `count*512` bytes
    fn read_blocks(&mut self,start: u32,count: u16) -> Result<Vec<u8>,Error>;
    /// Write whole blocks starting at `start`, `dat` is padded to a whole number of blocks
    fn write_blocks(&mut self,start: u32,dat: &[u8]) -> Result<(),Error>;
    fn total_blocks(&self) -> u32;
    fn flush(&mut self) -> Result<(),Error>;
    /// Flattened image file, suitable for saving to the host file system
    fn to_bytes(&self) -> Vec<u8>;
}

pub type SharedStore = Rc<RefCell<Box<dyn BlockStore>>>;

/// Wrap a store so that it can be shared among nested windows
pub fn share(store: Box<dyn BlockStore>) -> SharedStore {
    Rc::new(RefCell::new(store))
}

/// How the bytes of a window are laid out relative to the requests made by file systems.
#[derive(Clone,Copy,PartialEq,Eq,Debug,Hash)]
pub enum SectorOrder {
    /// sequence of ProDOS blocks (PO, HDV, 2MG format 1)
    ProDOS,
    /// sequence of DOS 3.3 logical sectors (DO, DSK, 2MG format 0)
    DOS,
    /// sequence of physical sectors as they pass the head
    Physical
}

impl FromStr for SectorOrder {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "po" | "prodos" => Ok(Self::ProDOS),
            "do" | "dos" | "dsk" => Ok(Self::DOS),
            "physical" => Ok(Self::Physical),
            _ => Err(Error::ImageTypeMismatch)
        }
    }
}

impl fmt::Display for SectorOrder {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProDOS => write!(f,"prodos"),
            Self::DOS => write!(f,"dos"),
            Self::Physical => write!(f,"physical")
        }
    }
}

/// Mapping of a child window's sectors onto its parent's sectors
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Remap {
    /// child sector `k` is parent sector `start+k`
    Linear { start: u64 },
    /// child sector `k` is parent sector `start+2k+phase`, i.e., one half of each parent block
    Interleave { start: u64, phase: u8 }
}

#[derive(Clone,Copy,Debug)]
struct Window {
    remap: Remap,
    sectors: u64
}

impl Window {
    fn to_parent(&self,sec: u64) -> u64 {
        match self.remap {
            Remap::Linear { start } => start + sec,
            Remap::Interleave { start, phase } => start + 2*sec + phase as u64
        }
    }
}

/// A bounded, possibly nested, window over a `BlockStore`.
/// Cloning an `Image` produces another view of the same store.
#[derive(Clone)]
pub struct Image {
    store: SharedStore,
    /// outermost window first
    windows: Vec<Window>,
    ordering: SectorOrder,
    read_only: bool
}

impl Image {
    /// Window covering the whole store
    pub fn new(store: SharedStore,ordering: SectorOrder) -> Self {
        Self {
            store,
            windows: Vec::new(),
            ordering,
            read_only: false
        }
    }
    /// Convenience for wrapping an owned store
    pub fn from_store(store: Box<dyn BlockStore>,ordering: SectorOrder) -> Self {
        Self::new(share(store),ordering)
    }
    pub fn store(&self) -> SharedStore {
        Rc::clone(&self.store)
    }
    pub fn ordering(&self) -> SectorOrder {
        self.ordering
    }
    /// Same window, different interpretation of the layout
    pub fn with_ordering(&self,ordering: SectorOrder) -> Self {
        let mut ans = self.clone();
        ans.ordering = ordering;
        ans
    }
    pub fn set_read_only(&mut self,read_only: bool) {
        self.read_only = read_only;
    }
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
    /// Nesting depth, 0 means the whole store
    pub fn depth(&self) -> usize {
        self.windows.len()
    }
    pub fn total_sectors(&self) -> u64 {
        match self.windows.last() {
            Some(w) => w.sectors,
            None => 2 * self.store.borrow().total_blocks() as u64
        }
    }
    pub fn total_blocks(&self) -> u32 {
        (self.total_sectors() / 2) as u32
    }
    /// Open a child window.  Sector arguments are in this window's address space.
    /// For `Linear` the region is `[start,start+sectors)`, for `Interleave` the region is
    /// `[start,start+2*sectors)` of which the child sees every other sector.
    pub fn sub_image(&self,remap: Remap,sectors: u64) -> Result<Image,Error> {
        let end = match remap {
            Remap::Linear { start } => start + sectors,
            Remap::Interleave { start, phase } => {
                if phase > 1 {
                    error!("interleave phase must be 0 or 1");
                    return Err(Error::InternalStructureAccess);
                }
                start + 2*sectors
            }
        };
        if end > self.total_sectors() || sectors==0 {
            debug!("sub image {:?} with {} sectors exceeds parent of {} sectors",remap,sectors,self.total_sectors());
            return Err(Error::OutOfRange);
        }
        let mut ans = self.clone();
        ans.windows.push(Window { remap, sectors });
        ans.ordering = SectorOrder::ProDOS;
        Ok(ans)
    }
    /// Child window over a contiguous range of blocks
    pub fn sub_blocks(&self,start_block: u32,blocks: u32) -> Result<Image,Error> {
        self.sub_image(Remap::Linear { start: 2*start_block as u64 },2*blocks as u64)
    }
    /// Map a window sector to a store sector
    fn resolve(&self,sec: u64) -> Result<u64,Error> {
        if sec >= self.total_sectors() {
            return Err(Error::OutOfRange);
        }
        let mut ans = sec;
        for w in self.windows.iter().rev() {
            ans = w.to_parent(ans);
        }
        Ok(ans)
    }
    /// If the window is a block aligned linear run, return the store block for `block`
    fn direct_block(&self,block: u32) -> Option<u32> {
        let mut ans = 2 * block as u64;
        for w in self.windows.iter().rev() {
            match w.remap {
                Remap::Linear { start } if start%2==0 => ans += start,
                _ => return None
            }
        }
        Some((ans / 2) as u32)
    }
    fn store_read(&self,block: u32) -> Result<Vec<u8>,Error> {
        let mut tries = 0;
        loop {
            match self.store.borrow_mut().read_blocks(block,1) {
                Ok(buf) if buf.len()==BLOCK_SIZE => return Ok(buf),
                Ok(buf) => {
                    warn!("block {} returned {} bytes",block,buf.len());
                    return Err(Error::ShortRead);
                },
                Err(Error::NotReady) if tries < MAX_RETRIES => {
                    tries += 1;
                    debug!("device not ready, retry {}",tries);
                },
                Err(e) => return Err(e)
            }
        }
    }
    fn store_write(&self,block: u32,dat: &[u8]) -> Result<(),Error> {
        if self.read_only {
            return Err(Error::WriteProtected);
        }
        let mut tries = 0;
        loop {
            match self.store.borrow_mut().write_blocks(block,dat) {
                Err(Error::NotReady) if tries < MAX_RETRIES => {
                    tries += 1;
                    debug!("device not ready, retry {}",tries);
                },
                result => return result
            }
        }
    }
    /// Read a window sector (256 bytes), no ordering is applied
    pub fn read_raw_sector(&self,sec: u64) -> Result<Vec<u8>,Error> {
        let abs = self.resolve(sec)?;
        let buf = self.store_read((abs/2) as u32)?;
        let offset = (abs%2) as usize * SECTOR_SIZE;
        Ok(buf[offset..offset+SECTOR_SIZE].to_vec())
    }
    /// Write a window sector (256 bytes), no ordering is applied.  Short data is zero padded.
    pub fn write_raw_sector(&self,sec: u64,dat: &[u8]) -> Result<(),Error> {
        let abs = self.resolve(sec)?;
        let mut buf = self.store_read((abs/2) as u32)?;
        let offset = (abs%2) as usize * SECTOR_SIZE;
        let n = usize::min(dat.len(),SECTOR_SIZE);
        buf[offset..offset+SECTOR_SIZE].fill(0);
        buf[offset..offset+n].copy_from_slice(&dat[0..n]);
        self.store_write((abs/2) as u32,&buf)
    }
    /// Window sectors holding the two halves of a ProDOS block, taking ordering into account
    fn block_sectors(&self,block: u32) -> Result<[u64;2],Error> {
        let spt = 16;
        match self.ordering {
            SectorOrder::ProDOS => Ok([2*block as u64,2*block as u64+1]),
            SectorOrder::DOS => {
                let [[t1,s1],[t2,s2]] = skew::ts_from_prodos_block(block as usize);
                Ok([(t1*spt+s1) as u64,(t2*spt+s2) as u64])
            },
            SectorOrder::Physical => {
                let [[t1,s1],[t2,s2]] = skew::ts_from_prodos_block(block as usize);
                Ok([
                    (t1*spt+skew::DOS_LSEC_TO_DOS_PSEC[s1]) as u64,
                    (t2*spt+skew::DOS_LSEC_TO_DOS_PSEC[s2]) as u64
                ])
            }
        }
    }
    /// Window sector holding DOS track and logical sector
    fn ts_sector(&self,track: u32,sector: u32,spt: u32) -> Result<u64,Error> {
        if sector >= spt {
            return Err(Error::OutOfRange);
        }
        let (track,sector,spt) = (track as usize,sector as usize,spt as usize);
        match (self.ordering,spt) {
            (SectorOrder::ProDOS,16) => {
                let (block,offset) = skew::prodos_block_from_ts(track,sector);
                Ok((2*block + offset/SECTOR_SIZE) as u64)
            },
            (SectorOrder::Physical,16) => Ok((track*spt + skew::DOS_LSEC_TO_DOS_PSEC[sector]) as u64),
            _ => Ok((track*spt + sector) as u64)
        }
    }
    /// Read a 512 byte ProDOS block
    pub fn read_block(&self,block: u32) -> Result<Vec<u8>,Error> {
        if block >= self.total_blocks() {
            return Err(Error::OutOfRange);
        }
        if self.ordering==SectorOrder::ProDOS {
            if let Some(abs) = self.direct_block(block) {
                trace!("direct read of block {} at store block {}",block,abs);
                return self.store_read(abs);
            }
        }
        let [s1,s2] = self.block_sectors(block)?;
        Ok([self.read_raw_sector(s1)?,self.read_raw_sector(s2)?].concat())
    }
    /// Write a 512 byte ProDOS block, short data is zero padded
    pub fn write_block(&self,block: u32,dat: &[u8]) -> Result<(),Error> {
        if block >= self.total_blocks() {
            return Err(Error::OutOfRange);
        }
        let mut buf = vec![0;BLOCK_SIZE];
        let n = usize::min(dat.len(),BLOCK_SIZE);
        buf[0..n].copy_from_slice(&dat[0..n]);
        if self.ordering==SectorOrder::ProDOS {
            if let Some(abs) = self.direct_block(block) {
                return self.store_write(abs,&buf);
            }
        }
        let [s1,s2] = self.block_sectors(block)?;
        self.write_raw_sector(s1,&buf[0..SECTOR_SIZE])?;
        self.write_raw_sector(s2,&buf[SECTOR_SIZE..])
    }
    /// Read a DOS sector given track, logical sector, and sectors per track
    pub fn read_sector(&self,track: u32,sector: u32,spt: u32) -> Result<Vec<u8>,Error> {
        let sec = self.ts_sector(track,sector,spt)?;
        self.read_raw_sector(sec)
    }
    /// Write a DOS sector given track, logical sector, and sectors per track
    pub fn write_sector(&self,track: u32,sector: u32,spt: u32,dat: &[u8]) -> Result<(),Error> {
        let sec = self.ts_sector(track,sector,spt)?;
        self.write_raw_sector(sec,dat)
    }
    pub fn flush(&self) -> Result<(),Error> {
        self.store.borrow_mut().flush()
    }
    /// Flattened bytes of the whole underlying store (not just this window)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.store.borrow().to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_store(blocks: u32) -> Image {
        let mut store = dsk_po::PO::create(blocks);
        for b in 0..blocks {
            let mut buf = vec![0;BLOCK_SIZE];
            buf[0] = b as u8;
            buf[SECTOR_SIZE] = 0x80 + b as u8;
            store.write_blocks(b,&buf).expect("write failed");
        }
        Image::from_store(Box::new(store),SectorOrder::ProDOS)
    }

    #[test]
    fn nested_linear_windows() {
        let img = numbered_store(64);
        let outer = img.sub_blocks(8,32).expect("window failed");
        let inner = outer.sub_blocks(4,8).expect("window failed");
        assert_eq!(inner.total_blocks(),8);
        assert_eq!(inner.read_block(0).unwrap()[0],12);
        assert_eq!(inner.read_block(7).unwrap()[0],19);
        assert!(inner.read_block(8).is_err());
        assert!(outer.sub_blocks(30,4).is_err());
    }

    #[test]
    fn interleaved_halves() {
        let img = numbered_store(16);
        let first = img.sub_image(Remap::Interleave { start: 0, phase: 0 },16).expect("window failed");
        let second = img.sub_image(Remap::Interleave { start: 0, phase: 1 },16).expect("window failed");
        // block 1 of the first half is made of sector 0 of physical blocks 2 and 3
        let b = first.read_block(1).unwrap();
        assert_eq!((b[0],b[SECTOR_SIZE]),(2,3));
        let b = second.read_block(1).unwrap();
        assert_eq!((b[0],b[SECTOR_SIZE]),(0x82,0x83));
        second.write_block(0,&[0xaa;BLOCK_SIZE]).unwrap();
        assert_eq!(img.read_block(0).unwrap()[0],0);
        assert_eq!(img.read_block(0).unwrap()[SECTOR_SIZE],0xaa);
    }

    #[test]
    fn dos_ordering_maps_blocks() {
        let img = numbered_store(280).with_ordering(SectorOrder::DOS);
        // ProDOS block 2 lives on track 0, DOS sectors 11 and 10
        let b = img.read_block(2).unwrap();
        let expected = img.with_ordering(SectorOrder::ProDOS).read_raw_sector(11).unwrap();
        assert_eq!(b[0..SECTOR_SIZE].to_vec(),expected);
        let expected = img.with_ordering(SectorOrder::ProDOS).read_raw_sector(10).unwrap();
        assert_eq!(b[SECTOR_SIZE..].to_vec(),expected);
    }

    #[test]
    fn read_only_window() {
        let mut img = numbered_store(8);
        img.set_read_only(true);
        match img.write_block(0,&[0;BLOCK_SIZE]) {
            Err(Error::WriteProtected) => {},
            _ => panic!("write should have been refused")
        }
    }
}
