use binrw::{binrw,BinRead,BinWrite};
use std::io::Cursor;
use crate::fs::{Error,Result};

pub const VTOC_TRACK: u32 = 17;
pub const SECTOR_SIZE: usize = 256;
pub const MAX_TRACKS: u8 = 50;
pub const MAX_PAIRS: u8 = 0x7a;
pub const MAX_DIRECTORY_REPS: usize = 100;
pub const MAX_TSLIST_REPS: usize = 1000;
pub const ENTRIES_PER_SECTOR: usize = 7;
pub const ENTRY_LEN: usize = 35;
/// first entry of a catalog sector
pub const ENTRY_OFFSET: usize = 0x0b;
/// first pair of a track/sector list
pub const PAIRS_OFFSET: usize = 0x0c;
/// tsl track of a deleted entry
pub const DELETED: u8 = 0xff;
pub const LOCKED: u8 = 0x80;

/// Map file type codes to strings for display, the high bit is the lock
pub const TYPE_MAP_DISP: [(u8,&str);8] = [
    (0x00," T"),
    (0x01," I"),
    (0x02," A"),
    (0x04," B"),
    (0x80,"*T"),
    (0x81,"*I"),
    (0x82,"*A"),
    (0x84,"*B")
];

/// Volume table of contents, track 17 sector 0.  All multi-byte fields are LE, except the
/// bitmap, which is 4 bytes per track, big endian.
#[binrw]
#[brw(little)]
#[derive(Clone,Debug)]
pub struct VTOC {
    pub pad1: u8,
    pub track1: u8,
    pub sector1: u8,
    pub version: u8,
    pad2: [u8;2],
    pub vol: u8,
    pad3: [u8;32],
    pub max_pairs: u8,
    pad4: [u8;8],
    pub last_track: u8,
    pub last_direction: u8,
    pad5: [u8;2],
    pub tracks: u8,
    pub sectors: u8,
    pub bytes: u16,
    pub bitmap: [u8;200]
}

impl VTOC {
    pub fn new(vol: u8,tracks: u8,sectors: u8) -> Self {
        Self {
            pad1: 4,
            track1: VTOC_TRACK as u8,
            sector1: sectors-1,
            version: 3,
            pad2: [0;2],
            vol,
            pad3: [0;32],
            max_pairs: MAX_PAIRS,
            pad4: [0;8],
            last_track: VTOC_TRACK as u8,
            last_direction: 1,
            pad5: [0;2],
            tracks,
            sectors,
            bytes: SECTOR_SIZE as u16,
            bitmap: [0;200]
        }
    }
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        Self::read(&mut Cursor::new(buf)).map_err(|_| Error::BadDirectory)
    }
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut ans = Cursor::new(Vec::new());
        match self.write(&mut ans) {
            Ok(()) => Ok(ans.into_inner()),
            Err(_) => Err(crate::fs::internal("VTOC could not be packed"))
        }
    }
    fn track_map(&self,track: u8) -> u32 {
        let i = track as usize*4;
        u32::from_be_bytes([self.bitmap[i],self.bitmap[i+1],self.bitmap[i+2],self.bitmap[i+3]])
    }
    /// Free bit for a sector, the top `sectors` bits of each track map are used
    pub fn is_free(&self,track: u8,sector: u8) -> bool {
        let eff = (sector as u32 + 32 - self.sectors as u32) % 32;
        self.track_map(track) & (1 << eff) > 0
    }
    pub fn set_free(&mut self,track: u8,sector: u8,free: bool) {
        let eff = (sector as u32 + 32 - self.sectors as u32) % 32;
        let map = match free {
            true => self.track_map(track) | (1 << eff),
            false => self.track_map(track) & !(1 << eff)
        };
        let i = track as usize*4;
        self.bitmap[i..i+4].copy_from_slice(&u32::to_be_bytes(map));
    }
}

/// One slot of a catalog sector
#[derive(Clone,Debug)]
pub struct DirectoryEntry {
    pub tsl_track: u8,
    pub tsl_sector: u8,
    pub file_type: u8,
    /// negative ASCII padded with spaces
    pub name: [u8;30],
    pub sectors: u16
}

impl DirectoryEntry {
    pub fn unpack(buf: &[u8]) -> Self {
        let mut name = [0;30];
        name.copy_from_slice(&buf[3..33]);
        Self {
            tsl_track: buf[0],
            tsl_sector: buf[1],
            file_type: buf[2],
            name,
            sectors: u16::from_le_bytes([buf[33],buf[34]])
        }
    }
    pub fn pack(&self,buf: &mut [u8]) {
        buf[0] = self.tsl_track;
        buf[1] = self.tsl_sector;
        buf[2] = self.file_type;
        buf[3..33].copy_from_slice(&self.name);
        buf[33..35].copy_from_slice(&u16::to_le_bytes(self.sectors));
    }
    /// Slot holds a file, i.e., neither never used nor deleted
    pub fn is_active(&self) -> bool {
        self.tsl_track>0 && self.tsl_track!=DELETED
    }
    pub fn is_locked(&self) -> bool {
        self.file_type & LOCKED > 0
    }
    /// Name with the high bits stripped and trailing spaces removed
    pub fn name(&self) -> String {
        let stripped: Vec<u8> = self.name.iter().map(|c| c & 0x7f).collect();
        crate::escaped_ascii_from_bytes(&stripped).trim_end().to_string()
    }
}

/// Catalog sector: a link to the next catalog sector followed by 7 entries
pub struct DirectorySector {
    pub next_track: u8,
    pub next_sector: u8,
    pub entries: Vec<DirectoryEntry>
}

impl DirectorySector {
    pub fn unpack(buf: &[u8]) -> Self {
        Self {
            next_track: buf[1],
            next_sector: buf[2],
            entries: (0..ENTRIES_PER_SECTOR).map(|i| {
                let beg = ENTRY_OFFSET + i*ENTRY_LEN;
                DirectoryEntry::unpack(&buf[beg..beg+ENTRY_LEN])
            }).collect()
        }
    }
    pub fn pack(&self) -> Vec<u8> {
        let mut ans = vec![0;SECTOR_SIZE];
        ans[1] = self.next_track;
        ans[2] = self.next_sector;
        for (i,entry) in self.entries.iter().enumerate() {
            let beg = ENTRY_OFFSET + i*ENTRY_LEN;
            entry.pack(&mut ans[beg..beg+ENTRY_LEN]);
        }
        ans
    }
}

/// Track/sector list sector
pub struct TrackSectorList {
    pub next_track: u8,
    pub next_sector: u8,
    pub sector_base: u16,
    pub pairs: Vec<[u8;2]>
}

impl TrackSectorList {
    pub fn unpack(buf: &[u8],max_pairs: u8) -> Self {
        let count = usize::min(max_pairs as usize,(SECTOR_SIZE-PAIRS_OFFSET)/2);
        Self {
            next_track: buf[1],
            next_sector: buf[2],
            sector_base: u16::from_le_bytes([buf[5],buf[6]]),
            pairs: (0..count).map(|p| [buf[PAIRS_OFFSET+2*p],buf[PAIRS_OFFSET+2*p+1]]).collect()
        }
    }
}

#[test]
fn vtoc_layout() {
    let mut vtoc = VTOC::new(254,35,16);
    vtoc.set_free(18,15,true);
    vtoc.set_free(18,0,true);
    let buf = vtoc.pack().unwrap();
    assert_eq!(buf.len(),SECTOR_SIZE);
    assert_eq!((buf[1],buf[2],buf[3],buf[6]),(17,15,3,254));
    assert_eq!((buf[0x27],buf[0x34],buf[0x35],buf[0x37]),(0x7a,35,16,1));
    // sector 15 is the top bit, sector 0 is bit 16
    assert_eq!(buf[0x38+18*4..0x38+18*4+4].to_vec(),vec![0x80,0x01,0,0]);
    let again = VTOC::unpack(&buf).unwrap();
    assert!(again.is_free(18,15) && again.is_free(18,0) && !again.is_free(18,1));
}
