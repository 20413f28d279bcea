//! # DOS 3.3 file system module
//! This reads disk images containing one DOS 3.3 volume, with 16 or 32 sectors
//! per track and up to 50 tracks.
//!
//! * The catalog is scanned into an `OrderedFileList` with a single level
//! * The usage map is synthesized from the VTOC, catalog, track/sector lists, and data sectors,
//!   then audited against the VTOC bitmap
//! * Files can be read, the volume can be formatted, other mutations are not supported

pub mod types;

use std::collections::{HashMap,HashSet};
use log::{trace,debug,info,warn};
use types::*;
use crate::img;
use crate::fs::{self,Context,Descriptor,DiskFS,Error,FileId,FileRecord,Fork,OrderedFileList,Quality,Result,Stat,StorageKind};
use crate::fs::{AllocationMap,Purpose};
use crate::fs::prodos::types::{STD_ACCESS,LOCKED_ACCESS};

pub const FS_NAME: &str = "dos33";

/// The primary interface for disk operations.
pub struct Disk {
    img: img::Image,
    ctx: Context,
    vtoc: VTOC,
    map: AllocationMap,
    files: OrderedFileList,
    root: FileId,
    open_files: Vec<Descriptor>
}

impl Disk {
    /// Use the given image window as storage, call `initialize` or `format` before anything else.
    pub fn from_img(img: img::Image,ctx: &Context) -> Self {
        Self {
            img,
            ctx: ctx.clone(),
            vtoc: VTOC::new(254,35,16),
            map: AllocationMap::new(0,SECTOR_SIZE),
            files: OrderedFileList::new(),
            root: 0,
            open_files: Vec::new()
        }
    }
    /// Read the VTOC, trying each sector count the module handles
    fn find_vtoc(img: &img::Image) -> Option<VTOC> {
        for spt in [16,32] {
            let buf = match img.read_sector(VTOC_TRACK,0,spt) {
                Ok(buf) => buf,
                Err(_) => {
                    debug!("VTOC sector not readable for {} sectors",spt);
                    continue;
                }
            };
            let vtoc = match VTOC::unpack(&buf) {
                Ok(v) => v,
                Err(_) => continue
            };
            if vtoc.sectors as u32!=spt {
                debug!("VTOC sectors {} does not match {}",vtoc.sectors,spt);
                continue;
            }
            if vtoc.version<3 {
                debug!("VTOC wrong version {}",vtoc.version);
                continue;
            }
            if vtoc.vol<1 || vtoc.vol>254 {
                debug!("Volume {} out of range",vtoc.vol);
                continue;
            }
            if vtoc.tracks as u32<=VTOC_TRACK || vtoc.tracks>MAX_TRACKS {
                debug!("VTOC track count {} out of range",vtoc.tracks);
                continue;
            }
            if vtoc.track1==0 || vtoc.track1>=vtoc.tracks || vtoc.sector1>=vtoc.sectors {
                debug!("VTOC wrong track1 {}, sector1 {}",vtoc.track1,vtoc.sector1);
                continue;
            }
            if vtoc.bytes as usize!=SECTOR_SIZE || vtoc.max_pairs!=MAX_PAIRS {
                debug!("VTOC wrong bytes {}, pairs {}",vtoc.bytes,vtoc.max_pairs);
                continue;
            }
            if vtoc.tracks as u64*spt as u64 > img.total_sectors() {
                debug!("VTOC geometry exceeds image");
                continue;
            }
            return Some(vtoc);
        }
        None
    }
    /// Test an image for the DOS 3.3 file system.  Nothing is written.
    pub fn test_img(img: &img::Image) -> bool {
        Self::find_vtoc(img).is_some()
    }
    fn spt(&self) -> u32 {
        self.vtoc.sectors as u32
    }
    fn unit(&self,ts: [u8;2]) -> u32 {
        ts[0] as u32*self.spt() + ts[1] as u32
    }
    fn in_range(&self,ts: [u8;2]) -> bool {
        ts[0] < self.vtoc.tracks && ts[1] < self.vtoc.sectors
    }
    fn read(&self,ts: [u8;2]) -> Result<Vec<u8>> {
        if !self.in_range(ts) {
            debug!("track {} sector {} out of range",ts[0],ts[1]);
            return Err(Error::InvalidBlock);
        }
        Ok(self.img.read_sector(ts[0] as u32,ts[1] as u32,self.spt())?)
    }
    /// Create an empty, non-bootable volume.  Track 0 and the VTOC track are marked used.
    pub fn format(&mut self,vol: u8,tracks: u8,sectors: u8) -> Result<()> {
        if self.ctx.read_only || self.img.is_read_only() {
            return Err(Error::AccessDenied);
        }
        if vol<1 || vol>254 || tracks as u32<=VTOC_TRACK || tracks>MAX_TRACKS || (sectors!=16 && sectors!=32) {
            return Err(Error::Unsupported);
        }
        if tracks as u64*sectors as u64 > self.img.total_sectors() {
            debug!("{} tracks of {} sectors exceeds image",tracks,sectors);
            return Err(Error::DiskFull);
        }
        let spt = sectors as u32;
        for track in 0..tracks as u32 {
            for sector in 0..spt {
                self.img.write_sector(track,sector,spt,&[0;SECTOR_SIZE])?;
            }
        }
        let mut vtoc = VTOC::new(vol,tracks,sectors);
        for track in 1..tracks {
            if track as u32!=VTOC_TRACK {
                for sector in 0..sectors {
                    vtoc.set_free(track,sector,true);
                }
            }
        }
        self.img.write_sector(VTOC_TRACK,0,spt,&vtoc.pack()?)?;
        for sector in 1..sectors {
            let dir = DirectorySector {
                next_track: match sector { 1 => 0, _ => VTOC_TRACK as u8 },
                next_sector: sector - 1,
                entries: (0..ENTRIES_PER_SECTOR).map(|_| DirectoryEntry::unpack(&[0;ENTRY_LEN])).collect()
            };
            self.img.write_sector(VTOC_TRACK,sector as u32,spt,&dir.pack())?;
        }
        self.initialize()
    }
    /// Track/sector pairs of a file in logical order, `None` for sparse sectors.
    /// Also returns the list sectors themselves.
    fn sector_list(&self,tsl: [u8;2]) -> Result<(Vec<Option<[u8;2]>>,Vec<[u8;2]>,usize)> {
        let mut data = Vec::new();
        let mut lists = Vec::new();
        let mut bad = 0;
        let mut visited = HashSet::new();
        let mut curr = tsl;
        for _try in 0..MAX_TSLIST_REPS {
            if !visited.insert(curr) {
                warn!("track/sector list revisits {:?}",curr);
                return Err(Error::DirectoryLoop);
            }
            let buf = self.read(curr)?;
            lists.push(curr);
            let list = TrackSectorList::unpack(&buf,self.vtoc.max_pairs);
            let base = list.sector_base as usize;
            if data.len() < base {
                data.resize(base,None);
            }
            for (p,pair) in list.pairs.iter().enumerate() {
                let val = match pair[0] {
                    0 => None,
                    _ if !self.in_range(*pair) => {
                        bad += 1;
                        None
                    },
                    _ => Some(*pair)
                };
                if base+p < data.len() {
                    data[base+p] = val;
                } else {
                    data.push(val);
                }
            }
            if list.next_track==0 {
                while data.last()==Some(&None) {
                    data.pop();
                }
                return Ok((data,lists,bad));
            }
            curr = [list.next_track,list.next_sector];
        }
        warn!("track/sector list count not plausible");
        Err(Error::DirectoryLoop)
    }
    /// Scan the catalog chain, adding records and noting sectors
    fn scan(&mut self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut curr = [self.vtoc.track1,self.vtoc.sector1];
        for _try in 0..MAX_DIRECTORY_REPS {
            if !visited.insert(curr) {
                warn!("catalog revisits track {} sector {}",curr[0],curr[1]);
                return Err(Error::DirectoryLoop);
            }
            let buf = self.read(curr)?;
            self.map.note(self.unit(curr),Purpose::VolumeDir,Some(self.root));
            let dir = DirectorySector::unpack(&buf);
            for (i,entry) in dir.entries.iter().enumerate() {
                self.ctx.poll()?;
                if !entry.is_active() {
                    continue;
                }
                self.add_entry(entry,curr,i);
            }
            if dir.next_track==0 {
                return Ok(());
            }
            curr = [dir.next_track,dir.next_sector];
        }
        warn!("catalog sector count not plausible");
        Err(Error::DirectoryLoop)
    }
    fn add_entry(&mut self,entry: &DirectoryEntry,loc: [u8;2],idx: usize) {
        let mut rec = FileRecord::new(&entry.name(),StorageKind::SectorList);
        rec.file_type = entry.file_type & !LOCKED;
        rec.access = match entry.is_locked() { true => LOCKED_ACCESS, false => STD_ACCESS };
        rec.blocks_used = entry.sectors as u32;
        rec.slot = Some((self.unit(loc),idx));
        let tsl = [entry.tsl_track,entry.tsl_sector];
        let in_range = self.in_range(tsl);
        if in_range {
            rec.key_block = self.unit(tsl);
        }
        let id = self.files.insert_child(self.root,rec);
        trace!("scanned {}",entry.name());
        if !in_range {
            self.degrade(id,Quality::Damaged,"track/sector list out of range");
            return;
        }
        let (data,lists,bad) = match self.sector_list(tsl) {
            Ok(ans) => ans,
            Err(e) => {
                self.degrade(id,Quality::Damaged,&e.to_string());
                return;
            }
        };
        if bad > 0 {
            self.degrade(id,Quality::Damaged,&format!("{} pairs out of range",bad));
        }
        for ts in lists.iter() {
            if !self.map.note(self.unit(*ts),Purpose::FileStruct,Some(id)) {
                self.degrade(id,Quality::Damaged,"list sector is claimed twice");
            }
        }
        let mut count = lists.len();
        for ts in data.iter().flatten() {
            count += 1;
            if !self.map.note(self.unit(*ts),Purpose::UserData,Some(id)) {
                self.degrade(id,Quality::Damaged,&format!("track {} sector {} is claimed twice",ts[0],ts[1]));
            }
        }
        if count!=entry.sectors as usize {
            self.degrade(id,Quality::Suspicious,&format!("sector count is {} but found {}",entry.sectors,count));
        }
        if let Some(rec) = self.files.get_mut(id) {
            rec.data_len = (data.len()*SECTOR_SIZE) as u64;
        }
    }
    fn degrade(&mut self,id: FileId,q: Quality,note: &str) {
        if let Some(rec) = self.files.get_mut(id) {
            rec.degrade(q,note);
        }
    }
    fn key_ts(&self,file: FileId) -> Result<[u8;2]> {
        let rec = self.files.get(file).ok_or(Error::FileNotFound)?;
        Ok([(rec.key_block / self.spt()) as u8,(rec.key_block % self.spt()) as u8])
    }
}

impl DiskFS for Disk {
    fn what_am_i(&self) -> fs::Format {
        fs::Format::DOS33
    }
    fn initialize(&mut self) -> Result<()> {
        self.vtoc = match Disk::find_vtoc(&self.img) {
            Some(vtoc) => vtoc,
            None => return Err(Error::BadDirectory)
        };
        let total = self.vtoc.tracks as usize*self.vtoc.sectors as usize;
        self.map = AllocationMap::new(total,SECTOR_SIZE);
        for track in 0..self.vtoc.tracks {
            for sector in 0..self.vtoc.sectors {
                let unit = self.unit([track,sector]) as usize;
                self.map.declare(unit,!self.vtoc.is_free(track,sector));
            }
        }
        self.map.reserve(self.unit([VTOC_TRACK as u8,0]) as usize);
        self.files = OrderedFileList::new();
        self.open_files = Vec::new();
        let name = format!("V{:03}",self.vtoc.vol);
        let mut root = FileRecord::new(&name,StorageKind::VolumeHeader);
        root.access = STD_ACCESS;
        self.root = self.files.insert_root(root);
        // track 0 always belongs to DOS
        for unit in [VTOC_TRACK*self.spt()].into_iter().chain(0..self.spt()) {
            self.map.note(unit,Purpose::System,None);
        }
        match self.scan() {
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => self.degrade(self.root,Quality::Damaged,&e.to_string()),
            Ok(()) => {}
        }
        info!("DOS 3.3 volume {} with {} files",self.vtoc.vol,self.files.len()-1);
        Ok(())
    }
    fn stat(&mut self) -> Result<Stat> {
        Ok(Stat {
            fs_name: FS_NAME.to_string(),
            label: format!("{}",self.vtoc.vol),
            unit_size: SECTOR_SIZE,
            total_units: self.map.total() as u64,
            free_units: self.map.num_free() as u64,
            files: self.files.len()-1
        })
    }
    fn files(&self) -> &OrderedFileList {
        &self.files
    }
    fn root(&self) -> FileId {
        self.root
    }
    fn usage(&self) -> &AllocationMap {
        &self.map
    }
    fn usage_mut(&mut self) -> &mut AllocationMap {
        &mut self.map
    }
    fn declared_blocks(&self) -> u32 {
        (self.vtoc.tracks as u32*self.spt()) / 2
    }
    fn img(&mut self) -> &mut img::Image {
        &mut self.img
    }
    fn open(&mut self,file: FileId,fork: Fork) -> Result<Descriptor> {
        let rec = self.files.get(file).ok_or(Error::FileNotFound)?;
        if rec.is_dir() {
            return Err(Error::AccessDenied);
        }
        if fork==Fork::Resource {
            return Err(Error::FileNotFound);
        }
        if self.open_files.iter().any(|d| d.file==file) {
            return Err(Error::FileOpen);
        }
        let desc = Descriptor { file, fork };
        self.open_files.push(desc);
        Ok(desc)
    }
    fn close(&mut self,desc: Descriptor) -> Result<()> {
        match self.open_files.iter().position(|d| *d==desc) {
            Some(i) => {
                self.open_files.remove(i);
                Ok(())
            },
            None => Err(Error::FileNotOpen)
        }
    }
    fn read_at(&mut self,desc: &Descriptor,offset: u64,len: usize) -> Result<Vec<u8>> {
        if !self.open_files.contains(desc) {
            return Err(Error::FileNotOpen);
        }
        let (data,_,_) = self.sector_list(self.key_ts(desc.file)?)?;
        let eof = (data.len()*SECTOR_SIZE) as u64;
        let end = u64::min(offset + len as u64,eof);
        if offset >= end {
            return Ok(Vec::new());
        }
        let first = offset as usize / SECTOR_SIZE;
        let last = (end as usize - 1) / SECTOR_SIZE;
        let mut ans = Vec::new();
        for i in first..=last {
            match data[i] {
                Some(ts) => ans.append(&mut self.read(ts)?),
                None => ans.append(&mut vec![0;SECTOR_SIZE])
            }
        }
        let beg = offset as usize - first*SECTOR_SIZE;
        Ok(ans[beg..beg+(end-offset) as usize].to_vec())
    }
    fn catalog_to_stdout(&mut self,_path: &str) -> Result<()> {
        let typ_map: HashMap<u8,&str> = HashMap::from(TYPE_MAP_DISP);
        println!();
        println!("DISK VOLUME {}",self.vtoc.vol);
        println!();
        for id in self.files.children(self.root) {
            if let Some(rec) = self.files.get(id) {
                let lock = match rec.access==LOCKED_ACCESS { true => LOCKED, false => 0 };
                match typ_map.get(&(rec.file_type | lock)) {
                    Some(typ) => println!("{} {:03} {}",typ,rec.blocks_used,rec.name),
                    None => println!("?? {:03} {}",rec.blocks_used,rec.name)
                }
            }
        }
        println!();
        Ok(())
    }
    fn tree(&mut self,include_meta: bool) -> Result<json::JsonValue> {
        let mut tree = json::JsonValue::new_object();
        tree["file_system"] = json::JsonValue::String(FS_NAME.to_string());
        tree["files"] = fs::tree_node(&self.files,self.root,include_meta,&|r: &FileRecord| {
            let mut meta = json::JsonValue::new_object();
            meta["type"] = json::JsonValue::String(hex::encode_upper(vec![r.file_type]));
            meta["eof"] = r.data_len.into();
            meta["read_only"] = json::JsonValue::Boolean(r.access==LOCKED_ACCESS);
            meta["sectors"] = r.blocks_used.into();
            meta
        });
        tree["label"] = json::JsonValue::new_object();
        tree["label"]["name"] = json::JsonValue::String(format!("{}",self.vtoc.vol));
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,SectorOrder,dsk_po::PO};
    use crate::fs::AuditReport;

    /// Write a file by hand: list at (18,15), data sectors at (18,14) and (18,13)
    fn plant_file(img: &Image) {
        let mut vtoc = VTOC::unpack(&img.read_sector(17,0,16).unwrap()).unwrap();
        let mut tsl = vec![0;SECTOR_SIZE];
        tsl[PAIRS_OFFSET..PAIRS_OFFSET+4].copy_from_slice(&[18,14,18,13]);
        img.write_sector(18,15,16,&tsl).unwrap();
        img.write_sector(18,14,16,&[0x41;SECTOR_SIZE]).unwrap();
        img.write_sector(18,13,16,&[0x42;SECTOR_SIZE]).unwrap();
        for s in [13,14,15] {
            vtoc.set_free(18,s,false);
        }
        img.write_sector(17,0,16,&vtoc.pack().unwrap()).unwrap();
        let mut cat = DirectorySector::unpack(&img.read_sector(17,15,16).unwrap());
        let mut name = [0xa0;30];
        name[0..5].copy_from_slice(&[0xc8,0xc5,0xcc,0xcc,0xcf]);
        cat.entries[0] = DirectoryEntry { tsl_track: 18, tsl_sector: 15, file_type: 0x84, name, sectors: 3 };
        img.write_sector(17,15,16,&cat.pack()).unwrap();
    }

    #[test]
    fn format_scan_read() {
        let img = Image::from_store(Box::new(PO::create(280)),SectorOrder::DOS);
        let mut disk = Disk::from_img(img.clone(),&Context::default());
        disk.format(254,35,16).unwrap();
        assert!(Disk::test_img(&img));
        let stat = disk.stat().unwrap();
        // 35 tracks less track 0 and the VTOC track
        assert_eq!((stat.total_units,stat.free_units),(560,528));
        plant_file(&img);
        disk.initialize().unwrap();
        assert_eq!(disk.audit(),AuditReport::default());
        let id = disk.find("HELLO").unwrap();
        let rec = disk.files().get(id).unwrap();
        assert_eq!((rec.file_type,rec.access,rec.data_len),(4,LOCKED_ACCESS,512));
        let desc = disk.open(id,Fork::Data).unwrap();
        let dat = disk.read_all(&desc).unwrap();
        assert_eq!((dat[0],dat[255],dat[256],dat.len()),(0x41,0x41,0x42,512));
        disk.close(desc).unwrap();
        assert!(matches!(disk.delete_file(id),Err(Error::Unsupported)));
    }

    #[test]
    fn unmarked_sector_is_reported() {
        let img = Image::from_store(Box::new(PO::create(280)),SectorOrder::DOS);
        let mut disk = Disk::from_img(img.clone(),&Context::default());
        disk.format(254,35,16).unwrap();
        plant_file(&img);
        let mut vtoc = VTOC::unpack(&img.read_sector(17,0,16).unwrap()).unwrap();
        vtoc.set_free(18,13,true);
        img.write_sector(17,0,16,&vtoc.pack().unwrap()).unwrap();
        disk.initialize().unwrap();
        assert_eq!(disk.audit().not_marked,vec![18*16+13]);
    }
}
