//! ## ProDOS file system module
//!
//! This manipulates one ProDOS volume inside an `img::Image` window.
//!
//! * The whole catalog is scanned into an `OrderedFileList` when the volume is initialized.
//! * The volume bitmap is loaded into an `AllocationMap`, which is audited against the scan.
//! * Mutations allocate in memory, write data, then directory blocks, then the bitmap.
//!   If anything fails before the directory is written, the in-memory map is restored.

pub mod types;
pub mod directory;
pub mod names;

use std::collections::HashSet;
use colored::*;
use log::{trace,debug,info,warn,error};
use types::*;
use directory::*;
use crate::img;
use crate::fs::{self,Context,Descriptor,DiskFS,Error,FileId,FileRecord,Fork,NewFile,OrderedFileList,Quality,Result,Stat,StorageKind};
use crate::fs::{AllocationMap,AuditReport,Purpose};

pub const FS_NAME: &str = "prodos";

/// Blocks of a fork or directory.  Data pointers are in logical order, 0 means sparse.
#[derive(Default)]
struct BlockList {
    data: Vec<u32>,
    index: Vec<u32>,
    /// pointers that were out of range and replaced by 0
    bad: usize
}

impl BlockList {
    fn allocated(&self) -> Vec<u32> {
        self.data.iter().chain(self.index.iter()).filter(|b| **b>0).copied().collect()
    }
}

/// In-memory copy of a directory chain, key block first
struct Chain {
    blocks: Vec<(u32,Vec<u8>)>
}

impl Chain {
    fn header(&self) -> Header {
        Header::unpack(&self.blocks[0].1)
    }
    fn set_header(&mut self,hdr: &Header) {
        hdr.pack(&mut self.blocks[0].1);
    }
    fn locations(&self) -> Vec<EntryLocation> {
        self.blocks.iter().enumerate().flat_map(|(i,(b,_))| entry_locations(*b,i==0)).collect()
    }
    fn buf(&self,iblock: u32) -> Option<&Vec<u8>> {
        self.blocks.iter().find(|(b,_)| *b==iblock).map(|(_,buf)| buf)
    }
    fn get(&self,loc: &EntryLocation) -> Option<Entry> {
        self.buf(loc.block).map(|buf| Entry::unpack(&buf[loc.offset()..]))
    }
    fn set(&mut self,loc: &EntryLocation,entry: &Entry) {
        if let Some((_,buf)) = self.blocks.iter_mut().find(|(b,_)| *b==loc.block) {
            entry.pack(&mut buf[loc.offset()..]);
        }
    }
    fn find_free(&self) -> Option<EntryLocation> {
        self.locations().into_iter().find(|loc| match self.get(loc) {
            Some(entry) => !entry.is_active(),
            None => false
        })
    }
}

fn kind_from_storage(stor: Option<StorageType>) -> StorageKind {
    match stor {
        Some(StorageType::Seedling) => StorageKind::Seedling,
        Some(StorageType::Sapling) => StorageKind::Sapling,
        Some(StorageType::Tree) => StorageKind::Tree,
        Some(StorageType::Extended) => StorageKind::Extended,
        Some(StorageType::SubDirEntry) => StorageKind::Directory,
        _ => StorageKind::Other
    }
}

fn storage_from_kind(kind: StorageKind) -> Option<StorageType> {
    match kind {
        StorageKind::Seedling => Some(StorageType::Seedling),
        StorageKind::Sapling => Some(StorageType::Sapling),
        StorageKind::Tree => Some(StorageType::Tree),
        _ => None
    }
}

/// Blocks needed to hold the bitmap of a volume
fn bitmap_blocks(total_blocks: u32) -> u32 {
    (total_blocks + 4095) / 4096
}

/// The primary interface for disk operations.
pub struct Disk {
    img: img::Image,
    ctx: Context,
    total_blocks: u32,
    bitmap_ptr: u32,
    map: AllocationMap,
    files: OrderedFileList,
    root: FileId,
    open_files: Vec<Descriptor>,
    audit_failed: bool
}

impl Disk {
    /// Use the given image window as storage.  The image may or may not be formatted,
    /// call `initialize` or `format` before anything else.
    pub fn from_img(img: img::Image,ctx: &Context) -> Self {
        let total_blocks = u32::min(img.total_blocks(),0xffff);
        Self {
            img,
            ctx: ctx.clone(),
            total_blocks,
            bitmap_ptr: BITMAP_PTR,
            map: AllocationMap::new(total_blocks as usize,BLOCK_SIZE),
            files: OrderedFileList::new(),
            root: 0,
            open_files: Vec::new(),
            audit_failed: false
        }
    }
    /// Test an image for the ProDOS file system.  Nothing is written.
    pub fn test_img(img: &img::Image) -> bool {
        let buf = match img.read_block(VOL_KEY_BLOCK) {
            Ok(buf) => buf,
            Err(_) => {
                debug!("ProDOS volume directory was not readable");
                return false;
            }
        };
        let (prev,next) = links(&buf);
        let hdr = Header::unpack(&buf);
        if prev!=0 || hdr.storage_type()!=Some(StorageType::VolDirHeader) {
            debug!("unexpected volume header storage type or links");
            return false;
        }
        if hdr.entry_len as usize!=ENTRY_LEN || (hdr.entries_per_block!=0x0d && hdr.entries_per_block!=0x0c) {
            debug!("unexpected header bytes {}, {}",hdr.entry_len,hdr.entries_per_block);
            return false;
        }
        if !names::is_legal(&hdr.raw_name()) {
            debug!("volume name `{}` not plausible",hdr.raw_name());
            return false;
        }
        let total = hdr.total_blocks();
        if total < BITMAP_PTR+2 || total > img.total_blocks() {
            debug!("peculiar block count {} in image of {}",total,img.total_blocks());
            return false;
        }
        if hdr.bitmap_ptr() < 3 || hdr.bitmap_ptr() + bitmap_blocks(total) > total || next >= total {
            debug!("bitmap pointer {} or link {} out of range",hdr.bitmap_ptr(),next);
            return false;
        }
        true
    }
    fn read_block(&self,iblock: u32) -> Result<Vec<u8>> {
        if iblock >= self.total_blocks {
            debug!("block {} beyond end of volume",iblock);
            return Err(Error::InvalidBlock);
        }
        Ok(self.img.read_block(iblock)?)
    }
    fn write_block(&self,iblock: u32,dat: &[u8]) -> Result<()> {
        if iblock >= self.total_blocks {
            return Err(fs::internal(&format!("write to block {} beyond end of volume",iblock)));
        }
        trace!("write block {}",iblock);
        Ok(self.img.write_block(iblock,dat)?)
    }
    /// Refuse mutation if the volume is read only or failed its audit
    fn writable(&self) -> Result<()> {
        if self.ctx.read_only || self.img.is_read_only() {
            error!("volume is read only");
            return Err(Error::AccessDenied);
        }
        if self.audit_failed {
            error!("volume failed its allocation audit, mutation refused");
            return Err(Error::AccessDenied);
        }
        Ok(())
    }
    fn degrade(&mut self,id: FileId,q: Quality,note: &str) {
        if let Some(rec) = self.files.get_mut(id) {
            rec.degrade(q,note);
        }
    }
    fn record(&self,id: FileId) -> Result<&FileRecord> {
        self.files.get(id).ok_or(Error::FileNotFound)
    }
    /// Allocate one block and record its purpose in the shadow map
    fn alloc(&mut self,purpose: Purpose,owner: Option<FileId>) -> Result<u32> {
        match self.map.allocate() {
            Some(iblock) => {
                self.map.note(iblock,purpose,owner);
                Ok(iblock)
            },
            None => {
                debug!("no free blocks");
                Err(Error::DiskFull)
            }
        }
    }
    fn read_bitmap(&mut self) -> Result<()> {
        let count = bitmap_blocks(self.total_blocks);
        let mut bytes = Vec::new();
        for iblock in self.bitmap_ptr..self.bitmap_ptr+count {
            bytes.append(&mut self.read_block(iblock)?);
        }
        self.map = AllocationMap::from_msb_bitmap(&bytes,self.total_blocks as usize,BLOCK_SIZE);
        for iblock in [0,1,VOL_KEY_BLOCK].into_iter().chain(self.bitmap_ptr..self.bitmap_ptr+count) {
            self.map.reserve(iblock as usize);
        }
        Ok(())
    }
    /// Write the whole bitmap, always the last step of a mutation
    fn write_bitmap(&mut self) -> Result<()> {
        let count = bitmap_blocks(self.total_blocks);
        let bytes = self.map.to_msb_bitmap(count as usize*BLOCK_SIZE);
        for i in 0..count {
            let beg = i as usize*BLOCK_SIZE;
            if let Err(e) = self.write_block(self.bitmap_ptr+i,&bytes[beg..beg+BLOCK_SIZE]) {
                error!("bitmap write failed after directory update: {}",e);
                return Err(e);
            }
        }
        Ok(())
    }
    /// Run a mutation against the in-memory map, restoring the map if it fails,
    /// then persist the bitmap.
    fn commit<T>(&mut self,f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.map.clone();
        match f(self) {
            Ok(ans) => {
                self.write_bitmap()?;
                Ok(ans)
            },
            Err(e) => {
                debug!("restoring allocation map after error: {}",e);
                self.map = snapshot;
                Err(e)
            }
        }
    }
    /// Format the window with an empty ProDOS volume.  Boot blocks are left zeroed.
    pub fn format(&mut self,vol_name: &str,time: Option<chrono::NaiveDateTime>) -> Result<()> {
        if self.ctx.read_only || self.img.is_read_only() {
            return Err(Error::AccessDenied);
        }
        let legal = names::legalize(vol_name);
        self.total_blocks = u32::min(self.img.total_blocks(),0xffff);
        self.bitmap_ptr = BITMAP_PTR;
        let count = bitmap_blocks(self.total_blocks);
        if self.total_blocks < BITMAP_PTR + count + 1 {
            error!("{} blocks is too small for a ProDOS volume",self.total_blocks);
            return Err(Error::DiskFull);
        }
        trace!("formatting: zero all");
        for iblock in 0..self.total_blocks {
            self.write_block(iblock,&[0;BLOCK_SIZE])?;
        }
        trace!("formatting: volume directory");
        for i in 0..VOL_DIR_BLOCKS {
            let iblock = VOL_KEY_BLOCK + i;
            let mut buf = vec![0;BLOCK_SIZE];
            let prev = match i { 0 => 0, _ => iblock-1 };
            let next = match i { i if i+1==VOL_DIR_BLOCKS => 0, _ => iblock+1 };
            set_links(&mut buf,prev,next);
            if i==0 {
                Header::new_volume(&legal,self.total_blocks,time).pack(&mut buf);
            }
            self.write_block(iblock,&buf)?;
        }
        trace!("formatting: bitmap");
        self.map = AllocationMap::from_msb_bitmap(&vec![0xff;count as usize*BLOCK_SIZE],self.total_blocks as usize,BLOCK_SIZE);
        for iblock in 0..VOL_KEY_BLOCK+VOL_DIR_BLOCKS {
            self.map.declare(iblock as usize,true);
        }
        for iblock in self.bitmap_ptr..self.bitmap_ptr+count {
            self.map.declare(iblock as usize,true);
        }
        self.write_bitmap()?;
        self.audit_failed = false;
        self.initialize()
    }
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }
    /// Read a directory chain starting from its key block
    fn read_chain(&self,key: u32) -> Result<Chain> {
        let mut ans = Vec::new();
        let mut visited = HashSet::new();
        let mut curr = key;
        for _try in 0..self.total_blocks {
            if curr==0 && ans.len()>0 {
                return Ok(Chain { blocks: ans });
            }
            if !visited.insert(curr) {
                warn!("directory chain revisits block {}",curr);
                return Err(Error::DirectoryLoop);
            }
            let buf = self.read_block(curr)?;
            let (_prev,next) = links(&buf);
            ans.push((curr,buf));
            curr = next;
        }
        error!("directory block count not plausible, aborting");
        Err(Error::DirectoryLoop)
    }
    /// Write a chain last block first, so that no link points at an unwritten block
    fn write_chain(&self,chain: &Chain) -> Result<()> {
        for (iblock,buf) in chain.blocks.iter().rev() {
            self.write_block(*iblock,buf)?;
        }
        Ok(())
    }
    /// Pointers of an index block, out of range pointers are counted and replaced by 0
    fn index_ptrs(&self,iblock: u32,count: usize,list: &mut BlockList) -> Result<Vec<u32>> {
        let buf = self.read_block(iblock)?;
        let mut ans = Vec::new();
        for idx in 0..count {
            let ptr = index_ptr(&buf,idx);
            if ptr >= self.total_blocks {
                list.bad += 1;
                ans.push(0);
            } else {
                ans.push(ptr);
            }
        }
        Ok(ans)
    }
    /// Resolve the block list of one fork
    fn fork_blocks(&self,stor: StorageType,key: u32) -> Result<BlockList> {
        let mut list = BlockList::default();
        if key==0 || key >= self.total_blocks {
            return Err(Error::InvalidBlock);
        }
        match stor {
            StorageType::Seedling => {
                list.data.push(key);
            },
            StorageType::Sapling => {
                list.index.push(key);
                list.data = self.index_ptrs(key,INDEX_PTRS,&mut list)?;
            },
            StorageType::Tree => {
                list.index.push(key);
                let masters = self.index_ptrs(key,MASTER_PTRS,&mut list)?;
                for ptr in masters {
                    if ptr==0 {
                        list.data.append(&mut vec![0;INDEX_PTRS]);
                    } else {
                        list.index.push(ptr);
                        let mut ptrs = self.index_ptrs(ptr,INDEX_PTRS,&mut list)?;
                        list.data.append(&mut ptrs);
                    }
                }
            },
            _ => return Err(fs::internal("block list requested for non-file storage type"))
        }
        while list.data.len()>1 && list.data.last()==Some(&0) {
            list.data.pop();
        }
        Ok(list)
    }
    /// Storage type, key block, and length of a descriptor's fork
    fn fork_info(&self,file: FileId,fork: Fork) -> Result<(StorageType,u32,u64)> {
        let rec = self.record(file)?;
        match (rec.kind,fork) {
            (StorageKind::Extended,_) => {
                let buf = self.read_block(rec.key_block)?;
                let fe = ForkEntry::unpack(&buf,match fork { Fork::Data => 0, Fork::Resource => 0x100 });
                match fe.storage_type() {
                    Some(stor) => Ok((stor,fe.key_ptr as u32,fe.eof as u64)),
                    None => Err(Error::BadDirectory)
                }
            },
            (kind,Fork::Data) => match storage_from_kind(kind) {
                Some(stor) => Ok((stor,rec.key_block,rec.data_len)),
                None => Err(Error::Unsupported)
            },
            (_,Fork::Resource) => Err(Error::FileNotFound)
        }
    }
    /// Every block owned by a record, including key, index, and directory blocks
    fn record_blocks(&self,file: FileId) -> Result<BlockList> {
        let rec = self.record(file)?;
        match rec.kind {
            StorageKind::Directory => {
                let chain = self.read_chain(rec.key_block)?;
                Ok(BlockList { index: chain.blocks.iter().map(|(b,_)| *b).collect(), ..BlockList::default() })
            },
            StorageKind::Extended => {
                let mut ans = BlockList { index: vec![rec.key_block], ..BlockList::default() };
                for fork in [Fork::Data,Fork::Resource] {
                    let (stor,key,_) = self.fork_info(file,fork)?;
                    let mut list = self.fork_blocks(stor,key)?;
                    ans.data.append(&mut list.data);
                    ans.index.append(&mut list.index);
                    ans.bad += list.bad;
                }
                Ok(ans)
            },
            StorageKind::Other => {
                Ok(BlockList { data: (rec.key_block..rec.key_block+rec.blocks_used).collect(), ..BlockList::default() })
            },
            kind => match storage_from_kind(kind) {
                Some(stor) => self.fork_blocks(stor,rec.key_block),
                None => Err(Error::Unsupported)
            }
        }
    }
    /// Read part of a fork, sparse blocks read as zeros
    fn read_fork(&self,stor: StorageType,key: u32,eof: u64,offset: u64,len: usize) -> Result<Vec<u8>> {
        let end = u64::min(offset + len as u64,eof);
        if offset >= end {
            return Ok(Vec::new());
        }
        let list = self.fork_blocks(stor,key)?;
        if list.bad > 0 {
            warn!("{} out of range pointers read as zeros",list.bad);
        }
        let first = (offset / BLOCK_SIZE as u64) as usize;
        let last = ((end - 1) / BLOCK_SIZE as u64) as usize;
        let mut ans = Vec::new();
        for i in first..=last {
            match list.data.get(i) {
                Some(ptr) if *ptr>0 => ans.append(&mut self.read_block(*ptr)?),
                _ => ans.append(&mut vec![0;BLOCK_SIZE])
            }
        }
        let beg = (offset - (first*BLOCK_SIZE) as u64) as usize;
        Ok(ans[beg..beg+(end-offset) as usize].to_vec())
    }
    /// Allocate and write a fork holding `dat`.  Blocks of zeros after the first become sparse.
    /// Returns the storage type, key block, and blocks used.
    fn write_fork(&mut self,dat: &[u8],owner: Option<FileId>) -> Result<(StorageType,u32,u16)> {
        let n = usize::max(1,(dat.len() + BLOCK_SIZE - 1) / BLOCK_SIZE);
        if n > MASTER_PTRS*INDEX_PTRS {
            error!("file of {} blocks exceeds the master index",n);
            return Err(Error::DiskFull);
        }
        let mut data = Vec::new();
        let mut used: u16 = 0;
        for i in 0..n {
            let chunk = &dat[usize::min(i*BLOCK_SIZE,dat.len())..usize::min((i+1)*BLOCK_SIZE,dat.len())];
            if i>0 && chunk.iter().all(|x| *x==0) {
                data.push(0);
                continue;
            }
            let iblock = self.alloc(Purpose::UserData,owner)?;
            self.write_block(iblock,chunk)?;
            data.push(iblock);
            used += 1;
        }
        let stor = StorageType::for_blocks(n);
        match stor {
            StorageType::Seedling => Ok((stor,data[0],used)),
            StorageType::Sapling => {
                let key = self.alloc(Purpose::FileStruct,owner)?;
                let mut buf = vec![0;BLOCK_SIZE];
                for (idx,ptr) in data.iter().enumerate() {
                    set_index_ptr(&mut buf,idx,*ptr);
                }
                self.write_block(key,&buf)?;
                Ok((stor,key,used+1))
            },
            _ => {
                let key = self.alloc(Purpose::FileStruct,owner)?;
                let mut master = vec![0;BLOCK_SIZE];
                for (m,group) in data.chunks(INDEX_PTRS).enumerate() {
                    if group.iter().all(|p| *p==0) {
                        continue;
                    }
                    let index = self.alloc(Purpose::FileStruct,owner)?;
                    let mut buf = vec![0;BLOCK_SIZE];
                    for (idx,ptr) in group.iter().enumerate() {
                        set_index_ptr(&mut buf,idx,*ptr);
                    }
                    self.write_block(index,&buf)?;
                    set_index_ptr(&mut master,m,index);
                    used += 1;
                }
                self.write_block(key,&master)?;
                Ok((stor,key,used+1))
            }
        }
    }
    /// Read-modify-write the directory entry of a record
    fn update_entry(&mut self,file: FileId,f: impl FnOnce(&mut Entry)) -> Result<Entry> {
        let (iblock,idx) = match self.record(file)?.slot {
            Some(slot) => slot,
            None => return Err(fs::internal("record has no directory slot"))
        };
        let loc = EntryLocation { block: iblock, idx };
        let mut buf = self.read_block(iblock)?;
        let mut entry = Entry::unpack(&buf[loc.offset()..]);
        f(&mut entry);
        entry.pack(&mut buf[loc.offset()..]);
        self.write_block(iblock,&buf)?;
        Ok(entry)
    }
    /// Return a name that is free among the children of `parent`, or fail with an exists error.
    /// `exclude` is the record being renamed, if any.
    fn resolve_collision(&self,parent: FileId,legal: &str,exclude: Option<FileId>) -> Result<String> {
        let siblings: Vec<&FileRecord> = self.files.children(parent).into_iter()
            .filter(|id| Some(*id)!=exclude)
            .filter_map(|id| self.files.get(id))
            .collect();
        let taken = |s: &str| siblings.iter().find(|r| r.raw_name==names::stored(s)).copied();
        match (taken(legal),self.ctx.unique_names) {
            (None,_) => Ok(legal.to_string()),
            (Some(_),true) => names::unique_name(legal,|s| taken(s).is_some()),
            (Some(r),false) if r.is_dir() => Err(Error::DirectoryExists),
            (Some(_),false) => Err(Error::FileExists)
        }
    }
    fn record_from_entry(entry: &Entry,loc: &EntryLocation) -> FileRecord {
        let mut rec = FileRecord::new(&entry.name(),kind_from_storage(entry.storage_type()));
        rec.raw_name = entry.raw_name();
        rec.file_type = entry.file_type;
        rec.aux_type = entry.aux_type;
        rec.access = entry.access;
        rec.data_len = entry.eof as u64;
        rec.key_block = entry.key_ptr as u32;
        rec.blocks_used = entry.blocks_used as u32;
        rec.created = unpack_time(entry.created);
        rec.modified = unpack_time(entry.modified);
        rec.slot = Some((loc.block,loc.idx));
        rec
    }
    /// Note the blocks of one fork in the shadow map, degrading the record on trouble
    fn note_fork(&mut self,id: FileId,stor: StorageType,key: u32) -> u32 {
        let list = match self.fork_blocks(stor,key) {
            Ok(list) => list,
            Err(e) => {
                self.degrade(id,Quality::Damaged,&format!("block list not readable: {}",e));
                return 0;
            }
        };
        if list.bad > 0 {
            self.degrade(id,Quality::Damaged,&format!("{} block pointers out of range",list.bad));
        }
        let mut count = 0;
        for iblock in list.data.iter().filter(|b| **b>0) {
            count += 1;
            if !self.map.note(*iblock,Purpose::UserData,Some(id)) {
                self.degrade(id,Quality::Damaged,&format!("block {} is claimed twice",iblock));
            }
        }
        for iblock in list.index.iter() {
            count += 1;
            if !self.map.note(*iblock,Purpose::FileStruct,Some(id)) {
                self.degrade(id,Quality::Damaged,&format!("index block {} is claimed twice",iblock));
            }
        }
        count
    }
    /// Account for the blocks of a scanned record
    fn note_record(&mut self,id: FileId,stor: Option<StorageType>) {
        let (key,blocks_used) = match self.files.get(id) {
            Some(rec) => (rec.key_block,rec.blocks_used),
            None => return
        };
        let count = match stor {
            Some(s @ (StorageType::Seedling | StorageType::Sapling | StorageType::Tree)) => {
                self.note_fork(id,s,key)
            },
            Some(StorageType::Extended) => {
                if !self.map.note(key,Purpose::FileStruct,Some(id)) {
                    self.degrade(id,Quality::Damaged,"extended key block out of range or claimed twice");
                    return;
                }
                let buf = match self.read_block(key) {
                    Ok(buf) => buf,
                    Err(e) => {
                        self.degrade(id,Quality::Damaged,&format!("extended key block: {}",e));
                        return;
                    }
                };
                let mut count = 1;
                for (offset,fork) in [(0,Fork::Data),(0x100,Fork::Resource)] {
                    let fe = ForkEntry::unpack(&buf,offset);
                    match fe.storage_type() {
                        Some(s) if s==StorageType::Seedling || s==StorageType::Sapling || s==StorageType::Tree => {
                            count += self.note_fork(id,s,fe.key_ptr as u32);
                        },
                        _ => self.degrade(id,Quality::Damaged,"bad fork storage type")
                    }
                    if let Some(rec) = self.files.get_mut(id) {
                        match fork {
                            Fork::Data => rec.data_len = fe.eof as u64,
                            Fork::Resource => rec.rsrc_len = fe.eof as u64
                        }
                    }
                }
                count
            },
            Some(StorageType::Pascal) => {
                for iblock in key..key+blocks_used {
                    if !self.map.note(iblock,Purpose::UserData,Some(id)) {
                        self.degrade(id,Quality::Damaged,"Pascal area overlaps other data");
                        break;
                    }
                }
                blocks_used
            },
            _ => {
                self.degrade(id,Quality::Suspicious,"unknown storage type");
                return;
            }
        };
        if count!=blocks_used {
            self.degrade(id,Quality::Suspicious,&format!("blocks used is {} but found {}",blocks_used,count));
        }
    }
    /// Scan a directory chain and everything beneath it
    fn scan_dir(&mut self,dir: FileId,key: u32,parent_loc: Option<EntryLocation>,depth: usize,visited: &mut HashSet<u32>) -> Result<()> {
        if depth > self.ctx.max_depth {
            warn!("directory nesting exceeds {}",self.ctx.max_depth);
            return Err(Error::DirectoryLoop);
        }
        if !visited.insert(key) {
            warn!("directory key block {} reached twice",key);
            return Err(Error::DirectoryLoop);
        }
        let chain = self.read_chain(key)?;
        let purpose = match parent_loc { None => Purpose::VolumeDir, Some(_) => Purpose::Subdir };
        for (iblock,_) in chain.blocks.iter() {
            if !self.map.note(*iblock,purpose,Some(dir)) {
                self.degrade(dir,Quality::Damaged,&format!("directory block {} is claimed twice",iblock));
            }
        }
        let hdr = chain.header();
        let expected = match parent_loc { None => StorageType::VolDirHeader, Some(_) => StorageType::SubDirHeader };
        if hdr.storage_type()!=Some(expected) || hdr.entry_len as usize!=ENTRY_LEN {
            return Err(Error::BadDirectory);
        }
        if let Some(loc) = parent_loc {
            if hdr.parent_ptr()!=loc.block || hdr.parent_entry_num()!=loc.idx {
                self.degrade(dir,Quality::Suspicious,"parent pointer does not match");
            }
        }
        let mut count = 0;
        for loc in chain.locations() {
            self.ctx.poll()?;
            let entry = match chain.get(&loc) {
                Some(entry) if entry.is_active() => entry,
                _ => continue
            };
            count += 1;
            let mut rec = Disk::record_from_entry(&entry,&loc);
            if !names::is_legal(&rec.raw_name) {
                rec.degrade(Quality::Suspicious,"illegal name");
            }
            if entry.header_ptr as u32!=key {
                rec.degrade(Quality::Suspicious,"header pointer does not match");
            }
            let id = self.files.insert_child(dir,rec);
            trace!("scanned {}",entry.name());
            match entry.storage_type() {
                Some(StorageType::SubDirEntry) => {
                    match self.scan_dir(id,entry.key_ptr as u32,Some(loc),depth+1,visited) {
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) => self.degrade(id,Quality::Damaged,&e.to_string()),
                        Ok(()) => {}
                    }
                },
                stor => self.note_record(id,stor)
            }
        }
        if count!=hdr.file_count as usize {
            self.degrade(dir,Quality::Suspicious,&format!("file count is {} but found {}",hdr.file_count,count));
        }
        Ok(())
    }
    /// Create the on-disk parts of a new record, the directory is written but not the bitmap
    fn create_entry(&mut self,parent: FileId,legal: &str,attr: &NewFile) -> Result<FileRecord> {
        let (dir_key,is_root) = (self.record(parent)?.key_block,parent==self.root);
        let mut chain = self.read_chain(dir_key)?;
        let mut grew = false;
        let loc = match chain.find_free() {
            Some(loc) => loc,
            None if is_root => {
                error!("volume directory is full");
                return Err(Error::DirectoryFull);
            },
            None => {
                let new_block = self.alloc(Purpose::Subdir,Some(parent))?;
                let last = chain.blocks.len()-1;
                let prev = chain.blocks[last].0;
                let (prev_prev,_) = links(&chain.blocks[last].1);
                set_links(&mut chain.blocks[last].1,prev_prev,new_block);
                let mut buf = vec![0;BLOCK_SIZE];
                set_links(&mut buf,prev,0);
                chain.blocks.push((new_block,buf));
                grew = true;
                debug!("directory grows into block {}",new_block);
                EntryLocation { block: new_block, idx: 1 }
            }
        };
        let mut entry = Entry::unpack(&[0;ENTRY_LEN]);
        entry.set_name(legal);
        entry.file_type = attr.file_type;
        entry.aux_type = attr.aux_type;
        entry.access = attr.access;
        entry.created = pack_time(attr.created);
        entry.modified = pack_time(attr.modified.or(attr.created));
        entry.header_ptr = dir_key as u16;
        match attr.kind {
            StorageKind::Directory => {
                let key = self.alloc(Purpose::Subdir,None)?;
                let mut buf = vec![0;BLOCK_SIZE];
                Header::new_subdir(legal,&loc,attr.created).pack(&mut buf);
                self.write_block(key,&buf)?;
                entry.storage = StorageType::SubDirEntry as u8;
                entry.file_type = FileType::Directory as u8;
                entry.key_ptr = key as u16;
                entry.blocks_used = 1;
                entry.eof = BLOCK_SIZE as u32;
            },
            StorageKind::Extended => {
                let key = self.alloc(Purpose::FileStruct,None)?;
                let mut buf = vec![0;BLOCK_SIZE];
                for offset in [0,0x100] {
                    let fork_key = self.alloc(Purpose::UserData,None)?;
                    self.write_block(fork_key,&[0;BLOCK_SIZE])?;
                    ForkEntry { storage: StorageType::Seedling as u8, key_ptr: fork_key as u16, blocks_used: 1, eof: 0 }.pack(&mut buf,offset);
                }
                self.write_block(key,&buf)?;
                entry.storage = StorageType::Extended as u8;
                entry.key_ptr = key as u16;
                entry.blocks_used = 3;
                entry.eof = BLOCK_SIZE as u32;
            },
            _ => {
                let key = self.alloc(Purpose::UserData,None)?;
                self.write_block(key,&[0;BLOCK_SIZE])?;
                entry.storage = StorageType::Seedling as u8;
                entry.key_ptr = key as u16;
                entry.blocks_used = 1;
                entry.eof = 0;
            }
        }
        chain.set(&loc,&entry);
        let mut hdr = chain.header();
        hdr.file_count += 1;
        chain.set_header(&hdr);
        if grew {
            // the parent's own entry accounts for the new block, written before anything links to it
            self.update_entry(parent,|e| {
                e.blocks_used += 1;
                e.eof += BLOCK_SIZE as u32;
            })?;
            if let Some(rec) = self.files.get_mut(parent) {
                rec.blocks_used += 1;
                rec.data_len += BLOCK_SIZE as u64;
            }
        }
        self.write_chain(&chain)?;
        Ok(Disk::record_from_entry(&entry,&loc))
    }
}

impl DiskFS for Disk {
    fn what_am_i(&self) -> fs::Format {
        fs::Format::ProDOS
    }
    fn initialize(&mut self) -> Result<()> {
        let buf = self.read_block(VOL_KEY_BLOCK)?;
        let hdr = Header::unpack(&buf);
        if hdr.storage_type()!=Some(StorageType::VolDirHeader) {
            return Err(Error::BadDirectory);
        }
        if hdr.total_blocks() > self.img.total_blocks() {
            warn!("volume claims {} blocks, window has {}",hdr.total_blocks(),self.img.total_blocks());
        }
        self.total_blocks = u32::min(hdr.total_blocks(),self.img.total_blocks());
        self.bitmap_ptr = hdr.bitmap_ptr();
        self.open_files = Vec::new();
        self.read_bitmap()?;
        self.files = OrderedFileList::new();
        let mut root = FileRecord::new(&hdr.name(),StorageKind::VolumeHeader);
        root.raw_name = hdr.raw_name();
        root.file_type = FileType::Directory as u8;
        root.access = hdr.access;
        root.key_block = VOL_KEY_BLOCK;
        root.created = unpack_time(hdr.created);
        self.root = self.files.insert_root(root);
        for iblock in [0,1] {
            self.map.note(iblock,Purpose::System,None);
        }
        let count = bitmap_blocks(self.total_blocks);
        for iblock in self.bitmap_ptr..self.bitmap_ptr+count {
            self.map.note(iblock,Purpose::System,None);
        }
        let mut visited = HashSet::new();
        match self.scan_dir(self.root,VOL_KEY_BLOCK,None,0,&mut visited) {
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => self.degrade(self.root,Quality::Damaged,&e.to_string()),
            Ok(()) => {}
        }
        let report = self.audit();
        if self.audit_failed {
            warn!("allocation audit failed ({} not marked, {} conflicts), volume is read only",
                report.not_marked.len(),report.conflicts.len());
        }
        info!("ProDOS volume {} with {} files",hdr.name(),self.files.len()-1);
        Ok(())
    }
    fn stat(&mut self) -> Result<Stat> {
        Ok(Stat {
            fs_name: FS_NAME.to_string(),
            label: self.record(self.root)?.name.clone(),
            unit_size: BLOCK_SIZE,
            total_units: self.total_blocks as u64,
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
        self.total_blocks
    }
    fn img(&mut self) -> &mut img::Image {
        &mut self.img
    }
    fn audit(&mut self) -> AuditReport {
        let report = self.map.audit();
        self.audit_failed = report.is_fatal(self.ctx.strict);
        report
    }
    fn allocate(&mut self) -> Result<u32> {
        self.writable()?;
        self.commit(|disk| disk.alloc(Purpose::UserData,None))
    }
    fn put_block(&mut self,iblock: u32,dat: &[u8]) -> Result<()> {
        self.writable()?;
        self.write_block(iblock,dat)
    }
    fn create_file(&mut self,parent: FileId,name: &str,attr: &NewFile) -> Result<FileId> {
        self.writable()?;
        if !self.record(parent)?.is_dir() {
            error!("{} is not a directory",self.record(parent)?.full_path);
            return Err(Error::FileNotFound);
        }
        let legal = names::legalize(name);
        let legal = self.resolve_collision(parent,&legal,None)?;
        let rec = self.commit(|disk| disk.create_entry(parent,&legal,attr))?;
        debug!("created {} with key block {}",rec.name,rec.key_block);
        let id = self.files.insert_child(parent,rec);
        Ok(id)
    }
    fn delete_file(&mut self,file: FileId) -> Result<()> {
        self.writable()?;
        if file==self.root {
            error!("cannot delete the volume directory");
            return Err(Error::AccessDenied);
        }
        let rec = self.record(file)?.clone();
        if self.open_files.iter().any(|d| d.file==file) {
            error!("{} is open",rec.full_path);
            return Err(Error::FileOpen);
        }
        if rec.access & Access::Destroy as u8 == 0 {
            error!("{} is locked",rec.full_path);
            return Err(Error::AccessDenied);
        }
        if rec.is_dir() && self.files.children(file).len() > 0 {
            error!("{} is not empty",rec.full_path);
            return Err(Error::DirectoryNotEmpty);
        }
        let (parent,(iblock,idx)) = match (rec.parent,rec.slot) {
            (Some(p),Some(s)) => (p,s),
            _ => return Err(fs::internal("record is missing parent or slot"))
        };
        let parent_key = self.record(parent)?.key_block;
        self.commit(|disk| {
            let list = disk.record_blocks(file)?;
            for b in list.allocated() {
                disk.map.free(b)?;
            }
            if rec.kind!=StorageKind::Directory {
                // ProDOS swaps the halves of index blocks upon deletion
                for b in list.index.iter().filter(|b| **b!=rec.key_block || rec.kind!=StorageKind::Extended) {
                    let buf = disk.read_block(*b)?;
                    disk.write_block(*b,&[&buf[256..512],&buf[0..256]].concat())?;
                }
            }
            let loc = EntryLocation { block: iblock, idx };
            let mut slot_buf = disk.read_block(iblock)?;
            slot_buf[loc.offset()] = 0;
            if iblock==parent_key {
                let mut hdr = Header::unpack(&slot_buf);
                hdr.file_count = hdr.file_count.saturating_sub(1);
                hdr.pack(&mut slot_buf);
                disk.write_block(iblock,&slot_buf)?;
            } else {
                let mut key_buf = disk.read_block(parent_key)?;
                let mut hdr = Header::unpack(&key_buf);
                hdr.file_count = hdr.file_count.saturating_sub(1);
                hdr.pack(&mut key_buf);
                disk.write_block(iblock,&slot_buf)?;
                disk.write_block(parent_key,&key_buf)?;
            }
            Ok(())
        })?;
        debug!("deleted {}",rec.full_path);
        self.files.remove(file);
        Ok(())
    }
    fn rename_file(&mut self,file: FileId,name: &str) -> Result<()> {
        self.writable()?;
        let legal = names::legalize(name);
        if file==self.root {
            let mut buf = self.read_block(VOL_KEY_BLOCK)?;
            let mut hdr = Header::unpack(&buf);
            hdr.set_name(&legal);
            hdr.pack(&mut buf);
            self.write_block(VOL_KEY_BLOCK,&buf)?;
            self.files.set_name(file,&hdr.name(),&hdr.raw_name());
            return Ok(());
        }
        let rec = self.record(file)?.clone();
        if rec.access & Access::Rename as u8 == 0 {
            error!("{} may not be renamed",rec.full_path);
            return Err(Error::AccessDenied);
        }
        let parent = rec.parent.ok_or(Error::Internal)?;
        let legal = self.resolve_collision(parent,&legal,Some(file))?;
        let entry = self.update_entry(file,|e| e.set_name(&legal))?;
        if rec.is_dir() {
            let mut buf = self.read_block(rec.key_block)?;
            let mut hdr = Header::unpack(&buf);
            hdr.set_name(&legal);
            hdr.pack(&mut buf);
            self.write_block(rec.key_block,&buf)?;
        }
        self.files.set_name(file,&entry.name(),&entry.raw_name());
        Ok(())
    }
    fn set_access(&mut self,file: FileId,access: u8) -> Result<()> {
        self.writable()?;
        if file==self.root {
            let mut buf = self.read_block(VOL_KEY_BLOCK)?;
            let mut hdr = Header::unpack(&buf);
            hdr.access = access;
            hdr.pack(&mut buf);
            self.write_block(VOL_KEY_BLOCK,&buf)?;
        } else {
            self.update_entry(file,|e| e.access = access)?;
        }
        if let Some(rec) = self.files.get_mut(file) {
            rec.access = access;
        }
        Ok(())
    }
    fn retype(&mut self,file: FileId,file_type: u8,aux_type: u16) -> Result<()> {
        self.writable()?;
        if self.record(file)?.is_dir() {
            error!("cannot change the type of a directory");
            return Err(Error::AccessDenied);
        }
        self.update_entry(file,|e| {
            e.file_type = file_type;
            e.aux_type = aux_type;
        })?;
        if let Some(rec) = self.files.get_mut(file) {
            rec.file_type = file_type;
            rec.aux_type = aux_type;
        }
        Ok(())
    }
    fn open(&mut self,file: FileId,fork: Fork) -> Result<Descriptor> {
        let rec = self.record(file)?;
        if rec.is_dir() || rec.kind==StorageKind::Other {
            error!("{} cannot be opened as a file",rec.full_path);
            return Err(Error::AccessDenied);
        }
        if fork==Fork::Resource && rec.kind!=StorageKind::Extended {
            debug!("{} has no resource fork",rec.full_path);
            return Err(Error::FileNotFound);
        }
        if self.open_files.iter().any(|d| d.file==file) {
            error!("{} is already open",rec.full_path);
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
        let (stor,key,eof) = self.fork_info(desc.file,desc.fork)?;
        self.read_fork(stor,key,eof,offset,len)
    }
    fn write(&mut self,desc: &Descriptor,dat: &[u8]) -> Result<()> {
        self.writable()?;
        if !self.open_files.contains(desc) {
            return Err(Error::FileNotOpen);
        }
        let rec = self.record(desc.file)?.clone();
        if rec.access & Access::Write as u8 == 0 {
            error!("{} is write protected",rec.full_path);
            return Err(Error::AccessDenied);
        }
        if dat.len() > 0xffffff {
            error!("{} bytes exceeds the maximum EOF",dat.len());
            return Err(Error::DiskFull);
        }
        let file = desc.file;
        let fork = desc.fork;
        let entry = self.commit(|disk| {
            let (old_stor,old_key,_) = disk.fork_info(file,fork)?;
            let old = disk.fork_blocks(old_stor,old_key)?;
            // new blocks are allocated while the old ones are still marked
            let (stor,key,used) = disk.write_fork(dat,Some(file))?;
            for b in old.allocated() {
                disk.map.free(b)?;
            }
            let now = pack_time(None);
            if rec.kind==StorageKind::Extended {
                let mut buf = disk.read_block(rec.key_block)?;
                let offset = match fork { Fork::Data => 0, Fork::Resource => 0x100 };
                ForkEntry { storage: stor as u8, key_ptr: key as u16, blocks_used: used, eof: dat.len() as u32 }.pack(&mut buf,offset);
                let total = 1 + ForkEntry::unpack(&buf,0).blocks_used + ForkEntry::unpack(&buf,0x100).blocks_used;
                disk.write_block(rec.key_block,&buf)?;
                disk.update_entry(file,|e| {
                    e.blocks_used = total;
                    e.modified = now;
                })
            } else {
                disk.update_entry(file,|e| {
                    e.storage = stor as u8;
                    e.key_ptr = key as u16;
                    e.blocks_used = used;
                    e.eof = dat.len() as u32;
                    e.modified = now;
                })
            }
        })?;
        if let Some(rec) = self.files.get_mut(file) {
            rec.blocks_used = entry.blocks_used as u32;
            rec.modified = unpack_time(entry.modified);
            match fork {
                Fork::Data => rec.data_len = dat.len() as u64,
                Fork::Resource => rec.rsrc_len = dat.len() as u64
            }
            if rec.kind!=StorageKind::Extended {
                rec.kind = kind_from_storage(entry.storage_type());
                rec.key_block = entry.key_ptr as u32;
            }
        }
        Ok(())
    }
    fn catalog_to_stdout(&mut self,path: &str) -> Result<()> {
        let dir = self.find(path)?;
        let rec = self.record(dir)?;
        if !rec.is_dir() {
            return Err(Error::FileNotFound);
        }
        println!();
        if dir==self.root {
            println!("{}{}","/".bright_blue().bold(),rec.name.bright_blue().bold());
        } else {
            println!("{}",rec.full_path.bright_blue().bold());
        }
        println!();
        println!(" {:15} {:4} {:6} {:16} {:16} {:7} {:7}",
            "NAME".bold(),"TYPE".bold(),"BLOCKS".bold(),
            "MODIFIED".bold(),"CREATED".bold(),"ENDFILE".bold(),"SUBTYPE".bold());
        println!();
        const DATE_FMT: &str = "%d-%b-%y %H:%M";
        for id in self.files.children(dir) {
            let r = match self.files.get(id) {
                Some(r) => r,
                None => continue
            };
            let write_protect = match r.access & Access::Write as u8 { 0 => "*", _ => " " };
            let created = r.created.map(|t| t.format(DATE_FMT).to_string()).unwrap_or("<NO DATE>".to_string());
            let modified = r.modified.map(|t| t.format(DATE_FMT).to_string()).unwrap_or("<NO DATE>".to_string());
            println!("{}{:15} {:4} {:6} {:16} {:16} {:7} {:7}",
                write_protect,
                match r.is_dir() { true => r.name.blue().bold(), false => r.name.normal() },
                type_mnemonic(r.file_type),
                r.blocks_used,
                modified,
                created,
                r.data_len,
                r.aux_type
            );
        }
        println!();
        let free = self.map.num_free();
        let used = self.total_blocks as usize - free;
        println!("BLOCKS FREE: {}  BLOCKS USED: {}  TOTAL BLOCKS: {}",free,used,self.total_blocks);
        println!();
        Ok(())
    }
    fn tree(&mut self,include_meta: bool) -> Result<json::JsonValue> {
        let mut tree = json::JsonValue::new_object();
        tree["file_system"] = json::JsonValue::String(FS_NAME.to_string());
        tree["files"] = fs::tree_node(&self.files,self.root,include_meta,&|r: &FileRecord| {
            const DATE_FMT: &str = "%Y/%m/%d %H:%M";
            let mut meta = json::JsonValue::new_object();
            meta["type"] = json::JsonValue::String(hex::encode_upper(vec![r.file_type]));
            meta["aux"] = json::JsonValue::String(hex::encode_upper(u16::to_le_bytes(r.aux_type)));
            meta["eof"] = r.data_len.into();
            if r.kind==StorageKind::Extended {
                meta["rsrc_eof"] = r.rsrc_len.into();
            }
            meta["time_created"] = r.created.map(|t| t.format(DATE_FMT).to_string()).unwrap_or_default().into();
            meta["time_modified"] = r.modified.map(|t| t.format(DATE_FMT).to_string()).unwrap_or_default().into();
            meta["read_only"] = json::JsonValue::Boolean(r.access & Access::Write as u8 == 0);
            meta["system"] = json::JsonValue::Boolean(r.file_type==FileType::System as u8);
            meta["blocks"] = r.blocks_used.into();
            meta
        });
        tree["label"] = json::JsonValue::new_object();
        tree["label"]["name"] = json::JsonValue::String(self.record(self.root)?.name.clone());
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,SectorOrder,dsk_po::PO};

    fn blank(blocks: u32,ctx: &Context) -> Disk {
        let img = Image::from_store(Box::new(PO::create(blocks)),SectorOrder::ProDOS);
        let mut disk = Disk::from_img(img,ctx);
        disk.format("TEST",None).expect("format failed");
        disk
    }

    fn put(disk: &mut Disk,parent: FileId,name: &str,dat: &[u8]) -> FileId {
        let id = disk.create_file(parent,name,&NewFile::file(0x06,0x2000)).expect("create failed");
        let desc = disk.open(id,Fork::Data).expect("open failed");
        disk.write(&desc,dat).expect("write failed");
        disk.close(desc).expect("close failed");
        id
    }

    #[test]
    fn format_and_stat() {
        let mut disk = blank(280,&Context::default());
        let stat = disk.stat().unwrap();
        assert_eq!(stat.label,"TEST");
        assert_eq!(stat.total_units,280);
        assert_eq!(stat.free_units,273);
        assert_eq!(disk.audit(),AuditReport::default());
        assert!(Disk::test_img(disk.img()));
    }

    #[test]
    fn storage_kinds_follow_length() {
        let mut disk = blank(1600,&Context::default());
        let root = disk.root();
        let seed = put(&mut disk,root,"SEED",&[1;100]);
        let sap = put(&mut disk,root,"SAP",&vec![2;3000]);
        let mut big = vec![3;300*BLOCK_SIZE];
        // a hole in the middle
        big[100*BLOCK_SIZE..200*BLOCK_SIZE].fill(0);
        let tree = put(&mut disk,root,"TREE",&big);
        assert_eq!(disk.files().get(seed).unwrap().kind,StorageKind::Seedling);
        assert_eq!(disk.files().get(sap).unwrap().kind,StorageKind::Sapling);
        assert_eq!(disk.files().get(sap).unwrap().blocks_used,7);
        assert_eq!(disk.files().get(tree).unwrap().kind,StorageKind::Tree);
        // 200 data blocks, master, 2 index blocks
        assert_eq!(disk.files().get(tree).unwrap().blocks_used,203);
        let desc = disk.open(tree,Fork::Data).unwrap();
        assert_eq!(disk.read_all(&desc).unwrap(),big);
        assert_eq!(disk.read_at(&desc,100*BLOCK_SIZE as u64 - 2,4).unwrap(),vec![3,3,0,0]);
        disk.close(desc).unwrap();
        assert_eq!(disk.audit(),AuditReport::default());
        // the scan of the written volume agrees
        disk.initialize().unwrap();
        assert_eq!(disk.audit(),AuditReport::default());
        let again = disk.find("TREE").unwrap();
        assert_eq!(disk.files().get(again).unwrap().blocks_used,203);
    }

    #[test]
    fn rewrite_frees_old_blocks() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let free0 = disk.stat().unwrap().free_units;
        let id = put(&mut disk,root,"DATA",&vec![9;10*BLOCK_SIZE]);
        assert_eq!(disk.stat().unwrap().free_units,free0-11);
        let desc = disk.open(id,Fork::Data).unwrap();
        disk.write(&desc,b"short").unwrap();
        assert_eq!(disk.read_all(&desc).unwrap(),b"short".to_vec());
        disk.close(desc).unwrap();
        assert_eq!(disk.stat().unwrap().free_units,free0-1);
        disk.delete_file(id).unwrap();
        assert_eq!(disk.stat().unwrap().free_units,free0);
        assert_eq!(disk.audit(),AuditReport::default());
    }

    #[test]
    fn mixed_case_names() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let id = disk.create_file(root,"My File.TXT",&NewFile::file(0x04,0)).unwrap();
        assert_eq!(disk.files().get(id).unwrap().raw_name,"MY.FILE.TXT");
        assert_eq!(disk.files().get(id).unwrap().name,"My File.TXT");
        disk.initialize().unwrap();
        let id = disk.find("my.file.txt").unwrap();
        assert_eq!(disk.files().get(id).unwrap().name,"My File.TXT");
        assert_eq!(disk.find("MY FILE.TXT").unwrap(),id);
        // the space and the dot store the same bytes
        assert!(matches!(disk.create_file(root,"MY.FILE.TXT",&NewFile::file(0x04,0)),Err(Error::FileExists)));
    }

    #[test]
    fn collisions() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        disk.create_file(root,"A.TXT",&NewFile::file(0x04,0)).unwrap();
        disk.create_file(root,"DIR",&NewFile::directory()).unwrap();
        assert!(matches!(disk.create_file(root,"a.txt",&NewFile::file(0x04,0)),Err(Error::FileExists)));
        assert!(matches!(disk.create_file(root,"dir",&NewFile::file(0x04,0)),Err(Error::DirectoryExists)));
        let ctx = Context { unique_names: true, ..Context::default() };
        let mut disk = blank(280,&ctx);
        let root = disk.root();
        for _i in 0..5 {
            disk.create_file(root,"A.TXT",&NewFile::file(0x04,0)).unwrap();
        }
        let names: Vec<String> = disk.list(root).iter().map(|id| disk.files().get(*id).unwrap().raw_name.clone()).collect();
        assert_eq!(names,vec!["A.TXT","A1.TXT","A2.TXT","A3.TXT","A4.TXT"]);
    }

    #[test]
    fn directories_grow_volume_does_not() {
        let mut disk = blank(800,&Context::default());
        let root = disk.root();
        let sub = disk.create_file(root,"SUB",&NewFile::directory()).unwrap();
        for i in 0..30 {
            disk.create_file(sub,&format!("F{}",i),&NewFile::file(0x06,0)).unwrap();
        }
        // 12 entries in the key block, then 13 per block
        assert_eq!(disk.files().get(sub).unwrap().blocks_used,3);
        assert_eq!(disk.list(sub).len(),30);
        assert!(disk.files().is_well_ordered());
        disk.initialize().unwrap();
        let sub = disk.find("/TEST/SUB").unwrap();
        assert_eq!(disk.list(sub).len(),30);
        assert_eq!(disk.files().get(sub).unwrap().quality(),Quality::Good);
        assert_eq!(disk.audit(),AuditReport::default());
        let root = disk.root();
        // 51 slots in the volume directory, one is taken by SUB
        for i in 0..50 {
            disk.create_file(root,&format!("R{}",i),&NewFile::file(0x06,0)).unwrap();
        }
        assert!(matches!(disk.create_file(root,"ONE.MORE",&NewFile::file(0x06,0)),Err(Error::DirectoryFull)));
    }

    #[test]
    fn non_empty_directory_is_kept() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let sub = disk.create_file(root,"SUB",&NewFile::directory()).unwrap();
        put(&mut disk,sub,"CHILD",b"hello");
        let before = disk.img().to_bytes();
        assert!(matches!(disk.delete_file(sub),Err(Error::DirectoryNotEmpty)));
        assert_eq!(disk.img().to_bytes(),before);
        let child = disk.find("SUB/CHILD").unwrap();
        disk.delete_file(child).unwrap();
        disk.delete_file(sub).unwrap();
        assert_eq!(disk.list(root).len(),0);
        assert_eq!(disk.stat().unwrap().free_units,273);
    }

    #[test]
    fn rename_directory_updates_paths() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let sub = disk.create_file(root,"SUB",&NewFile::directory()).unwrap();
        let child = put(&mut disk,sub,"CHILD",b"hello");
        disk.rename_file(sub,"Renamed").unwrap();
        assert_eq!(disk.files().get(child).unwrap().full_path,"Renamed/CHILD");
        disk.initialize().unwrap();
        let child = disk.find("RENAMED/CHILD").unwrap();
        assert_eq!(disk.files().get(child).unwrap().full_path,"Renamed/CHILD");
    }

    #[test]
    fn descriptors_and_locks() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let id = put(&mut disk,root,"F",b"data");
        let desc = disk.open(id,Fork::Data).unwrap();
        assert!(matches!(disk.open(id,Fork::Data),Err(Error::FileOpen)));
        assert!(matches!(disk.delete_file(id),Err(Error::FileOpen)));
        disk.close(desc).unwrap();
        assert!(matches!(disk.close(desc),Err(Error::FileNotOpen)));
        assert!(matches!(disk.open(id,Fork::Resource),Err(Error::FileNotFound)));
        disk.set_access(id,LOCKED_ACCESS).unwrap();
        assert!(matches!(disk.delete_file(id),Err(Error::AccessDenied)));
        disk.set_access(id,STD_ACCESS).unwrap();
        disk.delete_file(id).unwrap();
    }

    #[test]
    fn forked_files() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let id = disk.create_file(root,"FORKED",&NewFile::forked(0xb3,0)).unwrap();
        let rsrc = disk.open(id,Fork::Resource).unwrap();
        disk.write(&rsrc,&vec![7;2000]).unwrap();
        disk.close(rsrc).unwrap();
        let data = disk.open(id,Fork::Data).unwrap();
        disk.write(&data,b"data fork").unwrap();
        disk.close(data).unwrap();
        disk.initialize().unwrap();
        let id = disk.find("FORKED").unwrap();
        let rec = disk.files().get(id).unwrap();
        assert_eq!((rec.data_len,rec.rsrc_len),(9,2000));
        // key block, one data block, four resource blocks plus index
        assert_eq!(rec.blocks_used,7);
        assert_eq!(disk.audit(),AuditReport::default());
        let rsrc = disk.open(id,Fork::Resource).unwrap();
        assert_eq!(disk.read_all(&rsrc).unwrap(),vec![7;2000]);
        disk.close(rsrc).unwrap();
        disk.delete_file(id).unwrap();
        assert_eq!(disk.stat().unwrap().free_units,273);
    }

    #[test]
    fn damaged_records_do_not_stop_the_scan() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let sap = put(&mut disk,root,"SAP",&vec![1;3000]);
        let seed = put(&mut disk,root,"SEED",b"seedling");
        put(&mut disk,root,"GOOD",b"still fine");
        // second pointer of the index block runs off the volume
        let key = disk.files().get(sap).unwrap().key_block;
        let mut buf = disk.img().read_block(key).unwrap();
        set_index_ptr(&mut buf,1,60000);
        disk.img().write_block(key,&buf).unwrap();
        // key block of the seedling runs off the volume
        disk.update_entry(seed,|e| e.key_ptr = 0xffff).unwrap();
        disk.initialize().unwrap();
        let root = disk.root();
        assert_eq!(disk.list(root).len(),3);
        for name in ["SAP","SEED"] {
            let id = disk.find(name).unwrap();
            assert_eq!(disk.files().get(id).unwrap().quality(),Quality::Damaged);
        }
        let good = disk.find("GOOD").unwrap();
        assert_eq!(disk.files().get(good).unwrap().quality(),Quality::Good);
        let desc = disk.open(good,Fork::Data).unwrap();
        assert_eq!(disk.read_all(&desc).unwrap(),b"still fine".to_vec());
        disk.close(desc).unwrap();
    }

    #[test]
    fn cyclic_chain_damages_directory() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let sub = disk.create_file(root,"SUB",&NewFile::directory()).unwrap();
        for i in 0..20 {
            disk.create_file(sub,&format!("F{}",i),&NewFile::file(0x06,0)).unwrap();
        }
        let key = disk.files().get(sub).unwrap().key_block;
        let buf = disk.img().read_block(key).unwrap();
        let (_,second) = links(&buf);
        // point the last block back at the key block
        let mut buf = disk.img().read_block(second).unwrap();
        let (prev,next) = links(&buf);
        assert_eq!(next,0);
        set_links(&mut buf,prev,key);
        disk.img().write_block(second,&buf).unwrap();
        disk.initialize().unwrap();
        let sub = disk.find("SUB").unwrap();
        let rec = disk.files().get(sub).unwrap();
        assert_eq!(rec.quality(),Quality::Damaged);
        assert!(rec.notes.iter().any(|n| n.contains(&Error::DirectoryLoop.to_string())));
        assert_eq!(disk.list(root).len(),1);
    }

    #[test]
    fn nesting_past_the_limit_is_damage() {
        let mut disk = blank(280,&Context::default());
        disk.create_path("A/B/C").unwrap();
        let mut ctx = Context::default();
        ctx.max_depth = 1;
        let mut shallow = Disk::from_img(disk.img().clone(),&ctx);
        shallow.initialize().unwrap();
        let b = shallow.find("A/B").unwrap();
        assert_eq!(shallow.files().get(b).unwrap().quality(),Quality::Damaged);
        assert!(shallow.find("A/B/C").is_err());
        let a = shallow.find("A").unwrap();
        assert_eq!(shallow.files().get(a).unwrap().quality(),Quality::Good);
    }

    #[test]
    fn cancelled_scan_writes_nothing() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        put(&mut disk,root,"F",b"data");
        let before = disk.img().to_bytes();
        let ctx = Context::default().with_callback(|| false);
        let mut stopped = Disk::from_img(disk.img().clone(),&ctx);
        assert!(matches!(stopped.initialize(),Err(Error::Cancelled)));
        assert_eq!(disk.img().to_bytes(),before);
    }

    #[test]
    fn unmarked_blocks_make_volume_read_only() {
        let mut disk = blank(280,&Context::default());
        let root = disk.root();
        let id = put(&mut disk,root,"F",b"data");
        let key = disk.files().get(id).unwrap().key_block;
        // mark the file's block free behind the engine's back
        let mut bitmap = disk.img().read_block(BITMAP_PTR).unwrap();
        bitmap[key as usize/8] |= 0x80 >> (key%8);
        disk.img().write_block(BITMAP_PTR,&bitmap).unwrap();
        disk.initialize().unwrap();
        let report = disk.audit();
        assert_eq!(report.not_marked,vec![key]);
        let id = disk.find("F").unwrap();
        assert!(matches!(disk.delete_file(id),Err(Error::AccessDenied)));
        assert!(matches!(disk.create_file(root,"G",&NewFile::file(0,0)),Err(Error::AccessDenied)));
        assert!(matches!(disk.put_block(BITMAP_PTR,&[0;BLOCK_SIZE]),Err(Error::AccessDenied)));
    }
}
