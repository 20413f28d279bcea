//! # HFS module
//! Only the Master Directory Block and the volume bitmap are interpreted.  This is enough to
//! recognize the volume, report its name and free space, and account for its blocks when it
//! lives inside a container.  The catalog B-tree is not walked, so there are no file operations.

use binrw::{binrw,BinRead,BinWrite};
use std::io::Cursor;
use log::{debug,info,warn};
use crate::img;
use crate::fs::{self,Context,DiskFS,Error,FileId,FileRecord,OrderedFileList,Result,Stat,StorageKind};
use crate::fs::{AllocationMap,Purpose};

pub const FS_NAME: &str = "hfs";
pub const MDB_BLOCK: u32 = 2;
pub const SIGNATURE: u16 = 0x4244;
const BLOCK_SIZE: usize = img::BLOCK_SIZE;
const BITS_PER_BLOCK: usize = 8*BLOCK_SIZE;

/// Master directory block, all fields big endian
#[binrw]
#[brw(big)]
#[derive(Clone,Debug)]
pub struct MasterDirectoryBlock {
    pub sig: u16,
    pub create_date: u32,
    pub mod_date: u32,
    pub attributes: u16,
    pub root_files: u16,
    pub bitmap_start: u16,
    pub alloc_ptr: u16,
    pub alloc_blocks: u16,
    pub alloc_size: u32,
    pub clump_size: u32,
    pub first_alloc: u16,
    pub next_cnid: u32,
    pub free_blocks: u16,
    pub name_len: u8,
    pub name: [u8;27]
}

impl MasterDirectoryBlock {
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        Self::read(&mut Cursor::new(buf)).map_err(|_| Error::BadDirectory)
    }
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut ans = Cursor::new(Vec::new());
        match self.write(&mut ans) {
            Ok(()) => Ok(ans.into_inner()),
            Err(_) => Err(fs::internal("MDB could not be packed"))
        }
    }
    /// 512 byte blocks per allocation block
    fn ratio(&self) -> u32 {
        self.alloc_size / BLOCK_SIZE as u32
    }
    fn bitmap_blocks(&self) -> u32 {
        (self.alloc_blocks as u32 + BITS_PER_BLOCK as u32 - 1) / BITS_PER_BLOCK as u32
    }
    /// Blocks spanned by the volume, including the alternate MDB and the reserved last block
    fn span(&self) -> u32 {
        self.first_alloc as u32 + self.alloc_blocks as u32 * self.ratio() + 2
    }
    pub fn volume_name(&self) -> String {
        let n = usize::min(self.name_len as usize,self.name.len());
        crate::escaped_ascii_from_bytes(&self.name[0..n])
    }
}

/// Seconds since 1904 to a date, HFS stores local time
fn to_date(secs: u32) -> Option<chrono::NaiveDateTime> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1904,1,1)?.and_hms_opt(0,0,0)?;
    match secs {
        0 => None,
        s => epoch.checked_add_signed(chrono::Duration::seconds(s as i64))
    }
}

/// The primary interface for disk operations.
pub struct Disk {
    img: img::Image,
    mdb: Option<MasterDirectoryBlock>,
    map: AllocationMap,
    files: OrderedFileList,
    root: FileId
}

impl Disk {
    /// Use the given image window as storage, call `initialize` before anything else.
    /// HFS volumes are never written, so the context is not kept.
    pub fn from_img(img: img::Image,_ctx: &Context) -> Self {
        Self {
            img,
            mdb: None,
            map: AllocationMap::new(0,BLOCK_SIZE),
            files: OrderedFileList::new(),
            root: 0
        }
    }
    fn read_mdb(img: &img::Image) -> Option<MasterDirectoryBlock> {
        let buf = match img.read_block(MDB_BLOCK) {
            Ok(buf) => buf,
            Err(_) => {
                debug!("MDB block not readable");
                return None;
            }
        };
        let mdb = MasterDirectoryBlock::unpack(&buf).ok()?;
        if mdb.sig!=SIGNATURE {
            debug!("HFS signature not found");
            return None;
        }
        if mdb.name_len<1 || mdb.name_len>27 {
            debug!("HFS name length {}",mdb.name_len);
            return None;
        }
        if mdb.alloc_size==0 || mdb.alloc_size as usize % BLOCK_SIZE > 0 {
            debug!("HFS allocation block size {}",mdb.alloc_size);
            return None;
        }
        if mdb.alloc_blocks==0 || mdb.free_blocks > mdb.alloc_blocks {
            debug!("HFS allocation blocks {}, free {}",mdb.alloc_blocks,mdb.free_blocks);
            return None;
        }
        if (mdb.bitmap_start as u32) <= MDB_BLOCK || mdb.bitmap_start as u32 + mdb.bitmap_blocks() > mdb.first_alloc as u32 {
            debug!("HFS bitmap at {} does not fit before {}",mdb.bitmap_start,mdb.first_alloc);
            return None;
        }
        if mdb.span() > img.total_blocks() {
            debug!("HFS volume of {} blocks exceeds image of {}",mdb.span(),img.total_blocks());
            return None;
        }
        Some(mdb)
    }
    /// Test an image for the HFS file system.  Nothing is written.
    pub fn test_img(img: &img::Image) -> bool {
        Self::read_mdb(img).is_some()
    }
    fn mdb(&self) -> Result<&MasterDirectoryBlock> {
        self.mdb.as_ref().ok_or(Error::BadDirectory)
    }
    /// Bitmap, bit set means the allocation block is used
    fn read_bitmap(&self,mdb: &MasterDirectoryBlock) -> Result<Vec<u8>> {
        let mut ans = Vec::new();
        for i in 0..mdb.bitmap_blocks() {
            ans.append(&mut self.img.read_block(mdb.bitmap_start as u32 + i)?);
        }
        Ok(ans)
    }
    fn alloc_used(bitmap: &[u8],a: usize) -> bool {
        bitmap[a/8] & (0x80 >> (a%8)) > 0
    }
}

impl DiskFS for Disk {
    fn what_am_i(&self) -> fs::Format {
        fs::Format::HFS
    }
    fn initialize(&mut self) -> Result<()> {
        let mdb = Disk::read_mdb(&self.img).ok_or(Error::BadDirectory)?;
        let bitmap = self.read_bitmap(&mdb)?;
        let ratio = mdb.ratio();
        let span = mdb.span();
        self.map = AllocationMap::new(span as usize,BLOCK_SIZE);
        for b in 0..mdb.first_alloc as u32 {
            self.map.note(b,Purpose::System,None);
        }
        let mut free_count = 0;
        for a in 0..mdb.alloc_blocks as usize {
            let used = Disk::alloc_used(&bitmap,a);
            if !used {
                free_count += 1;
            }
            let beg = mdb.first_alloc as u32 + a as u32*ratio;
            for b in beg..beg+ratio {
                self.map.declare(b as usize,used);
                if used {
                    self.map.note(b,Purpose::UserData,None);
                }
            }
        }
        for b in span-2..span {
            self.map.note(b,Purpose::System,None);
        }
        if free_count!=mdb.free_blocks as usize {
            warn!("HFS bitmap has {} free blocks, MDB says {}",free_count,mdb.free_blocks);
        }
        self.files = OrderedFileList::new();
        let mut root = FileRecord::new(&mdb.volume_name(),StorageKind::VolumeHeader);
        root.created = to_date(mdb.create_date);
        root.modified = to_date(mdb.mod_date);
        self.root = self.files.insert_root(root);
        info!("HFS volume {} with {} allocation blocks of {} bytes",mdb.volume_name(),mdb.alloc_blocks,mdb.alloc_size);
        self.mdb = Some(mdb);
        Ok(())
    }
    fn stat(&mut self) -> Result<Stat> {
        let mdb = self.mdb()?;
        let ratio = mdb.ratio() as usize;
        let beg = mdb.first_alloc as usize;
        let free = (0..mdb.alloc_blocks as usize).filter(|a| self.map.is_free(beg + a*ratio)).count();
        Ok(Stat {
            fs_name: FS_NAME.to_string(),
            label: mdb.volume_name(),
            unit_size: mdb.alloc_size as usize,
            total_units: mdb.alloc_blocks as u64,
            free_units: free as u64,
            files: mdb.root_files as usize
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
        match &self.mdb {
            Some(mdb) => mdb.span(),
            None => 0
        }
    }
    fn img(&mut self) -> &mut img::Image {
        &mut self.img
    }
    fn catalog_to_stdout(&mut self,_path: &str) -> Result<()> {
        let stat = self.stat()?;
        println!();
        println!("HFS volume {}",stat.label);
        println!("{} files in the root, the catalog is not listed",stat.files);
        println!();
        println!("{} of {} allocation blocks free, {} bytes each",stat.free_units,stat.total_units,stat.unit_size);
        println!();
        Ok(())
    }
    fn tree(&mut self,_include_meta: bool) -> Result<json::JsonValue> {
        let mut tree = json::JsonValue::new_object();
        tree["file_system"] = json::JsonValue::String(FS_NAME.to_string());
        tree["files"] = json::JsonValue::new_object();
        tree["label"] = json::JsonValue::new_object();
        tree["label"]["name"] = json::JsonValue::String(self.mdb()?.volume_name());
        Ok(tree)
    }
}

/// Write a bare MDB and bitmap, enough to be recognized.  Used to build test images.
pub fn write_skeleton(img: &img::Image,name: &str,alloc_blocks: u16,used: u16) -> Result<()> {
    let mut vn = [0;27];
    let n = usize::min(name.len(),27);
    vn[0..n].copy_from_slice(&name.as_bytes()[0..n]);
    let mdb = MasterDirectoryBlock {
        sig: SIGNATURE,
        create_date: 0,
        mod_date: 0,
        attributes: 0,
        root_files: 0,
        bitmap_start: 3,
        alloc_ptr: used,
        alloc_blocks,
        alloc_size: BLOCK_SIZE as u32,
        clump_size: BLOCK_SIZE as u32*4,
        first_alloc: 3 + ((alloc_blocks as usize + BITS_PER_BLOCK - 1)/BITS_PER_BLOCK) as u16,
        next_cnid: 16,
        free_blocks: alloc_blocks - used,
        name_len: n as u8,
        name: vn
    };
    let mut bitmap = vec![0;mdb.bitmap_blocks() as usize*BLOCK_SIZE];
    for a in 0..used as usize {
        bitmap[a/8] |= 0x80 >> (a%8);
    }
    img.write_block(MDB_BLOCK,&mdb.pack()?)?;
    for (i,chunk) in bitmap.chunks(BLOCK_SIZE).enumerate() {
        img.write_block(mdb.bitmap_start as u32 + i as u32,chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,SectorOrder,dsk_po::PO};
    use crate::fs::AuditReport;

    #[test]
    fn mdb_layout() {
        let img = Image::from_store(Box::new(PO::create(1600)),SectorOrder::ProDOS);
        write_skeleton(&img,"Macintosh HD",1594,20).unwrap();
        let buf = img.read_block(2).unwrap();
        assert_eq!((buf[0],buf[1]),(0x42,0x44));
        assert_eq!(u16::from_be_bytes([buf[18],buf[19]]),1594);
        assert_eq!(u32::from_be_bytes([buf[20],buf[21],buf[22],buf[23]]),512);
        assert_eq!(u16::from_be_bytes([buf[28],buf[29]]),4);
        assert_eq!(u16::from_be_bytes([buf[34],buf[35]]),1574);
        assert_eq!(buf[36],12);
        assert_eq!(&buf[37..49],b"Macintosh HD");
    }

    #[test]
    fn usage_only_map() {
        let img = Image::from_store(Box::new(PO::create(1600)),SectorOrder::ProDOS);
        write_skeleton(&img,"Work",1594,20).unwrap();
        assert!(Disk::test_img(&img));
        let mut disk = Disk::from_img(img,&Context::default());
        disk.initialize().unwrap();
        assert_eq!(disk.declared_blocks(),1600);
        let stat = disk.stat().unwrap();
        assert_eq!((stat.label.as_str(),stat.total_units,stat.free_units),("Work",1594,1574));
        assert_eq!(disk.audit(),AuditReport::default());
        assert_eq!(disk.usage().usage(0).unwrap().purpose,Purpose::System);
        assert_eq!(disk.usage().usage(4).unwrap().purpose,Purpose::UserData);
        assert!(disk.usage().is_free(24));
        assert!(matches!(disk.create_file(0,"X",&fs::NewFile::file(4,0)),Err(Error::Unsupported)));
    }

    #[test]
    fn rejects_bad_block_size() {
        let img = Image::from_store(Box::new(PO::create(1600)),SectorOrder::ProDOS);
        write_skeleton(&img,"Work",1594,20).unwrap();
        let mut buf = img.read_block(2).unwrap();
        buf[22] = 0x03;
        img.write_block(2,&buf).unwrap();
        assert!(!Disk::test_img(&img));
    }
}
