//! ## Volumes
//!
//! A `Volume` is a probed image window together with whatever lives in it: a catalog driver, or
//! a list of sub-volumes if the format is a container.  Sub-volumes are owned by their parent, so
//! dropping the top level volume tears down the whole tree.
//!
//! A container slot that does not probe is kept as a placeholder of format `Unknown`, so that its
//! blocks are still accounted for.  Every volume, placeholder or not, has an `AllocationMap`.

use log::{debug,info,warn};
use crate::img::{self,SectorOrder};
use crate::fs::{self,AllocationMap,AuditReport,Context,DiskFS,Error,Format,Purpose,Result};
use crate::fs::container::{self,Slot,embedded,partitions};
use crate::fs::{dos3x,hfs,prodos,probe};

pub struct Volume {
    img: img::Image,
    format: Format,
    depth: usize,
    fs: Option<Box<dyn DiskFS>>,
    /// block accounting for containers and placeholders, catalog volumes use the driver's map
    map: AllocationMap,
    subs: Vec<Volume>,
    notes: Vec<String>
}

/// Create and initialize the catalog driver for a format
fn catalog(img: img::Image,format: Format,ctx: &Context) -> Result<Box<dyn DiskFS>> {
    let mut disk: Box<dyn DiskFS> = match format {
        Format::ProDOS => Box::new(prodos::Disk::from_img(img,ctx)),
        Format::DOS33 => Box::new(dos3x::Disk::from_img(img,ctx)),
        Format::HFS => Box::new(hfs::Disk::from_img(img,ctx)),
        _ => return Err(Error::Unsupported)
    };
    disk.initialize()?;
    Ok(disk)
}

impl Volume {
    /// Probe the image and open it along with every sub-volume
    pub fn open(img: img::Image,ordering_hint: Option<SectorOrder>,format_hint: Option<Format>,ctx: &Context) -> Result<Self> {
        Self::open_at(img,ordering_hint,format_hint,ctx,0)
    }
    /// Treat the image as `count` equal partitions, each probed on its own
    pub fn with_partitions(img: img::Image,count: u32,ctx: &Context) -> Result<Self> {
        let slots = partitions::equal_slots(&img,count)?;
        Self::assemble(img,Format::CFFA,slots,false,ctx,0)
    }
    /// Volume of unknown format covering the whole window, every block is marked `Embedded`
    pub fn placeholder(img: img::Image,depth: usize,note: &str) -> Self {
        let total = img.total_blocks();
        let mut map = AllocationMap::new(total as usize,img::BLOCK_SIZE);
        map.mark_embedded(0,total);
        Self {
            img,
            format: Format::Unknown,
            depth,
            fs: None,
            map,
            subs: Vec::new(),
            notes: vec![note.to_string()]
        }
    }
    fn open_at(img: img::Image,ordering_hint: Option<SectorOrder>,format_hint: Option<Format>,ctx: &Context,depth: usize) -> Result<Self> {
        ctx.poll()?;
        let (ordering,format) = probe::probe(&img,ordering_hint,format_hint,ctx)?;
        let img = img.with_ordering(ordering);
        if format.is_container() {
            if depth >= ctx.max_container_depth {
                warn!("containers nested deeper than {}",ctx.max_container_depth);
                return Err(Error::DirectoryLoop);
            }
            let slots = container::slots(format,&img)?;
            let both_needed = matches!(format,Format::OzDOS | Format::UNIDOS);
            return Self::assemble(img,format,slots,both_needed,ctx,depth);
        }
        let mut disk = catalog(img.clone(),format,ctx)?;
        let mut ans = Self {
            img: img.clone(),
            format,
            depth,
            fs: None,
            map: AllocationMap::new(0,img::BLOCK_SIZE),
            subs: Vec::new(),
            notes: Vec::new()
        };
        let declared = disk.declared_blocks();
        if ordering==SectorOrder::ProDOS && declared < img.total_blocks() && depth < ctx.max_container_depth {
            debug!("{} blocks past the end of the {} volume",img.total_blocks()-declared,format);
            let per_block = img::BLOCK_SIZE / disk.usage().unit_size();
            for slot in embedded::scan(&img,declared,ctx)? {
                let hint = Some(slot.img.ordering());
                let sub = match Self::open_at(slot.img.clone(),hint,None,ctx,depth+1) {
                    Ok(v) => v,
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        debug!("embedded volume did not open: {}",e);
                        continue;
                    }
                };
                if let Some((start,count)) = slot.region {
                    disk.usage_mut().mark_embedded(start*per_block as u32,count*per_block as u32);
                }
                if let Some(note) = slot.note {
                    ans.notes.push(note);
                }
                ans.subs.push(sub);
            }
        }
        ans.fs = Some(disk);
        Ok(ans)
    }
    /// Open every slot, then account for the container's own blocks
    fn assemble(img: img::Image,format: Format,slots: Vec<Slot>,both_needed: bool,ctx: &Context,depth: usize) -> Result<Self> {
        let total = img.total_blocks();
        let mut map = AllocationMap::new(total as usize,img::BLOCK_SIZE);
        let mut subs = Vec::new();
        let mut notes = Vec::new();
        for slot in slots {
            ctx.poll()?;
            let sub = match Self::open_at(slot.img.clone(),None,None,ctx,depth+1) {
                Ok(v) => v,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if both_needed => {
                    debug!("{} half did not open: {}",format,e);
                    return Err(Error::FormatNotFound);
                },
                Err(e) => {
                    info!("keeping placeholder for {} slot {}: {}",format,subs.len(),e);
                    Self::placeholder(slot.img.clone(),depth+1,&e.to_string())
                }
            };
            if let Some((start,count)) = slot.region {
                map.mark_embedded(start,count);
            }
            if let Some(note) = slot.note {
                notes.push(note);
            }
            subs.push(sub);
        }
        // whatever the slots do not cover belongs to the container itself
        for b in 0..total {
            if !map.usage(b as usize).map_or(true,|u| u.observed) {
                map.note(b,Purpose::System,None);
            }
        }
        info!("{} container with {} sub-volumes",format,subs.len());
        Ok(Self { img, format, depth, fs: None, map, subs, notes })
    }
    pub fn format(&self) -> Format {
        self.format
    }
    pub fn ordering(&self) -> SectorOrder {
        self.img.ordering()
    }
    /// Containers nested above this volume
    pub fn depth(&self) -> usize {
        self.depth
    }
    pub fn img(&self) -> &img::Image {
        &self.img
    }
    pub fn is_container(&self) -> bool {
        self.format.is_container()
    }
    /// Catalog driver, `None` for containers and placeholders
    pub fn fs(&self) -> Option<&dyn DiskFS> {
        self.fs.as_deref()
    }
    pub fn fs_mut(&mut self) -> Option<&mut Box<dyn DiskFS>> {
        self.fs.as_mut()
    }
    pub fn sub_volumes(&self) -> &[Volume] {
        &self.subs
    }
    /// Follow a path of sub-volume indices, an empty path is this volume
    pub fn sub_volume(&self,path: &[usize]) -> Option<&Volume> {
        match path.split_first() {
            None => Some(self),
            Some((i,rest)) => self.subs.get(*i)?.sub_volume(rest)
        }
    }
    pub fn sub_volume_mut(&mut self,path: &[usize]) -> Option<&mut Volume> {
        match path.split_first() {
            None => Some(self),
            Some((i,rest)) => self.subs.get_mut(*i)?.sub_volume_mut(rest)
        }
    }
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
    pub fn usage(&self) -> &AllocationMap {
        match &self.fs {
            Some(disk) => disk.usage(),
            None => &self.map
        }
    }
    /// (total units, free units, unit size)
    pub fn free_space(&self) -> (u64,u64,usize) {
        match &self.fs {
            Some(disk) => disk.free_space(),
            None => (self.map.total() as u64,self.map.num_free() as u64,self.map.unit_size())
        }
    }
    pub fn audit(&mut self) -> AuditReport {
        match &mut self.fs {
            Some(disk) => disk.audit(),
            None => self.map.audit()
        }
    }
    /// Write any buffered data through to the store
    pub fn flush(&self) -> Result<()> {
        Ok(self.img.flush()?)
    }
    /// Flattened image file of the whole store
    pub fn to_bytes(&self) -> Vec<u8> {
        self.img.to_bytes()
    }
    /// Description of this volume and its sub-volumes
    pub fn to_json(&mut self) -> Result<json::JsonValue> {
        let mut ans = json::JsonValue::new_object();
        ans["format"] = json::JsonValue::String(self.format.to_string());
        ans["ordering"] = json::JsonValue::String(self.ordering().to_string());
        ans["blocks"] = self.img.total_blocks().into();
        if let Some(disk) = &mut self.fs {
            ans["stat"] = disk.stat()?.to_json();
        }
        if self.notes.len() > 0 {
            ans["notes"] = json::JsonValue::new_array();
            for note in &self.notes {
                ans["notes"].push(note.as_str()).map_err(|_| fs::internal("notes not an array"))?;
            }
        }
        ans["sub_volumes"] = json::JsonValue::new_array();
        for sub in self.subs.iter_mut() {
            let child = sub.to_json()?;
            ans["sub_volumes"].push(child).map_err(|_| fs::internal("sub_volumes not an array"))?;
        }
        Ok(ans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,dsk_po::PO};

    #[test]
    fn placeholder_accounts_for_everything() {
        let img = Image::from_store(Box::new(PO::create(400)),SectorOrder::ProDOS);
        let mut vol = Volume::placeholder(img,1,"blank");
        assert_eq!(vol.format(),Format::Unknown);
        assert_eq!(vol.usage().usage(399).unwrap().purpose,Purpose::Embedded);
        assert_eq!(vol.audit(),AuditReport::default());
        assert!(vol.fs().is_none());
    }

    #[test]
    fn nested_paths() {
        let img = Image::from_store(Box::new(PO::create(1600)),SectorOrder::ProDOS);
        let vol = Volume::with_partitions(img,4,&Context::default()).unwrap();
        assert_eq!(vol.sub_volumes().len(),4);
        assert_eq!(vol.sub_volume(&[2]).unwrap().format(),Format::Unknown);
        assert!(vol.sub_volume(&[2,0]).is_none());
        assert!(vol.sub_volume(&[]).unwrap().is_container());
    }
}
