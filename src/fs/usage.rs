//! ## Allocation map
//!
//! One free/used bit per allocation unit, as declared by the volume, plus a shadow entry per
//! unit recording what the catalog scan actually observed.  Auditing compares the two.
//!
//! * declared used, not observed: "extra used", benign drift
//! * observed, not declared: "not marked", any write could clobber a file
//! * observed twice: conflict, two records claim the same unit
//!
//! The shadow may extend past the volume's own units to account for embedded regions
//! that live beyond the declared end of the volume.

use bit_vec::BitVec;
use log::{debug,error};
use super::{Error,FileId,Result};

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Purpose {
    System,
    VolumeDir,
    Subdir,
    UserData,
    FileStruct,
    Embedded,
    Conflict,
    Unknown
}

#[derive(Clone,Copy,Debug)]
pub struct Usage {
    pub observed: bool,
    pub declared: bool,
    pub purpose: Purpose,
    pub owner: Option<FileId>
}

impl Default for Usage {
    fn default() -> Self {
        Self {
            observed: false,
            declared: false,
            purpose: Purpose::Unknown,
            owner: None
        }
    }
}

#[derive(Clone,Debug,Default,PartialEq)]
pub struct AuditReport {
    pub extra_used: Vec<u32>,
    pub not_marked: Vec<u32>,
    pub conflicts: Vec<u32>,
    pub out_of_range_bits: usize
}

impl AuditReport {
    /// Should mutation be refused.  Extra-used units only count in strict mode.
    pub fn is_fatal(&self,strict: bool) -> bool {
        self.not_marked.len() > 0 || self.conflicts.len() > 0 || (strict && self.extra_used.len() > 0)
    }
    pub fn to_json(&self) -> json::JsonValue {
        let mut ans = json::JsonValue::new_object();
        ans["extra_used"] = self.extra_used.clone().into();
        ans["not_marked"] = self.not_marked.clone().into();
        ans["conflicts"] = self.conflicts.clone().into();
        ans["out_of_range_bits"] = self.out_of_range_bits.into();
        ans
    }
}

#[derive(Clone)]
pub struct AllocationMap {
    /// true means free, indexed by unit
    free: BitVec,
    /// units that are never handed out, whatever the raw bit says
    reserved: BitVec,
    shadow: Vec<Usage>,
    unit_size: usize,
    out_of_range_bits: usize
}

impl AllocationMap {
    /// Map with every unit declared used and nothing observed
    pub fn new(total: usize,unit_size: usize) -> Self {
        Self {
            free: BitVec::from_elem(total,false),
            reserved: BitVec::from_elem(total,false),
            shadow: vec![Usage { declared: true, ..Usage::default() };total],
            unit_size,
            out_of_range_bits: 0
        }
    }
    /// Load from an on-disk bitmap where a set bit means free, stored MSB first
    pub fn from_msb_bitmap(bytes: &[u8],total: usize,unit_size: usize) -> Self {
        let bits = BitVec::from_bytes(bytes);
        let mut ans = Self::new(total,unit_size);
        for b in 0..total {
            let is_free = bits.get(b).unwrap_or(false);
            ans.free.set(b,is_free);
            ans.shadow[b].declared = !is_free;
        }
        ans.out_of_range_bits = bits.iter().skip(total).filter(|x| *x).count();
        if ans.out_of_range_bits > 0 {
            debug!("{} free bits beyond end of volume",ans.out_of_range_bits);
        }
        ans
    }
    /// Serialize as an MSB first bitmap of `len` bytes, padding is marked used
    pub fn to_msb_bitmap(&self,len: usize) -> Vec<u8> {
        let mut bits = self.free.clone();
        if len*8 > bits.len() {
            bits.grow(len*8 - bits.len(),false);
        }
        let mut ans = bits.to_bytes();
        ans.resize(len,0);
        ans
    }
    /// Units the volume manages
    pub fn total(&self) -> usize {
        self.free.len()
    }
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }
    /// Units covered by the shadow, at least `total`
    pub fn shadow_len(&self) -> usize {
        self.shadow.len()
    }
    pub fn usage(&self,unit: usize) -> Option<&Usage> {
        self.shadow.get(unit)
    }
    pub fn is_free(&self,unit: usize) -> bool {
        self.free.get(unit).unwrap_or(false)
    }
    pub fn num_free(&self) -> usize {
        self.free.iter().zip(self.reserved.iter()).filter(|(f,r)| *f && !*r).count()
    }
    /// Set the declared state directly, e.g. from a DOS VTOC
    pub fn declare(&mut self,unit: usize,used: bool) {
        if unit < self.total() {
            self.free.set(unit,!used);
            self.shadow[unit].declared = used;
        }
    }
    /// Pre-mark a system unit as used, it can never be returned by `allocate`
    pub fn reserve(&mut self,unit: usize) {
        if unit < self.total() {
            self.reserved.set(unit,true);
            self.declare(unit,true);
        }
    }
    /// First fit over free units, scanning from the lowest
    pub fn allocate(&mut self) -> Option<u32> {
        for unit in 0..self.total() {
            if self.free[unit] && !self.reserved[unit] {
                self.declare(unit,true);
                return Some(unit as u32);
            }
        }
        None
    }
    /// Return a unit to the free pool.  Freeing a free or reserved unit is a caller bug.
    pub fn free(&mut self,unit: u32) -> Result<()> {
        let u = unit as usize;
        if u >= self.total() {
            error!("attempt to free unit {} beyond end {}",unit,self.total());
            return Err(Error::InvalidBlock);
        }
        if self.reserved[u] {
            return Err(super::internal(&format!("attempt to free reserved unit {}",unit)));
        }
        if self.free[u] {
            return Err(super::internal(&format!("attempt to free unit {} twice",unit)));
        }
        self.free.set(u,true);
        self.shadow[u] = Usage::default();
        Ok(())
    }
    /// Record that the catalog scan reached `unit` on behalf of `owner`.
    /// Returns false if the unit is out of range or already claimed, the latter is recorded as a conflict.
    pub fn note(&mut self,unit: u32,purpose: Purpose,owner: Option<FileId>) -> bool {
        let u = unit as usize;
        if u >= self.shadow.len() {
            return false;
        }
        if self.shadow[u].observed {
            debug!("unit {} claimed by {:?} and {:?}",unit,self.shadow[u].owner,owner);
            self.shadow[u].purpose = Purpose::Conflict;
            return false;
        }
        self.shadow[u].observed = true;
        self.shadow[u].purpose = purpose;
        self.shadow[u].owner = owner;
        true
    }
    /// Account for a region hosting another volume, the shadow grows if the region runs past the end
    pub fn mark_embedded(&mut self,start: u32,count: u32) {
        let end = start as usize + count as usize;
        if end > self.shadow.len() {
            self.shadow.resize(end,Usage { declared: true, ..Usage::default() });
        }
        for u in start as usize..end {
            self.declare(u,true);
            if self.shadow[u].observed {
                self.shadow[u].purpose = Purpose::Conflict;
            } else {
                self.shadow[u].observed = true;
                self.shadow[u].purpose = Purpose::Embedded;
            }
        }
    }
    /// Forget the results of a previous scan
    pub fn clear_observations(&mut self) {
        for u in self.shadow.iter_mut() {
            u.observed = false;
            u.purpose = Purpose::Unknown;
            u.owner = None;
        }
    }
    pub fn audit(&self) -> AuditReport {
        let mut ans = AuditReport::default();
        for (u,usage) in self.shadow.iter().enumerate() {
            if usage.purpose==Purpose::Conflict {
                ans.conflicts.push(u as u32);
            }
            if u >= self.total() {
                continue;
            }
            let declared = !self.free[u];
            match (declared,usage.observed) {
                (true,false) => ans.extra_used.push(u as u32),
                (false,true) => ans.not_marked.push(u as u32),
                _ => {}
            }
        }
        ans.out_of_range_bits = self.out_of_range_bits;
        ans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_round_trip_msb_first() {
        // blocks 0..7 used, 8..15 free, 16..19 free, rest of byte past the end
        let map = AllocationMap::from_msb_bitmap(&[0x00,0xff,0xf8],20,512);
        assert!(!map.is_free(7));
        assert!(map.is_free(8));
        assert!(map.is_free(19));
        assert_eq!(map.num_free(),12);
        assert_eq!(map.audit().out_of_range_bits,1);
        assert_eq!(map.to_msb_bitmap(3),vec![0x00,0xff,0xf0]);
    }

    #[test]
    fn first_fit_skips_reserved() {
        let mut map = AllocationMap::from_msb_bitmap(&[0xff],8,512);
        map.reserve(0);
        map.reserve(1);
        assert_eq!(map.allocate(),Some(2));
        assert_eq!(map.allocate(),Some(3));
        map.free(2).expect("free failed");
        assert_eq!(map.allocate(),Some(2));
        assert!(matches!(map.free(0),Err(Error::Internal)));
        assert!(matches!(map.free(9),Err(Error::InvalidBlock)));
    }

    #[test]
    fn double_free_is_internal() {
        let mut map = AllocationMap::from_msb_bitmap(&[0x7f],8,512);
        map.free(0).expect("first free failed");
        assert!(matches!(map.free(0),Err(Error::Internal)));
    }

    #[test]
    fn audit_categories() {
        // 0,1 used; 2..7 free
        let mut map = AllocationMap::from_msb_bitmap(&[0x3f],8,512);
        map.note(0,Purpose::System,None);
        map.note(3,Purpose::UserData,Some(1));
        map.note(0,Purpose::UserData,Some(2));
        let report = map.audit();
        assert_eq!(report.extra_used,vec![1]);
        assert_eq!(report.not_marked,vec![3]);
        assert_eq!(report.conflicts,vec![0]);
        assert!(report.is_fatal(false));
    }

    #[test]
    fn embedded_beyond_end() {
        let mut map = AllocationMap::from_msb_bitmap(&[0x00],8,512);
        for u in 0..8 {
            map.note(u,Purpose::UserData,Some(1));
        }
        map.mark_embedded(8,4);
        assert_eq!(map.shadow_len(),12);
        assert_eq!(map.usage(10).unwrap().purpose,Purpose::Embedded);
        assert_eq!(map.audit(),AuditReport::default());
    }
}
