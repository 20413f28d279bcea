//! ## Ordered file list
//!
//! All the records of a volume are kept in an arena indexed by stable `FileId` handles.
//! Catalog order is an intrusive doubly linked list threaded through the arena, which gives
//! O(1) insertion after a known position without aliasing hazards.
//!
//! Ordering rule: the children of every directory appear contiguously right after the
//! directory's own record, before anything that follows the directory's subtree.
//! Formats that must be written back in on-disk order rely on this.

use chrono::NaiveDateTime;
use log::{debug,warn};

/// Stable handle into the arena, never reused while the list lives
pub type FileId = usize;

/// Health of a record.  Ordered so that `max` gives the worse of two.
#[derive(Clone,Copy,PartialEq,Eq,PartialOrd,Ord,Debug)]
pub enum Quality {
    Good,
    Suspicious,
    Damaged
}

/// Storage strategy of a record
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum StorageKind {
    /// data in the key block
    Seedling,
    /// key block is an index block
    Sapling,
    /// key block is a master index
    Tree,
    /// key block holds two fork descriptors
    Extended,
    /// key block heads a directory chain
    Directory,
    /// the volume directory itself
    VolumeHeader,
    /// DOS style track/sector list chain
    SectorList,
    /// format we only account for, e.g. Pascal area
    Other
}

impl StorageKind {
    pub fn is_dir(&self) -> bool {
        matches!(self,Self::Directory | Self::VolumeHeader)
    }
}

/// One catalog entry, file or directory
#[derive(Clone,Debug)]
pub struct FileRecord {
    /// display name with any case information applied
    pub name: String,
    /// name exactly as stored
    pub raw_name: String,
    pub kind: StorageKind,
    pub file_type: u8,
    pub aux_type: u16,
    pub access: u8,
    pub data_len: u64,
    pub rsrc_len: u64,
    pub key_block: u32,
    pub blocks_used: u32,
    /// lookup only, the list owns every record
    pub parent: Option<FileId>,
    /// materialized path from the root, components joined by `/`, root is empty
    pub full_path: String,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    /// format specific slot address, for ProDOS (block,entry index)
    pub slot: Option<(u32,usize)>,
    quality: Quality,
    pub notes: Vec<String>
}

impl FileRecord {
    pub fn new(name: &str,kind: StorageKind) -> Self {
        Self {
            name: name.to_string(),
            raw_name: name.to_string(),
            kind,
            file_type: 0,
            aux_type: 0,
            access: 0,
            data_len: 0,
            rsrc_len: 0,
            key_block: 0,
            blocks_used: 0,
            parent: None,
            full_path: String::new(),
            created: None,
            modified: None,
            slot: None,
            quality: Quality::Good,
            notes: Vec::new()
        }
    }
    pub fn quality(&self) -> Quality {
        self.quality
    }
    /// Quality can only get worse through this call
    pub fn degrade(&mut self,q: Quality,note: &str) {
        warn!("{}: {}",self.name,note);
        self.quality = self.quality.max(q);
        self.notes.push(note.to_string());
    }
    /// Explicit repair is the only way back to good
    pub fn repair(&mut self) {
        self.quality = Quality::Good;
        self.notes = Vec::new();
    }
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

struct Node {
    rec: FileRecord,
    prev: Option<FileId>,
    next: Option<FileId>
}

/// Arena of `FileRecord` with catalog order
pub struct OrderedFileList {
    arena: Vec<Option<Node>>,
    head: Option<FileId>,
    tail: Option<FileId>,
    count: usize
}

fn join_path(parent: &str,name: &str) -> String {
    match parent.len() {
        0 => name.to_string(),
        _ => [parent,"/",name].concat()
    }
}

impl OrderedFileList {
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            head: None,
            tail: None,
            count: 0
        }
    }
    pub fn len(&self) -> usize {
        self.count
    }
    pub fn is_empty(&self) -> bool {
        self.count==0
    }
    pub fn get(&self,id: FileId) -> Option<&FileRecord> {
        match self.arena.get(id) {
            Some(Some(node)) => Some(&node.rec),
            _ => None
        }
    }
    pub fn get_mut(&mut self,id: FileId) -> Option<&mut FileRecord> {
        match self.arena.get_mut(id) {
            Some(Some(node)) => Some(&mut node.rec),
            _ => None
        }
    }
    pub fn first(&self) -> Option<FileId> {
        self.head
    }
    pub fn next(&self,id: FileId) -> Option<FileId> {
        self.arena.get(id)?.as_ref()?.next
    }
    /// All handles in catalog order
    pub fn ids(&self) -> Vec<FileId> {
        let mut ans = Vec::new();
        let mut curr = self.head;
        while let Some(id) = curr {
            ans.push(id);
            curr = self.next(id);
        }
        ans
    }
    /// Is `id` inside the subtree rooted at `ancestor` (not counting `ancestor` itself)
    pub fn is_descendant(&self,id: FileId,ancestor: FileId) -> bool {
        let mut curr = self.get(id).and_then(|r| r.parent);
        // depth is bounded by the number of records
        for _try in 0..=self.count {
            match curr {
                Some(p) if p==ancestor => return true,
                Some(p) => curr = self.get(p).and_then(|r| r.parent),
                None => return false
            }
        }
        false
    }
    /// Last record of the subtree rooted at `id`, which is `id` itself if there are no descendants
    fn last_descendant(&self,id: FileId) -> FileId {
        let mut last = id;
        while let Some(n) = self.next(last) {
            if !self.is_descendant(n,id) {
                break;
            }
            last = n;
        }
        last
    }
    fn link_after(&mut self,pos: Option<FileId>,mut rec: FileRecord) -> FileId {
        let id = self.arena.len();
        rec.full_path = match rec.parent.and_then(|p| self.get(p)) {
            Some(p) => join_path(&p.full_path,&rec.name),
            None => String::new()
        };
        let next = match pos {
            Some(p) => self.next(p),
            None => self.head
        };
        self.arena.push(Some(Node { rec, prev: pos, next }));
        match pos {
            Some(p) => if let Some(Some(node)) = self.arena.get_mut(p) { node.next = Some(id) },
            None => self.head = Some(id)
        }
        match next {
            Some(n) => if let Some(Some(node)) = self.arena.get_mut(n) { node.prev = Some(id) },
            None => self.tail = Some(id)
        }
        self.count += 1;
        id
    }
    /// Add the root record at the front, it must be the first record added
    pub fn insert_root(&mut self,mut rec: FileRecord) -> FileId {
        rec.parent = None;
        self.link_after(None,rec)
    }
    /// Insert as the last child of `parent`, i.e., right after the parent's current subtree
    pub fn insert_child(&mut self,parent: FileId,mut rec: FileRecord) -> FileId {
        rec.parent = Some(parent);
        let pos = self.last_descendant(parent);
        self.link_after(Some(pos),rec)
    }
    /// Unlink a record that has no children, returns the record
    pub fn remove(&mut self,id: FileId) -> Option<FileRecord> {
        if self.children(id).len() > 0 {
            debug!("refusing to unlink record with children");
            return None;
        }
        let node = self.arena.get_mut(id)?.take()?;
        match node.prev {
            Some(p) => if let Some(Some(pn)) = self.arena.get_mut(p) { pn.next = node.next },
            None => self.head = node.next
        }
        match node.next {
            Some(n) => if let Some(Some(nn)) = self.arena.get_mut(n) { nn.prev = node.prev },
            None => self.tail = node.prev
        }
        self.count -= 1;
        Some(node.rec)
    }
    /// Immediate children in catalog order
    pub fn children(&self,parent: FileId) -> Vec<FileId> {
        let mut ans = Vec::new();
        let mut curr = self.next(parent);
        while let Some(id) = curr {
            if !self.is_descendant(id,parent) {
                break;
            }
            if self.get(id).and_then(|r| r.parent)==Some(parent) {
                ans.push(id);
            }
            curr = self.next(id);
        }
        ans
    }
    /// Case insensitive child lookup by display or raw name
    pub fn find_child(&self,parent: FileId,name: &str) -> Option<FileId> {
        let upper = name.to_uppercase();
        self.children(parent).into_iter().find(|id| match self.get(*id) {
            Some(r) => r.raw_name.to_uppercase()==upper || r.name.to_uppercase()==upper,
            None => false
        })
    }
    /// Resolve a path relative to the root, a leading `/` and the root's own name are optional
    pub fn find_path(&self,path: &str) -> Option<FileId> {
        let root = self.head?;
        let root_name = self.get(root)?.raw_name.to_uppercase();
        let mut nodes: Vec<&str> = path.split('/').filter(|s| s.len()>0).collect();
        if path.starts_with('/') && nodes.len()>0 && nodes[0].to_uppercase()==root_name {
            nodes.remove(0);
        }
        let mut curr = root;
        for node in nodes {
            curr = self.find_child(curr,node)?;
        }
        Some(curr)
    }
    /// Change the display and raw names, every descendant's materialized path is regenerated
    pub fn set_name(&mut self,id: FileId,name: &str,raw_name: &str) {
        let parent_path = match self.get(id).and_then(|r| r.parent).and_then(|p| self.get(p)) {
            Some(p) => Some(p.full_path.clone()),
            None => None
        };
        if let Some(rec) = self.get_mut(id) {
            rec.name = name.to_string();
            rec.raw_name = raw_name.to_string();
            if let Some(pp) = parent_path {
                rec.full_path = join_path(&pp,name);
            }
        }
        let last = self.last_descendant(id);
        if last==id {
            return;
        }
        let mut curr = self.next(id);
        while let Some(d) = curr {
            let parent_path = self.get(d).and_then(|r| r.parent).and_then(|p| self.get(p)).map(|p| p.full_path.clone());
            if let (Some(pp),Some(rec)) = (parent_path,self.get_mut(d)) {
                rec.full_path = join_path(&pp,&rec.name);
            }
            if d==last {
                break;
            }
            curr = self.next(d);
        }
    }
    /// Check the ordering rule over the whole list
    pub fn is_well_ordered(&self) -> bool {
        let ids = self.ids();
        for (i,id) in ids.iter().enumerate() {
            let rec = match self.get(*id) {
                Some(r) => r,
                None => return false
            };
            if let Some(p) = rec.parent {
                // the previous record is either the parent or inside the parent's subtree
                if i==0 || (ids[i-1]!=p && !self.is_descendant(ids[i-1],p)) {
                    return false;
                }
            } else if i>0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str) -> FileRecord {
        FileRecord::new(name,StorageKind::Directory)
    }
    fn file(name: &str) -> FileRecord {
        FileRecord::new(name,StorageKind::Seedling)
    }

    #[test]
    fn children_stay_contiguous() {
        let mut list = OrderedFileList::new();
        let root = list.insert_root(FileRecord::new("VOL",StorageKind::VolumeHeader));
        let a = list.insert_child(root,dir("A"));
        let b = list.insert_child(root,file("B"));
        let a1 = list.insert_child(a,file("A1"));
        let a2 = list.insert_child(a,dir("A2"));
        let a21 = list.insert_child(a2,file("A21"));
        let a3 = list.insert_child(a,file("A3"));
        assert_eq!(list.ids(),vec![root,a,a1,a2,a21,a3,b]);
        assert!(list.is_well_ordered());
        assert_eq!(list.children(a),vec![a1,a2,a3]);
        assert_eq!(list.get(a21).unwrap().full_path,"A/A2/A21");
        assert_eq!(list.find_path("/vol/a/a2/a21"),Some(a21));
        assert_eq!(list.find_path("a/a3"),Some(a3));
        assert_eq!(list.find_path("a/zz"),None);
    }

    #[test]
    fn rename_cascades() {
        let mut list = OrderedFileList::new();
        let root = list.insert_root(FileRecord::new("VOL",StorageKind::VolumeHeader));
        let a = list.insert_child(root,dir("A"));
        let a2 = list.insert_child(a,dir("A2"));
        let a21 = list.insert_child(a2,file("A21"));
        let b = list.insert_child(root,file("B"));
        list.set_name(a,"NEW","NEW");
        assert_eq!(list.get(a2).unwrap().full_path,"NEW/A2");
        assert_eq!(list.get(a21).unwrap().full_path,"NEW/A2/A21");
        assert_eq!(list.get(b).unwrap().full_path,"B");
    }

    #[test]
    fn remove_relinks() {
        let mut list = OrderedFileList::new();
        let root = list.insert_root(FileRecord::new("VOL",StorageKind::VolumeHeader));
        let a = list.insert_child(root,dir("A"));
        let a1 = list.insert_child(a,file("A1"));
        let b = list.insert_child(root,file("B"));
        assert!(list.remove(a).is_none());
        assert!(list.remove(a1).is_some());
        assert_eq!(list.ids(),vec![root,a,b]);
        let c = list.insert_child(a,file("C"));
        assert_eq!(list.ids(),vec![root,a,c,b]);
        assert!(list.is_well_ordered());
        assert_eq!(list.len(),4);
    }

    #[test]
    fn quality_is_monotonic() {
        let mut rec = file("X");
        rec.degrade(Quality::Damaged,"bad pointer");
        rec.degrade(Quality::Suspicious,"odd length");
        assert_eq!(rec.quality(),Quality::Damaged);
        rec.repair();
        assert_eq!(rec.quality(),Quality::Good);
    }
}
