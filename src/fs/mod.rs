//! # File System Module
//!
//! File system modules handle interactions with directories and files.  There is a sub-module for
//! each supported file system, and a `container` sub-module for the formats that hold other volumes.
//!
//! File systems are represented by the `DiskFS` trait.  The trait object owns an `img::Image` window,
//! which it uses as storage.  Every driver presents its catalog as an `OrderedFileList` and its
//! block bookkeeping as an `AllocationMap`, so callers can audit any format the same way.
//!
//! The tagged `Format` enumeration closes the set of drivers.  Probing, i.e., deciding which driver
//! fits an image, is in `probe`, and the recursive assembly of volumes and sub-volumes is in `volume`.

pub mod usage;
pub mod filelist;
pub mod probe;
pub mod volume;
pub mod prodos;
pub mod dos3x;
pub mod hfs;
pub mod container;

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use log::error;
use crate::img;

pub use filelist::{FileId,FileRecord,OrderedFileList,Quality,StorageKind};
pub use usage::{AllocationMap,AuditReport,Purpose};
pub use volume::Volume;

/// Enumerates file system errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("no file system or container format was recognized")]
    FormatNotFound,
    #[error("structural violation in a directory block")]
    BadDirectory,
    #[error("block pointer out of range")]
    InvalidBlock,
    #[error("directory traversal exceeded its bound")]
    DirectoryLoop,
    #[error("disk full")]
    DiskFull,
    #[error("file exists")]
    FileExists,
    #[error("directory exists")]
    DirectoryExists,
    #[error("could not generate a unique name")]
    NameSpaceExhausted,
    #[error("file is already open")]
    FileOpen,
    #[error("file is not open")]
    FileNotOpen,
    #[error("access denied")]
    AccessDenied,
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal consistency error")]
    Internal,
    #[error("file not found")]
    FileNotFound,
    #[error("invalid name")]
    InvalidName,
    #[error("directory full")]
    DirectoryFull,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("operation not supported by this file system")]
    Unsupported,
    #[error("device error: {0}")]
    Device(img::Error)
}

impl From<img::Error> for Error {
    fn from(e: img::Error) -> Self {
        match e {
            img::Error::OutOfRange => Self::InvalidBlock,
            img::Error::WriteProtected => Self::AccessDenied,
            other => Self::Device(other)
        }
    }
}

pub type Result<T> = std::result::Result<T,Error>;

/// Log and return an internal consistency error
pub(crate) fn internal(msg: &str) -> Error {
    error!("internal: {}",msg);
    Error::Internal
}

/// Closed set of catalog and container formats
#[derive(Clone,Copy,PartialEq,Eq,Debug,Hash)]
pub enum Format {
    ProDOS,
    HFS,
    DOS33,
    CFFA,
    MicroDrive,
    OzDOS,
    UNIDOS,
    Unknown
}

impl Format {
    pub fn is_container(&self) -> bool {
        matches!(self,Self::CFFA | Self::MicroDrive | Self::OzDOS | Self::UNIDOS)
    }
}

impl fmt::Display for Format {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProDOS => "prodos",
            Self::HFS => "hfs",
            Self::DOS33 => "dos33",
            Self::CFFA => "cffa",
            Self::MicroDrive => "microdrive",
            Self::OzDOS => "ozdos",
            Self::UNIDOS => "unidos",
            Self::Unknown => "unknown"
        };
        write!(f,"{}",s)
    }
}

impl FromStr for Format {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self,Self::Err> {
        match s.to_lowercase().as_str() {
            "prodos" => Ok(Self::ProDOS),
            "hfs" => Ok(Self::HFS),
            "dos33" | "dos3.3" => Ok(Self::DOS33),
            "cffa" => Ok(Self::CFFA),
            "microdrive" => Ok(Self::MicroDrive),
            "ozdos" => Ok(Self::OzDOS),
            "unidos" => Ok(Self::UNIDOS),
            _ => Err(Error::FormatNotFound)
        }
    }
}

/// Explicit handle carried into every `Image` and `Volume` constructor, in place of global settings.
#[derive(Clone)]
pub struct Context {
    /// bound on directory nesting during scans
    pub max_depth: usize,
    /// bound on containers nested within containers
    pub max_container_depth: usize,
    /// treat extra-used blocks as an audit failure
    pub strict: bool,
    /// refuse every mutation
    pub read_only: bool,
    /// on a name collision, append a numeric suffix rather than failing
    pub unique_names: bool,
    keep_going: Option<Rc<dyn Fn() -> bool>>
}

impl Default for Context {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_container_depth: 8,
            strict: false,
            read_only: false,
            unique_names: false,
            keep_going: None
        }
    }
}

impl Context {
    /// Install a cooperative "continue?" callback, polled between directory entries and sub-volumes.
    pub fn with_callback(mut self,f: impl Fn() -> bool + 'static) -> Self {
        self.keep_going = Some(Rc::new(f));
        self
    }
    /// Returns `Err(Cancelled)` if the caller asked to stop
    pub fn poll(&self) -> Result<()> {
        match &self.keep_going {
            Some(f) if !f() => Err(Error::Cancelled),
            _ => Ok(())
        }
    }
}

/// Selects a stream of a forked file.  Unforked files only have a data fork.
#[derive(Clone,Copy,PartialEq,Eq,Debug,Hash)]
pub enum Fork {
    Data,
    Resource
}

/// Open descriptor, obtained from `DiskFS::open` and released by `DiskFS::close`
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct Descriptor {
    pub file: FileId,
    pub fork: Fork
}

/// Attributes for a new catalog entry
#[derive(Clone,Debug)]
pub struct NewFile {
    pub kind: StorageKind,
    pub file_type: u8,
    pub aux_type: u16,
    pub access: u8,
    pub created: Option<chrono::NaiveDateTime>,
    pub modified: Option<chrono::NaiveDateTime>
}

impl NewFile {
    /// Ordinary file with the given type, standard access, current time
    pub fn file(file_type: u8,aux_type: u16) -> Self {
        Self {
            kind: StorageKind::Seedling,
            file_type,
            aux_type,
            access: prodos::types::STD_ACCESS,
            created: None,
            modified: None
        }
    }
    /// Forked file with the given type
    pub fn forked(file_type: u8,aux_type: u16) -> Self {
        Self { kind: StorageKind::Extended, ..Self::file(file_type,aux_type) }
    }
    pub fn directory() -> Self {
        Self { kind: StorageKind::Directory, ..Self::file(prodos::types::FileType::Directory as u8,0) }
    }
}

/// Volume statistics, all counts in units of `unit_size` bytes
pub struct Stat {
    pub fs_name: String,
    pub label: String,
    pub unit_size: usize,
    pub total_units: u64,
    pub free_units: u64,
    pub files: usize
}

impl Stat {
    pub fn to_json(&self) -> json::JsonValue {
        let mut ans = json::JsonValue::new_object();
        ans["fs_name"] = json::JsonValue::String(self.fs_name.clone());
        ans["label"] = json::JsonValue::String(self.label.clone());
        ans["unit_size"] = self.unit_size.into();
        ans["total_units"] = self.total_units.into();
        ans["free_units"] = self.free_units.into();
        ans["files"] = self.files.into();
        ans
    }
}

/// Build the nested `files` object of a directory for the JSON tree.
/// Directories get a `files` key, and every node gets `meta` if requested.
pub fn tree_node(files: &OrderedFileList,dir: FileId,include_meta: bool,meta: &dyn Fn(&FileRecord) -> json::JsonValue) -> json::JsonValue {
    let mut ans = json::JsonValue::new_object();
    for id in files.children(dir) {
        if let Some(rec) = files.get(id) {
            let key = rec.name.as_str();
            ans[key] = json::JsonValue::new_object();
            if rec.is_dir() {
                ans[key]["files"] = tree_node(files,id,include_meta,meta);
            }
            if include_meta {
                ans[key]["meta"] = meta(rec);
            }
        }
    }
    ans
}

/// Split a path into its parent path and final component, e.g. `/VOL/DIR/F` gives (`/VOL/DIR`,`F`)
pub fn split_path(path: &str) -> (String,String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => (trimmed[0..pos].to_string(),trimmed[pos+1..].to_string()),
        None => (String::new(),trimmed.to_string())
    }
}

#[test]
fn path_splitting() {
    assert_eq!(split_path("/VOL/DIR/F"),("/VOL/DIR".to_string(),"F".to_string()));
    assert_eq!(split_path("F"),(String::new(),"F".to_string()));
    assert_eq!(split_path("DIR/SUB/"),("DIR".to_string(),"SUB".to_string()));
}

/// Capabilities of a catalog driver.  Formats that cannot perform an operation
/// answer `Error::Unsupported`, which is the default for every mutation.
pub trait DiskFS {
    fn what_am_i(&self) -> Format;
    /// Scan the catalog and build the file list and allocation map.
    fn initialize(&mut self) -> Result<()>;
    fn stat(&mut self) -> Result<Stat>;
    fn files(&self) -> &OrderedFileList;
    /// The root record (volume directory or equivalent)
    fn root(&self) -> FileId;
    fn usage(&self) -> &AllocationMap;
    fn usage_mut(&mut self) -> &mut AllocationMap;
    /// Number of blocks the file system itself claims to manage
    fn declared_blocks(&self) -> u32;
    fn img(&mut self) -> &mut img::Image;
    /// (total units, free units, unit size)
    fn free_space(&self) -> (u64,u64,usize) {
        let map = self.usage();
        (map.total() as u64,map.num_free() as u64,map.unit_size())
    }
    /// Children of a directory record in catalog order
    fn list(&self,parent: FileId) -> Vec<FileId> {
        self.files().children(parent)
    }
    /// Find a record by path, case insensitive
    fn find(&self,path: &str) -> Result<FileId> {
        self.files().find_path(path).ok_or(Error::FileNotFound)
    }
    /// Check allocation consistency; a fatal report leaves the volume read-only.
    fn audit(&mut self) -> AuditReport {
        self.usage().audit()
    }
    fn allocate(&mut self) -> Result<u32> {
        Err(Error::Unsupported)
    }
    /// Overwrite one block of the window, subject to the same checks as any other mutation
    fn put_block(&mut self,_iblock: u32,_dat: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }
    fn create_file(&mut self,_parent: FileId,_name: &str,_attr: &NewFile) -> Result<FileId> {
        Err(Error::Unsupported)
    }
    fn delete_file(&mut self,_file: FileId) -> Result<()> {
        Err(Error::Unsupported)
    }
    fn rename_file(&mut self,_file: FileId,_name: &str) -> Result<()> {
        Err(Error::Unsupported)
    }
    fn set_access(&mut self,_file: FileId,_access: u8) -> Result<()> {
        Err(Error::Unsupported)
    }
    fn retype(&mut self,_file: FileId,_file_type: u8,_aux_type: u16) -> Result<()> {
        Err(Error::Unsupported)
    }
    fn open(&mut self,_file: FileId,_fork: Fork) -> Result<Descriptor> {
        Err(Error::Unsupported)
    }
    fn close(&mut self,_desc: Descriptor) -> Result<()> {
        Err(Error::Unsupported)
    }
    fn read_at(&mut self,_desc: &Descriptor,_offset: u64,_len: usize) -> Result<Vec<u8>> {
        Err(Error::Unsupported)
    }
    /// Replace the whole fork with `dat`
    fn write(&mut self,_desc: &Descriptor,_dat: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }
    /// Length of the fork in bytes
    fn fork_len(&self,desc: &Descriptor) -> Result<u64> {
        let rec = self.files().get(desc.file).ok_or(Error::FileNotFound)?;
        Ok(match desc.fork {
            Fork::Data => rec.data_len,
            Fork::Resource => rec.rsrc_len
        })
    }
    /// Convenience, read a whole fork
    fn read_all(&mut self,desc: &Descriptor) -> Result<Vec<u8>> {
        let len = self.fork_len(desc)?;
        self.read_at(desc,0,len as usize)
    }
    /// Find a directory by path, creating any missing directories along the way
    fn create_path(&mut self,path: &str) -> Result<FileId> {
        let mut curr = self.root();
        let root_name = self.files().get(curr).map(|r| r.raw_name.to_uppercase()).unwrap_or_default();
        let mut nodes: Vec<String> = path.split('/').filter(|s| s.len()>0).map(|s| s.to_string()).collect();
        if path.starts_with('/') && nodes.len()>0 && nodes[0].to_uppercase()==root_name {
            nodes.remove(0);
        }
        for node in nodes {
            curr = match self.files().find_child(curr,&node) {
                Some(id) => match self.files().get(id) {
                    Some(rec) if rec.is_dir() => id,
                    _ => return Err(Error::FileExists)
                },
                None => self.create_file(curr,&node,&NewFile::directory())?
            };
        }
        Ok(curr)
    }
    fn catalog_to_stdout(&mut self,path: &str) -> Result<()>;
    fn tree(&mut self,include_meta: bool) -> Result<json::JsonValue>;
}
