use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::str::FromStr;
use std::collections::HashMap;
use crate::fs::Error;

pub const BLOCK_SIZE: usize = 512;
pub const VOL_KEY_BLOCK: u32 = 2;
/// the volume directory occupies blocks 2 through 5 when formatted
pub const VOL_DIR_BLOCKS: u32 = 4;
pub const BITMAP_PTR: u32 = 6;
pub const STD_ACCESS: u8 = 1+2+32+64+128;
pub const ENTRY_LEN: usize = 0x27;
pub const ENTRIES_PER_BLOCK: usize = 13;
/// index blocks hold 256 pointers, split into low bytes then high bytes
pub const INDEX_PTRS: usize = 256;
/// a master index block only addresses 128 index blocks (16 MB)
pub const MASTER_PTRS: usize = 128;
pub const MAX_NAME_LEN: usize = 15;

/// Map file type codes to strings for display
pub const TYPE_MAP_DISP: [(u8,&str);26] = [
    (0x00, "???"),
    (0x01, "BAD"),
    (0x02, "PCD"), // Pascal code
    (0x03, "PTX"), // Pascal text
    (0x04, "TXT"),
    (0x05, "PDA"), // Pascal data
    (0x06, "BIN"),
    (0x08, "FOT"), // Photo
    (0x0f, "DIR"),
    (0x19, "ADB"), // AppleWorks Data Base
    (0x1a, "AWP"), // AppleWorks Word Processor
    (0x1b, "ASP"), // AppleWorks Spreadsheet
    (0xb3, "S16"), // GS/OS application
    (0xc0, "PNT"), // packed super hi-res
    (0xc1, "PIC"), // super hi-res
    (0xc7, "CDV"), // control panel
    (0xc8, "FNT"),
    (0xe0, "LBR"), // archives, e.g. ShrinkIt
    (0xef, "PAS"), // Pascal area
    (0xf0, "CMD"),
    (0xfa, "INT"),
    (0xfb, "IVR"),
    (0xfc, "BAS"),
    (0xfd, "VAR"),
    (0xfe, "REL"),
    (0xff, "SYS")
];

/// Three letter mnemonic, or `$XX` if there is none
pub fn type_mnemonic(typ: u8) -> String {
    let typ_map: HashMap<u8,&str> = HashMap::from(TYPE_MAP_DISP);
    match typ_map.get(&typ) {
        Some(s) => s.to_string(),
        None => "$".to_string() + &hex::encode_upper(vec![typ])
    }
}

/// Enumerates a subset of ProDOS file types, available conversions are:
/// * Type to u8: `as u8`
/// * u8 to Type: `FromPrimitive::from_u8`
/// * &str to Type: `Type::from_str`, str can be a number, `$` hex, or mnemonic
#[derive(FromPrimitive,Clone,Copy,PartialEq,Debug)]
pub enum FileType {
    None = 0x00,
    Text = 0x04,
    Binary = 0x06,
    Directory = 0x0f,
    Library = 0xe0,
    PascalArea = 0xef,
    IntegerCode = 0xfa,
    IntegerVars = 0xfb,
    ApplesoftCode = 0xfc,
    ApplesoftVars = 0xfd,
    RelocatableCode = 0xfe,
    System = 0xff
}

impl FromStr for FileType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        if let Ok(num) = u8::from_str(s) {
            return FromPrimitive::from_u8(num).ok_or(Error::InvalidName);
        }
        match s.to_lowercase().as_str() {
            "bin" => Ok(Self::Binary),
            "txt" => Ok(Self::Text),
            "dir" => Ok(Self::Directory),
            "lbr" => Ok(Self::Library),
            "atok" | "bas" => Ok(Self::ApplesoftCode),
            "itok" | "int" => Ok(Self::IntegerCode),
            "avar" => Ok(Self::ApplesoftVars),
            "ivar" => Ok(Self::IntegerVars),
            "rel" => Ok(Self::RelocatableCode),
            "sys" => Ok(Self::System),
            _ => Err(Error::InvalidName)
        }
    }
}

/// Parse a file type given as decimal, `$` hex, `0x` hex, or a known mnemonic
pub fn parse_file_type(s: &str) -> Option<u8> {
    if let Some(hex) = s.strip_prefix('$').or(s.strip_prefix("0x")) {
        return u8::from_str_radix(hex,16).ok();
    }
    match FileType::from_str(s) {
        Ok(typ) => Some(typ as u8),
        Err(_) => u8::from_str(s).ok()
    }
}

/// Parse an aux type given as decimal, `$` hex, or `0x` hex
pub fn parse_aux_type(s: &str) -> Option<u16> {
    match s.strip_prefix('$').or(s.strip_prefix("0x")) {
        Some(hex) => u16::from_str_radix(hex,16).ok(),
        None => u16::from_str(s).ok()
    }
}

#[derive(Clone,Copy,FromPrimitive,PartialEq,Eq,Debug)]
pub enum StorageType {
    Inactive = 0x00,
    Seedling = 0x01,
    Sapling = 0x02,
    Tree = 0x03,
    Pascal = 0x04,
    Extended = 0x05,
    SubDirEntry = 0x0d,
    SubDirHeader = 0x0e,
    VolDirHeader = 0x0f
}

impl StorageType {
    /// Decode the high nibble of the storage/length byte, `None` for unassigned codes
    pub fn from_nibs(nibs: u8) -> Option<Self> {
        FromPrimitive::from_u8(nibs >> 4)
    }
    /// Storage type for a fork of the given number of blocks
    pub fn for_blocks(n: usize) -> Self {
        match n {
            0 | 1 => Self::Seedling,
            n if n <= INDEX_PTRS => Self::Sapling,
            _ => Self::Tree
        }
    }
}

#[derive(Clone,Copy,FromPrimitive)]
pub enum Access {
    Read = 0x01,
    Write = 0x02,
    Invisible = 0x04,
    Backup = 0x20,
    Rename = 0x40,
    Destroy = 0x80
}

/// Access byte for a locked file, i.e., only reading and backup are permitted
pub const LOCKED_ACCESS: u8 = Access::Read as u8 | Access::Backup as u8;

/// Convenience for locating an entry in a directory.
/// `idx` mirrors the internal indexing, which starts at 2 in a key block, and 1 in an entry block
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct EntryLocation {
    pub block: u32,
    pub idx: usize
}

impl EntryLocation {
    /// Byte offset of the entry within its block
    pub fn offset(&self) -> usize {
        4 + (self.idx-1)*ENTRY_LEN
    }
}

#[test]
fn type_parsing() {
    assert_eq!(parse_file_type("txt"),Some(0x04));
    assert_eq!(parse_file_type("$C1"),Some(0xc1));
    assert_eq!(parse_file_type("255"),Some(0xff));
    assert_eq!(parse_file_type("zz"),None);
    assert_eq!(parse_aux_type("$2000"),Some(0x2000));
    assert_eq!(type_mnemonic(0x0f),"DIR");
    assert_eq!(type_mnemonic(0x42),"$42");
    assert_eq!(StorageType::for_blocks(257),StorageType::Tree);
}
