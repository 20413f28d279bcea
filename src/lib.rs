//! # `a2vfs` main library
//!
//! This library opens retro disk images, discovers the volumes inside them, and manipulates
//! the files on those volumes while keeping the block allocation bookkeeping consistent.
//! The emphasis is on Apple II formats.
//!
//! ## Architecture
//!
//! Disk image operations are built around three layers:
//! * `img::BlockStore` is the transport, an image file held in memory
//! * `img::Image` is a bounded window over a store, windows can be nested and interleaved
//! * `fs::DiskFS` imposes a file system on a window
//!
//! `fs::Volume` ties these together.  Opening a volume probes the window for a sector ordering and
//! a format, and if the format is a container, recursively opens every sub-volume.
//! Changes are made in the in-memory store, and are not permanent until the store is saved.
//!
//! ## File Systems
//!
//! * ProDOS, full read/write
//! * DOS 3.3, read only
//! * HFS, volume information and block usage only
//!
//! ## Containers
//!
//! * CFFA and other equal partition schemes
//! * MicroDrive partition tables
//! * OzDOS and UNIDOS 800K images holding two DOS volumes
//! * volumes embedded past the end of another volume
//!
//! ## Disk Images
//!
//! * 2MG
//! * DSK, DO, PO, HDV

pub mod fs;
pub mod bios;
pub mod img;
pub mod commands;

use std::io::Read;
use std::fmt::Write;
use log::{info,warn};
use img::{BlockStore,SectorOrder};

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const KNOWN_FILE_EXTENSIONS: &str = "2mg,2img,dsk,do,po,hdv";

/// Save the whole store the volume lives in (make changes permanent)
pub fn save_volume(vol: &fs::Volume,img_path: &str) -> STDRESULT {
    vol.flush()?;
    std::fs::write(img_path,vol.to_bytes())?;
    Ok(())
}

/// Given a bytestream return a block store and any ordering the container format declares.
/// Optional `maybe_ext` restricts the image types that will be tried based on file extension.
pub fn create_store_from_bytestream(disk_img_data: &[u8],maybe_ext: Option<&str>) -> Result<(Box<dyn BlockStore>,Option<SectorOrder>),DYNERR> {
    let ext = match maybe_ext {
        Some(x) => x.to_string().to_lowercase(),
        None => "".to_string()
    };
    if img::dot2mg::file_extensions().contains(&ext) || ext=="" {
        if let Some(store) = img::dot2mg::Dot2mg::from_bytes(disk_img_data) {
            info!("identified 2mg image");
            let ordering = store.ordering();
            return Ok((Box::new(store),Some(ordering)));
        }
    }
    if img::dsk_po::file_extensions().contains(&ext) || ext=="" {
        if let Some(store) = img::dsk_po::PO::from_bytes(disk_img_data) {
            info!("possible flat image");
            let hint = match ext.as_str() {
                "po" | "hdv" => Some(SectorOrder::ProDOS),
                "do" => Some(SectorOrder::DOS),
                _ => None
            };
            return Ok((Box::new(store),hint));
        }
        if ext!="" {
            warn!("{} bytes is not a plausible size for a .{} image",disk_img_data.len(),ext);
            return Err(Box::new(img::Error::ImageSizeMismatch));
        }
    }
    warn!("cannot match any image format");
    Err(Box::new(img::Error::ImageTypeMismatch))
}

/// Given a bytestream return the top level volume, or Err if no volume can be found.
pub fn open_volume_from_bytestream(disk_img_data: &[u8],maybe_ext: Option<&str>,ctx: &fs::Context) -> Result<fs::Volume,DYNERR> {
    let (store,hint) = create_store_from_bytestream(disk_img_data,maybe_ext)?;
    let img = img::Image::from_store(store,hint.unwrap_or(SectorOrder::ProDOS));
    match fs::Volume::open(img,hint,None,ctx) {
        Ok(vol) => Ok(vol),
        Err(e) => {
            warn!("cannot match any file system");
            Err(Box::new(e))
        }
    }
}

fn known_ext(img_path: &str) -> Option<&str> {
    match img_path.split('.').last() {
        Some(ext) if img_path.contains('.') && KNOWN_FILE_EXTENSIONS.split(',').any(|k| k==ext.to_lowercase()) => Some(ext),
        _ => None
    }
}

/// Calls `open_volume_from_bytestream` getting the bytes from a file.
/// File extension will be used to restrict image types that are tried,
/// unless the extension is unknown, in which case all will be tried.
pub fn open_volume_from_file(img_path: &str,ctx: &fs::Context) -> Result<fs::Volume,DYNERR> {
    let disk_img_data = std::fs::read(img_path)?;
    open_volume_from_bytestream(&disk_img_data,known_ext(img_path),ctx)
}

/// Calls `open_volume_from_bytestream` getting the bytes from stdin.
pub fn open_volume_from_stdin(ctx: &fs::Context) -> Result<fs::Volume,DYNERR> {
    let mut disk_img_data = Vec::new();
    std::io::stdin().read_to_end(&mut disk_img_data)?;
    open_volume_from_bytestream(&disk_img_data,None,ctx)
}

/// Display binary to stdout in columns of hex, +ascii, and -ascii
pub fn display_block(start_addr: u16,block: &[u8]) {
    let mut slice_start = 0;
    loop {
        let row_label = start_addr as usize + slice_start;
        let slice_end = usize::min(slice_start + 16,block.len());
        let slice = &block[slice_start..slice_end];
        let txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x<32 => '.' as u8,
            x if x<127 => x,
            _ => '.' as u8
        }).collect();
        let neg_txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x>=160 && x<255 => x - 128,
            _ => 46
        }).collect();
        print!("{:04X} : ",row_label);
        for byte in slice {
            print!("{:02X} ",byte);
        }
        for _blank in slice_end..slice_start+16 {
            print!("   ");
        }
        print!("|+| {} ",String::from_utf8_lossy(&txt));
        for _blank in slice_end..slice_start+16 {
            print!(" ");
        }
        println!("|-| {}",String::from_utf8_lossy(&neg_txt));
        slice_start += 16;
        if slice_end==block.len() {
            break;
        }
    }
}

/// This takes any bytes and makes an ascii friendly string
/// by using hex escapes, e.g., `\xFF`.  Printable ascii, including the space, passes through.
/// This is intended for directory strings.
pub fn escaped_ascii_from_bytes(bytes: &[u8]) -> String {
    let mut result = String::new();
    for b in bytes {
        match *b {
            x if x>=0x20 && x<=0x7e => result.push(x as char),
            x => {
                let _ = write!(&mut result,"\\x{:02X}",x);
            }
        }
    }
    result
}

#[test]
fn escapes() {
    assert_eq!(escaped_ascii_from_bytes(b"HELLO"),"HELLO");
    assert_eq!(escaped_ascii_from_bytes(&[0x41,0x00,0xff]),"A\\x00\\xFF");
    assert_eq!(known_ext("disk.PO"),Some("PO"));
    assert_eq!(known_ext("disk.woz"),None);
    assert_eq!(known_ext("po"),None);
}
