// test of the read only DOS 3.3 driver through the public volume API
use a2vfs::fs::{dos3x,Context,DiskFS,Error,Format,NewFile,AuditReport};
use a2vfs::img::{Image,SectorOrder,dsk_po::PO};

fn blank_bytes(vol: u8) -> Vec<u8> {
    let img = Image::from_store(Box::new(PO::create(280)),SectorOrder::DOS);
    let mut disk = dos3x::Disk::from_img(img.clone(),&Context::default());
    disk.format(vol,35,16).expect("format failed");
    img.to_bytes()
}

#[test]
fn blank_volume_stat() {
    let bytes = blank_bytes(17);
    let mut vol = a2vfs::open_volume_from_bytestream(&bytes,Some("do"),&Context::default()).unwrap();
    assert_eq!(vol.format(),Format::DOS33);
    assert_eq!(vol.audit(),AuditReport::default());
    let (total,free,unit) = vol.free_space();
    assert_eq!((total,free,unit),(560,528,256));
    let disk = vol.fs_mut().unwrap();
    let stat = disk.stat().unwrap();
    assert_eq!(stat.label,"17");
    assert_eq!(stat.files,0);
    assert!(disk.list(disk.root()).is_empty());
}

#[test]
fn writes_are_unsupported() {
    let bytes = blank_bytes(254);
    let mut vol = a2vfs::open_volume_from_bytestream(&bytes,Some("do"),&Context::default()).unwrap();
    let disk = vol.fs_mut().unwrap();
    let root = disk.root();
    assert!(matches!(disk.create_file(root,"HELLO",&NewFile::file(0x04,0)),Err(Error::Unsupported)));
    assert!(matches!(disk.create_path("SUB"),Err(Error::Unsupported)));
    assert!(disk.find("HELLO").is_err());
}

#[test]
fn tree_of_blank_volume() {
    let bytes = blank_bytes(254);
    let mut vol = a2vfs::open_volume_from_bytestream(&bytes,Some("do"),&Context::default()).unwrap();
    let tree = vol.fs_mut().unwrap().tree(true).unwrap();
    assert_eq!(tree["files"].len(),0);
    let obj = vol.to_json().unwrap();
    assert_eq!(obj["format"],"dos33");
    assert_eq!(obj["ordering"],vol.ordering().to_string().as_str());
}
