// test of format probing, hints, and image wrappers
use a2vfs::fs::{probe,prodos,dos3x,hfs,Context,Format};
use a2vfs::img::{BlockStore,Image,SectorOrder,dsk_po::PO,dot2mg::Dot2mg};

fn prodos_bytes(blocks: u32) -> Vec<u8> {
    let img = Image::from_store(Box::new(PO::create(blocks)),SectorOrder::ProDOS);
    let mut disk = prodos::Disk::from_img(img.clone(),&Context::default());
    disk.format("PROBE",None).unwrap();
    img.to_bytes()
}

fn dos_bytes(blocks: u32,tracks: u8) -> Vec<u8> {
    let img = Image::from_store(Box::new(PO::create(blocks)),SectorOrder::DOS);
    let mut disk = dos3x::Disk::from_img(img.clone(),&Context::default());
    disk.format(254,tracks,16).unwrap();
    img.to_bytes()
}

#[test]
fn probing_is_idempotent_and_read_only() {
    let bytes = prodos_bytes(1600);
    let img = Image::from_store(Box::new(PO::from_bytes(&bytes).unwrap()),SectorOrder::ProDOS);
    let ctx = Context::default();
    let first = probe::probe(&img,None,None,&ctx).unwrap();
    let second = probe::probe(&img,None,None,&ctx).unwrap();
    assert_eq!(first,second);
    assert_eq!(first,(SectorOrder::ProDOS,Format::ProDOS));
    assert_eq!(img.to_bytes(),bytes);
}

#[test]
fn prodos_round_trip() {
    for blocks in [280,1600,65535] {
        let bytes = prodos_bytes(blocks);
        let vol = a2vfs::open_volume_from_bytestream(&bytes,Some("po"),&Context::default()).unwrap();
        assert_eq!((vol.ordering(),vol.format()),(SectorOrder::ProDOS,Format::ProDOS));
    }
}

#[test]
fn dos_round_trip() {
    for (blocks,tracks) in [(280,35),(320,40)] {
        let bytes = dos_bytes(blocks,tracks);
        let vol = a2vfs::open_volume_from_bytestream(&bytes,Some("do"),&Context::default()).unwrap();
        assert_eq!((vol.ordering(),vol.format()),(SectorOrder::DOS,Format::DOS33));
        // without an extension DOS order is tried first for 5.25 inch sizes
        let vol = a2vfs::open_volume_from_bytestream(&bytes,None,&Context::default()).unwrap();
        assert_eq!((vol.ordering(),vol.format()),(SectorOrder::DOS,Format::DOS33));
    }
}

#[test]
fn hfs_round_trip() {
    let img = Image::from_store(Box::new(PO::create(1600)),SectorOrder::ProDOS);
    hfs::write_skeleton(&img,"Probe",1594,40).unwrap();
    let ctx = Context::default();
    assert_eq!(probe::probe(&img,None,None,&ctx).unwrap(),(SectorOrder::ProDOS,Format::HFS));
    let vol = a2vfs::open_volume_from_bytestream(&img.to_bytes(),Some("hdv"),&ctx).unwrap();
    assert_eq!(vol.format(),Format::HFS);
}

#[test]
fn format_hint_goes_first() {
    let bytes = prodos_bytes(280);
    let img = Image::from_store(Box::new(PO::from_bytes(&bytes).unwrap()),SectorOrder::ProDOS);
    let ctx = Context::default();
    // a wrong format hint only costs a failed test
    let found = probe::probe(&img,Some(SectorOrder::ProDOS),Some(Format::DOS33),&ctx).unwrap();
    assert_eq!(found,(SectorOrder::ProDOS,Format::ProDOS));
    let found = probe::probe(&img,Some(SectorOrder::ProDOS),Some(Format::ProDOS),&ctx).unwrap();
    assert_eq!(found,(SectorOrder::ProDOS,Format::ProDOS));
}

#[test]
fn dot2mg_carries_ordering() {
    let img = Image::from_store(Box::new(Dot2mg::create(280,SectorOrder::DOS)),SectorOrder::DOS);
    let mut disk = dos3x::Disk::from_img(img.clone(),&Context::default());
    disk.format(100,35,16).unwrap();
    let bytes = img.to_bytes();
    assert_eq!(&bytes[0..4],b"2IMG");
    let vol = a2vfs::open_volume_from_bytestream(&bytes,Some("2mg"),&Context::default()).unwrap();
    assert_eq!((vol.ordering(),vol.format()),(SectorOrder::DOS,Format::DOS33));
    let (store,hint) = a2vfs::create_store_from_bytestream(&bytes,None).unwrap();
    assert_eq!(hint,Some(SectorOrder::DOS));
    assert_eq!(store.total_blocks(),280);
}

#[test]
fn unknown_bytes_are_rejected() {
    assert!(a2vfs::open_volume_from_bytestream(&vec![0;280*512],Some("po"),&Context::default()).is_err());
    assert!(a2vfs::create_store_from_bytestream(&vec![0;1000],None).is_err());
}

#[test]
fn flat_image_of_odd_size() {
    let err = match a2vfs::create_store_from_bytestream(&vec![0;1000],Some("po")) {
        Ok(_) => panic!("odd sized image was accepted"),
        Err(e) => e
    };
    assert!(matches!(err.downcast_ref::<a2vfs::img::Error>(),Some(a2vfs::img::Error::ImageSizeMismatch)));
    let err = match a2vfs::create_store_from_bytestream(&vec![0;1000],None) {
        Ok(_) => panic!("odd sized image was accepted"),
        Err(e) => e
    };
    assert!(matches!(err.downcast_ref::<a2vfs::img::Error>(),Some(a2vfs::img::Error::ImageTypeMismatch)));
}
