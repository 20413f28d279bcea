// test of container discovery and sub-volume accounting
use a2vfs::fs::{prodos,dos3x,hfs,Context,DiskFS,Format,Fork,NewFile,Purpose,Volume,AuditReport};
use a2vfs::fs::container::microdrive;
use a2vfs::img::{Image,Remap,SectorOrder,dsk_po::PO};

fn store(blocks: u32) -> Image {
    Image::from_store(Box::new(PO::create(blocks)),SectorOrder::ProDOS)
}

fn format_prodos(img: &Image,name: &str) {
    let mut disk = prodos::Disk::from_img(img.clone(),&Context::default());
    disk.format(name,None).expect("format failed");
}

fn format_dos(img: &Image,vol: u8) {
    let mut disk = dos3x::Disk::from_img(img.clone(),&Context::default());
    disk.format(vol,50,32).expect("format failed");
}

#[test]
fn four_partitions_last_blank() {
    let img = store(1600);
    for i in 0..3 {
        format_prodos(&img.sub_blocks(i*400,400).unwrap(),&format!("PART{}",i+1));
    }
    let mut vol = Volume::with_partitions(img,4,&Context::default()).unwrap();
    assert!(vol.is_container());
    let subs = vol.sub_volumes();
    assert_eq!(subs.len(),4);
    for i in 0..3 {
        assert_eq!(subs[i].format(),Format::ProDOS);
    }
    assert_eq!(subs[3].format(),Format::Unknown);
    assert_eq!(subs[3].usage().usage(0).unwrap().purpose,Purpose::Embedded);
    for b in 0..1600 {
        assert_eq!(vol.usage().usage(b).unwrap().purpose,Purpose::Embedded);
    }
    assert_eq!(vol.audit(),AuditReport::default());
    let stat = vol.sub_volume_mut(&[1]).unwrap().fs_mut().unwrap().stat().unwrap();
    assert_eq!(stat.label,"PART2");
}

#[test]
fn partition_writes_stay_inside() {
    let img = store(1600);
    for i in 0..4 {
        format_prodos(&img.sub_blocks(i*400,400).unwrap(),&format!("P{}",i));
    }
    let mut vol = Volume::with_partitions(img,4,&Context::default()).unwrap();
    let disk = vol.sub_volume_mut(&[2]).unwrap().fs_mut().unwrap();
    let root = disk.root();
    let id = disk.create_file(root,"BIG",&NewFile::file(0x06,0)).unwrap();
    let desc = disk.open(id,Fork::Data).unwrap();
    disk.write(&desc,&vec![0x55;100*512]).unwrap();
    disk.close(desc).unwrap();
    // the neighbors still scan clean after reopening the whole image
    let bytes = vol.to_bytes();
    let img = Image::from_store(Box::new(PO::from_bytes(&bytes).unwrap()),SectorOrder::ProDOS);
    let mut vol = Volume::with_partitions(img,4,&Context::default()).unwrap();
    for i in 0..4 {
        let sub = vol.sub_volume_mut(&[i]).unwrap();
        assert_eq!(sub.format(),Format::ProDOS);
        assert_eq!(sub.audit(),AuditReport::default());
    }
    let disk = vol.sub_volume_mut(&[2]).unwrap().fs_mut().unwrap();
    assert!(disk.find("BIG").is_ok());
    assert!(vol.sub_volume_mut(&[3]).unwrap().fs_mut().unwrap().find("BIG").is_err());
}

#[test]
fn microdrive_with_prodos_and_hfs() {
    let img = store(1201);
    img.write_block(0,&microdrive::table_block(&[(1,400)],&[(401,800)])).unwrap();
    format_prodos(&img.sub_blocks(1,400).unwrap(),"MD.ONE");
    // 800 blocks less the MDB area, bitmap, and trailing copy
    hfs::write_skeleton(&img.sub_blocks(401,800).unwrap(),"Mac Side",794,10).unwrap();
    let mut vol = Volume::open(img,None,None,&Context::default()).unwrap();
    assert_eq!(vol.format(),Format::MicroDrive);
    assert_eq!(vol.sub_volumes().len(),2);
    assert_eq!(vol.sub_volume(&[0]).unwrap().format(),Format::ProDOS);
    assert_eq!(vol.sub_volume(&[1]).unwrap().format(),Format::HFS);
    assert_eq!(vol.usage().usage(0).unwrap().purpose,Purpose::System);
    assert_eq!(vol.usage().usage(1).unwrap().purpose,Purpose::Embedded);
    assert_eq!(vol.audit(),AuditReport::default());
    let hfs_vol = vol.sub_volume_mut(&[1]).unwrap();
    assert!(hfs_vol.fs_mut().unwrap().stat().unwrap().label.starts_with("Mac Side"));
    assert_eq!(hfs_vol.audit(),AuditReport::default());
}

#[test]
fn microdrive_clamps_long_partition() {
    let img = store(1000);
    img.write_block(0,&microdrive::table_block(&[(1,400),(401,800)],&[])).unwrap();
    format_prodos(&img.sub_blocks(1,400).unwrap(),"FIRST");
    let vol = Volume::open(img,None,None,&Context::default()).unwrap();
    assert_eq!(vol.format(),Format::MicroDrive);
    assert_eq!(vol.sub_volumes().len(),2);
    assert_eq!(vol.sub_volume(&[1]).unwrap().format(),Format::Unknown);
    assert_eq!(vol.sub_volume(&[1]).unwrap().img().total_blocks(),599);
    assert!(vol.notes().iter().any(|n| n.contains("clamped")));
}

#[test]
fn unidos_halves() {
    let img = store(1600);
    format_dos(&img.sub_blocks(0,800).unwrap(),1);
    format_dos(&img.sub_blocks(800,800).unwrap(),2);
    let mut vol = Volume::open(img,None,None,&Context::default()).unwrap();
    assert_eq!(vol.format(),Format::UNIDOS);
    assert_eq!(vol.sub_volumes().len(),2);
    for sub in vol.sub_volumes() {
        assert_eq!(sub.format(),Format::DOS33);
    }
    assert_eq!(vol.audit(),AuditReport::default());
}

#[test]
fn ozdos_halves() {
    let img = store(1600);
    for phase in 0..2 {
        let half = img.sub_image(Remap::Interleave { start: 0, phase },1600).unwrap();
        format_dos(&half,phase+1);
    }
    let mut vol = Volume::open(img,None,None,&Context::default()).unwrap();
    assert_eq!(vol.format(),Format::OzDOS);
    assert_eq!(vol.sub_volumes().len(),2);
    assert_eq!(vol.sub_volume(&[1]).unwrap().format(),Format::DOS33);
    // both halves share every block, so the container is covered exactly once
    assert_eq!(vol.audit(),AuditReport::default());
}

#[test]
fn ozdos_needs_both_halves() {
    let img = store(1600);
    let half = img.sub_image(Remap::Interleave { start: 0, phase: 0 },1600).unwrap();
    format_dos(&half,1);
    // a lone half is not a container, and no other format claims the image
    assert!(Volume::open(img,None,None,&Context::default()).is_err());
}

#[test]
fn trailing_embedded_volume() {
    let img = store(2000);
    format_prodos(&img.sub_blocks(0,400).unwrap(),"OUTER");
    format_prodos(&img.sub_blocks(400,1600).unwrap(),"INNER");
    let mut vol = Volume::open(img,None,None,&Context::default()).unwrap();
    assert_eq!(vol.format(),Format::ProDOS);
    assert_eq!(vol.sub_volumes().len(),1);
    assert_eq!(vol.sub_volume(&[0]).unwrap().format(),Format::ProDOS);
    assert!(vol.notes().iter().any(|n| n.contains("400")));
    assert_eq!(vol.usage().usage(400).unwrap().purpose,Purpose::Embedded);
    assert_eq!(vol.usage().usage(1999).unwrap().purpose,Purpose::Embedded);
    assert_eq!(vol.audit(),AuditReport::default());
    let inner = vol.sub_volume_mut(&[0]).unwrap().fs_mut().unwrap();
    assert_eq!(inner.stat().unwrap().label,"INNER");
}

#[test]
fn container_json_has_children() {
    let img = store(1600);
    format_prodos(&img.sub_blocks(0,400).unwrap(),"ONLY");
    let mut vol = Volume::with_partitions(img,4,&Context::default()).unwrap();
    let obj = vol.to_json().unwrap();
    assert_eq!(obj["format"],"cffa");
    assert_eq!(obj["sub_volumes"].len(),4);
    assert_eq!(obj["sub_volumes"][0]["format"],"prodos");
    assert_eq!(obj["sub_volumes"][0]["stat"]["label"],"ONLY");
    assert_eq!(obj["sub_volumes"][3]["format"],"unknown");
}
