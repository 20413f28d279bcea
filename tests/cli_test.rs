use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use assert_cmd::Command; // Run programs
use std::path::Path;

type STDRESULT = Result<(),Box<dyn std::error::Error>>;

fn mkdsk(os: &str,typ: &str,kind: &str,vol: &str,path: &Path) -> STDRESULT {
    Command::cargo_bin("a2vfs")?
        .arg("mkdsk")
        .arg("-o").arg(os)
        .arg("-t").arg(typ)
        .arg("-k").arg(kind)
        .arg("-v").arg(vol)
        .arg("-d").arg(path)
        .assert()
        .success();
    Ok(())
}

#[test]
fn put_get_catalog() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("work.po");
    mkdsk("prodos","po","3.5in","WORK",&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("put").arg("-f").arg("/WORK/SUB/HELLO").arg("-d").arg(&img)
        .write_stdin("hello from the pipeline")
        .assert()
        .success();
    Command::cargo_bin("a2vfs")?
        .arg("get").arg("-f").arg("sub/hello").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout("hello from the pipeline");
    Command::cargo_bin("a2vfs")?
        .arg("catalog").arg("-f").arg("SUB").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("HELLO"));
    Command::cargo_bin("a2vfs")?
        .arg("ls").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("SUB").and(predicate::str::contains("TOTAL BLOCKS: 1600")));
    Ok(())
}

#[test]
fn audit_and_stat() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("check.po");
    mkdsk("prodos","po","5.25in","CHECK",&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("audit").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"not_marked\":[]"));
    Command::cargo_bin("a2vfs")?
        .arg("stat").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"format\":\"prodos\"").and(predicate::str::contains("\"label\":\"CHECK\"")));
    Ok(())
}

#[test]
fn modify_commands() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("edit.po");
    mkdsk("prodos","po","5.25in","EDIT",&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("mkdir").arg("-f").arg("DOCS").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("mkdir").arg("-f").arg("DOCS").arg("-d").arg(&img)
        .assert().failure();
    Command::cargo_bin("a2vfs")?
        .arg("put").arg("-f").arg("DOCS/README").arg("--ftype").arg("txt").arg("-d").arg(&img)
        .write_stdin("read me")
        .assert().success();
    // directory with a child is kept
    Command::cargo_bin("a2vfs")?
        .arg("delete").arg("-f").arg("DOCS").arg("-d").arg(&img)
        .assert().failure();
    Command::cargo_bin("a2vfs")?
        .arg("rename").arg("-f").arg("DOCS/README").arg("-n").arg("NOTES").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("lock").arg("-f").arg("DOCS/NOTES").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("delete").arg("-f").arg("DOCS/NOTES").arg("-d").arg(&img)
        .assert().failure();
    Command::cargo_bin("a2vfs")?
        .arg("unlock").arg("-f").arg("DOCS/NOTES").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("retype").arg("-f").arg("DOCS/NOTES").arg("-t").arg("bin").arg("-a").arg("$2000").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("tree").arg("--meta").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("NOTES").and(predicate::str::contains("\"aux\":\"0020\"")));
    Command::cargo_bin("a2vfs")?
        .arg("del").arg("-f").arg("DOCS/NOTES").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("delete").arg("-f").arg("DOCS").arg("-d").arg(&img)
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("audit").arg("--strict").arg("-d").arg(&img)
        .assert().success();
    Ok(())
}

#[test]
fn read_only_flag() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("ro.po");
    mkdsk("prodos","po","5.25in","RO",&img)?;
    let before = std::fs::read(&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("mkdir").arg("-f").arg("NEW").arg("--read-only").arg("-d").arg(&img)
        .assert().failure();
    assert_eq!(std::fs::read(&img)?,before);
    Ok(())
}

#[test]
fn raw_block_writes_are_guarded() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("blk.po");
    mkdsk("prodos","po","5.25in","BLK",&img)?;
    let before = std::fs::read(&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("put").arg("-t").arg("block").arg("-f").arg("6").arg("--read-only").arg("-d").arg(&img)
        .write_stdin(vec![0u8;512])
        .assert().failure();
    assert_eq!(std::fs::read(&img)?,before);
    Command::cargo_bin("a2vfs")?
        .arg("put").arg("-t").arg("block").arg("-f").arg("100").arg("-d").arg(&img)
        .write_stdin(vec![0xa5u8;512])
        .assert().success();
    let after = std::fs::read(&img)?;
    assert_eq!(&after[100*512..101*512],&[0xa5u8;512][..]);
    Ok(())
}

#[test]
fn dos33_is_read_only() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("dos.do");
    mkdsk("dos33","do","5.25in","254",&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("stat").arg("-d").arg(&img)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"format\":\"dos33\""));
    Command::cargo_bin("a2vfs")?
        .arg("put").arg("-f").arg("HELLO").arg("-d").arg(&img)
        .write_stdin("data")
        .assert().failure();
    Command::cargo_bin("a2vfs")?
        .arg("mkdsk").arg("-o").arg("dos33").arg("-t").arg("po").arg("-d").arg(dir.path().join("bad.po"))
        .assert().failure();
    Ok(())
}

#[test]
fn refuses_overwrite() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("once.po");
    mkdsk("prodos","po","5.25in","ONCE",&img)?;
    Command::cargo_bin("a2vfs")?
        .arg("mkdsk").arg("-o").arg("prodos").arg("-t").arg("po").arg("-d").arg(&img)
        .assert()
        .failure();
    Ok(())
}

#[test]
fn container_sub_volume() -> STDRESULT {
    use a2vfs::fs::{prodos,Context};
    use a2vfs::img::{Image,SectorOrder,dsk_po::PO};
    use a2vfs::fs::container::microdrive;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("md.hdv");
    let img = Image::from_store(Box::new(PO::create(801)),SectorOrder::ProDOS);
    img.write_block(0,&microdrive::table_block(&[(1,400),(401,400)],&[]))?;
    for (start,name) in [(1,"LEFT"),(401,"RIGHT")] {
        let mut disk = prodos::Disk::from_img(img.sub_blocks(start,400)?,&Context::default());
        disk.format(name,None)?;
    }
    std::fs::write(&path,img.to_bytes())?;
    Command::cargo_bin("a2vfs")?
        .arg("catalog").arg("-d").arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("microdrive container"));
    Command::cargo_bin("a2vfs")?
        .arg("put").arg("-s").arg("1").arg("-f").arg("F").arg("-d").arg(&path)
        .write_stdin("in the second partition")
        .assert().success();
    Command::cargo_bin("a2vfs")?
        .arg("get").arg("-s").arg("1").arg("-f").arg("F").arg("-d").arg(&path)
        .assert()
        .success()
        .stdout("in the second partition");
    Command::cargo_bin("a2vfs")?
        .arg("get").arg("-s").arg("0").arg("-f").arg("F").arg("-d").arg(&path)
        .assert().failure();
    Command::cargo_bin("a2vfs")?
        .arg("get").arg("-f").arg("F").arg("-d").arg(&path)
        .assert().failure();
    Ok(())
}
