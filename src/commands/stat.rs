use clap;
use log::error;
use super::CommandError;
use crate::STDRESULT;

fn print_json(obj: json::JsonValue,cmd: &clap::ArgMatches) {
    let s = match cmd.get_one::<u16>("indent") {
        Some(spaces) => json::stringify_pretty(obj,*spaces),
        None => json::stringify(obj)
    };
    println!("{}",s);
}

/// Volume information for the selected volume and everything inside it
pub fn stat(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut vol = super::open(cmd)?;
    let sel = super::select(&mut vol,cmd)?;
    let obj = sel.to_json()?;
    print_json(obj,cmd);
    Ok(())
}

pub fn catalog(cmd: &clap::ArgMatches) -> STDRESULT {
    let default_path = "/".to_string();
    let path_in_img = cmd.get_one::<String>("file").unwrap_or(&default_path);
    let mut vol = super::open(cmd)?;
    let sel = super::select(&mut vol,cmd)?;
    if sel.fs().is_none() {
        // containers list their sub-volumes instead
        println!();
        println!("{} container",sel.format());
        println!();
        for (i,sub) in sel.sub_volumes().iter().enumerate() {
            let (total,free,unit) = sub.free_space();
            println!("{:2} {:12} {:8} units of {:5} bytes, {:8} free",i,sub.format().to_string(),total,unit,free);
        }
        println!();
        return Ok(());
    }
    match sel.fs_mut() {
        Some(disk) => Ok(disk.catalog_to_stdout(path_in_img)?),
        None => Err(Box::new(CommandError::NoFileSystem))
    }
}

pub fn tree(cmd: &clap::ArgMatches) -> STDRESULT {
    let mut vol = super::open(cmd)?;
    let disk = super::driver(&mut vol,cmd)?;
    let obj = disk.tree(cmd.get_flag("meta"))?;
    print_json(obj,cmd);
    Ok(())
}

/// Print the allocation audit, fails if the report would block mutations
pub fn audit(cmd: &clap::ArgMatches) -> STDRESULT {
    let strict = cmd.get_flag("strict");
    let mut vol = super::open(cmd)?;
    let sel = super::select(&mut vol,cmd)?;
    let report = sel.audit();
    print_json(report.to_json(),cmd);
    if report.is_fatal(strict) {
        error!("{} units not marked, {} conflicts, {} extra",report.not_marked.len(),report.conflicts.len(),report.extra_used.len());
        return Err(Box::new(CommandError::AuditFailed));
    }
    Ok(())
}
