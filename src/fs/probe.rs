//! ## Format probing
//!
//! Decides which sector ordering and which format fit an image window.  The candidates are the
//! cross product of a short list of orderings and a fixed priority list of formats, and the
//! first passing combination wins.  Testers only read, so probing twice gives the same answer
//! and leaves the image untouched.
//!
//! Containers are only tried in ProDOS block order, since their tables and windows are
//! expressed in raw blocks.  For 5.25 inch sizes DOS order comes first: the DOS 3.3 VTOC lands
//! on the same sector in DOS and ProDOS order, so a DOS disk would otherwise be taken as
//! block ordered.

use log::{debug,info};
use crate::img::{self,SectorOrder};
use crate::fs::{Context,Error,Format,Result};
use crate::fs::{container,dos3x,hfs,prodos};

/// Formats in priority order, containers first so their sub-volumes are not mistaken for the whole
pub const FORMATS: [Format;7] = [
    Format::MicroDrive,
    Format::CFFA,
    Format::OzDOS,
    Format::UNIDOS,
    Format::ProDOS,
    Format::DOS33,
    Format::HFS
];

/// Orderings worth trying for a window of this size, in priority order
pub fn orderings(total_blocks: u32) -> Vec<SectorOrder> {
    match total_blocks {
        280 | 320 => vec![SectorOrder::DOS,SectorOrder::ProDOS,SectorOrder::Physical],
        _ => vec![SectorOrder::ProDOS]
    }
}

/// Run one tester against the window, which must already carry the ordering under test
pub fn test(format: Format,img: &img::Image) -> bool {
    match format {
        Format::ProDOS => prodos::Disk::test_img(img),
        Format::DOS33 => dos3x::Disk::test_img(img),
        Format::HFS => hfs::Disk::test_img(img),
        Format::Unknown => false,
        f => container::test_img(f,img)
    }
}

fn allowed(ordering: SectorOrder,format: Format) -> bool {
    format!=Format::Unknown && (!format.is_container() || ordering==SectorOrder::ProDOS)
}

/// Candidate (ordering,format) pairs in the order they will be tried
pub fn candidates(total_blocks: u32,ordering_hint: Option<SectorOrder>,format_hint: Option<Format>) -> Vec<(SectorOrder,Format)> {
    let mut ords = orderings(total_blocks);
    if let Some(o) = ordering_hint {
        ords.retain(|x| *x!=o);
        ords.insert(0,o);
    }
    let mut fmts = FORMATS.to_vec();
    if let Some(f) = format_hint {
        fmts.retain(|x| *x!=f);
        fmts.insert(0,f);
    }
    let mut ans = Vec::new();
    for o in &ords {
        for f in &fmts {
            if allowed(*o,*f) {
                ans.push((*o,*f));
            }
        }
    }
    ans
}

/// Find the first (ordering,format) pair whose tester accepts the window.
/// Only `Cancelled` interrupts the search, every other failure moves on to the next candidate.
pub fn probe(img: &img::Image,ordering_hint: Option<SectorOrder>,format_hint: Option<Format>,ctx: &Context) -> Result<(SectorOrder,Format)> {
    for (ordering,format) in candidates(img.total_blocks(),ordering_hint,format_hint) {
        ctx.poll()?;
        let view = img.with_ordering(ordering);
        if test(format,&view) {
            info!("identified {} in {} order, {} blocks at depth {}",format,ordering,img.total_blocks(),img.depth());
            return Ok((ordering,format));
        }
        debug!("{} in {} order rejected",format,ordering);
    }
    debug!("no format matched {} blocks",img.total_blocks());
    Err(Error::FormatNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{Image,dsk_po::PO};

    #[test]
    fn hints_go_first() {
        let c = candidates(280,Some(SectorOrder::ProDOS),Some(Format::DOS33));
        assert_eq!(c[0],(SectorOrder::ProDOS,Format::DOS33));
        assert_eq!(c[1],(SectorOrder::ProDOS,Format::MicroDrive));
        let c = candidates(280,None,None);
        assert_eq!(c[0],(SectorOrder::DOS,Format::ProDOS));
        assert!(!c.contains(&(SectorOrder::DOS,Format::CFFA)));
        assert_eq!(candidates(1600,None,None).len(),FORMATS.len());
    }

    #[test]
    fn blank_image_not_found() {
        let img = Image::from_store(Box::new(PO::create(280)),SectorOrder::ProDOS);
        assert!(matches!(probe(&img,None,None,&Context::default()),Err(Error::FormatNotFound)));
    }

    #[test]
    fn cancel_stops_probe() {
        let img = Image::from_store(Box::new(PO::create(280)),SectorOrder::ProDOS);
        let ctx = Context::default().with_callback(|| false);
        assert!(matches!(probe(&img,None,None,&ctx),Err(Error::Cancelled)));
    }
}
