//! # Container module
//!
//! Containers hold other volumes rather than files.  Each container format knows how to carve
//! its image into sub-windows, which `fs::volume` then probes and opens recursively.
//!
//! * `partitions`: fixed count of equal partitions (CFFA, or any N-way split)
//! * `microdrive`: partition table at block 0
//! * `halves`: two 400K DOS 3.3 volumes in one 800K image (OzDOS, UNIDOS)
//! * `embedded`: heuristic scan for volumes trailing past the declared end of a file system

pub mod partitions;
pub mod microdrive;
pub mod halves;
pub mod embedded;

use crate::img;
use crate::fs::{Format,Result,Error};

/// A sub-window carved out by a container
pub struct Slot {
    pub img: img::Image,
    /// `(start,count)` in the container's blocks, used to mark the region `Embedded`.
    /// Interleaved halves share every block, so only the first of them carries a region.
    pub region: Option<(u32,u32)>,
    /// diagnostic, e.g., a partition was clamped
    pub note: Option<String>
}

impl Slot {
    pub fn linear(parent: &img::Image,start: u32,count: u32) -> Result<Self> {
        Ok(Self {
            img: parent.sub_blocks(start,count)?,
            region: Some((start,count)),
            note: None
        })
    }
}

/// Test an image for a container format.  Nothing is written.
pub fn test_img(format: Format,img: &img::Image) -> bool {
    match format {
        Format::CFFA => partitions::test_cffa(img),
        Format::MicroDrive => microdrive::test_img(img),
        Format::OzDOS => halves::test_ozdos(img),
        Format::UNIDOS => halves::test_unidos(img),
        _ => false
    }
}

/// Carve the sub-windows of a container that already passed its test
pub fn slots(format: Format,img: &img::Image) -> Result<Vec<Slot>> {
    match format {
        Format::CFFA => partitions::cffa_slots(img),
        Format::MicroDrive => microdrive::slots(img),
        Format::OzDOS => halves::ozdos_slots(img),
        Format::UNIDOS => halves::unidos_slots(img),
        _ => Err(Error::Unsupported)
    }
}
