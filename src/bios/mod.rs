//! # BIOS module
//!
//! This module is a place for any middleware we may require
//! between the `fs` and `img` modules.  At present that is only
//! the sector skew tables.

pub mod skew;
