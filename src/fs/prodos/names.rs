//! ### ProDOS name rules
//!
//! Names are 1 to 15 characters from `A-Z`, `0-9`, and `.`, starting with a letter.
//! Stored names are upper case; lower case is recovered from a 16 bit flag vector where
//! bit 15 means "flags valid" and bit `14-i` means character `i` is lower case.
//! A space is stored as `.` with its flag set, which is how GS/OS shows it.

use log::debug;
use super::types::MAX_NAME_LEN;
use crate::fs::{Error,Result};

/// bound on numeric suffixes tried when making a name unique
pub const MAX_UNIQUE_TRIES: usize = 1000;
/// longest trailing `.XXXX` that truncation tries to keep
const MAX_EXT_LEN: usize = 5;

/// Is this a legal stored name (case insensitive)
pub fn is_legal(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len()==0 || bytes.len() > MAX_NAME_LEN || !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    bytes.iter().all(|c| c.is_ascii_alphanumeric() || *c==b'.')
}

/// Split at the last `.` if what follows is short enough to be an extension.
/// The extension keeps its dot.
fn split_extension(name: &str) -> (&str,&str) {
    match name.rfind('.') {
        Some(pos) if pos>0 && name.len()-pos <= MAX_EXT_LEN => (&name[0..pos],&name[pos..]),
        _ => (name,"")
    }
}

/// Truncate to `max` characters, keeping the extension if there is one
fn truncate(name: &str,max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let (base,ext) = split_extension(name);
    match ext.len() {
        0 => name[0..max].to_string(),
        n => [&base[0..max-n],ext].concat()
    }
}

/// Map an arbitrary host name into the legal alphabet, retaining the caller's casing and spaces.
/// Other illegal characters become `.`, a leading non-letter gets an `A` prefix.
pub fn legalize(name: &str) -> String {
    let mut ans: String = name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c=='.' || c==' ' { c } else { '.' })
        .collect();
    if !ans.starts_with(|c: char| c.is_ascii_alphabetic()) {
        ans.insert(0,'A');
    }
    let ans = truncate(&ans,MAX_NAME_LEN);
    if ans!=name {
        debug!("name `{}` stored as `{}`",name,ans);
    }
    ans
}

/// Bytes that go on disk for a legal name
pub fn stored(legal: &str) -> String {
    legal.to_uppercase().replace(' ',".")
}

/// Lower case flags derived by comparing a legal name with its stored form.
/// An all upper case name without spaces produces 0, so that older systems see nothing unusual.
pub fn case_flags(legal: &str) -> u16 {
    let mut ans = 0;
    for (i,c) in legal.chars().take(MAX_NAME_LEN).enumerate() {
        if c.is_ascii_lowercase() || c==' ' {
            ans |= 0x4000 >> i;
        }
    }
    match ans {
        0 => 0,
        _ => ans | 0x8000
    }
}

/// Apply lower case flags to a stored name
pub fn apply_case(raw: &str,flags: u16) -> String {
    if flags & 0x8000 == 0 {
        return raw.to_string();
    }
    raw.chars().enumerate().map(|(i,c)| match i < MAX_NAME_LEN && flags & (0x4000 >> i) > 0 {
        true if c=='.' => ' ',
        true => c.to_ascii_lowercase(),
        false => c
    }).collect()
}

/// Append a numeric suffix, keeping any extension, until `taken` says the name is free.
/// The first candidate is `name` itself.
pub fn unique_name(name: &str,taken: impl Fn(&str) -> bool) -> Result<String> {
    if !taken(name) {
        return Ok(name.to_string());
    }
    let (base,ext) = split_extension(name);
    for n in 1..MAX_UNIQUE_TRIES {
        let suffix = n.to_string();
        let ext = match ext.len() + suffix.len() < MAX_NAME_LEN { true => ext, false => "" };
        let room = MAX_NAME_LEN - ext.len() - suffix.len();
        let candidate = [&base[0..usize::min(base.len(),room)],&suffix,ext].concat();
        if !taken(&candidate) {
            debug!("unique name `{}` after {} tries",candidate,n);
            return Ok(candidate);
        }
    }
    Err(Error::NameSpaceExhausted)
}
