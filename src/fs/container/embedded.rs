//! ## Trailing embedded volumes
//!
//! Some images carry whole volumes after the end of the file system that owns the image, e.g., a
//! ProDOS volume whose header claims fewer blocks than the image holds, followed by a 140K or 800K
//! volume.  There is no signature, so a few block counts are tried in turn and the first one
//! whose window probes successfully is taken.

use log::{debug,info};
use super::Slot;
use crate::img;
use crate::fs::{probe,Context,Error,Result};

/// Block counts tried for each trailing region: 800K, 160K, 140K
pub const HYPOTHESES: [u32;3] = [1600,320,280];

/// Scan the blocks from `declared` to the end of the window for embedded volumes
pub fn scan(img: &img::Image,declared: u32,ctx: &Context) -> Result<Vec<Slot>> {
    let total = img.total_blocks();
    let mut start = declared;
    let mut ans = Vec::new();
    for _try in 0..total {
        if start >= total {
            break;
        }
        ctx.poll()?;
        let mut found = None;
        for hyp in HYPOTHESES {
            if start + hyp > total {
                continue;
            }
            let window = img.sub_blocks(start,hyp)?;
            match probe::probe(&window,None,None,ctx) {
                Ok((ordering,format)) => {
                    info!("embedded {} volume of {} blocks at block {}",format,hyp,start);
                    found = Some(Slot {
                        img: window.with_ordering(ordering),
                        region: Some((start,hyp)),
                        note: Some(format!("embedded at block {}",start))
                    });
                    break;
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(_) => debug!("no volume of {} blocks at {}",hyp,start)
            }
        }
        match found {
            Some(slot) => {
                start += slot.region.map_or(total,|(_,n)| n);
                ans.push(slot);
            },
            None => break
        }
    }
    Ok(ans)
}
