// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::DemoOutcome;
use crate::target::Target;
use anyhow::{anyhow, Result};
use regbench_config::parse_size;
use regbench_hal::flash::Flash;

const RECORD: &[u8] = b"regbench flash record\0";

/// Erase the last flash page, program a record into it and read it back.
pub fn flash(target: &mut Target) -> Result<DemoOutcome> {
    let geometry = target
        .chip
        .flash
        .clone()
        .ok_or_else(|| anyhow!("chip '{}' declares no flash array", target.chip.name))?;
    let size = parse_size(&geometry.size)?;
    let page_size = parse_size(&geometry.page_size)?;
    let page = geometry.base + size - page_size;

    let flash = Flash::new(target.base("flash")?).with_policy(target.policy);
    let machine = &mut target.machine;
    flash.unlock(machine)?;
    flash.erase_page(machine, page)?;
    flash.program(machine, page, RECORD)?;
    flash.lock(machine)?;

    let mut readback = vec![0u8; RECORD.len() + 2];
    flash.read(machine, page, &mut readback)?;
    let stored = &readback[..RECORD.len()] == RECORD;
    let erased_after = readback[RECORD.len()..].iter().all(|&b| b == 0xFF);
    let locked = flash.is_locked(machine)?;

    Ok(DemoOutcome::check(
        stored && erased_after && locked,
        format!(
            "{} bytes programmed into the {}-byte page at {:#x}, read back {}",
            RECORD.len(),
            page_size,
            page,
            if stored { "intact" } else { "corrupted" }
        ),
    ))
}
