//! Offline image validation.

use std::path::Path;

use anyhow::Result;
use console::style;
use flxota::TargetClass;
use serde::Serialize;

use crate::hexfile::HexImage;

#[derive(Serialize)]
struct ClassReport {
    class: TargetClass,
    max_payload: u32,
    fits: bool,
}

#[derive(Serialize)]
struct CheckReport {
    records: usize,
    payload_bytes: u32,
    classes: Vec<ClassReport>,
}

/// Validate an image and report which target classes it fits.
pub fn run(image: &Path, json: bool) -> Result<()> {
    let loaded = HexImage::load(image)?;

    let classes: Vec<ClassReport> = TargetClass::all()
        .iter()
        .map(|class| {
            let layout = class.layout();
            ClassReport {
                class: *class,
                max_payload: layout.max_payload,
                fits: loaded.payload_bytes <= layout.max_payload,
            }
        })
        .collect();

    if json {
        let report = CheckReport {
            records: loaded.records.len(),
            payload_bytes: loaded.payload_bytes,
            classes,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{}: {} records, {} payload bytes",
        image.display(),
        loaded.records.len(),
        loaded.payload_bytes
    );
    for report in &classes {
        let verdict = if report.fits {
            style("fits").green()
        } else {
            style("too large").red()
        };
        println!(
            "  {:<9} (max {:>6} bytes): {verdict}",
            report.class.to_string(),
            report.max_payload
        );
    }
    Ok(())
}
