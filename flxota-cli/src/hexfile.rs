//! Intel HEX image loading.
//!
//! Reads a `.hex` file into the bare record strings the line protocol
//! carries: the leading `:` is stripped, hex digits are normalized to
//! uppercase, and reading stops at the type-01 end-of-file record (the
//! wire protocol signals EOF with its own control line instead).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use flxota::hex;

/// Record type field of the end-of-file record.
const RECORD_TYPE_EOF: &str = "01";

/// A loaded, pre-validated HEX image.
#[derive(Debug)]
pub struct HexImage {
    /// Bare record strings, in file order.
    pub records: Vec<String>,
    /// Total data bytes across all records.
    pub payload_bytes: u32,
}

impl HexImage {
    /// Load and validate an image file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        let mut records = Vec::new();
        let mut payload_bytes: u32 = 0;
        let mut saw_eof = false;

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let Some(body) = line.strip_prefix(':') else {
                bail!("{}:{}: line does not start with ':'", path.display(), lineno + 1);
            };

            let record = body.to_ascii_uppercase();
            let data_len = hex::validate(record.as_bytes()).map_err(|e| {
                anyhow::anyhow!(
                    "{}:{}: invalid record: {e} (code {})",
                    path.display(),
                    lineno + 1,
                    e.code()
                )
            })?;

            if &record[6..8] == RECORD_TYPE_EOF {
                saw_eof = true;
                break;
            }

            payload_bytes += u32::from(data_len);
            records.push(record);
        }

        if records.is_empty() {
            bail!("{}: no data records found", path.display());
        }
        if !saw_eof {
            bail!("{}: no end-of-file record", path.display());
        }

        Ok(Self {
            records,
            payload_bytes,
        })
    }
}
