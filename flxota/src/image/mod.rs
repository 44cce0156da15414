//! Stored flash image record.
//!
//! A received image is persisted at the base of external flash for the
//! bootloader to pick up after reboot:
//!
//! ```text
//! +----------+-------------+-----+------------------+
//! | FLXIMG:  | length (BE) | ':' |     payload      |
//! +----------+-------------+-----+------------------+
//! | 7 bytes  |  2 or 3 B   | 1 B |  length bytes    |
//! +----------+-------------+-----+------------------+
//! ```
//!
//! The length field is written only when a transfer finalizes; until then
//! it reads erased (`0xFF..`), which is how a partial image is told apart
//! from a complete one.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Result;
use crate::flash::FlashStore;
use crate::target::ImageLayout;

/// Magic tag opening the image record.
pub const IMAGE_TAG: &[u8; 7] = b"FLXIMG:";

/// Offset of the big-endian length field, right after the tag.
pub const LEN_FIELD_OFFSET: u32 = 7;

/// Erase the image block and write the header preamble.
///
/// Writes the tag and the separator but leaves the length field erased, so
/// the record stays detectably incomplete until [`finalize`].
pub fn write_preamble<F: FlashStore>(flash: &mut F, layout: &ImageLayout) -> Result<()> {
    flash.erase_block(0)?;
    flash.write_bytes(0, IMAGE_TAG)?;
    flash.write_byte(layout.separator_offset, b':')?;
    Ok(())
}

/// Record the final payload length, completing the image.
#[allow(clippy::cast_possible_truncation)] // bounded by the class ceiling
pub fn finalize<F: FlashStore>(
    flash: &mut F,
    layout: &ImageLayout,
    payload_len: u32,
) -> Result<()> {
    let mut buf = [0u8; 3];
    let field = &mut buf[..usize::from(layout.len_field_bytes)];
    if layout.len_field_bytes == 3 {
        BigEndian::write_u24(field, payload_len);
    } else {
        BigEndian::write_u16(field, payload_len as u16);
    }
    flash.write_bytes(LEN_FIELD_OFFSET, field)
}

/// Read back the image header.
///
/// Returns the recorded payload length, or `None` when the tag is absent,
/// the separator is wrong, or the length field is unfinalized or out of
/// range for the layout.
pub fn read_payload_len<F: FlashStore>(
    flash: &mut F,
    layout: &ImageLayout,
) -> Result<Option<u32>> {
    let mut tag = [0u8; 7];
    flash.read_bytes(0, &mut tag)?;
    if &tag != IMAGE_TAG {
        return Ok(None);
    }

    let mut sep = [0u8; 1];
    flash.read_bytes(layout.separator_offset, &mut sep)?;
    if sep[0] != b':' {
        return Ok(None);
    }

    let mut buf = [0u8; 3];
    let field = &mut buf[..usize::from(layout.len_field_bytes)];
    flash.read_bytes(LEN_FIELD_OFFSET, field)?;
    let len = if layout.len_field_bytes == 3 {
        BigEndian::read_u24(field)
    } else {
        u32::from(BigEndian::read_u16(field))
    };

    // an erased field decodes past the class ceiling, so one bound covers
    // both "unfinalized" and "corrupt"
    if len > layout.max_payload {
        return Ok(None);
    }
    Ok(Some(len))
}
