//! ISO-BMFF Segment Index (`sidx`) parsing.
//!
//! A Segment Index box provides a compact index of one media stream within
//! the media segment to which it applies. References index byte sub-ranges
//! of the same resource, so the produced segment references all share the
//! context's URIs and differ only in byte range and time span.

use std::sync::Arc;

use tracing::debug;

use crate::{
    reader::DataReader,
    registry::IndexParseContext,
    segment::SegmentReference,
    HibikiError, HibikiResult,
};

pub fn parse_sidx(
    index_data: &[u8],
    ctx: &IndexParseContext,
) -> HibikiResult<Vec<SegmentReference>> {
    let mut reader = DataReader::new(index_data);

    // The index range may cover sibling boxes; scan for the sidx box.
    let (box_start, box_size) = loop {
        if !reader.has_more() {
            return Err(HibikiError::InvalidIndex(
                "No sidx box in the index range".to_string(),
            ));
        }
        let box_start = reader.position();
        let size32 = reader.read_u32()?;
        let box_type = reader.read_bytes(4)?;
        let box_size = match size32 {
            0 => (index_data.len() - box_start) as u64,
            1 => reader.read_u64()?,
            _ => size32 as u64,
        };
        if box_size < 8 {
            return Err(HibikiError::InvalidIndex(format!(
                "Corrupt box size {box_size}"
            )));
        }
        if box_type == b"sidx" {
            break (box_start, box_size);
        }
        reader.seek(box_start + box_size as usize)?;
    };

    let version = reader.read_u8()?;
    let _flags = reader.read_u24()?;
    let _reference_id = reader.read_u32()?;
    let timescale = reader.read_u32()?;
    if timescale == 0 {
        return Err(HibikiError::InvalidIndex("sidx timescale is zero".to_string()));
    }

    let (earliest_presentation_time, first_offset) = if version == 0 {
        (reader.read_u32()? as u64, reader.read_u32()? as u64)
    } else {
        (reader.read_u64()?, reader.read_u64()?)
    };

    let _reserved = reader.read_u16()?;
    let reference_count = reader.read_u16()?;
    debug!(reference_count, timescale, "Parsing sidx box");

    // The first referenced byte follows the enclosing sidx box.
    let mut offset = ctx.index_start + box_start as u64 + box_size + first_offset;
    let mut unscaled_time = earliest_presentation_time;
    let mut references = Vec::with_capacity(reference_count as usize);

    for _ in 0..reference_count {
        // 1 bit reference_type, 31 bits referenced_size
        let chunk = reader.read_u32()?;
        let reference_type = (chunk >> 31) as u8;
        let referenced_size = (chunk & 0x7FFF_FFFF) as u64;
        let subsegment_duration = reader.read_u32()? as u64;
        // starts_with_sap / sap_type / sap_delta_time are not needed here
        let _sap = reader.read_u32()?;

        if reference_type == 1 {
            return Err(HibikiError::InvalidIndex(
                "Hierarchical sidx is not supported".to_string(),
            ));
        }
        if referenced_size == 0 {
            return Err(HibikiError::InvalidIndex(
                "sidx reference with zero size".to_string(),
            ));
        }

        let start_time = ctx.timestamp_offset + unscaled_time as f64 / timescale as f64;
        let end_time = ctx.timestamp_offset
            + (unscaled_time + subsegment_duration) as f64 / timescale as f64;

        let mut reference = SegmentReference::new(start_time, end_time, Arc::clone(&ctx.uris))?
            .with_byte_range(offset, Some(offset + referenced_size - 1))
            .with_timestamp_offset(ctx.timestamp_offset)
            .with_append_window(ctx.append_window_start, ctx.append_window_end);
        if let Some(init) = &ctx.init {
            reference = reference.with_init(Arc::clone(init));
        }
        references.push(reference);

        offset += referenced_size;
        unscaled_time += subsegment_duration;
    }

    Ok(references)
}
