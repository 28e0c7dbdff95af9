//! WebM (EBML) segment index parsing.
//!
//! WebM splits the information the engine needs across two blobs: the init
//! segment carries the timecode scale and the total duration, and the Cues
//! element (fetched via `SegmentBase@indexRange`) carries the actual index.
//! Consecutive cue points delimit segment references; the final reference
//! extends to the container duration with an open-ended byte range.

use std::sync::Arc;

use tracing::debug;

use crate::{
    reader::{decode_string, DataReader},
    registry::IndexParseContext,
    segment::SegmentReference,
    HibikiError, HibikiResult,
};

const EBML_HEADER_ID: u64 = 0x1A45DFA3;
const DOC_TYPE_ID: u64 = 0x4282;
const SEGMENT_ID: u64 = 0x18538067;
const INFO_ID: u64 = 0x1549A966;
const TIMECODE_SCALE_ID: u64 = 0x2AD7B1;
const DURATION_ID: u64 = 0x4489;
const CUES_ID: u64 = 0x1C53BB6B;
const CUE_POINT_ID: u64 = 0xBB;
const CUE_TIME_ID: u64 = 0xB3;
const CUE_TRACK_POSITIONS_ID: u64 = 0xB7;
const CUE_CLUSTER_POSITION_ID: u64 = 0xF1;

/// Nanoseconds per timecode unit when the Info element does not say.
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

struct EbmlElement<'a> {
    id: u64,
    data: &'a [u8],
}

impl<'a> EbmlElement<'a> {
    fn children(&self) -> EbmlParser<'a> {
        EbmlParser::new(self.data)
    }

    /// Plain big-endian unsigned integer payload, 1 to 8 bytes.
    fn get_uint(&self) -> HibikiResult<u64> {
        if self.data.is_empty() || self.data.len() > 8 {
            return Err(HibikiError::NumericOverflow("EBML uint"));
        }
        Ok(self.data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }

    fn get_float(&self) -> HibikiResult<f64> {
        match self.data.len() {
            4 => Ok(f32::from_be_bytes(self.data.try_into().unwrap()) as f64),
            8 => Ok(f64::from_be_bytes(self.data.try_into().unwrap())),
            n => Err(HibikiError::InvalidIndex(format!(
                "EBML float with {n} bytes"
            ))),
        }
    }

    fn get_string(&self) -> HibikiResult<String> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.data.len());
        decode_string(&self.data[..end])
    }
}

struct EbmlParser<'a> {
    reader: DataReader<'a>,
    data: &'a [u8],
}

impl<'a> EbmlParser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            reader: DataReader::new(data),
            data,
        }
    }

    fn has_more(&self) -> bool {
        self.reader.has_more()
    }

    fn parse_element(&mut self) -> HibikiResult<EbmlElement<'a>> {
        let id = self.read_id()?;
        let size = self.read_vint()?;
        let data = match size {
            Some(size) => {
                let size = usize::try_from(size)
                    .map_err(|_| HibikiError::NumericOverflow("EBML element size"))?;
                self.reader.read_bytes(size)?
            }
            // dynamic size: the element extends to the end of the buffer
            None => {
                let start = self.reader.position();
                self.reader.seek(self.data.len())?;
                &self.data[start..]
            }
        };
        Ok(EbmlElement { id, data })
    }

    /// Element IDs keep their length-marker bit, per EBML convention.
    fn read_id(&mut self) -> HibikiResult<u64> {
        let first = self.reader.read_u8()?;
        let length = vint_length(first)?;
        if length > 4 {
            return Err(HibikiError::InvalidIndex("EBML id longer than 4 bytes".to_string()));
        }
        let mut value = first as u64;
        for _ in 1..length {
            value = (value << 8) | self.reader.read_u8()? as u64;
        }
        Ok(value)
    }

    /// Variable-size integer with the marker stripped. `None` is the
    /// all-ones "unknown size" encoding.
    fn read_vint(&mut self) -> HibikiResult<Option<u64>> {
        let first = self.reader.read_u8()?;
        let length = vint_length(first)?;
        let mask = 0xFFu32 >> length;
        let mut value = (first as u32 & mask) as u64;
        let mut all_ones = value == mask as u64;
        for _ in 1..length {
            let byte = self.reader.read_u8()?;
            all_ones = all_ones && byte == 0xFF;
            value = (value << 8) | byte as u64;
        }
        Ok(if all_ones { None } else { Some(value) })
    }
}

fn vint_length(first_byte: u8) -> HibikiResult<u32> {
    if first_byte == 0 {
        return Err(HibikiError::InvalidIndex("EBML vint longer than 8 bytes".to_string()));
    }
    Ok(first_byte.leading_zeros() + 1)
}

pub fn parse_cues(
    init_data: &[u8],
    index_data: &[u8],
    ctx: &IndexParseContext,
) -> HibikiResult<Vec<SegmentReference>> {
    let (timecode_scale, duration_units) = parse_init_segment(init_data)?;
    let seconds_per_unit = timecode_scale as f64 / 1e9;
    let duration_seconds = duration_units * seconds_per_unit;

    let mut parser = EbmlParser::new(index_data);
    let cues = parser.parse_element()?;
    if cues.id != CUES_ID {
        return Err(HibikiError::InvalidIndex("Cues element not found".to_string()));
    }

    let mut cue_points = Vec::new();
    let mut children = cues.children();
    while children.has_more() {
        let child = children.parse_element()?;
        if child.id == CUE_POINT_ID {
            if let Some(point) = parse_cue_point(&child)? {
                cue_points.push(point);
            }
        }
    }
    if cue_points.is_empty() {
        return Err(HibikiError::InvalidIndex("Cues element has no cue points".to_string()));
    }
    debug!(cue_points = cue_points.len(), "Parsed WebM cues");

    let mut references = Vec::with_capacity(cue_points.len());
    for (i, (unscaled_time, offset)) in cue_points.iter().enumerate() {
        let start_time = ctx.timestamp_offset + *unscaled_time as f64 * seconds_per_unit;
        let (end_time, end_byte) = match cue_points.get(i + 1) {
            Some((next_time, next_offset)) => (
                ctx.timestamp_offset + *next_time as f64 * seconds_per_unit,
                Some(next_offset.saturating_sub(1)),
            ),
            None => (ctx.timestamp_offset + duration_seconds, None),
        };

        let mut reference = SegmentReference::new(start_time, end_time, Arc::clone(&ctx.uris))?
            .with_byte_range(*offset, end_byte)
            .with_timestamp_offset(ctx.timestamp_offset)
            .with_append_window(ctx.append_window_start, ctx.append_window_end);
        if let Some(init) = &ctx.init {
            reference = reference.with_init(Arc::clone(init));
        }
        references.push(reference);
    }

    Ok(references)
}

/// Read `TimecodeScale` and `Duration` out of the init segment. The EBML
/// header is validated (and its DocType checked) but otherwise skipped.
fn parse_init_segment(init_data: &[u8]) -> HibikiResult<(u64, f64)> {
    let mut parser = EbmlParser::new(init_data);

    let header = parser.parse_element()?;
    if header.id != EBML_HEADER_ID {
        return Err(HibikiError::InvalidIndex("EBML header not found".to_string()));
    }
    let mut header_children = header.children();
    while header_children.has_more() {
        let child = header_children.parse_element()?;
        if child.id == DOC_TYPE_ID {
            let doc_type = child.get_string()?;
            if doc_type != "webm" && doc_type != "matroska" {
                return Err(HibikiError::UnsupportedContainer(doc_type));
            }
        }
    }

    let segment = parser.parse_element()?;
    if segment.id != SEGMENT_ID {
        return Err(HibikiError::InvalidIndex("Segment element not found".to_string()));
    }

    let mut info = None;
    let mut segment_children = segment.children();
    while segment_children.has_more() {
        let child = segment_children.parse_element()?;
        if child.id == INFO_ID {
            info = Some(child);
            break;
        }
    }
    let info = info
        .ok_or_else(|| HibikiError::InvalidIndex("Info element not found".to_string()))?;

    let mut timecode_scale = DEFAULT_TIMECODE_SCALE;
    let mut duration = None;
    let mut info_children = info.children();
    while info_children.has_more() {
        let child = info_children.parse_element()?;
        match child.id {
            TIMECODE_SCALE_ID => timecode_scale = child.get_uint()?,
            DURATION_ID => duration = Some(child.get_float()?),
            _ => {}
        }
    }

    let duration = duration.ok_or_else(|| {
        HibikiError::InvalidIndex("WebM Info element is missing Duration".to_string())
    })?;
    Ok((timecode_scale, duration))
}

/// A cue point pairs an unscaled time with the cluster's byte offset. Only
/// the first `CueClusterPosition` under `CueTrackPositions` matters.
fn parse_cue_point(cue_point: &EbmlElement) -> HibikiResult<Option<(u64, u64)>> {
    let mut time = None;
    let mut offset = None;

    let mut children = cue_point.children();
    while children.has_more() {
        let child = children.parse_element()?;
        match child.id {
            CUE_TIME_ID => time = Some(child.get_uint()?),
            CUE_TRACK_POSITIONS_ID if offset.is_none() => {
                let mut positions = child.children();
                while positions.has_more() {
                    let position = positions.parse_element()?;
                    if position.id == CUE_CLUSTER_POSITION_ID {
                        offset = Some(position.get_uint()?);
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(time.zip(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::static_uris;
    use url::Url;

    fn element(id: &[u8], payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() < 127);
        let mut data = id.to_vec();
        data.push(0x80 | payload.len() as u8);
        data.extend_from_slice(payload);
        data
    }

    fn uint_element(id: &[u8], value: u64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
        element(id, &bytes[start..])
    }

    fn init_bytes(timecode_scale: u64, duration_units: f32) -> Vec<u8> {
        let header = element(&[0x1A, 0x45, 0xDF, 0xA3], &element(&[0x42, 0x82], b"webm"));

        let mut info_payload = uint_element(&[0x2A, 0xD7, 0xB1], timecode_scale);
        info_payload.extend_from_slice(&element(&[0x44, 0x89], &duration_units.to_be_bytes()));
        let info = element(&[0x15, 0x49, 0xA9, 0x66], &info_payload);
        let segment = element(&[0x18, 0x53, 0x80, 0x67], &info);

        let mut data = header;
        data.extend_from_slice(&segment);
        data
    }

    fn cues_bytes(points: &[(u64, u64)]) -> Vec<u8> {
        let mut payload = Vec::new();
        for &(time, offset) in points {
            let mut cue = uint_element(&[0xB3], time);
            let positions = uint_element(&[0xF1], offset);
            cue.extend_from_slice(&element(&[0xB7], &positions));
            payload.extend_from_slice(&element(&[0xBB], &cue));
        }
        element(&[0x1C, 0x53, 0xBB, 0x6B], &payload)
    }

    fn context() -> IndexParseContext {
        IndexParseContext {
            index_start: 0,
            uris: static_uris(vec![Url::parse("https://example.com/video.webm").unwrap()]),
            init: None,
            timestamp_offset: 0.0,
            append_window_start: 0.0,
            append_window_end: f64::INFINITY,
        }
    }

    #[test]
    fn test_two_cue_points() {
        // TimecodeScale 1ms/unit, Duration 2000 units = 2s
        let init = init_bytes(1_000_000, 2000.0);
        let cues = cues_bytes(&[(0, 100), (1000, 500)]);
        let references = parse_cues(&init, &cues, &context()).unwrap();

        assert_eq!(references.len(), 2);
        assert_eq!(references[0].start_time, 0.0);
        assert_eq!(references[0].end_time, 1.0);
        assert_eq!(references[0].start_byte, 100);
        assert_eq!(references[0].end_byte, Some(499));

        assert_eq!(references[1].start_time, 1.0);
        assert_eq!(references[1].end_time, 2.0);
        assert_eq!(references[1].start_byte, 500);
        assert_eq!(references[1].end_byte, None);
    }

    #[test]
    fn test_default_timecode_scale() {
        // no TimecodeScale element: default is 1,000,000 ns
        let header = element(&[0x1A, 0x45, 0xDF, 0xA3], &element(&[0x42, 0x82], b"webm"));
        let info = element(
            &[0x15, 0x49, 0xA9, 0x66],
            &element(&[0x44, 0x89], &4000.0f32.to_be_bytes()),
        );
        let segment = element(&[0x18, 0x53, 0x80, 0x67], &info);
        let mut init = header;
        init.extend_from_slice(&segment);

        let cues = cues_bytes(&[(0, 0), (2000, 800)]);
        let references = parse_cues(&init, &cues, &context()).unwrap();
        assert_eq!(references[0].end_time, 2.0);
        assert_eq!(references[1].end_time, 4.0);
    }

    #[test]
    fn test_missing_duration_is_an_error() {
        let header = element(&[0x1A, 0x45, 0xDF, 0xA3], &element(&[0x42, 0x82], b"webm"));
        let info = element(&[0x15, 0x49, 0xA9, 0x66], &uint_element(&[0x2A, 0xD7, 0xB1], 1_000_000));
        let segment = element(&[0x18, 0x53, 0x80, 0x67], &info);
        let mut init = header;
        init.extend_from_slice(&segment);

        let cues = cues_bytes(&[(0, 100)]);
        assert!(parse_cues(&init, &cues, &context()).is_err());
    }

    #[test]
    fn test_rejects_foreign_doctype() {
        let header = element(&[0x1A, 0x45, 0xDF, 0xA3], &element(&[0x42, 0x82], b"avi"));
        let mut init = header;
        init.extend_from_slice(&element(&[0x18, 0x53, 0x80, 0x67], &[]));

        let cues = cues_bytes(&[(0, 100)]);
        assert!(matches!(
            parse_cues(&init, &cues, &context()),
            Err(HibikiError::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn test_timestamp_offset_applies() {
        let init = init_bytes(1_000_000, 1000.0);
        let cues = cues_bytes(&[(0, 0)]);
        let mut ctx = context();
        ctx.timestamp_offset = 20.0;
        let references = parse_cues(&init, &cues, &ctx).unwrap();
        assert_eq!(references[0].start_time, 20.0);
        assert_eq!(references[0].end_time, 21.0);
    }
}
