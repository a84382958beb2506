//! Decoding of tag records and module reports.
//!
//! Data of a `READ_TAG_ID_MULTIPLE` report frame:
//! ```text
//! option (1) | search flags (2) | report type (1) | body
//! ```
//! Tag and authentication-request bodies carry `metadata flags (2)` followed by
//! one tag record; status and stats bodies carry `report flags (2)` followed by
//! the selected fields.

use std::time::Duration;

use crate::antenna::{AntennaMap, PortStatus, gpio_corrected};
use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, FrameReader};
use crate::protocol::{ANTENNA_OPTION_DETECT, REPORT_TYPE_OFFSET, status};
use crate::types::{
    MetadataFlags, ModuleModel, ReportFlags, StatsReport, StatusReport, TagProtocol, TagRecord,
    VersionInfo,
};

/// What record decoding needs to know about the reader.
pub(crate) struct ParseContext<'a> {
    pub antennas: &'a AntennaMap,
    pub model: ModuleModel,
    /// Protocol assumed when the record does not carry one.
    pub protocol: TagProtocol,
}

/// Report-type discriminator of a report frame, if it has one.
pub(crate) fn report_type(frame: &Frame) -> Option<u8> {
    frame.data().get(REPORT_TYPE_OFFSET).copied()
}

fn report_body(frame: &Frame) -> Result<FrameReader> {
    let mut reader = frame.reader();
    reader.skip(REPORT_TYPE_OFFSET + 1)?;
    Ok(reader)
}

/// One tag record: metadata fields in flag order, then the EPC block.
pub(crate) fn parse_tag_record(
    reader: &mut FrameReader,
    metadata: MetadataFlags,
    ctx: &ParseContext,
) -> Result<TagRecord> {
    let mut record = TagRecord {
        read_count: 1,
        protocol: ctx.protocol,
        ..Default::default()
    };
    let mut packed_antenna = None;

    if metadata.contains(MetadataFlags::READ_COUNT) {
        record.read_count = reader.u8()? as u32;
    }
    if metadata.contains(MetadataFlags::RSSI) {
        record.rssi = reader.i8()? as i32;
    }
    if metadata.contains(MetadataFlags::ANTENNA_ID) {
        packed_antenna = Some(reader.u8()?);
    }
    if metadata.contains(MetadataFlags::FREQUENCY) {
        record.frequency = reader.u24()?;
    }
    if metadata.contains(MetadataFlags::TIMESTAMP) {
        record.timestamp_offset = Duration::from_millis(reader.u32()? as u64);
    }
    if metadata.contains(MetadataFlags::PHASE) {
        record.phase = reader.u16()?;
    }
    if metadata.contains(MetadataFlags::PROTOCOL) {
        record.protocol = TagProtocol::from(reader.u8()?);
    }
    if metadata.contains(MetadataFlags::DATA) {
        let bits = reader.u16()? as usize;
        record.data = reader.bytes(bits.div_ceil(8))?;
    }
    if metadata.contains(MetadataFlags::GPIO_STATUS) {
        record.gpio = Some(reader.u8()?);
    }
    if metadata.contains(MetadataFlags::GEN2_Q) {
        record.gen2_q = Some(reader.u8()?);
    }
    if metadata.contains(MetadataFlags::GEN2_LF) {
        record.gen2_link_frequency = Some(reader.u8()?);
    }
    if metadata.contains(MetadataFlags::GEN2_TARGET) {
        record.gen2_target = Some(reader.u8()?);
    }
    if metadata.contains(MetadataFlags::BRAND_ID) {
        record.brand_id = Some(reader.u16()?);
    }

    let epc_bits = reader.u16()? as usize;
    let block = epc_bits / 8;
    if block < 4 {
        return Err(ProtocolError::Malformed(format!(
            "EPC block of {} bits cannot hold PC and CRC",
            epc_bits
        )));
    }
    record.pc = reader.u16()?;
    record.epc = reader.bytes(block - 4)?;
    record.crc = reader.u16()?;

    if let Some(packed) = packed_antenna {
        let logical = ctx.antennas.resolve_logical(packed)?;
        record.antenna = gpio_corrected(logical, ctx.model, record.gpio);
    }
    Ok(record)
}

/// Tag report or authentication request pushed during a search.
pub(crate) fn parse_tag_report(frame: &Frame, ctx: &ParseContext) -> Result<TagRecord> {
    let mut reader = report_body(frame)?;
    let metadata = MetadataFlags::from_bits(reader.u16()?);
    parse_tag_record(&mut reader, metadata, ctx)
}

/// Number of tags the module left in its buffer when a search finished.
pub(crate) fn parse_search_done(frame: &Frame) -> Result<u32> {
    report_body(frame)?.u32()
}

#[derive(Default)]
struct ReportFields {
    antenna: Option<u8>,
    frequency: Option<u32>,
    temperature: Option<i8>,
    rf_on_time: Option<u32>,
    noise_floor: Option<i8>,
}

fn parse_report_fields(frame: &Frame) -> Result<ReportFields> {
    let mut reader = report_body(frame)?;
    let flags = ReportFlags::from_bits(reader.u16()?);
    let mut fields = ReportFields::default();
    if flags.contains(ReportFlags::ANTENNA) {
        fields.antenna = Some(reader.u8()?);
    }
    if flags.contains(ReportFlags::FREQUENCY) {
        fields.frequency = Some(reader.u24()?);
    }
    if flags.contains(ReportFlags::TEMPERATURE) {
        fields.temperature = Some(reader.i8()?);
    }
    if flags.contains(ReportFlags::RF_ON_TIME) {
        fields.rf_on_time = Some(reader.u32()?);
    }
    if flags.contains(ReportFlags::NOISE_FLOOR) {
        fields.noise_floor = Some(reader.i8()?);
    }
    Ok(fields)
}

pub(crate) fn parse_status_report(frame: &Frame) -> Result<StatusReport> {
    let fields = parse_report_fields(frame)?;
    Ok(StatusReport {
        antenna: fields.antenna,
        frequency: fields.frequency,
        temperature: fields.temperature,
    })
}

pub(crate) fn parse_stats_report(frame: &Frame) -> Result<StatsReport> {
    let fields = parse_report_fields(frame)?;
    Ok(StatsReport {
        antenna: fields.antenna,
        frequency: fields.frequency,
        temperature: fields.temperature,
        rf_on_time: fields.rf_on_time,
        noise_floor: fields.noise_floor,
    })
}

/// One page of the on-module tag buffer. `None` once the buffer is exhausted.
pub(crate) fn parse_buffer_page(frame: &Frame, ctx: &ParseContext) -> Result<Option<Vec<TagRecord>>> {
    if frame.status() == status::TAG_ID_BUFFER_NOT_ENOUGH_TAGS {
        return Ok(None);
    }
    let mut reader = frame.reader();
    let metadata = MetadataFlags::from_bits(reader.u16()?);
    reader.skip(1)?;
    let count = reader.u8()?;
    if count == 0 {
        return Ok(None);
    }
    (0..count)
        .map(|_| parse_tag_record(&mut reader, metadata, ctx))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

pub(crate) fn parse_version(frame: &Frame) -> Result<VersionInfo> {
    let mut reader = frame.reader();
    let bootloader = reader.u32()?.to_be_bytes();
    let hardware = reader.u32()?.to_be_bytes();
    let firmware_date = reader.u32()?.to_be_bytes();
    let firmware_version = reader.u32()?.to_be_bytes();
    let supported_protocols = reader.u32()?;
    Ok(VersionInfo {
        bootloader,
        hardware,
        firmware_date,
        firmware_version,
        supported_protocols,
    })
}

/// Answer to port detection: `option | (port, detected)*`.
pub(crate) fn parse_antenna_ports(frame: &Frame) -> Result<Vec<PortStatus>> {
    let mut reader = frame.reader();
    let option = reader.u8()?;
    if option != ANTENNA_OPTION_DETECT {
        return Err(ProtocolError::Malformed(format!(
            "port detection answered with option {:#04X}",
            option
        )));
    }
    let mut ports = Vec::new();
    while reader.remaining() >= 2 {
        ports.push(PortStatus {
            port: reader.u8()?,
            detected: reader.u8()? != 0,
        });
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antenna::AntennaPortEntry;
    use crate::frame::{FrameWriter, encode_response};
    use crate::mock::{status_report_frame, tag_report_frame, version_frame};
    use crate::protocol::report_type as kind;

    fn ctx(map: &AntennaMap) -> ParseContext<'_> {
        ParseContext {
            antennas: map,
            model: ModuleModel::M6eNano,
            protocol: TagProtocol::Gen2,
        }
    }

    #[test]
    fn test_tag_report_default_metadata() {
        let map = AntennaMap::build(&[1, 2]).unwrap();
        let frame = tag_report_frame(&[0xE2, 0x00, 0x11, 0x22], 0x22, -61);
        assert_eq!(report_type(&frame), Some(kind::TAG));
        let record = parse_tag_report(&frame, &ctx(&map)).unwrap();
        assert_eq!(record.epc_hex(), "E2001122");
        assert_eq!(record.read_count, 1);
        assert_eq!(record.rssi, -61);
        assert_eq!(record.antenna, 2);
        assert_eq!(record.protocol, TagProtocol::Gen2);
        assert_eq!(record.pc, 0x3000);
    }

    #[test]
    fn test_tag_report_unmapped_antenna() {
        let map = AntennaMap::build(&[1]).unwrap();
        let frame = tag_report_frame(&[0xE2], 0x21, -40);
        assert_eq!(
            parse_tag_report(&frame, &ctx(&map)),
            Err(ProtocolError::UnmappedAntenna { tx: 2, rx: 1 })
        );
    }

    #[test]
    fn test_tag_record_all_metadata() {
        let mut map = AntennaMap::build(&[1, 2]).unwrap();
        map.set(&[AntennaPortEntry::new(7, 1, 2)]).unwrap();
        let mut w = FrameWriter::response(0x29, 0);
        w.put_u8(3) // read count
            .put_u8(0xC4) // rssi -60
            .put_u8(0x12) // tx 1 rx 2
            .put_u24(915_250)
            .put_u32(1_500)
            .put_u16(90)
            .put_u8(0x05)
            .put_u16(12)
            .put_slice(&[0xAB, 0xC0])
            .put_u8(0x01) // gpio
            .put_u8(4)
            .put_u8(2)
            .put_u8(1)
            .put_u16(0x0BAD)
            .put_u16(8 * 6)
            .put_u16(0x1000)
            .put_slice(&[0x30, 0x31])
            .put_u16(0xBEEF);
        let frame = Frame::parse(&w.finish().unwrap()).unwrap();
        let mut reader = frame.reader();
        let context = ParseContext {
            antennas: &map,
            model: ModuleModel::M6e,
            protocol: TagProtocol::None,
        };
        let record = parse_tag_record(&mut reader, MetadataFlags::ALL, &context).unwrap();
        assert_eq!(record.read_count, 3);
        assert_eq!(record.rssi, -60);
        assert_eq!(record.antenna, 7 + 16);
        assert_eq!(record.frequency, 915_250);
        assert_eq!(record.timestamp_offset, Duration::from_millis(1_500));
        assert_eq!(record.phase, 90);
        assert_eq!(record.protocol, TagProtocol::Gen2);
        assert_eq!(&record.data[..], &[0xAB, 0xC0]);
        assert_eq!(record.gpio, Some(1));
        assert_eq!(record.gen2_q, Some(4));
        assert_eq!(record.gen2_link_frequency, Some(2));
        assert_eq!(record.gen2_target, Some(1));
        assert_eq!(record.brand_id, Some(0x0BAD));
        assert_eq!(&record.epc[..], &[0x30, 0x31]);
        assert_eq!(record.crc, 0xBEEF);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let map = AntennaMap::build(&[1]).unwrap();
        let raw = encode_response(0x22, 0, &[0x10, 0x01, 0x00, kind::TAG, 0x00, 0x00, 0x00, 0x60]).unwrap();
        let frame = Frame::parse(&raw).unwrap();
        assert!(matches!(
            parse_tag_report(&frame, &ctx(&map)),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_status_report_fields() {
        let frame = status_report_frame(
            kind::STATUS,
            ReportFlags::ANTENNA | ReportFlags::TEMPERATURE,
            &[0x11, 0xE7],
        );
        let report = parse_status_report(&frame).unwrap();
        assert_eq!(report.antenna, Some(0x11));
        assert_eq!(report.frequency, None);
        assert_eq!(report.temperature, Some(-25));
    }

    #[test]
    fn test_stats_report_fields() {
        let frame = status_report_frame(
            kind::STATS,
            ReportFlags::FREQUENCY | ReportFlags::RF_ON_TIME | ReportFlags::NOISE_FLOOR,
            &[0x0D, 0xF7, 0x32, 0x00, 0x00, 0x01, 0xF4, 0xA6],
        );
        let report = parse_stats_report(&frame).unwrap();
        assert_eq!(report.frequency, Some(0x0DF732));
        assert_eq!(report.rf_on_time, Some(500));
        assert_eq!(report.noise_floor, Some(-90));
        assert_eq!(report.antenna, None);
    }

    #[test]
    fn test_buffer_page() {
        let map = AntennaMap::build(&[1]).unwrap();
        let mut w = FrameWriter::response(0x29, 0);
        w.put_u16(MetadataFlags::ANTENNA_ID.bits()).put_u8(0).put_u8(2);
        for epc in [[0xAAu8, 0x01], [0xAA, 0x02]] {
            w.put_u8(0x11).put_u16(48).put_u16(0x3000).put_slice(&epc).put_u16(0);
        }
        let frame = Frame::parse(&w.finish().unwrap()).unwrap();
        let page = parse_buffer_page(&frame, &ctx(&map)).unwrap().unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].epc_hex(), "AA02");
        assert_eq!(page[1].antenna, 1);

        let empty = Frame::parse(&encode_response(0x29, 0x0600, &[]).unwrap()).unwrap();
        assert_eq!(parse_buffer_page(&empty, &ctx(&map)).unwrap(), None);
    }

    #[test]
    fn test_version() {
        let version = parse_version(&version_frame(0x30)).unwrap();
        assert_eq!(version.model(), ModuleModel::M6eNano);
        assert!(version.supports(TagProtocol::Gen2));
    }

    #[test]
    fn test_antenna_ports() {
        let frame = Frame::parse(&encode_response(0x61, 0, &[0x05, 1, 1, 2, 0]).unwrap()).unwrap();
        let ports = parse_antenna_ports(&frame).unwrap();
        assert_eq!(
            ports,
            vec![
                PortStatus { port: 1, detected: true },
                PortStatus { port: 2, detected: false },
            ]
        );

        let wrong = Frame::parse(&encode_response(0x61, 0, &[0x02, 1, 1]).unwrap()).unwrap();
        assert!(matches!(parse_antenna_ports(&wrong), Err(ProtocolError::Malformed(_))));
    }
}
