//! Tag operations, either run on their own or embedded in a search.
//!
//! Each variant knows its opcode and how to encode its body; the two framers
//! around the body never change:
//! ```text
//! standalone: timeout (2B) | option (1B) | body
//! embedded:   count = 1    | opcode      | body length | body
//! ```

use bytes::{BufMut, Bytes};

use crate::error::{ProtocolError, Result};
use crate::frame::FrameWriter;
use crate::protocol::{SEARCH_OPTION_METADATA, opcode, search_flag, stream_option};
use crate::types::{MemoryBank, MetadataFlags, ReportFlags};

/// Largest data block a single write may carry.
const MAX_WRITE_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOp {
    ReadData {
        bank: MemoryBank,
        word_address: u32,
        word_count: u8,
        access_password: u32,
    },
    WriteData {
        bank: MemoryBank,
        word_address: u32,
        data: Bytes,
        access_password: u32,
    },
    Lock {
        access_password: u32,
        mask: u16,
        action: u16,
    },
    Kill {
        kill_password: u32,
    },
}

impl TagOp {
    pub fn opcode(&self) -> u8 {
        match self {
            TagOp::ReadData { .. } => opcode::READ_TAG_DATA,
            TagOp::WriteData { .. } => opcode::WRITE_TAG_DATA,
            TagOp::Lock { .. } => opcode::LOCK_TAG,
            TagOp::Kill { .. } => opcode::KILL_TAG,
        }
    }

    fn body(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(16);
        match self {
            TagOp::ReadData {
                bank,
                word_address,
                word_count,
                access_password,
            } => {
                if *word_count == 0 {
                    return Err(ProtocolError::InvalidParameter(
                        "Read word count must be at least 1".into(),
                    ));
                }
                body.put_u8(*bank as u8);
                body.put_u32(*word_address);
                body.put_u8(*word_count);
                body.put_u32(*access_password);
            }
            TagOp::WriteData {
                bank,
                word_address,
                data,
                access_password,
            } => {
                if data.is_empty() || data.len() % 2 != 0 {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "Write data must be a non-empty whole number of words, got {} bytes",
                        data.len()
                    )));
                }
                if data.len() > MAX_WRITE_BYTES {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "Write data too long: {} bytes (maximum: {} bytes)",
                        data.len(),
                        MAX_WRITE_BYTES
                    )));
                }
                body.put_u32(*word_address);
                body.put_u8(*bank as u8);
                body.put_u32(*access_password);
                body.put_slice(data);
            }
            TagOp::Lock {
                access_password,
                mask,
                action,
            } => {
                body.put_u32(*access_password);
                body.put_u16(*mask);
                body.put_u16(*action);
            }
            TagOp::Kill { kill_password } => {
                body.put_u32(*kill_password);
                body.put_u8(0x00);
            }
        }
        Ok(body)
    }

    /// Frame this operation as its own command.
    pub(crate) fn standalone_frame(&self, timeout_ms: u16) -> Result<Bytes> {
        let body = self.body()?;
        let mut writer = FrameWriter::command(self.opcode());
        writer.put_u16(timeout_ms).put_u8(0x00).put_slice(&body);
        writer.finish()
    }

    /// Append this operation to a search command.
    pub(crate) fn embed(&self, writer: &mut FrameWriter) -> Result<()> {
        let body = self.body()?;
        writer
            .put_u8(1)
            .put_u8(self.opcode())
            .put_u8(body.len() as u8)
            .put_slice(&body);
        Ok(())
    }
}

/// Which asynchronous report a search asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportKind {
    Status(ReportFlags),
    Stats(ReportFlags),
}

/// One `READ_TAG_ID_MULTIPLE` search:
/// ```text
/// timeout (2B) | option | search flags (2B) | metadata flags (2B)
///   [| report flags (2B)] [| embedded tag operation]
/// ```
#[derive(Debug, Clone)]
pub(crate) struct Search<'a> {
    pub timeout_ms: u16,
    pub metadata: MetadataFlags,
    /// Push each tag as a separate report instead of only buffering it.
    pub streaming: bool,
    pub report: Option<ReportKind>,
    pub tag_op: Option<&'a TagOp>,
}

impl Search<'_> {
    fn flags(&self) -> u16 {
        let mut flags = search_flag::ANTENNA_LIST;
        if self.streaming {
            flags |= search_flag::TAG_STREAMING;
        }
        match self.report {
            Some(ReportKind::Status(_)) => flags |= search_flag::STATUS_REPORT,
            Some(ReportKind::Stats(_)) => flags |= search_flag::STATS_REPORT,
            None => {}
        }
        if self.tag_op.is_some() {
            flags |= search_flag::EMBEDDED_OP;
        }
        flags
    }

    fn put(&self, writer: &mut FrameWriter) -> Result<()> {
        writer
            .put_u16(self.timeout_ms)
            .put_u8(SEARCH_OPTION_METADATA)
            .put_u16(self.flags())
            .put_u16(self.metadata.bits());
        if let Some(ReportKind::Status(report) | ReportKind::Stats(report)) = self.report {
            writer.put_u16(report.bits());
        }
        if let Some(op) = self.tag_op {
            op.embed(writer)?;
        }
        Ok(())
    }

    /// The search as a command of its own.
    pub(crate) fn command(&self) -> Result<Bytes> {
        let mut writer = FrameWriter::command(opcode::READ_TAG_ID_MULTIPLE);
        self.put(&mut writer)?;
        writer.finish()
    }

    /// The search wrapped in a start-streaming request.
    pub(crate) fn start_command(&self) -> Result<Bytes> {
        let mut writer = FrameWriter::command(opcode::MULTI_PROTOCOL_TAG_OP);
        writer
            .put_u16(0)
            .put_u8(stream_option::START)
            .put_u8(opcode::READ_TAG_ID_MULTIPLE);
        self.put(&mut writer)?;
        writer.finish()
    }
}
