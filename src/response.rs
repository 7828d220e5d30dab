//! Decoding reader replies
//!
//! The shape of a reply's data depends on which command it answers and on
//! its status byte. [`ResponseKind::classify`] picks the layout and each
//! layout has its own decoder.

use log::warn;

use crate::command;
use crate::error::UhfError;
use crate::frame::Frame;
use crate::types::{TagRecord, WorkModeParams};

// Status codes
pub const STATUS_SUCCESS: u8 = 0x00;
pub const STATUS_TAGS_DIRECT: u8 = 0x01;
pub const STATUS_INVENTORY_TIMEOUT: u8 = 0x02;
pub const STATUS_MORE_DATA: u8 = 0x03;
pub const STATUS_FLASH_FULL: u8 = 0x04;
pub const STATUS_ACCESS_PASSWORD_ERROR: u8 = 0x05;
pub const STATUS_TAG_UNSUPPORTED: u8 = 0x0B;
pub const STATUS_LOCKED_WRITE_FAILED: u8 = 0x10;
pub const STATUS_EXECUTION_ERROR: u8 = 0xF9;
pub const STATUS_POOR_COMMUNICATION: u8 = 0xFA;
pub const STATUS_NO_TAG: u8 = 0xFB;
pub const STATUS_TAG_ERROR: u8 = 0xFC;
pub const STATUS_BAD_LENGTH: u8 = 0xFD;
pub const STATUS_ILLEGAL_COMMAND: u8 = 0xFE;
pub const STATUS_PARAMETER_ERROR: u8 = 0xFF;

/// Human-readable name of a status byte, for logs and diagnostics
pub fn status_description(status: u8) -> &'static str {
    match status {
        STATUS_SUCCESS => "success",
        STATUS_TAGS_DIRECT => "tags returned before inventory finished",
        STATUS_INVENTORY_TIMEOUT => "inventory scan time overflow",
        STATUS_MORE_DATA => "more data follows",
        STATUS_FLASH_FULL => "reader flash full",
        STATUS_ACCESS_PASSWORD_ERROR => "access password error",
        STATUS_TAG_UNSUPPORTED => "tag does not support the command",
        STATUS_LOCKED_WRITE_FAILED => "write to locked memory failed",
        STATUS_EXECUTION_ERROR => "command execution error",
        STATUS_POOR_COMMUNICATION => "poor communication with tag",
        STATUS_NO_TAG => "no tag operable",
        STATUS_TAG_ERROR => "tag returned an error code",
        STATUS_BAD_LENGTH => "command length wrong",
        STATUS_ILLEGAL_COMMAND => "illegal command",
        STATUS_PARAMETER_ERROR => "parameter error",
        _ => "unknown status",
    }
}

/// Payload layout selected by command code and status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    NoTag,
    CountPrefixedTags,
    DirectTagList,
    WorkMode,
    MemoryData,
    CommandAck,
}

impl ResponseKind {
    pub fn classify(command: u8, status: Option<u8>) -> Self {
        match (command, status) {
            (command::INVENTORY, Some(STATUS_SUCCESS)) => ResponseKind::CountPrefixedTags,
            (command::INVENTORY, Some(STATUS_TAGS_DIRECT)) => ResponseKind::DirectTagList,
            (command::INVENTORY, _) => ResponseKind::NoTag,
            (command::GET_WORK_MODE, Some(STATUS_SUCCESS)) => ResponseKind::WorkMode,
            (command::READ_MEMORY, Some(STATUS_SUCCESS)) => ResponseKind::MemoryData,
            _ => ResponseKind::CommandAck,
        }
    }
}

/// Decoded reply data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Inventory found nothing
    NoTag,
    /// Status 0x00: `[count]([len][epc])*`
    CountPrefixedTags(Vec<TagRecord>),
    /// Status 0x01: `([len][epc])*`
    DirectTagList(Vec<TagRecord>),
    WorkMode(WorkModeParams),
    MemoryData(Vec<u8>),
    /// Any other command; `data` is whatever followed the status byte
    CommandAck { success: bool, data: Vec<u8> },
}

/// One decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub address: u8,
    pub command: u8,
    pub status: Option<u8>,
    pub body: ResponseBody,
}

impl Response {
    pub fn parse(frame: &Frame) -> Result<Self, UhfError> {
        let status = frame.status();
        let data = frame.data();

        let body = match ResponseKind::classify(frame.command(), status) {
            ResponseKind::NoTag => ResponseBody::NoTag,
            ResponseKind::CountPrefixedTags => match decode_count_prefixed(data)? {
                tags if tags.is_empty() => ResponseBody::NoTag,
                tags => ResponseBody::CountPrefixedTags(tags),
            },
            ResponseKind::DirectTagList => match decode_direct(data)? {
                tags if tags.is_empty() => ResponseBody::NoTag,
                tags => ResponseBody::DirectTagList(tags),
            },
            ResponseKind::WorkMode => ResponseBody::WorkMode(WorkModeParams::from_response(data)?),
            ResponseKind::MemoryData => ResponseBody::MemoryData(data.to_vec()),
            ResponseKind::CommandAck => ResponseBody::CommandAck {
                success: status == Some(STATUS_SUCCESS),
                data: data.to_vec(),
            },
        };

        if let (command::INVENTORY, Some(code)) = (frame.command(), status) {
            if code > STATUS_TAGS_DIRECT && code != STATUS_NO_TAG {
                warn!("Inventory status 0x{:02X}: {}", code, status_description(code));
            }
        }

        Ok(Self {
            address: frame.address(),
            command: frame.command(),
            status,
            body,
        })
    }

    /// Tags carried by an inventory reply; empty for everything else
    pub fn tags(&self) -> &[TagRecord] {
        match &self.body {
            ResponseBody::CountPrefixedTags(tags) | ResponseBody::DirectTagList(tags) => tags,
            _ => &[],
        }
    }

    pub fn into_tags(self) -> Vec<TagRecord> {
        match self.body {
            ResponseBody::CountPrefixedTags(tags) | ResponseBody::DirectTagList(tags) => tags,
            _ => Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(STATUS_SUCCESS)
    }
}

/// `[count]` followed by exactly `count` length-prefixed records
fn decode_count_prefixed(data: &[u8]) -> Result<Vec<TagRecord>, UhfError> {
    let Some((&count, records)) = data.split_first() else {
        return Ok(Vec::new());
    };

    let tags = decode_records(records)?;
    if tags.len() != count as usize {
        return Err(UhfError::MalformedResponse(format!(
            "Tag count says {} but {} records follow",
            count,
            tags.len()
        )));
    }
    Ok(tags)
}

/// Length-prefixed records with no count byte.
///
/// Some firmware still puts a count in front under this status. The plain
/// reading wins whenever it decodes into whole-word EPCs; the count-prefixed
/// reading is the fallback.
fn decode_direct(data: &[u8]) -> Result<Vec<TagRecord>, UhfError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let plain = decode_records(data);
    if let Ok(tags) = &plain {
        if word_aligned(tags) {
            return plain;
        }
    }
    match decode_count_prefixed(data) {
        Ok(tags) if !tags.is_empty() && word_aligned(&tags) => Ok(tags),
        _ => plain,
    }
}

fn word_aligned(tags: &[TagRecord]) -> bool {
    tags.iter().all(|tag| tag.len() % 2 == 0)
}

fn decode_records(mut data: &[u8]) -> Result<Vec<TagRecord>, UhfError> {
    let mut tags = Vec::new();

    while let Some((&len, rest)) = data.split_first() {
        let len = len as usize;
        if len == 0 {
            return Err(UhfError::MalformedResponse(format!(
                "Zero-length tag record after {} tags",
                tags.len()
            )));
        }
        if len > rest.len() {
            return Err(UhfError::MalformedResponse(format!(
                "Tag record claims {} bytes but only {} remain",
                len,
                rest.len()
            )));
        }
        let (epc, tail) = rest.split_at(len);
        tags.push(TagRecord::new(epc));
        data = tail;
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;

    fn frame(body: &[u8]) -> Frame {
        let mut bytes = body.to_vec();
        checksum::append(&mut bytes);
        Frame::from_bytes(bytes).unwrap()
    }

    /// Reply frame from address 0x00 with the length byte filled in
    fn reply(command: u8, status: u8, data: &[u8]) -> Frame {
        let mut body = vec![(data.len() + 5) as u8, 0x00, command, status];
        body.extend_from_slice(data);
        frame(&body)
    }

    #[test]
    fn test_classify() {
        assert_eq!(ResponseKind::classify(0x01, Some(0x00)), ResponseKind::CountPrefixedTags);
        assert_eq!(ResponseKind::classify(0x01, Some(0x01)), ResponseKind::DirectTagList);
        assert_eq!(ResponseKind::classify(0x01, Some(0xFB)), ResponseKind::NoTag);
        assert_eq!(ResponseKind::classify(0x01, None), ResponseKind::NoTag);
        assert_eq!(ResponseKind::classify(0x36, Some(0x00)), ResponseKind::WorkMode);
        assert_eq!(ResponseKind::classify(0x36, Some(0xFE)), ResponseKind::CommandAck);
        assert_eq!(ResponseKind::classify(0x2F, Some(0x00)), ResponseKind::CommandAck);
    }

    #[test]
    fn test_five_byte_no_tag_frame() {
        let response = Response::parse(&frame(&[0x04, 0x00, 0x01])).unwrap();
        assert_eq!(response.body, ResponseBody::NoTag);
        assert!(response.tags().is_empty());
        assert_eq!(response.status, None);
    }

    #[test]
    fn test_no_tag_status_frame() {
        let response = Response::parse(&reply(0x01, STATUS_NO_TAG, &[])).unwrap();
        assert_eq!(response.body, ResponseBody::NoTag);
        assert_eq!(response.status, Some(0xFB));
    }

    #[test]
    fn test_empty_success_inventory() {
        let response = Response::parse(&reply(0x01, 0x00, &[])).unwrap();
        assert!(response.tags().is_empty());

        let response = Response::parse(&reply(0x01, 0x00, &[0x00])).unwrap();
        assert!(response.tags().is_empty());
    }

    #[test]
    fn test_direct_list_single_tag() {
        let response = Response::parse(&reply(0x01, 0x01, &[0x04, 0xE2, 0x00, 0x34, 0x12])).unwrap();
        assert_eq!(
            response.body,
            ResponseBody::DirectTagList(vec![TagRecord::new(vec![0xE2, 0x00, 0x34, 0x12])])
        );
    }

    #[test]
    fn test_direct_list_two_tags() {
        let data = [0x02, 0xAA, 0xBB, 0x04, 0x11, 0x22, 0x33, 0x44];
        let response = Response::parse(&reply(0x01, 0x01, &data)).unwrap();
        assert_eq!(response.tags().len(), 2);
        assert_eq!(response.tags()[0].epc, vec![0xAA, 0xBB]);
        assert_eq!(response.tags()[1].epc, vec![0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_status_01_with_count_prefix_from_capture() {
        let captured = Frame::from_bytes(vec![
            0x0B, 0x00, 0x01, 0x01, 0x01, 0x04, 0x00, 0x00, 0x00, 0x02, 0x84, 0x95,
        ])
        .unwrap();
        let response = Response::parse(&captured).unwrap();
        assert_eq!(response.into_tags(), vec![TagRecord::new(vec![0x00, 0x00, 0x00, 0x02])]);
    }

    #[test]
    fn test_direct_list_that_also_fits_a_count_prefix() {
        let data = [0x02, 0x01, 0xAB, 0x02, 0xCD, 0xEF];
        let response = Response::parse(&reply(0x01, 0x01, &data)).unwrap();
        assert_eq!(
            response.body,
            ResponseBody::DirectTagList(vec![
                TagRecord::new(vec![0x01, 0xAB]),
                TagRecord::new(vec![0xCD, 0xEF]),
            ])
        );
    }

    #[test]
    fn test_count_prefixed_two_tags_in_order() {
        let data = [0x02, 0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0x02, 0x11, 0x22];
        let response = Response::parse(&reply(0x01, 0x00, &data)).unwrap();
        assert_eq!(
            response.body,
            ResponseBody::CountPrefixedTags(vec![
                TagRecord::new(vec![0xAA, 0xBB, 0xCC, 0xDD]),
                TagRecord::new(vec![0x11, 0x22]),
            ])
        );
    }

    #[test]
    fn test_record_longer_than_frame_is_malformed() {
        let data = [0x01, 0x0C, 0xE2, 0x00];
        assert!(matches!(
            Response::parse(&reply(0x01, 0x00, &data)),
            Err(UhfError::MalformedResponse(_))
        ));
        assert!(matches!(
            Response::parse(&reply(0x01, 0x01, &[0x0C, 0xE2, 0x00])),
            Err(UhfError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_count_mismatch_is_malformed() {
        let data = [0x03, 0x02, 0xAA, 0xBB];
        assert!(matches!(
            Response::parse(&reply(0x01, 0x00, &data)),
            Err(UhfError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_command_ack() {
        let ok = Response::parse(&reply(0x2F, 0x00, &[])).unwrap();
        assert_eq!(ok.body, ResponseBody::CommandAck { success: true, data: vec![] });
        assert!(ok.is_success());

        let rejected = Response::parse(&reply(0x2F, STATUS_PARAMETER_ERROR, &[])).unwrap();
        assert_eq!(rejected.body, ResponseBody::CommandAck { success: false, data: vec![] });
        assert_eq!(rejected.status, Some(0xFF));
    }

    #[test]
    fn test_tag_error_keeps_code() {
        let response = Response::parse(&reply(0x03, STATUS_TAG_ERROR, &[0x0B])).unwrap();
        assert_eq!(response.body, ResponseBody::CommandAck { success: false, data: vec![0x0B] });
    }

    #[test]
    fn test_work_mode_reply() {
        let data = [0x00, 0x01, 0x0A, 0x0F, 0x00, 0x02, 0x01, 0x00, 0x08, 0x05];
        let response = Response::parse(&reply(0x36, 0x00, &data)).unwrap();
        match response.body {
            ResponseBody::WorkMode(params) => {
                assert_eq!(params.mode, crate::types::WorkMode::Answer);
                assert_eq!(params.word_count, 0x08);
            }
            other => panic!("expected work mode, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_data_reply() {
        let response = Response::parse(&reply(0x02, 0x00, &[0x12, 0x34, 0xAB, 0xCD])).unwrap();
        assert_eq!(response.body, ResponseBody::MemoryData(vec![0x12, 0x34, 0xAB, 0xCD]));
    }

    #[test]
    fn test_status_description() {
        assert_eq!(status_description(0xFB), "no tag operable");
        assert_eq!(status_description(0x77), "unknown status");
    }
}
