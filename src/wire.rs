use crate::error::TransferError;
use std::fmt::{Display, Formatter};

pub const HEARTBEAT_REQUEST_TAG: &str = "beacon request header";
pub const HEARTBEAT_RESPONSE_TAG: &str = "beacon response header";
pub const HEARTBEAT_REQUEST_BODY: &[u8] = b"beacon request body";
pub const HEARTBEAT_RESPONSE_BODY: &[u8] = b"beacon response body";

const DATA_TAG_PREFIX: &str = "queue data step ";
const FINAL_SUFFIX: &str = "final";

/// One of the three ordered sub-transfers composing a full snapshot transfer.
///  Phases are strictly sequential: phase 2 cannot begin before phase 1's final
///  chunk, etc.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Phase(u8);

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Phase {
    pub const FIRST: Phase = Phase(1);
    pub const ALL: [Phase; 3] = [Phase(1), Phase(2), Phase(3)];

    pub fn from_number(number: u8) -> Option<Phase> {
        if (1..=3).contains(&number) {
            Some(Phase(number))
        }
        else {
            None
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    /// zero-based index into per-phase catalogs
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// The next phase in transfer order, or `None` after the last phase (the
    ///  sender returns to idle instead of wrapping around).
    pub fn next(&self) -> Option<Phase> {
        Phase::from_number(self.0 + 1)
    }
}

/// Decoded form of a data tag. The wire encoding is
///  `"queue data step {N}{ start} sending{ final}"` - `start` marks the first
///  chunk of a phase, `final` the last one. All four combinations are legal;
///  a single-chunk phase carries both markers.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ChunkTag {
    pub phase: Phase,
    pub start: bool,
    pub is_final: bool,
}

impl ChunkTag {
    pub fn encode(&self) -> String {
        let mut tag = format!("{}{}", DATA_TAG_PREFIX, self.phase);
        if self.start {
            tag.push_str(" start");
        }
        tag.push_str(" sending");
        if self.is_final {
            tag.push_str(" final");
        }
        tag
    }
}

/// A message's tag, decoded exactly once at the boundary. The tag is the sole
///  carrier of protocol state - there is no separate metadata record, and the
///  payload length is taken from the transport frame.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MessageKind {
    HeartbeatRequest,
    HeartbeatResponse,
    Chunk(ChunkTag),
}

/// Classifies a raw tag. The `final` marker is a suffix check independent of the
///  phase number, mirroring the wire grammar: callers must track which phase is
///  currently open separately from the per-chunk tag.
pub fn classify(tag: &str) -> Result<MessageKind, TransferError> {
    if tag == HEARTBEAT_REQUEST_TAG {
        return Ok(MessageKind::HeartbeatRequest);
    }
    if tag == HEARTBEAT_RESPONSE_TAG {
        return Ok(MessageKind::HeartbeatResponse);
    }

    let rest = tag
        .strip_prefix(DATA_TAG_PREFIX)
        .ok_or_else(|| TransferError::Protocol(format!("unrecognized tag {:?}", tag)))?;

    let mut chars = rest.chars();
    let phase = chars
        .next()
        .and_then(|ch| ch.to_digit(10))
        .and_then(|digit| Phase::from_number(digit as u8))
        .ok_or_else(|| TransferError::Protocol(format!("invalid phase number in tag {:?}", tag)))?;

    let rest = chars.as_str();
    let start = if rest.starts_with(" start") {
        true
    }
    else if rest.starts_with(" sending") {
        false
    }
    else {
        return Err(TransferError::Protocol(format!(
            "tag {:?} is neither phase-start nor continuation",
            tag
        )));
    };

    let is_final = tag.ends_with(FINAL_SUFFIX);

    Ok(MessageKind::Chunk(ChunkTag {
        phase,
        start,
        is_final,
    }))
}
