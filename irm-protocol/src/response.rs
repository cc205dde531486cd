//! Response parsing.
//!
//! A response is a 4-byte total length (itself included) followed by
//! segments:
//!
//! ```text
//! +------+-------+--------------------+
//! | LL   | flags | payload            |
//! | 2    | 2     | LL-4 bytes         |
//! +------+-------+--------------------+
//! ```
//!
//! Segments whose payload starts with `*REQMOD*`, `*REQSTS*` or `*CSMOKY*`
//! are control records; every other segment is one line of response text.

use crate::codes;
use crate::error::ProtocolError;
use std::borrow::Cow;
use std::fmt;

/// MFS MOD name record.
pub const REQMOD: &[u8; 8] = b"*REQMOD*";
/// Request status message (return and reason codes).
pub const REQSTS: &[u8; 8] = b"*REQSTS*";
/// Complete status message, marks the end of the output.
pub const CSMOKY: &[u8; 8] = b"*CSMOKY*";

/// Segment flag: the client must ACK (or NAK) this output.
pub const SEG_ACK_REQUIRED: u16 = 0x2000;
/// Segment flag: IMS Connect accepts an ACK with the NOWAIT timer.
pub const SEG_ACK_NOWAIT: u16 = 0x0002;

/// Smallest segment (LL included) that may carry a control identifier.
const CONTROL_MIN_SEGMENT: usize = 12;

/// Size of the response total length prefix.
const PREFIX_SIZE: usize = 4;

/// Return and reason code reported by a `*REQSTS*` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStatus {
    pub return_code: u32,
    pub reason_code: u32,
}

impl RequestStatus {
    pub fn new(return_code: u32, reason_code: u32) -> Self {
        Self {
            return_code,
            reason_code,
        }
    }

    pub fn message(&self) -> &'static str {
        codes::return_code_text(self.return_code)
    }

    pub fn reason(&self) -> Cow<'static, str> {
        codes::reason_text(self.reason_code)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error returned by IMS Connect: {}: {} (RC={:04X}, RSN={:04X})",
            self.message(),
            self.reason(),
            self.return_code,
            self.reason_code
        )
    }
}

impl std::error::Error for RequestStatus {}

/// Result of parsing one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Text of each data segment, in order.
    pub lines: Vec<String>,
    /// An ACK must be sent for this output.
    pub ack_required: bool,
    /// The ACK may use the NOWAIT timer.
    pub ack_nowait: bool,
    /// Status reported by the last `*REQSTS*` segment, if any.
    pub status: Option<RequestStatus>,
    /// MOD name reported by `*REQMOD*`.
    pub mod_name: Option<String>,
    /// Framing inconsistencies found while parsing. None of them is fatal.
    pub anomalies: Vec<ProtocolError>,
}

impl ParsedResponse {
    /// Joins the response lines with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn apply_ack_flags(&mut self, flags: u16) {
        if flags & SEG_ACK_REQUIRED != 0 {
            self.ack_required = true;
        }
        if flags & SEG_ACK_NOWAIT != 0 {
            self.ack_nowait = true;
        }
    }

    fn anomaly(&mut self, err: ProtocolError) {
        tracing::warn!("inconsistent response: {}", err);
        self.anomalies.push(err);
    }

    fn classify(&mut self, offset: usize, flags: u16, payload: &[u8]) {
        let control = if payload.len() + 4 >= CONTROL_MIN_SEGMENT {
            Some(&payload[..8])
        } else {
            None
        };

        match control {
            Some(b"*REQMOD*") => {
                let end = payload.len().min(16);
                let name = String::from_utf8_lossy(&payload[8..end])
                    .trim_end()
                    .to_string();
                tracing::info!("MOD name present in response: {:<8}", name);
                self.mod_name = Some(name);
            }
            Some(b"*REQSTS*") => {
                self.apply_ack_flags(flags);
                if payload.len() < 16 {
                    self.anomaly(ProtocolError::MalformedSegment {
                        offset,
                        reason: format!(
                            "*REQSTS* payload is {} bytes, codes need 16",
                            payload.len()
                        ),
                    });
                    return;
                }
                let return_code =
                    u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
                let reason_code =
                    u32::from_be_bytes([payload[12], payload[13], payload[14], payload[15]]);
                if return_code == 0 && reason_code == 0 {
                    tracing::debug!("*REQSTS* without return or reason code");
                    return;
                }
                let status = RequestStatus::new(return_code, reason_code);
                tracing::debug!("status segment: {}", status);
                self.status = Some(status);
            }
            Some(b"*CSMOKY*") => {
                self.apply_ack_flags(flags);
                tracing::debug!("end of message marker, flags={:#06x}", flags);
            }
            _ => {
                let line = String::from_utf8_lossy(payload).into_owned();
                tracing::trace!("response line received: {}", line);
                self.lines.push(line);
            }
        }
    }
}

/// Returns the total length declared by the first 4 bytes of `buf`.
pub fn peek_total_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; PREFIX_SIZE] = buf.get(..PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Parses a response buffer.
///
/// The scan is driven by the declared total length. Inconsistencies are
/// logged and recorded in [`ParsedResponse::anomalies`]; whatever was
/// collected before them is returned.
pub fn parse_response(buf: &[u8]) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();

    let Some(declared) = peek_total_length(buf) else {
        parsed.anomaly(ProtocolError::Truncated {
            needed: PREFIX_SIZE,
            available: buf.len(),
        });
        return parsed;
    };

    let mut remaining = i64::from(declared) - PREFIX_SIZE as i64;
    let mut pos = PREFIX_SIZE;

    while remaining > 0 {
        let available = buf.len().saturating_sub(pos);
        if available < 4 {
            parsed.anomaly(ProtocolError::Truncated {
                needed: remaining as usize,
                available,
            });
            break;
        }

        let seg_len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
        let flags = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]);
        if seg_len < 4 {
            parsed.anomaly(ProtocolError::MalformedSegment {
                offset: pos,
                reason: format!("segment length {} is below 4", seg_len),
            });
            break;
        }
        if available < seg_len {
            parsed.anomaly(ProtocolError::Truncated {
                needed: seg_len,
                available,
            });
            break;
        }

        let payload = &buf[pos + 4..pos + seg_len];
        let offset = pos;
        pos += seg_len;
        remaining -= seg_len as i64;
        if remaining < 0 {
            parsed.anomaly(ProtocolError::MalformedSegment {
                offset,
                reason: format!(
                    "segment overruns the declared length by {} bytes",
                    -remaining
                ),
            });
        }

        parsed.classify(offset, flags, payload);
    }

    if remaining != 0 {
        tracing::warn!("{} spurious bytes detected", remaining);
    }

    parsed
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a response from (flags, payload) pairs.
    pub(crate) fn build_response(segments: &[(u16, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (flags, payload) in segments {
            body.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
            body.extend_from_slice(&flags.to_be_bytes());
            body.extend_from_slice(payload);
        }
        let mut out = ((body.len() + 4) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }

    fn status_payload(rc: u32, rsn: u32) -> Vec<u8> {
        let mut p = REQSTS.to_vec();
        p.extend_from_slice(&rc.to_be_bytes());
        p.extend_from_slice(&rsn.to_be_bytes());
        p
    }

    #[test]
    fn test_single_data_segment() {
        let buf = build_response(&[(0, b"HELLO")]);
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["HELLO".to_string()]);
        assert_eq!(parsed.text(), "HELLO");
        assert!(!parsed.ack_required);
        assert!(parsed.status.is_none());
        assert!(parsed.anomalies.is_empty());
    }

    #[test]
    fn test_control_segments_are_excluded() {
        let mut modname = REQMOD.to_vec();
        modname.extend_from_slice(b"IVTNOMO ");
        let buf = build_response(&[
            (0, &modname),
            (0, b"LINE ONE OF THE OUTPUT"),
            (0, b"SHORT"),
            (0, b"LINE THREE"),
            (0, CSMOKY),
        ]);
        let parsed = parse_response(&buf);
        assert_eq!(
            parsed.lines,
            vec!["LINE ONE OF THE OUTPUT", "SHORT", "LINE THREE"]
        );
        assert_eq!(parsed.mod_name.as_deref(), Some("IVTNOMO"));
        assert!(parsed.anomalies.is_empty());
    }

    #[test]
    fn test_lines_keep_whitespace() {
        let buf = build_response(&[(0, b"  PADDED TEXT  ")]);
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["  PADDED TEXT  "]);
    }

    #[test]
    fn test_status_segment() {
        let buf = build_response(&[(0, &status_payload(0x0008, 0x0024))]);
        let parsed = parse_response(&buf);
        assert!(parsed.lines.is_empty());
        assert!(!parsed.ack_required);
        let status = parsed.status.unwrap();
        assert_eq!(status.return_code, 8);
        assert_eq!(status.reason_code, 0x24);
        let text = status.to_string();
        assert!(text.contains("Error detected by IMS Connect"));
        assert!(text.contains("NFNDDST"));
        assert!(text.contains("RC=0008, RSN=0024"));
    }

    #[test]
    fn test_status_otma_and_csl_reasons() {
        let parsed = parse_response(&build_response(&[(0, &status_payload(0x000C, 0x0010))]));
        assert!(parsed
            .status
            .unwrap()
            .to_string()
            .contains("OTMA reason code 0010"));

        let parsed = parse_response(&build_response(&[(0, &status_payload(0x0018, 0x001C))]));
        assert!(parsed
            .status
            .unwrap()
            .to_string()
            .contains("CSL reason code 001C"));
    }

    #[test]
    fn test_status_unknown_codes() {
        let parsed = parse_response(&build_response(&[(0, &status_payload(0x0077, 0x0999))]));
        let status = parsed.status.unwrap();
        assert_eq!(status.message(), "No text available");
        assert_eq!(status.reason(), "No text available");
    }

    #[test]
    fn test_zero_status_is_not_an_error() {
        let parsed = parse_response(&build_response(&[(0, &status_payload(0, 0))]));
        assert!(parsed.status.is_none());
    }

    #[test]
    fn test_truncated_status_segment() {
        let mut payload = REQSTS.to_vec();
        payload.extend_from_slice(&[0, 0, 0, 8]);
        let parsed = parse_response(&build_response(&[(SEG_ACK_REQUIRED, &payload)]));
        assert!(parsed.status.is_none());
        assert!(parsed.ack_required);
        assert_eq!(parsed.anomalies.len(), 1);
    }

    #[test]
    fn test_ack_flags_from_csmoky() {
        let buf = build_response(&[
            (0, b"DATA"),
            (SEG_ACK_REQUIRED | SEG_ACK_NOWAIT, CSMOKY),
        ]);
        let parsed = parse_response(&buf);
        assert!(parsed.ack_required);
        assert!(parsed.ack_nowait);
        assert_eq!(parsed.lines, vec!["DATA"]);
    }

    #[test]
    fn test_ack_flags_are_sticky() {
        let status = status_payload(0x0004, 0);
        let buf = build_response(&[
            (SEG_ACK_REQUIRED | SEG_ACK_NOWAIT, &status),
            (0, b"DATA"),
            (0, CSMOKY),
        ]);
        let parsed = parse_response(&buf);
        assert!(parsed.ack_required);
        assert!(parsed.ack_nowait);
    }

    #[test]
    fn test_data_flags_do_not_request_ack() {
        let buf = build_response(&[(SEG_ACK_REQUIRED, b"PLAIN TEXT LINE")]);
        let parsed = parse_response(&buf);
        assert!(!parsed.ack_required);
        assert_eq!(parsed.lines, vec!["PLAIN TEXT LINE"]);
    }

    #[test]
    fn test_scan_continues_after_csmoky() {
        let buf = build_response(&[(0, CSMOKY), (0, b"AFTER")]);
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["AFTER"]);
    }

    #[test]
    fn test_short_identifier_prefix_is_text() {
        // Shorter than a control segment, so it is text.
        let buf = build_response(&[(0, b"*CSM")]);
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["*CSM"]);
    }

    #[test]
    fn test_empty_response() {
        let parsed = parse_response(&[0, 0, 0, 4]);
        assert!(parsed.lines.is_empty());
        assert!(parsed.anomalies.is_empty());
    }

    #[test]
    fn test_truncated_buffer_returns_partial_lines() {
        let mut buf = build_response(&[(0, b"FIRST"), (0, b"SECOND")]);
        buf.truncate(buf.len() - 3);
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["FIRST"]);
        assert!(matches!(
            parsed.anomalies[0],
            ProtocolError::Truncated { .. }
        ));
    }

    #[test]
    fn test_segment_overrunning_declared_length() {
        let mut buf = build_response(&[(0, b"FIRST"), (0, b"SECOND")]);
        // Declare two bytes less than the segments occupy.
        let declared = (buf.len() - 2) as u32;
        buf[..4].copy_from_slice(&declared.to_be_bytes());
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["FIRST", "SECOND"]);
        assert!(matches!(
            parsed.anomalies[0],
            ProtocolError::MalformedSegment { .. }
        ));
    }

    #[test]
    fn test_segment_length_below_header() {
        let buf = vec![0, 0, 0, 12, 0, 2, 0, 0, 0, 0, 0, 0];
        let parsed = parse_response(&buf);
        assert!(parsed.lines.is_empty());
        assert!(matches!(
            parsed.anomalies[0],
            ProtocolError::MalformedSegment { offset: 4, .. }
        ));
    }

    #[test]
    fn test_bytes_beyond_declared_length_are_ignored() {
        let mut buf = build_response(&[(0, b"ONLY")]);
        buf.extend_from_slice(b"\x00\x09\x00\x00STALE");
        let parsed = parse_response(&buf);
        assert_eq!(parsed.lines, vec!["ONLY"]);
    }

    #[test]
    fn test_peek_total_length() {
        assert_eq!(peek_total_length(&[0, 0, 1, 0, 9]), Some(256));
        assert_eq!(peek_total_length(&[0, 0]), None);
    }

    #[test]
    fn test_many_segments_in_order() {
        let payloads: Vec<Vec<u8>> = (0..50)
            .map(|i| format!("OUTPUT LINE NUMBER {:03}", i).into_bytes())
            .collect();
        let mut segments: Vec<(u16, &[u8])> = Vec::new();
        for (i, p) in payloads.iter().enumerate() {
            if i % 10 == 0 {
                segments.push((0, CSMOKY));
            }
            segments.push((0, p.as_slice()));
        }
        let parsed = parse_response(&build_response(&segments));
        assert_eq!(parsed.lines.len(), 50);
        for (line, payload) in parsed.lines.iter().zip(&payloads) {
            assert_eq!(line.as_bytes(), payload.as_slice());
        }
    }
}
