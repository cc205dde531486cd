//! Text for the return and reason codes carried in `*REQSTS*` segments.

use std::borrow::Cow;

/// Text used when a code has no table entry.
pub const NO_TEXT: &str = "No text available";

/// Reason code whose value is an OTMA sense code.
pub const RSN_OTMA: u32 = 0x0010;
/// Reason codes whose value is a CSL (SCI/OM) code.
pub const RSN_CSL_SCI: u32 = 0x0018;
pub const RSN_CSL_OM: u32 = 0x001C;

/// Returns the description of an IMS Connect return code.
pub fn return_code_text(code: u32) -> &'static str {
    match code {
        0x0004 => "Exit request error message sent to client before socket termination. The socket is disconnected for IMS.",
        0x0008 => "Error detected by IMS Connect and the socket is disconnected for IMS.",
        0x000C => "Error returned by IMS OTMA and the socket is disconnected for IMS.",
        0x0010 => "Error returned by IMS OTMA when an OTMA sense code is returned in the \"Reason Code\" field of the RSM. The socket is disconnected for IMS.",
        0x0014 => "Exit requests response message to HWSPWCH/PING request to be returned to client. IMS Connect keeps the socket connection because the PWCH/PING came in on a new socket connection or an existing persistent socket connection that is not in conversational mode or waiting for an ACK/NAK from the client application.",
        0x0018 => "SCI error detected, see CSL codes for reason codes. The socket is disconnected for IMS.",
        0x001C => "OM error detected, see CSL codes for reason codes. The socket is disconnected for IMS.",
        0x0020 => "IRM_TIMER value expired. When this return code is issued, the value of the corresponding reason code is not a code, but rather the time interval that was in effect for the IRM_TIMER. The socket is disconnected by IMS Connect.",
        0x0024 => "A default IRM_TIMER value expired. Either the IRM_TIMER value specified was X'00' or an invalid value. When this return code is issued, the value of the corresponding reason code is not a code, but rather the time interval that was in effect for the IRM_TIMER. The socket is disconnected by IMS Connect.",
        0x0028 => "IRM_TIMER value expired. When this return code is issued, the value of the corresponding reason code is not a code, but rather the time interval that was in effect for the IRM_TIMER. The connection is not disconnected. The socket remains connected.",
        0x002C => "The DATASTORE in no longer available.",
        _ => NO_TEXT,
    }
}

/// Returns the description of an IMS Connect reason code from the table.
///
/// This is the raw table lookup; use [`reason_text`] to get the rendered
/// text including the OTMA and CSL special cases.
pub fn reason_code_text(code: u32) -> Option<&'static str> {
    let text = match code {
        0x0004 => "INVLDLEN: the input message length is invalid.",
        0x0008 => "NFNDEXIT: the user message exit named in IRM_ID was not found.",
        0x000C => "INVLDCID: the client ID is invalid or contains invalid characters.",
        0x0014 => "DUPECLNT: the client ID is already in use.",
        0x0020 => "SECFAIL: security validation failed for the user ID, group or password.",
        0x0024 => "NFNDDST: the datastore named in the request was not found.",
        0x0028 => "DSCLOSE: the datastore is not available.",
        0x002C => "NOTRANCD: the transaction code is missing or invalid.",
        0x0030 => "INVLDSTA: the request is not valid in the current client state.",
        0x0034 => "INVLDTYP: the message type in IRM_F4 is invalid.",
        0x0038 => "NOACKNAK: an ACK or NAK was expected but not received.",
        0x003C => "CONVTERM: the IMS conversation was terminated.",
        0x0040 => "TPNOTAVL: the tpipe is not available.",
        0x0044 => "TOOMANY: the maximum number of sockets has been reached.",
        0x0048 => "IRMERR: the IRM header contains inconsistent values.",
        _ => return None,
    };
    Some(text)
}

/// Renders a reason code for display.
///
/// Reason `0x0010` always renders as an OTMA code and `0x0018`/`0x001C` as CSL
/// codes, whatever the table holds.
pub fn reason_text(code: u32) -> Cow<'static, str> {
    match code {
        RSN_OTMA => Cow::Owned(format!("OTMA reason code {:04X}", code)),
        RSN_CSL_SCI | RSN_CSL_OM => Cow::Owned(format!("CSL reason code {:04X}", code)),
        _ => Cow::Borrowed(reason_code_text(code).unwrap_or(NO_TEXT)),
    }
}
