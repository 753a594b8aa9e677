/* HID++ 2.0 long-report framing and reply classification. */
/*  */
/* HID++ uses two report formats: */
/* - Short (Report ID 0x10): 7 bytes total */
/* - Long  (Report ID 0x11): 20 bytes total */
/*  */
/* Every request sent here is a long report: */
/* `[0x11, device_idx, request_id_hi, request_id_lo, payload[0..16]]` */
/* where `request_id = feature_index << 8 | function << 4 | sw_id`. */

/* HID++ report IDs */
pub const REPORT_ID_SHORT: u8 = 0x10;
pub const REPORT_ID_LONG: u8 = 0x11;

/* Long report length and the payload room left after the 4-byte header */
pub const LONG_REPORT_LEN: usize = 20;
pub const MAX_PAYLOAD_LEN: usize = 16;

/* A matching reply whose first payload byte is this value is an error. */
pub const HIDPP20_ERROR: u8 = 0xFF;

/* Software ID used in all our requests (arbitrary, identifies us) */
pub const SW_ID: u8 = 0x0F;

/* Device slots behind a receiver */
pub const FIRST_DEVICE_INDEX: u8 = 1;
pub const LAST_DEVICE_INDEX: u8 = 6;

/* Root feature index, always 0x00 */
pub const ROOT_FEATURE_INDEX: u8 = 0x00;

/* Root feature function IDs */
pub const ROOT_FN_GET_FEATURE: u8 = 0x00;

/* HID++ 2.0 feature pages */
pub const PAGE_BACKLIGHT2: u16 = 0x1982;

/* Pack a feature index, function code and software id into a request id. */
pub fn request_id(feature_index: u8, function: u8, sw_id: u8) -> u16 {
    (u16::from(feature_index) << 8) | (u16::from(function & 0x0F) << 4) | u16::from(sw_id & 0x0F)
}

/* Build a 20-byte HID++ long request. */
/*  */
/* Payloads longer than 16 bytes are truncated to their first 16 bytes; */
/* the remainder of the frame is zero. */
pub fn build_long_request(device_index: u8, request_id: u16, payload: &[u8]) -> [u8; LONG_REPORT_LEN] {
    let mut buf = [0u8; LONG_REPORT_LEN];
    let [id_hi, id_lo] = request_id.to_be_bytes();
    buf[0] = REPORT_ID_LONG;
    buf[1] = device_index;
    buf[2] = id_hi;
    buf[3] = id_lo;
    let copy_len = payload.len().min(MAX_PAYLOAD_LEN);
    buf[4..4 + copy_len].copy_from_slice(&payload[..copy_len]);
    buf
}

/* How an incoming report relates to the request we are waiting on. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /* Short read, another report type, another slot or another request. */
    Unrelated,
    /* Matching reply flagged as a HID++ error, with the device error code. */
    Error(u8),
    /* Matching reply carrying data. */
    Response,
}

/* Classify a raw input report against the outstanding `(device_index, request_id)`. */
pub fn classify_reply(buf: &[u8], device_index: u8, request_id: u16) -> ReplyKind {
    if buf.len() < 4 {
        return ReplyKind::Unrelated;
    }
    let [id_hi, id_lo] = request_id.to_be_bytes();
    if buf[0] != REPORT_ID_LONG || buf[1] != device_index || buf[2] != id_hi || buf[3] != id_lo {
        return ReplyKind::Unrelated;
    }
    match buf.get(4) {
        Some(&HIDPP20_ERROR) => ReplyKind::Error(buf.get(5).copied().unwrap_or(0)),
        _ => ReplyKind::Response,
    }
}
