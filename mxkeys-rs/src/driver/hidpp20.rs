/* Logitech HID++ 2.0 feature access for one device slot. */
/*  */
/* HID++ 2.0 is the modern feature-based protocol used by current Logitech */
/* keyboards. Each capability is exposed as a numbered "feature" whose */
/* runtime index must be looked up via the Root feature (0x0000). */

use std::time::Duration;

use tracing::debug;

use crate::driver::{self, ReportIo};
use crate::error::Result;

use super::hidpp::{self, ROOT_FEATURE_INDEX, ROOT_FN_GET_FEATURE, SW_ID};

/* Budget for a Root getFeature lookup */
pub const FEATURE_LOOKUP_TIMEOUT: Duration = Duration::from_millis(800);

/* Budget for ordinary feature function calls */
pub const FEATURE_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/* A getFeature reply must carry at least index, type and version. */
const GET_FEATURE_REPLY_LEN: usize = 7;

/* HID++ 2.0 requests addressed to one device slot behind a receiver. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hidpp20Driver {
    device_index: u8,
}

impl Hidpp20Driver {
    pub fn new(device_index: u8) -> Self {
        Self { device_index }
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    /* Query the Root feature (0x0000, fn 0) to find the runtime index of */
    /* a given feature page. Returns `None` if the device does not support it. */
    /*  */
    /* An error reply or a timeout also yields `None`: the caller moves on */
    /* to the next candidate slot either way. */
    pub async fn get_feature_index(&self, io: &mut dyn ReportIo, feature_page: u16) -> Option<u8> {
        let id = hidpp::request_id(ROOT_FEATURE_INDEX, ROOT_FN_GET_FEATURE, SW_ID);
        let reply = match driver::request(
            io,
            self.device_index,
            id,
            &feature_page.to_be_bytes(),
            FEATURE_LOOKUP_TIMEOUT,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                debug!(
                    "Feature 0x{feature_page:04X} lookup on slot {} failed: {e}",
                    self.device_index
                );
                return None;
            }
        };

        if reply.len() < GET_FEATURE_REPLY_LEN {
            debug!(
                "Feature 0x{feature_page:04X} lookup on slot {}: short reply ({} bytes)",
                self.device_index,
                reply.len()
            );
            return None;
        }

        match reply[4] {
            0 => {
                debug!(
                    "Feature 0x{feature_page:04X} not supported on slot {}",
                    self.device_index
                );
                None
            }
            index => {
                debug!(
                    "Feature 0x{feature_page:04X} at index 0x{index:02X} on slot {}",
                    self.device_index
                );
                Some(index)
            }
        }
    }

    /* Send a HID++ 2.0 feature request and return the raw reply. */
    pub async fn feature_request(
        &self,
        io: &mut dyn ReportIo,
        feature_index: u8,
        function: u8,
        params: &[u8],
    ) -> Result<Vec<u8>> {
        let id = hidpp::request_id(feature_index, function, SW_ID);
        driver::request(io, self.device_index, id, params, FEATURE_REQUEST_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::hidpp::{HIDPP20_ERROR, PAGE_BACKLIGHT2};
    use crate::driver::tests::{long_reply, ScriptedIo};
    use crate::error::Error;

    #[tokio::test(start_paused = true)]
    async fn get_feature_index_sends_root_lookup() {
        let mut io = ScriptedIo::default();
        io.replies.push_back(long_reply(0x03, 0x000F, &[0x07, 0x00, 0x00]));

        let idx = Hidpp20Driver::new(0x03)
            .get_feature_index(&mut io, PAGE_BACKLIGHT2)
            .await;

        assert_eq!(idx, Some(0x07));
        assert_eq!(&io.written[0][..6], &[0x11, 0x03, 0x00, 0x0F, 0x19, 0x82]);
    }

    #[tokio::test(start_paused = true)]
    async fn index_zero_means_not_present() {
        let mut io = ScriptedIo::default();
        io.replies.push_back(long_reply(0x01, 0x000F, &[0x00]));

        let idx = Hidpp20Driver::new(0x01)
            .get_feature_index(&mut io, PAGE_BACKLIGHT2)
            .await;
        assert_eq!(idx, None);
    }

    #[tokio::test(start_paused = true)]
    async fn error_reply_and_timeout_mean_not_present() {
        let mut io = ScriptedIo::default();
        io.replies
            .push_back(long_reply(0x01, 0x000F, &[HIDPP20_ERROR, 0x02]));
        let driver = Hidpp20Driver::new(0x01);
        assert_eq!(driver.get_feature_index(&mut io, PAGE_BACKLIGHT2).await, None);

        let start = tokio::time::Instant::now();
        assert_eq!(driver.get_feature_index(&mut io, PAGE_BACKLIGHT2).await, None);
        assert!(start.elapsed() >= FEATURE_LOOKUP_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn short_lookup_reply_means_not_present() {
        let mut io = ScriptedIo::default();
        io.replies.push_back(vec![0x11, 0x01, 0x00, 0x0F, 0x07]);

        let idx = Hidpp20Driver::new(0x01)
            .get_feature_index(&mut io, PAGE_BACKLIGHT2)
            .await;
        assert_eq!(idx, None);
    }

    #[tokio::test(start_paused = true)]
    async fn feature_request_packs_function_and_sw_id() {
        let mut io = ScriptedIo::default();
        io.replies.push_back(long_reply(0x02, 0x072F, &[0x10]));

        let reply = Hidpp20Driver::new(0x02)
            .feature_request(&mut io, 0x07, 0x02, &[])
            .await
            .unwrap();

        assert_eq!(reply[4], 0x10);
        assert_eq!(&io.written[0][..4], &[0x11, 0x02, 0x07, 0x2F]);
    }

    #[tokio::test(start_paused = true)]
    async fn feature_request_propagates_protocol_errors() {
        let mut io = ScriptedIo::default();
        io.replies
            .push_back(long_reply(0x02, 0x071F, &[HIDPP20_ERROR, 0x08]));

        let err = Hidpp20Driver::new(0x02)
            .feature_request(&mut io, 0x07, 0x01, &[0x01])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { code: 0x08 }));
    }
}
