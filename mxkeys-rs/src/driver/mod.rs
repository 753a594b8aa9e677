pub mod hidpp;
pub mod hidpp20;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use nix::fcntl::OFlag;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};

use self::hidpp::ReplyKind;

/* Upper bound of a single read; hidraw never returns more than one report */
const MAX_REPORT_LEN: usize = 64;

/* Timeout per individual read attempt */
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/* ioctl calls from linux/hidraw.h */
mod ioctl {
    const HIDRAW_IOC_MAGIC: u8 = b'H';
    const HIDRAW_IOC_GRDESCSIZE: u8 = 0x01;

    nix::ioctl_read!(hidraw_ioc_grdescsize, HIDRAW_IOC_MAGIC, HIDRAW_IOC_GRDESCSIZE, i32);
}

/* Raw report I/O on one open HID handle. */
/*  */
/* The protocol layer only ever talks to this trait so that the same */
/* request/reply logic drives a real hidraw node or a simulated receiver. */
/* Dropping the implementor closes the handle. */
#[async_trait]
pub trait ReportIo: Send {
    /* Path the handle was opened from, for logging and the target cache. */
    fn path(&self) -> &str;

    /* Discard every report already queued on the handle. Returns how many were dropped. */
    async fn flush(&mut self) -> io::Result<usize>;

    /* Write one complete output report. */
    async fn write_report(&mut self, buf: &[u8]) -> io::Result<()>;

    /* Read one input report, or `None` if nothing arrived within `timeout`. */
    async fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

/* Source of candidate HID paths and the handles opened on them. */
#[async_trait]
pub trait HidBackend: Send + Sync {
    /* List device paths whose HID identity matches `vendor_id:product_id`, */
    /* in enumeration order. */
    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<Vec<String>>;

    /* Open a path for exclusive use by the caller. */
    async fn open(&self, path: &str) -> io::Result<Box<dyn ReportIo>>;
}

/* Async wrapper around a `/dev/hidraw` file descriptor. */
/*  */
/* The descriptor is opened non-blocking and registered with the tokio */
/* reactor, so reads can be bounded by a timeout and stale input can be */
/* drained without ever blocking. */
pub struct DeviceIo {
    fd: AsyncFd<File>,
    path: String,
}

impl DeviceIo {
    /* Open the hidraw device node at `path`. */
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_CLOEXEC | OFlag::O_NONBLOCK).bits())
            .open(path)?;

        let mut size = 0i32;
        // SAFETY: `file` is an open descriptor and `size` outlives the call.
        unsafe { ioctl::hidraw_ioc_grdescsize(file.as_raw_fd(), &mut size) }.map_err(|e| {
            io::Error::other(format!(
                "ioctl(GRDESCSIZE) failed for {}, not a hidraw device?: {e}",
                path.display()
            ))
        })?;

        let fd = AsyncFd::new(file)?;
        debug!("Opened {} (report descriptor {size} bytes)", path.display());

        Ok(Self {
            fd,
            path: path.display().to_string(),
        })
    }
}

impl Drop for DeviceIo {
    fn drop(&mut self) {
        debug!("Closed {}", self.path);
    }
}

#[async_trait]
impl ReportIo for DeviceIo {
    fn path(&self) -> &str {
        &self.path
    }

    async fn flush(&mut self) -> io::Result<usize> {
        let mut buf = [0u8; MAX_REPORT_LEN];
        let mut drained = 0;
        loop {
            match self.fd.get_mut().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    trace!("Flushed {} bytes: {:02x?}", n, &buf[..n]);
                    drained += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(drained)
    }

    async fn write_report(&mut self, buf: &[u8]) -> io::Result<()> {
        let written = self
            .fd
            .async_io(Interest::WRITABLE, |mut file: &File| file.write(buf))
            .await?;
        if written != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write on {}: {written} of {} bytes", self.path, buf.len()),
            ));
        }
        debug!("TX {} bytes: {:02x?}", buf.len(), buf);
        Ok(())
    }

    async fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let read = self
            .fd
            .async_io(Interest::READABLE, |mut file: &File| file.read(&mut *buf));
        let outcome = tokio::time::timeout(timeout, read).await;
        match outcome {
            Ok(Ok(n)) => {
                debug!("RX {} bytes: {:02x?}", n, &buf[..n]);
                Ok(Some(n))
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }
}

/* Send a HID++ long request and wait for the matching reply. */
/*  */
/* Stale input is flushed first so an earlier, unrelated exchange cannot */
/* be mistaken for the answer. Replies are then polled in `POLL_SLICE` */
/* steps until one matches `(device_index, request_id)` or `budget` has */
/* elapsed. Foreign reports are dropped; they still consume the budget. */
/*  */
/* Returns the raw reply bytes (header included). */
pub async fn request(
    io: &mut dyn ReportIo,
    device_index: u8,
    request_id: u16,
    payload: &[u8],
    budget: Duration,
) -> Result<Vec<u8>> {
    let report = hidpp::build_long_request(device_index, request_id, payload);

    let stale = io.flush().await?;
    if stale > 0 {
        debug!("Discarded {stale} stale reports before request 0x{request_id:04X}");
    }

    if let Err(source) = io.write_report(&report).await {
        return Err(Error::Write {
            path: io.path().to_string(),
            source,
        });
    }

    let deadline = Instant::now() + budget;
    let mut buf = [0u8; MAX_REPORT_LEN];
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        let slice = POLL_SLICE.min(deadline - now);
        let Some(n) = io.read_timeout(&mut buf, slice).await? else {
            continue;
        };

        let reply = &buf[..n];
        match hidpp::classify_reply(reply, device_index, request_id) {
            ReplyKind::Unrelated => {
                trace!("Ignoring unrelated report {:02x?}", reply);
            }
            ReplyKind::Error(code) => {
                debug!(
                    "HID++ error 0x{code:02X} for request 0x{request_id:04X} on slot {device_index}"
                );
                return Err(Error::Protocol { code });
            }
            ReplyKind::Response => return Ok(reply.to_vec()),
        }
    }

    debug!("Request 0x{request_id:04X} on slot {device_index} timed out");
    Err(Error::Timeout(budget))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::hidpp::{HIDPP20_ERROR, LONG_REPORT_LEN, REPORT_ID_LONG, REPORT_ID_SHORT};
    use super::*;

    /* A handle that answers every write with a fixed script of reports. */
    #[derive(Default)]
    pub(crate) struct ScriptedIo {
        pub queue: VecDeque<Vec<u8>>,
        pub replies: VecDeque<Vec<u8>>,
        pub written: Vec<Vec<u8>>,
        pub chatter: Option<Vec<u8>>,
        pub fail_writes: bool,
    }

    #[async_trait]
    impl ReportIo for ScriptedIo {
        fn path(&self) -> &str {
            "/dev/hidraw-scripted"
        }

        async fn flush(&mut self) -> io::Result<usize> {
            let n = self.queue.len();
            self.queue.clear();
            Ok(n)
        }

        async fn write_report(&mut self, buf: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.written.push(buf.to_vec());
            self.queue.extend(self.replies.drain(..));
            Ok(())
        }

        async fn read_timeout(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> io::Result<Option<usize>> {
            let report = match self.queue.pop_front() {
                Some(report) => report,
                None => match &self.chatter {
                    Some(chatter) => {
                        tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
                        chatter.clone()
                    }
                    None => {
                        tokio::time::sleep(timeout).await;
                        return Ok(None);
                    }
                },
            };
            buf[..report.len()].copy_from_slice(&report);
            Ok(Some(report.len()))
        }
    }

    pub(crate) fn long_reply(device_index: u8, request_id: u16, data: &[u8]) -> Vec<u8> {
        let mut reply = vec![0u8; LONG_REPORT_LEN];
        reply[0] = REPORT_ID_LONG;
        reply[1] = device_index;
        reply[2..4].copy_from_slice(&request_id.to_be_bytes());
        reply[4..4 + data.len()].copy_from_slice(data);
        reply
    }

    const BUDGET: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn returns_matching_reply_after_unrelated_frames() {
        let mut io = ScriptedIo::default();
        io.replies = VecDeque::from(vec![
            long_reply(0x02, 0x071F, &[0x01]),
            vec![REPORT_ID_LONG, 0x01],
            vec![REPORT_ID_SHORT, 0x01, 0x07, 0x1F, 0x00, 0x00, 0x00],
            long_reply(0x01, 0x070F, &[0x02]),
            long_reply(0x01, 0x071F, &[0x03]),
        ]);

        let reply = request(&mut io, 0x01, 0x071F, &[0xAA], BUDGET).await.unwrap();
        assert_eq!(reply[4], 0x03);
        assert_eq!(io.written.len(), 1);
        assert_eq!(&io.written[0][..5], &[REPORT_ID_LONG, 0x01, 0x07, 0x1F, 0xAA]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reply_is_flushed_before_write() {
        let mut io = ScriptedIo::default();
        io.queue.push_back(long_reply(0x01, 0x071F, &[0xEE]));
        io.replies.push_back(long_reply(0x01, 0x071F, &[0x11]));

        let reply = request(&mut io, 0x01, 0x071F, &[], BUDGET).await.unwrap();
        assert_eq!(reply[4], 0x11);
    }

    #[tokio::test(start_paused = true)]
    async fn error_reply_is_a_protocol_error() {
        let mut io = ScriptedIo::default();
        io.replies
            .push_back(long_reply(0x01, 0x071F, &[HIDPP20_ERROR, 0x05]));

        let err = request(&mut io, 0x01, 0x071F, &[], BUDGET).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { code: 0x05 }), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out_after_budget() {
        let mut io = ScriptedIo::default();
        let start = Instant::now();

        let err = request(&mut io, 0x01, 0x000F, &[], BUDGET).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::Timeout(b) if b == BUDGET), "{err:?}");
        assert!(elapsed >= BUDGET, "gave up early after {elapsed:?}");
        assert!(elapsed < BUDGET + POLL_SLICE, "overran budget: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_chatter_still_consumes_budget() {
        let mut io = ScriptedIo {
            chatter: Some(long_reply(0x05, 0x0000, &[0x00])),
            ..Default::default()
        };
        let budget = Duration::from_millis(800);
        let start = Instant::now();

        let err = request(&mut io, 0x01, 0x000F, &[], budget).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(_)), "{err:?}");
        assert!(start.elapsed() >= budget);
        assert!(start.elapsed() < budget + POLL_SLICE);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_is_reported_as_write_error() {
        let mut io = ScriptedIo {
            fail_writes: true,
            ..Default::default()
        };

        let err = request(&mut io, 0x01, 0x000F, &[], BUDGET).await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }), "{err:?}");
    }
}
