/* Receiver discovery: enumerate hidraw nodes for the configured receiver */
/* identity and probe each paired slot for BACKLIGHT2. */

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};
use udev::Enumerator;

use crate::device::TargetDescriptor;
use crate::driver::hidpp::{FIRST_DEVICE_INDEX, LAST_DEVICE_INDEX, PAGE_BACKLIGHT2};
use crate::driver::hidpp20::Hidpp20Driver;
use crate::driver::{DeviceIo, HidBackend, ReportIo};
use crate::error::{Error, Result};

/* An open handle together with the target it was resolved for. */
pub struct OpenTarget {
    pub io: Box<dyn ReportIo>,
    pub target: TargetDescriptor,
}

/* Linux hidraw nodes found through udev. */
#[derive(Debug, Default, Clone, Copy)]
pub struct HidrawBackend;

#[async_trait]
impl HidBackend for HidrawBackend {
    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<Vec<String>> {
        let mut enumerator = Enumerator::new().map_err(Error::TransportInit)?;
        enumerator
            .match_subsystem("hidraw")
            .map_err(Error::TransportInit)?;

        let mut paths = Vec::new();
        for device in enumerator.scan_devices().map_err(Error::TransportInit)? {
            let Some(devnode) = device.devnode() else {
                continue;
            };
            let Ok(Some(hid)) = device.parent_with_subsystem("hid") else {
                continue;
            };
            let Some((_bus, vid, pid)) = hid
                .property_value("HID_ID")
                .and_then(|s| s.to_str())
                .and_then(parse_hid_id)
            else {
                continue;
            };

            if vid == vendor_id && pid == product_id {
                debug!("Candidate {} ({vid:04x}:{pid:04x})", devnode.display());
                paths.push(devnode.display().to_string());
            }
        }
        Ok(paths)
    }

    async fn open(&self, path: &str) -> io::Result<Box<dyn ReportIo>> {
        let io = DeviceIo::open(Path::new(path)).await?;
        Ok(Box::new(io))
    }
}

/* Parse udev's `HID_ID` property, `BUS:VENDOR:PRODUCT` in hex, */
/* e.g. `0003:0000046D:0000C52B`. */
fn parse_hid_id(s: &str) -> Option<(u16, u16, u16)> {
    let mut elems = s
        .split(':')
        .map(|e| u32::from_str_radix(e, 16).ok().and_then(|v| u16::try_from(v).ok()));
    let bus = elems.next()??;
    let vendor = elems.next()??;
    let product = elems.next()??;
    Some((bus, vendor, product))
}

/* Ask slots 1..=6 in order for BACKLIGHT2. Returns `(slot, feature_index)`. */
pub async fn probe_slots(io: &mut dyn ReportIo) -> Option<(u8, u8)> {
    for device_index in FIRST_DEVICE_INDEX..=LAST_DEVICE_INDEX {
        if let Some(feature_index) = Hidpp20Driver::new(device_index)
            .get_feature_index(io, PAGE_BACKLIGHT2)
            .await
        {
            return Some((device_index, feature_index));
        }
    }
    None
}

/* Find the first enumerated path with a slot exposing BACKLIGHT2. */
/*  */
/* Paths are tried in enumeration order; handles that did not win are */
/* closed before moving on. */
pub async fn discover(backend: &dyn HidBackend, vendor_id: u16, product_id: u16) -> Result<OpenTarget> {
    let paths = backend.enumerate(vendor_id, product_id)?;
    debug!(
        "{} candidate paths for {vendor_id:04x}:{product_id:04x}",
        paths.len()
    );

    for path in paths {
        let mut io = match backend.open(&path).await {
            Ok(io) => io,
            Err(e) => {
                debug!("Skipping {path}: {e}");
                continue;
            }
        };

        if let Some((device_index, feature_index)) = probe_slots(io.as_mut()).await {
            let target = TargetDescriptor {
                hid_path: path,
                device_index,
                feature_index,
            };
            info!("Found BACKLIGHT2 at {target}");
            return Ok(OpenTarget { io, target });
        }

        debug!("No BACKLIGHT2 behind {path}");
    }

    Err(Error::DeviceNotFound {
        vendor_id,
        product_id,
    })
}
