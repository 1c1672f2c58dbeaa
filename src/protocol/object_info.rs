//! GetObjectInfo dataset decoding and RAW/JPEG classification.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::Result;
use crate::protocol::binary::{get_ptp_string, get_u16, get_u32, put_ptp_string};
use crate::protocol::format;

/// RAW extensions the classifier recognizes when the format code is not
/// conclusive. Lowercase, without the dot.
const RAW_EXTENSIONS: [&str; 9] = [
    "cr2", "cr3", "crw", "raw", "dng", "nef", "arw", "orf", "rw2",
];

/// Metadata for one object on the camera.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    pub object_compressed_size: u32,
    pub thumb_format: u16,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
    pub keywords: String,
}

impl ObjectInfo {
    /// Decode the dataset from a GetObjectInfo data phase.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        Ok(Self {
            storage_id: get_u32(&mut buf, "object info storage id")?,
            object_format: get_u16(&mut buf, "object info format")?,
            protection_status: get_u16(&mut buf, "object info protection")?,
            object_compressed_size: get_u32(&mut buf, "object info size")?,
            thumb_format: get_u16(&mut buf, "object info thumb format")?,
            thumb_compressed_size: get_u32(&mut buf, "object info thumb size")?,
            thumb_pix_width: get_u32(&mut buf, "object info thumb width")?,
            thumb_pix_height: get_u32(&mut buf, "object info thumb height")?,
            image_pix_width: get_u32(&mut buf, "object info width")?,
            image_pix_height: get_u32(&mut buf, "object info height")?,
            image_bit_depth: get_u32(&mut buf, "object info bit depth")?,
            parent_object: get_u32(&mut buf, "object info parent")?,
            association_type: get_u16(&mut buf, "object info association type")?,
            association_desc: get_u32(&mut buf, "object info association desc")?,
            sequence_number: get_u32(&mut buf, "object info sequence")?,
            filename: get_ptp_string(&mut buf)?,
            capture_date: get_ptp_string(&mut buf)?,
            modification_date: get_ptp_string(&mut buf)?,
            keywords: get_ptp_string(&mut buf)?,
        })
    }

    /// Encode the dataset (the inverse of [`ObjectInfo::from_bytes`]).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.storage_id);
        buf.put_u16_le(self.object_format);
        buf.put_u16_le(self.protection_status);
        buf.put_u32_le(self.object_compressed_size);
        buf.put_u16_le(self.thumb_format);
        buf.put_u32_le(self.thumb_compressed_size);
        buf.put_u32_le(self.thumb_pix_width);
        buf.put_u32_le(self.thumb_pix_height);
        buf.put_u32_le(self.image_pix_width);
        buf.put_u32_le(self.image_pix_height);
        buf.put_u32_le(self.image_bit_depth);
        buf.put_u32_le(self.parent_object);
        buf.put_u16_le(self.association_type);
        buf.put_u32_le(self.association_desc);
        buf.put_u32_le(self.sequence_number);
        put_ptp_string(&mut buf, &self.filename)?;
        put_ptp_string(&mut buf, &self.capture_date)?;
        put_ptp_string(&mut buf, &self.modification_date)?;
        put_ptp_string(&mut buf, &self.keywords)?;
        Ok(buf.to_vec())
    }

    /// RAW capture: vendor RAW format band, an explicit RAW format code, or
    /// a RAW filename extension.
    pub fn is_raw(&self) -> bool {
        if (format::VENDOR_RAW_FIRST..=format::VENDOR_RAW_LAST).contains(&self.object_format) {
            return true;
        }
        if matches!(self.object_format, format::CIFF | format::RAW) {
            return true;
        }
        let lower = self.filename.to_lowercase();
        RAW_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }

    /// JPEG capture. RAW wins when both sets of indicators match, so the
    /// two predicates are mutually exclusive.
    pub fn is_jpeg(&self) -> bool {
        if self.is_raw() {
            return false;
        }
        if matches!(self.object_format, format::EXIF_JPEG | format::JFIF) {
            return true;
        }
        let lower = self.filename.to_lowercase();
        lower.ends_with(".jpg") || lower.ends_with(".jpeg")
    }

    /// MIME type for the external upload sink.
    pub fn content_type(&self) -> &'static str {
        if self.is_jpeg() {
            "image/jpeg"
        } else {
            "application/octet-stream"
        }
    }

    /// Capture date parsed from the PTP datetime string
    /// (`YYYYMMDDThhmmss`, optional fraction and zone suffix).
    pub fn capture_time(&self) -> Option<DateTime<Utc>> {
        let s = self.capture_date.get(..15)?;
        let naive = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S").ok()?;
        Some(naive.and_utc())
    }

    /// Identity of a capture for Sony in-memory change detection.
    pub fn signature(&self) -> (String, u32, u32) {
        (
            self.filename.clone(),
            self.sequence_number,
            self.object_compressed_size,
        )
    }
}
