//! Delimiter-based field extraction from a decompressed QR payload
//!
//! A payload is `data || signature` where the signature is the trailing
//! 256-byte RSA-2048 block. Inside `data`, fields are separated by `0xFF`.
//! V2 payloads start with a `V2` marker before the first delimiter and
//! carry 18 delimiters ahead of the photo; legacy V1 payloads carry 16.

use std::ops::Range;

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProverError, Result};

/// Field separator byte
pub const DELIMITER: u8 = 0xFF;

/// Length of the RSA-2048 signature appended to every payload
pub const SIGNATURE_LENGTH: usize = 256;

/// Indian Standard Time offset from UTC (+05:30)
pub const IST_OFFSET_SECS: i64 = 5 * 3600 + 30 * 60;

/// Digits of the reference id that precede the embedded timestamp
const REFERENCE_ID_PREFIX: usize = 4;

/// `YYYYMMDDHH`
const TIMESTAMP_LENGTH: usize = 10;

/// Payload layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrLayout {
    /// Legacy layout without version marker
    V1,
    /// Layout with a leading `V2` marker and the phone-digits field
    V2,
}

impl QrLayout {
    /// Number of delimiters that precede the photo
    pub fn delimiter_count(self) -> usize {
        match self {
            Self::V1 => 16,
            Self::V2 => 18,
        }
    }

    /// Slot occupied by the version marker, if any
    fn slot_offset(self) -> usize {
        match self {
            Self::V1 => 0,
            Self::V2 => 1,
        }
    }

    /// Guess the layout from the leading version marker.
    ///
    /// Only a hint for tooling; extraction always takes the layout explicitly.
    pub fn detect(buffer: &[u8]) -> Self {
        if buffer.starts_with(b"V2") {
            Self::V2
        } else {
            Self::V1
        }
    }

    fn has_field(self, field: Field) -> bool {
        !(self == Self::V1 && field == Field::PhoneLast4)
    }
}

/// Named fields of a secure QR payload, in payload order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    EmailMobileIndicator,
    ReferenceId,
    Name,
    Dob,
    Gender,
    CareOf,
    District,
    Landmark,
    House,
    Location,
    PinCode,
    PostOffice,
    State,
    Street,
    SubDistrict,
    Vtc,
    PhoneLast4,
    Photo,
}

impl Field {
    /// All fields in payload order
    pub const ALL: [Field; 18] = [
        Field::EmailMobileIndicator,
        Field::ReferenceId,
        Field::Name,
        Field::Dob,
        Field::Gender,
        Field::CareOf,
        Field::District,
        Field::Landmark,
        Field::House,
        Field::Location,
        Field::PinCode,
        Field::PostOffice,
        Field::State,
        Field::Street,
        Field::SubDistrict,
        Field::Vtc,
        Field::PhoneLast4,
        Field::Photo,
    ];

    /// 0-based position among the delimited fields
    pub fn index(self) -> usize {
        self as usize
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::EmailMobileIndicator => "emailMobileIndicator",
            Self::ReferenceId => "referenceId",
            Self::Name => "name",
            Self::Dob => "dob",
            Self::Gender => "gender",
            Self::CareOf => "careOf",
            Self::District => "district",
            Self::Landmark => "landmark",
            Self::House => "house",
            Self::Location => "location",
            Self::PinCode => "pinCode",
            Self::PostOffice => "postOffice",
            Self::State => "state",
            Self::Street => "street",
            Self::SubDistrict => "subDistrict",
            Self::Vtc => "vtc",
            Self::PhoneLast4 => "phoneLast4",
            Self::Photo => "photo",
        }
    }
}

/// Byte ranges of every field in one payload
#[derive(Debug, Clone)]
pub struct FieldTable<'a> {
    data: &'a [u8],
    layout: QrLayout,
    ranges: [Option<Range<usize>>; 18],
}

impl<'a> FieldTable<'a> {
    /// Index a full decompressed payload (signature tail included)
    pub fn extract(buffer: &'a [u8], layout: QrLayout) -> Self {
        Self::from_signed_data(signed_region(buffer), layout)
    }

    /// Index the signed data only (signature tail already removed)
    pub fn from_signed_data(data: &'a [u8], layout: QrLayout) -> Self {
        let delimiters = delimiter_indices(data, layout.delimiter_count());
        let mut ranges: [Option<Range<usize>>; 18] = Default::default();

        for field in Field::ALL {
            ranges[field.index()] = field_range(data, &delimiters, layout, field);
        }

        Self {
            data,
            layout,
            ranges,
        }
    }

    /// Layout the table was built with
    pub fn layout(&self) -> QrLayout {
        self.layout
    }

    /// Raw bytes of a field; empty when absent
    pub fn get(&self, field: Field) -> &'a [u8] {
        match &self.ranges[field.index()] {
            Some(range) => &self.data[range.clone()],
            None => &[],
        }
    }

    /// Byte range of a field within the signed data
    pub fn range(&self, field: Field) -> Option<Range<usize>> {
        self.ranges[field.index()].clone()
    }

    /// Field as text, `None` when the field is absent or empty
    pub fn text(&self, field: Field) -> Option<String> {
        let bytes = self.get(field);
        if bytes.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    /// Signing time as a UTC unix timestamp
    pub fn timestamp(&self) -> Result<i64> {
        let reference = self
            .range(Field::ReferenceId)
            .ok_or_else(|| ProverError::parse(0, "reference id field is missing"))?;
        let start = reference.start + REFERENCE_ID_PREFIX;
        let end = start + TIMESTAMP_LENGTH;
        if end > reference.end {
            return Err(ProverError::parse(
                start,
                format!("reference id too short for a timestamp ({} bytes)", reference.len()),
            ));
        }
        parse_timestamp(&self.data[start..end], start)
    }

    /// Date of birth as a UTC unix timestamp
    pub fn dob(&self) -> Result<i64> {
        let range = self
            .range(Field::Dob)
            .ok_or_else(|| ProverError::parse(0, "date of birth field is missing"))?;
        extract_dob(&self.data[range.clone()]).map_err(|e| match e {
            ProverError::Parse { offset, reason } => ProverError::Parse {
                offset: range.start + offset,
                reason,
            },
            other => other,
        })
    }
}

/// Everything before the trailing signature block
pub fn signed_region(buffer: &[u8]) -> &[u8] {
    &buffer[..buffer.len().saturating_sub(SIGNATURE_LENGTH)]
}

/// Split a payload into signed data and signature
pub fn split_signed_message(buffer: &[u8]) -> Result<(&[u8], &[u8])> {
    if buffer.len() <= SIGNATURE_LENGTH {
        return Err(ProverError::parse(
            buffer.len(),
            format!(
                "payload of {} bytes cannot hold a {SIGNATURE_LENGTH}-byte signature",
                buffer.len()
            ),
        ));
    }
    Ok(buffer.split_at(buffer.len() - SIGNATURE_LENGTH))
}

/// Offsets of the first `count` delimiters
pub fn delimiter_indices(data: &[u8], count: usize) -> Vec<usize> {
    data.iter()
        .enumerate()
        .filter(|&(_, &b)| b == DELIMITER)
        .map(|(i, _)| i)
        .take(count)
        .collect()
}

/// Bytes of one field from a full payload; empty when absent
pub fn extract_field(buffer: &[u8], layout: QrLayout, field: Field) -> &[u8] {
    FieldTable::extract(buffer, layout).get(field)
}

/// Photo bytes: after the last counted delimiter up to the signature
pub fn extract_photo(buffer: &[u8], layout: QrLayout) -> &[u8] {
    extract_field(buffer, layout, Field::Photo)
}

/// Signing time embedded in the reference id, as a UTC unix timestamp.
///
/// The 10 ASCII digits `YYYYMMDDHH` are IST wall-clock time rounded to the
/// hour; for V2 payloads they sit at bytes 9..19.
pub fn extract_timestamp(buffer: &[u8], layout: QrLayout) -> Result<i64> {
    FieldTable::extract(buffer, layout).timestamp()
}

/// Parse a `DD-MM-YYYY` date of birth into the UTC instant of IST midnight.
pub fn extract_dob(field: &[u8]) -> Result<i64> {
    if field.len() != 10 || field[2] != b'-' || field[5] != b'-' {
        return Err(ProverError::parse(0, "date of birth is not DD-MM-YYYY"));
    }
    let day = ascii_number(&field[0..2], 0)?;
    let month = ascii_number(&field[3..5], 3)?;
    let year = ascii_number(&field[6..10], 6)?;

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| ProverError::parse(0, format!("invalid date {day:02}-{month:02}-{year}")))?;
    Ok(ist_to_utc(date, 0))
}

/// Whole years between two UTC instants, counted on IST calendar dates
pub fn age_at(dob: i64, at: i64) -> u32 {
    let (Some(born), Some(now)) = (ist_date(dob), ist_date(at)) else {
        return 0;
    };
    let mut years = now.year() - born.year();
    if (now.month(), now.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Whether someone born at `dob` is at least `years` old at `at`
pub fn is_age_above(dob: i64, at: i64, years: u32) -> bool {
    age_at(dob, at) >= years
}

fn field_range(
    data: &[u8],
    delimiters: &[usize],
    layout: QrLayout,
    field: Field,
) -> Option<Range<usize>> {
    if !layout.has_field(field) {
        return None;
    }

    if field == Field::Photo {
        if delimiters.len() < layout.delimiter_count() {
            return None;
        }
        let start = delimiters.last().map_or(0, |d| d + 1);
        return Some(start..data.len());
    }

    let slot = field.index() + layout.slot_offset();
    let end = *delimiters.get(slot)?;
    let start = match slot {
        0 => 0,
        _ => delimiters[slot - 1] + 1,
    };
    Some(start..end)
}

fn parse_timestamp(digits: &[u8], offset: usize) -> Result<i64> {
    let year = ascii_number(&digits[0..4], offset)?;
    let month = ascii_number(&digits[4..6], offset + 4)?;
    let day = ascii_number(&digits[6..8], offset + 6)?;
    let hour = ascii_number(&digits[8..10], offset + 8)?;

    let date = NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| {
        ProverError::parse(offset, format!("invalid signing date {year}-{month:02}-{day:02}"))
    })?;
    if hour > 23 {
        return Err(ProverError::parse(offset + 8, format!("invalid hour {hour}")));
    }
    Ok(ist_to_utc(date, hour))
}

fn ascii_number(digits: &[u8], offset: usize) -> Result<u32> {
    digits.iter().enumerate().try_fold(0u32, |acc, (i, &b)| {
        if b.is_ascii_digit() {
            Ok(acc * 10 + u32::from(b - b'0'))
        } else {
            Err(ProverError::parse(offset + i, format!("expected ASCII digit, found 0x{b:02x}")))
        }
    })
}

fn ist_to_utc(date: NaiveDate, hour: u32) -> i64 {
    let wall_clock = date.and_hms_opt(hour, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&wall_clock).timestamp() - IST_OFFSET_SECS
}

fn ist_date(timestamp: i64) -> Option<NaiveDate> {
    Utc.timestamp_opt(timestamp + IST_OFFSET_SECS, 0)
        .single()
        .map(|t| t.date_naive())
}
