//! The two on-disk date formats: the 17-byte dec-digit form used by
//! volume descriptors and the 7-byte binary form used by directory
//! records. Both carry a UTC offset in 15-minute units.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// The timestamp every finalize run stamps into the image. Honors the
/// `SOURCE_DATE_EPOCH` convention so repeated builds of the same tree are
/// byte-identical; falls back to the wall clock.
pub fn image_timestamp() -> DateTime<Utc> {
    if let Ok(raw) = std::env::var("SOURCE_DATE_EPOCH") {
        if let Ok(epoch) = raw.trim().parse::<i64>() {
            if let Some(ts) = DateTime::from_timestamp(epoch, 0) {
                log::debug!("using SOURCE_DATE_EPOCH={epoch} for image timestamps");
                return ts;
            }
        }
        log::warn!("ignoring unparsable SOURCE_DATE_EPOCH={raw:?}");
    }
    Utc::now()
}

/// `"YYYYMMDDhhmmssff"` digits plus a signed offset byte.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DecDateTime {
    year: [u8; 4],
    month: [u8; 2],
    day: [u8; 2],
    hour: [u8; 2],
    minute: [u8; 2],
    second: [u8; 2],
    hundredths: [u8; 2],
    offset: u8,
}

impl DecDateTime {
    /// The all-zero-digit value, meaning "not specified".
    pub fn unset() -> Self {
        Self::zeroed_digits()
    }

    fn zeroed_digits() -> Self {
        Self {
            year: [b'0'; 4],
            month: [b'0'; 2],
            day: [b'0'; 2],
            hour: [b'0'; 2],
            minute: [b'0'; 2],
            second: [b'0'; 2],
            hundredths: [b'0'; 2],
            offset: 0,
        }
    }

    fn write_digits(&mut self, digits: &[u8; 16]) {
        self.year.copy_from_slice(&digits[0..4]);
        self.month.copy_from_slice(&digits[4..6]);
        self.day.copy_from_slice(&digits[6..8]);
        self.hour.copy_from_slice(&digits[8..10]);
        self.minute.copy_from_slice(&digits[10..12]);
        self.second.copy_from_slice(&digits[12..14]);
        self.hundredths.copy_from_slice(&digits[14..16]);
    }

    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        let text = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
            ts.year().clamp(0, 9999),
            ts.month(),
            ts.day(),
            ts.hour(),
            ts.minute(),
            ts.second(),
            (ts.nanosecond() / 10_000_000).min(99),
        );
        let mut dt = Self::zeroed_digits();
        dt.write_digits(text.as_bytes().try_into().expect("16 digit timestamp"));
        dt
    }

    /// Decodes the digits; `None` for the unset value or garbage.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        fn digits(raw: &[u8]) -> Option<u32> {
            let mut value = 0u32;
            for &b in raw {
                if !b.is_ascii_digit() {
                    return None;
                }
                value = value * 10 + (b - b'0') as u32;
            }
            Some(value)
        }
        let year = digits(&self.year)?;
        let month = digits(&self.month)?;
        let day = digits(&self.day)?;
        if month == 0 || day == 0 {
            return None;
        }
        let ts = Utc
            .with_ymd_and_hms(
                year as i32,
                month,
                day,
                digits(&self.hour)?,
                digits(&self.minute)?,
                digits(&self.second)?,
            )
            .single()?;
        let offset_minutes = (self.offset as i8) as i64 * 15;
        Some(ts - chrono::Duration::minutes(offset_minutes))
    }

    pub fn offset_quarters(&self) -> i8 {
        self.offset as i8
    }
}

impl core::fmt::Debug for DecDateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text: Vec<u8> = [
            &self.year[..],
            &self.month,
            &self.day,
            &self.hour,
            &self.minute,
            &self.second,
            &self.hundredths,
        ]
        .concat();
        write!(
            f,
            "DecDateTime({} {:+})",
            core::str::from_utf8(&text).unwrap_or("<bad>"),
            self.offset as i8
        )
    }
}

/// The compact directory-record form: years since 1900 and a signed
/// offset in 15-minute units.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RecordedAt {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub offset: u8,
}

impl RecordedAt {
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self {
            year: (ts.year() - 1900).clamp(0, 255) as u8,
            month: ts.month() as u8,
            day: ts.day() as u8,
            hour: ts.hour() as u8,
            minute: ts.minute() as u8,
            second: ts.second() as u8,
            offset: 0,
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let ts = Utc
            .with_ymd_and_hms(
                self.year as i32 + 1900,
                self.month as u32,
                self.day as u32,
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
            )
            .single()?;
        let offset_minutes = (self.offset as i8) as i64 * 15;
        Some(ts - chrono::Duration::minutes(offset_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_eq_size!(DecDateTime, [u8; 17]);
    static_assertions::assert_eq_size!(RecordedAt, [u8; 7]);

    fn sample() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 42).unwrap()
    }

    #[test]
    fn dec_form_digits_are_zero_padded() {
        let dt = DecDateTime::from_datetime(sample());
        assert_eq!(&bytemuck::bytes_of(&dt)[..16], b"2024030709054200");
    }

    #[test]
    fn dec_form_round_trip() {
        let ts = sample();
        let dt = DecDateTime::from_datetime(ts);
        assert_eq!(dt.to_datetime().unwrap(), ts);
    }

    #[test]
    fn unset_dec_form_decodes_to_none() {
        assert_eq!(DecDateTime::unset().to_datetime(), None);
    }

    #[test]
    fn record_form_round_trip() {
        let ts = sample();
        let recorded = RecordedAt::from_datetime(ts);
        assert_eq!(recorded.year, 124);
        assert_eq!(recorded.to_datetime().unwrap(), ts);
    }

    #[test]
    fn quarter_hour_offsets_shift_the_decoded_time() {
        let ts = sample();
        let mut recorded = RecordedAt::from_datetime(ts);
        recorded.offset = (-4i8) as u8; // one hour west of UTC
        assert_eq!(
            recorded.to_datetime().unwrap(),
            ts + chrono::Duration::hours(1)
        );
    }
}
