//! Conversion between wall-clock time and the MS-DOS 16+16-bit packed form
//! (2-second resolution) used by the LFH and CDFH `mod_time`/`mod_date` fields.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// A timestamp in MS-DOS packed form, `(date << 16) | time`.
///
/// Encoding: seconds/2 in bits 0-4, minute in bits 5-10, hour in bits 11-15
/// of `time`; day in bits 0-4, month in bits 5-8, (year-1980) in bits 9-15 of
/// `date`. Two values compare equal iff they round-trip to the same packed
/// 32-bit form, which is exactly what deriving `PartialEq` on the two `u16`
/// fields gives us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosTime {
    pub date: u16,
    pub time: u16,
}

impl DosTime {
    /// The epoch DOS can represent: 1980-01-01 00:00:00.
    pub fn epoch() -> Self {
        DosTime { date: 0x0021, time: 0 }
    }

    pub fn from_packed(date: u16, time: u16) -> Self {
        DosTime { date, time }
    }

    pub fn packed(&self) -> u32 {
        ((self.date as u32) << 16) | self.time as u32
    }

    /// Build a DosTime from a local wall-clock time, clamping any field that
    /// falls outside what the packed form can represent.
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        let year = dt.year().clamp(1980, 2107);
        let month = dt.month().clamp(1, 12);
        let day = dt.day().clamp(1, 31);
        let hour = dt.hour().min(23);
        let minute = dt.minute().min(59);
        let second = dt.second().min(59);

        let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | (day as u16);
        let time = ((hour as u16) << 11) | ((minute as u16) << 5) | ((second / 2) as u16);

        DosTime { date, time }
    }

    /// Build a DosTime from Unix seconds since the epoch, truncated to
    /// 2-second resolution the same way the packed form truncates it.
    pub fn at(unix_seconds: i64) -> Self {
        match chrono::DateTime::from_timestamp(unix_seconds, 0) {
            Some(dt) => Self::from_datetime(&dt.naive_utc()),
            None => Self::epoch(),
        }
    }

    /// Decode back to a wall-clock `NaiveDateTime`, in whatever zone the
    /// original encoding assumed (the format carries no zone information).
    pub fn to_datetime(&self) -> NaiveDateTime {
        let year = 1980 + ((self.date >> 9) & 0x7F) as i32;
        let month = ((self.date >> 5) & 0x0F).max(1) as u32;
        let day = (self.date & 0x1F).max(1) as u32;
        let hour = ((self.time >> 11) & 0x1F) as u32;
        let minute = ((self.time >> 5) & 0x3F) as u32;
        let second = ((self.time & 0x1F) * 2) as u32;

        let month = month.min(12);
        // `day` can claim 29/30/31 in a month that doesn't have it (DOS
        // dates carry no validity guarantee). Try the real day first and
        // only walk downward (31 -> 30 -> 29 -> 28) on failure, rather than
        // blanket-clamping every date to 28.
        let day_floor = day.min(28);
        (day_floor..=day.max(day_floor))
            .rev()
            .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
            .and_then(|d| d.and_hms_opt(hour.min(23), minute.min(59), second.min(59)))
            .unwrap_or_else(|| {
                NaiveDate::from_ymd_opt(1980, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            })
    }
}

impl Default for DosTime {
    fn default() -> Self {
        Self::epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn packs_known_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let dos = DosTime::from_datetime(&dt);

        // year 2024 -> (2024-1980) = 44; month 3; day 15
        let expected_date = (44u16 << 9) | (3 << 5) | 15;
        // hour 13; minute 45; second 30/2 = 15
        let expected_time = (13u16 << 11) | (45 << 5) | 15;

        assert_eq!(dos.date, expected_date);
        assert_eq!(dos.time, expected_time);
    }

    #[test]
    fn round_trips_through_packed_form() {
        let dt = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let dos = DosTime::from_datetime(&dt);
        let back = DosTime::from_packed(dos.date, dos.time);
        assert_eq!(dos, back);
        assert_eq!(dos.packed(), back.packed());
    }

    #[test]
    fn equality_is_by_packed_form() {
        let a = DosTime::from_packed(0x5566, 0x7788);
        let b = DosTime::from_packed(0x5566, 0x7788);
        assert_eq!(a, b);
        assert_eq!(a.packed(), b.packed());
    }

    #[test]
    fn two_second_resolution_truncates_odd_seconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 31)
            .unwrap();
        let dos = DosTime::from_datetime(&dt);
        let back = dos.to_datetime();
        // 31 seconds truncates to the 30-second boundary (31/2 = 15, 15*2 = 30)
        assert_eq!(back.second(), 30);
    }

    #[test]
    fn clamps_years_outside_dos_range() {
        let too_old = NaiveDate::from_ymd_opt(1975, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let dos = DosTime::from_datetime(&too_old);
        assert_eq!(dos.to_datetime().year(), 1980);
    }

    #[test]
    fn decodes_a_real_day_31_without_clamping_to_28() {
        // April encoded with day 31 (a value `from_datetime` would never
        // produce, but the packed form carries no validity guarantee).
        let date = (44u16 << 9) | (4 << 5) | 31;
        let dos = DosTime::from_packed(date, 0);
        // April has 30 days, so 31 should fall back one day, not all the
        // way to 28.
        let back = dos.to_datetime();
        assert_eq!(back.month(), 4);
        assert_eq!(back.day(), 30);
    }

    #[test]
    fn decodes_a_day_29_in_a_non_leap_february_by_falling_back_to_28() {
        // 2023 is not a leap year; February day 29 doesn't exist.
        let date = (43u16 << 9) | (2 << 5) | 29;
        let dos = DosTime::from_packed(date, 0);
        let back = dos.to_datetime();
        assert_eq!(back.month(), 2);
        assert_eq!(back.day(), 28);
    }

    #[test]
    fn decodes_a_day_29_in_a_leap_february_unchanged() {
        // 2024 is a leap year; February 29 is valid and should not be
        // clamped down at all.
        let date = (44u16 << 9) | (2 << 5) | 29;
        let dos = DosTime::from_packed(date, 0);
        let back = dos.to_datetime();
        assert_eq!(back.month(), 2);
        assert_eq!(back.day(), 29);
    }
}
