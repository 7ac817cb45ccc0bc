// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::time::SystemTime;

/// A broken-down UTC timestamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CivilTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

/// Break a [`SystemTime`] down into UTC calendar fields.
///
/// The conversion leans on `httpdate`'s IMF-fixdate formatter, which is
/// already part of the stack for the `Date` header, instead of carrying a
/// separate calendar implementation.
#[must_use]
pub fn civil_utc(time: SystemTime) -> CivilTime {
    // e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
    let formatted = httpdate::fmt_http_date(time);

    let number = |range: std::ops::Range<usize>| -> u16 {
        formatted[range].parse().unwrap_or(0)
    };

    let month = match &formatted[8..11] {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        _ => 12,
    };

    let millisecond = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.subsec_millis() as u16)
        .unwrap_or(0);

    CivilTime {
        year: number(12..16),
        month,
        day: number(5..7) as u8,
        hour: number(17..19) as u8,
        minute: number(20..22) as u8,
        second: number(23..25) as u8,
        millisecond,
    }
}

/// The compact `yyyyMMddHHmmss` form used in rotated file names.
#[must_use]
pub fn compact_timestamp(time: SystemTime) -> String {
    let civil = civil_utc(time);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        civil.year, civil.month, civil.day, civil.hour, civil.minute, civil.second,
    )
}
