use std::time::{SystemTime, UNIX_EPOCH};

/// Minimal RFC 7231 IMF-fixdate formatter (`Date`/`Last-Modified`
/// headers); a single call site didn't justify a dedicated date crate.
pub fn http_date(t: SystemTime) -> String {
    let secs = t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    http_date_from_secs(secs)
}

pub fn http_date_now() -> String {
    http_date(SystemTime::now())
}

fn http_date_from_secs(secs: u64) -> String {
    const DAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let days_since_epoch = secs / 86400;
    let mut rem = secs % 86400;
    let hour = rem / 3600;
    rem %= 3600;
    let min = rem / 60;
    let sec = rem % 60;

    let mut days = days_since_epoch as i64;
    let mut year = 1970i64;
    loop {
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let year_len = if leap { 366 } else { 365 };
        if days < year_len {
            break;
        }
        days -= year_len;
        year += 1;
    }
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let month_lens = [31, if leap { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0;
    for (i, len) in month_lens.iter().enumerate() {
        if days < *len {
            month = i;
            break;
        }
        days -= len;
    }

    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        DAYS[(days_since_epoch % 7) as usize],
        days + 1,
        MONTHS[month],
        year,
        hour,
        min,
        sec
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_to_jan_1_1970() {
        assert_eq!(http_date_from_secs(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
