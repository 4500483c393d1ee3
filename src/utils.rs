use crate::network::Timestamp;

// A fast way to check a buffer is all zeros (https://stackoverflow.com/questions/65367552/how-to-efficiently-check-a-vecu8-to-see-if-its-all-zeros).
pub fn is_zero(buf: &[bool]) -> bool {
    let (prefix, aligned, suffix) = unsafe { buf.align_to::<u128>() };

    prefix.iter().all(|&x| !x) && aligned.iter().all(|&x| x == 0) && suffix.iter().all(|&x| !x)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Invalid time '{0}', expected [-]H:MM:SS.")]
pub struct TimeParseError(pub String);

fn parse_time_impl(h: &str, m: &str, s: &str) -> Result<Timestamp, std::num::ParseIntError> {
    let hours: Timestamp = h.parse()?;
    let minutes: Timestamp = m.parse()?;
    let seconds: Timestamp = s.parse()?;
    Ok(hours * 3600 + minutes * 60 + seconds)
}

// Parses "H:MM:SS" into seconds relative to the search reference point. Hours may exceed 24 and
// a leading '-' gives a time before the reference point.
pub fn parse_time(s: &str) -> Result<Timestamp, TimeParseError> {
    let (sign, body) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s),
    };

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() != 3 {
        return Err(TimeParseError(s.to_owned()));
    }

    let (hour, min, sec) = (parts[0], parts[1], parts[2]);
    if hour.is_empty() || min.len() != 2 || sec.len() != 2 {
        return Err(TimeParseError(s.to_owned()));
    }

    parse_time_impl(hour, min, sec).map(|t| sign * t).map_err(|_| TimeParseError(s.to_owned()))
}

pub fn get_time_str(time: Timestamp) -> String {
    let sign = if time < 0 { "-" } else { "" };
    let time = time.unsigned_abs();
    let hours = time / 3600;
    let minutes = (time % 3600) / 60;
    let seconds = time % 60;
    format!("{sign}{:02}:{:02}:{:02}", hours, minutes, seconds)
}

// Durations are printed without hours when short, e.g. "5m" or "1h05m30s".
pub fn get_duration_str(duration: Timestamp) -> String {
    let sign = if duration < 0 { "-" } else { "" };
    let duration = duration.unsigned_abs();
    let (h, m, s) = (duration / 3600, (duration % 3600) / 60, duration % 60);
    match (h, m, s) {
        (0, 0, s) => format!("{sign}{s}s"),
        (0, m, 0) => format!("{sign}{m}m"),
        (0, m, s) => format!("{sign}{m}m{s:02}s"),
        (h, m, 0) => format!("{sign}{h}h{m:02}m"),
        (h, m, s) => format!("{sign}{h}h{m:02}m{s:02}s"),
    }
}
