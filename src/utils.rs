/// Seconds as `HH:MM:SS`, hours are not wrapped at 24
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Parses `hh:mm:ss` or `mm:ss` into total seconds.
///
/// Any other number of `:` segments, a segment that is not a non-negative
/// integer, or a total that does not fit in a `u64` yields `None`.
pub fn parse_clock(s: &str) -> Option<u64> {
    let parts = s
        .split(':')
        .map(|p| p.trim().parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };

    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

/// At most `max` bytes of `text`, cut on a char boundary, for log lines
pub fn preview(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
