use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Cut `s` to at most `max_width` terminal columns, ending in an ellipsis
/// when anything was dropped.
pub fn truncate_unicode(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }
    let mut result = String::new();
    let mut width = 0;
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width.saturating_sub(1) {
            result.push('\u{2026}');
            break;
        }
        result.push(ch);
        width += ch_width;
    }
    result
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.1}%")
}

/// `3d 04:05:06` style uptime.
pub fn format_uptime(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, minutes, secs) = (rem / 3600, rem % 3600 / 60, rem % 60);
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_the_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(8192), "8 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.5 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn truncation_respects_wide_chars() {
        assert_eq!(truncate_unicode("short", 10), "short");
        assert_eq!(truncate_unicode("/usr/bin/python3", 8), "/usr/bi\u{2026}");
        // Each CJK char is two columns wide.
        assert_eq!(truncate_unicode("日本語テキスト", 7), "日本語\u{2026}");
    }

    #[test]
    fn uptime_with_and_without_days() {
        assert_eq!(format_uptime(59.9), "00:00:59");
        assert_eq!(format_uptime(3.0 * 86_400.0 + 4.0 * 3600.0 + 5.0 * 60.0 + 6.0), "3d 04:05:06");
    }
}
