//! Unix `ls -l` style lines for `LIST` and `STAT`.

use chrono::{DateTime, Utc};

use crate::adapter::{FileKind, FileStat};

/// One `LIST` line for `stat`, stamped with `modified`.
pub fn format_line(stat: &FileStat, modified: DateTime<Utc>) -> String {
    let mode = match stat.kind {
        FileKind::Directory => "drwxr-xr-x",
        FileKind::File => "-rw-r--r--",
    };
    format!(
        "{mode} 1 gantry gantry {size:>12} {date} {name}",
        size = stat.size,
        date = modified.format("%b %d %H:%M"),
        name = stat.name,
    )
}

/// `LIST` lines for every entry, all stamped with `modified`.
pub fn format_listing(entries: &[FileStat], modified: DateTime<Utc>) -> Vec<String> {
    entries.iter().map(|e| format_line(e, modified)).collect()
}

/// `NLST` lines: names only.
pub fn format_names(entries: &[FileStat]) -> Vec<String> {
    entries.iter().map(|e| e.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap()
    }

    #[test]
    fn directory_line() {
        let stat = FileStat {
            name: "plugins".into(),
            kind: FileKind::Directory,
            size: 0,
        };
        assert_eq!(
            format_line(&stat, at()),
            "drwxr-xr-x 1 gantry gantry            0 Mar 07 09:05 plugins"
        );
    }

    #[test]
    fn file_line_carries_size() {
        let stat = FileStat {
            name: "server.jar".into(),
            kind: FileKind::File,
            size: 42,
        };
        let line = format_line(&stat, at());
        assert!(line.starts_with("-rw-r--r--"));
        assert!(line.ends_with("42 Mar 07 09:05 server.jar"));
    }

    #[test]
    fn names_only() {
        let entries = vec![FileStat {
            name: "eula.txt".into(),
            kind: FileKind::File,
            size: 0,
        }];
        assert_eq!(format_names(&entries), vec!["eula.txt".to_string()]);
        assert_eq!(format_listing(&entries, at()).len(), 1);
    }
}
