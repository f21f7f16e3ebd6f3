//! Parsing of `/proc/<pid>/stat` and friends.

use std::fs;
use std::io;
use std::path::Path;

/// The fields of `/proc/<pid>/stat` this crate reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub comm: String,
    pub state: char,
    /// Start time since boot, in clock ticks (field 22)
    pub start_ticks: u64,
}

impl ProcStat {
    /// Zombie or dead: the process has exited even if its entry lingers.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Read and parse `<dir>/stat` for a process or task directory.
///
/// # Errors
/// The underlying read error, or `InvalidData` for a malformed line.
pub fn read_stat(dir: &Path) -> io::Result<ProcStat> {
    let content = fs::read_to_string(dir.join("stat"))?;
    parse_stat(&content)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid stat format"))
}

/// Parse a stat line. Format: "pid (comm) state ppid ..."
///
/// The command name may itself contain parentheses, so the last `)` ends it.
#[must_use]
pub fn parse_stat(stat_line: &str) -> Option<ProcStat> {
    let open = stat_line.find('(')?;
    let close = stat_line.rfind(')')?;
    if open >= close {
        return None;
    }
    let comm = stat_line[open + 1..close].to_string();
    let mut rest = stat_line[close + 1..].split_whitespace();
    let state = rest.next()?.chars().next()?;
    // starttime is the 20th field after the command name
    let start_ticks = rest.nth(18)?.parse().ok()?;
    Some(ProcStat { comm, state, start_ticks })
}

/// Read `<dir>/comm` with the trailing newline removed.
///
/// # Errors
/// The underlying read error.
pub fn read_comm(dir: &Path) -> io::Result<String> {
    Ok(fs::read_to_string(dir.join("comm"))?.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "1234 (my-app) S 1 1234 1234 0 -1 4194304 100 0 0 0 5 3 0 0 20 0 4 0 987654 1000000 200";

    #[test]
    fn test_parse_stat() {
        let stat = parse_stat(STAT).unwrap();
        assert_eq!(stat.comm, "my-app");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.start_ticks, 987_654);
        assert!(!stat.has_exited());
    }

    #[test]
    fn test_parse_stat_with_parens() {
        // Command names can contain parentheses
        let line = "1234 (app (v2)) Z 1 1234 1234 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 42 0 0";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.comm, "app (v2)");
        assert!(stat.has_exited());
        assert_eq!(stat.start_ticks, 42);
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(parse_stat("1234 (my-app) S 1 1234").is_none());
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_read_stat_self() {
        let stat = read_stat(Path::new("/proc/self")).unwrap();
        assert!(!stat.has_exited());
        assert!(!stat.comm.is_empty());
    }
}
