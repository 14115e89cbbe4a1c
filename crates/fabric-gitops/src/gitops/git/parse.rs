//! Parsing of git's textual output.

use std::process::Output;

use super::types::FileStatus;

/// Formats a failed command's output, preferring stderr.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Ahead/behind counts from a `## branch...origin/branch [ahead 1, behind 2]`
/// header. `None` when the header carries no bracket.
pub fn extract_ahead_behind(line: &str) -> Option<(u32, u32)> {
    let bracket_start = line.find('[')?;
    let bracket_end = line.find(']')?;
    if bracket_end <= bracket_start {
        return None;
    }

    let mut ahead = 0;
    let mut behind = 0;
    for part in line[bracket_start + 1..bracket_end].split(',') {
        let part = part.trim();
        if let Some(n) = part.strip_prefix("ahead ") {
            ahead = n.parse().unwrap_or(0);
        } else if let Some(n) = part.strip_prefix("behind ") {
            behind = n.parse().unwrap_or(0);
        }
    }

    Some((ahead, behind))
}

/// Number of files reported by a pull's diffstat summary line.
pub fn count_changed_files(output: &str) -> u32 {
    output
        .lines()
        .filter(|line| line.contains("file") && line.contains("changed"))
        .find_map(|line| {
            line.split_whitespace()
                .find_map(|word| word.parse::<u32>().ok())
        })
        .unwrap_or(0)
}

/// Parsed `git status --porcelain -b`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PorcelainStatus {
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<FileStatus>,
}

pub fn parse_porcelain_status(text: &str) -> PorcelainStatus {
    let mut status = PorcelainStatus::default();

    for line in text.lines() {
        if line.starts_with("##") {
            if let Some((ahead, behind)) = extract_ahead_behind(line) {
                status.ahead = ahead;
                status.behind = behind;
            }
            continue;
        }
        if line.len() < 3 {
            continue;
        }

        let mut codes = line.chars();
        let index_status = codes.next().unwrap_or(' ');
        let worktree_status = codes.next().unwrap_or(' ');
        let raw_path = line[3..].trim();
        // Renames are reported as "old -> new"
        let path = raw_path
            .rsplit(" -> ")
            .next()
            .unwrap_or(raw_path)
            .trim_matches('"')
            .to_string();

        let (code, staged) = if index_status == '?' {
            ('?', false)
        } else if worktree_status == 'D' {
            ('D', false)
        } else if index_status != ' ' {
            (index_status, true)
        } else if worktree_status != ' ' {
            (worktree_status, false)
        } else {
            continue;
        };

        status.files.push(FileStatus {
            path,
            status: code,
            staged,
        });
    }

    status
}
