//! Split a script into its submission block and the job code around it

use log::debug;

use crate::config::Delimiters;
use crate::error::{Error, Result};

/// A script cut into the code that runs at submission time and the code that runs in the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segments {
    pub submission: Option<SubmissionSegment>,
    pub job: JobSegment,
}

/// Code between the delimiters, evaluated once per submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSegment {
    pub code: String,
    /// 1-based script line of the first code line (the line after the start delimiter)
    pub first_line: usize,
}

impl SubmissionSegment {
    /// Map a 1-based line of the submission code to its line in the script
    pub fn original_line(&self, line: usize) -> usize {
        self.first_line + line.saturating_sub(1)
    }
}

/// Everything outside the submission block
///
/// Lines before the block (the prefix, usually a shebang) and after it are kept in order. The
/// block itself is remembered only by the number of lines it covered, so job lines can be put back
/// at their original positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSegment {
    lines: Vec<String>,
    prefix_lines: usize,
    line_offset: usize,
}

impl JobSegment {
    /// A job segment that already sits at its original line numbers
    pub fn from_aligned(text: &str) -> JobSegment {
        JobSegment {
            lines: text.lines().map(str::to_string).collect(),
            prefix_lines: 0,
            line_offset: 0,
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Number of script lines taken by the submission block, delimiters included
    pub fn line_offset(&self) -> usize {
        self.line_offset
    }

    /// Map a 1-based job segment line to its line in the script
    pub fn original_line(&self, line: usize) -> usize {
        if line <= self.prefix_lines {
            line
        } else {
            line + self.line_offset
        }
    }

    /// Job code with the submission block blanked out, so errors report script line numbers
    pub fn aligned(&self) -> String {
        let mut out: Vec<&str> = Vec::with_capacity(self.lines.len() + self.line_offset);
        out.extend(self.lines[..self.prefix_lines].iter().map(String::as_str));
        out.extend(std::iter::repeat("").take(self.line_offset));
        out.extend(self.lines[self.prefix_lines..].iter().map(String::as_str));
        let mut text = out.join("\n");
        text.push('\n');
        text
    }

    /// Interpreter named by a `#!` first line, if the script has one
    pub fn interpreter(&self) -> Option<&str> {
        self.lines
            .first()
            .and_then(|line| line.strip_prefix("#!"))
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }
}

/// Locate the submission block and split the script around it
pub fn extract(text: &str, delimiters: &Delimiters) -> Result<Segments> {
    let start_marker = delimiters.start.trim();
    let end_marker = delimiters.end.trim();

    let mut start: Option<usize> = None;
    let mut block: Option<(usize, usize)> = None;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed == start_marker {
            if let Some(open) = start {
                return Err(malformed(
                    line_no,
                    format!("start delimiter while the block opened at line {open} is still open"),
                ));
            }
            if let Some((open, _)) = block {
                return Err(malformed(
                    line_no,
                    format!("second submission block, the first one starts at line {open}"),
                ));
            }
            start = Some(line_no);
        } else if trimmed == end_marker {
            match start.take() {
                Some(open) => block = Some((open, line_no)),
                None => {
                    return Err(malformed(
                        line_no,
                        "end delimiter without a preceding start delimiter".to_string(),
                    ))
                }
            }
        }
    }

    if let Some(open) = start {
        return Err(malformed(open, "start delimiter is never closed".to_string()));
    }

    let lines: Vec<&str> = text.lines().collect();
    let Some((open, close)) = block else {
        debug!("No submission block found, the whole script is job code");
        return Ok(Segments {
            submission: None,
            job: JobSegment {
                lines: lines.iter().map(|line| line.to_string()).collect(),
                prefix_lines: 0,
                line_offset: 0,
            },
        });
    };

    debug!("Submission block spans lines {open} to {close}");
    // open and close are 1-based, the block code is strictly between them
    let code = lines[open..close - 1].join("\n");
    let mut job_lines: Vec<String> = lines[..open - 1].iter().map(|l| l.to_string()).collect();
    job_lines.extend(lines[close..].iter().map(|l| l.to_string()));

    Ok(Segments {
        submission: Some(SubmissionSegment {
            code,
            first_line: open + 1,
        }),
        job: JobSegment {
            lines: job_lines,
            prefix_lines: open - 1,
            line_offset: close - open + 1,
        },
    })
}

fn malformed(line: usize, reason: String) -> Error {
    Error::MalformedSubmissionBlock { line, reason }
}
