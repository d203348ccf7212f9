//! NZB reading on top of `nntp_rs::parse_nzb`: files, their kind and
//! segment message ids.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::warn;

use super::TriageError;

static SPLIT_ARCHIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(r\d{2,3}|\d{3}|part\d+\.rar)$").expect("valid split archive pattern")
});

const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "webm"];
const ARCHIVE_EXTENSIONS: &[&str] = &["rar", "7z", "zip"];

/// What a file in the NZB holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Media,
    Archive,
    Par2,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NzbFile {
    pub subject: String,
    pub filename: String,
    pub kind: FileKind,
    /// Message ids ordered by segment number.
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NzbDocument {
    /// `<meta type="title">` from the head, when present.
    pub title: Option<String>,
    pub files: Vec<NzbFile>,
}

impl NzbDocument {
    pub fn media_files(&self) -> impl Iterator<Item = &NzbFile> {
        self.files.iter().filter(|f| f.kind == FileKind::Media)
    }

    /// No directly playable file, only archives.
    pub fn is_archived(&self) -> bool {
        self.media_files().next().is_none() && self.files.iter().any(|f| f.kind == FileKind::Archive)
    }
}

/// Parse an NZB document. Files without usable segments are skipped.
pub fn parse_nzb(xml: &str) -> Result<NzbDocument, TriageError> {
    let nzb = nntp_rs::parse_nzb(xml).map_err(|e| TriageError::Parse(e.to_string()))?;

    let mut files = Vec::with_capacity(nzb.files.len());
    for file in nzb.files {
        if file.segments.is_empty() {
            warn!(subject = %file.subject, "Skipping NZB file without segments");
            continue;
        }

        let mut segments = file.segments;
        segments.sort_by_key(|s| s.number);

        let filename = filename_from_subject(&file.subject);
        files.push(NzbFile {
            kind: classify(&filename),
            subject: file.subject,
            filename,
            segments: segments.into_iter().map(|s| s.message_id).collect(),
        });
    }

    if files.is_empty() {
        return Err(TriageError::Parse("no files with segments".to_string()));
    }
    Ok(NzbDocument {
        title: nzb.meta.get("title").cloned(),
        files,
    })
}

/// First quoted name in a yEnc subject, else the whole subject.
fn filename_from_subject(subject: &str) -> String {
    if let Some(start) = subject.find('"') {
        if let Some(end) = subject[start + 1..].find('"') {
            let name = &subject[start + 1..start + 1 + end];
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    subject.trim().to_string()
}

fn classify(filename: &str) -> FileKind {
    let lower = filename.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map_or("", |(_, e)| e);
    if ext == "par2" {
        FileKind::Par2
    } else if MEDIA_EXTENSIONS.contains(&ext) {
        FileKind::Media
    } else if ARCHIVE_EXTENSIONS.contains(&ext) || SPLIT_ARCHIVE_RE.is_match(&lower) {
        FileKind::Archive
    } else {
        FileKind::Other
    }
}
