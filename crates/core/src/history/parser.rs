//! Release title tokenizer.
//!
//! Splits a scene-style release name into the title words that identify the
//! content and the technical markers (year, episode, resolution, source,
//! codec, languages, tags, group) that describe a particular release of it.

use serde::{Deserialize, Serialize};

const CONTAINER_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "wmv", "mov", "nzb", "rar", "7z", "zip", "par2",
];

const RESOLUTIONS: &[&str] = &["480p", "576p", "720p", "1080p", "1080i", "2160p", "4k", "uhd"];

const SOURCES: &[&str] = &[
    "web", "webdl", "webrip", "bluray", "bdrip", "brrip", "bdremux", "remux", "hdtv", "pdtv",
    "dvdrip", "dvd", "dvdr", "hdrip", "hdcam", "cam", "telesync", "amzn", "nf", "dsnp", "hmax",
    "atvp",
];

const CODECS: &[&str] = &[
    "x264", "x265", "h264", "h265", "hevc", "avc", "xvid", "divx", "av1", "vp9",
];

/// Quality/audio/HDR vocabulary that terminates the title region.
const TAGS: &[&str] = &[
    "hdr", "hdr10", "hdr10plus", "dv", "dovi", "sdr", "10bit", "8bit", "atmos", "dts", "dtshd",
    "truehd", "ddp", "ddp5", "dd5", "dd", "ac3", "eac3", "aac", "flac", "opus", "proper",
    "repack", "rerip", "internal", "extended", "remastered", "imax", "uncut", "unrated", "dl",
    "multi", "dual", "subbed", "dubbed",
];

const LANGUAGES: &[(&str, &str)] = &[
    ("english", "english"),
    ("eng", "english"),
    ("german", "german"),
    ("ger", "german"),
    ("deutsch", "german"),
    ("french", "french"),
    ("fre", "french"),
    ("vff", "french"),
    ("truefrench", "french"),
    ("spanish", "spanish"),
    ("spa", "spanish"),
    ("esp", "spanish"),
    ("castellano", "spanish"),
    ("italian", "italian"),
    ("ita", "italian"),
    ("russian", "russian"),
    ("rus", "russian"),
    ("japanese", "japanese"),
    ("jpn", "japanese"),
    ("korean", "korean"),
    ("kor", "korean"),
    ("hindi", "hindi"),
    ("portuguese", "portuguese"),
    ("por", "portuguese"),
    ("dutch", "dutch"),
    ("nld", "dutch"),
    ("polish", "polish"),
    ("pol", "polish"),
    ("swedish", "swedish"),
    ("nordic", "nordic"),
];

/// Structured view of a release name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedRelease {
    /// Title words, in order of appearance.
    pub title_words: Vec<String>,
    pub year: Option<u16>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub resolution: Option<String>,
    pub source: Option<String>,
    pub codec: Option<String>,
    pub languages: Vec<String>,
    pub tags: Vec<String>,
    pub group: Option<String>,
}

impl ParsedRelease {
    /// Rank used to order candidates; higher is better.
    pub fn resolution_rank(&self) -> u8 {
        match self.resolution.as_deref() {
            Some("2160p") | Some("4k") | Some("uhd") => 4,
            Some("1080p") | Some("1080i") => 3,
            Some("720p") => 2,
            Some("576p") | Some("480p") => 1,
            _ => 0,
        }
    }
}

/// Lowercase, strip a trailing container/archive extension and fold every
/// separator run into a single space.
pub fn normalize_title(title: &str) -> String {
    let mut lowered = title.trim().to_lowercase();
    if let Some((stem, ext)) = lowered.rsplit_once('.') {
        if CONTAINER_EXTENSIONS.contains(&ext) && !stem.is_empty() {
            lowered = stem.to_string();
        }
    }

    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Parse a release name.
pub fn parse_release(title: &str) -> ParsedRelease {
    let normalized = normalize_title(title);
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    let mut parsed = ParsedRelease::default();
    let mut title_ended = false;
    let mut last_unrecognized: Option<&str> = None;

    for (idx, token) in tokens.iter().copied().enumerate() {
        if !title_ended {
            // A leading year-like number belongs to the title ("2012", "1917").
            if idx > 0 && is_title_terminator(token) {
                title_ended = true;
            } else {
                parsed.title_words.push(token.to_string());
                continue;
            }
        }

        last_unrecognized = None;
        if let Some((season, episode)) = parse_episode_marker(token) {
            parsed.season.get_or_insert(season);
            if let Some(ep) = episode {
                parsed.episode.get_or_insert(ep);
            }
        } else if let Some(year) = parse_year(token) {
            parsed.year.get_or_insert(year);
        } else if RESOLUTIONS.contains(&token) {
            parsed.resolution.get_or_insert_with(|| token.to_string());
        } else if SOURCES.contains(&token) {
            parsed.source.get_or_insert_with(|| token.to_string());
        } else if CODECS.contains(&token) {
            parsed.codec.get_or_insert_with(|| token.to_string());
        } else if let Some(lang) = language_of(token) {
            if !parsed.languages.iter().any(|l| l == lang) {
                parsed.languages.push(lang.to_string());
            }
        } else if TAGS.contains(&token) {
            parsed.tags.push(token.to_string());
        } else {
            last_unrecognized = Some(token);
        }
    }

    // Only the very last token can be the group, and only if nothing claimed it.
    if title_ended {
        parsed.group = last_unrecognized.map(String::from);
    }

    parsed
}

fn is_title_terminator(token: &str) -> bool {
    parse_episode_marker(token).is_some()
        || parse_year(token).is_some()
        || RESOLUTIONS.contains(&token)
        || SOURCES.contains(&token)
        || CODECS.contains(&token)
        || TAGS.contains(&token)
}

fn parse_year(token: &str) -> Option<u16> {
    if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: u16 = token.parse().ok()?;
    (1900..=2099).contains(&year).then_some(year)
}

/// `s01e02`, `s01` (season pack) or `1x02`.
fn parse_episode_marker(token: &str) -> Option<(u32, Option<u32>)> {
    if let Some(rest) = token.strip_prefix('s') {
        let season_len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if season_len == 0 || season_len > 2 {
            return None;
        }
        let season: u32 = rest[..season_len].parse().ok()?;
        let tail = &rest[season_len..];
        if tail.is_empty() {
            return Some((season, None));
        }
        let ep_digits = tail.strip_prefix('e')?;
        if ep_digits.is_empty() || ep_digits.len() > 3 || !ep_digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return Some((season, Some(ep_digits.parse().ok()?)));
    }

    let (season, episode) = token.split_once('x')?;
    if season.is_empty()
        || season.len() > 2
        || episode.len() < 2
        || episode.len() > 3
        || !season.bytes().all(|b| b.is_ascii_digit())
        || !episode.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some((season.parse().ok()?, Some(episode.parse().ok()?)))
}

fn language_of(token: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(alias, _)| *alias == token)
        .map(|(_, lang)| *lang)
}
