//! Access-behavior classification.
//!
//! Pure, total mapping from request attributes to a small behavior
//! taxonomy. The classifier is an ordered list of predicate rules evaluated
//! first-match-wins; player identity is the most reliable signal and
//! overrides every path-based heuristic.

use std::fmt;

/// Why a media path was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// A dedicated media player or playback SDK is streaming the file.
    PlayerPlay,
    /// A browser is streaming the file directly (ranged requests or a
    /// browser-native-playable type).
    DirectPlay,
    /// The file is being downloaded.
    Download,
    /// The file was surfaced through the browser UI or the fs API.
    BrowserView,
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Behavior::PlayerPlay => "播放器播放",
            Behavior::DirectPlay => "直接播放",
            Behavior::Download => "下载",
            Behavior::BrowserView => "浏览器查看",
        };
        f.write_str(s)
    }
}

/// Known media-player and playback-SDK User-Agent signatures.
/// Matched case-sensitively: these are exact product tokens.
const PLAYER_SIGNATURES: &[&str] = &[
    "VLC",
    "MPlayer",
    "mpv",
    "PotPlayer",
    "KMPlayer",
    "IINA",
    "Kodi",
    "Plex",
    "Emby",
    "Jellyfin",
    "QuickTime",
    "Windows-Media-Player",
    "RealPlayer",
    "GStreamer",
    "lavf", // FFmpeg/libavformat
    "NSPlayer",
    "stagefright", // Android media framework
    "ExoPlayer",
    "AppleCoreMedia",
];

const BROWSER_TOKENS: &[&str] = &[
    "Mozilla", "Chrome", "Safari", "Firefox", "Edge", "Opera",
    // legacy Internet Explorer
    "MSIE", "Trident",
];

/// Clients that advertise a browser token but are not browsers.
/// Matched case-insensitively.
const NON_BROWSER_TOKENS: &[&str] = &["curl", "wget", "axios", "python", "java", "go-http-client"];

/// Image types the classifier treats as browser-viewable.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico", "heic",
];

/// Image types detected as media when scanning fs listings but not
/// browser-viewable; fetching one is a download.
const DETECT_ONLY_IMAGE_EXTENSIONS: &[&str] = &["tiff"];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp", "rm", "rmvb",
    "ts", "m3u8",
];

/// Video types browsers play natively without a player plugin.
const BROWSER_VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "m3u8"];

pub const API_PREFIX: &str = "/api/";
pub const PROXY_PREFIX: &str = "/p/";
pub const DOWNLOAD_PREFIX: &str = "/d/";
pub const SHARED_DOWNLOAD_PREFIX: &str = "/sd/";

/// Request attributes the classifier reads.
#[derive(Debug, Clone, Copy)]
pub struct AccessSignals<'a> {
    pub path: &'a str,
    pub user_agent: &'a str,
    pub has_range: bool,
}

fn extension(path: &str) -> String {
    match path.rsplit('/').next().and_then(|name| name.rsplit_once('.')) {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

pub fn is_player(user_agent: &str) -> bool {
    PLAYER_SIGNATURES.iter().any(|sig| user_agent.contains(sig))
}

/// Browser heuristic: a known browser token, not a known non-browser
/// client, and not already a player (player match takes precedence).
pub fn is_browser(user_agent: &str) -> bool {
    if is_player(user_agent) {
        return false;
    }
    if !BROWSER_TOKENS.iter().any(|t| user_agent.contains(t)) {
        return false;
    }
    let lower = user_agent.to_ascii_lowercase();
    !NON_BROWSER_TOKENS.iter().any(|t| lower.contains(t))
}

/// Whether a file name (or path) has a known still-image or video extension.
pub fn is_media_name(name: &str) -> bool {
    let ext = extension(name);
    IMAGE_EXTENSIONS.contains(&ext.as_str())
        || DETECT_ONLY_IMAGE_EXTENSIONS.contains(&ext.as_str())
        || VIDEO_EXTENSIONS.contains(&ext.as_str())
}

pub fn is_media_path(path: &str) -> bool {
    is_media_name(path)
}

type Rule = fn(&AccessSignals<'_>) -> Option<Behavior>;

fn rule_player(s: &AccessSignals<'_>) -> Option<Behavior> {
    is_player(s.user_agent).then_some(Behavior::PlayerPlay)
}

fn rule_image(s: &AccessSignals<'_>) -> Option<Behavior> {
    IMAGE_EXTENSIONS
        .contains(&extension(s.path).as_str())
        .then_some(Behavior::BrowserView)
}

fn rule_api(s: &AccessSignals<'_>) -> Option<Behavior> {
    s.path.starts_with(API_PREFIX).then_some(Behavior::BrowserView)
}

fn rule_proxy_play(s: &AccessSignals<'_>) -> Option<Behavior> {
    s.path.starts_with(PROXY_PREFIX).then_some(Behavior::DirectPlay)
}

fn rule_download_paths(s: &AccessSignals<'_>) -> Option<Behavior> {
    if !s.path.starts_with(DOWNLOAD_PREFIX) && !s.path.starts_with(SHARED_DOWNLOAD_PREFIX) {
        return None;
    }
    let browser = is_browser(s.user_agent);
    if s.has_range && browser {
        return Some(Behavior::DirectPlay);
    }
    if browser && BROWSER_VIDEO_EXTENSIONS.contains(&extension(s.path).as_str()) {
        return Some(Behavior::DirectPlay);
    }
    Some(Behavior::Download)
}

fn rule_range(s: &AccessSignals<'_>) -> Option<Behavior> {
    if !s.has_range {
        return None;
    }
    Some(if is_browser(s.user_agent) {
        Behavior::DirectPlay
    } else {
        Behavior::Download
    })
}

/// Rules in precedence order; the first rule producing a behavior wins,
/// and anything unmatched is a download.
const RULES: &[Rule] = &[
    rule_player,
    rule_image,
    rule_api,
    rule_proxy_play,
    rule_download_paths,
    rule_range,
];

pub fn classify(path: &str, user_agent: &str, has_range: bool) -> Behavior {
    let signals = AccessSignals {
        path,
        user_agent,
        has_range,
    };
    RULES
        .iter()
        .find_map(|rule| rule(&signals))
        .unwrap_or(Behavior::Download)
}
