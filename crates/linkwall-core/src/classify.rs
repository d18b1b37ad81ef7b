//! URL extraction, redirect unwrapping and link-type classification.
//!
//! Classification runs the per-variant rules in [`RULES`] order and takes the
//! first hit. Direct-media rules come first and every platform rule rejects
//! paths that end in a media extension, so at most one rule can claim a URL.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhttps?://[^\s<>"'`]+"#).unwrap());
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static YT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{6,}$").unwrap());
static YT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s?)?$").unwrap());

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "bmp"];
const VIDEO_EXTS: &[&str] = &["mp4", "webm", "mov", "m4v", "gifv"];
const AUDIO_EXTS: &[&str] = &["mp3", "ogg", "wav", "flac", "m4a", "opus"];

/// Nested redirect wrappers unwrapped before classification.
const MAX_REDIRECT_DEPTH: usize = 3;

/// Twitch top-level paths that are not channels.
const TWITCH_RESERVED: &[&str] = &["directory", "videos", "settings", "p", "downloads", "search"];

/// Closed set of link shapes the renderer knows how to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LinkKind {
    Image,
    Video,
    Audio,
    #[serde(rename_all = "camelCase")]
    YouTube {
        video_id: String,
        start_secs: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Twitter { status_id: String },
    #[serde(rename_all = "camelCase")]
    Reddit { subreddit: Option<String>, post_id: String },
    TwitchClip { slug: String },
    TwitchVod { id: String },
    TwitchChannel { channel: String },
    #[serde(rename_all = "camelCase")]
    KickClip { channel: String, clip_id: String },
    KickChannel { channel: String },
    Streamable { id: String },
    #[serde(rename_all = "camelCase")]
    TikTok { video_id: String },
    #[serde(rename_all = "camelCase")]
    Imgur { album_id: String },
    Spotify { item: String, id: String },
    Link,
}

impl LinkKind {
    /// Key used for per-platform display modes.
    pub fn platform(&self) -> &'static str {
        match self {
            LinkKind::Image => "image",
            LinkKind::Video => "video",
            LinkKind::Audio => "audio",
            LinkKind::YouTube { .. } => "youtube",
            LinkKind::Twitter { .. } => "twitter",
            LinkKind::Reddit { .. } => "reddit",
            LinkKind::TwitchClip { .. } | LinkKind::TwitchVod { .. } | LinkKind::TwitchChannel { .. } => {
                "twitch"
            }
            LinkKind::KickClip { .. } | LinkKind::KickChannel { .. } => "kick",
            LinkKind::Streamable { .. } => "streamable",
            LinkKind::TikTok { .. } => "tiktok",
            LinkKind::Imgur { .. } => "imgur",
            LinkKind::Spotify { .. } => "spotify",
            LinkKind::Link => "link",
        }
    }
}

/// Coarse media family, used by the renderer and the layout height estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Embed,
    Link,
}

/// Everything derived from one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The URL after punctuation trimming and redirect unwrapping.
    pub url: String,
    pub kind: LinkKind,
    pub media: MediaKind,
    pub embed_url: Option<String>,
    pub directly_playable: bool,
}

impl Classified {
    fn link(url: String) -> Self {
        Self {
            url,
            kind: LinkKind::Link,
            media: MediaKind::Link,
            embed_url: None,
            directly_playable: false,
        }
    }
}

type Rule = fn(&Url) -> Option<LinkKind>;

/// Fixed precedence order.
const RULES: &[Rule] = &[
    direct_image,
    direct_video,
    direct_audio,
    youtube,
    twitter,
    reddit,
    twitch,
    kick,
    streamable,
    tiktok,
    imgur,
    spotify,
];

// ── Extraction ──────────────────────────────────────────────────

/// Find every http(s) URL in `text`, in order, with trailing punctuation removed.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| trim_trailing_punctuation(m.as_str()).to_string())
        .filter(|u| u.len() > "https://".len())
        .collect()
}

/// Strip sentence punctuation glued to the end of a URL. Closing brackets are
/// only stripped when unbalanced, so `.../Foo_(bar)` survives.
pub fn trim_trailing_punctuation(url: &str) -> &str {
    let mut end = url.len();
    loop {
        let Some(last) = url[..end].chars().last() else {
            break;
        };
        let strip = match last {
            '.' | ',' | ';' | ':' | '!' | '?' | '*' | '\'' | '"' => true,
            ')' => unbalanced(&url[..end], '(', ')'),
            ']' => unbalanced(&url[..end], '[', ']'),
            '}' => unbalanced(&url[..end], '{', '}'),
            _ => false,
        };
        if !strip {
            break;
        }
        end -= last.len_utf8();
    }
    &url[..end]
}

fn unbalanced(s: &str, open: char, close: char) -> bool {
    s.matches(close).count() > s.matches(open).count()
}

/// Lower-cased, fragment-free form used for link bans.
pub fn normalize_link(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment.trim().to_lowercase()
}

// ── Redirect unwrapping ─────────────────────────────────────────

/// Follow wrapper links that carry their destination in the URL itself.
pub fn resolve_redirects(url: Url) -> Url {
    let mut current = url;
    for _ in 0..MAX_REDIRECT_DEPTH {
        match unwrap_once(&current) {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

fn unwrap_once(url: &Url) -> Option<Url> {
    let host = url.host_str()?.to_lowercase();
    let path = url.path();

    let target = if host.starts_with("images-ext-") && host.ends_with(".discordapp.net") {
        discord_external(path)
    } else if host_is(&host, "google.com") && path == "/url" {
        query_param(url, &["q", "url"])
    } else if host == "l.facebook.com" && path == "/l.php" {
        query_param(url, &["u"])
    } else if host == "out.reddit.com" {
        query_param(url, &["url"])
    } else if host_is(&host, "youtube.com") && path == "/redirect" {
        query_param(url, &["q"])
    } else if host == "t.umblr.com" && path == "/redirect" {
        query_param(url, &["z"])
    } else if path.to_lowercase().contains("proxy") {
        query_param(url, &["url", "u"])
    } else {
        None
    }?;

    let parsed = Url::parse(&target).ok()?;
    matches!(parsed.scheme(), "http" | "https").then_some(parsed)
}

/// `/external/<hash>/<scheme>/<host>/<path...>`
fn discord_external(path: &str) -> Option<String> {
    let mut segments = path.trim_start_matches('/').splitn(4, '/');
    if segments.next()? != "external" {
        return None;
    }
    let _hash = segments.next()?;
    let scheme = segments.next()?;
    let rest = segments.next()?;
    matches!(scheme, "http" | "https").then(|| format!("{scheme}://{rest}"))
}

fn query_param(url: &Url, names: &[&str]) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| names.contains(&k.as_ref()))
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

// ── Classification ──────────────────────────────────────────────

/// Classify one raw URL. Unparseable input degrades to a generic link.
pub fn classify_url(raw: &str) -> Classified {
    let trimmed = trim_trailing_punctuation(raw.trim());
    let Ok(parsed) = Url::parse(trimmed) else {
        return Classified::link(trimmed.to_string());
    };
    let resolved = resolve_redirects(parsed);
    let url = resolved.to_string();

    let Some(kind) = RULES.iter().find_map(|rule| rule(&resolved)) else {
        return Classified::link(url);
    };

    let media = match kind {
        LinkKind::Image => MediaKind::Image,
        LinkKind::Video => MediaKind::Video,
        LinkKind::Audio => MediaKind::Audio,
        LinkKind::Link => MediaKind::Link,
        _ => MediaKind::Embed,
    };
    let embed_url = embed_url(&kind, &resolved);
    Classified {
        url,
        directly_playable: matches!(media, MediaKind::Video | MediaKind::Audio),
        kind,
        media,
        embed_url,
    }
}

fn embed_url(kind: &LinkKind, url: &Url) -> Option<String> {
    match kind {
        LinkKind::Image | LinkKind::Audio => Some(url.to_string()),
        LinkKind::Video => {
            let s = url.to_string();
            Some(match s.strip_suffix(".gifv") {
                Some(stem) => format!("{stem}.mp4"),
                None => s,
            })
        }
        LinkKind::YouTube { video_id, start_secs } => Some(match start_secs {
            Some(t) => format!("https://www.youtube.com/embed/{video_id}?start={t}"),
            None => format!("https://www.youtube.com/embed/{video_id}"),
        }),
        LinkKind::Twitter { .. } => None,
        LinkKind::Reddit { subreddit: Some(sub), post_id } => {
            Some(format!("https://embed.reddit.com/r/{sub}/comments/{post_id}"))
        }
        LinkKind::Reddit { subreddit: None, .. } => None,
        LinkKind::TwitchClip { slug } => Some(format!("https://clips.twitch.tv/embed?clip={slug}")),
        LinkKind::TwitchVod { id } => Some(format!("https://player.twitch.tv/?video=v{id}")),
        LinkKind::TwitchChannel { channel } => {
            Some(format!("https://player.twitch.tv/?channel={channel}"))
        }
        LinkKind::KickClip { channel, clip_id } => {
            Some(format!("https://kick.com/{channel}?clip={clip_id}"))
        }
        LinkKind::KickChannel { channel } => Some(format!("https://player.kick.com/{channel}")),
        LinkKind::Streamable { id } => Some(format!("https://streamable.com/e/{id}")),
        LinkKind::TikTok { video_id } => Some(format!("https://www.tiktok.com/embed/v2/{video_id}")),
        LinkKind::Imgur { album_id } => Some(format!("https://imgur.com/a/{album_id}/embed")),
        LinkKind::Spotify { item, id } => Some(format!("https://open.spotify.com/embed/{item}/{id}")),
        LinkKind::Link => None,
    }
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn host_of(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_lowercase()
}

fn segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

fn has_media_extension(url: &Url) -> bool {
    extension(url).is_some_and(|ext| {
        IMAGE_EXTS.contains(&ext.as_str())
            || VIDEO_EXTS.contains(&ext.as_str())
            || AUDIO_EXTS.contains(&ext.as_str())
    })
}

fn direct_image(url: &Url) -> Option<LinkKind> {
    let ext = extension(url)?;
    IMAGE_EXTS.contains(&ext.as_str()).then_some(LinkKind::Image)
}

fn direct_video(url: &Url) -> Option<LinkKind> {
    let ext = extension(url)?;
    VIDEO_EXTS.contains(&ext.as_str()).then_some(LinkKind::Video)
}

fn direct_audio(url: &Url) -> Option<LinkKind> {
    let ext = extension(url)?;
    AUDIO_EXTS.contains(&ext.as_str()).then_some(LinkKind::Audio)
}

fn youtube(url: &Url) -> Option<LinkKind> {
    if has_media_extension(url) {
        return None;
    }
    let host = host_of(url);
    let segs = segments(url);
    let video_id = if host == "youtu.be" {
        segs.first().map(|s| s.to_string())
    } else if host_is(&host, "youtube.com") {
        match segs.as_slice() {
            ["watch"] => query_param(url, &["v"]),
            ["shorts" | "live" | "embed", id, ..] => Some(id.to_string()),
            _ => None,
        }
    } else {
        None
    }?;
    if !YT_ID_RE.is_match(&video_id) {
        return None;
    }
    let start_secs = query_param(url, &["t", "start"]).and_then(|t| parse_timestamp(&t));
    Some(LinkKind::YouTube {
        video_id,
        start_secs,
    })
}

/// `90`, `90s`, `1m30s`, `1h2m3s`.
fn parse_timestamp(raw: &str) -> Option<u64> {
    let caps = YT_TIME_RE.captures(raw)?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let total = part(1) * 3600 + part(2) * 60 + part(3);
    (total > 0).then_some(total)
}

fn twitter(url: &Url) -> Option<LinkKind> {
    let host = host_of(url);
    if !(host_is(&host, "twitter.com") || host_is(&host, "x.com")) || has_media_extension(url) {
        return None;
    }
    match segments(url).as_slice() {
        [_, "status", id, ..] if DIGITS_RE.is_match(id) => Some(LinkKind::Twitter {
            status_id: id.to_string(),
        }),
        _ => None,
    }
}

fn reddit(url: &Url) -> Option<LinkKind> {
    let host = host_of(url);
    if has_media_extension(url) {
        return None;
    }
    if host == "redd.it" {
        return segments(url).first().map(|id| LinkKind::Reddit {
            subreddit: None,
            post_id: id.to_string(),
        });
    }
    if !host_is(&host, "reddit.com") {
        return None;
    }
    match segments(url).as_slice() {
        ["r", sub, "comments", id, ..] => Some(LinkKind::Reddit {
            subreddit: Some(sub.to_string()),
            post_id: id.to_string(),
        }),
        _ => None,
    }
}

fn twitch(url: &Url) -> Option<LinkKind> {
    let host = host_of(url);
    if has_media_extension(url) {
        return None;
    }
    let segs = segments(url);
    if host == "clips.twitch.tv" {
        return match segs.as_slice() {
            [slug] if *slug != "embed" => Some(LinkKind::TwitchClip {
                slug: slug.to_string(),
            }),
            _ => None,
        };
    }
    if !host_is(&host, "twitch.tv") {
        return None;
    }
    match segs.as_slice() {
        ["videos", id] if DIGITS_RE.is_match(id) => Some(LinkKind::TwitchVod { id: id.to_string() }),
        [_, "clip", slug] => Some(LinkKind::TwitchClip {
            slug: slug.to_string(),
        }),
        [channel] if !TWITCH_RESERVED.contains(channel) => Some(LinkKind::TwitchChannel {
            channel: channel.to_lowercase(),
        }),
        _ => None,
    }
}

fn kick(url: &Url) -> Option<LinkKind> {
    if !host_is(&host_of(url), "kick.com") || has_media_extension(url) {
        return None;
    }
    match segments(url).as_slice() {
        [channel, "clips", clip_id] => Some(LinkKind::KickClip {
            channel: channel.to_lowercase(),
            clip_id: clip_id.to_string(),
        }),
        [channel] => Some(match query_param(url, &["clip"]) {
            Some(clip_id) => LinkKind::KickClip {
                channel: channel.to_lowercase(),
                clip_id,
            },
            None => LinkKind::KickChannel {
                channel: channel.to_lowercase(),
            },
        }),
        _ => None,
    }
}

fn streamable(url: &Url) -> Option<LinkKind> {
    if !host_is(&host_of(url), "streamable.com") || has_media_extension(url) {
        return None;
    }
    match segments(url).as_slice() {
        [id] | ["e", id] => Some(LinkKind::Streamable { id: id.to_string() }),
        _ => None,
    }
}

fn tiktok(url: &Url) -> Option<LinkKind> {
    if !host_is(&host_of(url), "tiktok.com") || has_media_extension(url) {
        return None;
    }
    match segments(url).as_slice() {
        [user, "video", id, ..] if user.starts_with('@') && DIGITS_RE.is_match(id) => {
            Some(LinkKind::TikTok {
                video_id: id.to_string(),
            })
        }
        _ => None,
    }
}

fn imgur(url: &Url) -> Option<LinkKind> {
    let host = host_of(url);
    if host.starts_with("i.") || !host_is(&host, "imgur.com") || has_media_extension(url) {
        return None;
    }
    match segments(url).as_slice() {
        ["a" | "gallery", id] => Some(LinkKind::Imgur {
            album_id: id.to_string(),
        }),
        _ => None,
    }
}

fn spotify(url: &Url) -> Option<LinkKind> {
    if host_of(url) != "open.spotify.com" {
        return None;
    }
    match segments(url).as_slice() {
        [item @ ("track" | "album" | "playlist" | "episode" | "show"), id] => Some(LinkKind::Spotify {
            item: item.to_string(),
            id: id.to_string(),
        }),
        _ => None,
    }
}
