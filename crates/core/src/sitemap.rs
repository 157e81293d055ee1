//! Sitemap protocol documents: `<urlset>` leaf listings and `<sitemapindex>`
//! index listings, including the Google video extension.
//!
//! Parsing is tolerant (unknown elements are skipped) so files written by
//! older deployments still merge cleanly. Rendering always emits the
//! canonical namespaces.

use crate::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
pub const VIDEO_NS: &str = "http://www.google.com/schemas/sitemap-video/1.1";

/// `<changefreq>` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFreq {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for ChangeFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeFreq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            "always" => Self::Always,
            "hourly" => Self::Hourly,
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "yearly" => Self::Yearly,
            "never" => Self::Never,
            other => {
                return Err(Error::SitemapParse(format!("unknown changefreq: {other}")));
            }
        })
    }
}

/// One `<video:video>` block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoEntry {
    pub thumbnail_loc: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_loc: Option<String>,
    pub player_loc: Option<String>,
    pub allow_embed: Option<bool>,
    pub duration_secs: Option<u64>,
    pub publication_date: Option<OffsetDateTime>,
    pub family_friendly: Option<bool>,
    pub live: Option<bool>,
    pub platform: Option<String>,
    pub requires_subscription: Option<bool>,
}

/// One `<url>` entry of a leaf listing.
#[derive(Clone, Debug, PartialEq)]
pub struct UrlEntry {
    pub loc: String,
    pub lastmod: Option<OffsetDateTime>,
    pub changefreq: Option<ChangeFreq>,
    pub priority: Option<String>,
    pub videos: Vec<VideoEntry>,
}

impl UrlEntry {
    pub fn new(loc: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            lastmod: None,
            changefreq: None,
            priority: None,
            videos: Vec::new(),
        }
    }

    /// Retire the entry in place: crawlers see it as dead from `now` on.
    /// Returns false if it was already retired.
    pub fn retire(&mut self, now: OffsetDateTime) -> bool {
        if self.changefreq == Some(ChangeFreq::Never) {
            return false;
        }
        self.lastmod = Some(now);
        self.changefreq = Some(ChangeFreq::Never);
        self.videos.clear();
        true
    }
}

/// One `<sitemap>` entry of an index listing.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub loc: String,
    pub lastmod: Option<OffsetDateTime>,
}

/// A `<urlset>` document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UrlSet {
    pub entries: Vec<UrlEntry>,
}

impl UrlSet {
    pub fn new(entries: Vec<UrlEntry>) -> Self {
        Self { entries }
    }

    pub fn contains(&self, loc: &str) -> bool {
        self.entries.iter().any(|e| e.loc == loc)
    }

    pub fn find_mut(&mut self, loc: &str) -> Option<&mut UrlEntry> {
        self.entries.iter_mut().find(|e| e.loc == loc)
    }

    /// Append entries whose `loc` is not already listed. Returns how many
    /// were added.
    pub fn append_missing(&mut self, entries: impl IntoIterator<Item = UrlEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if !self.contains(&entry.loc) {
                self.entries.push(entry);
                added += 1;
            }
        }
        added
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut set = UrlSet::default();
        let mut current: Option<UrlEntry> = None;
        let mut video: Option<VideoEntry> = None;
        // Open element local names, outermost first.
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let name = local_name(e.name().as_ref());
                    let parent = path.last().map(String::as_str);
                    match (parent, name.as_str()) {
                        (Some("urlset"), "url") => current = Some(UrlEntry::new(String::new())),
                        (Some("url"), "video") if current.is_some() => {
                            video = Some(VideoEntry::default())
                        }
                        (Some("video"), "player_loc") => {
                            if let Some(v) = video.as_mut() {
                                v.allow_embed = attr(e, "allow_embed").map(|a| yes_no(&a));
                            }
                        }
                        _ => {}
                    }
                    path.push(name);
                    text.clear();
                }
                Ok(Event::Text(ref e)) => {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| Error::SitemapParse(err.to_string()))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::CData(ref e)) => text.push_str(&String::from_utf8_lossy(e)),
                Ok(Event::End(_)) => {
                    let Some(name) = path.pop() else {
                        return Err(Error::SitemapParse("unbalanced end tag".to_string()));
                    };
                    let parent = path.last().map(String::as_str);
                    match (parent, name.as_str()) {
                        (Some("urlset"), "url") => {
                            if let Some(entry) = current.take()
                                && !entry.loc.is_empty()
                            {
                                set.entries.push(entry);
                            }
                        }
                        (Some("url"), "video") => {
                            if let (Some(v), Some(entry)) = (video.take(), current.as_mut()) {
                                entry.videos.push(v);
                            }
                        }
                        (Some("url"), field) => {
                            if let Some(entry) = current.as_mut() {
                                set_url_field(entry, field, text.trim())?;
                            }
                        }
                        (Some("video"), field) => {
                            if let Some(v) = video.as_mut() {
                                set_video_field(v, field, text.trim())?;
                            }
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::SitemapParse(e.to_string())),
                _ => {}
            }
        }

        Ok(set)
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut w = Writer::new(Vec::new());
        write_decl(&mut w)?;

        let has_video = self.entries.iter().any(|e| !e.videos.is_empty());
        let mut root = BytesStart::new("urlset");
        root.push_attribute(("xmlns", SITEMAP_NS));
        if has_video {
            root.push_attribute(("xmlns:video", VIDEO_NS));
        }
        write(&mut w, Event::Start(root))?;

        for entry in &self.entries {
            write(&mut w, Event::Start(BytesStart::new("url")))?;
            text_element(&mut w, "loc", &entry.loc)?;
            if let Some(lastmod) = entry.lastmod {
                text_element(&mut w, "lastmod", &format_datetime(lastmod)?)?;
            }
            if let Some(freq) = entry.changefreq {
                text_element(&mut w, "changefreq", freq.as_str())?;
            }
            if let Some(priority) = &entry.priority {
                text_element(&mut w, "priority", priority)?;
            }
            for video in &entry.videos {
                write_video(&mut w, video)?;
            }
            write(&mut w, Event::End(BytesEnd::new("url")))?;
        }

        write(&mut w, Event::End(BytesEnd::new("urlset")))?;
        finish(w)
    }
}

/// A `<sitemapindex>` document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SitemapIndex {
    pub entries: Vec<IndexEntry>,
}

impl SitemapIndex {
    pub fn contains(&self, loc: &str) -> bool {
        self.entries.iter().any(|e| e.loc == loc)
    }

    pub fn find_mut(&mut self, loc: &str) -> Option<&mut IndexEntry> {
        self.entries.iter_mut().find(|e| e.loc == loc)
    }

    /// Append entries whose `loc` is not already listed.
    pub fn append_missing(&mut self, entries: impl IntoIterator<Item = IndexEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if !self.contains(&entry.loc) {
                self.entries.push(entry);
                added += 1;
            }
        }
        added
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut index = SitemapIndex::default();
        let mut current: Option<IndexEntry> = None;
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let name = local_name(e.name().as_ref());
                    if name == "sitemap" && path.last().map(String::as_str) == Some("sitemapindex")
                    {
                        current = Some(IndexEntry {
                            loc: String::new(),
                            lastmod: None,
                        });
                    }
                    path.push(name);
                    text.clear();
                }
                Ok(Event::Text(ref e)) => {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| Error::SitemapParse(err.to_string()))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::End(_)) => {
                    let Some(name) = path.pop() else {
                        return Err(Error::SitemapParse("unbalanced end tag".to_string()));
                    };
                    match (path.last().map(String::as_str), name.as_str()) {
                        (Some("sitemapindex"), "sitemap") => {
                            if let Some(entry) = current.take()
                                && !entry.loc.is_empty()
                            {
                                index.entries.push(entry);
                            }
                        }
                        (Some("sitemap"), "loc") => {
                            if let Some(entry) = current.as_mut() {
                                entry.loc = text.trim().to_string();
                            }
                        }
                        (Some("sitemap"), "lastmod") => {
                            if let Some(entry) = current.as_mut() {
                                entry.lastmod = Some(parse_datetime(text.trim())?);
                            }
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::SitemapParse(e.to_string())),
                _ => {}
            }
        }

        Ok(index)
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut w = Writer::new(Vec::new());
        write_decl(&mut w)?;

        let mut root = BytesStart::new("sitemapindex");
        root.push_attribute(("xmlns", SITEMAP_NS));
        write(&mut w, Event::Start(root))?;
        for entry in &self.entries {
            write(&mut w, Event::Start(BytesStart::new("sitemap")))?;
            text_element(&mut w, "loc", &entry.loc)?;
            if let Some(lastmod) = entry.lastmod {
                text_element(&mut w, "lastmod", &format_datetime(lastmod)?)?;
            }
            write(&mut w, Event::End(BytesEnd::new("sitemap")))?;
        }
        write(&mut w, Event::End(BytesEnd::new("sitemapindex")))?;
        finish(w)
    }
}

/// Resolve a possibly relative link against the public hostname.
pub fn absolute_url(hostname: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    format!(
        "{}/{}",
        hostname.trim_end_matches('/'),
        link.trim_start_matches('/')
    )
}

pub fn format_datetime(at: OffsetDateTime) -> Result<String> {
    at.format(&Rfc3339)
        .map_err(|e| Error::SitemapWrite(format!("lastmod: {e}")))
}

/// Parse a W3C datetime: full RFC 3339 or a bare `YYYY-MM-DD` date.
pub fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(at) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(at);
    }
    time::Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map(|d| d.midnight().assume_utc())
        .map_err(|e| Error::SitemapParse(format!("invalid datetime {s:?}: {e}")))
}

fn set_url_field(entry: &mut UrlEntry, name: &str, value: &str) -> Result<()> {
    match name {
        "loc" => entry.loc = value.to_string(),
        "lastmod" => entry.lastmod = Some(parse_datetime(value)?),
        "changefreq" => entry.changefreq = Some(value.parse()?),
        "priority" => entry.priority = Some(value.to_string()),
        _ => {}
    }
    Ok(())
}

fn set_video_field(video: &mut VideoEntry, name: &str, value: &str) -> Result<()> {
    let owned = || Some(value.to_string());
    match name {
        "thumbnail_loc" => video.thumbnail_loc = owned(),
        "title" => video.title = owned(),
        "description" => video.description = owned(),
        "content_loc" => video.content_loc = owned(),
        "player_loc" => video.player_loc = owned(),
        "duration" => {
            video.duration_secs = Some(value.parse().map_err(|_| {
                Error::SitemapParse(format!("invalid video duration: {value}"))
            })?)
        }
        "publication_date" => video.publication_date = Some(parse_datetime(value)?),
        "family_friendly" => video.family_friendly = Some(yes_no(value)),
        "live" => video.live = Some(yes_no(value)),
        "platform" => video.platform = owned(),
        "requires_subscription" => video.requires_subscription = Some(yes_no(value)),
        _ => {}
    }
    Ok(())
}

fn write_video(w: &mut Writer<Vec<u8>>, video: &VideoEntry) -> Result<()> {
    write(w, Event::Start(BytesStart::new("video:video")))?;
    if let Some(v) = &video.thumbnail_loc {
        text_element(w, "video:thumbnail_loc", v)?;
    }
    if let Some(v) = &video.title {
        text_element(w, "video:title", v)?;
    }
    if let Some(v) = &video.description {
        text_element(w, "video:description", v)?;
    }
    if let Some(v) = &video.content_loc {
        text_element(w, "video:content_loc", v)?;
    }
    if let Some(v) = &video.player_loc {
        let mut start = BytesStart::new("video:player_loc");
        if let Some(allow) = video.allow_embed {
            start.push_attribute(("allow_embed", yes_no_str(allow)));
        }
        write(w, Event::Start(start))?;
        write(w, Event::Text(BytesText::new(v)))?;
        write(w, Event::End(BytesEnd::new("video:player_loc")))?;
    }
    if let Some(v) = video.duration_secs {
        text_element(w, "video:duration", &v.to_string())?;
    }
    if let Some(v) = video.publication_date {
        text_element(w, "video:publication_date", &format_datetime(v)?)?;
    }
    if let Some(v) = video.family_friendly {
        text_element(w, "video:family_friendly", yes_no_str(v))?;
    }
    if let Some(v) = video.live {
        text_element(w, "video:live", yes_no_str(v))?;
    }
    if let Some(v) = &video.platform {
        let mut start = BytesStart::new("video:platform");
        start.push_attribute(("relationship", "allow"));
        write(w, Event::Start(start))?;
        write(w, Event::Text(BytesText::new(v)))?;
        write(w, Event::End(BytesEnd::new("video:platform")))?;
    }
    if let Some(v) = video.requires_subscription {
        text_element(w, "video:requires_subscription", yes_no_str(v))?;
    }
    write(w, Event::End(BytesEnd::new("video:video")))
}

fn write_decl(w: &mut Writer<Vec<u8>>) -> Result<()> {
    write(w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
}

fn text_element(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    write(w, Event::Start(BytesStart::new(name)))?;
    write(w, Event::Text(BytesText::new(value)))?;
    write(w, Event::End(BytesEnd::new(name)))
}

fn write(w: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    w.write_event(event)
        .map_err(|e| Error::SitemapWrite(e.to_string()))
}

fn finish(w: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(w.into_inner()).map_err(|e| Error::SitemapWrite(e.to_string()))
}

fn local_name(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn yes_no(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("yes")
}

fn yes_no_str(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
