use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

const COMIC_PAGE_BASE: &str = "https://comick.io/comic";
const COVER_BASE: &str = "https://meo.comick.pictures";

// ============================================================================
// Languages and content types
// ============================================================================

/// Languages the upstream publishes chapter listings for, with display names.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("fr", "French"),
    ("es", "Spanish"),
    ("it", "Italian"),
    ("pl", "Polish"),
    ("tr", "Turkish"),
    ("ja", "Japanese"),
    ("zh", "Chinese"),
    ("sv", "Swedish"),
];

pub fn is_supported_language(code: &str) -> bool {
    LANGUAGES.iter().any(|(c, _)| *c == code)
}

/// Display name for a language code, falling back to the upper-cased code.
pub fn language_name(code: &str) -> String {
    LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| code.to_uppercase())
}

/// Whether a listing may include erotic content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Sfw,
    Nsfw,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Sfw => "sfw",
            ContentType::Nsfw => "nsfw",
        }
    }

    pub fn accepts_erotic_content(&self) -> bool {
        matches!(self, ContentType::Nsfw)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sfw" => Ok(ContentType::Sfw),
            "nsfw" => Ok(ContentType::Nsfw),
            other => Err(format!("unknown content type '{other}' (expected sfw or nsfw)")),
        }
    }
}

// ============================================================================
// Domain types
// ============================================================================

/// The comic a chapter belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComicInfo {
    pub title: String,
    pub slug: String,
    pub cover_key: Option<String>,
}

impl ComicInfo {
    /// Public comic page for this title.
    pub fn page_url(&self) -> String {
        format!("{}/{}", COMIC_PAGE_BASE, self.slug)
    }

    pub fn cover_url(&self) -> Option<String> {
        self.cover_key.as_deref().map(cover_url)
    }
}

/// A single chapter release, built from one upstream chapter entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub chapter_number: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub comic: ComicInfo,
}

impl Chapter {
    /// Numeric chapter number used for ordering.
    ///
    /// Construction guarantees the string parses; `NEG_INFINITY` is only
    /// reachable for values deserialized from a foreign cache entry.
    pub fn number(&self) -> f64 {
        parse_chapter_number(&self.chapter_number).unwrap_or(f64::NEG_INFINITY)
    }
}

/// A title resolved from its slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRef {
    pub slug: String,
    pub hid: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Options for [`ComickClient::list_chapters`](super::ComickClient::list_chapters).
#[derive(Debug, Clone)]
pub struct ChapterQuery {
    pub limit: u32,
    pub lang: String,
}

// ============================================================================
// Recent chapter listing (passed through to the rendering layer)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cover {
    pub b2key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentComic {
    #[serde(default)]
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub genres: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub md_covers: Vec<Cover>,
    /// Present in some response shapes only; never used for filtering.
    #[serde(default)]
    pub content_rating: Option<String>,
}

/// One entry of the upstream "recent chapters" listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentChapter {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub chap: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub md_comics: RecentComic,
}

impl RecentChapter {
    pub fn cover_url(&self) -> Option<String> {
        self.md_comics
            .md_covers
            .first()
            .map(|c| cover_url(&c.b2key))
    }

    pub fn page_url(&self) -> String {
        format!("{}/{}", COMIC_PAGE_BASE, self.md_comics.slug)
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn cover_url(b2key: &str) -> String {
    format!("{}/{}", COVER_BASE, b2key)
}

/// Parse a decimal chapter number such as `"10"` or `"9.5"`.
pub fn parse_chapter_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse the first usable RFC 3339 timestamp among `candidates`.
pub fn first_timestamp<'a>(
    candidates: impl IntoIterator<Item = Option<&'a str>>,
) -> Option<DateTime<Utc>> {
    candidates
        .into_iter()
        .flatten()
        .find_map(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("en"), "English");
        assert_eq!(language_name("sv"), "Swedish");
        assert_eq!(language_name("xx"), "XX");
        assert!(is_supported_language("ja"));
        assert!(!is_supported_language("de"));
    }

    #[test]
    fn test_content_type_parse() {
        assert_eq!("sfw".parse::<ContentType>(), Ok(ContentType::Sfw));
        assert_eq!("NSFW".parse::<ContentType>(), Ok(ContentType::Nsfw));
        assert!("adult".parse::<ContentType>().is_err());
        assert!(ContentType::Nsfw.accepts_erotic_content());
    }

    #[test]
    fn test_parse_chapter_number() {
        assert_eq!(parse_chapter_number("10"), Some(10.0));
        assert_eq!(parse_chapter_number(" 9.5 "), Some(9.5));
        assert_eq!(parse_chapter_number("extra"), None);
        assert_eq!(parse_chapter_number("NaN"), None);
        assert_eq!(parse_chapter_number(""), None);
    }

    #[test]
    fn test_first_timestamp_skips_unparseable() {
        let ts = first_timestamp([None, Some("yesterday"), Some("2024-03-01T12:00:00Z")]);
        assert_eq!(ts.unwrap().to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(first_timestamp([None, None]).is_none());
    }

    #[test]
    fn test_recent_chapter_accepts_numeric_ids_and_missing_rating() {
        let raw = serde_json::json!({
            "id": 4242,
            "chap": "12",
            "updated_at": "2024-03-01T12:00:00Z",
            "md_comics": {
                "title": "Solo Leveling",
                "slug": "solo-leveling",
                "md_covers": null
            }
        });
        let entry: RecentChapter = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.id, "4242");
        assert_eq!(entry.chap.as_deref(), Some("12"));
        assert!(entry.md_comics.content_rating.is_none());
        assert!(entry.md_comics.md_covers.is_empty());
        assert!(entry.cover_url().is_none());
        assert_eq!(entry.page_url(), "https://comick.io/comic/solo-leveling");
    }

    #[test]
    fn test_comic_cover_url() {
        let comic = ComicInfo {
            title: "T".into(),
            slug: "t".into(),
            cover_key: Some("abc.jpg".into()),
        };
        assert_eq!(
            comic.cover_url().as_deref(),
            Some("https://meo.comick.pictures/abc.jpg")
        );
    }
}
