use chrono::{DateTime, Utc};

use crate::config::MirrorConfig;

/// Instant of the latest incompatible change to the rewriting rules. Files
/// written before it are refetched even when the remote page is unchanged.
pub const DEFAULT_EPOCH: &str = "2025-03-01T00:00:00Z";

/// A wiki language as it appears in title suffixes, e.g. `"Español"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub name: String,
    pub subtag: String,
    pub english: String,
}

/// Immutable description of one mirrored site: URL patterns, language table,
/// namespace table, chrome selectors. All tables the pipeline consults live
/// here as data; the pipeline itself has a single code path.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Absolute origin of the wiki, without trailing slash.
    pub origin: String,
    pub api_url: String,
    /// Path prefix of article URLs, e.g. `/title/`.
    pub article_path: String,
    /// Path prefix of inline image URLs.
    pub image_path_prefix: String,
    /// Remote stylesheet URL and the local filename it is saved under. The
    /// first entry is the stylesheet every mirrored page is pointed at.
    pub css_links: Vec<(String, String)>,
    /// Language assigned when a title carries no (or an unknown) suffix.
    pub local_language: Language,
    pub languages: Vec<Language>,
    /// Canonical namespace names recognized in title prefixes.
    pub namespaces: Vec<String>,
    /// Namespaces whose pages are stored as `{Namespace}:{title}.html` under
    /// the language directory.
    pub templated_namespaces: Vec<String>,
    /// Namespace ids enumerated during a content pass.
    pub content_namespaces: Vec<i32>,
    /// Namespace ids whose redirect relation is fetched.
    pub redirect_namespaces: Vec<i32>,
    /// Upper size bound passed to the image enumeration.
    pub image_max_bytes: u64,
    /// CSS selectors of chrome elements stripped for offline browsing.
    pub strip_selectors: Vec<String>,
    /// Selector and inline style applied to fix the layout after stripping.
    pub layout_styles: Vec<(String, String)>,
    /// Refetch cutoff, see [`DEFAULT_EPOCH`].
    pub epoch: DateTime<Utc>,
}

const LANGUAGE_TABLE: &[(&str, &str, &str)] = &[
    ("العربية", "ar", "Arabic"),
    ("Български", "bg", "Bulgarian"),
    ("Català", "ca", "Catalan"),
    ("Česky", "cs", "Czech"),
    ("Dansk", "da", "Danish"),
    ("Deutsch", "de", "German"),
    ("Ελληνικά", "el", "Greek"),
    ("English", "en", "English"),
    ("Esperanto", "eo", "Esperanto"),
    ("Español", "es", "Spanish"),
    ("فارسی", "fa", "Persian"),
    ("Suomi", "fi", "Finnish"),
    ("Français", "fr", "French"),
    ("עברית", "he", "Hebrew"),
    ("Hrvatski", "hr", "Croatian"),
    ("Magyar", "hu", "Hungarian"),
    ("Indonesia", "id", "Indonesian"),
    ("Italiano", "it", "Italian"),
    ("日本語", "ja", "Japanese"),
    ("한국어", "ko", "Korean"),
    ("Lietuviškai", "lt", "Lithuanian"),
    ("Norsk Bokmål", "nb", "Norwegian (Bokmål)"),
    ("Nederlands", "nl", "Dutch"),
    ("Polski", "pl", "Polish"),
    ("Português", "pt", "Portuguese"),
    ("Română", "ro", "Romanian"),
    ("Русский", "ru", "Russian"),
    ("Slovenský", "sk", "Slovak"),
    ("Српски", "sr", "Serbian"),
    ("Svenska", "sv", "Swedish"),
    ("ไทย", "th", "Thai"),
    ("Türkçe", "tr", "Turkish"),
    ("Українська", "uk", "Ukrainian"),
    ("Tiếng Việt", "vi", "Vietnamese"),
    ("简体中文", "zh-CN", "Chinese (Simplified)"),
    ("正體中文", "zh-TW", "Chinese (Traditional)"),
];

const NAMESPACE_TABLE: &[&str] = &[
    "Main",
    "Talk",
    "User",
    "User talk",
    "ArchWiki",
    "ArchWiki talk",
    "File",
    "File talk",
    "Template",
    "Template talk",
    "Help",
    "Help talk",
    "Category",
    "Category talk",
];

const TEMPLATED_NAMESPACES: &[&str] = &[
    "Talk",
    "ArchWiki",
    "ArchWiki talk",
    "Template",
    "Template talk",
    "Help",
    "Help talk",
    "Category",
    "Category talk",
];

impl SiteProfile {
    /// The ArchWiki profile, the site this tool was written for.
    pub fn arch_wiki() -> Self {
        let languages: Vec<Language> = LANGUAGE_TABLE
            .iter()
            .map(|(name, subtag, english)| Language {
                name: (*name).to_string(),
                subtag: (*subtag).to_string(),
                english: (*english).to_string(),
            })
            .collect();
        let local_language = Language {
            name: "English".to_string(),
            subtag: "en".to_string(),
            english: "English".to_string(),
        };

        Self {
            origin: "https://wiki.archlinux.org".to_string(),
            api_url: "https://wiki.archlinux.org/api.php".to_string(),
            article_path: "/title/".to_string(),
            image_path_prefix: "/images/".to_string(),
            css_links: vec![(
                "https://wiki.archlinux.org/load.php?lang=en&modules=mediawiki.legacy.commonPrint%2Cshared%7Cskins.vector.styles&only=styles&skin=vector".to_string(),
                "ArchWikiOffline.css".to_string(),
            )],
            local_language,
            languages,
            namespaces: NAMESPACE_TABLE.iter().map(|s| (*s).to_string()).collect(),
            templated_namespaces: TEMPLATED_NAMESPACES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            content_namespaces: vec![0, 4, 12, 14],
            redirect_namespaces: vec![0, 4, 12],
            image_max_bytes: 10_000,
            strip_selectors: vec![
                "#archnavbar".to_string(),
                "#column-one".to_string(),
                "span.mw-editsection".to_string(),
                "#jump-to-nav".to_string(),
                "#siteSub".to_string(),
            ],
            layout_styles: vec![
                ("#globalWrapper".to_string(), "width: 100%".to_string()),
                (
                    "#content".to_string(),
                    "margin: 2em; margin-bottom: 0".to_string(),
                ),
                ("#f-list".to_string(), "margin: 0 2em".to_string()),
            ],
            epoch: default_epoch(),
        }
    }

    /// The ArchWiki profile with `[wiki]` config overrides applied.
    pub fn from_config(config: &MirrorConfig) -> Self {
        let mut profile = Self::arch_wiki();
        if let Some(url) = config.wiki_url() {
            profile.origin = url.trim_end_matches('/').to_string();
        }
        if let Some(api_url) = config.api_url_owned() {
            profile.api_url = api_url;
        }
        if let Some(article_path) = &config.wiki.article_path {
            profile.article_path = article_path.clone();
        }
        profile
    }

    pub fn language_by_name(&self, name: &str) -> Option<&Language> {
        self.languages.iter().find(|lang| lang.name == name)
    }

    pub fn language_by_subtag(&self, subtag: &str) -> Option<&Language> {
        self.languages
            .iter()
            .find(|lang| lang.subtag.eq_ignore_ascii_case(subtag))
    }

    pub fn default_language(&self) -> &Language {
        &self.local_language
    }

    pub fn is_namespace(&self, name: &str) -> bool {
        self.namespaces.iter().any(|ns| ns == name)
    }

    pub fn is_templated_namespace(&self, name: &str) -> bool {
        self.templated_namespaces.iter().any(|ns| ns == name)
    }
}

fn default_epoch() -> DateTime<Utc> {
    DEFAULT_EPOCH
        .parse::<DateTime<Utc>>()
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}
