use std::sync::LazyLock;

use regex::Regex;

use crate::profile::{Language, SiteProfile};

/// Whole-title language suffix, optionally followed by a literal subpage
/// tail: `"Pacman (Español)"`, `"Pacman (Español)/Tips"`. Greedy, so the
/// rightmost suffix wins when several could match.
static WHOLE_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<pure>.+)[ _]\((?P<lang>[^()]+)\)(?P<tail>/.*)?$").expect("valid regex")
});

/// Language suffix on a single segment, no tail.
static SEGMENT_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<pure>.+)[ _]\((?P<lang>[^()]+)\)$").expect("valid regex"));

/// Splits raw titles into bare title, namespace and language against one
/// site profile. Stateless apart from the injected profile.
#[derive(Debug, Clone, Copy)]
pub struct TitleParser<'p> {
    profile: &'p SiteProfile,
}

impl<'p> TitleParser<'p> {
    pub fn new(profile: &'p SiteProfile) -> Self {
        Self { profile }
    }

    /// Split off a leading `Prefix:` segment when `Prefix` names a known
    /// namespace. Anything else is a bare title in the Main namespace.
    pub fn detect_namespace<'t>(&self, title: &'t str) -> (&'t str, String) {
        if let Some((prefix, rest)) = title.split_once(':')
            && !prefix.is_empty()
            && !rest.is_empty()
        {
            let candidate = prefix.replace('_', " ");
            if self.profile.is_namespace(&candidate) {
                return (rest, candidate);
            }
        }
        (title, "Main".to_string())
    }

    /// Detect the language of a title from its `(Language)` suffix.
    ///
    /// Titles are ambiguous between "suffix on the final component" and
    /// "suffix on the whole title with a literal subpage tail", so matching
    /// is layered: whole-title form first, then the portion before the first
    /// slash, then the `Category:<Language>` form where the category name is
    /// the language itself. Every failure falls back to the default
    /// language with the title untouched.
    pub fn detect_language(&self, title: &str) -> (String, &'p Language) {
        if let Some(caps) = WHOLE_TITLE_RE.captures(title)
            && let Some(language) = self.profile.language_by_name(&caps["lang"])
        {
            let mut pure = caps["pure"].to_string();
            if let Some(tail) = caps.name("tail") {
                pure.push_str(tail.as_str());
            }
            return (self.normalize_segments(&pure, language), language);
        }

        if let Some((head, tail)) = title.split_once('/')
            && let Some(caps) = SEGMENT_SUFFIX_RE.captures(head)
            && let Some(language) = self.profile.language_by_name(&caps["lang"])
        {
            let pure = format!("{}/{}", &caps["pure"], tail);
            return (self.normalize_segments(&pure, language), language);
        }

        if let Some(rest) = strip_category_prefix(title)
            && let Some(language) = self.profile.language_by_name(&rest.replace('_', " "))
        {
            return (title.to_string(), language);
        }

        (title.to_string(), self.profile.default_language())
    }

    /// Strip per-segment `(Language)` suffixes that merely repeat the
    /// page-level language; segments annotated with a different language
    /// keep their suffix.
    fn normalize_segments(&self, pure: &str, language: &Language) -> String {
        if !pure.contains('/') {
            return pure.to_string();
        }
        pure.split('/')
            .map(|segment| {
                match SEGMENT_SUFFIX_RE.captures(segment) {
                    Some(caps) if &caps["lang"] == language.name => caps["pure"].to_string(),
                    _ => segment.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn strip_category_prefix(title: &str) -> Option<&str> {
    title
        .strip_prefix("Category:")
        .or_else(|| title.strip_prefix("Category "))
        .or_else(|| title.strip_prefix("Category_"))
}

#[cfg(test)]
mod tests {
    use super::TitleParser;
    use crate::profile::SiteProfile;

    fn profile() -> SiteProfile {
        SiteProfile::arch_wiki()
    }

    #[test]
    fn plain_title_has_default_namespace_and_language() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, namespace) = parser.detect_namespace("Installation guide");
        assert_eq!(pure, "Installation guide");
        assert_eq!(namespace, "Main");
        let (pure, language) = parser.detect_language("Installation guide");
        assert_eq!(pure, "Installation guide");
        assert_eq!(language.subtag, "en");
    }

    #[test]
    fn known_namespace_prefix_is_split_off() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, namespace) = parser.detect_namespace("Template:Note");
        assert_eq!(pure, "Note");
        assert_eq!(namespace, "Template");
        let (pure, namespace) = parser.detect_namespace("Template_talk:Note");
        assert_eq!(pure, "Note");
        assert_eq!(namespace, "Template talk");
    }

    #[test]
    fn unknown_prefix_stays_in_main() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, namespace) = parser.detect_namespace("Systemd: the init system");
        assert_eq!(pure, "Systemd: the init system");
        assert_eq!(namespace, "Main");
    }

    #[test]
    fn whole_title_suffix_is_detected() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("Pacman (Español)");
        assert_eq!(pure, "Pacman");
        assert_eq!(language.name, "Español");
        assert_eq!(language.subtag, "es");
    }

    #[test]
    fn underscore_separator_before_suffix_works() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("Pacman_(Español)");
        assert_eq!(pure, "Pacman");
        assert_eq!(language.subtag, "es");
    }

    #[test]
    fn unknown_suffix_is_kept_verbatim() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("GRUB (legacy)");
        assert_eq!(pure, "GRUB (legacy)");
        assert_eq!(language.subtag, "en");
    }

    #[test]
    fn suffix_before_first_slash_keeps_literal_tail() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("Pacman (Español)/Tips (misc)");
        assert_eq!(pure, "Pacman/Tips (misc)");
        assert_eq!(language.name, "Español");
    }

    #[test]
    fn repeated_segment_suffixes_are_normalized() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("Foo (Español)/Bar (Español)");
        assert_eq!(pure, "Foo/Bar");
        assert_eq!(language.name, "Español");
    }

    #[test]
    fn final_segment_suffix_sets_the_page_language() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        // the trailing suffix wins; the leading segment's foreign suffix
        // survives as mixed annotation
        let (pure, language) = parser.detect_language("Foo (Español)/Bar (Français)");
        assert_eq!(pure, "Foo (Español)/Bar");
        assert_eq!(language.name, "Français");
    }

    #[test]
    fn category_name_is_its_own_language() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("Category:Español");
        assert_eq!(pure, "Category:Español");
        assert_eq!(language.subtag, "es");
    }

    #[test]
    fn rightmost_suffix_wins() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        let (pure, language) = parser.detect_language("Boot (UEFI) loaders (Español)");
        assert_eq!(pure, "Boot (UEFI) loaders");
        assert_eq!(language.name, "Español");
    }

    #[test]
    fn every_known_language_suffix_round_trips() {
        let profile = profile();
        let parser = TitleParser::new(&profile);
        for language in &profile.languages {
            let title = format!("Main page ({})", language.name);
            let (pure, detected) = parser.detect_language(&title);
            assert_eq!(pure, "Main page", "failed for {}", language.name);
            assert_eq!(detected.name, language.name);
        }
    }
}
