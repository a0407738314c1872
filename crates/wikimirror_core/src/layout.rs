use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::profile::SiteProfile;
use crate::title::TitleParser;

/// Maps wiki titles to paths inside the mirror tree.
///
/// The layout groups articles by language subtag, keeps namespace prefixes
/// in the filename and stores images flat under the output root. An
/// optional language allow-list turns every title outside it into a skip.
pub struct PathMapper<'p> {
    profile: &'p SiteProfile,
    parser: TitleParser<'p>,
    allowed_subtags: Option<HashSet<String>>,
    safe_filenames: bool,
}

impl<'p> PathMapper<'p> {
    pub fn new(
        profile: &'p SiteProfile,
        languages: Option<&[String]>,
        safe_filenames: bool,
    ) -> Result<Self> {
        let allowed_subtags = match languages {
            Some(subtags) => {
                let mut set = HashSet::new();
                for subtag in subtags {
                    let language = profile
                        .language_by_subtag(subtag)
                        .with_context(|| format!("unknown language subtag: {subtag}"))?;
                    set.insert(language.subtag.clone());
                }
                Some(set)
            }
            None => None,
        };
        Ok(Self {
            profile,
            parser: TitleParser::new(profile),
            allowed_subtags,
            safe_filenames,
        })
    }

    /// Path of the directory holding one language's articles.
    pub fn language_dir(&self, base: &Path, subtag: &str) -> PathBuf {
        base.join(subtag)
    }

    pub fn is_language_allowed(&self, subtag: &str) -> bool {
        match &self.allowed_subtags {
            Some(allowed) => allowed.contains(subtag),
            None => true,
        }
    }

    /// Resolve a raw wiki title to its path under `base`.
    ///
    /// Returns `None` when the title's language falls outside the
    /// allow-list. `base` may be absolute (when writing files) or relative
    /// (when emitting hyperlinks).
    pub fn local_path(&self, title: &str, base: &Path) -> Option<PathBuf> {
        let (title, language) = self.parser.detect_language(title);
        if !self.is_language_allowed(&language.subtag) {
            return None;
        }
        let (pure, namespace) = self.parser.detect_namespace(&title);

        let mut name = pure.replace(' ', "_");
        if self.safe_filenames && !name.is_ascii() {
            name = hashed_component(&name);
        }

        let namespace = namespace.replace(' ', "_");
        let relative = if namespace == "Main" {
            format!("{}/{}.html", language.subtag, name)
        } else if namespace == "File" {
            format!("File:{name}")
        } else if self.profile.is_templated_namespace(&namespace.replace('_', " ")) {
            format!("{}/{}:{}.html", language.subtag, namespace, name)
        } else {
            format!("{namespace}:{name}.html")
        };

        Some(join_normalized(base, &relative))
    }
}

/// Join `relative` onto `base`, dropping empty, `.` and `..` segments so a
/// hostile title cannot escape the output tree.
fn join_normalized(base: &Path, relative: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        path.push(segment);
    }
    path
}

/// Stable ASCII stand-in for titles whose bytes the local filesystem may
/// not accept. 128 bits of the digest is plenty to avoid collisions.
fn hashed_component(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest[..16].iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
