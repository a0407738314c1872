use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::client::{MediaWikiClient, MediaWikiClientConfig, RemotePageInfo, WikiApi};
use crate::config::MirrorConfig;
use crate::layout::PathMapper;
use crate::profile::SiteProfile;
use crate::redirect::RedirectMap;
use crate::rewrite::Rewriter;

/// Records which local paths the current run produced or confirmed, and
/// decides which files are stale against remote timestamps.
///
/// Paths must be recorded with the same output root later passed to
/// [`SyncTracker::cleanup`]; the tracker compares them verbatim.
pub struct SyncTracker {
    valid: BTreeSet<PathBuf>,
    epoch: DateTime<Utc>,
}

impl SyncTracker {
    /// `epoch` marks the last incompatible change to the output format;
    /// anything written before it is refetched even when the remote page
    /// is unchanged.
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            valid: BTreeSet::new(),
            epoch,
        }
    }

    pub fn record(&mut self, path: &Path) {
        self.valid.insert(path.to_path_buf());
    }

    pub fn is_recorded(&self, path: &Path) -> bool {
        self.valid.contains(path)
    }

    /// A file needs refetching when it is missing, older than the remote
    /// edit, or written before the epoch. Unreadable metadata counts as
    /// missing.
    pub fn needs_update(&self, path: &Path, remote: DateTime<Utc>) -> bool {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return true,
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(_) => return true,
        };
        let modified: DateTime<Utc> = modified.into();
        modified < remote || modified < self.epoch
    }

    /// Delete every file under `root` this run did not record, then prune
    /// directories left empty. Consumes the tracker: cleanup is a run's
    /// final act, nothing may be recorded after it.
    pub fn cleanup(self, root: &Path) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
            let entry = entry.context("failed to walk mirror directory")?;
            let path = entry.path();
            if entry.file_type().is_dir() {
                let is_empty = fs::read_dir(path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if is_empty {
                    fs::remove_dir(path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                    report.removed_dirs += 1;
                }
            } else if !self.valid.contains(path) {
                debug!("deleting {}", path.display());
                fs::remove_file(path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                report.removed_files += 1;
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub removed_dirs: usize,
}

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub output_dir: PathBuf,
    pub epoch: DateTime<Utc>,
    pub clean: bool,
    pub safe_filenames: bool,
    /// Language subtags to mirror; `None` mirrors every language.
    pub languages: Option<Vec<String>>,
}

impl MirrorOptions {
    pub fn from_config(config: &MirrorConfig, profile: &SiteProfile) -> Self {
        let languages = if config.mirror.languages.is_empty() {
            None
        } else {
            Some(config.mirror.languages.clone())
        };
        Self {
            output_dir: PathBuf::from(
                config.mirror.output_dir.as_deref().unwrap_or("wiki-mirror"),
            ),
            epoch: profile.epoch,
            clean: config.mirror.clean.unwrap_or(false),
            safe_filenames: config.mirror.safe_filenames.unwrap_or(false),
            languages,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct MirrorReport {
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub stylesheets_updated: usize,
    pub images_updated: usize,
    pub images_up_to_date: usize,
    pub failed: Vec<String>,
    pub requests: usize,
    pub cleanup: Option<CleanupReport>,
}

/// Mirror the remote wiki into `options.output_dir` over HTTP.
pub fn run_mirror(
    config: &MirrorConfig,
    profile: &SiteProfile,
    options: &MirrorOptions,
) -> Result<MirrorReport> {
    let mut client_config = MediaWikiClientConfig::from_config(config);
    if client_config.api_url.is_empty() {
        client_config.api_url = profile.api_url.clone();
    }
    let mut client = MediaWikiClient::new(client_config)?;
    run_mirror_with_api(&mut client, profile, options)
}

/// Mirror through an arbitrary [`WikiApi`] implementation.
pub fn run_mirror_with_api<A: WikiApi + ?Sized>(
    api: &mut A,
    profile: &SiteProfile,
    options: &MirrorOptions,
) -> Result<MirrorReport> {
    let base = options.output_dir.as_path();
    fs::create_dir_all(base)
        .with_context(|| format!("failed to create {}", base.display()))?;

    let mapper = PathMapper::new(profile, options.languages.as_deref(), options.safe_filenames)?;
    let mut tracker = SyncTracker::new(options.epoch);
    let mut report = MirrorReport::default();

    sync_stylesheets(api, profile, base, &mut tracker, &mut report);

    let redirects = RedirectMap::load(api, &profile.redirect_namespaces)?;
    info!("loaded {} redirects", redirects.len());
    let rewriter = Rewriter::new(profile, &mapper, &redirects)?;

    for namespace in &profile.content_namespaces {
        let mut pages = api.list_pages(*namespace)?;
        pages.sort_by(|a, b| a.title.cmp(&b.title));
        info!("namespace {namespace}: {} pages", pages.len());

        for page in pages {
            let Some(path) = mapper.local_path(&page.title, base) else {
                debug!("skipping {}", page.title);
                report.skipped += 1;
                continue;
            };
            if !tracker.needs_update(&path, page.touched) {
                debug!("up to date: {}", page.title);
                tracker.record(&path);
                report.up_to_date += 1;
                continue;
            }
            match sync_page(api, &rewriter, &page, &path, base) {
                Ok(()) => {
                    debug!("downloaded {}", page.title);
                    tracker.record(&path);
                    report.updated += 1;
                }
                Err(error) => {
                    warn!("failed to mirror {}: {error:#}", page.title);
                    report.failed.push(page.title.clone());
                    // a stale local copy beats no copy; keep it away from
                    // cleanup until a later run replaces it
                    if path.exists() {
                        tracker.record(&path);
                    }
                }
            }
        }
    }

    sync_images(api, profile, base, &mut tracker, &mut report)?;
    link_main_pages(profile, &mapper, base, &mut tracker)?;

    report.requests = api.request_count();
    if options.clean {
        report.cleanup = Some(tracker.cleanup(base)?);
    }
    Ok(report)
}

fn sync_page<A: WikiApi + ?Sized>(
    api: &mut A,
    rewriter: &Rewriter<'_>,
    page: &RemotePageInfo,
    path: &Path,
    base: &Path,
) -> Result<()> {
    let html = api.fetch_text(&page.url)?;
    let rewritten = rewriter.rewrite(&html, path, base)?;
    write_file(path, rewritten.as_bytes())
}

/// The stylesheet has no remote timestamp, so it is refetched every run.
fn sync_stylesheets<A: WikiApi + ?Sized>(
    api: &mut A,
    profile: &SiteProfile,
    base: &Path,
    tracker: &mut SyncTracker,
    report: &mut MirrorReport,
) {
    for (url, name) in &profile.css_links {
        let path = base.join(name);
        let result = api
            .fetch_text(url)
            .and_then(|css| write_file(&path, css.as_bytes()));
        match result {
            Ok(()) => {
                tracker.record(&path);
                report.stylesheets_updated += 1;
            }
            Err(error) => {
                warn!("failed to mirror stylesheet {name}: {error:#}");
                report.failed.push(name.clone());
                if path.exists() {
                    tracker.record(&path);
                }
            }
        }
    }
}

fn sync_images<A: WikiApi + ?Sized>(
    api: &mut A,
    profile: &SiteProfile,
    base: &Path,
    tracker: &mut SyncTracker,
    report: &mut MirrorReport,
) -> Result<()> {
    let mut images = api.list_images(profile.image_max_bytes)?;
    images.sort_by(|a, b| a.name.cmp(&b.name));
    info!("{} images within size limit", images.len());

    for image in images {
        // stored flat under the output root, matching rewritten img links
        let path = base.join(format!("File:{}", image.name));
        if !tracker.needs_update(&path, image.timestamp) {
            tracker.record(&path);
            report.images_up_to_date += 1;
            continue;
        }
        let result = api
            .fetch_bytes(&image.url)
            .and_then(|bytes| write_file(&path, &bytes));
        match result {
            Ok(()) => {
                tracker.record(&path);
                report.images_updated += 1;
            }
            Err(error) => {
                warn!("failed to mirror image {}: {error:#}", image.name);
                report.failed.push(format!("File:{}", image.name));
                if path.exists() {
                    tracker.record(&path);
                }
            }
        }
    }
    Ok(())
}

/// Give every mirrored language directory an `index.html` pointing at its
/// main page. The link is recorded so cleanup keeps it.
fn link_main_pages(
    profile: &SiteProfile,
    mapper: &PathMapper<'_>,
    base: &Path,
    tracker: &mut SyncTracker,
) -> Result<()> {
    for language in &profile.languages {
        if !mapper.is_language_allowed(&language.subtag) {
            continue;
        }
        let dir = mapper.language_dir(base, &language.subtag);
        if !dir.join("Main_page.html").exists() {
            continue;
        }
        let link = dir.join("index.html");
        tracker.record(&link);
        if link.symlink_metadata().is_ok() {
            continue;
        }
        create_index_link(&link)?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_index_link(link: &Path) -> Result<()> {
    std::os::unix::fs::symlink("Main_page.html", link)
        .with_context(|| format!("failed to link {}", link.display()))
}

#[cfg(not(unix))]
fn create_index_link(link: &Path) -> Result<()> {
    let source = match link.parent() {
        Some(parent) => parent.join("Main_page.html"),
        None => PathBuf::from("Main_page.html"),
    };
    fs::copy(&source, link)
        .map(|_| ())
        .with_context(|| format!("failed to copy {}", source.display()))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
