use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use kuchiki::NodeRef;
use kuchiki::traits::TendrilSink;
use regex::Regex;

use crate::layout::PathMapper;
use crate::profile::SiteProfile;
use crate::redirect::RedirectMap;

/// Rewrites a fetched wiki page for offline use.
///
/// A single pass over the DOM strips the site chrome, patches the layout
/// styles, points the stylesheet link at the local CSS copy, turns article
/// hyperlinks into relative file links and image sources into local file
/// references. Every step is best-effort per element; a page missing some
/// piece of chrome is left as close to intact as possible.
pub struct Rewriter<'a> {
    profile: &'a SiteProfile,
    mapper: &'a PathMapper<'a>,
    redirects: &'a RedirectMap,
    link_pattern: Regex,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        profile: &'a SiteProfile,
        mapper: &'a PathMapper<'a>,
        redirects: &'a RedirectMap,
    ) -> Result<Self> {
        let origin = regex::escape(profile.origin.trim_end_matches('/'));
        let article_path = regex::escape(&profile.article_path);
        let link_pattern = Regex::new(&format!(
            "^(?:{origin})?{article_path}(?P<title>[^#]+)(?:#(?P<fragment>.*))?$"
        ))
        .context("failed to build article link pattern")?;
        Ok(Self {
            profile,
            mapper,
            redirects,
            link_pattern,
        })
    }

    /// Rewrite `html` as it will appear at `output_path` inside the mirror
    /// rooted at `base_dir`. Returns the serialized page.
    pub fn rewrite(&self, html: &str, output_path: &Path, base_dir: &Path) -> Result<String> {
        let parent = output_path.parent().unwrap_or(base_dir);
        let relative_base = pathdiff::diff_paths(base_dir, parent).with_context(|| {
            format!(
                "cannot express {} relative to {}",
                base_dir.display(),
                parent.display()
            )
        })?;

        let document = kuchiki::parse_html().one(html);
        self.strip_chrome(&document)?;
        self.apply_layout_styles(&document)?;
        self.relink_stylesheet(&document, &relative_base)?;
        self.rewrite_article_links(&document, &relative_base)?;
        self.rewrite_image_sources(&document, &relative_base)?;
        self.fold_print_footer(&document);

        let mut output = Vec::new();
        document
            .serialize(&mut output)
            .context("failed to serialize rewritten page")?;
        String::from_utf8(output).context("rewritten page is not valid UTF-8")
    }

    /// Drop navigation chrome, scripts and comment nodes.
    fn strip_chrome(&self, document: &NodeRef) -> Result<()> {
        for selector in &self.profile.strip_selectors {
            let matches: Vec<_> = document
                .select(selector)
                .map_err(|()| anyhow!("invalid strip selector: {selector}"))?
                .collect();
            for node_ref in matches {
                node_ref.as_node().detach();
            }
        }

        let scripts: Vec<_> = document
            .select("script")
            .map_err(|()| anyhow!("invalid script selector"))?
            .collect();
        for node_ref in scripts {
            node_ref.as_node().detach();
        }

        let comments: Vec<_> = document
            .inclusive_descendants()
            .filter(|node| node.as_comment().is_some())
            .collect();
        for node in comments {
            node.detach();
        }

        Ok(())
    }

    /// Stripping the sidebar leaves the MediaWiki monobook layout with a
    /// content column offset into empty space; these inline styles reflow
    /// it to full width.
    fn apply_layout_styles(&self, document: &NodeRef) -> Result<()> {
        for (selector, style) in &self.profile.layout_styles {
            let matches: Vec<_> = document
                .select(selector)
                .map_err(|()| anyhow!("invalid layout selector: {selector}"))?
                .collect();
            for node_ref in matches {
                node_ref
                    .attributes
                    .borrow_mut()
                    .insert("style", style.clone());
            }
        }
        Ok(())
    }

    /// Point the first stylesheet link at the local CSS copy and drop the
    /// rest; the mirror serves exactly one stylesheet per page.
    fn relink_stylesheet(&self, document: &NodeRef, relative_base: &Path) -> Result<()> {
        let Some((_, css_name)) = self.profile.css_links.first() else {
            return Ok(());
        };
        let matches: Vec<_> = document
            .select("link[rel=\"stylesheet\"]")
            .map_err(|()| anyhow!("invalid stylesheet selector"))?
            .collect();
        for (index, node_ref) in matches.iter().enumerate() {
            if index == 0 {
                let href = href_string(&relative_base.join(css_name));
                node_ref.attributes.borrow_mut().insert("href", href);
            } else {
                node_ref.as_node().detach();
            }
        }
        Ok(())
    }

    fn rewrite_article_links(&self, document: &NodeRef, relative_base: &Path) -> Result<()> {
        let matches: Vec<_> = document
            .select("a[href]")
            .map_err(|()| anyhow!("invalid anchor selector"))?
            .collect();

        for node_ref in matches {
            let href = {
                let attributes = node_ref.attributes.borrow();
                match attributes.get("href") {
                    Some(href) => href.to_string(),
                    None => continue,
                }
            };
            if let Some(local) = self.localize_link(&href, relative_base) {
                node_ref.attributes.borrow_mut().insert("href", local);
            }
        }
        Ok(())
    }

    /// Map one article URL to a relative file link; `None` leaves the
    /// original href in place.
    fn localize_link(&self, href: &str, relative_base: &Path) -> Option<String> {
        let decoded = urlencoding::decode(href).ok()?;
        let captures = self.link_pattern.captures(&decoded)?;
        let explicit_fragment = captures.name("fragment").map(|m| m.as_str().to_string());

        let resolved = self.redirects.resolve(&captures["title"]);
        let (target, redirect_fragment) = match resolved.split_once('#') {
            Some((title, fragment)) => (title.to_string(), Some(fragment.to_string())),
            None => (resolved, None),
        };

        let path = self.mapper.local_path(&target, relative_base)?;
        let mut local = href_string(&path);
        // A fragment written in the page wins over one carried by the
        // redirect target.
        if let Some(fragment) = explicit_fragment.or(redirect_fragment) {
            local.push('#');
            local.push_str(&fragment);
        }
        Some(local)
    }

    fn rewrite_image_sources(&self, document: &NodeRef, relative_base: &Path) -> Result<()> {
        for node_ref in document
            .select("img[src]")
            .map_err(|()| anyhow!("invalid image selector"))?
        {
            let src = {
                let attributes = node_ref.attributes.borrow();
                match attributes.get("src") {
                    Some(src) => src.to_string(),
                    None => continue,
                }
            };
            if !src.starts_with(&self.profile.image_path_prefix) {
                continue;
            }
            let name = src.rsplit('/').next().unwrap_or(&src);
            let name = match urlencoding::decode(name) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => name.to_string(),
            };
            let local = href_string(&relative_base.join(format!("File:{name}")));
            node_ref.attributes.borrow_mut().insert("src", local);
        }
        Ok(())
    }

    /// Fold the print footer into the footer list so the citation line
    /// survives in the offline page. Pages without either element are left
    /// alone.
    fn fold_print_footer(&self, document: &NodeRef) {
        let Ok(print_footer) = document.select_first("div.printfooter") else {
            return;
        };
        let Ok(footer_list) = document.select_first("#f-list") else {
            return;
        };

        let scratch = kuchiki::parse_html().one("<li></li><br>");
        let Ok(item) = scratch.select_first("li") else {
            return;
        };
        let Ok(line_break) = scratch.select_first("br") else {
            return;
        };
        item.as_node().detach();
        line_break.as_node().detach();

        if let Some(id) = print_footer.attributes.borrow().get("id") {
            item.attributes.borrow_mut().insert("id", id.to_string());
        }
        let children: Vec<_> = print_footer.as_node().children().collect();
        for child in children {
            item.as_node().append(child);
        }
        print_footer.as_node().detach();
        footer_list.as_node().prepend(item.as_node().clone());

        let element_children: Vec<_> = footer_list
            .as_node()
            .children()
            .filter(|child| child.as_element().is_some())
            .collect();
        match element_children.get(2) {
            Some(third) => third.insert_after(line_break.as_node().clone()),
            None => footer_list.as_node().append(line_break.as_node().clone()),
        }
    }
}

/// Render a path as an href, with forward slashes regardless of platform.
/// A leading segment containing `:` gets a `./` prefix so the browser does
/// not read it as a URL scheme.
fn href_string(path: &Path) -> String {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::ParentDir => segments.push("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    let joined = segments.join("/");
    match segments.first() {
        Some(first) if first.contains(':') => format!("./{joined}"),
        _ => joined,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{Rewriter, href_string};
    use crate::client::RedirectRow;
    use crate::layout::PathMapper;
    use crate::profile::SiteProfile;
    use crate::redirect::RedirectMap;

    fn redirects() -> RedirectMap {
        RedirectMap::from_rows(vec![
            RedirectRow {
                from: "Grub".to_string(),
                to: "GRUB".to_string(),
                to_fragment: None,
            },
            RedirectRow {
                from: "Swap file".to_string(),
                to: "Swap".to_string(),
                to_fragment: Some("Swap file".to_string()),
            },
        ])
    }

    fn rewrite(html: &str, output: &str) -> String {
        let profile = SiteProfile::arch_wiki();
        let mapper = PathMapper::new(&profile, None, false).expect("mapper");
        let redirects = redirects();
        let rewriter = Rewriter::new(&profile, &mapper, &redirects).expect("rewriter");
        rewriter
            .rewrite(html, Path::new(output), Path::new("/mirror"))
            .expect("rewrite")
    }

    #[test]
    fn article_links_become_relative_file_links() {
        let html = r#"<p><a href="/title/Installation_guide">guide</a></p>"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"href="../en/Installation_guide.html""#), "{out}");
    }

    #[test]
    fn absolute_links_to_the_origin_are_localized_too() {
        let html = r#"<a href="https://wiki.archlinux.org/title/Pacman">x</a>"#;
        let out = rewrite(html, "/mirror/en/Installation_guide.html");
        assert!(out.contains(r#"href="../en/Pacman.html""#), "{out}");
    }

    #[test]
    fn external_links_are_untouched() {
        let html = r#"<a href="https://example.com/title/Foo">x</a>"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"href="https://example.com/title/Foo""#), "{out}");
    }

    #[test]
    fn percent_encoded_titles_are_decoded_before_mapping() {
        let html = r#"<a href="/title/Category%3AEspa%C3%B1ol">cat</a>"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"href="../es/Category:Español.html""#), "{out}");
    }

    #[test]
    fn redirects_are_followed_one_hop() {
        let html = r#"<a href="/title/Grub">boot</a>"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"href="../en/GRUB.html""#), "{out}");
    }

    #[test]
    fn redirect_fragments_are_appended() {
        let html = r#"<a href="/title/Swap_file">swap</a>"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r##"href="../en/Swap.html#Swap file""##), "{out}");
    }

    #[test]
    fn explicit_fragments_override_redirect_fragments() {
        let html = r##"<a href="/title/Swap_file#Performance">swap</a>"##;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r##"href="../en/Swap.html#Performance""##), "{out}");
    }

    #[test]
    fn nested_output_paths_get_deeper_relative_bases() {
        let html = r#"<a href="/title/Main_page">top</a>"#;
        let out = rewrite(html, "/mirror/es/Foo/Bar.html");
        assert!(out.contains(r#"href="../../en/Main_page.html""#), "{out}");
    }

    #[test]
    fn chrome_scripts_and_comments_are_stripped() {
        let html = concat!(
            r#"<div id="archnavbar">nav</div>"#,
            r#"<div id="column-one">side</div>"#,
            r#"<span class="mw-editsection">edit</span>"#,
            r#"<script>alert(1)</script>"#,
            "<!-- hidden -->",
            "<p>body</p>"
        );
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(!out.contains("archnavbar"), "{out}");
        assert!(!out.contains("column-one"), "{out}");
        assert!(!out.contains("mw-editsection"), "{out}");
        assert!(!out.contains("<script"), "{out}");
        assert!(!out.contains("hidden"), "{out}");
        assert!(out.contains("<p>body</p>"), "{out}");
    }

    #[test]
    fn layout_styles_are_applied() {
        let html = r#"<div id="globalWrapper"><div id="content">x</div></div>"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"style="width: 100%""#), "{out}");
        assert!(out.contains(r#"style="margin: 2em; margin-bottom: 0""#), "{out}");
    }

    #[test]
    fn one_stylesheet_link_survives_and_points_local() {
        let html = concat!(
            r#"<head>"#,
            r#"<link rel="stylesheet" href="/load.php?modules=skins.vector">"#,
            r#"<link rel="stylesheet" href="/load.php?modules=site">"#,
            r#"</head><body></body>"#
        );
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert_eq!(out.matches("rel=\"stylesheet\"").count(), 1, "{out}");
        assert!(out.contains(r#"href="../ArchWikiOffline.css""#), "{out}");
    }

    #[test]
    fn image_sources_point_at_local_files() {
        let html = r#"<img src="/images/a/a1/Tux.png">"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"src="../File:Tux.png""#), "{out}");
    }

    #[test]
    fn external_image_sources_are_untouched() {
        let html = r#"<img src="https://example.com/images/x.png">"#;
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains(r#"src="https://example.com/images/x.png""#), "{out}");
    }

    #[test]
    fn print_footer_folds_into_footer_list() {
        let html = concat!(
            r#"<div class="printfooter">Retrieved from <a href="/title/Pacman">Pacman</a></div>"#,
            r#"<ul id="f-list"><li id="a">a</li><li id="b">b</li><li id="c">c</li></ul>"#
        );
        let out = rewrite(html, "/mirror/en/Installation_guide.html");
        assert!(!out.contains("printfooter"), "{out}");
        assert!(out.contains("Retrieved from"), "{out}");
        assert!(out.contains("<br>"), "{out}");
        let list_start = out.find("id=\"f-list\"").expect("footer list present");
        let retrieved = out.find("Retrieved from").expect("footer text present");
        let first_item = out.find("id=\"a\"").expect("existing items kept");
        assert!(retrieved > list_start && retrieved < first_item, "{out}");
    }

    #[test]
    fn pages_without_footer_chrome_are_left_alone() {
        let html = "<p>plain</p>";
        let out = rewrite(html, "/mirror/en/Pacman.html");
        assert!(out.contains("<p>plain</p>"), "{out}");
    }

    #[test]
    fn href_strings_use_forward_slashes_and_guard_colons() {
        assert_eq!(href_string(Path::new("../en/Pacman.html")), "../en/Pacman.html");
        assert_eq!(href_string(Path::new("File:Tux.png")), "./File:Tux.png");
        assert_eq!(href_string(Path::new("../File:Tux.png")), "../File:Tux.png");
    }
}
