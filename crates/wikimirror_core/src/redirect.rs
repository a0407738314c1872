use std::collections::HashMap;

use anyhow::Result;

use crate::client::{RedirectRow, WikiApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub title: String,
    pub fragment: Option<String>,
}

/// In-memory redirect table keyed by space-normalized source title.
///
/// Construction performs the remote fetch, so a `RedirectMap` in hand is
/// always fully loaded. Resolution is a single hop; the wiki itself
/// collapses double redirects, so chains are a content bug, not ours.
pub struct RedirectMap {
    targets: HashMap<String, RedirectTarget>,
}

impl RedirectMap {
    pub fn load<A: WikiApi + ?Sized>(api: &mut A, namespaces: &[i32]) -> Result<Self> {
        Ok(Self::from_rows(api.list_redirects(namespaces)?))
    }

    pub fn from_rows(rows: Vec<RedirectRow>) -> Self {
        let mut targets = HashMap::new();
        for row in rows {
            targets.insert(
                normalize_title(&row.from),
                RedirectTarget {
                    title: row.to,
                    fragment: row.to_fragment,
                },
            );
        }
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, title: &str) -> Option<&RedirectTarget> {
        self.targets.get(&normalize_title(title))
    }

    /// Resolve a title one hop. Redirect sources come back as
    /// `"Target"` or `"Target#Fragment"`; anything else comes back
    /// space-normalized but otherwise untouched.
    pub fn resolve(&self, title: &str) -> String {
        let key = normalize_title(title);
        match self.targets.get(&key) {
            Some(target) => match &target.fragment {
                Some(fragment) => format!("{}#{}", target.title, fragment),
                None => target.title.clone(),
            },
            None => key,
        }
    }
}

/// Underscores and spaces are interchangeable in wiki titles.
fn normalize_title(title: &str) -> String {
    title.replace('_', " ")
}
