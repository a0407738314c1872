//! Core library for mirroring a MediaWiki site as browsable offline HTML.
//!
//! The pipeline: list remote pages and redirects through [`client`], map
//! titles to local paths with [`title`] and [`layout`], rewrite fetched
//! pages for offline use with [`rewrite`], and drive the incremental sync
//! and cleanup from [`mirror`].

pub mod client;
pub mod config;
pub mod layout;
pub mod mirror;
pub mod profile;
pub mod redirect;
pub mod rewrite;
pub mod title;
