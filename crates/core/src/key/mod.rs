//! Deterministic cache-key derivation for article resources.
//!
//! Keys are derived once from a resource URL and reused everywhere; the
//! on-disk filename is always a SHA-256 hash of the key, recomputed at each
//! use so the key stays the single source of truth. Derivation is total:
//! inputs that match no rule fall back to the percent-decoded,
//! NFC-normalized absolute URL string, never to an error.

use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Host serving image uploads. Image keys get width-variant handling.
const IMAGE_HOST: &str = "upload.wikimedia.org";

/// Dev host whose URLs carry the real host as the first path segment.
const LOOPBACK_HOST: &str = "localhost";

const KEY_SEPARATOR: &str = "__";

/// Kind hint a caller may attach to a resource URL.
///
/// Classification is primarily URL-driven; the hint is consulted only when
/// the URL shape alone does not decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    PageHtml,
    PageReferences,
    PageSections,
    Css,
    Js,
    Image,
}

impl ResourceKind {
    /// Page-resource path segment this kind corresponds to, if any.
    fn page_resource(self) -> Option<&'static str> {
        match self {
            ResourceKind::PageHtml => Some("mobile-html"),
            ResourceKind::PageReferences => Some("references"),
            ResourceKind::PageSections => Some("mobile-sections"),
            ResourceKind::Css | ResourceKind::Js | ResourceKind::Image => None,
        }
    }
}

/// Closed classification of a resource URL, decided once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Classified {
    /// A `.../page/<resource>/<title>` shaped URL.
    Page { host: String, resource: String, title: String },
    /// An upload-host image, optionally a width-specific thumbnail.
    Image { name: String, width: Option<u32> },
    /// Per-host site CSS.
    SiteCss { host: String },
    /// Globally shared CSS, identical across hosts.
    GlobalCss { title: String },
    /// Globally shared JS, identical across hosts.
    GlobalJs { title: String },
    /// Host plus trailing path component, no special shape.
    Plain { host: String, title: String },
    /// Nothing matched; the canonicalized URL string is the key.
    Opaque(String),
}

/// Item key for a resource URL: which blob this URL's content maps to.
pub fn item_key(url: &Url, kind: Option<ResourceKind>) -> String {
    match classify(url, kind) {
        Classified::Page { host, resource, title } => join(&[host.as_str(), resource.as_str(), title.as_str()]),
        Classified::Image { name, width: Some(w) } => join(&[IMAGE_HOST, name.as_str(), w.to_string().as_str()]),
        Classified::Image { name, width: None } => join(&[IMAGE_HOST, name.as_str()]),
        Classified::SiteCss { host } => join(&[host.as_str(), "site", "css"]),
        Classified::GlobalCss { title } => join(&[title.as_str(), "css"]),
        Classified::GlobalJs { title } => join(&[title.as_str(), "js"]),
        Classified::Plain { host, title } => join(&[host.as_str(), title.as_str()]),
        Classified::Opaque(key) => key,
    }
}

/// Group key for an article URL.
///
/// The page-resource segment is dropped so every resource of one article
/// (HTML, references, sections) converges on a single group.
pub fn group_key(url: &Url) -> String {
    match classify(url, None) {
        Classified::Page { host, title, .. } | Classified::Plain { host, title } => {
            join(&[host.as_str(), title.as_str()])
        }
        Classified::Image { name, .. } => join(&[IMAGE_HOST, name.as_str()]),
        Classified::SiteCss { host } => join(&[host.as_str(), "site", "css"]),
        Classified::GlobalCss { title } => join(&[title.as_str(), "css"]),
        Classified::GlobalJs { title } => join(&[title.as_str(), "js"]),
        Classified::Opaque(key) => key,
    }
}

/// Width-variant-less item key for an image URL.
///
/// Returns `Some` only for width-specific image variants; used as the read
/// fallback so a differently-sized request for a cached image still hits.
pub fn variantless_item_key(url: &Url) -> Option<String> {
    match classify(url, None) {
        Classified::Image { name, width: Some(_) } => Some(join(&[IMAGE_HOST, name.as_str()])),
        _ => None,
    }
}

/// On-disk filename for a cache key: SHA-256 hex of the key bytes.
///
/// Never stored, always recomputed, so key and file can never drift apart.
pub fn hashed_path(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn join(components: &[&str]) -> String {
    components.join(KEY_SEPARATOR)
}

/// NFC-normalize a string, matching how titles are canonicalized upstream.
fn canonical(s: &str) -> String {
    s.nfc().collect()
}

/// Percent-decoded, NFC-normalized absolute URL string: the fallback key.
fn opaque_key(url: &Url) -> String {
    canonical(&percent_decode_str(url.as_str()).decode_utf8_lossy())
}

fn classify(url: &Url, kind: Option<ResourceKind>) -> Classified {
    let segments: Vec<String> = url
        .path_segments()
        .map(|s| {
            s.filter(|seg| !seg.is_empty())
                .map(|seg| canonical(&percent_decode_str(seg).decode_utf8_lossy()))
                .collect()
        })
        .unwrap_or_default();

    let Some(title) = segments.last().cloned() else {
        return Classified::Opaque(opaque_key(url));
    };
    let Some(raw_host) = url.host_str() else {
        return Classified::Opaque(opaque_key(url));
    };

    // The dev proxy serves every host under localhost with the real host as
    // the first path segment.
    let host = if raw_host == LOOPBACK_HOST {
        match segments.first() {
            Some(first) => first.clone(),
            None => return Classified::Opaque(opaque_key(url)),
        }
    } else {
        raw_host.to_string()
    };

    if let Some(resource) = page_resource(&segments) {
        return Classified::Page { host, resource, title };
    }

    if raw_host == IMAGE_HOST {
        let (name, width) = image_name_and_width(&segments, &title);
        return Classified::Image { name, width };
    }

    if segments.iter().any(|s| s == "css") || kind == Some(ResourceKind::Css) {
        return if title == "site" {
            Classified::SiteCss { host }
        } else {
            Classified::GlobalCss { title }
        };
    }

    if segments.iter().any(|s| s == "javascript") || kind == Some(ResourceKind::Js) {
        return Classified::GlobalJs { title };
    }

    // A page-kind hint on a URL without the /page/ shape still yields a
    // page key, so hinted callers get stable keys for rewritten URLs.
    if let Some(resource) = kind.and_then(ResourceKind::page_resource) {
        return Classified::Page { host, resource: resource.to_string(), title };
    }

    Classified::Plain { host, title }
}

/// `.../page/<resource>/<title>` detection: third segment from the end.
fn page_resource(segments: &[String]) -> Option<String> {
    let len = segments.len();
    if len >= 3 && segments[len - 3] == "page" {
        Some(segments[len - 2].clone())
    } else {
        None
    }
}

/// Split an image filename into its size-prefix-less name and, for
/// thumbnail paths, the pixel width encoded in the `NNNpx-` prefix.
fn image_name_and_width(segments: &[String], title: &str) -> (String, Option<u32>) {
    match title.find("px-") {
        Some(pos) => {
            let name = title[pos + 3..].to_string();
            let width = if segments.iter().any(|s| s == "thumb") {
                title[..pos].parse::<u32>().ok()
            } else {
                None
            };
            (name, width)
        }
        None => (title.to_string(), None),
    }
}
