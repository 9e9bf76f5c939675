//! HTML rendering of directory indexes

use crate::assets::AssetLinks;
use crate::config::DirViewTheme;
use crate::listing::DirEntry;
use html_escape::{encode_double_quoted_attribute, encode_text};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt::Write;

/// Characters escaped inside a single URL path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Renders an index page for `display_path` (a `/`-prefixed path relative to
/// the served root).
///
/// Entries are rendered in the order given; callers sort beforehand when the
/// theme asks for it. `nonce` tags the stylesheet link so it passes the page's
/// content security policy.
pub fn render_directory(
    display_path: &str,
    entries: &[DirEntry],
    nonce: Option<&str>,
    theme: DirViewTheme,
    links: &AssetLinks,
) -> String {
    match theme {
        DirViewTheme::Basic => render_basic(display_path, entries),
        DirViewTheme::Pretty => render_pretty(display_path, entries, nonce, links),
    }
}

fn render_basic(display_path: &str, entries: &[DirEntry]) -> String {
    let title = encode_text(display_path);
    let mut html = String::with_capacity(512 + entries.len() * 128);

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(html, "<title>Index of {}</title>", title);
    html.push_str("</head>\n<body>\n");
    let _ = writeln!(html, "<h1>Index of {}</h1>", title);
    html.push_str("<table>\n<tr><th>Name</th><th>Size</th><th>Permissions</th></tr>\n");

    if let Some(parent) = parent_href(display_path) {
        let _ = writeln!(
            html,
            "<tr><td><a href=\"{}\">../</a></td><td></td><td></td></tr>",
            encode_double_quoted_attribute(&parent)
        );
    }
    for entry in entries {
        let _ = writeln!(
            html,
            "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
            encode_double_quoted_attribute(&entry_href(display_path, entry)),
            encode_text(&entry.display_name()),
            encode_text(&entry.size),
            encode_text(&entry.permissions),
        );
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}

fn render_pretty(
    display_path: &str,
    entries: &[DirEntry],
    nonce: Option<&str>,
    links: &AssetLinks,
) -> String {
    let title = encode_text(display_path);
    let mut html = String::with_capacity(1024 + entries.len() * 192);

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(html, "<title>Index of {}</title>", title);
    if let Some(stylesheet) = &links.stylesheet {
        let _ = write!(
            html,
            "<link rel=\"stylesheet\" href=\"{}\"",
            encode_double_quoted_attribute(stylesheet)
        );
        if let Some(nonce) = nonce {
            let _ = write!(html, " nonce=\"{}\"", encode_double_quoted_attribute(nonce));
        }
        html.push_str(">\n");
    }
    html.push_str("</head>\n<body>\n<main>\n");
    let _ = writeln!(html, "<h1>Index of {}</h1>", title);
    html.push_str("<table>\n<thead><tr><th>Name</th><th>Size</th><th>Permissions</th></tr></thead>\n<tbody>\n");

    if let Some(parent) = parent_href(display_path) {
        let _ = writeln!(
            html,
            "<tr><td><a class=\"dir\" href=\"{}\">../</a></td><td class=\"size\"></td><td class=\"perm\"></td></tr>",
            encode_double_quoted_attribute(&parent)
        );
    }
    for entry in entries {
        let class = if entry.is_dir { "dir" } else { "file" };
        let _ = writeln!(
            html,
            "<tr><td><a class=\"{}\" href=\"{}\">{}</a></td><td class=\"size\">{}</td><td class=\"perm\">{}</td></tr>",
            class,
            encode_double_quoted_attribute(&entry_href(display_path, entry)),
            encode_text(&entry.display_name()),
            encode_text(&entry.size),
            encode_text(&entry.permissions),
        );
    }

    html.push_str("</tbody>\n</table>\n</main>\n</body>\n</html>\n");
    html
}

/// Percent-encodes each `/`-separated segment of `path`, keeping separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn directory_base(display_path: &str) -> String {
    let mut base = encode_path(display_path);
    if !base.starts_with('/') {
        base.insert(0, '/');
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

fn entry_href(display_path: &str, entry: &DirEntry) -> String {
    let mut href = directory_base(display_path);
    href.push_str(&utf8_percent_encode(&entry.name, SEGMENT).to_string());
    if entry.is_dir {
        href.push('/');
    }
    href
}

/// Link to the parent directory, `None` at the root.
fn parent_href(display_path: &str) -> Option<String> {
    let trimmed = display_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let parent = match trimmed.rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    };
    Some(directory_base(parent))
}
