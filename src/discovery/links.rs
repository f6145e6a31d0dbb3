//! `Link` header and HTML `<link>` parsing

/// A single web link: target plus its relation types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub rels: Vec<String>,
}

impl Link {
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rels.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }
}

/// The `hub` and `self` relations WebSub cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRelations {
    pub hub: Option<String>,
    pub topic: Option<String>,
}

impl LinkRelations {
    /// Fill whichever relations are still missing; first occurrence wins
    pub fn absorb<'a>(&mut self, links: impl IntoIterator<Item = &'a Link>) {
        for link in links {
            if self.hub.is_none() && link.has_rel("hub") {
                self.hub = Some(link.url.clone());
            }
            if self.topic.is_none() && link.has_rel("self") {
                self.topic = Some(link.url.clone());
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.hub.is_some() && self.topic.is_some()
    }

    /// Relations advertised by a set of `Link` header values
    pub fn from_header_values<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut relations = Self::default();
        for value in values {
            relations.absorb(&parse_link_header(value));
        }
        relations
    }
}

/// Index of the first `delim` outside a quoted string
fn find_unquoted(s: &str, delim: u8) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, b) in s.bytes().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            _ if b == delim && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

fn parse_rels(params: &str) -> Vec<String> {
    let mut rels = Vec::new();
    let mut rest = params;
    loop {
        let (param, remainder) = match find_unquoted(rest, b';') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        if let Some((name, value)) = param.split_once('=') {
            if name.trim().eq_ignore_ascii_case("rel") {
                rels.extend(unquote(value).split_whitespace().map(|r| r.to_ascii_lowercase()));
            }
        }
        match remainder {
            Some(r) => rest = r,
            None => break,
        }
    }
    rels
}

/// Parse an RFC 8288 `Link` header value into its links.
///
/// Entries that do not start with `<uri>` are skipped.
pub fn parse_link_header(value: &str) -> Vec<Link> {
    let mut links = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if rest.is_empty() {
            break;
        }

        let entry_end = match rest.strip_prefix('<').and_then(|r| r.find('>')) {
            Some(close) => {
                let url = rest[1..close + 1].trim().to_string();
                let after = &rest[close + 2..];
                let params_end = find_unquoted(after, b',').unwrap_or(after.len());
                links.push(Link {
                    url,
                    rels: parse_rels(&after[..params_end]),
                });
                close + 2 + params_end
            }
            None => find_unquoted(rest, b',').unwrap_or(rest.len()),
        };

        rest = &rest[entry_end..];
    }

    links
}

fn unescape_html(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn is_tag_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b':' || b == b'-' || b == b'_'
}

/// Attributes of a start tag, given the text between the tag name and `>`
fn parse_attributes(tag: &str) -> Vec<(String, String)> {
    let bytes = tag.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'/' | b'>')
        {
            i += 1;
        }
        if name_start == i {
            break;
        }
        let name = tag[name_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let mut value = String::new();
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                let start = i + 1;
                let end = tag[start..]
                    .bytes()
                    .position(|b| b == quote)
                    .map(|p| start + p)
                    .unwrap_or(bytes.len());
                value = unescape_html(&tag[start..end]);
                i = (end + 1).min(bytes.len());
            } else {
                let start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                value = unescape_html(&tag[start..i]);
            }
        }

        attrs.push((name, value));
    }

    attrs
}

/// End of a tag (index of its `>`), skipping quoted attribute values.
/// Quotes only open a value right after `=`; an unterminated value falls
/// back to the first `>`.
fn tag_end(html: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut after_eq = false;
    for (offset, b) in html[from..].bytes().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if after_eq && (b == b'"' || b == b'\'') => {
                quote = Some(b);
                after_eq = false;
            }
            None if b == b'>' => return Some(from + offset),
            None if b == b'=' => after_eq = true,
            None if b.is_ascii_whitespace() => {}
            None => after_eq = false,
        }
    }
    html[from..].find('>').map(|p| from + p)
}

/// Whether the byte after `<` opens markup rather than being text
fn opens_markup(b: u8) -> bool {
    b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?')
}

/// Scan HTML (or XML) for `<link rel=... href=...>` elements, including
/// namespaced `*:link` tags, filling whatever `relations` still lacks.
pub fn scan_html_links(html: &str, relations: &mut LinkRelations) {
    let bytes = html.as_bytes();
    let mut i = 0;

    while !relations.is_complete() {
        let Some(open) = html[i..].find('<').map(|p| i + p) else {
            break;
        };

        if !bytes.get(open + 1).copied().is_some_and(opens_markup) {
            i = open + 1;
            continue;
        }

        if html[open..].starts_with("<!--") {
            match html[open + 4..].find("-->") {
                Some(end) => {
                    i = open + 4 + end + 3;
                    continue;
                }
                None => break,
            }
        }

        let name_start = open + 1;
        let mut name_end = name_start;
        while name_end < bytes.len() && is_tag_name_byte(bytes[name_end]) {
            name_end += 1;
        }
        let Some(close) = tag_end(html, name_end) else {
            break;
        };

        let name = html[name_start..name_end].to_ascii_lowercase();
        if name == "link" || name.ends_with(":link") {
            let attrs = parse_attributes(&html[name_end..close]);
            let rel = attrs.iter().find(|(k, _)| k == "rel").map(|(_, v)| v.as_str());
            let href = attrs.iter().find(|(k, _)| k == "href").map(|(_, v)| v.clone());
            if let (Some(rel), Some(href)) = (rel, href) {
                let link = Link {
                    url: href,
                    rels: rel.split_whitespace().map(|r| r.to_ascii_lowercase()).collect(),
                };
                relations.absorb(std::iter::once(&link));
            }
        }

        i = close + 1;
    }
}
