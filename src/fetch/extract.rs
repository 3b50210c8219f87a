//! Markup extraction helpers.
//!
//! Pages are parsed into a DOM with `scraper`, so comments, script bodies and
//! look-alike attributes never confuse element boundaries.

use scraper::{ElementRef, Html, Node, Selector};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

fn id_selector(id: &str) -> Option<Selector> {
    let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
    Selector::parse(&format!("[id=\"{}\"]", escaped)).ok()
}

/// Inner markup of the first element whose `id` attribute equals `id`.
pub fn inner_html_by_id(html: &str, id: &str) -> Option<String> {
    let selector = id_selector(id)?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    Some(element.inner_html())
}

/// Keep the text from `start_marker` through the end of `end_marker`.
///
/// A missing marker leaves that side untrimmed.
pub fn trim_between<'a>(html: &'a str, start_marker: &str, end_marker: &str) -> &'a str {
    let from = html.find(start_marker).unwrap_or(0);
    let rest = &html[from..];
    match rest.find(end_marker) {
        Some(i) => &rest[..i + end_marker.len()],
        None => rest,
    }
}

/// Result of [`clean_fragment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedFragment {
    pub html: String,
    /// Whether an `outer_id` element was replaced by its `inner_id` descendant.
    pub swapped: bool,
}

/// Re-serialize a fragment without `style` attributes, replacing each
/// `outer_id` element by its `inner_id` descendant.
///
/// An `outer_id` element without such a descendant is kept as it is.
pub fn clean_fragment(html: &str, outer_id: &str, inner_id: &str) -> CleanedFragment {
    let fragment = Html::parse_fragment(html);
    let mut writer = FragmentWriter {
        outer_id,
        inner_id,
        out: String::with_capacity(html.len()),
        swapped: false,
    };
    writer.children(fragment.root_element());
    CleanedFragment {
        html: writer.out,
        swapped: writer.swapped,
    }
}

struct FragmentWriter<'a> {
    outer_id: &'a str,
    inner_id: &'a str,
    out: String,
    swapped: bool,
}

impl FragmentWriter<'_> {
    fn children(&mut self, parent: ElementRef<'_>) {
        let raw = RAW_TEXT_ELEMENTS.contains(&parent.value().name());
        for child in parent.children() {
            match child.value() {
                Node::Text(text) if raw => self.out.push_str(&text.text),
                Node::Text(text) => escape_into(&text.text, false, &mut self.out),
                Node::Comment(comment) => {
                    self.out.push_str("<!--");
                    self.out.push_str(&comment.comment);
                    self.out.push_str("-->");
                }
                Node::Element(_) => {
                    if let Some(element) = ElementRef::wrap(child) {
                        self.element(element);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, element: ElementRef<'_>) {
        if element.value().id() == Some(self.outer_id) {
            let replacement = id_selector(self.inner_id)
                .and_then(|selector| element.select(&selector).next());
            if let Some(inner) = replacement {
                self.swapped = true;
                self.write_tag(inner);
                return;
            }
        }
        self.write_tag(element);
    }

    fn write_tag(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        self.out.push('<');
        self.out.push_str(name);
        for (attr, value) in element.value().attrs() {
            if attr.eq_ignore_ascii_case("style") {
                continue;
            }
            self.out.push(' ');
            self.out.push_str(attr);
            self.out.push_str("=\"");
            escape_into(value, true, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        if VOID_ELEMENTS.contains(&name) {
            return;
        }
        self.children(element);
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
<div id="header">nav</div>
<div class="col" id="segment-content"><p>one</p><div><div>nested</div></div><p>two</p></div>
<div id="footer">end</div>
</body></html>"#;

    #[test]
    fn extracts_inner_html_with_nested_tags() {
        let inner = inner_html_by_id(PAGE, "segment-content").unwrap();
        assert_eq!(inner, "<p>one</p><div><div>nested</div></div><p>two</p>");
    }

    #[test]
    fn missing_element_is_none() {
        assert!(inner_html_by_id(PAGE, "segment-contents").is_none());
        assert!(inner_html_by_id("<p>plain</p>", "segment-content").is_none());
    }

    #[test]
    fn comment_with_closing_tag_stays_inside() {
        let html = r#"<div id="segment-content"><p>a</p><!-- </div> --><p>b</p></div>"#;
        let inner = inner_html_by_id(html, "segment-content").unwrap();
        assert_eq!(inner, "<p>a</p><!-- </div> --><p>b</p>");
    }

    #[test]
    fn data_id_attribute_is_not_the_id() {
        let html = r#"<div data-id="segment-content">WRONG</div><div id="segment-content">RIGHT</div>"#;
        assert_eq!(inner_html_by_id(html, "segment-content").unwrap(), "RIGHT");
    }

    #[test]
    fn markup_inside_script_string_is_ignored() {
        let html = r#"<div id="segment-content"><script>var s = "<div>";</script><p>b</p></div><div id="footer">FOOTER</div>"#;
        let inner = inner_html_by_id(html, "segment-content").unwrap();
        assert!(inner.ends_with("<p>b</p>"));
        assert!(!inner.contains("FOOTER"));
    }

    #[test]
    fn strips_styles_from_every_tag() {
        let html = r#"<div style="color: red" id="a"><span class="c" style='x:y'>t</span></div>"#;
        let cleaned = clean_fragment(html, "tabs", "tabs-key");
        assert_eq!(cleaned.html, r#"<div id="a"><span class="c">t</span></div>"#);
        assert!(!cleaned.swapped);
    }

    #[test]
    fn style_text_in_other_places_is_kept() {
        let html = r#"<p title="a > b" style="x">style="kept"</p><script>var s = "<p style='y'>";</script>"#;
        let cleaned = clean_fragment(html, "tabs", "tabs-key").html;
        assert!(cleaned.starts_with(r#"<p title="a > b">style="kept"</p>"#));
        assert!(cleaned.contains(r#"var s = "<p style='y'>";"#));
    }

    #[test]
    fn replaces_tabs_with_key_view() {
        let html = r#"<p>a</p><div id="tabs"><ul><li>x</li></ul><div id="tabs-key"><table></table></div><div id="tabs-diff">d</div></div><p>b</p>"#;
        let cleaned = clean_fragment(html, "tabs", "tabs-key");
        assert_eq!(cleaned.html, r#"<p>a</p><div id="tabs-key"><table></table></div><p>b</p>"#);
        assert!(cleaned.swapped);
    }

    #[test]
    fn tabs_without_key_view_are_kept() {
        let cleaned = clean_fragment(r#"<div id="tabs"><p>only</p></div>"#, "tabs", "tabs-key");
        assert_eq!(cleaned.html, r#"<div id="tabs"><p>only</p></div>"#);
        assert!(!cleaned.swapped);
    }

    #[test]
    fn trims_to_markers() {
        let html = "junk<h2 id=\"root\">T</h2>body<script src=\"j.js\"></script>tail";
        assert_eq!(
            trim_between(html, "<h2 id=\"root\"", "<script src=\"j.js\"></script>"),
            "<h2 id=\"root\">T</h2>body<script src=\"j.js\"></script>"
        );
        assert_eq!(trim_between("no markers", "<h2", "</x>"), "no markers");
    }
}
