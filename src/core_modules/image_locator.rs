// THEORY:
// The `ImageLocator` is the first stage of a cell scan. It turns raw cell text into
// the list of images the rest of the pipeline has to look at, and it also exposes
// the per-image alt text so the scanner can run the alt-text check without parsing
// twice.
//
// Two markup languages reach it:
// 1.  **Markdown** (text cells) is handed to a CommonMark parser. Every image event
//     yields its destination and the plain text of its alt content. Raw HTML blocks
//     and inline HTML inside the markdown are collected and passed on to (2).
// 2.  **HTML** (rendered outputs, and HTML embedded in markdown) is parsed into a
//     document tree and its `<img>` elements are collected. Comments, attribute
//     values and `<script>`/`<style>` bodies are never mistaken for images. Markdown
//     image syntax written inside an HTML block (the `<div align="center">` idiom)
//     is not rendered by the CommonMark parser, so the text nodes of embedded HTML
//     go through the markdown pass once more.
//
// Neither parser can fail: broken markup only yields fewer images.
//
// Resolution: a reference that already parses as an absolute URL (including
// `data:` URLs produced by plotting libraries) is used verbatim. Anything else is a
// notebook-relative path and is served from the origin under `/files/`.

use crate::cell::CellKind;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use scraper::{Html, Node};
use url::Url;

pub const FILES_PREFIX: &str = "/files/";

/// Elements whose text is never rendered as markup.
const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

/// An image written with markdown `![alt](url)` syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownImage {
    pub url: String,
    pub alt: String,
}

/// An `<img>` element found in HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlImage {
    pub src: Option<String>,
    /// `None` when the element carries no `alt` attribute at all.
    pub alt: Option<String>,
}

/// A resolved image locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// The reference exactly as written in the markup.
    pub raw: String,
    pub url: Url,
}

/// Everything the scanner needs from one markdown source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownScan {
    pub images: Vec<MarkdownImage>,
    pub html_images: Vec<HtmlImage>,
}

pub struct ImageLocator {
    origin: Url,
}

impl ImageLocator {
    pub fn new(origin: Url) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolves one reference. `None` only for references that cannot form a URL
    /// even under the origin (e.g. an empty string).
    pub fn resolve(&self, reference: &str) -> Option<ImageReference> {
        let raw = reference.trim();
        if raw.is_empty() {
            return None;
        }
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => {
                let relative = raw.trim_start_matches('/');
                self.origin.join(&format!("{FILES_PREFIX}{relative}")).ok()?
            }
        };
        Some(ImageReference {
            raw: raw.to_string(),
            url,
        })
    }

    /// Every image reference in `source`, in document order: markdown images
    /// first (text cells only), then `<img>` elements.
    pub fn locate(&self, source: &str, kind: CellKind) -> Vec<ImageReference> {
        let raw_refs: Vec<String> = match kind {
            CellKind::Text => {
                let scan = scan_markdown(source);
                scan.images
                    .into_iter()
                    .map(|image| image.url)
                    .chain(scan.html_images.into_iter().filter_map(|image| image.src))
                    .collect()
            }
            CellKind::CodeOutput => html_images(source)
                .into_iter()
                .filter_map(|image| image.src)
                .collect(),
        };
        raw_refs.iter().filter_map(|raw| self.resolve(raw)).collect()
    }
}

/// Parses markdown, returning its images and the `<img>` elements of any raw
/// HTML it embeds.
pub fn scan_markdown(source: &str) -> MarkdownScan {
    let mut scan = MarkdownScan::default();
    collect_markdown(source, &mut scan, true);
    scan
}

/// Collects every `<img>` element of an HTML fragment, in document order.
pub fn html_images(fragment: &str) -> Vec<HtmlImage> {
    parse_fragment(fragment).images
}

fn collect_markdown(source: &str, scan: &mut MarkdownScan, follow_html: bool) {
    let mut embedded_html = String::new();
    // Indices into `scan.images` of the images whose alt text is still open.
    // Images may nest inside alt text; a nested image's alt also counts for its parent.
    let mut open: Vec<usize> = Vec::new();

    for event in Parser::new_ext(source, Options::empty()) {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                open.push(scan.images.len());
                scan.images.push(MarkdownImage {
                    url: dest_url.to_string(),
                    alt: String::new(),
                });
            }
            Event::End(TagEnd::Image) => {
                if let Some(closed) = open.pop() {
                    if let Some(&parent) = open.last() {
                        let nested_alt = scan.images[closed].alt.clone();
                        scan.images[parent].alt.push_str(&nested_alt);
                    }
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(&current) = open.last() {
                    scan.images[current].alt.push_str(&text);
                }
            }
            Event::Html(html) | Event::InlineHtml(html) if follow_html => {
                embedded_html.push_str(&html);
            }
            Event::End(
                TagEnd::HtmlBlock | TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::TableCell,
            ) => flush_embedded(&mut embedded_html, scan),
            _ => {}
        }
    }
    flush_embedded(&mut embedded_html, scan);
}

/// Moves the `<img>` elements of the buffered HTML into `scan`, then the markdown
/// images written in its text. Nested text is scanned as plain markdown only.
fn flush_embedded(html: &mut String, scan: &mut MarkdownScan) {
    if html.is_empty() {
        return;
    }
    let fragment = parse_fragment(html);
    scan.html_images.extend(fragment.images);
    for text in &fragment.text {
        collect_markdown(text, scan, false);
    }
    html.clear();
}

#[derive(Default)]
struct ParsedFragment {
    images: Vec<HtmlImage>,
    text: Vec<String>,
}

fn parse_fragment(fragment: &str) -> ParsedFragment {
    let document = Html::parse_fragment(fragment);
    let mut parsed = ParsedFragment::default();

    for node in document.tree.root().descendants() {
        match node.value() {
            Node::Element(element) if element.name() == "img" => parsed.images.push(HtmlImage {
                src: element.attr("src").map(str::to_string),
                alt: element.attr("alt").map(str::to_string),
            }),
            Node::Text(text) => {
                let raw = node
                    .parent()
                    .and_then(|parent| parent.value().as_element().map(|element| element.name()))
                    .is_some_and(|name| RAW_TEXT_ELEMENTS.iter().any(|raw| *raw == name));
                if !raw && !text.trim().is_empty() {
                    parsed.text.push(String::from(&**text));
                }
            }
            _ => {}
        }
    }
    parsed
}
