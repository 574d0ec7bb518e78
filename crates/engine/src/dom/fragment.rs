// ABOUTME: Detached HTML fragment with a side table of removed nodes and attribute overrides.
// ABOUTME: Table-part fragments parse inside their table context; unsafe elements start out removed.

use std::collections::{HashMap, HashSet};

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};

/// Elements dropped with their whole content. The final allowlist pass
/// strips the same set, so no step ever bases a decision on them.
pub const UNSAFE_TAGS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "form",
    "meta", "base", "link", "noscript", "noembed", "noframes", "template", "title", "xmp",
    "plaintext",
];

/// A parsed fragment plus the edits recorded against it.
pub struct Fragment {
    html: Html,
    root: NodeId,
    removed: HashSet<NodeId>,
    attrs: HashMap<NodeId, Vec<(String, String)>>,
}

/// Wrappers a fragment needs to parse in its own context, outermost first.
/// Table parts are dropped by the parser anywhere outside a table.
pub fn table_context(html: &str) -> &'static [&'static str] {
    let rest = html.trim_start();
    let Some(rest) = rest.strip_prefix('<') else {
        return &[];
    };
    let tag: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match tag.as_str() {
        "caption" | "colgroup" | "thead" | "tbody" | "tfoot" => &["table"],
        "col" => &["table", "colgroup"],
        "tr" => &["table", "tbody"],
        "td" | "th" => &["table", "tbody", "tr"],
        _ => &[],
    }
}

/// Surrounds `html` with the given wrappers.
pub fn wrap_in(html: &str, wrappers: &[&str]) -> String {
    let mut out = String::with_capacity(html.len() + wrappers.len() * 16);
    for tag in wrappers {
        out.push('<');
        out.push_str(tag);
        out.push('>');
    }
    out.push_str(html);
    for tag in wrappers.iter().rev() {
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
    out
}

/// Parses a fragment in the context its leading element needs and returns
/// the tree plus the element whose children are the fragment's top-level
/// nodes.
pub fn parse_in_context(html: &str) -> (Html, NodeId) {
    let wrappers = table_context(html);
    if wrappers.is_empty() {
        let doc = Html::parse_fragment(html);
        let root = doc.root_element().id();
        return (doc, root);
    }
    let doc = Html::parse_fragment(&wrap_in(html, wrappers));
    let root = descend(doc.root_element(), wrappers).id();
    (doc, root)
}

/// The fragment root element returned by [`parse_in_context`].
pub fn root_of(doc: &Html, root: NodeId) -> ElementRef<'_> {
    doc.tree
        .get(root)
        .and_then(ElementRef::wrap)
        .unwrap_or_else(|| doc.root_element())
}

/// Follows the wrapper chain down from the parser's own wrapper element.
fn descend<'a>(start: ElementRef<'a>, wrappers: &[&str]) -> ElementRef<'a> {
    let mut current = start;
    for tag in wrappers {
        match current
            .children()
            .filter_map(ElementRef::wrap)
            .find(|c| c.value().name() == *tag)
        {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

impl Fragment {
    /// Parses an HTML fragment. Table parts at the top level keep their
    /// structure.
    pub fn parse(html: &str) -> Self {
        let (html, root) = parse_in_context(html);
        Self::from_parts(html, root)
    }

    /// Parses markup that already carries `wrappers` around the fragment.
    pub fn parse_wrapped(wrapped: &str, wrappers: &[&str]) -> Self {
        let html = Html::parse_fragment(wrapped);
        let root = descend(html.root_element(), wrappers).id();
        Self::from_parts(html, root)
    }

    fn from_parts(html: Html, root: NodeId) -> Self {
        let removed = html
            .tree
            .get(root)
            .into_iter()
            .flat_map(|node| node.descendants())
            .filter(|node| {
                node.value()
                    .as_element()
                    .is_some_and(|el| UNSAFE_TAGS.contains(&el.name()))
            })
            .map(|node| node.id())
            .collect();
        Self {
            html,
            root,
            removed,
            attrs: HashMap::new(),
        }
    }

    /// The element whose children are the fragment's top-level nodes.
    pub fn root(&self) -> ElementRef<'_> {
        self.element(self.root)
            .unwrap_or_else(|| self.html.root_element())
    }

    /// Looks up an element by node id.
    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    /// Returns true if the node or any of its ancestors has been removed.
    pub fn is_removed(&self, node: NodeRef<'_, Node>) -> bool {
        if self.removed.contains(&node.id()) {
            return true;
        }
        node.ancestors().any(|a| self.removed.contains(&a.id()))
    }

    /// Removes the subtree rooted at `id` from the output.
    pub fn remove(&mut self, id: NodeId) {
        self.removed.insert(id);
    }

    /// All live elements below the wrapper, in document order.
    pub fn elements(&self) -> Vec<ElementRef<'_>> {
        self.root()
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|el| !self.is_removed(**el))
            .collect()
    }

    /// All live elements matching `selector`, in document order.
    pub fn select(&self, selector: &Selector) -> Vec<ElementRef<'_>> {
        self.root()
            .select(selector)
            .filter(|el| !self.is_removed(**el))
            .collect()
    }

    /// Ids of all live elements matching `selector`.
    pub fn select_ids(&self, selector: &Selector) -> Vec<NodeId> {
        self.select(selector).into_iter().map(|el| el.id()).collect()
    }

    /// Current attributes of an element, with recorded overrides applied.
    pub fn attrs(&self, el: &ElementRef<'_>) -> Vec<(String, String)> {
        if let Some(overridden) = self.attrs.get(&el.id()) {
            return overridden.clone();
        }
        el.value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Current value of one attribute.
    pub fn attr(&self, el: &ElementRef<'_>, name: &str) -> Option<String> {
        match self.attrs.get(&el.id()) {
            Some(overridden) => overridden
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone()),
            None => el
                .value()
                .attrs()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.to_string()),
        }
    }

    /// Current class list of an element.
    pub fn classes(&self, el: &ElementRef<'_>) -> Vec<String> {
        self.attr(el, "class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Sets an attribute, replacing any existing value.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let mut current = self.current_attrs(id);
        let value = value.into();
        match current.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => current.push((name.to_string(), value)),
        }
        self.attrs.insert(id, current);
    }

    /// Removes an attribute if present.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        let mut current = self.current_attrs(id);
        let before = current.len();
        current.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        if current.len() != before {
            self.attrs.insert(id, current);
        }
    }

    fn current_attrs(&self, id: NodeId) -> Vec<(String, String)> {
        match self.element(id) {
            Some(el) => self.attrs(&el),
            None => Vec::new(),
        }
    }

    /// Live, whitespace-normalized text below a node.
    pub fn text_of(&self, node: NodeRef<'_, Node>) -> String {
        let mut parts = Vec::new();
        self.collect_text(node, &mut parts);
        super::normalize_whitespace(&parts.join(" "))
    }

    fn collect_text<'a>(&self, node: NodeRef<'a, Node>, parts: &mut Vec<&'a str>) {
        if self.removed.contains(&node.id()) {
            return;
        }
        match node.value() {
            Node::Text(t) => parts.push(&**t),
            _ => {
                for child in node.children() {
                    self.collect_text(child, parts);
                }
            }
        }
    }

    /// Returns true if any live descendant element (not the node itself)
    /// satisfies `pred`.
    pub fn any_live_descendant<F>(&self, el: &ElementRef<'_>, pred: F) -> bool
    where
        F: Fn(&ElementRef<'_>) -> bool,
    {
        el.descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(|d| !self.is_removed(*d) && pred(&d))
    }

    /// Serializes the live tree.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for child in self.root().children() {
            self.write_node(child, &mut out);
        }
        out
    }

    /// Serializes one live element including its own tag.
    pub fn outer_html(&self, el: &ElementRef<'_>) -> String {
        let mut out = String::new();
        self.write_node(**el, &mut out);
        out
    }

    fn write_node(&self, node: NodeRef<'_, Node>, out: &mut String) {
        if self.removed.contains(&node.id()) {
            return;
        }
        match node.value() {
            Node::Text(t) => out.push_str(&escape_text(t)),
            Node::Element(el) => {
                let name = el.name();
                let Some(el_ref) = ElementRef::wrap(node) else {
                    return;
                };
                out.push('<');
                out.push_str(name);

                let mut attrs = self.attrs(&el_ref);
                attrs.sort_by(|a, b| a.0.cmp(&b.0));
                for (k, v) in attrs {
                    if is_event_handler(&k) {
                        continue;
                    }
                    out.push(' ');
                    out.push_str(&k);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(&v));
                    out.push('"');
                }

                if is_void_element(name) {
                    out.push_str(" />");
                    return;
                }

                out.push('>');
                for child in node.children() {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            _ => {}
        }
    }
}

fn is_event_handler(attr: &str) -> bool {
    attr.len() > 2 && attr.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("on"))
}

/// Escape text content.
fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape attribute value.
fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Check if tag is void element.
pub fn is_void_element(tag: &str) -> bool {
    matches!(
        tag.to_lowercase().as_str(),
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}
