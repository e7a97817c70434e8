//! # DOM serializer
//!
//! Turns the pierced DOM snapshot (`DOM.getDocument` with `depth: -1`,
//! `pierce: true`) back into HTML. The walk preserves attribute order, wraps
//! open and closed shadow roots in declarative `<template shadowrootmode>`
//! elements, self-closes the void-element set, and leaves `<script>` and
//! `<style>` content unescaped. A document with no doctype node gets
//! `<!DOCTYPE html>` synthesized ahead of the first element; an explicit
//! doctype is emitted verbatim.

use crate::cdp::protocol::{
    DomNode, NODE_DOCUMENT, NODE_DOCUMENT_FRAGMENT, NODE_DOCUMENT_TYPE, NODE_ELEMENT, NODE_TEXT,
};
use crate::errors::{ChromeError, Result};

// https://developer.mozilla.org/en-US/docs/Glossary/Void_element
fn is_void_element(local_name: &str) -> bool {
    matches!(
        local_name.to_ascii_lowercase().as_str(),
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

fn escape_html(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

#[derive(Default)]
pub struct DomSerializer {
    doctype_written: bool,
    no_escape: bool,
}

impl DomSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serialize(&mut self, root: &DomNode, out: &mut String) -> Result<()> {
        self.serialize_node(root, out)
    }

    fn serialize_node(&mut self, node: &DomNode, out: &mut String) -> Result<()> {
        match node.node_type {
            NODE_ELEMENT => self.serialize_element(node, out),
            NODE_TEXT => {
                self.serialize_text(node, out);
                Ok(())
            }
            NODE_DOCUMENT | NODE_DOCUMENT_FRAGMENT => self.serialize_children(node, out),
            NODE_DOCUMENT_TYPE => {
                out.push_str("<!DOCTYPE ");
                out.push_str(&node.node_name);
                out.push('>');
                self.doctype_written = true;
                Ok(())
            }
            other => Err(ChromeError::Render(format!(
                "node type [{other}] not implemented"
            ))),
        }
    }

    fn serialize_element(&mut self, node: &DomNode, out: &mut String) -> Result<()> {
        if !self.doctype_written {
            out.push_str("<!DOCTYPE html>");
            self.doctype_written = true;
        }

        if node.attributes.len() % 2 != 0 {
            return Err(ChromeError::Render(format!(
                "element <{}> has an odd attribute list",
                node.local_name
            )));
        }

        out.push('<');
        out.push_str(&node.local_name);
        for pair in node.attributes.chunks(2) {
            out.push(' ');
            out.push_str(&pair[0]);
            if !pair[1].is_empty() {
                out.push_str("=\"");
                escape_html(&pair[1], out);
                out.push('"');
            }
        }
        let is_void = is_void_element(&node.local_name);
        out.push_str(if is_void { " />" } else { ">" });

        for shadow_root in &node.shadow_roots {
            let mode = shadow_root.shadow_root_type.as_deref().unwrap_or("");
            if mode != "open" && mode != "closed" {
                continue;
            }
            out.push_str("<template shadowrootmode=\"");
            out.push_str(mode);
            out.push_str("\">");
            self.serialize_node(shadow_root, out)?;
            out.push_str("</template>");
        }

        let saved_no_escape = self.no_escape;
        if node.local_name == "script" || node.local_name == "style" {
            self.no_escape = true;
        }
        let children = self.serialize_children(node, out);
        self.no_escape = saved_no_escape;
        children?;

        if !is_void {
            out.push_str("</");
            out.push_str(&node.local_name);
            out.push('>');
        }
        Ok(())
    }

    fn serialize_children(&mut self, node: &DomNode, out: &mut String) -> Result<()> {
        for child in &node.children {
            self.serialize_node(child, out)?;
        }
        Ok(())
    }

    fn serialize_text(&mut self, node: &DomNode, out: &mut String) {
        if self.no_escape {
            out.push_str(&node.node_value);
        } else {
            escape_html(&node.node_value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(children: Vec<DomNode>) -> DomNode {
        DomNode {
            node_type: NODE_DOCUMENT,
            node_name: "#document".to_string(),
            children,
            ..DomNode::default()
        }
    }

    fn element(local_name: &str, attributes: &[&str], children: Vec<DomNode>) -> DomNode {
        DomNode {
            node_type: NODE_ELEMENT,
            node_name: local_name.to_ascii_uppercase(),
            local_name: local_name.to_string(),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
            children,
            ..DomNode::default()
        }
    }

    fn text(value: &str) -> DomNode {
        DomNode {
            node_type: NODE_TEXT,
            node_name: "#text".to_string(),
            node_value: value.to_string(),
            ..DomNode::default()
        }
    }

    fn doctype(name: &str) -> DomNode {
        DomNode {
            node_type: NODE_DOCUMENT_TYPE,
            node_name: name.to_string(),
            ..DomNode::default()
        }
    }

    fn shadow_root(mode: &str, children: Vec<DomNode>) -> DomNode {
        DomNode {
            node_type: NODE_DOCUMENT_FRAGMENT,
            node_name: "#document-fragment".to_string(),
            shadow_root_type: Some(mode.to_string()),
            children,
            ..DomNode::default()
        }
    }

    fn render(root: &DomNode) -> String {
        let mut out = String::new();
        DomSerializer::new()
            .serialize(root, &mut out)
            .expect("serialize");
        out
    }

    #[test]
    fn synthesizes_doctype_before_first_element() {
        let root = document(vec![element(
            "html",
            &[],
            vec![element("body", &[], vec![text("hi")])],
        )]);
        assert_eq!(render(&root), "<!DOCTYPE html><html><body>hi</body></html>");
    }

    #[test]
    fn explicit_doctype_is_used_verbatim() {
        let root = document(vec![
            doctype("html"),
            element("html", &[], vec![]),
        ]);
        assert_eq!(render(&root), "<!DOCTYPE html><html></html>");

        let root = document(vec![doctype("math"), element("math", &[], vec![])]);
        assert_eq!(render(&root), "<!DOCTYPE math><math></math>");
    }

    #[test]
    fn attribute_order_is_preserved() {
        let root = document(vec![element(
            "div",
            &["b", "2", "a", "1", "c", "3"],
            vec![],
        )]);
        assert_eq!(
            render(&root),
            r#"<!DOCTYPE html><div b="2" a="1" c="3"></div>"#
        );
    }

    #[test]
    fn empty_attribute_value_is_emitted_bare() {
        let root = document(vec![element("input", &["required", ""], vec![])]);
        assert_eq!(render(&root), "<!DOCTYPE html><input required />");
    }

    #[test]
    fn namespaced_attribute_names_pass_through() {
        let root = document(vec![element("div", &["foo:bar", "baz"], vec![])]);
        assert_eq!(render(&root), r#"<!DOCTYPE html><div foo:bar="baz"></div>"#);
    }

    #[test]
    fn void_elements_self_close_without_end_tag() {
        let root = document(vec![element(
            "head",
            &[],
            vec![
                element("meta", &["charset", "utf-8"], vec![]),
                element("br", &[], vec![]),
                element("IMG", &[], vec![]),
            ],
        )]);
        // localName from the protocol is lowercase; the void check still
        // tolerates mixed case.
        let out = render(&root);
        assert!(out.contains(r#"<meta charset="utf-8" />"#));
        assert!(out.contains("<br />"));
        assert!(!out.contains("</meta>"));
        assert!(!out.contains("</br>"));
    }

    #[test]
    fn text_is_escaped_outside_script_and_style() {
        let root = document(vec![element(
            "p",
            &[],
            vec![text(r#"a < b & "c" > 'd'"#)],
        )]);
        assert_eq!(
            render(&root),
            "<!DOCTYPE html><p>a &lt; b &amp; &#34;c&#34; &gt; &#39;d&#39;</p>"
        );
    }

    #[test]
    fn script_and_style_content_is_not_escaped() {
        let root = document(vec![element(
            "html",
            &[],
            vec![
                element("style", &[], vec![text("a > b { color: red }")]),
                element("script", &[], vec![text("if (a < b && c) run();")]),
                element("p", &[], vec![text("a < b")]),
            ],
        )]);
        let out = render(&root);
        assert!(out.contains("<style>a > b { color: red }</style>"));
        assert!(out.contains("<script>if (a < b && c) run();</script>"));
        assert!(out.contains("<p>a &lt; b</p>"));
    }

    #[test]
    fn attribute_values_are_escaped() {
        let root = document(vec![element(
            "div",
            &["title", r#"say "hi" & <bye>"#],
            vec![],
        )]);
        assert_eq!(
            render(&root),
            r#"<!DOCTYPE html><div title="say &#34;hi&#34; &amp; &lt;bye&gt;"></div>"#
        );
    }

    // Shadow roots are emitted immediately inside their host, before any
    // light-DOM children.
    #[test]
    fn open_shadow_root_becomes_declarative_template() {
        let mut host = element(
            "my-component",
            &[],
            vec![element("span", &[], vec![text("light")])],
        );
        host.shadow_roots = vec![shadow_root(
            "open",
            vec![element("h1", &[], vec![text("Hello from Web Component")])],
        )];
        assert_eq!(
            render(&document(vec![host])),
            "<!DOCTYPE html><my-component><template shadowrootmode=\"open\">\
             <h1>Hello from Web Component</h1></template><span>light</span></my-component>"
        );
    }

    #[test]
    fn closed_shadow_roots_are_emitted_and_user_agent_roots_skipped() {
        let mut host = element("my-widget", &[], vec![]);
        host.shadow_roots = vec![
            shadow_root("closed", vec![element("p", &[], vec![text("secret")])]),
            shadow_root("user-agent", vec![element("p", &[], vec![text("ua")])]),
        ];
        let out = render(&document(vec![host]));
        assert!(out.contains(r#"<template shadowrootmode="closed"><p>secret</p></template>"#));
        assert!(!out.contains("ua"));
        assert!(!out.contains("user-agent"));
    }

    #[test]
    fn nested_shadow_roots_serialize_recursively() {
        let mut inner = element("nested-component", &[], vec![]);
        inner.shadow_roots = vec![shadow_root(
            "open",
            vec![element("p", &[], vec![text("Hello from nested component")])],
        )];
        let mut outer = element("main-component", &[], vec![]);
        outer.shadow_roots = vec![shadow_root(
            "open",
            vec![
                element("h1", &[], vec![text("Hello from main component")]),
                inner,
            ],
        )];
        let out = render(&document(vec![outer]));
        assert!(out.contains("<h1>Hello from main component</h1>"));
        assert!(out.contains(
            r#"<nested-component><template shadowrootmode="open"><p>Hello from nested component</p></template></nested-component>"#
        ));
    }

    #[test]
    fn unsupported_node_types_error() {
        let comment = DomNode {
            node_type: 8,
            node_name: "#comment".to_string(),
            node_value: "hidden".to_string(),
            ..DomNode::default()
        };
        let mut out = String::new();
        let err = DomSerializer::new()
            .serialize(&document(vec![comment]), &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("node type [8]"));
    }

    #[test]
    fn odd_attribute_lists_error() {
        let mut broken = element("div", &[], vec![]);
        broken.attributes = vec!["only-a-name".to_string()];
        let mut out = String::new();
        assert!(DomSerializer::new()
            .serialize(&document(vec![broken]), &mut out)
            .is_err());
    }

    #[test]
    fn escaping_state_is_restored_after_script() {
        let root = document(vec![element(
            "body",
            &[],
            vec![
                element("script", &[], vec![text("1 < 2")]),
                text("3 < 4"),
            ],
        )]);
        let out = render(&root);
        assert!(out.contains("<script>1 < 2</script>"));
        assert!(out.contains("3 &lt; 4"));
    }
}
