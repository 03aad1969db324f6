//! Serialization rules shared by the tree builder and the reconstructor

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use markup5ever_rcdom::{Handle, NodeData, SerializableHandle};

use crate::core::errors::{Result, TranslationError};

/// Elements that never carry content or an end tag
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text is written without escaping
pub const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "noscript", "plaintext",
];

/// Output dialect, picked from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkupStyle {
    #[default]
    Html,
    /// Self-closed void elements, numeric character references
    Xhtml,
}

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&name)
}

fn nbsp(style: MarkupStyle) -> &'static str {
    match style {
        MarkupStyle::Html => "&nbsp;",
        MarkupStyle::Xhtml => "&#160;",
    }
}

pub fn escape_text(text: &str, style: MarkupStyle, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str(nbsp(style)),
            c => out.push(c),
        }
    }
}

pub fn escape_attr(value: &str, style: MarkupStyle, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str(nbsp(style)),
            c => out.push(c),
        }
    }
}

/// `<name a="b">`, or `<name a="b" />` for an XHTML void element
pub fn write_start_tag(
    name: &str,
    attrs: &[(String, String)],
    style: MarkupStyle,
    out: &mut String,
) {
    out.push('<');
    out.push_str(name);
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_attr(value, style, out);
        out.push('"');
    }
    if style == MarkupStyle::Xhtml && is_void(name) {
        out.push_str(" /");
    }
    out.push('>');
}

pub fn write_end_tag(name: &str, out: &mut String) {
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Element name as written in the source, prefix included
pub fn element_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some(match &name.prefix {
            Some(prefix) => format!("{}:{}", prefix, name.local),
            None => name.local.to_string(),
        }),
        _ => None,
    }
}

/// Attributes in source order with qualified names
pub fn element_attrs(handle: &Handle) -> Vec<(String, String)> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|attr| {
                let key = match &attr.name.prefix {
                    Some(prefix) => format!("{}:{}", prefix, attr.name.local),
                    None => attr.name.local.to_string(),
                };
                (key, attr.value.to_string())
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Children of an element, including a template's contents
pub fn element_children(handle: &Handle) -> Vec<Handle> {
    let mut children: Vec<Handle> = handle.children.borrow().iter().cloned().collect();
    if let NodeData::Element {
        template_contents, ..
    } = &handle.data
    {
        if let Some(contents) = template_contents.borrow().as_ref() {
            children.extend(contents.children.borrow().iter().cloned());
        }
    }
    children
}

fn contains_template(handle: &Handle) -> bool {
    handle.children.borrow().iter().any(|child| {
        element_name(child).as_deref() == Some("template") || contains_template(child)
    })
}

/// Markup of a node kept out of translation.
///
/// HTML elements go through html5ever's serializer. XHTML output, templates
/// (whose contents that serializer drops) and non-element nodes use
/// [`serialize_handle`].
pub fn serialize_opaque(handle: &Handle, style: MarkupStyle) -> Result<String> {
    let html_element = matches!(handle.data, NodeData::Element { .. })
        && element_name(handle).as_deref() != Some("template")
        && !contains_template(handle);

    if style == MarkupStyle::Html && html_element {
        let mut buf = Vec::new();
        let serializable: SerializableHandle = handle.clone().into();
        let opts = SerializeOpts {
            traversal_scope: TraversalScope::IncludeNode,
            ..Default::default()
        };
        serialize(&mut buf, &serializable, opts).map_err(|e| TranslationError::ParseError {
            message: format!("cannot serialize element: {e}"),
        })?;
        return String::from_utf8(buf).map_err(|e| TranslationError::ParseError {
            message: format!("serialized markup is not UTF-8: {e}"),
        });
    }

    let mut out = String::new();
    serialize_handle(handle, style, false, &mut out);
    Ok(out)
}

/// Serialize a parsed subtree verbatim
pub fn serialize_handle(handle: &Handle, style: MarkupStyle, raw_parent: bool, out: &mut String) {
    match &handle.data {
        NodeData::Document => {
            for child in handle.children.borrow().iter() {
                serialize_handle(child, style, false, out);
            }
        }
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            if !public_id.is_empty() {
                out.push_str(&format!(" PUBLIC \"{public_id}\""));
                if !system_id.is_empty() {
                    out.push_str(&format!(" \"{system_id}\""));
                }
            } else if !system_id.is_empty() {
                out.push_str(&format!(" SYSTEM \"{system_id}\""));
            }
            out.push('>');
        }
        NodeData::Text { contents } => {
            let text = contents.borrow();
            if raw_parent {
                out.push_str(&text);
            } else {
                escape_text(&text, style, out);
            }
        }
        NodeData::Comment { contents } => {
            out.push_str("<!--");
            out.push_str(contents);
            out.push_str("-->");
        }
        NodeData::ProcessingInstruction { target, contents } => {
            out.push_str("<?");
            out.push_str(target);
            if !contents.is_empty() {
                out.push(' ');
                out.push_str(contents);
            }
            out.push_str("?>");
        }
        NodeData::Element { .. } => {
            let name = element_name(handle).unwrap_or_default();
            write_start_tag(&name, &element_attrs(handle), style, out);
            if is_void(&name) {
                return;
            }
            let raw = is_raw_text(&name);
            for child in element_children(handle) {
                serialize_handle(&child, style, raw, out);
            }
            write_end_tag(&name, out);
        }
    }
}
