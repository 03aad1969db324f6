//! Regenerates markup from a (translated) content tree

use crate::core::errors::{Result, TranslationError};
use crate::processors::markup;
use crate::processors::tree::{ContentTree, NodeContent, NodeId};

/// Writes a [`ContentTree`] back out as HTML.
///
/// Elements keep their tag, attributes and order; leaves contribute their
/// translation when one is present and their original text otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlReconstructor;

impl HtmlReconstructor {
    pub fn new() -> Self {
        Self
    }

    pub fn reconstruct(&self, tree: &ContentTree) -> Result<String> {
        let mut out = String::new();
        if let Some(prologue) = &tree.prologue {
            out.push_str(prologue);
        }
        self.write_node(tree, tree.root(), &mut out)?;
        Ok(out)
    }

    fn write_node(&self, tree: &ContentTree, id: NodeId, out: &mut String) -> Result<()> {
        let node = tree.node(id)?;

        match &node.content {
            NodeContent::Text(_) => {
                if !node.children.is_empty() {
                    return Err(TranslationError::ReconstructionError {
                        message: format!("leaf {} has {} children", id.0, node.children.len()),
                    });
                }
                let text = node.output_text().unwrap_or_default();
                // An empty-input root leaf is echoed back as-is
                if node.parent.is_none() {
                    out.push_str(text);
                } else {
                    markup::escape_text(text, tree.style, out);
                }
            }
            NodeContent::Opaque(verbatim) => out.push_str(verbatim),
            NodeContent::Container => {
                for child in &node.children {
                    self.write_node(tree, *child, out)?;
                }
            }
            NodeContent::Element(meta) => {
                if meta.name.is_empty() {
                    return Err(TranslationError::ReconstructionError {
                        message: format!("element {} has no tag name", id.0),
                    });
                }
                markup::write_start_tag(&meta.name, &meta.attrs, tree.style, out);
                if markup::is_void(&meta.name) && node.children.is_empty() {
                    return Ok(());
                }
                for child in &node.children {
                    self.write_node(tree, *child, out)?;
                }
                markup::write_end_tag(&meta.name, out);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::tree::TreeBuilder;

    fn build(html: &str) -> ContentTree {
        TreeBuilder::default().build(html, |t| t.chars().count()).unwrap()
    }

    fn render(tree: &ContentTree) -> String {
        HtmlReconstructor::new().reconstruct(tree).unwrap()
    }

    #[test]
    fn test_translated_leaves_around_skip_tag() {
        let mut tree = build("<p>Hello <code>x=1</code> world</p>");
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 2);
        tree.set_translation(leaves[0], "Bonjour ".to_string());
        tree.set_translation(leaves[1], " monde".to_string());

        assert_eq!(render(&tree), "<p>Bonjour <code>x=1</code> monde</p>");
    }

    #[test]
    fn test_untranslated_round_trip() {
        let inputs = [
            "<p>Hello <code>x=1</code> world</p>",
            "<div class=\"chapter\" id=\"c1\"><h1>Title</h1><p>A <em>b</em> &amp; c</p></div>",
            "<p>one<br>two</p><!-- keep --><img src=\"a.png\" alt=\"x\">",
            "<table><tbody><tr><td>1</td></tr></tbody></table>",
            "<ul><li>a</li><li>b <a href=\"#n1\">1</a></li></ul>",
        ];
        for html in inputs {
            assert_eq!(render(&build(html)), html);
        }
    }

    #[test]
    fn test_structure_round_trip_on_repaired_markup() {
        let html = "<div><p>unclosed<p>second <span title='q\"x'>s</span></div>";
        let tree = build(html);
        let reparsed = build(&render(&tree));
        assert_eq!(tree.element_sequence(), reparsed.element_sequence());
    }

    #[test]
    fn test_xhtml_document_round_trip() {
        let html = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
            <!DOCTYPE html><html xmlns=\"http://www.w3.org/1999/xhtml\">\
            <head><title>T</title></head><body><p>a&#160;b<br /></p></body></html>";
        assert_eq!(render(&build(html)), html);
    }

    #[test]
    fn test_xhtml_self_closed_elements_round_trip() {
        let html = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
            <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>T</title></head>\
            <body><p><a id=\"p1\"/>Hello world</p><div class=\"x\"/><p>Next</p></body></html>";
        let out = render(&build(html));
        assert_eq!(
            out,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
            <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>T</title></head>\
            <body><p><a id=\"p1\"></a>Hello world</p><div class=\"x\"></div><p>Next</p></body></html>"
        );
        assert_eq!(out.matches("id=\"p1\"").count(), 1);
        assert_eq!(
            build(&out).element_sequence(),
            build(html).element_sequence()
        );
    }

    #[test]
    fn test_leading_newline_round_trip() {
        let html = "<pre>\ncode\n</pre><textarea>\nnotes</textarea><listing>\nlist</listing>";
        assert_eq!(render(&build(html)), html);

        let xhtml = "<?xml version=\"1.0\"?>\n<div><pre>\n  indented</pre></div>";
        assert_eq!(render(&build(xhtml)), xhtml);
    }

    #[test]
    fn test_translation_is_escaped() {
        let mut tree = build("<p>less</p>");
        let leaf = tree.leaves()[0];
        tree.set_translation(leaf, "a < b & c".to_string());
        assert_eq!(render(&tree), "<p>a &lt; b &amp; c</p>");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(render(&build("")), "");
        assert_eq!(render(&build("  \n")), "  \n");
    }

    #[test]
    fn test_missing_metadata_is_reported() {
        let mut tree = build("<p>x</p>");
        let p = tree.node(tree.root()).unwrap().children[0];
        if let NodeContent::Element(meta) = &mut tree.nodes_mut()[p.0].content {
            meta.name.clear();
        }
        let err = HtmlReconstructor::new().reconstruct(&tree).unwrap_err();
        assert!(matches!(err, TranslationError::ReconstructionError { .. }));

        let mut tree = build("<p>x</p>");
        let leaf = tree.leaves()[0];
        tree.nodes_mut()[leaf.0].children.push(NodeId(0));
        assert!(HtmlReconstructor::new().reconstruct(&tree).is_err());
    }
}
