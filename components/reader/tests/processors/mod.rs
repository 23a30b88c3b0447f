use std::fmt::Write;

use xtr_reader::{NodeKind, Reader, ReaderSettings, Validation};

pub mod full;
pub mod push;

pub trait Processor {
    /// Read the whole document with `settings`, calling `visit` for every
    /// node.
    fn process(
        &self,
        xml: &str,
        settings: ReaderSettings,
        visit: &mut dyn FnMut(&Reader),
    ) -> Result<Reader, String>;

    fn check_wf(&self, xml: &str) -> Result<(), String> {
        self.process(xml, ReaderSettings::default(), &mut |_| {})
            .map(|_| ())
    }

    fn norm(&self, xml: &str) -> Result<String, String> {
        let mut out = String::new();
        self.process(xml, ReaderSettings::default(), &mut |reader| {
            write_node(reader, &mut out)
        })?;
        Ok(out)
    }

    /// Number of validation events
    fn validate(&self, xml: &str) -> Result<usize, String> {
        let settings = ReaderSettings::default().with_validation(Validation::Dtd);
        let reader = self.process(xml, settings, &mut |_| {})?;
        Ok(reader.validation_events().len())
    }
}

pub fn escape(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    for ch in xml.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            '\x0D' => out.push_str("&#xD;"),
            c if !c.is_ascii() => {
                let _ = write!(&mut out, "&#x{:X};", c as u32);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Normalized text of the current node. Empty elements are written with an
/// end tag, document types are left out.
pub fn write_node(reader: &Reader, out: &mut String) {
    match reader.node_kind() {
        NodeKind::Element => {
            let _ = write!(out, "<{}", reader.name());
            for i in 0..reader.attribute_count() {
                let name = reader.attribute_name_at(i).unwrap_or_default();
                let value = reader.get_attribute_at(i).unwrap_or_default();
                let _ = write!(out, " {}=\"{}\"", name, escape(value));
            }
            out.push('>');
            if reader.is_empty_element() {
                let _ = write!(out, "</{}>", reader.name());
            }
        }
        NodeKind::EndElement => {
            let _ = write!(out, "</{}>", reader.name());
        }
        NodeKind::Text
        | NodeKind::CData
        | NodeKind::Whitespace
        | NodeKind::SignificantWhitespace => out.push_str(&escape(reader.value())),
        NodeKind::Comment => {
            let _ = write!(out, "<!--{}-->", reader.value());
        }
        NodeKind::ProcessingInstruction => {
            if reader.value().is_empty() {
                let _ = write!(out, "<?{}?>", reader.name());
            } else {
                let _ = write!(out, "<?{} {}?>", reader.name(), reader.value());
            }
        }
        NodeKind::XmlDeclaration => {
            let _ = write!(out, "<?xml");
            for name in ["version", "encoding", "standalone"] {
                if let Some(value) = reader.get_attribute(name) {
                    let _ = write!(out, " {}=\"{}\"", name, value);
                }
            }
            out.push_str("?>");
        }
        _ => {}
    }
}
