//! Writer for well-formed XML documents
//!
//! Names, comments, processing instructions and character data are checked
//! before anything is written, so a document produced without errors reads
//! back to the same content.

use std::io;

use xtr_chars::{is_name, is_whitespace, XmlChar};

pub use crate::escape::{AsciiEscaper, DefaultEscaper, Escape, MinimalEscaper};
pub use crate::write::{UnicodeWrite, Utf8Writer};

pub mod escape;
pub mod write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Before the XML declaration; nothing written yet
    Start,
    Prolog,
    Main,
    Epilog,
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.into())
}

fn check_name(name: &str) -> io::Result<()> {
    if is_name(name) {
        Ok(())
    } else {
        Err(invalid(format!("invalid name `{}`", name)))
    }
}

fn check_chars(text: &str) -> io::Result<()> {
    match text.chars().find(|c| !c.is_xml_char()) {
        Some(c) => Err(escape::invalid_char(c)),
        None => Ok(()),
    }
}

pub struct XmlWriter<W: UnicodeWrite, E: Escape> {
    state: State,
    stack: Vec<String>,
    writer: W,
    escaper: E,
    seen_doctype: bool,
}

impl<W: UnicodeWrite, E: Escape> XmlWriter<W, E> {
    pub fn for_writer(writer: W, escaper: E) -> Self {
        Self {
            state: State::Start,
            stack: vec![],
            writer,
            escaper,
            seen_doctype: false,
        }
    }

    /// `<?xml version="1.0" ...?>`; only allowed as the first output.
    pub fn xml_decl(&mut self, encoding: Option<&str>, standalone: Option<bool>) -> io::Result<()> {
        if self.state != State::Start {
            return Err(invalid("XML declaration must come first"));
        }
        self.writer.write_str("<?xml version=\"1.0\"")?;
        if let Some(encoding) = encoding {
            let valid = encoding.starts_with(|c: char| c.is_ascii_alphabetic())
                && encoding
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
            if !valid {
                return Err(invalid(format!("invalid encoding name `{}`", encoding)));
            }
            write!(self.writer, " encoding=\"{}\"", encoding)?;
        }
        if let Some(standalone) = standalone {
            let value = if standalone { "yes" } else { "no" };
            write!(self.writer, " standalone=\"{}\"", value)?;
        }
        self.writer.write_str("?>")?;
        self.state = State::Prolog;
        Ok(())
    }

    /// Document type declaration with optional external identifier and
    /// internal subset, written verbatim.
    pub fn doctype(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        internal_subset: Option<&str>,
    ) -> io::Result<()> {
        if self.state == State::Main || self.state == State::Epilog || self.seen_doctype {
            return Err(invalid("document type declaration after the root element"));
        }
        check_name(name)?;
        write!(self.writer, "<!DOCTYPE {}", name)?;
        match (public_id, system_id) {
            (Some(public_id), Some(system_id)) => {
                if let Some(c) = public_id.chars().find(|c| !c.is_xml_pubid_char()) {
                    return Err(invalid(format!("character {:?} in public identifier", c)));
                }
                write!(self.writer, " PUBLIC \"{}\" {}", public_id, quoted(system_id)?)?;
            }
            (None, Some(system_id)) => write!(self.writer, " SYSTEM {}", quoted(system_id)?)?,
            (Some(_), None) => return Err(invalid("public identifier without system literal")),
            (None, None) => {}
        }
        if let Some(subset) = internal_subset {
            check_chars(subset)?;
            write!(self.writer, " [{}]", subset)?;
        }
        self.writer.write_str(">")?;
        self.seen_doctype = true;
        self.state = State::Prolog;
        Ok(())
    }

    pub fn element(&mut self, name: &str) -> io::Result<XmlElementWriter<'_, W, E>> {
        if self.state == State::Epilog {
            return Err(invalid(format!("second root element `{}`", name)));
        }
        check_name(name)?;
        write!(self.writer, "<{}", name)?;
        self.state = State::Main;
        Ok(XmlElementWriter {
            name: name.to_string(),
            attributes: vec![],
            ser: self,
        })
    }

    pub fn end_element(&mut self) -> io::Result<()> {
        match self.stack.pop() {
            Some(name) => {
                write!(self.writer, "</{}>", name)?;
                self.close_if_root();
                Ok(())
            }
            None => Err(invalid("no open element")),
        }
    }

    fn close_if_root(&mut self) {
        if self.stack.is_empty() {
            self.state = State::Epilog;
        }
    }

    /// Character data; outside the root element only whitespace.
    pub fn characters(&mut self, characters: &str) -> io::Result<()> {
        if self.state != State::Main && !is_whitespace(characters) {
            return Err(invalid("character data outside the root element"));
        }
        if self.state == State::Start {
            self.state = State::Prolog;
        }
        self.escaper.escape_content(characters, &mut self.writer)
    }

    /// CDATA section; `]]>` in `characters` splits it into two sections.
    pub fn cdata(&mut self, characters: &str) -> io::Result<()> {
        if self.state != State::Main {
            return Err(invalid("CDATA section outside the root element"));
        }
        check_chars(characters)?;
        self.writer.write_str("<![CDATA[")?;
        let mut rest = characters;
        while let Some(i) = rest.find("]]>") {
            self.writer.write_str(&rest[..i + 2])?;
            self.writer.write_str("]]><![CDATA[")?;
            rest = &rest[i + 2..];
        }
        self.writer.write_str(rest)?;
        self.writer.write_str("]]>")
    }

    pub fn comment(&mut self, comment: &str) -> io::Result<()> {
        check_chars(comment)?;
        if comment.contains("--") || comment.ends_with('-') {
            return Err(invalid("`--` in comment"));
        }
        self.leave_start();
        write!(self.writer, "<!--{}-->", comment)
    }

    pub fn pi(&mut self, target: &str, data: Option<&str>) -> io::Result<()> {
        check_name(target)?;
        if target.eq_ignore_ascii_case("xml") {
            return Err(invalid("reserved processing instruction target"));
        }
        self.leave_start();
        match data {
            Some(data) if !data.is_empty() => {
                check_chars(data)?;
                if data.contains("?>") {
                    return Err(invalid("`?>` in processing instruction"));
                }
                write!(self.writer, "<?{} {}?>", target, data)
            }
            _ => write!(self.writer, "<?{}?>", target),
        }
    }

    /// `&name;`; the entity must be declared by the document type.
    pub fn entity_ref(&mut self, name: &str) -> io::Result<()> {
        if self.state != State::Main {
            return Err(invalid("entity reference outside the root element"));
        }
        check_name(name)?;
        write!(self.writer, "&{};", name)
    }

    fn leave_start(&mut self) {
        if self.state == State::Start {
            self.state = State::Prolog;
        }
    }

    /// Check that the document is complete and hand back the sink.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.stack.is_empty() {
            return Err(invalid(format!(
                "missing end tag(s): {}",
                self.stack.join(", ")
            )));
        }
        if self.state != State::Epilog {
            return Err(invalid("no root element"));
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn quoted(literal: &str) -> io::Result<String> {
    check_chars(literal)?;
    match (literal.contains('"'), literal.contains('\'')) {
        (false, _) => Ok(format!("\"{}\"", literal)),
        (true, false) => Ok(format!("'{}'", literal)),
        (true, true) => Err(invalid("system literal contains both quotes")),
    }
}

pub struct XmlElementWriter<'ser, W: UnicodeWrite, E: Escape> {
    name: String,
    attributes: Vec<String>,
    ser: &'ser mut XmlWriter<W, E>,
}

impl<'ser, W: UnicodeWrite, E: Escape> XmlElementWriter<'ser, W, E> {
    pub fn attribute(mut self, key: &str, value: &str) -> io::Result<Self> {
        check_name(key)?;
        if self.attributes.iter().any(|name| name == key) {
            return Err(invalid(format!("duplicate attribute `{}`", key)));
        }
        write!(self.ser.writer, " {}=\"", key)?;
        self.ser
            .escaper
            .escape_attr_value(value, '"', &mut self.ser.writer)?;
        self.ser.writer.write_str("\"")?;
        self.attributes.push(key.to_string());
        Ok(self)
    }

    pub fn finish(self) -> io::Result<()> {
        self.ser.writer.write_str(">")?;
        self.ser.stack.push(self.name);
        Ok(())
    }

    pub fn finish_empty(self) -> io::Result<()> {
        self.ser.writer.write_str("/>")?;
        self.ser.close_if_root();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(out: &mut String) -> XmlWriter<&mut String, DefaultEscaper> {
        XmlWriter::for_writer(out, DefaultEscaper)
    }

    #[test]
    fn test_empty() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        xml_writer.element("xrs")?.finish_empty()?;
        xml_writer.finish()?;

        assert_eq!("<xrs/>", &out);
        Ok(())
    }

    #[test]
    fn test_attributes() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        xml_writer
            .element("xrs")?
            .attribute("a", "1")?
            .attribute("b", "<\n")?
            .finish_empty()?;

        assert_eq!(r#"<xrs a="1" b="&lt;&#10;"/>"#, &out);
        Ok(())
    }

    #[test]
    fn test_nested() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        xml_writer.element("x")?.finish()?;
        xml_writer.element("y")?.finish()?;
        xml_writer.characters("a < b")?;
        xml_writer.end_element()?;
        xml_writer.end_element()?;
        xml_writer.finish()?;

        assert_eq!("<x><y>a &lt; b</y></x>", &out);
        Ok(())
    }

    #[test]
    fn test_prolog() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        xml_writer.xml_decl(Some("UTF-8"), Some(true))?;
        xml_writer.characters("\n")?;
        xml_writer.doctype("r", Some("-//X//Y"), Some("r.dtd"), Some("<!ENTITY e 'v'>"))?;
        xml_writer.comment(" c ")?;
        xml_writer.element("r")?.finish()?;
        xml_writer.entity_ref("e")?;
        xml_writer.end_element()?;
        xml_writer.pi("p", Some("d"))?;
        xml_writer.finish()?;

        assert_eq!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <!DOCTYPE r PUBLIC \"-//X//Y\" \"r.dtd\" [<!ENTITY e 'v'>]>\
             <!-- c --><r>&e;</r><?p d?>",
            &out
        );
        Ok(())
    }

    #[test]
    fn test_cdata_split() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        xml_writer.element("r")?.finish()?;
        xml_writer.cdata("a]]>b")?;
        xml_writer.end_element()?;

        assert_eq!("<r><![CDATA[a]]]]><![CDATA[>b]]></r>", &out);
        Ok(())
    }

    #[test]
    fn test_rejected() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        assert!(xml_writer.element("1a").is_err());
        assert!(xml_writer.characters("text").is_err());
        assert!(xml_writer.comment("a--b").is_err());
        assert!(xml_writer.comment("a-").is_err());
        assert!(xml_writer.pi("XML", None).is_err());
        assert!(xml_writer.pi("p", Some("?>")).is_err());
        assert!(xml_writer.cdata("x").is_err());

        xml_writer.element("r")?.finish_empty()?;
        assert!(xml_writer.element("s").is_err());
        assert!(xml_writer.end_element().is_err());
        assert!(xml_writer.doctype("r", None, None, None).is_err());
        assert!(xml_writer.xml_decl(None, None).is_err());
        Ok(())
    }

    #[test]
    fn test_duplicate_attribute() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        assert!(xml_writer
            .element("r")?
            .attribute("a", "1")?
            .attribute("a", "2")
            .is_err());
        Ok(())
    }

    #[test]
    fn test_unfinished() -> io::Result<()> {
        let mut out = String::new();
        let mut xml_writer = writer(&mut out);
        xml_writer.element("r")?.finish()?;
        assert!(xml_writer.finish().is_err());

        let mut out = String::new();
        assert!(writer(&mut out).finish().is_err());
        Ok(())
    }

    #[test]
    fn test_bytes() -> io::Result<()> {
        let mut xml_writer = XmlWriter::for_writer(Utf8Writer::new(Vec::new()), AsciiEscaper);
        xml_writer.element("r")?.finish()?;
        xml_writer.characters("ä")?;
        xml_writer.end_element()?;
        let bytes = xml_writer.finish()?.into_inner();

        assert_eq!(b"<r>&#228;</r>".to_vec(), bytes);
        Ok(())
    }
}
