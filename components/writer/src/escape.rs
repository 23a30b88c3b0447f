use std::io;

use xtr_chars::XmlChar;

use crate::UnicodeWrite;

/// Strategy to escape character data and attribute values
///
/// Every strategy rejects characters that are not allowed in XML 1.0
/// documents. see https://www.w3.org/TR/REC-xml/#charsets
pub trait Escape {
    /// Replacement of `c` in content, `None` to write it as is
    fn content_replacement(&self, c: char, preceding: &str) -> Option<Replacement>;

    /// Replacement of `c` in an attribute value delimited by `quote`
    fn attr_replacement(&self, c: char, quote: char) -> Option<Replacement>;

    fn escape_content<W: UnicodeWrite>(&self, input: &str, write: &mut W) -> io::Result<()> {
        escape_with(input, write, |c, i| self.content_replacement(c, &input[..i]))
    }

    fn escape_attr_value<W: UnicodeWrite>(
        &self,
        input: &str,
        quote: char,
        write: &mut W,
    ) -> io::Result<()> {
        escape_with(input, write, |c, _| self.attr_replacement(c, quote))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replacement {
    Entity(&'static str),
    CharRef,
}

fn predefined(c: char) -> &'static str {
    match c {
        '<' => "&lt;",
        '>' => "&gt;",
        '&' => "&amp;",
        '\'' => "&apos;",
        _ => "&quot;",
    }
}

pub(crate) fn invalid_char(c: char) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("character U+{:04X} is not allowed in XML", c as u32),
    )
}

fn escape_with<W: UnicodeWrite>(
    input: &str,
    write: &mut W,
    replace: impl Fn(char, usize) -> Option<Replacement>,
) -> io::Result<()> {
    let mut p = 0;
    for (i, c) in input.char_indices() {
        if !c.is_xml_char() {
            return Err(invalid_char(c));
        }
        let replacement = match replace(c, i) {
            Some(replacement) => replacement,
            None => continue,
        };
        write.write_str(&input[p..i])?;
        match replacement {
            Replacement::Entity(entity) => write.write_str(entity)?,
            Replacement::CharRef => write.write_fmt(format_args!("&#{};", c as u32))?,
        }
        p = i + c.len_utf8();
    }
    write.write_str(&input[p..])
}

/// Escapes only what the markup requires
///
/// Line breaks and tabs in attribute values and carriage returns in content
/// are written as character references so that a reader sees them
/// unnormalized.
pub struct MinimalEscaper;

impl Escape for MinimalEscaper {
    fn content_replacement(&self, c: char, preceding: &str) -> Option<Replacement> {
        match c {
            '<' | '&' => Some(Replacement::Entity(predefined(c))),
            '>' if preceding.ends_with("]]") => Some(Replacement::Entity(predefined(c))),
            '\r' => Some(Replacement::CharRef),
            _ => None,
        }
    }

    fn attr_replacement(&self, c: char, quote: char) -> Option<Replacement> {
        match c {
            '<' | '&' => Some(Replacement::Entity(predefined(c))),
            '\t' | '\n' | '\r' => Some(Replacement::CharRef),
            _ if c == quote => Some(Replacement::Entity(predefined(c))),
            _ => None,
        }
    }
}

/// Escapes all five predefined entities everywhere
pub struct DefaultEscaper;

impl Escape for DefaultEscaper {
    fn content_replacement(&self, c: char, _preceding: &str) -> Option<Replacement> {
        match c {
            '<' | '>' | '&' | '\'' | '"' => Some(Replacement::Entity(predefined(c))),
            '\r' => Some(Replacement::CharRef),
            _ => None,
        }
    }

    fn attr_replacement(&self, c: char, _quote: char) -> Option<Replacement> {
        match c {
            '<' | '>' | '&' | '\'' | '"' => Some(Replacement::Entity(predefined(c))),
            '\t' | '\n' | '\r' => Some(Replacement::CharRef),
            _ => None,
        }
    }
}

/// Like `DefaultEscaper`, with every non-ASCII character as character
/// reference
pub struct AsciiEscaper;

impl Escape for AsciiEscaper {
    fn content_replacement(&self, c: char, preceding: &str) -> Option<Replacement> {
        if c.is_ascii() {
            DefaultEscaper.content_replacement(c, preceding)
        } else {
            Some(Replacement::CharRef)
        }
    }

    fn attr_replacement(&self, c: char, quote: char) -> Option<Replacement> {
        if c.is_ascii() {
            DefaultEscaper.attr_replacement(c, quote)
        } else {
            Some(Replacement::CharRef)
        }
    }
}

/// Escape content with `DefaultEscaper`.
pub fn escape(input: &str) -> io::Result<String> {
    let mut output = String::with_capacity(input.len());
    DefaultEscaper.escape_content(input, &mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escape_content(esc: impl Escape, input: &str) -> String {
        let mut output = String::new();
        esc.escape_content(input, &mut output).unwrap();
        output
    }

    fn escape_attr_value(esc: impl Escape, input: &str) -> String {
        let mut output = String::new();
        esc.escape_attr_value(input, '"', &mut output).unwrap();
        output
    }

    mod minimal {
        use super::*;

        #[test]
        fn content() {
            assert_eq!("&lt;>&amp;'\"", escape_content(MinimalEscaper, "<>&'\""));
        }

        #[test]
        fn content_cdata_end() {
            assert_eq!("]]&gt;", escape_content(MinimalEscaper, "]]>"));
            assert_eq!("] ]>", escape_content(MinimalEscaper, "] ]>"));
        }

        #[test]
        fn content_carriage_return() {
            assert_eq!("a&#13;\nb", escape_content(MinimalEscaper, "a\r\nb"));
        }

        #[test]
        fn attr_value() {
            assert_eq!("&lt;>&amp;'&quot;", escape_attr_value(MinimalEscaper, "<>&'\""));
        }

        #[test]
        fn attr_value_apos() {
            let mut output = String::new();
            MinimalEscaper
                .escape_attr_value("'\"", '\'', &mut output)
                .unwrap();
            assert_eq!("&apos;\"", output);
        }

        #[test]
        fn attr_value_whitespace() {
            assert_eq!("a&#9;b&#10;c", escape_attr_value(MinimalEscaper, "a\tb\nc"));
        }
    }

    mod default {
        use super::*;

        #[test]
        fn predefined_entities() {
            assert_eq!(
                "&lt;&gt;&amp;&apos;&quot;",
                escape_content(DefaultEscaper, "<>&'\"")
            );
        }

        #[test]
        fn unchanged() {
            assert_eq!("grüße", escape_content(DefaultEscaper, "grüße"));
        }
    }

    mod ascii {
        use super::*;

        #[test]
        fn small_unicode_char() {
            assert_eq!("&#128;", escape_content(AsciiEscaper, "\u{80}"));
        }

        #[test]
        fn large_unicode_char() {
            assert_eq!("&#1114111;", escape_content(AsciiEscaper, "\u{10FFFF}"));
        }

        #[test]
        fn mixed() {
            assert_eq!("a&amp;&#228;", escape_content(AsciiEscaper, "a&ä"));
        }
    }

    #[test]
    fn invalid_characters_are_rejected() {
        let mut output = String::new();
        let err = DefaultEscaper
            .escape_content("a\u{0}b", &mut output)
            .unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
        assert!(AsciiEscaper.escape_content("\u{FFFE}", &mut output).is_err());
        assert!(escape("\u{1B}").is_err());
    }
}
