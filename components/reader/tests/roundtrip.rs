use std::io;

use xtr_reader::{NodeKind, Reader, ReaderSettings};
use xtr_writer::{AsciiEscaper, Escape, MinimalEscaper, UnicodeWrite, Utf8Writer, XmlWriter};

#[derive(Debug, PartialEq)]
struct Event {
    kind: NodeKind,
    name: String,
    value: String,
    empty: bool,
    attributes: Vec<(String, String)>,
    public_id: Option<String>,
    system_id: Option<String>,
}

fn read_events(mut reader: Reader) -> Vec<Event> {
    let mut events = Vec::new();
    while reader.read().unwrap() {
        let attributes = (0..reader.attribute_count())
            .map(|i| {
                (
                    reader.attribute_name_at(i).unwrap().to_string(),
                    reader.get_attribute_at(i).unwrap().to_string(),
                )
            })
            .collect();
        events.push(Event {
            kind: reader.node_kind(),
            name: reader.name().to_string(),
            value: reader.value().to_string(),
            empty: reader.is_empty_element(),
            attributes,
            public_id: reader.get_attribute("PUBLIC").map(str::to_string),
            system_id: reader.get_attribute("SYSTEM").map(str::to_string),
        });
    }
    events
}

fn write_events<W: UnicodeWrite, E: Escape>(events: &[Event], writer: W, escaper: E) -> io::Result<W> {
    let mut ser = XmlWriter::for_writer(writer, escaper);
    for event in events {
        match event.kind {
            NodeKind::XmlDeclaration => ser.xml_decl(None, None)?,
            NodeKind::DocumentType => ser.doctype(
                &event.name,
                event.public_id.as_deref(),
                event.system_id.as_deref(),
                Some(event.value.as_str()).filter(|subset| !subset.is_empty()),
            )?,
            NodeKind::Element => {
                let mut element = ser.element(&event.name)?;
                for (name, value) in &event.attributes {
                    element = element.attribute(name, value)?;
                }
                if event.empty {
                    element.finish_empty()?;
                } else {
                    element.finish()?;
                }
            }
            NodeKind::EndElement => ser.end_element()?,
            NodeKind::Text | NodeKind::Whitespace | NodeKind::SignificantWhitespace => {
                ser.characters(&event.value)?
            }
            NodeKind::CData => ser.cdata(&event.value)?,
            NodeKind::Comment => ser.comment(&event.value)?,
            NodeKind::ProcessingInstruction => ser.pi(&event.name, Some(&event.value))?,
            kind => panic!("unexpected node {:?}", kind),
        }
    }
    ser.finish()
}

const DOCUMENT: &str = r#"<?xml version="1.0"?>
<!DOCTYPE doc [
<!ELEMENT doc ANY>
<!ENTITY e "entity text">
]>
<!-- prolog comment -->
<doc a="1 &amp; 2" b='&#9;tab &quot;quoted&quot;'>
  <?target some data?>
  text &e; &lt;more&gt;<![CDATA[<raw> & ]]]]>
  <empty/>
  <p xml:space="preserve">  grüße &#xD; </p>
</doc>
<?after root?>
"#;

#[test]
fn reserialized_document_reads_the_same() {
    let original = read_events(Reader::from_str(DOCUMENT, ReaderSettings::default()));
    assert!(original.iter().any(|e| e.kind == NodeKind::CData));

    let xml = write_events(&original, String::new(), MinimalEscaper).unwrap();
    let reread = read_events(Reader::from_str(&xml, ReaderSettings::default()));
    assert_eq!(original, reread, "serialized as {}", xml);
}

#[test]
fn ascii_output_reads_the_same() {
    let original = read_events(Reader::from_str(DOCUMENT, ReaderSettings::default()));

    let xml = write_events(&original, String::new(), AsciiEscaper).unwrap();
    assert!(xml.is_ascii());
    let reread = read_events(Reader::from_str(&xml, ReaderSettings::default()));
    assert_eq!(original, reread);
}

#[test]
fn bytes_through_small_buffers() {
    let original = read_events(Reader::from_str(DOCUMENT, ReaderSettings::default()));

    let bytes = write_events(&original, Utf8Writer::new(Vec::new()), MinimalEscaper)
        .unwrap()
        .into_inner();
    let settings = ReaderSettings::default().with_buffer_size(5);
    let reread = read_events(Reader::from_bytes(bytes, settings));
    assert_eq!(original, reread);
}
