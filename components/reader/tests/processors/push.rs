use xtr_reader::{Reader, ReaderSettings};

use crate::processors::Processor;

/// Feeds the UTF-8 bytes of the document in pieces of `step` bytes, only
/// when the reader asks for more input
pub struct PushProcessor {
    pub step: usize,
}

impl Processor for PushProcessor {
    fn process(
        &self,
        xml: &str,
        settings: ReaderSettings,
        visit: &mut dyn FnMut(&Reader),
    ) -> Result<Reader, String> {
        let bytes = xml.as_bytes();
        let mut fed = 0;
        let mut reader = Reader::new_push(settings);
        loop {
            match reader.read() {
                Ok(true) => visit(&reader),
                Ok(false) => return Ok(reader),
                Err(err) if err.is_pending() => {
                    if fed < bytes.len() {
                        let end = (fed + self.step).min(bytes.len());
                        assert!(reader.feed(&bytes[fed..end]));
                        fed = end;
                    } else if reader.feed(&[]) {
                        reader.finish_input();
                    } else {
                        return Err("input pending after the end of input".to_string());
                    }
                }
                Err(err) => return Err(err.to_string()),
            }
        }
    }
}
