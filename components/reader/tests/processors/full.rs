use xtr_reader::{Reader, ReaderSettings};

use crate::processors::Processor;

/// Reads from decoded text with the given refill size
pub struct FullProcessor {
    pub buffer_size: usize,
}

impl Processor for FullProcessor {
    fn process(
        &self,
        xml: &str,
        settings: ReaderSettings,
        visit: &mut dyn FnMut(&Reader),
    ) -> Result<Reader, String> {
        let mut reader = Reader::from_str(xml, settings.with_buffer_size(self.buffer_size));
        loop {
            match reader.read() {
                Ok(true) => visit(&reader),
                Ok(false) => return Ok(reader),
                Err(err) => return Err(err.to_string()),
            }
        }
    }
}
