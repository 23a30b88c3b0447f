use std::{fmt, io};

/// Sink for already validated markup
pub trait UnicodeWrite {
    fn write_str(&mut self, s: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn write_char(&mut self, c: char) -> io::Result<()> {
        self.write_str(c.encode_utf8(&mut [0; 4]))
    }

    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        // keeps the io::Error that fmt::Error would swallow
        struct Adapter<'a, T: ?Sized> {
            inner: &'a mut T,
            err: Option<io::Error>,
        }

        impl<T: ?Sized + UnicodeWrite> fmt::Write for Adapter<'_, T> {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                self.inner.write_str(s).map_err(|err| {
                    self.err = Some(err);
                    fmt::Error
                })
            }
        }

        let mut adapter = Adapter {
            inner: self,
            err: None,
        };
        fmt::write(&mut adapter, args).map_err(|_| {
            adapter
                .err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "formatter error"))
        })
    }
}

impl UnicodeWrite for String {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.push_str(s);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ?Sized + UnicodeWrite> UnicodeWrite for &mut T {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        (**self).write_str(s)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// UTF-8 encoding adapter for byte sinks
pub struct Utf8Writer<T: io::Write> {
    inner: T,
}

impl<T: io::Write> Utf8Writer<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: io::Write> UnicodeWrite for Utf8Writer<T> {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.inner.write_all(s.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted() -> io::Result<()> {
        let mut out = String::new();
        write!(&mut out, "<{}/>", "a")?;
        out.write_char('ä')?;
        assert_eq!("<a/>ä", out);
        Ok(())
    }

    #[test]
    fn bytes() -> io::Result<()> {
        let mut writer = Utf8Writer::new(Vec::new());
        writer.write_str("€")?;
        assert_eq!(vec![0xE2, 0x82, 0xAC], writer.into_inner());
        Ok(())
    }
}
