use age::stream::StreamWriter;
use liblzma::write::XzEncoder;
use std::io::{BufWriter, Error, IntoInnerError, Write};

/// Flushes and closes a writer layer, returning the writer it wrapped.
///
/// Encoders only produce their trailing bytes on finish, so every layer of
/// the output pipeline has to be finished in order, innermost writer last.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for StreamWriter<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for BufWriter<W> {
    fn finish(self) -> Result<W, Error> {
        self.into_inner().map_err(IntoInnerError::into_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_buf_writer_finish_flushes() {
        let mut writer = BufWriter::new(Cursor::new(Vec::new()));
        writer.write_all(b"buffered").unwrap();

        let inner = Finish::finish(writer).unwrap();
        assert_eq!(inner.get_ref(), b"buffered");
    }

    #[test]
    fn test_xz_encoder_finish_writes_trailer() {
        let mut encoder = XzEncoder::new(Cursor::new(Vec::new()), 1);
        encoder.write_all(b"payload").unwrap();

        let inner = Finish::finish(encoder).unwrap();
        // xz streams end with the footer magic "YZ"
        assert!(inner.get_ref().ends_with(b"YZ"));
    }
}
