/// Splits a chunked byte stream into lines.
///
/// Bytes after the last newline of a chunk are carried over to the next
/// one, so a chunk boundary may fall anywhere, including inside a multi-byte
/// character. Lines end at `\n`, with an optional preceding `\r` removed.
/// Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineSplitter {
    remainder: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk, calling `on_line` for every line it completes.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_line: F)
    where
        F: FnMut(&str),
    {
        let mut start = 0;
        for (i, byte) in chunk.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            if self.remainder.is_empty() {
                emit(&chunk[start..i], &mut on_line);
            } else {
                self.remainder.extend_from_slice(&chunk[start..i]);
                let line = std::mem::take(&mut self.remainder);
                emit(&line, &mut on_line);
            }
            start = i + 1;
        }
        self.remainder.extend_from_slice(&chunk[start..]);
    }

    /// Flushes the trailing partial line, if any.
    pub fn finish<F>(self, mut on_line: F)
    where
        F: FnMut(&str),
    {
        if !self.remainder.is_empty() {
            emit(&self.remainder, &mut on_line);
        }
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.remainder.len()
    }
}

fn emit<F>(bytes: &[u8], on_line: &mut F)
where
    F: FnMut(&str),
{
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    on_line(&String::from_utf8_lossy(bytes));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(input: &[u8], chunk_size: usize) -> Vec<String> {
        let mut splitter = LineSplitter::new();
        let mut lines = Vec::new();
        for chunk in input.chunks(chunk_size) {
            splitter.push(chunk, |line| lines.push(line.to_string()));
        }
        splitter.finish(|line| lines.push(line.to_string()));
        lines
    }

    #[test]
    fn test_split_lf_and_crlf() {
        let lines = split_all(b"one\ntwo\r\nthree", 1024);
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_trailing_newline_adds_no_line() {
        assert_eq!(split_all(b"a\nb\n", 1024), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_lines_are_reported() {
        assert_eq!(split_all(b"a\n\n\nb", 1024), vec!["a", "", "", "b"]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let input = b"first\r\nsecond\r\n";
        for size in 1..input.len() {
            assert_eq!(split_all(input, size), vec!["first", "second"], "chunk size {}", size);
        }
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let input = "héllo wörld\n日本語 🚀\n".as_bytes();
        for size in 1..=input.len() {
            assert_eq!(
                split_all(input, size),
                vec!["héllo wörld", "日本語 🚀"],
                "chunk size {}",
                size
            );
        }
    }

    #[test]
    fn test_remainder_is_bounded_by_line() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"complete\npartial", |_| {});
        assert_eq!(splitter.pending(), "partial".len());
        splitter.push(b" line\n", |_| {});
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let lines = split_all(b"ok\n\xff\xfe bad\n", 3);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with(" bad"));
        assert!(lines[1].contains('\u{FFFD}'));
    }
}
