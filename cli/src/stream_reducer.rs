// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

//! Folding a byte stream line by line into a reducer.

use bstr::io::BufReadExt;
use std::io::BufRead;

/// State that absorbs one input line at a time.
pub trait LineReducer {
    fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()>;
}

/// Feeds every line of `stream` to `reducer`, minus its `\n` or `\r\n` terminator.
///
/// Stops at the first line the reducer rejects and returns that error.
pub fn reduce_stream<R: BufRead, T: LineReducer>(stream: R, mut reducer: T) -> anyhow::Result<T> {
    let mut failure = None;
    stream.for_byte_line(|line| match reducer.read_line(line) {
        Ok(()) => Ok(true),
        Err(e) => {
            failure = Some(e);
            Ok(false)
        }
    })?;
    match failure {
        Some(e) => Err(e),
        None => Ok(reducer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{collection, prop_assert_eq, proptest, sample};

    #[derive(Default)]
    struct Concat {
        all: Vec<u8>,
    }

    impl LineReducer for Concat {
        fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
            self.all.extend_from_slice(line);
            self.all.push(b'\n');
            Ok(())
        }
    }

    struct FailOn(&'static [u8], usize);

    impl LineReducer for FailOn {
        fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
            if line == self.0 {
                anyhow::bail!("rejected line");
            }
            self.1 += 1;
            Ok(())
        }
    }

    fn non_newlines() -> Vec<u8> {
        (0..u8::MAX).filter(|x| *x != b'\n').collect()
    }

    proptest! {
        #[test]
        fn reduces_stream(
            mut lines in collection::vec(collection::vec(sample::select(non_newlines()), 0..81), 0..10)
        ) {
            for line in lines.iter_mut() {
                while line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            let mut file = lines.join(&b'\n');
            file.push(b'\n');

            let reducer = reduce_stream(&file[..], Concat::default()).unwrap();
            prop_assert_eq!(reducer.all, file);
        }
    }

    #[test]
    fn test_crlf_is_stripped() {
        let reducer = reduce_stream(&b"a\r\nb\n"[..], Concat::default()).unwrap();
        assert_eq!(reducer.all, b"a\nb\n");
    }

    #[test]
    fn test_stops_on_first_error() {
        let result = reduce_stream(&b"ok\nbad\nok\n"[..], FailOn(b"bad", 0));
        assert!(result.is_err());
        let counted = reduce_stream(&b"ok\nok\n"[..], FailOn(b"bad", 0)).unwrap();
        assert_eq!(counted.1, 2);
    }
}
