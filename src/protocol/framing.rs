//! Request framing over a byte stream
//!
//! The input is a sequence of JSON values separated by optional whitespace.
//! A put with a positive `BodySize` is followed by one more value: the body as
//! a base64 string. Each value is decoded by a fresh deserializer over the
//! shared buffered reader; objects and strings end on their closing byte, so
//! nothing past the value is consumed.

use super::wire::{base64_bytes, Command, Request};
use crate::error::{ProxyError, ProxyResult};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};

pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            reader: BufReader::new(input),
        }
    }

    /// Read the next request, with its body for puts.
    ///
    /// Returns `Ok(None)` at a clean end of input. Errors from
    /// [`ProxyError::is_fatal`] mean the stream can no longer be trusted.
    pub fn next_request(&mut self) -> ProxyResult<Option<Request>> {
        if !self.skip_whitespace()? {
            return Ok(None);
        }

        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let mut req = Request::deserialize(&mut de)
            .map_err(|e| ProxyError::Protocol(format!("decoding request: {}", e)))?;

        if req.command == Command::Put && req.body_size > 0 {
            req.body = Some(self.read_body(req.body_size)?);
        }
        Ok(Some(req))
    }

    fn read_body(&mut self, declared: i64) -> ProxyResult<Vec<u8>> {
        if !self.skip_whitespace()? {
            return Err(ProxyError::BodyFrame("unexpected end of input".to_string()));
        }

        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let body = base64_bytes::deserialize(&mut de)
            .map_err(|e| ProxyError::BodyFrame(e.to_string()))?;

        if body.len() as i64 != declared {
            return Err(ProxyError::Desync {
                declared,
                actual: body.len(),
            });
        }
        Ok(body)
    }

    /// Consume whitespace; false once the input is exhausted
    fn skip_whitespace(&mut self) -> ProxyResult<bool> {
        loop {
            let buf = self
                .reader
                .fill_buf()
                .map_err(|e| ProxyError::io("reading request stream", e))?;
            if buf.is_empty() {
                return Ok(false);
            }

            let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            let exhausted = skip == buf.len();
            self.reader.consume(skip);
            if !exhausted {
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(input: &str) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn reads_consecutive_requests() {
        let mut frames = reader(
            r#"{"ID":1,"Command":"get","ActionID":"qg=="}
{"ID":2,"Command":"get","ActionID":"uw=="}{"ID":3,"Command":"close"}"#,
        );

        let ids: Vec<i64> = std::iter::from_fn(|| frames.next_request().unwrap())
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn empty_input_is_clean_eof() {
        assert!(reader("").next_request().unwrap().is_none());
        assert!(reader("  \n\t ").next_request().unwrap().is_none());
    }

    #[test]
    fn reads_put_body() {
        let mut frames = reader(
            "{\"ID\":1,\"Command\":\"put\",\"ActionID\":\"qg==\",\"ObjectID\":\"uw==\",\"BodySize\":3}\n\"AQID\"\n",
        );

        let req = frames.next_request().unwrap().unwrap();
        assert_eq!(req.body, Some(vec![1, 2, 3]));
        assert!(frames.next_request().unwrap().is_none());
    }

    #[test]
    fn zero_size_put_has_no_body_frame() {
        let mut frames = reader(
            r#"{"ID":1,"Command":"put","ActionID":"qg==","ObjectID":"uw==","BodySize":0}
{"ID":2,"Command":"close"}"#,
        );

        let put = frames.next_request().unwrap().unwrap();
        assert!(put.body.is_none());
        assert_eq!(frames.next_request().unwrap().unwrap().id, 2);
    }

    #[test]
    fn short_body_desyncs() {
        // 5 bytes delivered for a declared size of 10
        let mut frames = reader(
            "{\"ID\":1,\"Command\":\"put\",\"ActionID\":\"qg==\",\"ObjectID\":\"uw==\",\"BodySize\":10}\n\"AQIDBAU=\"\n",
        );

        let err = frames.next_request().unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Desync {
                declared: 10,
                actual: 5
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_body_is_fatal() {
        let mut frames = reader(
            r#"{"ID":1,"Command":"put","ActionID":"qg==","ObjectID":"uw==","BodySize":3}"#,
        );
        assert!(frames.next_request().unwrap_err().is_fatal());
    }

    #[test]
    fn malformed_request() {
        let err = reader("{\"ID\":").next_request().unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
        assert!(!err.is_fatal());
    }
}
