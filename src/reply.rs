//! Wire replies.
//!
//! Handlers write into a [`ReplySink`] instead of building values, so a row
//! set is streamed as it is read. Arrays whose length is only known at the
//! end are opened with [`ReplySink::postponed_array`] and patched later.
//!
//! Two sinks are provided: [`RespWriter`] produces RESP bytes, and
//! [`ReplyCollector`] builds [`Reply`] trees.

use serde::Deserialize;

/// RESP dialect spoken by [`RespWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Doubles go out as bulk strings, null as a null bulk string.
    #[default]
    Resp2,
    /// Native double and null types.
    Resp3,
}

/// Handle on an array opened with an unknown length.
#[derive(Debug)]
#[must_use = "a postponed array must have its length set"]
pub struct Postponed(usize);

/// Position in a sink, to roll back partially written output.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    len: usize,
    depth: usize,
}

pub trait ReplySink {
    fn simple_string(&mut self, value: &str);
    fn error(&mut self, message: &str);
    fn integer(&mut self, value: i64);
    fn double(&mut self, value: f64);
    fn bulk(&mut self, value: &[u8]);
    fn null(&mut self);
    fn array(&mut self, len: usize);
    fn postponed_array(&mut self) -> Postponed;
    fn set_array_length(&mut self, array: Postponed, len: usize);
    fn mark(&self) -> Mark;
    /// Discard everything written since `mark`.
    fn truncate(&mut self, mark: Mark);
}

/// A complete reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    SimpleString(String),
    Error(String),
    Integer(i64),
    Double(f64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Elements of an array reply.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Write this value into another sink.
    pub fn write_to<S: ReplySink + ?Sized>(&self, sink: &mut S) {
        match self {
            Reply::SimpleString(value) => sink.simple_string(value),
            Reply::Error(message) => sink.error(message),
            Reply::Integer(value) => sink.integer(*value),
            Reply::Double(value) => sink.double(*value),
            Reply::Bulk(value) => sink.bulk(value),
            Reply::Null => sink.null(),
            Reply::Array(items) => {
                sink.array(items.len());
                for item in items {
                    item.write_to(sink);
                }
            }
        }
    }
}

/// Encodes replies as RESP into a byte buffer.
#[derive(Debug, Default)]
pub struct RespWriter {
    buf: Vec<u8>,
    protocol: Protocol,
    /// Offsets of postponed arrays still waiting for their header.
    pending: Vec<Option<usize>>,
}

impl RespWriter {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            buf: Vec::new(),
            protocol,
            pending: Vec::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn line(&mut self, kind: u8, body: &str) {
        self.buf.push(kind);
        self.buf.extend_from_slice(body.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }
}

fn format_double(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "inf" } else { "-inf" };
        text.to_owned()
    } else {
        value.to_string()
    }
}

/// Error and simple-string payloads cannot carry line breaks.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

impl ReplySink for RespWriter {
    fn simple_string(&mut self, value: &str) {
        self.line(b'+', &single_line(value));
    }

    fn error(&mut self, message: &str) {
        self.line(b'-', &single_line(message));
    }

    fn integer(&mut self, value: i64) {
        self.line(b':', &value.to_string());
    }

    fn double(&mut self, value: f64) {
        let text = format_double(value);
        match self.protocol {
            Protocol::Resp2 => self.bulk(text.as_bytes()),
            Protocol::Resp3 => self.line(b',', &text),
        }
    }

    fn bulk(&mut self, value: &[u8]) {
        self.line(b'$', &value.len().to_string());
        self.buf.extend_from_slice(value);
        self.buf.extend_from_slice(b"\r\n");
    }

    fn null(&mut self) {
        match self.protocol {
            Protocol::Resp2 => self.buf.extend_from_slice(b"$-1\r\n"),
            Protocol::Resp3 => self.buf.extend_from_slice(b"_\r\n"),
        }
    }

    fn array(&mut self, len: usize) {
        self.line(b'*', &len.to_string());
    }

    fn postponed_array(&mut self) -> Postponed {
        self.pending.push(Some(self.buf.len()));
        Postponed(self.pending.len() - 1)
    }

    fn set_array_length(&mut self, array: Postponed, len: usize) {
        let Some(at) = self.pending.get_mut(array.0).and_then(Option::take) else {
            return;
        };
        let header = format!("*{len}\r\n");
        self.buf.splice(at..at, header.bytes());
        // Arrays opened after this one at the same offset are nested inside it.
        for (index, slot) in self.pending.iter_mut().enumerate() {
            if let Some(offset) = slot {
                if *offset > at || (*offset == at && index > array.0) {
                    *offset += header.len();
                }
            }
        }
        while matches!(self.pending.last(), Some(None)) {
            self.pending.pop();
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            len: self.buf.len(),
            depth: self.pending.len(),
        }
    }

    fn truncate(&mut self, mark: Mark) {
        self.buf.truncate(mark.len);
        self.pending.truncate(mark.depth);
    }
}

#[derive(Debug)]
struct Frame {
    expected: Option<usize>,
    items: Vec<Reply>,
}

/// Builds [`Reply`] values from sink calls.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    replies: Vec<Reply>,
    frames: Vec<Frame>,
}

impl ReplyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed top-level replies, in order.
    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }

    pub fn into_replies(self) -> Vec<Reply> {
        self.replies
    }

    /// The single reply of one command invocation.
    pub fn take_one(&mut self) -> Option<Reply> {
        if self.frames.is_empty() && self.replies.len() == 1 {
            self.replies.pop()
        } else {
            None
        }
    }

    fn push(&mut self, mut reply: Reply) {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                self.replies.push(reply);
                return;
            };
            frame.items.push(reply);
            if frame.expected != Some(frame.items.len()) {
                return;
            }
            let Some(done) = self.frames.pop() else { return };
            reply = Reply::Array(done.items);
        }
    }
}

impl ReplySink for ReplyCollector {
    fn simple_string(&mut self, value: &str) {
        self.push(Reply::SimpleString(value.to_owned()));
    }

    fn error(&mut self, message: &str) {
        self.push(Reply::Error(message.to_owned()));
    }

    fn integer(&mut self, value: i64) {
        self.push(Reply::Integer(value));
    }

    fn double(&mut self, value: f64) {
        self.push(Reply::Double(value));
    }

    fn bulk(&mut self, value: &[u8]) {
        self.push(Reply::Bulk(value.to_vec()));
    }

    fn null(&mut self) {
        self.push(Reply::Null);
    }

    fn array(&mut self, len: usize) {
        if len == 0 {
            self.push(Reply::Array(Vec::new()));
        } else {
            self.frames.push(Frame {
                expected: Some(len),
                items: Vec::with_capacity(len),
            });
        }
    }

    fn postponed_array(&mut self) -> Postponed {
        self.frames.push(Frame {
            expected: None,
            items: Vec::new(),
        });
        Postponed(self.frames.len() - 1)
    }

    fn set_array_length(&mut self, array: Postponed, len: usize) {
        debug_assert_eq!(
            array.0 + 1,
            self.frames.len(),
            "only the innermost postponed array can be closed"
        );
        if array.0 + 1 != self.frames.len() {
            return;
        }
        if let Some(frame) = self.frames.pop() {
            debug_assert_eq!(frame.items.len(), len);
            self.push(Reply::Array(frame.items));
        }
    }

    fn mark(&self) -> Mark {
        let len = match self.frames.last() {
            Some(frame) => frame.items.len(),
            None => self.replies.len(),
        };
        Mark {
            len,
            depth: self.frames.len(),
        }
    }

    fn truncate(&mut self, mark: Mark) {
        self.frames.truncate(mark.depth);
        match self.frames.last_mut() {
            Some(frame) => frame.items.truncate(mark.len),
            None => self.replies.truncate(mark.len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postponed_array_is_patched_with_final_length() {
        let mut out = RespWriter::new(Protocol::Resp2);
        let rows = out.postponed_array();
        for i in 0..2 {
            out.array(2);
            out.integer(i);
            out.null();
        }
        out.set_array_length(rows, 2);
        assert_eq!(
            out.as_bytes(),
            b"*2\r\n*2\r\n:0\r\n$-1\r\n*2\r\n:1\r\n$-1\r\n".as_slice()
        );
    }

    #[test]
    fn nested_postponed_arrays_keep_their_order() {
        let mut out = RespWriter::new(Protocol::Resp3);
        let outer = out.postponed_array();
        let inner = out.postponed_array();
        out.double(1.5);
        out.set_array_length(inner, 1);
        out.null();
        out.set_array_length(outer, 2);
        assert!(out.pending.is_empty());
        assert_eq!(out.as_bytes(), b"*2\r\n*1\r\n,1.5\r\n_\r\n".as_slice());
    }

    #[test]
    fn finished_arrays_release_their_slots() {
        let mut out = RespWriter::default();
        for i in 0..3 {
            let rows = out.postponed_array();
            out.integer(i);
            out.set_array_length(rows, 1);
            assert!(out.pending.is_empty());
        }
        assert_eq!(out.into_bytes(), b"*1\r\n:0\r\n*1\r\n:1\r\n*1\r\n:2\r\n".to_vec());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "only the innermost postponed array can be closed")]
    fn collector_rejects_closing_an_outer_array_first() {
        let mut tree = ReplyCollector::new();
        let outer = tree.postponed_array();
        let _inner = tree.postponed_array();
        tree.set_array_length(outer, 1);
    }

    #[test]
    fn bulk_strings_keep_embedded_zero_bytes() {
        let mut out = RespWriter::default();
        out.bulk(b"a\0b");
        assert_eq!(out.as_bytes(), b"$3\r\na\0b\r\n".as_slice());
    }

    #[test]
    fn resp2_sends_doubles_as_bulk_strings() {
        let mut out = RespWriter::new(Protocol::Resp2);
        out.double(0.25);
        out.double(f64::INFINITY);
        assert_eq!(out.as_bytes(), b"$4\r\n0.25\r\n$3\r\ninf\r\n".as_slice());
    }

    #[test]
    fn truncate_discards_a_partial_array() {
        let mut out = RespWriter::default();
        let mark = out.mark();
        let rows = out.postponed_array();
        out.array(1);
        out.integer(1);
        drop(rows);
        out.truncate(mark);
        out.error("ERR - boom");
        assert_eq!(out.as_bytes(), b"-ERR - boom\r\n".as_slice());

        let mut tree = ReplyCollector::new();
        let mark = tree.mark();
        let _rows = tree.postponed_array();
        tree.array(2);
        tree.integer(1);
        tree.truncate(mark);
        tree.error("ERR - boom");
        assert_eq!(tree.take_one(), Some(Reply::Error("ERR - boom".into())));
    }

    #[test]
    fn collector_builds_nested_arrays() {
        let mut tree = ReplyCollector::new();
        let rows = tree.postponed_array();
        tree.array(2);
        tree.integer(1);
        tree.bulk(b"x");
        tree.array(0);
        tree.set_array_length(rows, 2);
        assert_eq!(
            tree.take_one(),
            Some(Reply::Array(vec![
                Reply::Array(vec![Reply::Integer(1), Reply::Bulk(b"x".to_vec())]),
                Reply::Array(vec![]),
            ]))
        );
    }

    #[test]
    fn reply_trees_replay_into_resp() {
        let reply = Reply::Array(vec![Reply::SimpleString("OK".into()), Reply::Null]);
        let mut out = RespWriter::new(Protocol::Resp3);
        reply.write_to(&mut out);
        assert!(!reply.is_error());
        assert!(Reply::Error("ERR - boom".into()).is_error());
        assert_eq!(out.as_bytes(), b"*2\r\n+OK\r\n_\r\n".as_slice());
    }
}
