//! The 14-field pipe-delimited payload record carried inside every framed
//! message (`spec.md` §4.1 "Message payload"). The format is historical and
//! is kept bit-exact rather than replaced with a richer internal
//! serialization (`spec.md` §9 "Serialization format").

const FIELD_COUNT: usize = 14;
const DELIMITER: u8 = b'|';

/// One wire message payload. Text fields are raw bytes rather than `String`
/// because the format explicitly allows NUL bytes inside a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub msg_type: i64,
    pub filename: Vec<u8>,
    pub content: Vec<u8>,
    pub node_address: Vec<u8>,
    pub node_port: i64,
    pub error_code: i64,
    pub mode: i64,
    pub uid: i64,
    pub gid: i64,
    pub offset: i64,
    pub size: i64,
    pub data: Vec<u8>,
    pub path: Vec<u8>,
    pub new_path: Vec<u8>,
}

impl Payload {
    /// Serialize to the on-wire pipe-delimited byte form.
    pub fn encode(&self) -> Vec<u8> {
        let fields: [Vec<u8>; FIELD_COUNT] = [
            self.msg_type.to_string().into_bytes(),
            self.filename.clone(),
            self.content.clone(),
            self.node_address.clone(),
            self.node_port.to_string().into_bytes(),
            self.error_code.to_string().into_bytes(),
            self.mode.to_string().into_bytes(),
            self.uid.to_string().into_bytes(),
            self.gid.to_string().into_bytes(),
            self.offset.to_string().into_bytes(),
            self.size.to_string().into_bytes(),
            self.data.clone(),
            self.path.clone(),
            self.new_path.clone(),
        ];
        let mut out = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            out.extend_from_slice(field);
        }
        out
    }

    /// Parse the on-wire pipe-delimited byte form. Parsing is positional:
    /// the first 13 delimiters split fields 1..13, and the 14th field
    /// absorbs every remaining byte, including further `|` or NUL bytes.
    /// Missing trailing fields default to empty / zero.
    pub fn decode(bytes: &[u8]) -> Self {
        let parts = split_positional(bytes, FIELD_COUNT);
        let text = |i: usize| -> Vec<u8> { parts.get(i).copied().unwrap_or(&[]).to_vec() };
        let num = |i: usize| -> i64 {
            parts
                .get(i)
                .and_then(|f| std::str::from_utf8(f).ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0)
        };
        Payload {
            msg_type: num(0),
            filename: text(1),
            content: text(2),
            node_address: text(3),
            node_port: num(4),
            error_code: num(5),
            mode: num(6),
            uid: num(7),
            gid: num(8),
            offset: num(9),
            size: num(10),
            data: text(11),
            path: text(12),
            new_path: text(13),
        }
    }
}

/// Split `bytes` on `|` into at most `n` parts; the last part is the
/// unconsumed remainder (possibly containing more delimiters).
fn split_positional(bytes: &[u8], n: usize) -> Vec<&[u8]> {
    let mut parts = Vec::with_capacity(n);
    let mut rest = bytes;
    for _ in 0..n.saturating_sub(1) {
        match rest.iter().position(|&b| b == DELIMITER) {
            Some(pos) => {
                parts.push(&rest[..pos]);
                rest = &rest[pos + 1..];
            }
            None => {
                parts.push(rest);
                rest = &[];
            }
        }
    }
    parts.push(rest);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        Payload {
            msg_type: 1,
            filename: b"a/b.txt".to_vec(),
            content: b"hello world".to_vec(),
            node_address: b"10.0.0.1".to_vec(),
            node_port: 9000,
            error_code: 0,
            mode: 0o644,
            uid: 0,
            gid: 0,
            offset: 0,
            size: 11,
            data: b"hello world".to_vec(),
            path: b"/a/b.txt".to_vec(),
            new_path: Vec::new(),
        }
    }

    #[test]
    fn round_trips_every_field_including_empties_and_zeros() {
        let p = sample();
        assert_eq!(Payload::decode(&p.encode()), p);

        let empty = Payload::default();
        assert_eq!(Payload::decode(&empty.encode()), empty);
    }

    #[test]
    fn final_field_absorbs_trailing_pipes() {
        let mut p = sample();
        p.new_path = b"weird|path|with|pipes".to_vec();
        let decoded = Payload::decode(&p.encode());
        assert_eq!(decoded.new_path, p.new_path);
    }

    #[test]
    fn truncated_payload_defaults_missing_fields() {
        let decoded = Payload::decode(b"1|onlyfile");
        assert_eq!(decoded.msg_type, 1);
        assert_eq!(decoded.filename, b"onlyfile");
        assert_eq!(decoded.content, Vec::<u8>::new());
        assert_eq!(decoded.node_port, 0);
    }

    #[test]
    fn nul_bytes_inside_a_field_survive() {
        let mut p = sample();
        p.content = vec![b'a', 0u8, b'b'];
        assert_eq!(Payload::decode(&p.encode()).content, p.content);
    }
}
