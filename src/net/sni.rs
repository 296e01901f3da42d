//! TLS ClientHello server name extraction.
//!
//! Works on the raw first record only; nothing is decrypted.

/// TLS record header length.
pub const RECORD_HEADER_LEN: usize = 5;

const CONTENT_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXT_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0;

/// Payload length announced by a TLS record header, if it is a handshake record.
pub fn record_len(header: &[u8]) -> Option<usize> {
    if header.len() < RECORD_HEADER_LEN || header[0] != CONTENT_HANDSHAKE {
        return None;
    }
    Some(u16::from_be_bytes([header[3], header[4]]) as usize)
}

/// Server name from a complete ClientHello record (header included).
pub fn server_name(record: &[u8]) -> Option<String> {
    let len = record_len(record)?;
    let body = record.get(RECORD_HEADER_LEN..RECORD_HEADER_LEN + len)?;
    let mut r = Reader(body);

    if r.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    let hello_len = r.u24()?;
    let mut r = Reader(r.take(hello_len)?);

    r.take(2 + 32)?; // version, random
    let sid = r.u8()? as usize;
    r.take(sid)?;
    let suites = r.u16()? as usize;
    r.take(suites)?;
    let compression = r.u8()? as usize;
    r.take(compression)?;

    let ext_len = r.u16()? as usize;
    let mut exts = Reader(r.take(ext_len)?);
    while !exts.0.is_empty() {
        let ext_type = exts.u16()?;
        let len = exts.u16()? as usize;
        let data = exts.take(len)?;
        if ext_type != EXT_SERVER_NAME {
            continue;
        }

        let mut list = Reader(data);
        let list_len = list.u16()? as usize;
        let mut names = Reader(list.take(list_len)?);
        while !names.0.is_empty() {
            let kind = names.u8()?;
            let len = names.u16()? as usize;
            let name = names.take(len)?;
            if kind == NAME_TYPE_HOST {
                return std::str::from_utf8(name).ok().map(|s| s.to_ascii_lowercase());
            }
        }
    }
    None
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.0.len() < n {
            return None;
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}

/// Build a minimal ClientHello record carrying `name`. Test helper.
#[cfg(test)]
pub(crate) fn client_hello(name: &str) -> Vec<u8> {
    let mut sni = Vec::new();
    let entry_len = 3 + name.len();
    sni.extend_from_slice(&(entry_len as u16).to_be_bytes());
    sni.push(NAME_TYPE_HOST);
    sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
    sni.extend_from_slice(name.as_bytes());

    let mut exts = Vec::new();
    // an unrelated extension first
    exts.extend_from_slice(&[0x00, 0x0b, 0x00, 0x02, 0x01, 0x00]);
    exts.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
    exts.extend_from_slice(&(sni.len() as u16).to_be_bytes());
    exts.extend_from_slice(&sni);

    let mut hello = vec![0x03, 0x03];
    hello.extend_from_slice(&[7u8; 32]);
    hello.push(0); // session id
    hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
    hello.extend_from_slice(&[0x01, 0x00]);
    hello.extend_from_slice(&(exts.len() as u16).to_be_bytes());
    hello.extend_from_slice(&exts);

    let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![CONTENT_HANDSHAKE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
