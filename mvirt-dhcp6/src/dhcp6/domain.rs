//! RFC 1035 domain name lists as carried in DHCPv6 options.
//!
//! Names are a sequence of length-prefixed labels ending with a zero byte.
//! Decoding follows compression pointers (RFC 1035 Section 4.1.4), which
//! are offsets relative to the start of the option payload.

const MAX_LABEL: usize = 63;
const MAX_NAME: usize = 255;
const MAX_JUMPS: usize = 64;

/// Decode every name in `buf` and join them with single spaces.
///
/// Returns `None` if any name is malformed. That covers truncated labels,
/// reserved label types (which also bounds labels to 63 bytes), pointers
/// that do not go backwards and names over 255 bytes.
pub fn decode_domain_list(buf: &[u8]) -> Option<String> {
    let mut names = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (name, next) = decode_name(buf, pos)?;
        if !name.is_empty() {
            names.push(name);
        }
        pos = next;
    }
    Some(names.join(" "))
}

/// Decode a single name starting at `start`.
/// Returns the dotted name and the offset just past it in the original stream.
fn decode_name(buf: &[u8], start: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut pos = start;
    let mut resume = None;
    let mut jumps = 0;

    loop {
        let len = *buf.get(pos)? as usize;
        match len & 0xc0 {
            0x00 => {}
            0xc0 => {
                let target = ((len & 0x3f) << 8) | *buf.get(pos + 1)? as usize;
                // Pointers must go backwards, which also rules out loops.
                if target >= pos || jumps >= MAX_JUMPS {
                    return None;
                }
                jumps += 1;
                resume.get_or_insert(pos + 2);
                pos = target;
                continue;
            }
            _ => return None,
        }

        if len == 0 {
            return Some((name, resume.unwrap_or(pos + 1)));
        }
        let label = buf.get(pos + 1..pos + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
        if name.len() > MAX_NAME {
            return None;
        }
        pos += 1 + len;
    }
}

/// Encode names into wire form without compression.
pub fn encode_domain_list<'a, I>(names: I) -> Result<Vec<u8>, &'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    for name in names {
        let mut encoded = 0;
        for label in name.split('.').filter(|l| !l.is_empty()) {
            if label.len() > MAX_LABEL {
                return Err("domain label longer than 63 bytes");
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
            encoded += label.len() + 1;
        }
        if encoded + 1 > MAX_NAME {
            return Err("domain name too long");
        }
        out.push(0);
    }
    Ok(out)
}
