//! Protocol parsers for DNS query names and TLS SNI hostnames.
//!
//! Both functions are deliberately lenient: malformed or truncated input
//! never produces an error, only `None`.

/// Size of the fixed DNS header preceding the question section.
const DNS_HEADER_LEN: usize = 12;

/// Size of a TLS record header (type, version, length).
const TLS_RECORD_HEADER_LEN: usize = 5;

/// TLS record content type for handshake messages.
const TLS_HANDSHAKE: u8 = 0x16;

/// Parses the first question name from a raw DNS message.
///
/// Walks length-prefixed labels after the 12-byte header until the zero
/// terminator. A label that would run past the end of the buffer stops the
/// walk; whatever was collected so far is returned. Labels that are not valid
/// UTF-8 are skipped without discarding the labels before them.
pub fn parse_dns_query_name(packet: &[u8]) -> Option<String> {
    if packet.len() <= DNS_HEADER_LEN {
        return None;
    }

    let mut idx = DNS_HEADER_LEN;
    let mut labels: Vec<&str> = Vec::new();
    while idx < packet.len() {
        let len = packet[idx] as usize;
        if len == 0 || idx + 1 + len > packet.len() {
            break;
        }
        if let Ok(label) = std::str::from_utf8(&packet[idx + 1..idx + 1 + len]) {
            labels.push(label);
        }
        idx += len + 1;
    }

    if labels.is_empty() { None } else { Some(labels.join(".")) }
}

/// Extracts the SNI hostname from a TLS ClientHello record.
///
/// This is a heuristic scan, not a walk of the extensions list: the first
/// `00 00` pair after the record header is taken as the server_name
/// extension type, the byte after it as the name length, and the bytes after
/// that as the hostname. Incidental zero pairs earlier in the hello can make
/// it misfire; the behaviour is kept as-is.
pub fn parse_tls_sni(packet: &[u8]) -> Option<String> {
    if packet.len() <= TLS_RECORD_HEADER_LEN || packet[0] != TLS_HANDSHAKE {
        return None;
    }

    let marker = packet[TLS_RECORD_HEADER_LEN..]
        .windows(2)
        .position(|w| w == [0x00, 0x00])?;
    let tail = &packet[TLS_RECORD_HEADER_LEN + marker + 2..];
    if tail.len() <= 2 {
        return None;
    }

    let len = tail[1] as usize;
    if tail.len() < 2 + len {
        return None;
    }
    std::str::from_utf8(&tail[2..2 + len]).ok().map(str::to_string)
}
