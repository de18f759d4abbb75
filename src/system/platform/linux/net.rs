//! `/proc/net/{tcp,tcp6,udp,udp6}` socket tables.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::system::details::{NetworkConnection, Protocol};

/// Kernel TCP state codes, indexed by the hex `st` column.
const TCP_STATES: [&str; 13] = [
    "UNKNOWN",
    "ESTABLISHED",
    "SYN_SENT",
    "SYN_RECV",
    "FIN_WAIT1",
    "FIN_WAIT2",
    "TIME_WAIT",
    "CLOSE",
    "CLOSE_WAIT",
    "LAST_ACK",
    "LISTEN",
    "CLOSING",
    "NEW_SYN_RECV",
];

pub fn tcp_state_name(code: usize) -> &'static str {
    TCP_STATES.get(code).copied().unwrap_or("UNKNOWN")
}

/// Inode from an fd link target such as `socket:[12345]`.
pub fn socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Decode `ADDR:PORT` where the address is the kernel's hex dump of the
/// in-memory address words (8 hex digits for IPv4, 32 for IPv6).
pub fn decode_endpoint(field: &str) -> Option<(String, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    // Lossy decoding can leave multi-byte replacement chars in the dump.
    if !addr_hex.is_ascii() {
        return None;
    }
    let addr = match addr_hex.len() {
        8 => {
            let word = u32::from_str_radix(addr_hex, 16).ok()?;
            Ipv4Addr::from(word.to_ne_bytes()).to_string()
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(addr_hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            let v6 = Ipv6Addr::from(octets);
            match v6.to_ipv4_mapped() {
                Some(v4) => v4.to_string(),
                None => v6.to_string(),
            }
        }
        _ => return None,
    };
    Some((addr, port))
}

/// Parse one socket table. Unparseable rows are skipped.
pub fn parse_socket_table(content: &str, protocol: Protocol) -> Vec<NetworkConnection> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| parse_socket_row(line, protocol))
        .collect()
}

fn parse_socket_row(line: &str, protocol: Protocol) -> Option<NetworkConnection> {
    // sl local_address rem_address st tx:rx tr:when retrnsmt uid timeout inode
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (local_address, local_port) = decode_endpoint(fields[1])?;
    let (remote_address, remote_port) = decode_endpoint(fields[2])?;
    let inode = fields[9].parse().ok()?;
    let state = if protocol.is_tcp() {
        let code = usize::from_str_radix(fields[3], 16).unwrap_or(0);
        tcp_state_name(code).to_string()
    } else {
        String::new()
    };

    Some(NetworkConnection {
        protocol,
        local_address,
        local_port,
        remote_address,
        remote_port,
        state,
        inode,
    })
}
