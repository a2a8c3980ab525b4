//! Hardware address generation.

use rand::Rng;

/// Generates a random locally administered unicast MAC address, formatted
/// as lowercase colon-separated hex.
pub fn generate_mac() -> String {
    let mut octets: [u8; 6] = rand::thread_rng().r#gen();
    // locally administered, unicast
    octets[0] = (octets[0] | 0x02) & 0xfe;
    octets
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_mac_is_local_unicast() {
        for _ in 0..64 {
            let mac = generate_mac();
            assert_eq!(mac.len(), 17);
            let first = u8::from_str_radix(&mac[0..2], 16).unwrap();
            assert_eq!(first & 0x01, 0, "{mac} is multicast");
            assert_eq!(first & 0x02, 0x02, "{mac} is not locally administered");
        }
    }
}
