//! Common Utilities
//! 
//! CRC helpers used by the coding kernels, hex dumps for packet tracing and
//! thread-to-core pinning.

use tracing::{trace, warn};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate CRC-24 (5G NR CRC24A polynomial)
pub fn crc24(data: &[u8]) -> u32 {
    const CRC24_POLY: u32 = 0x1864CFB;
    let mut crc: u32 = 0;
    
    for byte in data {
        crc ^= (*byte as u32) << 16;
        for _ in 0..8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ CRC24_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    
    crc & 0xFFFFFF
}

/// Append the 24-bit CRC of `payload` to it, big endian
pub fn attach_crc24(payload: &mut Vec<u8>) {
    let crc = crc24(payload);
    payload.extend_from_slice(&crc.to_be_bytes()[1..]);
}

/// Check a buffer produced by [`attach_crc24`]
pub fn check_crc24(block: &[u8]) -> bool {
    if block.len() < 3 {
        return false;
    }
    let (payload, tail) = block.split_at(block.len() - 3);
    let expected = u32::from_be_bytes([0, tail[0], tail[1], tail[2]]);
    crc24(payload) == expected
}

/// Pin the calling thread to `core_id`. Returns false when the kernel
/// refuses the affinity mask.
#[cfg(target_os = "linux")]
pub fn pin_to_core(core_id: usize) -> bool {
    // SAFETY: cpu_set_t is plain data; the set is fully initialized by
    // CPU_ZERO before use and only passed by reference to libc.
    let rc = unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core_id, &mut cpuset);
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        )
    };
    if rc != 0 {
        warn!("Failed to pin thread to core {} (errno {})", core_id, rc);
        return false;
    }
    trace!("Pinned thread to core {}", core_id);
    true
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(core_id: usize) -> bool {
    warn!("Core pinning unsupported on this platform, core {} ignored", core_id);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }
    
    #[test]
    fn test_crc24() {
        let data = b"Hello";
        let crc = crc24(data);
        assert_eq!(crc & 0xFFFFFF, crc);
        assert_eq!(crc24(&[]), 0);
    }

    #[test]
    fn test_crc24_attach_and_check() {
        let mut block = b"code block payload".to_vec();
        attach_crc24(&mut block);
        assert!(check_crc24(&block));

        block[0] ^= 0x01;
        assert!(!check_crc24(&block));
        assert!(!check_crc24(&[0x00]));
    }
}
