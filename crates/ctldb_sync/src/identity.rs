//! Controller identity and the record masking key derived from it.

use sha2::{Digest, Sha512};
use std::fmt;
use zeroize::Zeroizing;

const ADDRESS_MASK: u64 = 0xff_ffff_ffff;
const MASKING_KEY_BYTES: usize = 32;

/// The controller's own node address and private key material.
///
/// Network ids owned by a controller carry its 40-bit address in their top
/// bits; anything else seen in the remote store belongs to someone else.
#[derive(Clone)]
pub struct ControllerIdentity {
    address: u64,
    private_key: Zeroizing<Vec<u8>>,
}

impl ControllerIdentity {
    /// Creates an identity. Only the low 40 bits of `address` are kept.
    pub fn new(address: u64, private_key: impl Into<Vec<u8>>) -> Self {
        Self {
            address: address & ADDRESS_MASK,
            private_key: Zeroizing::new(private_key.into()),
        }
    }

    /// Returns the 40-bit node address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the address as 10 lowercase hex digits.
    pub fn address_hex(&self) -> String {
        format!("{:010x}", self.address)
    }

    /// Returns true if `nwid` lies in this controller's namespace.
    pub fn owns_network(&self, nwid: u64) -> bool {
        nwid >> 24 == self.address
    }

    /// Derives the key the remote store uses to mask record values.
    ///
    /// Hex of the first 32 bytes of SHA-512 over the private key, so anyone
    /// holding the private key can re-derive it and nobody else can.
    pub fn masking_key(&self) -> String {
        let digest = Sha512::digest(self.private_key.as_slice());
        hex::encode(&digest[..MASKING_KEY_BYTES])
    }
}

impl fmt::Debug for ControllerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerIdentity")
            .field("address", &self.address_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_truncated_to_40_bits() {
        let id = ControllerIdentity::new(0xffff_0011_2233_4455, b"k".to_vec());
        assert_eq!(id.address(), 0x11_2233_4455);
        assert_eq!(id.address_hex(), "1122334455");
    }

    #[test]
    fn namespace_check_uses_top_bits() {
        let id = ControllerIdentity::new(0x00_1122_3344, b"k".to_vec());
        assert!(id.owns_network(0x0011_2233_44aa_bbcc));
        assert!(id.owns_network(0x0011_2233_4400_0000));
        assert!(!id.owns_network(0x0011_2233_45aa_bbcc));
        assert!(!id.owns_network(0x00_1122_3344));
    }

    #[test]
    fn masking_key_is_sha512_prefix() {
        let empty = ControllerIdentity::new(1, Vec::new());
        assert_eq!(
            empty.masking_key(),
            "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce"
        );

        let abc = ControllerIdentity::new(1, b"abc".to_vec());
        assert_eq!(
            abc.masking_key(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a"
        );
        assert_eq!(abc.masking_key().len(), 64);
    }

    #[test]
    fn debug_hides_private_key() {
        let id = ControllerIdentity::new(0x42, b"super-secret".to_vec());
        let rendered = format!("{id:?}");
        assert!(rendered.contains("0000000042"));
        assert!(!rendered.contains("super-secret"));
    }
}
