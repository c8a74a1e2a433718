//! A module for crypto AES functions. Essentially a wrapper around the RustCrypto `aes`, `ccm`
//! and `cmac` crates. This lets the rest of the library code to not have a hard dependence
//! on any 3rd party libs. Bluetooth Mesh uses 128-bit exclusively as its Key bit size.
use crate::crypto::key::Key;
use crate::crypto::{nonce::Nonce, MicSize, Salt, MIC};
use aead::AeadInPlace;
use aes::cipher::{
    generic_array::{
        typenum::consts::{U13, U4, U8},
        GenericArray,
    },
    BlockEncrypt, KeyInit,
};
use aes::Aes128;
use cmac::{Cmac, Mac};

pub const AES_BLOCK_LEN: usize = 16;
pub type AesBlock = [u8; AES_BLOCK_LEN];

/// Returned when a key can't be used to decrypt. (Wrong Key?)
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, thiserror::Error)]
#[error("aes-ccm authentication failed")]
pub struct Error;

type AesCcmBigMic = ccm::Ccm<Aes128, U8, U13>;
type AesCcmSmallMic = ccm::Ccm<Aes128, U4, U13>;

pub struct AESCipher {
    key: Key,
    cipher: Aes128,
}
impl AESCipher {
    #[must_use]
    pub fn new(key: Key) -> AESCipher {
        AESCipher {
            key,
            cipher: Aes128::new(GenericArray::from_slice(key.as_ref())),
        }
    }
    fn key_array(&self) -> &GenericArray<u8, aes::cipher::consts::U16> {
        GenericArray::from_slice(self.key.as_ref())
    }
    /// Encrypt a single 16 byte block (AES-ECB).
    #[must_use]
    pub fn ecb_encrypt(&self, input: &AesBlock) -> AesBlock {
        let mut block = GenericArray::clone_from_slice(input);
        self.cipher.encrypt_block(&mut block);
        block.into()
    }
    #[must_use]
    pub fn cmac(&self, m: &[u8]) -> Key {
        self.cmac_slice(&[m])
    }
    /// AES-CMAC over the concatenation of every slice in `ms`.
    #[must_use]
    pub fn cmac_slice(&self, ms: &[&[u8]]) -> Key {
        let mut mac = <Cmac<Aes128> as KeyInit>::new(self.key_array());
        for m in ms {
            mac.update(m);
        }
        Key::new(mac.finalize().into_bytes().into())
    }
    /// AES CCM encryption of `payload` in place. Returns the detached MIC of `mic_size`.
    pub fn ccm_encrypt(
        &self,
        nonce: &Nonce,
        associated_data: &[u8],
        payload: &mut [u8],
        mic_size: MicSize,
    ) -> Result<MIC, Error> {
        let nonce = GenericArray::from_slice(nonce.as_ref());
        match mic_size {
            MicSize::Big => {
                let tag = <AesCcmBigMic as KeyInit>::new(self.key_array())
                    .encrypt_in_place_detached(nonce, associated_data, payload)
                    .map_err(|_| Error)?;
                MIC::try_from_bytes_be(tag.as_slice()).ok_or(Error)
            }
            MicSize::Small => {
                let tag = <AesCcmSmallMic as KeyInit>::new(self.key_array())
                    .encrypt_in_place_detached(nonce, associated_data, payload)
                    .map_err(|_| Error)?;
                MIC::try_from_bytes_be(tag.as_slice()).ok_or(Error)
            }
        }
    }
    /// AES CCM decryption of the payload. To supply no associated data, pass it an empty slice
    /// (such as `b""`). This function will return an [`Error`] if the MIC doesn't match.
    pub fn ccm_decrypt(
        &self,
        nonce: &Nonce,
        associated_data: &[u8],
        payload: &mut [u8],
        mic: MIC,
    ) -> Result<(), Error> {
        let nonce = GenericArray::from_slice(nonce.as_ref());
        match mic {
            MIC::Big(b) => <AesCcmBigMic as KeyInit>::new(self.key_array())
                .decrypt_in_place_detached(
                    nonce,
                    associated_data,
                    payload,
                    GenericArray::from_slice(&b.to_be_bytes()),
                )
                .map_err(|_| Error),
            MIC::Small(s) => <AesCcmSmallMic as KeyInit>::new(self.key_array())
                .decrypt_in_place_detached(
                    nonce,
                    associated_data,
                    payload,
                    GenericArray::from_slice(&s.to_be_bytes()),
                )
                .map_err(|_| Error),
        }
    }
}

impl From<Key> for AESCipher {
    fn from(k: Key) -> Self {
        Self::new(k)
    }
}
impl From<Salt> for AESCipher {
    fn from(s: Salt) -> Self {
        s.as_key().into()
    }
}
