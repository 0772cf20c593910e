use std::cell::Cell;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{Error, Result};

/// number of bytes per byte
pub const BYTE_LEN: usize = 1;
/// number of bytes per short
pub const U16_LEN: usize = 2;
/// number of bytes per int
pub const U32_LEN: usize = 4;
/// number of bytes per long
pub const U64_LEN: usize = 8;

/// Warp messages are bounded by the P-Chain tx size limit.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Big-endian packer compatible with "avalanchego/utils/wrappers.Packer".
/// The first failure is sticky: later calls become no-ops and return
/// sentinels, and "take_error" surfaces it once packing is done.
pub struct Packer {
    /// largest allowed size of the byte array
    max_size: usize,
    bytes: Cell<BytesMut>,
    /// read cursor, only used while unpacking
    offset: Cell<usize>,
    error: Cell<Option<String>>,
}

impl Packer {
    pub fn new(max_size: usize, initial_cap: usize) -> Self {
        Self {
            max_size,
            bytes: Cell::new(BytesMut::with_capacity(initial_cap)),
            offset: Cell::new(0),
            error: Cell::new(None),
        }
    }

    /// Create a new packer from the existing bytes, with the cursor at the beginning.
    pub fn load_bytes_for_unpack(max_size: usize, b: &[u8]) -> Self {
        Self {
            max_size,
            bytes: Cell::new(BytesMut::from(b)),
            offset: Cell::new(0),
            error: Cell::new(None),
        }
    }

    /// Returns the packed bytes, or the first error hit while packing.
    pub fn take_bytes(&self) -> Result<Bytes> {
        if let Some(e) = self.error.take() {
            return Err(Error::decode("warp message", e));
        }
        let b = self.bytes.take();
        Ok(b.freeze())
    }

    pub fn take_error(&self) -> Option<Error> {
        self.error.take().map(|e| Error::decode("warp message", e))
    }

    pub fn errored(&self) -> bool {
        let err = self.error.take();
        let errored = err.is_some();
        self.error.set(err);
        errored
    }

    fn set_error(&self, msg: String) {
        if !self.errored() {
            self.error.set(Some(msg));
        }
    }

    pub fn get_offset(&self) -> usize {
        self.offset.get()
    }

    pub fn bytes_len(&self) -> usize {
        let b = self.bytes.take();
        let n = b.len();
        self.bytes.set(b);
        n
    }

    /// Number of bytes left to unpack.
    pub fn remaining(&self) -> usize {
        self.bytes_len().saturating_sub(self.get_offset())
    }

    fn check_capacity(&self, n: usize) -> bool {
        if self.errored() {
            return false;
        }
        let needed_size = self.bytes_len() + n;
        if needed_size > self.max_size {
            self.set_error(format!(
                "needed_size {} > max_size {}",
                needed_size, self.max_size
            ));
            return false;
        }
        true
    }

    fn check_space(&self, n: usize) -> bool {
        if self.errored() {
            return false;
        }
        if self.get_offset() + n > self.bytes_len() {
            self.set_error(format!(
                "packer has insufficient length for input (need {n} at offset {}, have {})",
                self.get_offset(),
                self.bytes_len()
            ));
            return false;
        }
        true
    }

    fn put(&self, f: impl FnOnce(&mut BytesMut), n: usize) {
        if !self.check_capacity(n) {
            return;
        }
        let mut b = self.bytes.take();
        f(&mut b);
        // remember to put it back -- "take" leaves the field as "Default::default()"
        self.bytes.set(b);
    }

    fn read(&self, n: usize) -> Option<Vec<u8>> {
        if !self.check_space(n) {
            return None;
        }
        let offset = self.get_offset();
        let b = self.bytes.take();
        let v = Vec::from(&b[offset..offset + n]);
        self.bytes.set(b);
        self.offset.set(offset + n);
        Some(v)
    }

    pub fn pack_byte(&self, v: u8) {
        self.put(|b| b.put_u8(v), BYTE_LEN)
    }

    pub fn unpack_byte(&self) -> u8 {
        self.read(BYTE_LEN).map(|v| v[0]).unwrap_or(0)
    }

    pub fn pack_u16(&self, v: u16) {
        self.put(|b| b.put_u16(v), U16_LEN)
    }

    pub fn unpack_u16(&self) -> u16 {
        self.read(U16_LEN)
            .map(|v| u16::from_be_bytes([v[0], v[1]]))
            .unwrap_or(0)
    }

    pub fn pack_u32(&self, v: u32) {
        self.put(|b| b.put_u32(v), U32_LEN)
    }

    pub fn unpack_u32(&self) -> u32 {
        self.read(U32_LEN)
            .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
            .unwrap_or(0)
    }

    pub fn pack_u64(&self, v: u64) {
        self.put(|b| b.put_u64(v), U64_LEN)
    }

    pub fn unpack_u64(&self) -> u64 {
        self.read(U64_LEN)
            .map(|v| {
                let mut arr = [0u8; U64_LEN];
                arr.copy_from_slice(&v);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(0)
    }

    pub fn pack_bool(&self, v: bool) {
        self.pack_byte(u8::from(v))
    }

    pub fn unpack_bool(&self) -> bool {
        match self.unpack_byte() {
            0 => false,
            1 => true,
            _ => {
                self.set_error(String::from("unexpected value when unpacking bool"));
                false
            }
        }
    }

    /// ref. "avalanchego/utils/wrappers.Packer.PackFixedBytes"
    pub fn pack_fixed_bytes(&self, v: &[u8]) {
        self.put(|b| b.put_slice(v), v.len())
    }

    pub fn unpack_fixed_bytes(&self, n: usize) -> Vec<u8> {
        self.read(n).unwrap_or_default()
    }

    /// The first 4-byte is used for encoding length header.
    /// ref. "avalanchego/utils/wrappers.Packer.PackBytes"
    pub fn pack_bytes_with_header(&self, v: &[u8]) {
        self.pack_u32(v.len() as u32);
        self.pack_fixed_bytes(v);
    }

    pub fn unpack_bytes_with_header(&self) -> Vec<u8> {
        let n = self.unpack_u32() as usize;
        if n > self.max_size {
            self.set_error(format!("length header {n} > max_size {}", self.max_size));
            return Vec::new();
        }
        self.unpack_fixed_bytes(n)
    }

    /// Fails unless every byte has been consumed.
    pub fn finish_unpack(&self) -> Result<()> {
        if let Some(e) = self.take_error() {
            return Err(e);
        }
        let left = self.remaining();
        if left != 0 {
            return Err(Error::decode(
                "warp message",
                format!("{left} trailing byte(s) after unpack"),
            ));
        }
        Ok(())
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::packer::test_pack_unpack --exact --show-output
#[test]
fn test_pack_unpack() {
    let packer = Packer::new(MAX_MESSAGE_SIZE, 0);
    packer.pack_u16(0);
    packer.pack_u32(0x01020304);
    packer.pack_u64(7);
    packer.pack_bool(true);
    packer.pack_bytes_with_header(&[0xaa, 0xbb]);
    let b = packer.take_bytes().unwrap();
    assert_eq!(
        b.as_ref(),
        &[
            0x00, 0x00, //
            0x01, 0x02, 0x03, 0x04, //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, //
            0x01, //
            0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb,
        ]
    );

    let unpacker = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, &b);
    assert_eq!(unpacker.unpack_u16(), 0);
    assert_eq!(unpacker.unpack_u32(), 0x01020304);
    assert_eq!(unpacker.unpack_u64(), 7);
    assert!(unpacker.unpack_bool());
    assert_eq!(unpacker.unpack_bytes_with_header(), vec![0xaa, 0xbb]);
    assert!(unpacker.finish_unpack().is_ok());
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- warp::packer::test_errors --exact --show-output
#[test]
fn test_errors() {
    let packer = Packer::new(4, 0);
    packer.pack_u32(1);
    packer.pack_byte(1);
    assert!(packer.errored());
    assert!(packer.take_bytes().is_err());

    let unpacker = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, &[0x00, 0x01]);
    assert_eq!(unpacker.unpack_u32(), 0);
    assert!(unpacker.finish_unpack().is_err());

    let unpacker = Packer::load_bytes_for_unpack(MAX_MESSAGE_SIZE, &[0x02]);
    unpacker.unpack_bool();
    assert!(unpacker.take_error().is_some());
}
