#![cfg_attr(not(test), no_std)]
//! ITU-T G.704 E1 line format.
//!
//! An E1 frame is 32 time slots of 8 bits, transmitted MSB first at 2.048 Mbit/s. Time slot 0
//! alternates between the frame alignment signal (FAS, even frames) and the not-FAS word (odd
//! frames). The serial interface moves two consecutive frames per DMA transfer as sixteen 32-bit
//! words, the first serial bit landing in bit 31 of word 0. This is a [DoubleFrame].
use arbitrary_int::{u5, u7, Number};
use bitbybit::bitfield;

mod realign;
pub use realign::*;

/// Bits in one E1 frame.
pub const FRAME_BITS: usize = 256;

/// Bytes (time slots) in one E1 frame.
pub const FRAME_BYTES: usize = FRAME_BITS / 8;

/// 32-bit serial words in one E1 frame.
pub const FRAME_WORDS: usize = FRAME_BYTES / 4;

/// 32-bit serial words in a double-frame.
pub const DOUBLE_FRAME_WORDS: usize = 2 * FRAME_WORDS;

/// Bytes in a double-frame.
pub const DOUBLE_FRAME_BYTES: usize = 2 * FRAME_BYTES;

/// Bits in a double-frame.
pub const DOUBLE_FRAME_BITS: usize = 2 * FRAME_BITS;

/// The frame alignment signal, bits 2 to 8 of time slot 0 in even frames.
pub const FAS: u7 = u7::new(0b001_1011);

/// The first serial word of an even frame: time slot 0 carrying the FAS.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct FasWord {
    /// International bit (CRC-4 when enabled).
    #[bit(31, rw)]
    si: bool,
    #[bits(24..=30, rw)]
    fas: u7,
}

/// The first serial word of an odd frame: time slot 0 carrying the not-FAS marker.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct NfasWord {
    #[bit(31, rw)]
    si: bool,
    /// Always set in odd frames, distinguishes NFAS from FAS.
    #[bit(30, rw)]
    marker: bool,
    /// Remote alarm indication (A bit).
    #[bit(29, rw)]
    remote_alarm: bool,
    /// National bits Sa4 to Sa8.
    #[bits(24..=28, rw)]
    sa: u5,
}

impl FasWord {
    /// Whether this word carries the frame alignment signal. The Si bit is not checked.
    pub fn is_aligned(&self) -> bool {
        self.fas() == FAS
    }
}

impl NfasWord {
    /// Whether this word carries the not-FAS marker with a cleared Si bit.
    pub fn is_aligned(&self) -> bool {
        !self.si() && self.marker()
    }
}

/// Two consecutive E1 frames (even, then odd) as moved by one serial DMA transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C, align(4))]
pub struct DoubleFrame(pub [u32; DOUBLE_FRAME_WORDS]);

impl DoubleFrame {
    pub const ZERO: Self = Self([0; DOUBLE_FRAME_WORDS]);

    /// The first word of the even frame.
    pub fn even_word(&self) -> u32 {
        self.0[0]
    }

    /// The first word of the odd frame.
    pub fn odd_word(&self) -> u32 {
        self.0[FRAME_WORDS]
    }

    /// Check the G.704 alignment pattern of both frames.
    pub fn is_aligned(&self) -> bool {
        FasWord::new_with_raw_value(self.even_word()).is_aligned()
            && NfasWord::new_with_raw_value(self.odd_word()).is_aligned()
    }

    /// Write FAS and NFAS into time slot 0 of both frames, leaving all other time slots alone.
    ///
    /// # Note
    /// Without CRC-4 the Si bit of the even frame and the spare national bits are sent as ones.
    pub fn stamp_alignment(&mut self) {
        self.0[0] = FasWord::new_with_raw_value(self.0[0])
            .with_si(true)
            .with_fas(FAS)
            .raw_value();
        self.0[FRAME_WORDS] = NfasWord::new_with_raw_value(self.0[FRAME_WORDS])
            .with_si(false)
            .with_marker(true)
            .with_remote_alarm(false)
            .with_sa(u5::MAX)
            .raw_value();
    }

    /// The double-frame in serial (MSB first) byte order.
    pub fn to_bytes(&self) -> [u8; DOUBLE_FRAME_BYTES] {
        let mut bytes = [0; DOUBLE_FRAME_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    /// Build a double-frame from bytes in serial order.
    pub fn from_bytes(bytes: &[u8; DOUBLE_FRAME_BYTES]) -> Self {
        let mut frame = Self::ZERO;
        for (word, chunk) in frame.0.iter_mut().zip(bytes.chunks_exact(4)) {
            let mut be = [0; 4];
            be.copy_from_slice(chunk);
            *word = u32::from_be_bytes(be);
        }
        frame
    }
}
