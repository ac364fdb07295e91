/// Bit-granular realignment of a continuous serial stream chopped into frames of `F` bytes.
///
/// The output stream is the input stream delayed by `alignment()` bits. Bits that spill past the
/// end of the current output frame are carried in a reframing buffer and emitted at the start of
/// the next one. Bytes are MSB first, as on the wire.
#[derive(Clone, Debug)]
pub struct BitRealigner<const F: usize> {
    reframe: [u8; F],
    bits: usize,
}

impl<const F: usize> Default for BitRealigner<F> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<const F: usize> BitRealigner<F> {
    /// Frame length in bits.
    pub const FRAME_BITS: usize = F * 8;

    /// Create a realigner delaying by `bits` (modulo the frame length).
    pub const fn new(bits: usize) -> Self {
        Self {
            reframe: [0; F],
            bits: bits % Self::FRAME_BITS,
        }
    }

    /// Change the delay. The reframing buffer is cleared, so the next output frame starts with
    /// `alignment()` zero bits.
    pub fn set_alignment(&mut self, bits: usize) {
        self.reframe = [0; F];
        self.bits = bits % Self::FRAME_BITS;
    }

    /// The current delay in bits.
    pub fn alignment(&self) -> usize {
        self.bits
    }

    /// Shift one frame of input through the realigner.
    ///
    /// # Args
    /// * `input` - The next `F` bytes of the serial stream.
    ///
    /// # Returns
    /// The next `F` bytes of the delayed stream.
    pub fn realign_frame(&mut self, input: &[u8; F]) -> [u8; F] {
        let whole = self.bits / 8;
        let fract = self.bits % 8;

        let mut output = [0; F];
        output[..whole].copy_from_slice(&self.reframe[..whole]);
        let mut carry = self.reframe[whole];

        for (i, &c) in input.iter().enumerate() {
            let o = (c >> fract) | carry;
            let j = whole + i;
            if j < F {
                output[j] = o;
            } else {
                self.reframe[j - F] = o;
            }
            // Low bits of this octet lead the next one. Zero when byte aligned.
            carry = ((c as u16) << (8 - fract)) as u8;
        }

        self.reframe[whole] = if fract != 0 { carry } else { 0 };
        output
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand_core::{RngCore, SeedableRng};
    use rand_xorshift::XorShiftRng;

    const F: usize = 32;

    fn frames(n: usize) -> Vec<[u8; F]> {
        let mut rng = XorShiftRng::from_seed([0x5a; 16]);
        (0..n)
            .map(|_| {
                let mut f = [0; F];
                rng.fill_bytes(&mut f);
                f
            })
            .collect()
    }

    /// Read `bit` of a stream of frames, MSB first.
    fn bit(stream: &[[u8; F]], bit: usize) -> bool {
        let byte = stream[bit / (8 * F)][(bit / 8) % F];
        byte & (0x80 >> (bit % 8)) != 0
    }

    #[test]
    fn delays_by_alignment() {
        let input = frames(4);
        for k in [0, 1, 3, 7, 8, 9, 100, 255] {
            let mut r = BitRealigner::<F>::new(k);
            let output: Vec<_> = input.iter().map(|f| r.realign_frame(f)).collect();
            for b in 0..k {
                assert!(!bit(&output, b), "k={k} b={b}");
            }
            for b in k..4 * 8 * F {
                assert_eq!(bit(&output, b), bit(&input, b - k), "k={k} b={b}");
            }
        }
    }

    #[test]
    fn modulo_frame() {
        assert_eq!(BitRealigner::<F>::new(256 + 5).alignment(), 5);
        let mut r = BitRealigner::<F>::default();
        r.set_alignment(3 * 256);
        assert_eq!(r.alignment(), 0);
        let input = frames(1);
        assert_eq!(r.realign_frame(&input[0]), input[0]);
    }

    #[test]
    fn cascade_is_one_frame() {
        let input = frames(6);
        for k in 0..256 {
            let mut a = BitRealigner::<F>::new(k);
            let mut b = BitRealigner::<F>::new(256 - k);
            let output: Vec<_> = input
                .iter()
                .map(|f| b.realign_frame(&a.realign_frame(f)))
                .collect();
            if k == 0 {
                assert_eq!(output, input);
            } else {
                assert_eq!(output[0], [0; F], "k={k}");
                assert_eq!(&output[1..], &input[..5], "k={k}");
            }
        }
    }

    #[test]
    fn realignment_resets_carry() {
        let mut r = BitRealigner::<F>::new(12);
        r.realign_frame(&[0xff; F]);
        r.set_alignment(12);
        let out = r.realign_frame(&[0xff; F]);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 0x0f);
        assert_eq!(out[2], 0xff);
    }
}
