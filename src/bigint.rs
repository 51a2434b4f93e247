//! Fixed-bit-width two's-complement big integers (`spec.md` §4.1, C1).
//!
//! The internal representation mirrors `original_source/src/Tvm/
//! BigInteger.hpp`'s `SmallArray<WordType, 2>`: a little-endian array of
//! up to two 64-bit words, which covers every width the IR actually uses
//! (8, 16, 32, 64, 128, or pointer-width, all of which fit in 128 bits).
//! `arrayvec` gives us that fixed small buffer without heap allocation.

use crate::error::{Error, Result};
use arrayvec::ArrayVec;
use std::cmp::Ordering;

type Word = u64;
const WORD_BITS: u32 = 64;
const MAX_WORDS: usize = 2;

fn words_for_bits(bits: u32) -> usize {
    ((bits + WORD_BITS - 1) / WORD_BITS).max(1) as usize
}

/// A two's-complement integer of a fixed, explicitly-tracked bit width.
#[derive(Clone, Debug)]
pub struct BigInteger {
    bits: u32,
    words: ArrayVec<Word, MAX_WORDS>,
}

impl BigInteger {
    /// Construct a zero value of the given bit width. `bits` must be in
    /// `1..=128`; callers outside that range (the IR only ever asks for
    /// 8/16/32/64/128/pointer-width) get a masked-to-128 value rather
    /// than a panic, since this constructor cannot fail.
    #[must_use]
    pub fn zero(bits: u32) -> Self {
        let bits = bits.clamp(1, 128);
        let mut words = ArrayVec::new();
        for _ in 0..words_for_bits(bits) {
            words.push(0);
        }
        Self { bits, words }
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn mask_last_word(&mut self) {
        let total_bits = self.words.len() as u32 * WORD_BITS;
        if self.bits < total_bits {
            let live_bits_in_last = self.bits - (self.words.len() as u32 - 1) * WORD_BITS;
            let last = self.words.len() - 1;
            if live_bits_in_last < WORD_BITS {
                self.words[last] &= (1u64 << live_bits_in_last) - 1;
            }
        }
    }

    /// Parse a signed or unsigned literal in the given base (2..=35).
    pub fn parse(bits: u32, text: &str, signed: bool, radix: u32) -> Result<Self> {
        if !(2..=35).contains(&radix) {
            return Err(Error::internal(format!("invalid radix {radix}")));
        }
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        if digits.is_empty() {
            return Err(Error::bad_type("empty integer literal"));
        }
        let mut value = Self::zero(bits);
        let radix_big = Self::from_u64(bits, u64::from(radix));
        for c in digits.chars() {
            let digit = c
                .to_digit(radix)
                .ok_or_else(|| Error::bad_type(format!("invalid digit '{c}' for radix {radix}")))?;
            value = value.wrapping_mul(&radix_big)?;
            value = value.wrapping_add(&Self::from_u64(bits, u64::from(digit)))?;
        }
        if negative {
            if !signed {
                return Err(Error::bad_type("negative literal in unsigned context"));
            }
            value = value.wrapping_neg();
        }
        Ok(value)
    }

    #[must_use]
    pub fn from_u64(bits: u32, value: u64) -> Self {
        let mut out = Self::zero(bits);
        out.words[0] = value;
        if bits < WORD_BITS {
            out.mask_last_word();
        } else if out.words.len() > 1 {
            // value fits in the low word; higher words stay zero.
        }
        out
    }

    #[must_use]
    pub fn from_i64(bits: u32, value: i64) -> Self {
        let mut out = Self::from_u64(bits, value as u64);
        if value < 0 {
            out.sign_extend_from(WORD_BITS.min(bits));
        }
        out
    }

    /// Re-materializes the sign bit at position `from_bit` upward through
    /// the rest of the words; used after constructing from a narrower
    /// native integer that was already in two's complement form.
    fn sign_extend_from(&mut self, from_bit: u32) {
        if from_bit >= self.bits {
            return;
        }
        let word_idx = (from_bit / WORD_BITS) as usize;
        let bit_in_word = from_bit % WORD_BITS;
        if bit_in_word != 0 && word_idx < self.words.len() {
            let fill = !0u64 << bit_in_word;
            self.words[word_idx] |= fill;
        }
        for w in self.words.iter_mut().skip(word_idx + 1) {
            *w = !0u64;
        }
        self.mask_last_word();
    }

    /// Resize to a new bit width, optionally sign-extending (otherwise
    /// zero-extending/truncating).
    #[must_use]
    pub fn resize(&self, bits: u32, sign_extend: bool) -> Self {
        let mut out = Self::zero(bits);
        let shared_words = self.words.len().min(out.words.len());
        out.words[..shared_words].copy_from_slice(&self.words[..shared_words]);
        if sign_extend && self.sign_bit() && bits > self.bits {
            out.sign_extend_from(self.bits);
        } else {
            out.mask_last_word();
        }
        out
    }

    #[must_use]
    pub fn sign_bit(&self) -> bool {
        let last = *self.words.last().expect("at least one word");
        let bit_in_word = (self.bits - 1) % WORD_BITS;
        (last >> bit_in_word) & 1 == 1
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    #[must_use]
    pub fn unsigned_max(bits: u32) -> Self {
        let mut out = Self::zero(bits);
        for w in &mut out.words {
            *w = !0u64;
        }
        out.mask_last_word();
        out
    }

    #[must_use]
    pub fn unsigned_min(bits: u32) -> Self {
        Self::zero(bits)
    }

    #[must_use]
    pub fn signed_max(bits: u32) -> Self {
        let mut out = Self::unsigned_max(bits);
        let last = out.words.len() - 1;
        let bit_in_word = (bits - 1) % WORD_BITS;
        out.words[last] &= !(1u64 << bit_in_word);
        out
    }

    #[must_use]
    pub fn signed_min(bits: u32) -> Self {
        let mut out = Self::zero(bits);
        let last = out.words.len() - 1;
        let bit_in_word = (bits - 1) % WORD_BITS;
        out.words[last] = 1u64 << bit_in_word;
        out
    }

    fn check_widths(&self, other: &Self) -> Result<()> {
        if self.bits != other.bits {
            return Err(Error::BadWidth { expected: self.bits, found: other.bits });
        }
        Ok(())
    }

    pub fn wrapping_add(&self, other: &Self) -> Result<Self> {
        self.check_widths(other)?;
        let mut out = Self::zero(self.bits);
        let mut carry: u128 = 0;
        for i in 0..out.words.len() {
            let sum = u128::from(self.words[i]) + u128::from(other.words[i]) + carry;
            out.words[i] = sum as u64;
            carry = sum >> WORD_BITS;
        }
        out.mask_last_word();
        Ok(out)
    }

    pub fn wrapping_sub(&self, other: &Self) -> Result<Self> {
        self.check_widths(other)?;
        self.wrapping_add(&other.wrapping_neg())
    }

    pub fn wrapping_mul(&self, other: &Self) -> Result<Self> {
        self.check_widths(other)?;
        let mut acc = Self::zero(self.bits);
        // Schoolbook multiply via repeated shift-add; widths here are
        // small (<=128 bits / 2 words) so this stays fast in practice.
        let mut addend = self.clone();
        let mut rhs = other.clone();
        while !rhs.is_zero() {
            if rhs.words[0] & 1 == 1 {
                acc = acc.wrapping_add(&addend)?;
            }
            addend = addend.shl(1)?;
            rhs = rhs.lshr(1)?;
        }
        Ok(acc)
    }

    #[must_use]
    pub fn wrapping_neg(&self) -> Self {
        let mut out = self.bit_not();
        out = out.wrapping_add(&Self::from_u64(self.bits, 1)).expect("same width");
        out
    }

    pub fn divide_unsigned(&self, other: &Self) -> Result<(Self, Self)> {
        self.check_widths(other)?;
        if other.is_zero() {
            return Err(Error::DivideByZero);
        }
        let bits = self.bits;
        let mut quotient = Self::zero(bits);
        let mut remainder = Self::zero(bits);
        for i in (0..bits).rev() {
            remainder = remainder.shl(1)?;
            if self.bit(i) {
                remainder = remainder.bit_or(&Self::from_u64(bits, 1))?;
            }
            if remainder.cmp_unsigned(other) != Ordering::Less {
                remainder = remainder.wrapping_sub(other)?;
                quotient = quotient.bit_or(&Self::from_u64(bits, 1).shl(i)?)?;
            }
        }
        Ok((quotient, remainder))
    }

    pub fn divide_signed(&self, other: &Self) -> Result<(Self, Self)> {
        self.check_widths(other)?;
        if other.is_zero() {
            return Err(Error::DivideByZero);
        }
        let lhs_neg = self.sign_bit();
        let rhs_neg = other.sign_bit();
        let lhs_abs = if lhs_neg { self.wrapping_neg() } else { self.clone() };
        let rhs_abs = if rhs_neg { other.wrapping_neg() } else { other.clone() };
        let (q, r) = lhs_abs.divide_unsigned(&rhs_abs)?;
        let q = if lhs_neg != rhs_neg { q.wrapping_neg() } else { q };
        let r = if lhs_neg { r.wrapping_neg() } else { r };
        Ok((q, r))
    }

    fn bit(&self, i: u32) -> bool {
        let word = (i / WORD_BITS) as usize;
        let bit = i % WORD_BITS;
        (self.words[word] >> bit) & 1 == 1
    }

    pub fn bit_and(&self, other: &Self) -> Result<Self> {
        self.check_widths(other)?;
        let mut out = self.clone();
        for i in 0..out.words.len() {
            out.words[i] &= other.words[i];
        }
        Ok(out)
    }

    pub fn bit_or(&self, other: &Self) -> Result<Self> {
        self.check_widths(other)?;
        let mut out = self.clone();
        for i in 0..out.words.len() {
            out.words[i] |= other.words[i];
        }
        Ok(out)
    }

    pub fn bit_xor(&self, other: &Self) -> Result<Self> {
        self.check_widths(other)?;
        let mut out = self.clone();
        for i in 0..out.words.len() {
            out.words[i] ^= other.words[i];
        }
        out.mask_last_word();
        Ok(out)
    }

    #[must_use]
    pub fn bit_not(&self) -> Self {
        let mut out = self.clone();
        for w in &mut out.words {
            *w = !*w;
        }
        out.mask_last_word();
        out
    }

    pub fn shl(&self, amount: u32) -> Result<Self> {
        if amount >= self.bits {
            return Ok(Self::zero(self.bits));
        }
        let mut out = Self::zero(self.bits);
        for i in 0..self.bits {
            if i + amount < self.bits && self.bit(i) {
                out.set_bit(i + amount);
            }
        }
        Ok(out)
    }

    pub fn lshr(&self, amount: u32) -> Result<Self> {
        if amount >= self.bits {
            return Ok(Self::zero(self.bits));
        }
        let mut out = Self::zero(self.bits);
        for i in amount..self.bits {
            if self.bit(i) {
                out.set_bit(i - amount);
            }
        }
        Ok(out)
    }

    pub fn ashr(&self, amount: u32) -> Result<Self> {
        let negative = self.sign_bit();
        let mut out = self.lshr(amount)?;
        if negative {
            for i in self.bits.saturating_sub(amount)..self.bits {
                out.set_bit(i);
            }
        }
        Ok(out)
    }

    fn set_bit(&mut self, i: u32) {
        let word = (i / WORD_BITS) as usize;
        let bit = i % WORD_BITS;
        self.words[word] |= 1u64 << bit;
    }

    #[must_use]
    pub fn cmp_unsigned(&self, other: &Self) -> Ordering {
        for i in (0..self.words.len().max(other.words.len())).rev() {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    #[must_use]
    pub fn cmp_signed(&self, other: &Self) -> Ordering {
        match (self.sign_bit(), other.sign_bit()) {
            (false, false) | (true, true) => self.cmp_unsigned(other),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }

    /// `floor(log2(self))` treating the value as unsigned. Returns `None`
    /// for zero (log2 of zero is undefined).
    #[must_use]
    pub fn log2_unsigned(&self) -> Option<u32> {
        (0..self.bits).rev().find(|&i| self.bit(i))
    }

    /// `floor(log2(|self|))` treating the value as signed two's
    /// complement. `None` for zero.
    #[must_use]
    pub fn log2_signed(&self) -> Option<u32> {
        if self.sign_bit() {
            self.wrapping_neg().log2_unsigned()
        } else {
            self.log2_unsigned()
        }
    }

    /// Extract as a native `u64` if the value fits (i.e. all higher bits
    /// beyond 64 are zero, when interpreted as unsigned).
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if self.words.iter().skip(1).any(|&w| w != 0) {
            return None;
        }
        Some(self.words[0])
    }

    /// Renders the value as a decimal string, the form the disassembler
    /// prints inside `#...` integer literals. `signed` selects two's
    /// complement interpretation (a leading `-` for a set sign bit);
    /// unsigned rendering always produces a non-negative digit string.
    #[must_use]
    pub fn to_decimal_string(&self, signed: bool) -> String {
        if signed && self.sign_bit() {
            return format!("-{}", self.wrapping_neg().to_decimal_string(false));
        }
        if self.is_zero() {
            return "0".to_string();
        }
        let ten = Self::from_u64(self.bits, 10);
        let mut digits = Vec::new();
        let mut value = self.clone();
        while !value.is_zero() {
            let (q, r) = value.divide_unsigned(&ten).expect("radix ten is never zero");
            digits.push(char::from_digit(r.words[0] as u32, 10).expect("remainder < 10"));
            value = q;
        }
        digits.iter().rev().collect()
    }
}

impl PartialEq for BigInteger {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits && self.cmp_unsigned(other) == Ordering::Equal
    }
}
impl Eq for BigInteger {}

impl std::hash::Hash for BigInteger {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
        self.words.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_plus_one_wraps() {
        let max = BigInteger::unsigned_max(8);
        let one = BigInteger::from_u64(8, 1);
        let wrapped = max.wrapping_add(&one).unwrap();
        assert!(wrapped.is_zero());
    }

    #[test]
    fn divide_by_zero_fails() {
        let a = BigInteger::from_u64(32, 10);
        let z = BigInteger::zero(32);
        assert_eq!(a.divide_unsigned(&z).unwrap_err().kind(), "divide-by-zero");
    }

    #[test]
    fn signed_widening_preserves_value() {
        let neg_one_8 = BigInteger::from_i64(8, -1);
        let widened = neg_one_8.resize(32, true);
        assert_eq!(widened, BigInteger::from_i64(32, -1));
    }

    #[test]
    fn unsigned_widening_preserves_bit_pattern() {
        let max_8 = BigInteger::unsigned_max(8);
        let widened = max_8.resize(16, false);
        assert_eq!(widened, BigInteger::from_u64(16, 0xff));
    }

    #[test]
    fn bad_width_on_mismatched_binary_op() {
        let a = BigInteger::from_u64(8, 1);
        let b = BigInteger::from_u64(16, 1);
        assert_eq!(a.wrapping_add(&b).unwrap_err().kind(), "bad-width");
    }

    #[test]
    fn i32_add_wraps_to_min() {
        let max = BigInteger::signed_max(32);
        let one = BigInteger::from_i64(32, 1);
        let wrapped = max.wrapping_add(&one).unwrap();
        assert_eq!(wrapped, BigInteger::signed_min(32));
    }

    #[test]
    fn parse_decimal_and_negative() {
        let v = BigInteger::parse(32, "-15", true, 10).unwrap();
        assert_eq!(v, BigInteger::from_i64(32, -15));
    }

    #[test]
    fn parse_hex_radix() {
        let v = BigInteger::parse(16, "ff", false, 16).unwrap();
        assert_eq!(v, BigInteger::from_u64(16, 255));
    }

    #[test]
    fn log2_of_power_of_two() {
        let v = BigInteger::from_u64(32, 1024);
        assert_eq!(v.log2_unsigned(), Some(10));
    }

    #[test]
    fn to_u64_out_of_range() {
        let v = BigInteger::unsigned_max(128);
        assert!(v.to_u64().is_none());
    }
}
