//! Argument view over one intercepted call
//!
//! The host captures the register-passed arguments and the spilled stack
//! arguments of an intercepted call into two arrays of 64-bit slots. This
//! module gives plugins a single zero-based argument index over both:
//!
//! ```text
//! logical index   0   1   2   3 | 4   5   6 ...
//!                 registers[i]  | stack[i - register_slot_count]
//! ```
//!
//! Register slot 0 doubles as the return value slot and register slot 4 holds
//! the address the host continues at once the handler returns.
//!
//! # Safety
//! Access outside the declared arity or outside the backing arrays never
//! fails: reads yield zero and writes are dropped. A misbehaving plugin can
//! fail to observe an argument but cannot corrupt the host's frame.

use serde::{Deserialize, Serialize};
use strace_common::{Error, NtStatus, Result};
use tracing::trace;

/// Register slot holding the return value
pub const RETURN_SLOT: usize = 0;

/// Register slot the host branches to after the callback returns
pub const REDIRECT_SLOT: usize = 4;

/// How far past the declared arity an index may reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentBound {
    /// `index < param_count`
    #[default]
    Strict,
    /// `index <= param_count`, the bound the original host ABI checks
    Legacy,
}

impl ArgumentBound {
    pub fn admits(self, index: u32, param_count: u32) -> bool {
        match self {
            ArgumentBound::Strict => index < param_count,
            ArgumentBound::Legacy => index <= param_count,
        }
    }
}

/// Calling conventions the host knows how to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    /// rcx, rdx, r8, r9 then stack
    X64,
    /// stdcall, everything on the stack
    X86,
}

impl CallingConvention {
    pub fn register_slot_count(self) -> u32 {
        match self {
            CallingConvention::X64 => 4,
            CallingConvention::X86 => 0,
        }
    }
}

/// Conversion of an argument value into a 64-bit slot
///
/// Narrow integers are widened the way a C cast to `uint64_t` would (signed
/// types sign-extend), wider ones are truncated to their low 64 bits.
pub trait IntoSlot {
    fn into_slot(self) -> u64;
}

macro_rules! impl_into_slot {
    ($($t:ty),*) => {
        $(
            impl IntoSlot for $t {
                fn into_slot(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_into_slot!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl IntoSlot for bool {
    fn into_slot(self) -> u64 {
        self as u64
    }
}

impl IntoSlot for NtStatus {
    fn into_slot(self) -> u64 {
        self.0 as u64
    }
}

impl<T> IntoSlot for *const T {
    fn into_slot(self) -> u64 {
        self as usize as u64
    }
}

impl<T> IntoSlot for *mut T {
    fn into_slot(self) -> u64 {
        self as usize as u64
    }
}

/// Calling-convention agnostic view of an intercepted call's arguments
///
/// Borrowed from the host for exactly one handler invocation.
#[derive(Debug)]
pub struct ArgumentView<'a> {
    param_count: u32,
    register_slot_count: u32,
    registers: &'a mut [u64],
    stack: &'a mut [u64],
    bound: ArgumentBound,
}

impl<'a> ArgumentView<'a> {
    pub fn new(
        param_count: u32,
        register_slot_count: u32,
        registers: &'a mut [u64],
        stack: &'a mut [u64],
    ) -> Self {
        Self {
            param_count,
            register_slot_count,
            registers,
            stack,
            bound: ArgumentBound::Strict,
        }
    }

    pub fn for_convention(
        convention: CallingConvention,
        param_count: u32,
        registers: &'a mut [u64],
        stack: &'a mut [u64],
    ) -> Self {
        Self::new(
            param_count,
            convention.register_slot_count(),
            registers,
            stack,
        )
    }

    pub fn with_bound(mut self, bound: ArgumentBound) -> Self {
        self.bound = bound;
        self
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn register_slot_count(&self) -> u32 {
        self.register_slot_count
    }

    pub fn bound(&self) -> ArgumentBound {
        self.bound
    }

    /// Physical location of a logical argument, `None` when out of range
    fn locate(&self, index: u32) -> Option<(bool, usize)> {
        if !self.bound.admits(index, self.param_count) {
            return None;
        }

        if index < self.register_slot_count {
            // the redirect slot is only reachable through redirect_syscall
            (index as usize != REDIRECT_SLOT).then_some((true, index as usize))
        } else {
            // stack indexing restarts at zero after the register arguments
            Some((false, (index - self.register_slot_count) as usize))
        }
    }

    pub fn read_argument(&self, index: u32) -> u64 {
        let value = match self.locate(index) {
            Some((true, slot)) => self.registers.get(slot).copied(),
            Some((false, slot)) => self.stack.get(slot).copied(),
            None => None,
        };

        value.unwrap_or_else(|| {
            trace!(index, param_count = self.param_count, "argument read out of range");
            0
        })
    }

    pub fn write_argument(&mut self, index: u32, value: impl IntoSlot) {
        let slot = match self.locate(index) {
            Some((true, slot)) => self.registers.get_mut(slot),
            Some((false, slot)) => self.stack.get_mut(slot),
            None => None,
        };

        match slot {
            Some(slot) => *slot = value.into_slot(),
            None => trace!(index, param_count = self.param_count, "argument write dropped"),
        }
    }

    pub fn read_return_value(&self) -> u64 {
        self.registers.get(RETURN_SLOT).copied().unwrap_or(0)
    }

    pub fn write_return_value(&mut self, value: impl IntoSlot) {
        if let Some(slot) = self.registers.get_mut(RETURN_SLOT) {
            *slot = value.into_slot();
        }
    }

    /// Continue at `target` instead of the original service once the
    /// handler returns
    pub fn redirect_syscall(&mut self, target: u64) -> Result<()> {
        let available = self.registers.len();
        let slot = self
            .registers
            .get_mut(REDIRECT_SLOT)
            .ok_or(Error::RedirectSlotMissing(available))?;
        *slot = target;
        Ok(())
    }

    /// Current content of the redirect slot
    pub fn redirect_target(&self) -> Option<u64> {
        self.registers.get(REDIRECT_SLOT).copied()
    }

    /// All declared arguments in order
    pub fn arguments(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.param_count).map(move |i| self.read_argument(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers() -> Vec<u64> {
        vec![0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8]
    }

    fn stack() -> Vec<u64> {
        vec![0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]
    }

    fn check_layout(register_slot_count: u32) {
        let mut regs = registers();
        let mut stk = stack();
        let param_count = register_slot_count + 4;
        let view = ArgumentView::new(param_count, register_slot_count, &mut regs, &mut stk);

        for index in 0..param_count {
            let expected = if index < register_slot_count {
                0xA0 + index as u64
            } else {
                0xB0 + (index - register_slot_count) as u64
            };
            assert_eq!(
                view.read_argument(index),
                expected,
                "index {} with {} register slots",
                index,
                register_slot_count
            );
        }
    }

    #[test]
    fn test_layout_x86_no_register_slots() {
        check_layout(0);
    }

    #[test]
    fn test_layout_single_register_slot() {
        check_layout(1);
    }

    #[test]
    fn test_layout_x64_four_register_slots() {
        check_layout(4);
    }

    #[test]
    fn test_argument_never_aliases_redirect_slot() {
        let mut regs = [0u64; 8];
        let mut stk = [0u64; 2];
        let mut view = ArgumentView::new(8, 6, &mut regs, &mut stk);
        view.write_argument(4, 0xDEAD_BEEFu64);
        assert_eq!(view.redirect_target(), Some(0));
        assert_eq!(view.read_argument(4), 0);

        view.redirect_syscall(0x1234).unwrap();
        assert_eq!(view.read_argument(4), 0);
        view.write_argument(5, 5u64);
        assert_eq!(view.read_argument(5), 5);
        assert_eq!(view.redirect_target(), Some(0x1234));
    }

    #[test]
    fn test_first_stack_argument_is_stack_slot_zero() {
        let mut regs = registers();
        let mut stk = stack();
        let view = ArgumentView::for_convention(CallingConvention::X64, 6, &mut regs, &mut stk);
        assert_eq!(view.read_argument(4), 0xB0);
        assert_eq!(view.read_argument(5), 0xB1);
    }

    #[test]
    fn test_out_of_range_read_is_zero() {
        let mut regs = registers();
        let mut stk = stack();
        let view = ArgumentView::new(3, 4, &mut regs, &mut stk);
        assert_eq!(view.read_argument(3), 0);
        assert_eq!(view.read_argument(4), 0);
        assert_eq!(view.read_argument(u32::MAX), 0);
    }

    #[test]
    fn test_out_of_range_write_is_dropped() {
        for bound in [ArgumentBound::Strict, ArgumentBound::Legacy] {
            let mut regs = registers();
            let mut stk = stack();
            {
                let mut view = ArgumentView::new(5, 4, &mut regs, &mut stk).with_bound(bound);
                view.write_argument(6, 0xDEADu64);
                view.write_argument(100, 0xDEADu64);
                view.write_argument(u32::MAX, 0xDEADu64);
            }
            assert_eq!(regs, registers());
            assert_eq!(stk, stack());
        }
    }

    #[test]
    fn test_index_past_backing_array_is_zero() {
        let mut regs = vec![1, 2];
        let mut stk = vec![];
        // declared arity claims more than was captured
        let mut view = ArgumentView::new(8, 4, &mut regs, &mut stk);
        assert_eq!(view.read_argument(1), 2);
        assert_eq!(view.read_argument(2), 0);
        assert_eq!(view.read_argument(5), 0);
        view.write_argument(5, 7u64);
        assert_eq!(view.read_argument(5), 0);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut regs = registers();
        let mut stk = stack();
        let mut view = ArgumentView::new(7, 4, &mut regs, &mut stk);

        view.write_argument(1, 0x1122_3344_5566_7788u64);
        assert_eq!(view.read_argument(1), 0x1122_3344_5566_7788);

        view.write_argument(5, -1i32);
        assert_eq!(view.read_argument(5), u64::MAX);

        view.write_argument(6, 0xABu8);
        assert_eq!(view.read_argument(6), 0xAB);

        view.write_argument(0, (1u128 << 64) | 0x42);
        assert_eq!(view.read_argument(0), 0x42);

        view.write_argument(2, true);
        assert_eq!(view.read_argument(2), 1);
    }

    #[test]
    fn test_stack_write_lands_at_offset() {
        let mut regs = registers();
        let mut stk = stack();
        {
            let mut view = ArgumentView::new(6, 4, &mut regs, &mut stk);
            view.write_argument(5, 0x55u64);
        }
        assert_eq!(stk[1], 0x55);
        assert_eq!(regs, registers());
    }

    #[test]
    fn test_return_value_ignores_arity() {
        let mut regs = vec![0; 5];
        let mut stk = vec![];
        let mut view = ArgumentView::new(0, 4, &mut regs, &mut stk);
        view.write_return_value(NtStatus::ACCESS_VIOLATION);
        assert_eq!(view.read_return_value(), 0xFFFF_FFFF_C000_0005);
        assert_eq!(regs[0], 0xFFFF_FFFF_C000_0005);
    }

    #[test]
    fn test_return_value_on_empty_registers() {
        let mut regs = vec![];
        let mut stk = vec![];
        let mut view = ArgumentView::new(0, 0, &mut regs, &mut stk);
        view.write_return_value(5u32);
        assert_eq!(view.read_return_value(), 0);
    }

    #[test]
    fn test_redirect_writes_only_slot_four() {
        let mut regs = registers();
        let mut stk = stack();
        {
            let mut view = ArgumentView::new(6, 4, &mut regs, &mut stk);
            view.redirect_syscall(0xFFFF_F800_1234_0000).unwrap();
            assert_eq!(view.redirect_target(), Some(0xFFFF_F800_1234_0000));
        }

        let mut expected = registers();
        expected[REDIRECT_SLOT] = 0xFFFF_F800_1234_0000;
        assert_eq!(regs, expected);
        assert_eq!(stk, stack());
    }

    #[test]
    fn test_redirect_without_slot_fails_cleanly() {
        let mut regs = vec![1, 2, 3, 4];
        let mut stk = vec![];
        let mut view = ArgumentView::new(4, 4, &mut regs, &mut stk);
        let err = view.redirect_syscall(0x1000).unwrap_err();
        assert!(matches!(err, Error::RedirectSlotMissing(4)));
        assert_eq!(regs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_legacy_bound_admits_param_count() {
        let mut regs = registers();
        let mut stk = stack();
        let strict = ArgumentView::new(4, 4, &mut regs, &mut stk);
        assert_eq!(strict.read_argument(4), 0);

        let legacy = strict.with_bound(ArgumentBound::Legacy);
        assert_eq!(legacy.read_argument(4), 0xB0);
        assert_eq!(legacy.read_argument(5), 0);
    }

    #[test]
    fn test_arguments_iterator() {
        let mut regs = registers();
        let mut stk = stack();
        let view = ArgumentView::new(6, 4, &mut regs, &mut stk);
        let args: Vec<u64> = view.arguments().collect();
        assert_eq!(args, vec![0xA0, 0xA1, 0xA2, 0xA3, 0xB0, 0xB1]);
    }

    #[test]
    fn test_bound_serialization() {
        let json = serde_json::to_string(&ArgumentBound::Legacy).unwrap();
        assert_eq!(json, "\"legacy\"");
        assert_eq!(ArgumentBound::default(), ArgumentBound::Strict);
    }
}
