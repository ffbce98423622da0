//! Captured machine state of an intercepted call

use strace_core::machine_state::{REDIRECT_SLOT, RETURN_SLOT};
use strace_core::CallingConvention;

/// Register and stack slots of one call, as the host's probe captured them
///
/// `registers` always has room for the return and redirect slots, whatever
/// the calling convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallFrame {
    pub service: u64,
    pub param_count: u32,
    pub convention: CallingConvention,
    pub registers: Vec<u64>,
    pub stack: Vec<u64>,
}

impl SyscallFrame {
    /// Lay `args` out the way `convention` passes them
    pub fn new(service: u64, convention: CallingConvention, args: &[u64]) -> Self {
        let in_registers = (convention.register_slot_count() as usize).min(args.len());
        let mut registers = vec![0u64; (convention.register_slot_count() as usize).max(REDIRECT_SLOT + 1)];
        registers[..in_registers].copy_from_slice(&args[..in_registers]);

        Self {
            service,
            param_count: args.len() as u32,
            convention,
            registers,
            stack: args[in_registers..].to_vec(),
        }
    }

    /// Argument `index` as currently stored, zero if absent
    pub fn argument(&self, index: usize) -> u64 {
        let in_registers = self.convention.register_slot_count() as usize;
        if index < in_registers {
            self.registers.get(index).copied().unwrap_or(0)
        } else {
            self.stack.get(index - in_registers).copied().unwrap_or(0)
        }
    }

    pub fn return_value(&self) -> u64 {
        self.registers.get(RETURN_SLOT).copied().unwrap_or(0)
    }

    pub fn set_return_value(&mut self, value: u64) {
        if let Some(slot) = self.registers.get_mut(RETURN_SLOT) {
            *slot = value;
        }
    }

    /// Where execution continues after the entry probe
    pub fn continuation(&self) -> u64 {
        self.registers
            .get(REDIRECT_SLOT)
            .copied()
            .unwrap_or(self.service)
    }

    pub(crate) fn reset_continuation(&mut self) {
        if self.registers.len() <= REDIRECT_SLOT {
            self.registers.resize(REDIRECT_SLOT + 1, 0);
        }
        self.registers[REDIRECT_SLOT] = self.service;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x64_layout() {
        let frame = SyscallFrame::new(0x1000, CallingConvention::X64, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.registers, vec![1, 2, 3, 4, 0]);
        assert_eq!(frame.stack, vec![5, 6]);
        assert_eq!(frame.param_count, 6);
        assert_eq!(frame.argument(4), 5);
        assert_eq!(frame.argument(9), 0);
    }

    #[test]
    fn test_x86_layout() {
        let frame = SyscallFrame::new(0x1000, CallingConvention::X86, &[7, 8]);
        assert_eq!(frame.registers, vec![0; 5]);
        assert_eq!(frame.stack, vec![7, 8]);
        assert_eq!(frame.argument(1), 8);
    }

    #[test]
    fn test_few_arguments() {
        let mut frame = SyscallFrame::new(0x1000, CallingConvention::X64, &[9]);
        assert_eq!(frame.registers.len(), REDIRECT_SLOT + 1);
        assert!(frame.stack.is_empty());
        frame.reset_continuation();
        assert_eq!(frame.continuation(), 0x1000);
        frame.set_return_value(0xC000_0022);
        assert_eq!(frame.return_value(), 0xC000_0022);
    }
}
