//! Information about the thread that made an intercepted call

use serde::{Deserialize, Serialize};

pub const MAX_PATH: usize = 260;
pub const MAX_FRAME_DEPTH: usize = 50;

/// Placeholder stored when a module path does not fit `MAX_PATH`
pub const NAME_TOO_LONG: &str = "NAME_TOO_LONG";

/// A loaded image, kernel or user mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub path: String,
    pub base: u64,
    pub size: u64,
}

impl ModuleInfo {
    pub fn new(path: impl Into<String>, base: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            base,
            size,
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }
}

/// One return address of the caller's stack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub frame_address: u64,
    /// Zero until resolved against a module list
    pub module_base: u64,
    pub module_path: String,
}

/// Process and stack of the thread that triggered a probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    pub process_id: u64,
    pub process_name: String,
    pub is_wow64: bool,
    pub frames: Vec<StackFrame>,
}

impl CallerInfo {
    pub fn new(process_id: u64, process_name: impl Into<String>) -> Self {
        Self {
            process_id,
            process_name: process_name.into(),
            ..Default::default()
        }
    }

    pub fn with_wow64(mut self, is_wow64: bool) -> Self {
        self.is_wow64 = is_wow64;
        self
    }

    /// Record raw return addresses, keeping at most `MAX_FRAME_DEPTH`
    pub fn with_frames(mut self, addresses: &[u64]) -> Self {
        self.frames = addresses
            .iter()
            .take(MAX_FRAME_DEPTH)
            .map(|&frame_address| StackFrame {
                frame_address,
                ..Default::default()
            })
            .collect();
        self
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_target_proc_id(&self, pid: u64) -> bool {
        self.process_id == pid
    }

    pub fn is_target_proc_name(&self, name: &str) -> bool {
        self.process_name == name
    }

    /// Attribute each unresolved frame to the first module containing it
    ///
    /// Frames that already carry a module are left alone, so kernel modules
    /// can be applied before user-mode ones.
    pub fn resolve_frames(&mut self, modules: &[ModuleInfo]) {
        for module in modules {
            for frame in self.frames.iter_mut() {
                if frame.module_base != 0 || !module.contains(frame.frame_address) {
                    continue;
                }
                frame.module_base = module.base;
                frame.module_path = if module.path.len() <= MAX_PATH {
                    module.path.clone()
                } else {
                    NAME_TOO_LONG.to_string()
                };
            }
        }
    }
}
