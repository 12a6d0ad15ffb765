//! Build target description.
//!
//! The compiler only needs a handful of facts about the target: its triple
//! (handed to LLVM verbatim), the operating system component (for
//! `link(platform = ...)` filters) and the machine word size, which drives
//! pointer and pointer-sized integer layout.

use inkwell::targets::TargetMachine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    triple: String,
}

impl Target {
    pub fn new(triple: impl Into<String>) -> Self {
        Target {
            triple: triple.into(),
        }
    }

    /// The triple of the machine the compiler itself runs on.
    pub fn host() -> Self {
        let triple = TargetMachine::get_default_triple();
        Target::new(triple.as_str().to_string_lossy().into_owned())
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn arch(&self) -> &str {
        self.triple.split('-').next().unwrap_or(&self.triple)
    }

    /// The operating system component of the triple. Triples come as either
    /// `arch-vendor-os(-env)` or `arch-os`.
    pub fn os(&self) -> &str {
        let parts: Vec<&str> = self.triple.split('-').collect();
        match parts.len() {
            0 | 1 => "unknown",
            2 => parts[1],
            _ => parts[2],
        }
    }

    pub fn is_64bit(&self) -> bool {
        matches!(
            self.arch(),
            "x86_64" | "amd64" | "aarch64" | "arm64" | "riscv64" | "mips64" | "powerpc64"
                | "powerpc64le" | "sparc64" | "s390x" | "wasm64" | "loongarch64"
        )
    }

    /// Word size in bits, 32 or 64.
    pub fn word_size(&self) -> u32 {
        if self.is_64bit() {
            64
        } else {
            32
        }
    }

    /// Size of a pointer in bytes.
    pub fn pointer_size(&self) -> usize {
        (self.word_size() / 8) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_size() {
        assert_eq!(Target::new("x86_64-unknown-linux-gnu").word_size(), 64);
        assert_eq!(Target::new("aarch64-apple-darwin").word_size(), 64);
        assert_eq!(Target::new("i686-unknown-linux-gnu").word_size(), 32);
        assert_eq!(Target::new("armv7-unknown-linux-gnueabihf").word_size(), 32);
    }

    #[test]
    fn test_os_component() {
        assert_eq!(Target::new("x86_64-unknown-linux-gnu").os(), "linux");
        assert_eq!(Target::new("aarch64-apple-darwin").os(), "darwin");
        assert_eq!(Target::new("wasm32-wasi").os(), "wasi");
    }
}
