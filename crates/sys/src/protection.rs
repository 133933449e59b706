//! Page protection flags

use bitflags::bitflags;

bitflags! {
    /// Protection flags for a region of process memory
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        /// Pages can be read
        const READ = 0x1;
        /// Pages can be written
        const WRITE = 0x2;
        /// Pages can be executed
        const EXECUTE = 0x4;
    }
}

impl Protection {
    /// Read + write
    pub const READ_WRITE: Protection = Protection::READ.union(Protection::WRITE);

    /// Read + execute (typical for code pages)
    pub const READ_EXECUTE: Protection = Protection::READ.union(Protection::EXECUTE);

    /// Read + write + execute (freshly allocated trampoline pages)
    pub const READ_WRITE_EXECUTE: Protection = Protection::READ
        .union(Protection::WRITE)
        .union(Protection::EXECUTE);

    /// Whether these flags permit writing
    pub fn is_writable(self) -> bool {
        self.contains(Protection::WRITE)
    }

    /// Whether these flags permit execution
    pub fn is_executable(self) -> bool {
        self.contains(Protection::EXECUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_flags() {
        assert!(Protection::READ_WRITE_EXECUTE.is_writable());
        assert!(Protection::READ_WRITE_EXECUTE.is_executable());
        assert!(!Protection::READ_EXECUTE.is_writable());
        assert!(!Protection::READ_WRITE.is_executable());
    }
}
