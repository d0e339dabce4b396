//! Process exit codes.

/// Exit codes reported by the `swc` driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    ErrorCmdLine = -1,
    HardwareException = -2,
    PanicBox = -3,
    ErrorCommand = -4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_contract() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::ErrorCmdLine.code(), -1);
        assert_eq!(ExitCode::HardwareException.code(), -2);
        assert_eq!(ExitCode::PanicBox.code(), -3);
        assert_eq!(ExitCode::ErrorCommand.code(), -4);
    }
}
