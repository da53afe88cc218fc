// Consistent exit codes for the intelhub CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = hub not reachable
//   11 = authentication error
//   13 = network error

use std::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    HubDown = 10,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<serde_json::Error>().is_some() {
                return Self::Usage;
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                        Self::HubDown
                    }
                    std::io::ErrorKind::TimedOut => Self::Network,
                    _ => Self::Error,
                };
            }
        }

        let msg = format!("{err:#}").to_ascii_lowercase();
        if msg.contains("401") || msg.contains("unauthorized") || msg.contains("auth_invalid_token") {
            return Self::Auth;
        }
        if msg.contains("connection refused") {
            return Self::HubDown;
        }
        if msg.contains("timed out") {
            return Self::Network;
        }
        if msg.contains("invalid hub url") || msg.contains("must use ws or wss") {
            return Self::Usage;
        }

        Self::Error
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::HubDown.code(), 10);
        assert_eq!(ExitCode::Auth.code(), 11);
        assert_eq!(ExitCode::Network.code(), 13);
    }

    #[test]
    fn from_error_connection_refused_is_hub_down() {
        let err = anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(ExitCode::from_error(&err), ExitCode::HubDown);
    }

    #[test]
    fn from_error_timeout_is_network() {
        let err = anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connection timed out",
        ));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Network);
    }

    #[test]
    fn from_error_rejected_upgrade_is_auth() {
        let err = anyhow::anyhow!("HTTP error: 401 Unauthorized")
            .context("failed to connect to hub at ws://localhost:5000/ws");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Auth);
    }

    #[test]
    fn from_error_bad_payload_is_usage() {
        let parse = serde_json::from_str::<serde_json::Value>("{nope").expect_err("invalid json");
        let err = anyhow::Error::new(parse).context("--data is not valid JSON");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Usage);
    }

    #[test]
    fn from_error_generic_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
