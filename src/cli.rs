use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Obtains a TLS certificate for a hostname from an ACME CA, keeps it
/// renewed in the background, and serves a demo HTTPS endpoint with it.
#[derive(Debug, Parser)]
#[command(name = "certsteward", version, about)]
pub struct Cli {
    /// Directory the certificate cache lives in
    #[arg(long, default_value = ".")]
    pub cache_path: PathBuf,

    /// Path to the DNS provider configuration file
    #[arg(long, default_value = ".certsteward.configuration")]
    pub configuration_path: PathBuf,

    /// Hostname to obtain a certificate for
    #[arg(long, required = true)]
    pub hostname: String,

    /// Contact email registered with the CA
    #[arg(long, default_value = "foo@example.com")]
    pub email: String,

    /// Talk to the staging ACME directory; pass --debug-mode=false for
    /// production once everything works
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub debug_mode: bool,

    /// host:port the demo TLS server listens on
    #[arg(long, default_value = "0.0.0.0:443")]
    pub hostport: String,

    /// How long before certificate expiration a new certificate will be
    /// requested
    #[arg(long, default_value = "30days", value_parser = crate::time::parse_duration)]
    pub renew_before: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["certsteward", "--hostname", "foo.example.com"]);
        assert_eq!(cli.hostname, "foo.example.com");
        assert!(cli.debug_mode);
        assert_eq!(cli.hostport, "0.0.0.0:443");
        assert_eq!(cli.renew_before, Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(cli.cache_path, PathBuf::from("."));
    }

    #[test]
    fn test_hostname_is_required() {
        Cli::try_parse_from(["certsteward"]).unwrap_err();
    }

    #[test]
    fn test_renew_before_parses_durations() {
        let cli = Cli::parse_from([
            "certsteward",
            "--hostname",
            "foo.example.com",
            "--renew-before",
            "12h",
        ]);
        assert_eq!(cli.renew_before, Duration::from_secs(12 * 60 * 60));
    }

    #[test]
    fn test_debug_mode_can_be_disabled() {
        let cli = Cli::parse_from([
            "certsteward",
            "--hostname",
            "foo.example.com",
            "--debug-mode",
            "false",
        ]);
        assert!(!cli.debug_mode);
    }
}
